//! Chain-client worker.
//!
//! One worker per peer link.  The worker subscribes to the peer's
//! publisher (identity `"hub"`, empty filter) and re-injects every
//! payload it hears into this hub's own receiver — unless the ledger
//! says the payload originated here, in which case the matching entry is
//! consumed and the payload dropped.  The re-injection reply only gets
//! logged; it never changes worker state.
//!
//! A peer that is not up yet, or that goes away, is retried with a
//! fixed backoff until the worker is told to stop.  Both sockets are
//! owned by the worker task and released on every exit path.

use crate::ledger::Ledger;
use crate::transport::{ReqSocket, SubSocket, TransportError};
use relay_wire::{Endpoint, Reply, TERMINATE, sha1_hex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Parameters a worker runs with.  `link` doubles as the ledger key, so
/// it must be the same endpoint string the hub records entries under.
pub struct ChainClient {
    pub peer_id: String,
    /// The peer's publisher endpoint (never a wildcard).
    pub link: Endpoint,
    /// This hub's own receiver, loopback-rewritten.
    pub receiver: Endpoint,
    pub ledger: Arc<Ledger>,
}

impl ChainClient {
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let link = self.link.to_string();
        info!(peer = %self.peer_id, %link, "chain client starting");

        'link: while !*stop.borrow() {
            let connected = tokio::select! {
                biased;
                () = stop_requested(&mut stop) => break 'link,
                c = self.connect() => c,
            };
            let (mut subscriber, mut sender) = match connected {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(peer = %self.peer_id, error = %e, "connect failed, retrying");
                    tokio::select! {
                        biased;
                        () = stop_requested(&mut stop) => break 'link,
                        () = sleep(RECONNECT_DELAY) => continue 'link,
                    }
                }
            };
            info!(peer = %self.peer_id, %link, "chain client connected");

            loop {
                let payload = tokio::select! {
                    biased;
                    () = stop_requested(&mut stop) => break 'link,
                    r = subscriber.recv() => match r {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!(peer = %self.peer_id, error = %e, "subscriber receive failed, reconnecting");
                            continue 'link;
                        }
                    },
                };

                if payload == TERMINATE {
                    // The peer publisher is draining; never re-inject the
                    // sentinel.  Fall back to the reconnect path.
                    info!(peer = %self.peer_id, "peer publisher terminating");
                    tokio::select! {
                        biased;
                        () = stop_requested(&mut stop) => break 'link,
                        () = sleep(RECONNECT_DELAY) => continue 'link,
                    }
                }

                let hash = sha1_hex(&payload);
                if self.ledger.consume(&hash, &link) {
                    debug!(peer = %self.peer_id, %hash, "suppressed self-originated payload");
                    continue;
                }

                let reply = tokio::select! {
                    biased;
                    () = stop_requested(&mut stop) => break 'link,
                    r = sender.request(&payload) => r,
                };
                match reply {
                    Ok(reply) if Reply::is_forwarded(&reply) => {
                        debug!(peer = %self.peer_id, %hash, "re-injected");
                    }
                    Ok(reply) => {
                        warn!(
                            peer = %self.peer_id,
                            reply = %String::from_utf8_lossy(&reply),
                            "re-injection refused"
                        );
                    }
                    Err(e) => {
                        warn!(peer = %self.peer_id, error = %e, "re-injection failed, reconnecting");
                        continue 'link;
                    }
                }
            }
        }

        info!(peer = %self.peer_id, "chain client stopped");
    }

    async fn connect(&self) -> Result<(SubSocket, ReqSocket), TransportError> {
        let subscriber = SubSocket::connect(&self.link, "hub", b"").await?;
        let sender = ReqSocket::connect(&self.receiver).await?;
        Ok((subscriber, sender))
    }
}

/// Resolves once a stop has been requested.  A dropped stop sender
/// counts as a stop, so orphaned workers never outlive their supervisor.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
