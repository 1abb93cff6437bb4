//! The hub run-loop.
//!
//! One request at a time, in receive order: recv, react, reply — the
//! reply to request *k* is always sent before request *k + 1* is read.
//! A payload that parses as a peer-control message additionally drives
//! the supervisor; everything else (including `PEER:`-prefixed payloads
//! that do NOT parse) is relayed verbatim.
//!
//! The ledger entry for a payload is recorded strictly before the
//! publish is attempted, so a chain client receiving the echo is
//! guaranteed to observe the record.

use crate::config::HubConfig;
use crate::discovery::{Discovery, DiscoveryError};
use crate::ledger::Ledger;
use crate::supervisor::Supervisor;
use crate::transport::{PubSocket, RepSocket, Request, TransportError};
use relay_wire::{Endpoint, PeerControl, Reply, TERMINATE, sha1_hex};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// A hub with both endpoints bound, ready to run.
///
/// Binding is split from running so callers (and tests) can learn the
/// actually bound endpoints before the loop starts — relevant whenever
/// the configuration asked for port 0.
pub struct Hub {
    config: HubConfig,
    ledger: Arc<Ledger>,
    receiver: RepSocket,
    publisher: PubSocket,
    receiver_endpoint: Endpoint,
    publisher_endpoint: Endpoint,
}

impl Hub {
    /// Bind the receiver and publisher.  A bind failure is fatal.
    pub async fn bind(config: HubConfig) -> Result<Self, HubError> {
        let receiver = RepSocket::bind(&config.receiver_listen).await?;
        let publisher = PubSocket::bind(&config.publisher_listen).await?;
        let receiver_endpoint =
            with_actual_port(&config.receiver_listen, receiver.local_addr().port());
        let publisher_endpoint =
            with_actual_port(&config.publisher_listen, publisher.local_addr().port());
        info!(receiver = %receiver_endpoint, publisher = %publisher_endpoint, "hub bound");

        Ok(Hub {
            config,
            ledger: Arc::new(Ledger::new()),
            receiver,
            publisher,
            receiver_endpoint,
            publisher_endpoint,
        })
    }

    /// The receiver endpoint as a local client would dial it.
    pub fn receiver_endpoint(&self) -> Endpoint {
        self.receiver_endpoint.for_local_connect()
    }

    /// The publisher endpoint as a local subscriber would dial it.
    pub fn publisher_endpoint(&self) -> Endpoint {
        self.publisher_endpoint.for_local_connect()
    }

    /// Serve until `shutdown` flips, then drain: discovery first, then
    /// the workers, then the `TERMINATE` sentinel, then both sockets.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), HubError> {
        let Hub {
            config,
            ledger,
            mut receiver,
            publisher,
            receiver_endpoint,
            publisher_endpoint,
        } = self;

        let mut supervisor = Supervisor::new(&receiver_endpoint, Arc::clone(&ledger));
        supervisor.seed_static(&config.chain_links);

        let discovery = match &config.discovery {
            Some(cfg) => Some(Discovery::start(cfg, &publisher_endpoint, &receiver_endpoint).await?),
            None => None,
        };

        info!("hub running");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // A dropped shutdown sender counts as a shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                request = receiver.recv() => match request {
                    Ok(request) => serve(request, &ledger, &publisher, &mut supervisor).await,
                    Err(e) => warn!(error = %e, "receive failed"),
                }
            }
        }

        info!("hub draining");
        if let Some(discovery) = discovery {
            discovery.stop().await;
        }
        supervisor.stop_all().await;

        let _ = publisher.send(TERMINATE);
        // One beat for the subscriber writers to flush the sentinel.
        tokio::time::sleep(Duration::from_millis(200)).await;
        publisher.close();
        receiver.close();
        info!("hub stopped");
        Ok(())
    }
}

/// Serve one request: exactly one reply, sent before the caller reads
/// the next request.
async fn serve(
    request: Request,
    ledger: &Ledger,
    publisher: &PubSocket,
    supervisor: &mut Supervisor,
) {
    let reply = match control(&request.payload, supervisor).await {
        Some(reply) => reply,
        None => relay(&request.payload, ledger, publisher, supervisor),
    };
    request.respond(reply.encode().as_bytes());
}

/// React to a peer-control payload.  `Some` suppresses the relay and is
/// the final reply; `None` lets the payload relay — either because it is
/// not a (parseable) control message, or because control messages
/// themselves propagate through the chain.
async fn control(payload: &[u8], supervisor: &mut Supervisor) -> Option<Reply> {
    if !PeerControl::is_control(payload) {
        return None;
    }
    let text = std::str::from_utf8(payload).ok()?;
    match PeerControl::parse(text) {
        Ok(PeerControl::Enter { id, publisher, .. }) => {
            info!(peer = %id, link = %publisher, "peer entered");
            supervisor.spawn(&id, &publisher);
            None
        }
        Ok(PeerControl::Exit { id }) => {
            if supervisor.stop(&id).await {
                info!(peer = %id, "peer exited");
                None
            } else {
                debug!(peer = %id, "exit for unknown peer");
                Some(Reply::NotAvailable)
            }
        }
        Err(e) => {
            debug!(error = %e, "PEER-prefixed payload did not parse, relaying as payload");
            None
        }
    }
}

/// Record ledger entries for every active chain client, then fan the
/// payload out.  Entries for a failed publish are left in place; they
/// are consumed if the peer later echoes an identical payload, or leak
/// harmlessly.
fn relay(payload: &[u8], ledger: &Ledger, publisher: &PubSocket, supervisor: &Supervisor) -> Reply {
    let hash = sha1_hex(payload);
    ledger.record(&hash, &supervisor.active_links());
    match publisher.send(payload) {
        Ok(()) => {
            debug!(%hash, subscribers = publisher.subscriber_count(), "payload forwarded");
            Reply::Forwarded(hash)
        }
        Err(e) => {
            warn!(%hash, error = %e, "publish failed");
            Reply::Failed(hash)
        }
    }
}

fn with_actual_port(configured: &Endpoint, port: u16) -> Endpoint {
    Endpoint {
        protocol: configured.protocol.clone(),
        address: configured.address.clone(),
        port: Some(port),
    }
}
