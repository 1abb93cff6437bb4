//! Peer-discovery control plane.
//!
//! Two layers keep the gossip substrate replaceable:
//!
//! - [`beacon`] — group membership over UDP multicast.  Periodic
//!   announce datagrams carry this node's headers; sightings and
//!   silences of other nodes become [`DiscoveryEvent`]s.
//! - [`listener`] — consumes those events, filters on the shared group
//!   key, and injects `PEER:ENTER`/`PEER:EXIT` control messages into
//!   this hub's own receiver, where they drive the supervisor like any
//!   other control payload.

pub mod beacon;
pub mod listener;

pub use beacon::{Beacon, DiscoveryEvent};

use crate::config::DiscoveryConfig;
use relay_wire::{Endpoint, sha1_hex};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::warn;

// Headers advertised with every announce datagram.
pub const HDR_PUB_PTCL: &str = "X-PUB-PTCL";
pub const HDR_PUB_ADDR: &str = "X-PUB-ADDR";
pub const HDR_PUB_PORT: &str = "X-PUB-PORT";
pub const HDR_REC_PTCL: &str = "X-REC-PTCL";
pub const HDR_REC_ADDR: &str = "X-REC-ADDR";
pub const HDR_REC_PORT: &str = "X-REC-PORT";
pub const HDR_KEY: &str = "X-KEY";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery socket: {0}")]
    Socket(#[from] std::io::Error),
}

/// The running beacon + listener pair.  Singleton per hub; created when
/// discovery is enabled, destroyed only at shutdown.
pub struct Discovery {
    beacon: Beacon,
    listener_task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl Discovery {
    /// Join the group and start translating membership events.
    /// `publisher` and `receiver` are this hub's bound endpoints (the
    /// advertised addresses may be wildcards; peers substitute the
    /// observed gossip address anyway).
    pub async fn start(
        cfg: &DiscoveryConfig,
        publisher: &Endpoint,
        receiver: &Endpoint,
    ) -> Result<Self, DiscoveryError> {
        let hashed_key = sha1_hex(cfg.key.as_bytes());
        let headers = advertised_headers(publisher, receiver, &hashed_key);
        let (beacon, events) = Beacon::start(cfg, headers)?;

        let (stop, stop_rx) = watch::channel(false);
        let listener_task = tokio::spawn(listener::run_listener(
            events,
            receiver.for_local_connect(),
            hashed_key,
            stop_rx,
        ));

        Ok(Discovery {
            beacon,
            listener_task,
            stop,
        })
    }

    /// Leave the group and stop both tasks, bounded.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        self.beacon.stop().await;
        if timeout(Duration::from_secs(2), &mut self.listener_task)
            .await
            .is_err()
        {
            warn!("discovery listener did not stop in time, aborting");
            self.listener_task.abort();
        }
    }
}

fn advertised_headers(
    publisher: &Endpoint,
    receiver: &Endpoint,
    hashed_key: &str,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(HDR_PUB_PTCL.to_owned(), publisher.protocol.clone());
    headers.insert(HDR_PUB_ADDR.to_owned(), publisher.address.clone());
    headers.insert(HDR_PUB_PORT.to_owned(), port_header(publisher));
    headers.insert(HDR_REC_PTCL.to_owned(), receiver.protocol.clone());
    headers.insert(HDR_REC_ADDR.to_owned(), receiver.address.clone());
    headers.insert(HDR_REC_PORT.to_owned(), port_header(receiver));
    headers.insert(HDR_KEY.to_owned(), hashed_key.to_owned());
    headers
}

fn port_header(ep: &Endpoint) -> String {
    match ep.port {
        Some(port) => port.to_string(),
        None => "*".to_owned(),
    }
}
