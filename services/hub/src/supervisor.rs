//! Chain-client lifecycle.
//!
//! The supervisor owns the `peer_id → worker` map.  Workers are spawned
//! for static chain links at startup (synthetic ids `manual-1`,
//! `manual-2`, …) and for discovered peers as ENTER control messages
//! arrive; both kinds retire through the same stop path.  Map mutations
//! happen only on the hub loop task.

use crate::chain_client::ChainClient;
use crate::ledger::Ledger;
use relay_wire::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// How long a worker gets to wind down before it is aborted.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct WorkerHandle {
    link: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    workers: HashMap<String, WorkerHandle>,
    /// This hub's receiver, loopback-rewritten, handed to every worker.
    receiver: Endpoint,
    ledger: Arc<Ledger>,
}

impl Supervisor {
    pub fn new(receiver: &Endpoint, ledger: Arc<Ledger>) -> Self {
        Supervisor {
            workers: HashMap::new(),
            receiver: receiver.for_local_connect(),
            ledger,
        }
    }

    /// Seed workers for the static chain-link configuration.  Synthetic
    /// ids keep static peers on the same stop path as discovered ones.
    pub fn seed_static(&mut self, links: &[Endpoint]) {
        for (i, link) in links.iter().enumerate() {
            let id = format!("manual-{}", i + 1);
            self.spawn(&id, link);
        }
    }

    /// Start a worker for `peer_id`.  Duplicate starts are rejected, so
    /// repeated ENTER events for the same peer leave a single worker.
    /// A wildcard link is rewritten to loopback before the worker
    /// connects; concrete links are used as-is.
    pub fn spawn(&mut self, peer_id: &str, link: &Endpoint) {
        if self.workers.contains_key(peer_id) {
            info!(peer = %peer_id, "worker already running, ignoring duplicate start");
            return;
        }
        let link = link.for_local_connect();
        let (stop, stop_rx) = watch::channel(false);
        let client = ChainClient {
            peer_id: peer_id.to_owned(),
            link: link.clone(),
            receiver: self.receiver.clone(),
            ledger: Arc::clone(&self.ledger),
        };
        let task = tokio::spawn(client.run(stop_rx));
        info!(peer = %peer_id, link = %link, "worker started");
        self.workers.insert(
            peer_id.to_owned(),
            WorkerHandle {
                link: link.to_string(),
                stop,
                task,
            },
        );
    }

    /// Stop and remove the worker for `peer_id`.  Returns false when no
    /// such worker exists.
    pub async fn stop(&mut self, peer_id: &str) -> bool {
        match self.workers.remove(peer_id) {
            None => false,
            Some(handle) => {
                join_worker(peer_id, handle).await;
                info!(peer = %peer_id, "worker stopped");
                true
            }
        }
    }

    /// Stop every worker.  All stops are signalled first so the workers
    /// wind down concurrently within one grace period.
    pub async fn stop_all(&mut self) {
        for handle in self.workers.values() {
            let _ = handle.stop.send(true);
        }
        for (peer_id, handle) in self.workers.drain() {
            join_worker(&peer_id, handle).await;
        }
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.workers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The links the hub must record ledger entries for — one per
    /// active worker, keyed exactly as the workers consume them.
    pub fn active_links(&self) -> Vec<String> {
        self.workers.values().map(|h| h.link.clone()).collect()
    }
}

async fn join_worker(peer_id: &str, mut handle: WorkerHandle) {
    let _ = handle.stop.send(true);
    match timeout(STOP_GRACE, &mut handle.task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(peer = %peer_id, error = %e, "worker task failed"),
        Err(_) => {
            warn!(peer = %peer_id, "worker did not stop within grace period, aborting");
            handle.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Supervisor {
        let receiver = Endpoint::parse("tcp://127.0.0.1:1").unwrap();
        Supervisor::new(&receiver, Arc::new(Ledger::new()))
    }

    fn link(port: u16) -> Endpoint {
        Endpoint::parse(&format!("tcp://127.0.0.1:{port}")).unwrap()
    }

    #[tokio::test]
    async fn duplicate_spawn_leaves_one_worker() {
        let mut sup = supervisor();
        sup.spawn("peer", &link(9));
        sup.spawn("peer", &link(9));
        assert_eq!(sup.len(), 1);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn stop_reports_unknown_ids() {
        let mut sup = supervisor();
        assert!(!sup.stop("ghost").await);

        sup.spawn("peer", &link(9));
        assert!(sup.stop("peer").await);
        assert!(!sup.stop("peer").await);
        assert!(sup.is_empty());
    }

    #[tokio::test]
    async fn exit_then_enter_leaves_exactly_one_worker() {
        let mut sup = supervisor();
        sup.spawn("peer", &link(9));
        assert!(sup.stop("peer").await);
        sup.spawn("peer", &link(9));
        assert_eq!(sup.len(), 1);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn static_seeding_uses_manual_ids() {
        let mut sup = supervisor();
        sup.seed_static(&[link(9), link(10)]);
        assert!(sup.contains("manual-1"));
        assert!(sup.contains("manual-2"));
        assert_eq!(sup.len(), 2);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn wildcard_links_are_rewritten_for_workers() {
        let mut sup = supervisor();
        sup.spawn("peer", &Endpoint::parse("tcp://*:19790").unwrap());
        assert_eq!(sup.active_links(), vec!["tcp://127.0.0.1:19790".to_owned()]);
        sup.stop_all().await;
    }
}
