//! Shared helpers for hub integration tests.

use hub::config::HubConfig;
use hub::hub::{Hub, HubError};
use hub::transport::{ReqSocket, SubSocket};
use relay_wire::Endpoint;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A hub running on ephemeral ports, with handles to drive and stop it.
pub struct RunningHub {
    pub receiver: Endpoint,
    pub publisher: Endpoint,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), HubError>>,
}

impl RunningHub {
    /// Start a hub on `127.0.0.1:0` endpoints with the given static
    /// chain links.
    pub async fn start(chain_links: Vec<Endpoint>) -> Self {
        let config = HubConfig {
            receiver_listen: Endpoint::parse("tcp://127.0.0.1:0").expect("valid endpoint"),
            publisher_listen: Endpoint::parse("tcp://127.0.0.1:0").expect("valid endpoint"),
            chain_links,
            discovery: None,
        };
        Self::start_with(config).await
    }

    pub async fn start_with(config: HubConfig) -> Self {
        let hub = Hub::bind(config).await.expect("hub bind failed");
        let receiver = hub.receiver_endpoint();
        let publisher = hub.publisher_endpoint();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(hub.run(shutdown_rx));
        RunningHub {
            receiver,
            publisher,
            shutdown,
            task,
        }
    }

    /// Inject one payload on a fresh requester connection; returns the
    /// reply as text.
    pub async fn inject(&self, payload: &[u8]) -> String {
        let mut requester = ReqSocket::connect(&self.receiver)
            .await
            .expect("connect to receiver failed");
        let reply = timeout(RECV_TIMEOUT, requester.request(payload))
            .await
            .expect("timed out waiting for reply")
            .expect("request failed");
        String::from_utf8(reply).expect("reply is not UTF-8")
    }

    /// Attach a subscriber to the fan-out endpoint.
    pub async fn subscribe(&self) -> SubSocket {
        SubSocket::connect(&self.publisher, "test", b"")
            .await
            .expect("connect to publisher failed")
    }

    /// Request shutdown without waiting for it.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the run-loop to finish.
    pub async fn join(self) {
        timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("hub did not stop in time")
            .expect("hub task panicked")
            .expect("hub run failed");
    }

    pub async fn stop(self) {
        self.signal_shutdown();
        self.join().await;
    }
}

/// Read one payload, bounded.
pub async fn recv_payload(subscriber: &mut SubSocket) -> Vec<u8> {
    timeout(RECV_TIMEOUT, subscriber.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("subscriber receive failed")
}

/// Assert that nothing arrives within a short window — the "exactly
/// once" half of the relay laws.
pub async fn assert_silent(subscriber: &mut SubSocket) {
    match timeout(Duration::from_millis(500), subscriber.recv()).await {
        Err(_) => {}
        Ok(Ok(payload)) => panic!(
            "unexpected payload: {:?}",
            String::from_utf8_lossy(&payload)
        ),
        Ok(Err(e)) => panic!("subscriber receive failed: {e}"),
    }
}

/// Let freshly connected subscribers finish their hello before
/// publishing anything at them.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
