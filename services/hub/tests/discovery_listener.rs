//! Discovery scenarios at the listener layer, with membership events
//! injected directly so no multicast-capable network is needed.  The
//! full beacon-to-beacon path runs in the `#[ignore]`d test at the
//! bottom.

mod common;

use common::{RunningHub, assert_silent, recv_payload, settle};
use hub::config::{DiscoveryConfig, HubConfig};
use hub::discovery::{
    DiscoveryEvent, HDR_KEY, HDR_PUB_ADDR, HDR_PUB_PORT, HDR_PUB_PTCL, HDR_REC_ADDR, HDR_REC_PORT,
    HDR_REC_PTCL, listener::run_listener,
};
use relay_wire::{Endpoint, sha1_hex};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn peer_headers(key_hash: &str, pub_port: u16, rec_port: u16) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(HDR_PUB_PTCL.to_owned(), "tcp".to_owned());
    headers.insert(HDR_PUB_ADDR.to_owned(), "*".to_owned());
    headers.insert(HDR_PUB_PORT.to_owned(), pub_port.to_string());
    headers.insert(HDR_REC_PTCL.to_owned(), "tcp".to_owned());
    headers.insert(HDR_REC_ADDR.to_owned(), "*".to_owned());
    headers.insert(HDR_REC_PORT.to_owned(), rec_port.to_string());
    headers.insert(HDR_KEY.to_owned(), key_hash.to_owned());
    headers
}

struct ListenerHarness {
    events: mpsc::Sender<DiscoveryEvent>,
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHarness {
    fn start(hub: &RunningHub, key: &str) -> Self {
        let (events, events_rx) = mpsc::channel(8);
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_listener(
            events_rx,
            hub.receiver.clone(),
            sha1_hex(key.as_bytes()),
            stop_rx,
        ));
        ListenerHarness { events, stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = tokio::time::timeout(common::RECV_TIMEOUT, self.task).await;
    }
}

#[tokio::test]
async fn matching_key_enter_reaches_the_hub_with_observed_address() {
    let hub = RunningHub::start(vec![]).await;
    let mut subscriber = hub.subscribe().await;
    settle().await;

    let harness = ListenerHarness::start(&hub, "TDRS");
    let key_hash = sha1_hex(b"TDRS");
    harness
        .events
        .send(DiscoveryEvent::Enter {
            peer_id: "peerA".to_owned(),
            headers: peer_headers(&key_hash, 19790, 19780),
            observed_addr: "127.0.0.1".parse().expect("valid address"),
        })
        .await
        .expect("listener gone");

    // The hub relays the injected control message, with both wildcard
    // header addresses replaced by the observed gossip address.
    assert_eq!(
        recv_payload(&mut subscriber).await,
        b"PEER:ENTER:peerA:tcp:127.0.0.1:19790:tcp:127.0.0.1:19780"
    );

    harness
        .events
        .send(DiscoveryEvent::Exit {
            peer_id: "peerA".to_owned(),
        })
        .await
        .expect("listener gone");
    assert_eq!(
        recv_payload(&mut subscriber).await,
        b"PEER:EXIT:peerA:*:*:*:*:*:*"
    );

    // The worker is gone now; a repeated exit is answered
    // NOT AVAILABLE and suppressed, so nothing more is relayed.
    harness
        .events
        .send(DiscoveryEvent::Exit {
            peer_id: "peerA".to_owned(),
        })
        .await
        .expect("listener gone");
    assert_silent(&mut subscriber).await;

    harness.stop().await;
    hub.stop().await;
}

#[tokio::test]
async fn mismatched_key_event_is_dropped_before_the_hub() {
    let hub = RunningHub::start(vec![]).await;
    let mut subscriber = hub.subscribe().await;
    settle().await;

    let harness = ListenerHarness::start(&hub, "TDRS");
    harness
        .events
        .send(DiscoveryEvent::Enter {
            peer_id: "stranger".to_owned(),
            headers: peer_headers(&sha1_hex(b"OTHER-KEY"), 19790, 19780),
            observed_addr: "127.0.0.1".parse().expect("valid address"),
        })
        .await
        .expect("listener gone");

    assert_silent(&mut subscriber).await;

    harness.stop().await;
    hub.stop().await;
}

#[tokio::test]
#[ignore = "requires multicast-capable loopback"]
async fn two_hubs_discover_each_other_over_the_beacon() {
    let discovery = |key: &str| DiscoveryConfig {
        interval: Duration::from_millis(200),
        interface: None,
        port: 56990,
        key: key.to_owned(),
    };
    let config = |key: &str| HubConfig {
        receiver_listen: Endpoint::parse("tcp://127.0.0.1:0").expect("valid endpoint"),
        publisher_listen: Endpoint::parse("tcp://127.0.0.1:0").expect("valid endpoint"),
        chain_links: vec![],
        discovery: Some(discovery(key)),
    };

    let h1 = RunningHub::start_with(config("TDRS")).await;
    let h2 = RunningHub::start_with(config("TDRS")).await;

    // A few announce intervals for the mutual ENTER + worker connects.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut s1 = h1.subscribe().await;
    let mut s2 = h2.subscribe().await;
    settle().await;

    h1.inject(b"discovered").await;
    assert_eq!(recv_payload(&mut s1).await, b"discovered");
    assert_eq!(recv_payload(&mut s2).await, b"discovered");

    h1.stop().await;
    h2.stop().await;
}
