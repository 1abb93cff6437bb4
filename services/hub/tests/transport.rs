//! Transport-level behavior: exact-byte fan-out, subscription filters,
//! dropped-consumer isolation, and strict request/reply turns.

use hub::transport::{PubSocket, RepSocket, ReqSocket, SubSocket};
use relay_wire::Endpoint;
use std::time::Duration;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn ephemeral() -> Endpoint {
    Endpoint::parse("tcp://127.0.0.1:0").expect("valid endpoint")
}

fn local(port: u16) -> Endpoint {
    Endpoint::parse(&format!("tcp://127.0.0.1:{port}")).expect("valid endpoint")
}

async fn recv(subscriber: &mut SubSocket) -> Vec<u8> {
    timeout(RECV_TIMEOUT, subscriber.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("receive failed")
}

#[tokio::test]
async fn fanout_preserves_exact_bytes() {
    let publisher = PubSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(publisher.local_addr().port());

    let mut subscriber = SubSocket::connect(&endpoint, "test", b"")
        .await
        .expect("connect failed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let raw: Vec<u8> = vec![0x01, 0x02, 0x0D, 0x0A, 0xFF, 0xFE, 0x00, 0x41];
    publisher.send(&raw).expect("send failed");
    assert_eq!(recv(&mut subscriber).await, raw);
}

#[tokio::test]
async fn all_subscribers_receive_each_payload() {
    let publisher = PubSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(publisher.local_addr().port());

    let mut a = SubSocket::connect(&endpoint, "a", b"").await.expect("a failed");
    let mut b = SubSocket::connect(&endpoint, "b", b"").await.expect("b failed");
    let mut c = SubSocket::connect(&endpoint, "c", b"").await.expect("c failed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    publisher.send(b"HELLO FANOUT").expect("send failed");
    assert_eq!(recv(&mut a).await, b"HELLO FANOUT");
    assert_eq!(recv(&mut b).await, b"HELLO FANOUT");
    assert_eq!(recv(&mut c).await, b"HELLO FANOUT");
}

#[tokio::test]
async fn subscription_filter_selects_by_prefix() {
    let publisher = PubSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(publisher.local_addr().port());

    let mut filtered = SubSocket::connect(&endpoint, "ctl", b"PEER:")
        .await
        .expect("connect failed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    publisher.send(b"hello").expect("send failed");
    publisher.send(b"PEER:EXIT:x:*:*:*:*:*:*").expect("send failed");

    // Only the matching payload arrives.
    assert_eq!(recv(&mut filtered).await, b"PEER:EXIT:x:*:*:*:*:*:*");
}

#[tokio::test]
async fn dropped_subscriber_does_not_disturb_the_rest() {
    let publisher = PubSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(publisher.local_addr().port());

    let mut keeper = SubSocket::connect(&endpoint, "keeper", b"")
        .await
        .expect("connect failed");
    let goner = SubSocket::connect(&endpoint, "goner", b"")
        .await
        .expect("connect failed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(goner);
    tokio::time::sleep(Duration::from_millis(50)).await;

    publisher.send(b"STILL ALIVE").expect("send failed");
    assert_eq!(recv(&mut keeper).await, b"STILL ALIVE");
}

#[tokio::test]
async fn publishing_with_zero_subscribers_succeeds() {
    let publisher = PubSocket::bind(&ephemeral()).await.expect("bind failed");
    publisher.send(b"into the void").expect("send failed");
    assert_eq!(publisher.subscriber_count(), 0);
}

#[tokio::test]
async fn request_reply_echo_turns() {
    let mut receiver = RepSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(receiver.local_addr().port());

    tokio::spawn(async move {
        while let Ok(request) = receiver.recv().await {
            let mut reply = b"echo:".to_vec();
            reply.extend_from_slice(&request.payload);
            request.respond(&reply);
        }
    });

    let mut requester = ReqSocket::connect(&endpoint).await.expect("connect failed");
    for i in 0..3 {
        let payload = format!("turn-{i}");
        let reply = timeout(RECV_TIMEOUT, requester.request(payload.as_bytes()))
            .await
            .expect("timed out")
            .expect("request failed");
        assert_eq!(reply, format!("echo:{payload}").into_bytes());
    }
}

#[tokio::test]
async fn concurrent_requesters_each_get_their_own_reply() {
    let mut receiver = RepSocket::bind(&ephemeral()).await.expect("bind failed");
    let endpoint = local(receiver.local_addr().port());

    tokio::spawn(async move {
        while let Ok(request) = receiver.recv().await {
            let reply = request.payload.clone();
            request.respond(&reply);
        }
    });

    let mut tasks = Vec::new();
    for i in 0..8 {
        let endpoint = endpoint.clone();
        tasks.push(tokio::spawn(async move {
            let mut requester = ReqSocket::connect(&endpoint).await.expect("connect failed");
            let payload = format!("client-{i}");
            let reply = timeout(RECV_TIMEOUT, requester.request(payload.as_bytes()))
                .await
                .expect("timed out")
                .expect("request failed");
            assert_eq!(reply, payload.into_bytes());
        }));
    }
    for task in tasks {
        task.await.expect("requester task failed");
    }
}
