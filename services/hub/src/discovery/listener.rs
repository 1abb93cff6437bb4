//! Membership events → peer-control messages.
//!
//! The listener is the bridge between the gossip substrate and the hub:
//! each Enter event whose `X-KEY` matches the locally hashed group key
//! becomes a `PEER:ENTER` message, each Exit a `PEER:EXIT`, injected
//! into this hub's own receiver over a request socket so they flow
//! through the exact same path as externally injected control payloads.
//!
//! Both endpoint addresses in an ENTER are taken from the *observed*
//! gossip address, not from the peer's headers — peers bound to a
//! wildcard advertise `*`, which is unroutable, while the gossip source
//! address is known good.

use super::{DiscoveryEvent, HDR_KEY, HDR_PUB_PORT, HDR_PUB_PTCL, HDR_REC_PORT, HDR_REC_PTCL};
use crate::transport::ReqSocket;
use relay_wire::{Endpoint, PeerControl};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Consume membership events until the stream ends or a stop is
/// requested.  Public so an alternative substrate (or a test) can feed
/// the listener its own event stream.
pub async fn run_listener(
    mut events: mpsc::Receiver<DiscoveryEvent>,
    receiver: Endpoint,
    hashed_key: String,
    mut stop: watch::Receiver<bool>,
) {
    let mut sender: Option<ReqSocket> = None;
    loop {
        let event = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(message) = control_message(event, &hashed_key) else {
            continue;
        };
        inject(&mut sender, &receiver, &message).await;
    }
    info!("discovery listener stopped");
}

/// Translate one membership event into a control message, or `None`
/// when the event must be dropped (key mismatch, unusable headers).
fn control_message(event: DiscoveryEvent, hashed_key: &str) -> Option<String> {
    match event {
        DiscoveryEvent::Enter {
            peer_id,
            headers,
            observed_addr,
        } => {
            match headers.get(HDR_KEY) {
                Some(key) if key == hashed_key => {}
                _ => {
                    debug!(peer = %peer_id, "group key mismatch, ignoring peer");
                    return None;
                }
            }
            let publisher =
                endpoint_from_headers(&headers, HDR_PUB_PTCL, HDR_PUB_PORT, observed_addr);
            let receiver =
                endpoint_from_headers(&headers, HDR_REC_PTCL, HDR_REC_PORT, observed_addr);
            match (publisher, receiver) {
                (Some(publisher), Some(receiver)) => Some(
                    PeerControl::Enter {
                        id: peer_id,
                        publisher,
                        receiver,
                    }
                    .encode(),
                ),
                _ => {
                    warn!(peer = %peer_id, "peer advertised unusable endpoints, ignoring");
                    None
                }
            }
        }
        DiscoveryEvent::Exit { peer_id } => Some(PeerControl::Exit { id: peer_id }.encode()),
    }
}

fn endpoint_from_headers(
    headers: &BTreeMap<String, String>,
    protocol_header: &str,
    port_header: &str,
    observed_addr: IpAddr,
) -> Option<Endpoint> {
    let protocol = headers.get(protocol_header)?.clone();
    let port: u16 = headers.get(port_header)?.parse().ok()?;
    Some(Endpoint {
        protocol,
        address: observed_addr.to_string(),
        port: Some(port),
    })
}

/// Deliver one control message to the hub's own receiver, reconnecting
/// the request socket once if the previous connection went away.
async fn inject(sender: &mut Option<ReqSocket>, receiver: &Endpoint, message: &str) {
    for _ in 0..2 {
        let socket = match sender {
            Some(socket) => socket,
            None => match ReqSocket::connect(receiver).await {
                Ok(socket) => sender.insert(socket),
                Err(e) => {
                    warn!(error = %e, "cannot reach own receiver");
                    return;
                }
            },
        };
        match socket.request(message.as_bytes()).await {
            Ok(reply) => {
                info!(reply = %String::from_utf8_lossy(&reply), "peer control delivered");
                return;
            }
            Err(e) => {
                debug!(error = %e, "receiver connection lost, reconnecting");
                *sender = None;
            }
        }
    }
    warn!("giving up on peer-control delivery");
}
