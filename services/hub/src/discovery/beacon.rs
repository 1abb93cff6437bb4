//! Group membership over UDP multicast.
//!
//! Every node multicasts a small JSON datagram on the group address each
//! interval: `{group, node, event, headers}`.  First sighting of a
//! foreign node id raises an Enter event carrying the node's headers and
//! the datagram's *observed* source address; a `leave` datagram — or
//! silence for five intervals — raises an Exit event.  A node's own
//! datagrams loop back and are ignored by id.

use super::DiscoveryError;
use crate::config::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, info, warn};

/// Multicast group the beacon speaks on.
const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);

/// Gossip group name carried in every datagram.
const GROUP: &str = "TDRS";

/// Datagrams larger than this are dropped unparsed.
const MAX_DATAGRAM: usize = 8192;

/// A peer silent for this many intervals is considered gone.
const EXPIRY_INTERVALS: u32 = 5;

// ---------------------------------------------------------------------------
// Wire frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BeaconFrame {
    group: String,
    node: String,
    event: FrameEvent,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FrameEvent {
    Announce,
    Leave,
}

// ---------------------------------------------------------------------------
// Events surfaced to the listener
// ---------------------------------------------------------------------------

/// A membership change observed on the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Enter {
        peer_id: String,
        headers: BTreeMap<String, String>,
        /// Source address of the announce datagram — NOT whatever the
        /// headers advertise, which may be a wildcard bind form.
        observed_addr: IpAddr,
    },
    Exit {
        peer_id: String,
    },
}

// ---------------------------------------------------------------------------
// Peer tracker
// ---------------------------------------------------------------------------

/// Sighting state per foreign node id.  Pure bookkeeping so the
/// enter/exit transitions are testable without sockets.
struct PeerTracker {
    ttl: Duration,
    last_seen: HashMap<String, Instant>,
}

impl PeerTracker {
    fn new(ttl: Duration) -> Self {
        PeerTracker {
            ttl,
            last_seen: HashMap::new(),
        }
    }

    /// Register an announce.  True when this is a new peer (Enter).
    fn announce(&mut self, node: &str, now: Instant) -> bool {
        self.last_seen.insert(node.to_owned(), now).is_none()
    }

    /// Register a leave.  True when the peer was present (Exit).
    fn leave(&mut self, node: &str) -> bool {
        self.last_seen.remove(node).is_some()
    }

    /// Remove and return every peer silent for longer than the ttl.
    fn sweep(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > self.ttl)
            .map(|(node, _)| node.clone())
            .collect();
        for node in &expired {
            self.last_seen.remove(node);
        }
        expired
    }
}

// ---------------------------------------------------------------------------
// Beacon
// ---------------------------------------------------------------------------

/// The multicast beacon task handle.
pub struct Beacon {
    node_id: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Beacon {
    /// Bind the multicast socket, join the group, and start announcing.
    /// Returns the handle plus the membership event stream.
    pub fn start(
        cfg: &DiscoveryConfig,
        headers: BTreeMap<String, String>,
    ) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
        let socket = bind_multicast(cfg.port, cfg.interface)?;
        let node_id = uuid::Uuid::new_v4().simple().to_string();
        let (events_tx, events_rx) = mpsc::channel(64);
        let (stop, stop_rx) = watch::channel(false);

        info!(node = %node_id, group = GROUP, port = cfg.port, "joining discovery group");
        let task = tokio::spawn(run_beacon(
            socket,
            node_id.clone(),
            headers,
            cfg.interval,
            cfg.port,
            events_tx,
            stop_rx,
        ));

        Ok((
            Beacon {
                node_id,
                stop,
                task,
            },
            events_rx,
        ))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Multicast the leave datagram and stop the task, bounded.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if timeout(Duration::from_secs(2), &mut self.task).await.is_err() {
            warn!("beacon did not stop in time, aborting");
            self.task.abort();
        }
    }
}

async fn run_beacon(
    socket: UdpSocket,
    node_id: String,
    headers: BTreeMap<String, String>,
    interval: Duration,
    port: u16,
    events: mpsc::Sender<DiscoveryEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let dest = SocketAddr::from((MULTICAST_GROUP, port));
    let announce = frame_bytes(&node_id, FrameEvent::Announce, &headers);
    let mut tracker = PeerTracker::new(interval * EXPIRY_INTERVALS);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&announce, dest).await {
                    debug!(error = %e, "announce failed");
                }
                for peer_id in tracker.sweep(Instant::now()) {
                    info!(peer = %peer_id, "peer expired");
                    let _ = events.send(DiscoveryEvent::Exit { peer_id }).await;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, from)) => {
                    handle_datagram(&buf[..n], from, &node_id, &mut tracker, &events).await;
                }
                Err(e) => debug!(error = %e, "beacon receive failed"),
            }
        }
    }

    let leave = frame_bytes(&node_id, FrameEvent::Leave, &headers);
    if let Err(e) = socket.send_to(&leave, dest).await {
        debug!(error = %e, "leave failed");
    }
    info!(node = %node_id, "left discovery group");
}

async fn handle_datagram(
    datagram: &[u8],
    from: SocketAddr,
    node_id: &str,
    tracker: &mut PeerTracker,
    events: &mpsc::Sender<DiscoveryEvent>,
) {
    let frame: BeaconFrame = match serde_json::from_slice(datagram) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(%from, error = %e, "unparseable beacon datagram");
            return;
        }
    };
    if frame.group != GROUP || frame.node == node_id {
        return;
    }

    match frame.event {
        FrameEvent::Announce => {
            if tracker.announce(&frame.node, Instant::now()) {
                info!(peer = %frame.node, addr = %from.ip(), "peer entered");
                let _ = events
                    .send(DiscoveryEvent::Enter {
                        peer_id: frame.node,
                        headers: frame.headers,
                        observed_addr: from.ip(),
                    })
                    .await;
            }
        }
        FrameEvent::Leave => {
            if tracker.leave(&frame.node) {
                info!(peer = %frame.node, "peer left");
                let _ = events.send(DiscoveryEvent::Exit { peer_id: frame.node }).await;
            }
        }
    }
}

fn frame_bytes(node_id: &str, event: FrameEvent, headers: &BTreeMap<String, String>) -> Vec<u8> {
    let frame = BeaconFrame {
        group: GROUP.to_owned(),
        node: node_id.to_owned(),
        event,
        headers: headers.clone(),
    };
    // The frame is plain strings; serialization cannot fail.
    serde_json::to_vec(&frame).unwrap_or_default()
}

/// Multicast sockets need their options set before bind, which tokio's
/// `UdpSocket::bind` does not expose — hence socket2.
fn bind_multicast(port: u16, interface: Option<Ipv4Addr>) -> Result<UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

    let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    socket.join_multicast_v4(&MULTICAST_GROUP, &iface)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket.into())?)
}
