//! Socket roles over plain TCP.
//!
//! Four roles, matching how the hub and its peers talk to each other:
//! publish/subscribe for the fan-out side and request/reply for the
//! receiver side.  Every frame on the wire is a 4-byte big-endian length
//! prefix followed by the payload bytes — exact bytes, no rewrite, no
//! normalization.
//!
//! A subscriber opens with a two-frame hello (identity, then
//! subscription filter); from then on it only receives payloads whose
//! prefix matches its filter.  An empty filter accepts everything.
//!
//! All sockets are opened with zero linger so closing never blocks on
//! undelivered buffers.  Receives are recoverable: a failed or
//! interrupted receive leaves the caller free to retry or reconnect, and
//! an interrupted receive (cancelled `select!` branch) must be followed
//! by a reconnect, not another `recv` on the same socket.

use relay_wire::Endpoint;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Hard cap on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Pending payloads buffered per subscriber before it starts skipping.
const FANOUT_CAPACITY: usize = 256;

/// Pending requests queued toward the hub loop.
const REQUEST_QUEUE: usize = 32;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("endpoint: {0}")]
    Endpoint(#[from] relay_wire::WireError),
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("connect {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the frame cap")]
    Oversized(usize),
    #[error("connection closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::Oversized(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::Oversized(payload.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    Ok(payload)
}

fn eof_as_closed(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(e)
    }
}

fn set_zero_linger(stream: &TcpStream) {
    // Best-effort; a socket without it still works, it just closes slower.
    if let Err(e) = stream.set_linger(Some(Duration::ZERO)) {
        debug!(error = %e, "could not set zero linger");
    }
}

// ---------------------------------------------------------------------------
// PubSocket
// ---------------------------------------------------------------------------

/// Fan-out publisher: binds, accepts subscribers, and delivers every
/// published payload to each of them on a best-effort basis.
///
/// Subscribers that lag `FANOUT_CAPACITY` payloads behind skip the
/// missed ones; remaining subscribers are unaffected when one drops.
pub struct PubSocket {
    tx: broadcast::Sender<Vec<u8>>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl PubSocket {
    /// Bind the fan-out listener (`*` binds every interface; port 0 lets
    /// the OS choose — see [`Self::local_addr`]).
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let addr = endpoint.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let (tx, _rx) = broadcast::channel(FANOUT_CAPACITY);

        let accept_tx = tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "subscriber connecting");
                        tokio::spawn(serve_subscriber(stream, accept_tx.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "publisher accept failed");
                    }
                }
            }
        });

        Ok(PubSocket {
            tx,
            local_addr,
            accept_task,
        })
    }

    /// The bound address (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of subscribers that completed their hello.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver `payload` to every connected subscriber.  Zero
    /// subscribers is a success: fan-out is best-effort.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let _ = self.tx.send(payload.to_vec());
        Ok(())
    }

    /// Stop accepting and release the listener.  Payloads already sent
    /// are still flushed to connected subscribers before their
    /// connections wind down.
    pub fn close(self) {
        self.accept_task.abort();
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Drive one subscriber: read the two-frame hello, then forward every
/// matching payload until the subscriber disconnects or the publisher
/// closes.
async fn serve_subscriber(mut stream: TcpStream, tx: broadcast::Sender<Vec<u8>>) {
    set_zero_linger(&stream);

    let identity = match read_frame(&mut stream).await {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "subscriber hello failed (identity)");
            return;
        }
    };
    let filter = match read_frame(&mut stream).await {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "subscriber hello failed (filter)");
            return;
        }
    };
    debug!(
        identity = %String::from_utf8_lossy(&identity),
        filter_len = filter.len(),
        "subscriber joined"
    );

    let mut rx = tx.subscribe();
    drop(tx);
    loop {
        match rx.recv().await {
            Ok(payload) => {
                if !payload.starts_with(&filter) {
                    continue;
                }
                if write_frame(&mut stream, &payload).await.is_err() {
                    debug!("subscriber disconnected");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagging, payloads skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// SubSocket
// ---------------------------------------------------------------------------

/// Subscriber leg: connects to a publisher, sends the hello, then yields
/// payloads in arrival order.
pub struct SubSocket {
    stream: TcpStream,
}

impl SubSocket {
    /// Connect and subscribe.  `endpoint` must already be rewritten for
    /// local connects — wildcards are rejected here.
    pub async fn connect(
        endpoint: &Endpoint,
        identity: &str,
        filter: &[u8],
    ) -> Result<Self, TransportError> {
        let addr = endpoint.connect_addr()?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        set_zero_linger(&stream);

        let mut socket = SubSocket { stream };
        write_frame(&mut socket.stream, identity.as_bytes()).await?;
        write_frame(&mut socket.stream, filter).await?;
        Ok(socket)
    }

    /// Receive the next payload.  Not resumable after a cancelled
    /// receive — reconnect instead.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        read_frame(&mut self.stream).await
    }
}

// ---------------------------------------------------------------------------
// RepSocket
// ---------------------------------------------------------------------------

/// One request pulled off the receiver.  The hub must answer exactly
/// once; dropping a `Request` unanswered drops the requester's
/// connection instead of leaving it blocked.
pub struct Request {
    pub payload: Vec<u8>,
    responder: oneshot::Sender<Vec<u8>>,
}

impl Request {
    /// Send the reply for this request.
    pub fn respond(self, reply: &[u8]) {
        let _ = self.responder.send(reply.to_vec());
    }
}

/// Reply-side socket: binds and serves strict request/reply turns.
///
/// Each connection alternates strictly — its next request is not read
/// until its previous reply was written — and the hub drains all
/// connections through one queue, so requests are served one at a time
/// in arrival order.
pub struct RepSocket {
    rx: mpsc::Receiver<Request>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RepSocket {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let addr = endpoint.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "requester connected");
                        tokio::spawn(serve_requester(stream, tx.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "receiver accept failed");
                    }
                }
            }
        });

        Ok(RepSocket {
            rx,
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next request in arrival order.  Cancel-safe.
    pub async fn recv(&mut self) -> Result<Request, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }

    pub fn close(self) {
        self.accept_task.abort();
    }
}

impl Drop for RepSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Drive one requester connection in strict alternation.
async fn serve_requester(mut stream: TcpStream, tx: mpsc::Sender<Request>) {
    set_zero_linger(&stream);
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(TransportError::Closed) => break,
            Err(e) => {
                debug!(error = %e, "request receive failed, dropping connection");
                break;
            }
        };

        let (responder, reply_rx) = oneshot::channel();
        if tx.send(Request { payload, responder }).await.is_err() {
            break;
        }
        match reply_rx.await {
            Ok(reply) => {
                if write_frame(&mut stream, &reply).await.is_err() {
                    break;
                }
            }
            // Request dropped unanswered (hub draining): drop the turn.
            Err(_) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// ReqSocket
// ---------------------------------------------------------------------------

/// Request-side socket performing strict send/receive turns.
pub struct ReqSocket {
    stream: TcpStream,
}

impl ReqSocket {
    /// Connect to a receiver.  `endpoint` must already be rewritten for
    /// local connects — wildcards are rejected here.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let addr = endpoint.connect_addr()?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        set_zero_linger(&stream);
        Ok(ReqSocket { stream })
    }

    /// One request/reply turn.  Not resumable after a cancelled turn —
    /// reconnect instead.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        write_frame(&mut self.stream, payload).await?;
        read_frame(&mut self.stream).await
    }
}
