// relay-wire: wire grammar shared by the hub, its chain clients, and the
// discovery plane.
//
// Everything that crosses a socket boundary is encoded and parsed here:
// endpoint URIs, peer-control messages, receiver replies, and the payload
// hash. The hub and its workers never assemble wire strings by hand.

pub mod control;
pub mod endpoint;
pub mod hash;
pub mod reply;

pub use control::PeerControl;
pub use endpoint::Endpoint;
pub use hash::sha1_hex;
pub use reply::{Reply, TERMINATE};

/// Errors produced while parsing wire forms.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("missing '://' scheme separator in '{0}'")]
    MissingScheme(String),
    #[error("empty protocol in '{0}'")]
    EmptyProtocol(String),
    #[error("invalid host '{0}' (expected [0-9.*]+)")]
    InvalidHost(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("endpoint '{0}' has no port")]
    MissingPort(String),
    #[error("not a peer-control message")]
    NotControl,
    #[error("unknown peer-control event '{0}'")]
    UnknownEvent(String),
    #[error("invalid peer id '{0}'")]
    InvalidPeerId(String),
    #[error("peer-control message has {0} fields, expected 8")]
    FieldCount(usize),
    #[error("unrecognized reply '{0}'")]
    UnknownReply(String),
}
