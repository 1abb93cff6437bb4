//! Receiver replies.
//!
//! The hub answers every request with exactly one reply: `OOK <hash>`
//! when the payload was forwarded to the publisher, `NOK <hash>` when the
//! publish failed, and `NOK NOT AVAILABLE` for an EXIT naming an unknown
//! peer.  Chain clients and the discovery listener only ever branch on
//! the three-byte prefix.

use crate::WireError;

/// Sentinel payload published when a hub drains, so subscribers detach.
/// Exactly nine bytes on the wire.
pub const TERMINATE: &[u8] = b"TERMINATE";

/// A hub reply on the request/reply receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Publish succeeded: `OOK <hash>`.
    Forwarded(String),
    /// Publish failed: `NOK <hash>`.
    Failed(String),
    /// EXIT named a peer the supervisor does not know: `NOK NOT AVAILABLE`.
    NotAvailable,
}

impl Reply {
    pub fn encode(&self) -> String {
        match self {
            Reply::Forwarded(hash) => format!("OOK {hash}"),
            Reply::Failed(hash) => format!("NOK {hash}"),
            Reply::NotAvailable => "NOK NOT AVAILABLE".to_owned(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, WireError> {
        if text == "NOK NOT AVAILABLE" {
            return Ok(Reply::NotAvailable);
        }
        match text.split_once(' ') {
            Some(("OOK", hash)) => Ok(Reply::Forwarded(hash.to_owned())),
            Some(("NOK", hash)) => Ok(Reply::Failed(hash.to_owned())),
            _ => Err(WireError::UnknownReply(text.to_owned())),
        }
    }

    /// Prefix check used by chain clients on raw reply bytes.
    pub fn is_forwarded(payload: &[u8]) -> bool {
        payload.starts_with(b"OOK")
    }
}
