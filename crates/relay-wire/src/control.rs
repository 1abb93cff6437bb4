//! Peer-control messages.
//!
//! A payload whose UTF-8 text begins with `PEER:` is a control message
//! telling the receiving hub to start or retire a chain client:
//!
//! ```text
//! PEER:<EVENT>:<id>:<ppr>:<pad>:<ppo>:<rpr>:<rad>:<rpo>
//! ```
//!
//! `EVENT` is `ENTER` or `EXIT`; the six trailing fields are the peer's
//! publisher and receiver endpoints as protocol/address/port triples,
//! with `*` permitted.  EXIT messages always carry `*` in all six fields.
//!
//! A `PEER:`-prefixed payload that does not match the grammar is NOT an
//! error at the hub: it is relayed as an ordinary payload.  Parsing is
//! therefore total — callers branch on the `Result`.

use crate::{Endpoint, WireError};

/// Wire prefix that marks a payload as a control message.
pub const CONTROL_PREFIX: &str = "PEER:";

/// A parsed peer-control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerControl {
    Enter {
        id: String,
        publisher: Endpoint,
        receiver: Endpoint,
    },
    Exit {
        id: String,
    },
}

impl PeerControl {
    /// True when `payload` starts with the control prefix (cheap check,
    /// done before attempting a full parse).
    pub fn is_control(payload: &[u8]) -> bool {
        payload.starts_with(CONTROL_PREFIX.as_bytes())
    }

    /// Parse a control message from payload text.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let rest = text.strip_prefix(CONTROL_PREFIX).ok_or(WireError::NotControl)?;

        let fields: Vec<&str> = rest.split(':').collect();
        if fields.len() != 8 {
            return Err(WireError::FieldCount(fields.len()));
        }

        let id = fields[1];
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(WireError::InvalidPeerId(id.to_owned()));
        }

        match fields[0] {
            "ENTER" => Ok(PeerControl::Enter {
                id: id.to_owned(),
                publisher: Endpoint::from_fields(fields[2], fields[3], fields[4])?,
                receiver: Endpoint::from_fields(fields[5], fields[6], fields[7])?,
            }),
            "EXIT" => Ok(PeerControl::Exit { id: id.to_owned() }),
            other => Err(WireError::UnknownEvent(other.to_owned())),
        }
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> String {
        match self {
            PeerControl::Enter {
                id,
                publisher,
                receiver,
            } => format!(
                "{CONTROL_PREFIX}ENTER:{id}:{}:{}:{}:{}:{}:{}",
                publisher.protocol,
                publisher.address,
                port_field(publisher),
                receiver.protocol,
                receiver.address,
                port_field(receiver),
            ),
            PeerControl::Exit { id } => format!("{CONTROL_PREFIX}EXIT:{id}:*:*:*:*:*:*"),
        }
    }
}

fn port_field(ep: &Endpoint) -> String {
    match ep.port {
        Some(port) => port.to_string(),
        None => "*".to_owned(),
    }
}
