//! Payload hashing.

use sha1::{Digest, Sha1};

/// Uppercase hex SHA-1 of a payload.
///
/// Ledger keys, receiver replies, and the discovery `X-KEY` header all
/// compare against this function's own output, so the case choice only
/// has to be consistent — it is uppercase everywhere.
pub fn sha1_hex(payload: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(payload))
}
