//! The relay-loop ledger.
//!
//! Before the hub publishes a payload it records one `(hash, link)`
//! entry per active chain client.  When a chain client later hears that
//! payload echoed back from its peer, it consumes the matching entry and
//! drops the payload instead of re-injecting it — that consume/drop is
//! the only thing breaking the relay loop.
//!
//! The ledger is a multiset: the same payload injected twice leaves two
//! entries per link, consumed FIFO.  Entries whose echo never arrives
//! (peer vanished, payload dropped) are left in place; they are a
//! tolerated leak, not a delivery guarantee.

use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LedgerEntry {
    hash: String,
    link: String,
}

/// Mutex-guarded (hash, link) multiset.  All operations are mutually
/// exclusive; critical sections never block on anything else.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Append one `(hash, link)` entry per link, atomically.
    pub fn record(&self, hash: &str, links: &[String]) {
        let mut entries = self.lock();
        entries.reserve(links.len());
        for link in links {
            entries.push(LedgerEntry {
                hash: hash.to_owned(),
                link: link.clone(),
            });
        }
    }

    /// Remove exactly one matching entry if any exists.
    ///
    /// Entries recorded earlier are consumed earlier, so duplicate
    /// hashes on the same link resolve FIFO.
    pub fn consume(&self, hash: &str, link: &str) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|e| e.hash == hash && e.link == link) {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Current entry count (stale entries included).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LedgerEntry>> {
        // A panic while holding the guard poisons the mutex; the entries
        // themselves are still coherent, so keep serving them.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
