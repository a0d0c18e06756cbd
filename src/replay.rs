//! Replay protection: which nonces have already bought access.
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Record of a consumed nonce. Written exactly once, on the first accepted
/// verification, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub nonce: String,
    pub transaction_reference: String,
    /// Unix seconds at consumption.
    pub consumed_at: u64,
}

/// Tracks consumed payment nonces for the lifetime of the process.
///
/// Injectable so deployments can swap the store and tests can run against the
/// in-memory one. The cache is append-only; entries only ever leave through
/// [`ReplayCache::sweep_expired`].
pub trait ReplayCache: Send + Sync {
    /// Atomically consumes the nonce: returns `true` if this call inserted
    /// the entry, `false` if the nonce was consumed earlier (including by a
    /// concurrent verification that won the race).
    fn try_consume(&self, entry: ReplayEntry) -> bool;

    /// Whether the nonce has already been consumed.
    fn contains(&self, nonce: &str) -> bool;

    fn get(&self, nonce: &str) -> Option<ReplayEntry>;

    /// Drops entries consumed more than `horizon_secs` before `now`. Safe to
    /// call with a horizon no shorter than the challenge TTL: a swept nonce
    /// belongs to requirements that can only verify as expired anyway.
    fn sweep_expired(&self, now: u64, horizon_secs: u64) -> usize;
}

/// Process-local [`ReplayCache`] on a sharded concurrent map. Insertion goes
/// through the map's entry API, so check-and-insert is a single exclusive
/// operation per nonce rather than a racy read-then-write pair.
#[derive(Debug, Default)]
pub struct InMemoryReplayCache {
    entries: DashMap<String, ReplayEntry>,
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn try_consume(&self, entry: ReplayEntry) -> bool {
        match self.entries.entry(entry.nonce.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    fn contains(&self, nonce: &str) -> bool {
        self.entries.contains_key(nonce)
    }

    fn get(&self, nonce: &str) -> Option<ReplayEntry> {
        self.entries.get(nonce).map(|e| e.value().clone())
    }

    fn sweep_expired(&self, now: u64, horizon_secs: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_sub(e.consumed_at) <= horizon_secs);
        before - self.entries.len()
    }
}
