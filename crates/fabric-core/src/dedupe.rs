//! Monotonic-TTL dedupe tables (component E).
//!
//! `check_and_mark` is the one operation that matters: it atomically tells
//! the caller whether a key is new or already seen, and if new, marks it.
//! Expiration is lazy — a stale entry just looks absent on the next read,
//! rather than being swept by a background task.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeOutcome {
    New,
    Seen,
}

/// A TTL-keyed dedupe table, namespaced by caller-chosen table name so one
/// instance can serve several independent keyspaces (e.g. per-transport).
#[derive(Clone, Default)]
pub struct Dedupe {
    tables: Arc<Mutex<HashMap<String, HashMap<String, i64>>>>,
}

impl Dedupe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `New` if `key` is absent or its last-seen timestamp is
    /// older than `ttl_ms`, atomically marking it seen-now in that case.
    /// Returns `Seen` otherwise.
    pub async fn check_and_mark(&self, table: &str, key: &str, ttl_ms: i64) -> DedupeOutcome {
        let now = now_ms();
        let mut tables = self.tables.lock().await;
        let entries = tables.entry(table.to_string()).or_default();
        match entries.get(key) {
            Some(&seen_at) if now - seen_at < ttl_ms => DedupeOutcome::Seen,
            _ => {
                entries.insert(key.to_string(), now);
                DedupeOutcome::New
            }
        }
    }
}

/// A FIFO, capacity-bounded dedupe set with no TTL: once full, the oldest
/// key is evicted to make room. Used for inbound XMTP dedupe at a cap of
/// 2000 entries, where there's no natural TTL but an unbounded table would
/// leak memory over the life of the process.
pub struct RingDedupe {
    cap: usize,
    order: Mutex<(VecDeque<String>, HashMap<String, ()>)>,
}

impl RingDedupe {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            order: Mutex::new((VecDeque::with_capacity(cap), HashMap::new())),
        }
    }

    pub async fn check_and_mark(&self, key: &str) -> DedupeOutcome {
        let mut guard = self.order.lock().await;
        if guard.1.contains_key(key) {
            return DedupeOutcome::Seen;
        }
        guard.0.push_back(key.to_string());
        guard.1.insert(key.to_string(), ());
        while guard.0.len() > self.cap {
            if let Some(oldest) = guard.0.pop_front() {
                guard.1.remove(&oldest);
            }
        }
        DedupeOutcome::New
    }
}

/// The default XMTP inbound dedupe cap (§4.5).
pub const XMTP_DEDUPE_CAP: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_then_seen_within_ttl() {
        let d = Dedupe::new();
        assert_eq!(d.check_and_mark("t", "k", 10_000).await, DedupeOutcome::New);
        assert_eq!(d.check_and_mark("t", "k", 10_000).await, DedupeOutcome::Seen);
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let d = Dedupe::new();
        assert_eq!(d.check_and_mark("t", "k", 1).await, DedupeOutcome::New);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(d.check_and_mark("t", "k", 1).await, DedupeOutcome::New);
    }

    #[tokio::test]
    async fn tables_are_independent() {
        let d = Dedupe::new();
        assert_eq!(d.check_and_mark("a", "k", 10_000).await, DedupeOutcome::New);
        assert_eq!(d.check_and_mark("b", "k", 10_000).await, DedupeOutcome::New);
    }

    #[tokio::test]
    async fn ring_dedupe_evicts_oldest_on_overflow() {
        let ring = RingDedupe::new(2);
        assert_eq!(ring.check_and_mark("a").await, DedupeOutcome::New);
        assert_eq!(ring.check_and_mark("b").await, DedupeOutcome::New);
        assert_eq!(ring.check_and_mark("c").await, DedupeOutcome::New);
        // "a" was evicted to make room for "c"; it looks new again.
        assert_eq!(ring.check_and_mark("a").await, DedupeOutcome::New);
        // "b" and "c" are still tracked.
        assert_eq!(ring.check_and_mark("c").await, DedupeOutcome::Seen);
    }
}
