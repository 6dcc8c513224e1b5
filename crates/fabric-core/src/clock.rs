//! Clock & ID minting (component A).
//!
//! Thin wrappers so the rest of the crate never reaches for
//! `SystemTime`/`Instant` directly — keeps time sources swappable in tests
//! and keeps ID formatting consistent across every component that mints one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

static MONO_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A process-local monotonic counter in "ms-equivalent" units.
///
/// Not wall-clock time: only useful for within-process ordering (e.g.
/// dedupe's "observed at" marker), where callers must not perceive it
/// going backwards even if the system clock is adjusted.
pub fn now_mono_ms() -> u64 {
    MONO_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Mint a unique id with a short type prefix, collision-resistant across
/// process restarts (v4 UUID suffix, base 16 without a Random Number
/// Generator requirement the caller has to think about).
pub fn new_id(kind: &str) -> String {
    format!("{kind}_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_has_prefix_and_is_unique() {
        let a = new_id("cron");
        let b = new_id("cron");
        assert!(a.starts_with("cron_"));
        assert!(b.starts_with("cron_"));
        assert_ne!(a, b);
    }

    #[test]
    fn now_ms_is_sane() {
        let t = now_ms();
        assert!(t > 1_700_000_000_000);
    }

    #[test]
    fn now_mono_ms_is_monotonic() {
        let a = now_mono_ms();
        let b = now_mono_ms();
        assert!(b > a);
    }
}
