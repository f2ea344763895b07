//! ID generation for events, subscriptions, and sessions.
//!
//! The original implementation stamps each of these with
//! `time.Now().UnixNano()`. Two independent IDs minted in the same
//! nanosecond collide under that scheme, and on platforms with coarser
//! clock resolution collisions are common rather than theoretical. This
//! module keeps the wire type (`u64`) but generates IDs from a process-wide
//! monotonic counter seeded from the current time, so IDs are both unique
//! and roughly time-ordered without depending on clock resolution.

use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate the next globally unique, monotonically increasing ID.
pub fn next_id() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

/// Seed the counter from the current wall-clock time so IDs generated
/// across process restarts don't restart from zero. Intended to be
/// called once at startup.
pub fn seed_from_wall_clock() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let _ = COUNTER.fetch_max(nanos, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }
}
