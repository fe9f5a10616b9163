//! Performance counters (§7): lock-free `goodFrame`/`badFrame` tallies per
//! instance, exposed to the JSON-RPC `performance-counters` subscription
//! ([`crate::rpc`]).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct PerformanceCounters {
    good_frame: AtomicU64,
    bad_frame: AtomicU64,
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_good(&self) {
        self.good_frame.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad(&self) {
        self.bad_frame.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            good_frame: self.good_frame.load(Ordering::Relaxed),
            bad_frame: self.bad_frame.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PerformanceSnapshot {
    pub good_frame: u64,
    pub bad_frame: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let c = PerformanceCounters::new();
        c.record_good();
        c.record_good();
        c.record_bad();
        let snap = c.snapshot();
        assert_eq!(snap.good_frame, 2);
        assert_eq!(snap.bad_frame, 1);
    }
}
