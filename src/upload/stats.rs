use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::UploadStage;

/// Point-in-time upload counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub submitted: u64,
    pub rejected: u64,
    pub in_flight: u64,
    pub stored: u64,
    /// Failures per stage, indexed in `UploadStage::ALL` order.
    pub failed: [u64; 5],
}

impl UploadStats {
    pub fn failed_at(&self, stage: UploadStage) -> u64 {
        self.failed[stage.index()]
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.iter().sum()
    }

    /// Accepted but not yet finished (queued or running).
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.stored)
            .saturating_sub(self.failed_total())
    }
}

/// Live counters shared between the queue and its workers.
#[derive(Debug, Default)]
pub struct UploadCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicU64,
    stored: AtomicU64,
    failed: [AtomicU64; 5],
}

impl UploadCounters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finished(&self, outcome: Result<(), UploadStage>) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => self.stored.fetch_add(1, Ordering::Relaxed),
            Err(stage) => self.failed[stage.index()].fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> UploadStats {
        UploadStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            failed: std::array::from_fn(|i| self.failed[i].load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes() {
        let counters = UploadCounters::default();
        for _ in 0..3 {
            counters.submitted();
        }
        counters.rejected();
        counters.started();
        counters.finished(Ok(()));
        counters.started();
        counters.finished(Err(UploadStage::UrlFetch));
        counters.started();

        let stats = counters.snapshot();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.failed_at(UploadStage::UrlFetch), 1);
        assert_eq!(stats.failed_total(), 1);
        assert_eq!(stats.pending(), 1);
    }
}
