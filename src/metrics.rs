//! Ingest counters
//!
//! Monotonic process-wide counters covering the failure modes that are
//! tolerated rather than propagated: parse drops, enqueue drops, flush
//! failures. Shared across tasks, reported by the status endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub lines_ingested: AtomicU64,
    pub parse_errors: AtomicU64,
    pub enqueue_drops: AtomicU64,
    pub flush_failures: AtomicU64,
    pub flushed_entries: AtomicU64,
}

pub type SharedMetrics = Arc<IngestMetrics>;

impl IngestMetrics {
    pub fn new() -> SharedMetrics {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lines_ingested: self.lines_ingested.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            enqueue_drops: self.enqueue_drops.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            flushed_entries: self.flushed_entries.load(Ordering::Relaxed),
        }
    }
}

/// Increments a counter by one.
pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Adds to a counter.
pub fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub lines_ingested: u64,
    pub parse_errors: u64,
    pub enqueue_drops: u64,
    pub flush_failures: u64,
    pub flushed_entries: u64,
}
