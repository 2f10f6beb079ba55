use std::sync::atomic::{AtomicUsize, Ordering};

/// Runtime counters for one proxy instance.
///
/// Purpose:
/// - Track live workers and subscribers
/// - Track fetch outcomes (ok / forbidden / failed)
/// - Track relay throughput and drops
///
/// Design:
/// - Lock-free (Atomics)
/// - Shared via `Arc` between the fetcher, its workers and the relay
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    // Gauges
    pub workers_active: AtomicUsize,
    pub subscribers: AtomicUsize,

    // Dispatch
    pub cycles: AtomicUsize,

    // Fetch outcomes
    pub fetches: AtomicUsize,
    pub fetch_ok: AtomicUsize,
    pub forbidden: AtomicUsize,
    pub fetch_errors: AtomicUsize,

    // Relay
    pub broadcasts: AtomicUsize,
    pub dropped_messages: AtomicUsize,
}

/// Point-in-time copy of `ProxyMetrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub workers_active: usize,
    pub subscribers: usize,
    pub cycles: usize,
    pub fetches: usize,
    pub fetch_ok: usize,
    pub forbidden: usize,
    pub fetch_errors: usize,
    pub broadcasts: usize,
    pub dropped_messages: usize,
}

impl ProxyMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workers_active: self.workers_active.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_ok: self.fetch_ok.load(Ordering::Relaxed),
            forbidden: self.forbidden.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
        }
    }
}
