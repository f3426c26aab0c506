//! Process-wide invocation counters.
//!
//! Counters are observability only: increments are atomic but not
//! linearizable with cache updates, so `hits + misses == tasks` holds only
//! after quiescence.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by the engine and the asset proxy.
#[derive(Debug, Default)]
pub struct AgentMetrics {
  tasks: AtomicU64,
  file_tasks: AtomicU64,
  cache_hits: AtomicU64,
  cache_misses: AtomicU64,
  predicted_hits: AtomicU64,
  hit_faults: AtomicU64,
  asset_hits: AtomicU64,
  ingress_latency_ns: AtomicU64,
  upstream_latency_ms: AtomicU64,
}

impl AgentMetrics {
  /// Counts an accepted invocation. Function names of the file-reading
  /// workload family are tracked separately.
  pub fn record_task(&self, function_name: &str) {
    self.tasks.fetch_add(1, Ordering::Relaxed);
    if function_name.to_ascii_lowercase().contains("file") {
      self.file_tasks.fetch_add(1, Ordering::Relaxed);
    }
  }

  /// Counts a response-cache hit; `predicted` is the dispatcher's guess.
  pub fn record_hit(&self, predicted: bool) {
    self.cache_hits.fetch_add(1, Ordering::Relaxed);
    if predicted {
      self.predicted_hits.fetch_add(1, Ordering::Relaxed);
    }
  }

  /// Counts a response-cache miss. A miss the dispatcher predicted as a hit
  /// is additionally counted as a hit-fault.
  pub fn record_miss(&self, predicted: bool) {
    self.cache_misses.fetch_add(1, Ordering::Relaxed);
    if predicted {
      self.hit_faults.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn record_asset_hit(&self) {
    self.asset_hits.fetch_add(1, Ordering::Relaxed);
  }

  pub fn add_ingress_latency_ns(&self, nanos: u64) {
    self.ingress_latency_ns.fetch_add(nanos, Ordering::Relaxed);
  }

  pub fn add_upstream_latency_ms(&self, millis: u64) {
    self.upstream_latency_ms.fetch_add(millis, Ordering::Relaxed);
  }

  /// Consistent-enough copy of all counters for logging and tests.
  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      tasks: self.tasks.load(Ordering::Relaxed),
      file_tasks: self.file_tasks.load(Ordering::Relaxed),
      cache_hits: self.cache_hits.load(Ordering::Relaxed),
      cache_misses: self.cache_misses.load(Ordering::Relaxed),
      predicted_hits: self.predicted_hits.load(Ordering::Relaxed),
      hit_faults: self.hit_faults.load(Ordering::Relaxed),
      asset_hits: self.asset_hits.load(Ordering::Relaxed),
      ingress_latency_ns: self.ingress_latency_ns.load(Ordering::Relaxed),
      upstream_latency_ms: self.upstream_latency_ms.load(Ordering::Relaxed),
    }
  }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
  pub tasks: u64,
  pub file_tasks: u64,
  pub cache_hits: u64,
  pub cache_misses: u64,
  pub predicted_hits: u64,
  pub hit_faults: u64,
  pub asset_hits: u64,
  pub ingress_latency_ns: u64,
  pub upstream_latency_ms: u64,
}
