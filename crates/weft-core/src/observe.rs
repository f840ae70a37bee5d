//! Optional metrics instrumentation for Weft.
//!
//! When the `observe` feature is enabled, commits, merges, prunes and the
//! serializer queue emit counters and histograms via the [`metrics`] crate.
//! A downstream application must install a metrics recorder to collect them.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a store commit.
///
/// - `weft.commit.total` – counter with `outcome` label
/// - `weft.commit.duration_seconds` – histogram
#[inline]
pub fn record_commit(duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("weft.commit.total", "outcome" => outcome).increment(1);
        metrics::histogram!("weft.commit.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}

/// Record a merge pass.
///
/// - `weft.merge.runs_total` – counter
/// - `weft.merge.entries_applied_total` – counter
/// - `weft.merge.entries_corrupt_total` – counter
/// - `weft.merge.duration_seconds` – histogram
#[inline]
pub fn record_merge(duration: std::time::Duration, applied: u64, corrupt: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("weft.merge.runs_total").increment(1);
        metrics::counter!("weft.merge.entries_applied_total").increment(applied);
        metrics::counter!("weft.merge.entries_corrupt_total").increment(corrupt);
        metrics::histogram!("weft.merge.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, applied, corrupt);
    }
}

/// Record a prune pass.
///
/// - `weft.prune.runs_total` – counter with `outcome` label (`pruned`, `blocked`, `fail`)
/// - `weft.prune.entries_deleted_total` – counter
#[inline]
pub fn record_prune(outcome: &'static str, deleted: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("weft.prune.runs_total", "outcome" => outcome).increment(1);
        metrics::counter!("weft.prune.entries_deleted_total").increment(deleted);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (outcome, deleted);
    }
}

/// Record how long a unit of work waited in the serializer queue.
///
/// - `weft.serializer.wait_duration_seconds` – histogram
#[inline]
pub fn record_serializer_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("weft.serializer.wait_duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}
