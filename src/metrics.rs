//! Metrics and observability for rowmirror.
//!
//! Counters are kept in process (for the run summary) and also forwarded to
//! the `metrics` facade, so an exporter installed by the embedding
//! application picks them up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for copy runs.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Runs attempted
    pub runs_total: AtomicU64,
    /// Runs where every table succeeded
    pub runs_success: AtomicU64,
    /// Tables copied successfully
    pub tables_success: AtomicU64,
    /// Tables that failed
    pub tables_failed: AtomicU64,
    /// Rows read and dispatched
    pub rows_emitted: AtomicU64,
    /// Writes acknowledged (including failed ones)
    pub rows_acknowledged: AtomicU64,
    /// Writes that failed
    pub rows_failed: AtomicU64,
    /// Times reading was paused
    pub pauses: AtomicU64,
    /// Times reading was resumed
    pub resumes: AtomicU64,
    /// Checkpoints written
    pub checkpoint_saves: AtomicU64,
    /// Total run duration in milliseconds
    pub run_duration_ms: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a row handed to the sink.
    pub fn record_emitted(&self) {
        self.rows_emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rowmirror_rows_emitted_total").increment(1);
    }

    /// Record a finished write.
    pub fn record_acknowledged(&self, success: bool) {
        self.rows_acknowledged.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rowmirror_rows_acknowledged_total").increment(1);
        if !success {
            self.rows_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("rowmirror_rows_failed_total").increment(1);
        }
    }

    /// Record a pause of the source.
    pub fn record_pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rowmirror_pauses_total").increment(1);
    }

    /// Record a resume of the source.
    pub fn record_resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rowmirror_resumes_total").increment(1);
    }

    /// Record a finished table copy.
    pub fn record_table(&self, success: bool) {
        if success {
            self.tables_success.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("rowmirror_tables_total", "status" => "success").increment(1);
        } else {
            self.tables_failed.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("rowmirror_tables_total", "status" => "failed").increment(1);
        }
    }

    /// Record a finished run.
    pub fn record_run(&self, success: bool, duration_ms: u64) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.runs_success.fetch_add(1, Ordering::Relaxed);
        }
        self.run_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        metrics::counter!("rowmirror_runs_total").increment(1);
    }

    /// Record a checkpoint write.
    pub fn record_checkpoint_save(&self) {
        self.checkpoint_saves.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rowmirror_checkpoint_saves_total").increment(1);
    }

    /// Get snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_total: self.runs_total.load(Ordering::Relaxed),
            runs_success: self.runs_success.load(Ordering::Relaxed),
            tables_success: self.tables_success.load(Ordering::Relaxed),
            tables_failed: self.tables_failed.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            rows_acknowledged: self.rows_acknowledged.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            pauses: self.pauses.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            checkpoint_saves: self.checkpoint_saves.load(Ordering::Relaxed),
            run_duration_ms: self.run_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Runs attempted
    pub runs_total: u64,
    /// Runs where every table succeeded
    pub runs_success: u64,
    /// Tables copied successfully
    pub tables_success: u64,
    /// Tables that failed
    pub tables_failed: u64,
    /// Rows read and dispatched
    pub rows_emitted: u64,
    /// Writes acknowledged
    pub rows_acknowledged: u64,
    /// Writes that failed
    pub rows_failed: u64,
    /// Times reading was paused
    pub pauses: u64,
    /// Times reading was resumed
    pub resumes: u64,
    /// Checkpoints written
    pub checkpoint_saves: u64,
    /// Total run duration in milliseconds
    pub run_duration_ms: u64,
}

impl MetricsSnapshot {
    /// Writes still outstanding.
    pub fn in_flight(&self) -> u64 {
        self.rows_emitted.saturating_sub(self.rows_acknowledged)
    }

    /// Calculate rows per second over all runs.
    pub fn rows_per_second(&self) -> f64 {
        if self.run_duration_ms == 0 {
            0.0
        } else {
            (self.rows_emitted as f64 * 1000.0) / self.run_duration_ms as f64
        }
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
