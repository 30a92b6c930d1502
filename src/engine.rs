//! Streaming copy engine.
//!
//! Rows are pulled from a [`RowSource`] one at a time and each one is handed
//! to the [`DocumentSink`] as an upsert that runs concurrently with further
//! reads. A [`FlowGate`] tracks the gap between emitted and acknowledged rows
//! and stops the engine from polling the source while too many writes are
//! outstanding. A table copy completes only once the source has ended and
//! every dispatched write has finished.

use crate::config::{TableSpec, WriteErrorPolicy};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::window::RunWindow;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Stream of projected rows, primary key first.
pub type RowStream<'a> = BoxStream<'a, Result<Document>>;

/// Something that can stream the rows of a table inside a window.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Open a cursor over `spec`'s projection, filtered by `window`.
    async fn open<'a>(&'a self, spec: &TableSpec, window: &RunWindow) -> Result<RowStream<'a>>;
}

#[async_trait]
impl<T: RowSource + ?Sized> RowSource for Arc<T> {
    async fn open<'a>(&'a self, spec: &TableSpec, window: &RunWindow) -> Result<RowStream<'a>> {
        (**self).open(spec, window).await
    }
}

/// Something that can create-or-replace documents by identity.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert `document` under `id` in `collection`.
    async fn upsert(&self, collection: &str, id: Bson, document: Document) -> Result<()>;
}

#[async_trait]
impl<T: DocumentSink + ?Sized> DocumentSink for Arc<T> {
    async fn upsert(&self, collection: &str, id: Bson, document: Document) -> Result<()> {
        (**self).upsert(collection, id, document).await
    }
}

/// Pause and resume thresholds on the number of in-flight writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    /// Pause reading once more than this many writes are in flight
    pub high: usize,
    /// Resume reading once fewer than this many writes are in flight
    pub low: usize,
}

impl Watermarks {
    /// Check `1 <= low < high`.
    pub fn validate(&self) -> Result<()> {
        if self.low == 0 {
            return Err(Error::validation("low watermark must be at least 1"));
        }
        if self.low >= self.high {
            return Err(Error::validation(format!(
                "low watermark ({}) must be below high watermark ({})",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            high: 10_000,
            low: 5_000,
        }
    }
}

/// Effect of a counter update on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    /// Nothing changed
    Unchanged,
    /// The source must stop being polled
    Paused,
    /// The source may be polled again
    Resumed,
}

/// Hysteresis between reading and writing.
#[derive(Debug, Clone)]
pub struct FlowGate {
    watermarks: Watermarks,
    emitted: u64,
    acknowledged: u64,
    paused: bool,
    pauses: u64,
    resumes: u64,
}

impl FlowGate {
    /// Create an open gate.
    pub fn new(watermarks: Watermarks) -> Self {
        Self {
            watermarks,
            emitted: 0,
            acknowledged: 0,
            paused: false,
            pauses: 0,
            resumes: 0,
        }
    }

    /// Count one row handed to the sink.
    pub fn on_emit(&mut self) -> GateTransition {
        self.emitted += 1;
        if !self.paused && self.in_flight() > self.watermarks.high as u64 {
            self.paused = true;
            self.pauses += 1;
            return GateTransition::Paused;
        }
        GateTransition::Unchanged
    }

    /// Count one finished write, successful or not.
    pub fn on_ack(&mut self) -> GateTransition {
        self.acknowledged += 1;
        if self.paused && self.in_flight() < self.watermarks.low as u64 {
            self.paused = false;
            self.resumes += 1;
            return GateTransition::Resumed;
        }
        GateTransition::Unchanged
    }

    /// Rows emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Writes finished so far.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    /// Writes still outstanding.
    pub fn in_flight(&self) -> u64 {
        self.emitted - self.acknowledged
    }

    /// Whether the source is currently held back.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Every emitted row has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.emitted == self.acknowledged
    }

    /// Number of pauses so far.
    pub fn pauses(&self) -> u64 {
        self.pauses
    }

    /// Number of resumes so far.
    pub fn resumes(&self) -> u64 {
        self.resumes
    }
}

/// Tunables of a table copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Flow-control thresholds
    pub watermarks: Watermarks,
    /// Row-level failure policy
    pub on_write_error: WriteErrorPolicy,
}

/// Progress callback.
pub type ProgressCallback = Box<dyn Fn(CopyProgress) + Send + Sync>;

/// Snapshot of a running table copy.
#[derive(Debug, Clone)]
pub struct CopyProgress {
    /// Table being copied
    pub table: String,
    /// Current phase
    pub phase: CopyPhase,
    /// Rows read and dispatched
    pub emitted: u64,
    /// Writes finished
    pub acknowledged: u64,
    /// Writes that failed
    pub failed: u64,
    /// Whether reading is paused
    pub paused: bool,
}

/// Copy phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPhase {
    /// Pulling rows from the source
    Reading,
    /// Source finished or stopped, waiting for in-flight writes
    Draining,
    /// Every write acknowledged
    Completed,
}

impl std::fmt::Display for CopyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyPhase::Reading => write!(f, "reading"),
            CopyPhase::Draining => write!(f, "draining"),
            CopyPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome of one table copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCopyResult {
    /// Table name
    pub table: String,
    /// Whether the copy finished
    pub success: bool,
    /// Rows read and dispatched
    pub rows_copied: u64,
    /// Writes that failed
    pub rows_failed: u64,
    /// Times the source was paused
    pub pauses: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Error message if failed
    pub error: Option<String>,
}

impl TableCopyResult {
    /// Result of a table that could not be copied.
    pub fn failed(table: impl Into<String>, error: &Error, duration_ms: u64) -> Self {
        Self {
            table: table.into(),
            success: false,
            rows_copied: 0,
            rows_failed: 0,
            pauses: 0,
            duration_ms,
            error: Some(error.to_string()),
        }
    }
}

type InFlight<'a> = FuturesUnordered<BoxFuture<'a, (Bson, Result<()>)>>;

/// Copies tables from a row source into a document sink.
pub struct CopyEngine<S, K> {
    source: S,
    sink: K,
    options: CopyOptions,
    metrics: Arc<Metrics>,
    progress: Option<Arc<ProgressCallback>>,
}

impl<S: RowSource, K: DocumentSink> CopyEngine<S, K> {
    /// Create an engine, validating the watermarks.
    pub fn new(source: S, sink: K, options: CopyOptions) -> Result<Self> {
        options.watermarks.validate()?;
        Ok(Self {
            source,
            sink,
            options,
            metrics: Arc::new(Metrics::new()),
            progress: None,
        })
    }

    /// Share a metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(CopyProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Row source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Document sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Copy options.
    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Take the source and sink back.
    pub fn into_inner(self) -> (S, K) {
        (self.source, self.sink)
    }

    /// Copy every row of `spec` inside `window`.
    ///
    /// Returns once the source is exhausted and every dispatched upsert has
    /// finished. A source failure, or a write failure under
    /// [`WriteErrorPolicy::Abort`], stops reading; writes already in flight
    /// still run to completion before the error is returned.
    #[instrument(skip(self, spec, window), fields(table = %spec.name, window = %window))]
    pub async fn copy_table(&self, spec: &TableSpec, window: &RunWindow) -> Result<TableCopyResult> {
        let start = Instant::now();
        let table = spec.name.as_str();
        info!("Copying {} ({})", table, window);

        let mut rows = self.source.open(spec, window).await?;
        let mut gate = FlowGate::new(self.options.watermarks);
        let mut in_flight: InFlight<'_> = FuturesUnordered::new();
        let mut failed: u64 = 0;
        let mut failure: Option<Error> = None;

        self.report(table, CopyPhase::Reading, &gate, failed);

        loop {
            tokio::select! {
                biased;

                Some((id, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = self.acknowledge(table, &mut gate, &mut failed, id, outcome) {
                        failure = Some(e);
                        break;
                    }
                    self.report(table, CopyPhase::Reading, &gate, failed);
                }

                next = rows.next(), if !gate.is_paused() => match next {
                    Some(Ok(document)) => {
                        self.dispatch(spec, &mut gate, &mut in_flight, document);
                        self.report(table, CopyPhase::Reading, &gate, failed);
                    }
                    Some(Err(e)) if e.is_row_level() => {
                        self.reject(table, &mut gate, &mut in_flight, Bson::Null, e);
                        self.report(table, CopyPhase::Reading, &gate, failed);
                    }
                    Some(Err(e)) => {
                        warn!("Source failed on {} after {} rows: {}", table, gate.emitted(), e);
                        failure = Some(e);
                        break;
                    }
                    None => break,
                },

                else => {
                    failure = Some(Error::source_read_msg(
                        table,
                        "reading paused with no writes in flight",
                    ));
                    break;
                }
            }
        }

        // Stop reading before waiting on what is already dispatched.
        drop(rows);

        if !in_flight.is_empty() {
            debug!("Draining {} in-flight writes for {}", in_flight.len(), table);
        }
        while let Some((id, outcome)) = in_flight.next().await {
            if let Err(e) = self.acknowledge(table, &mut gate, &mut failed, id, outcome) {
                failure.get_or_insert(e);
            }
            self.report(table, CopyPhase::Draining, &gate, failed);
        }

        if let Some(e) = failure {
            return Err(e);
        }

        self.report(table, CopyPhase::Completed, &gate, failed);

        let result = TableCopyResult {
            table: table.to_string(),
            success: true,
            rows_copied: gate.emitted(),
            rows_failed: failed,
            pauses: gate.pauses(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
        };

        info!(
            "Copied {} rows to {} ({} failed, {} pauses) in {}ms",
            result.rows_copied, table, result.rows_failed, result.pauses, result.duration_ms
        );
        Ok(result)
    }

    fn emit(&self, table: &str, gate: &mut FlowGate) {
        self.metrics.record_emitted();
        if gate.on_emit() == GateTransition::Paused {
            self.metrics.record_pause();
            debug!("Paused reading {} at {} in flight", table, gate.in_flight());
        }
    }

    /// Emit a row that cannot be written; it is acknowledged as a failure.
    fn reject(
        &self,
        table: &str,
        gate: &mut FlowGate,
        in_flight: &mut InFlight<'_>,
        id: Bson,
        err: Error,
    ) {
        self.emit(table, gate);
        in_flight.push(futures::future::ready((id, Err(err))).boxed());
    }

    /// Emit one row and start its upsert.
    fn dispatch<'a>(
        &'a self,
        spec: &'a TableSpec,
        gate: &mut FlowGate,
        in_flight: &mut InFlight<'a>,
        document: Document,
    ) {
        let table = spec.name.as_str();
        let id = match document.get(&spec.primary_key_column) {
            Some(Bson::Null) | None => {
                let err = Error::sink_write_msg(
                    table,
                    format!("row has no value for primary key '{}'", spec.primary_key_column),
                );
                self.reject(table, gate, in_flight, Bson::Null, err);
                return;
            }
            Some(id) => id.clone(),
        };
        self.emit(table, gate);

        let write = self
            .sink
            .upsert(table, id.clone(), document)
            .map(move |outcome| (id, outcome))
            .boxed();
        in_flight.push(write);
    }

    /// Count one finished write. Returns the error only when it must stop the copy.
    fn acknowledge(
        &self,
        table: &str,
        gate: &mut FlowGate,
        failed: &mut u64,
        id: Bson,
        outcome: Result<()>,
    ) -> Result<()> {
        let transition = gate.on_ack();
        if transition == GateTransition::Resumed {
            self.metrics.record_resume();
            debug!("Resumed reading {} at {} in flight", table, gate.in_flight());
        }

        match outcome {
            Ok(()) => {
                self.metrics.record_acknowledged(true);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_acknowledged(false);
                *failed += 1;
                warn!("Row {} of {} not copied: {}", id, table, e);
                match self.options.on_write_error {
                    WriteErrorPolicy::Skip => Ok(()),
                    WriteErrorPolicy::Abort => Err(e),
                }
            }
        }
    }

    /// Report progress via callback.
    fn report(&self, table: &str, phase: CopyPhase, gate: &FlowGate, failed: u64) {
        if let Some(ref callback) = self.progress {
            callback(CopyProgress {
                table: table.to_string(),
                phase,
                emitted: gate.emitted(),
                acknowledged: gate.acknowledged(),
                failed,
                paused: gate.is_paused(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySink, MemorySource};
    use crate::window::parse_timestamp;
    use bson::doc;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn orders() -> TableSpec {
        TableSpec::builder()
            .name("orders")
            .columns(["amount", "status"])
            .primary_key_column("id")
            .insert_date_column("created_at")
            .update_date_column("updated_at")
            .build()
            .unwrap()
    }

    fn at(s: &str) -> Bson {
        Bson::DateTime(bson::DateTime::from_chrono(
            parse_timestamp(s).unwrap().and_utc(),
        ))
    }

    fn order(id: i64, created: &str, updated: &str) -> Document {
        doc! {
            "id": id,
            "amount": id * 10,
            "status": "open",
            "created_at": at(created),
            "updated_at": at(updated),
        }
    }

    fn numbered(n: i64) -> Vec<Document> {
        (1..=n)
            .map(|i| order(i, "2024-01-01 00:00:00", "2024-01-01 00:00:00"))
            .collect()
    }

    fn options(high: usize, low: usize, on_write_error: WriteErrorPolicy) -> CopyOptions {
        CopyOptions {
            watermarks: Watermarks { high, low },
            on_write_error,
        }
    }

    #[test]
    fn test_watermark_validation() {
        assert!(Watermarks::default().validate().is_ok());
        assert!(Watermarks { high: 1, low: 1 }.validate().is_err());
        assert!(Watermarks { high: 10, low: 0 }.validate().is_err());
        assert!(Watermarks { high: 2, low: 1 }.validate().is_ok());
    }

    #[test]
    fn test_gate_pauses_above_high_and_resumes_below_low() {
        let mut gate = FlowGate::new(Watermarks { high: 4, low: 2 });
        for _ in 0..4 {
            assert_eq!(gate.on_emit(), GateTransition::Unchanged);
        }
        assert_eq!(gate.on_emit(), GateTransition::Paused);
        assert!(gate.is_paused());

        // 5 -> 4 -> 3 -> 2 stays paused, 1 resumes
        assert_eq!(gate.on_ack(), GateTransition::Unchanged);
        assert_eq!(gate.on_ack(), GateTransition::Unchanged);
        assert_eq!(gate.on_ack(), GateTransition::Unchanged);
        assert_eq!(gate.on_ack(), GateTransition::Resumed);
        assert_eq!(gate.in_flight(), 1);
        assert_eq!((gate.pauses(), gate.resumes()), (1, 1));
    }

    proptest! {
        #[test]
        fn prop_gate_keeps_invariants(
            high in 2usize..64,
            gap in 1usize..32,
            ops in proptest::collection::vec(any::<bool>(), 0..2000),
        ) {
            let low = high.saturating_sub(gap).max(1);
            prop_assume!(low < high);
            let mut gate = FlowGate::new(Watermarks { high, low });

            for emit in ops {
                if emit && !gate.is_paused() {
                    gate.on_emit();
                } else if gate.in_flight() > 0 {
                    gate.on_ack();
                }
                prop_assert!(gate.acknowledged() <= gate.emitted());
                prop_assert!(gate.in_flight() <= high as u64 + 1);
                if gate.is_paused() {
                    prop_assert!(gate.in_flight() >= low as u64);
                }
                prop_assert!(gate.pauses() - gate.resumes() <= 1);
            }
        }
    }

    #[tokio::test]
    async fn test_copies_only_rows_inside_window() {
        let source = MemorySource::new().with_table(
            "orders",
            vec![
                order(1, "2023-12-30 10:00:00", "2023-12-30 10:00:00"),
                order(2, "2023-12-30 10:00:00", "2024-01-01 12:00:00"),
                order(3, "2024-01-02 09:00:00", "2024-01-02 09:00:00"),
            ],
        );
        let sink = Arc::new(MemorySink::new());
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        let window = RunWindow::Bounded {
            from: parse_timestamp("2024-01-01 00:00:00").unwrap(),
            to: parse_timestamp("2024-01-01 23:59:59").unwrap(),
        };
        let result = engine.copy_table(&orders(), &window).await.unwrap();

        assert!(result.success);
        assert_eq!(result.rows_copied, 1);
        assert_eq!(sink.len("orders"), 1);

        let stored = sink.get("orders", &Bson::Int64(2)).unwrap();
        assert_eq!(stored.get_i64("amount").unwrap(), 20);
        assert_eq!(stored.get_str("status").unwrap(), "open");
        assert!(!stored.contains_key("created_at"));
    }

    #[tokio::test]
    async fn test_zero_rows_completes() {
        let source = MemorySource::new().with_table("orders", vec![]);
        let engine =
            CopyEngine::new(source, Arc::new(MemorySink::new()), CopyOptions::default()).unwrap();

        let result = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();
        assert_eq!(result.rows_copied, 0);
        assert_eq!(result.pauses, 0);
    }

    #[tokio::test]
    async fn test_unbounded_copies_everything_and_is_idempotent() {
        let source = MemorySource::new().with_table("orders", numbered(250));
        let sink = Arc::new(MemorySink::new());
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();
        let second = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();

        assert_eq!(second.rows_copied, 250);
        assert_eq!(sink.len("orders"), 250);
    }

    #[tokio::test]
    async fn test_backpressure_bounds_in_flight_writes() {
        let source = Arc::new(MemorySource::new().with_table("orders", numbered(500)));
        let sink = Arc::new(MemorySink::new().with_latency(Duration::from_millis(5)));
        let engine = CopyEngine::new(
            source.clone(),
            sink.clone(),
            options(20, 10, WriteErrorPolicy::Skip),
        )
        .unwrap();

        let result = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();

        assert_eq!(result.rows_copied, 500);
        assert_eq!(sink.len("orders"), 500);
        assert!(result.pauses > 0);
        assert!(sink.max_in_flight() <= 21);
        assert_eq!(source.pulled(), 500);
    }

    #[tokio::test]
    async fn test_skip_policy_counts_failures_and_completes() {
        let source = MemorySource::new().with_table("orders", numbered(10));
        let sink = Arc::new(MemorySink::new().failing_on([Bson::Int64(3), Bson::Int64(7)]));
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        let result = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.rows_copied, 10);
        assert_eq!(result.rows_failed, 2);
        assert_eq!(sink.len("orders"), 8);
        assert_eq!(engine.metrics().snapshot().rows_failed, 2);
    }

    #[tokio::test]
    async fn test_abort_policy_fails_table() {
        let source = MemorySource::new().with_table("orders", numbered(10));
        let sink = Arc::new(MemorySink::new().failing_on([Bson::Int64(3)]));
        let engine = CopyEngine::new(
            source,
            sink.clone(),
            options(100, 50, WriteErrorPolicy::Abort),
        )
        .unwrap();

        let err = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SINK_WRITE_ERROR");
        assert!(sink.len("orders") < 10);
    }

    #[tokio::test]
    async fn test_source_failure_drains_dispatched_writes() {
        let source = MemorySource::new()
            .with_table("orders", numbered(10))
            .failing_after(4);
        let sink = Arc::new(MemorySink::new().with_latency(Duration::from_millis(5)));
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        let err = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "SOURCE_READ_ERROR");
        assert_eq!(sink.len("orders"), 4);
    }

    #[tokio::test]
    async fn test_missing_primary_key_is_a_failed_row() {
        let mut rows = numbered(3);
        rows[1].insert("id", Bson::Null);
        let source = MemorySource::new().with_table("orders", rows);
        let sink = Arc::new(MemorySink::new());
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        let result = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();
        assert_eq!(result.rows_copied, 3);
        assert_eq!(result.rows_failed, 1);
        assert_eq!(sink.len("orders"), 2);
    }

    #[tokio::test]
    async fn test_undecodable_row_is_a_failed_row() {
        let source = MemorySource::new()
            .with_table("orders", numbered(5))
            .undecodable([Bson::Int64(2)]);
        let sink = Arc::new(MemorySink::new());
        let engine = CopyEngine::new(source, sink.clone(), CopyOptions::default()).unwrap();

        let result = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();

        assert_eq!(result.rows_copied, 5);
        assert_eq!(result.rows_failed, 1);
        assert_eq!(sink.len("orders"), 4);
        assert!(sink.get("orders", &Bson::Int64(2)).is_none());
    }

    #[tokio::test]
    async fn test_undecodable_row_under_abort_fails_table() {
        let source = MemorySource::new()
            .with_table("orders", numbered(5))
            .undecodable([Bson::Int64(4)]);
        let engine = CopyEngine::new(
            source,
            Arc::new(MemorySink::new()),
            options(100, 50, WriteErrorPolicy::Abort),
        )
        .unwrap();

        let err = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROW_DECODE_ERROR");
    }

    #[tokio::test]
    async fn test_progress_reaches_completed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let source = MemorySource::new().with_table("orders", numbered(5));
        let engine = CopyEngine::new(source, Arc::new(MemorySink::new()), CopyOptions::default())
            .unwrap()
            .with_progress(move |p| sink_seen.lock().unwrap().push(p));

        engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.phase, CopyPhase::Completed);
        assert_eq!((last.emitted, last.acknowledged), (5, 5));
        assert!(seen.iter().all(|p| p.acknowledged <= p.emitted));
    }

    #[tokio::test]
    async fn test_unknown_table_is_source_error() {
        let engine = CopyEngine::new(
            MemorySource::new(),
            Arc::new(MemorySink::new()),
            CopyOptions::default(),
        )
        .unwrap();
        let err = engine
            .copy_table(&orders(), &RunWindow::Unbounded)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SOURCE_READ_ERROR");
    }
}
