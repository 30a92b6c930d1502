//! Run orchestration: resolve the window, copy tables in order, advance the
//! checkpoint.

use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
use crate::config::{CheckpointBackend, MirrorConfig, TableErrorPolicy, TableList, TableSpec};
use crate::engine::{CopyEngine, CopyProgress, DocumentSink, RowSource, TableCopyResult};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::mongo::MongoClient;
use crate::postgres::PostgresClient;
use crate::window::{self, RunMode, RunWindow};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Mode plus the tables it applies to, checked before connecting anywhere.
#[derive(Debug, Clone)]
pub struct RunPlan {
    mode: RunMode,
    tables: Vec<TableSpec>,
}

impl RunPlan {
    /// Select the tables for `mode` from `tables`.
    ///
    /// Full-table mode picks the one named table; the other modes use the
    /// whole list in order.
    pub fn new(mode: RunMode, tables: &TableList) -> Result<Self> {
        let selected = match &mode {
            RunMode::FullTable { table } => vec![tables.find(table)?.clone()],
            RunMode::Period { .. } | RunMode::Incremental => tables.tables().to_vec(),
        };

        if selected.is_empty() {
            return Err(Error::validation(format!(
                "No tables configured in {}",
                tables.origin()
            )));
        }

        Ok(Self {
            mode,
            tables: selected,
        })
    }

    /// Run mode.
    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    /// Tables in copy order.
    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }
}

/// Run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether every table was copied without failed rows
    pub success: bool,
    /// Run mode used
    pub mode: String,
    /// Window the rows were selected with
    pub window: RunWindow,
    /// Per-table results, in copy order
    pub tables: Vec<TableCopyResult>,
    /// Whether the incremental checkpoint was advanced
    pub checkpoint_saved: bool,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when the run completed
    pub completed_at: String,
}

impl RunResult {
    /// Get total rows copied.
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_copied).sum()
    }

    /// Get total rows failed.
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_failed).sum()
    }

    /// Tables that failed.
    pub fn failed_tables(&self) -> impl Iterator<Item = &TableCopyResult> {
        self.tables.iter().filter(|t| !t.success)
    }
}

/// Copies the tables of a plan and keeps the checkpoint.
pub struct Mirror<S, K, C> {
    engine: CopyEngine<S, K>,
    store: C,
    table_policy: TableErrorPolicy,
}

impl<S: RowSource, K: DocumentSink, C: CheckpointStore> Mirror<S, K, C> {
    /// Create a mirror around an engine and a checkpoint store.
    pub fn new(engine: CopyEngine<S, K>, store: C, table_policy: TableErrorPolicy) -> Self {
        Self {
            engine,
            store,
            table_policy,
        }
    }

    /// Copy engine.
    pub fn engine(&self) -> &CopyEngine<S, K> {
        &self.engine
    }

    /// Checkpoint store.
    pub fn checkpoint_store(&self) -> &C {
        &self.store
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.engine.metrics()
    }

    /// Read the stored checkpoint.
    pub async fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.store.load().await
    }

    /// Run a plan, with `now` taken from the local clock.
    pub async fn run(&self, plan: &RunPlan) -> Result<RunResult> {
        self.run_at(plan, window::now_local()).await
    }

    /// Run a plan as of `now`.
    ///
    /// Tables are copied one after another. With [`TableErrorPolicy::Abort`]
    /// the first failed table ends the run with [`Error::TableCopy`]; with
    /// [`TableErrorPolicy::Continue`] the remaining tables are still copied and
    /// the result reports the failures. A run succeeds only when every table
    /// was copied without failed rows, and only a successful incremental run
    /// saves the window's upper bound as the new checkpoint.
    #[instrument(skip(self, plan), fields(mode = %plan.mode()))]
    pub async fn run_at(&self, plan: &RunPlan, now: NaiveDateTime) -> Result<RunResult> {
        let start = Instant::now();
        let timer = Timer::start(format!("{} run", plan.mode()));
        let mode = plan.mode();

        let checkpoint = if mode.is_incremental() {
            let checkpoint = self.store.load().await?;
            match checkpoint {
                Some(ref c) => info!("Last successful run: {}", c),
                None => info!("No checkpoint yet, starting from yesterday"),
            }
            checkpoint
        } else {
            None
        };

        let window = window::resolve(mode, checkpoint.as_ref(), now);
        if let Some((from, to)) = window.bounds() {
            if from > to {
                warn!("Window starts after it ends ({}), no rows will match", window);
            }
        }

        info!(
            "Starting {} run over {} tables ({})",
            mode,
            plan.tables().len(),
            window
        );

        let mut results = Vec::with_capacity(plan.tables().len());
        for spec in plan.tables() {
            let table_start = Instant::now();
            match self.engine.copy_table(spec, &window).await {
                Ok(result) => {
                    self.metrics().record_table(true);
                    results.push(result);
                }
                Err(e) => {
                    self.metrics().record_table(false);
                    error!("Failed to copy table {}: {}", spec.name, e);

                    if self.table_policy == TableErrorPolicy::Abort || e.is_fatal_to_run() {
                        self.metrics()
                            .record_run(false, start.elapsed().as_millis() as u64);
                        return Err(Error::table_copy(&spec.name, e));
                    }

                    results.push(TableCopyResult::failed(
                        &spec.name,
                        &e,
                        table_start.elapsed().as_millis() as u64,
                    ));
                }
            }
        }

        let success = results.iter().all(|t| t.success && t.rows_failed == 0);

        let mut checkpoint_saved = false;
        if mode.is_incremental() && success {
            if let Some(to) = window.to() {
                let next = Checkpoint::new(to);
                self.store.save(&next).await?;
                self.metrics().record_checkpoint_save();
                checkpoint_saved = true;
                info!("Checkpoint advanced to {}", next);
            }
        }

        let duration_ms = timer.stop();
        self.metrics().record_run(success, duration_ms);

        let result = RunResult {
            success,
            mode: mode.to_string(),
            window,
            tables: results,
            checkpoint_saved,
            duration_ms,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };

        if success {
            info!(
                "Run completed successfully in {}ms. Rows: {}, failed rows: {}, tables: {}",
                duration_ms,
                result.total_rows(),
                result.total_failed(),
                result.tables.len()
            );
        } else {
            warn!(
                "Run completed with errors in {}ms. Rows: {}, failed rows: {}, failed tables: {}",
                duration_ms,
                result.total_rows(),
                result.total_failed(),
                result.failed_tables().count()
            );
            if mode.is_incremental() {
                warn!("Checkpoint left unchanged, the next run repeats this window");
            }
        }

        Ok(result)
    }

    /// Take the engine and store back.
    pub fn into_parts(self) -> (CopyEngine<S, K>, C) {
        (self.engine, self.store)
    }
}

/// Mirror wired to PostgreSQL and MongoDB.
pub type DatabaseMirror = Mirror<PostgresClient, MongoClient, Box<dyn CheckpointStore>>;

impl DatabaseMirror {
    /// Connect both databases and pick the checkpoint backend from `config`.
    #[instrument(skip(config))]
    pub async fn connect(config: &MirrorConfig) -> Result<Self> {
        info!("Initializing mirror...");

        let source = PostgresClient::connect(&config.source).await?;
        let sink = MongoClient::connect(&config.sink).await?;

        let store: Box<dyn CheckpointStore> = match config.checkpoint.backend {
            CheckpointBackend::Sink => Box::new(sink.checkpoint_store(&config.checkpoint.collection)),
            CheckpointBackend::File => Box::new(FileCheckpointStore::new(&config.checkpoint.path)),
        };

        let engine = CopyEngine::new(source, sink, config.copy.copy_options())?;
        Ok(Self::new(engine, store, config.copy.on_table_error))
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(CopyProgress) + Send + Sync + 'static,
    {
        self.engine = self.engine.with_progress(callback);
        self
    }

    /// Test connectivity to both databases.
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity...");

        self.engine.source().ping().await?;
        info!("PostgreSQL: OK");

        self.engine.sink().ping().await?;
        info!("MongoDB: OK");

        Ok(())
    }

    /// Document count per table collection.
    pub async fn document_counts(&self, tables: &[TableSpec]) -> Result<Vec<(String, u64)>> {
        let mut counts = Vec::with_capacity(tables.len());
        for spec in tables {
            let count = self.engine.sink().count_documents(&spec.name).await?;
            counts.push((spec.name.clone(), count));
        }
        Ok(counts)
    }

    /// Close the sink connections.
    pub async fn shutdown(self) {
        let (engine, _) = self.into_parts();
        let (_, sink) = engine.into_inner();
        sink.shutdown().await;
    }
}
