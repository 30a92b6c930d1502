//! In-memory source, sink and checkpoint store.
//!
//! Used by the tests and the benchmarks to drive the engine and the
//! orchestrator without a database.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::TableSpec;
use crate::engine::{DocumentSink, RowSource, RowStream};
use crate::error::{Error, Result};
use crate::window::{RunWindow, parse_timestamp};
use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key(id: &Bson) -> String {
    format!("{:?}", id)
}

/// Rows held per table, filtered and projected like a SQL source would.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<Document>>,
    fail_after: Option<usize>,
    undecodable: HashSet<String>,
    pulled: Arc<AtomicU64>,
}

impl MemorySource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its full rows.
    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Document>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    /// Fail the cursor after `rows` rows have been delivered.
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    /// Deliver these rows, by primary key, as decode failures.
    pub fn undecodable(mut self, ids: impl IntoIterator<Item = Bson>) -> Self {
        self.undecodable.extend(ids.into_iter().map(|id| key(&id)));
        self
    }

    /// Rows pulled by consumers across all cursors.
    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::Relaxed)
    }
}

fn timestamp_of(value: Option<&Bson>) -> Option<NaiveDateTime> {
    match value? {
        Bson::DateTime(dt) => Some(dt.to_chrono().naive_utc()),
        Bson::String(s) => parse_timestamp(s).ok(),
        _ => None,
    }
}

fn in_window(spec: &TableSpec, row: &Document, window: &RunWindow) -> bool {
    if !window.is_bounded() {
        return true;
    }
    [&spec.insert_date_column, &spec.update_date_column]
        .into_iter()
        .filter_map(|column| timestamp_of(row.get(column)))
        .any(|ts| window.contains(&ts))
}

fn project(spec: &TableSpec, row: &Document) -> Document {
    spec.projection()
        .into_iter()
        .map(|column| {
            (
                column.to_string(),
                row.get(column).cloned().unwrap_or(Bson::Null),
            )
        })
        .collect()
}

#[async_trait]
impl RowSource for MemorySource {
    async fn open<'a>(&'a self, spec: &TableSpec, window: &RunWindow) -> Result<RowStream<'a>> {
        let rows = self.tables.get(&spec.name).ok_or_else(|| {
            Error::source_read_msg(&spec.name, format!("relation \"{}\" does not exist", spec.name))
        })?;

        let mut items: Vec<Result<Document>> = rows
            .iter()
            .filter(|row| in_window(spec, row, window))
            .map(|row| {
                let document = project(spec, row);
                match document.get(&spec.primary_key_column) {
                    Some(id) if self.undecodable.contains(&key(id)) => Err(Error::row_decode(
                        &spec.name,
                        format!("row {}: value out of range", id),
                        None,
                    )),
                    _ => Ok(document),
                }
            })
            .collect();

        if let Some(limit) = self.fail_after {
            items.truncate(limit);
            items.push(Err(Error::source_read_msg(
                &spec.name,
                "connection reset by peer",
            )));
        }

        let pulled = self.pulled.clone();
        Ok(stream::iter(items)
            .inspect(move |item| {
                if item.is_ok() {
                    pulled.fetch_add(1, Ordering::Relaxed);
                }
            })
            .boxed())
    }
}

/// Collections of documents keyed by identity.
#[derive(Debug, Default)]
pub struct MemorySink {
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    writes: AtomicU64,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes of these identities.
    pub fn failing_on(mut self, ids: impl IntoIterator<Item = Bson>) -> Self {
        self.failing = ids.into_iter().map(|id| key(&id)).collect();
        self
    }

    /// Delay every write.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Documents stored in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, |docs| docs.len())
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        lock(&self.collections).values().all(|docs| docs.is_empty())
    }

    /// Stored document by identity.
    pub fn get(&self, collection: &str, id: &Bson) -> Option<Document> {
        lock(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(&key(id)).cloned())
    }

    /// Highest number of writes observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    /// Write attempts, failed ones included.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn upsert(&self, collection: &str, id: Bson, mut document: Document) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let running = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(running, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let id_key = key(&id);
        let outcome = if self.failing.contains(&id_key) {
            Err(Error::sink_write_msg(
                collection,
                format!("document {} rejected", id),
            ))
        } else {
            document.insert("_id", id);
            lock(&self.collections)
                .entry(collection.to_string())
                .or_default()
                .insert(id_key, document);
            Ok(())
        };

        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        outcome
    }
}

/// Checkpoint held in memory.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoint: Mutex<Option<Checkpoint>>,
    fail_load: bool,
    fail_save: bool,
    saves: AtomicU64,
}

impl MemoryCheckpointStore {
    /// Store without a checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `checkpoint`.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: Mutex::new(Some(checkpoint)),
            ..Self::default()
        }
    }

    /// Make `load` fail.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Make `save` fail.
    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    /// Current checkpoint.
    pub fn current(&self) -> Option<Checkpoint> {
        *lock(&self.checkpoint)
    }

    /// Successful saves.
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        if self.fail_load {
            return Err(Error::store("checkpoint store unavailable"));
        }
        Ok(self.current())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.fail_save {
            return Err(Error::store("checkpoint store unavailable"));
        }
        *lock(&self.checkpoint) = Some(*checkpoint);
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn spec() -> TableSpec {
        TableSpec::builder()
            .name("orders")
            .columns(["amount"])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_source_projects_and_filters() {
        let source = MemorySource::new().with_table(
            "orders",
            vec![
                doc! { "id": 1, "amount": 5, "secret": "x", "created_at": "2024-01-01 08:00:00", "updated_at": "2024-01-01 08:00:00" },
                doc! { "id": 2, "amount": 7, "created_at": "2023-06-01 08:00:00", "updated_at": "2023-06-01 08:00:00" },
            ],
        );
        let window = RunWindow::Bounded {
            from: parse_timestamp("2024-01-01").unwrap(),
            to: parse_timestamp("2024-01-02").unwrap(),
        };

        let rows: Vec<_> = source.open(&spec(), &window).await.unwrap().collect().await;
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "amount"]);
        assert_eq!(source.pulled(), 1);
    }

    #[tokio::test]
    async fn test_sink_replaces_by_identity() {
        let sink = MemorySink::new();
        sink.upsert("orders", Bson::Int32(1), doc! { "v": 1 }).await.unwrap();
        sink.upsert("orders", Bson::Int32(1), doc! { "v": 2 }).await.unwrap();

        assert_eq!(sink.len("orders"), 1);
        let stored = sink.get("orders", &Bson::Int32(1)).unwrap();
        assert_eq!(stored.get_i32("v").unwrap(), 2);
        assert_eq!(stored.get_i32("_id").unwrap(), 1);
        assert_eq!(sink.writes(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load().await.unwrap().is_none());

        let checkpoint = Checkpoint::new(parse_timestamp("2024-01-01 12:00:00").unwrap());
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(checkpoint));
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn test_checkpoint_store_injected_failures() {
        let checkpoint = Checkpoint::new(parse_timestamp("2024-01-01").unwrap());

        let store = MemoryCheckpointStore::new().failing_save();
        let err = tokio_test::assert_err!(tokio_test::block_on(store.save(&checkpoint)));
        assert_eq!(err.code(), "STORE_ERROR");
        assert_eq!(store.saves(), 0);
        assert!(store.current().is_none());

        let store = MemoryCheckpointStore::with_checkpoint(checkpoint).failing_load();
        tokio_test::assert_err!(tokio_test::block_on(store.load()));
        assert_eq!(store.current(), Some(checkpoint));
    }
}
