//! MongoDB document sink and checkpoint store.

use crate::checkpoint::{CHECKPOINT_ID, Checkpoint, CheckpointStore};
use crate::config::MongoConfig;
use crate::engine::DocumentSink;
use crate::error::{Error, Result};
use crate::postgres::mask_url;
use crate::window::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use bson::{Bson, Document, doc};
use chrono::Local;
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::{Client, Collection, Database};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// MongoDB client bound to the target database.
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    database: Database,
}

impl MongoClient {
    /// Connect to MongoDB and verify the server answers.
    #[instrument(skip(config), fields(url = %mask_url(&config.url), database = %config.database))]
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        info!("Connecting to MongoDB...");

        let mut options = ClientOptions::parse(&config.url)
            .await
            .map_err(|e| Error::sink_connection("Invalid connection URI", e))?;
        apply_tls(&mut options, config);
        options.app_name = Some(concat!("rowmirror/", env!("CARGO_PKG_VERSION")).to_string());
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = Client::with_options(options)
            .map_err(|e| Error::sink_connection("Failed to create client", e))?;
        let database = client.database(&config.database);

        let this = Self { client, database };
        this.ping().await?;

        info!("Connected to MongoDB");
        Ok(this)
    }

    /// Test connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::sink_connection("Ping failed", e))?;
        Ok(())
    }

    /// Number of documents in a collection.
    pub async fn count_documents(&self, collection: &str) -> Result<u64> {
        self.database
            .collection::<Document>(collection)
            .count_documents(doc! {})
            .await
            .map_err(|e| Error::sink_write(collection, "Count failed", e))
    }

    /// Checkpoint store kept in `collection` of the target database.
    pub fn checkpoint_store(&self, collection: &str) -> MongoCheckpointStore {
        MongoCheckpointStore {
            collection: self.database.collection(collection),
        }
    }

    /// Close all connections.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

/// Turn on TLS when configured, keeping options already given in the URI.
fn apply_tls(options: &mut ClientOptions, config: &MongoConfig) {
    if !config.tls {
        return;
    }
    let mut tls = match options.tls.take() {
        Some(Tls::Enabled(tls)) => tls,
        _ => TlsOptions::default(),
    };
    if let Some(ref ca_file) = config.ca_file {
        tls.ca_file_path = Some(PathBuf::from(ca_file));
    }
    options.tls = Some(Tls::Enabled(tls));
}

#[async_trait]
impl DocumentSink for MongoClient {
    async fn upsert(&self, collection: &str, id: Bson, document: Document) -> Result<()> {
        self.database
            .collection::<Document>(collection)
            .replace_one(doc! { "_id": id }, document)
            .upsert(true)
            .await
            .map_err(|e| Error::sink_write(collection, "Upsert failed", e))?;
        Ok(())
    }
}

/// Checkpoint stored as `{_id: 0, date: "YYYY-MM-DD HH:MM:SS"}`.
#[derive(Clone)]
pub struct MongoCheckpointStore {
    collection: Collection<Document>,
}

#[async_trait]
impl CheckpointStore for MongoCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let found = self
            .collection
            .find_one(doc! { "_id": CHECKPOINT_ID })
            .await
            .map_err(|e| Error::store_with_source("Failed to read checkpoint", e))?;

        match found {
            Some(document) => checkpoint_from_document(&document).map(Some),
            None => {
                debug!("No checkpoint in {}", self.collection.name());
                Ok(None)
            }
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.collection
            .replace_one(
                doc! { "_id": CHECKPOINT_ID },
                checkpoint_to_document(checkpoint),
            )
            .upsert(true)
            .await
            .map_err(|e| Error::store_with_source("Failed to save checkpoint", e))?;

        debug!("Saved checkpoint {} to {}", checkpoint, self.collection.name());
        Ok(())
    }
}

fn checkpoint_to_document(checkpoint: &Checkpoint) -> Document {
    doc! {
        "_id": CHECKPOINT_ID,
        "date": format_timestamp(&checkpoint.date),
    }
}

/// Read a checkpoint record. A BSON date is accepted too and read as local time.
fn checkpoint_from_document(document: &Document) -> Result<Checkpoint> {
    let date = match document.get("date") {
        Some(Bson::String(s)) => parse_timestamp(s)
            .map_err(|e| Error::store_with_source("Malformed checkpoint date", e))?,
        Some(Bson::DateTime(dt)) => dt.to_chrono().with_timezone(&Local).naive_local(),
        Some(other) => {
            return Err(Error::store(format!(
                "Checkpoint date has unexpected type {:?}",
                other.element_type()
            )));
        }
        None => return Err(Error::store("Checkpoint record has no date")),
    };
    Ok(Checkpoint::new(date))
}
