use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{Error, Result};

/// Store the text path appends to
pub const HISTORY_STORE: &str = "history";

/// Store for utterances the user pinned
pub const FAVORITES_STORE: &str = "favorites";

/// One persisted translation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Monotonic, unique within the process (millisecond based)
    pub id: u64,

    /// Text as the user entered it
    pub source_text: String,

    /// Translation returned by the text request
    pub translated_text: String,

    /// Base64 PCM16 at the output rate
    pub audio_payload: String,

    /// When the round trip completed
    pub created_at: DateTime<Utc>,
}

/// Hands out strictly increasing utterance ids
///
/// Ids follow wall-clock milliseconds but never repeat or go backwards,
/// even for two utterances created within the same millisecond.
#[derive(Debug, Default)]
pub struct UtteranceIdGenerator {
    last: AtomicU64,
}

impl UtteranceIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `last` (e.g. the highest id already stored)
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next_id(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

/// Keyed record storage for utterances
#[async_trait]
pub trait UtteranceStore: Send + Sync {
    /// All records in `store`, newest first by id
    async fn get_all(&self, store: &str) -> Result<Vec<Utterance>>;

    /// Append a record; ids must be unique within a store
    async fn add(&self, store: &str, utterance: Utterance) -> Result<()>;

    /// Remove one record, returning whether it existed
    async fn delete(&self, store: &str, id: u64) -> Result<bool>;

    /// Remove every record in `store`
    async fn clear(&self, store: &str) -> Result<()>;
}

type Collections = BTreeMap<String, BTreeMap<u64, Utterance>>;

fn list(collections: &Collections, store: &str) -> Vec<Utterance> {
    collections
        .get(store)
        .map(|records| records.values().rev().cloned().collect())
        .unwrap_or_default()
}

fn insert(collections: &mut Collections, store: &str, utterance: Utterance) -> Result<()> {
    let records = collections.entry(store.to_string()).or_default();
    if records.contains_key(&utterance.id) {
        return Err(Error::Storage(format!(
            "utterance {} already exists in {store}",
            utterance.id
        )));
    }
    records.insert(utterance.id, utterance);
    Ok(())
}

fn remove(collections: &mut Collections, store: &str, id: u64) -> bool {
    collections
        .get_mut(store)
        .is_some_and(|records| records.remove(&id).is_some())
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UtteranceStore for MemoryStore {
    async fn get_all(&self, store: &str) -> Result<Vec<Utterance>> {
        Ok(list(&*self.collections.read().await, store))
    }

    async fn add(&self, store: &str, utterance: Utterance) -> Result<()> {
        insert(&mut *self.collections.write().await, store, utterance)
    }

    async fn delete(&self, store: &str, id: u64) -> Result<bool> {
        Ok(remove(&mut *self.collections.write().await, store, id))
    }

    async fn clear(&self, store: &str) -> Result<()> {
        self.collections.write().await.remove(store);
        Ok(())
    }
}

/// Store backed by one JSON document, rewritten atomically on every change
pub struct JsonFileStore {
    path: PathBuf,
    collections: Mutex<Collections>,
}

#[derive(Serialize, Deserialize, Default)]
struct Document {
    #[serde(flatten)]
    stores: BTreeMap<String, Vec<Utterance>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the document at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let document: Document = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Storage(format!("corrupt store {}: {e}", path.display()))
                })?;
                document
                    .stores
                    .into_iter()
                    .map(|(name, records)| {
                        let by_id = records.into_iter().map(|u| (u.id, u)).collect();
                        (name, by_id)
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Opened utterance store {} ({} stores)",
            path.display(),
            collections.len()
        );

        Ok(Self {
            path,
            collections: Mutex::new(collections),
        })
    }

    /// Highest id present in any store
    pub async fn max_id(&self) -> u64 {
        self.collections
            .lock()
            .await
            .values()
            .filter_map(|records| records.keys().next_back().copied())
            .max()
            .unwrap_or(0)
    }

    async fn persist(&self, collections: &Collections) -> Result<()> {
        let document = Document {
            stores: collections
                .iter()
                .map(|(name, records)| (name.clone(), records.values().cloned().collect()))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("store written to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl UtteranceStore for JsonFileStore {
    async fn get_all(&self, store: &str) -> Result<Vec<Utterance>> {
        Ok(list(&*self.collections.lock().await, store))
    }

    async fn add(&self, store: &str, utterance: Utterance) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let mut updated = collections.clone();
        insert(&mut updated, store, utterance)?;
        self.persist(&updated).await?;
        *collections = updated;
        Ok(())
    }

    async fn delete(&self, store: &str, id: u64) -> Result<bool> {
        let mut collections = self.collections.lock().await;
        let mut updated = collections.clone();
        if !remove(&mut updated, store, id) {
            return Ok(false);
        }
        self.persist(&updated).await?;
        *collections = updated;
        Ok(true)
    }

    async fn clear(&self, store: &str) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let mut updated = collections.clone();
        if updated.remove(store).is_none() {
            return Ok(());
        }
        self.persist(&updated).await?;
        *collections = updated;
        Ok(())
    }
}
