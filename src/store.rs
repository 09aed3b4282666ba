//! Storage backends for the vector index.
//!
//! The [`IndexStore`] trait is the seam between [`VectorIndex`](crate::vector_store::VectorIndex)
//! and where records actually live. Two implementations:
//!
//! - [`InMemoryStore`]: `std::sync::RwLock<Vec<IndexedVector>>`, used when no
//!   index path is configured and as the degraded fallback.
//! - [`SqliteStore`]: Diesel over SQLite, one connection behind a mutex, every
//!   query run on the blocking pool.
//!
//! Stores know nothing about similarity; they hand out snapshots and the
//! index does the math.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::*;

use crate::config::IndexConfig;
use crate::error::RecallError;
use crate::models::{Document, IndexedVector, MetaRow, Metadata, VectorRow};
use crate::schema::{index_meta, indexed_vectors};

const DIMENSION_KEY: &str = "dimension";
const EMBEDDER_KEY: &str = "embedder";

/// Abstract storage backend for indexed vectors.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Append a record. Duplicates are allowed.
    async fn insert(&self, record: IndexedVector) -> Result<(), RecallError>;

    /// Snapshot of every stored record, in insertion order.
    async fn records(&self) -> Result<Vec<IndexedVector>, RecallError>;

    /// The recorded vector dimension, if one has been fixed.
    async fn dimension(&self) -> Result<Option<usize>, RecallError>;

    /// Fix the vector dimension. Persistent stores also record which embedder produced it.
    async fn set_dimension(&self, dimension: usize, embedder: &str) -> Result<(), RecallError>;

    /// Drop every record and the recorded dimension.
    async fn clear(&self) -> Result<(), RecallError>;

    /// True once any record or dimension marker has been written since the last clear.
    async fn exists(&self) -> Result<bool, RecallError>;

    fn backend_name(&self) -> &'static str;
}

fn poisoned<T>(_: T) -> RecallError {
    RecallError::Store("index lock poisoned".to_string())
}

/// In-memory store. Readers and writers may run concurrently.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<IndexedVector>>,
    dimension: RwLock<Option<usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn insert(&self, record: IndexedVector) -> Result<(), RecallError> {
        self.records.write().map_err(poisoned)?.push(record);
        Ok(())
    }

    async fn records(&self) -> Result<Vec<IndexedVector>, RecallError> {
        Ok(self.records.read().map_err(poisoned)?.clone())
    }

    async fn dimension(&self) -> Result<Option<usize>, RecallError> {
        Ok(*self.dimension.read().map_err(poisoned)?)
    }

    async fn set_dimension(&self, dimension: usize, _embedder: &str) -> Result<(), RecallError> {
        *self.dimension.write().map_err(poisoned)? = Some(dimension);
        Ok(())
    }

    async fn clear(&self) -> Result<(), RecallError> {
        self.records.write().map_err(poisoned)?.clear();
        *self.dimension.write().map_err(poisoned)? = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool, RecallError> {
        let has_records = !self.records.read().map_err(poisoned)?.is_empty();
        Ok(has_records || self.dimension.read().map_err(poisoned)?.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

const CREATE_TABLES: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS indexed_vectors (
        id TEXT PRIMARY KEY NOT NULL,
        text TEXT NOT NULL,
        metadata TEXT NOT NULL,
        source TEXT,
        timestamp TEXT,
        vector BLOB
    )",
    "CREATE TABLE IF NOT EXISTS index_meta (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )",
];

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes. A trailing partial value is dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl TryFrom<&IndexedVector> for VectorRow {
    type Error = RecallError;

    fn try_from(record: &IndexedVector) -> Result<Self, Self::Error> {
        let document = &record.document;
        Ok(VectorRow {
            id: record.id.clone(),
            text: document.text.clone(),
            metadata: serde_json::to_string(&document.metadata)?,
            source: document.source().map(|s| s.as_str().to_string()),
            timestamp: document.timestamp().map(str::to_string),
            vector: record.vector.as_deref().map(vec_to_blob),
        })
    }
}

impl TryFrom<VectorRow> for IndexedVector {
    type Error = RecallError;

    fn try_from(row: VectorRow) -> Result<Self, Self::Error> {
        let metadata: Metadata = serde_json::from_str(&row.metadata)?;
        Ok(IndexedVector {
            id: row.id,
            vector: row.vector.as_deref().map(blob_to_vec),
            document: Document {
                text: row.text,
                metadata,
            },
        })
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the tables exist.
    pub fn open(path: &Path) -> Result<Self, RecallError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let url = path.to_string_lossy();
        let mut conn = SqliteConnection::establish(&url)
            .map_err(|e| RecallError::Store(format!("cannot open {url}: {e}")))?;
        for statement in CREATE_TABLES {
            diesel::sql_query(statement).execute(&mut conn)?;
        }
        info!("Opened SQLite index at {}", url);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RecallError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, RecallError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RecallError::Store(format!("index task failed: {e}")))?
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn insert(&self, record: IndexedVector) -> Result<(), RecallError> {
        let row = VectorRow::try_from(&record)?;
        self.with_conn(move |conn| {
            diesel::insert_into(indexed_vectors::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn records(&self) -> Result<Vec<IndexedVector>, RecallError> {
        let rows = self
            .with_conn(|conn| {
                Ok(indexed_vectors::table
                    .select(VectorRow::as_select())
                    .load::<VectorRow>(conn)?)
            })
            .await?;
        rows.into_iter().map(IndexedVector::try_from).collect()
    }

    async fn dimension(&self) -> Result<Option<usize>, RecallError> {
        let value = self
            .with_conn(|conn| {
                Ok(index_meta::table
                    .filter(index_meta::key.eq(DIMENSION_KEY))
                    .select(index_meta::value)
                    .first::<String>(conn)
                    .optional()?)
            })
            .await?;
        value
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|e| RecallError::Store(format!("corrupt dimension marker {v:?}: {e}")))
            })
            .transpose()
    }

    async fn set_dimension(&self, dimension: usize, embedder: &str) -> Result<(), RecallError> {
        let rows = vec![
            MetaRow {
                key: DIMENSION_KEY.to_string(),
                value: dimension.to_string(),
            },
            MetaRow {
                key: EMBEDDER_KEY.to_string(),
                value: embedder.to_string(),
            },
        ];
        self.with_conn(move |conn| {
            conn.transaction(|conn| {
                for row in &rows {
                    diesel::replace_into(index_meta::table)
                        .values(row)
                        .execute(conn)?;
                }
                Ok::<_, diesel::result::Error>(())
            })?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), RecallError> {
        self.with_conn(|conn| {
            conn.transaction(|conn| {
                diesel::delete(indexed_vectors::table).execute(conn)?;
                diesel::delete(index_meta::table).execute(conn)?;
                Ok::<_, diesel::result::Error>(())
            })?;
            Ok(())
        })
        .await
    }

    async fn exists(&self) -> Result<bool, RecallError> {
        self.with_conn(|conn| {
            let records: i64 = indexed_vectors::table.count().get_result(conn)?;
            let markers: i64 = index_meta::table.count().get_result(conn)?;
            Ok(records > 0 || markers > 0)
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

static DEGRADED_WARNED: AtomicBool = AtomicBool::new(false);

/// Open the configured store.
///
/// No path means in-memory. A path that cannot be opened falls back to
/// in-memory with a warning, logged once per process.
pub fn open_store(config: &IndexConfig) -> Arc<dyn IndexStore> {
    let Some(path) = config.path.as_deref() else {
        debug!("No index path configured, using in-memory index");
        return Arc::new(InMemoryStore::new());
    };

    match SqliteStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            if !DEGRADED_WARNED.swap(true, Ordering::SeqCst) {
                warn!(
                    "Cannot open index at {}: {}. Falling back to an in-memory index; \
                     nothing will be persisted.",
                    path.display(),
                    e
                );
            }
            Arc::new(InMemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;
    use tempfile::tempdir;

    fn journal(entry_id: i64, text: &str, vector: Vec<f32>) -> IndexedVector {
        IndexedVector::new(
            Some(vector),
            Document::journal(entry_id, text, vec!["t".into()]).unwrap(),
        )
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let v = vec![1.0f32, -0.5, 3.25];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[tokio::test]
    async fn memory_store_tracks_existence() {
        let store = InMemoryStore::new();
        assert!(!store.exists().await.unwrap());

        store.set_dimension(3, "hash").await.unwrap();
        assert!(store.exists().await.unwrap());
        assert_eq!(store.dimension().await.unwrap(), Some(3));

        store.insert(journal(1, "a", vec![1.0, 0.0, 0.0])).await.unwrap();
        store.insert(journal(1, "a", vec![1.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(store.records().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(!store.exists().await.unwrap());
        assert_eq!(store.dimension().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_dimension(3, "hash").await.unwrap();
            store.insert(journal(42, "hiking", vec![0.1, 0.2, 0.3])).await.unwrap();
            let chat = Document::chat(ChatRole::User, "hi", "2025-01-01T00:00:00.000000").unwrap();
            store.insert(IndexedVector::new(None, chat)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.dimension().await.unwrap(), Some(3));
        let records = store.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].document.entry_id(), Some(42));
        assert_eq!(records[0].vector.as_deref(), Some(&[0.1f32, 0.2, 0.3][..]));
        assert_eq!(records[1].vector, None);
        assert_eq!(records[1].document.timestamp(), Some("2025-01-01T00:00:00.000000"));

        store.clear().await.unwrap();
        assert!(!store.exists().await.unwrap());
        assert!(store.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unopenable_path_falls_back_to_memory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = IndexConfig {
            path: Some(blocker.join("index.db")),
        };
        let store = open_store(&config);
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn no_path_means_memory() {
        assert_eq!(open_store(&IndexConfig::default()).backend_name(), "memory");
    }
}
