//! # Vector index
//!
//! [`VectorIndex`] pairs an [`IndexStore`] with the optional embedding
//! backend chosen at configure time, and answers the two questions the
//! orchestrator asks:
//!
//! - *what is semantically close to this text?* ([`similarity_search`](VectorIndex::similarity_search)),
//! - *what are the most recent records matching this filter?* ([`scan`](VectorIndex::scan)).
//!
//! ## Responsibilities
//! - **Embedding** on insert and on query, through the shared backend.
//! - **Dimension guard**: the first vector fixes the index dimension; a
//!   backend producing a different size is a fatal
//!   [`RecallError::DimensionMismatch`].
//! - **Degraded mode**: without a backend, inserts store payload-only records
//!   and similarity search returns nothing.
//!
//! Search is exact brute-force cosine similarity over a snapshot of the
//! store, which is plenty for one person's journal.
//!
//! ## Quick Example
//! ```no_run
//! use std::sync::Arc;
//! use journal_recall::models::Document;
//! use journal_recall::store::InMemoryStore;
//! use journal_recall::vector_store::VectorIndex;
//!
//! # async fn demo() -> Result<(), journal_recall::error::RecallError> {
//! let index = VectorIndex::open(Arc::new(InMemoryStore::new()), None).await?;
//! index.insert(Document::journal(1, "Rust is great!", vec![])?).await?;
//! let hits = index.similarity_search("I love Rust", 1).await?;
//! assert!(hits.is_empty()); // no embedder, no similarity
//! # Ok(()) }
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::*;

use crate::embedding::EmbeddingBackend;
use crate::error::RecallError;
use crate::models::{Document, IndexedVector, ScoredDocument, SOURCE_KEY};
use crate::store::IndexStore;

/// Cosine similarity of two vectors. Mismatched lengths, empty or zero
/// vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Exact-match conjunction over metadata keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, JsonValue)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `metadata[key] == value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Shorthand for `source == <source>`.
    pub fn source(source: &str) -> Self {
        Self::new().eq(SOURCE_KEY, source)
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| document.metadata.get(key) == Some(value))
    }
}

/// A store plus the embedder that fills it.
pub struct VectorIndex {
    store: Arc<dyn IndexStore>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
}

impl VectorIndex {
    /// Wrap `store`, refusing an embedder whose dimension disagrees with
    /// what the store already holds.
    pub async fn open(
        store: Arc<dyn IndexStore>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
    ) -> Result<Self, RecallError> {
        if let Some(backend) = &embedder {
            if let Some(expected) = store.dimension().await? {
                let actual = backend.dimension();
                if expected != actual {
                    error!(
                        "Embedding backend '{}' produces {} dims but the {} index holds {}",
                        backend.name(),
                        actual,
                        store.backend_name(),
                        expected
                    );
                    return Err(RecallError::DimensionMismatch { expected, actual });
                }
            }
        }
        Ok(Self { store, embedder })
    }

    pub fn embedder(&self) -> Option<&Arc<dyn EmbeddingBackend>> {
        self.embedder.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn store(&self) -> Arc<dyn IndexStore> {
        Arc::clone(&self.store)
    }

    /// Embed and store `document` under a fresh id. Duplicates are allowed.
    pub async fn insert(&self, document: Document) -> Result<String, RecallError> {
        let Some(embedder) = &self.embedder else {
            debug!("Embeddings disabled, storing payload only");
            let record = IndexedVector::new(None, document);
            let id = record.id.clone();
            self.store.insert(record).await?;
            return Ok(id);
        };

        let vector = embedder.embed_one(&document.text).await?;
        match self.store.dimension().await? {
            Some(expected) if expected != vector.len() => {
                return Err(RecallError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => self.store.set_dimension(vector.len(), embedder.name()).await?,
        }

        let record = IndexedVector::new(Some(vector), document);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    /// [`insert`](Self::insert), storing the payload without a vector when
    /// embedding or storing the vector fails. Only fatal errors are returned.
    pub async fn insert_with_fallback(&self, document: Document) -> Result<String, RecallError> {
        let e = match self.insert(document.clone()).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => e,
        };
        warn!("Vector insert failed, storing payload only: {}", e);
        let record = IndexedVector::new(None, document);
        let id = record.id.clone();
        self.store.insert(record).await?;
        Ok(id)
    }

    /// Up to `top_k` documents most similar to `query`, best first.
    ///
    /// Only a dimension mismatch is an error; a missing embedder, an empty
    /// index or a failing backend yield an empty list.
    pub async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, RecallError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(embedder) = &self.embedder else {
            debug!("Embeddings disabled, similarity search skipped");
            return Ok(Vec::new());
        };

        let query_vector = match embedder.embed_one(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Query embedding failed, continuing without context: {}", e);
                return Ok(Vec::new());
            }
        };

        let records = match self.store.records().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Index read failed, continuing without context: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut scored = Vec::new();
        for record in records {
            let Some(vector) = record.vector else {
                continue;
            };
            if vector.len() != query_vector.len() {
                return Err(RecallError::DimensionMismatch {
                    expected: vector.len(),
                    actual: query_vector.len(),
                });
            }
            scored.push(ScoredDocument {
                score: cosine_similarity(&query_vector, &vector),
                document: record.document,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        debug!("Similarity search returned {} documents", scored.len());
        Ok(scored)
    }

    /// Documents matching `filter`, newest `timestamp` first, at most `limit`.
    ///
    /// Timestamps compare as strings; records without one sort last, ties keep
    /// insertion order.
    pub async fn scan(
        &self,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<Document>, RecallError> {
        let mut matching: Vec<Document> = self
            .store
            .records()
            .await?
            .into_iter()
            .map(|r| r.document)
            .filter(|d| filter.matches(d))
            .collect();

        matching.sort_by(|a, b| match (a.timestamp(), b.timestamp()) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        matching.truncate(limit);
        Ok(matching)
    }

    pub async fn collection_exists(&self) -> bool {
        match self.store.exists().await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check index existence: {}", e);
                false
            }
        }
    }

    pub async fn dimension(&self) -> Option<usize> {
        self.store.dimension().await.ok().flatten()
    }

    /// Drop every record and the fixed dimension.
    pub async fn reset(&self) -> Result<(), RecallError> {
        self.store.clear().await?;
        info!("Index cleared ({})", self.store.backend_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRole, DocumentSource};
    use crate::store::InMemoryStore;
    use crate::testing::{FailingEmbedding, HashEmbedding};

    async fn hashed_index() -> VectorIndex {
        VectorIndex::open(
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(HashEmbedding::default())),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_cosine_identical() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn exact_text_is_top_hit() {
        let index = hashed_index().await;
        let texts = [
            "I went hiking in Da Lat",
            "Fixed the flaky integration test at work",
            "Cooked pho with my sister on Sunday",
        ];
        for (i, t) in texts.iter().enumerate() {
            index
                .insert(Document::journal(i as i64, *t, vec![]).unwrap())
                .await
                .unwrap();
        }

        let hits = index
            .similarity_search("Cooked pho with my sister on Sunday", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.entry_id(), Some(2));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn search_is_bounded_and_sorted() {
        let index = hashed_index().await;
        for i in 0..10 {
            let text = format!("entry number {i} about walking and coffee");
            index
                .insert(Document::journal(i, text, vec![]).unwrap())
                .await
                .unwrap();
        }
        let hits = index.similarity_search("coffee walking", 4).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(index.similarity_search("coffee", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = hashed_index().await;
        assert!(index.similarity_search("anything", 5).await.unwrap().is_empty());
        assert!(!index.collection_exists().await);
    }

    #[tokio::test]
    async fn disabled_embeddings_store_payload_only() {
        let index = VectorIndex::open(Arc::new(InMemoryStore::new()), None)
            .await
            .unwrap();
        let chat = Document::chat(ChatRole::User, "hi", "2025-01-01T00:00:00.000000").unwrap();
        index.insert(chat).await.unwrap();

        assert!(index.similarity_search("hi", 3).await.unwrap().is_empty());
        assert_eq!(index.scan(&MetadataFilter::source("chat"), 5).await.unwrap().len(), 1);
        assert_eq!(index.dimension().await, None);
        assert!(index.collection_exists().await);
    }

    #[tokio::test]
    async fn failing_embedder_degrades_search_to_empty() {
        let index = VectorIndex::open(
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(FailingEmbedding { dimension: 8 })),
        )
        .await
        .unwrap();
        assert!(index.similarity_search("query", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_on_open() {
        let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
        let small = VectorIndex::open(store.clone(), Some(Arc::new(HashEmbedding::new(16))))
            .await
            .unwrap();
        small
            .insert(Document::journal(1, "seed", vec![]).unwrap())
            .await
            .unwrap();
        assert_eq!(small.dimension().await, Some(16));

        let err = VectorIndex::open(store, Some(Arc::new(HashEmbedding::new(32))))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RecallError::DimensionMismatch {
                expected: 16,
                actual: 32
            }
        ));
    }

    #[tokio::test]
    async fn scan_filters_and_orders_by_timestamp() {
        let index = hashed_index().await;
        for (ts, text) in [
            ("2025-01-01T10:00:00.000000", "older"),
            ("2025-01-01T12:00:00.000000", "newest"),
            ("2025-01-01T11:00:00.000000", "middle"),
        ] {
            index
                .insert(Document::chat(ChatRole::User, text, ts).unwrap())
                .await
                .unwrap();
        }
        index
            .insert(Document::journal(9, "journal text", vec![]).unwrap())
            .await
            .unwrap();

        let chats = index.scan(&MetadataFilter::source("chat"), 2).await.unwrap();
        let contents: Vec<_> = chats.iter().map(|d| d.content().unwrap()).collect();
        assert_eq!(contents, vec!["newest", "middle"]);

        let journals = index
            .scan(&MetadataFilter::source("journal"), 10)
            .await
            .unwrap();
        assert_eq!(journals.len(), 1);
        assert!(journals.iter().all(|d| d.source() == Some(DocumentSource::Journal)));
    }

    #[tokio::test]
    async fn insert_falls_back_to_payload_when_embedding_fails() {
        let index = VectorIndex::open(
            Arc::new(InMemoryStore::new()),
            Some(Arc::new(FailingEmbedding { dimension: 8 })),
        )
        .await
        .unwrap();
        assert!(
            index
                .insert(Document::journal(42, "I went hiking in Da Lat", vec![]).unwrap())
                .await
                .is_err()
        );

        let id = index
            .insert_with_fallback(Document::journal(42, "I went hiking in Da Lat", vec![]).unwrap())
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert!(index.collection_exists().await);
        let stored = index
            .scan(&MetadataFilter::source("journal"), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].entry_id(), Some(42));
    }

    #[tokio::test]
    async fn reset_clears_records_and_dimension() {
        let index = hashed_index().await;
        index
            .insert(Document::journal(1, "something", vec![]).unwrap())
            .await
            .unwrap();
        assert!(index.collection_exists().await);

        index.reset().await.unwrap();
        assert!(!index.collection_exists().await);
        assert_eq!(index.dimension().await, None);
        assert!(index.similarity_search("something", 3).await.unwrap().is_empty());
    }
}
