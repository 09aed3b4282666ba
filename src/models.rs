//! # Data model
//!
//! Types that flow through the retrieval core:
//!
//! - [`Document`]: an immutable unit of indexed text plus open-schema metadata.
//!   Journal documents carry `source = "journal"`, `entry_id` and `tags`; chat
//!   memory documents carry `source = "chat"`, `role`, `timestamp` and `content`.
//! - [`IndexedVector`]: a stored `(id, vector, payload)` triple.
//! - [`ScoredDocument`]: a similarity search hit.
//! - [`Reference`] / [`RetrievalResult`]: what a query returns.
//! - [`QueryRequest`]: the validated query entry point.
//!
//! The Diesel row types used by the SQLite index store live at the bottom of
//! this module (see `crate::schema`).
//!
//! ## Example
//! ```rust
//! use journal_recall::models::{Document, DocumentSource};
//!
//! let doc = Document::journal(42, "I went hiking in Da Lat", vec!["travel".into()]).unwrap();
//! assert_eq!(doc.source(), Some(DocumentSource::Journal));
//! assert_eq!(doc.entry_id(), Some(42));
//! ```

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RecallError;
use crate::llm::LlmProvider;

/// Open-schema document metadata.
pub type Metadata = serde_json::Map<String, JsonValue>;

pub const SOURCE_KEY: &str = "source";
pub const ENTRY_ID_KEY: &str = "entry_id";
pub const TAGS_KEY: &str = "tags";
pub const ROLE_KEY: &str = "role";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const CONTENT_KEY: &str = "content";

/// Which logical kind of document a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    Journal,
    Chat,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Journal => "journal",
            DocumentSource::Chat => "chat",
        }
    }
}

/// Speaker of a chat memory document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    /// Label used in the rendered memory line, e.g. `[User | ...]`.
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

/// An immutable unit of indexed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    /// Build a document, rejecting empty text.
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Result<Self, RecallError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RecallError::EmptyDocument);
        }
        Ok(Self { text, metadata })
    }

    /// A document derived from a journal entry.
    pub fn journal(
        entry_id: i64,
        text: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Self, RecallError> {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.into(), DocumentSource::Journal.as_str().into());
        metadata.insert(ENTRY_ID_KEY.into(), entry_id.into());
        metadata.insert(TAGS_KEY.into(), tags.into());
        Self::new(text, metadata)
    }

    /// A document derived from one conversation turn.
    ///
    /// The indexed text is prefixed with the role and timestamp so it reads
    /// naturally when recalled as memory; the raw turn is kept in `content`.
    pub fn chat(
        role: ChatRole,
        content: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<Self, RecallError> {
        let content = content.into();
        let timestamp = timestamp.into();
        let text = format!("[{} | {}] {}", role.label(), timestamp, content);

        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.into(), DocumentSource::Chat.as_str().into());
        metadata.insert(ROLE_KEY.into(), role.as_str().into());
        metadata.insert(TIMESTAMP_KEY.into(), timestamp.into());
        metadata.insert(CONTENT_KEY.into(), content.into());
        Self::new(text, metadata)
    }

    pub fn source(&self) -> Option<DocumentSource> {
        match self.metadata.get(SOURCE_KEY).and_then(JsonValue::as_str) {
            Some("journal") => Some(DocumentSource::Journal),
            Some("chat") => Some(DocumentSource::Chat),
            _ => None,
        }
    }

    /// The journal entry id, if the metadata carries an integer one.
    pub fn entry_id(&self) -> Option<i64> {
        self.metadata.get(ENTRY_ID_KEY).and_then(JsonValue::as_i64)
    }

    /// String tags; non-list or non-string values are ignored.
    pub fn tags(&self) -> Vec<String> {
        match self.metadata.get(TAGS_KEY) {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.metadata.get(TIMESTAMP_KEY).and_then(JsonValue::as_str)
    }

    pub fn content(&self) -> Option<&str> {
        self.metadata.get(CONTENT_KEY).and_then(JsonValue::as_str)
    }

    /// The journal reference this document supports, if any.
    ///
    /// Chat memory never yields a reference, even if someone stored an
    /// `entry_id` on it.
    pub fn reference(&self) -> Option<Reference> {
        if self.source() == Some(DocumentSource::Chat) {
            return None;
        }
        self.entry_id().map(|entry_id| Reference {
            entry_id,
            tags: self.tags(),
        })
    }
}

/// A stored `(id, vector, payload)` triple.
///
/// `vector` is `None` for payload-only records written while embeddings are
/// disabled; those are visible to `scan` but never to similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: String,
    pub vector: Option<Vec<f32>>,
    pub document: Document,
}

impl IndexedVector {
    /// Wrap a document under a freshly generated unique id.
    pub fn new(vector: Option<Vec<f32>>, document: Document) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            document,
        }
    }
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// A journal entry surfaced as evidence for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub entry_id: i64,
    pub tags: Vec<String>,
}

/// The outcome of a query: always normally shaped, even on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub references: Vec<Reference>,
}

impl RetrievalResult {
    /// A diagnostic answer with no references.
    pub fn diagnostic(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            references: Vec::new(),
        }
    }

    /// Build a result, collecting references from retrieved documents.
    ///
    /// References are deduplicated by `entry_id`, first-seen order preserved.
    pub fn from_retrieved<'a>(
        answer: impl Into<String>,
        retrieved: impl IntoIterator<Item = &'a Document>,
    ) -> Self {
        let mut references: Vec<Reference> = Vec::new();
        for reference in retrieved.into_iter().filter_map(Document::reference) {
            if !references.iter().any(|r| r.entry_id == reference.entry_id) {
                references.push(reference);
            }
        }
        Self {
            answer: answer.into(),
            references,
        }
    }
}

/// Which indexes a query draws journal context from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Vector similarity only.
    Vector,
    /// Vector similarity fused with the keyword graph.
    Graph,
}

impl RetrievalMode {
    /// Parse a request's `mode`. `"hybrid"` is the same as `"graph"`.
    pub fn parse(mode: &str) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "vector" => Some(RetrievalMode::Vector),
            "graph" | "hybrid" => Some(RetrievalMode::Graph),
            _ => None,
        }
    }
}

pub const MIN_QUERY_CHARS: usize = 3;
pub const MAX_TOP_K: usize = 20;

fn default_top_k() -> usize {
    5
}

fn default_mode() -> String {
    "graph".to_string()
}

/// A natural-language query as received from the query collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// `"graph"`/`"hybrid"` or `"vector"`; see [`RetrievalMode`].
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Per-query LLM provider override.
    #[serde(default)]
    pub model: Option<LlmProvider>,
    /// Per-query model name (self-hosted only).
    #[serde(default)]
    pub model_name: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            mode: default_mode(),
            model: None,
            model_name: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_provider(mut self, provider: LlmProvider) -> Self {
        self.model = Some(provider);
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Enforce `query` of at least 3 characters and `top_k` in `[1, 20]`.
    pub fn validate(&self) -> Result<(), RecallError> {
        if self.query.trim().chars().count() < MIN_QUERY_CHARS {
            return Err(RecallError::InvalidQuery(format!(
                "query must be at least {MIN_QUERY_CHARS} characters"
            )));
        }
        if !(1..=MAX_TOP_K).contains(&self.top_k) {
            return Err(RecallError::InvalidQuery(format!(
                "top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        Ok(())
    }
}

/// One row of the `indexed_vectors` table.
///
/// `metadata` is the JSON-encoded [`Metadata`]; `source` and `timestamp` are
/// copied out of it so they can be read without decoding. `vector` holds
/// little-endian `f32`s.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::indexed_vectors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VectorRow {
    pub id: String,
    pub text: String,
    pub metadata: String,
    pub source: Option<String>,
    pub timestamp: Option<String>,
    pub vector: Option<Vec<u8>>,
}

/// One key/value row of the `index_meta` table.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::index_meta)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MetaRow {
    pub key: String,
    pub value: String,
}
