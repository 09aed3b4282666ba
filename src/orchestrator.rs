//! # Retrieval orchestrator
//!
//! [`RetrievalOrchestrator`] is the single entry point the rest of an
//! application talks to. It owns one [`Runtime`] (config, vector index,
//! keyword graph, LLM resolver, prompt builder) behind a
//! `tokio::sync::RwLock`:
//!
//! - [`query`](RetrievalOrchestrator::query) and
//!   [`index_entry`](RetrievalOrchestrator::index_entry) take read guards, so
//!   any number of them run concurrently;
//! - [`reset`](RetrievalOrchestrator::reset) and
//!   [`reconfigure`](RetrievalOrchestrator::reconfigure) take the write guard,
//!   so no query ever retrieves from a half-reset index.
//!
//! A query holds its read guard only while retrieving and building the
//! prompt. Generation runs on a cloned `Arc<Runtime>` with no guard held, so
//! a slow model never blocks a reset. The exchange is stored afterwards only
//! if the runtime has not been replaced in the meantime.
//!
//! ## Query pipeline
//!
//! ```text
//! START → PROVIDER_CHECK → RETRIEVE → BUILD_PROMPT → GENERATE → PERSIST_MEMORY → DONE
//!              │                           │                        │
//!              └───────────── ERROR ◄──────┴────────────────────────┘
//! ```
//!
//! In `graph` mode (the default) RETRIEVE fuses the vector hits with the
//! [`KeywordGraph`] hits; `vector` mode uses the vector hits alone.
//!
//! Only request validation surfaces as an `Err`. Every other failure becomes a
//! normally shaped [`RetrievalResult`] whose answer explains what went wrong
//! and whose references are empty.
//!
//! ## Example
//! ```no_run
//! use journal_recall::config::RecallConfig;
//! use journal_recall::models::QueryRequest;
//! use journal_recall::orchestrator::RetrievalOrchestrator;
//!
//! # async fn demo() -> Result<(), journal_recall::error::RecallError> {
//! let recall = RetrievalOrchestrator::configure(RecallConfig::default()).await?;
//! recall.index_entry(42, "I went hiking in Da Lat", vec!["travel".into()]).await?;
//! let result = recall.query(QueryRequest::new("Where did I go hiking?").with_top_k(1)).await?;
//! println!("{} {:?}", result.answer, result.references);
//! # Ok(()) }
//! ```

use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::*;

use crate::config::RecallConfig;
use crate::embedding::{EmbeddingFactory, default_factories, select_embedding};
use crate::error::RecallError;
use crate::graph::{KeywordGraph, reciprocal_rank_fusion};
use crate::llm::{CompletionClient, LlmFactory, LlmProvider, LlmResolver};
use crate::memory::{recent_memory, remember_exchange};
use crate::models::{
    Document, DocumentSource, QueryRequest, RetrievalMode, RetrievalResult, ScoredDocument,
};
use crate::prompt::PromptBuilder;
use crate::store::{IndexStore, open_store};
use crate::template::{PromptTemplate, load_template};
use crate::vector_store::{MetadataFilter, VectorIndex};

/// Where the runtime gets its collaborators from.
pub trait ProviderSource: Send + Sync {
    /// Embedding candidates, in preference order.
    fn embedding_factories(&self, config: &RecallConfig) -> Vec<Box<dyn EmbeddingFactory>>;

    fn llm_resolver(&self, config: &RecallConfig) -> Arc<dyn LlmResolver>;

    fn open_store(&self, config: &RecallConfig) -> Arc<dyn IndexStore> {
        open_store(&config.index)
    }
}

/// Real backends built from configuration.
pub struct DefaultProviders;

impl ProviderSource for DefaultProviders {
    fn embedding_factories(&self, _config: &RecallConfig) -> Vec<Box<dyn EmbeddingFactory>> {
        default_factories()
    }

    fn llm_resolver(&self, config: &RecallConfig) -> Arc<dyn LlmResolver> {
        Arc::new(LlmFactory::new(config.llm.clone()))
    }
}

/// Pipeline position of a query, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Start,
    ProviderCheck,
    Retrieve,
    BuildPrompt,
    Generate,
    PersistMemory,
    Done,
    Error,
}

fn enter(stage: QueryStage) {
    debug!("Query stage: {:?}", stage);
}

/// Snapshot of what the runtime is currently wired to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    pub llm_provider: LlmProvider,
    /// Embedding backend name, or `"disabled"`.
    pub embedding: String,
    pub index_backend: String,
    pub dimension: Option<usize>,
    pub collection_exists: bool,
    /// Entries in the keyword graph; `None` when the graph is turned off.
    pub graph_entries: Option<usize>,
}

/// A query that is ready for generation.
struct PreparedQuery {
    client: Arc<dyn CompletionClient>,
    prompt: String,
    retrieved: Vec<ScoredDocument>,
}

/// Everything a query needs, replaced as a whole on reset/reconfigure.
pub struct Runtime {
    config: RecallConfig,
    index: VectorIndex,
    graph: Option<RwLock<KeywordGraph>>,
    llm: Arc<dyn LlmResolver>,
    prompt: PromptBuilder,
    /// Bumped every time the orchestrator swaps in a new runtime.
    epoch: u64,
}

impl Runtime {
    /// Open the configured store and wire providers onto it.
    pub async fn build(
        config: RecallConfig,
        providers: &dyn ProviderSource,
    ) -> Result<Self, RecallError> {
        let store = providers.open_store(&config);
        Self::assemble(config, store, providers).await
    }

    async fn assemble(
        config: RecallConfig,
        store: Arc<dyn IndexStore>,
        providers: &dyn ProviderSource,
    ) -> Result<Self, RecallError> {
        let factories = providers.embedding_factories(&config);
        let embedder = select_embedding(&factories, &config).await;
        let index = VectorIndex::open(store, embedder).await?;
        let llm = providers.llm_resolver(&config);

        let graph = if config.retrieval.graph {
            Some(RwLock::new(load_graph(&index).await))
        } else {
            None
        };

        let template = match &config.retrieval.template {
            Some(name) => match load_template(name).await {
                Ok(template) => template,
                Err(e) => {
                    warn!("Template '{}' unusable, using built-in persona: {}", name, e);
                    PromptTemplate::default()
                }
            },
            None => PromptTemplate::default(),
        };

        info!(
            "Runtime ready: llm={}, embedding={}, index={}, graph={}",
            config.llm.provider,
            index.embedder().map(|e| e.name()).unwrap_or("disabled"),
            index.backend_name(),
            config.retrieval.graph
        );

        Ok(Self {
            config,
            index,
            graph,
            llm,
            prompt: PromptBuilder::new(template),
            epoch: 0,
        })
    }

    /// Resolve the provider, retrieve context and build the prompt.
    ///
    /// `Err` carries a finished diagnostic result.
    async fn prepare(&self, request: &QueryRequest) -> Result<PreparedQuery, RetrievalResult> {
        enter(QueryStage::Start);
        let provider = request.model.unwrap_or(self.config.llm.provider);

        enter(QueryStage::ProviderCheck);
        let client = match self
            .llm
            .resolve(provider, request.model_name.as_deref())
            .await
        {
            Ok(client) => client,
            Err(unavailable) => {
                enter(QueryStage::Error);
                return Err(RetrievalResult::diagnostic(unavailable.user_message()));
            }
        };

        enter(QueryStage::Retrieve);
        let retrieved = self.retrieve(request).await?;
        let memory = recent_memory(&self.index, self.config.retrieval.memory_limit).await;
        debug!(
            "Retrieved {} documents and {} memory lines",
            retrieved.len(),
            memory.len()
        );

        enter(QueryStage::BuildPrompt);
        let context: Vec<String> = retrieved.iter().map(|s| s.document.text.clone()).collect();
        let prompt = self.prompt.build(
            &request.query,
            &context,
            &memory,
            Local::now().naive_local(),
        );

        Ok(PreparedQuery {
            client,
            prompt,
            retrieved,
        })
    }

    async fn retrieve(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<ScoredDocument>, RetrievalResult> {
        let mode = RetrievalMode::parse(&request.mode).unwrap_or_else(|| {
            warn!("Unknown retrieval mode '{}', using graph", request.mode);
            RetrievalMode::Graph
        });

        let vector_hits = match self.index.similarity_search(&request.query, request.top_k).await {
            Ok(hits) => hits,
            Err(RecallError::DimensionMismatch { expected, actual }) => {
                enter(QueryStage::Error);
                error!("Index holds {} dims, embedder produces {}", expected, actual);
                return Err(RetrievalResult::diagnostic(format!(
                    "Index dimension mismatch: the index holds {expected}-dimensional vectors \
                     but the embedding backend produces {actual}. Reset the index \
                     (`recall reset --confirm`) and re-index the journal."
                )));
            }
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                Vec::new()
            }
        };

        match (mode, &self.graph) {
            (RetrievalMode::Graph, Some(graph)) => {
                let graph_hits = graph.read().await.search(&request.query, request.top_k);
                debug!(
                    "Fusing {} vector hits with {} graph hits",
                    vector_hits.len(),
                    graph_hits.len()
                );
                Ok(reciprocal_rank_fusion(&[vector_hits, graph_hits], request.top_k))
            }
            _ => Ok(vector_hits),
        }
    }

    async fn status(&self) -> RuntimeStatus {
        let graph_entries = match &self.graph {
            Some(graph) => Some(graph.read().await.len()),
            None => None,
        };
        RuntimeStatus {
            llm_provider: self.config.llm.provider,
            embedding: self
                .index
                .embedder()
                .map(|e| e.name().to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            index_backend: self.index.backend_name().to_string(),
            dimension: self.index.dimension().await,
            collection_exists: self.index.collection_exists().await,
            graph_entries,
        }
    }
}

/// Rebuild the keyword graph from the journal documents already stored.
async fn load_graph(index: &VectorIndex) -> KeywordGraph {
    let filter = MetadataFilter::source(DocumentSource::Journal.as_str());
    match index.scan(&filter, usize::MAX).await {
        Ok(documents) => {
            let graph = KeywordGraph::from_documents(&documents);
            debug!(
                "Keyword graph loaded: {} entries, {} edges",
                graph.len(),
                graph.edge_count()
            );
            graph
        }
        Err(e) => {
            warn!("Could not load journal for the keyword graph: {}", e);
            KeywordGraph::new()
        }
    }
}

/// Journal recall: ingestion, queries and admin operations over one runtime.
pub struct RetrievalOrchestrator {
    runtime: RwLock<Arc<Runtime>>,
    providers: Arc<dyn ProviderSource>,
}

impl RetrievalOrchestrator {
    /// Build a runtime from `config` with the real backends.
    ///
    /// Fails only when the stored index and the selected embedding backend
    /// disagree on vector dimension.
    pub async fn configure(config: RecallConfig) -> Result<Self, RecallError> {
        Self::with_providers(config, Arc::new(DefaultProviders)).await
    }

    pub async fn with_providers(
        config: RecallConfig,
        providers: Arc<dyn ProviderSource>,
    ) -> Result<Self, RecallError> {
        let runtime = Runtime::build(config, providers.as_ref()).await?;
        Ok(Self {
            runtime: RwLock::new(Arc::new(runtime)),
            providers,
        })
    }

    /// Index one journal entry. Empty text is skipped and yields `None`.
    ///
    /// When the vector cannot be computed the entry is stored without one and
    /// still feeds the keyword graph. Only a dimension mismatch is an `Err`;
    /// a store that refuses even the payload is logged and yields `None`.
    pub async fn index_entry(
        &self,
        entry_id: i64,
        text: &str,
        tags: Vec<String>,
    ) -> Result<Option<String>, RecallError> {
        if text.trim().is_empty() {
            warn!("Skipping empty journal entry {}", entry_id);
            return Ok(None);
        }
        let document = Document::journal(entry_id, text, tags)?;

        let runtime = self.runtime.read().await;
        let id = match runtime.index.insert_with_fallback(document.clone()).await {
            Ok(id) => id,
            Err(e) if e.is_fatal() => {
                error!("Failed to index journal entry {}: {}", entry_id, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Journal entry {} not indexed: {}", entry_id, e);
                return Ok(None);
            }
        };
        if let Some(graph) = &runtime.graph {
            graph.write().await.insert(&document);
        }
        info!("Indexed journal entry {} as {}", entry_id, id);
        Ok(Some(id))
    }

    /// Answer a question from the journal.
    ///
    /// Returns `Err` only for an invalid request.
    pub async fn query(&self, request: QueryRequest) -> Result<RetrievalResult, RecallError> {
        request.validate()?;

        let (runtime, prepared) = {
            let guard = self.runtime.read().await;
            let runtime = Arc::clone(&*guard);
            let prepared = runtime.prepare(&request).await;
            match prepared {
                Ok(prepared) => (runtime, prepared),
                Err(diagnostic) => return Ok(diagnostic),
            }
        };

        enter(QueryStage::Generate);
        let answer = match prepared.client.complete(&prepared.prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                enter(QueryStage::Error);
                error!("Query execution failed: {}", e);
                return Ok(RetrievalResult::diagnostic(format!("Query failed: {e}")));
            }
        };

        enter(QueryStage::PersistMemory);
        {
            let current = self.runtime.read().await;
            if current.epoch == runtime.epoch {
                if let Err(e) =
                    remember_exchange(&current.index, &request.query, &answer, Utc::now()).await
                {
                    warn!("Failed to index chat conversation: {}", e);
                }
            } else {
                info!("Runtime replaced during generation, exchange not stored");
            }
        }

        enter(QueryStage::Done);
        Ok(RetrievalResult::from_retrieved(
            answer,
            prepared.retrieved.iter().map(|s| &s.document),
        ))
    }

    /// Empty the index, then re-run provider configuration.
    pub async fn reset(&self) -> Result<(), RecallError> {
        let mut runtime = self.runtime.write().await;
        runtime.index.reset().await?;
        if let Some(graph) = &runtime.graph {
            *graph.write().await = KeywordGraph::new();
        }
        let mut next = Runtime::assemble(
            runtime.config.clone(),
            runtime.index.store(),
            self.providers.as_ref(),
        )
        .await?;
        next.epoch = runtime.epoch + 1;
        *runtime = Arc::new(next);
        info!("Index reset complete");
        Ok(())
    }

    /// Replace the whole runtime with one built from `config`.
    ///
    /// The current runtime stays in place if the new one cannot be built.
    pub async fn reconfigure(&self, config: RecallConfig) -> Result<(), RecallError> {
        let mut runtime = self.runtime.write().await;
        let mut next = Runtime::build(config, self.providers.as_ref()).await?;
        next.epoch = runtime.epoch + 1;
        *runtime = Arc::new(next);
        info!("Runtime reconfigured");
        Ok(())
    }

    pub async fn status(&self) -> RuntimeStatus {
        let runtime = Arc::clone(&*self.runtime.read().await);
        runtime.status().await
    }
}
