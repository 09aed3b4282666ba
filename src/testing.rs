//! Test doubles shared by the unit tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::RecallConfig;
use crate::embedding::{EmbeddingBackend, EmbeddingFactory};
use crate::error::RecallError;
use crate::llm::{CompletionClient, Diagnosis, LlmProvider, LlmResolver, Unavailable};
use crate::orchestrator::ProviderSource;
use crate::store::IndexStore;

/// Deterministic bag-of-words embedding: each lowercase word is hashed into
/// one of `dimension` buckets, then the vector is L2-normalized.
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedding {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        if texts.is_empty() {
            return Err(RecallError::EmptyInput);
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// A backend that was selected but has since gone away.
pub struct FailingEmbedding {
    pub dimension: usize,
}

#[async_trait]
impl EmbeddingBackend for FailingEmbedding {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        Err(RecallError::Embedding("backend went away".to_string()))
    }
}

pub struct StaticFactory {
    backend: Arc<dyn EmbeddingBackend>,
}

impl StaticFactory {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl EmbeddingFactory for StaticFactory {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn connect(
        &self,
        _config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError> {
        Ok(Arc::clone(&self.backend))
    }
}

pub struct FailingFactory;

#[async_trait]
impl EmbeddingFactory for FailingFactory {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn connect(
        &self,
        _config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError> {
        Err(RecallError::Embedding("connection refused".to_string()))
    }
}

/// Completion client with a canned answer that records every prompt.
pub struct ScriptedClient {
    answer: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str) -> Result<String, RecallError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
            .clone()
            .ok_or_else(|| RecallError::Generation("model crashed".to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::SelfHosted
    }
}

/// Resolves every provider to the same client and records requests.
pub struct ScriptedResolver {
    client: Arc<dyn CompletionClient>,
    calls: Mutex<Vec<(LlmProvider, Option<String>)>>,
}

impl ScriptedResolver {
    pub fn new(client: Arc<dyn CompletionClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(LlmProvider, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmResolver for ScriptedResolver {
    async fn resolve(
        &self,
        provider: LlmProvider,
        model_override: Option<&str>,
    ) -> Result<Arc<dyn CompletionClient>, Unavailable> {
        self.calls
            .lock()
            .unwrap()
            .push((provider, model_override.map(str::to_string)));
        Ok(Arc::clone(&self.client))
    }
}

/// Completion client that blocks inside `complete` until released.
pub struct GatedClient {
    answer: String,
    entered: Notify,
    release: Notify,
}

impl GatedClient {
    pub fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    /// Wait until a completion is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl CompletionClient for GatedClient {
    async fn complete(&self, _prompt: &str) -> Result<String, RecallError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.answer.clone())
    }

    fn model(&self) -> &str {
        "gated"
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::SelfHosted
    }
}

/// Resolver for a provider that is never available.
pub struct UnavailableResolver;

#[async_trait]
impl LlmResolver for UnavailableResolver {
    async fn resolve(
        &self,
        provider: LlmProvider,
        _model_override: Option<&str>,
    ) -> Result<Arc<dyn CompletionClient>, Unavailable> {
        Err(Unavailable {
            provider,
            diagnosis: Diagnosis::MissingKey,
            model: None,
        })
    }
}

/// Fixed store and resolver for orchestrator tests. The embedder can be
/// swapped between runtime builds.
pub struct TestProviders {
    store: Arc<dyn IndexStore>,
    embedder: Mutex<Option<Arc<dyn EmbeddingBackend>>>,
    resolver: Arc<dyn LlmResolver>,
}

impl TestProviders {
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        resolver: Arc<dyn LlmResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            embedder: Mutex::new(embedder),
            resolver,
        })
    }

    pub fn set_embedder(&self, embedder: Option<Arc<dyn EmbeddingBackend>>) {
        *self.embedder.lock().unwrap() = embedder;
    }
}

impl ProviderSource for TestProviders {
    fn embedding_factories(&self, _config: &RecallConfig) -> Vec<Box<dyn EmbeddingFactory>> {
        match self.embedder.lock().unwrap().as_ref() {
            Some(backend) => vec![Box::new(StaticFactory::new(Arc::clone(backend)))],
            None => vec![Box::new(FailingFactory)],
        }
    }

    fn llm_resolver(&self, _config: &RecallConfig) -> Arc<dyn LlmResolver> {
        Arc::clone(&self.resolver)
    }

    fn open_store(&self, _config: &RecallConfig) -> Arc<dyn IndexStore> {
        Arc::clone(&self.store)
    }
}
