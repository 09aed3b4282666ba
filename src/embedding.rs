//! # Embedding backends
//!
//! Everything that turns text into vectors sits behind [`EmbeddingBackend`].
//! Three implementations are tried in order at configure time:
//!
//! 1. [`RemoteEmbedding`]: an explicit HTTP endpoint (`embedding.api_url`)
//!    speaking `{"texts": [...], "max_length": N}` → `{"embeddings": [[...]]}`.
//! 2. [`LocalServerEmbedding`]: the self-hosted model server's `/api/embed`.
//! 3. [`OfflineEmbedding`]: an in-process BERT sentence model run with Candle,
//!    weights pulled once through the Hugging Face cache.
//!
//! Selection is data, not control flow: [`default_factories`] returns an
//! ordered list of [`EmbeddingFactory`] values and [`select_embedding`] keeps
//! the first one that connects. If none does, the caller runs with
//! embeddings disabled.
//!
//! ## Truncation
//! Inputs are never rejected for length. The remote server is told
//! `max_length`; the local server gets text cut client-side with the
//! `cl100k_base` BPE; the offline model truncates in its tokenizer.
//!
//! ## Example
//! ```no_run
//! use journal_recall::config::RecallConfig;
//! use journal_recall::embedding::{default_factories, select_embedding};
//!
//! # async fn demo() {
//! let config = RecallConfig::default();
//! match select_embedding(&default_factories(), &config).await {
//!     Some(backend) => println!("{} ({} dims)", backend.name(), backend.dimension()),
//!     None => println!("embeddings disabled"),
//! }
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::{Deserialize, Serialize};
use tiktoken_rs::{CoreBPE, cl100k_base};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::*;

use crate::config::RecallConfig;
use crate::error::RecallError;

/// Text used to confirm a backend works and learn its output dimension.
pub const SAMPLE_TEXT: &str = "dimension check";

/// Anything that can embed a batch of texts into fixed-size vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this backend produces.
    fn dimension(&self) -> usize;

    /// Embed `texts` in order. `texts` must not be empty.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RecallError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RecallError::Embedding(format!("{} returned no vectors", self.name())))
    }
}

// ============ Remote endpoint ============

#[derive(Serialize)]
struct RemoteRequest<'a> {
    texts: &'a [String],
    max_length: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embeddings: Option<Vec<Vec<f32>>>,
}

/// Remote HTTP embedding endpoint.
///
/// [`embed`](EmbeddingBackend::embed) and [`embed_blocking`](RemoteEmbedding::embed_blocking)
/// serialize the request with the same function and parse the reply with the
/// same function, so both paths put identical bytes on the wire.
pub struct RemoteEmbedding {
    endpoint: String,
    max_length: usize,
    timeout: Duration,
    client: reqwest::Client,
    dimension: usize,
}

impl RemoteEmbedding {
    /// Build a client for `endpoint`. The dimension is unknown until [`connect`](Self::connect).
    pub fn new(endpoint: &str, max_length: usize, timeout_secs: u64) -> Result<Self, RecallError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_length,
            timeout,
            client,
            dimension: 0,
        })
    }

    /// Embed a sample once and record the dimension the endpoint produces.
    pub async fn connect(mut self) -> Result<Self, RecallError> {
        let sample = self.embed_one(SAMPLE_TEXT).await?;
        self.dimension = sample.len();
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The exact request body sent for `texts`.
    pub fn request_body(&self, texts: &[String]) -> Result<Vec<u8>, RecallError> {
        Ok(serde_json::to_vec(&RemoteRequest {
            texts,
            max_length: self.max_length,
        })?)
    }

    /// Blocking variant of [`embed`](EmbeddingBackend::embed).
    ///
    /// Must not be called from inside an async runtime thread.
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        if texts.is_empty() {
            return Err(RecallError::EmptyInput);
        }
        let body = self.request_body(texts)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(remote_err)?;
        let response = client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(remote_err)?;
        let bytes = response.bytes().map_err(remote_err)?;
        parse_embeddings(&bytes, texts.len())
    }
}

fn remote_err(e: reqwest::Error) -> RecallError {
    RecallError::RemoteEmbedding(e.to_string())
}

/// Parse an `{"embeddings": [[...]]}` reply, checking one vector per input.
fn parse_embeddings(bytes: &[u8], expected: usize) -> Result<Vec<Vec<f32>>, RecallError> {
    let parsed: EmbeddingsResponse = serde_json::from_slice(bytes)
        .map_err(|e| RecallError::RemoteEmbedding(format!("invalid response body: {e}")))?;
    let embeddings = parsed.embeddings.ok_or_else(|| {
        RecallError::RemoteEmbedding("endpoint did not return 'embeddings'".to_string())
    })?;
    if embeddings.len() != expected {
        return Err(RecallError::RemoteEmbedding(format!(
            "expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbedding {
    fn name(&self) -> &str {
        "remote"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        if texts.is_empty() {
            return Err(RecallError::EmptyInput);
        }
        let body = self.request_body(texts)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(remote_err)?;
        let bytes = response.bytes().await.map_err(remote_err)?;
        parse_embeddings(&bytes, texts.len())
    }
}

// ============ Self-hosted model server ============

#[derive(Serialize)]
struct LocalServerRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

/// Embeddings from the self-hosted model server (`POST {base_url}/api/embed`).
pub struct LocalServerEmbedding {
    url: String,
    model: String,
    max_tokens: usize,
    bpe: Option<Arc<CoreBPE>>,
    client: reqwest::Client,
    dimension: usize,
}

impl LocalServerEmbedding {
    pub fn new(
        base_url: &str,
        model: &str,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Result<Self, RecallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let bpe = match cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                warn!("cl100k_base unavailable, truncating by characters: {}", e);
                None
            }
        };
        Ok(Self {
            url: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens,
            bpe,
            client,
            dimension: 0,
        })
    }

    pub async fn connect(mut self) -> Result<Self, RecallError> {
        let sample = self.embed_one(SAMPLE_TEXT).await?;
        self.dimension = sample.len();
        Ok(self)
    }

    /// Cut `text` to at most `max_tokens` BPE tokens.
    pub fn truncate(&self, text: &str) -> String {
        let Some(bpe) = &self.bpe else {
            // Roughly four characters per token.
            return text.chars().take(self.max_tokens * 4).collect();
        };
        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= self.max_tokens {
            return text.to_string();
        }
        match bpe.decode(tokens[..self.max_tokens].to_vec()) {
            Ok(cut) => cut,
            Err(_) => text.chars().take(self.max_tokens * 4).collect(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for LocalServerEmbedding {
    fn name(&self) -> &str {
        "local_server"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        if texts.is_empty() {
            return Err(RecallError::EmptyInput);
        }
        let body = LocalServerRequest {
            model: &self.model,
            input: texts.iter().map(|t| self.truncate(t)).collect(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RecallError::Embedding(format!("local server: {e}")))?;
        let parsed: EmbeddingsResponse = response.json().await?;
        let embeddings = parsed.embeddings.ok_or_else(|| {
            RecallError::Embedding("local server did not return 'embeddings'".to_string())
        })?;
        if embeddings.len() != texts.len() {
            return Err(RecallError::Embedding(format!(
                "local server returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}

// ============ Offline (Candle) ============

fn model_err(e: impl std::fmt::Display) -> RecallError {
    RecallError::Embedding(e.to_string())
}

/// BERT sentence-embedding model run in-process on the CPU.
pub struct SentenceModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceModel {
    /// Resolve `model_id` through the Hugging Face cache and load it.
    pub fn load(model_id: &str, max_length: usize) -> Result<Self, RecallError> {
        let device = Device::Cpu;
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(model_err)?;
        let api_repo = api.repo(repo);

        let fetch = |file: &str| -> Result<PathBuf, RecallError> {
            api_repo
                .get(file)
                .map_err(|e| RecallError::Embedding(format!("{model_id}/{file}: {e}")))
        };
        let config_filename = fetch("config.json")?;
        let tokenizer_filename = fetch("tokenizer.json")?;
        let weights_filename = fetch("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(model_err)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(model_err)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(model_err)?
        };
        let model = BertModel::load(vb, &config).map_err(model_err)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean-pooled, L2-normalized sentence embedding.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, RecallError> {
        let tokens = self.tokenizer.encode(text, true).map_err(model_err)?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(model_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(model_err)?;

        self.pool(&output, tokens.get_attention_mask())
            .map_err(model_err)
    }

    fn pool(&self, output: &Tensor, attention_mask: &[u32]) -> candle_core::Result<Vec<f32>> {
        // output: [1, seq_len, hidden]; mask broadcast as [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;
        let sum = output.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let mean = sum.broadcast_div(&count)?.squeeze(0)?;
        let norm = mean.sqr()?.sum_all()?.sqrt()?;
        mean.broadcast_div(&norm)?.to_vec1::<f32>()
    }
}

/// [`SentenceModel`] behind the backend trait. Inference runs on the blocking pool.
pub struct OfflineEmbedding {
    model: Arc<SentenceModel>,
    dimension: usize,
}

impl OfflineEmbedding {
    /// Load the model off the async threads and measure its dimension.
    pub async fn load(model_id: &str, max_length: usize) -> Result<Self, RecallError> {
        let id = model_id.to_string();
        let model = tokio::task::spawn_blocking(move || {
            let model = SentenceModel::load(&id, max_length)?;
            let sample = model.encode(SAMPLE_TEXT)?;
            Ok::<_, RecallError>((model, sample.len()))
        })
        .await
        .map_err(model_err)??;
        Ok(Self {
            model: Arc::new(model.0),
            dimension: model.1,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OfflineEmbedding {
    fn name(&self) -> &str {
        "offline"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RecallError> {
        if texts.is_empty() {
            return Err(RecallError::EmptyInput);
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| model.encode(t))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(model_err)?
    }
}

// ============ Selection ============

/// One candidate embedding backend.
#[async_trait]
pub trait EmbeddingFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the backend and confirm it answers. Fails when unconfigured,
    /// disabled or unreachable.
    async fn connect(
        &self,
        config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError>;
}

pub struct RemoteFactory;

#[async_trait]
impl EmbeddingFactory for RemoteFactory {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn connect(
        &self,
        config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError> {
        let embedding = &config.embedding;
        let url = embedding
            .api_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| RecallError::Config("embedding.api_url is not set".to_string()))?;
        let backend = RemoteEmbedding::new(url, embedding.max_length, embedding.timeout_secs)?
            .connect()
            .await?;
        Ok(Arc::new(backend))
    }
}

pub struct LocalServerFactory;

#[async_trait]
impl EmbeddingFactory for LocalServerFactory {
    fn name(&self) -> &'static str {
        "local_server"
    }

    async fn connect(
        &self,
        config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError> {
        let embedding = &config.embedding;
        if !embedding.enable_local_server {
            return Err(RecallError::Config("local server embeddings disabled".to_string()));
        }
        let backend = LocalServerEmbedding::new(
            &config.llm.self_hosted.base_url,
            &embedding.local_model,
            embedding.max_length,
            embedding.timeout_secs,
        )?
        .connect()
        .await?;
        Ok(Arc::new(backend))
    }
}

pub struct OfflineFactory;

#[async_trait]
impl EmbeddingFactory for OfflineFactory {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn connect(
        &self,
        config: &RecallConfig,
    ) -> Result<Arc<dyn EmbeddingBackend>, RecallError> {
        let embedding = &config.embedding;
        if !embedding.enable_offline {
            return Err(RecallError::Config("offline embeddings disabled".to_string()));
        }
        let backend = OfflineEmbedding::load(&embedding.offline_model, embedding.max_length).await?;
        Ok(Arc::new(backend))
    }
}

/// Remote, then local server, then offline.
pub fn default_factories() -> Vec<Box<dyn EmbeddingFactory>> {
    vec![
        Box::new(RemoteFactory),
        Box::new(LocalServerFactory),
        Box::new(OfflineFactory),
    ]
}

/// First backend that connects, or `None` (embeddings disabled).
pub async fn select_embedding(
    factories: &[Box<dyn EmbeddingFactory>],
    config: &RecallConfig,
) -> Option<Arc<dyn EmbeddingBackend>> {
    for factory in factories {
        match factory.connect(config).await {
            Ok(backend) if backend.dimension() > 0 => {
                info!(
                    "Embedding backend '{}' ready ({} dims)",
                    backend.name(),
                    backend.dimension()
                );
                return Some(backend);
            }
            Ok(backend) => {
                warn!("Embedding backend '{}' produced empty vectors", backend.name());
            }
            Err(e) => {
                info!("Embedding backend '{}' unavailable: {}", factory.name(), e);
            }
        }
    }
    warn!(
        "No embedding backend available; running with embeddings disabled. \
         Documents are stored without vectors and similarity search returns nothing."
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingFactory, HashEmbedding, StaticFactory};
    use httpmock::prelude::*;
    use serde_json::json;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn remote_embeds_batch_and_reports_dimension() {
        let server = MockServer::start_async().await;
        let sample = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embed")
                    .json_body(json!({"texts": [SAMPLE_TEXT], "max_length": 512}));
                then.status(200)
                    .json_body(json!({"embeddings": [[0.1, 0.2, 0.3]]}));
            })
            .await;
        let batch = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embed")
                    .json_body(json!({"texts": ["a", "b"], "max_length": 512}));
                then.status(200)
                    .json_body(json!({"embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]}));
            })
            .await;

        let backend = RemoteEmbedding::new(&server.url("/embed/"), 512, 5)
            .unwrap()
            .connect()
            .await
            .unwrap();
        assert_eq!(backend.dimension(), 3);
        assert_eq!(backend.endpoint(), server.url("/embed"));

        let vectors = backend.embed(&texts(&["a", "b"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
        sample.assert_async().await;
        batch.assert_async().await;
    }

    #[tokio::test]
    async fn remote_missing_embeddings_key_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(200).json_body(json!({"vectors": [[0.1]]}));
            })
            .await;

        let backend = RemoteEmbedding::new(&server.url("/embed"), 512, 5).unwrap();
        let err = backend.embed(&texts(&["x"])).await.unwrap_err();
        assert!(matches!(err, RecallError::RemoteEmbedding(_)));
        assert!(err.to_string().contains("embeddings"));
    }

    #[tokio::test]
    async fn remote_http_error_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embed");
                then.status(503);
            })
            .await;

        let backend = RemoteEmbedding::new(&server.url("/embed"), 512, 5).unwrap();
        assert!(matches!(
            backend.embed(&texts(&["x"])).await,
            Err(RecallError::RemoteEmbedding(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let backend = RemoteEmbedding::new("http://127.0.0.1:9", 512, 1).unwrap();
        assert!(matches!(backend.embed(&[]).await, Err(RecallError::EmptyInput)));
    }

    #[test]
    fn blocking_and_async_send_identical_bodies() {
        let server = MockServer::start();
        let body = r#"{"texts":["same text"],"max_length":128}"#;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/embed")
                .header("content-type", "application/json")
                .body(body);
            then.status(200).json_body(json!({"embeddings": [[0.5, 0.5]]}));
        });

        let backend = RemoteEmbedding::new(&server.url("/embed"), 128, 5).unwrap();
        let input = texts(&["same text"]);
        assert_eq!(backend.request_body(&input).unwrap(), body.as_bytes());

        let blocking = backend.embed_blocking(&input).unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let asynchronous = runtime.block_on(backend.embed(&input)).unwrap();

        assert_eq!(blocking, asynchronous);
        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn local_server_posts_model_and_input() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({"model": "nomic-embed-text", "input": ["hello"]}));
                then.status(200).json_body(json!({"embeddings": [[0.1, 0.9]]}));
            })
            .await;

        let backend = LocalServerEmbedding::new(&server.base_url(), "nomic-embed-text", 512, 5)
            .unwrap();
        let vectors = backend.embed(&texts(&["hello"])).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.9]]);
        mock.assert_async().await;
    }

    #[test]
    fn local_server_truncates_long_input() {
        let backend = LocalServerEmbedding::new("http://localhost:11434", "m", 8, 5).unwrap();
        let long = "word ".repeat(200);
        let cut = backend.truncate(&long);
        assert!(cut.len() < long.len());
        assert_eq!(backend.truncate("short"), "short");
    }

    #[tokio::test]
    async fn remote_factory_requires_url() {
        let config = RecallConfig::default();
        let err = RemoteFactory.connect(&config).await.err().unwrap();
        assert!(matches!(err, RecallError::Config(_)));
    }

    #[tokio::test]
    async fn selection_takes_first_working_factory() {
        let factories: Vec<Box<dyn EmbeddingFactory>> = vec![
            Box::new(FailingFactory),
            Box::new(StaticFactory::new(Arc::new(HashEmbedding::default()))),
        ];
        let backend = select_embedding(&factories, &RecallConfig::default())
            .await
            .unwrap();
        assert_eq!(backend.name(), "hash");
    }

    #[tokio::test]
    async fn selection_degrades_to_none() {
        let factories: Vec<Box<dyn EmbeddingFactory>> =
            vec![Box::new(FailingFactory), Box::new(FailingFactory)];
        assert!(select_embedding(&factories, &RecallConfig::default()).await.is_none());
    }
}
