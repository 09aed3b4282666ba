//! Loading and handling of the application's configuration.
//!
//! [`RecallConfig`] holds everything the runtime needs to pick its LLM
//! provider, its embedding backend and its index location. Every field has a
//! default, so an empty YAML file (or no file at all) is a valid
//! configuration.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use journal_recall::config::{RecallConfig, load_config};
//!
//! let config: RecallConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.llm.provider);
//! ```
//!
//! A minimal file selecting the self-hosted backend:
//!
//! ```yaml
//! llm:
//!   provider: self_hosted
//!   self_hosted:
//!     base_url: "http://localhost:11434"
//!     model: "llama3.1:8b"
//! index:
//!   path: "/var/lib/recall/index.db"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use tracing::*;

use crate::llm::LlmProvider;

/// Multilingual BERT sentence model (384 dims) used when no server is reachable.
pub const DEFAULT_OFFLINE_MODEL: &str =
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

/// File name of the SQLite index placed next to the config file.
pub const INDEX_FILE_NAME: &str = "index.db";

/// Minimum request timeout for the self-hosted LLM backend; local models are slow.
pub const MIN_SELF_HOSTED_TIMEOUT_SECS: u64 = 120;

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(default)]
pub struct RecallConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
}

/// LLM provider selection and per-provider settings.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when a query does not name one.
    pub provider: LlmProvider,
    /// Check the configured key against the hosted API before using it.
    pub verify_credentials: bool,
    pub hosted: HostedConfig,
    pub self_hosted: SelfHostedConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Hosted,
            verify_credentials: true,
            hosted: HostedConfig::default(),
            self_hosted: SelfHostedConfig::default(),
        }
    }
}

/// Hosted (Gemini, OpenAI-compatible endpoint) settings.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct HostedConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.5-flash".to_string(),
        }
    }
}

/// Self-hosted (Ollama) settings.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct SelfHostedConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for SelfHostedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_secs: MIN_SELF_HOSTED_TIMEOUT_SECS,
        }
    }
}

impl SelfHostedConfig {
    /// The configured timeout, never below [`MIN_SELF_HOSTED_TIMEOUT_SECS`].
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.max(MIN_SELF_HOSTED_TIMEOUT_SECS)
    }
}

/// Embedding backend settings. Backends are tried remote, local server, offline.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Remote embedding endpoint; the remote backend is only tried when set.
    pub api_url: Option<String>,
    pub max_length: usize,
    pub timeout_secs: u64,
    /// Embedding model served by the self-hosted server.
    pub local_model: String,
    pub enable_local_server: bool,
    /// Hugging Face repo id of the in-process model.
    pub offline_model: String,
    pub enable_offline: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            max_length: 512,
            timeout_secs: 30,
            local_model: "nomic-embed-text".to_string(),
            enable_local_server: true,
            offline_model: DEFAULT_OFFLINE_MODEL.to_string(),
            enable_offline: true,
        }
    }
}

/// Where the vector index lives. No path means in-memory.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub path: Option<PathBuf>,
}

impl IndexConfig {
    /// Point an unset index at `<dir>/index.db`. An explicit path is kept.
    pub fn default_path_in(&mut self, dir: &Path) {
        if self.path.is_none() {
            self.path = Some(dir.join(INDEX_FILE_NAME));
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Journal entries retrieved when a query does not say.
    pub default_top_k: usize,
    /// Maintain the keyword graph next to the vector index.
    pub graph: bool,
    /// How many chat documents are recalled as recent memory.
    pub memory_limit: usize,
    /// Prompt template name under `<config_dir>/templates`; built-in when unset.
    pub template: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            graph: true,
            memory_limit: 5,
            template: None,
        }
    }
}

impl RecallConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    ///
    /// Recognised keys, first match wins within each line:
    /// `RECALL_LLM_PROVIDER`; `RECALL_HOSTED_API_KEY`, `GEMINI_API_KEY`;
    /// `RECALL_SELF_HOSTED_URL`, `OLLAMA_BASE_URL`;
    /// `RECALL_EMBEDDING_API_URL`, `EMBEDDING_API_URL`; `RECALL_INDEX_PATH`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };

        if let Some(provider) = first(&["RECALL_LLM_PROVIDER"]) {
            match provider.parse::<LlmProvider>() {
                Ok(p) => self.llm.provider = p,
                Err(e) => warn!("Ignoring RECALL_LLM_PROVIDER: {}", e),
            }
        }
        if let Some(key) = first(&["RECALL_HOSTED_API_KEY", "GEMINI_API_KEY"]) {
            self.llm.hosted.api_key = Some(key);
        }
        if let Some(url) = first(&["RECALL_SELF_HOSTED_URL", "OLLAMA_BASE_URL"]) {
            self.llm.self_hosted.base_url = url;
        }
        if let Some(url) = first(&["RECALL_EMBEDDING_API_URL", "EMBEDDING_API_URL"]) {
            self.embedding.api_url = Some(url);
        }
        if let Some(path) = first(&["RECALL_INDEX_PATH"]) {
            self.index.path = Some(PathBuf::from(path));
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(RecallConfig)`: The loaded configuration.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
pub fn load_config(file: &str) -> Result<RecallConfig, Box<dyn Error>> {
    info!("Loading config: {}", file);
    let content = fs::read_to_string(file)?;
    if content.trim().is_empty() {
        return Ok(RecallConfig::default());
    }
    let config: RecallConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}
