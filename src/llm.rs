//! # LLM providers
//!
//! Two interchangeable text generators sit behind [`CompletionClient`]:
//!
//! - **hosted**: Gemini through its OpenAI-compatible endpoint, credential
//!   checked with `GET {api_base}/models`;
//! - **self_hosted**: an Ollama server, reachability checked with
//!   `GET {base_url}/api/tags`, completions served from `{base_url}/v1`.
//!
//! Both are driven by the same [`ChatCompletionClient`], which sends the
//! prompt as a single user message with `async-openai`.
//!
//! [`LlmFactory::resolve`] never panics and never returns a raw transport
//! error: a provider that cannot be used comes back as an [`Unavailable`]
//! with a [`Diagnosis`] the orchestrator turns into the answer text.
//!
//! ```no_run
//! use journal_recall::config::LlmConfig;
//! use journal_recall::llm::{LlmFactory, LlmProvider, LlmResolver};
//!
//! # async fn demo() {
//! let factory = LlmFactory::new(LlmConfig::default());
//! match factory.resolve(LlmProvider::SelfHosted, Some("qwen2.5:7b")).await {
//!     Ok(client) => println!("using {}", client.model()),
//!     Err(unavailable) => eprintln!("{}", unavailable.user_message()),
//! }
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::*;

use crate::config::LlmConfig;
use crate::error::RecallError;

/// Request timeout for the hosted backend.
pub const HOSTED_TIMEOUT_SECS: u64 = 60;
/// Timeout for the availability checks (`/models`, `/api/tags`).
pub const CHECK_TIMEOUT_SECS: u64 = 10;

/// API keys that ship in sample configs and never work.
pub const PLACEHOLDER_KEYS: &[&str] = &[
    "your_gemini_key",
    "your-gemini-key",
    "your_api_key",
    "your-api-key",
    "CHANGEME",
    "changeme",
];

/// Where answers are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Gemini (OpenAI-compatible endpoint).
    #[default]
    #[serde(alias = "gemini")]
    Hosted,
    /// Ollama.
    #[serde(alias = "ollama")]
    SelfHosted,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Hosted => "hosted",
            LlmProvider::SelfHosted => "self_hosted",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hosted" | "gemini" => Ok(LlmProvider::Hosted),
            "self_hosted" | "self-hosted" | "ollama" => Ok(LlmProvider::SelfHosted),
            other => Err(RecallError::Config(format!(
                "unknown LLM provider '{other}' (expected hosted or self_hosted)"
            ))),
        }
    }
}

/// Turns a prompt into an answer.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, RecallError>;

    fn model(&self) -> &str;

    fn provider(&self) -> LlmProvider;
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionClient {
    client: Client<OpenAIConfig>,
    provider: LlmProvider,
    model: String,
    timeout: Duration,
}

impl ChatCompletionClient {
    pub fn new(
        provider: LlmProvider,
        api_base: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.to_string())
            .with_api_base(api_base.trim_end_matches('/').to_string());
        debug!("Chat client for {} at {}", provider, api_base);
        Self {
            client: Client::with_config(openai_config),
            provider,
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, RecallError> {
        let message = ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            name: None,
        });
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![message])
            .build()
            .map_err(|e| RecallError::Generation(e.to_string()))?;

        debug!("Sending {} prompt chars to {}", prompt.len(), self.model);

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                RecallError::Generation(format!(
                    "{} did not answer within {}s",
                    self.model,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| RecallError::Generation(e.to_string()))?;

        let mut answer = String::new();
        for choice in &response.choices {
            if let Some(text) = &choice.message.content {
                answer.push_str(text);
            }
        }

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RecallError::Generation(format!(
                "{} returned an empty answer",
                self.model
            )));
        }
        Ok(answer.to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> LlmProvider {
        self.provider
    }
}

/// Why a provider cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    MissingKey,
    PlaceholderKey,
    SuspendedKey { detail: String },
    RejectedKey { status: u16, detail: String },
    Unreachable { url: String, cause: String },
}

/// A provider that failed its availability check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.user_message())]
pub struct Unavailable {
    pub provider: LlmProvider,
    pub diagnosis: Diagnosis,
    /// The self-hosted model the query asked for, if any.
    pub model: Option<String>,
}

impl Unavailable {
    fn new(provider: LlmProvider, diagnosis: Diagnosis) -> Self {
        Self {
            provider,
            diagnosis,
            model: None,
        }
    }

    /// Multi-line explanation shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        let mut details: Vec<String> = match &self.diagnosis {
            Diagnosis::MissingKey => vec![
                "The hosted API key is not set (llm.hosted.api_key or RECALL_HOSTED_API_KEY)"
                    .to_string(),
            ],
            Diagnosis::PlaceholderKey => {
                vec!["The hosted API key appears to be a placeholder".to_string()]
            }
            Diagnosis::SuspendedKey { detail } => vec![
                "Your hosted API key may have been suspended.".to_string(),
                "Get a new API key from: https://aistudio.google.com/apikey".to_string(),
                "Then update the key in the configuration and restart".to_string(),
                format!("Provider said: {detail}"),
            ],
            Diagnosis::RejectedKey { status, detail } => vec![format!(
                "The hosted API rejected the credential check (HTTP {status}): {detail}"
            )],
            Diagnosis::Unreachable { url, cause } => vec![
                format!("Could not reach {url}: {cause}"),
                format!("Verify the server is running at: {url}"),
            ],
        };
        if let Some(model) = &self.model {
            details.push(format!("Selected model: {model}"));
        }

        let bullets: Vec<String> = details.iter().map(|d| format!("• {d}")).collect();
        format!(
            "LLM provider '{}' is not available.\n\n{}\n\nPlease fix the configuration or select a different model in the query.",
            self.provider,
            bullets.join("\n")
        )
    }
}

/// Hands out a ready completion client for a provider.
#[async_trait]
pub trait LlmResolver: Send + Sync {
    async fn resolve(
        &self,
        provider: LlmProvider,
        model_override: Option<&str>,
    ) -> Result<Arc<dyn CompletionClient>, Unavailable>;

    /// [`resolve`](Self::resolve) without the diagnosis.
    async fn get_client(
        &self,
        provider: LlmProvider,
        model_override: Option<&str>,
    ) -> Option<Arc<dyn CompletionClient>> {
        self.resolve(provider, model_override).await.ok()
    }
}

/// Builds clients from [`LlmConfig`], checking each provider before use.
pub struct LlmFactory {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmFactory {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHECK_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    async fn resolve_hosted(&self) -> Result<Arc<dyn CompletionClient>, Unavailable> {
        let hosted = &self.config.hosted;
        let unavailable = |d| Unavailable::new(LlmProvider::Hosted, d);

        let key = hosted
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| unavailable(Diagnosis::MissingKey))?;
        if PLACEHOLDER_KEYS.contains(&key) {
            return Err(unavailable(Diagnosis::PlaceholderKey));
        }

        if self.config.verify_credentials {
            self.verify_hosted_key(&hosted.api_base, key)
                .await
                .map_err(unavailable)?;
        }

        info!("Using hosted model {}", hosted.model);
        Ok(Arc::new(ChatCompletionClient::new(
            LlmProvider::Hosted,
            &hosted.api_base,
            key,
            &hosted.model,
            Duration::from_secs(HOSTED_TIMEOUT_SECS),
        )))
    }

    async fn verify_hosted_key(&self, api_base: &str, key: &str) -> Result<(), Diagnosis> {
        let url = format!("{}/models", api_base.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| Diagnosis::Unreachable {
                url: url.clone(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let lowered = body.to_lowercase();
        let detail = body.trim().chars().take(200).collect::<String>();

        if status.as_u16() == 401
            || status.as_u16() == 403
            || lowered.contains("suspended")
            || lowered.contains("permission denied")
        {
            Err(Diagnosis::SuspendedKey { detail })
        } else if status.is_client_error() {
            Err(Diagnosis::RejectedKey {
                status: status.as_u16(),
                detail,
            })
        } else {
            Err(Diagnosis::Unreachable {
                url,
                cause: format!("HTTP {status}"),
            })
        }
    }

    async fn resolve_self_hosted(
        &self,
        model_override: Option<&str>,
    ) -> Result<Arc<dyn CompletionClient>, Unavailable> {
        let self_hosted = &self.config.self_hosted;
        let base = self_hosted.base_url.trim_end_matches('/');
        let model = model_override.unwrap_or(&self_hosted.model);

        let url = format!("{base}/api/tags");
        let reachable = match self.http.get(&url).send().await {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => Err(format!("HTTP {}", r.status())),
            Err(e) => Err(e.to_string()),
        };
        if let Err(cause) = reachable {
            return Err(Unavailable {
                provider: LlmProvider::SelfHosted,
                diagnosis: Diagnosis::Unreachable {
                    url: base.to_string(),
                    cause,
                },
                model: model_override.map(str::to_string),
            });
        }

        info!("Using self-hosted model {} at {}", model, base);
        Ok(Arc::new(ChatCompletionClient::new(
            LlmProvider::SelfHosted,
            &format!("{base}/v1"),
            "ollama",
            model,
            Duration::from_secs(self_hosted.effective_timeout_secs()),
        )))
    }
}

#[async_trait]
impl LlmResolver for LlmFactory {
    async fn resolve(
        &self,
        provider: LlmProvider,
        model_override: Option<&str>,
    ) -> Result<Arc<dyn CompletionClient>, Unavailable> {
        let model_override = model_override.map(str::trim).filter(|m| !m.is_empty());
        let resolved = match provider {
            LlmProvider::Hosted => {
                if let Some(m) = model_override {
                    debug!("Ignoring model override '{}' for hosted provider", m);
                }
                self.resolve_hosted().await
            }
            LlmProvider::SelfHosted => self.resolve_self_hosted(model_override).await,
        };
        if let Err(unavailable) = &resolved {
            error!("{}", unavailable.user_message());
        }
        resolved
    }
}
