//! Enrichment provider abstraction: the language-model collaborator the
//! scheduler throttles, its error taxonomy, and the cost heuristic used for
//! admission.

pub mod openai;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EnricherConfig;

/// Chat-style prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }
}

/// Text completion plus the provider's own usage report, if it sent one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

/// Failure classes a provider call can end in. The scheduler retries only
/// `QuotaExceeded`; everything else is terminal for the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("provider quota exceeded (retry after {retry_after:?})")]
    QuotaExceeded { retry_after: Option<Duration> },

    #[error("provider call timed out")]
    Timeout,

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("enrichment unavailable: {0}")]
    Unavailable(String),
}

impl EnrichError {
    pub fn is_quota(&self) -> bool {
        matches!(self, EnrichError::QuotaExceeded { .. })
    }
}

/// Language-model provider.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion, EnrichError>;
    fn name(&self) -> &'static str;
}

pub type DynEnricher = Arc<dyn Enricher>;

/// Output types the scheduler can reconcile against the window.
pub trait Metered {
    /// Quota units actually consumed, when the provider reported it.
    fn actual_cost(&self) -> Option<u64> {
        None
    }
}

impl Metered for Completion {
    fn actual_cost(&self) -> Option<u64> {
        self.tokens_used
    }
}

impl Metered for String {}
impl Metered for () {}

/// Estimates quota units for a prompt before it is sent.
pub trait CostEstimator: Send + Sync {
    fn estimate(&self, prompt: &Prompt) -> u64;
}

/// `chars / chars_per_token` plus a flat allowance for the completion.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub chars_per_token: u32,
    pub completion_allowance: u64,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            completion_allowance: 256,
        }
    }
}

impl CostEstimator for CharRatioEstimator {
    fn estimate(&self, prompt: &Prompt) -> u64 {
        let per = u64::from(self.chars_per_token.max(1));
        let chars = prompt.char_len() as u64;
        chars.div_ceil(per) + self.completion_allowance
    }
}

/// Offline provider: echoes a fixed answer per prompt kind. Used when
/// `provider = "mock"` and in local runs without an API key.
#[derive(Debug, Clone, Default)]
pub struct MockEnricher;

#[async_trait]
impl Enricher for MockEnricher {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion, EnrichError> {
        let text = match prompts::kind_of(prompt) {
            Some(prompts::TaskKind::Summarize) => {
                "1. Main point of the story\n2. Key figures involved\n3. What happens next".to_string()
            }
            Some(prompts::TaskKind::Categorize) => "3".to_string(),
            Some(prompts::TaskKind::Translate) => prompts::payload_of(prompt).to_string(),
            Some(prompts::TaskKind::Elaborate) | None => "Further context (mock).".to_string(),
        };
        Ok(Completion::text(text))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory: build the provider named in config.
pub fn build_enricher(cfg: &EnricherConfig) -> anyhow::Result<DynEnricher> {
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiEnricher::from_config(cfg)?)),
        "mock" => Ok(Arc::new(MockEnricher)),
        other => anyhow::bail!("unsupported enricher provider: {other}"),
    }
}
