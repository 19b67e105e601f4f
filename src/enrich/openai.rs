// src/enrich/openai.rs
//! Chat Completions provider. HTTP 429 rate-limit answers become
//! `EnrichError::QuotaExceeded` so the scheduler can requeue them.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};

use super::{Completion, EnrichError, Enricher, Prompt};
use crate::config::EnricherConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiEnricher {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEnricher {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("feed-ingest/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &EnricherConfig) -> anyhow::Result<Self> {
        Self::new(
            cfg.api_key.clone(),
            cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            cfg.base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct ErrBody {
    error: ErrDetail,
}

#[derive(Deserialize)]
struct ErrDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Longest `Retry-After` taken at face value; the scheduler caps it further.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Map a non-success answer to an error class.
///
/// `insufficient_quota` also arrives as 429 but is a billing state, not
/// throttling, so it is terminal.
pub(crate) fn classify_failure(status: u16, retry_after: Option<&str>, body: &str) -> EnrichError {
    let detail = serde_json::from_str::<ErrBody>(body).ok().map(|b| b.error);
    let code = detail.as_ref().and_then(|d| d.code.clone());
    let message = detail
        .map(|d| d.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    if status == 429 && code.as_deref() != Some("insufficient_quota") {
        let retry_after = retry_after
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .map(|d| d.min(MAX_RETRY_AFTER));
        return EnrichError::QuotaExceeded { retry_after };
    }
    EnrichError::Api { status, message }
}

#[async_trait]
impl Enricher for OpenAiEnricher {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion, EnrichError> {
        if self.api_key.is_empty() {
            return Err(EnrichError::Unavailable("missing API key".into()));
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &prompt.system,
                },
                Msg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnrichError::Timeout
                } else {
                    EnrichError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(
                status.as_u16(),
                retry_after.as_deref(),
                &body,
            ));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| EnrichError::Network(e.to_string()))?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(EnrichError::EmptyCompletion);
        }
        Ok(Completion {
            text,
            tokens_used: body.usage.map(|u| u.total_tokens),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
