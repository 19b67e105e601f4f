// src/config/enricher.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_chars_per_token() -> u32 {
    4
}
fn default_completion_allowance() -> u64 {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u32,
    #[serde(default = "default_completion_allowance")]
    pub completion_allowance: u64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key: default_api_key(),
            chars_per_token: default_chars_per_token(),
            completion_allowance: default_completion_allowance(),
        }
    }
}

impl EnricherConfig {
    /// Normalize the provider name and resolve an `"ENV"` key.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();

        if self.provider == "openai" && self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?;
        }
        if self.provider == "openai" && self.api_key.trim().is_empty() {
            anyhow::bail!("enricher.api_key is empty");
        }
        if self.chars_per_token == 0 {
            anyhow::bail!("enricher.chars_per_token must be positive");
        }
        match self.provider.as_str() {
            "openai" | "mock" => Ok(()),
            other => anyhow::bail!("Unsupported provider in config: {other}"),
        }
    }
}
