// src/config/mod.rs
//! Pipeline configuration loaded from TOML.
//!
//! Lookup order:
//! 1) $PIPELINE_CONFIG_PATH (must exist)
//! 2) config/pipeline.toml
//! 3) built-in defaults
//!
//! Everything is validated before a scheduler or orchestrator is built.

pub mod enricher;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content::ContentKind;
use crate::dedup::FailPolicy;
use crate::pipeline::{PipelineSettings, TaskPriorities};
use crate::scheduler::SchedulerConfig;

pub use enricher::EnricherConfig;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub token_quota: u64,
    pub request_quota: Option<u64>,
    pub safety_margin: f64,
    pub window_secs: u64,
    pub min_spacing_ms: u64,
    pub default_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub call_timeout_secs: u64,
    /// 0 disables priority aging.
    pub aging_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            token_quota: 200_000,
            request_quota: None,
            safety_margin: 0.9,
            window_secs: 60,
            min_spacing_ms: 100,
            default_backoff_ms: 2_000,
            max_backoff_secs: 60,
            call_timeout_secs: 60,
            aging_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub list_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Inclusive `[min, max]` pause between items, in milliseconds.
    pub courtesy_delay_ms: [u64; 2],
    pub duplicate_policy: FailPolicy,
    pub target_language: Option<String>,
    pub priorities: TaskPriorities,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            list_timeout_secs: 30,
            fetch_timeout_secs: 30,
            store_timeout_secs: 15,
            courtesy_delay_ms: [2_000, 5_000],
            duplicate_policy: FailPolicy::FailOpen,
            target_language: None,
            priorities: TaskPriorities::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: ContentKind,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PipelineConfig {
    /// Parse and validate. `"ENV"` API keys are resolved here.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        let mut cfg = PipelineConfig::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&mut self) -> Result<()> {
        self.scheduler_config()
            .validate()
            .map_err(|e| anyhow!("[scheduler] {e}"))?;

        let p = &self.pipeline;
        if p.list_timeout_secs == 0 || p.fetch_timeout_secs == 0 || p.store_timeout_secs == 0 {
            bail!("[pipeline] timeouts must be positive");
        }
        let [lo, hi] = p.courtesy_delay_ms;
        if lo > hi {
            bail!("[pipeline] courtesy_delay_ms must be [min, max] with min <= max");
        }
        if let Some(lang) = &p.target_language {
            if lang.trim().is_empty() {
                bail!("[pipeline] target_language must not be empty when set");
            }
        }

        let mut names = HashSet::new();
        for s in &self.sources {
            if s.name.trim().is_empty() {
                bail!("[[sources]] name must not be empty");
            }
            if s.url.trim().is_empty() {
                bail!("[[sources]] {} has an empty url", s.name);
            }
            if !names.insert(s.name.as_str()) {
                bail!("[[sources]] duplicate source name: {}", s.name);
            }
        }

        self.enricher.resolve().context("[enricher]")?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        SchedulerConfig {
            token_quota: s.token_quota,
            request_quota: s.request_quota,
            safety_margin: s.safety_margin,
            window: Duration::from_secs(s.window_secs),
            min_spacing: Duration::from_millis(s.min_spacing_ms),
            default_backoff: Duration::from_millis(s.default_backoff_ms),
            max_backoff: Duration::from_secs(s.max_backoff_secs),
            call_timeout: Duration::from_secs(s.call_timeout_secs),
            aging: (s.aging_secs > 0).then(|| Duration::from_secs(s.aging_secs)),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let p = &self.pipeline;
        PipelineSettings {
            list_timeout: Duration::from_secs(p.list_timeout_secs),
            fetch_timeout: Duration::from_secs(p.fetch_timeout_secs),
            store_timeout: Duration::from_secs(p.store_timeout_secs),
            courtesy_delay: Duration::from_millis(p.courtesy_delay_ms[0])
                ..=Duration::from_millis(p.courtesy_delay_ms[1]),
            duplicate_policy: p.duplicate_policy,
            target_language: p.target_language.clone(),
            priorities: p.priorities,
        }
    }

    /// Enabled sources, optionally restricted to `only` (by name).
    pub fn selected_sources(&self, only: &[String]) -> Result<Vec<&SourceConfig>> {
        for name in only {
            if !self.sources.iter().any(|s| &s.name == name) {
                bail!("unknown source: {name}");
            }
        }
        Ok(self
            .sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| only.is_empty() || only.contains(&s.name))
            .collect())
    }
}
