// tests/common/mod.rs
//
// Test doubles shared by the integration tests: a scripted enricher, an
// in-memory source and a store that can be told to fail.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

use feed_ingest::content::{ContentKind, RawItem, Table};
use feed_ingest::enrich::prompts::{self, TaskKind};
use feed_ingest::enrich::{Completion, DynEnricher, EnrichError, Enricher, Prompt};
use feed_ingest::pipeline::{PipelineSettings, SourceOrchestrator};
use feed_ingest::scheduler::{RequestScheduler, SchedulerConfig};
use feed_ingest::source::{ContentSource, DynSource};
use feed_ingest::store::{DynPersistence, MemoryStore, Persistence};

/// Answers by task. Elaboration fails for any point whose text contains one
/// of `fail_points`.
pub struct ScriptedEnricher {
    pub summary: String,
    pub category: String,
    pub fail_points: Vec<String>,
    pub calls: AtomicUsize,
}

impl Default for ScriptedEnricher {
    fn default() -> Self {
        Self {
            summary: "1. First point\n2. Second point\nnoise\n3. Third point".into(),
            category: "2".into(),
            fail_points: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Enricher for ScriptedEnricher {
    async fn complete(&self, prompt: &Prompt) -> Result<Completion, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match prompts::kind_of(prompt) {
            Some(TaskKind::Summarize) => self.summary.clone(),
            Some(TaskKind::Categorize) => self.category.clone(),
            Some(TaskKind::Translate) => format!("[de] {}", prompts::payload_of(prompt)),
            Some(TaskKind::Elaborate) | None => {
                if self.fail_points.iter().any(|p| prompt.user.contains(p.as_str())) {
                    return Err(EnrichError::Api {
                        status: 500,
                        message: "upstream exploded".into(),
                    });
                }
                "Detail.".to_string()
            }
        };
        Ok(Completion {
            text,
            tokens_used: Some(25),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct StaticSource {
    pub name: String,
    pub kind: ContentKind,
    pub keys: Vec<String>,
    /// `None` entries simulate items with missing required fields.
    pub items: HashMap<String, Option<RawItem>>,
    pub fail_listing: bool,
    pub fetches: AtomicUsize,
}

impl StaticSource {
    pub fn with_articles(name: &str, keys: &[&str]) -> Self {
        let items = keys
            .iter()
            .map(|k| (k.to_string(), Some(raw(k))))
            .collect();
        Self {
            name: name.into(),
            kind: ContentKind::Article,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            items,
            fail_listing: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        let mut s = Self::with_articles(name, &[]);
        s.fail_listing = true;
        s
    }
}

pub fn raw(key: &str) -> RawItem {
    RawItem {
        source_key: key.to_string(),
        title: format!("Title of {key}"),
        body: format!("Body text of {key}."),
        media: vec![format!("{key}/image.jpg")],
        published_at: None,
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    async fn list_candidates(&self) -> Result<Vec<String>> {
        if self.fail_listing {
            return Err(anyhow!("listing page returned 503"));
        }
        Ok(self.keys.clone())
    }

    async fn fetch_detail(&self, key: &str) -> Result<Option<RawItem>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.items
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no such item: {key}"))
    }
}

/// MemoryStore with switchable failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_select: AtomicBool,
    pub fail_upsert_for: Vec<String>,
    pub selects: AtomicUsize,
}

#[async_trait]
impl Persistence for FlakyStore {
    async fn upsert(&self, table: Table, rows: Vec<Value>, conflict_key: &str) -> Result<usize> {
        let hit = rows.iter().any(|r| {
            r.get(conflict_key)
                .and_then(Value::as_str)
                .is_some_and(|k| self.fail_upsert_for.iter().any(|f| f == k))
        });
        if hit {
            return Err(anyhow!("write rejected"));
        }
        self.inner.upsert(table, rows, conflict_key).await
    }

    async fn select_existing(
        &self,
        table: Table,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.fail_select.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }
        self.inner.select_existing(table, column, values).await
    }
}

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        courtesy_delay: Duration::ZERO..=Duration::ZERO,
        ..PipelineSettings::default()
    }
}

pub fn roomy_scheduler() -> RequestScheduler {
    RequestScheduler::spawn(SchedulerConfig {
        min_spacing: Duration::ZERO,
        aging: None,
        ..SchedulerConfig::default()
    })
    .expect("valid scheduler config")
}

pub fn orchestrator(
    source: Arc<StaticSource>,
    enricher: Arc<ScriptedEnricher>,
    store: Arc<FlakyStore>,
    scheduler: RequestScheduler,
) -> SourceOrchestrator {
    let source: DynSource = source;
    let enricher: DynEnricher = enricher;
    let store: DynPersistence = store;
    SourceOrchestrator::new(source, scheduler, enricher, store, fast_settings())
}
