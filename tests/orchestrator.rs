// tests/orchestrator.rs
//
// End-to-end source runs against in-memory doubles: listing, duplicate
// filtering, enrichment with degraded fallbacks, persistence.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use common::{fast_settings, orchestrator, roomy_scheduler, FlakyStore, ScriptedEnricher, StaticSource};
use feed_ingest::content::Table;
use feed_ingest::dedup::FailPolicy;
use feed_ingest::pipeline::{PipelineSettings, SourceOrchestrator, Stage, DETAIL_GENERATION_FAILED};

fn row(store: &FlakyStore, key: &str) -> Value {
    store
        .inner
        .get(Table::Articles, key)
        .unwrap_or_else(|| panic!("row {key} missing"))
}

fn strings(v: &Value) -> Vec<String> {
    v.as_array()
        .expect("array")
        .iter()
        .map(|s| s.as_str().expect("string").to_string())
        .collect()
}

fn with_settings(
    source: Arc<StaticSource>,
    enricher: Arc<ScriptedEnricher>,
    store: Arc<FlakyStore>,
    settings: PipelineSettings,
) -> SourceOrchestrator {
    SourceOrchestrator::new(source, roomy_scheduler(), enricher, store, settings)
}

#[tokio::test]
async fn happy_path_persists_enriched_rows() {
    let source = Arc::new(StaticSource::with_articles("wire", &["u1", "u2"]));
    let enricher = Arc::new(ScriptedEnricher::default());
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(source, enricher, store.clone(), roomy_scheduler());

    let res = orch.run(&CancellationToken::new()).await;

    assert!(res.success, "errors: {:?}", res.errors);
    assert_eq!(res.source_name, "wire");
    assert_eq!(res.items_ingested, 2);
    assert_eq!(res.candidates, 2);
    assert_eq!(res.final_stage, Stage::Done);
    assert!(res.errors.is_empty());

    let r = row(&store, "u1");
    assert_eq!(r["title"], "Title of u1");
    assert_eq!(r["category"], 2);
    assert_eq!(
        strings(&r["summary"]),
        ["1. First point", "2. Second point", "3. Third point"]
    );
    assert_eq!(strings(&r["details"]), ["Detail.", "Detail.", "Detail."]);
    assert_eq!(strings(&r["images"]), ["u1/image.jpg"]);
}

#[tokio::test]
async fn failed_elaboration_gets_placeholder_and_item_is_kept() {
    let source = Arc::new(StaticSource::with_articles("wire", &["u1"]));
    let enricher = Arc::new(ScriptedEnricher {
        fail_points: vec!["2. Second point".into()],
        ..ScriptedEnricher::default()
    });
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(source, enricher, store.clone(), roomy_scheduler());

    let res = orch.run(&CancellationToken::new()).await;

    assert!(res.success);
    assert_eq!(res.items_ingested, 1);
    let r = row(&store, "u1");
    let summary = strings(&r["summary"]);
    let details = strings(&r["details"]);
    assert_eq!(summary.len(), details.len());
    assert_eq!(details, ["Detail.", DETAIL_GENERATION_FAILED, "Detail."]);
    assert_eq!(res.errors.len(), 1);
    assert!(res.errors[0].contains("elaborate failed"), "{:?}", res.errors);
}

#[tokio::test]
async fn item_with_missing_fields_is_skipped() {
    let mut source = StaticSource::with_articles("wire", &["u1", "u2", "u3"]);
    source.items.insert("u2".into(), None);
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(
        Arc::new(source),
        Arc::new(ScriptedEnricher::default()),
        store.clone(),
        roomy_scheduler(),
    );

    let res = orch.run(&CancellationToken::new()).await;

    assert_eq!(res.items_ingested, 2);
    assert_eq!(res.skipped, 1);
    assert!(res.errors.iter().any(|e| e.starts_with("u2:")));
    assert!(store.inner.get(Table::Articles, "u2").is_none());
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let source = Arc::new(StaticSource::failing("broken"));
    let enricher = Arc::new(ScriptedEnricher::default());
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(source.clone(), enricher.clone(), store.clone(), roomy_scheduler());

    let res = orch.run(&CancellationToken::new()).await;

    assert!(!res.success);
    assert_eq!(res.items_ingested, 0);
    assert_eq!(res.final_stage, Stage::Aborted);
    assert!(res.errors[0].contains("listing failed"), "{:?}", res.errors);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(store.selects.load(Ordering::SeqCst), 0);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_run_finds_only_duplicates() {
    let source = Arc::new(StaticSource::with_articles("wire", &["u1", "u2"]));
    let enricher = Arc::new(ScriptedEnricher::default());
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(source.clone(), enricher.clone(), store.clone(), roomy_scheduler());

    let first = orch.run(&CancellationToken::new()).await;
    assert_eq!(first.items_ingested, 2);
    let calls_after_first = enricher.calls.load(Ordering::SeqCst);

    let second = orch.run(&CancellationToken::new()).await;
    assert_eq!(second.items_ingested, 0);
    assert_eq!(second.duplicates, 2);
    assert!(!second.success);
    assert_eq!(second.final_stage, Stage::Done);
    assert_eq!(store.inner.row_count(Table::Articles), 2);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rerun_with_failed_duplicate_check_overwrites_instead_of_duplicating() {
    let source = Arc::new(StaticSource::with_articles("wire", &["u1", "u2"]));
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(
        source.clone(),
        Arc::new(ScriptedEnricher::default()),
        store.clone(),
        roomy_scheduler(),
    );

    let first = orch.run(&CancellationToken::new()).await;
    assert_eq!(first.items_ingested, 2);

    store.fail_select.store(true, Ordering::SeqCst);
    let second = orch.run(&CancellationToken::new()).await;

    assert_eq!(second.duplicates, 0);
    assert_eq!(second.items_ingested, 2);
    assert!(second.errors.iter().any(|e| e.contains("duplicate check failed")));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 4);
    assert_eq!(store.inner.row_count(Table::Articles), 2);
    assert_eq!(row(&store, "u1")["title"], "Title of u1");
}

#[tokio::test]
async fn persistence_failure_skips_only_that_item() {
    let store = Arc::new(FlakyStore {
        fail_upsert_for: vec!["u1".into()],
        ..FlakyStore::default()
    });
    let orch = orchestrator(
        Arc::new(StaticSource::with_articles("wire", &["u1", "u2"])),
        Arc::new(ScriptedEnricher::default()),
        store.clone(),
        roomy_scheduler(),
    );

    let res = orch.run(&CancellationToken::new()).await;

    assert!(res.success);
    assert_eq!(res.items_ingested, 1);
    assert_eq!(res.skipped, 1);
    assert!(res.errors.iter().any(|e| e.contains("persist failed")));
    assert!(store.inner.get(Table::Articles, "u2").is_some());
}

#[tokio::test]
async fn unparsable_category_falls_back_to_society() {
    let store = Arc::new(FlakyStore::default());
    let orch = orchestrator(
        Arc::new(StaticSource::with_articles("wire", &["u1"])),
        Arc::new(ScriptedEnricher {
            category: "no idea".into(),
            ..ScriptedEnricher::default()
        }),
        store.clone(),
        roomy_scheduler(),
    );

    let res = orch.run(&CancellationToken::new()).await;

    assert_eq!(res.items_ingested, 1);
    assert_eq!(row(&store, "u1")["category"], 3);
    assert!(res.errors.iter().any(|e| e.contains("categorize failed")));
}

#[tokio::test]
async fn title_is_translated_when_a_language_is_set() {
    let store = Arc::new(FlakyStore::default());
    let orch = with_settings(
        Arc::new(StaticSource::with_articles("wire", &["u1"])),
        Arc::new(ScriptedEnricher::default()),
        store.clone(),
        PipelineSettings {
            target_language: Some("German".into()),
            ..fast_settings()
        },
    );

    orch.run(&CancellationToken::new()).await;
    assert_eq!(row(&store, "u1")["title"], "[de] Title of u1");
}

#[tokio::test]
async fn unreadable_store_with_fail_closed_ingests_nothing() {
    let store = Arc::new(FlakyStore::default());
    store.fail_select.store(true, Ordering::SeqCst);
    let enricher = Arc::new(ScriptedEnricher::default());
    let orch = with_settings(
        Arc::new(StaticSource::with_articles("wire", &["u1", "u2"])),
        enricher.clone(),
        store.clone(),
        PipelineSettings {
            duplicate_policy: FailPolicy::FailClosed,
            ..fast_settings()
        },
    );

    let res = orch.run(&CancellationToken::new()).await;

    assert_eq!(res.items_ingested, 0);
    assert_eq!(res.final_stage, Stage::Done);
    assert!(res.errors.iter().any(|e| e.contains("duplicate check failed")));
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_run_aborts_before_listing() {
    let source = Arc::new(StaticSource::with_articles("wire", &["u1"]));
    let orch = orchestrator(
        source.clone(),
        Arc::new(ScriptedEnricher::default()),
        Arc::new(FlakyStore::default()),
        roomy_scheduler(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let res = orch.run(&cancel).await;

    assert!(!res.success);
    assert_eq!(res.final_stage, Stage::Aborted);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn reversed_courtesy_range_uses_its_upper_bound() {
    use std::time::Duration;
    use tokio::time::Instant;

    let reversed = Duration::from_secs(3)..=Duration::from_secs(1);
    let orch = with_settings(
        Arc::new(StaticSource::with_articles("wire", &["u1", "u2", "u3"])),
        Arc::new(ScriptedEnricher::default()),
        Arc::new(FlakyStore::default()),
        PipelineSettings {
            courtesy_delay: reversed,
            ..fast_settings()
        },
    );

    let t0 = Instant::now();
    let res = orch.run(&CancellationToken::new()).await;
    let took = t0.elapsed();

    assert_eq!(res.items_ingested, 3);
    assert!(took >= Duration::from_secs(2), "{took:?}");
    assert!(took < Duration::from_secs(3), "{took:?}");
}

#[tokio::test(start_paused = true)]
async fn courtesy_pause_separates_items() {
    use std::time::Duration;
    use tokio::time::Instant;

    let orch = with_settings(
        Arc::new(StaticSource::with_articles("wire", &["u1", "u2", "u3"])),
        Arc::new(ScriptedEnricher::default()),
        Arc::new(FlakyStore::default()),
        PipelineSettings {
            courtesy_delay: Duration::from_secs(2)..=Duration::from_secs(5),
            ..fast_settings()
        },
    );

    let t0 = Instant::now();
    let res = orch.run(&CancellationToken::new()).await;
    let took = t0.elapsed();

    assert_eq!(res.items_ingested, 3);
    // Two pauses between three items; none after the last one.
    assert!(took >= Duration::from_secs(4), "{took:?}");
    assert!(took <= Duration::from_secs(11), "{took:?}");
}
