// tests/config_env.rs
//
// Config lookup order: $PIPELINE_CONFIG_PATH, then ./config/pipeline.toml,
// then built-in defaults. Tests touch the process env and CWD, so they run
// serially.

use std::{env, fs};

use feed_ingest::config::{PipelineConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};

const MOCK_ONLY: &str = r#"
[enricher]
provider = "mock"
"#;

#[serial_test::serial]
#[test]
fn default_uses_env_then_file_then_builtin() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);
    env::set_var("OPENAI_API_KEY", "sk-from-env");

    // 1) Nothing on disk → defaults (openai provider, key from env).
    let cfg = PipelineConfig::load_default().unwrap();
    assert_eq!(cfg.enricher.provider, "openai");
    assert_eq!(cfg.enricher.api_key, "sk-from-env");
    assert!(cfg.sources.is_empty());

    // 2) Fallback file in ./config/.
    fs::create_dir_all("config").unwrap();
    fs::write(
        DEFAULT_CONFIG_PATH,
        format!("{MOCK_ONLY}\n[scheduler]\ntoken_quota = 5000\n"),
    )
    .unwrap();
    let cfg = PipelineConfig::load_default().unwrap();
    assert_eq!(cfg.enricher.provider, "mock");
    assert_eq!(cfg.scheduler.token_quota, 5000);

    // 3) Env path wins over the fallback.
    let custom = tmp.path().join("custom.toml");
    fs::write(&custom, format!("{MOCK_ONLY}\n[scheduler]\ntoken_quota = 777\n")).unwrap();
    env::set_var(ENV_CONFIG_PATH, &custom);
    let cfg = PipelineConfig::load_default().unwrap();
    assert_eq!(cfg.scheduler.token_quota, 777);

    // 4) Env path that does not exist is an error, not a silent fallback.
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
    assert!(PipelineConfig::load_default().is_err());

    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var("OPENAI_API_KEY");
    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn openai_without_key_fails_validation() {
    env::remove_var("OPENAI_API_KEY");
    let err = PipelineConfig::from_toml_str("[enricher]\nprovider = \"OpenAI\"\n").unwrap_err();
    assert!(format!("{err:#}").contains("OPENAI_API_KEY"));
}

#[serial_test::serial]
#[test]
fn explicit_key_needs_no_env() {
    env::remove_var("OPENAI_API_KEY");
    let cfg = PipelineConfig::from_toml_str(
        "[enricher]\nprovider = \"openai\"\napi_key = \"sk-inline\"\nmodel = \"gpt-4o\"\n",
    )
    .unwrap();
    assert_eq!(cfg.enricher.api_key, "sk-inline");
    assert_eq!(cfg.enricher.model.as_deref(), Some("gpt-4o"));
}
