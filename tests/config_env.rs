// tests/config_env.rs
use std::{env, fs, path::PathBuf};

use match_pipeline::logging::LogFormat;
use match_pipeline::PipelineConfig;

const VARS: [&str; 5] = [
    "PIPELINE_CONFIG_PATH",
    "OPENDOTA_API_KEY",
    "OPENDOTA_API_BASE_URL",
    "PIPELINE_DAILY_API_LIMIT",
    "PIPELINE_BATCH_SIZE",
];

fn clear_env() {
    for v in VARS {
        env::remove_var(v);
    }
}

#[serial_test::serial]
#[test]
fn defaults_when_nothing_is_configured() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    let cfg = PipelineConfig::load(None).unwrap();
    assert_eq!(cfg.pipeline.daily_api_limit, 1800);
    assert_eq!(cfg.pipeline.batch_size, 50);
    assert_eq!(cfg.api.rate_limit_per_minute, 60);
    assert!(cfg.api.api_key.is_none());
    assert!(cfg.discovery.enable_hero_filtering);

    // Fallback file in ./config/
    fs::create_dir_all("config").unwrap();
    fs::write(
        "config/pipeline.toml",
        "[pipeline]\nbatch_size = 7\n\n[logging]\nformat = \"json\"\n",
    )
    .unwrap();
    let cfg = PipelineConfig::load(None).unwrap();
    assert_eq!(cfg.pipeline.batch_size, 7);
    assert_eq!(cfg.logging.format, LogFormat::Json);

    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_file_values() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let p = tmp.path().join("custom.toml");
    fs::write(
        &p,
        r#"
[api]
base_url = "http://file.invalid/api"

[pipeline]
daily_api_limit = 500
batch_size = 20

[data]
tracking_dir = "/srv/od/tracking"
"#,
    )
    .unwrap();

    env::set_var("PIPELINE_CONFIG_PATH", &p);
    env::set_var("OPENDOTA_API_KEY", "  k-123  ");
    env::set_var("PIPELINE_DAILY_API_LIMIT", "900");

    let cfg = PipelineConfig::load(None).unwrap();
    assert_eq!(cfg.api.base_url, "http://file.invalid/api");
    assert_eq!(cfg.api.api_key.as_deref(), Some("k-123"));
    assert_eq!(cfg.pipeline.daily_api_limit, 900);
    assert_eq!(cfg.pipeline.batch_size, 20);
    assert_eq!(cfg.data.tracking_dir, PathBuf::from("/srv/od/tracking"));

    env::set_var("OPENDOTA_API_BASE_URL", "http://127.0.0.1:9/api");
    env::set_var("OPENDOTA_API_KEY", "   ");
    let cfg = PipelineConfig::load(None).unwrap();
    assert_eq!(cfg.api.base_url, "http://127.0.0.1:9/api");
    assert!(cfg.api.api_key.is_none());

    clear_env();
}

#[serial_test::serial]
#[test]
fn bad_env_values_are_errors() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();

    env::set_var("PIPELINE_CONFIG_PATH", tmp.path().join("missing.toml"));
    assert!(PipelineConfig::load(None).is_err());
    env::remove_var("PIPELINE_CONFIG_PATH");

    let p = tmp.path().join("ok.toml");
    fs::write(&p, "").unwrap();
    env::set_var("PIPELINE_BATCH_SIZE", "lots");
    let err = PipelineConfig::load(Some(&p)).unwrap_err();
    assert!(format!("{err:#}").contains("PIPELINE_BATCH_SIZE"));

    env::set_var("PIPELINE_BATCH_SIZE", "0");
    assert!(PipelineConfig::load(Some(&p)).is_err());

    clear_env();
}
