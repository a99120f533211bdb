// tests/config_env.rs
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;

use catalog_sentiment_pipeline::config::{FetchStrategy, StoreLocation, ENV_CONFIG_PATH};
use catalog_sentiment_pipeline::error::ConfigError;
use catalog_sentiment_pipeline::PipelineConfig;

const VARS: &[&str] = &[
    ENV_CONFIG_PATH,
    "STORE_URI",
    "BATCH_SIZE",
    "BATCH_CAP",
    "PROCESS_INTERVAL",
    "PROCESS_WORKERS",
    "SCRAPER_STRATEGY",
    "RAW_COLLECTION",
];

fn clear_env() {
    for v in VARS {
        env::remove_var(v);
    }
}

fn set(k: &str, v: &str) {
    env::set_var(k, v);
}

#[test]
#[serial]
fn missing_store_uri_refuses_to_start() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    std::fs::write(&path, "").unwrap();
    set(ENV_CONFIG_PATH, path.to_str().unwrap());

    match PipelineConfig::from_env() {
        Err(ConfigError::Missing(name)) => assert_eq!(name, "STORE_URI"),
        other => panic!("expected missing STORE_URI, got {other:?}"),
    }
    clear_env();
}

#[test]
#[serial]
fn file_layer_is_overridden_by_env() {
    clear_env();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
store_uri = "memory://"
batch_size = 100
process_interval = 30
workers = 3
raw_collection = "from_file"
scraper_strategy = "upsert"
"#
    )
    .unwrap();
    set(ENV_CONFIG_PATH, file.path().to_str().unwrap());
    set("BATCH_SIZE", "40");
    set("RAW_COLLECTION", "from_env");

    let cfg = PipelineConfig::from_env().unwrap();
    assert_eq!(cfg.store, StoreLocation::Memory);
    assert_eq!(cfg.batch_size, 40);
    assert_eq!(cfg.batch_limit(), 40);
    assert_eq!(cfg.process_interval, Duration::from_secs(30));
    assert_eq!(cfg.workers, 3);
    assert_eq!(cfg.collections.raw_collection, "from_env");
    assert_eq!(cfg.fetch.strategy, FetchStrategy::Upsert);
    clear_env();
}

#[test]
#[serial]
fn batch_size_is_bounded_by_cap() {
    clear_env();
    set(ENV_CONFIG_PATH, "/definitely/not/here.toml");
    assert!(matches!(
        PipelineConfig::from_env(),
        Err(ConfigError::File { .. })
    ));

    clear_env();
    set("STORE_URI", "memory://");
    set("BATCH_SIZE", "2000");
    set("BATCH_CAP", "500");
    let cfg = PipelineConfig::from_env().unwrap();
    assert_eq!(cfg.batch_limit(), 500);
    clear_env();
}

#[test]
#[serial]
fn zero_interval_is_rejected() {
    clear_env();
    set("STORE_URI", "memory://");
    set("PROCESS_INTERVAL", "0");
    assert!(matches!(
        PipelineConfig::from_env(),
        Err(ConfigError::Invalid { name: "PROCESS_INTERVAL", .. })
    ));
    clear_env();
}
