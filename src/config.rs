// src/config.rs
//! Pipeline configuration.
//!
//! Layering, lowest to highest priority:
//! 1) built-in defaults
//! 2) TOML file at $PIPELINE_CONFIG_PATH, else `config/pipeline.toml` when present
//! 3) environment variables (`.env` is loaded by the binary)
//!
//! `STORE_URI` is the only required value. Malformed numbers fall back to the
//! default with a warning; values that would make the pipeline meaningless
//! (zero batch size, zero interval, unknown store scheme) are fatal.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

pub const DEFAULT_BATCH_CAP: usize = 500;
pub const DEFAULT_SOURCE_API: &str = "https://fakestoreapi.com/products";
/// Largest retention window whose millisecond value still fits the clock.
pub const MAX_RETENTION_SECS: u64 = (i64::MAX / 1000) as u64;

/// Where documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    /// Accepts `memory`, `memory://`, `file://<path>` and `file:<path>`.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let uri = uri.trim();
        let invalid = |reason| ConfigError::Invalid {
            name: "STORE_URI",
            value: uri.to_string(),
            reason,
        };
        if uri.eq_ignore_ascii_case("memory") || uri.eq_ignore_ascii_case("memory://") {
            return Ok(StoreLocation::Memory);
        }
        let path = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .ok_or_else(|| invalid("expected memory:// or file://<path>"))?;
        if path.is_empty() {
            return Err(invalid("file store needs a path"));
        }
        Ok(StoreLocation::File(PathBuf::from(path)))
    }
}

/// Database + collection names. File snapshots key collections as `<db>.<collection>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    pub raw_db: String,
    pub raw_collection: String,
    pub processed_db: String,
    pub processed_collection: String,
    pub insights_collection: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            raw_db: "raw_db".into(),
            raw_collection: "raw_products".into(),
            processed_db: "processed_db".into(),
            processed_collection: "products".into(),
            insights_collection: "insights".into(),
        }
    }
}

impl CollectionNames {
    pub fn raw_namespace(&self) -> String {
        format!("{}.{}", self.raw_db, self.raw_collection)
    }
    pub fn processed_namespace(&self) -> String {
        format!("{}.{}", self.processed_db, self.processed_collection)
    }
    pub fn insights_namespace(&self) -> String {
        format!("{}.{}", self.processed_db, self.insights_collection)
    }
}

/// How the fetcher writes scraped listings into the raw store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStrategy {
    /// New raw record per scrape (history kept).
    #[default]
    Insert,
    /// One raw record per product id, refreshed in place.
    Upsert,
}

impl FetchStrategy {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(FetchStrategy::Insert),
            "upsert" => Ok(FetchStrategy::Upsert),
            _ => Err(ConfigError::Invalid {
                name: "SCRAPER_STRATEGY",
                value: s.to_string(),
                reason: "expected insert or upsert",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub source_api: String,
    pub interval: Duration,
    pub strategy: FetchStrategy,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub store: StoreLocation,
    pub collections: CollectionNames,
    pub batch_size: usize,
    pub batch_cap: usize,
    pub process_interval: Duration,
    pub workers: usize,
    pub fetch: FetchConfig,
    /// `None` keeps consumed raw records forever.
    pub raw_retention: Option<Duration>,
    pub bind_addr: String,
}

impl PipelineConfig {
    /// Defaults for everything except the store, which has no sensible default.
    pub fn with_store(store: StoreLocation) -> Self {
        Self {
            store,
            collections: CollectionNames::default(),
            batch_size: DEFAULT_BATCH_CAP,
            batch_cap: DEFAULT_BATCH_CAP,
            process_interval: Duration::from_secs(5),
            workers: 4,
            fetch: FetchConfig {
                source_api: DEFAULT_SOURCE_API.to_string(),
                interval: Duration::from_secs(10),
                strategy: FetchStrategy::Insert,
                timeout: Duration::from_secs(20),
            },
            raw_retention: None,
            bind_addr: "0.0.0.0:5000".to_string(),
        }
    }

    /// Records selected per cycle: the configured size, never above the cap.
    pub fn batch_limit(&self) -> usize {
        self.batch_size.min(self.batch_cap)
    }

    /// Load from the default file location and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |k: &str| std::env::var(k).ok();
        let file = match lookup(ENV_CONFIG_PATH) {
            Some(p) => {
                let path = PathBuf::from(p);
                if !path.exists() {
                    return Err(ConfigError::File {
                        path: path.display().to_string(),
                        reason: format!("{ENV_CONFIG_PATH} points to a non-existent path"),
                    });
                }
                Some(load_file(&path)?)
            }
            None => {
                let p = Path::new(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Some(load_file(p)?)
                } else {
                    None
                }
            }
        };
        Self::resolve(file.unwrap_or_default(), lookup)
    }

    /// Merge a file layer with an environment lookup. Env wins.
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        let store_uri = get("STORE_URI")
            .or(file.store_uri)
            .ok_or(ConfigError::Missing("STORE_URI"))?;
        let mut cfg = Self::with_store(StoreLocation::parse(&store_uri)?);

        let names = &mut cfg.collections;
        override_str(&mut names.raw_db, get("RAW_DB").or(file.raw_db));
        override_str(
            &mut names.raw_collection,
            get("RAW_COLLECTION").or(file.raw_collection),
        );
        override_str(
            &mut names.processed_db,
            get("PROCESSED_DB").or(file.processed_db),
        );
        override_str(
            &mut names.processed_collection,
            get("PROCESSED_COLLECTION").or(file.processed_collection),
        );
        override_str(
            &mut names.insights_collection,
            get("INSIGHTS_COLLECTION").or(file.insights_collection),
        );

        cfg.batch_size = number(&get, "BATCH_SIZE", file.batch_size, cfg.batch_size);
        cfg.batch_cap = number(&get, "BATCH_CAP", file.batch_cap, cfg.batch_cap);
        cfg.workers = number(&get, "PROCESS_WORKERS", file.workers, cfg.workers).max(1);
        let process_secs = number(&get, "PROCESS_INTERVAL", file.process_interval, 5u64);
        let scrape_secs = number(&get, "SCRAPE_INTERVAL", file.scrape_interval, 10u64);
        let timeout_secs = number(&get, "FETCH_TIMEOUT_SECS", file.fetch_timeout_secs, 20u64);
        let retention_secs = number(&get, "RAW_RETENTION_SECS", file.raw_retention_secs, 0u64);

        for (name, v) in [
            ("BATCH_SIZE", cfg.batch_size as u64),
            ("BATCH_CAP", cfg.batch_cap as u64),
            ("PROCESS_INTERVAL", process_secs),
            ("SCRAPE_INTERVAL", scrape_secs),
            ("FETCH_TIMEOUT_SECS", timeout_secs),
        ] {
            if v == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    value: "0".into(),
                    reason: "must be greater than zero",
                });
            }
        }
        if retention_secs > MAX_RETENTION_SECS {
            return Err(ConfigError::Invalid {
                name: "RAW_RETENTION_SECS",
                value: retention_secs.to_string(),
                reason: "retention window too large",
            });
        }
        cfg.process_interval = Duration::from_secs(process_secs);
        cfg.fetch.interval = Duration::from_secs(scrape_secs);
        cfg.fetch.timeout = Duration::from_secs(timeout_secs);
        cfg.raw_retention = (retention_secs > 0).then(|| Duration::from_secs(retention_secs));

        override_str(
            &mut cfg.fetch.source_api,
            get("SOURCE_API").or(file.source_api),
        );
        if let Some(s) = get("SCRAPER_STRATEGY").or(file.scraper_strategy) {
            cfg.fetch.strategy = FetchStrategy::parse(&s)?;
        }
        override_str(&mut cfg.bind_addr, get("BIND_ADDR").or(file.bind_addr));

        Ok(cfg)
    }
}

/// Optional TOML layer. Keys mirror the environment names in lower case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub store_uri: Option<String>,
    pub raw_db: Option<String>,
    pub raw_collection: Option<String>,
    pub processed_db: Option<String>,
    pub processed_collection: Option<String>,
    pub insights_collection: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_cap: Option<usize>,
    pub process_interval: Option<u64>,
    #[serde(alias = "process_workers")]
    pub workers: Option<usize>,
    pub scrape_interval: Option<u64>,
    pub source_api: Option<String>,
    pub scraper_strategy: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub raw_retention_secs: Option<u64>,
    pub bind_addr: Option<String>,
}

pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::File {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn override_str(slot: &mut String, v: Option<String>) {
    if let Some(v) = v {
        let t = v.trim();
        if !t.is_empty() {
            *slot = t.to_string();
        }
    }
}

fn number<T, G>(get: &G, name: &str, from_file: Option<T>, default: T) -> T
where
    T: std::str::FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(target: "config", var = name, value = %raw, "unparsable number, using default");
                from_file.unwrap_or(default)
            }
        },
        None => from_file.unwrap_or(default),
    }
}
