// src/fetch/http.rs
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::ListingSource;

/// GETs a JSON array of listings from a catalog endpoint.
#[derive(Clone)]
pub struct HttpListingSource {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl HttpListingSource {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(20),
            max_retries: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per fetch (1 = no retry).
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn get_once(&self) -> Result<Value> {
        self.client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .context("listing request failed")?
            .error_for_status()
            .context("listing source non-2xx")?
            .json::<Value>()
            .await
            .context("listing body is not JSON")
    }
}

#[async_trait::async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_listings(&self) -> Result<Vec<Value>> {
        let mut attempt: u8 = 0;
        let body = loop {
            attempt += 1;
            match self.get_once().await {
                Ok(v) => break v,
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "fetch", attempt, "retrying after: {e:#}");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(e),
            }
        };

        match body {
            Value::Array(items) => Ok(items),
            other => Err(anyhow!(
                "unexpected response shape from source API (expected array, got {})",
                kind(&other)
            )),
        }
    }

    fn name(&self) -> &str {
        &self.url
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
