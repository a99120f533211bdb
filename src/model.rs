// src/model.rs
//! Persisted document shapes: raw listings, processed products and the insights snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sentiment::SentimentLabel;

/// Store-assigned identity of a raw record.
pub type RawKey = u64;

/// Fixed id of the singleton insights document.
pub const LATEST_INSIGHTS_ID: &str = "latest";

/// One ingested listing as appended by the fetcher. Catalog fields are kept
/// loosely typed because the upstream payload is not trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    pub key: RawKey,
    #[serde(default)]
    pub product_id: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub rating: Option<Value>,
    /// epoch millis, non-decreasing in insertion order
    pub ingested_at: i64,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default)]
    pub consumed_at: Option<i64>,
    #[serde(default)]
    pub raw_payload: Value,
}

/// A raw record before the store assigns its key and ingestion time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRawRecord {
    pub product_id: Option<Value>,
    pub id: Option<Value>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<Value>,
    pub rating: Option<Value>,
    pub raw_payload: Value,
}

impl NewRawRecord {
    /// Lift one upstream listing object into a raw record. Non-object payloads
    /// still produce a record (all fields empty) so nothing is silently dropped.
    pub fn from_payload(payload: Value) -> Self {
        let field = |k: &str| payload.get(k).filter(|v| !v.is_null()).cloned();
        let text = |k: &str| match payload.get(k) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let id = field("id");
        let product_id = field("product_id").or_else(|| {
            id.as_ref()
                .and_then(crate::pipeline::transform::parse_id_value)
                .map(Value::from)
        });
        Self {
            product_id,
            id,
            title: text("title"),
            description: text("description"),
            category: text("category"),
            price: field("price"),
            rating: field("rating"),
            raw_payload: payload,
        }
    }

    pub(crate) fn into_record(self, key: RawKey, ingested_at: i64) -> RawRecord {
        RawRecord {
            key,
            product_id: self.product_id,
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            price: self.price,
            rating: self.rating,
            ingested_at,
            consumed: false,
            consumed_at: None,
            raw_payload: self.raw_payload,
        }
    }
}

/// Deduplicated, sentiment-annotated view of one catalog item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedProduct {
    pub product_id: i64,
    pub title: Option<String>,
    pub category: Option<String>,
    pub price: f64,
    pub avg_rating: Option<f64>,
    pub rating_count: Option<u64>,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub last_processed: DateTime<Utc>,
    pub processed_at_ms: i64,
}

impl ProcessedProduct {
    /// Equality ignoring the processing timestamps.
    pub fn same_content(&self, other: &ProcessedProduct) -> bool {
        self.product_id == other.product_id
            && self.title == other.title
            && self.category == other.category
            && self.price == other.price
            && self.avg_rating == other.avg_rating
            && self.rating_count == other.rating_count
            && self.sentiment_score == other.sentiment_score
            && self.sentiment_label == other.sentiment_label
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightEntry {
    pub product_id: i64,
    pub title: Option<String>,
    pub score: f64,
}

/// Rolling summary of the most recent non-empty processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsightsSnapshot {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub top_positive: Vec<InsightEntry>,
    pub top_negative: Vec<InsightEntry>,
    pub avg_sentiment: f64,
    pub sample_size: usize,
}
