// src/pipeline/transform.rs
//! Raw listing + sentiment → processed product.
//!
//! Field extraction is permissive: a malformed id or price never drops the
//! record. Every fallback is reported through [`Parsed::defaulted`] so callers
//! can log and count it.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::TransformError;
use crate::model::{ProcessedProduct, RawRecord};
use crate::sentiment::SentimentResult;

/// A parsed field plus whether the default had to be used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Parsed<T> {
    fn ok(value: T) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }
    fn default_to(value: T) -> Self {
        Self {
            value,
            defaulted: true,
        }
    }
}

/// Integer, integral float, or a string holding either.
pub fn parse_id_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

/// `product_id`, falling back to `id`, falling back to 0. A zero id counts as
/// absent so the generic id gets its chance.
pub fn parse_source_id(rec: &RawRecord) -> Parsed<i64> {
    let candidates = [rec.product_id.as_ref(), rec.id.as_ref()];
    candidates
        .into_iter()
        .flatten()
        .filter_map(parse_id_value)
        .find(|id| *id != 0)
        .map(Parsed::ok)
        .unwrap_or_else(|| {
            let explicit_zero = candidates
                .into_iter()
                .flatten()
                .any(|v| parse_id_value(v) == Some(0));
            if explicit_zero {
                Parsed::ok(0)
            } else {
                Parsed::default_to(0)
            }
        })
}

/// Non-negative finite float; numeric strings are accepted.
pub fn parse_price(v: Option<&Value>) -> Parsed<f64> {
    let n = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(p) if p.is_finite() && p >= 0.0 => Parsed::ok(p),
        _ => Parsed::default_to(0.0),
    }
}

/// `(avg, count)` from a nested `{rate, count}` object. Missing pieces are `None`.
pub fn parse_rating(v: Option<&Value>) -> (Option<f64>, Option<u64>) {
    let Some(obj) = v.and_then(Value::as_object) else {
        return (None, None);
    };
    let avg = obj
        .get("rate")
        .or_else(|| obj.get("avg"))
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite());
    let count = obj.get("count").and_then(|c| {
        c.as_u64()
            .or_else(|| c.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
    });
    (avg, count)
}

/// Output of a successful transform, with the fallbacks that were taken.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub product: ProcessedProduct,
    pub id_defaulted: bool,
    pub price_defaulted: bool,
}

/// Build the processed document. Inputs are only borrowed.
pub fn transform(
    rec: &RawRecord,
    sentiment: SentimentResult,
    now: DateTime<Utc>,
) -> Result<Transformed, TransformError> {
    let score = sentiment.compound;
    if !score.is_finite() || !(-1.0..=1.0).contains(&score) {
        return Err(TransformError::InvalidScore(score));
    }

    let id = parse_source_id(rec);
    let price = parse_price(rec.price.as_ref());
    let (avg_rating, rating_count) = parse_rating(rec.rating.as_ref());

    Ok(Transformed {
        product: ProcessedProduct {
            product_id: id.value,
            title: rec.title.clone(),
            category: rec.category.clone(),
            price: price.value,
            avg_rating,
            rating_count,
            sentiment_score: score,
            sentiment_label: sentiment.label,
            last_processed: now,
            processed_at_ms: now.timestamp_millis(),
        },
        id_defaulted: id.defaulted,
        price_defaulted: price.defaulted && rec.price.is_some(),
    })
}
