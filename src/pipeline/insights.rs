// src/pipeline/insights.rs
//! Folds one cycle's processed products into the ranked insights snapshot.

use chrono::{DateTime, Utc};

use crate::model::{InsightEntry, InsightsSnapshot, ProcessedProduct, LATEST_INSIGHTS_ID};

/// Entries kept on each side of the ranking.
pub const TOP_K: usize = 5;

/// `None` for an empty batch, so the previous snapshot stays untouched.
///
/// `products` must be in selection order; it is the tie-breaker on equal scores.
/// Small batches may show the same product in both rankings.
pub fn build_snapshot(
    products: &[ProcessedProduct],
    generated_at: DateTime<Utc>,
) -> Option<InsightsSnapshot> {
    if products.is_empty() {
        return None;
    }

    let mut by_score: Vec<&ProcessedProduct> = products.iter().collect();

    // stable sorts: equal scores keep batch order
    by_score.sort_by(|a, b| b.sentiment_score.total_cmp(&a.sentiment_score));
    let top_positive = by_score.iter().take(TOP_K).map(|p| entry(p)).collect();

    by_score.sort_by(|a, b| a.sentiment_score.total_cmp(&b.sentiment_score));
    let top_negative = by_score.iter().take(TOP_K).map(|p| entry(p)).collect();

    let sum: f64 = products.iter().map(|p| p.sentiment_score).sum();

    Some(InsightsSnapshot {
        id: LATEST_INSIGHTS_ID.to_string(),
        generated_at,
        top_positive,
        top_negative,
        avg_sentiment: sum / products.len() as f64,
        sample_size: products.len(),
    })
}

fn entry(p: &ProcessedProduct) -> InsightEntry {
    InsightEntry {
        product_id: p.product_id,
        title: p.title.clone(),
        score: p.sentiment_score,
    }
}
