// src/api.rs
//! Read-only presentation API over the processed view.
//!
//! Handlers only read from the stores. A store failure or a malformed query
//! string becomes a generic 500 body; the detail goes to the log, never to the client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::StoreError;
use crate::metrics::Metrics;
use crate::model::{InsightsSnapshot, ProcessedProduct, RawRecord};
use crate::pipeline::transform::parse_id_value;
use crate::store::{ProcessedStore, ProductSort, RawStore};

const DEFAULT_LATEST_LIMIT: usize = 5;
const MAX_LATEST_LIMIT: usize = 500;
const TOP_MENTIONS: usize = 10;
const DAY_MS: i64 = 24 * 3600 * 1000;

#[derive(Clone)]
pub struct AppState {
    pub raw: Arc<dyn RawStore>,
    pub processed: Arc<dyn ProcessedStore>,
}

/// `{status: "ok", data}` envelope used by every JSON route.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { status: "ok", data })
}

/// Everything a handler can fail with. The client always sees the same
/// generic body; the cause is only logged.
pub enum ApiError {
    Store(StoreError),
    Query(QueryRejection),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::Query(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(e) => tracing::error!(target: "api", error = %e, "store read failed"),
            Self::Query(e) => tracing::warn!(target: "api", error = %e, "malformed query string"),
        }
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": "internal error"})),
        )
            .into_response()
    }
}

/// Build the router. `/metrics` is mounted when a Prometheus handle is given.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/summary", get(summary))
        .route("/api/insights", get(insights))
        .route("/api/latest_products", get(latest_products))
        .route("/api/reports/daily", get(daily_report))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => api.merge(m.router()),
        None => api,
    }
}

#[derive(Deserialize)]
struct SummaryQuery {
    #[serde(default)]
    sort: Option<String>,
}

async fn summary(
    State(state): State<AppState>,
    q: Result<Query<SummaryQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<ProcessedProduct>>>, ApiError> {
    let Query(q) = q?;
    let sort = match q.sort.as_deref() {
        Some("processed_at_ms") | Some("timestamp") => ProductSort::ProcessedAtMs,
        _ => ProductSort::LastProcessed,
    };
    Ok(ok(state.processed.list_products(sort).await?))
}

async fn insights(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Option<InsightsSnapshot>>>, ApiError> {
    Ok(ok(state.processed.latest_insights().await?))
}

#[derive(Deserialize)]
struct LatestQuery {
    limit: Option<usize>,
}

async fn latest_products(
    State(state): State<AppState>,
    q: Result<Query<LatestQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<RawRecord>>>, ApiError> {
    let Query(q) = q?;
    let limit = q.limit.unwrap_or(DEFAULT_LATEST_LIMIT).min(MAX_LATEST_LIMIT);
    Ok(ok(state.raw.latest(limit).await?))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Mention {
    pub product_id: i64,
    pub mentions: usize,
}

#[derive(Serialize)]
struct DailyReport {
    total_posts: usize,
    top_mentions: Vec<Mention>,
    insights: Option<InsightsSnapshot>,
}

async fn daily_report(
    State(state): State<AppState>,
) -> Result<Json<Envelope<DailyReport>>, ApiError> {
    let since = chrono::Utc::now().timestamp_millis() - DAY_MS;
    let recent = state.raw.ingested_since(since).await?;
    let insights = state.processed.latest_insights().await?;
    Ok(ok(DailyReport {
        total_posts: recent.len(),
        top_mentions: top_mentions(&recent, TOP_MENTIONS),
        insights,
    }))
}

/// Most frequent product ids, count descending then id ascending.
pub fn top_mentions(records: &[RawRecord], k: usize) -> Vec<Mention> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for r in records {
        let pid = r.product_id.as_ref().and_then(parse_id_value).unwrap_or(0);
        *counts.entry(pid).or_default() += 1;
    }
    let mut out: Vec<Mention> = counts
        .into_iter()
        .map(|(product_id, mentions)| Mention {
            product_id,
            mentions,
        })
        .collect();
    out.sort_by(|a, b| {
        b.mentions
            .cmp(&a.mentions)
            .then(a.product_id.cmp(&b.product_id))
    });
    out.truncate(k);
    out
}
