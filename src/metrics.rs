use anyhow::{Context, Result};
use axum::{http::header, routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder and publish the configured
    /// batch bound as a static gauge. Fails if a recorder is already installed.
    pub fn init(batch_limit: usize) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        gauge!("pipeline_batch_limit").set(batch_limit as f64);

        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus text format, scraped alongside the dashboard API.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let body = handle.render();
                async move { ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body) }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn metrics_route_serves_prometheus_text() {
        // local recorder: nothing installed globally
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = Metrics { handle }.router();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], PROMETHEUS_CONTENT_TYPE);
    }
}
