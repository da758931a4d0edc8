//! Scrape endpoint serving the dynamic gauges.
//!
//! Besides the metrics path there are two probes: `/health` answers as soon
//! as the listener is up, `/ready` only once the first MQTT message arrived.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;

/// Content type of the OpenMetrics text exposition.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

fn routes(collector: SharedCollector, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(|| async { "ok\n" }))
        .route("/ready", get(ready))
        .layer(CorsLayer::permissive())
        .with_state(collector)
}

async fn scrape(State(collector): State<SharedCollector>) -> Response {
    let body = collector.registry().render();
    ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response()
}

async fn ready(State(collector): State<SharedCollector>) -> Response {
    if collector.stats().messages_received == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "waiting for the first MQTT message\n",
        )
            .into_response();
    }
    (StatusCode::OK, "ready\n").into_response()
}

/// Metrics endpoint bound to its listen address.
///
/// Binding happens in [`bind`](Self::bind) so an unusable address is
/// reported at startup instead of from a background task.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    metrics_path: String,
}

impl HttpServer {
    /// Bind `listen_addr` and prepare the routes.
    pub async fn bind(
        collector: SharedCollector,
        listen_addr: SocketAddr,
        metrics_path: &str,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {}", listen_addr))?;

        Ok(Self {
            listener,
            router: routes(collector, metrics_path),
            metrics_path: metrics_path.to_string(),
        })
    }

    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve scrapes until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr()?,
            path = %self.metrics_path,
            "Serving metrics"
        );

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                info!("Stopping metrics endpoint");
            })
            .await
            .context("metrics endpoint failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricCollector;
    use crate::registry::MetricRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use mqtt_exporter_common::MessageDecoder;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_collector() -> SharedCollector {
        Arc::new(MetricCollector::new(
            MessageDecoder::default(),
            Arc::new(MetricRegistry::new("mqtt_", "device")),
        ))
    }

    async fn get_status(router: Router, path: &str) -> StatusCode {
        router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_ready_after_first_message() {
        let collector = make_collector();
        let router = routes(collector.clone(), "/metrics");

        assert_eq!(get_status(router.clone(), "/health").await, StatusCode::OK);
        assert_eq!(
            get_status(router.clone(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        // A rejected payload still shows the subscription delivers messages.
        collector.handle_message("zigbee2mqtt/bridge/state", b"online");
        assert_eq!(get_status(router, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = routes(make_collector(), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            OPENMETRICS_CONTENT_TYPE
        );

        assert_eq!(get_status(router, "/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_fails_when_address_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = HttpServer::bind(make_collector(), addr, "/metrics")
            .await
            .err()
            .expect("binding an address in use must fail");
        assert!(err.to_string().contains("failed to bind metrics endpoint"));
    }
}
