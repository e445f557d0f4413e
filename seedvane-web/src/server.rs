//! Axum server exposing the metric registry.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use seedvane_core::TorrentMetrics;
use tokio::net::TcpListener;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Registry written by the poller and read here on each request.
    pub metrics: Arc<TorrentMetrics>,
}

/// Builds the exposition router: `/metrics` plus a trivial `/health`.
pub fn router(metrics: Arc<TorrentMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/health", get(|| async { "ok" }))
        .with_state(AppState { metrics })
}

async fn serve_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => {
            ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response()
        }
        Err(e) => {
            tracing::error!("encoding metrics failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves the exposition endpoint on the given listener until the server
/// future is dropped or fails.
///
/// # Errors
/// - `std::io::Error` - Accept or connection failure from the listener
pub async fn run_server(
    listener: TcpListener,
    metrics: Arc<TorrentMetrics>,
) -> std::io::Result<()> {
    tracing::info!("metrics endpoint listening on {}", listener.local_addr()?);
    axum::serve(listener, router(metrics)).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use seedvane_core::TorrentRecord;
    use tower::util::ServiceExt;

    use super::*;

    fn populated_metrics() -> Arc<TorrentMetrics> {
        let metrics = TorrentMetrics::new();
        metrics.apply(
            "host-A",
            &[TorrentRecord {
                name: "Torrent 1".to_string(),
                state: "uploading".to_string(),
                tracker: "https://tracker1.example.com/announce/foobar".to_string(),
                ratio: 1.5,
                uploaded: 104_857_600,
                size: None,
            }],
        );
        Arc::new(metrics)
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_exposition_format() {
        let app = router(populated_metrics());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(
            r#"qbittorrent_torrent_status{host="host-A",name="Torrent 1",state="uploading",tracker="tracker1.example.com"} 1"#
        ));
        assert!(body.contains("qbittorrent_torrent_seed_ratio"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_empty_registry() {
        let app = router(Arc::new(TorrentMetrics::new()));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(Arc::new(TorrentMetrics::new()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
