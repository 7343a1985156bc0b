//! Health, readiness and metrics endpoints.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Registry, TextEncoder};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state behind the probe endpoints.
#[derive(Clone)]
pub struct ProbeState {
    registry: Registry,
    ready: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl fmt::Debug for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeState")
            .field("ready", &(self.ready)())
            .finish_non_exhaustive()
    }
}

impl ProbeState {
    /// Serve `registry` on `/metrics`; `/readyz` succeeds while `ready` returns `true`.
    pub fn new(registry: Registry, ready: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            registry,
            ready: Arc::new(ready),
        }
    }
}

/// Router exposing `/healthz`, `/readyz` and `/metrics`.
pub fn router(state: ProbeState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the probe listener. Failure is fatal at startup.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ControllerError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind probe server to {}: {}", addr, e);
        ControllerError::Io(e)
    })?;
    info!("Probe server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve the probe endpoints on `listener` until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ProbeState,
    token: CancellationToken,
) -> Result<(), ControllerError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("Probe server stopped");
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    if (state.ready)() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "mirror not synced")
    }
}

async fn metrics(State(state): State<ProbeState>) -> Response {
    match TextEncoder::new().encode_to_string(&state.registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;
    use workqueue::{Queue, QueueMetrics};

    async fn call(state: ProbeState, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_is_always_ok() {
        let state = ProbeState::new(Registry::new(), || false);
        assert_eq!(call(state, "/healthz").await, (StatusCode::OK, "ok".to_string()));
    }

    #[tokio::test]
    async fn test_readyz_follows_sync_state() {
        let synced = Arc::new(AtomicBool::new(false));
        let state = ProbeState::new(Registry::new(), {
            let synced = Arc::clone(&synced);
            move || synced.load(Ordering::SeqCst)
        });

        let (status, _) = call(state.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        synced.store(true, Ordering::SeqCst);
        let (status, _) = call(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_queue_metrics() {
        let registry = Registry::new();
        let queue = Queue::with_metrics(QueueMetrics::new("podwatch", &registry).unwrap());
        queue.add("default/web".to_string());

        let (status, body) = call(ProbeState::new(registry, || true), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("workqueue_adds_total{name=\"podwatch\"} 1"));
        assert!(body.contains("workqueue_depth{name=\"podwatch\"} 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let state = ProbeState::new(Registry::new(), || true);
        let (status, _) = call(state, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_answers_on_bound_listener() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            ProbeState::new(Registry::new(), || true),
            token.clone(),
        ));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
            .await
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        token.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_on_occupied_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = bind(taken.local_addr().unwrap()).await;
        assert!(matches!(result, Err(ControllerError::Io(_))));
    }
}
