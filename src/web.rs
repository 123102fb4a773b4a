//! HTTP API for the contents index.
//!
//! Query endpoints never fail: an unknown archive, a broken pattern, a store
//! failure and a timed out search all answer with an empty JSON object, so
//! callers cannot tell "no match" from "no such archive".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::error::{IndexError, IndexResult};
use crate::search::{FindResult, SearchEngine};

/// Web service application state.
#[derive(Clone)]
pub struct AppState {
    /// Search engine answering queries.
    pub engine: Arc<SearchEngine>,
    /// Time a single query may take.
    pub search_timeout: Duration,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Create the Axum router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/v1/archives", get(list_archives))
        .route("/v1/find/", get(find_without_archive))
        .route("/v1/find/{*archive}", get(find))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, bind_address: &str, shutdown: F) -> IndexResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            IndexError::Configuration(format!("Failed to bind to {}: {}", bind_address, e))
        })?;

    info!("Ready to serve on {}", bind_address);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ready = !state.engine.known_archives().is_empty();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if ready { "ready" } else { "starting" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

async fn list_archives(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.engine.known_archives())
}

async fn find_without_archive() -> Json<FindResult> {
    Json(FindResult::new())
}

async fn find(
    Path(archive): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Json<FindResult> {
    let archive = archive.trim_start_matches('/');
    let Some(pattern) = params.get("q") else {
        return Json(FindResult::new());
    };

    match tokio::time::timeout(state.search_timeout, state.engine.find(archive, pattern)).await {
        Ok(result) => Json(result),
        Err(_) => {
            warn!(
                "Search of {} for {:?} timed out after {:?}",
                archive, pattern, state.search_timeout
            );
            Json(FindResult::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::store::Store;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app() -> (TempDir, Router) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&temp_dir.path().join("index.redb")).unwrap());
        let engine = SearchEngine::new(store, Default::default(), SearchConfig::default());
        let state = AppState {
            engine: Arc::new(engine),
            search_timeout: Duration::from_secs(5),
        };
        (temp_dir, app(state))
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_without_archives() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_find_without_query_is_empty_object() {
        let (_dir, app) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/find/neon")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{}");
    }
}
