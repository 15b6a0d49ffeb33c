//! HTTP and WebSocket presentation host.
//!
//! Boards are served as JSON snapshots; every `BoardEvent` is pushed to
//! `/ws` subscribers so a frontend can re-render without polling.

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::config::StageboardToml;
use crate::pipeline::PipelineHub;
use api::AppState;

pub use api::{ApiError, SharedState, api_router};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3142,
            host: "127.0.0.1".to_string(),
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(toml: &StageboardToml) -> Self {
        Self {
            port: toml.port(),
            host: toml.server.host.clone(),
            dev_mode: toml.server.dev_mode,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Serve the hub until Ctrl+C.
pub async fn start_server(config: ServerConfig, hub: PipelineHub) -> Result<()> {
    let state = Arc::new(AppState { hub });
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "stageboard server listening");
    println!("Stageboard running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DEFAULT_PERSIST_TIMEOUT;
    use crate::store::{BoardDb, DbHandle};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use stageboard_common::PipelineBinding;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let store = Arc::new(DbHandle::new(BoardDb::new_in_memory().unwrap()));
        let bindings = vec![PipelineBinding::new("task".parse().unwrap(), "task_stage")];
        let hub = PipelineHub::with_store(bindings, store, DEFAULT_PERSIST_TIMEOUT).unwrap();
        build_router(Arc::new(AppState { hub }))
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_create_stage_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .method("POST")
            .uri("/api/pipelines/task/stages")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"display_name": "In Progress"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let stage: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(stage["key"], "in_progress");
        assert_eq!(stage["color"], "gray");
    }

    #[test]
    fn test_server_config_from_toml() {
        let toml = StageboardToml::parse("[server]\nhost = \"0.0.0.0\"\ndev_mode = true\n").unwrap();
        let config = ServerConfig::from_toml(&toml);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.dev_mode);
        assert_eq!(ServerConfig::default().port, 3142);
    }
}
