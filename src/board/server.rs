use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::ws;
use crate::autosave::AutosaveConfig;
use crate::store::open_board_store;
use crate::telemetry::trace_layer;

/// Configuration for the board server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub autosave: AutosaveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: PathBuf::from(".taskboard/board.db"),
            dev_mode: false,
            autosave: AutosaveConfig::default(),
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(trace_layer())
        .with_state(state)
}

/// Start the board server and run until ctrl-c.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let store = open_board_store(&config.db_path).context("Failed to initialize board database")?;
    let state = Arc::new(AppState::new(store, config.autosave));

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(db = %config.db_path.display(), dev = config.dev_mode, "board database ready");
    println!("Taskboard running at http://{}", local_addr);

    let (stop_tx, stop_rx) = oneshot::channel();
    let signal = tokio::spawn(shutdown_signal(tokio::signal::ctrl_c(), stop_tx));

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = stop_rx.await;
        })
        .await
        .context("Server error")?;

    signal.await.context("Shutdown listener panicked")??;

    println!("Server shut down gracefully.");
    Ok(())
}

/// Wait for `signal`, then tell the server to stop. A signal listener that
/// cannot be installed also stops the server, and its error is returned.
async fn shutdown_signal<F>(signal: F, stop: oneshot::Sender<()>) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let result = signal.await.context("Failed to install Ctrl+C handler");
    match &result {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "signal listener failed, stopping server")
        }
    }
    let _ = stop.send(());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::{BoardDb, DbHandle};
    use crate::store::BoardStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState::new(
            BoardStore::new(DbHandle::new(db), ws_tx),
            AutosaveConfig::default(),
        ));
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/projects")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let app = test_router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = test_router();
        let req = Request::builder()
            .uri("/some/client/route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_create_project_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .method("POST")
            .uri("/api/projects")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"name": "server-test"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let project: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(project["name"], "server-test");
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3141);
        assert_eq!(config.db_path, PathBuf::from(".taskboard/board.db"));
        assert!(!config.dev_mode);
        assert_eq!(config.autosave, AutosaveConfig::default());
    }

    #[tokio::test]
    async fn test_config_route_via_full_router() {
        let req = Request::builder()
            .uri("/api/config")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["autosave"]["debounce_ms"], 500);
        assert_eq!(body["autosave"]["grace_window_ms"], 2000);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_server_on_ctrl_c() {
        let (tx, rx) = oneshot::channel();
        shutdown_signal(std::future::ready(Ok(())), tx).await.unwrap();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_signal_install_failure_is_an_error() {
        let (tx, rx) = oneshot::channel();
        let signal = std::future::ready(Err(std::io::Error::other("no signal driver")));

        let err = shutdown_signal(signal, tx).await.unwrap_err();
        assert!(err.to_string().contains("Ctrl+C"));
        assert!(format!("{:#}", err).contains("no signal driver"));
        assert!(rx.await.is_ok());
    }
}
