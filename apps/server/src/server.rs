//! Download Server
//!
//! HTTP server exposing the gated download endpoint.
//!
//! Routes:
//! - `GET /special-download/:key` streams the file as an attachment, or
//!   renders an error page
//! - `GET /download-status/:key` reports usage counters as JSON
//! - `GET /ping` health check

use crate::{client_ip, render};
use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use keygate_core::{DeliveryFile, KeygateCore};
use keygate_types::Decision;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

// ============================================================================
// Response types
// ============================================================================

/// JSON error body for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Shared state
// ============================================================================

pub struct ServerState {
    pub core: KeygateCore,
}

type SharedState = Arc<ServerState>;

// ============================================================================
// Download Server
// ============================================================================

pub struct DownloadServer {
    core: KeygateCore,
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl DownloadServer {
    pub fn new(core: KeygateCore, addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        Self {
            core,
            addr,
            shutdown_tx,
        }
    }

    /// Serve until [`DownloadServer::stop`] is called
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = router(self.core.clone());

        tracing::info!("Download server starting on http://{}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

        tracing::info!("Download server stopped");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Build the HTTP router
pub fn router(core: KeygateCore) -> Router {
    let shared_state = Arc::new(ServerState { core });

    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/special-download/:key", get(handle_download))
        .route("/download-status/:key", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// GET /special-download/:key
async fn handle_download(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let settings = match state.core.reload_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            return render::internal_error();
        }
    };
    let client_id = client_ip::client_id(&headers, peer, settings.trust_forwarded_for);

    match state.core.authorize(&key, &client_id).await {
        Ok(Decision::Allow(grant)) => match state.core.open_delivery(&grant).await {
            Ok(delivery) => attachment(delivery),
            Err(e) => {
                error!(
                    resource_id = grant.resource.id,
                    client = %client_id,
                    "Failed to deliver granted download: {}",
                    e
                );
                render::delivery_failure()
            }
        },
        Ok(Decision::Deny(denial)) => render::denial(&denial, settings.deny_policy),
        Err(e) => {
            error!(client = %client_id, "Authorization failed: {}", e);
            render::internal_error()
        }
    }
}

/// GET /download-status/:key
async fn handle_status(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    let status = match state.core.reload_settings().await {
        Ok(_) => state.core.status_by_key(&key).await,
        Err(e) => Err(e),
    };
    match status {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Invalid download key.".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Status lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Status unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Stream an opened file as an attachment
///
/// A client disconnect just drops the stream; the consumption is already
/// recorded.
fn attachment(delivery: DeliveryFile) -> Response {
    let disposition = HeaderValue::from_str(&delivery.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let file_name = delivery.file_name.clone();

    let stream = ReaderStream::new(delivery.file).inspect_err(move |e| {
        warn!(file = %file_name, "Download stream aborted: {}", e);
    });

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_LENGTH, HeaderValue::from(delivery.len)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keygate_types::{DenyPolicy, ResourceOptions, Settings};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const PEER: ([u8; 4], u16) = ([203, 0, 113, 7], 40000);

    async fn setup(limit: u32) -> (TempDir, KeygateCore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("guide.pdf");
        std::fs::write(&file, b"%PDF-1.7 guide").unwrap();

        let core = KeygateCore::new(dir.path().join("data")).await.unwrap();
        core.create_resource(ResourceOptions {
            title: Some("Guide".to_string()),
            secret_key: Some("secret123".to_string()),
            download_limit: Some(limit),
            file_path: Some(file.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
        (dir, core, file)
    }

    fn app(core: &KeygateCore) -> Router {
        router(core.clone()).layer(MockConnectInfo(SocketAddr::from(PEER)))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, HeaderMap, String) {
        get_with(app, Request::builder().uri(uri)).await
    }

    async fn get_with(
        app: Router,
        builder: axum::http::request::Builder,
    ) -> (StatusCode, HeaderMap, String) {
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, core, _) = setup(1).await;
        let (status, _, body) = get(app(&core), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn test_valid_key_streams_attachment() {
        let (_dir, core, _) = setup(1).await;
        let (status, headers, body) = get(app(&core), "/special-download/secret123").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"guide.pdf\""
        );
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "14");
        assert_eq!(body, "%PDF-1.7 guide");

        let resource = core.list_resources().await.unwrap().remove(0);
        assert_eq!(resource.download_count, 1);
        let clients = core.list_consumed_clients(resource.id).await.unwrap();
        assert_eq!(clients[0].client_id, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_unknown_key_is_404() {
        let (_dir, core, _) = setup(1).await;
        let (status, _, body) = get(app(&core), "/special-download/wrong").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Invalid download key."));
    }

    #[tokio::test]
    async fn test_exhausted_key_renders_page_by_default() {
        let (_dir, core, _) = setup(1).await;
        get(app(&core), "/special-download/secret123").await;

        let (status, headers, body) = get_with(
            app(&core),
            Request::builder().uri("/special-download/secret123"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::CONTENT_DISPOSITION).is_none());
        assert!(body.contains("Download Limit Reached"));
        assert!(body.contains("the download limit of 1 for &quot;Guide&quot;"));
    }

    #[tokio::test]
    async fn test_forbidden_policy_returns_403() {
        let (_dir, core, _) = setup(1).await;
        core.update_settings(Settings {
            deny_policy: DenyPolicy::Forbidden,
            ..Settings::default()
        })
        .await
        .unwrap();
        get(app(&core), "/special-download/secret123").await;

        let (status, _, body) = get(app(&core), "/special-download/secret123").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("Download Limit Reached"));
    }

    #[tokio::test]
    async fn test_repeat_client_is_told_its_address() {
        let (_dir, core, _) = setup(5).await;
        get(app(&core), "/special-download/secret123").await;

        let (status, _, body) = get(app(&core), "/special-download/secret123").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Already Downloaded"));
        assert!(body.contains("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_trusted_forwarded_for_identifies_clients() {
        let (_dir, core, _) = setup(5).await;
        core.update_settings(Settings {
            trust_forwarded_for: true,
            ..Settings::default()
        })
        .await
        .unwrap();

        for ip in ["1.1.1.1", "2.2.2.2"] {
            let (status, headers, _) = get_with(
                app(&core),
                Request::builder()
                    .uri("/special-download/secret123")
                    .header("x-forwarded-for", ip),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert!(headers.get(header::CONTENT_DISPOSITION).is_some());
        }

        let resource = core.list_resources().await.unwrap().remove(0);
        assert_eq!(resource.download_count, 2);
    }

    #[tokio::test]
    async fn test_missing_file_page() {
        let (_dir, core, file) = setup(1).await;
        std::fs::remove_file(&file).unwrap();

        let (status, _, body) = get(app(&core), "/special-download/secret123").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("File Not Found"));
        assert_eq!(core.list_resources().await.unwrap()[0].download_count, 0);
    }

    #[tokio::test]
    async fn test_settings_saved_elsewhere_apply_without_restart() {
        let (dir, core, _) = setup(5).await;
        let admin = KeygateCore::new(dir.path().join("data")).await.unwrap();
        admin
            .update_settings(Settings {
                deny_policy: DenyPolicy::Forbidden,
                track_clients: false,
                ..Settings::default()
            })
            .await
            .unwrap();

        // Without tracking the same client may download again
        for _ in 0..2 {
            let (status, headers, _) = get(app(&core), "/special-download/secret123").await;
            assert_eq!(status, StatusCode::OK);
            assert!(headers.get(header::CONTENT_DISPOSITION).is_some());
        }

        admin
            .update_settings(Settings {
                deny_policy: DenyPolicy::Forbidden,
                ..Settings::default()
            })
            .await
            .unwrap();
        get(app(&core), "/special-download/secret123").await;
        let (status, _, body) = get(app(&core), "/special-download/secret123").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("Already Downloaded"));
        assert_eq!(core.get_settings().await.deny_policy, DenyPolicy::Forbidden);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (_dir, core, _) = setup(3).await;
        get(app(&core), "/special-download/secret123").await;

        let (status, _, body) = get(app(&core), "/download-status/secret123").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["download_count"], 1);
        assert_eq!(json["download_limit"], 3);
        assert_eq!(json["remaining"], 2);

        let (status, _, _) = get(app(&core), "/download-status/wrong").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
