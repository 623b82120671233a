//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use cask_core::config::AppConfig;
use cask_server::{AppState, UploadService, create_router};
use cask_signer::{AccountKey, LinkSigner};
use cask_storage::{BlockStore, MemoryBackend};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Test configuration: in-memory store, no spooling, millisecond retries.
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

/// A signer paired with a copy of its key, so tests can verify links.
#[allow(dead_code)]
pub fn test_signer(config: &AppConfig) -> (LinkSigner, LinkSigner) {
    let key = AccountKey::generate();
    let copy = AccountKey::from_base64(&key.to_base64()).unwrap();
    let issuer = LinkSigner::new(config.link.account.clone(), &config.link.endpoint, key).unwrap();
    let verifier =
        LinkSigner::new(config.link.account.clone(), &config.link.endpoint, copy).unwrap();
    (issuer, verifier)
}

/// Build an upload service over `store`.
#[allow(dead_code)]
pub fn test_service(config: AppConfig, store: Arc<dyn BlockStore>) -> UploadService {
    let (signer, _) = test_signer(&config);
    UploadService::new(Arc::new(config), store, signer)
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server over an in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a test server with custom config modifications.
    ///
    /// Spool files go to a private temp dir.
    pub fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = test_config();
        config.staging.dir = Some(temp_dir.path().join("spool"));
        modifier(&mut config);

        let (signer, _) = test_signer(&config);
        let storage: Arc<dyn BlockStore> = Arc::new(MemoryBackend::new());
        let state = AppState::new(config, storage, signer);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and decode the JSON body (or `Null`).
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Vec<u8>,
    ) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Length", body.len())
            .body(Body::from(body))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, headers, json)
    }

    /// GET a path and return the raw body text.
    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }
}
