//! Application state shared across handlers.

use crate::service::UploadService;
use cask_core::config::AppConfig;
use cask_signer::LinkSigner;
use cask_storage::BlockStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Block storage backend.
    pub storage: Arc<dyn BlockStore>,
    /// Upload pipeline.
    pub service: Arc<UploadService>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The configuration is expected to have been validated already.
    pub fn new(config: AppConfig, storage: Arc<dyn BlockStore>, signer: LinkSigner) -> Self {
        let config = Arc::new(config);
        let service = Arc::new(UploadService::new(config.clone(), storage.clone(), signer));

        Self {
            config,
            storage,
            service,
        }
    }
}
