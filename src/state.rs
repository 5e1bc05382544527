//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{session::SessionStore, upload_service::UploadService},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub uploads: UploadService,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let uploads = UploadService::new(&config);
        let sessions = SessionStore::new(config.password.as_str(), config.session_ttl_secs);
        Self {
            config: Arc::new(config),
            uploads,
            sessions,
        }
    }
}
