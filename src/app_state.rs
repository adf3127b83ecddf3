use std::sync::Arc;

use crate::services::{
    queue::TaskPublisher, status_store::JobStatusStore, token::TokenVerifier,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: JobStatusStore,
    pub verifier: Arc<TokenVerifier>,
    pub queue: Arc<dyn TaskPublisher>,
    /// Origin used when deriving thumbnail URLs, without trailing slash.
    pub public_base_url: Arc<str>,
}

impl AppState {
    pub fn new(
        store: JobStatusStore,
        verifier: TokenVerifier,
        queue: Arc<dyn TaskPublisher>,
        public_base_url: &str,
    ) -> Self {
        Self {
            store,
            verifier: Arc::new(verifier),
            queue,
            public_base_url: Arc::from(public_base_url.trim_end_matches('/')),
        }
    }
}
