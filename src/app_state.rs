use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::artifacts::ArtifactStore;
use crate::services::extraction::ExtractionBackend;
use crate::services::normalize::NormalizeOptions;
use crate::services::notifier::CallbackNotifier;

/// Shared application state passed to all route handlers.
///
/// The extraction backend is injected as a trait object so tests can swap in
/// a fake without touching the orchestrator.
#[derive(Clone)]
pub struct AppState {
    pub artifacts: Arc<ArtifactStore>,
    pub extractor: Arc<dyn ExtractionBackend>,
    pub notifier: Arc<CallbackNotifier>,
    /// Client used to fetch source images by URL.
    pub fetch: reqwest::Client,
    pub fetch_timeout: Duration,
    pub normalize_options: NormalizeOptions,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        artifacts: ArtifactStore,
        extractor: Arc<dyn ExtractionBackend>,
    ) -> Self {
        Self {
            artifacts: Arc::new(artifacts),
            extractor,
            notifier: Arc::new(CallbackNotifier::new(Duration::from_secs(
                config.callback_timeout_secs,
            ))),
            fetch: reqwest::Client::new(),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            normalize_options: NormalizeOptions {
                max_dimension: config.max_dimension,
            },
        }
    }
}
