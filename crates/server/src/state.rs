// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use reelgrab_core::{AppConfig, ConversionService};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Effective configuration after file, env and CLI overrides.
    pub config: AppConfig,
    /// Owns the hub, the job registry, the limiter and the artifact store.
    pub service: Arc<ConversionService>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Arc<Self> {
        let service = Arc::new(ConversionService::new(&config));
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            service,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
