// crates/server/src/lib.rs
//! reelgrab server library.
//!
//! Axum HTTP surface over [`reelgrab_core::ConversionService`]: metadata
//! lookups, streamed conversions, SSE progress and cancellation.

pub mod error;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// When the config names a `static_dir`, unmatched paths are served from it
/// with `index.html` as the SPA fallback.
pub fn create_app(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new().merge(api_routes(state));
    let app = match static_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Serving static files");
            let index = dir.join("index.html");
            app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => app,
    };

    app.layer(cors).layer(TraceLayer::new_for_http())
}
