// src/lib.rs
// Public library surface for the server binary, the CLI client and integration tests.

pub mod api;
pub mod checklist;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod metrics;
pub mod relay;
pub mod retry;
pub mod rubric;
pub mod store;
pub mod workflow;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::checklist::{ValidationReport, ValidationRequirement};
pub use crate::client::{
    conversation_id_for, ResumedConversation, ValidatorClient, CHAT_FAILURE_REPLY,
};
pub use crate::config::ValidatorConfig;
pub use crate::fetcher::{FetchResult, ReadmeFetcher};
pub use crate::rubric::ConversationMode;

use axum::Router;
use tracing::info;

/// Build the full application router from the default config location.
/// `/metrics` is mounted only when `METRICS_ROUTE=1`.
pub async fn app() -> anyhow::Result<Router> {
    let cfg = ValidatorConfig::load_default()?;
    let state = AppState::from_config(&cfg)?;
    let mut app = router(state);

    let metrics_route = std::env::var("METRICS_ROUTE")
        .ok()
        .is_some_and(|v| v == "1");
    if metrics_route {
        if let Some(m) = crate::metrics::Metrics::init() {
            app = app.merge(m.router());
            info!("metrics route enabled at /metrics");
        }
    }
    Ok(app)
}
