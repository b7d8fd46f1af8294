use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the series.
    /// Returns `None` if another recorder is already installed.
    pub fn init() -> Option<Self> {
        static INSTALLED: OnceCell<Option<PrometheusHandle>> = OnceCell::new();
        let handle = INSTALLED.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(h) => {
                describe();
                Some(h)
            }
            Err(e) => {
                warn!(error = %e, "prometheus recorder not installed");
                None
            }
        });
        handle.clone().map(|handle| Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("readme_fetch_total", "README fetches by outcome.");
    describe_counter!(
        "readme_fetch_attempts_total",
        "HTTP attempts against raw README URLs."
    );
    describe_gauge!("fetch_workflows_tracked", "Fetch workflows currently retained.");
    describe_counter!(
        "model_invoke_attempts_total",
        "Attempts to open a model stream."
    );
    describe_counter!(
        "model_invoke_failures_total",
        "Requests that exhausted the model attempt budget."
    );
    describe_counter!("relay_frames_total", "Content frames relayed to clients.");
    describe_counter!(
        "relay_raw_fragments_total",
        "Provider events forwarded raw after failing JSON decoding."
    );
}
