use std::sync::Arc;

use {volbroker_discovery::PluginRegistry, volbroker_metrics::MetricsHandle};

/// Everything request handlers need, shared behind an `Arc`.
pub struct GatewayState {
    pub registry: Arc<PluginRegistry>,
    /// `None` when metrics collection is disabled.
    pub metrics_handle: Option<MetricsHandle>,
    pub version: String,
}

impl GatewayState {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            metrics_handle: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: MetricsHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
