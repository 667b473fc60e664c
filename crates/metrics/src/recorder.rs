//! Metrics recorder initialization.

use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
}

/// Handle used by the `/metrics` route to render collected metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Handle that renders nothing.
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "prometheus")]
            prometheus_handle: None,
        }
    }

    /// Render metrics in Prometheus text format (empty when disabled).
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        if let Some(handle) = &self.prometheus_handle {
            return handle.render();
        }
        String::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Labels attached to every metric, e.g. `("node", "cell-3")`.
    pub global_labels: Vec<(String, String)>,
}

/// Install the global recorder. Call once at startup.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle, Error> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle::disabled());
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics recorder installed");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics requested but the prometheus feature is not compiled in");
        Ok(MetricsHandle::disabled())
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle, Error> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    let install = |e: metrics_exporter_prometheus::BuildError| Error::Install(e.to_string());
    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(crate::discovery::CYCLE_DURATION_SECONDS.to_string()),
            &crate::buckets::CYCLE_DURATION,
        )
        .map_err(install)?;
    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder.install_recorder().map_err(install)
}
