//! Startup sweep that force-unmounts every volume the plugins still report.

use tracing::{info, warn};

#[cfg(feature = "metrics")]
use volbroker_metrics::{counter, labels, purge as purge_metrics};

use crate::registry::PluginRegistry;

/// What a purge pass touched. Failures are counted, never returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub plugins: usize,
    pub volumes_seen: usize,
    pub unmounted: usize,
    pub failures: usize,
}

/// Unmount every volume listed by every registered plugin.
///
/// Plugins are visited in name order and volumes in the order the plugin
/// lists them. A failing list skips that plugin; a failing unmount skips
/// that volume.
pub async fn purge_mounts(registry: &PluginRegistry) -> PurgeReport {
    let snapshot = registry.plugins().await;
    let mut names: Vec<&String> = snapshot.keys().collect();
    names.sort();

    let mut report = PurgeReport::default();
    for name in names {
        let plugin = &snapshot[name];
        report.plugins += 1;
        let protocol = plugin.protocol();

        let volumes = match plugin.list_volumes().await {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!(driver = %name, %protocol, error = %e, "purge: listing volumes failed");
                report.failures += 1;
                #[cfg(feature = "metrics")]
                counter!(purge_metrics::FAILURES_TOTAL, labels::PROTOCOL => protocol.as_str())
                    .increment(1);
                continue;
            },
        };

        report.volumes_seen += volumes.len();
        for volume in volumes {
            match plugin.unmount(&volume).await {
                Ok(()) => {
                    report.unmounted += 1;
                    #[cfg(feature = "metrics")]
                    counter!(purge_metrics::UNMOUNTED_TOTAL, labels::PROTOCOL => protocol.as_str())
                        .increment(1);
                },
                Err(e) => {
                    warn!(driver = %name, %protocol, volume = %volume, error = %e, "purge: unmount failed");
                    report.failures += 1;
                    #[cfg(feature = "metrics")]
                    counter!(purge_metrics::FAILURES_TOTAL, labels::PROTOCOL => protocol.as_str())
                        .increment(1);
                },
            }
        }
    }

    info!(
        plugins = report.plugins,
        volumes = report.volumes_seen,
        unmounted = report.unmounted,
        failures = report.failures,
        "purge complete"
    );
    report
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use volbroker_plugins::{Plugin, PluginSpec, Protocol, SharedPlugin};

    use {
        super::*,
        crate::{registry::PluginMap, testing::FakePlugin},
    };

    fn plugin(name: &str, volumes: &[&str]) -> FakePlugin {
        let mut plugin = FakePlugin::new(
            PluginSpec::new(name, "http://127.0.0.1:8080"),
            Protocol::Docker,
            Arc::default(),
        );
        plugin.volumes = volumes.iter().map(|v| v.to_string()).collect();
        plugin
    }

    async fn registry_with(plugins: Vec<Arc<FakePlugin>>) -> PluginRegistry {
        let registry = PluginRegistry::new();
        let map: PluginMap = plugins
            .into_iter()
            .map(|p| {
                let name = p.spec().name.clone();
                (name, p as SharedPlugin)
            })
            .collect();
        registry.set(map).await;
        registry
    }

    #[tokio::test]
    async fn unmounts_each_listed_volume_once() {
        let foo = Arc::new(plugin("foo", &["a-volume"]));
        let registry = registry_with(vec![Arc::clone(&foo)]).await;

        let report = purge_mounts(&registry).await;

        assert_eq!(*foo.unmounted.lock().unwrap(), vec!["a-volume".to_string()]);
        assert_eq!(report, PurgeReport {
            plugins: 1,
            volumes_seen: 1,
            unmounted: 1,
            failures: 0,
        });
    }

    #[tokio::test]
    async fn failures_are_counted_and_the_sweep_continues() {
        let mut busy = plugin("busy", &["v1", "v2", "v3"]);
        busy.failing_unmounts = HashSet::from(["v2".to_string()]);
        let busy = Arc::new(busy);
        let mut broken = plugin("broken", &["never"]);
        broken.fail_list = true;
        let broken = Arc::new(broken);
        let registry = registry_with(vec![Arc::clone(&busy), Arc::clone(&broken)]).await;

        let report = purge_mounts(&registry).await;

        assert_eq!(*busy.unmounted.lock().unwrap(), vec!["v1", "v2", "v3"]);
        assert!(broken.unmounted.lock().unwrap().is_empty());
        assert_eq!(report, PurgeReport {
            plugins: 2,
            volumes_seen: 3,
            unmounted: 2,
            failures: 2,
        });
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let report = purge_mounts(&PluginRegistry::new()).await;
        assert_eq!(report, PurgeReport::default());
    }
}
