//! Turning spec files into live plugin handles for one protocol family.
//!
//! Each pass decides per driver whether to keep, replace or drop it:
//!
//! | existing handle            | outcome                                   |
//! |----------------------------|-------------------------------------------|
//! | same spec, probe ok        | kept as is, no reconnect                  |
//! | same spec, probe fails     | rebuilt and probed like a new driver      |
//! | spec changed or absent     | built fresh and probed                    |
//! | fresh probe fails          | dropped, fresh handle closed              |
//!
//! One bad driver never fails the pass; only an unreadable search
//! directory does.

use std::{path::PathBuf, sync::Arc};

use {
    async_trait::async_trait,
    tracing::{debug, info, warn},
    volbroker_plugins::{PluginFactory, Protocol, SharedPlugin},
};

#[cfg(feature = "metrics")]
use volbroker_metrics::{counter, discovery as discovery_metrics, labels};

use crate::{
    error::Result,
    locator::SpecLocator,
    registry::PluginMap,
    spec_file::decode,
};

/// Produces the complete set of usable plugins for one protocol family.
#[async_trait]
pub trait Discoverer: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Discover plugins, reusing healthy handles from `existing`.
    ///
    /// The result replaces this family's previous contribution entirely.
    /// Handles in `existing` are never closed here; they belong to the
    /// published snapshot until the caller replaces it.
    async fn discover(&self, existing: &PluginMap) -> Result<PluginMap>;
}

/// [`Discoverer`] backed by spec files in ordered search directories.
pub struct SpecDiscoverer {
    locator: SpecLocator,
    factory: Arc<dyn PluginFactory>,
}

impl SpecDiscoverer {
    pub fn new(search_paths: Vec<PathBuf>, factory: Arc<dyn PluginFactory>) -> Self {
        Self {
            locator: SpecLocator::new(search_paths),
            factory,
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        self.locator.search_paths()
    }

    fn rejected(&self, reason: &'static str) {
        #[cfg(feature = "metrics")]
        counter!(
            discovery_metrics::DRIVERS_REJECTED_TOTAL,
            labels::PROTOCOL => self.protocol().as_str(),
            labels::REASON => reason
        )
        .increment(1);
        #[cfg(not(feature = "metrics"))]
        let _ = reason;
    }
}

#[async_trait]
impl Discoverer for SpecDiscoverer {
    fn protocol(&self) -> Protocol {
        self.factory.protocol()
    }

    async fn discover(&self, existing: &PluginMap) -> Result<PluginMap> {
        let protocol = self.protocol();
        let mut found = PluginMap::new();

        for location in self.locator.locate()? {
            let spec = match decode(&location) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(driver = %location.name, %protocol, error = %e, "skipping unreadable spec");
                    self.rejected("decode");
                    continue;
                },
            };

            let current = existing
                .get(&spec.name)
                .filter(|plugin| plugin.protocol() == protocol);

            if let Some(current) = current
                && current.matches(&spec)
            {
                match current.probe().await {
                    Ok(()) => {
                        debug!(driver = %spec.name, %protocol, "keeping existing handle");
                        found.insert(spec.name.clone(), Arc::clone(current));
                        continue;
                    },
                    Err(e) => warn!(
                        driver = %spec.name,
                        %protocol,
                        error = %e,
                        "existing handle failed probe, reconnecting"
                    ),
                }
            }

            let fresh: SharedPlugin = match self.factory.build(&spec).await {
                Ok(plugin) => plugin,
                Err(e) => {
                    warn!(
                        driver = %spec.name,
                        address = %spec.address,
                        error = %e,
                        "failed to build plugin handle"
                    );
                    self.rejected("build");
                    continue;
                },
            };
            #[cfg(feature = "metrics")]
            counter!(
                discovery_metrics::HANDLES_CREATED_TOTAL,
                labels::PROTOCOL => protocol.as_str()
            )
            .increment(1);

            if let Err(e) = fresh.probe().await {
                warn!(
                    driver = %spec.name,
                    address = %spec.address,
                    error = %e,
                    "plugin failed liveness probe, omitting"
                );
                fresh.close().await;
                self.rejected("probe");
                continue;
            }

            // The superseded handle stays open until the syncer publishes
            // its replacement.
            if current.is_some() {
                info!(driver = %spec.name, %protocol, address = %spec.address, "plugin replaced");
            } else {
                info!(driver = %spec.name, %protocol, address = %spec.address, "plugin discovered");
            }
            found.insert(spec.name.clone(), fresh);
        }

        Ok(found)
    }
}
