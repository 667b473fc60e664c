//! The authoritative name → plugin snapshot served to callers.

use std::{collections::HashMap, sync::Arc};

use {
    tokio::sync::RwLock,
    tracing::debug,
    volbroker_plugins::SharedPlugin,
};

#[cfg(feature = "metrics")]
use volbroker_metrics::{gauge, registry as registry_metrics};

/// Plugins keyed by driver name.
pub type PluginMap = HashMap<String, SharedPlugin>;

/// Many readers, one writer. Readers always get a complete snapshot; the
/// writer replaces the whole map and never edits it in place.
///
/// A handle obtained from a snapshot stays usable after the registry moves
/// on, so in-flight calls are never cut off by a swap.
#[derive(Default)]
pub struct PluginRegistry {
    snapshot: RwLock<Arc<PluginMap>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    pub async fn plugins(&self) -> Arc<PluginMap> {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn plugin(&self, name: &str) -> Option<SharedPlugin> {
        self.snapshot.read().await.get(name).cloned()
    }

    /// Replace the whole map, returning the snapshot it supersedes.
    pub async fn set(&self, plugins: PluginMap) -> Arc<PluginMap> {
        let count = plugins.len();
        let previous = std::mem::replace(&mut *self.snapshot.write().await, Arc::new(plugins));

        #[cfg(feature = "metrics")]
        gauge!(registry_metrics::PLUGINS).set(count as f64);
        debug!(plugins = count, "registry snapshot replaced");

        previous
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.is_empty()
    }
}
