//! The protocol-independent plugin contract.
//!
//! Discovery, the registry and the HTTP front end only ever see
//! [`Plugin`] and [`PluginFactory`]; the Docker and CSI modules provide the
//! concrete implementations.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
};

use crate::{
    error::Result,
    types::{PluginSpec, Protocol},
};

/// Mount options passed through to the driver.
pub type MountOptions = Map<String, Value>;

/// A live handle to one volume driver.
///
/// A handle owns its connection until [`Plugin::close`] is called. Calls
/// made after `close` fail with [`crate::PluginError::Closed`]; calls
/// already in flight are allowed to finish.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// The spec this handle was built from.
    fn spec(&self) -> &PluginSpec;

    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Whether this handle was built from exactly `spec`.
    fn matches(&self, spec: &PluginSpec) -> bool {
        self.spec() == spec
    }

    /// Confirm the driver is reachable and speaks what the broker requires.
    async fn probe(&self) -> Result<()>;

    /// Mount `volume_id`, returning the host path it is mounted at.
    async fn mount(&self, volume_id: &str, opts: &MountOptions) -> Result<String>;

    async fn unmount(&self, volume_id: &str) -> Result<()>;

    /// Names of the volumes the driver currently has.
    async fn list_volumes(&self) -> Result<Vec<String>>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

pub type SharedPlugin = Arc<dyn Plugin>;

/// Builds connected-but-unverified handles for one protocol family.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Construct a handle for `spec`. Must not probe it.
    async fn build(&self, spec: &PluginSpec) -> Result<SharedPlugin>;
}
