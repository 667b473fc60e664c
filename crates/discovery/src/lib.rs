//! Plugin discovery for volbroker.
//!
//! Spec files in configured search directories are located and decoded,
//! turned into probed plugin handles per protocol family, merged into a
//! single [`PluginRegistry`] and refreshed on an interval by the
//! [`Syncer`].

pub mod discoverer;
pub mod error;
pub mod locator;
pub mod purge;
pub mod registry;
pub mod spec_file;
pub mod syncer;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod testing;

pub use {
    discoverer::{Discoverer, SpecDiscoverer},
    error::{Error, Result},
    locator::{SpecKind, SpecLocation, SpecLocator},
    purge::{PurgeReport, purge_mounts},
    registry::{PluginMap, PluginRegistry},
    spec_file::{canonicalize_address, decode},
    syncer::Syncer,
};
