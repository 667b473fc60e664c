//! Configuration loading, env substitution, and validation.
//!
//! Config files: `volbroker.toml`, `volbroker.yaml`, or `volbroker.json`
//! Searched in `./` then `~/.config/volbroker/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        BrokerConfig, CsiConfig, DockerConfig, MetricsConfig, ProbeConfig, ServerConfig,
        SyncConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
