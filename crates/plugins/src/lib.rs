//! Volume plugin handles for volbroker.
//!
//! This crate provides:
//! - the protocol-independent [`Plugin`] contract and its [`PluginFactory`]
//! - Docker volume drivers over HTTP or unix sockets (`docker`)
//! - CSI node plugins over gRPC (`csi`)
//!
//! Connection-level failures are retried with the backoff from
//! `volbroker-common`; anything the driver answers is returned as is.

pub mod csi;
pub mod csi_client;
pub mod csi_proto;
pub mod docker;
pub mod docker_transport;
pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use {
    csi::{CsiPlugin, CsiPluginFactory, CsiSettings, DEFAULT_CSI_VERSION},
    csi_client::{CsiNodeClient, GrpcCsiClient},
    csi_proto::Version,
    docker::{DEFAULT_CAPABILITY, DockerPlugin, DockerPluginFactory, DockerSettings},
    docker_transport::{DriverTransport, HttpDriverTransport, UnixDriverTransport},
    error::{Error, PluginError, Result},
    retry::RetryPolicy,
    traits::{MountOptions, Plugin, PluginFactory, SharedPlugin},
    types::{Endpoint, PluginSpec, Protocol, TlsConfig},
};
