//! Docker volume plugin protocol.
//!
//! Activation must advertise the configured capability (normally
//! `VolumeDriver`). Mounting creates the volume first, as Docker itself does,
//! so drivers that lazily create volumes work unchanged.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tokio::sync::RwLock,
    tracing::{debug, info},
};

use crate::{
    docker_transport::{DriverTransport, HttpDriverTransport, UnixDriverTransport},
    error::{Error, PluginError, Result},
    retry::RetryPolicy,
    traits::{MountOptions, Plugin, PluginFactory, SharedPlugin},
    types::{Endpoint, PluginSpec, Protocol},
};

pub const DEFAULT_CAPABILITY: &str = "VolumeDriver";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ActivateReply {
    implements: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ErrReply {
    err: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MountReply {
    mountpoint: String,
    err: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VolumeEntry {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ListReply {
    volumes: Vec<VolumeEntry>,
    err: String,
}

/// Shared knobs for Docker plugin handles.
#[derive(Clone)]
pub struct DockerSettings {
    pub required_capability: String,
    pub retry: RetryPolicy,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            required_capability: DEFAULT_CAPABILITY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct DockerPlugin {
    spec: PluginSpec,
    settings: DockerSettings,
    transport: RwLock<Option<Arc<dyn DriverTransport>>>,
}

impl DockerPlugin {
    pub fn new(spec: PluginSpec, transport: Arc<dyn DriverTransport>, settings: DockerSettings) -> Self {
        Self {
            spec,
            settings,
            transport: RwLock::new(Some(transport)),
        }
    }

    async fn transport(&self) -> Result<Arc<dyn DriverTransport>> {
        self.transport.read().await.clone().ok_or_else(|| {
            PluginError::Closed {
                driver: self.spec.name.clone(),
            }
            .into()
        })
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let transport = self.transport().await?;
        let transport = &transport;
        let body = &body;
        let reply = self
            .settings
            .retry
            .run(&self.spec.name, path, move || async move { transport.post(path, body).await })
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    fn driver_error(&self, err: String) -> Result<()> {
        if err.is_empty() {
            return Ok(());
        }
        Err(PluginError::Driver {
            driver: self.spec.name.clone(),
            message: err,
        }
        .into())
    }
}

#[async_trait]
impl Plugin for DockerPlugin {
    fn protocol(&self) -> Protocol {
        Protocol::Docker
    }

    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    async fn probe(&self) -> Result<()> {
        let reply: ActivateReply = self.call("/Plugin.Activate", json!({})).await?;
        let required = &self.settings.required_capability;
        if reply.implements.is_empty() {
            return Err(PluginError::Incompatible {
                driver: self.spec.name.clone(),
                reason: "activation advertised no capabilities".into(),
            }
            .into());
        }
        if !reply.implements.iter().any(|c| c == required) {
            return Err(PluginError::Incompatible {
                driver: self.spec.name.clone(),
                reason: format!(
                    "missing capability {required}, advertised {:?}",
                    reply.implements
                ),
            }
            .into());
        }
        debug!(driver = %self.spec.name, implements = ?reply.implements, "driver activated");
        Ok(())
    }

    async fn mount(&self, volume_id: &str, opts: &MountOptions) -> Result<String> {
        let created: ErrReply = self
            .call("/VolumeDriver.Create", json!({ "Name": volume_id, "Opts": opts }))
            .await?;
        self.driver_error(created.err)?;

        let mounted: MountReply = self
            .call("/VolumeDriver.Mount", json!({ "Name": volume_id }))
            .await?;
        self.driver_error(mounted.err)?;
        if mounted.mountpoint.is_empty() {
            return Err(Error::message(format!(
                "driver '{}' mounted '{volume_id}' without reporting a mountpoint",
                self.spec.name
            )));
        }

        info!(driver = %self.spec.name, volume = volume_id, path = %mounted.mountpoint, "volume mounted");
        Ok(mounted.mountpoint)
    }

    async fn unmount(&self, volume_id: &str) -> Result<()> {
        let reply: ErrReply = self
            .call("/VolumeDriver.Unmount", json!({ "Name": volume_id }))
            .await?;
        self.driver_error(reply.err)?;
        info!(driver = %self.spec.name, volume = volume_id, "volume unmounted");
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let reply: ListReply = self.call("/VolumeDriver.List", json!({})).await?;
        self.driver_error(reply.err)?;
        Ok(reply.volumes.into_iter().map(|v| v.name).collect())
    }

    async fn close(&self) {
        if self.transport.write().await.take().is_some() {
            debug!(driver = %self.spec.name, "driver handle closed");
        }
    }
}

/// Builds [`DockerPlugin`] handles over HTTP or unix-socket transports.
#[derive(Clone, Default)]
pub struct DockerPluginFactory {
    settings: DockerSettings,
}

impl DockerPluginFactory {
    pub fn new(settings: DockerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PluginFactory for DockerPluginFactory {
    fn protocol(&self) -> Protocol {
        Protocol::Docker
    }

    async fn build(&self, spec: &PluginSpec) -> Result<SharedPlugin> {
        let transport: Arc<dyn DriverTransport> = match spec.endpoint()? {
            Endpoint::Unix(path) => Arc::new(UnixDriverTransport::new(&spec.name, path)),
            Endpoint::Http(url) => {
                Arc::new(HttpDriverTransport::new(&spec.name, url, spec.tls.as_ref())?)
            },
        };
        debug!(driver = %spec.name, address = %transport.address(), "built docker driver handle");
        Ok(Arc::new(DockerPlugin::new(
            spec.clone(),
            transport,
            self.settings.clone(),
        )))
    }
}
