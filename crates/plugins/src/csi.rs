//! CSI node plugins.
//!
//! The broker publishes volumes into `<mounts_root>/<driver>/<volume_id>`
//! and treats the directories there as the list of mounted volumes, since
//! CSI node plugins have no listing call of their own.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{fs, sync::RwLock},
    tracing::{debug, info, warn},
};

use crate::{
    csi_client::{CsiNodeClient, GrpcCsiClient},
    csi_proto::{NodePublishVolumeRequest, NodeUnpublishVolumeRequest, Version, VolumeCapability},
    error::{Context, Error, PluginError, Result},
    retry::RetryPolicy,
    traits::{MountOptions, Plugin, PluginFactory, SharedPlugin},
    types::{PluginSpec, Protocol},
};

pub const DEFAULT_CSI_VERSION: Version = Version::new(0, 1, 0);

/// Shared knobs for CSI plugin handles.
#[derive(Clone)]
pub struct CsiSettings {
    pub required_version: Version,
    pub mounts_root: PathBuf,
    pub retry: RetryPolicy,
}

impl CsiSettings {
    pub fn new(required_version: Version, mounts_root: impl Into<PathBuf>) -> Self {
        Self {
            required_version,
            mounts_root: mounts_root.into(),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub struct CsiPlugin {
    spec: PluginSpec,
    settings: CsiSettings,
    client: RwLock<Option<Arc<dyn CsiNodeClient>>>,
}

impl CsiPlugin {
    pub fn new(spec: PluginSpec, client: Arc<dyn CsiNodeClient>, settings: CsiSettings) -> Self {
        Self {
            spec,
            settings,
            client: RwLock::new(Some(client)),
        }
    }

    async fn client(&self) -> Result<Arc<dyn CsiNodeClient>> {
        self.client.read().await.clone().ok_or_else(|| {
            PluginError::Closed {
                driver: self.spec.name.clone(),
            }
            .into()
        })
    }

    fn driver_root(&self) -> PathBuf {
        self.settings.mounts_root.join(&self.spec.name)
    }

    fn target_path(&self, volume_id: &str) -> Result<PathBuf> {
        let valid = !volume_id.is_empty()
            && volume_id != "."
            && volume_id != ".."
            && !volume_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(PluginError::InvalidVolumeId {
                volume_id: volume_id.to_string(),
            }
            .into());
        }
        Ok(self.driver_root().join(volume_id))
    }
}

/// CSI volume attributes are strings; other JSON values keep their JSON text.
fn volume_attributes(opts: &MountOptions) -> HashMap<String, String> {
    opts.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

async fn remove_target(path: &Path) {
    match fs::remove_dir(path).await {
        Ok(()) => {},
        Err(err) if err.kind() == io::ErrorKind::NotFound => {},
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove mount target"),
    }
}

#[async_trait]
impl Plugin for CsiPlugin {
    fn protocol(&self) -> Protocol {
        Protocol::Csi
    }

    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    async fn probe(&self) -> Result<()> {
        let client = self.client().await?;
        let client = &client;
        let required = self.settings.required_version;

        let versions = self
            .settings
            .retry
            .run(&self.spec.name, "GetSupportedVersions", move || async move {
                client.get_supported_versions().await
            })
            .await?;
        if !versions.contains(&required) {
            let offered: Vec<String> = versions.iter().map(ToString::to_string).collect();
            return Err(PluginError::Incompatible {
                driver: self.spec.name.clone(),
                reason: format!("requires CSI {required}, plugin supports [{}]", offered.join(", ")),
            }
            .into());
        }

        let info = client.get_plugin_info(required).await?;
        debug!(
            driver = %self.spec.name,
            plugin = %info.name,
            vendor_version = %info.vendor_version,
            "CSI plugin identified"
        );
        Ok(())
    }

    async fn mount(&self, volume_id: &str, opts: &MountOptions) -> Result<String> {
        let client = self.client().await?;
        let target = self.target_path(volume_id)?;
        fs::create_dir_all(&target)
            .await
            .with_context(|| format!("failed to create mount target {}", target.display()))?;

        let request = NodePublishVolumeRequest {
            version: Some(self.settings.required_version),
            volume_id: volume_id.to_string(),
            target_path: target.to_string_lossy().into_owned(),
            volume_capability: Some(VolumeCapability::single_node_mount()),
            volume_attributes: volume_attributes(opts),
            ..Default::default()
        };
        if let Err(err) = client.node_publish_volume(request).await {
            remove_target(&target).await;
            return Err(err);
        }

        info!(driver = %self.spec.name, volume = volume_id, path = %target.display(), "volume published");
        Ok(target.to_string_lossy().into_owned())
    }

    async fn unmount(&self, volume_id: &str) -> Result<()> {
        let client = self.client().await?;
        let target = self.target_path(volume_id)?;
        client
            .node_unpublish_volume(NodeUnpublishVolumeRequest {
                version: Some(self.settings.required_version),
                volume_id: volume_id.to_string(),
                target_path: target.to_string_lossy().into_owned(),
                ..Default::default()
            })
            .await?;
        remove_target(&target).await;
        info!(driver = %self.spec.name, volume = volume_id, "volume unpublished");
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        self.client().await?;
        let root = self.driver_root();
        let mut entries = match fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::from(err)),
        };

        let mut volumes = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                volumes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        volumes.sort();
        Ok(volumes)
    }

    async fn close(&self) {
        if self.client.write().await.take().is_some() {
            debug!(driver = %self.spec.name, "CSI handle closed");
        }
    }
}

/// Builds [`CsiPlugin`] handles over gRPC.
#[derive(Clone)]
pub struct CsiPluginFactory {
    settings: CsiSettings,
}

impl CsiPluginFactory {
    pub fn new(settings: CsiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PluginFactory for CsiPluginFactory {
    fn protocol(&self) -> Protocol {
        Protocol::Csi
    }

    async fn build(&self, spec: &PluginSpec) -> Result<SharedPlugin> {
        let endpoint = spec.endpoint()?;
        let client = GrpcCsiClient::connect_lazy(&spec.name, &endpoint, spec.tls.as_ref())?;
        debug!(driver = %spec.name, address = %endpoint, "built CSI plugin handle");
        Ok(Arc::new(CsiPlugin::new(
            spec.clone(),
            Arc::new(client),
            self.settings.clone(),
        )))
    }
}
