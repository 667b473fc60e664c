//! In-memory plugins and factories for unit tests.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    volbroker_plugins::{
        MountOptions, Plugin, PluginError, PluginFactory, PluginSpec, Protocol, Result,
        SharedPlugin,
    },
};

/// Addresses that currently fail to probe or to build, shared between a
/// factory and every plugin it produced.
#[derive(Default)]
pub struct Network {
    dead: Mutex<HashSet<String>>,
    unbuildable: Mutex<HashSet<String>>,
}

impl Network {
    pub fn kill(&self, address: &str) {
        self.dead.lock().unwrap().insert(address.to_string());
    }

    pub fn revive(&self, address: &str) {
        self.dead.lock().unwrap().remove(address);
    }

    pub fn refuse_build(&self, address: &str) {
        self.unbuildable.lock().unwrap().insert(address.to_string());
    }

    fn is_dead(&self, address: &str) -> bool {
        self.dead.lock().unwrap().contains(address)
    }
}

pub struct FakePlugin {
    spec: PluginSpec,
    protocol: Protocol,
    network: Arc<Network>,
    pub volumes: Vec<String>,
    pub failing_unmounts: HashSet<String>,
    pub fail_list: bool,
    pub probes: AtomicUsize,
    pub unmounted: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakePlugin {
    pub fn new(spec: PluginSpec, protocol: Protocol, network: Arc<Network>) -> Self {
        Self {
            spec,
            protocol,
            network,
            volumes: Vec::new(),
            failing_unmounts: HashSet::new(),
            fail_list: false,
            probes: AtomicUsize::new(0),
            unmounted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn arc(name: &str, address: &str, protocol: Protocol) -> Arc<Self> {
        Arc::new(Self::new(
            PluginSpec::new(name, address),
            protocol,
            Arc::default(),
        ))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(PluginError::Closed {
                driver: self.spec.name.clone(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for FakePlugin {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    async fn probe(&self) -> Result<()> {
        self.ensure_open()?;
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.network.is_dead(&self.spec.address) {
            return Err(PluginError::Unreachable {
                driver: self.spec.name.clone(),
                address: self.spec.address.clone(),
                message: "connection refused".into(),
            }
            .into());
        }
        Ok(())
    }

    async fn mount(&self, volume_id: &str, _opts: &MountOptions) -> Result<String> {
        self.ensure_open()?;
        Ok(format!("/mnt/{}/{volume_id}", self.spec.name))
    }

    async fn unmount(&self, volume_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.unmounted.lock().unwrap().push(volume_id.to_string());
        if self.failing_unmounts.contains(volume_id) {
            return Err(PluginError::Driver {
                driver: self.spec.name.clone(),
                message: format!("{volume_id} is busy"),
            }
            .into());
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        if self.fail_list {
            return Err(volbroker_plugins::Error::message("list failed"));
        }
        Ok(self.volumes.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory that records every handle it builds.
pub struct FakeFactory {
    protocol: Protocol,
    pub network: Arc<Network>,
    pub built: Mutex<Vec<Arc<FakePlugin>>>,
}

impl FakeFactory {
    pub fn new(protocol: Protocol) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            network: Arc::default(),
            built: Mutex::new(Vec::new()),
        })
    }

    pub fn builds(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub fn last_built(&self) -> Arc<FakePlugin> {
        self.built.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PluginFactory for FakeFactory {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn build(&self, spec: &PluginSpec) -> Result<SharedPlugin> {
        if self.network.unbuildable.lock().unwrap().contains(&spec.address) {
            return Err(PluginError::UnsupportedAddress {
                address: spec.address.clone(),
            }
            .into());
        }
        let plugin = Arc::new(FakePlugin::new(
            spec.clone(),
            self.protocol,
            Arc::clone(&self.network),
        ));
        self.built.lock().unwrap().push(Arc::clone(&plugin));
        Ok(plugin)
    }
}
