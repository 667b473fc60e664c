//! Periodic re-discovery and registry publication.
//!
//! ```text
//! Initializing ──ok──▶ Idle ──timer──▶ Discovering ──done──▶ Idle
//!      │                 │
//!      └──err──▶ (run returns)   └──shutdown──▶ Terminated
//! ```
//!
//! A tick's discovery runs as its own task. The timer is re-armed only once
//! that task finishes, so cycles never overlap; shutdown stops waiting for
//! it without cancelling it.

use std::{sync::Arc, time::Duration};

use {
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    volbroker_common::SharedClock,
};

#[cfg(feature = "metrics")]
use volbroker_metrics::{counter, discovery as discovery_metrics, histogram, labels};

use crate::{
    discoverer::Discoverer,
    error::Result,
    registry::{PluginMap, PluginRegistry},
};

pub struct Syncer {
    discoverers: Vec<Arc<dyn Discoverer>>,
    registry: Arc<PluginRegistry>,
    interval: Duration,
    clock: SharedClock,
}

impl Syncer {
    pub fn new(
        discoverers: Vec<Arc<dyn Discoverer>>,
        registry: Arc<PluginRegistry>,
        interval: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            discoverers,
            registry,
            interval,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Run every discoverer and merge the results without publishing.
    ///
    /// Discoverers run in configured order; on a name collision the later
    /// one wins and the earlier handle is closed.
    pub async fn discover(&self) -> Result<PluginMap> {
        let existing = self.registry.plugins().await;
        let mut merged = PluginMap::new();

        for discoverer in &self.discoverers {
            let found = match discoverer.discover(&existing).await {
                Ok(found) => found,
                Err(e) => {
                    release_unpublished(&merged, &existing).await;
                    return Err(e);
                },
            };

            for (name, plugin) in found {
                let winner = plugin.protocol();
                if let Some(loser) = merged.insert(name.clone(), plugin) {
                    warn!(
                        driver = %name,
                        kept = %winner,
                        dropped = %loser.protocol(),
                        "driver name advertised by more than one protocol, keeping the later"
                    );
                    loser.close().await;
                }
            }
        }

        Ok(merged)
    }

    /// Discover, publish the result, and close handles that did not survive.
    ///
    /// Survivors are judged against the map this call published, not a
    /// re-read of the registry. On error the registry is left untouched and
    /// its handles stay open.
    pub async fn sync_once(&self) -> Result<usize> {
        let started = self.clock.now();
        let merged = match self.discover().await {
            Ok(merged) => merged,
            Err(e) => {
                self.record_cycle("error", started);
                return Err(e);
            },
        };

        let count = merged.len();
        let published = merged.clone();
        let previous = self.registry.set(merged).await;
        for (name, plugin) in previous.iter() {
            let survived = published
                .get(name)
                .is_some_and(|kept| Arc::ptr_eq(kept, plugin));
            if !survived {
                plugin.close().await;
                info!(driver = %name, protocol = %plugin.protocol(), "plugin removed from registry");
            }
        }

        self.record_cycle("ok", started);
        debug!(plugins = count, "sync cycle complete");
        Ok(count)
    }

    fn record_cycle(&self, result: &'static str, started: tokio::time::Instant) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        #[cfg(feature = "metrics")]
        {
            counter!(discovery_metrics::CYCLES_TOTAL, labels::RESULT => result).increment(1);
            histogram!(discovery_metrics::CYCLE_DURATION_SECONDS).record(elapsed.as_secs_f64());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (result, elapsed);
    }

    /// Populate the registry, signal `ready`, then refresh every interval
    /// until `shutdown` fires.
    ///
    /// An initial discovery failure is returned and `ready` is never
    /// signalled. Failures in later cycles are logged and the registry keeps
    /// its last good snapshot.
    pub async fn run(
        self: Arc<Self>,
        ready: oneshot::Sender<()>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let count = self.sync_once().await?;
        info!(plugins = count, interval = ?self.interval, "plugin registry ready");
        let _ = ready.send(());

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.clock.sleep(self.interval) => {},
            }

            let (done_tx, done_rx) = oneshot::channel::<()>();
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = this.sync_once().await {
                    error!(error = %e, "background discovery failed, keeping previous registry");
                }
                let _ = done_tx.send(());
            });

            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = done_rx => {},
            }
        }

        info!("syncer stopped");
        Ok(())
    }
}

/// Close handles built during an aborted cycle that are not already
/// serving from the registry.
async fn release_unpublished(merged: &PluginMap, existing: &PluginMap) {
    for (name, plugin) in merged {
        let published = existing
            .get(name)
            .is_some_and(|live| Arc::ptr_eq(live, plugin));
        if !published {
            plugin.close().await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use {
        async_trait::async_trait,
        volbroker_common::SystemClock,
        volbroker_plugins::{PluginFactory, Protocol},
    };

    use {
        super::*,
        crate::{
            discoverer::SpecDiscoverer,
            testing::{FakeFactory, FakePlugin},
        },
    };

    fn spec_discoverer(dir: &Path, factory: &Arc<FakeFactory>) -> Arc<dyn Discoverer> {
        Arc::new(SpecDiscoverer::new(
            vec![dir.to_path_buf()],
            Arc::clone(factory) as Arc<dyn PluginFactory>,
        ))
    }

    fn syncer(discoverers: Vec<Arc<dyn Discoverer>>) -> Arc<Syncer> {
        Arc::new(Syncer::new(
            discoverers,
            Arc::new(PluginRegistry::new()),
            Duration::from_secs(10),
            SystemClock::shared(),
        ))
    }

    #[tokio::test]
    async fn scenario_spec_file_to_registry() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("foo.spec"), "127.0.0.1:8080").unwrap();
        let factory = FakeFactory::new(Protocol::Docker);
        let syncer = syncer(vec![spec_discoverer(tmp.path(), &factory)]);

        let found = syncer.discover().await.unwrap();
        assert_eq!(found.len(), 1);

        syncer.sync_once().await.unwrap();
        let plugin = syncer.registry().plugin("foo").await.unwrap();
        assert_eq!(plugin.spec().address, "http://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn later_discoverer_wins_name_collision() {
        let docker_dir = tempfile::tempdir().unwrap();
        let csi_dir = tempfile::tempdir().unwrap();
        fs::write(docker_dir.path().join("foo.spec"), "127.0.0.1:1").unwrap();
        fs::write(csi_dir.path().join("foo.spec"), "127.0.0.1:2").unwrap();
        let docker = FakeFactory::new(Protocol::Docker);
        let csi = FakeFactory::new(Protocol::Csi);
        let syncer = syncer(vec![
            spec_discoverer(docker_dir.path(), &docker),
            spec_discoverer(csi_dir.path(), &csi),
        ]);

        let merged = syncer.discover().await.unwrap();
        assert_eq!(merged["foo"].protocol(), Protocol::Csi);
        assert!(docker.last_built().is_closed());
    }

    #[tokio::test]
    async fn sync_closes_handles_that_disappear() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("foo.spec"), "127.0.0.1:8080").unwrap();
        fs::write(tmp.path().join("bar.spec"), "127.0.0.1:8081").unwrap();
        let factory = FakeFactory::new(Protocol::Docker);
        let syncer = syncer(vec![spec_discoverer(tmp.path(), &factory)]);
        syncer.sync_once().await.unwrap();
        let bar = syncer.registry().plugin("bar").await.unwrap();

        fs::remove_file(tmp.path().join("bar.spec")).unwrap();
        syncer.sync_once().await.unwrap();

        assert!(syncer.registry().plugin("bar").await.is_none());
        assert!(bar.list_volumes().await.unwrap_err().is_closed());
        let foo = syncer.registry().plugin("foo").await.unwrap();
        assert!(foo.list_volumes().await.is_ok());
    }

    #[tokio::test]
    async fn failed_sync_keeps_previous_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plugins");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("foo.spec"), "127.0.0.1:8080").unwrap();
        let factory = FakeFactory::new(Protocol::Docker);
        let syncer = syncer(vec![spec_discoverer(&dir, &factory)]);
        syncer.sync_once().await.unwrap();

        fs::remove_dir_all(&dir).unwrap();
        fs::write(&dir, "").unwrap();
        assert!(syncer.sync_once().await.is_err());

        let foo = syncer.registry().plugin("foo").await.unwrap();
        assert!(foo.list_volumes().await.is_ok());
    }

    #[tokio::test]
    async fn aborted_cycle_closes_fresh_handles() {
        let good = tempfile::tempdir().unwrap();
        fs::write(good.path().join("foo.spec"), "127.0.0.1:8080").unwrap();
        let bad = tempfile::tempdir().unwrap();
        let not_a_dir = bad.path().join("plugins");
        fs::write(&not_a_dir, "").unwrap();

        let docker = FakeFactory::new(Protocol::Docker);
        let csi = FakeFactory::new(Protocol::Csi);
        let syncer = syncer(vec![
            spec_discoverer(good.path(), &docker),
            spec_discoverer(&not_a_dir, &csi),
        ]);

        assert!(syncer.sync_once().await.is_err());
        assert!(syncer.registry().is_empty().await);
        assert!(docker.last_built().is_closed());
    }

    #[tokio::test]
    async fn aborted_cycle_keeps_serving_the_replaced_handle() {
        let docker_dir = tempfile::tempdir().unwrap();
        fs::write(docker_dir.path().join("foo.spec"), "127.0.0.1:8080").unwrap();
        let csi_root = tempfile::tempdir().unwrap();
        let csi_dir = csi_root.path().join("plugins");
        fs::create_dir(&csi_dir).unwrap();

        let docker = FakeFactory::new(Protocol::Docker);
        let csi = FakeFactory::new(Protocol::Csi);
        let syncer = syncer(vec![
            spec_discoverer(docker_dir.path(), &docker),
            spec_discoverer(&csi_dir, &csi),
        ]);
        syncer.sync_once().await.unwrap();
        let old = syncer.registry().plugin("foo").await.unwrap();

        // The address moves while the other family's directory is broken.
        fs::write(docker_dir.path().join("foo.spec"), "127.0.0.1:9090").unwrap();
        fs::remove_dir(&csi_dir).unwrap();
        fs::write(&csi_dir, "").unwrap();

        for cycle in 1..=3 {
            assert!(syncer.sync_once().await.is_err());
            let served = syncer.registry().plugin("foo").await.unwrap();
            assert!(Arc::ptr_eq(&served, &old));
            assert_eq!(served.spec().address, "http://127.0.0.1:8080");
            assert!(served.list_volumes().await.is_ok(), "cycle {cycle}");
            assert!(docker.last_built().is_closed());
            assert_eq!(docker.builds(), 1 + cycle);
        }

        fs::remove_file(&csi_dir).unwrap();
        fs::create_dir(&csi_dir).unwrap();
        syncer.sync_once().await.unwrap();

        let served = syncer.registry().plugin("foo").await.unwrap();
        assert_eq!(served.spec().address, "http://127.0.0.1:9090");
        assert!(served.list_volumes().await.is_ok());
        assert!(old.list_volumes().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn collision_loser_is_rebuilt_each_cycle_and_winner_kept() {
        let docker_dir = tempfile::tempdir().unwrap();
        let csi_dir = tempfile::tempdir().unwrap();
        fs::write(docker_dir.path().join("foo.spec"), "127.0.0.1:1").unwrap();
        fs::write(csi_dir.path().join("foo.spec"), "127.0.0.1:2").unwrap();
        let docker = FakeFactory::new(Protocol::Docker);
        let csi = FakeFactory::new(Protocol::Csi);
        let syncer = syncer(vec![
            spec_discoverer(docker_dir.path(), &docker),
            spec_discoverer(csi_dir.path(), &csi),
        ]);

        syncer.sync_once().await.unwrap();
        let winner = syncer.registry().plugin("foo").await.unwrap();
        syncer.sync_once().await.unwrap();

        assert!(Arc::ptr_eq(
            &syncer.registry().plugin("foo").await.unwrap(),
            &winner
        ));
        assert!(winner.list_volumes().await.is_ok());
        assert_eq!(csi.builds(), 1);
        assert_eq!(docker.builds(), 2);
        assert!(docker.built.lock().unwrap().iter().all(|p| p.is_closed()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_signals_ready_then_refreshes_on_interval() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new(Protocol::Docker);
        let syncer = syncer(vec![spec_discoverer(tmp.path(), &factory)]);
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(Arc::clone(&syncer).run(ready_tx, shutdown.clone()));
        ready_rx.await.unwrap();
        assert!(syncer.registry().is_empty().await);

        fs::write(tmp.path().join("foo.spec"), "127.0.0.1:8080").unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(syncer.registry().plugin("foo").await.is_some());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_fails_without_ready_when_startup_discovery_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let not_a_dir = tmp.path().join("plugins");
        fs::write(&not_a_dir, "").unwrap();
        let factory = FakeFactory::new(Protocol::Docker);
        let syncer = syncer(vec![spec_discoverer(&not_a_dir, &factory)]);
        let (ready_tx, ready_rx) = oneshot::channel();

        let result = syncer.run(ready_tx, CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(ready_rx.await.is_err());
    }

    /// Takes 25s per pass and tracks how many passes overlap.
    struct SlowDiscoverer {
        running: AtomicUsize,
        max_running: AtomicUsize,
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Discoverer for SlowDiscoverer {
        fn protocol(&self) -> Protocol {
            Protocol::Docker
        }

        async fn discover(&self, _existing: &PluginMap) -> Result<PluginMap> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.passes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(25)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(PluginMap::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_never_overlap() {
        let slow = Arc::new(SlowDiscoverer {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            passes: AtomicUsize::new(0),
        });
        let syncer = syncer(vec![Arc::clone(&slow) as Arc<dyn Discoverer>]);
        let shutdown = CancellationToken::new();
        let (ready_tx, _ready_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&syncer).run(ready_tx, shutdown.clone()));

        // startup 25s, then each tick is 10s wait + 25s work
        tokio::time::sleep(Duration::from_secs(25 + 35 * 3 + 1)).await;
        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(slow.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(slow.passes.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_wait_for_in_flight_cycle() {
        let slow = Arc::new(SlowDiscoverer {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            passes: AtomicUsize::new(0),
        });
        let syncer = syncer(vec![Arc::clone(&slow) as Arc<dyn Discoverer>]);
        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&syncer).run(ready_tx, shutdown.clone()));
        ready_rx.await.unwrap();

        // Land inside the first background cycle.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(slow.running.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(slow.running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn survivors_are_not_closed() {
        let registry = Arc::new(PluginRegistry::new());
        let kept = FakePlugin::arc("foo", "http://127.0.0.1:8080", Protocol::Docker);

        struct Fixed(Arc<FakePlugin>);

        #[async_trait]
        impl Discoverer for Fixed {
            fn protocol(&self) -> Protocol {
                Protocol::Docker
            }

            async fn discover(&self, _existing: &PluginMap) -> Result<PluginMap> {
                Ok(PluginMap::from([(
                    "foo".to_string(),
                    Arc::clone(&self.0) as volbroker_plugins::SharedPlugin,
                )]))
            }
        }

        let syncer = Syncer::new(
            vec![Arc::new(Fixed(Arc::clone(&kept)))],
            Arc::clone(&registry),
            Duration::from_secs(10),
            SystemClock::shared(),
        );
        syncer.sync_once().await.unwrap();
        syncer.sync_once().await.unwrap();
        assert!(!kept.is_closed());
    }
}
