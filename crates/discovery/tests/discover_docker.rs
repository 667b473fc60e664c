#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end discovery against a fake Docker volume driver over HTTP.

use std::{fs, sync::Arc, time::Duration};

use {
    volbroker_common::{BackoffConfig, FakeClock, SystemClock},
    volbroker_discovery::{Discoverer, PluginRegistry, SpecDiscoverer, Syncer, purge_mounts},
    volbroker_plugins::{DockerPluginFactory, DockerSettings, PluginFactory, RetryPolicy},
};

fn factory() -> Arc<dyn PluginFactory> {
    let settings = DockerSettings {
        retry: RetryPolicy::new(
            BackoffConfig {
                initial_interval: Duration::from_millis(10),
                multiplier: 2.0,
                max_elapsed: Duration::from_millis(50),
            },
            Arc::new(FakeClock::new()),
        ),
        ..DockerSettings::default()
    };
    Arc::new(DockerPluginFactory::new(settings))
}

async fn activate(server: &mut mockito::Server) -> mockito::Mock {
    server
        .mock("POST", "/Plugin.Activate")
        .with_body(r#"{"Implements":["VolumeDriver"]}"#)
        .create_async()
        .await
}

#[tokio::test]
async fn spec_file_pointing_at_live_driver_is_registered() {
    let mut server = mockito::Server::new_async().await;
    let _activate = activate(&mut server).await;
    let _list = server
        .mock("POST", "/VolumeDriver.List")
        .with_body(r#"{"Volumes":[{"Name":"a-volume","Mountpoint":"/mnt/a"}],"Err":""}"#)
        .create_async()
        .await;
    let unmount = server
        .mock("POST", "/VolumeDriver.Unmount")
        .match_body(mockito::Matcher::PartialJsonString(r#"{"Name":"a-volume"}"#.into()))
        .with_body(r#"{"Err":""}"#)
        .expect(1)
        .create_async()
        .await;

    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("foo.spec"), server.url()).unwrap();
    fs::write(tmp.path().join("gone.spec"), "127.0.0.1:1").unwrap();

    let discoverer: Arc<dyn Discoverer> =
        Arc::new(SpecDiscoverer::new(vec![tmp.path().to_path_buf()], factory()));
    let registry = Arc::new(PluginRegistry::new());
    let syncer = Syncer::new(
        vec![discoverer],
        Arc::clone(&registry),
        Duration::from_secs(10),
        SystemClock::shared(),
    );

    assert_eq!(syncer.sync_once().await.unwrap(), 1);
    let foo = registry.plugin("foo").await.unwrap();
    assert_eq!(foo.spec().address, server.url());
    assert!(registry.plugin("gone").await.is_none());

    let report = purge_mounts(&registry).await;
    assert_eq!(report.unmounted, 1);
    assert_eq!(report.failures, 0);
    unmount.assert_async().await;
}

#[tokio::test]
async fn driver_without_volume_capability_is_excluded() {
    let mut server = mockito::Server::new_async().await;
    let _activate = server
        .mock("POST", "/Plugin.Activate")
        .with_body(r#"{"Implements":["NetworkDriver"]}"#)
        .create_async()
        .await;

    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("net.spec"), server.url()).unwrap();

    let discoverer = SpecDiscoverer::new(vec![tmp.path().to_path_buf()], factory());
    let found = discoverer.discover(&Default::default()).await.unwrap();
    assert!(found.is_empty());
}
