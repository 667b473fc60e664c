mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand},
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    volbroker_common::{SharedClock, SystemClock},
    volbroker_config::{BrokerConfig, Severity},
    volbroker_discovery::{Discoverer, PluginRegistry, SpecDiscoverer, Syncer, purge_mounts},
    volbroker_gateway::{GatewayState, start_gateway},
    volbroker_metrics::{MetricsRecorderConfig, init_metrics},
    volbroker_plugins::{
        CsiPluginFactory, CsiSettings, DockerPluginFactory, DockerSettings, RetryPolicy, Version,
    },
};

use crate::config_commands::ConfigAction;

#[derive(Parser)]
#[command(name = "volbroker", about = "volbroker: storage plugin broker", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: search ./ then the user config dir).
    #[arg(long, global = true, env = "VOLBROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Docker plugin spec directory; repeat to search several in order.
    #[arg(long = "docker-path", global = true)]
    docker_paths: Vec<PathBuf>,
    /// CSI plugin spec directory; repeat to search several in order.
    /// Enables CSI discovery.
    #[arg(long = "csi-path", global = true)]
    csi_paths: Vec<PathBuf>,
    /// Seconds between discovery cycles (overrides config value).
    #[arg(long, global = true)]
    sync_interval: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover plugins and serve the HTTP API (default).
    Serve,
    /// Run one discovery pass and print the drivers found.
    Discover,
    /// Run one discovery pass and unmount every volume the drivers report.
    Purge,
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config file (explicit or discovered) with CLI flags applied on top.
fn load_config(cli: &Cli) -> Result<BrokerConfig> {
    let mut config = match &cli.config {
        Some(path) => volbroker_config::load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => volbroker_config::discover_and_load(),
    };
    apply_overrides(cli, &mut config);
    Ok(config)
}

fn apply_overrides(cli: &Cli, config: &mut BrokerConfig) {
    if let Some(bind) = &cli.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if !cli.docker_paths.is_empty() {
        config.docker.spec_paths.clone_from(&cli.docker_paths);
    }
    if !cli.csi_paths.is_empty() {
        config.csi.spec_paths.clone_from(&cli.csi_paths);
        config.csi.enabled = true;
    }
    if let Some(secs) = cli.sync_interval {
        config.sync.interval_secs = secs;
    }
}

/// Abort on validation errors, log warnings.
fn check_config(config: &BrokerConfig) -> Result<()> {
    let result = volbroker_config::validate(config);
    for diagnostic in &result.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if result.has_errors() {
        bail!("invalid configuration, see errors above");
    }
    Ok(())
}

/// Enabled discoverers in merge order: Docker first, so CSI wins a name
/// collision.
fn build_discoverers(config: &BrokerConfig, clock: SharedClock) -> Result<Vec<Arc<dyn Discoverer>>> {
    let retry = RetryPolicy::new(config.probe.backoff(), clock);
    let mut discoverers: Vec<Arc<dyn Discoverer>> = Vec::new();

    if config.docker.enabled {
        let factory = DockerPluginFactory::new(DockerSettings {
            required_capability: config.docker.required_capability.clone(),
            retry: retry.clone(),
        });
        discoverers.push(Arc::new(SpecDiscoverer::new(
            config.docker.spec_paths.clone(),
            Arc::new(factory),
        )));
    }

    if config.csi.enabled {
        let version = Version::parse(&config.csi.required_version).with_context(|| {
            format!("invalid csi.required_version '{}'", config.csi.required_version)
        })?;
        let settings =
            CsiSettings::new(version, config.csi.mounts_root.clone()).with_retry(retry.clone());
        discoverers.push(Arc::new(SpecDiscoverer::new(
            config.csi.spec_paths.clone(),
            Arc::new(CsiPluginFactory::new(settings)),
        )));
    }

    Ok(discoverers)
}

fn build_syncer(config: &BrokerConfig, registry: Arc<PluginRegistry>) -> Result<Arc<Syncer>> {
    let clock = SystemClock::shared();
    let discoverers = build_discoverers(config, Arc::clone(&clock))?;
    Ok(Arc::new(Syncer::new(
        discoverers,
        registry,
        config.sync.interval(),
        clock,
    )))
}

async fn close_all(registry: &PluginRegistry) {
    for plugin in registry.plugins().await.values() {
        plugin.close().await;
    }
}

async fn serve(config: BrokerConfig) -> Result<()> {
    check_config(&config)?;

    let metrics_handle = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        ..Default::default()
    })?;

    let registry = Arc::new(PluginRegistry::new());
    let syncer = build_syncer(&config, Arc::clone(&registry))?;
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    let (ready_tx, ready_rx) = oneshot::channel();
    let sync_task = tokio::spawn(Arc::clone(&syncer).run(ready_tx, shutdown.clone()));
    if ready_rx.await.is_err() {
        return match sync_task.await? {
            Err(e) => Err(e).context("initial plugin discovery failed"),
            Ok(()) => Ok(()),
        };
    }

    if config.purge_on_start {
        purge_mounts(&registry).await;
    }

    let mut state = GatewayState::new(Arc::clone(&registry));
    if config.metrics.enabled {
        state = state.with_metrics(metrics_handle);
    }
    let served = start_gateway(
        &config.server.bind,
        config.server.port,
        Arc::new(state),
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    sync_task.await??;
    close_all(&registry).await;
    served?;
    Ok(())
}

async fn discover_once(config: BrokerConfig) -> Result<()> {
    check_config(&config)?;
    let registry = Arc::new(PluginRegistry::new());
    let syncer = build_syncer(&config, Arc::clone(&registry))?;
    let found = syncer.discover().await?;

    let mut drivers: Vec<serde_json::Value> = found
        .iter()
        .map(|(name, plugin)| {
            serde_json::json!({
                "name": name,
                "protocol": plugin.protocol(),
                "address": plugin.spec().address,
            })
        })
        .collect();
    drivers.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    println!("{}", serde_json::to_string_pretty(&drivers)?);

    for plugin in found.values() {
        plugin.close().await;
    }
    Ok(())
}

async fn purge_once(config: BrokerConfig) -> Result<()> {
    check_config(&config)?;
    let registry = Arc::new(PluginRegistry::new());
    let syncer = build_syncer(&config, Arc::clone(&registry))?;
    syncer.sync_once().await?;

    let report = purge_mounts(&registry).await;
    println!(
        "{} plugin(s), {} volume(s) seen, {} unmounted, {} failure(s)",
        report.plugins, report.volumes_seen, report.unmounted, report.failures
    );
    close_all(&registry).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "volbroker starting");

    match cli.command {
        None | Some(Commands::Serve) => serve(load_config(&cli)?).await,
        Some(Commands::Discover) => discover_once(load_config(&cli)?).await,
        Some(Commands::Purge) => purge_once(load_config(&cli)?).await,
        Some(Commands::Config { ref action }) => {
            config_commands::handle_config(action, load_config(&cli)?)
        },
    }
}
