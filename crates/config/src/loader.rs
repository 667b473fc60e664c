use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::BrokerConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "volbroker.toml",
    "volbroker.yaml",
    "volbroker.yml",
    "volbroker.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BrokerConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./volbroker.{toml,yaml,yml,json}`
/// 2. `~/.config/volbroker/volbroker.{toml,yaml,yml,json}`
///
/// Returns `BrokerConfig::default()` if no file is found or the file found
/// cannot be parsed.
pub fn discover_and_load() -> BrokerConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return BrokerConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            BrokerConfig::default()
        },
    }
}

/// Returns the user-global config directory (`~/.config/volbroker/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "volbroker").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<BrokerConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
