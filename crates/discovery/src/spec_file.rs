//! Decoding a located spec file into a [`PluginSpec`].

use std::{fs, path::absolute};

use {tracing::debug, url::Url, volbroker_plugins::PluginSpec};

use crate::{
    error::{Error, Result},
    locator::{SpecKind, SpecLocation},
};

/// Read and decode the spec at `location`.
///
/// The registry key is always the file stem; a differing `Name` inside a
/// `.json` spec is ignored.
pub fn decode(location: &SpecLocation) -> Result<PluginSpec> {
    let path = &location.path;
    match location.kind {
        SpecKind::Sock => {
            let socket = absolute(path)?;
            Ok(PluginSpec::new(
                &location.name,
                socket.to_string_lossy().into_owned(),
            ))
        },
        SpecKind::Spec => {
            let content =
                fs::read_to_string(path).map_err(|err| Error::invalid_spec(path, err.to_string()))?;
            let first_line = content.lines().next().unwrap_or_default().trim();
            if first_line.is_empty() {
                return Err(Error::invalid_spec(path, "missing address"));
            }
            let address = canonicalize_address(first_line)
                .map_err(|reason| Error::invalid_spec(path, reason))?;
            Ok(PluginSpec::new(&location.name, address))
        },
        SpecKind::Json => {
            let content =
                fs::read_to_string(path).map_err(|err| Error::invalid_spec(path, err.to_string()))?;
            let mut spec: PluginSpec = serde_json::from_str(&content)
                .map_err(|err| Error::invalid_spec(path, err.to_string()))?;
            if spec.address.trim().is_empty() {
                return Err(Error::invalid_spec(path, "missing Address"));
            }
            if !spec.name.is_empty() && spec.name != location.name {
                debug!(
                    driver = %location.name,
                    declared = %spec.name,
                    "spec file declares a different name, using the file name"
                );
            }
            spec.name = location.name.clone();
            spec.address = canonicalize_address(spec.address.trim())
                .map_err(|reason| Error::invalid_spec(path, reason))?;
            Ok(spec)
        },
    }
}

/// Normalize a raw address into a dialable form.
///
/// - `http`, `https` and `unix` URLs pass through unchanged
/// - `tcp://host:port` becomes `http://host:port`
/// - a scheme-less path ending in `.sock` (or any absolute path) is a raw
///   unix socket path
/// - anything else without a scheme, like `host:port` or an IP, gets `http://`
pub fn canonicalize_address(raw: &str) -> std::result::Result<String, String> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("tcp://") {
        return checked_http(format!("http://{rest}"));
    }

    if raw.contains("://") {
        let url = Url::parse(raw).map_err(|err| format!("invalid address '{raw}': {err}"))?;
        return match url.scheme() {
            "http" | "https" | "unix" => Ok(raw.to_string()),
            other => Err(format!("unsupported scheme '{other}' in '{raw}'")),
        };
    }

    if raw.ends_with(".sock") || raw.starts_with('/') {
        return Ok(raw.to_string());
    }

    checked_http(format!("http://{raw}"))
}

fn checked_http(candidate: String) -> std::result::Result<String, String> {
    match Url::parse(&candidate) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(candidate),
        Ok(_) => Err(format!("no host in '{candidate}'")),
        Err(err) => Err(format!("invalid address '{candidate}': {err}")),
    }
}
