//! Plugin identity and connection details.

use std::{fmt, path::PathBuf};

use {
    serde::{Deserialize, Serialize},
    url::Url,
};

use crate::error::{PluginError, Result};

/// Wire protocol family a plugin speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Docker,
    Csi,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Csi => "csi",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS material for reaching a plugin over `https`.
///
/// Field names follow the on-disk `.json` spec format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    #[serde(rename = "InsecureSkipVerify")]
    pub insecure_skip_verify: bool,
    #[serde(rename = "CAFile")]
    pub ca_file: String,
    #[serde(rename = "CertFile")]
    pub cert_file: String,
    #[serde(rename = "KeyFile")]
    pub key_file: String,
}

impl TlsConfig {
    pub(crate) fn client_identity(&self) -> Option<(&str, &str)> {
        (!self.cert_file.is_empty() && !self.key_file.is_empty())
            .then_some((self.cert_file.as_str(), self.key_file.as_str()))
    }
}

/// Name and connection info decoded from a spec file.
///
/// Compared by value across discovery cycles: any difference means the
/// plugin must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "TLSConfig", default)]
    pub tls: Option<TlsConfig>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            tls: None,
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Resolve the address into something a transport can dial.
    ///
    /// Accepts raw socket paths, `unix://` URLs and `http(s)://` URLs.
    /// Scheme-less forms are expected to be canonicalized by the decoder.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let scheme_less = !self.address.contains("://");
        if scheme_less && (self.address.starts_with('/') || self.address.ends_with(".sock")) {
            return Ok(Endpoint::Unix(PathBuf::from(&self.address)));
        }

        let unsupported = || PluginError::UnsupportedAddress {
            address: self.address.clone(),
        };
        let url = Url::parse(&self.address).map_err(|_| unsupported())?;
        match url.scheme() {
            "unix" => {
                // `unix:///run/x.sock` has an empty host, `unix://run/x.sock`
                // puts the first segment in the host.
                let path = match url.host_str() {
                    Some(host) if !host.is_empty() => format!("/{host}{}", url.path()),
                    _ => url.path().to_string(),
                };
                if path.len() <= 1 {
                    return Err(unsupported().into());
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            },
            "http" | "https" => Ok(Endpoint::Http(url)),
            _ => Err(unsupported().into()),
        }
    }
}

/// Where a plugin listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Http(Url),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Http(url) => write!(f, "{url}"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_raw_socket_path() {
        let spec = PluginSpec::new("foo", "/run/docker/plugins/foo.sock");
        assert_eq!(
            spec.endpoint().unwrap(),
            Endpoint::Unix(PathBuf::from("/run/docker/plugins/foo.sock"))
        );
    }

    #[test]
    fn endpoint_from_unix_url() {
        let spec = PluginSpec::new("foo", "unix:///var/run/foo.sock");
        assert_eq!(
            spec.endpoint().unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/foo.sock"))
        );

        let spec = PluginSpec::new("foo", "unix://var/run/foo.sock");
        assert_eq!(
            spec.endpoint().unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/foo.sock"))
        );
    }

    #[test]
    fn endpoint_from_http_url() {
        let spec = PluginSpec::new("foo", "https://10.0.0.1:9000");
        match spec.endpoint().unwrap() {
            Endpoint::Http(url) => {
                assert_eq!(url.scheme(), "https");
                assert_eq!(url.port(), Some(9000));
            },
            other => panic!("unexpected endpoint {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = PluginSpec::new("foo", "ftp://host").endpoint().unwrap_err();
        assert!(err.to_string().contains("unsupported plugin address"));
    }

    #[test]
    fn json_field_names_match_spec_files() {
        let spec: PluginSpec = serde_json::from_str(
            r#"{"Name":"foo","Address":"https://h:1","TLSConfig":{"InsecureSkipVerify":true,"CAFile":"/ca.pem","CertFile":"","KeyFile":""}}"#,
        )
        .unwrap();
        let tls = spec.tls.as_ref().unwrap();
        assert!(tls.insecure_skip_verify);
        assert_eq!(tls.ca_file, "/ca.pem");
        assert!(tls.client_identity().is_none());
    }

    #[test]
    fn specs_compare_by_value() {
        let a = PluginSpec::new("foo", "http://127.0.0.1:8080");
        let b = PluginSpec::new("foo", "http://127.0.0.1:8080");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_tls(TlsConfig::default()));
    }
}
