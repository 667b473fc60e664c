//! HTTP transports for Docker-style volume drivers.
//!
//! Drivers listen either on TCP (`http`/`https`) or on a unix socket. Every
//! call is a `POST` with a JSON body and a JSON reply.

use std::{fs, path::PathBuf, time::Duration};

use {
    async_trait::async_trait,
    bytes::Bytes,
    http::{Method, Request, StatusCode, header},
    http_body_util::{BodyExt, Full},
    hyper_util::rt::TokioIo,
    reqwest::{Certificate, Client, Identity},
    serde_json::{Map, Value},
    tokio::net::UnixStream,
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    error::{Context, Error, PluginError, Result},
    types::TlsConfig,
};

const PLUGIN_ACCEPT: &str = "application/vnd.docker.plugins.v1.2+json";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One request/response exchange with a driver.
#[async_trait]
pub trait DriverTransport: Send + Sync {
    /// POST `body` to `path` (e.g. `/Plugin.Activate`) and return the reply.
    ///
    /// Connection failures surface as [`PluginError::Unreachable`]. A reply
    /// carrying a non-empty `Err` field is returned as a value even when the
    /// HTTP status is not 2xx, so callers can report the driver's message.
    async fn post(&self, path: &str, body: &Value) -> Result<Value>;

    /// Human readable location for logs.
    fn address(&self) -> String;
}

fn decode_reply(driver: &str, path: &str, status: StatusCode, body: &[u8]) -> Result<Value> {
    if !status.is_success() {
        if let Ok(value) = serde_json::from_slice::<Value>(body)
            && value
                .get("Err")
                .and_then(Value::as_str)
                .is_some_and(|err| !err.is_empty())
        {
            return Ok(value);
        }
        return Err(Error::message(format!(
            "driver '{driver}' answered {path} with HTTP {status}: {}",
            String::from_utf8_lossy(body).trim()
        )));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body)
        .with_context(|| format!("driver '{driver}' sent malformed JSON for {path}"))
}

/// Driver reachable over `http://` or `https://`.
pub struct HttpDriverTransport {
    driver: String,
    client: Client,
    base: Url,
}

impl HttpDriverTransport {
    pub fn new(driver: &str, base: Url, tls: Option<&TlsConfig>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        if let Some(tls) = tls {
            if tls.insecure_skip_verify {
                warn!(driver, "TLS certificate verification disabled for driver");
                builder = builder.danger_accept_invalid_certs(true);
            }
            if !tls.ca_file.is_empty() {
                let pem = fs::read(&tls.ca_file)
                    .with_context(|| format!("failed to read CA file {}", tls.ca_file))?;
                builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
            }
            if let Some((cert_file, key_file)) = tls.client_identity() {
                let mut pem = fs::read(cert_file)
                    .with_context(|| format!("failed to read certificate {cert_file}"))?;
                pem.push(b'\n');
                pem.extend(
                    fs::read(key_file).with_context(|| format!("failed to read key {key_file}"))?,
                );
                builder = builder.identity(Identity::from_pem(&pem)?);
            }
        }

        let client = builder
            .build()
            .context("failed to build HTTP client for driver")?;
        Ok(Self {
            driver: driver.to_string(),
            client,
            base,
        })
    }
}

#[async_trait]
impl DriverTransport for HttpDriverTransport {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.base.join(path)?;
        debug!(driver = %self.driver, %url, "driver request");

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, PLUGIN_ACCEPT)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    Error::from(PluginError::Unreachable {
                        driver: self.driver.clone(),
                        address: self.base.to_string(),
                        message: err.to_string(),
                    })
                } else {
                    Error::from(err)
                }
            })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        decode_reply(&self.driver, path, status, &bytes)
    }

    fn address(&self) -> String {
        self.base.to_string()
    }
}

/// Driver listening on a unix domain socket.
///
/// Opens one HTTP/1.1 connection per call; drivers on local sockets are
/// cheap to reach and this keeps no state between calls.
pub struct UnixDriverTransport {
    driver: String,
    socket: PathBuf,
}

impl UnixDriverTransport {
    pub fn new(driver: &str, socket: PathBuf) -> Self {
        Self {
            driver: driver.to_string(),
            socket,
        }
    }

    fn unreachable(&self, message: impl ToString) -> Error {
        PluginError::Unreachable {
            driver: self.driver.clone(),
            address: self.address(),
            message: message.to_string(),
        }
        .into()
    }

    async fn exchange(&self, path: &str, body: &Value) -> Result<Value> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|err| self.unreachable(err))?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| self.unreachable(err))?;

        let driver = self.driver.clone();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(driver = %driver, error = %err, "driver connection ended with error");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::HOST, "plugin")
            .header(header::ACCEPT, PLUGIN_ACCEPT)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(body)?)))
            .map_err(|err| Error::external("failed to build driver request", err))?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        decode_reply(&self.driver, path, status, &bytes)
    }
}

#[async_trait]
impl DriverTransport for UnixDriverTransport {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!(driver = %self.driver, socket = %self.socket.display(), path, "driver request");
        tokio::time::timeout(REQUEST_TIMEOUT, self.exchange(path, body))
            .await
            .map_err(|_| {
                Error::message(format!(
                    "driver '{}' did not answer {path} within {REQUEST_TIMEOUT:?}",
                    self.driver
                ))
            })?
    }

    fn address(&self) -> String {
        format!("unix://{}", self.socket.display())
    }
}
