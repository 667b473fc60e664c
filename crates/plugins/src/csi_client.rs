//! gRPC client for CSI Identity and Node services.

use std::{fs, path::PathBuf};

use {
    async_trait::async_trait,
    hyper_util::rt::TokioIo,
    tokio::net::UnixStream,
    tonic::{
        client::Grpc,
        codec::ProstCodec,
        codegen::http::uri::PathAndQuery,
        transport::{Certificate, Channel, ClientTlsConfig, Endpoint as GrpcEndpoint, Identity, Uri},
    },
    tower::service_fn,
    tracing::warn,
};

use crate::{
    csi_proto::{
        GET_PLUGIN_INFO, GET_SUPPORTED_VERSIONS, GetPluginInfoRequest, GetPluginInfoResponse,
        GetSupportedVersionsRequest, GetSupportedVersionsResponse, NODE_PUBLISH_VOLUME,
        NODE_UNPUBLISH_VOLUME, NodePublishVolumeRequest, NodePublishVolumeResponse,
        NodeUnpublishVolumeRequest, NodeUnpublishVolumeResponse, Version,
    },
    error::{Context, PluginError, Result},
    types::{Endpoint, TlsConfig},
};

/// The CSI calls the broker makes, as a seam for tests.
#[async_trait]
pub trait CsiNodeClient: Send + Sync {
    async fn get_supported_versions(&self) -> Result<Vec<Version>>;

    async fn get_plugin_info(&self, version: Version) -> Result<GetPluginInfoResponse>;

    async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()>;

    async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()>;
}

/// [`CsiNodeClient`] over a lazily connected tonic channel.
pub struct GrpcCsiClient {
    driver: String,
    address: String,
    channel: Channel,
}

impl GrpcCsiClient {
    /// Build a channel for `endpoint`. Nothing is dialed until the first call.
    pub fn connect_lazy(driver: &str, endpoint: &Endpoint, tls: Option<&TlsConfig>) -> Result<Self> {
        let channel = match endpoint {
            Endpoint::Unix(path) => {
                let path: PathBuf = path.clone();
                // The URI is ignored by the connector; tonic only needs a valid one.
                GrpcEndpoint::try_from("http://[::]:50051")?.connect_with_connector_lazy(service_fn(
                    move |_: Uri| {
                        let path = path.clone();
                        async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
                    },
                ))
            },
            Endpoint::Http(url) => {
                let mut grpc = GrpcEndpoint::from_shared(url.to_string())?;
                if let Some(tls) = tls {
                    grpc = grpc.tls_config(client_tls(driver, url.host_str(), tls)?)?;
                } else if url.scheme() == "https" {
                    grpc = grpc.tls_config(ClientTlsConfig::new())?;
                }
                grpc.connect_lazy()
            },
        };

        Ok(Self {
            driver: driver.to_string(),
            address: endpoint.to_string(),
            channel,
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready().await.map_err(|err| PluginError::Unreachable {
            driver: self.driver.clone(),
            address: self.address.clone(),
            message: err.to_string(),
        })?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(tonic::Request::new(request), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

fn client_tls(driver: &str, host: Option<&str>, tls: &TlsConfig) -> Result<ClientTlsConfig> {
    let mut config = ClientTlsConfig::new();
    if let Some(host) = host {
        config = config.domain_name(host);
    }
    if tls.insecure_skip_verify {
        warn!(driver, "InsecureSkipVerify is not supported for CSI plugins; verifying anyway");
    }
    if !tls.ca_file.is_empty() {
        let pem = fs::read(&tls.ca_file)
            .with_context(|| format!("failed to read CA file {}", tls.ca_file))?;
        config = config.ca_certificate(Certificate::from_pem(pem));
    }
    if let Some((cert_file, key_file)) = tls.client_identity() {
        let cert = fs::read(cert_file).with_context(|| format!("failed to read certificate {cert_file}"))?;
        let key = fs::read(key_file).with_context(|| format!("failed to read key {key_file}"))?;
        config = config.identity(Identity::from_pem(cert, key));
    }
    Ok(config)
}

#[async_trait]
impl CsiNodeClient for GrpcCsiClient {
    async fn get_supported_versions(&self) -> Result<Vec<Version>> {
        let response: GetSupportedVersionsResponse = self
            .unary(GET_SUPPORTED_VERSIONS, GetSupportedVersionsRequest {})
            .await?;
        Ok(response.supported_versions)
    }

    async fn get_plugin_info(&self, version: Version) -> Result<GetPluginInfoResponse> {
        self.unary(GET_PLUGIN_INFO, GetPluginInfoRequest {
            version: Some(version),
        })
        .await
    }

    async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()> {
        let _: NodePublishVolumeResponse = self.unary(NODE_PUBLISH_VOLUME, request).await?;
        Ok(())
    }

    async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()> {
        let _: NodeUnpublishVolumeResponse = self.unary(NODE_UNPUBLISH_VOLUME, request).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unix_channel_is_lazy_and_fails_on_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("csi.sock"));
        let client = GrpcCsiClient::connect_lazy("foo", &endpoint, None).unwrap();
        assert_eq!(client.address, format!("unix://{}", dir.path().join("csi.sock").display()));

        assert!(client.get_supported_versions().await.is_err());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let tls = TlsConfig {
            ca_file: "/nonexistent/ca.pem".into(),
            ..TlsConfig::default()
        };
        let err = client_tls("foo", Some("localhost"), &tls).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }
}
