// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Connection setup and access to the etcd services.

use std::{sync::Arc, time::Duration};

use etcdlink_api::pb::etcdserverpb::{
    AuthenticateRequest, StatusRequest, auth_client::AuthClient, cluster_client::ClusterClient,
    kv_client::KvClient, lease_client::LeaseClient, maintenance_client::MaintenanceClient,
    watch_client::WatchClient,
};
use snafu::ResultExt;
use tonic::{
    metadata::{Ascii, MetadataValue},
    service::{Interceptor, interceptor::InterceptedService},
    transport::Channel,
};
use tracing::{debug, info, warn};

use crate::{
    auth::AuthService,
    cluster::ClusterService,
    config::ClientConfig,
    endpoint::Endpoint,
    kv::KvService,
    lease::LeaseService,
    maintenance::MaintenanceService,
    session::SessionOptions,
    types::{AuthFailedSnafu, ClientError, ClientResult, TransportSnafu, UsernamePassword},
    version::{EtcdVersion, ServerCapabilities},
    watch::WatchService,
};

/// Metadata key etcd reads the auth token from.
const TOKEN_METADATA_KEY: &str = "token";

/// Channel carrying the auth token, if any, on every request.
pub type AuthChannel = InterceptedService<Channel, TokenInterceptor>;

/// Attaches the auth token to outgoing requests.
#[derive(Debug, Clone, Default)]
pub struct TokenInterceptor {
    token: Option<MetadataValue<Ascii>>,
}

impl TokenInterceptor {
    pub fn new(token: &str) -> ClientResult<Self> {
        let token = MetadataValue::try_from(token).map_err(|e| ClientError::InvalidMetadata {
            message: format!("auth token is not valid ASCII metadata: {e}"),
        })?;
        Ok(Self { token: Some(token) })
    }

    pub fn anonymous() -> Self { Self::default() }
}

impl Interceptor for TokenInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        if let Some(token) = &self.token {
            request.metadata_mut().insert(TOKEN_METADATA_KEY, token.clone());
        }
        Ok(request)
    }
}

/// An etcd v3 client.
///
/// Cheap to clone; every clone shares the same channel.
#[derive(Debug, Clone)]
pub struct EtcdClient {
    channel:      AuthChannel,
    capabilities: Arc<ServerCapabilities>,
    options:      SessionOptions,
}

impl EtcdClient {
    /// Connects to the cluster described by `config`.
    ///
    /// Authenticates when credentials are configured and detects the server
    /// version unless disabled.
    ///
    /// # Errors
    ///
    /// Returns an error when an endpoint is invalid, the channel cannot be
    /// established or authentication fails.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let endpoints = config.parsed_endpoints()?;
        info!(
            "Connecting to etcd at {}",
            endpoints.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
        );
        let channel = open_channel(&endpoints, config.connect_timeout()).await?;

        let interceptor = match &config.credentials {
            Some(credentials) => {
                let token = authenticate(channel.clone(), &credentials.validated()?).await?;
                TokenInterceptor::new(&token)?
            }
            None => TokenInterceptor::anonymous(),
        };

        let capabilities = if config.detect_version {
            detect_capabilities(&endpoints, &config).await
        } else {
            ServerCapabilities::unknown()
        };

        Ok(Self::from_channel(
            channel,
            interceptor,
            capabilities,
            config.session_options(),
        ))
    }

    /// Wraps an existing channel without any network round trip.
    pub fn from_channel(
        channel: Channel,
        interceptor: TokenInterceptor,
        capabilities: ServerCapabilities,
        options: SessionOptions,
    ) -> Self {
        Self {
            channel: InterceptedService::new(channel, interceptor),
            capabilities: Arc::new(capabilities),
            options,
        }
    }

    pub fn capabilities(&self) -> &ServerCapabilities { &self.capabilities }

    pub fn kv(&self) -> KvService { KvService::new(KvClient::new(self.channel.clone()), self.capabilities.clone()) }

    pub fn lease(&self) -> LeaseService {
        LeaseService::new(
            LeaseClient::new(self.channel.clone()),
            self.capabilities.clone(),
            self.options,
        )
    }

    pub fn watch(&self) -> WatchService {
        WatchService::new(
            WatchClient::new(self.channel.clone()),
            self.capabilities.clone(),
            self.options,
        )
    }

    pub fn auth(&self) -> AuthService { AuthService::new(AuthClient::new(self.channel.clone())) }

    pub fn cluster(&self) -> ClusterService { ClusterService::new(ClusterClient::new(self.channel.clone())) }

    pub fn maintenance(&self) -> MaintenanceService {
        MaintenanceService::new(MaintenanceClient::new(self.channel.clone()))
    }
}

/// A single endpoint is connected eagerly so a bad address fails fast,
/// several are balanced over lazily.
async fn open_channel(endpoints: &[Endpoint], connect_timeout: Duration) -> ClientResult<Channel> {
    let targets = endpoints
        .iter()
        .map(|endpoint| endpoint.to_tonic(connect_timeout))
        .collect::<ClientResult<Vec<_>>>()?;
    match targets.as_slice() {
        [single] => single.connect().await.map_err(Arc::new).context(TransportSnafu),
        _ => Ok(Channel::balance_list(targets.into_iter())),
    }
}

async fn authenticate(channel: Channel, credentials: &UsernamePassword) -> ClientResult<String> {
    let request = AuthenticateRequest {
        name:     credentials.username().to_string(),
        password: credentials.password().to_string(),
    };
    let response = AuthClient::new(channel)
        .authenticate(request)
        .await
        .context(AuthFailedSnafu)?;
    debug!("Authenticated as {}", credentials.username());
    Ok(response.into_inner().token)
}

/// Asks every member for its version. Members that fail to answer in time
/// are skipped with a warning, and an empty result leaves the version
/// unknown.
async fn detect_capabilities(endpoints: &[Endpoint], config: &ClientConfig) -> ServerCapabilities {
    let mut capabilities = ServerCapabilities::unknown();
    for endpoint in endpoints {
        match member_version(endpoint, config).await {
            Ok(version) => {
                debug!("Member {endpoint} runs etcd {version}");
                capabilities.observe(version);
            }
            Err(e) => warn!("Could not detect the etcd version of {endpoint}: {e}"),
        }
    }
    match capabilities.version() {
        Some(version) => info!("Detected etcd cluster version {version}"),
        None => warn!("etcd cluster version unknown, request options are not gated"),
    }
    capabilities
}

async fn member_version(endpoint: &Endpoint, config: &ClientConfig) -> ClientResult<EtcdVersion> {
    let channel = endpoint.to_tonic(config.connect_timeout())?.connect_lazy();
    let mut client = MaintenanceClient::new(channel);
    let timeout = config.version_detect_timeout();
    let response = tokio::time::timeout(timeout, client.status(StatusRequest {}))
        .await
        .map_err(|_| ClientError::HandshakeTimeout {
            what: format!("the status of {endpoint}"),
            timeout,
        })?
        .map_err(|source| ClientError::Grpc { source })?;
    response.into_inner().version.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_interceptor_sets_metadata() {
        let mut interceptor = TokenInterceptor::new("abc.def").unwrap();
        let request = interceptor.call(tonic::Request::new(())).unwrap();
        assert_eq!(request.metadata().get(TOKEN_METADATA_KEY).unwrap(), "abc.def");
    }

    #[test]
    fn test_anonymous_interceptor_adds_nothing() {
        let mut interceptor = TokenInterceptor::anonymous();
        let request = interceptor.call(tonic::Request::new(())).unwrap();
        assert!(request.metadata().get(TOKEN_METADATA_KEY).is_none());
    }

    #[test]
    fn test_invalid_token_rejected() {
        assert!(matches!(
            TokenInterceptor::new("line\nbreak"),
            Err(ClientError::InvalidMetadata { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails_before_connecting() {
        let config = ClientConfig::builder()
            .endpoints(vec!["localhost".to_string()])
            .build();
        assert!(matches!(
            EtcdClient::connect(config).await,
            Err(ClientError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_services_share_capabilities() {
        let channel = tonic::transport::Endpoint::from_static("http://127.0.0.1:2379").connect_lazy();
        let client = EtcdClient::from_channel(
            channel,
            TokenInterceptor::anonymous(),
            ServerCapabilities::with_version(EtcdVersion::new(3, 0, 11)),
            SessionOptions::default(),
        );
        // gated before any network traffic
        let err = client.lease().leases().await.unwrap_err();
        assert!(matches!(err, ClientError::Unsupported { .. }));
        assert_eq!(client.capabilities().version(), Some(&EtcdVersion::new(3, 0, 11)));
    }
}
