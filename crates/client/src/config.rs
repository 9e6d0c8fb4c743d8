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


//! Client configuration.

use std::time::Duration;

use etcdlink_common::env;
use serde::Deserialize;

use crate::{
    endpoint::{Endpoint, parse_endpoints},
    session::SessionOptions,
    types::{ClientError, ClientResult, UsernamePassword},
};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:2379";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_VERSION_DETECT_TIMEOUT_MS: u64 = 10_000;

pub const ENDPOINTS_VAR: &str = "ETCDLINK_ENDPOINTS";
pub const USERNAME_VAR: &str = "ETCDLINK_USERNAME";
pub const PASSWORD_VAR: &str = "ETCDLINK_PASSWORD";
pub const CONNECT_TIMEOUT_VAR: &str = "ETCDLINK_CONNECT_TIMEOUT_MS";
pub const HANDSHAKE_TIMEOUT_VAR: &str = "ETCDLINK_HANDSHAKE_TIMEOUT_MS";

fn default_endpoints() -> Vec<String> { vec![DEFAULT_ENDPOINT.to_string()] }

/// Everything [`EtcdClient::connect`](crate::EtcdClient::connect) needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, bon::Builder)]
#[serde(default)]
pub struct ClientConfig {
    /// Member addresses, `host:port` or `scheme://host:port`.
    #[builder(default = default_endpoints())]
    pub endpoints:                 Vec<String>,
    /// Exchanged for an auth token on connect when set.
    pub credentials:               Option<UsernamePassword>,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms:        u64,
    /// Query member versions on connect to gate newer request options.
    #[builder(default = true)]
    pub detect_version:            bool,
    #[builder(default = DEFAULT_VERSION_DETECT_TIMEOUT_MS)]
    pub version_detect_timeout_ms: u64,
    /// Bound on waiting for the first response of a streaming session.
    pub handshake_timeout_ms:      Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self { Self::builder().build() }
}

impl ClientConfig {
    /// Builds a configuration from `ETCDLINK_*` variables, reading a `.env`
    /// file first when one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails on unparsable numbers and on a username without a password (or
    /// the reverse).
    pub fn from_env() -> ClientResult<Self> {
        env::load_dotenv();
        let mut config = Self::default();

        let endpoints = env::list_var(ENDPOINTS_VAR);
        if !endpoints.is_empty() {
            config.endpoints = endpoints;
        }

        config.credentials = match (env::var(USERNAME_VAR), env::var(PASSWORD_VAR)) {
            (Some(username), Some(password)) => Some(UsernamePassword::new(username, password)?),
            (None, None) => None,
            _ => {
                return Err(ClientError::Config {
                    message: format!("{USERNAME_VAR} and {PASSWORD_VAR} must be set together"),
                });
            }
        };

        if let Some(ms) = env::parse_var::<u64>(CONNECT_TIMEOUT_VAR).map_err(config_error)? {
            config.connect_timeout_ms = ms;
        }
        config.handshake_timeout_ms = env::parse_var::<u64>(HANDSHAKE_TIMEOUT_VAR).map_err(config_error)?;

        Ok(config)
    }

    pub fn parsed_endpoints(&self) -> ClientResult<Vec<Endpoint>> { parse_endpoints(&self.endpoints) }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }

    pub fn version_detect_timeout(&self) -> Duration { Duration::from_millis(self.version_detect_timeout_ms) }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            handshake_timeout: self.handshake_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn config_error(e: env::EnvError) -> ClientError {
    ClientError::Config {
        message: e.to_string(),
    }
}
