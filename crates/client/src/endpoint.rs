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


//! Endpoint parsing for `host:port` and `scheme://host:port` strings.

use std::{fmt, str::FromStr, time::Duration};

use snafu::ResultExt;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::types::{ClientError, ClientResult, TransportSnafu};

/// Transport scheme of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

/// One etcd member address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host:   String,
    port:   u16,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme { self.scheme }

    pub fn host(&self) -> &str { &self.host }

    pub fn port(&self) -> u16 { self.port }

    /// Builds the tonic endpoint used to open a channel to this member.
    pub(crate) fn to_tonic(&self, connect_timeout: Duration) -> ClientResult<tonic::transport::Endpoint> {
        let endpoint = tonic::transport::Endpoint::from_shared(self.to_string())
            .map_err(std::sync::Arc::new)
            .context(TransportSnafu)?;
        Ok(endpoint.connect_timeout(connect_timeout))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

fn invalid(endpoint: &str, message: impl Into<String>) -> ClientError {
    ClientError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message:  message.into(),
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "endpoint is empty"));
        }

        let (scheme, authority) = match trimmed.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = Scheme::from_str(scheme)
                    .map_err(|_| invalid(s, format!("unsupported scheme '{scheme}'")))?;
                (scheme, rest)
            }
            None => (Scheme::Http, trimmed),
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid(s, "port is required"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(s, format!("invalid port '{port}': {e}")))?;
        if host.is_empty() {
            return Err(invalid(s, "host is empty"));
        }
        url::Host::parse(host).map_err(|e| invalid(s, format!("invalid host '{host}': {e}")))?;

        Ok(Self::new(scheme, host, port))
    }
}

/// Parses every address, failing on the first invalid one.
pub fn parse_endpoints<I, S>(addresses: I) -> ClientResult<Vec<Endpoint>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let endpoints = addresses
        .into_iter()
        .map(|address| address.as_ref().parse())
        .collect::<ClientResult<Vec<Endpoint>>>()?;
    if endpoints.is_empty() {
        return Err(invalid("", "at least one endpoint is required"));
    }
    Ok(endpoints)
}
