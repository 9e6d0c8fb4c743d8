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


use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use snafu::{Snafu, ensure};

use crate::version::{EtcdVersion, Feature};

/// Common result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Client error types
///
/// Errors are `Clone` so that one failure can reach both a session's event
/// handler and the caller waiting on the session handshake.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// gRPC call or stream failed
    #[snafu(display("gRPC error: {source}"))]
    Grpc { source: tonic::Status },

    /// Channel could not be built or connected
    #[snafu(display("Transport error: {source}"))]
    Transport {
        source: Arc<tonic::transport::Error>,
    },

    #[snafu(display("Invalid endpoint '{endpoint}': {message}"))]
    InvalidEndpoint { endpoint: String, message: String },

    /// Invalid argument error
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument { message: String },

    /// The server reported a non-positive TTL for the lease
    #[snafu(display("Lease {lease_id:#x} not found, it may have expired already"))]
    LeaseNotFound { lease_id: i64 },

    #[snafu(display("Timed out after {timeout:?} waiting for {what}"))]
    HandshakeTimeout { what: String, timeout: Duration },

    #[snafu(display("Stream closed: {what}"))]
    StreamClosed { what: String },

    /// The heartbeat scheduler refused work while its session was open
    #[snafu(display(
        "Keep-alive scheduler of lease {lease_id:#x} rejected a heartbeat while the session is open"
    ))]
    SchedulerRejected { lease_id: i64 },

    #[snafu(display("Failed to start the keep-alive scheduler of lease {lease_id:#x}: {source}"))]
    SchedulerStart {
        lease_id: i64,
        source:   Arc<std::io::Error>,
    },

    #[snafu(display("{feature} requires etcd {required} or later, the server runs {detected}"))]
    Unsupported {
        feature:  Feature,
        required: EtcdVersion,
        detected: EtcdVersion,
    },

    #[snafu(display("Authentication failed: {source}"))]
    AuthFailed { source: tonic::Status },

    #[snafu(display("Invalid metadata: {message}"))]
    InvalidMetadata { message: String },

    #[snafu(display("Invalid configuration: {message}"))]
    Config { message: String },
}

/// Credentials exchanged for an auth token when the client connects.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct UsernamePassword {
    username: String,
    password: String,
}

impl UsernamePassword {
    /// Both parts are trimmed and must not be blank.
    pub fn new(username: impl AsRef<str>, password: impl AsRef<str>) -> ClientResult<Self> {
        let username = username.as_ref().trim();
        let password = password.as_ref().trim();
        ensure!(
            !username.is_empty(),
            InvalidArgumentSnafu {
                message: "username can not be empty",
            }
        );
        ensure!(
            !password.is_empty(),
            InvalidArgumentSnafu {
                message: "password can not be empty",
            }
        );
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn username(&self) -> &str { &self.username }

    pub fn password(&self) -> &str { &self.password }

    /// Re-applies the checks of [`UsernamePassword::new`] to deserialized
    /// credentials.
    pub(crate) fn validated(&self) -> ClientResult<Self> { Self::new(&self.username, &self.password) }
}

impl fmt::Debug for UsernamePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernamePassword")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_credentials_are_trimmed() {
        let credentials = UsernamePassword::new(" root ", " secret\n").unwrap();
        assert_eq!(credentials.username(), "root");
        assert_eq!(credentials.password(), "secret");
    }

    #[test_case("", "secret"; "empty username")]
    #[test_case("root", "   "; "blank password")]
    fn test_blank_credentials_rejected(username: &str, password: &str) {
        let err = UsernamePassword::new(username, password).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
    }

    #[test]
    fn test_debug_hides_password() {
        let credentials = UsernamePassword::new("root", "secret").unwrap();
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_lease_not_found_display() {
        let err = ClientError::LeaseNotFound { lease_id: 0x2a };
        assert_eq!(
            err.to_string(),
            "Lease 0x2a not found, it may have expired already"
        );
    }
}
