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


//! Key-value operations.

use std::sync::Arc;

use etcdlink_api::pb::etcdserverpb::{
    CompactionResponse, DeleteRangeResponse, PutResponse, RangeResponse, TxnResponse,
    kv_client::KvClient,
};

use crate::{
    client::AuthChannel,
    dispatch::{UnaryCall, unary},
    options::{CompactOptions, DeleteOptions, GetOptions, PutOptions},
    txn::Txn,
    version::ServerCapabilities,
};

/// Key-value operations.
#[derive(Debug, Clone)]
pub struct KvService {
    client:       KvClient<AuthChannel>,
    capabilities: Arc<ServerCapabilities>,
}

impl KvService {
    pub(crate) fn new(client: KvClient<AuthChannel>, capabilities: Arc<ServerCapabilities>) -> Self {
        Self { client, capabilities }
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Negative lease ids and options the server is too old for fail before
    /// anything is sent.
    pub fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        options: &PutOptions,
    ) -> UnaryCall<PutResponse> {
        let request = options
            .validate(&self.capabilities)
            .map(|()| options.to_request(key.into(), value.into()));
        let mut client = self.client.clone();
        unary("KV/Put", request, move |request| async move { client.put(request).await })
    }

    /// Reads `key`, or the range described by `options`.
    pub fn get(&self, key: impl Into<Vec<u8>>, options: &GetOptions) -> UnaryCall<RangeResponse> {
        let request = options
            .validate(&self.capabilities)
            .map(|()| options.to_request(key.into()));
        let mut client = self.client.clone();
        unary("KV/Range", request, move |request| async move { client.range(request).await })
    }

    /// Deletes `key`, or the range described by `options`.
    pub fn delete(&self, key: impl Into<Vec<u8>>, options: &DeleteOptions) -> UnaryCall<DeleteRangeResponse> {
        let request = options
            .validate(&self.capabilities)
            .map(|()| options.to_request(key.into()));
        let mut client = self.client.clone();
        unary("KV/DeleteRange", request, move |request| async move {
            client.delete_range(request).await
        })
    }

    /// Discards history up to `revision`.
    pub fn compact(&self, revision: i64, options: CompactOptions) -> UnaryCall<CompactionResponse> {
        let request = options.to_request(revision);
        let mut client = self.client.clone();
        unary("KV/Compact", request, move |request| async move { client.compact(request).await })
    }

    /// Commits a transaction.
    pub fn commit(&self, txn: &Txn) -> UnaryCall<TxnResponse> {
        let request = txn.validate(&self.capabilities).map(|()| txn.to_request());
        let mut client = self.client.clone();
        unary("KV/Txn", request, move |request| async move { client.txn(request).await })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        client::TokenInterceptor,
        txn::TxnOp,
        types::ClientError,
        version::EtcdVersion,
    };

    /// A service whose channel points at a closed port; nothing listens there.
    fn service_for(version: EtcdVersion) -> KvService {
        let channel = tonic::transport::Endpoint::from_static("http://127.0.0.1:1")
            .connect_timeout(Duration::from_secs(1))
            .connect_lazy();
        KvService::new(
            KvClient::with_interceptor(channel, TokenInterceptor::anonymous()),
            Arc::new(ServerCapabilities::with_version(version)),
        )
    }

    #[tokio::test]
    async fn test_negative_lease_rejected_before_sending() {
        let kv = service_for(EtcdVersion::new(3, 5, 0));
        let options = PutOptions::builder().lease_id(-1).build();
        let err = kv.put("k", "v", &options).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_put_option_gated_by_server_version() {
        let kv = service_for(EtcdVersion::new(3, 0, 11));
        let options = PutOptions::builder().ignore_value(true).build();
        let err = kv.put("k", "v", &options).await.unwrap_err();
        assert!(matches!(err, ClientError::Unsupported { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_negative_limit_rejected() {
        let kv = service_for(EtcdVersion::new(3, 5, 0));
        let options = GetOptions::builder().limit(-3).build();
        let err = kv.get("k", &options).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_compact_needs_positive_revision() {
        let kv = service_for(EtcdVersion::new(3, 5, 0));
        let err = kv.compact(0, CompactOptions::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_txn_checks_every_branch() {
        let kv = service_for(EtcdVersion::new(3, 5, 0));
        let bad_put = TxnOp::put("k", "v", PutOptions::builder().lease_id(-7).build());
        let txn = Txn::new().or_else([bad_put]);
        let err = kv.commit(&txn).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_valid_request_reaches_transport() {
        let kv = service_for(EtcdVersion::new(3, 5, 0));
        let err = kv.get("k", &GetOptions::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Grpc { .. }), "{err}");
    }
}
