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


//! etcdlink Client Library
//!
//! An asynchronous client for the etcd v3 gRPC API.
//!
//! # Features
//!
//! - **Unary services**: KV, Lease, Auth, Cluster and Maintenance calls
//!   returning [`UnaryCall`] futures that can also be consumed blocking or
//!   through a [`ResponseCallback`]
//! - **Lease keep-alive**: [`KeepAliveSentinel`] keeps a lease alive with
//!   heartbeats paced by the TTL the server reports
//! - **Watch**: [`WatchSentinel`] forwards every watch response in order
//! - **Version gating**: request options newer than the connected cluster are
//!   rejected before they are sent
//! - **Structured errors** using snafu
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use etcdlink_client::{
//!     ClientConfig, ClientError, EtcdClient, PutOptions, Sentinel, WatchEventHandler,
//!     WatchOptions, pb::etcdserverpb::WatchResponse,
//! };
//!
//! struct PrintEvents;
//!
//! impl WatchEventHandler for PrintEvents {
//!     fn on_response(&self, response: WatchResponse) {
//!         println!("{} events", response.events.len());
//!     }
//!
//!     fn on_error(&self, error: ClientError) { eprintln!("watch failed: {error}"); }
//!
//!     fn on_completed(&self) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EtcdClient::connect(ClientConfig::default()).await?;
//!
//!     // Keep a lease alive while the key attached to it is needed
//!     let lease = client.lease().grant(10, 0).await?;
//!     let keep_alive = client.lease().keep_alive(lease.id, None).await?;
//!     let options = PutOptions::builder().lease_id(lease.id).build();
//!     client.kv().put("service/node-1", "10.0.0.1", &options).await?;
//!
//!     // Watch the key
//!     let watch = client
//!         .watch()
//!         .watch("service/node-1", &WatchOptions::default(), Arc::new(PrintEvents))
//!         .await?;
//!
//!     watch.close();
//!     keep_alive.close();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod kv;
pub mod lease;
pub mod maintenance;
pub mod options;
pub mod range;
pub mod session;
pub mod txn;
pub mod types;
pub mod version;
pub mod watch;

pub use auth::{AuthService, PermissionType};
pub use client::{AuthChannel, EtcdClient, TokenInterceptor};
pub use cluster::ClusterService;
pub use config::ClientConfig;
pub use dispatch::{ResponseCallback, ResponseDispatch, UnaryCall};
pub use endpoint::{Endpoint, Scheme};
pub use etcdlink_api::pb;
pub use kv::KvService;
pub use lease::{
    HeartbeatScheduler, KeepAliveEventHandler, KeepAliveSentinel, LeaseService, ScheduleRejected,
    ScheduledHeartbeat, TaskScheduler, heartbeat_delay,
};
pub use maintenance::MaintenanceService;
pub use options::{
    CompactOptions, DeleteOptions, GetOptions, PutOptions, SortOrder, SortTarget, WatchFilter,
    WatchOptions,
};
pub use range::{ALL_KEYS, FROM_KEY, KeyRange, prefix_end_of};
pub use session::{InboundStream, Sentinel, SessionOptions, StreamOpener};
pub use txn::{Compare, CompareOp, CompareTarget, Txn, TxnOp};
pub use types::{ClientError, ClientResult, UsernamePassword};
pub use version::{EtcdVersion, Feature, ServerCapabilities};
pub use watch::{WatchEventHandler, WatchSentinel, WatchService};
