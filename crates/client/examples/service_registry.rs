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


//! Service registration example for the etcdlink client library
//!
//! Registers this process under a lease kept alive in the background and
//! watches the registration prefix for changes.
//!
//! Needs a reachable etcd (see `ETCDLINK_ENDPOINTS`).
//! To run this example: `cargo run --example service_registry`

use std::{sync::Arc, time::Duration};

use etcdlink_client::{
    ClientConfig, ClientError, EtcdClient, KeepAliveEventHandler, KeyRange, PutOptions, Sentinel,
    WatchEventHandler, WatchOptions,
    pb::{
        etcdserverpb::{LeaseKeepAliveResponse, WatchResponse},
        mvccpb::event::EventType,
    },
};
use etcdlink_common::logging::{LoggingOptions, init_tracing};
use tokio::time::sleep;
use tracing::{info, warn};

const PREFIX: &str = "/services/demo/";

struct LogKeepAlive;

impl KeepAliveEventHandler for LogKeepAlive {
    fn on_response(&self, response: LeaseKeepAliveResponse) {
        info!("Lease {:#x} refreshed, ttl={}s", response.id, response.ttl);
    }

    fn on_error(&self, error: ClientError) { warn!("Keep-alive failed: {error}"); }
}

struct LogMembership;

impl WatchEventHandler for LogMembership {
    fn on_response(&self, response: WatchResponse) {
        for event in response.events {
            let Some(kv) = event.kv else { continue };
            let key = String::from_utf8_lossy(&kv.key);
            match EventType::try_from(event.r#type) {
                Ok(EventType::Put) => info!("Joined: {key}"),
                Ok(EventType::Delete) => info!("Left: {key}"),
                Err(_) => warn!("Unknown event type {}", event.r#type),
            }
        }
    }

    fn on_error(&self, error: ClientError) { warn!("Watch failed: {error}"); }

    fn on_completed(&self) { info!("Watch stream completed"); }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = init_tracing(&LoggingOptions::default())?;

    let client = EtcdClient::connect(ClientConfig::from_env()?).await?;
    match client.capabilities().version() {
        Some(version) => info!("Connected to etcd {version}"),
        None => info!("Connected to etcd of unknown version"),
    }

    let membership = client
        .watch()
        .watch(
            PREFIX,
            &WatchOptions::builder().range(KeyRange::Prefix).build(),
            Arc::new(LogMembership),
        )
        .await?;

    let lease = client.lease().grant(5, 0).await?;
    let keep_alive = client
        .lease()
        .keep_alive(lease.id, Some(Arc::new(LogKeepAlive)))
        .await?;

    let key = format!("{PREFIX}{}", std::process::id());
    let options = PutOptions::builder().lease_id(lease.id).build();
    client.kv().put(key.as_str(), "127.0.0.1:8080", &options).await?;
    info!("Registered as {key}, holding the lease for 15s");

    sleep(Duration::from_secs(15)).await;

    // Stop refreshing; the registration disappears once the lease runs out
    keep_alive.close();
    info!("Keep-alive stopped, waiting for the lease to expire");
    sleep(Duration::from_secs(7)).await;

    membership.close();
    Ok(())
}
