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


//! Watch service and the watch session.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use etcdlink_api::pb::etcdserverpb::{
    WatchCancelRequest, WatchRequest, WatchResponse, watch_client::WatchClient,
    watch_request::RequestUnion,
};
use futures::{StreamExt, channel::mpsc};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::{
    client::AuthChannel,
    options::WatchOptions,
    session::{
        Handshake, InboundStream, ResponseObserver, Sentinel, SessionOptions, StreamOpener,
        await_handshake, isolate, lock, spawn_receive_loop,
    },
    types::{ClientError, ClientResult, GrpcSnafu, StreamClosedSnafu},
    version::ServerCapabilities,
};

/// How long a closed watch keeps receiving while it waits for the server to
/// complete the stream.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Receives everything the server sends on one watch stream, in order.
///
/// Called from the session's receive task. Panics are caught and logged.
pub trait WatchEventHandler: Send + Sync + 'static {
    fn on_response(&self, response: WatchResponse);

    fn on_error(&self, error: ClientError);

    fn on_completed(&self);
}

struct WatchState {
    closed:   bool,
    watch_id: Option<i64>,
    outbound: Option<mpsc::UnboundedSender<WatchRequest>>,
}

struct WatchShared {
    state:            Mutex<WatchState>,
    receive_shutdown: CancellationToken,
}

impl WatchShared {
    fn is_closed(&self) -> bool { lock(&self.state).closed }

    /// Asks the server to cancel the watch and half-closes the stream.
    /// Returns `false` if the session was already closed.
    fn half_close(&self) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.closed = true;
        if let Some(outbound) = state.outbound.take() {
            if let Some(watch_id) = state.watch_id {
                let cancel = WatchRequest {
                    request_union: Some(RequestUnion::CancelRequest(WatchCancelRequest { watch_id })),
                };
                if outbound.unbounded_send(cancel).is_err() {
                    debug!("Watch {watch_id} stream already gone, cancel not sent");
                }
                info!("Watch {watch_id} cancelled");
            }
            outbound.close_channel();
        }
        true
    }

    /// Half-closes, then gives the receive task [`CLOSE_GRACE`] to deliver
    /// the cancel acknowledgement and stream completion before stopping it.
    fn close(&self) {
        if !self.half_close() {
            return;
        }
        let shutdown = self.receive_shutdown.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::select! {
                        () = shutdown.cancelled() => {}
                        () = tokio::time::sleep(CLOSE_GRACE) => {
                            debug!("Watch stream not completed within {CLOSE_GRACE:?} of close");
                            shutdown.cancel();
                        }
                    }
                });
            }
            Err(_) => shutdown.cancel(),
        }
    }

    fn abort(&self) {
        self.half_close();
        self.receive_shutdown.cancel();
    }
}

struct WatchObserver {
    handler: Arc<dyn WatchEventHandler>,
    created: Handshake<i64>,
}

impl ResponseObserver<WatchResponse> for WatchObserver {
    fn on_next(&mut self, response: WatchResponse) -> ClientResult<()> {
        if response.created && self.created.is_pending() {
            debug!("Watch {} created", response.watch_id);
            self.created.complete(Ok(response.watch_id));
        }
        if response.canceled {
            debug!(
                "Watch {} canceled by server: {}",
                response.watch_id, response.cancel_reason
            );
        }
        let handler = &self.handler;
        isolate("watch response handler", || handler.on_response(response));
        Ok(())
    }

    fn on_error(&mut self, error: ClientError) {
        warn!("Watch stream failed: {error}");
        self.created.complete(Err(error.clone()));
        let handler = &self.handler;
        isolate("watch error handler", || handler.on_error(error));
    }

    fn on_completed(&mut self) {
        self.created.complete(
            StreamClosedSnafu {
                what: "watch stream ended before the watch was created",
            }
            .fail(),
        );
        let handler = &self.handler;
        isolate("watch completion handler", || handler.on_completed());
    }
}

/// A running watch.
///
/// Created by [`WatchService::watch`]. Closing or dropping it cancels the
/// watch on the server. After [`Sentinel::close`] the handler still sees
/// responses for up to [`CLOSE_GRACE`], after a drop it sees nothing more.
pub struct WatchSentinel {
    shared:   Arc<WatchShared>,
    watch_id: i64,
}

impl WatchSentinel {
    /// Sends the create request and waits until the server confirms it.
    ///
    /// Every response, including the creation confirmation, is forwarded to
    /// `handler` in arrival order.
    pub async fn start<O>(
        opener: &O,
        key: Vec<u8>,
        options: &WatchOptions,
        handler: Arc<dyn WatchEventHandler>,
        session_options: SessionOptions,
    ) -> ClientResult<Self>
    where
        O: StreamOpener<WatchRequest, WatchResponse> + ?Sized,
    {
        let span = info_span!("watch", key = %String::from_utf8_lossy(&key));
        let (outbound, requests) = mpsc::unbounded();
        let create = WatchRequest {
            request_union: Some(RequestUnion::CreateRequest(options.to_create_request(key))),
        };
        // the receiver is still held here, so this cannot fail
        let _ = outbound.unbounded_send(create);

        let shared = Arc::new(WatchShared {
            state:            Mutex::new(WatchState {
                closed:   false,
                watch_id: None,
                outbound: Some(outbound),
            }),
            receive_shutdown: CancellationToken::new(),
        });

        let inbound: InboundStream<WatchResponse> = match opener.open(requests).await {
            Ok(inbound) => inbound,
            Err(status) => {
                shared.abort();
                return Err(status).context(GrpcSnafu);
            }
        };

        let (created, created_rx) = Handshake::channel();
        spawn_receive_loop(
            span,
            inbound,
            WatchObserver { handler, created },
            shared.receive_shutdown.clone(),
        );

        let watch_id = match await_handshake("watch creation", created_rx, session_options.handshake_timeout).await {
            Ok(watch_id) => watch_id,
            Err(e) => {
                shared.abort();
                return Err(e);
            }
        };
        lock(&shared.state).watch_id = Some(watch_id);
        info!("Watch {watch_id} started");

        Ok(Self { shared, watch_id })
    }

    /// Server-assigned id of this watch.
    pub fn watch_id(&self) -> i64 { self.watch_id }
}

impl Sentinel for WatchSentinel {
    fn is_closed(&self) -> bool { self.shared.is_closed() }

    fn close(&self) { self.shared.close() }
}

impl Drop for WatchSentinel {
    fn drop(&mut self) { self.shared.abort() }
}

impl fmt::Debug for WatchSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSentinel")
            .field("watch_id", &self.watch_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct WatchStream {
    client: WatchClient<AuthChannel>,
}

#[async_trait]
impl StreamOpener<WatchRequest, WatchResponse> for WatchStream {
    async fn open(
        &self,
        outbound: mpsc::UnboundedReceiver<WatchRequest>,
    ) -> Result<InboundStream<WatchResponse>, tonic::Status> {
        let mut client = self.client.clone();
        let response = client.watch(outbound).await?;
        Ok(response.into_inner().boxed())
    }
}

/// Watch operations.
#[derive(Debug, Clone)]
pub struct WatchService {
    client:       WatchClient<AuthChannel>,
    capabilities: Arc<ServerCapabilities>,
    options:      SessionOptions,
}

impl WatchService {
    pub(crate) fn new(
        client: WatchClient<AuthChannel>,
        capabilities: Arc<ServerCapabilities>,
        options: SessionOptions,
    ) -> Self {
        Self {
            client,
            capabilities,
            options,
        }
    }

    /// Watches `key` (or the range `options` describes) on its own stream.
    ///
    /// # Errors
    ///
    /// Fails without opening a stream when `options` need a newer server,
    /// otherwise with the error that prevented the watch from being created.
    pub async fn watch(
        &self,
        key: impl Into<Vec<u8>>,
        options: &WatchOptions,
        handler: Arc<dyn WatchEventHandler>,
    ) -> ClientResult<WatchSentinel> {
        options.validate(&self.capabilities)?;
        let opener = WatchStream {
            client: self.client.clone(),
        };
        WatchSentinel::start(&opener, key.into(), options, handler, self.options).await
    }
}
