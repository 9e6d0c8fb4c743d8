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


//! Lease service and the keep-alive session.

use std::{
    fmt,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use etcdlink_api::pb::etcdserverpb::{
    LeaseGrantRequest, LeaseGrantResponse, LeaseKeepAliveRequest, LeaseKeepAliveResponse,
    LeaseLeasesRequest, LeaseLeasesResponse, LeaseRevokeRequest, LeaseRevokeResponse,
    LeaseTimeToLiveRequest, LeaseTimeToLiveResponse, lease_client::LeaseClient,
};
use futures::{FutureExt, StreamExt, channel::mpsc, future::BoxFuture};
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    client::AuthChannel,
    dispatch::{UnaryCall, unary},
    session::{
        Handshake, InboundStream, ResponseObserver, Sentinel, SessionOptions, StreamOpener,
        await_handshake, isolate, lock, spawn_receive_loop,
    },
    types::{
        ClientError, ClientResult, GrpcSnafu, InvalidArgumentSnafu, LeaseNotFoundSnafu,
        SchedulerRejectedSnafu, SchedulerStartSnafu, StreamClosedSnafu,
    },
    version::{Feature, ServerCapabilities},
};

/// Receives keep-alive traffic of one lease.
///
/// Called from the session's receive task. Panics are caught and logged.
pub trait KeepAliveEventHandler: Send + Sync + 'static {
    fn on_response(&self, response: LeaseKeepAliveResponse);

    fn on_error(&self, error: ClientError);
}

/// Delay until the next heartbeat after the server reported `ttl` seconds.
pub fn heartbeat_delay(ttl: i64) -> Duration {
    let seconds = (ttl / 2).saturating_add(1).max(0);
    Duration::from_secs(seconds.unsigned_abs())
}

/// A scheduler refused new work because it was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRejected;

impl fmt::Display for ScheduleRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("scheduler is shut down") }
}

impl std::error::Error for ScheduleRejected {}

/// A pending heartbeat that can be cancelled before it fires.
pub struct ScheduledHeartbeat {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduledHeartbeat {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancelling a heartbeat that already fired does nothing.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for ScheduledHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHeartbeat").finish_non_exhaustive()
    }
}

/// Runs delayed heartbeats for one keep-alive session.
pub trait HeartbeatScheduler: Send + Sync + 'static {
    /// Runs `task` once after `delay`. Fails once [`shutdown`] was called.
    ///
    /// [`shutdown`]: HeartbeatScheduler::shutdown
    fn schedule(
        &self,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Result<ScheduledHeartbeat, ScheduleRejected>;

    fn shutdown(&self);
}

static SCHEDULER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Default scheduler: one named OS thread per session, driving a
/// current-thread tokio runtime that runs nothing but that session's
/// heartbeats.
///
/// The thread lives until [`HeartbeatScheduler::shutdown`] or until the
/// scheduler is dropped.
#[derive(Debug)]
pub struct TaskScheduler {
    name:    String,
    runtime: tokio::runtime::Handle,
    stop:    CancellationToken,
}

impl TaskScheduler {
    /// Starts the `lease-<id>-keep-alive-<n>` thread.
    ///
    /// # Errors
    ///
    /// [`ClientError::SchedulerStart`] if the runtime or the thread can not be
    /// created.
    pub fn for_lease(lease_id: i64) -> ClientResult<Self> {
        let seq = SCHEDULER_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("lease-{lease_id:x}-keep-alive-{seq}");

        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));
                runtime.block_on(stopped.cancelled());
                debug!("Heartbeat thread {} stopped", std::thread::current().name().unwrap_or_default());
            })
            .map_err(Arc::new)
            .context(SchedulerStartSnafu { lease_id })?;

        // the thread reports back right after building its runtime
        let handle = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(std::io::Error::other("heartbeat thread exited during startup")))
            .map_err(Arc::new)
            .context(SchedulerStartSnafu { lease_id })?;

        Ok(Self {
            name,
            runtime: handle,
            stop,
        })
    }

    pub fn name(&self) -> &str { &self.name }
}

impl HeartbeatScheduler for TaskScheduler {
    fn schedule(
        &self,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) -> Result<ScheduledHeartbeat, ScheduleRejected> {
        if self.stop.is_cancelled() {
            return Err(ScheduleRejected);
        }
        let span = info_span!("heartbeat", scheduler = %self.name);
        let handle = self.runtime.spawn(
            async move {
                tokio::time::sleep(delay).await;
                task.await;
            }
            .instrument(span),
        );
        let abort = handle.abort_handle();
        Ok(ScheduledHeartbeat::new(move || abort.abort()))
    }

    fn shutdown(&self) { self.stop.cancel(); }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) { self.stop.cancel(); }
}

struct KeepAliveState {
    closed:    bool,
    scheduled: Option<ScheduledHeartbeat>,
    outbound:  Option<mpsc::UnboundedSender<LeaseKeepAliveRequest>>,
}

struct KeepAliveShared {
    lease_id:         i64,
    handler:          Option<Arc<dyn KeepAliveEventHandler>>,
    scheduler:        Arc<dyn HeartbeatScheduler>,
    state:            Mutex<KeepAliveState>,
    receive_shutdown: CancellationToken,
}

impl KeepAliveShared {
    fn is_closed(&self) -> bool { lock(&self.state).closed }

    fn send_heartbeat(&self) {
        let state = lock(&self.state);
        if state.closed {
            return;
        }
        if let Some(outbound) = &state.outbound {
            if outbound
                .unbounded_send(LeaseKeepAliveRequest { id: self.lease_id })
                .is_err()
            {
                debug!("Lease {:#x} keep-alive stream is gone, heartbeat dropped", self.lease_id);
            }
        }
    }

    /// Schedules the next heartbeat. A rejection only counts as a failure
    /// while the session is still open.
    fn rearm(self: &Arc<Self>, ttl: i64) -> ClientResult<()> {
        let delay = heartbeat_delay(ttl);
        let session: Weak<Self> = Arc::downgrade(self);
        let heartbeat = async move {
            if let Some(session) = session.upgrade() {
                session.send_heartbeat();
            }
        }
        .boxed();

        let mut state = lock(&self.state);
        match self.scheduler.schedule(delay, heartbeat) {
            Ok(next) => {
                debug!("Lease {:#x} next heartbeat in {delay:?}", self.lease_id);
                if let Some(previous) = state.scheduled.replace(next) {
                    previous.cancel();
                }
                Ok(())
            }
            Err(ScheduleRejected) if state.closed => {
                debug!("Lease {:#x} heartbeat rejected after close", self.lease_id);
                Ok(())
            }
            Err(ScheduleRejected) => SchedulerRejectedSnafu {
                lease_id: self.lease_id,
            }
            .fail(),
        }
    }

    fn close(&self) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(scheduled) = state.scheduled.take() {
                scheduled.cancel();
            }
            self.scheduler.shutdown();
            if let Some(outbound) = state.outbound.take() {
                outbound.close_channel();
            }
        }
        self.receive_shutdown.cancel();
        info!("Lease {:#x} keep-alive closed", self.lease_id);
    }
}

struct KeepAliveObserver {
    shared:    Arc<KeepAliveShared>,
    first_ttl: Handshake<i64>,
}

impl ResponseObserver<LeaseKeepAliveResponse> for KeepAliveObserver {
    fn on_next(&mut self, response: LeaseKeepAliveResponse) -> ClientResult<()> {
        if self.shared.is_closed() {
            return Ok(());
        }
        debug!("Lease {:#x} keep-alive response, ttl={}s", response.id, response.ttl);

        self.first_ttl.complete(Ok(response.ttl));
        self.shared.rearm(response.ttl)?;

        if let Some(handler) = &self.shared.handler {
            isolate("keep-alive response handler", || handler.on_response(response));
        }
        Ok(())
    }

    fn on_error(&mut self, error: ClientError) {
        warn!("Lease {:#x} keep-alive failed: {error}", self.shared.lease_id);
        self.first_ttl.complete(Err(error.clone()));
        if let Some(handler) = &self.shared.handler {
            isolate("keep-alive error handler", || handler.on_error(error));
        }
    }

    fn on_completed(&mut self) {
        debug!("Lease {:#x} keep-alive stream completed", self.shared.lease_id);
        self.first_ttl.complete(
            StreamClosedSnafu {
                what: "keep-alive stream ended before the first response",
            }
            .fail(),
        );
    }
}

/// Keeps one lease alive until closed.
///
/// Created by [`LeaseService::keep_alive`]. Heartbeats are sent every
/// `ttl / 2 + 1` seconds using the TTL of the latest response.
pub struct KeepAliveSentinel {
    shared: Arc<KeepAliveShared>,
}

impl KeepAliveSentinel {
    /// Opens the stream, sends the first heartbeat and waits for the first
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::LeaseNotFound`] when the first response carries
    /// a non-positive TTL. The session is closed on every error path.
    pub async fn start<O>(
        opener: &O,
        lease_id: i64,
        handler: Option<Arc<dyn KeepAliveEventHandler>>,
        scheduler: Arc<dyn HeartbeatScheduler>,
        options: SessionOptions,
    ) -> ClientResult<Self>
    where
        O: StreamOpener<LeaseKeepAliveRequest, LeaseKeepAliveResponse> + ?Sized,
    {
        let (outbound, requests) = mpsc::unbounded();
        let shared = Arc::new(KeepAliveShared {
            lease_id,
            handler,
            scheduler,
            state: Mutex::new(KeepAliveState {
                closed:    false,
                scheduled: None,
                outbound:  Some(outbound),
            }),
            receive_shutdown: CancellationToken::new(),
        });
        let sentinel = Self { shared };

        let ttl = match sentinel.handshake(opener, requests, options).await {
            Ok(ttl) => ttl,
            Err(error) => {
                sentinel.close();
                return Err(error);
            }
        };
        if ttl <= 0 {
            sentinel.close();
            return LeaseNotFoundSnafu { lease_id }.fail();
        }
        info!("Lease {lease_id:#x} keep-alive started, ttl={ttl}s");
        Ok(sentinel)
    }

    async fn handshake<O>(
        &self,
        opener: &O,
        requests: mpsc::UnboundedReceiver<LeaseKeepAliveRequest>,
        options: SessionOptions,
    ) -> ClientResult<i64>
    where
        O: StreamOpener<LeaseKeepAliveRequest, LeaseKeepAliveResponse> + ?Sized,
    {
        let shared = &self.shared;
        // queued before the stream opens, some servers hold back response
        // headers until the first message arrives
        shared.send_heartbeat();
        let inbound: InboundStream<LeaseKeepAliveResponse> = opener.open(requests).await.context(GrpcSnafu)?;

        let (first_ttl, first_ttl_rx) = Handshake::channel();
        spawn_receive_loop(
            info_span!("lease_keep_alive", lease_id = shared.lease_id),
            inbound,
            KeepAliveObserver {
                shared: shared.clone(),
                first_ttl,
            },
            shared.receive_shutdown.clone(),
        );

        await_handshake("the first keep-alive response", first_ttl_rx, options.handshake_timeout).await
    }

    pub fn lease_id(&self) -> i64 { self.shared.lease_id }
}

impl Sentinel for KeepAliveSentinel {
    fn is_closed(&self) -> bool { self.shared.is_closed() }

    fn close(&self) { self.shared.close() }
}

/// Dropping an open sentinel does not stop the heartbeats. The lease stays
/// alive on the scheduler thread until the process exits, and a warning
/// names the leaked session.
impl Drop for KeepAliveSentinel {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            warn!(
                "Keep-alive of lease {:#x} dropped without close, heartbeats continue",
                self.shared.lease_id
            );
        }
    }
}

impl fmt::Debug for KeepAliveSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAliveSentinel")
            .field("lease_id", &self.shared.lease_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct KeepAliveStream {
    client: LeaseClient<AuthChannel>,
}

#[async_trait]
impl StreamOpener<LeaseKeepAliveRequest, LeaseKeepAliveResponse> for KeepAliveStream {
    async fn open(
        &self,
        outbound: mpsc::UnboundedReceiver<LeaseKeepAliveRequest>,
    ) -> Result<InboundStream<LeaseKeepAliveResponse>, tonic::Status> {
        let mut client = self.client.clone();
        let response = client.lease_keep_alive(outbound).await?;
        Ok(response.into_inner().boxed())
    }
}

/// Lease operations.
#[derive(Debug, Clone)]
pub struct LeaseService {
    client:       LeaseClient<AuthChannel>,
    capabilities: Arc<ServerCapabilities>,
    options:      SessionOptions,
}

impl LeaseService {
    pub(crate) fn new(
        client: LeaseClient<AuthChannel>,
        capabilities: Arc<ServerCapabilities>,
        options: SessionOptions,
    ) -> Self {
        Self {
            client,
            capabilities,
            options,
        }
    }

    /// Grants a lease of `ttl` seconds.
    ///
    /// # Arguments
    ///
    /// * `ttl` - Requested time-to-live in seconds
    /// * `lease_id` - Requested id, zero lets the server choose
    pub fn grant(&self, ttl: i64, lease_id: i64) -> UnaryCall<LeaseGrantResponse> {
        let request = if lease_id < 0 {
            InvalidArgumentSnafu {
                message: format!("lease id must be >= 0, got {lease_id}"),
            }
            .fail()
        } else {
            Ok(LeaseGrantRequest { ttl, id: lease_id })
        };
        let mut client = self.client.clone();
        unary("Lease/LeaseGrant", request, move |request| async move {
            client.lease_grant(request).await
        })
    }

    /// Revokes a lease, deleting every key attached to it.
    pub fn revoke(&self, lease_id: i64) -> UnaryCall<LeaseRevokeResponse> {
        let mut client = self.client.clone();
        unary(
            "Lease/LeaseRevoke",
            Ok(LeaseRevokeRequest { id: lease_id }),
            move |request| async move { client.lease_revoke(request).await },
        )
    }

    /// Reads the remaining TTL of a lease, optionally with its keys.
    pub fn time_to_live(&self, lease_id: i64, with_keys: bool) -> UnaryCall<LeaseTimeToLiveResponse> {
        let request = self
            .capabilities
            .require(Feature::LeaseTimeToLive)
            .map(|()| LeaseTimeToLiveRequest {
                id:   lease_id,
                keys: with_keys,
            });
        let mut client = self.client.clone();
        unary("Lease/LeaseTimeToLive", request, move |request| async move {
            client.lease_time_to_live(request).await
        })
    }

    /// Lists every live lease.
    pub fn leases(&self) -> UnaryCall<LeaseLeasesResponse> {
        let request = self
            .capabilities
            .require(Feature::LeaseLeases)
            .map(|()| LeaseLeasesRequest {});
        let mut client = self.client.clone();
        unary("Lease/LeaseLeases", request, move |request| async move {
            client.lease_leases(request).await
        })
    }

    /// Starts keeping `lease_id` alive.
    ///
    /// Resolves once the server answered the first heartbeat.
    ///
    /// # Errors
    ///
    /// [`ClientError::LeaseNotFound`] if the lease does not exist, or the
    /// stream error that prevented the first response.
    pub async fn keep_alive(
        &self,
        lease_id: i64,
        handler: Option<Arc<dyn KeepAliveEventHandler>>,
    ) -> ClientResult<KeepAliveSentinel> {
        ensure!(
            lease_id > 0,
            InvalidArgumentSnafu {
                message: format!("lease id must be > 0, got {lease_id}"),
            }
        );
        let opener = KeepAliveStream {
            client: self.client.clone(),
        };
        let scheduler = Arc::new(TaskScheduler::for_lease(lease_id)?);
        debug!("Starting keep-alive of lease {lease_id:#x} on {}", scheduler.name());
        KeepAliveSentinel::start(&opener, lease_id, handler, scheduler, self.options).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicBool};

    use test_case::test_case;

    use super::*;
    use crate::session::testing::{FakeOpener, FakeServer, UnavailableOpener};

    type Server = FakeServer<LeaseKeepAliveRequest, LeaseKeepAliveResponse>;

    /// Records delays and keeps tasks so tests decide when a heartbeat fires.
    #[derive(Default)]
    struct ManualScheduler {
        delays:    Mutex<Vec<Duration>>,
        pending:   Mutex<Vec<BoxFuture<'static, ()>>>,
        shut_down: AtomicBool,
    }

    impl ManualScheduler {
        fn delays(&self) -> Vec<Duration> { self.delays.lock().unwrap().clone() }

        async fn fire_all(&self) {
            let pending = std::mem::take(&mut *self.pending.lock().unwrap());
            for task in pending {
                task.await;
            }
        }
    }

    impl HeartbeatScheduler for ManualScheduler {
        fn schedule(
            &self,
            delay: Duration,
            task: BoxFuture<'static, ()>,
        ) -> Result<ScheduledHeartbeat, ScheduleRejected> {
            if self.shut_down.load(Ordering::SeqCst) {
                return Err(ScheduleRejected);
            }
            self.delays.lock().unwrap().push(delay);
            self.pending.lock().unwrap().push(task);
            Ok(ScheduledHeartbeat::new(|| {}))
        }

        fn shutdown(&self) { self.shut_down.store(true, Ordering::SeqCst); }
    }

    #[derive(Default)]
    struct RecordingHandler {
        ttls:   Mutex<Vec<i64>>,
        errors: Mutex<Vec<String>>,
    }

    impl KeepAliveEventHandler for RecordingHandler {
        fn on_response(&self, response: LeaseKeepAliveResponse) { self.ttls.lock().unwrap().push(response.ttl); }

        fn on_error(&self, error: ClientError) { self.errors.lock().unwrap().push(error.to_string()); }
    }

    fn reply(lease_id: i64, ttl: i64) -> LeaseKeepAliveResponse {
        LeaseKeepAliveResponse {
            header: None,
            id: lease_id,
            ttl,
        }
    }

    async fn start_session(
        lease_id: i64,
        first_ttl: i64,
        handler: Option<Arc<dyn KeepAliveEventHandler>>,
        scheduler: Arc<ManualScheduler>,
    ) -> (ClientResult<KeepAliveSentinel>, Server) {
        let (opener, server) = FakeOpener::new();
        let session = tokio::spawn(async move {
            KeepAliveSentinel::start(&opener, lease_id, handler, scheduler, SessionOptions::default()).await
        });
        let mut server = server.await.unwrap();
        let first = server.next_request().await.unwrap();
        assert_eq!(first.id, lease_id);
        server.respond(reply(lease_id, first_ttl));
        (session.await.unwrap(), server)
    }

    #[test_case(10, Duration::from_secs(6); "even ttl")]
    #[test_case(7, Duration::from_secs(4); "odd ttl")]
    #[test_case(1, Duration::from_secs(1); "one second")]
    #[test_case(0, Duration::from_secs(1); "zero")]
    #[test_case(-5, Duration::ZERO; "negative clamps to zero")]
    fn test_heartbeat_delay(ttl: i64, expected: Duration) {
        assert_eq!(heartbeat_delay(ttl), expected);
    }

    #[tokio::test]
    async fn test_live_lease_starts_session() {
        let scheduler = Arc::new(ManualScheduler::default());
        let handler = Arc::new(RecordingHandler::default());
        let (sentinel, _server) = start_session(0x7, 10, Some(handler.clone()), scheduler.clone()).await;

        let sentinel = sentinel.unwrap();
        assert!(!sentinel.is_closed());
        assert_eq!(sentinel.lease_id(), 0x7);
        assert_eq!(scheduler.delays(), vec![Duration::from_secs(6)]);
        assert_eq!(*handler.ttls.lock().unwrap(), vec![10]);
    }

    #[test_case(0; "zero ttl")]
    #[test_case(-1; "negative ttl")]
    #[tokio::test]
    async fn test_missing_lease_is_reported(ttl: i64) {
        let scheduler = Arc::new(ManualScheduler::default());
        let (sentinel, mut server) = start_session(42, ttl, None, scheduler.clone()).await;

        let err = sentinel.unwrap_err();
        assert!(matches!(err, ClientError::LeaseNotFound { lease_id: 42 }));
        assert!(scheduler.shut_down.load(Ordering::SeqCst));
        // the send side is closed with the session
        assert!(server.next_request().await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeats_follow_latest_ttl() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (sentinel, mut server) = start_session(9, 10, None, scheduler.clone()).await;
        let sentinel = sentinel.unwrap();

        for (round, ttl) in [7, 3].into_iter().enumerate() {
            scheduler.fire_all().await;
            let heartbeat = server.next_request().await.unwrap();
            assert_eq!(heartbeat.id, 9);
            server.respond(reply(9, ttl));
            while scheduler.delays().len() < round + 2 {
                tokio::task::yield_now().await;
            }
        }

        assert_eq!(
            scheduler.delays(),
            vec![
                Duration::from_secs(6),
                Duration::from_secs(4),
                Duration::from_secs(2)
            ]
        );
        sentinel.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_heartbeats() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (sentinel, mut server) = start_session(5, 10, None, scheduler.clone()).await;
        let sentinel = sentinel.unwrap();

        sentinel.close();
        sentinel.close();
        assert!(sentinel.is_closed());

        // a timer that was already due sends nothing after close
        scheduler.fire_all().await;
        assert!(server.next_request().await.is_none());
        assert_eq!(scheduler.delays().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_keeps_open_session_alive() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (sentinel, mut server) = start_session(5, 10, None, scheduler.clone()).await;
        drop(sentinel);
        assert!(!scheduler.shut_down.load(Ordering::SeqCst));

        scheduler.fire_all().await;
        assert_eq!(server.next_request().await.unwrap().id, 5);
    }

    #[tokio::test]
    async fn test_rejection_after_close_is_swallowed() {
        let scheduler = Arc::new(ManualScheduler::default());
        let handler = Arc::new(RecordingHandler::default());
        let shared = Arc::new(KeepAliveShared {
            lease_id: 3,
            handler: Some(handler.clone()),
            scheduler: scheduler.clone(),
            state: Mutex::new(KeepAliveState {
                closed:    false,
                scheduled: None,
                outbound:  None,
            }),
            receive_shutdown: CancellationToken::new(),
        });

        shared.close();
        assert!(shared.rearm(10).is_ok());
        assert!(handler.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_while_open_is_an_error() {
        let scheduler = Arc::new(ManualScheduler::default());
        scheduler.shutdown();
        let shared = Arc::new(KeepAliveShared {
            lease_id: 3,
            handler: None,
            scheduler,
            state: Mutex::new(KeepAliveState {
                closed:    false,
                scheduled: None,
                outbound:  None,
            }),
            receive_shutdown: CancellationToken::new(),
        });

        let err = shared.rearm(10).unwrap_err();
        assert!(matches!(err, ClientError::SchedulerRejected { lease_id: 3 }));
    }

    #[tokio::test]
    async fn test_stream_error_before_first_response() {
        let scheduler = Arc::new(ManualScheduler::default());
        let handler = Arc::new(RecordingHandler::default());
        let (opener, server) = FakeOpener::new();
        let handler_dyn: Arc<dyn KeepAliveEventHandler> = handler.clone();
        let session = tokio::spawn(async move {
            KeepAliveSentinel::start(&opener, 8, Some(handler_dyn), scheduler, SessionOptions::default()).await
        });
        let server = server.await.unwrap();
        server.fail(tonic::Status::unavailable("leader lost"));

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Grpc { .. }));
        assert_eq!(handler.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_end_before_first_response() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (opener, server) = FakeOpener::new();
        let session = tokio::spawn(async move {
            KeepAliveSentinel::start(&opener, 8, None, scheduler, SessionOptions::default()).await
        });
        server.await.unwrap().finish();
        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::StreamClosed { .. }));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let scheduler = Arc::new(ManualScheduler::default());
        let err = KeepAliveSentinel::start(&UnavailableOpener, 8, None, scheduler.clone(), SessionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Grpc { .. }));
        assert!(scheduler.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_response_timeout() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (opener, server) = FakeOpener::new();
        let options = SessionOptions::builder()
            .handshake_timeout(Duration::from_secs(2))
            .build();
        let session = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { KeepAliveSentinel::start(&opener, 8, None, scheduler, options).await })
        };
        let _server = server.await.unwrap();
        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::HandshakeTimeout { .. }));
        assert!(scheduler.shut_down.load(Ordering::SeqCst));
    }

    struct PanickingHandler;

    impl KeepAliveEventHandler for PanickingHandler {
        fn on_response(&self, _response: LeaseKeepAliveResponse) { panic!("handler bug"); }

        fn on_error(&self, _error: ClientError) { panic!("handler bug"); }
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_session_alive() {
        let scheduler = Arc::new(ManualScheduler::default());
        let (sentinel, mut server) = start_session(4, 10, Some(Arc::new(PanickingHandler)), scheduler.clone()).await;
        let sentinel = sentinel.unwrap();

        scheduler.fire_all().await;
        assert_eq!(server.next_request().await.unwrap().id, 4);
        server.respond(reply(4, 10));
        while scheduler.delays().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(!sentinel.is_closed());
    }

    #[tokio::test]
    async fn test_task_scheduler_rejects_after_shutdown() {
        let scheduler = TaskScheduler::for_lease(0x10).unwrap();
        assert!(scheduler.name().starts_with("lease-10-keep-alive-"));

        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler
            .schedule(Duration::from_millis(1), async move { tx.send(()).unwrap() }.boxed())
            .unwrap();
        rx.await.unwrap();

        scheduler.shutdown();
        assert!(scheduler.schedule(Duration::ZERO, async {}.boxed()).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_scheduler_runs_heartbeats_on_its_own_thread() {
        let scheduler = TaskScheduler::for_lease(7).unwrap();
        assert!(scheduler.name().starts_with("lease-7-keep-alive-"));

        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler
            .schedule(
                Duration::ZERO,
                async move {
                    let name = std::thread::current().name().map(str::to_owned);
                    tx.send(name).unwrap();
                }
                .boxed(),
            )
            .unwrap();

        assert_eq!(rx.await.unwrap().as_deref(), Some(scheduler.name()));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_cancelled_heartbeat_never_runs() {
        let scheduler = TaskScheduler::for_lease(9).unwrap();
        let (tx, mut rx) = tokio::sync::oneshot::channel::<()>();
        scheduler
            .schedule(Duration::from_millis(50), async move { tx.send(()).unwrap() }.boxed())
            .unwrap()
            .cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::oneshot::error::TryRecvError::Closed)
        ));
        scheduler.shutdown();
    }
}
