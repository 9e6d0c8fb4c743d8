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


//! Shared machinery of the long-lived streaming sessions.
//!
//! A session owns the sending half of a bidirectional stream and a receive
//! task feeding a [`ResponseObserver`]. Construction waits on a one-shot
//! handshake that the observer completes from the receive task.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, channel::mpsc, stream::BoxStream};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error};

use crate::types::{ClientError, ClientResult, HandshakeTimeoutSnafu, StreamClosedSnafu};

/// Messages arriving from the server on a bidirectional stream.
pub type InboundStream<T> = BoxStream<'static, Result<T, tonic::Status>>;

/// Opens one bidirectional stream.
///
/// `outbound` yields the messages to send for the lifetime of the stream.
/// Closing its sender half-closes the stream.
#[async_trait]
pub trait StreamOpener<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn open(&self, outbound: mpsc::UnboundedReceiver<Req>) -> Result<InboundStream<Resp>, tonic::Status>;
}

/// Handle to a running session.
///
/// Both methods are safe to call from any thread, any number of times.
pub trait Sentinel: Send + Sync {
    fn is_closed(&self) -> bool;

    fn close(&self);
}

/// Knobs shared by the streaming sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct SessionOptions {
    /// Upper bound on waiting for the first response. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

/// Callbacks driven by the receive task.
pub(crate) trait ResponseObserver<T>: Send + 'static {
    /// An error ends the receive task after it is passed to `on_error`.
    fn on_next(&mut self, value: T) -> ClientResult<()>;

    fn on_error(&mut self, error: ClientError);

    fn on_completed(&mut self);
}

/// Write-once cell completed by the receive task.
pub(crate) struct Handshake<T> {
    tx: Option<oneshot::Sender<ClientResult<T>>>,
}

impl<T> Handshake<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<ClientResult<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub(crate) fn is_pending(&self) -> bool { self.tx.is_some() }

    /// Returns false when the cell was already completed.
    pub(crate) fn complete(&mut self, value: ClientResult<T>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // the constructor may have given up waiting already
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }
}

pub(crate) async fn await_handshake<T>(
    what: &str,
    rx: oneshot::Receiver<ClientResult<T>>,
    timeout: Option<Duration>,
) -> ClientResult<T> {
    let received = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| HandshakeTimeoutSnafu { what, timeout }.build())?,
        None => rx.await,
    };
    match received {
        Ok(outcome) => outcome,
        Err(_) => StreamClosedSnafu {
            what: format!("receive task ended before {what}"),
        }
        .fail(),
    }
}

/// Spawns the task pulling `inbound` into `observer` until the stream ends,
/// fails, or `shutdown` fires.
pub(crate) fn spawn_receive_loop<T, O>(
    span: Span,
    mut inbound: InboundStream<T>,
    mut observer: O,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    T: Send + 'static,
    O: ResponseObserver<T>,
{
    tokio::spawn(
        async move {
            loop {
                let next = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        debug!("Receive loop cancelled");
                        return;
                    }
                    next = inbound.next() => next,
                };
                match next {
                    Some(Ok(value)) => {
                        if let Err(e) = observer.on_next(value) {
                            observer.on_error(e);
                            return;
                        }
                    }
                    Some(Err(status)) => {
                        debug!("Stream failed: {status}");
                        observer.on_error(ClientError::Grpc { source: status });
                        return;
                    }
                    None => {
                        debug!("Stream completed by server");
                        observer.on_completed();
                        return;
                    }
                }
            }
        }
        .instrument(span),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Runs user callback code, logging a panic instead of unwinding into the
/// receive task.
pub(crate) fn isolate<F: FnOnce()>(what: &str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        error!("{what} panicked: {}", panic_message(payload.as_ref()));
    }
}

/// Locks session state, ignoring poisoning left by a panicking thread.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct Collect {
        seen:      Arc<Mutex<Vec<String>>>,
        handshake: Option<Handshake<u32>>,
        stop_at:   Option<u32>,
    }

    impl ResponseObserver<u32> for Collect {
        fn on_next(&mut self, value: u32) -> ClientResult<()> {
            if let Some(handshake) = self.handshake.as_mut() {
                handshake.complete(Ok(value));
            }
            lock(&self.seen).push(format!("next {value}"));
            if self.stop_at == Some(value) {
                return StreamClosedSnafu { what: "stop" }.fail();
            }
            Ok(())
        }

        fn on_error(&mut self, error: ClientError) { lock(&self.seen).push(format!("error {error}")); }

        fn on_completed(&mut self) { lock(&self.seen).push("completed".to_string()); }
    }

    #[tokio::test]
    async fn test_receive_loop_delivers_in_order_then_completes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inbound = futures::stream::iter([Ok(1u32), Ok(2), Ok(3)]).boxed();
        let observer = Collect {
            seen: seen.clone(),
            ..Default::default()
        };
        spawn_receive_loop(Span::none(), inbound, observer, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*lock(&seen), vec!["next 1", "next 2", "next 3", "completed"]);
    }

    #[tokio::test]
    async fn test_receive_loop_stops_on_observer_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inbound = futures::stream::iter([Ok(1u32), Ok(2), Ok(3)]).boxed();
        let observer = Collect {
            seen: seen.clone(),
            stop_at: Some(2),
            ..Default::default()
        };
        spawn_receive_loop(Span::none(), inbound, observer, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            *lock(&seen),
            vec!["next 1", "next 2", "error Stream closed: stop"]
        );
    }

    #[tokio::test]
    async fn test_receive_loop_reports_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inbound = futures::stream::iter([Ok(1u32), Err(tonic::Status::cancelled("gone"))]).boxed();
        let observer = Collect {
            seen: seen.clone(),
            ..Default::default()
        };
        spawn_receive_loop(Span::none(), inbound, observer, CancellationToken::new())
            .await
            .unwrap();
        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert!(seen[1].starts_with("error gRPC error"));
    }

    #[tokio::test]
    async fn test_receive_loop_cancelled() {
        let shutdown = CancellationToken::new();
        let inbound: InboundStream<u32> = futures::stream::pending().boxed();
        let task = spawn_receive_loop(Span::none(), inbound, Collect::default(), shutdown.clone());
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_completed_once() {
        let (mut handshake, rx) = Handshake::<u32>::channel();
        assert!(handshake.is_pending());
        assert!(handshake.complete(Ok(5)));
        assert!(!handshake.complete(Ok(6)));
        assert_eq!(await_handshake("first", rx, None).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dropped_handshake_is_stream_closed() {
        let (handshake, rx) = Handshake::<u32>::channel();
        drop(handshake);
        let err = await_handshake("first", rx, None).await.unwrap_err();
        assert!(matches!(err, ClientError::StreamClosed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (_handshake, rx) = Handshake::<u32>::channel();
        let err = await_handshake("first", rx, Some(Duration::from_secs(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::HandshakeTimeout { timeout, .. } if timeout == Duration::from_secs(3)));
    }

    #[test]
    fn test_isolate_swallows_panics() {
        let mut ran_after = false;
        isolate("test handler", || panic!("boom"));
        isolate("test handler", || ran_after = true);
        assert!(ran_after);
    }
}
