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


//! Unary call delivery.
//!
//! Every unary operation returns a [`UnaryCall`], a `'static` future. It can
//! be awaited, driven to completion from synchronous code with
//! [`ResponseDispatch::blocking`], or handed to a callback with
//! [`ResponseDispatch::with_callback`].

use std::future::Future;

use futures::future::BoxFuture;
use snafu::ResultExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::debug;

use crate::types::{ClientError, ClientResult, GrpcSnafu};

/// A pending unary call.
pub type UnaryCall<T> = BoxFuture<'static, ClientResult<T>>;

/// Receives the outcome of a unary call.
pub trait ResponseCallback<T>: Send + 'static {
    fn on_response(&mut self, response: T);

    fn on_error(&mut self, error: ClientError);

    /// Invoked once after either of the above.
    fn on_completed(&mut self) {}
}

/// Alternative ways to consume a call.
pub trait ResponseDispatch<T>: Future<Output = ClientResult<T>> + Send + Sized + 'static
where
    T: Send + 'static,
{
    /// Blocks the calling thread on `handle` until the call finishes.
    ///
    /// Must not be called from a thread that is driving an async runtime.
    fn blocking(self, handle: &Handle) -> ClientResult<T> { handle.block_on(self) }

    /// Spawns the call and reports its outcome to `callback`.
    ///
    /// Must be called from within a tokio runtime.
    fn with_callback<C>(self, mut callback: C) -> JoinHandle<()>
    where
        C: ResponseCallback<T>,
    {
        tokio::spawn(async move {
            match self.await {
                Ok(response) => callback.on_response(response),
                Err(e) => callback.on_error(e),
            }
            callback.on_completed();
        })
    }
}

impl<T, F> ResponseDispatch<T> for F
where
    F: Future<Output = ClientResult<T>> + Send + 'static,
    T: Send + 'static,
{
}

/// Wraps a tonic call into a [`UnaryCall`].
///
/// `request` is built eagerly so argument errors surface when the call is
/// polled, without touching the network.
pub(crate) fn unary<Req, Resp, F, Fut>(
    method: &'static str,
    request: ClientResult<Req>,
    call: F,
) -> UnaryCall<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<tonic::Response<Resp>, tonic::Status>> + Send,
{
    Box::pin(async move {
        let request = request?;
        debug!("Calling {method}");
        let response = call(request).await.context(GrpcSnafu)?;
        Ok(response.into_inner())
    })
}
