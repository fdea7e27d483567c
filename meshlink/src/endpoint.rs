// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Endpoint is a callable bound to one method and one server instance.

use crate::error::CallError;
use crate::stream::StreamCall;
use faststr::FastStr;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The generic structured value every transport carries.
pub type Message = Value;

/// A shared, type-erased [`Endpoint`].
pub type BoxEndpoint = Arc<dyn Endpoint>;

/// The four call shapes of an RPC method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// One request, one response.
    Unary,
    /// A request stream answered by one response.
    ClientStreaming,
    /// One request answered by a response stream.
    ServerStreaming,
    /// Request and response streams.
    Bidi,
}

impl MethodKind {
    /// Derives the shape from a method descriptor's stream flags.
    pub fn from_streams(request_stream: bool, response_stream: bool) -> Self {
        match (request_stream, response_stream) {
            (false, false) => MethodKind::Unary,
            (true, false) => MethodKind::ClientStreaming,
            (false, true) => MethodKind::ServerStreaming,
            (true, true) => MethodKind::Bidi,
        }
    }

    /// Whether the endpoint answers with a [`StreamCall`].
    pub fn is_streaming(&self) -> bool {
        !matches!(self, MethodKind::Unary)
    }

    /// Whether [`StreamCall::write`] is allowed.
    pub fn has_request_stream(&self) -> bool {
        matches!(self, MethodKind::ClientStreaming | MethodKind::Bidi)
    }
}

/// Per call options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    retry: u32,
    timeout: Option<Duration>,
    fields: Map<String, Value>,
}

impl CallOptions {
    /// Returns options with no retry, no timeout and no extra fields.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set how many extra attempts follow a retryable failure.
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }
    /// Bound the whole attempt sequence by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    /// Attach a caller-supplied field that endpoints and middleware can read from the context.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
    /// Extra attempts.
    pub fn retry(&self) -> u32 {
        self.retry
    }
    /// The call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Per attempt metadata handed to endpoints and middleware.
#[derive(Clone, Debug)]
pub struct CallContext {
    endpoint_name: FastStr,
    attempts: u32,
    current_attempt: u32,
    timeout: Option<Duration>,
    fields: Arc<Map<String, Value>>,
}

impl CallContext {
    /// A single-attempt context without timeout.
    pub fn new(endpoint_name: impl Into<FastStr>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            attempts: 1,
            current_attempt: 1,
            timeout: None,
            fields: Default::default(),
        }
    }

    pub(crate) fn from_options(endpoint_name: FastStr, options: CallOptions) -> Self {
        Self {
            endpoint_name,
            attempts: options.retry.saturating_add(1),
            current_attempt: 1,
            timeout: options.timeout,
            fields: Arc::new(options.fields),
        }
    }

    /// Set the deadline endpoints propagate to the wire.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn set_current_attempt(&mut self, attempt: u32) {
        self.current_attempt = attempt;
    }

    /// The logical method name being called.
    pub fn endpoint_name(&self) -> &FastStr {
        &self.endpoint_name
    }
    /// Total attempts this call may make.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    /// 1-based index of the running attempt.
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
    /// The call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    /// A caller-supplied field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// What an endpoint answers with on success.
pub enum Reply {
    /// A unary response.
    Data(Message),
    /// An open streaming call.
    Stream(StreamCall),
}

impl Reply {
    /// Returns the unary response, if this is one.
    pub fn into_data(self) -> Option<Message> {
        match self {
            Reply::Data(data) => Some(data),
            Reply::Stream(_) => None,
        }
    }

    /// Returns the streaming call, if this is one.
    pub fn into_stream(self) -> Option<StreamCall> {
        match self {
            Reply::Stream(stream) => Some(stream),
            Reply::Data(_) => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Data(data) => f.debug_tuple("Data").field(data).finish(),
            Reply::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
        }
    }
}

/// A callable bound to one method and one server instance.
pub trait Endpoint: Send + Sync + 'static {
    /// Invokes the method once.
    fn call(&self, request: Message, ctx: CallContext) -> BoxFuture<'static, Result<Reply, CallError>>;
}

impl fmt::Debug for dyn Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Endpoint")
    }
}

/// See [`endpoint_fn`].
pub struct EndpointFn<F> {
    f: F,
}

impl<F, Fut> Endpoint for EndpointFn<F>
where
    F: Fn(Message, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, CallError>> + Send + 'static,
{
    fn call(&self, request: Message, ctx: CallContext) -> BoxFuture<'static, Result<Reply, CallError>> {
        (self.f)(request, ctx).boxed()
    }
}

/// Turns an async closure into a [`BoxEndpoint`].
pub fn endpoint_fn<F, Fut>(f: F) -> BoxEndpoint
where
    F: Fn(Message, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, CallError>> + Send + 'static,
{
    Arc::new(EndpointFn { f })
}
