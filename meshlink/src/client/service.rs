// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The call pipeline of one named method.
//!
//! Every attempt resolves a fresh instance through the load balancer, wraps its endpoint in
//! the middleware chain and calls it. Streaming replies are returned as they are. A classified
//! error outside the retryable kinds is returned at once; retryable errors, publisher
//! exhaustion and other attempt failures are recorded and the next attempt starts. A call
//! timeout raised from inside an attempt stops the sequence. An optional timeout races the
//! whole sequence; when it wins, the sequence keeps running detached and its result is dropped.

use super::balance::LoadBalance;
use crate::endpoint::{CallContext, CallOptions, Message, Reply};
use crate::error::{CallError, Failure};
use crate::middleware::{Chain, Middleware};
use faststr::FastStr;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Retry, timeout and middleware around endpoint resolution and invocation.
#[derive(Clone)]
pub struct ServiceEndpoint {
    name: FastStr,
    balance: Arc<dyn LoadBalance>,
    middleware: Arc<Chain>,
    buffer_field: Option<FastStr>,
}

impl ServiceEndpoint {
    /// Returns the pipeline of method `name`, resolving instances through `balance`.
    pub fn new(name: impl Into<FastStr>, balance: Arc<dyn LoadBalance>) -> Self {
        Self {
            name: name.into(),
            balance,
            middleware: Default::default(),
            buffer_field: None,
        }
    }

    /// Wrap every resolved endpoint in `middleware`.
    pub fn with_middleware(mut self, middleware: Chain) -> Self {
        self.middleware = Arc::new(middleware);
        self
    }

    /// Leave request field `field` out of debug logs.
    pub fn with_buffer_field(mut self, field: impl Into<FastStr>) -> Self {
        self.buffer_field = Some(field.into());
        self
    }

    /// The method name.
    pub fn name(&self) -> &FastStr {
        &self.name
    }

    /// Calls the method.
    ///
    /// Ordinary RPC failures never panic or escape as another error type; they resolve to a
    /// [`Failure`].
    pub async fn invoke(&self, request: Message, options: CallOptions) -> Result<Reply, Failure> {
        let ctx = CallContext::from_options(self.name.clone(), options);
        debug!("[MESHLINK] calling endpoint {} with request {}", self.name, self.loggable(&request));
        let Some(timeout) = ctx.timeout() else {
            return self.clone().attempt_all(request, ctx).await;
        };
        let attempts = tokio::spawn(self.clone().attempt_all(request, ctx));
        match tokio::time::timeout(timeout, attempts).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Failure::Exhausted(vec![CallError::Aborted(join.to_string())])),
            Err(_) => {
                debug!("[MESHLINK] timeout of {}ms exceeded, abandoning endpoint {}", timeout.as_millis(), self.name);
                Err(Failure::Exhausted(vec![CallError::CallTimeout]))
            },
        }
    }

    async fn attempt_all(self, request: Message, mut ctx: CallContext) -> Result<Reply, Failure> {
        let attempts = ctx.attempts();
        let mut errors = Vec::new();
        for attempt in 1..=attempts {
            ctx.set_current_attempt(attempt);
            debug!("[MESHLINK] attempt {attempt}/{attempts} calling endpoint {}", self.name);
            let err = match self.attempt(request.clone(), ctx.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(CallError::Rpc(e)) if !e.kind().is_retryable() => return Err(Failure::Rejected(e)),
                Err(e) => e,
            };
            error!("[MESHLINK] attempt {attempt}/{attempts} error: {err}");
            let timed_out = err == CallError::CallTimeout;
            errors.push(err);
            if timed_out {
                debug!("[MESHLINK] attempt {attempt}/{attempts} returning with call timeout");
                break;
            }
        }
        Err(Failure::Exhausted(errors))
    }

    async fn attempt(&self, request: Message, ctx: CallContext) -> Result<Reply, CallError> {
        let instance = self.balance.next()?;
        trace!("[MESHLINK] endpoint {} resolved to {}", self.name, instance.address);
        let endpoint = if self.middleware.is_empty() { instance.endpoint } else { self.middleware.wrap(instance.endpoint) };
        endpoint.call(request, ctx).await
    }

    fn loggable(&self, request: &Message) -> String {
        match (&self.buffer_field, request) {
            (Some(field), Message::Object(fields)) if fields.contains_key(field.as_str()) => {
                let mut stripped = fields.clone();
                stripped.remove(field.as_str());
                Message::Object(stripped).to_string()
            },
            _ => request.to_string(),
        }
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("name", &self.name)
            .field("middleware", &self.middleware)
            .field("buffer_field", &self.buffer_field)
            .finish()
    }
}
