// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Interceptors around a resolved endpoint.
//!
//! A middleware receives the next endpoint and returns a new one, so it can observe or
//! rewrite the request, the context and the reply:
//!
//! ```
//! use meshlink::{endpoint_fn, BoxEndpoint, Chain, Middleware};
//! use std::sync::Arc;
//!
//! let logging = |next: BoxEndpoint| -> BoxEndpoint {
//!     endpoint_fn(move |request, ctx| {
//!         tracing::info!("calling {}", ctx.endpoint_name());
//!         next.call(request, ctx)
//!     })
//! };
//! let chain = Chain::new(vec![Arc::new(logging) as Arc<dyn Middleware>]);
//! # let _ = chain;
//! ```

use crate::endpoint::BoxEndpoint;
use std::sync::Arc;

/// Wraps an endpoint into another endpoint.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the endpoint that calls through to `next`.
    fn wrap(&self, next: BoxEndpoint) -> BoxEndpoint;
}

impl<F> Middleware for F
where
    F: Fn(BoxEndpoint) -> BoxEndpoint + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxEndpoint) -> BoxEndpoint {
        self(next)
    }
}

/// Onion composition of middleware: the first entry is the outermost layer.
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    /// Creates a chain from ordered layers.
    pub fn new(layers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { layers }
    }

    /// Appends an innermost layer.
    pub fn push(&mut self, layer: impl Middleware) {
        self.layers.push(Arc::new(layer));
    }

    /// Whether the chain has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Middleware for Chain {
    fn wrap(&self, next: BoxEndpoint) -> BoxEndpoint {
        self.layers.iter().rev().fold(next, |next, layer| layer.wrap(next))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("layers", &self.layers.len()).finish()
    }
}
