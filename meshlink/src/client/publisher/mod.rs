// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Publishers supply the set of currently available endpoint instances.

pub mod dummy;
pub mod fixed;

pub use dummy::DummyPublisher;
pub use fixed::{static_publisher, FixedPublisher};

use crate::endpoint::BoxEndpoint;
use crate::error::ClientError;
use faststr::FastStr;
use std::fmt;
use std::sync::Arc;

/// Builds the endpoint of one instance address.
pub type EndpointFactory = Arc<dyn Fn(&str) -> Result<BoxEndpoint, ClientError> + Send + Sync>;

/// One reachable server instance and the endpoint bound to it.
#[derive(Clone)]
pub struct Instance {
    /// The address the endpoint was built from.
    pub address: FastStr,
    /// The callable bound to that address.
    pub endpoint: BoxEndpoint,
}

impl Instance {
    /// Pairs an address with its endpoint.
    pub fn new(address: impl Into<FastStr>, endpoint: BoxEndpoint) -> Self {
        Self {
            address: address.into(),
            endpoint,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("address", &self.address).finish()
    }
}

/// [`Publisher`] promise the feature of supplying instances to a load balancer.
pub trait Publisher: Send + Sync + 'static {
    /// Returns the current instance set, or `None` if there is none.
    fn publish(&self) -> Option<Arc<[Instance]>>;
}
