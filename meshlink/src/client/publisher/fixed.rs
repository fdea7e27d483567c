// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Fixed instance list publisher.

use super::{EndpointFactory, Instance, Publisher};
use crate::error::ClientError;
use std::sync::Arc;
use tracing::{debug, warn};

/// [`FixedPublisher`] is a simple implementation of [`Publisher`] that returns a fixed list of instances.
#[derive(Clone, Debug)]
pub struct FixedPublisher {
    instances: Arc<[Instance]>,
}

impl FixedPublisher {
    /// Creates a new [`FixedPublisher`].
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances: instances.into() }
    }
}

impl From<Vec<Instance>> for FixedPublisher {
    fn from(instances: Vec<Instance>) -> Self {
        Self::new(instances)
    }
}

impl Publisher for FixedPublisher {
    fn publish(&self) -> Option<Arc<[Instance]>> {
        Some(self.instances.clone())
    }
}

/// Builds one endpoint per address, once, and serves them through a [`FixedPublisher`].
///
/// Addresses the factory rejects are logged and skipped. Fails with [`ClientError::NoEndpoints`]
/// when nothing is left.
pub fn static_publisher<S: AsRef<str>>(addresses: &[S], factory: EndpointFactory) -> Result<FixedPublisher, ClientError> {
    let instances: Vec<Instance> = addresses
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|address| match factory(address) {
            Ok(endpoint) => Some(Instance::new(address.to_owned(), endpoint)),
            Err(e) => {
                warn!("[MESHLINK] building endpoint for instance {address} failed: {e}");
                None
            },
        })
        .collect();
    if instances.is_empty() {
        return Err(ClientError::NoEndpoints);
    }
    debug!("[MESHLINK] static publisher serving {} instance(s)", instances.len());
    Ok(FixedPublisher::new(instances))
}
