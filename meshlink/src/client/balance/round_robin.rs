// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Round robin load balance implemention

use super::{published, LoadBalance};
use crate::client::publisher::{Instance, Publisher};
use crate::error::CallError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks `instances[counter % n]`, advancing the counter once per resolution.
pub struct RoundRobinBalance {
    publisher: Arc<dyn Publisher>,
    counter: AtomicUsize,
}

impl RoundRobinBalance {
    /// Returns a [`RoundRobinBalance`] starting at the first instance.
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalance for RoundRobinBalance {
    fn next(&self) -> Result<Instance, CallError> {
        let instances = published(self.publisher.as_ref(), "roundRobin")?;
        let turn = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(instances[turn % instances.len()].clone())
    }
}
