// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! load balance over a publisher's instances.

pub mod random;
pub mod round_robin;

pub use random::RandomBalance;
pub use round_robin::RoundRobinBalance;

use crate::client::publisher::{Instance, Publisher};
use crate::error::CallError;
use faststr::FastStr;
use std::sync::Arc;

/// [`LoadBalance`] promise the feature of the load balance policy.
///
/// Selection state is shared by every call routed through the same balancer.
pub trait LoadBalance: Send + Sync + 'static {
    /// `next` returns the instance the next attempt goes to.
    fn next(&self) -> Result<Instance, CallError>;
}

/// Fetches a non-empty instance set or reports exhaustion.
pub(crate) fn published(publisher: &dyn Publisher, balance: &'static str) -> Result<Arc<[Instance]>, CallError> {
    match publisher.publish() {
        Some(instances) if !instances.is_empty() => Ok(instances),
        _ => Err(CallError::PublisherExhausted(FastStr::from_static_str(balance))),
    }
}
