// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Dummy publisher.

use super::{Instance, Publisher};
use std::sync::Arc;

/// [`DummyPublisher`] never has any instance.
///
/// Load balancers over it fail every resolution with publisher exhaustion.
#[derive(Clone, Debug, Default)]
pub struct DummyPublisher;

impl Publisher for DummyPublisher {
    fn publish(&self) -> Option<Arc<[Instance]>> {
        None
    }
}
