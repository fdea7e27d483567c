// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Random load balance implemention

use super::{published, LoadBalance};
use crate::client::publisher::{Instance, Publisher};
use crate::error::CallError;
use rand::Rng;
use rand_mt::Mt;
use std::sync::{Arc, Mutex, PoisonError};

/// Picks a uniformly random instance with a seeded Mersenne Twister.
///
/// The same seed reproduces the same selection sequence.
pub struct RandomBalance {
    publisher: Arc<dyn Publisher>,
    rng: Mutex<Mt>,
}

impl RandomBalance {
    /// Returns a [`RandomBalance`] seeded with `seed`.
    pub fn new(publisher: Arc<dyn Publisher>, seed: u32) -> Self {
        Self {
            publisher,
            rng: Mutex::new(Mt::new(seed)),
        }
    }

    /// Returns a [`RandomBalance`] with a seed drawn from the thread rng.
    pub fn unseeded(publisher: Arc<dyn Publisher>) -> Self {
        Self::new(publisher, rand::thread_rng().gen())
    }
}

impl LoadBalance for RandomBalance {
    fn next(&self) -> Result<Instance, CallError> {
        let instances = published(self.publisher.as_ref(), "random")?;
        let index = self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_range(0..instances.len());
        Ok(instances[index].clone())
    }
}
