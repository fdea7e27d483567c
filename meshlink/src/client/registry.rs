// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Name to constructor tables of transports, publishers and load balancers.
//!
//! A [`Registry`] is handed to [`Client::new`](super::Client::new), which resolves every name
//! in the config against it once.

use super::balance::{LoadBalance, RandomBalance, RoundRobinBalance};
use super::config::{LoadBalancerConfig, PublisherConfig};
use super::publisher::{static_publisher, EndpointFactory, Publisher};
use crate::error::ClientError;
use crate::transport::{grpc, local, GrpcTransport, LocalServers, LocalTransport, TransportProvider};
use faststr::FastStr;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry name of the static publisher.
pub const STATIC: &str = "static";
/// Registry name of the round-robin load balancer.
pub const ROUND_ROBIN: &str = "roundRobin";
/// Registry name of the random load balancer.
pub const RANDOM: &str = "random";

/// Builds a transport from its provider-specific config.
pub type TransportConstructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn TransportProvider>, ClientError> + Send + Sync>;
/// Builds a publisher whose instances are turned into endpoints by the factory.
pub type PublisherConstructor = Arc<dyn Fn(&PublisherConfig, EndpointFactory) -> Result<Arc<dyn Publisher>, ClientError> + Send + Sync>;
/// Builds a load balancer over a publisher.
pub type LoadBalancerConstructor = Arc<dyn Fn(&LoadBalancerConfig, Arc<dyn Publisher>) -> Result<Arc<dyn LoadBalance>, ClientError> + Send + Sync>;

/// Name to constructor tables.
#[derive(Clone)]
pub struct Registry {
    transports: HashMap<FastStr, TransportConstructor>,
    publishers: HashMap<FastStr, PublisherConstructor>,
    load_balancers: HashMap<FastStr, LoadBalancerConstructor>,
}

impl Registry {
    /// Returns a registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            transports: HashMap::new(),
            publishers: HashMap::new(),
            load_balancers: HashMap::new(),
        }
    }

    /// Additionally registers the in-process transport serving from `servers`.
    pub fn with_local(self, servers: LocalServers) -> Self {
        self.register_transport(local::NAME, move |config| Ok(Arc::new(LocalTransport::from_value(config, servers.clone())?)))
    }

    /// Registers a transport constructor under `name`, replacing any previous one.
    pub fn register_transport<F>(mut self, name: impl Into<FastStr>, constructor: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn TransportProvider>, ClientError> + Send + Sync + 'static,
    {
        self.transports.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Registers a publisher constructor under `name`, replacing any previous one.
    pub fn register_publisher<F>(mut self, name: impl Into<FastStr>, constructor: F) -> Self
    where
        F: Fn(&PublisherConfig, EndpointFactory) -> Result<Arc<dyn Publisher>, ClientError> + Send + Sync + 'static,
    {
        self.publishers.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Registers a load balancer constructor under `name`, replacing any previous one.
    pub fn register_load_balancer<F>(mut self, name: impl Into<FastStr>, constructor: F) -> Self
    where
        F: Fn(&LoadBalancerConfig, Arc<dyn Publisher>) -> Result<Arc<dyn LoadBalance>, ClientError> + Send + Sync + 'static,
    {
        self.load_balancers.insert(name.into(), Arc::new(constructor));
        self
    }

    pub(crate) fn transport(&self, name: &str) -> Result<&TransportConstructor, ClientError> {
        self.transports.get(name).ok_or_else(|| ClientError::UnknownTransport(FastStr::new(name)))
    }

    pub(crate) fn publisher(&self, name: &str) -> Result<&PublisherConstructor, ClientError> {
        self.publishers.get(name).ok_or_else(|| ClientError::UnknownPublisher(FastStr::new(name)))
    }

    pub(crate) fn load_balancer(&self, name: &str) -> Result<&LoadBalancerConstructor, ClientError> {
        self.load_balancers.get(name).ok_or_else(|| ClientError::UnknownLoadBalancer(FastStr::new(name)))
    }
}

impl Default for Registry {
    /// Registers `grpc`, `static`, `roundRobin` and `random`.
    fn default() -> Self {
        Self::empty()
            .register_transport(grpc::NAME, |config| Ok(Arc::new(GrpcTransport::from_value(config)?)))
            .register_publisher(STATIC, |config, factory| Ok(Arc::new(static_publisher(config.instances.as_slice(), factory)?)))
            .register_load_balancer(ROUND_ROBIN, |_config, publisher| Ok(Arc::new(RoundRobinBalance::new(publisher))))
            .register_load_balancer(RANDOM, |config, publisher| {
                Ok(Arc::new(match config.seed {
                    Some(seed) => RandomBalance::new(publisher, seed),
                    None => RandomBalance::unseeded(publisher),
                }))
            })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |table: Vec<&FastStr>| {
            let mut names: Vec<_> = table.into_iter().map(FastStr::as_str).collect();
            names.sort_unstable();
            names.join(", ")
        };
        let transports = names(self.transports.keys().collect());
        let publishers = names(self.publishers.keys().collect());
        let load_balancers = names(self.load_balancers.keys().collect());
        f.debug_struct("Registry")
            .field("transports", &transports)
            .field("publishers", &publishers)
            .field("load_balancers", &load_balancers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::publisher::DummyPublisher;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn default_tables() {
        let registry = Registry::default();
        assert!(registry.transport("grpc").is_ok());
        assert!(registry.publisher("static").is_ok());
        assert!(registry.load_balancer("roundRobin").is_ok());
        assert!(registry.load_balancer("random").is_ok());
        assert_matches!(registry.transport("local").err(), Some(ClientError::UnknownTransport(name)) if name.as_str() == "local");
        assert_matches!(registry.publisher("consul").err(), Some(ClientError::UnknownPublisher(_)));
        assert_matches!(registry.load_balancer("leastConn").err(), Some(ClientError::UnknownLoadBalancer(_)));
    }

    #[test]
    fn local_is_opt_in() {
        let registry = Registry::default().with_local(LocalServers::new());
        let transport = registry.transport("local").unwrap()(&json!({ "service": "Orders" })).unwrap();
        assert_eq!(transport.name(), "local");
    }

    #[test]
    fn constructor_errors_surface() {
        let registry = Registry::default();
        assert_matches!(
            registry.transport("grpc").unwrap()(&json!({})).err(),
            Some(ClientError::MissingFields { fields, .. }) if fields == vec!["service", "methods"]
        );
    }

    #[test]
    fn custom_load_balancer() {
        let registry = Registry::empty().register_load_balancer("first", |_config, publisher| Ok(Arc::new(RoundRobinBalance::new(publisher))));
        let balance = registry.load_balancer("first").unwrap()(&LoadBalancerConfig::new("first"), Arc::new(DummyPublisher)).unwrap();
        assert!(balance.next().is_err());
    }
}
