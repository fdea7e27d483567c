// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! A client config.

use crate::error::ClientError;
use faststr::FastStr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The whole client config, as accepted from JSON:
///
/// ```json
/// {
///   "transports": { "grpc": { "service": "helloworld.Greeter", "methods": [{ "name": "SayHello" }] } },
///   "endpoints": { "SayHello": {} },
///   "publisher": { "name": "static", "instances": ["grpc://127.0.0.1:50051"] },
///   "loadbalancer": { "name": "random", "seed": 7 },
///   "bufferFields": { "SayHello": "payload" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Provider-specific config per transport name. Transports are tried in name order.
    #[serde(default)]
    pub transports: BTreeMap<String, Value>,
    /// Methods to expose, with optional per method overrides.
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
    /// Default publisher of endpoints without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherConfig>,
    /// Default load balancer of endpoints without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer: Option<LoadBalancerConfig>,
    /// Request field left out of debug logs, per endpoint name.
    #[serde(default, rename = "bufferFields")]
    pub buffer_fields: BTreeMap<String, String>,
}

impl ClientConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a config from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        serde_json::from_str(json).map_err(|e| ClientError::InvalidConfig {
            section: FastStr::from_static_str("client"),
            reason: e.to_string(),
        })
    }

    /// Set the provider-specific config of transport `name`.
    pub fn with_transport(mut self, name: impl Into<String>, config: impl Serialize) -> Result<Self, ClientError> {
        let name = name.into();
        let config = serde_json::to_value(config).map_err(|e| ClientError::InvalidConfig {
            section: FastStr::new(&name),
            reason: e.to_string(),
        })?;
        self.transports.insert(name, config);
        Ok(self)
    }
    /// Expose method `name`.
    pub fn with_endpoint(mut self, name: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.endpoints.insert(name.into(), endpoint);
        self
    }
    /// Set the default publisher.
    pub fn with_publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = Some(publisher);
        self
    }
    /// Set the default load balancer.
    pub fn with_load_balancer(mut self, loadbalancer: LoadBalancerConfig) -> Self {
        self.loadbalancer = Some(loadbalancer);
        self
    }
    /// Leave request field `field` of endpoint `endpoint` out of debug logs.
    pub fn with_buffer_field(mut self, endpoint: impl Into<String>, field: impl Into<String>) -> Self {
        self.buffer_fields.insert(endpoint.into(), field.into());
        self
    }
}

/// Per method overrides.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Publisher of this method only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherConfig>,
    /// Load balancer of this method only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer: Option<LoadBalancerConfig>,
}

impl EndpointConfig {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the publisher of this method.
    pub fn with_publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = Some(publisher);
        self
    }
    /// Set the load balancer of this method.
    pub fn with_load_balancer(mut self, loadbalancer: LoadBalancerConfig) -> Self {
        self.loadbalancer = Some(loadbalancer);
        self
    }
}

/// Selects a publisher by registry name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Registry name, e.g. `static`.
    pub name: String,
    /// Instance addresses, `<scheme>://<host>:<port>`.
    #[serde(default)]
    pub instances: Vec<String>,
}

impl PublisherConfig {
    /// A publisher config without instances.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
        }
    }
    /// The `static` publisher over `instances`.
    pub fn fixed<S: Into<String>>(instances: impl IntoIterator<Item = S>) -> Self {
        Self::new(super::registry::STATIC).with_instances(instances)
    }
    /// Set the instance addresses.
    pub fn with_instances<S: Into<String>>(mut self, instances: impl IntoIterator<Item = S>) -> Self {
        self.instances = instances.into_iter().map(Into::into).collect();
        self
    }
}

/// Selects a load balancer by registry name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Registry name, e.g. `roundRobin` or `random`.
    pub name: String,
    /// Seed of deterministic strategies. Drawn at random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl LoadBalancerConfig {
    /// A load balancer config without seed.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), seed: None }
    }
    /// Set the seed.
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self::new(super::registry::ROUND_ROBIN)
    }
}
