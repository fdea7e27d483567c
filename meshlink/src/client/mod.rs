// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Provides a client that resolves configured methods into call pipelines.
//!
//! ```no_run
//! use meshlink::client::{Client, ClientConfig, Registry};
//! use meshlink::endpoint::CallOptions;
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::from_json(
//!     r#"{
//!         "transports": { "grpc": { "service": "helloworld.Greeter", "methods": [{ "name": "SayHello" }] } },
//!         "endpoints": { "SayHello": {} },
//!         "publisher": { "name": "static", "instances": ["grpc://127.0.0.1:50051"] }
//!     }"#,
//! )?;
//! let client = Client::new(config, &Registry::default())?;
//! let service = client.connect()?;
//! let reply = service.call("SayHello", json!({ "name": "meshlink" }), CallOptions::new().with_retry(2)).await?;
//! client.end();
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod config;
pub mod publisher;
pub mod registry;
pub mod service;

pub use balance::{LoadBalance, RandomBalance, RoundRobinBalance};
pub use config::{ClientConfig, EndpointConfig, LoadBalancerConfig, PublisherConfig};
pub use publisher::{static_publisher, DummyPublisher, EndpointFactory, FixedPublisher, Instance, Publisher};
pub use registry::Registry;
pub use service::ServiceEndpoint;

use crate::endpoint::{CallOptions, Message, Reply};
use crate::error::{ClientError, Failure, RpcError};
use crate::middleware::{Chain, Middleware};
use crate::transport::{general_factory, TransportProvider};
use faststr::FastStr;
use registry::{LoadBalancerConstructor, PublisherConstructor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// How one configured method gets its instances, resolved at construction.
struct Plan {
    name: FastStr,
    publisher: PublisherConfig,
    new_publisher: PublisherConstructor,
    loadbalancer: LoadBalancerConfig,
    new_load_balancer: LoadBalancerConstructor,
    buffer_field: Option<FastStr>,
}

/// Owns the transports of a config and builds the pipelines of its methods.
pub struct Client {
    transports: Vec<Arc<dyn TransportProvider>>,
    plans: Vec<Plan>,
    middleware: Chain,
}

impl Client {
    /// Validates `config` against `registry` and constructs every transport.
    ///
    /// Missing sections, unknown names, endpoints without publisher and transport
    /// constructor errors are all fatal here.
    pub fn new(config: ClientConfig, registry: &Registry) -> Result<Self, ClientError> {
        if config.endpoints.is_empty() {
            return Err(ClientError::MissingConfig("endpoints"));
        }
        if config.transports.is_empty() {
            return Err(ClientError::MissingConfig("transports"));
        }
        let transports = config
            .transports
            .iter()
            .map(|(name, transport)| {
                let construct = registry.transport(name)?;
                construct(transport)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut plans = Vec::with_capacity(config.endpoints.len());
        for (name, endpoint) in &config.endpoints {
            let publisher = endpoint
                .publisher
                .clone()
                .or_else(|| config.publisher.clone())
                .ok_or_else(|| ClientError::NoPublisher(FastStr::new(name)))?;
            let loadbalancer = endpoint.loadbalancer.clone().or_else(|| config.loadbalancer.clone()).unwrap_or_default();
            plans.push(Plan {
                name: FastStr::new(name),
                new_publisher: registry.publisher(&publisher.name)?.clone(),
                publisher,
                new_load_balancer: registry.load_balancer(&loadbalancer.name)?.clone(),
                loadbalancer,
                buffer_field: config.buffer_fields.get(name).map(FastStr::new),
            });
        }
        Ok(Self {
            transports,
            plans,
            middleware: Chain::default(),
        })
    }

    /// Appends an innermost layer to the middleware of every method.
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Builds the publisher, load balancer and pipeline of every configured method.
    ///
    /// Instance endpoints are built eagerly. Instances no transport can serve are skipped, and a
    /// method left without any fails with [`ClientError::NoEndpoints`].
    pub fn connect(&self) -> Result<Service, ClientError> {
        let mut endpoints = HashMap::with_capacity(self.plans.len());
        for plan in &self.plans {
            let factory = general_factory(plan.name.as_str(), self.transports.clone());
            let publisher = (plan.new_publisher)(&plan.publisher, factory)?;
            let balance = (plan.new_load_balancer)(&plan.loadbalancer, publisher)?;
            let mut endpoint = ServiceEndpoint::new(plan.name.clone(), balance).with_middleware(self.middleware.clone());
            if let Some(field) = &plan.buffer_field {
                endpoint = endpoint.with_buffer_field(field.clone());
            }
            endpoints.insert(plan.name.clone(), endpoint);
        }
        info!(
            "[MESHLINK] client connected with endpoints [{}]",
            self.plans.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(Service { endpoints: Arc::new(endpoints) })
    }

    /// Ends every transport, closing their connections. Idempotent.
    pub fn end(&self) {
        for transport in &self.transports {
            transport.end();
        }
        info!("[MESHLINK] client disconnected");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transports", &self.transports.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("endpoints", &self.plans.iter().map(|p| p.name.as_str()).collect::<Vec<_>>())
            .field("middleware", &self.middleware)
            .finish()
    }
}

/// The connected methods of a [`Client`], by name. Clones share the same pipelines.
#[derive(Clone, Debug)]
pub struct Service {
    endpoints: Arc<HashMap<FastStr, ServiceEndpoint>>,
}

impl Service {
    /// The pipeline of method `name`.
    pub fn get(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.get(name)
    }

    /// Names of every connected method.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(FastStr::as_str)
    }

    /// Calls method `name`. Unconfigured names are rejected as unimplemented.
    pub async fn call(&self, name: &str, request: Message, options: CallOptions) -> Result<Reply, Failure> {
        match self.get(name) {
            Some(endpoint) => endpoint.invoke(request, options).await,
            None => Err(Failure::Rejected(RpcError::unimplemented(format!("endpoint {name} is not configured")))),
        }
    }
}
