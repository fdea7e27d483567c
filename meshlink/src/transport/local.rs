// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! In-process transport.
//!
//! Servers register their services in a [`LocalServers`] registry under an instance key.
//! Addresses of the form `local://<key>` then resolve to direct handler calls, without any
//! serialization or network hop.

use super::TransportProvider;
use crate::endpoint::{BoxEndpoint, CallContext, Endpoint, Message, MethodKind, Reply};
use crate::error::{CallError, ClientError, RpcError};
use crate::net::InstanceAddress;
use crate::stream::{RequestStream, StreamCall, StreamEmitter};
use faststr::FastStr;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Registry name of the in-process transport.
pub const NAME: &str = "local";

type UnaryHandler = Arc<dyn Fn(Message, CallContext) -> BoxFuture<'static, anyhow::Result<Message>> + Send + Sync>;
type StreamHandler = Arc<dyn Fn(Message, RequestStream, StreamEmitter) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
enum LocalMethod {
    Unary(UnaryHandler),
    Streaming(MethodKind, StreamHandler),
}

/// Named handlers of one service.
#[derive(Clone, Default)]
pub struct LocalService {
    methods: HashMap<FastStr, LocalMethod>,
}

impl LocalService {
    /// Returns a service without methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unary handler.
    ///
    /// Return an [`RpcError`] (possibly wrapped in context) to answer with a specific kind;
    /// any other error answers as internal.
    pub fn unary<F, Fut>(mut self, name: impl Into<FastStr>, handler: F) -> Self
    where
        F: Fn(Message, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Message>> + Send + 'static,
    {
        let handler: UnaryHandler = Arc::new(move |request, ctx| handler(request, ctx).boxed());
        self.methods.insert(name.into(), LocalMethod::Unary(handler));
        self
    }

    /// Registers a streaming handler of the given shape.
    ///
    /// The handler gets the initial request, the stream of written messages and the emitter
    /// for its responses. Returning ends the response stream; an error is delivered to the reader.
    pub fn streaming<F, Fut>(mut self, name: impl Into<FastStr>, kind: MethodKind, handler: F) -> Self
    where
        F: Fn(Message, RequestStream, StreamEmitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: StreamHandler = Arc::new(move |request, requests, emitter| handler(request, requests, emitter).boxed());
        self.methods.insert(name.into(), LocalMethod::Streaming(kind, handler));
        self
    }

    fn method(&self, name: &str) -> Option<LocalMethod> {
        self.methods.get(name).cloned()
    }
}

/// The services one in-process instance hosts.
#[derive(Clone, Default)]
pub struct LocalServer {
    services: HashMap<FastStr, LocalService>,
}

impl LocalServer {
    /// Returns a server without services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts `service` under `name`.
    pub fn with_service(mut self, name: impl Into<FastStr>, service: LocalService) -> Self {
        self.services.insert(name.into(), service);
        self
    }
}

/// Process-local registry of in-process instances, keyed by instance authority.
///
/// Clones share the same registry. Pass it to [`LocalTransport::new`] or
/// [`Registry::with_local`](crate::client::Registry::with_local).
#[derive(Clone, Default)]
pub struct LocalServers {
    servers: Arc<RwLock<HashMap<FastStr, LocalServer>>>,
}

impl LocalServers {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `server` under `instance`, e.g. `orders-1` for `local://orders-1`.
    pub fn register(&self, instance: impl Into<FastStr>, server: LocalServer) {
        let instance = instance.into();
        info!("[MESHLINK] local server {instance} registered");
        self.servers.write().unwrap_or_else(PoisonError::into_inner).insert(instance, server);
    }

    /// Removes the server under `instance`.
    pub fn deregister(&self, instance: &str) -> Option<LocalServer> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner).remove(instance)
    }

    fn get(&self, instance: &str) -> Option<LocalServer> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner).get(instance).cloned()
    }
}

/// Config of the in-process transport.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Name of the service to call on every instance. Required.
    #[serde(default)]
    pub service: Option<String>,
}

impl LocalConfig {
    /// Config for `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: Some(service.into()) }
    }
}

/// The in-process transport.
pub struct LocalTransport {
    service: FastStr,
    servers: LocalServers,
    connected: Arc<AtomicBool>,
}

impl LocalTransport {
    /// Validates `config` and binds the transport to `servers`.
    pub fn new(config: LocalConfig, servers: LocalServers) -> Result<Self, ClientError> {
        let service = config.service.filter(|s| !s.is_empty()).ok_or_else(|| ClientError::MissingFields {
            transport: FastStr::from_static_str(NAME),
            fields: vec!["service"],
        })?;
        Ok(Self {
            service: FastStr::new(service),
            servers,
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Decodes a provider-specific config section, then behaves like [`LocalTransport::new`].
    pub fn from_value(value: &serde_json::Value, servers: LocalServers) -> Result<Self, ClientError> {
        let config = LocalConfig::deserialize(value).map_err(|e| ClientError::InvalidConfig {
            section: FastStr::from_static_str(NAME),
            reason: e.to_string(),
        })?;
        Self::new(config, servers)
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("service", &self.service)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransportProvider for LocalTransport {
    fn name(&self) -> &str {
        NAME
    }

    fn make_endpoint(&self, method: &str, address: &str) -> Result<BoxEndpoint, ClientError> {
        let instance = InstanceAddress::parse_for(address, NAME)?.authority();
        let server = self.servers.get(&instance).ok_or_else(|| ClientError::UnknownInstance(instance.clone()))?;
        let service = server
            .services
            .get(&self.service)
            .ok_or_else(|| ClientError::UnknownService(self.service.clone()))?;
        Ok(Arc::new(LocalEndpoint {
            method: FastStr::new(method),
            handler: service.method(method),
            connected: self.connected.clone(),
        }))
    }

    fn end(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("[MESHLINK] local transport for {} ended", self.service);
        }
    }
}

struct LocalEndpoint {
    method: FastStr,
    handler: Option<LocalMethod>,
    connected: Arc<AtomicBool>,
}

impl Endpoint for LocalEndpoint {
    fn call(&self, request: Message, ctx: CallContext) -> BoxFuture<'static, Result<Reply, CallError>> {
        let connected = self.connected.load(Ordering::Acquire);
        invoke(connected, self.method.clone(), self.handler.clone(), request, ctx).boxed()
    }
}

async fn invoke(connected: bool, method: FastStr, handler: Option<LocalMethod>, request: Message, ctx: CallContext) -> Result<Reply, CallError> {
    if !connected {
        return Err(RpcError::unavailable("unreachable").into());
    }
    match handler {
        None => Err(RpcError::unimplemented(format!("method {method} is not implemented")).into()),
        Some(LocalMethod::Unary(handler)) => match handler(request, ctx).await {
            Ok(response) => Ok(Reply::Data(response)),
            Err(e) => Err(classify_error(e).into()),
        },
        Some(LocalMethod::Streaming(kind, handler)) => {
            let (call, emitter, requests) = StreamCall::open(kind);
            tokio::spawn(async move {
                match handler(request, requests, emitter.clone()).await {
                    Ok(()) => emitter.end(),
                    Err(e) => emitter.error(classify_error(e)),
                }
            });
            Ok(Reply::Stream(call))
        },
    }
}

/// Classifies a handler error: the first [`RpcError`] in its chain keeps its kind, anything else is internal.
pub fn classify_error(error: anyhow::Error) -> RpcError {
    match error.chain().find_map(|cause| cause.downcast_ref::<RpcError>()) {
        Some(rpc) => rpc.clone(),
        None => RpcError::internal(error.to_string()),
    }
}
