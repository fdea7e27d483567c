// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! gRPC transport built on [tonic](https://docs.rs/tonic).
//!
//! Methods are described in config rather than generated code, and messages travel as
//! JSON through [`JsonCodec`]. One lazy [`Channel`] is kept per instance authority and
//! shared by every endpoint on it.

use super::codec::JsonCodec;
use super::TransportProvider;
use crate::endpoint::{BoxEndpoint, CallContext, Endpoint, Message, MethodKind, Reply};
use crate::error::{CallError, ClientError, ErrorKind, RpcError};
use crate::net::InstanceAddress;
use crate::stream::{StreamCall, StreamEmitter};
use faststr::FastStr;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::uri::PathAndQuery;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tonic::client::Grpc;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint as ChannelBuilder, Identity};
use tonic::{Code, Request, Status, Streaming};
use tracing::{debug, trace};

/// Registry name of the gRPC transport.
pub const NAME: &str = "grpc";

const CLOSED_CHANNEL: &str = "call cannot be created from a closed channel";

/// Config of the gRPC transport.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcConfig {
    /// Fully qualified service name, e.g. `helloworld.Greeter`. Required.
    #[serde(default)]
    pub service: Option<String>,
    /// Methods the service declares. Required.
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    /// Connect timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// TLS material. Insecure when absent.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl GrpcConfig {
    /// Config for `service` without methods yet.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Default::default()
        }
    }
    /// Declare a method.
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
    /// Use TLS.
    pub fn with_ssl(mut self, ssl: SslCredentials) -> Self {
        self.credentials = Some(Credentials { ssl: Some(ssl) });
        self
    }
}

/// One method of the service description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Method name as declared by the service.
    pub name: String,
    /// The client sends a stream.
    #[serde(default)]
    pub request_stream: bool,
    /// The server answers with a stream.
    #[serde(default)]
    pub response_stream: bool,
}

impl MethodDescriptor {
    /// Describes a method of the given shape.
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            request_stream: kind.has_request_stream(),
            response_stream: matches!(kind, MethodKind::ServerStreaming | MethodKind::Bidi),
        }
    }
    /// Describes a unary method.
    pub fn unary(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Unary)
    }
    /// The call shape.
    pub fn kind(&self) -> MethodKind {
        MethodKind::from_streams(self.request_stream, self.response_stream)
    }
}

/// Credentials section of [`GrpcConfig`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// TLS settings.
    #[serde(default)]
    pub ssl: Option<SslCredentials>,
}

/// PEM files for TLS. Without `certs` the platform roots are trusted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SslCredentials {
    /// Root CA certificates.
    #[serde(default)]
    pub certs: Option<PathBuf>,
    /// Client private key.
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Client certificate chain.
    #[serde(default)]
    pub chain: Option<PathBuf>,
    /// Overrides the server name checked against the certificate.
    #[serde(default)]
    pub domain: Option<String>,
}

/// The network transport.
pub struct GrpcTransport {
    service: FastStr,
    methods: Vec<MethodDescriptor>,
    connect_timeout: Option<Duration>,
    tls: Option<ClientTlsConfig>,
    connections: Mutex<HashMap<FastStr, Arc<Connection>>>,
    ended: AtomicBool,
}

impl GrpcTransport {
    /// Validates `config` and loads its TLS material.
    pub fn new(config: GrpcConfig) -> Result<Self, ClientError> {
        let mut missing = Vec::new();
        if config.service.as_deref().map_or(true, str::is_empty) {
            missing.push("service");
        }
        if config.methods.is_empty() {
            missing.push("methods");
        }
        let service = match config.service {
            Some(service) if missing.is_empty() => service,
            _ => {
                return Err(ClientError::MissingFields {
                    transport: FastStr::from_static_str(NAME),
                    fields: missing,
                })
            },
        };
        let tls = match config.credentials.and_then(|c| c.ssl) {
            Some(ssl) => Some(load_tls(&ssl)?),
            None => None,
        };
        Ok(Self {
            service: FastStr::new(service),
            methods: config.methods,
            connect_timeout: config.timeout.map(Duration::from_millis),
            tls,
            connections: Default::default(),
            ended: AtomicBool::new(false),
        })
    }

    /// Decodes a provider-specific config section, then behaves like [`GrpcTransport::new`].
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ClientError> {
        let config = GrpcConfig::deserialize(value).map_err(|e| ClientError::InvalidConfig {
            section: FastStr::from_static_str(NAME),
            reason: e.to_string(),
        })?;
        Self::new(config)
    }

    fn connection(&self, address: &InstanceAddress, raw: &str) -> Result<Arc<Connection>, ClientError> {
        let authority = address.authority();
        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        // checked under the lock so a concurrent end cannot miss the new channel
        if self.ended.load(Ordering::Acquire) {
            return Ok(Arc::new(Connection::closed()));
        }
        if let Some(connection) = connections.get(&authority) {
            return Ok(connection.clone());
        }
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let mut builder = ChannelBuilder::from_shared(format!("{scheme}://{authority}")).map_err(|e| ClientError::invalid_address(raw, e.to_string()))?;
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(tls) = &self.tls {
            builder = builder.tls_config(tls.clone()).map_err(|e| ClientError::Credentials(e.to_string()))?;
        }
        debug!("[MESHLINK] opening gRPC channel to {authority}");
        let connection = Arc::new(Connection {
            channel: RwLock::new(Some(builder.connect_lazy())),
        });
        connections.insert(authority, connection.clone());
        Ok(connection)
    }

    #[cfg(test)]
    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

impl TransportProvider for GrpcTransport {
    fn name(&self) -> &str {
        NAME
    }

    fn make_endpoint(&self, method: &str, address: &str) -> Result<BoxEndpoint, ClientError> {
        let parsed = InstanceAddress::parse_for(address, NAME)?;
        let descriptor = self
            .methods
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(method))
            .ok_or_else(|| ClientError::MethodNotFound(FastStr::new(method)))?;
        let path = PathAndQuery::try_from(format!("/{}/{}", self.service, descriptor.name)).map_err(|e| ClientError::InvalidConfig {
            section: FastStr::from_static_str(NAME),
            reason: e.to_string(),
        })?;
        let connection = self.connection(&parsed, address)?;
        Ok(Arc::new(GrpcEndpoint {
            connection,
            path,
            kind: descriptor.kind(),
        }))
    }

    fn end(&self) {
        let connections = {
            let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            self.ended.store(true, Ordering::Release);
            std::mem::take(&mut *connections)
        };
        for (authority, connection) in connections {
            trace!("[MESHLINK] closing gRPC channel to {authority}");
            connection.close();
        }
    }
}

impl fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("service", &self.service)
            .field("methods", &self.methods)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .finish()
    }
}

/// A channel that can be closed under the endpoints sharing it.
struct Connection {
    channel: RwLock<Option<Channel>>,
}

impl Connection {
    fn closed() -> Self {
        Self { channel: RwLock::new(None) }
    }

    fn channel(&self) -> Option<Channel> {
        self.channel.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn close(&self) {
        self.channel.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct GrpcEndpoint {
    connection: Arc<Connection>,
    path: PathAndQuery,
    kind: MethodKind,
}

impl Endpoint for GrpcEndpoint {
    fn call(&self, request: Message, ctx: CallContext) -> BoxFuture<'static, Result<Reply, CallError>> {
        invoke(self.connection.channel(), self.path.clone(), self.kind, request, ctx.timeout()).boxed()
    }
}

async fn invoke(channel: Option<Channel>, path: PathAndQuery, kind: MethodKind, request: Message, timeout: Option<Duration>) -> Result<Reply, CallError> {
    let channel = channel.ok_or_else(|| RpcError::unavailable(CLOSED_CHANNEL))?;
    if kind.is_streaming() {
        return Ok(Reply::Stream(open_stream(channel, path, kind, request, timeout)));
    }
    let mut grpc = Grpc::new(channel);
    grpc.ready().await.map_err(|e| RpcError::unavailable(format!("service was not ready: {e}")))?;
    let response = grpc.unary(with_deadline(request, timeout), path, JsonCodec).await.map_err(classify_status)?;
    Ok(Reply::Data(response.into_inner()))
}

enum Inbound {
    Single(Message),
    Stream(Streaming<Message>),
}

fn open_stream(channel: Channel, path: PathAndQuery, kind: MethodKind, request: Message, timeout: Option<Duration>) -> StreamCall {
    let (call, emitter, requests) = StreamCall::open(kind);
    tokio::spawn(async move {
        let mut grpc = Grpc::new(channel);
        if let Err(e) = grpc.ready().await {
            emitter.error(RpcError::unavailable(format!("service was not ready: {e}")));
            return;
        }
        let opened = match kind {
            MethodKind::ServerStreaming => grpc
                .server_streaming(with_deadline(request, timeout), path, JsonCodec)
                .await
                .map(|r| Inbound::Stream(r.into_inner())),
            MethodKind::ClientStreaming => grpc
                .client_streaming(with_deadline(requests, timeout), path, JsonCodec)
                .await
                .map(|r| Inbound::Single(r.into_inner())),
            MethodKind::Bidi | MethodKind::Unary => grpc
                .streaming(with_deadline(requests, timeout), path, JsonCodec)
                .await
                .map(|r| Inbound::Stream(r.into_inner())),
        };
        match opened {
            Ok(Inbound::Single(message)) => {
                emitter.data(message);
                emitter.end();
            },
            Ok(Inbound::Stream(inbound)) => pump(inbound, &emitter).await,
            Err(status) => emitter.error(classify_status(status)),
        }
    });
    call
}

async fn pump(mut inbound: Streaming<Message>, emitter: &StreamEmitter) {
    loop {
        match inbound.message().await {
            Ok(Some(message)) => {
                if !emitter.data(message) {
                    break;
                }
            },
            Ok(None) => {
                emitter.end();
                break;
            },
            Err(status) => {
                emitter.error(classify_status(status));
                break;
            },
        }
    }
}

fn with_deadline<T>(message: T, timeout: Option<Duration>) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

/// Maps a gRPC status code onto the taxonomy. `Ok` and `Unknown` have no counterpart.
pub fn kind_of(code: Code) -> Option<ErrorKind> {
    Some(match code {
        Code::Ok | Code::Unknown => return None,
        Code::Cancelled => ErrorKind::Cancelled,
        Code::InvalidArgument => ErrorKind::InvalidArgument,
        Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        Code::NotFound => ErrorKind::NotFound,
        Code::AlreadyExists => ErrorKind::AlreadyExists,
        Code::PermissionDenied => ErrorKind::PermissionDenied,
        Code::ResourceExhausted => ErrorKind::ResourceExhausted,
        Code::FailedPrecondition => ErrorKind::FailedPrecondition,
        Code::Aborted => ErrorKind::Aborted,
        Code::OutOfRange => ErrorKind::OutOfRange,
        Code::Unimplemented => ErrorKind::Unimplemented,
        Code::Internal => ErrorKind::Internal,
        Code::Unavailable => ErrorKind::Unavailable,
        Code::DataLoss => ErrorKind::DataLoss,
        Code::Unauthenticated => ErrorKind::Unauthenticated,
    })
}

/// Classifies a status by code, then by message.
pub fn classify_status(status: Status) -> RpcError {
    let kind = ErrorKind::classify(kind_of(status.code()), status.message());
    RpcError::new(kind, status.message())
}

fn load_tls(ssl: &SslCredentials) -> Result<ClientTlsConfig, ClientError> {
    let mut tls = ClientTlsConfig::new();
    tls = match &ssl.certs {
        Some(certs) => tls.ca_certificate(Certificate::from_pem(read_pem(certs)?)),
        None => tls.with_native_roots(),
    };
    match (&ssl.chain, &ssl.key) {
        (Some(chain), Some(key)) => tls = tls.identity(Identity::from_pem(read_pem(chain)?, read_pem(key)?)),
        (None, None) => {},
        _ => return Err(ClientError::Credentials("ssl key and chain must be configured together".to_string())),
    }
    if let Some(domain) = &ssl.domain {
        tls = tls.domain_name(domain.clone());
    }
    Ok(tls)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|e| ClientError::Credentials(format!("reading {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn config() -> GrpcConfig {
        GrpcConfig::new("test.Echo")
            .with_method(MethodDescriptor::unary("Say"))
            .with_method(MethodDescriptor::new("Chat", MethodKind::Bidi))
            .with_connect_timeout(Duration::from_millis(100))
    }

    #[test]
    fn missing_fields_are_enumerated() {
        assert_matches!(
            GrpcTransport::new(GrpcConfig::default()),
            Err(ClientError::MissingFields { fields, .. }) if fields == ["service", "methods"]
        );
        assert_matches!(
            GrpcTransport::new(GrpcConfig::new("test.Echo")),
            Err(ClientError::MissingFields { fields, .. }) if fields == ["methods"]
        );
    }

    #[test]
    fn config_from_json() {
        let transport = GrpcTransport::from_value(&json!({
            "service": "test.Echo",
            "methods": [{ "name": "Say" }, { "name": "Watch", "responseStream": true }],
            "timeout": 250
        }))
        .unwrap();
        assert_eq!(transport.methods[1].kind(), MethodKind::ServerStreaming);
        assert_eq!(transport.connect_timeout, Some(Duration::from_millis(250)));

        assert_matches!(
            GrpcTransport::from_value(&json!({ "service": "test.Echo", "methods": 5 })),
            Err(ClientError::InvalidConfig { .. })
        );
    }

    #[test]
    fn unreadable_credentials() {
        let ssl = SslCredentials {
            certs: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert_matches!(GrpcTransport::new(config().with_ssl(ssl)), Err(ClientError::Credentials(_)));

        let half = SslCredentials {
            key: Some(PathBuf::from("/nonexistent/key.pem")),
            ..Default::default()
        };
        assert_matches!(GrpcTransport::new(config().with_ssl(half)), Err(ClientError::Credentials(_)));
    }

    #[tokio::test]
    async fn resolution_errors() {
        let transport = GrpcTransport::new(config()).unwrap();
        assert_matches!(
            transport.make_endpoint("Say", "local://127.0.0.1:50051"),
            Err(ClientError::InvalidInstanceAddress { .. })
        );
        assert_matches!(
            transport.make_endpoint("Shout", "grpc://127.0.0.1:50051"),
            Err(ClientError::MethodNotFound(m)) if m.as_str() == "Shout"
        );
        assert!(transport.make_endpoint("say", "grpc://127.0.0.1:50051").is_ok());
    }

    #[tokio::test]
    async fn endpoints_share_connections_per_authority() {
        let transport = GrpcTransport::new(config()).unwrap();
        transport.make_endpoint("Say", "grpc://127.0.0.1:50051").unwrap();
        transport.make_endpoint("Chat", "grpc://127.0.0.1:50051").unwrap();
        transport.make_endpoint("Say", "grpc://127.0.0.1:50052").unwrap();
        assert_eq!(transport.connection_count(), 2);
    }

    #[tokio::test]
    async fn ended_transport_answers_unavailable() {
        let transport = GrpcTransport::new(config()).unwrap();
        let endpoint = transport.make_endpoint("Say", "grpc://127.0.0.1:50051").unwrap();
        transport.end();
        transport.end();
        assert_eq!(transport.connection_count(), 0);

        let result = endpoint.call(json!({}), CallContext::new("Say")).await;
        assert_matches!(result, Err(CallError::Rpc(e)) if e.kind() == ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn ended_transport_opens_no_new_channels() {
        let transport = GrpcTransport::new(config()).unwrap();
        transport.end();
        let endpoint = transport.make_endpoint("Say", "grpc://127.0.0.1:50051").unwrap();
        assert_eq!(transport.connection_count(), 0);

        let result = endpoint.call(json!({}), CallContext::new("Say")).await;
        assert_matches!(result, Err(CallError::Rpc(e)) if e.kind() == ErrorKind::Unavailable);
    }

    #[test]
    fn connect_timeout_saturates() {
        assert_eq!(GrpcConfig::new("test.Echo").with_connect_timeout(Duration::MAX).timeout, Some(u64::MAX));
        assert_eq!(GrpcConfig::new("test.Echo").with_connect_timeout(Duration::from_secs(2)).timeout, Some(2000));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(Status::not_found("no such user")).kind(), ErrorKind::NotFound);
        assert_eq!(classify_status(Status::unknown("upstream unavailable")).kind(), ErrorKind::Unavailable);
        assert_eq!(classify_status(Status::unknown("boom")).kind(), ErrorKind::Internal);
        assert_eq!(classify_status(Status::new(Code::Ok, "")).kind(), ErrorKind::Internal);
        assert_eq!(kind_of(Code::DataLoss), Some(ErrorKind::DataLoss));
    }
}
