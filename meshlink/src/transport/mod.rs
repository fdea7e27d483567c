// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Transport providers turn a (method, instance address) pair into an [`Endpoint`](crate::endpoint::Endpoint).

pub mod codec;
pub mod grpc;
pub mod local;

pub use grpc::{GrpcConfig, GrpcTransport, MethodDescriptor};
pub use local::{LocalConfig, LocalServer, LocalServers, LocalService, LocalTransport};

use crate::client::publisher::EndpointFactory;
use crate::endpoint::BoxEndpoint;
use crate::error::ClientError;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A wire protocol, or an in-process shortcut, able to build endpoints.
pub trait TransportProvider: Send + Sync + 'static {
    /// The registry name of the transport.
    fn name(&self) -> &str;

    /// Builds the endpoint of `method` on the instance at `address`.
    ///
    /// Fails with [`ClientError::MethodNotFound`] for undeclared methods and with
    /// [`ClientError::InvalidInstanceAddress`] for addresses of another scheme.
    fn make_endpoint(&self, method: &str, address: &str) -> Result<BoxEndpoint, ClientError>;

    /// Releases every connection opened by endpoints of this provider. Idempotent.
    fn end(&self);
}

impl fmt::Debug for dyn TransportProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportProvider").field(&self.name()).finish()
    }
}

/// Returns a factory that tries each transport in order and keeps the first endpoint built.
pub fn general_factory(method: impl Into<String>, transports: Vec<Arc<dyn TransportProvider>>) -> EndpointFactory {
    let method = method.into();
    Arc::new(move |address: &str| {
        let mut last_error = ClientError::NoEndpoints;
        for transport in &transports {
            match transport.make_endpoint(&method, address) {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) => {
                    debug!("[MESHLINK] {} transport cannot serve {method} at {address}: {e}", transport.name());
                    last_error = e;
                },
            }
        }
        Err(last_error)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{endpoint_fn, Reply};
    use crate::net::InstanceAddress;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SchemeOnly {
        scheme: &'static str,
        built: AtomicUsize,
    }

    impl TransportProvider for SchemeOnly {
        fn name(&self) -> &str {
            self.scheme
        }
        fn make_endpoint(&self, _method: &str, address: &str) -> Result<BoxEndpoint, ClientError> {
            InstanceAddress::parse_for(address, self.scheme)?;
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(endpoint_fn(|r, _| async move { Ok(Reply::Data(r)) }))
        }
        fn end(&self) {}
    }

    fn transport(scheme: &'static str) -> Arc<SchemeOnly> {
        Arc::new(SchemeOnly {
            scheme,
            built: AtomicUsize::new(0),
        })
    }

    #[test]
    fn first_matching_transport_wins() {
        let a = transport("a");
        let b = transport("b");
        let factory = general_factory("Echo", vec![a.clone() as Arc<dyn TransportProvider>, b.clone()]);
        assert!(factory("b://host:1").is_ok());
        assert_eq!(format!("{:?}", b.clone() as Arc<dyn TransportProvider>), r#"TransportProvider("b")"#);
        assert_eq!(a.built.load(Ordering::SeqCst), 0);
        assert_eq!(b.built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_transport_matches() {
        let factory = general_factory("Echo", vec![transport("a") as Arc<dyn TransportProvider>]);
        assert_matches!(factory("c://host:1"), Err(ClientError::InvalidInstanceAddress { .. }));
        assert_matches!(general_factory("Echo", vec![])("a://host:1"), Err(ClientError::NoEndpoints));
    }
}
