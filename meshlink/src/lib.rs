// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! meshlink is a transport-agnostic RPC client.
//!
//! For every configured method it resolves an instance through a load balancer over a
//! publisher, wraps the instance endpoint in middleware, invokes it, classifies failures into
//! a fixed [`ErrorKind`] taxonomy, retries retryable ones and races the whole sequence
//! against an optional timeout. Streaming methods come back as a pull-based [`StreamCall`].
//!
//! Transports are pluggable; a gRPC transport built on `tonic` and an in-process transport
//! are included.
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod net;
pub mod stream;
pub mod transport;

pub use client::{Client, ClientConfig, Registry, Service, ServiceEndpoint};
pub use endpoint::{endpoint_fn, BoxEndpoint, CallContext, CallOptions, Endpoint, Message, MethodKind, Reply};
pub use error::{CallError, ClientError, ErrorKind, Failure, RpcError};
pub use middleware::{Chain, Middleware};
pub use stream::{StreamCall, StreamEmitter};
pub use transport::TransportProvider;
