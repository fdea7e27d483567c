// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Error taxonomy shared by every transport, and the error types of the call pipeline.

use faststr::FastStr;
use std::fmt;

/// The fixed set of RPC failure kinds.
///
/// Every transport-native failure maps to exactly one kind, see [`ErrorKind::classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation was cancelled, typically by the caller.
    Cancelled,
    /// The client specified an invalid argument.
    InvalidArgument,
    /// Some requested entity was not found.
    NotFound,
    /// The entity that a client attempted to create already exists.
    AlreadyExists,
    /// The caller does not have permission to execute the operation.
    PermissionDenied,
    /// The request does not have valid authentication credentials.
    Unauthenticated,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented or not supported.
    Unimplemented,
    /// Some resource has been exhausted.
    ResourceExhausted,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded,
    /// Internal error. Failures nobody could classify land here.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
}

/// Free-text needles for message classification. When several occur, the earliest in the
/// message wins, and on the same position the earlier entry here.
const MESSAGE_PATTERNS: &[(&str, ErrorKind)] = &[
    ("cancelled", ErrorKind::Cancelled),
    ("canceled", ErrorKind::Cancelled),
    ("invalid argument", ErrorKind::InvalidArgument),
    ("deadline exceeded", ErrorKind::DeadlineExceeded),
    ("already exists", ErrorKind::AlreadyExists),
    ("permission denied", ErrorKind::PermissionDenied),
    ("unauthenticated", ErrorKind::Unauthenticated),
    ("failed precondition", ErrorKind::FailedPrecondition),
    ("out of range", ErrorKind::OutOfRange),
    ("resource exhausted", ErrorKind::ResourceExhausted),
    ("unimplemented", ErrorKind::Unimplemented),
    ("closed channel", ErrorKind::Unavailable),
    ("unavailable", ErrorKind::Unavailable),
    ("data loss", ErrorKind::DataLoss),
    ("not found", ErrorKind::NotFound),
    ("aborted", ErrorKind::Aborted),
    ("internal", ErrorKind::Internal),
];

impl ErrorKind {
    /// Every kind.
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::Cancelled,
        ErrorKind::InvalidArgument,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::PermissionDenied,
        ErrorKind::Unauthenticated,
        ErrorKind::FailedPrecondition,
        ErrorKind::Aborted,
        ErrorKind::OutOfRange,
        ErrorKind::Unimplemented,
        ErrorKind::ResourceExhausted,
        ErrorKind::DeadlineExceeded,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
        ErrorKind::DataLoss,
    ];

    /// Returns the human readable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::FailedPrecondition => "failed precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DataLoss => "data loss",
        }
    }

    /// Returns the upper snake case status name, e.g. `NOT_FOUND`.
    pub fn code_name(&self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::OutOfRange => "OUT_OF_RANGE",
            ErrorKind::Unimplemented => "UNIMPLEMENTED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::DataLoss => "DATA_LOSS",
        }
    }

    /// Whether a failure of this kind may be retried against another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unimplemented | ErrorKind::ResourceExhausted | ErrorKind::Internal | ErrorKind::Unavailable | ErrorKind::DataLoss
        )
    }

    /// Finds the kind named somewhere in `message`.
    ///
    /// A status name written as a word of its own, like `NOT_FOUND`, is looked for first.
    /// Otherwise free text is matched ignoring case, `_` and `-`, and the earliest mention wins.
    pub fn from_message(message: &str) -> Option<ErrorKind> {
        let by_code = message
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find_map(|word| ErrorKind::ALL.into_iter().find(|kind| kind.code_name() == word));
        if by_code.is_some() {
            return by_code;
        }
        let normalized = message.to_ascii_lowercase().replace(['_', '-'], " ");
        MESSAGE_PATTERNS
            .iter()
            .filter_map(|(needle, kind)| normalized.find(needle).map(|at| (at, *kind)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, kind)| kind)
    }

    /// Total classification: the native code wins when it maps, then the message, then [`ErrorKind::Internal`].
    pub fn classify(native: Option<ErrorKind>, message: &str) -> ErrorKind {
        native.or_else(|| ErrorKind::from_message(message)).unwrap_or(ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified RPC failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
}

impl RpcError {
    /// Creates a classified error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Classifies a bare message, defaulting to [`ErrorKind::Internal`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify(None, &message), message)
    }

    /// The kind callers match on.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Free-form detail. Not part of the contract.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Shorthand for an [`ErrorKind::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Shorthand for an [`ErrorKind::Unavailable`] error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Shorthand for an [`ErrorKind::Unimplemented`] error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    /// Shorthand for an [`ErrorKind::FailedPrecondition`] error.
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }
}

/// The failure of a single attempt.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The endpoint answered with a classified error.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The load balancer had no instance to hand out.
    #[error("publisher exhausted: {0}")]
    PublisherExhausted(FastStr),
    /// A deadline fired. Stops the attempt sequence when raised by an endpoint.
    #[error("call timeout")]
    CallTimeout,
    /// The attempt sequence ended without producing a result.
    #[error("call aborted: {0}")]
    Aborted(String),
}

impl CallError {
    /// The taxonomy kind, when the failure is a classified one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CallError::Rpc(e) => Some(e.kind()),
            _ => None,
        }
    }
}

/// What a top-level call resolves to when it does not succeed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Failure {
    /// A non-retryable error, returned as soon as it was seen.
    #[error(transparent)]
    Rejected(RpcError),
    /// Every error recorded across the attempts, oldest first.
    #[error("all attempts failed: {}", display_list(.0))]
    Exhausted(Vec<CallError>),
}

impl Failure {
    /// All recorded errors, oldest first.
    pub fn errors(&self) -> Vec<CallError> {
        match self {
            Failure::Rejected(e) => vec![CallError::Rpc(e.clone())],
            Failure::Exhausted(errors) => errors.clone(),
        }
    }

    /// The kind of the most recent classified error, if any.
    pub fn last_kind(&self) -> Option<ErrorKind> {
        match self {
            Failure::Rejected(e) => Some(e.kind()),
            Failure::Exhausted(errors) => errors.iter().rev().find_map(CallError::kind),
        }
    }
}

fn display_list(errors: &[CallError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Errors raised while building clients, transports and endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A required section of the client config is absent or empty.
    #[error("no {0} configured")]
    MissingConfig(&'static str),
    /// A transport config lacks required fields.
    #[error("{transport} transport config is missing: {}", .fields.join(", "))]
    MissingFields {
        /// Transport name.
        transport: FastStr,
        /// Names of the absent fields.
        fields: Vec<&'static str>,
    },
    /// A config section could not be decoded.
    #[error("invalid {section} config: {reason}")]
    InvalidConfig {
        /// Which section failed.
        section: FastStr,
        /// Decoder message.
        reason: String,
    },
    /// No transport is registered under the name.
    #[error("transport {0} does not exist")]
    UnknownTransport(FastStr),
    /// No publisher is registered under the name.
    #[error("publisher {0} does not exist")]
    UnknownPublisher(FastStr),
    /// No load balancer is registered under the name.
    #[error("loadbalancer {0} does not exist")]
    UnknownLoadBalancer(FastStr),
    /// The endpoint has neither its own nor a global publisher.
    #[error("publisher configuration for endpoint {0} does not exist")]
    NoPublisher(FastStr),
    /// Every instance failed to produce an endpoint.
    #[error("no endpoints")]
    NoEndpoints,
    /// The method is not declared on the service description.
    #[error("method {0} not found")]
    MethodNotFound(FastStr),
    /// The instance address is malformed or targets another transport.
    #[error("invalid instance address {address}: {reason}")]
    InvalidInstanceAddress {
        /// The offending address.
        address: FastStr,
        /// Why it was refused.
        reason: FastStr,
    },
    /// No in-process server is registered under the instance key.
    #[error("server with instance {0} does not exist")]
    UnknownInstance(FastStr),
    /// The in-process server does not host the service.
    #[error("service {0} does not exist")]
    UnknownService(FastStr),
    /// TLS material could not be loaded or applied.
    #[error("credentials: {0}")]
    Credentials(String),
}

impl ClientError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<FastStr>) -> Self {
        ClientError::InvalidInstanceAddress {
            address: FastStr::new(address),
            reason: reason.into(),
        }
    }
}
