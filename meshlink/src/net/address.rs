// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Instance addresses of the form `<scheme>://<host>:<port>`.

use crate::error::ClientError;
use faststr::FastStr;
use http::Uri;
use std::fmt;

/// An address identifying one reachable server instance. The scheme selects the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceAddress {
    scheme: FastStr,
    host: FastStr,
    port: Option<u16>,
}

impl InstanceAddress {
    /// Parses `<scheme>://<host>[:<port>]`.
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let uri: Uri = address.parse().map_err(|e: http::uri::InvalidUri| ClientError::invalid_address(address, e.to_string()))?;
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| ClientError::invalid_address(address, "missing scheme"))?;
        let host = uri.host().filter(|h| !h.is_empty()).ok_or_else(|| ClientError::invalid_address(address, "missing host"))?;
        if !matches!(uri.path(), "" | "/") {
            return Err(ClientError::invalid_address(address, "unexpected path"));
        }
        Ok(Self {
            scheme: FastStr::new(scheme),
            host: FastStr::new(host),
            port: uri.port_u16(),
        })
    }

    /// Parses the address and checks it targets `scheme`.
    pub fn parse_for(address: &str, scheme: &str) -> Result<Self, ClientError> {
        let parsed = Self::parse(address)?;
        if !parsed.scheme.eq_ignore_ascii_case(scheme) {
            return Err(ClientError::invalid_address(address, format!("scheme is not {scheme}")));
        }
        Ok(parsed)
    }

    /// The transport scheme.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port, if one was given.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host[:port]`, the key used for connection sharing and in-process lookup.
    pub fn authority(&self) -> FastStr {
        match self.port {
            Some(port) => FastStr::new(format!("{}:{}", self.host, port)),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}
