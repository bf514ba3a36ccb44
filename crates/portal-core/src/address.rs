//! Transport addresses.
//!
//! Addresses have the form `rdma://host:port/path?query#fragment`. Any other
//! scheme is a configuration error. A listening portal publishes two forms of
//! its address: the literal bound port for internal use, and the same address
//! with port `0` which is what clients are told to connect to.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use url::{Host, Url};

/// The only scheme the transport accepts.
pub const TRANSPORT_SCHEME: &str = "rdma";

/// Error type for address handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string is not a URI.
    #[error("Malformed URI '{uri}': {reason}")]
    Malformed { uri: String, reason: String },

    /// The scheme does not denote the transport.
    #[error("Unsupported scheme '{0}', expected '{TRANSPORT_SCHEME}'")]
    UnsupportedScheme(String),

    /// The URI has no host component.
    #[error("URI '{0}' has no host")]
    MissingHost(String),

    /// A port or host could not be substituted.
    #[error("Cannot rewrite '{uri}': {reason}")]
    Rewrite { uri: String, reason: String },
}

/// A validated transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortalAddress {
    url: Url,
}

impl PortalAddress {
    /// Parse and validate a transport URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a URI, the scheme is not
    /// [`TRANSPORT_SCHEME`], or there is no host.
    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let url = Url::parse(uri).map_err(|e| AddressError::Malformed {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != TRANSPORT_SCHEME {
            return Err(AddressError::UnsupportedScheme(url.scheme().to_string()));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(Self { url }),
            _ => Err(AddressError::MissingHost(uri.to_string())),
        }
    }

    /// The URI scheme (always [`TRANSPORT_SCHEME`]).
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The host as written in the URI (IPv6 hosts keep their brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The explicit port, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// The full URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Whether the host is the wildcard address (`0.0.0.0` or `::`).
    #[must_use]
    pub fn host_is_unspecified(&self) -> bool {
        match self.url.host() {
            Some(Host::Ipv4(addr)) => addr.is_unspecified(),
            Some(Host::Ipv6(addr)) => addr.is_unspecified(),
            Some(Host::Domain(name)) => name
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_unspecified()),
            None => false,
        }
    }

    /// Copy of this address with a different port. Everything else is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI cannot carry a port.
    pub fn with_port(&self, port: u16) -> Result<Self, AddressError> {
        let mut url = self.url.clone();
        url.set_port(Some(port)).map_err(|()| AddressError::Rewrite {
            uri: self.url.to_string(),
            reason: format!("cannot set port {port}"),
        })?;
        Ok(Self { url })
    }

    /// Copy of this address with a different host. Everything else is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid host.
    pub fn with_host(&self, host: &str) -> Result<Self, AddressError> {
        let mut url = self.url.clone();
        url.set_host(Some(host)).map_err(|e| AddressError::Rewrite {
            uri: self.url.to_string(),
            reason: format!("cannot set host '{host}': {e}"),
        })?;
        Ok(Self { url })
    }
}

/// Host component of any URI, whatever its scheme.
///
/// # Errors
///
/// Returns an error if `uri` is not a URI or has no host.
pub fn uri_host(uri: &str) -> Result<String, AddressError> {
    let url = Url::parse(uri).map_err(|e| AddressError::Malformed {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(AddressError::MissingHost(uri.to_string())),
    }
}

impl fmt::Display for PortalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl FromStr for PortalAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let addr = PortalAddress::parse("rdma://10.0.0.1:9999").unwrap();
        assert_eq!(addr.scheme(), "rdma");
        assert_eq!(addr.host(), "10.0.0.1");
        assert_eq!(addr.port(), Some(9999));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let result = PortalAddress::parse("tcp://10.0.0.1:9999");
        assert_eq!(
            result,
            Err(AddressError::UnsupportedScheme("tcp".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_garbage_and_missing_host() {
        assert!(matches!(
            PortalAddress::parse("not a uri"),
            Err(AddressError::Malformed { .. })
        ));
        assert!(matches!(
            PortalAddress::parse("rdma:opaque"),
            Err(AddressError::MissingHost(_))
        ));
    }

    #[test]
    fn test_port_derivation_round_trip() {
        let requested = PortalAddress::parse("rdma://host:9999").unwrap();
        let bound = requested.with_port(34567).unwrap();
        let advertised = requested.with_port(0).unwrap();

        assert_eq!(bound.as_str(), "rdma://host:34567");
        assert_eq!(advertised.as_str(), "rdma://host:0");

        for derived in [&bound, &advertised] {
            let reparsed = PortalAddress::parse(derived.as_str()).unwrap();
            assert_eq!(reparsed.scheme(), requested.scheme());
            assert_eq!(reparsed.host(), requested.host());
        }
    }

    #[test]
    fn test_port_rewrite_keeps_path_and_query() {
        let addr = PortalAddress::parse("rdma://host:1/svc?mode=fast#frag").unwrap();
        let rewritten = addr.with_port(77).unwrap();
        assert_eq!(rewritten.as_str(), "rdma://host:77/svc?mode=fast#frag");
    }

    #[test]
    fn test_host_rewrite() {
        let addr = PortalAddress::parse("rdma://0.0.0.0:5000").unwrap();
        let rewritten = addr.with_host("1.2.3.4").unwrap();
        assert_eq!(rewritten.as_str(), "rdma://1.2.3.4:5000");
        assert_eq!(rewritten.port(), Some(5000));
    }

    #[test]
    fn test_unspecified_hosts() {
        assert!(PortalAddress::parse("rdma://0.0.0.0:1")
            .unwrap()
            .host_is_unspecified());
        assert!(PortalAddress::parse("rdma://[::]:1")
            .unwrap()
            .host_is_unspecified());
        assert!(!PortalAddress::parse("rdma://1.2.3.4:1")
            .unwrap()
            .host_is_unspecified());
        assert!(!PortalAddress::parse("rdma://server.local:1")
            .unwrap()
            .host_is_unspecified());
    }

    #[test]
    fn test_uri_host() {
        assert_eq!(uri_host("rdma://1.2.3.4:5000").unwrap(), "1.2.3.4");
        assert_eq!(uri_host("tcp://peer.local/x").unwrap(), "peer.local");
        assert!(uri_host("nonsense").is_err());
    }

    #[test]
    fn test_from_str_and_display() {
        let addr: PortalAddress = "rdma://h:2".parse().unwrap();
        assert_eq!(addr.to_string(), "rdma://h:2");
    }
}
