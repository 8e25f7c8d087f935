//! Endpoint strings: `tcp://host:port` and `uds://path`.
//!
//! A UDS path starting with `@` names a socket in the Linux abstract
//! namespace; any other path is a filesystem socket.

use ecsim_common::error::SimError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const TCP_PREFIX: &str = "tcp://";
const UDS_PREFIX: &str = "uds://";

/// Why an endpoint string was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Neither `tcp://` nor `uds://`.
    #[error("unsupported scheme (expected tcp:// or uds://)")]
    UnsupportedScheme,
    /// `tcp://` without `:port`.
    #[error("missing port")]
    MissingPort,
    /// Port not a number in 1..=65535.
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    /// `tcp://:port`.
    #[error("empty host")]
    EmptyHost,
    /// `uds://` or `uds://@`.
    #[error("empty socket path")]
    EmptyPath,
}

/// A parsed listen/connect endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP socket.
    Tcp {
        /// Host name or IP literal (brackets stripped for IPv6).
        host: String,
        /// Port; 0 only when constructed directly, to bind an ephemeral port.
        port: u16,
    },
    /// Unix-domain socket on the filesystem.
    Uds(PathBuf),
    /// Unix-domain socket in the abstract namespace (name without `@`).
    AbstractUds(String),
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] describing the first problem found.
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        if let Some(rest) = s.strip_prefix(TCP_PREFIX) {
            let (host, port) = rest.rsplit_once(':').ok_or(EndpointError::MissingPort)?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(EndpointError::EmptyHost);
            }
            let port = port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| EndpointError::InvalidPort(port.to_string()))?;
            Ok(Self::Tcp {
                host: host.to_string(),
                port,
            })
        } else if let Some(path) = s.strip_prefix(UDS_PREFIX) {
            match path.strip_prefix('@') {
                Some("") => Err(EndpointError::EmptyPath),
                Some(name) => Ok(Self::AbstractUds(name.to_string())),
                None if path.is_empty() => Err(EndpointError::EmptyPath),
                None => Ok(Self::Uds(PathBuf::from(path))),
            }
        } else {
            Err(EndpointError::UnsupportedScheme)
        }
    }

    /// Scheme name, for logs.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Uds(_) | Self::AbstractUds(_) => "uds",
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "{TCP_PREFIX}[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{TCP_PREFIX}{host}:{port}"),
            Self::Uds(path) => write!(f, "{UDS_PREFIX}{}", path.display()),
            Self::AbstractUds(name) => write!(f, "{UDS_PREFIX}@{name}"),
        }
    }
}

/// Parse an endpoint, reporting failures as [`SimError::InvalidEndpoint`].
///
/// # Errors
///
/// Returns [`SimError::InvalidEndpoint`] carrying the input and the reason.
pub fn parse_endpoint(s: &str) -> Result<Endpoint, SimError> {
    Endpoint::parse(s).map_err(|e| SimError::InvalidEndpoint {
        endpoint: s.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:5555").unwrap(),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 5555
            }
        );
        assert_eq!(
            Endpoint::parse("tcp://[::1]:80").unwrap(),
            Endpoint::Tcp {
                host: "::1".into(),
                port: 80
            }
        );
    }

    #[test]
    fn test_parse_tcp_rejects_bad_ports() {
        assert_eq!(
            Endpoint::parse("tcp://localhost"),
            Err(EndpointError::MissingPort)
        );
        assert_eq!(
            Endpoint::parse("tcp://localhost:0"),
            Err(EndpointError::InvalidPort("0".into()))
        );
        assert_eq!(
            Endpoint::parse("tcp://localhost:65536"),
            Err(EndpointError::InvalidPort("65536".into()))
        );
        assert_eq!(
            Endpoint::parse("tcp://localhost:http"),
            Err(EndpointError::InvalidPort("http".into()))
        );
        assert_eq!(Endpoint::parse("tcp://:80"), Err(EndpointError::EmptyHost));
    }

    #[test]
    fn test_parse_uds() {
        assert_eq!(
            Endpoint::parse("uds:///tmp/ethercat_bus.sock").unwrap(),
            Endpoint::Uds(PathBuf::from("/tmp/ethercat_bus.sock"))
        );
        assert_eq!(
            Endpoint::parse("uds://@ecsim").unwrap(),
            Endpoint::AbstractUds("ecsim".into())
        );
        assert_eq!(Endpoint::parse("uds://"), Err(EndpointError::EmptyPath));
        assert_eq!(Endpoint::parse("uds://@"), Err(EndpointError::EmptyPath));
    }

    #[test]
    fn test_unknown_scheme() {
        assert_eq!(
            Endpoint::parse("udp://127.0.0.1:1"),
            Err(EndpointError::UnsupportedScheme)
        );
        assert_eq!(
            Endpoint::parse("/tmp/sock"),
            Err(EndpointError::UnsupportedScheme)
        );
    }

    #[test]
    fn test_display_round_trips() {
        for s in [
            "tcp://127.0.0.1:5555",
            "tcp://[::1]:80",
            "uds:///tmp/a.sock",
            "uds://@bus",
        ] {
            assert_eq!(Endpoint::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_parse_endpoint_wraps_error() {
        let err = parse_endpoint("ftp://x").unwrap_err();
        assert!(matches!(err, SimError::InvalidEndpoint { ref endpoint, .. } if endpoint == "ftp://x"));
    }
}
