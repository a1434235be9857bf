//! Endpoint abstraction for transport-agnostic socket addressing.
//!
//! Addresses take the form `<scheme>://<address>`:
//!
//! - `inproc://name` for sockets inside the same process
//! - `ipc:///path/to/socket` for Unix domain sockets
//! - `tcp://host:port` for TCP; `*` as host binds every interface

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;

/// Host and port of a TCP endpoint.
///
/// The host is kept as written so names resolve at dial time, which lets a
/// reconnecting endpoint follow DNS changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpAddr {
    host: String,
    port: u16,
}

impl TcpAddr {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is the `*` wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.host == "*"
    }

    /// Resolve to socket addresses. The wildcard resolves to `0.0.0.0`.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let host = if self.is_wildcard() { "0.0.0.0" } else { self.host.as_str() };
        let addrs: Vec<SocketAddr> = (host, self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {}", self),
            ));
        }
        Ok(addrs)
    }
}

impl fmt::Display for TcpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for TcpAddr {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EndpointError::BadTcpAddress(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner.strip_suffix(']').ok_or_else(invalid)?,
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Parsed `<scheme>://<address>` string.
///
/// ```
/// use spine_core::endpoint::Endpoint;
///
/// let tcp = Endpoint::parse("tcp://*:5555").unwrap();
/// assert_eq!(tcp.scheme(), "tcp");
///
/// let local = Endpoint::parse("inproc://jobs").unwrap();
/// assert!(local.is_inproc());
/// assert_eq!(local.to_string(), "inproc://jobs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(TcpAddr),
    #[cfg(unix)]
    Ipc(PathBuf),
    Inproc(String),
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Whether the address never leaves the process.
    #[must_use]
    pub fn is_inproc(&self) -> bool {
        matches!(self, Endpoint::Inproc(_))
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            #[cfg(unix)]
            Endpoint::Ipc(_) => "ipc",
            Endpoint::Inproc(_) => "inproc",
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| EndpointError::MissingScheme(s.to_string()))?;
        match scheme {
            "tcp" => Ok(Endpoint::Tcp(rest.parse()?)),
            #[cfg(unix)]
            "ipc" if rest.is_empty() => Err(EndpointError::EmptyAddress("ipc")),
            #[cfg(unix)]
            "ipc" => Ok(Endpoint::Ipc(PathBuf::from(rest))),
            #[cfg(not(unix))]
            "ipc" => Err(EndpointError::IpcUnsupported),
            "inproc" if rest.is_empty() => Err(EndpointError::EmptyAddress("inproc")),
            "inproc" => Ok(Endpoint::Inproc(rest.to_string())),
            other => Err(EndpointError::UnknownScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Reasons an address string is rejected.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("missing `<scheme>://` in {0:?}")]
    MissingScheme(String),

    #[error("unknown transport {0:?} (expected tcp, ipc or inproc)")]
    UnknownScheme(String),

    #[error("bad TCP address {0:?} (expected host:port)")]
    BadTcpAddress(String),

    #[error("empty {0} address")]
    EmptyAddress(&'static str),

    #[error("ipc transport is not available on this platform")]
    IpcUnsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrips_input() {
        let mut cases = vec![
            "tcp://127.0.0.1:5555",
            "tcp://[::1]:5555",
            "tcp://localhost:80",
            "tcp://*:7000",
            "inproc://my-endpoint",
        ];
        if cfg!(unix) {
            cases.push("ipc:///tmp/test.sock");
        }
        for case in cases {
            assert_eq!(Endpoint::parse(case).unwrap().to_string(), case);
        }
    }

    #[test]
    fn test_tcp_host_forms() {
        let Endpoint::Tcp(v6) = Endpoint::parse("tcp://[::1]:5555").unwrap() else {
            panic!("expected tcp endpoint");
        };
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.port(), 5555);

        let Endpoint::Tcp(any) = Endpoint::parse("tcp://*:7000").unwrap() else {
            panic!("expected tcp endpoint");
        };
        assert!(any.is_wildcard());
        assert!(any.resolve().unwrap()[0].ip().is_unspecified());
    }

    #[test]
    fn test_rejections() {
        let reject = |s: &str| Endpoint::parse(s).unwrap_err();

        assert!(matches!(reject("127.0.0.1:5555"), EndpointError::MissingScheme(_)));
        assert!(matches!(reject("http://127.0.0.1:5555"), EndpointError::UnknownScheme(_)));
        assert!(matches!(reject("inproc://"), EndpointError::EmptyAddress("inproc")));
        for bad in ["tcp://invalid:port", "tcp://:5555", "tcp://host", "tcp://::1:80"] {
            assert!(matches!(reject(bad), EndpointError::BadTcpAddress(_)), "{bad}");
        }
        #[cfg(unix)]
        assert!(matches!(reject("ipc://"), EndpointError::EmptyAddress("ipc")));
    }
}
