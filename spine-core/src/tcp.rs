//! TCP helpers shared by the listener and dialer.
//!
//! Socket options go through `socket2::SockRef`, which borrows the std
//! stream's descriptor without taking ownership of it.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::endpoint::TcpAddr;

/// Keepalive idle time applied to every established connection.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Apply per-connection TCP options.
///
/// `TCP_NODELAY` trades bandwidth for latency, which suits request/reply
/// traffic. Keepalive lets a dead peer surface as a read error even when the
/// socket is idle.
pub fn configure_stream(stream: &TcpStream, nodelay: bool) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(nodelay)?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(())
}

/// Bind a listener on the first resolvable address of `addr`.
pub fn bind(addr: &TcpAddr) -> io::Result<TcpListener> {
    let mut last_err = None;
    for candidate in addr.resolve()? {
        match TcpListener::bind(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, addr.to_string())
    }))
}

/// Dial `addr`, trying every resolved address in turn.
///
/// A zero `timeout` leaves the connect timeout to the OS.
pub fn connect(addr: &TcpAddr, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.resolve()? {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(candidate)
        } else {
            TcpStream::connect_timeout(&candidate, timeout)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, addr.to_string())
    }))
}

/// Address a local client can dial to reach `listener`.
///
/// Wildcard binds are reached through loopback.
pub fn loopback_addr(local: SocketAddr) -> SocketAddr {
    let mut target = local;
    if local.ip().is_unspecified() {
        target.set_ip(match local {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        });
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_connect_configure() {
        let addr: TcpAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind(&addr).unwrap();
        let local = listener.local_addr().unwrap();

        let target: TcpAddr = format!("127.0.0.1:{}", local.port()).parse().unwrap();
        let client = connect(&target, Duration::from_secs(1)).unwrap();
        let (server, _) = listener.accept().unwrap();

        configure_stream(&client, true).unwrap();
        configure_stream(&server, false).unwrap();
        assert!(client.nodelay().unwrap());
        assert!(!server.nodelay().unwrap());
    }

    #[test]
    fn test_loopback_addr_for_wildcard() {
        let any: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(loopback_addr(any), "127.0.0.1:4000".parse().unwrap());

        let specific: SocketAddr = "10.1.2.3:4000".parse().unwrap();
        assert_eq!(loopback_addr(specific), specific);
    }
}
