//! SP connection header exchange.
//!
//! Every stream connection starts with both peers writing an 8-byte header
//! and reading the other side's:
//!
//! ```text
//! +------+------+------+------+-----------------+-----------+
//! | 0x00 | 'S'  | 'P'  | 0x00 | protocol (u16)  | 0x00 0x00 |
//! +------+------+------+------+-----------------+-----------+
//! ```
//!
//! The exchange completes before the connection is attached to a socket, so
//! no application frame can ever be interleaved with it. A peer that sends a
//! bad header, speaks an incompatible pattern, or stalls past the handshake
//! timeout is rejected.

use std::io::{self, Read, Write};
use std::time::Duration;

use spine_core::error::{Result, SpineError};
use spine_core::socket_type::SocketType;
use thiserror::Error;
use tracing::debug;

use crate::transport::ByteStream;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

const MAGIC: [u8; 4] = [0x00, b'S', b'P', 0x00];

/// Build the header announcing `socket_type`.
#[must_use]
pub fn build_header(socket_type: SocketType) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&socket_type.protocol_id().to_be_bytes());
    header
}

/// Why a peer's header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("bad protocol header")]
    BadMagic,

    #[error("reserved header bytes are not zero")]
    Reserved,

    #[error("unknown protocol id {0}")]
    UnknownProtocol(u16),

    #[error("{local} socket cannot talk to {peer} socket")]
    Incompatible { local: SocketType, peer: SocketType },
}

impl From<HeaderError> for SpineError {
    fn from(err: HeaderError) -> Self {
        Self::handshake(err.to_string())
    }
}

/// Validate a received header and return the peer's socket type.
pub fn parse_header(
    header: &[u8; HEADER_LEN],
    local: SocketType,
) -> std::result::Result<SocketType, HeaderError> {
    if header[..4] != MAGIC {
        return Err(HeaderError::BadMagic);
    }
    if header[6..] != [0, 0] {
        return Err(HeaderError::Reserved);
    }

    let id = u16::from_be_bytes([header[4], header[5]]);
    let peer = SocketType::from_protocol_id(id).ok_or(HeaderError::UnknownProtocol(id))?;

    if !local.is_compatible(peer) {
        return Err(HeaderError::Incompatible { local, peer });
    }
    Ok(peer)
}

/// Perform the header exchange on a freshly established stream.
///
/// Blocks for at most `timeout` waiting for the peer's header (zero means
/// no limit). The stream's read timeout is cleared again before returning.
pub fn perform_handshake<S: ByteStream>(
    stream: &mut S,
    local: SocketType,
    timeout: Duration,
) -> Result<SocketType> {
    let limit = (!timeout.is_zero()).then_some(timeout);
    stream.set_read_timeout(limit)?;

    let outcome = exchange(stream, local);

    stream.set_read_timeout(None)?;
    let peer = outcome?;
    debug!("[HANDSHAKE] {} connected to {} peer", local, peer);
    Ok(peer)
}

fn exchange<S: ByteStream>(stream: &mut S, local: SocketType) -> Result<SocketType> {
    stream
        .write_all(&build_header(local))
        .map_err(|e| SpineError::handshake(format!("sending header: {e}")))?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            SpineError::handshake("timed out waiting for peer header")
        }
        _ => SpineError::handshake(format!("reading header: {e}")),
    })?;

    Ok(parse_header(&header, local)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spine_core::error::ErrorKind;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_header_layout() {
        let header = build_header(SocketType::Pull);
        assert_eq!(header, [0, b'S', b'P', 0, 0, 81, 0, 0]);
        assert_eq!(
            parse_header(&build_header(SocketType::Push), SocketType::Pull).unwrap(),
            SocketType::Push
        );
    }

    #[test]
    fn test_rejects_incompatible_peer() {
        let err = parse_header(&build_header(SocketType::Pub), SocketType::Req).unwrap_err();
        assert_eq!(
            err,
            HeaderError::Incompatible {
                local: SocketType::Req,
                peer: SocketType::Pub
            }
        );
        let err = SpineError::from(err);
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
        assert!(err.to_string().contains("REQ"));
    }

    #[test]
    fn test_rejects_garbage() {
        let junk = *b"GET / HT";
        assert_eq!(parse_header(&junk, SocketType::Rep), Err(HeaderError::BadMagic));

        let mut reserved = build_header(SocketType::Req);
        reserved[7] = 1;
        assert_eq!(parse_header(&reserved, SocketType::Rep), Err(HeaderError::Reserved));

        let mut unknown = build_header(SocketType::Req);
        unknown[5] = 0xEE;
        assert!(matches!(
            parse_header(&unknown, SocketType::Rep),
            Err(HeaderError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_exchange_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            perform_handshake(&mut stream, SocketType::Rep, Duration::from_secs(2))
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let peer = perform_handshake(&mut client, SocketType::Req, Duration::from_secs(2)).unwrap();
        assert_eq!(peer, SocketType::Rep);
        assert_eq!(server.join().unwrap().unwrap(), SocketType::Req);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (mut stream, _) = listener.accept().unwrap();

        let err =
            perform_handshake(&mut stream, SocketType::Bus, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, SpineError::Handshake(_)));
    }
}
