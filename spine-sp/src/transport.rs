//! Transport links.
//!
//! A [`Link`] is an established, handshaken connection split into the three
//! pieces the socket core needs: a message reader (owned by the reader
//! thread), a message writer (owned by the writer thread) and a closer
//! that can be triggered from any thread to make both of them return.
//!
//! Stream transports (TCP, Unix sockets) frame messages with the length
//! codec. Inproc links pass `Bytes` through bounded channels as is; closing
//! one drops a close channel that both workers select on next to their data
//! channel.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flume::Selector;
use parking_lot::Mutex;
use spine_core::buffer::SegmentedBuffer;
use spine_core::error::{Result, SpineError};
use spine_core::inproc::InprocHalf;
use spine_core::options::SocketOptions;
use spine_core::tcp;
use tracing::trace;

use crate::codec::{encode_frame, FrameDecoder};

/// Byte stream a link can be built on.
pub trait ByteStream: Read + Write + Send + Sync + Sized + 'static {
    /// Second handle to the same connection.
    fn try_clone_stream(&self) -> io::Result<Self>;

    /// Shut both directions down, waking any blocked reader or writer.
    fn shutdown_both(&self) -> io::Result<()>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Peer description for logs and monitor events.
    fn peer_label(&self) -> String;

    /// Apply transport options before the handshake.
    fn configure(&self, _options: &SocketOptions) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for TcpStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .map_or_else(|_| "tcp peer".to_string(), |addr| addr.to_string())
    }

    fn configure(&self, options: &SocketOptions) -> io::Result<()> {
        tcp::configure_stream(self, options.tcp_nodelay)
    }
}

#[cfg(unix)]
impl ByteStream for std::os::unix::net::UnixStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn peer_label(&self) -> String {
        // The accepting side sees an unnamed peer; fall back to our own path.
        [self.peer_addr(), self.local_addr()]
            .into_iter()
            .flatten()
            .find_map(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "ipc peer".to_string())
    }
}

/// Blocking message source of a link.
pub trait FrameRead: Send {
    /// Next whole message. `ConnectionClosed` once the link is gone.
    fn read_message(&mut self) -> Result<Bytes>;
}

/// Blocking message sink of a link.
pub trait FrameWrite: Send {
    fn write_message(&mut self, msg: &Bytes) -> Result<()>;
}

/// Tears a link down from any thread.
pub trait LinkCloser: Send + Sync {
    fn close(&self);
}

/// An established connection, ready to become a pipe.
pub struct Link {
    pub reader: Box<dyn FrameRead>,
    pub writer: Box<dyn FrameWrite>,
    pub closer: Arc<dyn LinkCloser>,
    pub peer: String,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("peer", &self.peer).finish_non_exhaustive()
    }
}

impl Link {
    /// Build a framed link over a stream that already completed the handshake.
    pub fn stream<S: ByteStream>(stream: S, options: &SocketOptions) -> io::Result<Self> {
        let peer = stream.peer_label();
        let writer = stream.try_clone_stream()?;
        let closer = stream.try_clone_stream()?;

        Ok(Self {
            reader: Box::new(StreamReader {
                stream,
                buffer: SegmentedBuffer::new(),
                decoder: FrameDecoder::new(options.max_msg_size),
                read_size: options.read_buffer_size.max(1),
            }),
            writer: Box::new(StreamWriter {
                stream: writer,
                scratch: BytesMut::with_capacity(options.write_buffer_size),
            }),
            closer: Arc::new(StreamCloser(closer)),
            peer,
        })
    }

    /// Build a link over one half of an inproc channel pair.
    #[must_use]
    pub fn inproc(half: InprocHalf, peer: impl Into<String>) -> Self {
        // Never sent on; dropping the sender disconnects both receivers.
        let (close_tx, close_rx) = flume::bounded::<()>(0);
        let InprocHalf { tx, rx } = half;
        Self {
            reader: Box::new(InprocReader {
                rx,
                closed: close_rx.clone(),
            }),
            writer: Box::new(InprocWriter {
                tx,
                closed: close_rx,
            }),
            closer: Arc::new(InprocCloser(Mutex::new(Some(close_tx)))),
            peer: peer.into(),
        }
    }
}

struct StreamReader<S> {
    stream: S,
    buffer: SegmentedBuffer,
    decoder: FrameDecoder,
    read_size: usize,
}

impl<S: ByteStream> FrameRead for StreamReader<S> {
    fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.buffer)? {
                return Ok(msg);
            }

            let mut chunk = BytesMut::zeroed(self.read_size);
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(SpineError::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SpineError::Io(e)),
            };
            chunk.truncate(n);
            trace!("[LINK] Read {} bytes", n);
            self.buffer.push(chunk.freeze());
        }
    }
}

struct StreamWriter<S> {
    stream: S,
    scratch: BytesMut,
}

impl<S: ByteStream> FrameWrite for StreamWriter<S> {
    fn write_message(&mut self, msg: &Bytes) -> Result<()> {
        self.scratch.clear();
        encode_frame(msg, &mut self.scratch);
        self.stream.write_all(&self.scratch)?;
        self.stream.flush()?;
        Ok(())
    }
}

struct StreamCloser<S>(S);

impl<S: ByteStream> LinkCloser for StreamCloser<S> {
    fn close(&self) {
        // NotConnected just means the peer got there first.
        if let Err(e) = self.0.shutdown_both() {
            trace!("[LINK] Shutdown: {}", e);
        }
    }
}

struct InprocReader {
    rx: flume::Receiver<Bytes>,
    closed: flume::Receiver<()>,
}

impl FrameRead for InprocReader {
    fn read_message(&mut self) -> Result<Bytes> {
        if self.closed.is_disconnected() {
            return Err(SpineError::ConnectionClosed);
        }
        Selector::new()
            .recv(&self.closed, |_| Err(SpineError::ConnectionClosed))
            .recv(&self.rx, |msg| msg.map_err(|_| SpineError::ConnectionClosed))
            .wait()
    }
}

struct InprocWriter {
    tx: flume::Sender<Bytes>,
    closed: flume::Receiver<()>,
}

impl FrameWrite for InprocWriter {
    fn write_message(&mut self, msg: &Bytes) -> Result<()> {
        if self.closed.is_disconnected() {
            return Err(SpineError::ConnectionClosed);
        }
        Selector::new()
            .recv(&self.closed, |_| Err(SpineError::ConnectionClosed))
            .send(&self.tx, msg.clone(), |sent| {
                sent.map_err(|_| SpineError::ConnectionClosed)
            })
            .wait()
    }
}

struct InprocCloser(Mutex<Option<flume::Sender<()>>>);

impl LinkCloser for InprocCloser {
    fn close(&self) {
        self.0.lock().take();
    }
}
