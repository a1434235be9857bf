//! Readiness signals exposed as pollable descriptors.
//!
//! A [`Signal`] is a boolean level ("a message can be received", "a message
//! can be sent"). Once a descriptor has been requested, the level is mirrored
//! into a connected Unix socket pair: the read end is readable exactly while
//! the level is raised, so an external `poll`/`epoll` loop can wait on it.
//! The descriptor is created lazily because most sockets never hand one out.

use std::io;

#[cfg(unix)]
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// One readiness condition.
#[derive(Debug, Default)]
pub struct Signal {
    raised: bool,
    #[cfg(unix)]
    pipe: Option<SignalPipe>,
}

#[cfg(unix)]
#[derive(Debug)]
struct SignalPipe {
    reader: UnixStream,
    writer: UnixStream,
}

#[cfg(unix)]
impl SignalPipe {
    fn open() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    fn raise(&mut self) {
        // At most one byte is ever outstanding, so the write cannot fill the
        // socket buffer.
        if let Err(e) = self.writer.write(&[1]) {
            tracing::warn!("[SIGNAL] Failed to raise readiness descriptor: {}", e);
        }
    }

    fn drain(&mut self) {
        let mut scratch = [0u8; 16];
        loop {
            match self.reader.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("[SIGNAL] Failed to clear readiness descriptor: {}", e);
                    break;
                }
            }
        }
    }
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub const fn is_raised(&self) -> bool {
        self.raised
    }

    /// Set the level. Returns `true` if it changed.
    pub fn set(&mut self, ready: bool) -> bool {
        if ready == self.raised {
            return false;
        }
        self.raised = ready;
        self.mirror(ready);
        true
    }

    #[cfg(unix)]
    fn mirror(&mut self, ready: bool) {
        if let Some(pipe) = self.pipe.as_mut() {
            if ready {
                pipe.raise();
            } else {
                pipe.drain();
            }
        }
    }

    #[cfg(not(unix))]
    fn mirror(&mut self, _ready: bool) {}

    /// Descriptor that polls readable while the level is raised.
    ///
    /// The descriptor stays owned by the signal; callers must not close it.
    #[cfg(unix)]
    pub fn fd(&mut self) -> io::Result<RawFd> {
        if self.pipe.is_none() {
            let mut pipe = SignalPipe::open()?;
            if self.raised {
                pipe.raise();
            }
            self.pipe = Some(pipe);
        }
        match self.pipe.as_ref() {
            Some(pipe) => Ok(pipe.reader.as_raw_fd()),
            None => Err(io::Error::new(io::ErrorKind::Other, "signal descriptor missing")),
        }
    }

    #[cfg(not(unix))]
    pub fn fd(&mut self) -> io::Result<i32> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "readiness descriptors require a Unix platform",
        ))
    }
}
