//! Socket configuration options
//!
//! [`SocketOptions`] is the full configuration of a socket, built with the
//! `with_*` methods. [`SocketOption`] is a single runtime-settable option with
//! its value, the unit accepted by `set_option`; each one knows which socket
//! types it applies to.

use std::time::Duration;

use bytes::Bytes;

use crate::config::{
    BufferConfig, DEFAULT_MAX_MSG_SIZE, DEFAULT_READ_BUF_SIZE, DEFAULT_WRITE_BUF_SIZE,
};
use crate::error::{Result, SpineError};
use crate::socket_type::SocketType;

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use spine_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_hwm(64);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Receive timeout (NN_RCVTIMEO)
    ///
    /// - `None`: Block indefinitely (default)
    /// - `Some(Duration::ZERO)`: Non-blocking
    /// - `Some(duration)`: Fail with `Timeout` after duration
    pub recv_timeout: Option<Duration>,

    /// Send timeout (NN_SNDTIMEO)
    ///
    /// Same semantics as `recv_timeout`.
    pub send_timeout: Option<Duration>,

    /// Linger (NN_LINGER)
    ///
    /// How long `close` waits for queued outbound messages to be written.
    /// - Default: 1 second
    /// - `None` or zero: drop pending messages immediately
    pub linger: Option<Duration>,

    /// Reconnect interval (NN_RECONNECT_IVL)
    ///
    /// Initial delay before redialing a connect endpoint.
    /// - Default: 100ms
    pub reconnect_ivl: Duration,

    /// Maximum reconnect interval (NN_RECONNECT_IVL_MAX)
    ///
    /// - Default: 5s
    /// - The delay doubles on every failure up to this value
    /// - Zero (or anything not above `reconnect_ivl`) keeps every delay at
    ///   `reconnect_ivl`
    pub reconnect_ivl_max: Duration,

    /// TCP connect timeout
    ///
    /// - Default: 0 (use OS default)
    pub connect_timeout: Duration,

    /// Time allowed for the SP header exchange on a new stream connection.
    ///
    /// - Default: 5 seconds
    pub handshake_timeout: Duration,

    /// Receive queue bound per connection, in messages (NN_RCVBUF)
    ///
    /// - Default: 1000 messages
    pub recv_hwm: usize,

    /// Send queue bound per connection, in messages (NN_SNDBUF)
    ///
    /// - Default: 1000 messages
    pub send_hwm: usize,

    /// Maximum inbound message size (NN_RCVMAXSIZE)
    ///
    /// A frame declaring more than this is malformed.
    /// - Default: 1 MiB
    /// - `None`: no limit
    pub max_msg_size: Option<usize>,

    /// REQ resend interval (NN_REQ_RESEND_IVL)
    ///
    /// An unanswered request is resent to the next peer after this long.
    /// - Default: 60 seconds
    pub resend_ivl: Duration,

    /// Disable Nagle's algorithm on TCP connections (NN_TCP_NODELAY)
    ///
    /// - Default: true
    pub tcp_nodelay: bool,

    /// Bytes requested per read on stream transports
    pub read_buffer_size: usize,

    /// Initial capacity of the frame encode buffer
    pub write_buffer_size: usize,

    /// Name used in logs and monitor events (NN_SOCKET_NAME)
    pub socket_name: Option<String>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None, // Block indefinitely
            send_timeout: None, // Block indefinitely
            linger: Some(Duration::from_secs(1)),
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::from_secs(5),
            connect_timeout: Duration::ZERO, // Use OS default
            handshake_timeout: Duration::from_secs(5),
            recv_hwm: 1000,
            send_hwm: 1000,
            max_msg_size: Some(DEFAULT_MAX_MSG_SIZE),
            resend_ivl: Duration::from_secs(60),
            tcp_nodelay: true,
            read_buffer_size: DEFAULT_READ_BUF_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUF_SIZE,
            socket_name: None,
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use spine_core::options::SocketOptions;
    /// use std::time::Duration;
    ///
    /// // Non-blocking receive
    /// let opts = SocketOptions::new().with_recv_timeout(Duration::ZERO);
    /// assert!(opts.is_recv_nonblocking());
    /// ```
    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set linger timeout.
    #[must_use]
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set reconnection interval.
    #[must_use]
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    #[must_use]
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set receive high water mark.
    #[must_use]
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }

    /// Set send high water mark.
    #[must_use]
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Set maximum inbound message size.
    #[must_use]
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    #[must_use]
    pub fn with_resend_ivl(mut self, ivl: Duration) -> Self {
        self.resend_ivl = ivl;
        self
    }

    #[must_use]
    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set both read and write buffer sizes from a preset.
    ///
    /// # Examples
    ///
    /// ```
    /// use spine_core::config::BufferConfig;
    /// use spine_core::options::SocketOptions;
    ///
    /// let opts = SocketOptions::new().with_buffer_config(BufferConfig::small());
    /// assert_eq!(opts.read_buffer_size, 4096);
    /// ```
    #[must_use]
    pub fn with_buffer_config(mut self, config: BufferConfig) -> Self {
        self.read_buffer_size = config.read_buf_size;
        self.write_buffer_size = config.write_buf_size;
        self
    }

    #[must_use]
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    /// Check if receive operation should be non-blocking.
    #[must_use]
    pub fn is_recv_nonblocking(&self) -> bool {
        matches!(self.recv_timeout, Some(d) if d.is_zero())
    }

    /// Check if send operation should be non-blocking.
    #[must_use]
    pub fn is_send_nonblocking(&self) -> bool {
        matches!(self.send_timeout, Some(d) if d.is_zero())
    }

    /// Linger as a plain duration; `None` means zero.
    #[must_use]
    pub fn linger_duration(&self) -> Duration {
        self.linger.unwrap_or(Duration::ZERO)
    }

    /// Apply a single runtime option.
    ///
    /// Pattern-level options (`Subscribe`, `Unsubscribe`) carry no stored
    /// value and are accepted here without effect; the socket routes them to
    /// its pattern.
    pub fn apply(&mut self, option: &SocketOption) -> Result<()> {
        match option {
            SocketOption::Linger(v) => self.linger = *v,
            SocketOption::SendBuffer(n) => self.send_hwm = positive(option, *n)?,
            SocketOption::ReceiveBuffer(n) => self.recv_hwm = positive(option, *n)?,
            SocketOption::SendTimeout(v) => self.send_timeout = *v,
            SocketOption::ReceiveTimeout(v) => self.recv_timeout = *v,
            SocketOption::ReconnectInterval(v) => {
                if v.is_zero() {
                    return Err(SpineError::invalid("reconnect interval must be non-zero"));
                }
                self.reconnect_ivl = *v;
            }
            SocketOption::ReconnectIntervalMax(v) => self.reconnect_ivl_max = *v,
            SocketOption::ReceiveMaxSize(v) => self.max_msg_size = *v,
            SocketOption::TcpNoDelay(v) => self.tcp_nodelay = *v,
            SocketOption::SocketName(name) => self.socket_name = Some(name.clone()),
            SocketOption::ResendInterval(v) => {
                if v.is_zero() {
                    return Err(SpineError::invalid("resend interval must be non-zero"));
                }
                self.resend_ivl = *v;
            }
            SocketOption::Subscribe(_) | SocketOption::Unsubscribe(_) => {}
        }
        Ok(())
    }
}

fn positive(option: &SocketOption, n: usize) -> Result<usize> {
    if n == 0 {
        return Err(SpineError::invalid(format!("{} must be at least 1", option.name())));
    }
    Ok(n)
}

/// A runtime-settable socket option and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    /// NN_LINGER
    Linger(Option<Duration>),
    /// NN_SNDBUF, counted in messages
    SendBuffer(usize),
    /// NN_RCVBUF, counted in messages
    ReceiveBuffer(usize),
    /// NN_SNDTIMEO
    SendTimeout(Option<Duration>),
    /// NN_RCVTIMEO
    ReceiveTimeout(Option<Duration>),
    /// NN_RECONNECT_IVL
    ReconnectInterval(Duration),
    /// NN_RECONNECT_IVL_MAX
    ReconnectIntervalMax(Duration),
    /// NN_RCVMAXSIZE
    ReceiveMaxSize(Option<usize>),
    /// NN_TCP_NODELAY
    TcpNoDelay(bool),
    /// NN_SOCKET_NAME
    SocketName(String),
    /// NN_SUB_SUBSCRIBE
    Subscribe(Bytes),
    /// NN_SUB_UNSUBSCRIBE
    Unsubscribe(Bytes),
    /// NN_REQ_RESEND_IVL
    ResendInterval(Duration),
}

impl SocketOption {
    /// The option's conventional name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Linger(_) => "NN_LINGER",
            Self::SendBuffer(_) => "NN_SNDBUF",
            Self::ReceiveBuffer(_) => "NN_RCVBUF",
            Self::SendTimeout(_) => "NN_SNDTIMEO",
            Self::ReceiveTimeout(_) => "NN_RCVTIMEO",
            Self::ReconnectInterval(_) => "NN_RECONNECT_IVL",
            Self::ReconnectIntervalMax(_) => "NN_RECONNECT_IVL_MAX",
            Self::ReceiveMaxSize(_) => "NN_RCVMAXSIZE",
            Self::TcpNoDelay(_) => "NN_TCP_NODELAY",
            Self::SocketName(_) => "NN_SOCKET_NAME",
            Self::Subscribe(_) => "NN_SUB_SUBSCRIBE",
            Self::Unsubscribe(_) => "NN_SUB_UNSUBSCRIBE",
            Self::ResendInterval(_) => "NN_REQ_RESEND_IVL",
        }
    }

    /// Whether the option means anything for `socket_type`.
    #[must_use]
    pub const fn applies_to(&self, socket_type: SocketType) -> bool {
        match self {
            Self::Subscribe(_) | Self::Unsubscribe(_) => matches!(socket_type, SocketType::Sub),
            Self::ResendInterval(_) => matches!(socket_type, SocketType::Req),
            Self::SendTimeout(_) | Self::SendBuffer(_) => socket_type.can_send(),
            Self::ReceiveTimeout(_) | Self::ReceiveBuffer(_) | Self::ReceiveMaxSize(_) => {
                socket_type.can_recv()
            }
            _ => true,
        }
    }

    /// Reject the option if it does not apply to `socket_type`.
    pub fn validate_for(&self, socket_type: SocketType) -> Result<()> {
        if self.applies_to(socket_type) {
            Ok(())
        } else {
            Err(SpineError::UnsupportedOption {
                option: self.name(),
                socket_type,
            })
        }
    }
}
