//! Spine Core
//!
//! This crate contains the protocol-agnostic building blocks of the engine:
//! - Error taxonomy (`error`)
//! - Endpoint address parsing (`endpoint`)
//! - Socket types and domains (`socket_type`)
//! - Socket options and runtime option values (`options`, `config`)
//! - Redial backoff (`reconnect`)
//! - Segmented read buffer for stream decoders (`buffer`)
//! - SUB topic filters (`subscription`)
//! - Readiness descriptors (`signal`)
//! - Inproc rendezvous registry (`inproc`)
//! - TCP / IPC helpers (`tcp`, `ipc`)
//! - Lifecycle events (`monitor`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod inproc;
pub mod monitor;
pub mod options;
pub mod reconnect;
pub mod signal;
pub mod socket_type;
pub mod subscription;
pub mod tcp;

#[cfg(unix)]
pub mod ipc;

// A small prelude to make downstream crates ergonomic.
pub mod prelude {
    pub use crate::buffer::SegmentedBuffer;
    pub use crate::config::BufferConfig;
    pub use crate::endpoint::{Endpoint, EndpointError, TcpAddr};
    pub use crate::error::{ErrorKind, Result, SpineError};
    pub use crate::inproc::InprocRegistry;
    pub use crate::monitor::{SocketEvent, SocketMonitor};
    pub use crate::options::{SocketOption, SocketOptions};
    pub use crate::reconnect::Backoff;
    pub use crate::signal::Signal;
    pub use crate::socket_type::{Domain, SocketType};
    pub use crate::subscription::SubscriptionSet;
}
