//! Shared helpers for the socket integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use spine_sp::prelude::*;

pub const PATIENCE: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `PATIENCE` runs out.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + PATIENCE;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Receive monitor events until one matches `pred`.
pub fn wait_event(
    monitor: &SocketMonitor,
    mut pred: impl FnMut(&SocketEvent) -> bool,
) -> SocketEvent {
    let deadline = Instant::now() + PATIENCE;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match monitor.recv_timeout(left) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(e) => panic!("no matching monitor event: {e}"),
        }
    }
}

pub fn wait_connections(socket: &Socket, n: usize) {
    wait_until(&format!("{n} connection(s)"), || socket.connection_count() >= n);
}

/// Options every test socket uses: bounded waits, fast redial, no linger.
pub fn test_options() -> SocketOptions {
    SocketOptions::new()
        .with_recv_timeout(PATIENCE)
        .with_send_timeout(PATIENCE)
        .with_reconnect_ivl(Duration::from_millis(20))
        .with_reconnect_ivl_max(Duration::from_millis(200))
        .with_linger(None)
}

pub fn socket(inproc: &InprocRegistry, socket_type: SocketType) -> Socket {
    socket_with(inproc, socket_type, test_options())
}

/// Route engine logs to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn socket_with(
    inproc: &InprocRegistry,
    socket_type: SocketType,
    options: SocketOptions,
) -> Socket {
    init_tracing();
    Socket::with_options(socket_type, Domain::Sp, options, inproc.clone()).unwrap()
}

/// Bind on an ephemeral loopback port and return the dialable address.
pub fn bind_tcp(socket: &Socket) -> String {
    let id = socket.bind("tcp://127.0.0.1:0").unwrap();
    let addr = socket.local_addr(id).unwrap();
    format!("tcp://{addr}")
}

#[cfg(unix)]
pub fn ipc_path(tag: &str) -> String {
    let path = std::env::temp_dir().join(format!("spine-{}-{tag}.sock", std::process::id()));
    format!("ipc://{}", path.display())
}

/// Whether a readiness descriptor currently polls readable.
#[cfg(unix)]
pub fn fd_readable(fd: std::os::unix::io::RawFd) -> bool {
    use std::mem::MaybeUninit;
    use std::os::fd::BorrowedFd;

    // SAFETY: the descriptor is owned by a socket that outlives this call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut byte = [MaybeUninit::<u8>::uninit(); 1];
    matches!(socket2::SockRef::from(&fd).peek(&mut byte), Ok(1))
}
