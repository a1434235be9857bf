//! Waiting on a socket through its readiness descriptor.
//!
//! `recv_fd` returns a descriptor that polls readable exactly while a
//! message is waiting, so it can sit in any external event loop. This demo
//! peeks it with `socket2` instead of a full poller.
//!
//! Run this example:
//! ```bash
//! cargo run --example readiness_poll
//! ```

#[cfg(unix)]
fn main() -> spine::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::fd::BorrowedFd;
    use std::thread;
    use std::time::Duration;

    use spine::prelude::*;

    spine::dev_tracing::init_tracing();
    println!("=== Spine readiness descriptors ===\n");

    let ctx = Context::new();
    let pull = ctx.create(SocketType::Pull, Domain::Sp)?;
    let push = ctx.create(SocketType::Push, Domain::Sp)?;
    ctx.bind(pull, "inproc://ready")?;
    ctx.connect(push, "inproc://ready")?;

    let recv_fd = ctx.recv_fd(pull)?;
    // SAFETY: the descriptor lives as long as the socket, which outlives `fd`.
    let fd = unsafe { BorrowedFd::borrow_raw(recv_fd) };
    let readable = || {
        let mut byte = [MaybeUninit::<u8>::uninit(); 1];
        matches!(socket2::SockRef::from(&fd).peek(&mut byte), Ok(1))
    };

    println!("before send: readable = {}", readable());
    ctx.send_str(push, "wake up", Flags::NONE)?;
    while !readable() {
        thread::sleep(Duration::from_millis(1));
    }
    println!("after send:  readable = {}", readable());

    let msg = ctx.recv_string(pull, Flags::DONTWAIT)?;
    println!("received {msg:?}; readable = {}", readable());
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    println!("readiness descriptors are only exposed on unix");
}
