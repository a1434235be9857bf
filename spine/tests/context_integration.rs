//! End-to-end use of the handle-based `Context` API.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spine::prelude::*;

fn options() -> SocketOptions {
    SocketOptions::new()
        .with_recv_timeout(Duration::from_secs(5))
        .with_send_timeout(Duration::from_secs(5))
        .with_reconnect_ivl(Duration::from_millis(20))
        .with_reconnect_ivl_max(Duration::from_millis(200))
        .with_linger(None)
}

#[test]
fn test_req_rep_through_handles() {
    let ctx = Arc::new(Context::new());
    let rep = ctx.create_with_options(SocketType::Rep, Domain::Sp, options()).unwrap();
    let req = ctx.create_with_options(SocketType::Req, Domain::Sp, options()).unwrap();
    let addr = {
        let socket = ctx.socket(rep).unwrap();
        let endpoint = ctx.bind(rep, "tcp://127.0.0.1:0").unwrap();
        format!("tcp://{}", socket.local_addr(endpoint).unwrap())
    };
    ctx.connect(req, &addr).unwrap();

    let server = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            for _ in 0..3 {
                let n: u32 = ctx.recv_string(rep, Flags::NONE).unwrap().parse().unwrap();
                ctx.send_str(rep, &(n * 2).to_string(), Flags::NONE).unwrap();
            }
        })
    };
    for n in 1..=3u32 {
        ctx.send_str(req, &n.to_string(), Flags::NONE).unwrap();
        assert_eq!(ctx.recv_string(req, Flags::NONE).unwrap(), (n * 2).to_string());
    }
    server.join().unwrap();
}

#[test]
fn test_pubsub_through_handles() {
    let ctx = Context::new();
    let publisher = ctx.create_with_options(SocketType::Pub, Domain::Local, options()).unwrap();
    let subscriber = ctx.create_with_options(SocketType::Sub, Domain::Local, options()).unwrap();
    ctx.bind(publisher, "inproc://prices").unwrap();
    ctx.subscribe(subscriber, "gbp").unwrap();
    ctx.connect(subscriber, "inproc://prices").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.socket(publisher).unwrap().connection_count() == 0 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }

    ctx.send_str(publisher, "usd 1", Flags::NONE).unwrap();
    ctx.send_str(publisher, "gbp 2", Flags::NONE).unwrap();
    assert_eq!(ctx.recv_string(subscriber, Flags::NONE).unwrap(), "gbp 2");

    ctx.unsubscribe(subscriber, "gbp").unwrap();
    assert_eq!(
        ctx.unsubscribe(subscriber, "gbp").unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_options_and_monitor_through_handles() {
    let ctx = Context::new();
    let push = ctx.create(SocketType::Push, Domain::Sp).unwrap();
    let monitor = ctx.monitor(push).unwrap();

    ctx.set_option(push, SocketOption::SendBuffer(7)).unwrap();
    assert_eq!(ctx.options(push).unwrap().send_hwm, 7);

    let endpoint = ctx.connect(push, "inproc://nowhere").unwrap();
    ctx.disconnect(push, endpoint).unwrap();
    ctx.close(push).unwrap();

    let events: Vec<SocketEvent> = monitor.try_iter().collect();
    assert!(matches!(events.last(), Some(SocketEvent::Closed)), "{events:?}");
}

#[test]
fn test_closed_handle_in_another_thread() {
    let ctx = Arc::new(Context::new());
    let bus = ctx.create(SocketType::Bus, Domain::Sp).unwrap();
    let waiter = {
        let ctx = ctx.clone();
        thread::spawn(move || ctx.recv(bus, Flags::NONE))
    };
    thread::sleep(Duration::from_millis(50));
    ctx.close(bus).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap_err().kind(), ErrorKind::SocketClosed);
    assert_eq!(ctx.handle_fd(bus).unwrap_err().kind(), ErrorKind::SocketClosed);
}

#[test]
fn test_drop_closes_sockets() {
    let socket = {
        let ctx = Context::new();
        let pull = ctx.create(SocketType::Pull, Domain::Sp).unwrap();
        ctx.bind(pull, "inproc://short-lived").unwrap();
        ctx.socket(pull).unwrap()
    };
    assert!(socket.is_closed());
    assert_eq!(socket.recv(Flags::DONTWAIT).unwrap_err().kind(), ErrorKind::SocketClosed);
}
