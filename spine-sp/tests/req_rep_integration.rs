//! Request/reply over every transport, plus the REQ recovery paths.

mod common;

use std::thread;
use std::time::Duration;

use common::*;
use spine_sp::prelude::*;

fn echo_once(rep: &Socket) {
    let request = rep.recv(Flags::NONE).unwrap();
    let mut reply = b"echo:".to_vec();
    reply.extend_from_slice(&request);
    rep.send(reply, Flags::NONE).unwrap();
}

fn roundtrip(rep_addr: &str, req_addr: &str) {
    let inproc = InprocRegistry::new();
    let rep = socket(&inproc, SocketType::Rep);
    rep.bind(rep_addr).unwrap();
    let req = socket(&inproc, SocketType::Req);
    req.connect(req_addr).unwrap();

    let server = {
        let rep = rep.clone();
        thread::spawn(move || {
            for _ in 0..3 {
                echo_once(&rep);
            }
        })
    };

    for i in 0..3 {
        req.send_str(&format!("hello {i}"), Flags::NONE).unwrap();
        assert_eq!(req.recv_string(Flags::NONE).unwrap(), format!("echo:hello {i}"));
    }
    server.join().unwrap();
}

#[test]
fn test_req_rep_inproc() {
    roundtrip("inproc://rr", "inproc://rr");
}

#[test]
fn test_req_rep_tcp() {
    let inproc = InprocRegistry::new();
    let rep = socket(&inproc, SocketType::Rep);
    let addr = bind_tcp(&rep);
    let req = socket(&inproc, SocketType::Req);
    req.connect(&addr).unwrap();

    req.send_str("over tcp", Flags::NONE).unwrap();
    echo_once(&rep);
    assert_eq!(req.recv_string(Flags::NONE).unwrap(), "echo:over tcp");
}

#[cfg(unix)]
#[test]
fn test_req_rep_ipc() {
    let addr = ipc_path("req-rep");
    roundtrip(&addr, &addr);
}

#[test]
fn test_fsm_violations() {
    let inproc = InprocRegistry::new();
    let rep = socket(&inproc, SocketType::Rep);
    rep.bind("inproc://fsm").unwrap();
    let req = socket(&inproc, SocketType::Req);
    req.connect("inproc://fsm").unwrap();

    let err = rep.send_str("unsolicited", Flags::NONE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FsmViolation);

    let err = req.recv(Flags::DONTWAIT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FsmViolation);

    req.send_str("first", Flags::NONE).unwrap();
    let err = req.send_str("second", Flags::NONE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FsmViolation);
}

#[test]
fn test_requests_are_load_balanced() {
    let inproc = InprocRegistry::new();
    let req = socket(&inproc, SocketType::Req);
    req.bind("inproc://lb").unwrap();

    let reps: Vec<Socket> = (0..2)
        .map(|_| {
            let rep = socket(&inproc, SocketType::Rep);
            rep.connect("inproc://lb").unwrap();
            rep
        })
        .collect();
    wait_connections(&req, 2);

    let workers: Vec<_> = reps
        .iter()
        .enumerate()
        .map(|(n, rep)| {
            let rep = rep.clone();
            thread::spawn(move || {
                let _request = rep.recv(Flags::NONE).unwrap();
                rep.send(format!("worker {n}").into_bytes(), Flags::NONE).unwrap();
            })
        })
        .collect();

    let mut answers: Vec<String> = (0..2)
        .map(|_| {
            req.send_str("job", Flags::NONE).unwrap();
            req.recv_string(Flags::NONE).unwrap()
        })
        .collect();
    answers.sort();
    assert_eq!(answers, vec!["worker 0", "worker 1"]);
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_request_resent_when_server_dies() {
    let inproc = InprocRegistry::new();
    let req = socket(&inproc, SocketType::Req);
    req.connect("inproc://failover").unwrap();

    let doomed = socket(&inproc, SocketType::Rep);
    doomed.bind("inproc://failover").unwrap();
    wait_connections(&req, 1);

    req.send_str("important", Flags::NONE).unwrap();
    assert_eq!(doomed.recv_string(Flags::NONE).unwrap(), "important");
    doomed.close().unwrap();
    wait_until("the dead server to be dropped", || req.connection_count() == 0);

    // A replacement comes up on the same name; the request follows it.
    let rescue = socket(&inproc, SocketType::Rep);
    rescue.bind("inproc://failover").unwrap();
    assert_eq!(rescue.recv_string(Flags::NONE).unwrap(), "important");
    rescue.send_str("handled", Flags::NONE).unwrap();
    assert_eq!(req.recv_string(Flags::NONE).unwrap(), "handled");
}

#[test]
fn test_request_resent_after_interval() {
    let inproc = InprocRegistry::new();
    let rep = socket(&inproc, SocketType::Rep);
    rep.bind("inproc://resend").unwrap();
    let req = socket_with(
        &inproc,
        SocketType::Req,
        test_options().with_resend_ivl(Duration::from_millis(50)),
    );
    req.connect("inproc://resend").unwrap();
    wait_connections(&req, 1);

    req.send_str("retry me", Flags::NONE).unwrap();
    // The first copy is received and ignored.
    assert_eq!(rep.recv_string(Flags::NONE).unwrap(), "retry me");

    let requester = {
        let req = req.clone();
        thread::spawn(move || req.recv_string(Flags::NONE))
    };

    // The resend replaces the abandoned request on the REP side.
    assert_eq!(rep.recv_string(Flags::NONE).unwrap(), "retry me");
    rep.send_str("finally", Flags::NONE).unwrap();
    assert_eq!(requester.join().unwrap().unwrap(), "finally");
}

#[test]
fn test_recv_timeout_abandons_request() {
    let inproc = InprocRegistry::new();
    let rep = socket(&inproc, SocketType::Rep);
    rep.bind("inproc://abandon").unwrap();
    let req = socket_with(
        &inproc,
        SocketType::Req,
        test_options().with_recv_timeout(Duration::from_millis(50)),
    );
    req.connect("inproc://abandon").unwrap();

    req.send_str("slow", Flags::NONE).unwrap();
    let err = req.recv(Flags::NONE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // Back to idle: a new request is allowed and the late reply is dropped.
    assert_eq!(rep.recv_string(Flags::NONE).unwrap(), "slow");
    rep.send_str("too late", Flags::NONE).unwrap();
    req.send_str("fresh", Flags::NONE).unwrap();
    assert_eq!(rep.recv_string(Flags::NONE).unwrap(), "fresh");
    rep.send_str("on time", Flags::NONE).unwrap();
    assert_eq!(req.recv_string(Flags::NONE).unwrap(), "on time");
}
