//! REQ/REP over TCP with a worker thread answering requests.
//!
//! Run this example:
//! ```bash
//! RUST_LOG=spine_sp=debug cargo run --example req_rep
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spine::prelude::*;
use tracing::info;

const REQUESTS: usize = 5;

fn main() -> spine::Result<()> {
    spine::dev_tracing::init_tracing();
    println!("=== Spine REQ <-> REP ===\n");

    let ctx = Arc::new(Context::new());

    let server = ctx.create(SocketType::Rep, Domain::Sp)?;
    let endpoint = ctx.bind(server, "tcp://127.0.0.1:0")?;
    let local = ctx.socket(server)?.local_addr(endpoint).expect("tcp endpoint has an address");
    let addr = format!("tcp://{local}");
    println!("[REP] Listening on {addr}");

    let worker = {
        let ctx = ctx.clone();
        thread::spawn(move || -> spine::Result<()> {
            for _ in 0..REQUESTS {
                let request = ctx.recv_string(server, Flags::NONE)?;
                info!("[REP] Got {:?}", request);
                ctx.send_str(server, &request.to_uppercase(), Flags::NONE)?;
            }
            Ok(())
        })
    };

    let client = ctx.create_with_options(
        SocketType::Req,
        Domain::Sp,
        SocketOptions::new().with_recv_timeout(Duration::from_secs(5)),
    )?;
    ctx.connect(client, &addr)?;

    for i in 0..REQUESTS {
        let request = format!("hello #{i}");
        ctx.send_str(client, &request, Flags::NONE)?;
        let reply = ctx.recv_string(client, Flags::NONE)?;
        println!("[REQ] {request} -> {reply}");
    }

    worker.join().expect("worker panicked")?;
    ctx.terminate();
    println!("\nDone");
    Ok(())
}
