//! One publisher, several filtered subscribers.
//!
//! Each subscriber thread reports what it saw over a channel. Subscribers
//! only receive topics matching their prefix.
//!
//! Run this example:
//! ```bash
//! cargo run --example pubsub_fanout
//! ```

use std::thread;
use std::time::Duration;

use spine::prelude::*;

const TOPICS: &[&str] = &["weather.", "sports.", ""];

fn main() -> spine::Result<()> {
    spine::dev_tracing::init_tracing();
    println!("=== Spine PUB -> SUB fan-out ===\n");

    let inproc = InprocRegistry::new();
    let publisher = Socket::new(SocketType::Pub, Domain::Sp, inproc.clone())?;
    publisher.bind("inproc://news")?;

    let (report_tx, report_rx) = flume::unbounded::<(String, String)>();
    let mut listeners = Vec::new();
    for topic in TOPICS {
        let options = SocketOptions::new().with_recv_timeout(Duration::from_millis(300));
        let subscriber =
            Socket::with_options(SocketType::Sub, Domain::Sp, options, inproc.clone())?;
        subscriber.subscribe(*topic)?;
        subscriber.connect("inproc://news")?;

        let report_tx = report_tx.clone();
        let label = if topic.is_empty() { "<all>".to_string() } else { topic.to_string() };
        listeners.push(thread::spawn(move || {
            // Stop at the first timeout: the publisher has gone quiet.
            while let Ok(msg) = subscriber.recv_string(Flags::NONE) {
                let _ = report_tx.send((label.clone(), msg));
            }
        }));
    }
    drop(report_tx);

    while publisher.connection_count() < TOPICS.len() {
        thread::sleep(Duration::from_millis(5));
    }

    for msg in [
        "weather.london rain",
        "sports.tennis 6-4",
        "weather.paris sun",
        "markets.ftse up",
    ] {
        publisher.send_str(msg, Flags::NONE)?;
    }

    for listener in listeners {
        listener.join().expect("subscriber panicked");
    }
    for (topic, msg) in report_rx.iter() {
        println!("[SUB {topic:>9}] {msg}");
    }
    Ok(())
}
