#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use spine_core::buffer::SegmentedBuffer;
use spine_core::socket_type::SocketType;
use spine_sp::codec::FrameDecoder;
use spine_sp::handshake::{parse_header, HEADER_LEN};

const MAX_MSG: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    // The first bytes of a connection are the protocol header.
    if let Ok(header) = <&[u8; HEADER_LEN]>::try_from(data.get(..HEADER_LEN).unwrap_or_default()) {
        let _ = parse_header(header, SocketType::Pull);
    }

    // Feed the rest in uneven chunks, as reads would deliver it.
    let mut decoder = FrameDecoder::new(Some(MAX_MSG));
    let mut buf = SegmentedBuffer::new();
    for chunk in data.chunks(data.first().map_or(1, |b| usize::from(*b % 17) + 1)) {
        buf.push(Bytes::copy_from_slice(chunk));
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(msg)) => assert!(msg.len() <= MAX_MSG),
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
