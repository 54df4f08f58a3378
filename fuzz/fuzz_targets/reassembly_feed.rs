//! The reassembly table fed with arbitrary packet sequences: never
//! panics, never delivers partial payloads longer than the fragments it
//! was given.

#![no_main]

use std::time::Instant;

use libfuzzer_sys::fuzz_target;
use skywave_proto::{
    Packet,
    reassembly::{Reassembler, ReassemblyConfig},
};

fuzz_target!(|data: &[u8]| {
    let mut table = Reassembler::<Instant>::new(ReassemblyConfig {
        capacity: 8,
        ..ReassemblyConfig::default()
    });
    let now = Instant::now();

    let mut fed = 0usize;
    // Interpret the input as a stream of length-prefixed packet blobs.
    let mut rest = data;
    while rest.len() >= 2 {
        let len = usize::from(u16::from_le_bytes([rest[0], rest[1]])).min(rest.len() - 2);
        let (chunk, tail) = rest[2..].split_at(len);
        rest = tail;

        let Ok(packet) = Packet::decode(chunk) else { continue };
        fed += packet.payload.len();
        if let Ok(Some(message)) = table.accept(now, &packet) {
            assert!(message.payload.len() <= fed, "delivered more than was fed");
        }
    }
});
