//! The mesh router fed arbitrary packets from arbitrary neighbours:
//! never panics, never emits a relay with an incremented TTL.

#![no_main]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use libfuzzer_sys::fuzz_target;
use skywave_core::{Environment, StackConfig};
use skywave_mesh::{MeshRouter, RouterAction};
use skywave_proto::{Callsign, Packet, PacketType, Payload};

#[derive(Clone)]
struct FuzzEnv {
    counter: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let value = self
                .counter
                .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
                .wrapping_mul(0xBF58_476D_1CE4_E5B9);
            chunk.copy_from_slice(&value.to_le_bytes()[..chunk.len()]);
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let env = FuzzEnv { counter: Arc::new(AtomicU64::new(1)) };
    let callsign = Callsign::parse("B2B").expect("valid callsign");
    let mut router = MeshRouter::new(env, StackConfig::new(callsign));
    let now = Instant::now();

    let neighbours = ["A1A", "C3C", "D4D", "E5E"];

    let mut rest = data;
    while rest.len() >= 3 {
        let from = Callsign::parse(neighbours[usize::from(rest[0]) % neighbours.len()])
            .expect("valid neighbour");
        let len = usize::from(u16::from_le_bytes([rest[1], rest[2]])).min(rest.len() - 3);
        let (chunk, tail) = rest[3..].split_at(len);
        rest = tail;

        let Ok(packet) = Packet::decode(chunk) else { continue };
        let actions = router.handle_packet(now, from, &packet);

        for action in actions {
            if let RouterAction::Unicast { packet, .. } | RouterAction::Broadcast(packet) = action
            {
                if packet.header.packet_type() == PacketType::DataRelay {
                    if let Ok(Payload::DataRelay(relay)) = Payload::from_packet(&packet) {
                        assert!(relay.ttl < u8::MAX, "ttl grew");
                    }
                }
            }
        }
    }

    let _ = router.tick(now + Duration::from_secs(30));
});
