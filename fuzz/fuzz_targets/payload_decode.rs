//! Payload::decode against every type code with arbitrary CBOR bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::{PacketType, Payload};

fuzz_target!(|data: &[u8]| {
    let Some((&code, body)) = data.split_first() else { return };
    let Some(packet_type) = PacketType::from_u8(code) else { return };

    if let Ok(payload) = Payload::decode(packet_type, body) {
        // Round-trip: decoded payloads re-encode and decode to the same
        // value under the same type code.
        let bytes = payload.to_bytes().expect("re-encode");
        let again = Payload::decode(payload.packet_type(), &bytes).expect("re-decode");
        assert_eq!(payload, again);
    }
});
