//! Packet::decode must never panic on arbitrary radio bytes; invalid
//! input is an error, not a crash.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::Packet;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(data) {
        // Anything that decodes must re-encode to a decodable form.
        let wire = packet.to_wire();
        let again = Packet::decode(&wire).expect("re-decode of encoded packet");
        assert_eq!(packet, again);
    }
});
