//! Link envelope decoding on arbitrary bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_proto::linkframe;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = linkframe::decode(data) {
        let wire = linkframe::encode(frame.sender, frame.recipient, &frame.packet);
        let again = linkframe::decode(&wire).expect("re-decode of encoded frame");
        assert_eq!(frame.sender, again.sender);
        assert_eq!(frame.recipient, again.recipient);
        assert_eq!(frame.packet, again.packet);
    }
});
