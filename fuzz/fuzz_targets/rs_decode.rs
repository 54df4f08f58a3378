//! Reed-Solomon decoding on arbitrary coded streams. Decoding may fail
//! or succeed; it must never panic, and a reported success must satisfy
//! its own syndromes (checked internally by the decoder).

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_modem::rs::{RsParams, decode_stream, encode_stream};

fuzz_target!(|data: &[u8]| {
    let params = RsParams::default();

    // Arbitrary bytes as a coded stream.
    let _ = decode_stream(data, params);

    // A genuine codeword with limited corruption must round-trip.
    if data.len() > 4 {
        let (corrupt_at, payload) = data.split_at(2);
        let coded = encode_stream(payload, params);
        let mut corrupted = coded.clone();
        let pos = usize::from(u16::from_le_bytes([corrupt_at[0], corrupt_at[1]]));
        if !corrupted.is_empty() {
            corrupted[pos % coded.len()] ^= 0x55;
            let (decoded, corrected) =
                decode_stream(&corrupted, params).expect("single error corrects");
            assert_eq!(decoded, payload);
            assert!(corrected <= 1);
        }
    }
});
