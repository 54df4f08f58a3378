//! Decompression on arbitrary blobs: bounded output, no panics, and
//! honest round-trips for blobs we produced ourselves.

#![no_main]

use libfuzzer_sys::fuzz_target;
use skywave_content::{ContentKind, compress, decompress};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a blob.
    if let Ok(out) = decompress(data) {
        assert!(out.len() <= 1 << 20, "decompression bomb");
    }

    // Our own blobs always round-trip (inside the decompression cap).
    if data.len() <= 1 << 19 {
        for kind in [ContentKind::Html, ContentKind::Generic] {
            let blob = compress(data, kind);
            let restored = decompress(&blob).expect("own blob decompresses");
            assert_eq!(restored, data);
        }
    }
});
