#![no_main]

use herald_digest::{Algorithm, digest_reader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for algorithm in Algorithm::ALL {
        let hex = digest_reader(data, algorithm).expect("in-memory read");
        assert_eq!(hex.len(), algorithm.hex_len());
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }
});
