#![no_main]

use herald_git::parse_remote;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|url: &str| {
    if let Ok(remote) = parse_remote(url) {
        assert!(!remote.owner.is_empty());
        assert!(!remote.name.is_empty());
        assert!(!remote.name.contains('/'));
    }
});
