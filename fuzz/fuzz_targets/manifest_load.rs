#![no_main]

use herald_artifact::Artifacts;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|json: &str| {
    let artifacts = Artifacts::with_working_dir(None);
    if artifacts.extend_from_json(json).is_err() {
        return;
    }

    // Whatever loads must serialize and load back.
    let Ok(written) = artifacts.to_json() else {
        return;
    };
    let reloaded = Artifacts::with_working_dir(None);
    reloaded.extend_from_json(&written).expect("reload manifest");
    assert_eq!(artifacts.paths(), reloaded.paths());
    let _ = artifacts.group_by_platform();
});
