#![no_main]

use std::collections::BTreeMap;

use herald::tmpl::{TemplateEnv, parse_semver};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (tag, source) = data;
    let env = TemplateEnv {
        project_name: "app".to_string(),
        tag: tag.to_string(),
        previous_tag: String::new(),
        semver: parse_semver(tag),
        env: BTreeMap::from([("HOME".to_string(), "/home/app".to_string())]),
    };

    // Text without actions is returned untouched.
    if !source.contains("{{") {
        assert_eq!(env.apply(source).expect("plain text"), source);
    } else {
        let _ = env.apply(source);
    }
    let _ = env.bool(source);
});
