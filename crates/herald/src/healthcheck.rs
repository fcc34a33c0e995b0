//! Lookup of external tools a run depends on.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, bail};

use crate::reporter::Reporter;

/// Tools every run may shell out to.
pub const DEFAULT_TOOLS: [&str; 1] = ["git"];

/// Remembers which tools were looked up and whether they were found.
/// Owned by the caller so concurrent checks can share one.
#[derive(Debug, Default)]
pub struct ToolCache {
    seen: Mutex<BTreeMap<String, bool>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, bool>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached result for `tool`, computing and storing it with `probe` on
    /// first use. The lock is held across the probe so each tool is looked
    /// up once.
    pub fn load_or_store(&self, tool: &str, probe: impl FnOnce(&str) -> bool) -> bool {
        let mut seen = self.lock();
        if let Some(found) = seen.get(tool) {
            return *found;
        }
        let found = probe(tool);
        seen.insert(tool.to_string(), found);
        found
    }

    pub fn get(&self, tool: &str) -> Option<bool> {
        self.lock().get(tool).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

pub fn check_tools(tools: &[&str], cache: &ToolCache, reporter: &mut dyn Reporter) -> Result<()> {
    check_tools_with(tools, cache, reporter, |tool| which::which(tool).is_ok())
}

/// Like [`check_tools`] with a custom presence probe.
pub fn check_tools_with(
    tools: &[&str],
    cache: &ToolCache,
    reporter: &mut dyn Reporter,
    probe: impl Fn(&str) -> bool,
) -> Result<()> {
    let mut missing = Vec::new();
    for tool in tools {
        if cache.load_or_store(tool, &probe) {
            reporter.info(&format!("{tool} is present"));
        } else {
            reporter.error(&format!("{tool} not present in PATH"));
            missing.push(*tool);
        }
    }
    if !missing.is_empty() {
        bail!("one or more needed tools are not present");
    }
    Ok(())
}
