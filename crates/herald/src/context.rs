//! Per-invocation release state shared by every stage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use herald_artifact::Artifacts;
use herald_auth::{Credentials, Provider};
use herald_config::Config;
use semver::Version;

use crate::events::EventLog;
use crate::tmpl::{TemplateEnv, parse_semver};

/// Stages that can be switched off from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Skip {
    Publish,
    Checksum,
}

impl Skip {
    pub fn as_str(&self) -> &'static str {
        match self {
            Skip::Publish => "publish",
            Skip::Checksum => "checksum",
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Skip {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" => Ok(Skip::Publish),
            "checksum" => Ok(Skip::Checksum),
            other => anyhow::bail!("unknown stage to skip: {other} (expected publish or checksum)"),
        }
    }
}

/// Everything a release run knows. Built once, filled in by the env and
/// release defaulting stages, then read by the rest.
#[derive(Debug)]
pub struct ReleaseContext {
    pub config: Config,
    pub working_dir: PathBuf,
    /// Template environment: the process environment plus `config.env`.
    pub env: BTreeMap<String, String>,
    pub tag: String,
    pub previous_tag: String,
    pub semver: Option<Version>,
    pub credentials: Option<Credentials>,
    pub prerelease: bool,
    pub release_url: String,
    /// Set once the hosting provider has created or reused the release.
    pub created_release: bool,
    pub release_notes: String,
    pub snapshot: bool,
    pub skip_token_check: bool,
    pub skips: BTreeSet<Skip>,
    pub artifacts: Arc<Artifacts>,
    pub events: EventLog,
}

impl ReleaseContext {
    pub fn new(config: Config, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            config,
            artifacts: Arc::new(Artifacts::with_working_dir(Some(working_dir.clone()))),
            working_dir,
            env: std::env::vars().collect(),
            tag: String::new(),
            previous_tag: String::new(),
            semver: None,
            credentials: None,
            prerelease: false,
            release_url: String::new(),
            created_release: false,
            release_notes: String::new(),
            snapshot: false,
            skip_token_check: false,
            skips: BTreeSet::new(),
            events: EventLog::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.set_tag(tag);
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
        self.semver = parse_semver(&self.tag);
    }

    pub fn skips(&self, stage: Skip) -> bool {
        self.skips.contains(&stage)
    }

    pub fn template(&self) -> TemplateEnv {
        TemplateEnv {
            project_name: self.config.project_name.clone(),
            tag: self.tag.clone(),
            previous_tag: self.previous_tag.clone(),
            semver: self.semver.clone(),
            env: self.env.clone(),
        }
    }

    /// Output directory, resolved against the working directory.
    pub fn dist(&self) -> PathBuf {
        self.working_dir.join(&self.config.dist)
    }

    /// Provider releases go to: the one whose token was resolved, else the
    /// single explicitly configured repository, else GitHub.
    pub fn provider(&self) -> Provider {
        if let Some(credentials) = &self.credentials {
            return credentials.provider;
        }
        match self.config.release.configured_providers().as_slice() {
            [only] => *only,
            _ => Provider::GitHub,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.token.as_str())
    }
}
