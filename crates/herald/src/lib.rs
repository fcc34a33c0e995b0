//! # Herald
//!
//! Publishes build outputs as a release on GitHub, GitLab or Gitea.
//!
//! Every produced file is tracked in an [`herald_artifact::Artifacts`]
//! registry. A run walks a fixed sequence of stages over one
//! [`context::ReleaseContext`]:
//!
//! 1. [`env::run`] loads the template environment and resolves the single
//!    hosting token.
//! 2. [`release::default`] fills in the repository, release URL and
//!    pre-release flag.
//! 3. [`checksums::run`] writes the checksum sidecar and registers it.
//! 4. [`release::publish`] creates the release, uploads the selected
//!    artifacts with retry and flips the release out of draft.
//!
//! Progress goes through a [`reporter::Reporter`]; evidence of what happened
//! is kept in the context's [`events::EventLog`].
//!
//! ## Modules
//!
//! - [`context`]: per-run state and stage skips
//! - [`env`]: template environment and token resolution
//! - [`release`]: release defaulting and the publish pipeline
//! - [`checksums`]: checksum sidecar file
//! - [`healthcheck`]: required tool lookup
//! - [`tmpl`]: `{{ .Field }}` templates in configuration strings
//! - [`events`]: append-only JSONL event log
//! - [`reporter`]: progress reporting

pub mod checksums;
pub mod context;
pub mod env;
pub mod events;
pub mod healthcheck;
pub mod release;
pub mod reporter;
pub mod tmpl;

/// How a stage ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The stage chose not to run; the reason is user-facing.
    Skipped(String),
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped(reason.into())
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }
}
