//! Git lookups needed to publish a release: the `origin` remote, the
//! repository it points to, and the current and previous tags.
//!
//! ```
//! use herald_git::parse_remote;
//!
//! let repo = parse_remote("git@github.com:acme/app.git").unwrap();
//! assert_eq!((repo.owner.as_str(), repo.name.as_str()), ("acme", "app"));
//! ```

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Output};

use serde::{Deserialize, Serialize};

/// Overrides the git executable.
pub const GIT_BIN_ENV: &str = "HERALD_GIT_BIN";

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("current folder is not a git repository")]
    NotARepo,
    #[error("no remote configured to list refs from")]
    NoRemote,
    #[error("unsupported repository URL: {0}")]
    InvalidUrl(String),
    #[error("failed to run git: {0}")]
    Spawn(#[source] io::Error),
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },
}

/// Owner and name parsed from a remote URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepo {
    /// Everything before the last path segment; GitLab subgroups keep their
    /// slashes.
    pub owner: String,
    pub name: String,
}

fn git_bin() -> OsString {
    env::var_os(GIT_BIN_ENV).unwrap_or_else(|| OsString::from("git"))
}

fn run(dir: &Path, args: &[&str]) -> Result<Output, GitError> {
    Command::new(git_bin())
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(GitError::Spawn)
}

fn run_ok(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let output = run(dir, args)?;
    if !output.status.success() {
        return Err(GitError::Command {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// Whether `dir` is inside a git work tree.
pub fn is_repo(dir: &Path) -> bool {
    run_ok(dir, &["rev-parse", "--is-inside-work-tree"]).is_ok_and(|out| out == "true")
}

/// URL of `remote` (usually `origin`).
pub fn remote_url(dir: &Path, remote: &str) -> Result<String, GitError> {
    if !is_repo(dir) {
        return Err(GitError::NotARepo);
    }
    let key = format!("remote.{remote}.url");
    let output = run(dir, &["config", "--get", &key])?;
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || url.is_empty() {
        return Err(GitError::NoRemote);
    }
    Ok(url)
}

/// Owner and name of the repository `url` points to.
///
/// Accepts scp-style (`git@host:owner/name.git`) and URL-style
/// (`https://host/owner/name`, `ssh://git@host:22/owner/name.git`) remotes.
pub fn parse_remote(url: &str) -> Result<RemoteRepo, GitError> {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = if let Some((_, rest)) = trimmed.split_once("://") {
        rest.split_once('/').map(|(_, path)| path).unwrap_or_default()
    } else if let Some((_, path)) = trimmed.split_once(':') {
        path
    } else {
        ""
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.split_last() {
        Some((name, owner)) if !owner.is_empty() => Ok(RemoteRepo {
            owner: owner.join("/"),
            name: (*name).to_string(),
        }),
        _ => Err(GitError::InvalidUrl(url.to_string())),
    }
}

fn describe(dir: &Path, reference: &str) -> Result<String, GitError> {
    run_ok(
        dir,
        &["describe", "--tags", "--abbrev=0", "--always", reference],
    )
}

/// Most recent tag reachable from `HEAD`.
pub fn current_tag(dir: &Path) -> Result<String, GitError> {
    describe(dir, "HEAD")
}

/// Most recent tag reachable from the parent of `base`.
pub fn previous_tag(dir: &Path, base: &str) -> Result<String, GitError> {
    describe(dir, &format!("{base}^"))
}
