//! `.herald.toml` configuration.
//!
//! Every section is optional; a missing file yields [`Config::default`].
//!
//! ```
//! use herald_config::Config;
//!
//! let config: Config = toml::from_str(r#"
//! project_name = "app"
//!
//! [release]
//! draft = true
//! prerelease = "auto"
//!
//! [release.github]
//! owner = "acme"
//! name = "app"
//! "#).unwrap();
//! assert!(config.release.draft);
//! assert_eq!(config.release.github.owner, "acme");
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use herald_auth::Provider;
use herald_digest::Algorithm;
use herald_retry::RetryStrategyConfig;
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".herald.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project_name: String,
    /// Output directory holding artifacts, the manifest and the event log.
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
    /// Provider to publish to when several tokens are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_token: Option<Provider>,
    /// `KEY=value` entries added to the template environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Concurrent uploads.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub checksum: ChecksumConfig,
    #[serde(default)]
    pub env_files: EnvFiles,
    #[serde(default)]
    pub urls: Urls,
    #[serde(default)]
    pub retry: RetryStrategyConfig,
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

fn default_parallelism() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            dist: default_dist(),
            force_token: None,
            env: Vec::new(),
            parallelism: default_parallelism(),
            release: ReleaseConfig::default(),
            checksum: ChecksumConfig::default(),
            env_files: EnvFiles::default(),
            urls: Urls::default(),
            retry: RetryStrategyConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            bail!("parallelism must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        for entry in &self.env {
            if !entry.contains('=') {
                bail!("invalid env entry {entry:?}: expected KEY=value");
            }
        }
        for extra in &self.release.extra_files {
            if extra.glob.trim().is_empty() {
                bail!("release.extra_files entries need a glob");
            }
        }
        Ok(())
    }
}

/// A boolean that may be given literally or as a template string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolTemplate {
    Literal(bool),
    Template(String),
}

impl Default for BoolTemplate {
    fn default() -> Self {
        BoolTemplate::Literal(false)
    }
}

impl BoolTemplate {
    /// Template source to evaluate.
    pub fn source(&self) -> String {
        match self {
            BoolTemplate::Literal(b) => b.to_string(),
            BoolTemplate::Template(s) => s.clone(),
        }
    }
}

impl From<bool> for BoolTemplate {
    fn from(value: bool) -> Self {
        BoolTemplate::Literal(value)
    }
}

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub name: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty() && self.name.is_empty()
    }
}

impl std::fmt::Display for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFile {
    pub glob: String,
    /// Upload name; defaults to the matched file's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub disable: BoolTemplate,
    /// Create the release but upload nothing.
    #[serde(default)]
    pub skip_upload: BoolTemplate,
    /// `auto` follows the tag's semantic version; anything else is
    /// evaluated as a boolean template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<BoolTemplate>,
    /// Leave the release as a draft after uploading.
    #[serde(default)]
    pub draft: bool,
    /// Only upload artifacts with these build IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default)]
    pub include_meta: bool,
    /// Release title template; defaults to the tag.
    #[serde(default = "default_name_template")]
    pub name_template: String,
    #[serde(default)]
    pub github: Repo,
    #[serde(default)]
    pub gitlab: Repo,
    #[serde(default)]
    pub gitea: Repo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_files: Vec<ExtraFile>,
}

fn default_name_template() -> String {
    "{{ .Tag }}".to_string()
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            disable: BoolTemplate::default(),
            skip_upload: BoolTemplate::default(),
            prerelease: None,
            draft: false,
            ids: Vec::new(),
            include_meta: false,
            name_template: default_name_template(),
            github: Repo::default(),
            gitlab: Repo::default(),
            gitea: Repo::default(),
            extra_files: Vec::new(),
        }
    }
}

impl ReleaseConfig {
    pub fn prerelease_is_auto(&self) -> bool {
        matches!(&self.prerelease, Some(BoolTemplate::Template(s)) if s.trim() == "auto")
    }

    pub fn repo(&self, provider: Provider) -> &Repo {
        match provider {
            Provider::GitHub => &self.github,
            Provider::GitLab => &self.gitlab,
            Provider::Gitea => &self.gitea,
        }
    }

    pub fn repo_mut(&mut self, provider: Provider) -> &mut Repo {
        match provider {
            Provider::GitHub => &mut self.github,
            Provider::GitLab => &mut self.gitlab,
            Provider::Gitea => &mut self.gitea,
        }
    }

    /// Providers with an explicitly configured repository.
    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| !self.repo(*p).is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumConfig {
    #[serde(default = "default_checksum_name")]
    pub name_template: String,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub disable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

fn default_checksum_name() -> String {
    "checksums.txt".to_string()
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            name_template: default_checksum_name(),
            algorithm: Algorithm::default(),
            disable: false,
            ids: Vec::new(),
        }
    }
}

/// Token file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvFiles {
    #[serde(default = "default_github_token_file")]
    pub github_token: String,
    #[serde(default = "default_gitlab_token_file")]
    pub gitlab_token: String,
    #[serde(default = "default_gitea_token_file")]
    pub gitea_token: String,
}

fn default_github_token_file() -> String {
    Provider::GitHub.default_token_file()
}

fn default_gitlab_token_file() -> String {
    Provider::GitLab.default_token_file()
}

fn default_gitea_token_file() -> String {
    Provider::Gitea.default_token_file()
}

impl Default for EnvFiles {
    fn default() -> Self {
        Self {
            github_token: default_github_token_file(),
            gitlab_token: default_gitlab_token_file(),
            gitea_token: default_gitea_token_file(),
        }
    }
}

impl EnvFiles {
    pub fn to_token_files(&self) -> herald_auth::TokenFiles {
        herald_auth::TokenFiles {
            github: self.github_token.clone(),
            gitlab: self.gitlab_token.clone(),
            gitea: self.gitea_token.clone(),
        }
    }
}

/// API endpoints of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUrls {
    #[serde(default)]
    pub api: String,
    /// Asset upload endpoint; GitHub only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upload: String,
    /// Base of user-facing release pages.
    #[serde(default)]
    pub download: String,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Urls {
    #[serde(default = "default_github_urls")]
    pub github: ProviderUrls,
    #[serde(default = "default_gitlab_urls")]
    pub gitlab: ProviderUrls,
    #[serde(default)]
    pub gitea: ProviderUrls,
}

fn default_github_urls() -> ProviderUrls {
    ProviderUrls {
        api: "https://api.github.com/".to_string(),
        upload: "https://uploads.github.com/".to_string(),
        download: "https://github.com".to_string(),
        skip_tls_verify: false,
    }
}

fn default_gitlab_urls() -> ProviderUrls {
    ProviderUrls {
        api: "https://gitlab.com/api/v4/".to_string(),
        upload: String::new(),
        download: "https://gitlab.com".to_string(),
        skip_tls_verify: false,
    }
}

impl Default for Urls {
    fn default() -> Self {
        Self {
            github: default_github_urls(),
            gitlab: default_gitlab_urls(),
            gitea: ProviderUrls::default(),
        }
    }
}

impl Urls {
    pub fn get(&self, provider: Provider) -> &ProviderUrls {
        match provider {
            Provider::GitHub => &self.github,
            Provider::GitLab => &self.gitlab,
            Provider::Gitea => &self.gitea,
        }
    }

    /// Base URL of release pages. Gitea derives it from its API URL when
    /// not configured.
    pub fn download(&self, provider: Provider) -> String {
        let urls = self.get(provider);
        let base = if urls.download.is_empty() && provider == Provider::Gitea {
            urls.api
                .trim_end_matches('/')
                .trim_end_matches("/api/v1")
                .to_string()
        } else {
            urls.download.clone()
        };
        base.trim_end_matches('/').to_string()
    }
}

/// Load `.herald.toml` from `dir`, or defaults when absent.
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file, or defaults when absent.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(config)
}

pub fn save_config(dir: &Path, config: &Config) -> Result<()> {
    let path = config_path(dir);
    let content = toml::to_string_pretty(config).context("failed to serialize config to TOML")?;
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))
}

/// Find `.herald.toml` by walking up from `start_dir`.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(config_path)
        .find(|candidate| candidate.exists())
}
