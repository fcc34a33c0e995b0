//! Hosting token resolution for herald.
//!
//! A release is published to exactly one provider. Each provider has a
//! token slot filled from its environment variable or, failing that, from the
//! first line of a token file:
//! - `GITHUB_TOKEN` / `~/.config/herald/github_token`
//! - `GITLAB_TOKEN` / `~/.config/herald/gitlab_token`
//! - `GITEA_TOKEN` / `~/.config/herald/gitea_token`
//!
//! More than one filled slot is an error unless a provider is forced via
//! configuration or `HERALD_FORCE_TOKEN`.
//!
//! # Example
//!
//! ```no_run
//! use herald_auth::{resolve, ResolveOptions, Resolution};
//!
//! match resolve(&ResolveOptions::default())? {
//!     Resolution::Active(creds) => println!("publishing to {}", creds.provider),
//!     Resolution::Skipped => println!("token check skipped"),
//! }
//! # Ok::<(), herald_auth::AuthError>(())
//! ```

use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable forcing one provider when several tokens are present.
pub const FORCE_TOKEN_ENV: &str = "HERALD_FORCE_TOKEN";

/// Source-hosting provider a release is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    Gitea,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::GitHub, Provider::GitLab, Provider::Gitea];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
            Provider::Gitea => "gitea",
        }
    }

    /// Environment variable holding this provider's token.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::GitHub => "GITHUB_TOKEN",
            Provider::GitLab => "GITLAB_TOKEN",
            Provider::Gitea => "GITEA_TOKEN",
        }
    }

    /// Default token file, before home expansion.
    pub fn default_token_file(&self) -> String {
        format!("~/.config/herald/{}_token", self.as_str())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| AuthError::UnknownProvider(s.to_string()))
    }
}

/// Where a token came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Env(&'static str),
    File(PathBuf),
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Env(var) => write!(f, "{var}"),
            TokenSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The active provider and its token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub provider: Provider,
    pub token: String,
    pub source: TokenSource,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("token", &mask_token(&self.token))
            .field("source", &self.source)
            .finish()
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Active(Credentials),
    /// Token checks were skipped and no token was found.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot expand user-specific home dir: {0}")]
    UserHome(String),
    #[error("could not determine the home directory")]
    NoHome,
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing GITHUB_TOKEN, GITLAB_TOKEN and GITEA_TOKEN")]
    MissingToken,
    #[error("multiple tokens found, but only one is allowed: {}", env_list(.0))]
    MultipleTokens(Vec<Provider>),
    #[error("failed to load {provider} token: {source}")]
    Load {
        provider: Provider,
        #[source]
        source: LoadError,
    },
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

fn env_list(providers: &[Provider]) -> String {
    providers
        .iter()
        .map(Provider::env_var)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Token file locations, one per provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFiles {
    pub github: String,
    pub gitlab: String,
    pub gitea: String,
}

impl Default for TokenFiles {
    fn default() -> Self {
        Self {
            github: Provider::GitHub.default_token_file(),
            gitlab: Provider::GitLab.default_token_file(),
            gitea: Provider::Gitea.default_token_file(),
        }
    }
}

impl TokenFiles {
    pub fn get(&self, provider: Provider) -> &str {
        match provider {
            Provider::GitHub => &self.github,
            Provider::GitLab => &self.gitlab,
            Provider::Gitea => &self.gitea,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub files: TokenFiles,
    /// Provider forced by configuration; takes precedence over
    /// [`FORCE_TOKEN_ENV`].
    pub force: Option<Provider>,
    /// Skip the token requirement (release disabled, publishing skipped or
    /// token check explicitly turned off).
    pub skip: bool,
}

struct Slot {
    provider: Provider,
    value: Result<Option<(String, TokenSource)>, LoadError>,
}

impl Slot {
    fn token(&self) -> Option<&(String, TokenSource)> {
        self.value.as_ref().ok().and_then(Option::as_ref)
    }
}

/// Provider forced by configuration, else by [`FORCE_TOKEN_ENV`].
///
/// Unrecognized environment values are ignored.
pub fn forced_provider(configured: Option<Provider>) -> Option<Provider> {
    configured.or_else(|| {
        env::var(FORCE_TOKEN_ENV)
            .ok()
            .and_then(|v| v.parse::<Provider>().ok())
    })
}

/// Resolve the single active provider and its token.
pub fn resolve(options: &ResolveOptions) -> Result<Resolution, AuthError> {
    let mut slots: Vec<Slot> = Provider::ALL
        .into_iter()
        .map(|provider| Slot {
            provider,
            value: load_slot(provider, options.files.get(provider)),
        })
        .collect();

    // Forcing a provider clears the other tokens; their load errors stay.
    if let Some(forced) = forced_provider(options.force) {
        for slot in slots.iter_mut().filter(|slot| slot.provider != forced) {
            if slot.value.is_ok() {
                slot.value = Ok(None);
            }
        }
    }

    let filled: Vec<Provider> = slots
        .iter()
        .filter(|slot| slot.token().is_some())
        .map(|slot| slot.provider)
        .collect();
    if filled.len() > 1 {
        return Err(AuthError::MultipleTokens(filled));
    }

    if !options.skip {
        if filled.is_empty() && slots.iter().all(|slot| slot.value.is_ok()) {
            return Err(AuthError::MissingToken);
        }
        for provider in [Provider::GitLab, Provider::GitHub, Provider::Gitea] {
            let Some(idx) = slots.iter().position(|slot| slot.provider == provider) else {
                continue;
            };
            if slots[idx].value.is_err() {
                let slot = slots.swap_remove(idx);
                if let Err(source) = slot.value {
                    return Err(AuthError::Load { provider, source });
                }
            }
        }
    }

    let active = slots.into_iter().find_map(|slot| match slot.value {
        Ok(Some((token, source))) => Some(Credentials {
            provider: slot.provider,
            token,
            source,
        }),
        _ => None,
    });
    match active {
        Some(creds) => Ok(Resolution::Active(creds)),
        None if options.skip => Ok(Resolution::Skipped),
        None => Err(AuthError::MissingToken),
    }
}

fn load_slot(provider: Provider, file: &str) -> Result<Option<(String, TokenSource)>, LoadError> {
    let var = provider.env_var();
    if let Ok(token) = env::var(var)
        && !token.is_empty()
    {
        return Ok(Some((token, TokenSource::Env(var))));
    }
    if file.is_empty() {
        return Ok(None);
    }

    let path = expand_home(file)?;
    let token = read_first_line(&path)?;
    Ok(token
        .filter(|t| !t.is_empty())
        .map(|t| (t, TokenSource::File(path))))
}

/// Expand a leading `~` or `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf, LoadError> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(PathBuf::from(path));
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return Err(LoadError::UserHome(path.to_string()));
    }
    let home = dirs::home_dir().ok_or(LoadError::NoHome)?;
    Ok(home.join(rest.trim_start_matches('/')))
}

/// First line of `path`, `None` if the file does not exist.
fn read_first_line(path: &Path) -> Result<Option<String>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).map_err(io_err)?;
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Mask a token for display, keeping the first and last four characters.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    const ALL_VARS: [&str; 4] = ["GITHUB_TOKEN", "GITLAB_TOKEN", "GITEA_TOKEN", FORCE_TOKEN_ENV];

    fn files_in(dir: &Path) -> TokenFiles {
        TokenFiles {
            github: dir.join("github_token").to_string_lossy().into_owned(),
            gitlab: dir.join("gitlab_token").to_string_lossy().into_owned(),
            gitea: dir.join("gitea_token").to_string_lossy().into_owned(),
        }
    }

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let mut all: Vec<(&str, Option<&str>)> = ALL_VARS.iter().map(|v| (*v, None)).collect();
        for (k, v) in vars {
            all.retain(|(name, _)| name != k);
            all.push((*k, Some(*v)));
        }
        temp_env::with_vars(all, f);
    }

    fn options(dir: &Path) -> ResolveOptions {
        ResolveOptions {
            files: files_in(dir),
            ..ResolveOptions::default()
        }
    }

    #[test]
    #[serial]
    fn single_env_token_is_active() {
        let td = tempdir().unwrap();
        with_env(&[("GITLAB_TOKEN", "glpat-123")], || {
            let Resolution::Active(creds) = resolve(&options(td.path())).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.provider, Provider::GitLab);
            assert_eq!(creds.token, "glpat-123");
            assert_eq!(creds.source, TokenSource::Env("GITLAB_TOKEN"));
        });
    }

    #[test]
    #[serial]
    fn token_file_first_line_is_used() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("gitea_token"), "tea-token\r\nsecond line\n").unwrap();
        with_env(&[], || {
            let Resolution::Active(creds) = resolve(&options(td.path())).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.provider, Provider::Gitea);
            assert_eq!(creds.token, "tea-token");
            assert!(matches!(creds.source, TokenSource::File(_)));
        });
    }

    #[test]
    #[serial]
    fn env_wins_over_file() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("github_token"), "from-file").unwrap();
        with_env(&[("GITHUB_TOKEN", "from-env")], || {
            let Resolution::Active(creds) = resolve(&options(td.path())).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.token, "from-env");
        });
    }

    #[test]
    #[serial]
    fn multiple_tokens_name_every_variable() {
        let td = tempdir().unwrap();
        with_env(&[("GITHUB_TOKEN", "a"), ("GITLAB_TOKEN", "b")], || {
            let err = resolve(&options(td.path())).unwrap_err();
            assert_eq!(
                err.to_string(),
                "multiple tokens found, but only one is allowed: GITHUB_TOKEN, GITLAB_TOKEN"
            );
        });
    }

    #[test]
    #[serial]
    fn multiple_tokens_checked_before_skip() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("gitea_token"), "c").unwrap();
        with_env(&[("GITHUB_TOKEN", "a")], || {
            let opts = ResolveOptions {
                skip: true,
                ..options(td.path())
            };
            assert!(matches!(resolve(&opts), Err(AuthError::MultipleTokens(p)) if p == vec![Provider::GitHub, Provider::Gitea]));
        });
    }

    #[test]
    #[serial]
    fn forced_provider_clears_the_others() {
        let td = tempdir().unwrap();
        with_env(
            &[("GITHUB_TOKEN", "a"), ("GITLAB_TOKEN", "b"), (FORCE_TOKEN_ENV, "GitLab")],
            || {
                let Resolution::Active(creds) = resolve(&options(td.path())).unwrap() else {
                    panic!("expected an active provider");
                };
                assert_eq!(creds.provider, Provider::GitLab);
                assert_eq!(creds.token, "b");
            },
        );
    }

    #[test]
    #[serial]
    fn configured_force_beats_environment_force() {
        let td = tempdir().unwrap();
        with_env(
            &[("GITHUB_TOKEN", "a"), ("GITEA_TOKEN", "c"), (FORCE_TOKEN_ENV, "github")],
            || {
                let opts = ResolveOptions {
                    force: Some(Provider::Gitea),
                    ..options(td.path())
                };
                let Resolution::Active(creds) = resolve(&opts).unwrap() else {
                    panic!("expected an active provider");
                };
                assert_eq!(creds.provider, Provider::Gitea);
            },
        );
    }

    #[test]
    #[serial]
    fn unknown_force_value_is_ignored() {
        let td = tempdir().unwrap();
        with_env(&[("GITHUB_TOKEN", "a"), ("GITLAB_TOKEN", "b"), (FORCE_TOKEN_ENV, "bitbucket")], || {
            assert!(matches!(
                resolve(&options(td.path())),
                Err(AuthError::MultipleTokens(_))
            ));
        });
    }

    #[test]
    #[serial]
    fn forced_provider_without_token_is_missing() {
        let td = tempdir().unwrap();
        with_env(&[("GITHUB_TOKEN", "a"), (FORCE_TOKEN_ENV, "gitea")], || {
            assert!(matches!(
                resolve(&options(td.path())),
                Err(AuthError::MissingToken)
            ));
        });
    }

    #[test]
    #[serial]
    fn no_tokens_is_missing_token() {
        let td = tempdir().unwrap();
        with_env(&[], || {
            let err = resolve(&options(td.path())).unwrap_err();
            assert!(matches!(err, AuthError::MissingToken));
            assert_eq!(err.to_string(), "missing GITHUB_TOKEN, GITLAB_TOKEN and GITEA_TOKEN");
        });
    }

    #[test]
    #[serial]
    fn skip_short_circuits_without_secret() {
        let td = tempdir().unwrap();
        with_env(&[], || {
            let opts = ResolveOptions {
                skip: true,
                ..options(td.path())
            };
            assert_eq!(resolve(&opts).unwrap(), Resolution::Skipped);
        });
    }

    #[test]
    #[serial]
    fn skip_keeps_the_single_token() {
        let td = tempdir().unwrap();
        with_env(&[("GITLAB_TOKEN", "glpat")], || {
            let opts = ResolveOptions {
                skip: true,
                ..options(td.path())
            };
            let Resolution::Active(creds) = resolve(&opts).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.provider, Provider::GitLab);
            assert_eq!(creds.token, "glpat");
        });
    }

    #[test]
    #[serial]
    fn skip_ignores_load_errors() {
        let td = tempdir().unwrap();
        fs::create_dir(td.path().join("gitlab_token")).unwrap();
        with_env(&[("GITEA_TOKEN", "c")], || {
            let opts = ResolveOptions {
                skip: true,
                ..options(td.path())
            };
            let Resolution::Active(creds) = resolve(&opts).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.provider, Provider::Gitea);
        });
    }

    #[test]
    #[serial]
    fn forced_provider_keeps_other_load_errors() {
        let td = tempdir().unwrap();
        fs::create_dir(td.path().join("gitlab_token")).unwrap();
        with_env(&[(FORCE_TOKEN_ENV, "github")], || {
            let err = resolve(&options(td.path())).unwrap_err();
            assert!(matches!(err, AuthError::Load { provider: Provider::GitLab, .. }), "{err}");
        });
    }

    #[test]
    #[serial]
    fn empty_token_file_counts_as_empty() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("github_token"), "").unwrap();
        with_env(&[("GITEA_TOKEN", "c")], || {
            let Resolution::Active(creds) = resolve(&options(td.path())).unwrap() else {
                panic!("expected an active provider");
            };
            assert_eq!(creds.provider, Provider::Gitea);
        });
    }

    #[test]
    #[serial]
    fn user_home_expansion_names_the_provider() {
        let td = tempdir().unwrap();
        with_env(&[], || {
            let opts = ResolveOptions {
                files: TokenFiles {
                    gitlab: "~someone/token".to_string(),
                    ..files_in(td.path())
                },
                ..ResolveOptions::default()
            };
            let err = resolve(&opts).unwrap_err();
            assert!(matches!(err, AuthError::Load { provider: Provider::GitLab, .. }));
            assert_eq!(
                err.to_string(),
                "failed to load gitlab token: cannot expand user-specific home dir: ~someone/token"
            );
        });
    }

    #[test]
    #[serial]
    fn unreadable_token_file_is_a_load_error() {
        let td = tempdir().unwrap();
        // a directory cannot be read as a token file
        fs::create_dir(td.path().join("github_token")).unwrap();
        with_env(&[], || {
            let err = resolve(&options(td.path())).unwrap_err();
            assert!(matches!(err, AuthError::Load { provider: Provider::GitHub, .. }), "{err}");
        });
    }

    #[test]
    fn expand_home_forms() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home("~").unwrap(), home);
        assert_eq!(expand_home("~/x/y").unwrap(), home.join("x/y"));
        assert_eq!(expand_home("/abs/path").unwrap(), PathBuf::from("/abs/path"));
        assert!(matches!(expand_home("~bob"), Err(LoadError::UserHome(_))));
    }

    #[test]
    fn provider_names() {
        assert_eq!("GitHub".parse::<Provider>().unwrap(), Provider::GitHub);
        assert_eq!(Provider::Gitea.env_var(), "GITEA_TOKEN");
        assert_eq!(
            Provider::GitLab.default_token_file(),
            "~/.config/herald/gitlab_token"
        );
        assert!("svn".parse::<Provider>().is_err());
    }

    #[test]
    fn mask_token_hides_the_middle() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("abcdefgh"), "********");
        assert_eq!(mask_token("ghp_abcdefghijkl"), "ghp_****ijkl");
    }

    #[test]
    fn credentials_debug_is_masked() {
        let creds = Credentials {
            provider: Provider::GitHub,
            token: "ghp_supersecretvalue".to_string(),
            source: TokenSource::Env("GITHUB_TOKEN"),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("supersecret"));
    }
}
