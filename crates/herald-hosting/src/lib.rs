//! Release hosting clients for herald.
//!
//! A [`HostingClient`] is bound to one repository on one provider. The
//! publish pipeline only talks to this trait; the REST clients for GitHub,
//! GitLab and Gitea live in their own modules and are built with
//! [`client_for`].
//!
//! Upload failures carry an [`ErrorClass`] so the caller can decide whether
//! to retry: server errors, rate limiting and transport failures are
//! retryable, every other non-success status is permanent.

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use herald_auth::Provider;
use herald_config::ProviderUrls;
use herald_retry::ErrorClass;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

mod gitea;
mod github;
mod gitlab;

pub use gitea::GiteaClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;

/// Default timeout for API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default user agent for API requests
pub const USER_AGENT: &str = concat!("herald/", env!("CARGO_PKG_VERSION"));

/// What to create on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub tag: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub prerelease: bool,
}

/// Handle to a created (or reused) release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseId {
    /// Provider-side identifier. GitLab releases are addressed by tag.
    pub id: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Asset name shown on the release page.
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UploadError {
    pub class: ErrorClass,
    pub message: String,
}

impl UploadError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Retryable,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let message = match body.trim() {
            "" => format!("unexpected status code: {status}"),
            body => format!("unexpected status code: {status}: {body}"),
        };
        Self {
            class: classify_status(status),
            message,
        }
    }

    fn transport(err: reqwest::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Server errors and rate limiting are worth another attempt.
pub fn classify_status(status: StatusCode) -> ErrorClass {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::Retryable
    } else {
        ErrorClass::Permanent
    }
}

/// A release endpoint bound to one repository.
pub trait HostingClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Creates the release for `request.tag` as a draft, or returns the
    /// existing one.
    fn create_release(&self, request: &ReleaseRequest) -> Result<ReleaseId>;

    fn upload(&self, release: &ReleaseId, file: &UploadFile) -> Result<(), UploadError>;

    /// Flips a draft release to published.
    fn publish(&self, release: &ReleaseId) -> Result<()>;
}

/// Builds the REST client for `provider` against `owner/repo`.
pub fn client_for(
    provider: Provider,
    urls: &ProviderUrls,
    token: &str,
    owner: &str,
    repo: &str,
) -> Result<Box<dyn HostingClient>> {
    if urls.api.trim().is_empty() {
        bail!("urls.{provider}.api must be set to publish to {provider}");
    }
    Ok(match provider {
        Provider::GitHub => Box::new(GitHubClient::new(urls, token, owner, repo)?),
        Provider::GitLab => Box::new(GitLabClient::new(urls, token, owner, repo)?),
        Provider::Gitea => Box::new(GiteaClient::new(urls, token, owner, repo)?),
    })
}

pub(crate) fn http_client(skip_tls_verify: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(skip_tls_verify)
        .build()
        .context("failed to build HTTP client")
}

/// Appends percent-encoded `segments` to `base`.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid API URL: {base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow!("invalid API URL: {base}"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Opens an asset for streaming along with its length.
pub(crate) fn open_asset(file: &UploadFile) -> Result<(File, u64), UploadError> {
    let failed =
        |e: std::io::Error| UploadError::permanent(format!("failed to read {}: {e}", file.path.display()));
    let handle = File::open(&file.path).map_err(failed)?;
    let len = handle.metadata().map_err(failed)?.len();
    Ok((handle, len))
}

pub(crate) fn check_upload(response: Result<Response, reqwest::Error>) -> Result<Response, UploadError> {
    let response = response.map_err(UploadError::transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(UploadError::from_status(status, &body))
}

pub(crate) fn expect_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(anyhow!("failed to {action}: unexpected status code: {status}: {}", body.trim()))
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use tiny_http::{Header, Response, Server, StatusCode};

    #[derive(Debug, Clone)]
    pub struct Seen {
        pub method: String,
        pub url: String,
        pub authorization: Option<String>,
        pub private_token: Option<String>,
        pub body: String,
    }

    pub struct TestServer {
        pub base_url: String,
        seen: Arc<Mutex<Vec<Seen>>>,
        handle: thread::JoinHandle<()>,
    }

    impl TestServer {
        /// Waits for the server to drain its routes and returns every
        /// request it saw.
        pub fn finish(self) -> Vec<Seen> {
            self.handle.join().expect("server thread");
            self.seen.lock().expect("lock").clone()
        }
    }

    fn header(req: &tiny_http::Request, name: &'static str) -> Option<String> {
        req.headers()
            .iter()
            .find(|h| h.field.equiv(name))
            .map(|h| h.value.as_str().to_string())
    }

    /// Serves `routes` (`"METHOD /path"`, status, body) in order per key.
    /// Unknown requests get a 404.
    pub fn spawn(routes: &[(&str, u16, &str)]) -> TestServer {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}/", server.server_addr());
        let expected = routes.len();
        let mut table: BTreeMap<String, VecDeque<(u16, String)>> = BTreeMap::new();
        for (key, status, body) in routes {
            table
                .entry((*key).to_string())
                .or_default()
                .push_back((*status, (*body).to_string()));
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_thread = Arc::clone(&seen);

        let handle = thread::spawn(move || {
            for _ in 0..expected {
                let Ok(Some(mut req)) = server.recv_timeout(Duration::from_secs(5)) else {
                    return;
                };
                let mut raw = Vec::new();
                req.as_reader().read_to_end(&mut raw).expect("body");
                let key = format!("{} {}", req.method(), req.url());
                seen_thread.lock().expect("lock").push(Seen {
                    method: req.method().to_string(),
                    url: req.url().to_string(),
                    authorization: header(&req, "Authorization"),
                    private_token: header(&req, "PRIVATE-TOKEN"),
                    body: String::from_utf8_lossy(&raw).into_owned(),
                });

                let (status, body) = table
                    .get_mut(&key)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or((404, "{}".to_string()));
                let resp = Response::from_string(body)
                    .with_status_code(StatusCode(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
        });

        TestServer {
            base_url,
            seen,
            handle,
        }
    }

    pub fn urls(base_url: &str, api_path: &str) -> herald_config::ProviderUrls {
        herald_config::ProviderUrls {
            api: format!("{base_url}{api_path}"),
            upload: base_url.to_string(),
            download: base_url.trim_end_matches('/').to_string(),
            skip_tls_verify: false,
        }
    }
}
