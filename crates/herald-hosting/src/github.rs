use anyhow::{Context, Result};
use herald_auth::Provider;
use herald_config::ProviderUrls;
use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    HostingClient, ReleaseId, ReleaseRequest, UploadError, UploadFile, check_upload, endpoint,
    expect_success, http_client, open_asset,
};

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    id: u64,
    #[serde(default)]
    html_url: Option<String>,
}

/// GitHub REST v3 release client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api: String,
    upload: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(urls: &ProviderUrls, token: &str, owner: &str, repo: &str) -> Result<Self> {
        let upload = if urls.upload.is_empty() {
            urls.api.clone()
        } else {
            urls.upload.clone()
        };
        Ok(Self {
            http: http_client(urls.skip_tls_verify)?,
            api: urls.api.clone(),
            upload,
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
    }

    fn releases(&self, base: &str, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", self.owner.as_str(), self.repo.as_str(), "releases"];
        segments.extend_from_slice(rest);
        endpoint(base, &segments)
    }
}

impl HostingClient for GitHubClient {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn create_release(&self, request: &ReleaseRequest) -> Result<ReleaseId> {
        let lookup = self.releases(&self.api, &["tags", request.tag.as_str()])?;
        let response = self
            .authorize(self.http.get(lookup))
            .send()
            .context("failed to look up GitHub release")?;

        let release: GitHubRelease = if response.status() == StatusCode::NOT_FOUND {
            let body = json!({
                "tag_name": request.tag,
                "name": request.title,
                "body": request.body,
                "draft": true,
                "prerelease": request.prerelease,
            });
            let response = self
                .authorize(self.http.post(self.releases(&self.api, &[])?))
                .json(&body)
                .send()
                .context("failed to create GitHub release")?;
            expect_success(response, "create GitHub release")?
                .json()
                .context("failed to parse GitHub release")?
        } else {
            expect_success(response, "look up GitHub release")?
                .json()
                .context("failed to parse GitHub release")?
        };

        Ok(ReleaseId {
            id: release.id.to_string(),
            tag: request.tag.clone(),
            url: release.html_url,
        })
    }

    fn upload(&self, release: &ReleaseId, file: &UploadFile) -> Result<(), UploadError> {
        let mut url = self
            .releases(&self.upload, &[release.id.as_str(), "assets"])
            .map_err(|e| UploadError::permanent(e.to_string()))?;
        url.query_pairs_mut().append_pair("name", &file.name);
        let (asset, len) = open_asset(file)?;
        check_upload(
            self.authorize(self.http.post(url))
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(Body::sized(asset, len))
                .send(),
        )
        .map(drop)
    }

    fn publish(&self, release: &ReleaseId) -> Result<()> {
        let response = self
            .authorize(self.http.patch(self.releases(&self.api, &[release.id.as_str()])?))
            .json(&json!({ "draft": false }))
            .send()
            .context("failed to publish GitHub release")?;
        expect_success(response, "publish GitHub release").map(drop)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_server::{spawn, urls};

    fn release() -> ReleaseId {
        ReleaseId {
            id: "7".to_string(),
            tag: "v1.0.0".to_string(),
            url: None,
        }
    }

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            tag: "v1.0.0".to_string(),
            title: "v1.0.0".to_string(),
            body: String::new(),
            prerelease: true,
        }
    }

    #[test]
    fn creates_draft_when_tag_has_no_release() {
        let server = spawn(&[
            ("GET /repos/acme/app/releases/tags/v1.0.0", 404, "{}"),
            (
                "POST /repos/acme/app/releases",
                201,
                r#"{"id":7,"html_url":"https://github.com/acme/app/releases/tag/v1.0.0"}"#,
            ),
        ]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "secret", "acme", "app").unwrap();

        let id = client.create_release(&request()).unwrap();
        assert_eq!(id.id, "7");
        assert_eq!(
            id.url.as_deref(),
            Some("https://github.com/acme/app/releases/tag/v1.0.0")
        );

        let seen = server.finish();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer secret"));
        let created: serde_json::Value = serde_json::from_str(&seen[1].body).unwrap();
        assert_eq!(created["draft"], true);
        assert_eq!(created["prerelease"], true);
        assert_eq!(created["tag_name"], "v1.0.0");
    }

    #[test]
    fn reuses_existing_release() {
        let server = spawn(&[("GET /repos/acme/app/releases/tags/v1.0.0", 200, r#"{"id":42}"#)]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "t", "acme", "app").unwrap();
        assert_eq!(client.create_release(&request()).unwrap().id, "42");
        assert_eq!(server.finish().len(), 1);
    }

    #[test]
    fn lookup_failure_is_reported() {
        let server = spawn(&[("GET /repos/acme/app/releases/tags/v1.0.0", 401, "bad credentials")]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "t", "acme", "app").unwrap();
        let err = client.create_release(&request()).unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
        server.finish();
    }

    #[test]
    fn uploads_raw_bytes_with_name_query() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("app.tar.gz");
        fs::write(&path, "payload").unwrap();

        let server = spawn(&[(
            "POST /repos/acme/app/releases/7/assets?name=app+1.tar.gz",
            201,
            "{}",
        )]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "t", "acme", "app").unwrap();
        client
            .upload(
                &release(),
                &UploadFile {
                    name: "app 1.tar.gz".to_string(),
                    path,
                },
            )
            .unwrap();

        let seen = server.finish();
        assert_eq!(seen[0].body, "payload");
    }

    #[test]
    fn upload_status_is_classified() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("a");
        fs::write(&path, "a").unwrap();
        let file = UploadFile {
            name: "a".to_string(),
            path,
        };

        let server = spawn(&[
            ("POST /repos/acme/app/releases/7/assets?name=a", 502, "bad gateway"),
            ("POST /repos/acme/app/releases/7/assets?name=a", 422, "already_exists"),
        ]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "t", "acme", "app").unwrap();

        let first = client.upload(&release(), &file).unwrap_err();
        assert!(first.is_retryable());
        assert!(first.message.contains("bad gateway"));

        let second = client.upload(&release(), &file).unwrap_err();
        assert!(!second.is_retryable());
        server.finish();
    }

    #[test]
    fn publish_clears_draft_flag() {
        let server = spawn(&[("PATCH /repos/acme/app/releases/7", 200, "{}")]);
        let client = GitHubClient::new(&urls(&server.base_url, ""), "t", "acme", "app").unwrap();
        client.publish(&release()).unwrap();
        let seen = server.finish();
        assert_eq!(seen[0].body, r#"{"draft":false}"#);
    }
}
