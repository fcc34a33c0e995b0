use anyhow::{Context, Result};
use herald_auth::Provider;
use herald_config::ProviderUrls;
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    HostingClient, ReleaseId, ReleaseRequest, UploadError, UploadFile, check_upload, endpoint,
    expect_success, http_client, open_asset,
};

#[derive(Debug, Deserialize)]
struct GiteaRelease {
    id: u64,
    #[serde(default)]
    html_url: Option<String>,
}

/// Gitea release client. `urls.api` must point at the `/api/v1` root.
#[derive(Debug, Clone)]
pub struct GiteaClient {
    http: Client,
    api: String,
    token: String,
    owner: String,
    repo: String,
}

impl GiteaClient {
    pub fn new(urls: &ProviderUrls, token: &str, owner: &str, repo: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(urls.skip_tls_verify)?,
            api: urls.api.clone(),
            token: token.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("token {}", self.token))
    }

    fn releases(&self, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", self.owner.as_str(), self.repo.as_str(), "releases"];
        segments.extend_from_slice(rest);
        endpoint(&self.api, &segments)
    }
}

impl HostingClient for GiteaClient {
    fn provider(&self) -> Provider {
        Provider::Gitea
    }

    fn create_release(&self, request: &ReleaseRequest) -> Result<ReleaseId> {
        let response = self
            .authorize(self.http.get(self.releases(&["tags", request.tag.as_str()])?))
            .send()
            .context("failed to look up Gitea release")?;

        let release: GiteaRelease = if response.status() == StatusCode::NOT_FOUND {
            let response = self
                .authorize(self.http.post(self.releases(&[])?))
                .json(&json!({
                    "tag_name": request.tag,
                    "name": request.title,
                    "body": request.body,
                    "draft": true,
                    "prerelease": request.prerelease,
                }))
                .send()
                .context("failed to create Gitea release")?;
            expect_success(response, "create Gitea release")?
                .json()
                .context("failed to parse Gitea release")?
        } else {
            expect_success(response, "look up Gitea release")?
                .json()
                .context("failed to parse Gitea release")?
        };

        Ok(ReleaseId {
            id: release.id.to_string(),
            tag: request.tag.clone(),
            url: release.html_url,
        })
    }

    fn upload(&self, release: &ReleaseId, file: &UploadFile) -> Result<(), UploadError> {
        let mut url = self
            .releases(&[release.id.as_str(), "assets"])
            .map_err(|e| UploadError::permanent(e.to_string()))?;
        url.query_pairs_mut().append_pair("name", &file.name);
        let (asset, len) = open_asset(file)?;
        let part = Part::reader_with_length(asset, len).file_name(file.name.clone());
        check_upload(
            self.authorize(self.http.post(url))
                .multipart(Form::new().part("attachment", part))
                .send(),
        )
        .map(drop)
    }

    fn publish(&self, release: &ReleaseId) -> Result<()> {
        let response = self
            .authorize(self.http.patch(self.releases(&[release.id.as_str()])?))
            .json(&json!({ "draft": false }))
            .send()
            .context("failed to publish Gitea release")?;
        expect_success(response, "publish Gitea release").map(drop)
    }
}
