use anyhow::{Context, Result};
use herald_auth::Provider;
use herald_config::ProviderUrls;
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{
    HostingClient, ReleaseId, ReleaseRequest, UploadError, UploadFile, check_upload, endpoint,
    expect_success, http_client, open_asset,
};

#[derive(Debug, Default, Deserialize)]
struct GitLabLinks {
    #[serde(rename = "self", default)]
    self_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabRelease {
    #[serde(default, rename = "_links")]
    links: GitLabLinks,
}

#[derive(Debug, Deserialize)]
struct GitLabUpload {
    /// Project-relative, e.g. `/uploads/<hash>/<name>`.
    url: String,
}

/// GitLab release client.
///
/// GitLab has no draft releases, so [`HostingClient::publish`] does nothing.
/// Assets are uploaded to the project and then linked from the release.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    api: String,
    download: String,
    token: String,
    project: String,
}

impl GitLabClient {
    pub fn new(urls: &ProviderUrls, token: &str, owner: &str, repo: &str) -> Result<Self> {
        Ok(Self {
            http: http_client(urls.skip_tls_verify)?,
            api: urls.api.clone(),
            download: urls.download.trim_end_matches('/').to_string(),
            token: token.to_string(),
            project: format!("{owner}/{repo}"),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    fn project_url(&self, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["projects", self.project.as_str()];
        segments.extend_from_slice(rest);
        endpoint(&self.api, &segments)
    }
}

impl HostingClient for GitLabClient {
    fn provider(&self) -> Provider {
        Provider::GitLab
    }

    fn create_release(&self, request: &ReleaseRequest) -> Result<ReleaseId> {
        let response = self
            .authorize(self.http.get(self.project_url(&["releases", request.tag.as_str()])?))
            .send()
            .context("failed to look up GitLab release")?;

        let release: GitLabRelease = if response.status() == StatusCode::NOT_FOUND {
            let response = self
                .authorize(self.http.post(self.project_url(&["releases"])?))
                .json(&json!({
                    "tag_name": request.tag,
                    "name": request.title,
                    "description": request.body,
                }))
                .send()
                .context("failed to create GitLab release")?;
            expect_success(response, "create GitLab release")?
                .json()
                .context("failed to parse GitLab release")?
        } else {
            expect_success(response, "look up GitLab release")?
                .json()
                .context("failed to parse GitLab release")?
        };

        Ok(ReleaseId {
            id: request.tag.clone(),
            tag: request.tag.clone(),
            url: release.links.self_url,
        })
    }

    fn upload(&self, release: &ReleaseId, file: &UploadFile) -> Result<(), UploadError> {
        let url = self
            .project_url(&["uploads"])
            .map_err(|e| UploadError::permanent(e.to_string()))?;
        let (asset, len) = open_asset(file)?;
        let part = Part::reader_with_length(asset, len).file_name(file.name.clone());
        let uploaded: GitLabUpload = check_upload(
            self.authorize(self.http.post(url))
                .multipart(Form::new().part("file", part))
                .send(),
        )?
        .json()
        .map_err(|e| UploadError::permanent(format!("failed to parse GitLab upload: {e}")))?;

        let link = self
            .project_url(&["releases", release.tag.as_str(), "assets", "links"])
            .map_err(|e| UploadError::permanent(e.to_string()))?;
        let asset_url = format!("{}/{}{}", self.download, self.project, uploaded.url);
        check_upload(
            self.authorize(self.http.post(link))
                .json(&json!({ "name": file.name, "url": asset_url }))
                .send(),
        )
        .map(drop)
    }

    fn publish(&self, _release: &ReleaseId) -> Result<()> {
        Ok(())
    }
}
