use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::context::PrMetadata;
use crate::publish::CommentPublisher;

const USER_AGENT: &str = concat!("diffcritic/", env!("CARGO_PKG_VERSION"));

/// GitHub REST client for one pull request: fetches its metadata and diff,
/// posts line comments against the head commit, and falls back to issue
/// comments for anything that has no diff anchor.
pub struct GithubPublisher {
    client: Client,
    token: String,
    repo: String,
    pr_number: u64,
    base_url: String,
    commit_id: Option<String>,
}

#[derive(Deserialize)]
struct PullResponse {
    title: Option<String>,
    body: Option<String>,
    head: GitRef,
    base: GitRef,
}

#[derive(Deserialize)]
struct GitRef {
    sha: String,
    #[serde(rename = "ref")]
    branch: Option<String>,
}

#[derive(Serialize)]
struct ReviewCommentRequest<'a> {
    body: &'a str,
    commit_id: &'a str,
    path: &'a str,
    position: usize,
}

#[derive(Serialize)]
struct IssueCommentRequest<'a> {
    body: &'a str,
}

impl GithubPublisher {
    pub fn new(token: String, repo: &str, pr_number: u64) -> Result<Self> {
        if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            bail!("repository must be given as owner/name, got {repo:?}");
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            token,
            repo: repo.to_string(),
            pr_number,
            base_url: "https://api.github.com".to_string(),
            commit_id: None,
        })
    }

    /// Positional comments must name the commit they anchor to; callers set
    /// the head SHA here after fetching PR details.
    pub fn with_commit_id(mut self, commit_id: Option<String>) -> Self {
        self.commit_id = commit_id;
        self
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    pub async fn fetch_pr_details(&self) -> Result<PrMetadata> {
        let url = format!(
            "{}/repos/{}/pulls/{}",
            self.base_url, self.repo, self.pr_number
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("failed to reach the GitHub API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "could not fetch PR #{} of {}: {status}: {body}",
                self.pr_number,
                self.repo
            );
        }

        let pull: PullResponse = response
            .json()
            .await
            .context("unexpected pull request payload")?;

        Ok(PrMetadata {
            title: pull.title.unwrap_or_default(),
            description: pull.body.unwrap_or_default(),
            branch: pull.head.branch,
            head_sha: Some(pull.head.sha),
            base_sha: Some(pull.base.sha),
        })
    }

    pub async fn fetch_diff(&self) -> Result<String> {
        let url = format!(
            "{}/repos/{}/pulls/{}",
            self.base_url, self.repo, self.pr_number
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .header("Accept", "application/vnd.github.v3.diff")
            .send()
            .await
            .context("failed to reach the GitHub API")?;

        if !response.status().is_success() {
            let status = response.status();
            bail!(
                "could not fetch the diff of PR #{} of {}: {status}",
                self.pr_number,
                self.repo
            );
        }

        let diff = response.text().await.context("undecodable diff body")?;
        debug!("fetched {} bytes of diff", diff.len());
        Ok(diff)
    }

    async fn post_json<T: Serialize>(&self, url: String, payload: &T) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, url)
            .header("Accept", "application/vnd.github+json")
            .json(payload)
            .send()
            .await
            .context("failed to reach the GitHub API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub rejected the comment: {status}: {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl CommentPublisher for GithubPublisher {
    async fn post_comment(&self, path: &str, position: Option<usize>, body: &str) -> Result<()> {
        match position {
            Some(position) => {
                let commit_id = self
                    .commit_id
                    .as_deref()
                    .context("no head commit known; cannot anchor a line comment")?;
                let url = format!(
                    "{}/repos/{}/pulls/{}/comments",
                    self.base_url, self.repo, self.pr_number
                );
                self.post_json(
                    url,
                    &ReviewCommentRequest {
                        body,
                        commit_id,
                        path,
                        position,
                    },
                )
                .await
            }
            None => {
                let url = format!(
                    "{}/repos/{}/issues/{}/comments",
                    self.base_url, self.repo, self.pr_number
                );
                let body = format!("**{path}**: {body}");
                self.post_json(url, &IssueCommentRequest { body: &body }).await
            }
        }
    }

    async fn post_summary(&self, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_url, self.repo, self.pr_number
        );
        self.post_json(url, &IssueCommentRequest { body }).await
    }
}
