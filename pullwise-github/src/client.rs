//! GitHub client implementing the pipeline's version control provider

use async_trait::async_trait;
use octocrab::Octocrab;
use pullwise_core::providers::{Checkout, VersionControl};
use pullwise_core::Secrets;
use reqwest::header::ACCEPT;
use tracing::{debug, info, warn};

use crate::clone::shallow_clone;
use crate::error::is_auth_failure;
use crate::{Error, Result};

/// Media type that makes GitHub return a unified diff
pub const DIFF_MEDIA_TYPE: &str = "application/vnd.github.v3.diff";

/// Hosts the GitHub token may be sent to
const TOKEN_HOSTS: &[&str] = &["github.com", "api.github.com"];

/// Whether `url` is an https URL on a GitHub host
pub fn is_github_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            parsed.scheme() == "https"
                && parsed
                    .host_str()
                    .is_some_and(|host| TOKEN_HOSTS.contains(&host))
        }
        Err(_) => false,
    }
}

/// GitHub API client for clones, diffs and PR comments
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
    http: reqwest::Client,
    token: Option<String>,
}

impl GitHubClient {
    /// Create a client; without a token only public repositories work
    /// and comments cannot be posted
    pub fn new(token: Option<String>) -> Result<Self> {
        let mut builder = Octocrab::builder();
        if let Some(token) = &token {
            builder = builder.personal_token(token.clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create GitHub client: {}", e)))?;

        let http = reqwest::Client::builder()
            .user_agent("pullwise")
            .build()?;

        info!(authenticated = token.is_some(), "Created GitHub client");
        Ok(Self {
            client,
            http,
            token,
        })
    }

    /// Create a client with the token from (in priority order):
    /// 1. GITHUB_TOKEN environment variable
    /// 2. ~/.config/pullwise/secrets.toml
    pub fn from_secrets(secrets: &Secrets) -> Result<Self> {
        let token = secrets.github_token();
        if token.is_none() {
            warn!(
                "GitHub token not found. Set GITHUB_TOKEN environment variable \
                 or add token to ~/.config/pullwise/secrets.toml"
            );
        }
        Self::new(token)
    }

    /// Get the underlying octocrab client
    pub fn client(&self) -> &Octocrab {
        &self.client
    }

    /// Clone `branch` of `url` into a fresh temporary directory
    pub async fn clone_branch(&self, url: &str, branch: &str) -> Result<Checkout> {
        let dir = tempfile::Builder::new().prefix("pullwise-").tempdir()?;
        shallow_clone(url, branch, dir.path()).await?;
        debug!(url, branch, path = %dir.path().display(), "Cloned pull request branch");
        Ok(Checkout::temporary(dir))
    }

    /// Download the unified diff at `url`
    ///
    /// The token is only attached for GitHub hosts; other hosts are fetched
    /// anonymously.
    pub async fn fetch_diff(&self, url: &str) -> Result<String> {
        let mut request = self.http.get(url).header(ACCEPT, DIFF_MEDIA_TYPE);
        match &self.token {
            Some(token) if is_github_url(url) => request = request.bearer_auth(token),
            Some(_) => debug!(url, "Not sending GitHub token to non-GitHub host"),
            None => {}
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if is_auth_failure(status.as_u16(), &message) {
                return Err(Error::Auth(format!(
                    "Diff download from {} was rejected with status {}",
                    url, status
                )));
            }
            return Err(Error::Other(format!(
                "Diff download from {} failed with status {}",
                url, status
            )));
        }
        Ok(response.text().await?)
    }

    /// Post a comment on pull request `number`
    pub async fn comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        if self.token.is_none() {
            return Err(Error::Auth("Posting comments requires a GitHub token".to_string()));
        }

        self.client
            .issues(owner, repo)
            .create_comment(number, body)
            .await?;

        info!(owner, repo, number, "Posted pull request comment");
        Ok(())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VersionControl for GitHubClient {
    async fn clone_repo(&self, url: &str, branch: &str) -> pullwise_core::Result<Checkout> {
        Ok(self.clone_branch(url, branch).await?)
    }

    async fn download_diff(&self, url: &str) -> pullwise_core::Result<String> {
        Ok(self.fetch_diff(url).await?)
    }

    async fn post_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> pullwise_core::Result<()> {
        Ok(self.comment(owner, repo, number, body).await?)
    }
}

/// Parse a GitHub URL into owner and repo
///
/// Supports formats:
/// - owner/repo
/// - https://github.com/owner/repo(.git)
/// - git@github.com:owner/repo.git
pub fn parse_github_url(url: &str) -> Result<(String, String)> {
    if !url.contains(':') && !url.contains('/') {
        return Err(Error::Parse(format!(
            "Invalid repository format: {}. Expected owner/repo",
            url
        )));
    }

    if !url.contains("://") && !url.contains('@') {
        return match url.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] => Ok((owner.to_string(), repo.trim_end_matches(".git").to_string())),
            _ => Err(Error::Parse(format!(
                "Invalid repository format: {}. Expected owner/repo",
                url
            ))),
        };
    }

    if url.starts_with("https://") || url.starts_with("http://") {
        let parsed = url::Url::parse(url).map_err(|e| Error::Parse(e.to_string()))?;
        let path = parsed.path().trim_start_matches('/').trim_end_matches(".git");
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() >= 2 {
            return Ok((parts[0].to_string(), parts[1].to_string()));
        }
        return Err(Error::Parse(format!("Invalid GitHub URL path: {}", path)));
    }

    if let Some(rest) = url.strip_prefix("git@") {
        if let Some((_, path)) = rest.split_once(':') {
            let parts: Vec<&str> = path.trim_end_matches(".git").split('/').collect();
            if parts.len() >= 2 {
                return Ok((parts[0].to_string(), parts[1].to_string()));
            }
        }
        return Err(Error::Parse(format!("Invalid SSH URL: {}", url)));
    }

    Err(Error::Parse(format!("Unrecognized URL format: {}", url)))
}
