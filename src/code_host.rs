//! GitHub-backed [`CodeHostProvider`].
//!
//! Uses the REST v3 API:
//! - `GET /repos/{owner}/{repo}/commits/{sha}/pulls` to find the pull request
//!   that introduced a commit
//! - `GET /repos/{owner}/{repo}/issues/{n}` (+ `/comments`) for issues
//! - `GET /repos/{owner}/{repo}/pulls/{n}/reviews` for review verdicts
//!
//! A token is read from the environment variable named in
//! `[code_host].token_env`; anonymous access works for public repositories
//! at a much lower rate limit.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CodeHostConfig;
use crate::models::{Comment, IssueInfo, PullRequestInfo, RepoSlug, Review};
use crate::traits::CodeHostProvider;

pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    comments_per_thread: usize,
}

impl GitHubClient {
    /// `comments_per_thread` is the page size for comment and review
    /// lookups, bounded to what the API accepts.
    pub fn new(config: &CodeHostConfig, comments_per_thread: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("code-sleuth/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: std::env::var(&config.token_env).ok().filter(|t| !t.is_empty()),
            comments_per_thread: comments_per_thread.clamp(1, 100),
        })
    }

    /// GET a JSON resource. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.api_base, path);
        let mut req = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, path, body_text);
        }

        Ok(Some(response.json::<T>().await?))
    }

    async fn comments(&self, repo: &RepoSlug, number: u64) -> Result<Vec<Comment>> {
        let path = format!(
            "/repos/{}/{}/issues/{}/comments?per_page={}",
            repo.owner, repo.repo, number, self.comments_per_thread
        );
        let raw: Vec<ApiComment> = self.get_json(&path).await?.unwrap_or_default();
        Ok(raw.into_iter().map(Comment::from).collect())
    }

    async fn reviews(&self, repo: &RepoSlug, number: u64) -> Result<Vec<Review>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews?per_page={}",
            repo.owner, repo.repo, number, self.comments_per_thread
        );
        let raw: Vec<ApiReview> = self.get_json(&path).await?.unwrap_or_default();
        Ok(raw.into_iter().map(Review::from).collect())
    }
}

#[async_trait]
impl CodeHostProvider for GitHubClient {
    async fn find_pr_by_commit(
        &self,
        repo: &RepoSlug,
        hash: &str,
    ) -> Result<Option<PullRequestInfo>> {
        let path = format!("/repos/{}/{}/commits/{}/pulls", repo.owner, repo.repo, hash);
        let pulls: Vec<ApiPullRequest> = self.get_json(&path).await?.unwrap_or_default();

        // Prefer the merged PR when a commit appears in several.
        let Some(pr) = pick_pull_request(pulls) else {
            return Ok(None);
        };

        let comments = self.comments(repo, pr.number).await?;
        let reviews = self.reviews(repo, pr.number).await?;
        Ok(Some(pr.into_info(comments, reviews)))
    }

    async fn get_issue(&self, repo: &RepoSlug, number: u64) -> Result<Option<IssueInfo>> {
        let path = format!("/repos/{}/{}/issues/{}", repo.owner, repo.repo, number);
        let Some(issue) = self.get_json::<ApiIssue>(&path).await? else {
            return Ok(None);
        };
        if issue.pull_request.is_some() {
            return Ok(None);
        }

        let comments = self.comments(repo, number).await?;
        Ok(Some(issue.into_info(comments)))
    }
}

fn pick_pull_request(mut pulls: Vec<ApiPullRequest>) -> Option<ApiPullRequest> {
    let merged = pulls.iter().position(|p| p.merged_at.is_some());
    match merged {
        Some(idx) => Some(pulls.swap_remove(idx)),
        None => pulls.into_iter().next(),
    }
}

// ============ Wire types ============

#[derive(Debug, Deserialize, Default)]
struct ApiUser {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    html_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
}

impl ApiPullRequest {
    fn into_info(self, comments: Vec<Comment>, reviews: Vec<Review>) -> PullRequestInfo {
        let state = if self.merged_at.is_some() {
            "merged".to_string()
        } else {
            self.state
        };
        PullRequestInfo {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.unwrap_or_default().login,
            state,
            url: self.html_url,
            created_at: self.created_at,
            merged_at: self.merged_at,
            comments,
            reviews,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    html_url: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl ApiIssue {
    fn into_info(self, comments: Vec<Comment>) -> IssueInfo {
        IssueInfo {
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.unwrap_or_default().login,
            state: self.state,
            url: self.html_url,
            created_at: self.created_at,
            closed_at: self.closed_at,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            comments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ApiComment> for Comment {
    fn from(c: ApiComment) -> Self {
        Comment {
            author: c.user.unwrap_or_default().login,
            body: c.body.unwrap_or_default(),
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiReview {
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl From<ApiReview> for Review {
    fn from(r: ApiReview) -> Self {
        Review {
            author: r.user.unwrap_or_default().login,
            state: r.state,
            body: r.body.unwrap_or_default(),
            submitted_at: r.submitted_at,
        }
    }
}
