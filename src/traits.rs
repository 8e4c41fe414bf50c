//! Collaborator traits consumed by the investigation core.
//!
//! The orchestrator never talks to git, the code host, or a model API
//! directly. It depends on three traits, each of which can be backed by a
//! real client ([`GitCli`](crate::history::GitCli),
//! [`GitHubClient`](crate::code_host::GitHubClient),
//! [`create_reasoning_service`](crate::reasoning::create_reasoning_service))
//! or by an in-memory fake in tests.
//!
//! ```text
//!  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//!  │ HistoryProvider  │  │ CodeHostProvider │  │ ReasoningService │
//!  │  blame / commit  │  │  PRs / issues    │  │  generate        │
//!  └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!           └──────────────┬──────┴─────────────────────┘
//!                          ▼
//!                    Investigator
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::error::ReasoningError;
use crate::models::{BlameInfo, CommitInfo, IssueInfo, PullRequestInfo, RepoSlug, ThinkingEffort};

// ═══════════════════════════════════════════════════════════════════════
// History Provider
// ═══════════════════════════════════════════════════════════════════════

/// Version-control history for one repository.
///
/// Paths are relative to the repository root the provider was built for.
/// Every call fails fast; the orchestrator treats a failure as missing
/// evidence and never retries.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Provenance label stamped on evidence from this provider.
    fn name(&self) -> &str {
        "git"
    }

    /// Authorship of a single 1-based line.
    async fn blame(&self, file: &Path, line: usize) -> Result<BlameInfo>;

    /// Full commit details, including the diff.
    async fn commit(&self, hash: &str) -> Result<CommitInfo>;

    /// Most recent commits touching `file`, newest first. Diffs may be empty.
    async fn file_history(&self, file: &Path, max_count: usize) -> Result<Vec<CommitInfo>>;

    /// Code-host repository derived from the configured remote, if any.
    async fn remote_info(&self) -> Result<Option<RepoSlug>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Code-Host Provider
// ═══════════════════════════════════════════════════════════════════════

/// Pull-request and issue metadata from a code-hosting service.
#[async_trait]
pub trait CodeHostProvider: Send + Sync {
    fn name(&self) -> &str {
        "github"
    }

    /// The pull request that introduced `hash`, if one exists.
    async fn find_pr_by_commit(
        &self,
        repo: &RepoSlug,
        hash: &str,
    ) -> Result<Option<PullRequestInfo>>;

    /// Issue `number`, or `None` when it does not exist or is a pull request.
    async fn get_issue(&self, repo: &RepoSlug, number: u64) -> Result<Option<IssueInfo>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Reasoning Service
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub prompt: String,
    pub effort: ThinkingEffort,
    pub temperature: f32,
    /// Last continuation token of the caller's trace, for providers that
    /// can resume context.
    pub context_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningResponse {
    pub text: String,
    pub continuation_token: String,
}

/// A language model that turns a prompt into text.
///
/// Implementations must report rate limiting and overload as
/// [`ReasoningError::Overloaded`]; every other failure is terminal.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &ReasoningRequest)
        -> Result<ReasoningResponse, ReasoningError>;
}
