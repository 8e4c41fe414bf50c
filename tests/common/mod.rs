//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use code_sleuth::config::Config;
use code_sleuth::error::ReasoningError;
use code_sleuth::models::{
    BlameInfo, CommitInfo, IssueInfo, PullRequestInfo, RepoSlug,
};
use code_sleuth::orchestrator::Investigator;
use code_sleuth::progress::{ProgressEvent, ProgressReporter};
use code_sleuth::traits::{
    CodeHostProvider, HistoryProvider, ReasoningRequest, ReasoningResponse, ReasoningService,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub fn date(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, month, day, 12, 0, 0).unwrap()
}

pub fn blame(hash: &str, line: usize) -> BlameInfo {
    BlameInfo {
        commit_hash: hash.to_string(),
        author: "Ada".to_string(),
        author_email: "ada@example.com".to_string(),
        timestamp: date(3, 10),
        line,
        line_content: "let lane = lanes.lock().await;".to_string(),
    }
}

pub fn commit(hash: &str, message: &str) -> CommitInfo {
    CommitInfo {
        hash: hash.to_string(),
        author: "Ada".to_string(),
        date: date(3, 10),
        message: message.to_string(),
        diff: "+let lane = lanes.lock().await;".to_string(),
        changed_files: vec!["src/scheduler.ts".to_string()],
    }
}

pub fn issue(number: u64, title: &str) -> IssueInfo {
    IssueInfo {
        number,
        title: title.to_string(),
        body: "Workers deadlock under load.".to_string(),
        author: "ops".to_string(),
        state: "closed".to_string(),
        url: format!("https://github.com/acme/lanes/issues/{}", number),
        created_at: date(2, 1),
        closed_at: Some(date(3, 11)),
        labels: vec!["bug".to_string()],
        comments: vec![],
    }
}

pub fn pull_request(number: u64, body: &str) -> PullRequestInfo {
    PullRequestInfo {
        number,
        title: "Serialize lane access".to_string(),
        body: body.to_string(),
        author: "ada".to_string(),
        state: "merged".to_string(),
        url: format!("https://github.com/acme/lanes/pull/{}", number),
        created_at: date(3, 8),
        merged_at: Some(date(3, 10)),
        comments: vec![],
        reviews: vec![],
    }
}

// ─── History ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHistory {
    pub blame: Option<BlameInfo>,
    pub commits: Vec<CommitInfo>,
    pub history: Vec<CommitInfo>,
    pub remote: Option<RepoSlug>,
}

#[async_trait]
impl HistoryProvider for FakeHistory {
    async fn blame(&self, _file: &Path, line: usize) -> Result<BlameInfo> {
        self.blame
            .clone()
            .map(|mut b| {
                b.line = line;
                b
            })
            .ok_or_else(|| anyhow!("no such path in HEAD"))
    }

    async fn commit(&self, hash: &str) -> Result<CommitInfo> {
        self.commits
            .iter()
            .find(|c| c.hash.starts_with(hash) || hash.starts_with(&c.hash))
            .cloned()
            .ok_or_else(|| anyhow!("unknown revision {}", hash))
    }

    async fn file_history(&self, _file: &Path, max_count: usize) -> Result<Vec<CommitInfo>> {
        Ok(self.history.iter().take(max_count).cloned().collect())
    }

    async fn remote_info(&self) -> Result<Option<RepoSlug>> {
        Ok(self.remote.clone())
    }
}

// ─── Code host ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCodeHost {
    pub prs: HashMap<String, PullRequestInfo>,
    pub issues: HashMap<u64, IssueInfo>,
    pub issue_lookups: Mutex<Vec<u64>>,
}

#[async_trait]
impl CodeHostProvider for FakeCodeHost {
    async fn find_pr_by_commit(
        &self,
        _repo: &RepoSlug,
        hash: &str,
    ) -> Result<Option<PullRequestInfo>> {
        Ok(self.prs.get(hash).cloned())
    }

    async fn get_issue(&self, _repo: &RepoSlug, number: u64) -> Result<Option<IssueInfo>> {
        self.issue_lookups.lock().unwrap().push(number);
        Ok(self.issues.get(&number).cloned())
    }
}

// ─── Reasoning ──────────────────────────────────────────────────────

pub enum Reply {
    Text(String),
    Overloaded,
    Rejected,
}

/// Replays scripted replies in order, then answers with `fallback`.
pub struct ScriptedReasoning {
    pub replies: Mutex<VecDeque<Reply>>,
    pub fallback: String,
    pub calls: AtomicU32,
    pub requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoning {
    pub fn new(fallback: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: &ReasoningRequest,
    ) -> std::result::Result<ReasoningResponse, ReasoningError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Overloaded) => Err(ReasoningError::Overloaded {
                status: 529,
                message: "overloaded".to_string(),
            }),
            Some(Reply::Rejected) => Err(ReasoningError::Rejected {
                status: 400,
                message: "invalid request".to_string(),
            }),
            Some(Reply::Text(text)) => Ok(ReasoningResponse {
                text,
                continuation_token: format!("tok-{}", n),
            }),
            None => Ok(ReasoningResponse {
                text: self.fallback.clone(),
                continuation_token: format!("tok-{}", n),
            }),
        }
    }
}

// ─── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Defaults with millisecond backoff so retry tests stay fast.
pub fn fast_config() -> Config {
    let mut config = Config::minimal();
    config.reasoning.backoff_base_ms = 1;
    config
}

pub fn investigator(
    history: FakeHistory,
    code_host: FakeCodeHost,
    reasoning: Arc<ScriptedReasoning>,
) -> Investigator {
    Investigator::new(
        Arc::new(history),
        Arc::new(code_host),
        reasoning,
        fast_config(),
    )
}
