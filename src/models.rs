//! Core data models used throughout Code Sleuth.
//!
//! These types represent the selection under investigation, the evidence
//! gathered about it, the accumulating [`Case`], and the value objects derived
//! from a case ([`InvestigationResult`], [`VerificationReport`],
//! [`DeepDiveResult`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{GatherStep, InvestigationError};

/// Clamp any computed confidence into `[0, 100]`.
pub fn clamp_confidence(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Human label for a confidence score.
pub fn confidence_label(confidence: u8) -> &'static str {
    match confidence {
        80..=u8::MAX => "high",
        50..=79 => "medium",
        _ => "low",
    }
}

// ============ Selection ============

/// `owner/repo` on the code host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, repo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected owner/repo, got '{}'", s))?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(format!("expected owner/repo, got '{}'", s));
        }
        Ok(RepoSlug::new(owner, repo.trim_end_matches(".git")))
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// The code a developer asked about. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSelection {
    pub text: String,
    /// Path relative to `repo_root`.
    pub file_path: PathBuf,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub repo_root: PathBuf,
    /// Code-host repository, when the caller already knows it.
    #[serde(default)]
    pub repository: Option<RepoSlug>,
}

impl CodeSelection {
    pub fn new(
        text: impl Into<String>,
        file_path: impl Into<PathBuf>,
        start_line: usize,
        end_line: usize,
        repo_root: impl Into<PathBuf>,
    ) -> Self {
        let start_line = start_line.max(1);
        Self {
            text: text.into(),
            file_path: file_path.into(),
            start_line,
            end_line: end_line.max(start_line),
            repo_root: repo_root.into(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: RepoSlug) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Line blamed by the pipeline.
    pub fn midpoint_line(&self) -> usize {
        (self.start_line + self.end_line) / 2
    }

    pub fn absolute_path(&self) -> PathBuf {
        self.repo_root.join(&self.file_path)
    }

    /// `path:start-end`, used in prompts and exports.
    pub fn location(&self) -> String {
        if self.start_line == self.end_line {
            format!("{}:{}", self.file_path.display(), self.start_line)
        } else {
            format!(
                "{}:{}-{}",
                self.file_path.display(),
                self.start_line,
                self.end_line
            )
        }
    }
}

// ============ Evidence ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameInfo {
    pub commit_hash: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub line: usize,
    pub line_content: String,
}

impl BlameInfo {
    /// Lines that are not yet committed blame to the all-zero hash.
    pub fn is_uncommitted(&self) -> bool {
        !self.commit_hash.is_empty() && self.commit_hash.chars().all(|c| c == '0')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl CommitInfo {
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    /// e.g. `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`.
    pub state: String,
    pub body: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub state: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// Kind-specific evidence payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceData {
    Blame(BlameInfo),
    Commit(CommitInfo),
    PullRequest(PullRequestInfo),
    Issue(IssueInfo),
    FileHistory { commits: Vec<CommitInfo> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Blame,
    Commit,
    PullRequest,
    Issue,
    FileHistory,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceKind::Blame => "blame",
            EvidenceKind::Commit => "commit",
            EvidenceKind::PullRequest => "pull_request",
            EvidenceKind::Issue => "issue",
            EvidenceKind::FileHistory => "file_history",
        };
        f.write_str(s)
    }
}

/// A single fact gathered from a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub data: EvidenceData,
    pub captured_at: DateTime<Utc>,
    /// Which collaborator produced it, e.g. `"git"` or `"github"`.
    pub provenance: String,
}

impl Evidence {
    pub fn new(data: EvidenceData, provenance: impl Into<String>) -> Self {
        Self {
            data,
            captured_at: Utc::now(),
            provenance: provenance.into(),
        }
    }

    pub fn kind(&self) -> EvidenceKind {
        match &self.data {
            EvidenceData::Blame(_) => EvidenceKind::Blame,
            EvidenceData::Commit(_) => EvidenceKind::Commit,
            EvidenceData::PullRequest(_) => EvidenceKind::PullRequest,
            EvidenceData::Issue(_) => EvidenceKind::Issue,
            EvidenceData::FileHistory { .. } => EvidenceKind::FileHistory,
        }
    }
}

// ============ Case ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Investigating,
    Completed,
    Failed,
}

/// A best-effort step that produced no evidence, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceGap {
    pub step: GatherStep,
    pub reason: String,
}

/// Ordered continuation tokens, one per reasoning call.
///
/// Owned by the caller and threaded through each call rather than held by
/// the orchestrator, so several investigations never share one trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasoningTrace(Vec<String>);

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: impl Into<String>) {
        self.0.push(token.into());
    }

    pub fn extend(&mut self, other: &ReasoningTrace) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The in-progress record of one investigation.
///
/// Evidence is append-only and the case is finalized exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct Case {
    pub id: String,
    pub selection: CodeSelection,
    /// Repository the code-host lookups ran against, once resolved.
    pub repository: Option<RepoSlug>,
    evidence: Vec<Evidence>,
    gaps: Vec<EvidenceGap>,
    status: CaseStatus,
    confidence: u8,
    pub trace: ReasoningTrace,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failure: Option<String>,
}

impl Case {
    pub fn open(selection: CodeSelection) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            selection,
            repository: None,
            evidence: Vec::new(),
            gaps: Vec::new(),
            status: CaseStatus::Investigating,
            confidence: 0,
            trace: ReasoningTrace::new(),
            started_at: Utc::now(),
            completed_at: None,
            failure: None,
        }
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }

    pub fn gaps(&self) -> &[EvidenceGap] {
        &self.gaps
    }

    pub fn status(&self) -> CaseStatus {
        self.status
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence.is_empty()
    }

    pub fn add_evidence(&mut self, evidence: Evidence) -> Result<(), InvestigationError> {
        self.ensure_open()?;
        self.evidence.push(evidence);
        Ok(())
    }

    pub fn record_gap(&mut self, step: GatherStep, reason: impl Into<String>) {
        self.gaps.push(EvidenceGap {
            step,
            reason: reason.into(),
        });
    }

    pub fn complete(&mut self, confidence: i64) -> Result<(), InvestigationError> {
        self.ensure_open()?;
        self.status = CaseStatus::Completed;
        self.confidence = clamp_confidence(confidence);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), InvestigationError> {
        self.ensure_open()?;
        self.status = CaseStatus::Failed;
        self.confidence = 0;
        self.failure = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), InvestigationError> {
        if self.status == CaseStatus::Investigating {
            Ok(())
        } else {
            Err(InvestigationError::CaseFinalized(self.id.clone()))
        }
    }

    /// First blamed commit hash, if any.
    pub fn blamed_commit(&self) -> Option<&BlameInfo> {
        self.evidence.iter().find_map(|e| match &e.data {
            EvidenceData::Blame(b) => Some(b),
            _ => None,
        })
    }

    pub fn commit(&self) -> Option<&CommitInfo> {
        self.evidence.iter().find_map(|e| match &e.data {
            EvidenceData::Commit(c) => Some(c),
            _ => None,
        })
    }

    pub fn pull_request(&self) -> Option<&PullRequestInfo> {
        self.evidence.iter().find_map(|e| match &e.data {
            EvidenceData::PullRequest(pr) => Some(pr),
            _ => None,
        })
    }
}

// ============ Result ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Commit,
    PullRequest,
    Issue,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Commit => "commit",
            SourceKind::PullRequest => "pull request",
            SourceKind::Issue => "issue",
        };
        f.write_str(s)
    }
}

/// A citation backed by an evidence item of the originating case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    /// Full commit hash, or the PR/issue number.
    pub identifier: String,
    pub url: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Keep,
    Document,
    Refactor,
    Remove,
    Investigate,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecommendedAction::Keep => "keep",
            RecommendedAction::Document => "document",
            RecommendedAction::Refactor => "refactor",
            RecommendedAction::Remove => "remove",
            RecommendedAction::Investigate => "investigate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    pub reason: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Blame,
    Commit,
    PullRequestCreated,
    PullRequestMerged,
    IssueCreated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: DateTime<Utc>,
    pub kind: TimelineEventKind,
    pub title: String,
    pub description: String,
}

/// Output contract of an investigation, derived from a completed [`Case`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub case_id: String,
    pub selection: CodeSelection,
    pub narrative: String,
    pub summary: String,
    pub confidence: u8,
    pub sources: Vec<Source>,
    pub recommendations: Vec<Recommendation>,
    pub timeline: Vec<TimelineEvent>,
    pub trace: ReasoningTrace,
    #[serde(default)]
    pub evidence_gaps: Vec<EvidenceGap>,
    pub evidence_count: usize,
    pub completed_at: DateTime<Utc>,
}

// ============ Verification ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationOutcome {
    pub source: Source,
    pub verified: bool,
    pub note: String,
}

/// Ephemeral outcome of re-checking a result's citations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: usize,
    pub failed: usize,
    pub outcomes: Vec<CitationOutcome>,
    pub original_confidence: u8,
    /// Confidence after verification-ratio scaling only.
    pub ratio_confidence: u8,
    /// Issues counted by the self-critique pass, if it ran.
    pub critique_issues: Option<u32>,
    /// Final confidence after ratio scaling and critique penalty.
    pub confidence: u8,
}

impl VerificationReport {
    pub fn total(&self) -> usize {
        self.verified + self.failed
    }
}

// ============ Deep Dive ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Root,
    Import,
    Export,
    Reference,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationType::Root => "root",
            RelationType::Import => "import",
            RelationType::Export => "export",
            RelationType::Reference => "reference",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Relative to the repository root.
    pub path: PathBuf,
    pub relation: RelationType,
    pub children: Vec<DependencyNode>,
    pub investigated: bool,
}

impl DependencyNode {
    pub fn new(path: impl Into<PathBuf>, relation: RelationType) -> Self {
        Self {
            path: path.into(),
            relation,
            children: Vec::new(),
            investigated: false,
        }
    }

    /// Number of nodes in the tree, including this one.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Greatest distance from this node to any descendant.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(node.children.iter().map(|c| (c, depth + 1)));
        }
        max
    }

    pub fn find(&self, path: &Path) -> Option<&DependencyNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.path == path {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }

    pub fn find_mut(&mut self, path: &Path) -> Option<&mut DependencyNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.path == path {
                return Some(node);
            }
            stack.extend(node.children.iter_mut());
        }
        None
    }

    /// Paths of all descendants in pre-order, excluding this node.
    pub fn descendants_preorder(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack: Vec<&DependencyNode> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node.path.clone());
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Import,
    Call,
    Extends,
    Implements,
    Reference,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceKind::Import => "import",
            ReferenceKind::Call => "call",
            ReferenceKind::Extends => "extends",
            ReferenceKind::Implements => "implements",
            ReferenceKind::Reference => "reference",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    pub identifier: String,
    pub path: PathBuf,
    pub line: usize,
    pub kind: ReferenceKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepDiveOptions {
    pub max_depth: usize,
    pub max_files: usize,
    pub scan_references: bool,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepDiveResult {
    pub main_investigation: InvestigationResult,
    pub related_investigations: BTreeMap<String, InvestigationResult>,
    pub dependency_tree: DependencyNode,
    pub references: Vec<CodeReference>,
    pub verification_report: Option<VerificationReport>,
    pub trace: ReasoningTrace,
    pub files_discovered: usize,
    /// Includes the root file.
    pub files_investigated: usize,
    pub duration_ms: u64,
}

// ============ Reasoning ============

/// Coarse reasoning budget requested per call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ThinkingEffort {
    /// Anthropic extended-thinking budget.
    pub fn budget_tokens(&self) -> u32 {
        match self {
            ThinkingEffort::Low => 1024,
            ThinkingEffort::Medium => 4096,
            ThinkingEffort::High => 16000,
        }
    }

    /// OpenAI `reasoning_effort` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingEffort::Low => "low",
            ThinkingEffort::Medium => "medium",
            ThinkingEffort::High => "high",
        }
    }
}

impl FromStr for ThinkingEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ThinkingEffort::Low),
            "medium" => Ok(ThinkingEffort::Medium),
            "high" => Ok(ThinkingEffort::High),
            other => Err(format!(
                "unknown thinking effort '{}': expected low, medium, or high",
                other
            )),
        }
    }
}
