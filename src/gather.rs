//! Evidence-gathering pipeline.
//!
//! Runs a fixed, ordered sequence of best-effort steps that populate a
//! [`Case`] from the history and code-host providers:
//!
//! 1. blame the midpoint line of the selection
//! 2. load the blamed commit (skipped when blame failed)
//! 3. find the pull request that introduced the commit
//! 4. look up linked issues referenced by the PR or the commit message
//! 5. load recent file history
//!
//! Each step catches its own error, logs a warning, and records an
//! [`EvidenceGap`](crate::models::EvidenceGap); the pipeline never aborts.
//! Steps run strictly in sequence because later steps read what earlier
//! steps added to the case.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::InvestigationConfig;
use crate::error::{GatherStep, InvestigationError};
use crate::models::{Case, CodeSelection, Evidence, EvidenceData, RepoSlug};
use crate::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::traits::{CodeHostProvider, HistoryProvider};

static CLOSING_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fix(?:e[sd])?|close[sd]?|resolve[sd]?)\s*:?\s+#(\d+)").unwrap()
});
static BARE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|[^\w&/])#(\d+)\b").unwrap());

/// Extract issue numbers from free text.
///
/// Closing-keyword references (`fixes #12`) come first, then bare `#N`
/// references, de-duplicated in order of appearance and capped at `limit`.
pub fn extract_issue_refs(text: &str, limit: usize) -> Vec<u64> {
    let mut seen = HashSet::new();
    let closing = CLOSING_REF.captures_iter(text);
    let bare = BARE_REF.captures_iter(text);

    closing
        .chain(bare)
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .filter(|n| *n > 0 && seen.insert(*n))
        .take(limit)
        .collect()
}

/// Borrowed collaborators for one pipeline run.
pub struct EvidencePipeline<'a> {
    pub history: &'a dyn HistoryProvider,
    pub code_host: &'a dyn CodeHostProvider,
    pub config: &'a InvestigationConfig,
    pub progress: &'a dyn ProgressReporter,
    /// Repository configured by the user; wins over remote introspection.
    pub repository: Option<&'a RepoSlug>,
}

impl<'a> EvidencePipeline<'a> {
    /// Gather all available evidence for `selection` into a fresh case.
    pub async fn gather(&self, selection: CodeSelection) -> Case {
        let mut case = Case::open(selection);
        let mut repo: Option<Option<RepoSlug>> = None;

        for step in GatherStep::ALL {
            if matches!(step, GatherStep::PullRequest | GatherStep::LinkedIssues) && repo.is_none()
            {
                repo = Some(self.resolve_repository(&case.selection).await);
            }
            let slug = repo.as_ref().and_then(|r| r.as_ref());
            self.run_step(step, &mut case, slug).await;
        }
        case.repository = repo.flatten();

        debug!(
            case = %case.id,
            evidence = case.evidence().len(),
            gaps = case.gaps().len(),
            "evidence gathering finished"
        );
        case
    }

    /// Run one step, converting its failure into a recorded gap.
    pub async fn run_step(&self, step: GatherStep, case: &mut Case, repo: Option<&RepoSlug>) {
        let (phase, percent, message) = match step {
            GatherStep::Blame => (
                Phase::Blame,
                10,
                format!("blaming line {}", case.selection.midpoint_line()),
            ),
            GatherStep::Commit => (Phase::Commit, 20, "loading blamed commit".to_string()),
            GatherStep::PullRequest => (
                Phase::PullRequest,
                35,
                "looking up pull request".to_string(),
            ),
            GatherStep::LinkedIssues => (Phase::Issues, 45, "looking up linked issues".to_string()),
            GatherStep::FileHistory => (Phase::FileHistory, 55, "loading file history".to_string()),
        };

        let result = match step {
            GatherStep::Blame => self.blame(case).await,
            GatherStep::Commit => self.commit(case).await,
            GatherStep::PullRequest => self.pull_request(case, repo).await,
            GatherStep::LinkedIssues => self.linked_issues(case, repo).await,
            GatherStep::FileHistory => self.file_history(case).await,
        };

        if let Err(err) = result {
            warn!(case = %case.id, step = %step, error = %err, "evidence step skipped");
            let reason = match err {
                InvestigationError::EvidenceUnavailable { reason, .. } => reason,
                other => other.to_string(),
            };
            case.record_gap(step, reason);
        }

        self.progress.report(ProgressEvent::new(
            phase,
            format!("{} ({} evidence items)", message, case.evidence().len()),
            percent,
        ));
    }

    async fn resolve_repository(&self, selection: &CodeSelection) -> Option<RepoSlug> {
        if let Some(repo) = &selection.repository {
            return Some(repo.clone());
        }
        if let Some(repo) = self.repository {
            return Some(repo.clone());
        }
        match self.history.remote_info().await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "could not introspect repository remote");
                None
            }
        }
    }

    async fn blame(&self, case: &mut Case) -> Result<(), InvestigationError> {
        let line = case.selection.midpoint_line();
        let blame = self
            .history
            .blame(&case.selection.file_path, line)
            .await
            .map_err(|e| InvestigationError::unavailable(GatherStep::Blame, e))?;
        case.add_evidence(Evidence::new(
            EvidenceData::Blame(blame),
            self.history.name(),
        ))
    }

    async fn commit(&self, case: &mut Case) -> Result<(), InvestigationError> {
        let blame = case.blamed_commit().ok_or_else(|| {
            InvestigationError::unavailable(GatherStep::Commit, "no blamed commit")
        })?;
        if blame.is_uncommitted() {
            return Err(InvestigationError::unavailable(
                GatherStep::Commit,
                "line is not committed yet",
            ));
        }
        let hash = blame.commit_hash.clone();

        let commit = self
            .history
            .commit(&hash)
            .await
            .map_err(|e| InvestigationError::unavailable(GatherStep::Commit, e))?;
        case.add_evidence(Evidence::new(
            EvidenceData::Commit(commit),
            self.history.name(),
        ))
    }

    async fn pull_request(
        &self,
        case: &mut Case,
        repo: Option<&RepoSlug>,
    ) -> Result<(), InvestigationError> {
        let repo = repo.ok_or_else(|| {
            InvestigationError::unavailable(
                GatherStep::PullRequest,
                "repository owner/name could not be resolved",
            )
        })?;
        let hash = match (case.commit(), case.blamed_commit()) {
            (Some(commit), _) => commit.hash.clone(),
            (None, Some(blame)) if !blame.is_uncommitted() => blame.commit_hash.clone(),
            _ => {
                return Err(InvestigationError::unavailable(
                    GatherStep::PullRequest,
                    "no commit to look up",
                ))
            }
        };

        let pr = self
            .code_host
            .find_pr_by_commit(repo, &hash)
            .await
            .map_err(|e| InvestigationError::unavailable(GatherStep::PullRequest, e))?
            .ok_or_else(|| {
                InvestigationError::unavailable(
                    GatherStep::PullRequest,
                    format!("no pull request found for {}", short_hash(&hash)),
                )
            })?;
        case.add_evidence(Evidence::new(
            EvidenceData::PullRequest(pr),
            self.code_host.name(),
        ))
    }

    async fn linked_issues(
        &self,
        case: &mut Case,
        repo: Option<&RepoSlug>,
    ) -> Result<(), InvestigationError> {
        let mut text = String::new();
        let mut own_number = None;
        if let Some(pr) = case.pull_request() {
            own_number = Some(pr.number);
            text.push_str(&pr.title);
            text.push('\n');
            text.push_str(&pr.body);
            text.push('\n');
        }
        if let Some(commit) = case.commit() {
            text.push_str(&commit.message);
        }

        let refs: Vec<u64> = extract_issue_refs(&text, self.config.max_linked_issues + 1)
            .into_iter()
            .filter(|n| Some(*n) != own_number)
            .take(self.config.max_linked_issues)
            .collect();
        if refs.is_empty() {
            return Ok(());
        }

        let repo = repo.ok_or_else(|| {
            InvestigationError::unavailable(
                GatherStep::LinkedIssues,
                "repository owner/name could not be resolved",
            )
        })?;

        let mut missing = Vec::new();
        for number in refs {
            match self.code_host.get_issue(repo, number).await {
                Ok(Some(issue)) => {
                    case.add_evidence(Evidence::new(
                        EvidenceData::Issue(issue),
                        self.code_host.name(),
                    ))?;
                }
                Ok(None) => missing.push(format!("#{} not found", number)),
                Err(e) => missing.push(format!("#{}: {}", number, e)),
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(InvestigationError::unavailable(
                GatherStep::LinkedIssues,
                missing.join("; "),
            ))
        }
    }

    async fn file_history(&self, case: &mut Case) -> Result<(), InvestigationError> {
        let commits = self
            .history
            .file_history(&case.selection.file_path, self.config.file_history_limit)
            .await
            .map_err(|e| InvestigationError::unavailable(GatherStep::FileHistory, e))?;
        if commits.is_empty() {
            return Ok(());
        }
        case.add_evidence(Evidence::new(
            EvidenceData::FileHistory { commits },
            self.history.name(),
        ))
    }
}

pub(crate) fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(7)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_keywords_come_first() {
        let text = "See #3 for context. Fixes #12, closes #7 and resolves: #12";
        assert_eq!(extract_issue_refs(text, 5), vec![12, 7, 3]);
    }

    #[test]
    fn refs_are_capped() {
        let text = "#1 #2 #3 #4 #5 #6 #7";
        assert_eq!(extract_issue_refs(text, 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn ignores_anchors_and_entities() {
        let text = "see https://example.com/page#42 and &#39; but (#512)";
        assert_eq!(extract_issue_refs(text, 5), vec![512]);
    }

    #[test]
    fn commit_subject_reference() {
        let text = "Fix race condition in lane scheduler (#512)";
        assert_eq!(extract_issue_refs(text, 5), vec![512]);
    }

    #[test]
    fn short_hash_handles_short_input() {
        assert_eq!(short_hash("abc1234def"), "abc1234");
        assert_eq!(short_hash("abc"), "abc");
    }
}
