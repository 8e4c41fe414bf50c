//! End-to-end investigations against in-memory collaborators.

mod common;

use code_sleuth::error::{GatherStep, InvestigationError};
use code_sleuth::gather::EvidencePipeline;
use code_sleuth::models::{
    Case, CaseStatus, CodeSelection, EvidenceData, InvestigationResult, ReasoningTrace,
    RecommendedAction, RepoSlug, Source, SourceKind, ThinkingEffort, TimelineEventKind,
};
use code_sleuth::progress::{NoProgress, Phase};
use common::*;
use std::sync::Arc;

fn selection() -> CodeSelection {
    CodeSelection::new(
        "const lane = await lanes.acquire(id);\nawait lane.run(job);\nlane.release();",
        "src/scheduler.ts",
        10,
        12,
        "/repo",
    )
}

/// Blame and commit `abc1234` referencing issue #512, no pull request.
fn race_fix_history() -> (FakeHistory, FakeCodeHost) {
    let history = FakeHistory {
        blame: Some(blame("abc1234", 11)),
        commits: vec![commit("abc1234", "Fix race condition in lane scheduler (#512)")],
        history: vec![],
        remote: Some(RepoSlug::new("acme", "lanes")),
    };
    let mut code_host = FakeCodeHost::default();
    code_host
        .issues
        .insert(512, issue(512, "Scheduler deadlocks under load"));
    (history, code_host)
}

const CITES_ISSUE: &str = "## Summary
The lock serializes lane access to fix the race reported in issue #512.

## Confidence
85%

## Findings
Commit abc1234 introduced the lock after the deadlock in #512 was diagnosed.

## Sources
- abc1234
- issue #512

## Recommendation
- Keep: removing it reintroduces the race.
";

const OMITS_ISSUE: &str = "## Summary
The lock serializes lane access.

## Sources
- abc1234
";

fn assert_sources_backed_by_evidence(result: &InvestigationResult, case: &Case) {
    for source in &result.sources {
        let backed = case.evidence().iter().any(|e| match (&e.data, source.kind) {
            (EvidenceData::Blame(b), SourceKind::Commit) => b.commit_hash == source.identifier,
            (EvidenceData::Commit(c), SourceKind::Commit) => c.hash == source.identifier,
            (EvidenceData::FileHistory { commits }, SourceKind::Commit) => {
                commits.iter().any(|c| c.hash == source.identifier)
            }
            (EvidenceData::PullRequest(pr), SourceKind::PullRequest) => {
                pr.number.to_string() == source.identifier
            }
            (EvidenceData::Issue(i), SourceKind::Issue) => {
                i.number.to_string() == source.identifier
            }
            _ => false,
        });
        assert!(backed, "unbacked source {:?}", source);
    }
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn race_fix_with_issue_and_no_pull_request() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(CITES_ISSUE));
    let investigator = investigator(history, code_host, reasoning.clone());

    let result = investigator.investigate(selection()).await.unwrap();

    assert_eq!(result.evidence_count, 3);
    let kinds: Vec<_> = result.timeline.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![TimelineEventKind::IssueCreated, TimelineEventKind::Blame]
    );
    assert!(result.timeline[0].date <= result.timeline[1].date);

    let ids: Vec<_> = result
        .sources
        .iter()
        .map(|s| (s.kind, s.identifier.as_str()))
        .collect();
    assert_eq!(
        ids,
        vec![(SourceKind::Commit, "abc1234"), (SourceKind::Issue, "512")]
    );
    assert_eq!(result.confidence, 85);
    assert_eq!(result.recommendations.len(), 1);
    assert_eq!(result.recommendations[0].action, RecommendedAction::Keep);
    assert!(result
        .evidence_gaps
        .iter()
        .any(|g| g.step == GatherStep::PullRequest));
    assert_eq!(result.trace.tokens(), ["tok-0".to_string()]);
    assert_eq!(reasoning.call_count(), 1);

    let prompt = &reasoning.prompts()[0];
    assert!(prompt.contains("Fix race condition in lane scheduler (#512)"));
    assert!(prompt.contains("Issue #512"));
}

#[tokio::test]
async fn commit_source_links_to_the_remote_repository() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(CITES_ISSUE));
    let investigator = investigator(history, code_host, reasoning);

    let result = investigator.investigate(selection()).await.unwrap();

    let commit = result
        .sources
        .iter()
        .find(|s| s.kind == SourceKind::Commit)
        .unwrap();
    assert_eq!(
        commit.url.as_deref(),
        Some("https://github.com/acme/lanes/commit/abc1234")
    );
}

#[tokio::test]
async fn issue_is_cited_only_when_mentioned() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(OMITS_ISSUE));
    let investigator = investigator(history, code_host, reasoning);

    let result = investigator.investigate(selection()).await.unwrap();

    assert_eq!(result.evidence_count, 3);
    assert!(result.sources.iter().all(|s| s.kind != SourceKind::Issue));
    assert_eq!(result.sources.len(), 1);
}

#[tokio::test]
async fn default_confidence_with_evidence() {
    let history = FakeHistory {
        blame: Some(blame("abc1234", 11)),
        commits: vec![commit("abc1234", "Refactor scheduler")],
        ..FakeHistory::default()
    };
    let reasoning = Arc::new(ScriptedReasoning::new(
        "The code keeps workers from racing on the same lane.",
    ));
    let investigator = investigator(history, FakeCodeHost::default(), reasoning);

    let result = investigator.investigate(selection()).await.unwrap();

    assert_eq!(result.evidence_count, 2);
    assert_eq!(result.confidence, 92);
    assert_eq!(
        result.summary,
        "The code keeps workers from racing on the same lane."
    );
    assert!(result.recommendations.is_empty());
    let gap = result
        .evidence_gaps
        .iter()
        .find(|g| g.step == GatherStep::PullRequest)
        .unwrap();
    assert!(gap.reason.contains("could not be resolved"));
}

#[tokio::test]
async fn default_confidence_without_evidence() {
    let reasoning = Arc::new(ScriptedReasoning::new("Nothing is known about this code."));
    let investigator = investigator(FakeHistory::default(), FakeCodeHost::default(), reasoning);

    let result = investigator.investigate(selection()).await.unwrap();

    assert_eq!(result.evidence_count, 0);
    assert_eq!(result.confidence, 65);
    assert!(result.sources.is_empty());
    assert!(result.timeline.is_empty());
    let steps: Vec<_> = result.evidence_gaps.iter().map(|g| g.step).collect();
    assert_eq!(
        steps,
        vec![GatherStep::Blame, GatherStep::Commit, GatherStep::PullRequest]
    );
}

#[tokio::test]
async fn fabricated_citations_never_become_sources() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(
        "Introduced by deadbeef12 and abc1234, discussed in PR #99, issue #7 and #512. \
         Confidence: 140%",
    ));
    let investigator = investigator(history, code_host, reasoning);

    let mut trace = ReasoningTrace::new();
    let mut case = investigator.gather(selection()).await;
    let result = investigator
        .synthesize(&mut case, None, &mut trace)
        .await
        .unwrap();

    assert_sources_backed_by_evidence(&result, &case);
    assert_eq!(result.sources.len(), 2);
    assert!(result.narrative.contains("PR #99"));
    assert_eq!(result.confidence, 100);
    assert_eq!(case.status(), CaseStatus::Completed);
    assert_eq!(case.confidence(), 100);
}

#[tokio::test]
async fn pull_request_and_its_linked_issues() {
    let (mut history, mut code_host) = race_fix_history();
    history.commits = vec![commit("abc1234", "Serialize lane access")];
    history.history = vec![
        commit("abc1234", "Serialize lane access"),
        commit("0ff1ce0", "Add scheduler"),
    ];
    code_host.prs.insert(
        "abc1234".to_string(),
        pull_request(77, "Fixes #512. Related to #77 and #600."),
    );

    let config = fast_config();
    let pipeline = EvidencePipeline {
        history: &history,
        code_host: &code_host,
        config: &config.investigation,
        progress: &NoProgress,
        repository: None,
    };

    let mut case = Case::open(selection());
    let slug = RepoSlug::new("acme", "lanes");
    let mut lengths = vec![case.evidence().len()];
    for step in GatherStep::ALL {
        pipeline.run_step(step, &mut case, Some(&slug)).await;
        lengths.push(case.evidence().len());
    }

    assert!(lengths.windows(2).all(|w| w[0] <= w[1]), "{:?}", lengths);
    assert_eq!(case.evidence().len(), 5);
    // The PR's own number is not looked up; the unknown issue leaves a gap.
    assert_eq!(*code_host.issue_lookups.lock().unwrap(), vec![512, 600]);
    assert_eq!(case.gaps().len(), 1);
    assert_eq!(case.gaps()[0].step, GatherStep::LinkedIssues);
    assert!(case.gaps()[0].reason.contains("#600"));
}

#[tokio::test]
async fn linked_issues_are_capped() {
    let (mut history, mut code_host) = race_fix_history();
    history.commits = vec![commit("abc1234", "Fix #1 #2 #3 #4 #5 #6 #7")];
    for n in 1..=7 {
        code_host.issues.insert(n, issue(n, "bug"));
    }
    let reasoning = Arc::new(ScriptedReasoning::new("ok"));
    let investigator = investigator(history, code_host, reasoning);

    let case = investigator.gather(selection()).await;
    let issues = case
        .evidence()
        .iter()
        .filter(|e| matches!(e.data, EvidenceData::Issue(_)))
        .count();
    assert_eq!(issues, 5);
}

// ─── Reasoning failures ─────────────────────────────────────────────

#[tokio::test]
async fn overload_is_retried_at_most_three_times() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(
        ScriptedReasoning::new(CITES_ISSUE)
            .then(Reply::Overloaded)
            .then(Reply::Overloaded)
            .then(Reply::Overloaded)
            .then(Reply::Overloaded),
    );
    let investigator = investigator(history, code_host, reasoning.clone());

    let err = investigator.investigate(selection()).await.unwrap_err();

    assert_eq!(reasoning.call_count(), 3);
    match err {
        InvestigationError::SynthesisFailed { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.is_retryable());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn transient_overload_recovers() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(
        ScriptedReasoning::new(CITES_ISSUE)
            .then(Reply::Overloaded)
            .then(Reply::Overloaded),
    );
    let investigator = investigator(history, code_host, reasoning.clone());

    let result = investigator.investigate(selection()).await.unwrap();
    assert_eq!(reasoning.call_count(), 3);
    assert_eq!(result.trace.tokens(), ["tok-2".to_string()]);
}

#[tokio::test]
async fn rejection_fails_the_case_without_retry() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(CITES_ISSUE).then(Reply::Rejected));
    let investigator = investigator(history, code_host, reasoning.clone());

    let mut trace = ReasoningTrace::new();
    let mut case = investigator.gather(selection()).await;
    let err = investigator
        .synthesize(&mut case, None, &mut trace)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(reasoning.call_count(), 1);
    assert_eq!(case.status(), CaseStatus::Failed);
    assert!(case.failure().is_some());
    assert!(trace.is_empty());

    let again = investigator
        .synthesize(&mut case, None, &mut trace)
        .await
        .unwrap_err();
    assert!(matches!(again, InvestigationError::CaseFinalized(_)));
    assert_eq!(reasoning.call_count(), 1);
}

// ─── Trace and progress ─────────────────────────────────────────────

#[tokio::test]
async fn trace_is_threaded_through_calls() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(CITES_ISSUE));
    let investigator = investigator(history, code_host, reasoning.clone());

    let mut trace = ReasoningTrace::new();
    let first = investigator
        .investigate_with(selection(), None, &mut trace)
        .await
        .unwrap();
    let second = investigator
        .investigate_with(selection(), Some("Used by 3 workers"), &mut trace)
        .await
        .unwrap();

    assert_eq!(trace.tokens(), ["tok-0".to_string(), "tok-1".to_string()]);
    assert_eq!(first.trace.tokens(), ["tok-0".to_string()]);
    assert_eq!(second.trace.tokens(), ["tok-1".to_string()]);
    assert_ne!(first.case_id, second.case_id);

    let requests = reasoning.requests.lock().unwrap();
    assert_eq!(requests[0].context_token, None);
    assert_eq!(requests[1].context_token.as_deref(), Some("tok-0"));
    assert!(requests[1].prompt.contains("Used by 3 workers"));
}

#[tokio::test]
async fn progress_is_reported_in_order() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(ScriptedReasoning::new(CITES_ISSUE));
    let progress = Arc::new(RecordingProgress::default());
    let investigator =
        investigator(history, code_host, reasoning).with_progress(progress.clone());

    investigator.investigate(selection()).await.unwrap();

    let events = progress.events.lock().unwrap();
    let phases: Vec<_> = events.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Blame,
            Phase::Commit,
            Phase::PullRequest,
            Phase::Issues,
            Phase::FileHistory,
            Phase::Synthesis,
            Phase::Parsing,
            Phase::Complete,
        ]
    );
    assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    assert_eq!(events.last().unwrap().percent, 100);
    let synthesis = events.iter().find(|e| e.phase == Phase::Synthesis).unwrap();
    assert_eq!(synthesis.thinking, Some(ThinkingEffort::Medium));
}

// ─── Verification ───────────────────────────────────────────────────

#[tokio::test]
async fn verification_scales_then_penalizes() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(
        ScriptedReasoning::new(CITES_ISSUE)
            .then(Reply::Text(CITES_ISSUE.to_string()))
            .then(Reply::Text(
                "UNSUPPORTED_CLAIMS: 2\nINCONSISTENCIES: 0\nSPECULATION: 1".to_string(),
            )),
    );
    let investigator = investigator(history, code_host, reasoning);

    let mut trace = ReasoningTrace::new();
    let result = investigator
        .investigate_with(selection(), None, &mut trace)
        .await
        .unwrap();
    let report = investigator.verify(&result, &mut trace).await;

    assert_eq!(report.verified, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.original_confidence, 85);
    assert_eq!(report.ratio_confidence, 85);
    assert_eq!(report.critique_issues, Some(3));
    assert_eq!(report.confidence, 70);
    assert_eq!(trace.len(), 2);
}

#[tokio::test]
async fn unverifiable_citations_scale_confidence_down() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(
        ScriptedReasoning::new("no counts here").then(Reply::Text(CITES_ISSUE.to_string())),
    );
    let investigator = investigator(history, code_host, reasoning);

    let mut result = investigator.investigate(selection()).await.unwrap();
    result.sources.push(Source {
        kind: SourceKind::Commit,
        identifier: "ffff999".to_string(),
        url: None,
        description: "gone".to_string(),
    });
    result.sources.push(Source {
        kind: SourceKind::PullRequest,
        identifier: "41".to_string(),
        url: None,
        description: "no url".to_string(),
    });

    let mut trace = ReasoningTrace::new();
    let report = investigator.verify(&result, &mut trace).await;

    assert_eq!(report.total(), 4);
    assert_eq!(report.verified, 2);
    // round(85 * 2 / 4) = round(42.5)
    assert_eq!(report.ratio_confidence, 43);
    assert_eq!(report.critique_issues, None);
    assert_eq!(report.confidence, 43);
    assert!(!report.outcomes[2].verified);
    assert!(report.outcomes[1].note.contains("provisional"));
}

#[tokio::test]
async fn failed_critique_applies_no_penalty() {
    let (history, code_host) = race_fix_history();
    let reasoning = Arc::new(
        ScriptedReasoning::new(CITES_ISSUE)
            .then(Reply::Text(CITES_ISSUE.to_string()))
            .then(Reply::Rejected),
    );
    let investigator = investigator(history, code_host, reasoning);

    let result = investigator.investigate(selection()).await.unwrap();
    let mut trace = ReasoningTrace::new();
    let report = investigator.verify(&result, &mut trace).await;

    assert_eq!(report.critique_issues, None);
    assert_eq!(report.confidence, report.ratio_confidence);
    assert!(trace.is_empty());
}
