//! Deterministic timeline derived from case evidence.
//!
//! One event per blame, commit, pull-request creation, pull-request merge and
//! issue creation. A commit already covered by a blame event of the same hash
//! is not repeated, and file-history commits never produce events. Events are
//! sorted ascending by date; ties keep evidence order.

use crate::gather::short_hash;
use crate::models::{Case, EvidenceData, TimelineEvent, TimelineEventKind};

pub fn build_timeline(case: &Case) -> Vec<TimelineEvent> {
    let blamed: Vec<&str> = case
        .evidence()
        .iter()
        .filter_map(|e| match &e.data {
            EvidenceData::Blame(b) => Some(b.commit_hash.as_str()),
            _ => None,
        })
        .collect();

    let mut events = Vec::new();
    for evidence in case.evidence() {
        match &evidence.data {
            EvidenceData::Blame(b) => events.push(TimelineEvent {
                date: b.timestamp,
                kind: TimelineEventKind::Blame,
                title: format!("Line {} last changed", b.line),
                description: format!("{} by {}", short_hash(&b.commit_hash), b.author),
            }),
            EvidenceData::Commit(c) => {
                if blamed.contains(&c.hash.as_str()) {
                    continue;
                }
                events.push(TimelineEvent {
                    date: c.date,
                    kind: TimelineEventKind::Commit,
                    title: c.subject().to_string(),
                    description: format!("{} by {}", short_hash(&c.hash), c.author),
                });
            }
            EvidenceData::PullRequest(pr) => {
                events.push(TimelineEvent {
                    date: pr.created_at,
                    kind: TimelineEventKind::PullRequestCreated,
                    title: format!("PR #{} opened", pr.number),
                    description: pr.title.clone(),
                });
                if let Some(merged) = pr.merged_at {
                    events.push(TimelineEvent {
                        date: merged,
                        kind: TimelineEventKind::PullRequestMerged,
                        title: format!("PR #{} merged", pr.number),
                        description: pr.title.clone(),
                    });
                }
            }
            EvidenceData::Issue(issue) => events.push(TimelineEvent {
                date: issue.created_at,
                kind: TimelineEventKind::IssueCreated,
                title: format!("Issue #{} opened", issue.number),
                description: issue.title.clone(),
            }),
            EvidenceData::FileHistory { .. } => {}
        }
    }

    // Stable sort keeps evidence order for equal dates.
    events.sort_by_key(|e| e.date);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BlameInfo, CodeSelection, CommitInfo, Evidence, IssueInfo, PullRequestInfo,
    };
    use chrono::{TimeZone, Utc};

    fn blame(hash: &str, day: u32) -> Evidence {
        Evidence::new(
            EvidenceData::Blame(BlameInfo {
                commit_hash: hash.into(),
                author: "Ada".into(),
                author_email: "ada@example.com".into(),
                timestamp: Utc.with_ymd_and_hms(2023, 3, day, 0, 0, 0).unwrap(),
                line: 4,
                line_content: "x".into(),
            }),
            "git",
        )
    }

    fn commit(hash: &str, day: u32) -> Evidence {
        Evidence::new(
            EvidenceData::Commit(CommitInfo {
                hash: hash.into(),
                author: "Ada".into(),
                date: Utc.with_ymd_and_hms(2023, 3, day, 0, 0, 0).unwrap(),
                message: "Subject\n\nBody".into(),
                diff: String::new(),
                changed_files: vec![],
            }),
            "git",
        )
    }

    #[test]
    fn issue_and_blame_sorted_ascending() {
        let mut case = Case::open(CodeSelection::new("x", "a.rs", 1, 8, "/r"));
        case.add_evidence(blame("abc1234", 10)).unwrap();
        case.add_evidence(commit("abc1234", 10)).unwrap();
        case.add_evidence(Evidence::new(
            EvidenceData::Issue(IssueInfo {
                number: 512,
                title: "Deadlock".into(),
                body: String::new(),
                author: "ops".into(),
                state: "closed".into(),
                url: String::new(),
                created_at: Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap(),
                closed_at: None,
                labels: vec![],
                comments: vec![],
            }),
            "github",
        ))
        .unwrap();

        let timeline = build_timeline(&case);
        let kinds: Vec<_> = timeline.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![TimelineEventKind::IssueCreated, TimelineEventKind::Blame]
        );
        assert!(timeline.windows(2).all(|w| w[0].date <= w[1].date));
    }

    #[test]
    fn distinct_commit_and_merged_pr_produce_events() {
        let mut case = Case::open(CodeSelection::new("x", "a.rs", 1, 1, "/r"));
        case.add_evidence(blame("aaaaaaa", 5)).unwrap();
        case.add_evidence(commit("bbbbbbb", 3)).unwrap();
        case.add_evidence(Evidence::new(
            EvidenceData::PullRequest(PullRequestInfo {
                number: 9,
                title: "Add lane".into(),
                body: String::new(),
                author: "ada".into(),
                state: "merged".into(),
                url: String::new(),
                created_at: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
                merged_at: Some(Utc.with_ymd_and_hms(2023, 3, 4, 0, 0, 0).unwrap()),
                comments: vec![],
                reviews: vec![],
            }),
            "github",
        ))
        .unwrap();
        case.add_evidence(Evidence::new(
            EvidenceData::FileHistory { commits: vec![] },
            "git",
        ))
        .unwrap();

        let kinds: Vec<_> = build_timeline(&case).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TimelineEventKind::PullRequestCreated,
                TimelineEventKind::Commit,
                TimelineEventKind::PullRequestMerged,
                TimelineEventKind::Blame,
            ]
        );
    }
}
