//! Extraction of structured fields from free-text model output.
//!
//! Model output is semi-structured, so every field is recovered with the
//! same layered strategy, always in this order:
//!
//! 1. **structured**: read the matching `## Heading` section
//! 2. **heuristic**: pattern matching over the whole response
//! 3. **default**: a fixed fallback value
//!
//! A later layer only runs when the earlier one produced nothing.
//!
//! Citations are additionally cross-checked against the evidence of the case:
//! a hash or number the model mentions is promoted to a [`Source`] only when
//! a matching evidence item exists. Unmatched citations stay in the narrative
//! but never reach the source list.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::models::{
    clamp_confidence, Case, EvidenceData, Priority, Recommendation, RecommendedAction, Source,
    SourceKind,
};

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#{1,4}\s*|\*\*)([A-Za-z][A-Za-z ]*?)\s*(?:\*\*)?\s*:?\s*(?:\*\*)?\s*$")
        .unwrap()
});

/// Ordered confidence patterns; the first match wins.
static CONFIDENCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)confidence(?:\s+level)?\s*[:=]\s*\**\s*(\d{1,3})(?:\.\d+)?\s*%",
        r"(?i)confidence[^0-9\n]{0,30}?(\d{1,3})(?:\.\d+)?\s*%",
        r"(?i)(\d{1,3})(?:\.\d+)?\s*%\s*(?:confidence|confident|certain)",
        r"(?i)confidence(?:\s+level)?\s*(?:is|of|:)?\s*(\d{1,3})\s*/\s*100",
        r"(?i)confidence(?:\s+level)?\s*(?:is|of|:)\s*(\d{1,3})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A number marked as a percentage: `85%` or `85/100`.
static MARKED_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})(?:\.\d+)?\s*(?:%|/\s*100\b)").unwrap());
/// A score out of ten: `9/10`.
static OUT_OF_TEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:\.\d+)?\s*/\s*10\b").unwrap());
static HASH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[0-9a-f]{7,40}\b").unwrap());
static PR_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:PR|pull\s+request|merge\s+request)\s*#?\s*(\d+)\b").unwrap()
});
static ISSUE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bissues?\s*#?\s*(\d+)\b").unwrap());
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w&/])#(\d+)\b").unwrap());

/// Trigger phrases for recommendations, checked in order.
const RECOMMENDATION_TRIGGERS: &[(&str, RecommendedAction, Priority)] = &[
    ("safe to remove", RecommendedAction::Remove, Priority::Medium),
    ("can be removed", RecommendedAction::Remove, Priority::Medium),
    ("should be removed", RecommendedAction::Remove, Priority::Medium),
    ("dead code", RecommendedAction::Remove, Priority::Medium),
    ("no longer needed", RecommendedAction::Remove, Priority::Medium),
    ("should be refactored", RecommendedAction::Refactor, Priority::Medium),
    ("consider refactoring", RecommendedAction::Refactor, Priority::Medium),
    ("could be simplified", RecommendedAction::Refactor, Priority::Low),
    ("technical debt", RecommendedAction::Refactor, Priority::Medium),
    ("add a comment", RecommendedAction::Document, Priority::Low),
    ("add documentation", RecommendedAction::Document, Priority::Low),
    ("should be documented", RecommendedAction::Document, Priority::Low),
    ("lacks documentation", RecommendedAction::Document, Priority::Low),
    ("undocumented", RecommendedAction::Document, Priority::Low),
    ("needs further investigation", RecommendedAction::Investigate, Priority::High),
    ("investigate further", RecommendedAction::Investigate, Priority::High),
    ("unclear why", RecommendedAction::Investigate, Priority::High),
    ("verify with", RecommendedAction::Investigate, Priority::High),
    ("should be kept", RecommendedAction::Keep, Priority::Low),
    ("should remain", RecommendedAction::Keep, Priority::Low),
    ("still needed", RecommendedAction::Keep, Priority::Low),
    ("do not remove", RecommendedAction::Keep, Priority::High),
    ("keep this", RecommendedAction::Keep, Priority::Low),
];

/// Which extraction layer produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Structured,
    Heuristic,
    Default,
}

/// Split a response into its `## Heading` sections, keyed by lowercased
/// heading. Text before the first heading is stored under `""`.
pub fn parse_sections(text: &str) -> HashMap<String, String> {
    let mut sections: HashMap<String, String> = HashMap::new();
    let mut current = String::new();
    let mut body = String::new();

    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            let name = caps[1].trim().to_ascii_lowercase();
            if is_known_section(&name) {
                sections
                    .entry(std::mem::take(&mut current))
                    .or_default()
                    .push_str(body.trim());
                body.clear();
                current = normalize_section(&name).to_string();
                continue;
            }
        }
        body.push_str(line);
        body.push('\n');
    }
    sections
        .entry(current)
        .or_default()
        .push_str(body.trim());
    sections.retain(|_, v| !v.is_empty());
    sections
}

fn is_known_section(name: &str) -> bool {
    matches!(
        name,
        "summary"
            | "confidence"
            | "findings"
            | "narrative"
            | "analysis"
            | "sources"
            | "evidence"
            | "recommendation"
            | "recommendations"
    )
}

fn normalize_section(name: &str) -> &str {
    match name {
        "narrative" | "analysis" => "findings",
        "evidence" => "sources",
        "recommendations" => "recommendation",
        other => other,
    }
}

// ============ Confidence ============

/// Extract a confidence score in `[0, 100]`.
pub fn extract_confidence(
    text: &str,
    sections: &HashMap<String, String>,
    fallback: u8,
) -> (u8, Layer) {
    if let Some(value) = sections.get("confidence").and_then(|s| marked_confidence(s)) {
        return (clamp_confidence(value), Layer::Structured);
    }

    for pattern in CONFIDENCE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            if let Ok(value) = caps[1].parse::<i64>() {
                return (clamp_confidence(value), Layer::Heuristic);
            }
        }
    }

    (fallback.min(100), Layer::Default)
}

/// The first number in `section` written as a percentage, else the first
/// score out of ten scaled to a percentage. Bare numbers are ignored.
fn marked_confidence(section: &str) -> Option<i64> {
    if let Some(caps) = MARKED_PERCENT.captures(section) {
        return caps[1].parse::<i64>().ok();
    }
    OUT_OF_TEN
        .captures(section)
        .and_then(|caps| caps[1].parse::<i64>().ok())
        .map(|tenths| tenths * 10)
}

// ============ Summary ============

pub fn extract_summary(text: &str, sections: &HashMap<String, String>) -> (String, Layer) {
    if let Some(summary) = sections.get("summary") {
        let para = first_paragraph(summary);
        if !para.is_empty() {
            return (para, Layer::Structured);
        }
    }

    let para = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !HEADING.is_match(p.lines().next().unwrap_or("")))
        .map(first_paragraph)
        .unwrap_or_default();
    if !para.is_empty() {
        return (para, Layer::Heuristic);
    }

    ("No summary available.".to_string(), Layer::Default)
}

fn first_paragraph(text: &str) -> String {
    text.trim()
        .split("\n\n")
        .next()
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

// ============ Sources ============

/// Recover citations and keep only those backed by evidence in `case`.
pub fn extract_sources(
    text: &str,
    sections: &HashMap<String, String>,
    case: &Case,
) -> (Vec<Source>, Layer) {
    if let Some(section) = sections.get("sources") {
        let sources = match_citations(section, case);
        if !sources.is_empty() {
            return (sources, Layer::Structured);
        }
    }

    let sources = match_citations(text, case);
    if !sources.is_empty() {
        return (sources, Layer::Heuristic);
    }

    (Vec::new(), Layer::Default)
}

/// Scan `text` for hashes, PR and issue references, in that order, and
/// resolve each against the evidence list.
pub fn match_citations(text: &str, case: &Case) -> Vec<Source> {
    let mut sources = Vec::new();
    let mut seen: HashSet<(SourceKind, String)> = HashSet::new();
    let mut push = |source: Source, sources: &mut Vec<Source>| {
        if seen.insert((source.kind, source.identifier.clone())) {
            sources.push(source);
        }
    };

    for m in HASH_TOKEN.find_iter(text) {
        let token = m.as_str().to_ascii_lowercase();
        // Pure numbers are more likely counts or dates than hashes.
        if token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Some(source) = commit_source(&token, case) {
            push(source, &mut sources);
        }
    }

    for caps in PR_TOKEN.captures_iter(text) {
        if let Some(source) = caps[1].parse().ok().and_then(|n| pr_source(n, case)) {
            push(source, &mut sources);
        }
    }

    for caps in ISSUE_TOKEN.captures_iter(text) {
        if let Some(source) = caps[1].parse().ok().and_then(|n| issue_source(n, case)) {
            push(source, &mut sources);
        }
    }

    for caps in BARE_NUMBER.captures_iter(text) {
        let Ok(n) = caps[1].parse::<u64>() else {
            continue;
        };
        if let Some(source) = pr_source(n, case).or_else(|| issue_source(n, case)) {
            push(source, &mut sources);
        }
    }

    sources
}

fn commit_source(token: &str, case: &Case) -> Option<Source> {
    let mut blame_match = None;
    for evidence in case.evidence() {
        match &evidence.data {
            EvidenceData::Commit(c) if c.hash.to_ascii_lowercase().starts_with(token) => {
                return Some(Source {
                    kind: SourceKind::Commit,
                    identifier: c.hash.clone(),
                    url: commit_url(case, &c.hash),
                    description: c.subject().to_string(),
                });
            }
            EvidenceData::Blame(b)
                if blame_match.is_none()
                    && b.commit_hash.to_ascii_lowercase().starts_with(token) =>
            {
                blame_match = Some(Source {
                    kind: SourceKind::Commit,
                    identifier: b.commit_hash.clone(),
                    url: commit_url(case, &b.commit_hash),
                    description: format!("Last change to line {} by {}", b.line, b.author),
                });
            }
            EvidenceData::FileHistory { commits } if blame_match.is_none() => {
                if let Some(c) = commits
                    .iter()
                    .find(|c| c.hash.to_ascii_lowercase().starts_with(token))
                {
                    blame_match = Some(Source {
                        kind: SourceKind::Commit,
                        identifier: c.hash.clone(),
                        url: commit_url(case, &c.hash),
                        description: c.subject().to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    blame_match
}

fn commit_url(case: &Case, hash: &str) -> Option<String> {
    case.repository
        .as_ref()
        .or(case.selection.repository.as_ref())
        .map(|r| format!("https://github.com/{}/{}/commit/{}", r.owner, r.repo, hash))
}

fn pr_source(number: u64, case: &Case) -> Option<Source> {
    case.evidence().iter().find_map(|e| match &e.data {
        EvidenceData::PullRequest(pr) if pr.number == number => Some(Source {
            kind: SourceKind::PullRequest,
            identifier: pr.number.to_string(),
            url: Some(pr.url.clone()).filter(|u| !u.is_empty()),
            description: pr.title.clone(),
        }),
        _ => None,
    })
}

fn issue_source(number: u64, case: &Case) -> Option<Source> {
    case.evidence().iter().find_map(|e| match &e.data {
        EvidenceData::Issue(issue) if issue.number == number => Some(Source {
            kind: SourceKind::Issue,
            identifier: issue.number.to_string(),
            url: Some(issue.url.clone()).filter(|u| !u.is_empty()),
            description: issue.title.clone(),
        }),
        _ => None,
    })
}

// ============ Recommendations ============

pub fn extract_recommendations(
    text: &str,
    sections: &HashMap<String, String>,
) -> (Vec<Recommendation>, Layer) {
    if let Some(section) = sections.get("recommendation") {
        let recs = recommendations_from_section(section);
        if !recs.is_empty() {
            return (recs, Layer::Structured);
        }
    }

    let recs = recommendations_from_triggers(text);
    if !recs.is_empty() {
        return (recs, Layer::Heuristic);
    }

    (Vec::new(), Layer::Default)
}

/// One recommendation per bullet or line that leads with an action word.
fn recommendations_from_section(section: &str) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = Vec::new();
    for line in section.lines() {
        let line = line
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim()
            .trim_matches('*')
            .trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        let Some(action) = leading_action(&lower) else {
            continue;
        };
        if recs.iter().any(|r| r.action == action) {
            continue;
        }
        recs.push(Recommendation {
            action,
            reason: clip(strip_action_prefix(line)),
            priority: stated_priority(&lower).unwrap_or_else(|| default_priority(action)),
        });
    }
    recs
}

fn leading_action(lower: &str) -> Option<RecommendedAction> {
    let first = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|w| !w.is_empty())?;
    match first {
        "keep" => Some(RecommendedAction::Keep),
        "document" => Some(RecommendedAction::Document),
        "refactor" => Some(RecommendedAction::Refactor),
        "remove" | "delete" => Some(RecommendedAction::Remove),
        "investigate" => Some(RecommendedAction::Investigate),
        _ => None,
    }
}

fn strip_action_prefix(line: &str) -> &str {
    let rest = line
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_start_matches(|c: char| {
            c == '*' || c == ':' || c == '-' || c == '—' || c.is_whitespace()
        });
    if rest.is_empty() {
        line
    } else {
        rest
    }
}

fn stated_priority(lower: &str) -> Option<Priority> {
    if lower.contains("high priority") || lower.contains("priority: high") {
        Some(Priority::High)
    } else if lower.contains("medium priority") || lower.contains("priority: medium") {
        Some(Priority::Medium)
    } else if lower.contains("low priority") || lower.contains("priority: low") {
        Some(Priority::Low)
    } else {
        None
    }
}

fn default_priority(action: RecommendedAction) -> Priority {
    RECOMMENDATION_TRIGGERS
        .iter()
        .find(|(_, a, _)| *a == action)
        .map(|(_, _, p)| *p)
        .unwrap_or(Priority::Low)
}

fn recommendations_from_triggers(text: &str) -> Vec<Recommendation> {
    let lower = text.to_ascii_lowercase();
    let mut recs: Vec<Recommendation> = Vec::new();
    for (phrase, action, priority) in RECOMMENDATION_TRIGGERS {
        if recs.iter().any(|r| r.action == *action) {
            continue;
        }
        if let Some(pos) = lower.find(phrase) {
            recs.push(Recommendation {
                action: *action,
                reason: clip(sentence_around(text, pos)),
                priority: *priority,
            });
        }
    }
    recs
}

/// The sentence of `text` containing byte offset `pos`.
fn sentence_around(text: &str, pos: usize) -> &str {
    let is_break = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let start = text[..pos]
        .rfind(is_break)
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = text[pos..]
        .find(is_break)
        .map(|i| pos + i + 1)
        .unwrap_or(text.len());
    text[start..end].trim()
}

fn clip(text: &str) -> String {
    const MAX: usize = 280;
    let text = text.trim();
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(MAX).collect();
        s.push('…');
        s
    }
}
