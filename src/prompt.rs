//! Prompt construction for synthesis, self-critique, and cross-file
//! unification.
//!
//! The synthesis prompt embeds the selected code and every evidence item of
//! the case. Diffs and discussion threads are truncated to the character
//! budgets in `[investigation]` so a single huge commit cannot crowd out the
//! rest of the evidence.

use std::fmt::Write;

use crate::config::InvestigationConfig;
use crate::models::{Case, Comment, EvidenceData};

/// Required headings in the synthesis response, in order, with what each
/// must contain.
pub const RESPONSE_SECTIONS: [(&str, &str); 5] = [
    ("Summary", "One paragraph explaining why the code exists."),
    ("Confidence", "A single percentage, e.g. `Confidence: 80%`."),
    ("Findings", "The detailed narrative, citing evidence."),
    ("Sources", "One bullet per cited commit, PR, or issue."),
    (
        "Recommendation",
        "One of keep, document, refactor, remove, or investigate, with the reason.",
    ),
];

/// Truncate to at most `max_chars` characters, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n[... truncated {} chars]", kept, total - max_chars)
}

fn write_thread(out: &mut String, label: &str, comments: &[Comment], config: &InvestigationConfig) {
    if comments.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", label);
    for c in comments.iter().take(config.comments_per_thread) {
        let body = truncate(c.body.trim(), config.comment_char_budget);
        let _ = writeln!(
            out,
            "- @{} ({}): {}",
            c.author,
            c.created_at.format("%Y-%m-%d"),
            body.replace('\n', "\n  ")
        );
    }
    if comments.len() > config.comments_per_thread {
        let _ = writeln!(
            out,
            "- ... {} more comments omitted",
            comments.len() - config.comments_per_thread
        );
    }
}

/// Render every evidence item of the case as prompt text.
pub fn render_evidence(case: &Case, config: &InvestigationConfig) -> String {
    let mut out = String::new();

    if case.evidence().is_empty() {
        out.push_str("No version-control or code-host evidence could be gathered.\n");
    }

    for (i, evidence) in case.evidence().iter().enumerate() {
        let _ = writeln!(out, "### Evidence {} ({})", i + 1, evidence.kind());
        match &evidence.data {
            EvidenceData::Blame(b) => {
                let _ = writeln!(
                    out,
                    "Line {} last changed in commit {} by {} <{}> on {}",
                    b.line,
                    b.commit_hash,
                    b.author,
                    b.author_email,
                    b.timestamp.format("%Y-%m-%d")
                );
                let _ = writeln!(out, "Line content: {}", b.line_content.trim());
            }
            EvidenceData::Commit(c) => {
                let _ = writeln!(
                    out,
                    "Commit {} by {} on {}",
                    c.hash,
                    c.author,
                    c.date.format("%Y-%m-%d")
                );
                let _ = writeln!(out, "Message:\n{}", c.message.trim());
                if !c.changed_files.is_empty() {
                    let _ = writeln!(out, "Changed files: {}", c.changed_files.join(", "));
                }
                if !c.diff.is_empty() {
                    let _ = writeln!(
                        out,
                        "Diff:\n```diff\n{}\n```",
                        truncate(&c.diff, config.diff_char_budget)
                    );
                }
            }
            EvidenceData::PullRequest(pr) => {
                let _ = writeln!(
                    out,
                    "Pull request #{} \"{}\" by @{} ({}), opened {}",
                    pr.number,
                    pr.title,
                    pr.author,
                    pr.state,
                    pr.created_at.format("%Y-%m-%d")
                );
                if let Some(merged) = pr.merged_at {
                    let _ = writeln!(out, "Merged {}", merged.format("%Y-%m-%d"));
                }
                let _ = writeln!(out, "URL: {}", pr.url);
                if !pr.body.trim().is_empty() {
                    let _ = writeln!(
                        out,
                        "Description:\n{}",
                        truncate(pr.body.trim(), config.diff_char_budget / 2)
                    );
                }
                write_thread(&mut out, "Comments", &pr.comments, config);
                for r in pr.reviews.iter().take(config.comments_per_thread) {
                    let _ = writeln!(
                        out,
                        "- review by @{}: {} {}",
                        r.author,
                        r.state,
                        truncate(r.body.trim(), config.comment_char_budget)
                    );
                }
            }
            EvidenceData::Issue(issue) => {
                let _ = writeln!(
                    out,
                    "Issue #{} \"{}\" by @{} ({}), opened {}",
                    issue.number,
                    issue.title,
                    issue.author,
                    issue.state,
                    issue.created_at.format("%Y-%m-%d")
                );
                if !issue.labels.is_empty() {
                    let _ = writeln!(out, "Labels: {}", issue.labels.join(", "));
                }
                let _ = writeln!(out, "URL: {}", issue.url);
                if !issue.body.trim().is_empty() {
                    let _ = writeln!(
                        out,
                        "Description:\n{}",
                        truncate(issue.body.trim(), config.diff_char_budget / 2)
                    );
                }
                write_thread(&mut out, "Comments", &issue.comments, config);
            }
            EvidenceData::FileHistory { commits } => {
                let _ = writeln!(out, "Recent commits touching this file:");
                for c in commits {
                    let _ = writeln!(
                        out,
                        "- {} {} ({}, {})",
                        &c.hash[..c.hash.len().min(10)],
                        c.subject(),
                        c.author,
                        c.date.format("%Y-%m-%d")
                    );
                }
            }
        }
        out.push('\n');
    }

    out
}

/// Build the main synthesis prompt for a case.
pub fn build_synthesis_prompt(
    case: &Case,
    config: &InvestigationConfig,
    extra_context: Option<&str>,
) -> String {
    let sel = &case.selection;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are a software archaeologist. Explain why the following code exists, \
         using only the evidence provided. Cite commits by hash, pull requests as \
         \"PR #N\" and issues as \"issue #N\"."
    );
    let _ = writeln!(prompt, "\n## Code ({})\n```\n{}\n```", sel.location(), sel.text);
    let _ = writeln!(prompt, "\n## Evidence\n{}", render_evidence(case, config));

    if let Some(extra) = extra_context.filter(|e| !e.trim().is_empty()) {
        let _ = writeln!(prompt, "## Additional context\n{}\n", extra.trim());
    }

    prompt.push_str("## Response format\nRespond in Markdown with exactly these sections:\n");
    for (heading, instruction) in RESPONSE_SECTIONS {
        let _ = writeln!(prompt, "## {}\n{}", heading, instruction);
    }

    prompt
}

/// Ask the model to audit its own narrative.
pub fn build_critique_prompt(narrative: &str) -> String {
    format!(
        "Review the following explanation of why some code exists. Count:\n\
         - claims not supported by a cited commit, pull request, or issue\n\
         - logical inconsistencies\n\
         - speculation presented as fact\n\n\
         Reply with exactly three lines:\n\
         UNSUPPORTED_CLAIMS: <n>\nINCONSISTENCIES: <n>\nSPECULATION: <n>\n\n\
         ---\n{}\n---",
        narrative.trim()
    )
}

/// Ask the model to merge per-file summaries into one explanation.
pub fn build_unification_prompt(root: &str, summaries: &[(String, String)]) -> String {
    let mut prompt = format!(
        "The file {} was investigated together with the files it depends on. \
         Combine the per-file findings below into one coherent explanation of \
         why {} exists and how it relates to its dependencies. Do not invent \
         facts that are not in the findings.\n\n",
        root, root
    );
    for (path, summary) in summaries {
        let _ = writeln!(prompt, "### {}\n{}\n", path, summary.trim());
    }
    prompt
}
