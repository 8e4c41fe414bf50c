//! Render investigation results as Markdown or JSON.
//!
//! Markdown output is a pure function of the result. Sections always appear
//! in the same order: summary, narrative, timeline table, sources,
//! recommendations. Deep-dive output wraps the main investigation with the
//! dependency tree, per-file summaries and the verification table.

use anyhow::Result;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

use crate::gather::short_hash;
use crate::models::{
    confidence_label, DeepDiveResult, DependencyNode, InvestigationResult, SourceKind,
    VerificationReport,
};

/// Output format of `sleuth investigate` and `sleuth deep-dive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Markdown,
    Json,
}

impl Format {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Format::Markdown),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(result: &InvestigationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Why does `{}` exist?\n", result.selection.location());
    let _ = writeln!(
        out,
        "**Confidence:** {}% ({})\n",
        result.confidence,
        confidence_label(result.confidence)
    );
    write_body(&mut out, result, "##");
    out
}

fn write_body(out: &mut String, result: &InvestigationResult, h: &str) {
    let _ = writeln!(out, "{} Summary\n\n{}\n", h, result.summary.trim());
    let _ = writeln!(out, "{} Narrative\n\n{}\n", h, result.narrative.trim());

    let _ = writeln!(out, "{} Timeline\n", h);
    if result.timeline.is_empty() {
        out.push_str("_No dated events._\n\n");
    } else {
        out.push_str("| Date | Event | Details |\n|------|-------|---------|\n");
        for event in &result.timeline {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                event.date.format("%Y-%m-%d"),
                cell(&event.title),
                cell(&event.description)
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{} Sources\n", h);
    if result.sources.is_empty() {
        out.push_str("_No citations could be matched to gathered evidence._\n\n");
    } else {
        for source in &result.sources {
            let label = match source.kind {
                SourceKind::Commit => format!("commit `{}`", short_hash(&source.identifier)),
                _ => format!("{} #{}", source.kind, source.identifier),
            };
            match &source.url {
                Some(url) => {
                    let _ = writeln!(out, "- [{}]({}): {}", label, url, source.description);
                }
                None => {
                    let _ = writeln!(out, "- {}: {}", label, source.description);
                }
            }
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{} Recommendations\n", h);
    if result.recommendations.is_empty() {
        out.push_str("_None._\n");
    } else {
        for rec in &result.recommendations {
            let _ = writeln!(
                out,
                "- **{}** ({} priority): {}",
                rec.action, rec.priority, rec.reason
            );
        }
    }

    if !result.evidence_gaps.is_empty() {
        let _ = writeln!(out, "\n{} Evidence gaps\n", h);
        for gap in &result.evidence_gaps {
            let _ = writeln!(out, "- {}: {}", gap.step, gap.reason);
        }
    }
}

fn write_tree(out: &mut String, tree: &DependencyNode) {
    let mut stack = vec![(tree, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let mark = if node.investigated { "x" } else { " " };
        let _ = writeln!(
            out,
            "{}- [{}] `{}` ({})",
            "  ".repeat(depth),
            mark,
            node.path.display(),
            node.relation
        );
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
}

/// Verification summary and per-citation table.
pub fn render_verification(report: &VerificationReport) -> String {
    let mut out = String::new();
    write_verification(&mut out, report);
    out
}

/// Text rendering of a dependency tree, as printed by `sleuth deps`.
pub fn render_tree(tree: &DependencyNode) -> String {
    let mut out = String::new();
    write_tree(&mut out, tree);
    out
}

fn write_verification(out: &mut String, report: &VerificationReport) {
    let _ = writeln!(
        out,
        "{} of {} citations verified. Confidence {}% → {}% after ratio scaling → {}% final.\n",
        report.verified,
        report.total(),
        report.original_confidence,
        report.ratio_confidence,
        report.confidence
    );
    if let Some(issues) = report.critique_issues {
        let _ = writeln!(out, "Self-critique found {} issue(s).\n", issues);
    }
    if !report.outcomes.is_empty() {
        out.push_str("| Citation | Verified | Note |\n|----------|----------|------|\n");
        for outcome in &report.outcomes {
            let _ = writeln!(
                out,
                "| {} {} | {} | {} |",
                outcome.source.kind,
                cell(&outcome.source.identifier),
                if outcome.verified { "yes" } else { "no" },
                cell(&outcome.note)
            );
        }
        out.push('\n');
    }
}

pub fn render_deep_dive_markdown(result: &DeepDiveResult) -> String {
    let main = &result.main_investigation;
    let mut out = String::new();
    let _ = writeln!(out, "# Deep dive: `{}`\n", main.selection.location());
    let _ = writeln!(
        out,
        "**Confidence:** {}% ({}) · {} of {} files investigated · {} ms\n",
        main.confidence,
        confidence_label(main.confidence),
        result.files_investigated,
        result.files_discovered + 1,
        result.duration_ms
    );

    write_body(&mut out, main, "##");

    out.push_str("\n## Dependency tree\n\n");
    write_tree(&mut out, &result.dependency_tree);

    if !result.related_investigations.is_empty() {
        out.push_str("\n## Related files\n\n");
        for (path, related) in &result.related_investigations {
            let _ = writeln!(
                out,
                "### `{}` ({}%)\n\n{}\n",
                path,
                related.confidence,
                related.summary.trim()
            );
        }
    }

    if let Some(report) = &result.verification_report {
        out.push_str("\n## Verification\n\n");
        write_verification(&mut out, report);
    }
    out
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Write `content` to `output`, creating parent directories, or to stdout.
pub fn write_output(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
