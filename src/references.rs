//! Codebase-wide reference scan for the identifiers a selection declares.
//!
//! Identifiers are taken from declaration sites in the selected text
//! (functions, classes, exported constants, ...) and filtered to names longer
//! than two characters. The scan walks the repository with `walkdir`, skips
//! excluded directories via a `globset`, and classifies every hit by a local
//! pattern match on its line:
//!
//! | Kind         | Line looks like                          |
//! |--------------|------------------------------------------|
//! | `import`     | `import { x } from`, `require(`, `from . import x` |
//! | `extends`    | `class A extends x`                      |
//! | `implements` | `class A implements x`                   |
//! | `call`       | `x(` or `new x(`                         |
//! | `reference`  | anything else                            |
//!
//! This is a textual scan, not static analysis.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

use crate::models::{CodeReference, ReferenceKind};

const MAX_IDENTIFIERS: usize = 10;
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs", "go", "java", "kt", "rb", "cs", "c",
    "cc", "cpp", "h", "hpp", "swift", "vue", "svelte", "php", "scala",
];

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\b(?:function\*?|class|interface|type|enum|const|let|var|def|fn|struct|trait)\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});
static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:public|private|protected|static|async|readonly)\s+)*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::\s*[\w<>\[\]|, ]+)?\s*\{")
        .unwrap()
});
static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:import\b|from\s+\S+\s+import\b|export\s+(?:\{[^}]*\}|\*)\s+from\b)|\brequire\s*\(")
        .unwrap()
});

const KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "constructor", "else",
];

/// Declared names in `text`, in order of appearance.
pub fn extract_identifiers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    DECLARATION
        .captures_iter(text)
        .chain(METHOD.captures_iter(text))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| name.len() > 2 && !KEYWORDS.contains(&name.as_str()))
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_IDENTIFIERS)
        .collect()
}

/// Classify one line containing `identifier`.
pub fn classify_line(line: &str, identifier: &str) -> ReferenceKind {
    let ident = regex::escape(identifier);
    let matches = |pattern: String| Regex::new(&pattern).map(|r| r.is_match(line)).unwrap_or(false);

    if IMPORT_LINE.is_match(line) {
        ReferenceKind::Import
    } else if matches(format!(r"\bextends\s+(?:[\w$.]+\s*,\s*)*{}\b", ident)) {
        ReferenceKind::Extends
    } else if matches(format!(r"\bimplements\s+(?:[\w$.]+\s*,\s*)*{}\b", ident)) {
        ReferenceKind::Implements
    } else if matches(format!(r"(?:^|[^\w$]){}\s*(?:<[^>]*>)?\s*\(", ident)) {
        ReferenceKind::Call
    } else {
        ReferenceKind::Reference
    }
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Walk `root` for occurrences of `identifiers`, skipping `skip` (relative
/// to `root`) and anything matched by `exclude`. Results are ordered by path
/// then line and capped at `max_hits`.
pub fn scan_references(
    root: &Path,
    identifiers: &[String],
    skip: &Path,
    exclude: &GlobSet,
    max_hits: usize,
) -> Result<Vec<CodeReference>> {
    if identifiers.is_empty() || max_hits == 0 {
        return Ok(Vec::new());
    }
    let alternation = identifiers
        .iter()
        .map(|i| regex::escape(i))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&format!(r"(?:^|[^\w$])({})(?:[^\w$]|$)", alternation))?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if entry.file_type().is_dir() && !relative.as_os_str().is_empty() {
            // A directory is pruned when its contents would be excluded.
            return !exclude.is_match(relative.join("_"));
        }
        true
    });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_source_file(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        if relative == skip || exclude.is_match(&relative) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        files.push(relative);
    }
    // Sort for deterministic ordering
    files.sort();

    let mut hits = Vec::new();
    'files: for relative in files {
        let Ok(text) = std::fs::read_to_string(root.join(&relative)) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            let identifier = caps[1].to_string();
            hits.push(CodeReference {
                kind: classify_line(line, &identifier),
                identifier,
                path: relative.clone(),
                line: idx + 1,
                text: line.trim().chars().take(200).collect(),
            });
            if hits.len() >= max_hits {
                break 'files;
            }
        }
    }

    debug!(hits = hits.len(), identifiers = identifiers.len(), "reference scan finished");
    Ok(hits)
}

/// Usage summary appended to prompts and narratives.
pub fn summarize_references(references: &[CodeReference]) -> String {
    if references.is_empty() {
        return "No references to the selected identifiers were found elsewhere in the codebase."
            .to_string();
    }

    let mut by_identifier: BTreeMap<&str, (usize, HashSet<&Path>, BTreeMap<String, usize>)> =
        BTreeMap::new();
    for r in references {
        let entry = by_identifier.entry(r.identifier.as_str()).or_default();
        entry.0 += 1;
        entry.1.insert(r.path.as_path());
        *entry.2.entry(r.kind.to_string()).or_default() += 1;
    }

    let mut out = String::from("Usage across the codebase:\n");
    for (identifier, (count, files, kinds)) in &by_identifier {
        let kinds = kinds
            .iter()
            .map(|(k, n)| format!("{} {}", n, k))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "- `{}`: {} reference(s) in {} file(s) ({})",
            identifier,
            count,
            files.len(),
            kinds
        );
    }
    for r in references.iter().take(10) {
        let _ = writeln!(out, "  {}:{} [{}] {}", r.path.display(), r.line, r.kind, r.text);
    }
    out
}
