//! Autonomous expansion of an investigation across a file's dependencies.
//!
//! # Phases
//!
//! 1. **Discovery**: scan the root file for relative imports, resolve each
//!    to a file on disk and build a [`DependencyNode`] tree, breadth-first,
//!    up to `max_depth` levels below the root. A file already in the tree is
//!    never added again.
//! 2. **References** (optional): scan the repository for uses of the
//!    identifiers declared in the selection; the usage summary becomes
//!    extra prompt context and is appended to the main narrative.
//! 3. **Main investigation** of the selection itself.
//! 4. **Expansion**: walk the tree in pre-order and investigate a
//!    representative excerpt of each file. The file budget is decremented
//!    before each sub-investigation and the walk stops when it reaches zero.
//! 5. **Unification**: when more than one file was investigated, the
//!    per-file summaries are merged by the reasoning service.
//! 6. **Verification** of the main investigation (optional).
//!
//! All phases run sequentially. Every reasoning call of every
//! sub-investigation appends to one shared [`ReasoningTrace`].
//!
//! Import resolution is textual:
//!
//! | Syntax                                   | Relation |
//! |------------------------------------------|----------|
//! | `import x from './a'`, `import './a'`    | import   |
//! | `require('./a')`, `import('./a')`        | import   |
//! | `export * from './a'`, `export {x} from` | export   |
//! | `from .a import x` (Python)              | import   |
//!
//! Only relative specifiers are followed. A specifier resolves to the first
//! existing candidate among the path itself, the path with one of
//! [`EXTENSIONS`] appended, and the [`INDEX_FILES`] inside it.

use anyhow::Context;
use regex::Regex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::InvestigationError;
use crate::models::{
    CodeReference, CodeSelection, DeepDiveOptions, DeepDiveResult, DependencyNode,
    InvestigationResult, ReasoningTrace, RelationType,
};
use crate::orchestrator::Investigator;
use crate::progress::{Phase, ProgressEvent, ScaledProgress};
use crate::prompt::build_unification_prompt;
use crate::reasoning::{generate_with_retry, RetryPolicy};
use crate::references::{
    build_globset, extract_identifiers, scan_references, summarize_references,
};
use crate::traits::ReasoningRequest;

pub const EXTENSIONS: &[&str] = &["", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".py"];
pub const INDEX_FILES: &[&str] = &[
    "index.ts",
    "index.tsx",
    "index.js",
    "index.jsx",
    "__init__.py",
];

/// Lines of a representative excerpt.
const EXCERPT_LINES: usize = 15;

/// Progress slice of the main investigation.
const MAIN_PROGRESS: (u8, u8) = (5, 40);
/// Progress slice shared by the related investigations.
const EXPANSION_PROGRESS: (u8, u8) = (40, 90);

static IMPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:type\s+)?(?:[\w$*{}\s,]+?\s+from\s+)?['"]([^'"]+)['"]"#)
        .unwrap()
});
static EXPORT_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*export\s+(?:type\s+)?(?:\*(?:\s+as\s+\w+)?|\{[^}]*\})\s*from\s+['"]([^'"]+)['"]"#)
        .unwrap()
});
static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});
static PY_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+(\.+)([\w.]*)\s+import\b").unwrap());
static DECLARATION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:pub(?:\([\w:]+\))?\s+)?(?:function|class|interface|type|enum|const|let|var|def|fn|struct|trait|impl)\b",
    )
    .unwrap()
});

// ============ Discovery ============

/// A relative import found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub specifier: String,
    pub relation: RelationType,
    /// Python relative imports resolve differently from JS paths.
    pub python: bool,
}

/// Relative imports in `text`, in order of appearance, de-duplicated.
pub fn find_imports(text: &str) -> Vec<ImportSpec> {
    let mut found: Vec<(usize, ImportSpec)> = Vec::new();
    let mut push = |pos: usize, specifier: String, relation: RelationType, python: bool| {
        if specifier.starts_with('.') {
            found.push((
                pos,
                ImportSpec {
                    specifier,
                    relation,
                    python,
                },
            ));
        }
    };

    for caps in IMPORT_FROM.captures_iter(text) {
        let m = &caps[1];
        push(caps.get(0).map_or(0, |c| c.start()), m.to_string(), RelationType::Import, false);
    }
    for caps in EXPORT_FROM.captures_iter(text) {
        push(
            caps.get(0).map_or(0, |c| c.start()),
            caps[1].to_string(),
            RelationType::Export,
            false,
        );
    }
    for caps in REQUIRE.captures_iter(text) {
        push(
            caps.get(0).map_or(0, |c| c.start()),
            caps[1].to_string(),
            RelationType::Import,
            false,
        );
    }
    for caps in PY_FROM.captures_iter(text) {
        push(
            caps.get(0).map_or(0, |c| c.start()),
            format!("{}{}", &caps[1], &caps[2]),
            RelationType::Import,
            true,
        );
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, spec)| spec)
        .filter(|spec| seen.insert(spec.specifier.clone()))
        .collect()
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve an import made by `from_file` (relative to `repo_root`) to an
/// existing file, also relative to `repo_root`.
pub fn resolve_import(repo_root: &Path, from_file: &Path, spec: &ImportSpec) -> Option<PathBuf> {
    let dir = from_file.parent().unwrap_or(Path::new(""));

    let base = if spec.python {
        let dots = spec.specifier.chars().take_while(|c| *c == '.').count();
        let module = &spec.specifier[dots..];
        if module.is_empty() {
            return None;
        }
        let mut base = dir.to_path_buf();
        for _ in 1..dots {
            base.push("..");
        }
        for part in module.split('.') {
            base.push(part);
        }
        base
    } else {
        dir.join(&spec.specifier)
    };
    let base = normalize(&base);
    if base.as_os_str().is_empty() || base.starts_with("..") {
        return None;
    }

    let with_extensions = EXTENSIONS.iter().map(|ext| {
        let mut candidate = base.clone().into_os_string();
        candidate.push(ext);
        PathBuf::from(candidate)
    });
    let index_files = INDEX_FILES.iter().map(|index| base.join(index));

    with_extensions
        .chain(index_files)
        .find(|candidate| repo_root.join(candidate).is_file())
}

struct ArenaNode {
    path: PathBuf,
    relation: RelationType,
    children: Vec<usize>,
}

/// Build the dependency tree of `root_file` down to `max_depth` levels.
///
/// Fails only when the root file itself cannot be read; unreadable
/// dependencies become leaves.
pub fn discover_dependencies(
    repo_root: &Path,
    root_file: &Path,
    max_depth: usize,
) -> Result<DependencyNode, InvestigationError> {
    let root_abs = repo_root.join(root_file);
    let root_text = std::fs::read_to_string(&root_abs).map_err(|source| InvestigationError::Io {
        path: root_abs.display().to_string(),
        source,
    })?;

    let mut arena = vec![ArenaNode {
        path: root_file.to_path_buf(),
        relation: RelationType::Root,
        children: Vec::new(),
    }];
    let mut explored: HashSet<PathBuf> = HashSet::from([normalize(root_file)]);
    let mut worklist: VecDeque<(usize, usize, Option<String>)> =
        VecDeque::from([(0, 0, Some(root_text))]);

    while let Some((index, depth, text)) = worklist.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let path = arena[index].path.clone();
        let text = match text {
            Some(text) => text,
            None => match std::fs::read_to_string(repo_root.join(&path)) {
                Ok(text) => text,
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "dependency unreadable");
                    continue;
                }
            },
        };

        for spec in find_imports(&text) {
            let Some(resolved) = resolve_import(repo_root, &path, &spec) else {
                debug!(from = %path.display(), specifier = %spec.specifier, "unresolved import");
                continue;
            };
            if !explored.insert(resolved.clone()) {
                continue;
            }
            let child = arena.len();
            arena.push(ArenaNode {
                path: resolved,
                relation: spec.relation,
                children: Vec::new(),
            });
            arena[index].children.push(child);
            worklist.push_back((child, depth + 1, None));
        }
    }

    Ok(assemble(arena))
}

/// Turn the arena into an owned tree, children before parents.
fn assemble(arena: Vec<ArenaNode>) -> DependencyNode {
    let mut built: Vec<Option<DependencyNode>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);
    // Children always have larger indices than their parent.
    for (index, node) in arena.iter().enumerate().rev() {
        let mut tree = DependencyNode::new(node.path.clone(), node.relation);
        tree.children = node
            .children
            .iter()
            .filter_map(|c| built[*c].take())
            .collect();
        built[index] = Some(tree);
    }
    built
        .into_iter()
        .next()
        .flatten()
        .unwrap_or_else(|| DependencyNode::new(PathBuf::new(), RelationType::Root))
}

/// First top-level declaration of `text` with a few following lines, or the
/// start of the file. Returns `(excerpt, start_line, end_line)`.
pub fn representative_excerpt(text: &str) -> (String, usize, usize) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return (String::new(), 1, 1);
    }
    let start = lines
        .iter()
        .position(|l| DECLARATION_START.is_match(l))
        .unwrap_or(0);
    let end = (start + EXCERPT_LINES).min(lines.len());
    (lines[start..end].join("\n"), start + 1, end)
}

// ============ Orchestration ============

impl Investigator {
    /// Investigate `selection` together with the files it depends on.
    pub async fn deep_dive(
        &self,
        selection: CodeSelection,
        options: DeepDiveOptions,
    ) -> Result<DeepDiveResult, InvestigationError> {
        let started = Instant::now();
        let mut trace = ReasoningTrace::new();

        self.progress.report(ProgressEvent::new(
            Phase::Discovery,
            format!("discovering dependencies of {}", selection.file_path.display()),
            2,
        ));
        let mut tree = discover_dependencies(
            &selection.repo_root,
            &selection.file_path,
            options.max_depth,
        )?;
        let files_discovered = tree.node_count() - 1;
        info!(
            root = %selection.file_path.display(),
            files_discovered,
            depth = tree.depth(),
            "dependency discovery finished"
        );

        let (references, usage) = if options.scan_references {
            self.scan_usage(&selection).await
        } else {
            (Vec::new(), None)
        };

        let main_progress =
            ScaledProgress::new(self.progress.as_ref(), MAIN_PROGRESS.0, MAIN_PROGRESS.1);
        let mut main = self
            .investigate_reporting(
                selection.clone(),
                usage.as_deref(),
                &mut trace,
                &main_progress,
            )
            .await?;
        tree.investigated = true;

        let related = self
            .expand(&selection, &mut tree, options.max_files, &mut trace)
            .await;

        if let Some(usage) = &usage {
            main.narrative.push_str("\n\n## Codebase usage\n\n");
            main.narrative.push_str(usage.trim_end());
        }

        if !related.is_empty() {
            self.unify(&selection, &mut main, &related, &mut trace).await;
        }

        let verification_report = if options.verify {
            Some(self.verify(&main, &mut trace).await)
        } else {
            None
        };

        let files_investigated = 1 + related.len();
        self.progress.report(ProgressEvent::new(
            Phase::Complete,
            format!(
                "deep dive finished: {} of {} files investigated",
                files_investigated,
                files_discovered + 1
            ),
            100,
        ));

        Ok(DeepDiveResult {
            main_investigation: main,
            related_investigations: related,
            dependency_tree: tree,
            references,
            verification_report,
            trace,
            files_discovered,
            files_investigated,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn scan_usage(&self, selection: &CodeSelection) -> (Vec<CodeReference>, Option<String>) {
        let identifiers = extract_identifiers(&selection.text);
        if identifiers.is_empty() {
            debug!("no declared identifiers in selection, skipping reference scan");
            return (Vec::new(), None);
        }
        self.progress.report(ProgressEvent::new(
            Phase::References,
            format!("scanning codebase for {}", identifiers.join(", ")),
            5,
        ));

        let exclude_globs = self.config.deep_dive.exclude_globs.clone();
        let max_hits = self.config.deep_dive.max_reference_hits;
        let root = selection.repo_root.clone();
        let skip = selection.file_path.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let exclude = build_globset(&exclude_globs)?;
            scan_references(&root, &identifiers, &skip, &exclude, max_hits)
        })
        .await
        .context("reference scan task panicked");
        match scanned.and_then(|found| found) {
            Ok(references) => {
                let usage = summarize_references(&references);
                (references, Some(usage))
            }
            Err(err) => {
                warn!(error = %err, "reference scan failed");
                (Vec::new(), None)
            }
        }
    }

    async fn expand(
        &self,
        root: &CodeSelection,
        tree: &mut DependencyNode,
        max_files: usize,
        trace: &mut ReasoningTrace,
    ) -> BTreeMap<String, InvestigationResult> {
        let mut related = BTreeMap::new();
        let mut budget = max_files.saturating_sub(1);
        let mut visited: HashSet<PathBuf> = HashSet::from([tree.path.clone()]);
        let order = tree.descendants_preorder();
        let total = order.len().min(budget).max(1);
        let (low, high) = EXPANSION_PROGRESS;
        let span = usize::from(high - low);
        let mut attempted = 0;

        for path in order {
            if budget == 0 {
                debug!("file budget exhausted");
                break;
            }
            if !visited.insert(path.clone()) {
                continue;
            }
            budget -= 1;
            let band_start = low + (attempted * span / total) as u8;
            let band_end = low + ((attempted + 1) * span / total).min(span) as u8;
            attempted += 1;

            let text = match std::fs::read_to_string(root.repo_root.join(&path)) {
                Ok(text) => text,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "cannot read dependency");
                    continue;
                }
            };
            let (excerpt, start, end) = representative_excerpt(&text);
            let mut selection =
                CodeSelection::new(excerpt, path.clone(), start, end, root.repo_root.clone());
            selection.repository = root.repository.clone();

            self.progress.report(ProgressEvent::new(
                Phase::Expansion,
                format!("investigating {} ({}/{})", path.display(), attempted, total),
                band_start,
            ));
            let nested = ScaledProgress::new(self.progress.as_ref(), band_start, band_end);
            match self.investigate_reporting(selection, None, trace, &nested).await {
                Ok(result) => {
                    if let Some(node) = tree.find_mut(&path) {
                        node.investigated = true;
                    }
                    related.insert(path.display().to_string(), result);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "related investigation failed");
                }
            }
        }
        related
    }

    async fn unify(
        &self,
        root: &CodeSelection,
        main: &mut InvestigationResult,
        related: &BTreeMap<String, InvestigationResult>,
        trace: &mut ReasoningTrace,
    ) {
        self.progress.report(
            ProgressEvent::new(
                Phase::Unification,
                format!("unifying findings across {} files", related.len() + 1),
                91,
            )
            .thinking(self.config.reasoning.effort),
        );

        let root_path = root.file_path.display().to_string();
        let mut summaries = vec![(root_path.clone(), main.summary.clone())];
        summaries.extend(
            related
                .iter()
                .map(|(path, result)| (path.clone(), result.summary.clone())),
        );

        let request = ReasoningRequest {
            prompt: build_unification_prompt(&root_path, &summaries),
            effort: self.config.reasoning.effort,
            temperature: self.config.reasoning.temperature,
            context_token: trace.last().map(str::to_string),
        };
        let policy = RetryPolicy::from_config(&self.config.reasoning);
        match generate_with_retry(self.reasoning.as_ref(), &request, &policy).await {
            Ok(response) => {
                trace.push(response.continuation_token);
                main.narrative.push_str("\n\n## Cross-file synthesis\n\n");
                main.narrative.push_str(response.text.trim());
            }
            Err(err) => warn!(error = %err, "unification failed; keeping per-file findings"),
        }
    }
}
