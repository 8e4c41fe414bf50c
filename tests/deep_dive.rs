//! Deep dives over a small on-disk TypeScript project.

mod common;

use code_sleuth::deep_dive::discover_dependencies;
use code_sleuth::error::InvestigationError;
use code_sleuth::models::{CodeSelection, DeepDiveOptions, ReferenceKind};
use code_sleuth::orchestrator::Investigator;
use code_sleuth::progress::Phase;
use common::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const MAIN: &str = "import { lanes } from './lanes';
import helper from './util/helper';

export function runJob(id: number) {
  const slot = lanes.acquire(id);
  return helper(slot);
}
";

const LANES: &str = "import { queue } from './queue';

export const lanes = {
  acquire(id: number) {
    return queue[id];
  },
};
";

const HELPER: &str = "import { format } from './format';

export default function helper(x: unknown) {
  return format(x);
}
";

const FORMAT: &str = "export function format(x: unknown) {
  return String(x);
}
";

const QUEUE: &str = "export const queue: number[] = [];
";

const SUMMARY: &str = "## Summary
Keeps lane access serialized.
";

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "src/main.ts", MAIN);
    write(tmp.path(), "src/lanes.ts", LANES);
    write(tmp.path(), "src/util/helper.ts", HELPER);
    write(tmp.path(), "src/queue.ts", QUEUE);
    write(tmp.path(), "src/util/format.ts", FORMAT);
    tmp
}

fn selection(root: &Path) -> CodeSelection {
    let text: Vec<&str> = MAIN.lines().skip(3).take(4).collect();
    CodeSelection::new(text.join("\n"), "src/main.ts", 4, 7, root)
}

fn options(max_depth: usize, max_files: usize) -> DeepDiveOptions {
    DeepDiveOptions {
        max_depth,
        max_files,
        scan_references: false,
        verify: false,
    }
}

fn reasoning() -> Arc<ScriptedReasoning> {
    Arc::new(ScriptedReasoning::new(SUMMARY))
}

fn without_history(reasoning: &Arc<ScriptedReasoning>) -> Investigator {
    investigator(
        FakeHistory::default(),
        FakeCodeHost::default(),
        reasoning.clone(),
    )
}

#[tokio::test]
async fn depth_one_investigates_direct_imports_and_unifies() {
    let tmp = project();
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let result = investigator
        .deep_dive(selection(tmp.path()), options(1, 5))
        .await
        .unwrap();

    let tree = &result.dependency_tree;
    assert_eq!(tree.children.len(), 2);
    assert!(tree.children.iter().all(|c| c.children.is_empty()));
    assert!(tree.investigated);
    assert!(tree.children.iter().all(|c| c.investigated));
    assert_eq!(result.files_discovered, 2);
    assert_eq!(result.files_investigated, 3);

    let related: Vec<_> = result.related_investigations.keys().cloned().collect();
    assert_eq!(related, vec!["src/lanes.ts", "src/util/helper.ts"]);

    // main + two related + unification
    assert_eq!(reasoning.call_count(), 4);
    assert_eq!(result.trace.len(), 4);
    assert!(result
        .main_investigation
        .narrative
        .contains("## Cross-file synthesis"));
    assert!(result.verification_report.is_none());
    assert!(result.references.is_empty());

    let unification = reasoning.prompts().pop().unwrap();
    assert!(unification.contains("src/lanes.ts"));
    assert!(unification.contains("src/util/helper.ts"));
}

#[tokio::test]
async fn file_budget_includes_the_root() {
    let tmp = project();
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let result = investigator
        .deep_dive(selection(tmp.path()), options(2, 2))
        .await
        .unwrap();

    assert_eq!(result.files_discovered, 4);
    assert_eq!(result.files_investigated, 2);
    let related: Vec<_> = result.related_investigations.keys().cloned().collect();
    assert_eq!(related, vec!["src/lanes.ts"]);
    assert_eq!(reasoning.call_count(), 3);

    let lanes = result.dependency_tree.find(Path::new("src/lanes.ts")).unwrap();
    assert!(lanes.investigated);
    assert!(!lanes.children[0].investigated);
}

#[tokio::test]
async fn single_file_budget_skips_expansion_and_unification() {
    let tmp = project();
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let result = investigator
        .deep_dive(selection(tmp.path()), options(2, 1))
        .await
        .unwrap();

    assert_eq!(result.files_investigated, 1);
    assert!(result.related_investigations.is_empty());
    assert_eq!(reasoning.call_count(), 1);
    assert!(!result
        .main_investigation
        .narrative
        .contains("Cross-file synthesis"));
}

#[tokio::test]
async fn import_cycles_are_visited_once() {
    let tmp = project();
    write(
        tmp.path(),
        "src/queue.ts",
        "import { lanes } from './lanes';\nimport './main';\nexport const queue: number[] = [];\n",
    );
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let result = investigator
        .deep_dive(selection(tmp.path()), options(5, 10))
        .await
        .unwrap();

    assert_eq!(result.dependency_tree.node_count(), 5);
    assert_eq!(result.files_investigated, 5);
    assert_eq!(result.related_investigations.len(), 4);
    assert_eq!(reasoning.call_count(), 6);
}

#[tokio::test]
async fn reference_scan_feeds_prompt_and_narrative() {
    let tmp = project();
    write(
        tmp.path(),
        "src/worker.ts",
        "import { runJob } from './main';\n\nrunJob(1);\n",
    );
    write(
        tmp.path(),
        "node_modules/pkg/index.js",
        "const { runJob } = require('../../src/main');\n",
    );
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let mut opts = options(1, 1);
    opts.scan_references = true;
    let result = investigator
        .deep_dive(selection(tmp.path()), opts)
        .await
        .unwrap();

    let worker: Vec<_> = result
        .references
        .iter()
        .filter(|r| r.identifier == "runJob")
        .collect();
    assert_eq!(worker.len(), 2);
    assert!(worker.iter().all(|r| r.path == PathBuf::from("src/worker.ts")));
    assert_eq!(worker[0].kind, ReferenceKind::Import);
    assert_eq!(worker[1].kind, ReferenceKind::Call);

    assert!(reasoning.prompts()[0].contains("Usage across the codebase"));
    assert!(result
        .main_investigation
        .narrative
        .contains("## Codebase usage"));
}

#[tokio::test]
async fn verification_runs_on_the_main_investigation() {
    let tmp = project();
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let mut opts = options(1, 1);
    opts.verify = true;
    let result = investigator
        .deep_dive(selection(tmp.path()), opts)
        .await
        .unwrap();

    let report = result.verification_report.unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(report.original_confidence, result.main_investigation.confidence);
    // synthesis + critique
    assert_eq!(reasoning.call_count(), 2);
    assert_eq!(result.trace.len(), 2);
}

#[tokio::test]
async fn progress_climbs_once_to_completion() {
    let tmp = project();
    let reasoning = reasoning();
    let progress = Arc::new(RecordingProgress::default());
    let investigator = without_history(&reasoning).with_progress(progress.clone());

    let mut opts = options(2, 4);
    opts.verify = true;
    investigator
        .deep_dive(selection(tmp.path()), opts)
        .await
        .unwrap();

    let events = progress.events.lock().unwrap();
    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert!(
        percents.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {:?}",
        percents
    );

    let completions = events.iter().filter(|e| e.phase == Phase::Complete).count();
    assert_eq!(completions, 1);
    let last = events.last().unwrap();
    assert_eq!(last.phase, Phase::Complete);
    assert_eq!(last.percent, 100);

    let expansions = events.iter().filter(|e| e.phase == Phase::Expansion).count();
    assert_eq!(expansions, 3);
    assert!(events.iter().any(|e| e.phase == Phase::Unification));
    assert!(events.iter().any(|e| e.phase == Phase::Verification));
}

#[tokio::test]
async fn missing_root_file_fails_before_any_reasoning() {
    let tmp = project();
    let reasoning = reasoning();
    let investigator = without_history(&reasoning);

    let selection = CodeSelection::new("x", "src/gone.ts", 1, 1, tmp.path());
    let err = investigator
        .deep_dive(selection, options(2, 5))
        .await
        .unwrap_err();

    assert!(matches!(err, InvestigationError::Io { .. }));
    assert_eq!(reasoning.call_count(), 0);
}

#[test]
fn deeper_discovery_reaches_transitive_imports() {
    let tmp = project();
    let tree = discover_dependencies(tmp.path(), Path::new("src/main.ts"), 2).unwrap();
    assert_eq!(tree.depth(), 2);
    assert!(tree.find(Path::new("src/queue.ts")).is_some());
    let helper = tree.find(Path::new("src/util/helper.ts")).unwrap();
    assert_eq!(helper.children[0].path, PathBuf::from("src/util/format.ts"));
}
