//! # Code Sleuth CLI (`sleuth`)
//!
//! Asks why a range of lines exists and prints the answer as Markdown or
//! JSON.
//!
//! ## Usage
//!
//! ```bash
//! sleuth --config ./config/sleuth.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sleuth investigate <file> --lines A-B` | Investigate one selection |
//! | `sleuth deep-dive <file> --lines A-B` | Investigate a selection and the files it imports |
//! | `sleuth deps <file>` | Print the dependency tree without calling any service |
//!
//! ## Examples
//!
//! ```bash
//! # Explain a block, verifying citations afterwards
//! sleuth investigate src/scheduler.ts --lines 40-52 --verify
//!
//! # JSON output for scripts, with progress as JSON lines on stderr
//! sleuth investigate src/scheduler.ts --lines 40-52 --format json --progress json
//!
//! # Follow imports two levels deep, investigating at most 4 files
//! sleuth deep-dive src/scheduler.ts --lines 40-52 --max-depth 2 --max-files 4
//! ```
//!
//! Logging goes to stderr and honors `RUST_LOG` (default `warn`).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use code_sleuth::code_host::GitHubClient;
use code_sleuth::config::{load_config, Config};
use code_sleuth::deep_dive::discover_dependencies;
use code_sleuth::export::{
    render_deep_dive_markdown, render_markdown, render_tree, render_verification, to_json,
    write_output, Format,
};
use code_sleuth::history::{discover_repo_root, GitCli};
use code_sleuth::models::{
    CodeSelection, DeepDiveOptions, InvestigationResult, ReasoningTrace, RepoSlug,
    ThinkingEffort, VerificationReport,
};
use code_sleuth::orchestrator::Investigator;
use code_sleuth::progress::ProgressMode;
use code_sleuth::reasoning::create_reasoning_service;

/// Code Sleuth: find out why a piece of code exists.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "sleuth",
    about = "Code Sleuth: explains why a piece of code exists from its git and code-host history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sleuth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate why a range of lines exists.
    Investigate {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Re-check citations and adjust confidence afterwards.
        #[arg(long)]
        verify: bool,
    },

    /// Investigate a range of lines together with the files it imports.
    DeepDive {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Import levels to follow below the file (default from config).
        #[arg(long)]
        max_depth: Option<usize>,

        /// Files to investigate, including the root (default from config).
        #[arg(long)]
        max_files: Option<usize>,

        /// Skip the codebase-wide reference scan.
        #[arg(long)]
        no_references: bool,

        /// Skip verification of the main investigation.
        #[arg(long)]
        no_verify: bool,
    },

    /// Print the dependency tree of a file.
    Deps {
        file: PathBuf,

        /// Repository root. Discovered with `git rev-parse` when omitted.
        #[arg(long)]
        repo: Option<PathBuf>,

        #[arg(long)]
        max_depth: Option<usize>,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// File containing the code.
    file: PathBuf,

    /// Line range, e.g. `40-52` or `40`.
    #[arg(long)]
    lines: String,

    /// Repository root. Discovered with `git rev-parse` when omitted.
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Code-host repository as `owner/repo`, overriding the git remote.
    #[arg(long)]
    repository: Option<String>,
}

#[derive(Args)]
struct OutputArgs {
    /// Output format: `md` or `json`.
    #[arg(long, default_value = "md")]
    format: String,

    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Thinking effort: `low`, `medium` or `high` (default from config).
    #[arg(long)]
    effort: Option<String>,

    /// Progress on stderr: `off`, `human` or `json`. Defaults to `human` on a TTY.
    #[arg(long)]
    progress: Option<String>,
}

fn parse_lines(value: &str) -> Result<(usize, usize)> {
    let (start, end) = match value.split_once('-') {
        Some((a, b)) => (a.trim().parse::<usize>()?, b.trim().parse::<usize>()?),
        None => {
            let line = value.trim().parse::<usize>()?;
            (line, line)
        }
    };
    if start == 0 || end < start {
        bail!("invalid line range '{}': expected START-END with 1 <= START <= END", value);
    }
    Ok((start, end))
}

fn resolve_repo(file: &Path, repo: Option<&Path>) -> Result<(PathBuf, PathBuf)> {
    let file = file
        .canonicalize()
        .with_context(|| format!("cannot open {}", file.display()))?;
    let root = match repo {
        Some(root) => root.to_path_buf(),
        None => discover_repo_root(&file)?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot open repository root {}", root.display()))?;
    let relative = file
        .strip_prefix(&root)
        .with_context(|| {
            format!(
                "{} is outside the repository {}",
                file.display(),
                root.display()
            )
        })?
        .to_path_buf();
    Ok((root, relative))
}

fn load_selection(target: &TargetArgs) -> Result<CodeSelection> {
    let (start, end) = parse_lines(&target.lines)?;
    let (root, relative) = resolve_repo(&target.file, target.repo.as_deref())?;
    let text = std::fs::read_to_string(root.join(&relative))
        .with_context(|| format!("cannot read {}", relative.display()))?;

    let lines: Vec<&str> = text.lines().collect();
    if start > lines.len() {
        bail!(
            "{} has {} lines; range {} starts past the end",
            relative.display(),
            lines.len(),
            target.lines
        );
    }
    let end = end.min(lines.len());
    let snippet = lines[start - 1..end].join("\n");

    let mut selection = CodeSelection::new(snippet, relative, start, end, root);
    if let Some(repository) = &target.repository {
        selection = selection.with_repository(
            repository
                .parse::<RepoSlug>()
                .map_err(anyhow::Error::msg)?,
        );
    }
    Ok(selection)
}

fn build_investigator(
    mut cfg: Config,
    repo_root: &Path,
    output: &OutputArgs,
) -> Result<Investigator> {
    if let Some(effort) = &output.effort {
        cfg.reasoning.effort = effort
            .parse::<ThinkingEffort>()
            .map_err(anyhow::Error::msg)?;
    }
    let progress = match &output.progress {
        Some(mode) => ProgressMode::parse(mode)
            .with_context(|| format!("unknown progress mode '{}'", mode))?,
        None => ProgressMode::default_for_tty(),
    };

    let history = Arc::new(GitCli::new(repo_root));
    let code_host = Arc::new(GitHubClient::new(
        &cfg.code_host,
        cfg.investigation.comments_per_thread,
    )?);
    let reasoning = create_reasoning_service(&cfg.reasoning)?;

    Ok(Investigator::new(history, code_host, reasoning, cfg)
        .with_progress(Arc::from(progress.reporter())))
}

fn output_format(output: &OutputArgs) -> Result<Format> {
    Format::parse(&output.format)
        .with_context(|| format!("unknown format '{}': expected md or json", output.format))
}

#[derive(Serialize)]
struct VerifiedInvestigation<'a> {
    investigation: &'a InvestigationResult,
    verification: &'a VerificationReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::minimal()
    };

    match cli.command {
        Commands::Investigate {
            target,
            output,
            verify,
        } => {
            let format = output_format(&output)?;
            let selection = load_selection(&target)?;
            let investigator = build_investigator(cfg, &selection.repo_root, &output)?;

            let mut trace = ReasoningTrace::new();
            let result = investigator
                .investigate_with(selection, None, &mut trace)
                .await?;
            let report = if verify {
                Some(investigator.verify(&result, &mut trace).await)
            } else {
                None
            };

            let rendered = match (format, &report) {
                (Format::Json, Some(report)) => to_json(&VerifiedInvestigation {
                    investigation: &result,
                    verification: report,
                })?,
                (Format::Json, None) => to_json(&result)?,
                (Format::Markdown, Some(report)) => format!(
                    "{}\n## Verification\n\n{}",
                    render_markdown(&result),
                    render_verification(report)
                ),
                (Format::Markdown, None) => render_markdown(&result),
            };
            write_output(output.output.as_deref(), &rendered)?;
        }
        Commands::DeepDive {
            target,
            output,
            max_depth,
            max_files,
            no_references,
            no_verify,
        } => {
            let format = output_format(&output)?;
            let selection = load_selection(&target)?;
            let options = DeepDiveOptions {
                max_depth: max_depth.unwrap_or(cfg.deep_dive.max_depth),
                max_files: max_files.unwrap_or(cfg.deep_dive.max_files),
                scan_references: cfg.deep_dive.scan_references && !no_references,
                verify: cfg.verification.enabled && !no_verify,
            };
            if options.max_depth == 0 || options.max_files == 0 {
                bail!("--max-depth and --max-files must be at least 1");
            }
            let investigator = build_investigator(cfg, &selection.repo_root, &output)?;

            let result = investigator.deep_dive(selection, options).await?;
            let rendered = match format {
                Format::Json => to_json(&result)?,
                Format::Markdown => render_deep_dive_markdown(&result),
            };
            write_output(output.output.as_deref(), &rendered)?;
        }
        Commands::Deps {
            file,
            repo,
            max_depth,
        } => {
            let (root, relative) = resolve_repo(&file, repo.as_deref())?;
            let depth = max_depth.unwrap_or(cfg.deep_dive.max_depth);
            let tree = discover_dependencies(&root, &relative, depth)?;
            print!("{}", render_tree(&tree));
            eprintln!(
                "{} dependencies, depth {}",
                tree.node_count() - 1,
                tree.depth()
            );
        }
    }

    Ok(())
}
