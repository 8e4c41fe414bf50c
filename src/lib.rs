//! # Code Sleuth
//!
//! Explains *why* a piece of code exists by assembling evidence from git
//! history and the code host, then asking a reasoning model to synthesize a
//! narrative, a confidence score and recommendations.
//!
//! Every claim that reaches the structured output is attributable to
//! gathered evidence: citations the model invents stay in the narrative but
//! never become [`Source`](models::Source)s. Confidence reflects evidence
//! completeness and self-consistency, not ground truth.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ git (blame, │──▶│   Evidence   │──▶│  Synthesis  │──▶ InvestigationResult
//! │ show, log)  │   │   pipeline   │   │  + parsing  │          │
//! ├─────────────┤   │  (best-effort│   └──────┬──────┘          ▼
//! │ GitHub (PRs,│──▶│    steps)    │          │          ┌──────────────┐
//! │  issues)    │   └──────────────┘   reasoning model   │ verification │
//! └─────────────┘                                        └──────────────┘
//!
//!   deep dive: discovery ─▶ main investigation ─▶ expansion ─▶ unification
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sleuth investigate src/scheduler.ts --lines 40-52
//! sleuth investigate src/scheduler.ts --lines 40-52 --verify --format json
//! sleuth deep-dive src/scheduler.ts --lines 40-52 --max-depth 2 --max-files 5
//! sleuth deps src/scheduler.ts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Selection, evidence, case and result types |
//! | [`error`] | Error taxonomy |
//! | [`traits`] | History, code-host and reasoning collaborator traits |
//! | [`history`] | `git` CLI history provider |
//! | [`code_host`] | GitHub REST code-host provider |
//! | [`reasoning`] | Anthropic / OpenAI reasoning providers and retry policy |
//! | [`gather`] | Evidence-gathering pipeline |
//! | [`prompt`] | Synthesis, critique and unification prompts |
//! | [`parse`] | Layered extraction from model output |
//! | [`timeline`] | Deterministic timeline from evidence |
//! | [`orchestrator`] | The [`Investigator`](orchestrator::Investigator) |
//! | [`deep_dive`] | Dependency discovery and autonomous expansion |
//! | [`references`] | Codebase-wide reference scan |
//! | [`verify`] | Self-verification of citations and confidence |
//! | [`export`] | Markdown and JSON rendering |
//! | [`progress`] | Progress reporting on stderr |

pub mod code_host;
pub mod config;
pub mod deep_dive;
pub mod error;
pub mod export;
pub mod gather;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod parse;
pub mod progress;
pub mod prompt;
pub mod reasoning;
pub mod references;
pub mod timeline;
pub mod traits;
pub mod verify;
