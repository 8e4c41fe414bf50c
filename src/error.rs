//! Error taxonomy for investigations.
//!
//! Collaborator traits return [`anyhow::Result`] because their failures are
//! opaque to the core. The orchestrator classifies them into
//! [`InvestigationError`]: evidence gaps are recorded and skipped, while
//! synthesis failures end the investigation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The evidence-gathering step that produced a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherStep {
    Blame,
    Commit,
    PullRequest,
    LinkedIssues,
    FileHistory,
}

impl GatherStep {
    /// Pipeline order.
    pub const ALL: [GatherStep; 5] = [
        GatherStep::Blame,
        GatherStep::Commit,
        GatherStep::PullRequest,
        GatherStep::LinkedIssues,
        GatherStep::FileHistory,
    ];
}

impl fmt::Display for GatherStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatherStep::Blame => "blame",
            GatherStep::Commit => "commit",
            GatherStep::PullRequest => "pull_request",
            GatherStep::LinkedIssues => "linked_issues",
            GatherStep::FileHistory => "file_history",
        };
        f.write_str(s)
    }
}

/// Failure reported by a reasoning provider.
#[derive(Debug, Error)]
pub enum ReasoningError {
    /// Rate limited or overloaded. The only retryable kind.
    #[error("reasoning service overloaded (HTTP {status}): {message}")]
    Overloaded { status: u16, message: String },

    #[error("reasoning service rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("reasoning service unreachable: {0}")]
    Transport(String),

    #[error("reasoning service returned an unreadable response: {0}")]
    Malformed(String),

    #[error("reasoning provider is disabled")]
    Disabled,
}

impl ReasoningError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReasoningError::Overloaded { .. })
    }
}

/// Errors surfaced by the investigation orchestrator.
#[derive(Debug, Error)]
pub enum InvestigationError {
    /// A single evidence source could not be consulted. Never fatal.
    #[error("{step} evidence unavailable: {reason}")]
    EvidenceUnavailable { step: GatherStep, reason: String },

    /// The reasoning service could not produce a synthesis.
    #[error("synthesis failed after {attempts} attempt(s): {source}")]
    SynthesisFailed {
        attempts: u32,
        #[source]
        source: ReasoningError,
    },

    /// The case was already completed or failed.
    #[error("case {0} is already finalized")]
    CaseFinalized(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl InvestigationError {
    pub fn unavailable(step: GatherStep, reason: impl fmt::Display) -> Self {
        InvestigationError::EvidenceUnavailable {
            step,
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the investigation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InvestigationError::EvidenceUnavailable { .. })
    }
}
