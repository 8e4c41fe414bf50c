//! Self-verification of an investigation result.
//!
//! Two adjustments, always applied in this order:
//!
//! 1. **Ratio scaling**: every cited source is re-confirmed and confidence is
//!    scaled to `round(confidence × verified / total)`. With no citations the
//!    confidence is left unchanged.
//! 2. **Critique penalty**: the narrative is sent back to the reasoning
//!    service, which counts unsupported claims, inconsistencies and
//!    speculation. Each issue subtracts a fixed penalty, floored at 0.
//!
//! Commit citations are re-resolved through the history provider. Pull
//! request and issue citations are only checked for a non-empty URL; no live
//! re-fetch happens, so their confirmation is provisional.
//!
//! Every step is best-effort: a citation that errors is marked unverified and
//! a failed critique call applies no penalty.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::{ReasoningConfig, VerificationConfig};
use crate::models::{
    clamp_confidence, CitationOutcome, InvestigationResult, ReasoningTrace, Source, SourceKind,
    VerificationReport,
};
use crate::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::prompt::build_critique_prompt;
use crate::reasoning::{generate_with_retry, RetryPolicy};
use crate::traits::{HistoryProvider, ReasoningRequest, ReasoningService};

static CRITIQUE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*(UNSUPPORTED[_ ]CLAIMS|INCONSISTENCIES|SPECULATION)\W*:?\s*(\d+)")
        .unwrap()
});

/// `round(confidence × verified / total)`, or `confidence` when `total == 0`.
pub fn scale_by_ratio(confidence: u8, verified: usize, total: usize) -> u8 {
    if total == 0 {
        return confidence;
    }
    let scaled = (f64::from(confidence) * verified as f64 / total as f64).round();
    clamp_confidence(scaled as i64)
}

/// Subtract `penalty` per issue, floored at 0.
pub fn apply_critique_penalty(confidence: u8, issues: u32, penalty: u8) -> u8 {
    clamp_confidence(i64::from(confidence) - i64::from(issues) * i64::from(penalty))
}

/// Sum the three issue counters of a critique reply.
///
/// Returns `None` when none of the counters can be found, so an unreadable
/// reply is not mistaken for a clean bill of health.
pub fn parse_critique(text: &str) -> Option<u32> {
    let mut found = false;
    let mut total: u32 = 0;
    for caps in CRITIQUE_COUNT.captures_iter(text) {
        if let Ok(n) = caps[2].parse::<u32>() {
            found = true;
            total = total.saturating_add(n);
        }
    }
    found.then_some(total)
}

pub struct Verifier<'a> {
    pub history: &'a dyn HistoryProvider,
    pub reasoning: &'a dyn ReasoningService,
    pub reasoning_config: &'a ReasoningConfig,
    pub config: &'a VerificationConfig,
    pub progress: &'a dyn ProgressReporter,
}

impl<'a> Verifier<'a> {
    /// Re-check `result` and compute the adjusted confidence. Critique call
    /// tokens are appended to `trace`.
    pub async fn verify(
        &self,
        result: &InvestigationResult,
        trace: &mut ReasoningTrace,
    ) -> VerificationReport {
        self.progress.report(ProgressEvent::new(
            Phase::Verification,
            format!("re-checking {} citations", result.sources.len()),
            92,
        ));

        let mut outcomes = Vec::with_capacity(result.sources.len());
        for source in &result.sources {
            outcomes.push(self.verify_citation(source).await);
        }
        let verified = outcomes.iter().filter(|o| o.verified).count();
        let failed = outcomes.len() - verified;
        let ratio_confidence = scale_by_ratio(result.confidence, verified, outcomes.len());

        self.progress.report(
            ProgressEvent::new(Phase::Verification, "self-critique", 96)
                .thinking(self.reasoning_config.effort),
        );
        let critique_issues = self.critique(&result.narrative, trace).await;
        let confidence = match critique_issues {
            Some(issues) => {
                apply_critique_penalty(ratio_confidence, issues, self.config.critique_penalty)
            }
            None => ratio_confidence,
        };

        debug!(
            verified,
            failed,
            original = result.confidence,
            ratio = ratio_confidence,
            final_confidence = confidence,
            "verification finished"
        );

        VerificationReport {
            verified,
            failed,
            outcomes,
            original_confidence: result.confidence,
            ratio_confidence,
            critique_issues,
            confidence,
        }
    }

    pub async fn verify_citation(&self, source: &Source) -> CitationOutcome {
        let (verified, note) = match source.kind {
            SourceKind::Commit => match self.history.commit(&source.identifier).await {
                Ok(commit) => (true, format!("resolved {}", commit.hash)),
                Err(err) => {
                    warn!(
                        hash = %source.identifier,
                        error = %err,
                        "cited commit no longer resolves"
                    );
                    (false, format!("commit lookup failed: {}", err))
                }
            },
            SourceKind::PullRequest | SourceKind::Issue => match source.url.as_deref() {
                Some(url) if !url.trim().is_empty() => {
                    (true, "provisional: URL present, not re-fetched".to_string())
                }
                _ => (false, "no URL to confirm against".to_string()),
            },
        };
        CitationOutcome {
            source: source.clone(),
            verified,
            note,
        }
    }

    async fn critique(&self, narrative: &str, trace: &mut ReasoningTrace) -> Option<u32> {
        let request = ReasoningRequest {
            prompt: build_critique_prompt(narrative),
            effort: self.reasoning_config.effort,
            temperature: self.reasoning_config.temperature,
            context_token: trace.last().map(str::to_string),
        };
        let policy = RetryPolicy::from_config(self.reasoning_config);
        match generate_with_retry(self.reasoning, &request, &policy).await {
            Ok(response) => {
                trace.push(response.continuation_token);
                let issues = parse_critique(&response.text);
                if issues.is_none() {
                    warn!("self-critique reply had no issue counts; no penalty applied");
                }
                issues
            }
            Err(err) => {
                warn!(error = %err, "self-critique failed; no penalty applied");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_scaling_rounds() {
        assert_eq!(scale_by_ratio(90, 2, 3), 60);
        assert_eq!(scale_by_ratio(85, 1, 2), 43);
        assert_eq!(scale_by_ratio(85, 0, 4), 0);
        assert_eq!(scale_by_ratio(85, 4, 4), 85);
    }

    #[test]
    fn no_citations_leaves_confidence() {
        assert_eq!(scale_by_ratio(77, 0, 0), 77);
    }

    #[test]
    fn penalty_floors_at_zero() {
        assert_eq!(apply_critique_penalty(80, 3, 5), 65);
        assert_eq!(apply_critique_penalty(10, 3, 5), 0);
        assert_eq!(apply_critique_penalty(10, 0, 5), 10);
    }

    #[test]
    fn critique_counts_are_summed() {
        let reply = "UNSUPPORTED_CLAIMS: 2\nINCONSISTENCIES: 0\n**SPECULATION**: 1";
        assert_eq!(parse_critique(reply), Some(3));
        assert_eq!(parse_critique("Looks fine to me."), None);
        assert_eq!(parse_critique("- unsupported claims: 4"), Some(4));
    }
}
