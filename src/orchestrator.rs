//! The investigation orchestrator.
//!
//! [`Investigator`] owns the three collaborators and the configuration, and
//! drives one investigation end to end:
//!
//! ```text
//!  CodeSelection
//!       │
//!       ▼
//!  EvidencePipeline::gather ──► Case (evidence + gaps)
//!       │
//!       ▼
//!  synthesize: prompt ─► ReasoningService (retry on overload)
//!       │                     │
//!       │          continuation token ─► ReasoningTrace
//!       ▼
//!  parse (structured ─► heuristic ─► default) + timeline
//!       │
//!       ▼
//!  InvestigationResult
//! ```
//!
//! The investigator itself holds no per-investigation state. Each call opens
//! its own [`Case`], and the [`ReasoningTrace`] is owned by the caller and
//! passed in explicitly, so one investigator can serve several
//! investigations at once.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::InvestigationError;
use crate::gather::EvidencePipeline;
use crate::models::{
    Case, CaseStatus, CodeSelection, InvestigationResult, ReasoningTrace, RepoSlug,
    VerificationReport,
};
use crate::parse::{
    extract_confidence, extract_recommendations, extract_sources, extract_summary,
    parse_sections, Layer,
};
use crate::progress::{NoProgress, Phase, ProgressEvent, ProgressReporter};
use crate::prompt::build_synthesis_prompt;
use crate::reasoning::{generate_with_retry, RetryPolicy};
use crate::timeline::build_timeline;
use crate::traits::{CodeHostProvider, HistoryProvider, ReasoningRequest, ReasoningService};
use crate::verify::Verifier;

pub struct Investigator {
    pub(crate) history: Arc<dyn HistoryProvider>,
    pub(crate) code_host: Arc<dyn CodeHostProvider>,
    pub(crate) reasoning: Arc<dyn ReasoningService>,
    pub(crate) config: Config,
    pub(crate) progress: Arc<dyn ProgressReporter>,
    repository: Option<RepoSlug>,
}

impl Investigator {
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        code_host: Arc<dyn CodeHostProvider>,
        reasoning: Arc<dyn ReasoningService>,
        config: Config,
    ) -> Self {
        let repository = config
            .code_host
            .repository
            .as_deref()
            .and_then(|r| match r.parse::<RepoSlug>() {
                Ok(slug) => Some(slug),
                Err(err) => {
                    warn!(error = %err, "ignoring invalid code_host.repository");
                    None
                }
            });
        Self {
            history,
            code_host,
            reasoning,
            config,
            progress: Arc::new(NoProgress),
            repository,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Investigate `selection` with a fresh reasoning trace.
    pub async fn investigate(
        &self,
        selection: CodeSelection,
    ) -> Result<InvestigationResult, InvestigationError> {
        let mut trace = ReasoningTrace::new();
        self.investigate_with(selection, None, &mut trace).await
    }

    /// Investigate `selection`, threading `trace` through every reasoning
    /// call. `extra_context` is appended to the synthesis prompt.
    pub async fn investigate_with(
        &self,
        selection: CodeSelection,
        extra_context: Option<&str>,
        trace: &mut ReasoningTrace,
    ) -> Result<InvestigationResult, InvestigationError> {
        self.investigate_reporting(selection, extra_context, trace, self.progress.as_ref())
            .await
    }

    /// [`Investigator::investigate_with`], reporting to `progress` instead of
    /// the investigator's own reporter.
    pub(crate) async fn investigate_reporting(
        &self,
        selection: CodeSelection,
        extra_context: Option<&str>,
        trace: &mut ReasoningTrace,
        progress: &dyn ProgressReporter,
    ) -> Result<InvestigationResult, InvestigationError> {
        info!(location = %selection.location(), "investigating");
        let mut case = self.gather_reporting(selection, progress).await;
        self.synthesize_reporting(&mut case, extra_context, trace, progress)
            .await
    }

    /// Run the evidence-gathering pipeline into a new case.
    pub async fn gather(&self, selection: CodeSelection) -> Case {
        self.gather_reporting(selection, self.progress.as_ref()).await
    }

    async fn gather_reporting(
        &self,
        selection: CodeSelection,
        progress: &dyn ProgressReporter,
    ) -> Case {
        let pipeline = EvidencePipeline {
            history: self.history.as_ref(),
            code_host: self.code_host.as_ref(),
            config: &self.config.investigation,
            progress,
            repository: self.repository.as_ref(),
        };
        pipeline.gather(selection).await
    }

    /// Ask the reasoning service to explain `case` and finalize it.
    ///
    /// On a fatal reasoning failure the case is marked failed and no result
    /// is returned.
    pub async fn synthesize(
        &self,
        case: &mut Case,
        extra_context: Option<&str>,
        trace: &mut ReasoningTrace,
    ) -> Result<InvestigationResult, InvestigationError> {
        self.synthesize_reporting(case, extra_context, trace, self.progress.as_ref())
            .await
    }

    async fn synthesize_reporting(
        &self,
        case: &mut Case,
        extra_context: Option<&str>,
        trace: &mut ReasoningTrace,
        progress: &dyn ProgressReporter,
    ) -> Result<InvestigationResult, InvestigationError> {
        if case.status() != CaseStatus::Investigating {
            return Err(InvestigationError::CaseFinalized(case.id.clone()));
        }

        let reasoning = &self.config.reasoning;
        progress.report(
            ProgressEvent::new(
                Phase::Synthesis,
                format!(
                    "synthesizing {} evidence items with {}",
                    case.evidence().len(),
                    self.reasoning.model_name()
                ),
                70,
            )
            .thinking(reasoning.effort),
        );

        let request = ReasoningRequest {
            prompt: build_synthesis_prompt(case, &self.config.investigation, extra_context),
            effort: reasoning.effort,
            temperature: reasoning.temperature,
            context_token: trace.last().map(str::to_string),
        };
        let policy = RetryPolicy::from_config(reasoning);
        let response = match generate_with_retry(self.reasoning.as_ref(), &request, &policy).await
        {
            Ok(response) => response,
            Err(err) => {
                error!(case = %case.id, error = %err, "synthesis failed");
                case.fail(err.to_string())?;
                return Err(err);
            }
        };
        trace.push(response.continuation_token.clone());
        case.trace.push(response.continuation_token);

        progress.report(ProgressEvent::new(Phase::Parsing, "parsing response", 90));
        let text = response.text.trim();
        let sections = parse_sections(text);
        let fallback = if case.has_evidence() {
            self.config.investigation.confidence_with_evidence
        } else {
            self.config.investigation.confidence_without_evidence
        };
        let (confidence, confidence_layer) = extract_confidence(text, &sections, fallback);
        let (summary, _) = extract_summary(text, &sections);
        let (sources, _) = extract_sources(text, &sections, case);
        let (recommendations, _) = extract_recommendations(text, &sections);
        if confidence_layer == Layer::Default {
            warn!(case = %case.id, confidence, "no confidence in response, using default");
        }

        case.complete(i64::from(confidence))?;
        let result = InvestigationResult {
            case_id: case.id.clone(),
            selection: case.selection.clone(),
            narrative: text.to_string(),
            summary,
            confidence: case.confidence(),
            sources,
            recommendations,
            timeline: build_timeline(case),
            trace: case.trace.clone(),
            evidence_gaps: case.gaps().to_vec(),
            evidence_count: case.evidence().len(),
            completed_at: case.completed_at().unwrap_or(case.started_at),
        };

        progress.report(ProgressEvent::new(
            Phase::Complete,
            format!(
                "{} ({}% confidence, {} sources)",
                case.selection.location(),
                result.confidence,
                result.sources.len()
            ),
            100,
        ));
        Ok(result)
    }

    /// Re-check the citations of `result` and compute an adjusted confidence.
    pub async fn verify(
        &self,
        result: &InvestigationResult,
        trace: &mut ReasoningTrace,
    ) -> VerificationReport {
        let verifier = Verifier {
            history: self.history.as_ref(),
            reasoning: self.reasoning.as_ref(),
            reasoning_config: &self.config.reasoning,
            config: &self.config.verification,
            progress: self.progress.as_ref(),
        };
        verifier.verify(result, trace).await
    }
}
