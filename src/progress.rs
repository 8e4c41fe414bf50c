//! Investigation progress reporting.
//!
//! Reports observable progress during `sleuth investigate` and
//! `sleuth deep-dive` so users see which evidence source is being consulted
//! and when the model is thinking. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.
//!
//! Reporting is a one-way side channel: nothing a reporter does can change
//! the control flow of an investigation.

use serde::Serialize;
use std::io::Write;

use crate::models::ThinkingEffort;

/// Phase of an investigation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Blame,
    Commit,
    PullRequest,
    Issues,
    FileHistory,
    Synthesis,
    Parsing,
    Discovery,
    Expansion,
    References,
    Unification,
    Verification,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Blame => "blame",
            Phase::Commit => "commit",
            Phase::PullRequest => "pull_request",
            Phase::Issues => "issues",
            Phase::FileHistory => "file_history",
            Phase::Synthesis => "synthesis",
            Phase::Parsing => "parsing",
            Phase::Discovery => "discovery",
            Phase::Expansion => "expansion",
            Phase::References => "references",
            Phase::Unification => "unification",
            Phase::Verification => "verification",
            Phase::Complete => "complete",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    /// 0–100.
    pub percent: u8,
    /// Set while the reasoning service is working.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingEffort>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, message: impl Into<String>, percent: u8) -> Self {
        Self {
            phase,
            message: message.into(),
            percent: percent.min(100),
            thinking: None,
        }
    }

    pub fn thinking(mut self, effort: ThinkingEffort) -> Self {
        self.thinking = Some(effort);
        self
    }
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: `[ 40%] pull_request  looking up PR for abc1234`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let thinking = match event.thinking {
            Some(effort) => format!("  (thinking: {})", effort.as_str()),
            None => String::new(),
        };
        let line = format!(
            "[{:>3}%] {:<12} {}{}\n",
            event.percent,
            event.phase.as_str(),
            event.message,
            thinking
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase,
            "message": event.message,
            "percent": event.percent,
            "thinking": event.thinking,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Places a nested investigation inside the `start..=end` slice of an
/// enclosing run's progress. The nested run's own completion is dropped so
/// only the enclosing run reports `complete`.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressReporter,
    start: u8,
    end: u8,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressReporter, start: u8, end: u8) -> Self {
        let start = start.min(100);
        Self {
            inner,
            start,
            end: end.clamp(start, 100),
        }
    }
}

impl ProgressReporter for ScaledProgress<'_> {
    fn report(&self, mut event: ProgressEvent) {
        if event.phase == Phase::Complete {
            return;
        }
        let span = u16::from(self.end - self.start);
        event.percent = self.start + (span * u16::from(event.percent) / 100) as u8;
        self.inner.report(event);
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped() {
        let event = ProgressEvent::new(Phase::Complete, "done", 250);
        assert_eq!(event.percent, 100);
    }

    #[test]
    fn thinking_serializes_only_when_set() {
        let plain = serde_json::to_value(ProgressEvent::new(Phase::Blame, "x", 10)).unwrap();
        assert!(plain.get("thinking").is_none());
        assert_eq!(plain["phase"], "blame");

        let thinking = ProgressEvent::new(Phase::Synthesis, "y", 70).thinking(ThinkingEffort::High);
        let value = serde_json::to_value(thinking).unwrap();
        assert_eq!(value["thinking"], "high");
    }

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<ProgressEvent>>);

    impl ProgressReporter for Collect {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn scaled_progress_maps_into_its_slice() {
        let sink = Collect::default();
        let scaled = ScaledProgress::new(&sink, 40, 65);
        scaled.report(ProgressEvent::new(Phase::Blame, "blame", 0));
        scaled.report(ProgressEvent::new(Phase::Parsing, "parse", 90));
        scaled.report(ProgressEvent::new(Phase::Complete, "done", 100));

        let events = sink.0.into_inner().unwrap();
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![40, 62]);
        assert!(events.iter().all(|e| e.phase != Phase::Complete));
    }

    #[test]
    fn scaled_progress_tolerates_inverted_bounds() {
        let sink = Collect::default();
        ScaledProgress::new(&sink, 80, 20).report(ProgressEvent::new(Phase::Commit, "c", 50));
        assert_eq!(sink.0.into_inner().unwrap()[0].percent, 80);
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
