use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::ThinkingEffort;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub code_host: CodeHostConfig,
    #[serde(default)]
    pub investigation: InvestigationConfig,
    #[serde(default)]
    pub deep_dive: DeepDiveConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub effort: ThinkingEffort,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: None,
            api_key_env: default_api_key_env(),
            effort: ThinkingEffort::default(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_reasoning_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_reasoning_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeHostConfig {
    #[serde(default = "default_code_host_api")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_code_host_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides remote-URL introspection, e.g. `"octo-org/octo-repo"`.
    #[serde(default)]
    pub repository: Option<String>,
}

impl Default for CodeHostConfig {
    fn default() -> Self {
        Self {
            api_base: default_code_host_api(),
            token_env: default_token_env(),
            timeout_secs: default_code_host_timeout_secs(),
            repository: None,
        }
    }
}

fn default_code_host_api() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_code_host_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvestigationConfig {
    #[serde(default = "default_file_history_limit")]
    pub file_history_limit: usize,
    #[serde(default = "default_max_linked_issues")]
    pub max_linked_issues: usize,
    #[serde(default = "default_diff_char_budget")]
    pub diff_char_budget: usize,
    #[serde(default = "default_comment_char_budget")]
    pub comment_char_budget: usize,
    #[serde(default = "default_comments_per_thread")]
    pub comments_per_thread: usize,
    #[serde(default = "default_confidence_with_evidence")]
    pub confidence_with_evidence: u8,
    #[serde(default = "default_confidence_without_evidence")]
    pub confidence_without_evidence: u8,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            file_history_limit: default_file_history_limit(),
            max_linked_issues: default_max_linked_issues(),
            diff_char_budget: default_diff_char_budget(),
            comment_char_budget: default_comment_char_budget(),
            comments_per_thread: default_comments_per_thread(),
            confidence_with_evidence: default_confidence_with_evidence(),
            confidence_without_evidence: default_confidence_without_evidence(),
        }
    }
}

fn default_file_history_limit() -> usize {
    10
}
fn default_max_linked_issues() -> usize {
    5
}
fn default_diff_char_budget() -> usize {
    4000
}
fn default_comment_char_budget() -> usize {
    500
}
fn default_comments_per_thread() -> usize {
    10
}
fn default_confidence_with_evidence() -> u8 {
    92
}
fn default_confidence_without_evidence() -> u8 {
    65
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeepDiveConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_scan_references")]
    pub scan_references: bool,
    #[serde(default = "default_max_reference_hits")]
    pub max_reference_hits: usize,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for DeepDiveConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_files: default_max_files(),
            scan_references: default_scan_references(),
            max_reference_hits: default_max_reference_hits(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_max_depth() -> usize {
    2
}
fn default_max_files() -> usize {
    5
}
fn default_scan_references() -> bool {
    true
}
fn default_max_reference_hits() -> usize {
    200
}
fn default_exclude_globs() -> Vec<String> {
    [
        "**/.git/**",
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/out/**",
        "**/vendor/**",
        "**/coverage/**",
        "**/__pycache__/**",
        "**/.next/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerificationConfig {
    #[serde(default = "default_verification_enabled")]
    pub enabled: bool,
    #[serde(default = "default_critique_penalty")]
    pub critique_penalty: u8,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_verification_enabled(),
            critique_penalty: default_critique_penalty(),
        }
    }
}

fn default_verification_enabled() -> bool {
    true
}
fn default_critique_penalty() -> u8 {
    5
}

impl Config {
    /// Configuration used when no file is present: every section at its default.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.reasoning.provider.as_str() {
        "disabled" | "anthropic" | "openai" => {}
        other => anyhow::bail!(
            "Unknown reasoning provider: '{}'. Must be disabled, anthropic, or openai.",
            other
        ),
    }

    if config.reasoning.max_attempts == 0 {
        anyhow::bail!("reasoning.max_attempts must be >= 1");
    }

    if !(0.0..=2.0).contains(&config.reasoning.temperature) {
        anyhow::bail!("reasoning.temperature must be in [0.0, 2.0]");
    }

    if config.investigation.confidence_with_evidence > 100
        || config.investigation.confidence_without_evidence > 100
    {
        anyhow::bail!("investigation confidence defaults must be <= 100");
    }

    if config.deep_dive.max_depth == 0 {
        anyhow::bail!("deep_dive.max_depth must be >= 1");
    }

    if config.deep_dive.max_files == 0 {
        anyhow::bail!("deep_dive.max_files must be >= 1");
    }

    if config.verification.critique_penalty > 100 {
        anyhow::bail!("verification.critique_penalty must be <= 100");
    }

    Ok(())
}
