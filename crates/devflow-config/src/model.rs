use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use devflow_utils::types::{ConfigSource, PhaseId};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 120;
pub const MIN_PHASE_TIMEOUT_SECS: u64 = 5;
pub const MAX_PHASE_TIMEOUT_SECS: u64 = 7200;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const MAX_RETRIES_LIMIT: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 4;
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.9;
pub const DEFAULT_MIN_COVERAGE: f64 = 0.8;
pub const DEFAULT_PROGRESS_CAPACITY: usize = 64;
pub const DEFAULT_LLM_PROVIDER: &str = "http";
pub const SUPPORTED_LLM_PROVIDERS: &[&str] = &["http", "scripted"];

/// Configuration for the orchestration engine.
///
/// Every field is optional in the file; accessors on [`Config`] resolve
/// unset values to the documented defaults.
///
/// # Configuration File Format
///
/// ```toml
/// [defaults]
/// model = "gpt-4o-mini"
/// phase_timeout = 120
///
/// [retry]
/// max_retries = 2
/// initial_backoff_ms = 1000
/// backoff_multiplier = 4
///
/// [quality_gate]
/// threshold = 0.9
/// min_coverage = 0.8
/// test_markers = ["@pytest.mark"]
///
/// [progress]
/// channel_capacity = 64
///
/// [llm]
/// provider = "http"
/// base_url = "https://api.openai.com/v1/chat/completions"
/// api_key_env = "OPENAI_API_KEY"
/// budget = 200
///
/// [phases.implementation]
/// model = "gpt-4o"
/// phase_timeout = 600
/// ```
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub defaults: Defaults,
    pub retry: RetryConfig,
    pub quality_gate: QualityGateConfig,
    pub progress: ProgressConfig,
    pub llm: LlmConfig,
    pub phases: PhasesConfig,
    /// Source attribution for each setting.
    pub source_attribution: HashMap<String, ConfigSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub model: Option<String>,
    /// Seconds allowed for one completion call.
    pub phase_timeout: Option<u64>,
}

/// Phase executor retry policy.
///
/// With the defaults a failing phase is attempted three times, sleeping 1s
/// and then 4s between attempts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QualityGateConfig {
    /// Minimum score for a pass (blocking issues fail regardless).
    pub threshold: Option<f64>,
    /// Estimated coverage below this raises an advisory issue.
    pub min_coverage: Option<f64>,
    /// Extra markers recognized as test cases.
    #[serde(default)]
    pub test_markers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    /// Live events buffered per task before slow subscribers lag.
    pub channel_capacity: Option<usize>,
}

/// Completion provider configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Maximum completion calls per process.
    pub budget: Option<u32>,
}

/// Per-phase overrides of model and timeout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub model: Option<String>,
    pub phase_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PhasesConfig {
    pub analysis: Option<PhaseConfig>,
    pub architecture: Option<PhaseConfig>,
    pub implementation: Option<PhaseConfig>,
    pub test_generation: Option<PhaseConfig>,
    pub validation: Option<PhaseConfig>,
    pub documentation: Option<PhaseConfig>,
}

impl PhasesConfig {
    #[must_use]
    pub fn get(&self, phase: PhaseId) -> Option<&PhaseConfig> {
        match phase {
            PhaseId::Analysis => self.analysis.as_ref(),
            PhaseId::Architecture => self.architecture.as_ref(),
            PhaseId::Implementation => self.implementation.as_ref(),
            PhaseId::TestGeneration => self.test_generation.as_ref(),
            PhaseId::Validation => self.validation.as_ref(),
            PhaseId::Documentation => self.documentation.as_ref(),
        }
    }

    pub fn get_mut(&mut self, phase: PhaseId) -> &mut Option<PhaseConfig> {
        match phase {
            PhaseId::Analysis => &mut self.analysis,
            PhaseId::Architecture => &mut self.architecture,
            PhaseId::Implementation => &mut self.implementation,
            PhaseId::TestGeneration => &mut self.test_generation,
            PhaseId::Validation => &mut self.validation,
            PhaseId::Documentation => &mut self.documentation,
        }
    }
}
