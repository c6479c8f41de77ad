use std::path::PathBuf;

/// Highest-precedence values supplied by the embedding application.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Explicit config file; skips discovery when set.
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub phase_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub llm_provider: Option<String>,
    pub llm_budget: Option<u32>,
}
