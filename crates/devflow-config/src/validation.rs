use devflow_utils::error::ConfigError;

use super::{
    Config, MAX_PHASE_TIMEOUT_SECS, MAX_RETRIES_LIMIT, MIN_PHASE_TIMEOUT_SECS,
    SUPPORTED_LLM_PROVIDERS,
};
use devflow_utils::types::PhaseId;

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

fn check_timeout(key: &str, secs: u64) -> Result<(), ConfigError> {
    if secs < MIN_PHASE_TIMEOUT_SECS {
        return Err(invalid(
            key,
            format!("{secs} (must be at least {MIN_PHASE_TIMEOUT_SECS} seconds)"),
        ));
    }
    if secs > MAX_PHASE_TIMEOUT_SECS {
        return Err(invalid(
            key,
            format!("{secs} (exceeds maximum of {MAX_PHASE_TIMEOUT_SECS} seconds)"),
        ));
    }
    Ok(())
}

impl Config {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secs) = self.defaults.phase_timeout {
            check_timeout("phase_timeout", secs)?;
        }
        for phase in PhaseId::SEQUENCE {
            if let Some(secs) = self.phases.get(phase).and_then(|p| p.phase_timeout) {
                check_timeout(&format!("phases.{phase}.phase_timeout"), secs)?;
            }
        }

        if let Some(retries) = self.retry.max_retries
            && retries > MAX_RETRIES_LIMIT
        {
            return Err(invalid(
                "max_retries",
                format!("{retries} (exceeds maximum of {MAX_RETRIES_LIMIT})"),
            ));
        }
        if let Some(multiplier) = self.retry.backoff_multiplier
            && multiplier == 0
        {
            return Err(invalid("backoff_multiplier", "0 (must be at least 1)"));
        }
        if let Some(backoff) = self.retry.initial_backoff_ms
            && backoff > 60_000
        {
            return Err(invalid(
                "initial_backoff_ms",
                format!("{backoff} (exceeds maximum of 60000)"),
            ));
        }

        if let Some(threshold) = self.quality_gate.threshold
            && !(threshold > 0.0 && threshold <= 1.0)
        {
            return Err(invalid(
                "quality_threshold",
                format!("{threshold} (must be in (0, 1])"),
            ));
        }
        if let Some(coverage) = self.quality_gate.min_coverage
            && !(0.0..=1.0).contains(&coverage)
        {
            return Err(invalid(
                "min_coverage",
                format!("{coverage} (must be in [0, 1])"),
            ));
        }
        if self
            .quality_gate
            .test_markers
            .iter()
            .any(|m| m.trim().is_empty())
        {
            return Err(invalid("test_markers", "markers must not be blank"));
        }

        if let Some(capacity) = self.progress.channel_capacity
            && capacity == 0
        {
            return Err(invalid("progress_capacity", "0 (must be at least 1)"));
        }

        if let Some(provider) = self.llm.provider.as_deref()
            && !SUPPORTED_LLM_PROVIDERS.contains(&provider)
        {
            return Err(invalid(
                "llm_provider",
                format!(
                    "{provider} (supported: {})",
                    SUPPORTED_LLM_PROVIDERS.join(", ")
                ),
            ));
        }
        if let Some(temperature) = self.llm.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(invalid(
                "llm_temperature",
                format!("{temperature} (must be in [0, 2])"),
            ));
        }
        if let Some(budget) = self.llm.budget
            && budget == 0
        {
            return Err(invalid("llm_budget", "0 (must be at least 1)"));
        }

        Ok(())
    }
}
