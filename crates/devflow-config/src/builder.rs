use std::collections::HashMap;
use std::time::Duration;

use devflow_utils::error::ConfigError;
use devflow_utils::types::PhaseId;

use super::{Config, ConfigSource, PhaseConfig};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding the orchestrator and deterministic behavior
    /// independent of the user's environment is required.
    ///
    /// # Example
    ///
    /// ```rust
    /// use devflow_config::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .quality_threshold(0.85)
    ///     .phase_timeout(Duration::from_secs(300))
    ///     .max_retries(1)
    ///     .build()
    ///     .expect("valid config");
    /// assert_eq!(config.max_retries(), 1);
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Fluent builder for [`Config`].
///
/// All values set via the builder are attributed to
/// [`ConfigSource::Programmatic`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
    touched: Vec<&'static str>,
}

impl ConfigBuilder {
    fn mark(mut self, key: &'static str) -> Self {
        self.touched.push(key);
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.defaults.model = Some(model.into());
        self.mark("model")
    }

    #[must_use]
    pub fn phase_timeout(mut self, timeout: Duration) -> Self {
        self.config.defaults.phase_timeout = Some(timeout.as_secs());
        self.mark("phase_timeout")
    }

    #[must_use]
    pub fn phase_override(mut self, phase: PhaseId, model: Option<String>, timeout: Option<Duration>) -> Self {
        *self.config.phases.get_mut(phase) = Some(PhaseConfig {
            model,
            phase_timeout: timeout.map(|t| t.as_secs()),
        });
        self.mark("phases")
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = Some(retries);
        self.mark("max_retries")
    }

    #[must_use]
    pub fn backoff(mut self, initial: Duration, multiplier: u32) -> Self {
        self.config.retry.initial_backoff_ms =
            Some(u64::try_from(initial.as_millis()).unwrap_or(u64::MAX));
        self.config.retry.backoff_multiplier = Some(multiplier);
        self.mark("initial_backoff_ms").mark("backoff_multiplier")
    }

    #[must_use]
    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.config.quality_gate.threshold = Some(threshold);
        self.mark("quality_threshold")
    }

    #[must_use]
    pub fn min_coverage(mut self, coverage: f64) -> Self {
        self.config.quality_gate.min_coverage = Some(coverage);
        self.mark("min_coverage")
    }

    #[must_use]
    pub fn test_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.quality_gate.test_markers.push(marker.into());
        self.mark("test_markers")
    }

    #[must_use]
    pub fn progress_capacity(mut self, capacity: usize) -> Self {
        self.config.progress.channel_capacity = Some(capacity);
        self.mark("progress_capacity")
    }

    #[must_use]
    pub fn llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.llm.provider = Some(provider.into());
        self.mark("llm_provider")
    }

    #[must_use]
    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm.base_url = Some(url.into());
        self.mark("llm_base_url")
    }

    #[must_use]
    pub fn llm_budget(mut self, budget: u32) -> Self {
        self.config.llm.budget = Some(budget);
        self.mark("llm_budget")
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for out-of-range values.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = self.config;
        let mut attribution: HashMap<String, ConfigSource> = HashMap::new();
        for key in self.touched {
            attribution.insert(key.to_string(), ConfigSource::Programmatic);
        }
        config.source_attribution = attribution;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_attributes_programmatic_values() {
        let config = Config::builder()
            .model("m")
            .backoff(Duration::from_millis(5), 3)
            .phase_override(PhaseId::Validation, Some("strict".into()), None)
            .build()
            .unwrap();
        assert_eq!(config.model_for_phase(PhaseId::Validation), "strict");
        assert_eq!(config.model_for_phase(PhaseId::Analysis), "m");
        assert_eq!(config.initial_backoff(), Duration::from_millis(5));
        assert_eq!(config.backoff_multiplier(), 3);
        assert_eq!(
            config.source_attribution.get("backoff_multiplier"),
            Some(&ConfigSource::Programmatic)
        );
        assert!(!config.source_attribution.contains_key("quality_threshold"));
    }

    #[test]
    fn builder_validates() {
        assert!(Config::builder().quality_threshold(2.0).build().is_err());
        assert!(Config::builder().llm_budget(0).build().is_err());
    }
}
