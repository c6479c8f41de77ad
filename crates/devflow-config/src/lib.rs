//! Configuration management for devflow
//!
//! Hierarchical configuration with discovery and precedence:
//! overrides > `DEVFLOW_*` environment > config file > defaults.
//! Configuration files are TOML with `[defaults]`, `[retry]`,
//! `[quality_gate]`, `[progress]`, `[llm]`, and `[phases.<phase>]` sections.

mod builder;
mod discovery;
mod model;
mod overrides;
mod validation;

use std::time::Duration;

pub use builder::ConfigBuilder;
pub use devflow_utils::types::ConfigSource;
pub use model::*;
pub use overrides::ConfigOverrides;

use devflow_utils::types::PhaseId;

impl Config {
    /// Model for a phase.
    ///
    /// Precedence: `[phases.<phase>].model`, then `[defaults].model`, then
    /// `[llm].model`, then [`DEFAULT_MODEL`].
    #[must_use]
    pub fn model_for_phase(&self, phase: PhaseId) -> String {
        self.phases
            .get(phase)
            .and_then(|p| p.model.clone())
            .or_else(|| self.defaults.model.clone())
            .or_else(|| self.llm.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Timeout bounding one completion call of a phase.
    #[must_use]
    pub fn phase_timeout(&self, phase: PhaseId) -> Duration {
        let secs = self
            .phases
            .get(phase)
            .and_then(|p| p.phase_timeout)
            .or(self.defaults.phase_timeout)
            .unwrap_or(DEFAULT_PHASE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.retry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(
            self.retry
                .initial_backoff_ms
                .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
        )
    }

    #[must_use]
    pub fn backoff_multiplier(&self) -> u32 {
        self.retry
            .backoff_multiplier
            .unwrap_or(DEFAULT_BACKOFF_MULTIPLIER)
    }

    #[must_use]
    pub fn quality_threshold(&self) -> f64 {
        self.quality_gate
            .threshold
            .unwrap_or(DEFAULT_QUALITY_THRESHOLD)
    }

    #[must_use]
    pub fn min_coverage(&self) -> f64 {
        self.quality_gate
            .min_coverage
            .unwrap_or(DEFAULT_MIN_COVERAGE)
    }

    #[must_use]
    pub fn progress_capacity(&self) -> usize {
        self.progress
            .channel_capacity
            .unwrap_or(DEFAULT_PROGRESS_CAPACITY)
    }

    #[must_use]
    pub fn llm_provider(&self) -> &str {
        self.llm.provider.as_deref().unwrap_or(DEFAULT_LLM_PROVIDER)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Config {
    /// Defaults with millisecond backoff so retry paths run quickly under test.
    #[must_use]
    pub fn minimal_for_testing() -> Self {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = Some(1);
        config.retry.backoff_multiplier = Some(2);
        config.defaults.phase_timeout = Some(5);
        config
    }
}
