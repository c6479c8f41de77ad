use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use devflow_utils::error::ConfigError;

use super::{
    Config, ConfigOverrides, ConfigSource, Defaults, LlmConfig, PhasesConfig, ProgressConfig,
    QualityGateConfig, RetryConfig,
};

/// Directory holding project configuration.
pub const CONFIG_DIR: &str = ".devflow";
pub const CONFIG_FILE: &str = "config.toml";
/// Environment variable naming an explicit config file.
pub const ENV_CONFIG_PATH: &str = "DEVFLOW_CONFIG";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    defaults: Option<Defaults>,
    retry: Option<RetryConfig>,
    quality_gate: Option<QualityGateConfig>,
    progress: Option<ProgressConfig>,
    llm: Option<LlmConfig>,
    phases: Option<PhasesConfig>,
}

struct Layer<'a> {
    source: ConfigSource,
    attribution: &'a mut HashMap<String, ConfigSource>,
}

impl Layer<'_> {
    fn set<T>(&mut self, slot: &mut Option<T>, value: Option<T>, key: &str) {
        if let Some(value) = value {
            *slot = Some(value);
            self.attribution.insert(key.to_string(), self.source.clone());
        }
    }
}

fn parse_env<T: FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

impl Config {
    /// Discover configuration from the current directory, the process
    /// environment, and the user-level config file.
    ///
    /// # Errors
    ///
    /// Fails when a config file cannot be parsed, an environment value is
    /// malformed, or the merged configuration does not validate.
    pub fn discover(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("cannot determine current directory: {e}"),
        })?;
        Self::resolve(
            &start_dir,
            overrides,
            &|key: &str| std::env::var(key).ok(),
            Self::global_config_path(),
        )
    }

    /// Discover configuration starting from a specific directory, reading the
    /// process environment but not the user-level config file.
    ///
    /// # Errors
    ///
    /// See [`Config::discover`].
    pub fn discover_from(start_dir: &Path, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(start_dir, overrides, &|key: &str| std::env::var(key).ok(), None)
    }

    /// Path-driven discovery with an injected environment, used by tests to
    /// avoid process-global state.
    ///
    /// # Errors
    ///
    /// See [`Config::discover`].
    pub fn discover_from_with_env<F>(
        start_dir: &Path,
        overrides: &ConfigOverrides,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(start_dir, overrides, &env, None)
    }

    fn resolve(
        start_dir: &Path,
        overrides: &ConfigOverrides,
        env: &dyn Fn(&str) -> Option<String>,
        global: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let mut attribution = HashMap::new();
        for key in [
            "model",
            "phase_timeout",
            "max_retries",
            "initial_backoff_ms",
            "backoff_multiplier",
            "quality_threshold",
            "min_coverage",
            "progress_capacity",
            "llm_provider",
        ] {
            attribution.insert(key.to_string(), ConfigSource::Defaults);
        }

        let config_path = match &overrides.config_path {
            Some(explicit) => Some(Self::require_exists(explicit)?),
            None => match env(ENV_CONFIG_PATH) {
                Some(from_env) => Some(Self::require_exists(Path::new(&from_env))?),
                None => Self::discover_config_file_from(start_dir)
                    .or_else(|| global.filter(|path| path.is_file())),
            },
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)?;
            let mut layer = Layer {
                source: ConfigSource::ConfigFile(path.display().to_string()),
                attribution: &mut attribution,
            };

            if let Some(d) = file.defaults {
                layer.set(&mut config.defaults.model, d.model, "model");
                layer.set(
                    &mut config.defaults.phase_timeout,
                    d.phase_timeout,
                    "phase_timeout",
                );
            }
            if let Some(r) = file.retry {
                layer.set(&mut config.retry.max_retries, r.max_retries, "max_retries");
                layer.set(
                    &mut config.retry.initial_backoff_ms,
                    r.initial_backoff_ms,
                    "initial_backoff_ms",
                );
                layer.set(
                    &mut config.retry.backoff_multiplier,
                    r.backoff_multiplier,
                    "backoff_multiplier",
                );
            }
            if let Some(q) = file.quality_gate {
                layer.set(
                    &mut config.quality_gate.threshold,
                    q.threshold,
                    "quality_threshold",
                );
                layer.set(
                    &mut config.quality_gate.min_coverage,
                    q.min_coverage,
                    "min_coverage",
                );
                if !q.test_markers.is_empty() {
                    config.quality_gate.test_markers = q.test_markers;
                    layer
                        .attribution
                        .insert("test_markers".to_string(), layer.source.clone());
                }
            }
            if let Some(p) = file.progress {
                layer.set(
                    &mut config.progress.channel_capacity,
                    p.channel_capacity,
                    "progress_capacity",
                );
            }
            if let Some(l) = file.llm {
                layer.set(&mut config.llm.provider, l.provider, "llm_provider");
                layer.set(&mut config.llm.base_url, l.base_url, "llm_base_url");
                layer.set(&mut config.llm.api_key_env, l.api_key_env, "llm_api_key_env");
                layer.set(&mut config.llm.model, l.model, "llm_model");
                layer.set(&mut config.llm.max_tokens, l.max_tokens, "llm_max_tokens");
                layer.set(&mut config.llm.temperature, l.temperature, "llm_temperature");
                layer.set(&mut config.llm.budget, l.budget, "llm_budget");
            }
            if let Some(phases) = file.phases {
                config.phases = phases;
                layer
                    .attribution
                    .insert("phases".to_string(), layer.source.clone());
            }
        }

        let mut layer = Layer {
            source: ConfigSource::Environment,
            attribution: &mut attribution,
        };
        layer.set(&mut config.defaults.model, env("DEVFLOW_MODEL"), "model");
        layer.set(
            &mut config.defaults.phase_timeout,
            parse_env(env, "DEVFLOW_PHASE_TIMEOUT")?,
            "phase_timeout",
        );
        layer.set(
            &mut config.retry.max_retries,
            parse_env(env, "DEVFLOW_MAX_RETRIES")?,
            "max_retries",
        );
        layer.set(
            &mut config.quality_gate.threshold,
            parse_env(env, "DEVFLOW_QUALITY_THRESHOLD")?,
            "quality_threshold",
        );
        layer.set(
            &mut config.llm.provider,
            env("DEVFLOW_LLM_PROVIDER"),
            "llm_provider",
        );
        layer.set(
            &mut config.llm.budget,
            parse_env(env, "DEVFLOW_LLM_BUDGET")?,
            "llm_budget",
        );

        let mut layer = Layer {
            source: ConfigSource::Programmatic,
            attribution: &mut attribution,
        };
        layer.set(&mut config.defaults.model, overrides.model.clone(), "model");
        layer.set(
            &mut config.defaults.phase_timeout,
            overrides.phase_timeout,
            "phase_timeout",
        );
        layer.set(
            &mut config.retry.max_retries,
            overrides.max_retries,
            "max_retries",
        );
        layer.set(
            &mut config.quality_gate.threshold,
            overrides.quality_threshold,
            "quality_threshold",
        );
        layer.set(
            &mut config.llm.provider,
            overrides.llm_provider.clone(),
            "llm_provider",
        );
        layer.set(&mut config.llm.budget, overrides.llm_budget, "llm_budget");

        config.source_attribution = attribution;
        config.validate()?;
        Ok(config)
    }

    /// Search upward from `start_dir` for `.devflow/config.toml`, stopping at
    /// a repository root (.git, .hg, .svn) or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() || dir.join(".hg").exists() || dir.join(".svn").exists()
            {
                break;
            }
            current = dir.parent();
        }

        None
    }

    /// User-level configuration file, e.g. `~/.config/devflow/config.toml`.
    #[must_use]
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("devflow").join(CONFIG_FILE))
    }

    fn require_exists(path: &Path) -> Result<PathBuf, ConfigError> {
        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ConfigError::NotFound {
                path: path.display().to_string(),
            })
        }
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidFile(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))
    }
}
