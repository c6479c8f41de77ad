//! Completion backends for devflow phases.
//!
//! Every phase talks to a [`CompletionBackend`]: prompt and context in, text
//! out. The orchestrator owns retries and timeouts; backends make one attempt
//! per call.

mod budgeted_backend;
mod http_backend;
pub(crate) mod http_client;
mod scripted;
mod types;

use std::sync::Arc;

use devflow_config::Config;
use tracing::debug;

pub use budgeted_backend::BudgetedBackend;
pub use devflow_utils::error::LlmError;
pub use http_backend::HttpBackend;
#[cfg(feature = "test-utils")]
pub use scripted::passing;
pub use scripted::{HoldGate, RecordedCall, ScriptStep, ScriptedBackend};
pub use types::{Completion, CompletionBackend, CompletionRequest, Message, Role};

fn construct_backend_for_provider(
    provider: &str,
    config: &Config,
) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    match provider {
        "http" => Ok(Arc::new(HttpBackend::new_from_config(config)?)),
        "scripted" => Ok(Arc::new(ScriptedBackend::dry_run())),
        other => Err(LlmError::Unsupported(format!(
            "unknown completion provider '{other}'"
        ))),
    }
}

/// Build the backend selected by `[llm] provider`, wrapped in a
/// [`BudgetedBackend`] when `[llm] budget` is set.
///
/// # Errors
///
/// Returns `LlmError::Unsupported` for unknown providers and
/// `LlmError::Misconfiguration` when provider settings are incomplete.
pub fn from_config(config: &Config) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    let provider = config.llm_provider();
    let backend = construct_backend_for_provider(provider, config)?;
    debug!(provider, budget = ?config.llm.budget, "Constructed completion backend");

    match config.llm.budget {
        Some(limit) => Ok(Arc::new(BudgetedBackend::new(backend, limit))),
        None => Ok(backend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_provider_builds_dry_run_backend() {
        let mut config = Config::minimal_for_testing();
        config.llm.provider = Some("scripted".into());
        let backend = from_config(&config).unwrap();
        assert_eq!(backend.provider(), "scripted");
    }

    #[test]
    fn unknown_provider_is_unsupported() {
        let mut config = Config::minimal_for_testing();
        config.llm.provider = Some("carrier-pigeon".into());
        assert!(matches!(
            from_config(&config),
            Err(LlmError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn budget_wraps_backend() {
        let mut config = Config::minimal_for_testing();
        config.llm.provider = Some("scripted".into());
        config.llm.budget = Some(1);
        let backend = from_config(&config).unwrap();

        let request = || {
            CompletionRequest::from_prompt(
                "t-1",
                devflow_utils::types::PhaseId::Analysis,
                "m",
                std::time::Duration::from_secs(5),
                "",
                "p",
            )
        };
        backend.complete(request()).await.unwrap();
        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
    }
}
