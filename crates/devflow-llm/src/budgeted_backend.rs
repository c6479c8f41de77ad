//! Call-count budget for any completion backend.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use devflow_utils::error::LlmError;

use crate::types::{Completion, CompletionBackend, CompletionRequest};

/// Wraps a backend and refuses calls once `limit` attempts have been made.
///
/// The budget tracks attempted calls, not successful ones. A failed call still
/// consumes its slot so executor retries cannot bypass the limit.
pub struct BudgetedBackend {
    inner: Arc<dyn CompletionBackend>,
    budget: AtomicU32,
    limit: u32,
}

impl BudgetedBackend {
    pub fn new(inner: Arc<dyn CompletionBackend>, limit: u32) -> Self {
        debug!(limit, provider = inner.provider(), "Creating BudgetedBackend");
        Self {
            inner,
            budget: AtomicU32::new(0),
            limit,
        }
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.budget.load(Ordering::SeqCst).min(self.limit)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[async_trait]
impl CompletionBackend for BudgetedBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let current = self.budget.fetch_add(1, Ordering::SeqCst);

        if current >= self.limit {
            let attempted = current.saturating_add(1);
            warn!(
                limit = self.limit,
                attempted,
                task_id = %request.task_id,
                phase = %request.phase,
                "Completion budget exceeded"
            );
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

        let result = self.inner.complete(request).await;
        if let Err(e) = &result {
            debug!(
                call_count = current + 1,
                limit = self.limit,
                error = %e,
                "Inner backend failed (budget slot still consumed)"
            );
        }
        result
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_utils::types::PhaseId;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl CompletionBackend for Echo {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
            Ok(Completion::new(request.prompt(), "echo", "echo-1"))
        }

        fn provider(&self) -> &str {
            "echo"
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl CompletionBackend for AlwaysDown {
        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::ProviderOutage("503".into()))
        }

        fn provider(&self) -> &str {
            "down"
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::from_prompt(
            "t-1",
            PhaseId::Analysis,
            "m",
            Duration::from_secs(5),
            "",
            "hello",
        )
    }

    #[tokio::test]
    async fn calls_within_limit_pass_through() {
        let backend = BudgetedBackend::new(Arc::new(Echo), 2);
        assert_eq!(backend.complete(request()).await.unwrap().text, "hello");
        assert_eq!(backend.complete(request()).await.unwrap().text, "hello");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn calls_past_limit_are_refused() {
        let backend = BudgetedBackend::new(Arc::new(Echo), 1);
        backend.complete(request()).await.unwrap();
        let err = backend.complete(request()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::BudgetExceeded {
                limit: 1,
                attempted: 2
            }
        );
    }

    #[tokio::test]
    async fn failures_consume_budget() {
        let backend = BudgetedBackend::new(Arc::new(AlwaysDown), 1);
        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::ProviderOutage(_))
        ));
        assert!(matches!(
            backend.complete(request()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
        assert_eq!(backend.provider(), "down");
    }
}
