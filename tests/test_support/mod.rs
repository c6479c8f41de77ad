//! Shared harness for the integration tests.
//!
//! Every orchestrator built here runs against a [`ScriptedBackend`], an
//! [`InMemoryQuota`] and an [`InMemoryTaskStore`] unless a test swaps one out,
//! with millisecond retry backoff from `Config::minimal_for_testing`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use devflow::config::Config;
use devflow::llm::{ScriptedBackend, passing};
use devflow::orchestrator::{InMemoryQuota, Notifier, Orchestrator, TaskEvent};
use devflow::task::{InMemoryTaskStore, TaskStore};

pub(crate) use devflow_utils::test_support::*;

/// An orchestrator plus handles on its collaborators.
pub(crate) struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: Arc<ScriptedBackend>,
    pub quota: Arc<InMemoryQuota>,
    pub store: Arc<dyn TaskStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) struct HarnessBuilder {
    backend: ScriptedBackend,
    quota: InMemoryQuota,
    store: Option<Arc<dyn TaskStore>>,
}

impl HarnessBuilder {
    pub(crate) fn backend(mut self, backend: ScriptedBackend) -> Self {
        self.backend = backend;
        self
    }

    pub(crate) fn quota(mut self, quota: InMemoryQuota) -> Self {
        self.quota = quota;
        self
    }

    pub(crate) fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn build(self) -> Harness {
        let backend = Arc::new(self.backend);
        let quota = Arc::new(self.quota);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let notifier = Arc::new(RecordingNotifier::default());

        let orchestrator = Orchestrator::builder(Config::minimal_for_testing())
            .backend(Arc::clone(&backend) as _)
            .quota(Arc::clone(&quota) as _)
            .store(Arc::clone(&store))
            .notifier(Arc::clone(&notifier) as _)
            .build()
            .expect("test orchestrator builds");

        Harness {
            orchestrator,
            backend,
            quota,
            store,
            notifier,
        }
    }
}

/// Harness whose backend passes every phase and the quality gate.
pub(crate) fn harness() -> HarnessBuilder {
    HarnessBuilder {
        backend: passing(),
        quota: InMemoryQuota::new(4),
        store: None,
    }
}

/// Collects every terminal event it receives.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &TaskEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Notifier whose endpoint is always down.
pub(crate) struct UnreachableNotifier;

#[async_trait]
impl Notifier for UnreachableNotifier {
    async fn notify(&self, _event: &TaskEvent) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}
