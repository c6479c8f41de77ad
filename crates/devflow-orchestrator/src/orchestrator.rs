use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info};
use uuid::Uuid;

use devflow_config::Config;
use devflow_gate::QualityGate;
use devflow_llm::CompletionBackend;
use devflow_progress::{ProgressRelay, ProgressSnapshot, ProgressSubscription, ProgressTracker};
use devflow_task::{InMemoryTaskStore, Task, TaskStore};
use devflow_utils::error::DevflowError;
use devflow_utils::logging::task_span;
use devflow_utils::types::{TaskId, TaskSpec, TaskStatus, TenantId};

use crate::executor::PhaseExecutor;
use crate::handle::TaskHandle;
use crate::notify::Notifier;
use crate::quota::{InMemoryQuota, QuotaGate};
use crate::slots::AgentSlot;
use crate::worker::Worker;

/// Running cap of the built-in quota when none is supplied.
pub const DEFAULT_TENANT_CAP: usize = 4;

pub(crate) struct Inner {
    config: Arc<Config>,
    pub(crate) executor: PhaseExecutor,
    pub(crate) gate: QualityGate,
    quota: Arc<dyn QuotaGate>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) notifiers: Vec<Arc<dyn Notifier>>,
    pub(crate) tracker: ProgressTracker,
    tasks: Mutex<HashMap<TaskId, Arc<TaskHandle>>>,
    admission: tokio::sync::Mutex<()>,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<TaskHandle>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, task_id: &TaskId) -> Option<Arc<TaskHandle>> {
        self.tasks().get(task_id).cloned()
    }

    /// Drop a terminal task from the task table and close its progress feed.
    pub(crate) fn teardown(&self, task_id: &TaskId) {
        self.tasks().remove(task_id);
        self.tracker.close(task_id);
    }

    fn running_count(&self, tenant: &TenantId) -> usize {
        self.tasks()
            .values()
            .map(|h| h.snapshot())
            .filter(|t| &t.tenant_id == tenant && t.status.is_active())
            .count()
    }
}

/// Owns the task table and drives tasks through the pipeline.
///
/// Cheap to clone; clones share the same task table.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    #[must_use]
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Validate a submission, reserve a quota slot, and queue the task.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed submissions; no quota is reserved
    /// - `QuotaExceeded` when the quota collaborator denies admission
    /// - `System` when the task cannot be stored; the slot is returned
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, DevflowError> {
        spec.validate()?;

        let inner = &self.inner;
        let tenant = spec.tenant_id.clone();
        if !inner.quota.try_admit(&tenant).await? {
            info!(tenant_id = %tenant, "Submission denied by quota");
            return Err(DevflowError::QuotaExceeded {
                tenant: tenant.to_string(),
            });
        }

        let task = Task::admitted(TaskId::generate(), spec);
        let task_id = task.id.clone();
        if let Err(err) = inner.store.insert(&task).await {
            inner.quota.release(&tenant).await;
            return Err(err.into());
        }

        inner
            .tracker
            .register(&task_id, TaskStatus::Queued, 0, &task.current_step);
        let slot = AgentSlot::reserved(tenant.clone(), Arc::clone(&inner.quota));
        inner
            .tasks()
            .insert(task_id.clone(), Arc::new(TaskHandle::new(task, slot)));

        info!(task_id = %task_id, tenant_id = %tenant, "Task submitted");
        Ok(task_id)
    }

    /// Run a queued task to a terminal state and return its final snapshot.
    ///
    /// The tenant's running cap is checked again before the task starts; a
    /// task refused here stays queued and can be run later. The task runs on
    /// its own tokio task: dropping the returned future detaches from it
    /// without stopping it.
    ///
    /// # Errors
    ///
    /// - `TaskNotFound` / `InvalidTransition` if the task is not queued
    /// - `QuotaExceeded` when the tenant is at its running cap
    /// - `System` when the task store fails; the task keeps its last durable
    ///   state
    pub async fn run(&self, task_id: &TaskId) -> Result<Arc<Task>, DevflowError> {
        let handle = self.live_handle(task_id, "run").await?;
        let tenant = handle.snapshot().tenant_id.clone();
        let span = task_span(task_id.as_str(), tenant.as_str());

        let this = self.clone();
        let driver = tokio::spawn(
            async move {
                this.admit(&handle).await?;
                Worker::new(Arc::clone(&this.inner), handle).drive().await
            }
            .instrument(span),
        );
        driver.await.map_err(|err| {
            DevflowError::system(format!("worker for task {task_id} stopped: {err}"))
        })?
    }

    /// [`Orchestrator::run`] on a background task.
    pub fn spawn(&self, task_id: TaskId) -> JoinHandle<Result<Arc<Task>, DevflowError>> {
        let this = self.clone();
        tokio::spawn(async move { this.run(&task_id).await })
    }

    async fn admit(&self, handle: &TaskHandle) -> Result<(), DevflowError> {
        let inner = &self.inner;
        let _admission = inner.admission.lock().await;

        let task = handle.snapshot();
        if task.status != TaskStatus::Queued {
            return Err(DevflowError::InvalidTransition {
                task_id: task.id.to_string(),
                from: task.status,
                action: "run".to_string(),
            });
        }

        let cap = inner.quota.concurrency_cap(&task.tenant_id).await?;
        let running = inner.running_count(&task.tenant_id);
        if running >= cap {
            info!(
                task_id = %task.id,
                tenant_id = %task.tenant_id,
                running,
                cap,
                "Running cap reached; task stays queued"
            );
            return Err(DevflowError::QuotaExceeded {
                tenant: task.tenant_id.to_string(),
            });
        }

        let agent_id = format!("agent-{}", Uuid::new_v4().simple());
        handle
            .commit(inner.store.as_ref(), move |t| t.start(agent_id))
            .await?;
        inner
            .tracker
            .set_status(&task.id, TaskStatus::Running, "Starting");
        Ok(())
    }

    /// Cancel a queued or running task.
    ///
    /// The slot is returned at once. A running task stops before its next
    /// phase; the result of a phase in flight is discarded.
    ///
    /// # Errors
    ///
    /// `TaskNotFound`, or `InvalidTransition` if the task is terminal.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<Arc<Task>, DevflowError> {
        let inner = &self.inner;
        let handle = self.live_handle(task_id, "cancel").await?;

        handle.commit(inner.store.as_ref(), Task::cancel).await?;
        handle.cancel_token().cancel();
        handle.slot().release().await;
        inner
            .tracker
            .fail(task_id, TaskStatus::Cancelled, "Cancelled by request");
        inner.teardown(task_id);

        info!(task_id = %task_id, "Task cancelled");
        Ok(handle.snapshot())
    }

    /// Current state of a task: the live snapshot while it is in the task
    /// table, the stored copy afterwards.
    ///
    /// # Errors
    ///
    /// `TaskNotFound`, or `System` if the store cannot be read.
    pub async fn task(&self, task_id: &TaskId) -> Result<Arc<Task>, DevflowError> {
        if let Some(handle) = self.inner.handle(task_id) {
            return Ok(handle.snapshot());
        }
        match self.inner.store.load(task_id).await? {
            Some(task) => Ok(Arc::new(task)),
            None => Err(DevflowError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Tasks of a tenant (or all tenants) from the store.
    ///
    /// # Errors
    ///
    /// `System` if the store cannot be read.
    pub async fn list(&self, tenant: Option<&TenantId>) -> Result<Vec<Task>, DevflowError> {
        Ok(self.inner.store.list(tenant).await?)
    }

    /// Watch the full task state of a live task.
    #[must_use]
    pub fn watch(&self, task_id: &TaskId) -> Option<watch::Receiver<Arc<Task>>> {
        self.inner.handle(task_id).map(|h| h.watch())
    }

    /// Progress feed of a live task: current snapshot first, then live events.
    #[must_use]
    pub fn subscribe(&self, task_id: &TaskId) -> Option<ProgressSubscription> {
        self.inner.tracker.subscribe(task_id)
    }

    #[must_use]
    pub fn progress(&self, task_id: &TaskId) -> Option<ProgressSnapshot> {
        self.inner.tracker.snapshot(task_id)
    }

    /// Tasks of `tenant` currently holding an agent slot.
    #[must_use]
    pub fn running_count(&self, tenant: &TenantId) -> usize {
        self.inner.running_count(tenant)
    }

    /// Tasks still in the task table (queued or running).
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks().len()
    }

    async fn live_handle(&self, task_id: &TaskId, action: &str) -> Result<Arc<TaskHandle>, DevflowError> {
        if let Some(handle) = self.inner.handle(task_id) {
            return Ok(handle);
        }
        match self.inner.store.load(task_id).await? {
            Some(task) => Err(DevflowError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                action: action.to_string(),
            }),
            None => Err(DevflowError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }
}

/// Assembles an [`Orchestrator`] from configuration and collaborators.
///
/// Unset collaborators fall back to process-local defaults: the backend
/// named by `[llm] provider`, an [`InMemoryQuota`] with
/// [`DEFAULT_TENANT_CAP`], and an [`InMemoryTaskStore`].
pub struct OrchestratorBuilder {
    config: Config,
    backend: Option<Arc<dyn CompletionBackend>>,
    quota: Option<Arc<dyn QuotaGate>>,
    store: Option<Arc<dyn TaskStore>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    relays: Vec<Arc<dyn ProgressRelay>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: None,
            quota: None,
            store: None,
            notifiers: Vec::new(),
            relays: Vec::new(),
        }
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn quota(mut self, quota: Arc<dyn QuotaGate>) -> Self {
        self.quota = Some(quota);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    #[must_use]
    pub fn relay(mut self, relay: Arc<dyn ProgressRelay>) -> Self {
        self.relays.push(relay);
        self
    }

    /// # Errors
    ///
    /// `Config` for out-of-range settings, `Llm` if the configured backend
    /// cannot be constructed.
    pub fn build(self) -> Result<Orchestrator, DevflowError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let backend = match self.backend {
            Some(backend) => backend,
            None => devflow_llm::from_config(&config)?,
        };
        let tracker = self
            .relays
            .into_iter()
            .fold(ProgressTracker::new(config.progress_capacity()), |tracker, relay| {
                tracker.with_relay(relay)
            });

        let inner = Inner {
            executor: PhaseExecutor::new(backend, Arc::clone(&config)),
            gate: QualityGate::from_config(&config),
            quota: self
                .quota
                .unwrap_or_else(|| Arc::new(InMemoryQuota::new(DEFAULT_TENANT_CAP))),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
            notifiers: self.notifiers,
            tracker,
            tasks: Mutex::new(HashMap::new()),
            admission: tokio::sync::Mutex::new(()),
            config,
        };
        Ok(Orchestrator {
            inner: Arc::new(inner),
        })
    }
}
