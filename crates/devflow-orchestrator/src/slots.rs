use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use devflow_utils::types::TenantId;

use crate::quota::QuotaGate;

/// Lease on one quota slot, reserved at submission and returned when the
/// task reaches a terminal state.
///
/// Release is idempotent: whichever of cancellation and the worker gets
/// there first returns the slot, the other is a no-op.
pub struct AgentSlot {
    tenant: TenantId,
    quota: Arc<dyn QuotaGate>,
    released: AtomicBool,
}

impl AgentSlot {
    pub(crate) fn reserved(tenant: TenantId, quota: Arc<dyn QuotaGate>) -> Self {
        Self {
            tenant,
            quota,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Return the slot to the quota collaborator. Returns `false` if it was
    /// already released.
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.quota.release(&self.tenant).await;
        debug!(tenant_id = %self.tenant, "Agent slot released");
        true
    }
}

impl Drop for AgentSlot {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropped without an explicit release, e.g. the orchestrator was torn
        // down with tasks still queued.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let quota = Arc::clone(&self.quota);
                let tenant = self.tenant.clone();
                runtime.spawn(async move { quota.release(&tenant).await });
            }
            Err(_) => {
                warn!(tenant_id = %self.tenant, "Agent slot dropped outside a runtime; not released");
            }
        }
    }
}

impl std::fmt::Debug for AgentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSlot")
            .field("tenant", &self.tenant)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
