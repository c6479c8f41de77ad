//! Quota collaborator seam.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use devflow_utils::error::DevflowError;
use devflow_utils::types::TenantId;

/// Authoritative per-tenant admission control.
///
/// `try_admit` reserves one slot and `release` returns it. The orchestrator
/// also asks for the tenant's running cap on every `Queued -> Running`
/// transition, so a cap lowered after admission is still honored.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Reserve one slot. `Ok(false)` is a denial.
    ///
    /// # Errors
    ///
    /// The quota service could not be consulted.
    async fn try_admit(&self, tenant: &TenantId) -> Result<bool, DevflowError>;

    /// Return a slot reserved by [`QuotaGate::try_admit`].
    async fn release(&self, tenant: &TenantId);

    /// Maximum number of tasks the tenant may have running at once.
    ///
    /// # Errors
    ///
    /// The quota service could not be consulted.
    async fn concurrency_cap(&self, tenant: &TenantId) -> Result<usize, DevflowError>;
}

#[derive(Debug, Default)]
struct Ledger {
    caps: HashMap<TenantId, usize>,
    reserved: HashMap<TenantId, usize>,
}

/// Process-local quota with a default cap and per-tenant overrides.
#[derive(Debug)]
pub struct InMemoryQuota {
    default_cap: usize,
    ledger: Mutex<Ledger>,
}

impl InMemoryQuota {
    #[must_use]
    pub fn new(default_cap: usize) -> Self {
        Self {
            default_cap,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    #[must_use]
    pub fn with_cap(self, tenant: impl Into<TenantId>, cap: usize) -> Self {
        self.set_cap(tenant, cap);
        self
    }

    /// Change a tenant's cap. Slots already reserved are kept.
    pub fn set_cap(&self, tenant: impl Into<TenantId>, cap: usize) {
        self.lock().caps.insert(tenant.into(), cap);
    }

    /// Slots currently reserved by the tenant.
    #[must_use]
    pub fn reserved(&self, tenant: &TenantId) -> usize {
        self.lock().reserved.get(tenant).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cap_of(&self, ledger: &Ledger, tenant: &TenantId) -> usize {
        ledger.caps.get(tenant).copied().unwrap_or(self.default_cap)
    }
}

#[async_trait]
impl QuotaGate for InMemoryQuota {
    async fn try_admit(&self, tenant: &TenantId) -> Result<bool, DevflowError> {
        let mut ledger = self.lock();
        let cap = self.cap_of(&ledger, tenant);
        let reserved = ledger.reserved.entry(tenant.clone()).or_insert(0);
        if *reserved >= cap {
            info!(tenant_id = %tenant, reserved = *reserved, cap, "Quota denied");
            return Ok(false);
        }
        *reserved += 1;
        debug!(tenant_id = %tenant, reserved = *reserved, cap, "Quota slot reserved");
        Ok(true)
    }

    async fn release(&self, tenant: &TenantId) {
        let mut ledger = self.lock();
        if let Some(reserved) = ledger.reserved.get_mut(tenant) {
            *reserved = reserved.saturating_sub(1);
            debug!(tenant_id = %tenant, reserved = *reserved, "Quota slot released");
        }
    }

    async fn concurrency_cap(&self, tenant: &TenantId) -> Result<usize, DevflowError> {
        let ledger = self.lock();
        Ok(self.cap_of(&ledger, tenant))
    }
}
