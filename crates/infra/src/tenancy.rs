//! Tenant Guard: loads the caller's organization and refuses inactive tenants.

use std::sync::Arc;

use thiserror::Error;

use aquaops_auth::Principal;
use aquaops_core::{Organization, OrganizationId, Plan, PlanLimits};

use crate::store::{Store, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("organization is not active")]
    TenantInactive,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The active organization a request runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    organization: Organization,
}

impl TenantContext {
    pub fn organization_id(&self) -> OrganizationId {
        self.organization.id
    }

    pub fn plan(&self) -> Plan {
        self.organization.plan()
    }

    pub fn limits(&self) -> PlanLimits {
        self.plan().limits()
    }

    pub fn organization(&self) -> &Organization {
        &self.organization
    }
}

#[derive(Clone)]
pub struct TenantGuard {
    store: Arc<dyn Store>,
}

impl TenantGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `cached` is the row the identity resolver already fetched, if any; it
    /// is only reused when it belongs to the principal's organization.
    pub async fn load_tenant(
        &self,
        principal: &Principal,
        cached: Option<Organization>,
    ) -> Result<TenantContext, TenantError> {
        let organization = match cached.filter(|o| o.id == principal.organization_id) {
            Some(org) => org,
            None => self
                .store
                .get_organization(principal.organization_id)
                .await?
                .ok_or(TenantError::Unauthenticated)?,
        };

        if !organization.status.is_active() {
            tracing::info!(
                organization_id = %organization.id,
                status = %organization.status,
                "request against inactive organization"
            );
            return Err(TenantError::TenantInactive);
        }
        Ok(TenantContext { organization })
    }
}
