use aquaops_auth::Principal;
use aquaops_core::{OrganizationId, UserId};
use aquaops_infra::{AuditActor, AuditRecord, TenantContext};

/// Everything the auth middleware established about a request.
///
/// Present on every protected route; handlers never see a request without it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    pub tenant: TenantContext,
    pub ip: Option<String>,
}

impl RequestContext {
    pub fn organization_id(&self) -> OrganizationId {
        self.tenant.organization_id()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.principal.user_id()
    }

    pub fn audit_actor(&self) -> AuditActor {
        AuditActor::from_principal(&self.principal)
    }

    /// Audit record pre-filled with organization, actor and origin IP.
    pub fn audit(&self, action: &str, entity_type: &str) -> AuditRecord {
        AuditRecord::new(self.organization_id(), self.audit_actor(), action, entity_type).ip_address(self.ip.clone())
    }
}
