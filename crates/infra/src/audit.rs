//! Audit Recorder: append-only trail of mutations, written best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use aquaops_auth::{Actor, Principal};
use aquaops_core::{ApiKeyId, AuditEntryId, OrganizationId, UserId};
use aquaops_observability::{Counter, MetricsSink};

use crate::store::{Store, StoreResult};

pub const DEFAULT_AUDIT_LIMIT: u32 = 50;
pub const MAX_AUDIT_LIMIT: u32 = 500;

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditActor {
    User(UserId),
    /// A super admin acting through an impersonation token.
    ImpersonatedUser(UserId),
    ApiKey(ApiKeyId),
    SystemBilling,
    SuperAdmin,
}

impl AuditActor {
    pub fn from_principal(principal: &Principal) -> Self {
        match &principal.actor {
            Actor::User {
                user_id,
                impersonator: Some(_),
                ..
            } => AuditActor::ImpersonatedUser(*user_id),
            Actor::User { user_id, .. } => AuditActor::User(*user_id),
            Actor::ApiKey { api_key_id, .. } => AuditActor::ApiKey(*api_key_id),
        }
    }

    pub fn label(&self) -> String {
        match self {
            AuditActor::User(id) => format!("user:{id}"),
            AuditActor::ImpersonatedUser(id) => format!("super_admin as user:{id}"),
            AuditActor::ApiKey(id) => format!("api_key:{id}"),
            AuditActor::SystemBilling => "system:billing".to_string(),
            AuditActor::SuperAdmin => "super_admin".to_string(),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            AuditActor::User(id) | AuditActor::ImpersonatedUser(id) => Some(*id),
            _ => None,
        }
    }
}

/// A persisted audit log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub organization_id: OrganizationId,
    pub user_id: Option<UserId>,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Builder for an audit entry.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    organization_id: OrganizationId,
    actor: AuditActor,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    old_values: Option<JsonValue>,
    new_values: Option<JsonValue>,
    ip_address: Option<String>,
}

impl AuditRecord {
    pub fn new(
        organization_id: OrganizationId,
        actor: AuditActor,
        action: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            actor,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            old_values: None,
            new_values: None,
            ip_address: None,
        }
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn old_values(mut self, value: JsonValue) -> Self {
        self.old_values = Some(value);
        self
    }

    pub fn new_values(mut self, value: JsonValue) -> Self {
        self.new_values = Some(value);
        self
    }

    pub fn ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn into_entry(self, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(),
            organization_id: self.organization_id,
            user_id: self.actor.user_id(),
            actor: self.actor.label(),
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            old_values: self.old_values,
            new_values: self.new_values,
            ip_address: self.ip_address,
            created_at: at,
        }
    }
}

/// Query filter for the audit log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditFilter {
    /// Requested limit clamped to `1..=500`, default 50.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_AUDIT_LIMIT)
    }

    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.as_deref().is_none_or(|a| entry.action == a)
            && self.entity_type.as_deref().is_none_or(|t| entry.entity_type == t)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| entry.entity_id.as_deref() == Some(id))
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at <= to)
    }
}

/// Writes audit entries without ever failing the caller.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
    metrics: Arc<dyn MetricsSink>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Append an entry. A storage failure is logged and counted, never returned.
    pub async fn record(&self, record: AuditRecord) {
        let entry = record.into_entry(Utc::now());
        match self.store.append_audit(&entry).await {
            Ok(()) => self.metrics.increment(Counter::AuditWrites),
            Err(e) => {
                self.metrics.increment(Counter::AuditWriteFailures);
                tracing::error!(
                    error = %e,
                    organization_id = %entry.organization_id,
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    "audit write failed"
                );
            }
        }
    }

    pub async fn query(&self, organization_id: OrganizationId, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>> {
        self.store.query_audit(organization_id, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use aquaops_observability::InMemoryMetrics;
    use chrono::Duration;

    fn recorder() -> (AuditRecorder, Arc<InMemoryStore>, Arc<InMemoryMetrics>) {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let recorder = AuditRecorder::new(store.clone(), metrics.clone());
        (recorder, store, metrics)
    }

    #[test]
    fn impersonated_sessions_name_the_super_admin() {
        let org = OrganizationId::new();
        let user = UserId::new();
        let plain = Principal::user(org, user, aquaops_auth::Role::Owner, None);
        let impersonated = plain.clone().with_impersonator("super_admin");

        assert_eq!(AuditActor::from_principal(&plain).label(), format!("user:{user}"));
        let actor = AuditActor::from_principal(&impersonated);
        assert_eq!(actor.label(), format!("super_admin as user:{user}"));
        assert_eq!(actor.user_id(), Some(user));
    }

    #[tokio::test]
    async fn write_failure_is_swallowed_and_counted() {
        let (recorder, store, metrics) = recorder();
        store.set_fail_audit_writes(true);

        let org = OrganizationId::new();
        recorder
            .record(AuditRecord::new(org, AuditActor::SuperAdmin, "organization.suspended", "organization"))
            .await;

        assert_eq!(metrics.get(Counter::AuditWriteFailures), 1);
        store.set_fail_audit_writes(false);
        assert!(recorder.query(org, &AuditFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_is_tenant_scoped_and_newest_first() {
        let (recorder, _store, metrics) = recorder();
        let org = OrganizationId::new();
        let other = OrganizationId::new();
        let user = UserId::new();

        for action in ["plant.created", "plant.deleted"] {
            recorder
                .record(AuditRecord::new(org, AuditActor::User(user), action, "plant").entity_id("p1"))
                .await;
        }
        recorder
            .record(AuditRecord::new(other, AuditActor::SystemBilling, "subscription.changed", "organization"))
            .await;

        let entries = recorder.query(org, &AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "plant.deleted");
        assert_eq!(entries[0].actor, format!("user:{user}"));
        assert_eq!(entries[0].user_id, Some(user));
        assert_eq!(metrics.get(Counter::AuditWrites), 3);

        let filtered = recorder
            .query(
                org,
                &AuditFilter {
                    action: Some("plant.created".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(AuditFilter::default().effective_limit(), 50);
        let huge = AuditFilter {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(huge.effective_limit(), 500);
    }

    #[test]
    fn date_range_filter() {
        let now = Utc::now();
        let entry = AuditRecord::new(OrganizationId::new(), AuditActor::SuperAdmin, "a", "b").into_entry(now);
        let before = AuditFilter {
            to: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!before.matches(&entry));
        let around = AuditFilter {
            from: Some(now - Duration::seconds(1)),
            to: Some(now + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(around.matches(&entry));
    }
}
