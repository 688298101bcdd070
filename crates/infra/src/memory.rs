//! In-memory store for tests and local runs.
//!
//! One lock guards every table so cascading deletes and multi-row updates are
//! trivially atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aquaops_auth::{ApiKey, ApiKeyStatus, User};
use aquaops_core::{
    ApiKeyId, Organization, OrganizationId, OrganizationStatus, PlantId, RecordId, SubscriptionState, UserId,
};

use crate::audit::{AuditEntry, AuditFilter};
use crate::records::TenantRecord;
use crate::store::{
    ApiKeyStore, AuditStore, OrganizationStore, ProcessedEventStore, StoreError, StoreResult, TenantRecordStore,
    UserStore,
};

#[derive(Debug, Default)]
struct Tables {
    organizations: HashMap<OrganizationId, Organization>,
    users: HashMap<(OrganizationId, UserId), User>,
    api_keys: HashMap<(OrganizationId, ApiKeyId), ApiKey>,
    audit: Vec<AuditEntry>,
    processed_events: HashMap<String, DateTime<Utc>>,
    records: HashMap<(OrganizationId, String, RecordId), TenantRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_audit_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every audit append fail (exercises best-effort auditing).
    pub fn set_fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }
}

#[async_trait]
impl OrganizationStore for InMemoryStore {
    async fn create_organization(&self, organization: &Organization, owner: &User) -> StoreResult<()> {
        let mut t = self.write()?;
        if t.organizations.values().any(|o| o.slug == organization.slug) {
            return Err(StoreError::Conflict(format!("slug '{}' is taken", organization.slug)));
        }
        t.organizations.insert(organization.id, organization.clone());
        t.users.insert((organization.id, owner.id), owner.clone());
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        Ok(self.read()?.organizations.get(&id).cloned())
    }

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        Ok(self.read()?.organizations.values().find(|o| o.slug == slug).cloned())
    }

    async fn find_organization_by_billing_customer(&self, customer_id: &str) -> StoreResult<Option<Organization>> {
        Ok(self
            .read()?
            .organizations
            .values()
            .find(|o| o.subscription.billing_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        let mut orgs: Vec<Organization> = self.read()?.organizations.values().cloned().collect();
        orgs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orgs)
    }

    async fn set_organization_status(
        &self,
        id: OrganizationId,
        status: OrganizationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Organization> {
        let mut t = self.write()?;
        let org = t.organizations.get_mut(&id).ok_or(StoreError::NotFound)?;
        org.status = status;
        org.updated_at = at;
        Ok(org.clone())
    }

    async fn update_subscription(
        &self,
        id: OrganizationId,
        expected_updated_at: DateTime<Utc>,
        state: &SubscriptionState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut t = self.write()?;
        if let Some(customer) = &state.billing_customer_id {
            let taken = t
                .organizations
                .values()
                .any(|o| o.id != id && o.subscription.billing_customer_id.as_ref() == Some(customer));
            if taken {
                return Err(StoreError::Conflict("billing customer already linked".into()));
            }
        }
        let org = t.organizations.get_mut(&id).ok_or(StoreError::NotFound)?;
        if org.updated_at != expected_updated_at {
            return Ok(false);
        }
        org.subscription = state.clone();
        org.updated_at = at;
        Ok(true)
    }

    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool> {
        let mut t = self.write()?;
        if t.organizations.remove(&id).is_none() {
            return Ok(false);
        }
        t.users.retain(|(org, _), _| *org != id);
        t.api_keys.retain(|(org, _), _| *org != id);
        t.audit.retain(|e| e.organization_id != id);
        t.records.retain(|(org, _, _), _| *org != id);
        Ok(true)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.write()?;
        if !t.organizations.contains_key(&user.organization_id) {
            return Err(StoreError::NotFound);
        }
        let taken = t
            .users
            .values()
            .any(|u| u.organization_id == user.organization_id && u.email == user.email);
        if taken {
            return Err(StoreError::Conflict(format!("email '{}' already exists", user.email)));
        }
        t.users.insert((user.organization_id, user.id), user.clone());
        Ok(())
    }

    async fn get_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&(organization_id, id)).cloned())
    }

    async fn find_user_by_email(&self, organization_id: OrganizationId, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.organization_id == organization_id && u.email == email)
            .cloned())
    }

    async fn list_users(&self, organization_id: OrganizationId) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .read()?
            .users
            .values()
            .filter(|u| u.organization_id == organization_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn count_users(&self, organization_id: OrganizationId) -> StoreResult<usize> {
        Ok(self
            .read()?
            .users
            .keys()
            .filter(|(org, _)| *org == organization_id)
            .count())
    }

    async fn update_user(&self, organization_id: OrganizationId, user: &User) -> StoreResult<()> {
        let mut t = self.write()?;
        let existing = t
            .users
            .get_mut(&(organization_id, user.id))
            .ok_or(StoreError::NotFound)?;
        existing.role = user.role;
        existing.plant_id = user.plant_id;
        existing.status = user.status;
        existing.name = user.name.clone();
        existing.password_hash = user.password_hash.clone();
        existing.updated_at = user.updated_at;
        Ok(())
    }

    async fn delete_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<bool> {
        Ok(self.write()?.users.remove(&(organization_id, id)).is_some())
    }

    async fn save_ownership_transfer(
        &self,
        organization_id: OrganizationId,
        previous_owner: &User,
        new_owner: &User,
    ) -> StoreResult<()> {
        let mut t = self.write()?;
        for user in [previous_owner, new_owner] {
            if !t.users.contains_key(&(organization_id, user.id)) {
                return Err(StoreError::NotFound);
            }
        }
        for user in [previous_owner, new_owner] {
            t.users.insert((organization_id, user.id), user.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryStore {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        let mut t = self.write()?;
        if !t.organizations.contains_key(&key.organization_id) {
            return Err(StoreError::NotFound);
        }
        t.api_keys.insert((key.organization_id, key.id), key.clone());
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>> {
        Ok(self
            .read()?
            .api_keys
            .values()
            .filter(|k| k.prefix == prefix)
            .cloned()
            .collect())
    }

    async fn list_api_keys(&self, organization_id: OrganizationId) -> StoreResult<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .read()?
            .api_keys
            .values()
            .filter(|k| k.organization_id == organization_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(keys)
    }

    async fn revoke_api_key(&self, organization_id: OrganizationId, id: ApiKeyId) -> StoreResult<bool> {
        let mut t = self.write()?;
        match t.api_keys.get_mut(&(organization_id, id)) {
            Some(key) => {
                key.status = ApiKeyStatus::Revoked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_api_key(
        &self,
        organization_id: OrganizationId,
        id: ApiKeyId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut t = self.write()?;
        let key = t
            .api_keys
            .get_mut(&(organization_id, id))
            .ok_or(StoreError::NotFound)?;
        key.last_used_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("audit writes disabled".into()));
        }
        self.write()?.audit.push(entry.clone());
        Ok(())
    }

    async fn query_audit(&self, organization_id: OrganizationId, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>> {
        let t = self.read()?;
        let mut entries: Vec<AuditEntry> = t
            .audit
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(entries
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryStore {
    async fn try_claim_event(&self, event_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.write()?;
        if t.processed_events.contains_key(event_id) {
            return Ok(false);
        }
        t.processed_events.insert(event_id.to_string(), at);
        Ok(true)
    }

    async fn release_event(&self, event_id: &str) -> StoreResult<()> {
        self.write()?.processed_events.remove(event_id);
        Ok(())
    }
}

#[async_trait]
impl TenantRecordStore for InMemoryStore {
    async fn insert_record(&self, record: &TenantRecord) -> StoreResult<()> {
        let mut t = self.write()?;
        let key = (record.organization_id, record.kind.clone(), record.id);
        if t.records.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{} {} already exists", record.kind, record.id)));
        }
        t.records.insert(key, record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        id: RecordId,
    ) -> StoreResult<Option<TenantRecord>> {
        Ok(self
            .read()?
            .records
            .get(&(organization_id, kind.to_string(), id))
            .cloned())
    }

    async fn list_records(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        plant: Option<PlantId>,
    ) -> StoreResult<Vec<TenantRecord>> {
        let mut records: Vec<TenantRecord> = self
            .read()?
            .records
            .values()
            .filter(|r| r.organization_id == organization_id && r.kind == kind)
            .filter(|r| plant.is_none() || r.plant_id == plant)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn count_records(&self, organization_id: OrganizationId, kind: &str) -> StoreResult<usize> {
        Ok(self
            .read()?
            .records
            .keys()
            .filter(|(org, k, _)| *org == organization_id && k == kind)
            .count())
    }

    async fn delete_record(&self, organization_id: OrganizationId, kind: &str, id: RecordId) -> StoreResult<bool> {
        Ok(self
            .write()?
            .records
            .remove(&(organization_id, kind.to_string(), id))
            .is_some())
    }
}
