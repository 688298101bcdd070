//! Storage contracts.
//!
//! Every tenant-owned lookup takes the `OrganizationId` first; there is no
//! way to fetch a user, key, audit entry or record by its id alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use aquaops_auth::{ApiKey, User};
use aquaops_core::{
    ApiKeyId, Organization, OrganizationId, OrganizationStatus, PlantId, RecordId, SubscriptionState, UserId,
};

use crate::audit::{AuditEntry, AuditFilter};
use crate::records::TenantRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Create an organization together with its founding owner, atomically.
    async fn create_organization(&self, organization: &Organization, owner: &User) -> StoreResult<()>;

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_billing_customer(&self, customer_id: &str) -> StoreResult<Option<Organization>>;

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>>;

    async fn set_organization_status(
        &self,
        id: OrganizationId,
        status: OrganizationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Organization>;

    /// Compare-and-set on `updated_at`: the write happens only if the row was
    /// not modified since it was read. `Ok(false)` when another writer won.
    async fn update_subscription(
        &self,
        id: OrganizationId,
        expected_updated_at: DateTime<Utc>,
        state: &SubscriptionState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Delete an organization and everything it owns. `false` if it did not exist.
    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `Conflict` when the email is already taken in the organization.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, organization_id: OrganizationId, email: &str) -> StoreResult<Option<User>>;

    async fn list_users(&self, organization_id: OrganizationId) -> StoreResult<Vec<User>>;

    async fn count_users(&self, organization_id: OrganizationId) -> StoreResult<usize>;

    /// Persist role, plant and status changes.
    async fn update_user(&self, organization_id: OrganizationId, user: &User) -> StoreResult<()>;

    async fn delete_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<bool>;

    /// Persist both sides of an ownership transfer atomically.
    async fn save_ownership_transfer(
        &self,
        organization_id: OrganizationId,
        previous_owner: &User,
        new_owner: &User,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()>;

    /// Candidates for identity resolution. The organization is not known yet
    /// at this point; the caller verifies the hash before trusting any row.
    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>>;

    async fn list_api_keys(&self, organization_id: OrganizationId) -> StoreResult<Vec<ApiKey>>;

    /// `false` when no key with that id exists in the organization.
    async fn revoke_api_key(&self, organization_id: OrganizationId, id: ApiKeyId) -> StoreResult<bool>;

    async fn touch_api_key(&self, organization_id: OrganizationId, id: ApiKeyId, at: DateTime<Utc>)
    -> StoreResult<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Newest first.
    async fn query_audit(&self, organization_id: OrganizationId, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>>;
}

#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically claim a provider event id. `false` if already claimed.
    async fn try_claim_event(&self, event_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Give a claim back so a retry can process the event.
    async fn release_event(&self, event_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait TenantRecordStore: Send + Sync {
    async fn insert_record(&self, record: &TenantRecord) -> StoreResult<()>;

    async fn get_record(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        id: RecordId,
    ) -> StoreResult<Option<TenantRecord>>;

    /// Oldest first; `plant` narrows to one plant.
    async fn list_records(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        plant: Option<PlantId>,
    ) -> StoreResult<Vec<TenantRecord>>;

    async fn count_records(&self, organization_id: OrganizationId, kind: &str) -> StoreResult<usize>;

    async fn delete_record(&self, organization_id: OrganizationId, kind: &str, id: RecordId) -> StoreResult<bool>;
}

/// Everything the service needs from persistence.
pub trait Store:
    OrganizationStore + UserStore + ApiKeyStore + AuditStore + ProcessedEventStore + TenantRecordStore
{
}

impl<T> Store for T where
    T: OrganizationStore + UserStore + ApiKeyStore + AuditStore + ProcessedEventStore + TenantRecordStore
{
}
