//! Postgres-backed store.
//!
//! Every tenant-owned query carries `organization_id` in its WHERE clause or
//! primary key, so cross-tenant access cannot be expressed. Queries are checked
//! at runtime (no compile-time database needed).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use aquaops_auth::{ApiKey, Capability, User};
use aquaops_core::{
    ApiKeyId, AuditEntryId, Organization, OrganizationId, OrganizationStatus, PlantId, RecordId,
    SubscriptionState, UserId,
};

use crate::audit::{AuditEntry, AuditFilter};
use crate::records::TenantRecord;
use crate::store::{
    ApiKeyStore, AuditStore, OrganizationStore, ProcessedEventStore, StoreError, StoreResult, TenantRecordStore,
    UserStore,
};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

const ORGANIZATION_COLUMNS: &str = "id, name, slug, status, plan, subscription_status, billing_customer_id, \
     billing_subscription_id, current_period_end, cancel_at_period_end, settings, created_at, updated_at";

const USER_COLUMNS: &str = "id, organization_id, email, name, role, plant_id, status, password_hash, created_at, updated_at";

const API_KEY_COLUMNS: &str = "id, organization_id, name, key_prefix, key_hash, scopes, rate_limit_per_minute, \
     status, expires_at, last_used_at, created_by, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await.map_err(db_err)?;
        tracing::info!("database schema applied");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    tracing::error!(error = %e, "database error");
    StoreError::Backend(e.to_string())
}

fn decode_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("undecodable row: {e}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(decode_err)
}

fn parse<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get::<String>(row, column)?.parse().map_err(decode_err)
}

fn organization_from_row(row: &PgRow) -> StoreResult<Organization> {
    let subscription_status: Option<String> = get(row, "subscription_status")?;
    Ok(Organization {
        id: OrganizationId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        slug: get(row, "slug")?,
        status: parse(row, "status")?,
        subscription: SubscriptionState {
            plan: parse(row, "plan")?,
            status: subscription_status.map(|s| s.parse()).transpose().map_err(decode_err)?,
            billing_customer_id: get(row, "billing_customer_id")?,
            billing_subscription_id: get(row, "billing_subscription_id")?,
            current_period_end: get(row, "current_period_end")?,
            cancel_at_period_end: get(row, "cancel_at_period_end")?,
        },
        settings: get(row, "settings")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let plant_id: Option<Uuid> = get(row, "plant_id")?;
    Ok(User {
        id: UserId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        email: get(row, "email")?,
        name: get(row, "name")?,
        role: parse(row, "role")?,
        plant_id: plant_id.map(PlantId::from_uuid),
        status: parse(row, "status")?,
        password_hash: get(row, "password_hash")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn api_key_from_row(row: &PgRow) -> StoreResult<ApiKey> {
    let scopes: JsonValue = get(row, "scopes")?;
    let scopes: Vec<Capability> = serde_json::from_value(scopes).map_err(decode_err)?;
    let rate_limit: i32 = get(row, "rate_limit_per_minute")?;
    let created_by: Option<Uuid> = get(row, "created_by")?;
    Ok(ApiKey {
        id: ApiKeyId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        name: get(row, "name")?,
        prefix: get(row, "key_prefix")?,
        key_hash: get(row, "key_hash")?,
        scopes,
        rate_limit_per_minute: u32::try_from(rate_limit).map_err(decode_err)?,
        status: parse(row, "status")?,
        expires_at: get(row, "expires_at")?,
        last_used_at: get(row, "last_used_at")?,
        created_by: created_by.map(UserId::from_uuid),
        created_at: get(row, "created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditEntry> {
    let user_id: Option<Uuid> = get(row, "user_id")?;
    Ok(AuditEntry {
        id: AuditEntryId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        user_id: user_id.map(UserId::from_uuid),
        actor: get(row, "actor")?,
        action: get(row, "action")?,
        entity_type: get(row, "entity_type")?,
        entity_id: get(row, "entity_id")?,
        old_values: get(row, "old_values")?,
        new_values: get(row, "new_values")?,
        ip_address: get(row, "ip_address")?,
        created_at: get(row, "created_at")?,
    })
}

fn record_from_row(row: &PgRow) -> StoreResult<TenantRecord> {
    let plant_id: Option<Uuid> = get(row, "plant_id")?;
    Ok(TenantRecord {
        id: RecordId::from_uuid(get(row, "id")?),
        organization_id: OrganizationId::from_uuid(get(row, "organization_id")?),
        kind: get(row, "kind")?,
        plant_id: plant_id.map(PlantId::from_uuid),
        body: get(row, "body")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn user_insert(user: &User) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO users (id, organization_id, email, name, role, plant_id, status, password_hash, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(user.id.as_uuid())
    .bind(user.organization_id.as_uuid())
    .bind(&user.email)
    .bind(&user.name)
    .bind(user.role.as_str())
    .bind(user.plant_id.map(|p| *p.as_uuid()))
    .bind(user.status.as_str())
    .bind(&user.password_hash)
    .bind(user.created_at)
    .bind(user.updated_at)
}

fn user_update(
    organization_id: OrganizationId,
    user: &User,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        UPDATE users
        SET name = $3, role = $4, plant_id = $5, status = $6, password_hash = $7, updated_at = $8
        WHERE organization_id = $1 AND id = $2
        "#,
    )
    .bind(*organization_id.as_uuid())
    .bind(user.id.as_uuid())
    .bind(&user.name)
    .bind(user.role.as_str())
    .bind(user.plant_id.map(|p| *p.as_uuid()))
    .bind(user.status.as_str())
    .bind(&user.password_hash)
    .bind(user.updated_at)
}

// ─────────────────────────────────────────────────────────────────────────────
// Organizations
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrganizationStore for PostgresStore {
    async fn create_organization(&self, organization: &Organization, owner: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let sub = &organization.subscription;
        sqlx::query(
            r#"
            INSERT INTO organizations (
                id, name, slug, status, plan, subscription_status, billing_customer_id,
                billing_subscription_id, current_period_end, cancel_at_period_end, settings,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(organization.id.as_uuid())
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(organization.status.as_str())
        .bind(sub.plan.as_str())
        .bind(sub.status.map(|s| s.as_str()))
        .bind(&sub.billing_customer_id)
        .bind(&sub.billing_subscription_id)
        .bind(sub.current_period_end)
        .bind(sub.cancel_at_period_end)
        .bind(&organization.settings)
        .bind(organization.created_at)
        .bind(organization.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        user_insert(owner).execute(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)
    }

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE slug = $1");
        let row = sqlx::query(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_organization_by_billing_customer(&self, customer_id: &str) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE billing_customer_id = $1");
        let row = sqlx::query(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations ORDER BY created_at, id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn set_organization_status(
        &self,
        id: OrganizationId,
        status: OrganizationStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Organization> {
        let sql = format!(
            "UPDATE organizations SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {ORGANIZATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => organization_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn update_subscription(
        &self,
        id: OrganizationId,
        expected_updated_at: DateTime<Utc>,
        state: &SubscriptionState,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET plan = $2,
                subscription_status = $3,
                billing_customer_id = $4,
                billing_subscription_id = $5,
                current_period_end = $6,
                cancel_at_period_end = $7,
                updated_at = $8
            WHERE id = $1 AND updated_at = $9
            "#,
        )
        .bind(id.as_uuid())
        .bind(state.plan.as_str())
        .bind(state.status.map(|s| s.as_str()))
        .bind(&state.billing_customer_id)
        .bind(&state.billing_subscription_id)
        .bind(state.current_period_end)
        .bind(state.cancel_at_period_end)
        .bind(at)
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for PostgresStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        user_insert(user).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn get_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE organization_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, organization_id: OrganizationId, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE organization_id = $1 AND email = $2");
        let row = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self, organization_id: OrganizationId) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE organization_id = $1 ORDER BY created_at, id");
        let rows = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn count_users(&self, organization_id: OrganizationId) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE organization_id = $1")
            .bind(organization_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        usize::try_from(count).map_err(decode_err)
    }

    async fn update_user(&self, organization_id: OrganizationId, user: &User) -> StoreResult<()> {
        let result = user_update(organization_id, user)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, organization_id: OrganizationId, id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE organization_id = $1 AND id = $2")
            .bind(organization_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_ownership_transfer(
        &self,
        organization_id: OrganizationId,
        previous_owner: &User,
        new_owner: &User,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for user in [previous_owner, new_owner] {
            let result = user_update(organization_id, user)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
        }
        tx.commit().await.map_err(db_err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API keys
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ApiKeyStore for PostgresStore {
    async fn insert_api_key(&self, key: &ApiKey) -> StoreResult<()> {
        let scopes = serde_json::to_value(&key.scopes).map_err(decode_err)?;
        let rate_limit = i32::try_from(key.rate_limit_per_minute).map_err(decode_err)?;
        sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, organization_id, name, key_prefix, key_hash, scopes, rate_limit_per_minute,
                status, expires_at, last_used_at, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(key.id.as_uuid())
        .bind(key.organization_id.as_uuid())
        .bind(&key.name)
        .bind(&key.prefix)
        .bind(&key.key_hash)
        .bind(scopes)
        .bind(rate_limit)
        .bind(key.status.as_str())
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.created_by.map(|u| *u.as_uuid()))
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<ApiKey>> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = $1");
        let rows = sqlx::query(&sql)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(api_key_from_row).collect()
    }

    async fn list_api_keys(&self, organization_id: OrganizationId) -> StoreResult<Vec<ApiKey>> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE organization_id = $1 ORDER BY created_at, id");
        let rows = sqlx::query(&sql)
            .bind(organization_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(api_key_from_row).collect()
    }

    async fn revoke_api_key(&self, organization_id: OrganizationId, id: ApiKeyId) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE api_keys SET status = 'revoked' WHERE organization_id = $1 AND id = $2")
            .bind(organization_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_api_key(
        &self,
        organization_id: OrganizationId,
        id: ApiKeyId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $3 WHERE organization_id = $1 AND id = $2")
            .bind(organization_id.as_uuid())
            .bind(id.as_uuid())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit log
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuditStore for PostgresStore {
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, organization_id, user_id, actor, action, entity_type, entity_id,
                old_values, new_values, ip_address, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.organization_id.as_uuid())
        .bind(entry.user_id.map(|u| *u.as_uuid()))
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(&entry.ip_address)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn query_audit(&self, organization_id: OrganizationId, filter: &AuditFilter) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, user_id, actor, action, entity_type, entity_id,
                   old_values, new_values, ip_address, created_at
            FROM audit_log
            WHERE organization_id = $1
              AND ($2::text IS NULL OR action = $2)
              AND ($3::text IS NULL OR entity_type = $3)
              AND ($4::text IS NULL OR entity_id = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY created_at DESC, id DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(&filter.action)
        .bind(&filter.entity_type)
        .bind(&filter.entity_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(i64::from(filter.effective_limit()))
        .bind(i64::from(filter.effective_offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(audit_from_row).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Processed billing events
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ProcessedEventStore for PostgresStore {
    async fn try_claim_event(&self, event_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO processed_billing_events (event_id, processed_at) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_event(&self, event_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM processed_billing_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant records
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl TenantRecordStore for PostgresStore {
    async fn insert_record(&self, record: &TenantRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_records (organization_id, kind, id, plant_id, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.organization_id.as_uuid())
        .bind(&record.kind)
        .bind(record.id.as_uuid())
        .bind(record.plant_id.map(|p| *p.as_uuid()))
        .bind(&record.body)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_record(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        id: RecordId,
    ) -> StoreResult<Option<TenantRecord>> {
        let row = sqlx::query(
            r#"
            SELECT organization_id, kind, id, plant_id, body, created_at, updated_at
            FROM tenant_records
            WHERE organization_id = $1 AND kind = $2 AND id = $3
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(kind)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_records(
        &self,
        organization_id: OrganizationId,
        kind: &str,
        plant: Option<PlantId>,
    ) -> StoreResult<Vec<TenantRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, kind, id, plant_id, body, created_at, updated_at
            FROM tenant_records
            WHERE organization_id = $1 AND kind = $2 AND ($3::uuid IS NULL OR plant_id = $3)
            ORDER BY created_at, id
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(kind)
        .bind(plant.map(|p| *p.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn count_records(&self, organization_id: OrganizationId, kind: &str) -> StoreResult<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tenant_records WHERE organization_id = $1 AND kind = $2")
                .bind(organization_id.as_uuid())
                .bind(kind)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        usize::try_from(count).map_err(decode_err)
    }

    async fn delete_record(&self, organization_id: OrganizationId, kind: &str, id: RecordId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tenant_records WHERE organization_id = $1 AND kind = $2 AND id = $3")
            .bind(organization_id.as_uuid())
            .bind(kind)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
