//! `aquaops-infra`: persistence and the IO-bound services around the pure
//! auth and billing crates.
//!
//! - `store`: storage contracts, every tenant-owned lookup scoped by organization
//! - `memory` / `postgres`: the two store implementations
//! - `identity`: credentials to principal
//! - `tenancy`: active-organization guard
//! - `audit`: best-effort audit trail
//! - `subscriptions`: webhook-driven subscription lifecycle
//! - `rate_limit`: per-API-key quotas
//! - `records`: typed tenant-scoped documents for business collaborators

pub mod audit;
pub mod identity;
pub mod memory;
pub mod postgres;
pub mod rate_limit;
pub mod records;
pub mod store;
pub mod subscriptions;
pub mod tenancy;

pub use audit::{AuditActor, AuditEntry, AuditFilter, AuditRecord, AuditRecorder};
pub use identity::{Credentials, IdentityError, IdentityResolver, ResolvedIdentity};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use rate_limit::{ApiKeyRateLimiter, RateLimited};
pub use records::{RecordKind, Stored, TenantRecord, TenantRepo};
pub use store::{Store, StoreError, StoreResult};
pub use subscriptions::{SubscriptionManager, SubscriptionManagerError, WebhookOutcome};
pub use tenancy::{TenantContext, TenantError, TenantGuard};
