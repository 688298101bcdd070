//! `aquaops-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by every other crate:
//! typed identifiers, the domain error model, the aggregate/event contracts and
//! the organization (tenant) record with its plan and subscription fields.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod organization;

pub use aggregate::{Aggregate, AggregateRoot, Event};
pub use error::DomainError;
pub use id::{ApiKeyId, AuditEntryId, OrganizationId, PlantId, RecordId, UserId};
pub use organization::{
    Organization, OrganizationStatus, Plan, PlanLimits, SubscriptionState, SubscriptionStatus,
};
