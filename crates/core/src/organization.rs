//! Organization (tenant) record, plans and subscription fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DomainError, OrganizationId};

/// Lifecycle status of an organization.
///
/// Only `Active` organizations may be accessed; the tenant guard rejects the
/// other states on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    #[default]
    Active,
    Suspended,
    Cancelled,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Suspended => "suspended",
            OrganizationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrganizationStatus::Active)
    }
}

impl core::fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrganizationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrganizationStatus::Active),
            "suspended" => Ok(OrganizationStatus::Suspended),
            "cancelled" => Ok(OrganizationStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown organization status '{other}'"
            ))),
        }
    }
}

/// Paid plan tier. There is no free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Starter,
    Pro,
}

/// Resource limits attached to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub max_plants: usize,
    pub max_users: usize,
}

impl Plan {
    /// The plan an organization falls back to when its subscription ends.
    pub const fn lowest_paid() -> Self {
        Plan::Starter
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Pro => "pro",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            Plan::Starter => PlanLimits {
                max_plants: 1,
                max_users: 10,
            },
            Plan::Pro => PlanLimits {
                max_plants: 25,
                max_users: 250,
            },
        }
    }
}

impl core::fmt::Display for Plan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Plan {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            other => Err(DomainError::validation(format!("unknown plan '{other}'"))),
        }
    }
}

/// Billing-provider subscription status mirrored on the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SubscriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            other => Err(DomainError::validation(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// Subscription fields of an organization.
///
/// Mutated only by the subscription lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubscriptionState {
    pub plan: Plan,
    pub status: Option<SubscriptionStatus>,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// An organization (tenant). Owns every business record through `organization_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub status: OrganizationStatus,
    pub subscription: SubscriptionState,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// A freshly registered organization: starter plan, trialing, active.
    pub fn register(
        name: impl Into<String>,
        slug: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        let slug = slug.into().trim().to_lowercase();

        if name.is_empty() {
            return Err(DomainError::validation("organization name cannot be empty"));
        }
        validate_slug(&slug)?;

        Ok(Self {
            id: OrganizationId::new(),
            name,
            slug,
            status: OrganizationStatus::Active,
            subscription: SubscriptionState {
                plan: Plan::Starter,
                status: Some(SubscriptionStatus::Trialing),
                ..Default::default()
            },
            settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn plan(&self) -> Plan {
        self.subscription.plan
    }
}

/// Slugs are 3-63 chars of `[a-z0-9-]`, not starting or ending with `-`.
pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !(3..=63).contains(&slug.len())
        || !valid_chars
        || slug.starts_with('-')
        || slug.ends_with('-')
    {
        return Err(DomainError::validation(
            "slug must be 3-63 characters of a-z, 0-9 or '-'",
        ));
    }
    Ok(())
}
