use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aquaops_core::{OrganizationId, Plan, SubscriptionStatus};

/// A verified, parsed provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Provider event id, the idempotency key.
    pub id: String,
    pub event_type: String,
    pub created: DateTime<Utc>,
    pub kind: BillingEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingEventKind {
    CheckoutCompleted {
        organization_id: OrganizationId,
        customer_id: String,
        subscription_id: String,
        plan: Plan,
    },
    SubscriptionUpdated {
        customer_id: String,
        subscription_id: String,
        status: SubscriptionStatus,
        plan: Option<Plan>,
        current_period_end: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
    },
    SubscriptionDeleted {
        customer_id: String,
        subscription_id: String,
    },
    InvoicePaid {
        customer_id: String,
        subscription_id: Option<String>,
        period_end: Option<DateTime<Utc>>,
    },
    InvoicePaymentFailed {
        customer_id: String,
        subscription_id: Option<String>,
    },
    /// Any type we do not act on. Acknowledged and ignored.
    Other,
}

impl BillingEventKind {
    pub fn customer_id(&self) -> Option<&str> {
        match self {
            BillingEventKind::CheckoutCompleted { customer_id, .. }
            | BillingEventKind::SubscriptionUpdated { customer_id, .. }
            | BillingEventKind::SubscriptionDeleted { customer_id, .. }
            | BillingEventKind::InvoicePaid { customer_id, .. }
            | BillingEventKind::InvoicePaymentFailed { customer_id, .. } => Some(customer_id),
            BillingEventKind::Other => None,
        }
    }

    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            BillingEventKind::CheckoutCompleted { subscription_id, .. }
            | BillingEventKind::SubscriptionUpdated { subscription_id, .. }
            | BillingEventKind::SubscriptionDeleted { subscription_id, .. } => Some(subscription_id),
            BillingEventKind::InvoicePaid { subscription_id, .. }
            | BillingEventKind::InvoicePaymentFailed { subscription_id, .. } => subscription_id.as_deref(),
            BillingEventKind::Other => None,
        }
    }
}
