//! Subscription aggregate: the organization's subscription fields evolved by
//! provider events and owner actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aquaops_core::{
    Aggregate, AggregateRoot, Event, OrganizationId, Plan, SubscriptionState, SubscriptionStatus,
};

use crate::{BillingEvent, BillingEventKind};

use SubscriptionStatus::{Active, Canceled, PastDue, Trialing, Unpaid};

// ─────────────────────────────────────────────────────────────────────────────
// Status graph
// ─────────────────────────────────────────────────────────────────────────────

/// Status transitions a provider event may drive.
///
/// Staying in the same status is always allowed (plan or period updates).
/// Leaving `canceled` is never allowed here; a new checkout or an owner
/// resume are handled separately.
pub fn transition_allowed(from: Option<SubscriptionStatus>, to: SubscriptionStatus) -> bool {
    match (from, to) {
        (Some(a), b) if a == b => true,
        (None, Trialing | Active) => true,
        (Some(Trialing), Active | PastDue | Canceled | Unpaid) => true,
        (Some(Active), PastDue | Canceled | Unpaid) => true,
        (Some(PastDue), Active | Canceled | Unpaid) => true,
        (Some(Unpaid), Active | Canceled) => true,
        _ => false,
    }
}

fn is_live(status: Option<SubscriptionStatus>) -> bool {
    matches!(status, Some(Trialing | Active | PastDue))
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    organization_id: OrganizationId,
    state: SubscriptionState,
    version: u64,
}

impl Subscription {
    pub fn load(organization_id: OrganizationId, state: SubscriptionState) -> Self {
        Self {
            organization_id,
            state,
            version: 0,
        }
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    pub fn into_state(self) -> SubscriptionState {
        self.state
    }
}

impl AggregateRoot for Subscription {
    type Id = OrganizationId;

    fn id(&self) -> &Self::Id {
        &self.organization_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands / Events / Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SubscriptionCommand {
    ApplyProviderEvent(BillingEvent),
    CancelAtPeriodEnd { at: DateTime<Utc> },
    Resume { at: DateTime<Utc> },
}

/// What caused a subscription change, for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeCause {
    ProviderEvent { event_id: String, event_type: String },
    CancelRequested,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChanged {
    pub organization_id: OrganizationId,
    pub before: SubscriptionState,
    pub after: SubscriptionState,
    pub cause: ChangeCause,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionEvent {
    Changed(SubscriptionChanged),
}

impl Event for SubscriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEvent::Changed(_) => "subscription.changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SubscriptionEvent::Changed(e) => e.occurred_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Provider event out of order or for another subscription. Acknowledged
    /// without a state change.
    #[error("stale billing event: {0}")]
    Stale(String),

    #[error("organization has no live subscription")]
    NoLiveSubscription,

    #[error("subscription period has already ended")]
    PeriodEnded,
}

impl Aggregate for Subscription {
    type Command = SubscriptionCommand;
    type Event = SubscriptionEvent;
    type Error = SubscriptionError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SubscriptionEvent::Changed(e) => self.state = e.after.clone(),
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let (after, cause, at) = match command {
            SubscriptionCommand::ApplyProviderEvent(event) => (
                self.decide_provider_event(event)?,
                ChangeCause::ProviderEvent {
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                },
                event.created,
            ),
            SubscriptionCommand::CancelAtPeriodEnd { at } => {
                (self.decide_cancel()?, ChangeCause::CancelRequested, *at)
            }
            SubscriptionCommand::Resume { at } => (self.decide_resume(*at)?, ChangeCause::Resumed, *at),
        };

        if after == self.state {
            return Ok(Vec::new());
        }
        Ok(vec![SubscriptionEvent::Changed(SubscriptionChanged {
            organization_id: self.organization_id,
            before: self.state.clone(),
            after,
            cause,
            occurred_at: at,
        })])
    }
}

impl Subscription {
    // ─────────────────────────────────────────────────────────────────────────
    // Decisions (return the target state)
    // ─────────────────────────────────────────────────────────────────────────

    fn decide_provider_event(&self, event: &BillingEvent) -> Result<SubscriptionState, SubscriptionError> {
        let mut next = self.state.clone();
        match &event.kind {
            BillingEventKind::CheckoutCompleted {
                organization_id,
                customer_id,
                subscription_id,
                plan,
            } => {
                if *organization_id != self.organization_id {
                    return Err(SubscriptionError::Stale("checkout for another organization".into()));
                }
                next.billing_customer_id = Some(customer_id.clone());
                next.billing_subscription_id = Some(subscription_id.clone());
                next.plan = *plan;
                next.status = Some(Active);
                next.cancel_at_period_end = false;
            }
            BillingEventKind::SubscriptionUpdated {
                subscription_id,
                status,
                plan,
                current_period_end,
                cancel_at_period_end,
                ..
            } => {
                self.ensure_subscription_on_file(subscription_id)?;
                self.ensure_transition(*status)?;
                next.status = Some(*status);
                if let Some(plan) = plan {
                    next.plan = *plan;
                }
                if current_period_end.is_some() {
                    next.current_period_end = *current_period_end;
                }
                next.cancel_at_period_end = *cancel_at_period_end;
            }
            BillingEventKind::SubscriptionDeleted { subscription_id, .. } => {
                self.ensure_subscription_on_file(subscription_id)?;
                self.ensure_transition(Canceled)?;
                next.status = Some(Canceled);
                next.plan = Plan::lowest_paid();
                next.cancel_at_period_end = false;
            }
            BillingEventKind::InvoicePaid {
                subscription_id,
                period_end,
                ..
            } => {
                if let Some(id) = subscription_id {
                    self.ensure_subscription_on_file(id)?;
                }
                self.ensure_transition(Active)?;
                next.status = Some(Active);
                if period_end.is_some() {
                    next.current_period_end = *period_end;
                }
            }
            BillingEventKind::InvoicePaymentFailed { subscription_id, .. } => {
                if let Some(id) = subscription_id {
                    self.ensure_subscription_on_file(id)?;
                }
                self.ensure_transition(PastDue)?;
                next.status = Some(PastDue);
            }
            BillingEventKind::Other => {}
        }
        Ok(next)
    }

    fn decide_cancel(&self) -> Result<SubscriptionState, SubscriptionError> {
        if !is_live(self.state.status) || self.state.billing_subscription_id.is_none() {
            return Err(SubscriptionError::NoLiveSubscription);
        }
        let mut next = self.state.clone();
        next.cancel_at_period_end = true;
        Ok(next)
    }

    fn decide_resume(&self, at: DateTime<Utc>) -> Result<SubscriptionState, SubscriptionError> {
        let mut next = self.state.clone();
        match self.state.status {
            Some(Canceled) => {
                if self.state.billing_subscription_id.is_none() {
                    return Err(SubscriptionError::NoLiveSubscription);
                }
                match self.state.current_period_end {
                    Some(end) if end > at => {
                        next.status = Some(Active);
                        next.cancel_at_period_end = false;
                    }
                    _ => return Err(SubscriptionError::PeriodEnded),
                }
            }
            status if is_live(status) => next.cancel_at_period_end = false,
            _ => return Err(SubscriptionError::NoLiveSubscription),
        }
        Ok(next)
    }

    fn ensure_subscription_on_file(&self, subscription_id: &str) -> Result<(), SubscriptionError> {
        match self.state.billing_subscription_id.as_deref() {
            Some(on_file) if on_file == subscription_id => Ok(()),
            Some(_) => Err(SubscriptionError::Stale(format!(
                "subscription '{subscription_id}' is not the one on file"
            ))),
            None => Err(SubscriptionError::Stale("no subscription on file".into())),
        }
    }

    fn ensure_transition(&self, to: SubscriptionStatus) -> Result<(), SubscriptionError> {
        if transition_allowed(self.state.status, to) {
            Ok(())
        } else {
            let from = self.state.status.map(|s| s.as_str()).unwrap_or("none");
            Err(SubscriptionError::Stale(format!("transition {from} -> {to} not allowed")))
        }
    }
}
