//! `aquaops-billing`: subscription lifecycle as a pure state machine, plus
//! verification and parsing of billing-provider webhooks.
//!
//! No IO happens here; `aquaops-infra` loads the organization, runs the
//! aggregate and persists the outcome.

pub mod event;
pub mod subscription;
pub mod webhook;

pub use event::{BillingEvent, BillingEventKind};
pub use subscription::{
    ChangeCause, Subscription, SubscriptionChanged, SubscriptionCommand, SubscriptionError, SubscriptionEvent,
    transition_allowed,
};
pub use webhook::{WebhookError, WebhookVerifier, parse_event};
