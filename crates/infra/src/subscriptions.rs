//! Subscription Lifecycle Manager.
//!
//! Verifies and applies billing-provider webhooks exactly once, and runs the
//! owner's cancel/resume actions through the same aggregate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use thiserror::Error;

use aquaops_billing::{
    BillingEvent, BillingEventKind, Subscription, SubscriptionCommand, SubscriptionError, SubscriptionEvent,
    WebhookError, WebhookVerifier, parse_event,
};
use aquaops_core::{Aggregate, Event, Organization, OrganizationId, SubscriptionState};
use aquaops_observability::{Counter, MetricsSink};

use crate::audit::{AuditActor, AuditRecord, AuditRecorder};
use crate::store::{Store, StoreError};

const MAX_WRITE_ATTEMPTS: u32 = 5;

/// What happened to a delivered webhook. Every variant is acknowledged to the
/// provider with a 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Valid event that matches the current state already.
    Unchanged,
    /// Stale, unknown tenant or untracked type.
    Ignored(String),
    /// Event id was processed before.
    Duplicate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionManagerError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(&'static str),

    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("organization not found")]
    NotFound,

    #[error(transparent)]
    Rejected(SubscriptionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WebhookError> for SubscriptionManagerError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature(reason) => SubscriptionManagerError::InvalidSignature(reason),
            WebhookError::Malformed(reason) => SubscriptionManagerError::Malformed(reason),
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    audit: AuditRecorder,
    metrics: Arc<dyn MetricsSink>,
    verifier: Arc<WebhookVerifier>,
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn Store>,
        audit: AuditRecorder,
        metrics: Arc<dyn MetricsSink>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            store,
            audit,
            metrics,
            verifier: Arc::new(verifier),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Webhooks
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn handle_webhook(
        &self,
        signature_header: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, SubscriptionManagerError> {
        if let Err(e) = self.verifier.verify(signature_header, body, now) {
            self.metrics.increment(Counter::WebhookSignatureFailures);
            tracing::warn!(error = %e, "billing webhook rejected");
            return Err(e.into());
        }
        let event = parse_event(body)?;

        if !self.store.try_claim_event(&event.id, now).await? {
            self.metrics.increment(Counter::WebhooksDuplicate);
            tracing::info!(event_id = %event.id, "duplicate billing event");
            return Ok(WebhookOutcome::Duplicate);
        }

        if matches!(event.kind, BillingEventKind::Other) {
            self.metrics.increment(Counter::WebhooksIgnored);
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "unhandled billing event type");
            return Ok(WebhookOutcome::Ignored("unhandled event type".into()));
        }

        let organization = match self.route(&event).await {
            Ok(Some(organization)) => organization,
            Ok(None) => {
                // not ours yet (e.g. delivered before checkout); a retry may route it
                self.release(&event).await;
                self.metrics.increment(Counter::WebhooksIgnored);
                tracing::info!(event_id = %event.id, event_type = %event.event_type, "billing event has no organization");
                return Ok(WebhookOutcome::Ignored("no organization for this event".into()));
            }
            Err(e) => {
                self.release(&event).await;
                return Err(e);
            }
        };

        match self.apply_event(&organization, &event, now).await {
            Ok(outcome) => {
                let counter = match outcome {
                    WebhookOutcome::Ignored(_) => Counter::WebhooksIgnored,
                    _ => Counter::WebhooksApplied,
                };
                self.metrics.increment(counter);
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    outcome = ?outcome,
                    "billing event processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, event_id = %event.id, "billing event failed; releasing claim");
                self.release(&event).await;
                Err(e)
            }
        }
    }

    async fn release(&self, event: &BillingEvent) {
        if let Err(e) = self.store.release_event(&event.id).await {
            tracing::error!(error = %e, event_id = %event.id, "failed to release billing event claim");
        }
    }

    /// The organization an event belongs to: by metadata for checkouts, by
    /// billing customer otherwise.
    async fn route(&self, event: &BillingEvent) -> Result<Option<Organization>, SubscriptionManagerError> {
        let organization = match &event.kind {
            BillingEventKind::CheckoutCompleted { organization_id, .. } => {
                self.store.get_organization(*organization_id).await?
            }
            kind => match kind.customer_id() {
                Some(customer) => self.store.find_organization_by_billing_customer(customer).await?,
                None => None,
            },
        };
        Ok(organization)
    }

    async fn apply_event(
        &self,
        organization: &Organization,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, SubscriptionManagerError> {
        let command = SubscriptionCommand::ApplyProviderEvent(event.clone());
        match self
            .execute(organization, command, AuditActor::SystemBilling, None, now)
            .await
        {
            Ok(Some(_)) => Ok(WebhookOutcome::Applied),
            Ok(None) => Ok(WebhookOutcome::Unchanged),
            Err(SubscriptionManagerError::Rejected(reason)) => Ok(WebhookOutcome::Ignored(reason.to_string())),
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Owner actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Set the cancel-at-period-end flag on a live subscription.
    pub async fn cancel_at_period_end(
        &self,
        organization_id: OrganizationId,
        actor: AuditActor,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState, SubscriptionManagerError> {
        self.owner_action(organization_id, SubscriptionCommand::CancelAtPeriodEnd { at: now }, actor, ip_address, now)
            .await
    }

    /// Clear the cancel flag; a canceled subscription comes back only before
    /// its period ends.
    pub async fn resume(
        &self,
        organization_id: OrganizationId,
        actor: AuditActor,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState, SubscriptionManagerError> {
        self.owner_action(organization_id, SubscriptionCommand::Resume { at: now }, actor, ip_address, now)
            .await
    }

    async fn owner_action(
        &self,
        organization_id: OrganizationId,
        command: SubscriptionCommand,
        actor: AuditActor,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SubscriptionState, SubscriptionManagerError> {
        let organization = self
            .store
            .get_organization(organization_id)
            .await?
            .ok_or(SubscriptionManagerError::NotFound)?;
        let after = self.execute(&organization, command, actor, ip_address, now).await?;
        Ok(after.unwrap_or(organization.subscription))
    }

    /// Run a command, persist and audit the result. `None` when nothing changed.
    ///
    /// The write is conditional on the organization row being unchanged since
    /// it was read; a lost race re-reads and re-decides.
    async fn execute(
        &self,
        organization: &Organization,
        command: SubscriptionCommand,
        actor: AuditActor,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionState>, SubscriptionManagerError> {
        let mut current = organization.clone();
        let mut attempt = 1;
        let (after, events) = loop {
            let mut subscription = Subscription::load(current.id, current.subscription.clone());
            let events = subscription
                .handle(&command)
                .map_err(SubscriptionManagerError::Rejected)?;
            if events.is_empty() {
                return Ok(None);
            }
            for event in &events {
                subscription.apply(event);
            }
            let after = subscription.into_state();

            // strictly later than the version we read
            let stamp = now.max(current.updated_at + Duration::microseconds(1));
            if self
                .store
                .update_subscription(current.id, current.updated_at, &after, stamp)
                .await?
            {
                break (after, events);
            }

            if attempt >= MAX_WRITE_ATTEMPTS {
                return Err(StoreError::Conflict("subscription was modified concurrently".into()).into());
            }
            attempt += 1;
            tracing::debug!(organization_id = %current.id, attempt, "subscription write lost a race; retrying");
            current = self
                .store
                .get_organization(current.id)
                .await?
                .ok_or(SubscriptionManagerError::NotFound)?;
        };

        for event in &events {
            let SubscriptionEvent::Changed(change) = event;
            self.audit
                .record(
                    AuditRecord::new(current.id, actor, event.event_type(), "organization")
                        .entity_id(current.id)
                        .old_values(json!({ "subscription": change.before }))
                        .new_values(json!({
                            "subscription": change.after,
                            "cause": change.cause,
                            "occurred_at": event.occurred_at(),
                            "schema_version": event.version(),
                        }))
                        .ip_address(ip_address.clone()),
                )
                .await;
        }
        Ok(Some(after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::memory::InMemoryStore;
    use crate::store::{AuditStore, OrganizationStore};
    use aquaops_auth::User;
    use aquaops_billing::webhook::DEFAULT_TOLERANCE_SECS;
    use aquaops_core::{Plan, SubscriptionStatus};
    use aquaops_observability::InMemoryMetrics;
    use chrono::Duration;
    use serde_json::Value;

    const SECRET: &[u8] = b"whsec_test";

    struct Fixture {
        store: Arc<InMemoryStore>,
        metrics: Arc<InMemoryMetrics>,
        manager: SubscriptionManager,
        verifier: WebhookVerifier,
        org: Organization,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let org = Organization::register("Basin Works", "basin-works", Utc::now()).unwrap();
        let owner = User::founding_owner(org.id, "o@basin.example", "O", "h".into(), Utc::now()).unwrap();
        store.create_organization(&org, &owner).await.unwrap();

        let audit = AuditRecorder::new(store.clone(), metrics.clone());
        let manager = SubscriptionManager::new(
            store.clone(),
            audit,
            metrics.clone(),
            WebhookVerifier::new(SECRET.to_vec(), DEFAULT_TOLERANCE_SECS),
        );
        Fixture {
            store,
            metrics,
            manager,
            verifier: WebhookVerifier::new(SECRET.to_vec(), DEFAULT_TOLERANCE_SECS),
            org,
        }
    }

    impl Fixture {
        async fn deliver(&self, payload: &Value) -> Result<WebhookOutcome, SubscriptionManagerError> {
            let body = serde_json::to_vec(payload).unwrap();
            let now = Utc::now();
            let header = self.verifier.sign(&body, now.timestamp());
            self.manager.handle_webhook(&header, &body, now).await
        }

        async fn state(&self) -> SubscriptionState {
            self.store
                .get_organization(self.org.id)
                .await
                .unwrap()
                .unwrap()
                .subscription
        }

        async fn audit_count(&self) -> usize {
            self.store
                .query_audit(self.org.id, &AuditFilter::default())
                .await
                .unwrap()
                .len()
        }
    }

    fn checkout(event_id: &str, org: OrganizationId, plan: &str) -> Value {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": Utc::now().timestamp(),
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "organization_id": org.to_string(), "plan": plan }
            }}
        })
    }

    fn deleted(event_id: &str) -> Value {
        json!({
            "id": event_id,
            "type": "customer.subscription.deleted",
            "created": Utc::now().timestamp(),
            "data": { "object": { "id": "sub_1", "customer": "cus_1" } }
        })
    }

    fn invoice_paid(event_id: &str) -> Value {
        invoice_paid_until(event_id, Utc::now() + Duration::days(30))
    }

    fn invoice_paid_until(event_id: &str, period_end: DateTime<Utc>) -> Value {
        json!({
            "id": event_id,
            "type": "invoice.paid",
            "created": Utc::now().timestamp(),
            "data": { "object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "period_end": period_end.timestamp()
            }}
        })
    }

    #[tokio::test]
    async fn checkout_activates_and_is_audited() {
        let f = fixture().await;
        let outcome = f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);

        let state = f.state().await;
        assert_eq!(state.plan, Plan::Pro);
        assert_eq!(state.status, Some(SubscriptionStatus::Active));
        assert_eq!(state.billing_subscription_id.as_deref(), Some("sub_1"));

        let entries = f.store.query_audit(f.org.id, &AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "subscription.changed");
        assert_eq!(entries[0].actor, "system:billing");
        let recorded = entries[0].new_values.as_ref().unwrap();
        assert_eq!(recorded["schema_version"], 1);
        assert!(recorded["occurred_at"].is_string());
    }

    #[tokio::test]
    async fn redelivery_is_a_duplicate_noop() {
        let f = fixture().await;
        f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();
        let before = f.state().await;

        let outcome = f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Duplicate);
        assert_eq!(f.state().await, before);
        assert_eq!(f.audit_count().await, 1);
        assert_eq!(f.metrics.get(Counter::WebhooksDuplicate), 1);
    }

    #[tokio::test]
    async fn deletion_downgrades_to_starter_once() {
        let f = fixture().await;
        f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();

        assert_eq!(f.deliver(&deleted("evt_2")).await.unwrap(), WebhookOutcome::Applied);
        let state = f.state().await;
        assert_eq!(state.plan, Plan::Starter);
        assert_eq!(state.status, Some(SubscriptionStatus::Canceled));

        // same change under a fresh event id: already in that state
        assert_eq!(f.deliver(&deleted("evt_3")).await.unwrap(), WebhookOutcome::Unchanged);
        assert_eq!(f.state().await, state);
        assert_eq!(f.audit_count().await, 2);
    }

    #[tokio::test]
    async fn bad_signature_applies_nothing() {
        let f = fixture().await;
        let body = serde_json::to_vec(&checkout("evt_1", f.org.id, "pro")).unwrap();
        let now = Utc::now();
        let forged = WebhookVerifier::new(b"other".to_vec(), DEFAULT_TOLERANCE_SECS).sign(&body, now.timestamp());

        let err = f.manager.handle_webhook(&forged, &body, now).await.unwrap_err();
        assert!(matches!(err, SubscriptionManagerError::InvalidSignature(_)));
        assert_eq!(f.state().await.status, Some(SubscriptionStatus::Trialing));
        assert_eq!(f.metrics.get(Counter::WebhookSignatureFailures), 1);
    }

    #[tokio::test]
    async fn events_for_unknown_customers_are_ignored() {
        let f = fixture().await;
        let outcome = f.deliver(&deleted("evt_9")).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored(_)));
        assert_eq!(f.audit_count().await, 0);
    }

    #[tokio::test]
    async fn events_arriving_before_checkout_can_be_redelivered() {
        let f = fixture().await;
        let early = invoice_paid("evt_early");
        assert!(matches!(f.deliver(&early).await.unwrap(), WebhookOutcome::Ignored(_)));

        f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();

        // the provider's retry of the early event is processed, not a duplicate
        assert_eq!(f.deliver(&early).await.unwrap(), WebhookOutcome::Applied);
        assert_eq!(f.deliver(&early).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn unhandled_event_types_keep_their_claim() {
        let f = fixture().await;
        let ping = json!({ "id": "evt_ping", "type": "customer.created", "data": { "object": {} } });
        assert!(matches!(f.deliver(&ping).await.unwrap(), WebhookOutcome::Ignored(_)));
        assert_eq!(f.deliver(&ping).await.unwrap(), WebhookOutcome::Duplicate);
    }

    #[tokio::test]
    async fn interleaved_writers_do_not_lose_updates() {
        let f = fixture().await;
        f.deliver(&checkout("evt_1", f.org.id, "pro")).await.unwrap();

        // a provider event decided on this snapshot...
        let stale = f.store.get_organization(f.org.id).await.unwrap().unwrap();

        // ...while the owner cancels in between
        let owner = AuditActor::User(aquaops_core::UserId::new());
        f.manager.cancel_at_period_end(f.org.id, owner, None, Utc::now()).await.unwrap();

        let period_end = Utc::now() + Duration::days(30);
        let event = parse_event(&serde_json::to_vec(&invoice_paid_until("evt_2", period_end)).unwrap()).unwrap();
        let written = f
            .manager
            .execute(
                &stale,
                SubscriptionCommand::ApplyProviderEvent(event),
                AuditActor::SystemBilling,
                None,
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap();

        let state = f.state().await;
        assert_eq!(state, written);
        assert!(state.cancel_at_period_end, "owner's cancel survived");
        assert_eq!(state.current_period_end.map(|t| t.timestamp()), Some(period_end.timestamp()));
    }

    #[tokio::test]
    async fn stale_version_write_is_refused_by_the_store() {
        let f = fixture().await;
        let org = f.store.get_organization(f.org.id).await.unwrap().unwrap();
        let mut next = org.subscription.clone();
        next.cancel_at_period_end = true;

        let later = org.updated_at + Duration::seconds(1);
        assert!(f.store.update_subscription(org.id, org.updated_at, &next, later).await.unwrap());
        assert!(!f.store.update_subscription(org.id, org.updated_at, &next, later).await.unwrap());
    }

    #[tokio::test]
    async fn owner_can_cancel_and_resume() {
        let f = fixture().await;
        f.deliver(&checkout("evt_1", f.org.id, "starter")).await.unwrap();
        let owner = AuditActor::User(aquaops_core::UserId::new());

        let state = f.manager.cancel_at_period_end(f.org.id, owner, None, Utc::now()).await.unwrap();
        assert!(state.cancel_at_period_end);
        let state = f.manager.resume(f.org.id, owner, None, Utc::now()).await.unwrap();
        assert!(!state.cancel_at_period_end);
        assert_eq!(f.audit_count().await, 3);
    }

    #[tokio::test]
    async fn cancel_without_subscription_is_rejected() {
        let f = fixture().await;
        let err = f
            .manager
            .cancel_at_period_end(f.org.id, AuditActor::SuperAdmin, None, Utc::now() + Duration::seconds(1))
            .await
            .unwrap_err();
        assert_eq!(err, SubscriptionManagerError::Rejected(SubscriptionError::NoLiveSubscription));
    }
}
