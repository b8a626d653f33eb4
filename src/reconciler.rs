//! Webhook Reconciler - applies processor notifications to local state
//!
//! Processors redeliver webhooks on timeout, so handling must be safe to
//! call arbitrarily many times for the same event: signature failures are
//! rejected outright with no state change, repeat deliveries are no-ops,
//! and an event id is only marked applied once its dispatch succeeded, so a
//! failed apply is picked up again by the next redelivery.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::gateway::ProcessorGateway;
use crate::ledger::EscrowLedger;
use crate::models::ReconciliationKind;
use crate::registry::PayoutAccountRegistry;
use crate::EscrowResult;

/// Outcome of ingesting one webhook delivery
///
/// Both variants map to a success response at the HTTP boundary; only
/// verification failures surface as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Event verified and applied
    Applied,
    /// Event id seen before; nothing changed
    AlreadyApplied,
}

/// Bounded window of recently applied event ids, FIFO eviction
struct DedupeWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    fn mark(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.order.push_back(id);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }
}

/// Consumes processor webhooks and drives ledger/registry transitions
pub struct WebhookReconciler {
    gateway: Arc<dyn ProcessorGateway>,
    registry: Arc<PayoutAccountRegistry>,
    ledger: Arc<EscrowLedger>,
    window: Mutex<DedupeWindow>,
}

impl WebhookReconciler {
    pub fn new(
        gateway: Arc<dyn ProcessorGateway>,
        registry: Arc<PayoutAccountRegistry>,
        ledger: Arc<EscrowLedger>,
        dedupe_window: usize,
    ) -> Self {
        Self {
            gateway,
            registry,
            ledger,
            window: Mutex::new(DedupeWindow::new(dedupe_window)),
        }
    }

    /// Verify, dedupe and apply one webhook delivery
    pub async fn handle(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> EscrowResult<ReconcileOutcome> {
        let event = match self.gateway.verify_webhook(raw_payload, signature_header) {
            Ok(event) => event,
            Err(err) => {
                // Fails closed: unverified payloads never touch state.
                warn!("Rejected webhook with bad signature: {}", err);
                return Err(err);
            }
        };

        if self.window.lock().await.contains(&event.external_event_id) {
            info!("Webhook event {} already applied", event.external_event_id);
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        match &event.kind {
            ReconciliationKind::AccountStatusChanged {
                external_account_id,
                status,
            } => {
                self.registry
                    .apply_status(external_account_id, *status)
                    .await?;
            }
            ReconciliationKind::TransferFailed {
                external_transfer_ref,
                reason,
            } => {
                self.ledger
                    .record_transfer_failure(external_transfer_ref, reason)
                    .await?;
            }
            ReconciliationKind::HoldFailed {
                external_hold_ref,
                reason,
            } => {
                self.ledger
                    .fail_by_hold_ref(external_hold_ref, reason)
                    .await?;
            }
            ReconciliationKind::Unsupported { event_type } => {
                info!("Ignoring unsupported processor event type {}", event_type);
            }
        }

        self.window
            .lock()
            .await
            .mark(event.external_event_id.clone());

        info!("Applied webhook event {}", event.external_event_id);
        Ok(ReconcileOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EscrowError;
    use crate::models::{AccountStatus, EscrowStatus};
    use crate::testing::{ledger_fixture, LedgerFixture};

    fn reconciler(fixture: &LedgerFixture, dedupe_window: usize) -> WebhookReconciler {
        WebhookReconciler::new(
            fixture.gateway.clone(),
            fixture.registry.clone(),
            fixture.ledger.clone(),
            dedupe_window,
        )
    }

    fn account_event(id: &str, account_ref: &str) -> Vec<u8> {
        format!(
            r#"{{"id":"{}","type":"account.updated","data":{{"account":"{}","payouts_enabled":true}}}}"#,
            id, account_ref
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_rejects_bad_signature_without_state_change() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 16);
        let tx = fixture.deposit(10_000, None).await;

        let payload = format!(
            r#"{{"id":"evt_1","type":"payment.failed","data":{{"hold":"{}"}}}}"#,
            tx.external_hold_ref
        );
        let result = reconciler.handle(payload.as_bytes(), "not-a-signature").await;

        assert!(matches!(result, Err(EscrowError::InvalidSignature(_))));
        assert_eq!(
            fixture.ledger.get(tx.id).await.unwrap().status,
            EscrowStatus::Held
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_a_noop() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 16);
        let tx = fixture.deposit(10_000, None).await;

        let payload = format!(
            r#"{{"id":"evt_1","type":"payment.failed","data":{{"hold":"{}","reason":"card declined"}}}}"#,
            tx.external_hold_ref
        );
        let signature = fixture.gateway.sign(payload.as_bytes());

        let first = reconciler.handle(payload.as_bytes(), &signature).await.unwrap();
        assert_eq!(first, ReconcileOutcome::Applied);
        let second = reconciler.handle(payload.as_bytes(), &signature).await.unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyApplied);

        let failed = fixture.ledger.get(tx.id).await.unwrap();
        assert_eq!(failed.status, EscrowStatus::Failed);
        // Only one failure event despite two deliveries
        let events = fixture.ledger.events_for(tx.id).await;
        let failures = events
            .iter()
            .filter(|event| event.event_type == "escrow.failed")
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_account_status_event_updates_registry() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 16);

        // Restrict, then re-activate through the reconciler
        let payload = format!(
            r#"{{"id":"evt_r","type":"account.updated","data":{{"account":"{}","payouts_enabled":true,"disabled_reason":"requirements.past_due"}}}}"#,
            fixture.contractor_account_ref
        );
        let signature = fixture.gateway.sign(payload.as_bytes());
        reconciler.handle(payload.as_bytes(), &signature).await.unwrap();
        assert_eq!(
            fixture.registry.get_account(fixture.contractor_id).await.status,
            AccountStatus::Restricted
        );

        let payload = account_event("evt_a", &fixture.contractor_account_ref);
        let signature = fixture.gateway.sign(&payload);
        reconciler.handle(&payload, &signature).await.unwrap();
        assert_eq!(
            fixture.registry.get_account(fixture.contractor_id).await.status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn test_unsupported_event_is_tolerated() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 16);

        let payload = br#"{"id":"evt_x","type":"charge.succeeded","data":{}}"#;
        let signature = fixture.gateway.sign(payload);
        let outcome = reconciler.handle(payload, &signature).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
    }

    #[tokio::test]
    async fn test_dedupe_window_evicts_oldest() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 2);

        for id in ["evt_1", "evt_2", "evt_3"] {
            let payload = account_event(id, &fixture.contractor_account_ref);
            let signature = fixture.gateway.sign(&payload);
            let outcome = reconciler.handle(&payload, &signature).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::Applied);
        }

        // evt_1 fell out of the window; redelivery re-applies, which is
        // safe because every dispatch path is idempotent
        let payload = account_event("evt_1", &fixture.contractor_account_ref);
        let signature = fixture.gateway.sign(&payload);
        let outcome = reconciler.handle(&payload, &signature).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        // evt_3 is still deduped
        let payload = account_event("evt_3", &fixture.contractor_account_ref);
        let signature = fixture.gateway.sign(&payload);
        let outcome = reconciler.handle(&payload, &signature).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_hold_failure_after_release_leaves_released_state() {
        let fixture = ledger_fixture().await;
        let reconciler = reconciler(&fixture, 16);
        let tx = fixture.deposit(10_000, None).await;
        fixture.ledger.release(tx.id, fixture.payer_id).await.unwrap();

        let payload = format!(
            r#"{{"id":"evt_late","type":"payment.failed","data":{{"hold":"{}"}}}}"#,
            tx.external_hold_ref
        );
        let signature = fixture.gateway.sign(payload.as_bytes());
        let outcome = reconciler.handle(payload.as_bytes(), &signature).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert_eq!(
            fixture.ledger.get(tx.id).await.unwrap().status,
            EscrowStatus::Released
        );
    }
}
