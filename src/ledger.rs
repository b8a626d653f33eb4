//! Escrow Ledger - state machine and persistence contract for escrow funds
//!
//! Holds a payer's funds against a project and resolves every transaction
//! exactly once: released to the contractor, refunded to the payer, or
//! failed. All transitions go through the store's guarded compare-and-set,
//! so concurrent writers (a manual release racing a webhook failure signal)
//! cannot lose updates. No lock is held across a processor call: the
//! gateway is invoked first and the guarded local transition applies its
//! result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::ProcessorGateway;
use crate::models::{EscrowStatus, EscrowTransaction, LedgerEvent};
use crate::notify::{NotificationKind, Notifier};
use crate::projects::ProjectDirectory;
use crate::registry::PayoutAccountRegistry;
use crate::store::{LedgerStore, ResolveOutcome, TransactionFilter};
use crate::{error::EscrowError, EscrowResult};

/// Configuration for the escrow ledger
#[derive(Debug, Clone)]
pub struct EscrowLedgerConfig {
    /// Platform fee withheld on release, in basis points
    pub platform_fee_bps: u16,
    /// Upper bound on any single processor call
    pub gateway_timeout: Duration,
}

impl Default for EscrowLedgerConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 500, // 5%
            gateway_timeout: Duration::from_secs(15),
        }
    }
}

/// Deposit request from a payer
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub project_id: Uuid,
    pub payer_id: Uuid,
    /// Amount in minor currency units
    pub amount: i64,
    pub milestone_id: Option<Uuid>,
    /// Processor token for the payer's payment method
    pub payment_method: String,
}

/// Core escrow ledger
pub struct EscrowLedger {
    config: EscrowLedgerConfig,
    store: LedgerStore,
    registry: Arc<PayoutAccountRegistry>,
    gateway: Arc<dyn ProcessorGateway>,
    notifier: Arc<dyn Notifier>,
    projects: Arc<dyn ProjectDirectory>,
    /// Transaction ids with a release currently in flight
    releases_in_flight: Mutex<HashSet<Uuid>>,
}

impl EscrowLedger {
    pub fn new(
        config: EscrowLedgerConfig,
        store: LedgerStore,
        registry: Arc<PayoutAccountRegistry>,
        gateway: Arc<dyn ProcessorGateway>,
        notifier: Arc<dyn Notifier>,
        projects: Arc<dyn ProjectDirectory>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            gateway,
            notifier,
            projects,
            releases_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Deposit funds into escrow for a project
    ///
    /// Atomic from the caller's point of view: either a hold exists at the
    /// processor and a held transaction is recorded, or nothing is
    /// persisted at all.
    pub async fn deposit(&self, request: DepositRequest) -> EscrowResult<EscrowTransaction> {
        if request.amount <= 0 {
            return Err(EscrowError::validation("Deposit amount must be positive"));
        }

        if let Some(milestone_id) = request.milestone_id {
            if self.store.find_held_by_milestone(milestone_id).await.is_some() {
                return Err(EscrowError::validation(format!(
                    "Milestone {} already has a held escrow deposit",
                    milestone_id
                )));
            }
        }

        let contractor_id = self.projects.contractor_for(request.project_id).await?;
        let beneficiary = self.registry.get_account(contractor_id).await;
        let account_ref = match beneficiary.external_account_id.as_deref() {
            Some(account_ref) if beneficiary.status.is_payable() => account_ref.to_string(),
            _ => {
                return Err(EscrowError::BeneficiaryNotPayable {
                    user_id: contractor_id,
                    status: beneficiary.status,
                });
            }
        };

        // Gateway first; nothing is persisted until the hold exists.
        let hold_ref = match timeout(
            self.config.gateway_timeout,
            self.gateway
                .create_hold(request.amount, &request.payment_method),
        )
        .await
        {
            Ok(Ok(hold_ref)) => hold_ref,
            Ok(Err(err)) => return Err(EscrowError::deposit_failed(err.to_string())),
            Err(_) => return Err(EscrowError::deposit_failed("hold creation timed out")),
        };

        let tx = EscrowTransaction::new(
            request.project_id,
            request.milestone_id,
            request.amount,
            self.config.platform_fee_bps,
            request.payer_id,
            contractor_id,
            account_ref,
            hold_ref,
        );
        self.store.insert(tx.clone()).await;

        self.store
            .record_event(
                LedgerEvent::new(tx.id, "escrow.deposited")
                    .with_actor(request.payer_id)
                    .with_amount(tx.amount)
                    .with_reference(tx.external_hold_ref.clone()),
            )
            .await;

        self.notify(
            tx.payer_id,
            "Funds held in escrow",
            "Your deposit is held until the work is approved",
            NotificationKind::Success,
            &tx,
        )
        .await;
        self.notify(
            tx.beneficiary_user_id,
            "Escrow funded",
            "The project escrow has been funded",
            NotificationKind::Info,
            &tx,
        )
        .await;

        info!(
            "Deposited {} into escrow {} for project {}",
            tx.amount, tx.id, tx.project_id
        );

        Ok(tx)
    }

    /// Release held funds to the beneficiary, minus the platform fee
    ///
    /// Safe to retry: a transaction that is already released is returned
    /// as-is without issuing a second transfer.
    pub async fn release(
        &self,
        transaction_id: Uuid,
        initiator_id: Uuid,
    ) -> EscrowResult<EscrowTransaction> {
        let tx = self
            .store
            .get(transaction_id)
            .await
            .ok_or(EscrowError::NotFound { transaction_id })?;

        match tx.status {
            EscrowStatus::Held => {}
            EscrowStatus::Released => return Ok(tx),
            status => {
                return Err(EscrowError::InvalidState {
                    transaction_id,
                    status,
                });
            }
        }

        // The beneficiary gate applies on release too; onboarding may have
        // been restricted since the deposit.
        let beneficiary = self.registry.get_account(tx.beneficiary_user_id).await;
        if !beneficiary.status.is_payable() {
            return Err(EscrowError::BeneficiaryNotPayable {
                user_id: tx.beneficiary_user_id,
                status: beneficiary.status,
            });
        }

        // Single-flight claim so concurrent releases issue exactly one
        // transfer. Dropped on every exit path of execute_release.
        {
            let mut in_flight = self.releases_in_flight.lock().await;
            if !in_flight.insert(transaction_id) {
                return Err(EscrowError::ReleasePending {
                    transaction_id,
                    reason: "another release for this transaction is in flight".to_string(),
                });
            }
        }

        let result = self.execute_release(&tx, initiator_id).await;
        self.releases_in_flight.lock().await.remove(&transaction_id);
        result
    }

    async fn execute_release(
        &self,
        tx: &EscrowTransaction,
        initiator_id: Uuid,
    ) -> EscrowResult<EscrowTransaction> {
        // Re-check under the claim: the transaction may have resolved
        // between the caller's read and the claim acquisition, and a
        // transfer must never go out for a resolved transaction.
        let current = self.store.get(tx.id).await.ok_or(EscrowError::NotFound {
            transaction_id: tx.id,
        })?;
        match current.status {
            EscrowStatus::Held => {}
            EscrowStatus::Released => return Ok(current),
            status => {
                return Err(EscrowError::InvalidState {
                    transaction_id: tx.id,
                    status,
                });
            }
        }

        let payout = tx.released_amount();

        let transfer_ref = match timeout(
            self.config.gateway_timeout,
            self.gateway
                .transfer(&tx.beneficiary_account_id, payout, &tx.external_hold_ref),
        )
        .await
        {
            Ok(Ok(transfer_ref)) => transfer_ref,
            Ok(Err(err)) => {
                // Stays held so the release can be retried; only explicit
                // reconciliation evidence moves a transaction to failed.
                warn!("Transfer for escrow {} failed: {}", tx.id, err);
                return Err(EscrowError::gateway(err.to_string()));
            }
            Err(_) => {
                return Err(EscrowError::ReleasePending {
                    transaction_id: tx.id,
                    reason: "transfer timed out; outcome unknown until reconciled".to_string(),
                });
            }
        };

        let reference = transfer_ref.clone();
        let resolved = match self
            .store
            .resolve_if_held(tx.id, EscrowStatus::Released, move |record| {
                record.external_transfer_ref = Some(transfer_ref);
            })
            .await
        {
            ResolveOutcome::Applied(record) => record,
            ResolveOutcome::AlreadyTerminal(record) => {
                // Lost the race to a webhook-driven transition after the
                // transfer went out. The terminal state stands; keep the
                // transfer evidence in the audit trail for the operator.
                error!(
                    "Escrow {} resolved to {:?} while transfer {} was in flight",
                    record.id, record.status, reference
                );
                self.store
                    .record_event(
                        LedgerEvent::new(record.id, "escrow.transfer_unreconciled")
                            .with_reference(reference)
                            .with_detail(json!({ "resolved_status": record.status })),
                    )
                    .await;
                return Err(EscrowError::InvalidState {
                    transaction_id: record.id,
                    status: record.status,
                });
            }
            ResolveOutcome::Missing => {
                return Err(EscrowError::NotFound {
                    transaction_id: tx.id,
                });
            }
        };

        self.store
            .record_event(
                LedgerEvent::new(resolved.id, "escrow.released")
                    .with_actor(initiator_id)
                    .with_amount(payout)
                    .with_reference(reference),
            )
            .await;

        self.notify(
            resolved.beneficiary_user_id,
            "Escrow released",
            "Funds are on the way to your payout account",
            NotificationKind::Success,
            &resolved,
        )
        .await;

        info!(
            "Released escrow {} ({} to {})",
            resolved.id, payout, resolved.beneficiary_account_id
        );

        Ok(resolved)
    }

    /// Refund held funds to the payer (dispute resolution or admin reversal)
    pub async fn refund(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> EscrowResult<EscrowTransaction> {
        let tx = self
            .store
            .get(transaction_id)
            .await
            .ok_or(EscrowError::NotFound { transaction_id })?;

        match tx.status {
            EscrowStatus::Held => {}
            EscrowStatus::Refunded => return Ok(tx),
            status => {
                return Err(EscrowError::InvalidState {
                    transaction_id,
                    status,
                });
            }
        }

        match timeout(
            self.config.gateway_timeout,
            self.gateway.reverse_hold(&tx.external_hold_ref),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(EscrowError::gateway(err.to_string())),
            Err(_) => return Err(EscrowError::gateway("hold reversal timed out")),
        }

        let note = reason.to_string();
        let resolved = match self
            .store
            .resolve_if_held(transaction_id, EscrowStatus::Refunded, move |record| {
                record.resolution_reason = Some(note);
            })
            .await
        {
            ResolveOutcome::Applied(record) => record,
            ResolveOutcome::AlreadyTerminal(record) if record.status == EscrowStatus::Refunded => {
                return Ok(record);
            }
            ResolveOutcome::AlreadyTerminal(record) => {
                return Err(EscrowError::InvalidState {
                    transaction_id: record.id,
                    status: record.status,
                });
            }
            ResolveOutcome::Missing => {
                return Err(EscrowError::NotFound { transaction_id });
            }
        };

        self.store
            .record_event(
                LedgerEvent::new(resolved.id, "escrow.refunded")
                    .with_amount(resolved.amount)
                    .with_reference(resolved.external_hold_ref.clone())
                    .with_detail(json!({ "reason": reason })),
            )
            .await;

        self.notify(
            resolved.payer_id,
            "Escrow refunded",
            reason,
            NotificationKind::Info,
            &resolved,
        )
        .await;

        info!("Refunded escrow {}: {}", resolved.id, reason);

        Ok(resolved)
    }

    /// Mark the transaction behind a failed hold as failed (webhook-driven)
    ///
    /// A transaction that already resolved is left untouched; terminal
    /// states are never rewritten.
    pub(crate) async fn fail_by_hold_ref(&self, hold_ref: &str, reason: &str) -> EscrowResult<()> {
        let tx = match self.store.find_by_hold_ref(hold_ref).await {
            Some(tx) => tx,
            None => {
                warn!("Hold failure for unknown hold ref {}", hold_ref);
                return Ok(());
            }
        };

        let note = reason.to_string();
        match self
            .store
            .resolve_if_held(tx.id, EscrowStatus::Failed, move |record| {
                record.resolution_reason = Some(note);
            })
            .await
        {
            ResolveOutcome::Applied(record) => {
                self.store
                    .record_event(
                        LedgerEvent::new(record.id, "escrow.failed")
                            .with_reference(hold_ref)
                            .with_detail(json!({ "reason": reason })),
                    )
                    .await;
                self.notify(
                    record.payer_id,
                    "Escrow payment failed",
                    reason,
                    NotificationKind::Error,
                    &record,
                )
                .await;
                info!("Escrow {} failed: {}", record.id, reason);
            }
            ResolveOutcome::AlreadyTerminal(record) => {
                info!(
                    "Hold failure for escrow {} ignored; already {:?}",
                    record.id, record.status
                );
            }
            ResolveOutcome::Missing => {}
        }

        Ok(())
    }

    /// Record a transfer failure reported after a release already resolved
    ///
    /// Terminal ledger state is never rewritten from a post-hoc signal; the
    /// failure becomes a compensating audit entry plus an operator alert
    /// for manual intervention.
    pub(crate) async fn record_transfer_failure(
        &self,
        transfer_ref: &str,
        reason: &str,
    ) -> EscrowResult<()> {
        let tx = match self.store.find_by_transfer_ref(transfer_ref).await {
            Some(tx) => tx,
            None => {
                warn!("Transfer failure for unknown transfer ref {}", transfer_ref);
                return Ok(());
            }
        };

        error!(
            "Transfer {} for released escrow {} failed; manual intervention required: {}",
            transfer_ref, tx.id, reason
        );

        self.store
            .record_event(
                LedgerEvent::new(tx.id, "escrow.transfer_failed")
                    .with_amount(tx.released_amount())
                    .with_reference(transfer_ref)
                    .with_detail(json!({
                        "reason": reason,
                        "requires_manual_intervention": true,
                    })),
            )
            .await;

        self.notify(
            tx.beneficiary_user_id,
            "Payout failed",
            "A released payment could not reach your payout account",
            NotificationKind::Error,
            &tx,
        )
        .await;

        Ok(())
    }

    /// Get a transaction by id
    pub async fn get(&self, transaction_id: Uuid) -> EscrowResult<EscrowTransaction> {
        self.store
            .get(transaction_id)
            .await
            .ok_or(EscrowError::NotFound { transaction_id })
    }

    /// All transactions for a project, newest first
    pub async fn transactions_for_project(&self, project_id: Uuid) -> Vec<EscrowTransaction> {
        self.store
            .list(&TransactionFilter {
                project_id: Some(project_id),
                ..Default::default()
            })
            .await
    }

    /// Admin listing with status/date filters and paging
    pub async fn list(&self, filter: &TransactionFilter) -> Vec<EscrowTransaction> {
        self.store.list(filter).await
    }

    /// Audit trail for a transaction
    pub async fn events_for(&self, transaction_id: Uuid) -> Vec<LedgerEvent> {
        self.store.events_for(transaction_id).await
    }

    /// The held transaction for a milestone, if any
    pub async fn held_for_milestone(&self, milestone_id: Uuid) -> Option<EscrowTransaction> {
        self.store.find_held_by_milestone(milestone_id).await
    }

    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: NotificationKind,
        tx: &EscrowTransaction,
    ) {
        let refs = json!({
            "transaction_id": tx.id,
            "project_id": tx.project_id,
            "milestone_id": tx.milestone_id,
        });
        if let Err(err) = self.notifier.send(user_id, title, body, kind, refs).await {
            warn!("Notification to {} dropped: {}", user_id, err);
        }
    }
}
