//! Escrow service facade
//!
//! Wires the registry, ledger, reconciler and auto-release trigger from a
//! single `Settings` value and exposes the subsystem's boundary operations.
//! Collaborators (payment processor, project directory, notifications) are
//! injected as handles; nothing here reaches for global state.

use std::sync::Arc;

use uuid::Uuid;

use crate::gateway::{BusinessProfile, ProcessorGateway};
use crate::ledger::{DepositRequest, EscrowLedger, EscrowLedgerConfig};
use crate::models::{EscrowTransaction, LedgerEvent, PayoutAccount};
use crate::notify::Notifier;
use crate::projects::ProjectDirectory;
use crate::reconciler::{ReconcileOutcome, WebhookReconciler};
use crate::registry::{PayoutAccountRegistry, ProvisionedAccount};
use crate::settings::Settings;
use crate::store::{AccountStore, LedgerStore, TransactionFilter};
use crate::trigger::{AutoReleaseOutcome, MilestoneAutoRelease};
use crate::EscrowResult;

/// Facade over the escrow subsystem
pub struct EscrowService {
    registry: Arc<PayoutAccountRegistry>,
    ledger: Arc<EscrowLedger>,
    reconciler: WebhookReconciler,
    auto_release: MilestoneAutoRelease,
}

impl EscrowService {
    /// Wire all components from settings and injected collaborators
    pub fn new(
        settings: &Settings,
        gateway: Arc<dyn ProcessorGateway>,
        projects: Arc<dyn ProjectDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Arc::new(PayoutAccountRegistry::new(
            AccountStore::new(),
            gateway.clone(),
        ));
        let ledger = Arc::new(EscrowLedger::new(
            EscrowLedgerConfig {
                platform_fee_bps: settings.ledger.platform_fee_bps,
                gateway_timeout: settings.gateway_timeout(),
            },
            LedgerStore::new(),
            registry.clone(),
            gateway.clone(),
            notifier,
            projects,
        ));
        let reconciler = WebhookReconciler::new(
            gateway,
            registry.clone(),
            ledger.clone(),
            settings.ledger.dedupe_window,
        );
        let auto_release = MilestoneAutoRelease::new(ledger.clone(), Uuid::nil());

        Self {
            registry,
            ledger,
            reconciler,
            auto_release,
        }
    }

    /// Create a payout account and onboarding link for a contractor
    pub async fn provision_payout_account(
        &self,
        user_id: Uuid,
        email: &str,
        profile: &BusinessProfile,
    ) -> EscrowResult<ProvisionedAccount> {
        self.registry.provision(user_id, email, profile).await
    }

    /// Re-issue an onboarding link for an existing payout account
    pub async fn refresh_onboarding_link(&self, user_id: Uuid) -> EscrowResult<String> {
        self.registry.refresh_onboarding_link(user_id).await
    }

    /// Current payout account record for a user
    pub async fn payout_account(&self, user_id: Uuid) -> PayoutAccount {
        self.registry.get_account(user_id).await
    }

    /// Deposit funds into escrow for a project
    pub async fn deposit(&self, request: DepositRequest) -> EscrowResult<EscrowTransaction> {
        self.ledger.deposit(request).await
    }

    /// Release a held transaction to its beneficiary
    pub async fn release(
        &self,
        transaction_id: Uuid,
        initiator_id: Uuid,
    ) -> EscrowResult<EscrowTransaction> {
        self.ledger.release(transaction_id, initiator_id).await
    }

    /// Refund a held transaction to its payer
    pub async fn refund(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> EscrowResult<EscrowTransaction> {
        self.ledger.refund(transaction_id, reason).await
    }

    /// Ingest a signed processor webhook
    pub async fn handle_webhook(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> EscrowResult<ReconcileOutcome> {
        self.reconciler.handle(raw_payload, signature_header).await
    }

    /// Milestone workflow hook
    pub async fn on_milestone_approved(&self, milestone_id: Uuid) -> AutoReleaseOutcome {
        self.auto_release.on_milestone_approved(milestone_id).await
    }

    /// Get one transaction
    pub async fn transaction(&self, transaction_id: Uuid) -> EscrowResult<EscrowTransaction> {
        self.ledger.get(transaction_id).await
    }

    /// Escrow transactions for a project, newest first
    pub async fn transactions_for_project(&self, project_id: Uuid) -> Vec<EscrowTransaction> {
        self.ledger.transactions_for_project(project_id).await
    }

    /// Admin listing with status/date filters and paging
    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Vec<EscrowTransaction> {
        self.ledger.list(filter).await
    }

    /// Audit trail for a transaction
    pub async fn transaction_events(&self, transaction_id: Uuid) -> Vec<LedgerEvent> {
        self.ledger.events_for(transaction_id).await
    }
}
