//! Persistence handles for escrow state
//!
//! In-memory stores shared as cheap cloneable handles and passed explicitly
//! into every component constructor. In production these map to database
//! tables; `resolve_if_held` corresponds to a compare-and-set
//! `UPDATE ... WHERE status = 'held'` so concurrent writers cannot lose
//! updates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{EscrowStatus, EscrowTransaction, LedgerEvent, PayoutAccount};

/// Outcome of a guarded transition attempt
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// Transition applied; carries the updated transaction
    Applied(EscrowTransaction),
    /// Transaction already terminal; left untouched
    AlreadyTerminal(EscrowTransaction),
    /// No transaction matched
    Missing,
}

/// Admin listing filter for escrow transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<EscrowStatus>,
    pub project_id: Option<Uuid>,
    pub deposited_after: Option<DateTime<Utc>>,
    pub deposited_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Record store for escrow transactions and their audit trail
///
/// Transactions are never deleted; resolution only adds state.
#[derive(Clone, Default)]
pub struct LedgerStore {
    /// Transaction records (in production, this would be a database table)
    transactions: Arc<RwLock<HashMap<Uuid, EscrowTransaction>>>,
    /// Append-only audit events
    events: Arc<RwLock<Vec<LedgerEvent>>>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a newly created transaction
    pub async fn insert(&self, tx: EscrowTransaction) {
        self.transactions.write().await.insert(tx.id, tx);
    }

    /// Get a transaction by id
    pub async fn get(&self, id: Uuid) -> Option<EscrowTransaction> {
        self.transactions.read().await.get(&id).cloned()
    }

    /// Find the held transaction for a milestone, if any
    pub async fn find_held_by_milestone(&self, milestone_id: Uuid) -> Option<EscrowTransaction> {
        self.transactions
            .read()
            .await
            .values()
            .find(|tx| tx.milestone_id == Some(milestone_id) && tx.status == EscrowStatus::Held)
            .cloned()
    }

    /// Find a transaction by its external hold reference
    pub async fn find_by_hold_ref(&self, hold_ref: &str) -> Option<EscrowTransaction> {
        self.transactions
            .read()
            .await
            .values()
            .find(|tx| tx.external_hold_ref == hold_ref)
            .cloned()
    }

    /// Find a transaction by its external transfer reference
    pub async fn find_by_transfer_ref(&self, transfer_ref: &str) -> Option<EscrowTransaction> {
        self.transactions
            .read()
            .await
            .values()
            .find(|tx| tx.external_transfer_ref.as_deref() == Some(transfer_ref))
            .cloned()
    }

    /// Conditional state transition: move to `status` and apply `update` iff
    /// the transaction is still held.
    ///
    /// Runs under a single write-lock acquisition, so a concurrent resolve
    /// on the same transaction observes the terminal state instead of
    /// overwriting it.
    pub async fn resolve_if_held<F>(
        &self,
        id: Uuid,
        status: EscrowStatus,
        update: F,
    ) -> ResolveOutcome
    where
        F: FnOnce(&mut EscrowTransaction),
    {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&id) {
            None => ResolveOutcome::Missing,
            Some(tx) if tx.status != EscrowStatus::Held => {
                ResolveOutcome::AlreadyTerminal(tx.clone())
            }
            Some(tx) => {
                tx.status = status;
                tx.resolved_at = Some(Utc::now());
                update(tx);
                ResolveOutcome::Applied(tx.clone())
            }
        }
    }

    /// Append an audit event
    pub async fn record_event(&self, event: LedgerEvent) {
        self.events.write().await.push(event);
    }

    /// Audit trail for a transaction, in insertion order
    pub async fn events_for(&self, transaction_id: Uuid) -> Vec<LedgerEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    /// List transactions matching a filter, newest first
    pub async fn list(&self, filter: &TransactionFilter) -> Vec<EscrowTransaction> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<EscrowTransaction> = transactions
            .values()
            .filter(|tx| filter.status.map_or(true, |status| tx.status == status))
            .filter(|tx| filter.project_id.map_or(true, |id| tx.project_id == id))
            .filter(|tx| {
                filter
                    .deposited_after
                    .map_or(true, |after| tx.deposited_at >= after)
            })
            .filter(|tx| {
                filter
                    .deposited_before
                    .map_or(true, |before| tx.deposited_at <= before)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.deposited_at.cmp(&a.deposited_at));

        matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Record store for contractor payout accounts
#[derive(Clone, Default)]
pub struct AccountStore {
    /// Account records keyed by user id
    accounts: Arc<RwLock<HashMap<Uuid, PayoutAccount>>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the payout account for a user
    pub async fn get(&self, user_id: Uuid) -> Option<PayoutAccount> {
        self.accounts.read().await.get(&user_id).cloned()
    }

    /// Insert or replace an account record
    pub async fn upsert(&self, account: PayoutAccount) {
        self.accounts.write().await.insert(account.user_id, account);
    }

    /// Find an account by its processor-side id
    pub async fn find_by_external_id(&self, external_account_id: &str) -> Option<PayoutAccount> {
        self.accounts
            .read()
            .await
            .values()
            .find(|account| account.external_account_id.as_deref() == Some(external_account_id))
            .cloned()
    }

    /// Mutate an account in place under the write lock
    pub async fn update<F>(&self, user_id: Uuid, update: F) -> Option<PayoutAccount>
    where
        F: FnOnce(&mut PayoutAccount),
    {
        let mut accounts = self.accounts.write().await;
        accounts.get_mut(&user_id).map(|account| {
            update(account);
            account.clone()
        })
    }
}
