//! Core data models for the escrow subsystem
//!
//! Contains the payout-account and escrow-transaction records, their state
//! machines, the append-only audit entry, and the typed reconciliation
//! events parsed from processor webhooks.
//!
//! All money values are i64 minor currency units (cents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Onboarding status of a contractor's payout account
///
/// The processor is authoritative on onboarding/KYC completion, so status
/// only moves through webhook reconciliation, never optimistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// No external account requested yet
    Unprovisioned,
    /// External account created, onboarding incomplete
    Pending,
    /// Onboarding complete, transfers allowed
    Active,
    /// Processor has restricted payouts to this account
    Restricted,
}

impl AccountStatus {
    /// Check if transfers may target this account
    pub fn is_payable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A contractor's registered destination for released funds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub user_id: Uuid,
    /// Processor-side account id, set once provisioning succeeds
    pub external_account_id: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutAccount {
    /// Create an unprovisioned record for a user
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            external_account_id: None,
            status: AccountStatus::Unprovisioned,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Escrow transaction status
///
/// Transitions are monotonic and one-way:
/// `Held -> {Released, Refunded, Failed}`. Terminal states are never
/// rewritten; post-hoc failure signals become audit entries instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds authorized and held against the project
    Held,
    /// Funds transferred to the beneficiary's payout account
    Released,
    /// Hold reversed, funds returned to the payer
    Refunded,
    /// Hold creation or an irrecoverable processor error failed the deposit
    Failed,
}

impl EscrowStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Held)
    }
}

/// A single escrow hold of a payer's funds against a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub project_id: Uuid,
    /// None means a project-level deposit with no milestone attached
    pub milestone_id: Option<Uuid>,
    /// Held amount in minor currency units, immutable after creation
    pub amount: i64,
    /// Platform fee withheld on release, in basis points (500 = 5%)
    pub platform_fee_bps: u16,
    pub payer_id: Uuid,
    pub beneficiary_user_id: Uuid,
    /// Processor-side payout account the release targets
    pub beneficiary_account_id: String,
    pub external_hold_ref: String,
    /// Set if and only if the transaction is released
    pub external_transfer_ref: Option<String>,
    pub status: EscrowStatus,
    /// Why the transaction was refunded or failed
    pub resolution_reason: Option<String>,
    pub deposited_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EscrowTransaction {
    /// Create a held transaction for a successfully created funds hold
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: Uuid,
        milestone_id: Option<Uuid>,
        amount: i64,
        platform_fee_bps: u16,
        payer_id: Uuid,
        beneficiary_user_id: Uuid,
        beneficiary_account_id: String,
        external_hold_ref: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            milestone_id,
            amount,
            platform_fee_bps,
            payer_id,
            beneficiary_user_id,
            beneficiary_account_id,
            external_hold_ref,
            external_transfer_ref: None,
            status: EscrowStatus::Held,
            resolution_reason: None,
            deposited_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Amount paid to the beneficiary on release: the held amount minus the
    /// platform fee, rounded down to the minor unit (never up, so the
    /// platform never pays out more than it collected).
    pub fn released_amount(&self) -> i64 {
        let keep_bps = 10_000 - i128::from(self.platform_fee_bps);
        (i128::from(self.amount) * keep_bps / 10_000) as i64
    }
}

/// Append-only audit entry for a ledger transition
///
/// Resolved transactions keep their full history; entries are only ever
/// added, never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub amount: Option<i64>,
    /// External processor reference (hold or transfer id)
    pub reference: Option<String>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEvent {
    /// Create an audit entry for a transaction
    pub fn new(transaction_id: Uuid, event_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            event_type: event_type.to_string(),
            actor_id: None,
            amount: None,
            reference: None,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_reference<S: Into<String>>(mut self, reference: S) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Processor-originated notification, verified and parsed by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    /// Processor-assigned event id, used for redelivery dedupe
    pub external_event_id: String,
    pub kind: ReconciliationKind,
}

/// Typed webhook payloads
///
/// New processor event types are added as variants here so the reconciler's
/// dispatch stays an exhaustive match rather than string-keyed branching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// Payout-account onboarding state changed on the processor side
    AccountStatusChanged {
        external_account_id: String,
        status: AccountStatus,
    },
    /// A transfer the processor previously accepted later failed
    TransferFailed {
        external_transfer_ref: String,
        reason: String,
    },
    /// The funds hold behind a deposit failed before resolution
    HoldFailed {
        external_hold_ref: String,
        reason: String,
    },
    /// Event type the subsystem takes no action on
    Unsupported { event_type: String },
}
