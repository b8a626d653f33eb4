//! Error types for the escrow subsystem
//!
//! Validation and state-conflict errors are returned synchronously to the
//! caller. Gateway errors leave local state unambiguous (nothing persisted
//! for a deposit, still held for a release) and are retried by the caller
//! or by webhook redelivery, never internally.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccountStatus, EscrowStatus};

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Request rejected before any external call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payout account exists and is past provisioning
    #[error("Payout account for user {user_id} is already provisioned")]
    AlreadyProvisioned { user_id: Uuid },

    /// No external payout account exists for the user
    #[error("No payout account provisioned for user {user_id}")]
    NotProvisioned { user_id: Uuid },

    /// Beneficiary's payout account cannot receive transfers
    #[error("Payout account for user {user_id} is not payable (status: {status:?})")]
    BeneficiaryNotPayable { user_id: Uuid, status: AccountStatus },

    /// Referenced transaction does not exist
    #[error("Escrow transaction {transaction_id} not found")]
    NotFound { transaction_id: Uuid },

    /// Transition attempted on a transaction that is no longer held
    #[error("Escrow transaction {transaction_id} is already {status:?}")]
    InvalidState {
        transaction_id: Uuid,
        status: EscrowStatus,
    },

    /// Hold creation failed; no transaction was recorded
    #[error("Deposit failed: {0}")]
    DepositFailed(String),

    /// Release outcome unknown or deferred; the transaction remains held
    #[error("Release of transaction {transaction_id} is pending: {reason}")]
    ReleasePending {
        transaction_id: Uuid,
        reason: String,
    },

    /// Processor unreachable; caller should retry
    #[error("Payment processor unavailable: {0}")]
    GatewayUnavailable(String),

    /// Webhook signature verification failed; payload rejected outright
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a deposit failure
    pub fn deposit_failed<S: Into<String>>(msg: S) -> Self {
        Self::DepositFailed(msg.into())
    }

    /// Create a gateway availability error
    pub fn gateway<S: Into<String>>(msg: S) -> Self {
        Self::GatewayUnavailable(msg.into())
    }

    /// Create an invalid-signature error
    pub fn invalid_signature<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSignature(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the error is the expected outcome of a safe retry
    /// (a conflict rather than a fault)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::ReleasePending { .. }
        )
    }
}
