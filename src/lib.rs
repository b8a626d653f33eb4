//! Escrow ledger and milestone-release backend for a contractor marketplace
//!
//! This crate holds a payer's funds against a project, releases them to the
//! contractor's payout account (manually or on milestone approval), and
//! refunds them on dispute resolution. Local state is kept consistent with
//! an external payment processor through signed, idempotent webhooks:
//! - One-way escrow state machine with guarded compare-and-set transitions
//! - Processor gateway isolating the payment API and webhook protocol
//! - Bounded-window webhook dedupe for safe redelivery
//! - Append-only audit trail for every money movement

pub mod error;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod projects;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod settings;
pub mod store;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
