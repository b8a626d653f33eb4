//! Milestone Auto-Release Trigger
//!
//! Invoked by the external project-milestone workflow when a milestone is
//! approved. Approval must never be rolled back by a payment-side problem,
//! so release failures surface as a deferred outcome instead of an error.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::EscrowLedger;
use crate::models::EscrowTransaction;

/// Result of an auto-release attempt
#[derive(Debug, Clone)]
pub enum AutoReleaseOutcome {
    /// The milestone has no held escrow deposit attached
    NoEscrow,
    /// Funds released to the contractor
    Released(EscrowTransaction),
    /// Release could not complete; the transaction remains held and the
    /// milestone workflow should surface a non-fatal warning
    Deferred {
        transaction_id: Uuid,
        reason: String,
    },
}

/// Auto-release hook for approved milestones
pub struct MilestoneAutoRelease {
    ledger: Arc<EscrowLedger>,
    /// Actor recorded on trigger-initiated releases
    system_actor: Uuid,
}

impl MilestoneAutoRelease {
    pub fn new(ledger: Arc<EscrowLedger>, system_actor: Uuid) -> Self {
        Self {
            ledger,
            system_actor,
        }
    }

    /// Release the held transaction for an approved milestone, if one exists
    ///
    /// Not every milestone has an escrow deposit; absence is a no-op. A
    /// redelivered approval finds no held transaction and is equally a
    /// no-op, so the trigger is safe to invoke repeatedly.
    pub async fn on_milestone_approved(&self, milestone_id: Uuid) -> AutoReleaseOutcome {
        let tx = match self.ledger.held_for_milestone(milestone_id).await {
            Some(tx) => tx,
            None => {
                info!("Milestone {} approved with no held escrow", milestone_id);
                return AutoReleaseOutcome::NoEscrow;
            }
        };

        match self.ledger.release(tx.id, self.system_actor).await {
            Ok(released) => {
                info!(
                    "Auto-released escrow {} for milestone {}",
                    released.id, milestone_id
                );
                AutoReleaseOutcome::Released(released)
            }
            Err(err) => {
                warn!("Auto-release for milestone {} deferred: {}", milestone_id, err);
                AutoReleaseOutcome::Deferred {
                    transaction_id: tx.id,
                    reason: err.to_string(),
                }
            }
        }
    }
}
