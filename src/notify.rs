//! User notification boundary
//!
//! Escrow operations emit fire-and-forget notifications on deposit, release,
//! refund and failure. Delivery is best-effort: a notification failure never
//! rolls back a ledger transition.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::EscrowResult;

/// Notification severity, mirroring the notification service contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification to a user; `refs` carries entity references for
    /// deep-linking (transaction, project, milestone ids)
    async fn send(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
        kind: NotificationKind,
        refs: Value,
    ) -> EscrowResult<()>;
}

/// Notifier that only writes to the log stream
///
/// Stands in for the external notification service in local runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        user_id: Uuid,
        title: &str,
        _body: &str,
        kind: NotificationKind,
        _refs: Value,
    ) -> EscrowResult<()> {
        info!("Notification ({:?}) to {}: {}", kind, user_id, title);
        Ok(())
    }
}
