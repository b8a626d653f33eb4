//! Payout Account Registry - tracks contractor payout accounts
//!
//! Gate for releases: funds may only target an account the processor has
//! finished onboarding. Client-initiated calls create accounts and links but
//! never set onboarding status; that advances only through the webhook
//! reconciler, because the processor is authoritative on KYC completion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{BusinessProfile, ProcessorGateway};
use crate::models::{AccountStatus, PayoutAccount};
use crate::store::AccountStore;
use crate::{error::EscrowError, EscrowResult};

/// Result of provisioning a payout account
#[derive(Debug, Clone)]
pub struct ProvisionedAccount {
    pub account: PayoutAccount,
    /// Processor-hosted onboarding flow for the contractor to complete
    pub onboarding_url: String,
}

/// Registry of contractor payout accounts
pub struct PayoutAccountRegistry {
    accounts: AccountStore,
    gateway: Arc<dyn ProcessorGateway>,
}

impl PayoutAccountRegistry {
    pub fn new(accounts: AccountStore, gateway: Arc<dyn ProcessorGateway>) -> Self {
        Self { accounts, gateway }
    }

    /// Create an external payout account and onboarding link for a contractor
    pub async fn provision(
        &self,
        user_id: Uuid,
        email: &str,
        profile: &BusinessProfile,
    ) -> EscrowResult<ProvisionedAccount> {
        if let Some(existing) = self.accounts.get(user_id).await {
            if existing.status != AccountStatus::Unprovisioned {
                return Err(EscrowError::AlreadyProvisioned { user_id });
            }
        }

        let account_ref = self.gateway.create_account(email, profile).await?;
        let onboarding_url = self.gateway.create_onboarding_link(&account_ref).await?;

        let mut account = PayoutAccount::new(user_id);
        account.external_account_id = Some(account_ref);
        account.status = AccountStatus::Pending;
        account.updated_at = Utc::now();
        self.accounts.upsert(account.clone()).await;

        info!("Provisioned payout account for user {}", user_id);

        Ok(ProvisionedAccount {
            account,
            onboarding_url,
        })
    }

    /// Create a fresh onboarding link for an already provisioned account
    pub async fn refresh_onboarding_link(&self, user_id: Uuid) -> EscrowResult<String> {
        let account = self
            .accounts
            .get(user_id)
            .await
            .ok_or(EscrowError::NotProvisioned { user_id })?;

        match account.external_account_id.as_deref() {
            Some(account_ref) => self.gateway.create_onboarding_link(account_ref).await,
            None => Err(EscrowError::NotProvisioned { user_id }),
        }
    }

    /// Get (or lazily create) the payout account record for a user
    pub async fn get_account(&self, user_id: Uuid) -> PayoutAccount {
        if let Some(account) = self.accounts.get(user_id).await {
            return account;
        }
        let account = PayoutAccount::new(user_id);
        self.accounts.upsert(account.clone()).await;
        account
    }

    /// Apply a processor-reported status change
    ///
    /// Reconciler-only entry point. A status change for an account the
    /// registry has never seen is logged and dropped; the webhook still
    /// succeeds so the processor stops redelivering it.
    pub(crate) async fn apply_status(
        &self,
        external_account_id: &str,
        status: AccountStatus,
    ) -> EscrowResult<()> {
        match self.accounts.find_by_external_id(external_account_id).await {
            Some(account) => {
                self.accounts
                    .update(account.user_id, |record| {
                        record.status = status;
                        record.updated_at = Utc::now();
                    })
                    .await;
                info!(
                    "Payout account {} moved to {:?}",
                    external_account_id, status
                );
                Ok(())
            }
            None => {
                warn!(
                    "Status change for unknown payout account {}",
                    external_account_id
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGateway;

    fn registry() -> (PayoutAccountRegistry, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new("whsec_test"));
        let registry = PayoutAccountRegistry::new(AccountStore::new(), gateway.clone());
        (registry, gateway)
    }

    #[tokio::test]
    async fn test_provision_creates_pending_account() {
        let (registry, _gateway) = registry();
        let user_id = Uuid::new_v4();

        let provisioned = registry
            .provision(user_id, "contractor@example.com", &BusinessProfile::default())
            .await
            .unwrap();

        assert_eq!(provisioned.account.status, AccountStatus::Pending);
        assert!(provisioned.account.external_account_id.is_some());
        assert!(!provisioned.onboarding_url.is_empty());
    }

    #[tokio::test]
    async fn test_provision_twice_is_rejected() {
        let (registry, _gateway) = registry();
        let user_id = Uuid::new_v4();

        registry
            .provision(user_id, "contractor@example.com", &BusinessProfile::default())
            .await
            .unwrap();
        let second = registry
            .provision(user_id, "contractor@example.com", &BusinessProfile::default())
            .await;

        assert!(matches!(
            second,
            Err(EscrowError::AlreadyProvisioned { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_link_requires_provisioning() {
        let (registry, _gateway) = registry();
        let result = registry.refresh_onboarding_link(Uuid::new_v4()).await;
        assert!(matches!(result, Err(EscrowError::NotProvisioned { .. })));
    }

    #[tokio::test]
    async fn test_status_advances_only_through_apply_status() {
        let (registry, _gateway) = registry();
        let user_id = Uuid::new_v4();

        let provisioned = registry
            .provision(user_id, "contractor@example.com", &BusinessProfile::default())
            .await
            .unwrap();
        let account_ref = provisioned.account.external_account_id.unwrap();

        // Provisioning alone never activates the account
        assert_eq!(
            registry.get_account(user_id).await.status,
            AccountStatus::Pending
        );

        registry
            .apply_status(&account_ref, AccountStatus::Active)
            .await
            .unwrap();
        assert_eq!(
            registry.get_account(user_id).await.status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn test_status_for_unknown_account_is_dropped() {
        let (registry, _gateway) = registry();
        let result = registry
            .apply_status("acct_unknown", AccountStatus::Active)
            .await;
        assert!(result.is_ok());
    }
}
