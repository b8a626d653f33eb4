//! Processor Gateway - adapter around the external payment processor
//!
//! The only component aware of the processor's wire protocol and
//! authentication scheme. It translates application intents (hold, transfer,
//! reversal, account onboarding) into processor calls and processor webhooks
//! into typed reconciliation events. No ledger state lives here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{AccountStatus, ReconciliationEvent, ReconciliationKind};
use crate::{error::EscrowError, EscrowResult};

/// Contractor business details forwarded to the processor at provisioning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    pub support_email: Option<String>,
}

/// Payment processor interface
///
/// Each implementation bridges the escrow subsystem to a concrete processor
/// backend (the REST client below in production, a scripted double in
/// tests). All methods map 1:1 onto processor primitives.
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    /// Create an external payout account for a contractor
    async fn create_account(
        &self,
        email: &str,
        profile: &BusinessProfile,
    ) -> EscrowResult<String>;

    /// Create a fresh onboarding link for an existing payout account
    async fn create_onboarding_link(&self, account_ref: &str) -> EscrowResult<String>;

    /// Authorize and hold funds from the payer; returns the hold reference
    async fn create_hold(&self, amount: i64, payer_payment_method: &str) -> EscrowResult<String>;

    /// Transfer held funds to a payout account; returns the transfer reference
    async fn transfer(
        &self,
        account_ref: &str,
        amount: i64,
        source_hold_ref: &str,
    ) -> EscrowResult<String>;

    /// Void a hold and return the funds to the payer
    async fn reverse_hold(&self, hold_ref: &str) -> EscrowResult<()>;

    /// Verify a webhook signature and parse the payload into a typed event
    fn verify_webhook(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> EscrowResult<ReconciliationEvent>;
}

/// Compute the hex signature the processor attaches to webhook deliveries
///
/// Keyed digest over `secret || '.' || payload`; both sides derive it
/// independently and compare.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Raw webhook envelope as delivered by the processor
#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AccountUpdatedData {
    account: String,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    disabled_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferFailedData {
    transfer: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HoldFailedData {
    hold: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse a verified webhook payload into a typed reconciliation event
pub(crate) fn parse_wire_event(raw_payload: &[u8]) -> EscrowResult<ReconciliationEvent> {
    let wire: WireEvent = serde_json::from_slice(raw_payload)?;

    let kind = match wire.event_type.as_str() {
        "account.updated" => {
            let data: AccountUpdatedData = serde_json::from_value(wire.data)?;
            let status = if data.disabled_reason.is_some() {
                AccountStatus::Restricted
            } else if data.payouts_enabled {
                AccountStatus::Active
            } else {
                AccountStatus::Pending
            };
            ReconciliationKind::AccountStatusChanged {
                external_account_id: data.account,
                status,
            }
        }
        "transfer.failed" => {
            let data: TransferFailedData = serde_json::from_value(wire.data)?;
            ReconciliationKind::TransferFailed {
                external_transfer_ref: data.transfer,
                reason: data.reason.unwrap_or_else(|| "unspecified".to_string()),
            }
        }
        "payment.failed" => {
            let data: HoldFailedData = serde_json::from_value(wire.data)?;
            ReconciliationKind::HoldFailed {
                external_hold_ref: data.hold,
                reason: data.reason.unwrap_or_else(|| "unspecified".to_string()),
            }
        }
        other => ReconciliationKind::Unsupported {
            event_type: other.to_string(),
        },
    };

    Ok(ReconciliationEvent {
        external_event_id: wire.id,
        kind,
    })
}

/// Configuration for the REST processor client
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Base URL of the processor API
    pub api_url: String,
    /// Bearer token for API calls
    pub api_key: String,
    /// Shared secret for webhook signatures
    pub webhook_secret: String,
}

/// REST client for the payment processor API
pub struct RestProcessorGateway {
    config: ProcessorConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    email: &'a str,
    business_profile: &'a BusinessProfile,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct OnboardingLinkRequest<'a> {
    account: &'a str,
}

#[derive(Debug, Deserialize)]
struct OnboardingLinkResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct CreateHoldRequest<'a> {
    amount: i64,
    currency: &'a str,
    payment_method: &'a str,
}

#[derive(Debug, Deserialize)]
struct HoldResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    amount: i64,
    currency: &'a str,
    destination: &'a str,
    source_hold: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
}

impl RestProcessorGateway {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> EscrowResult<R>
    where
        B: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.api_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| EscrowError::gateway(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EscrowError::gateway(format!(
                "{} returned {}: {}",
                path, status, detail
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|err| EscrowError::gateway(err.to_string()))
    }
}

#[async_trait]
impl ProcessorGateway for RestProcessorGateway {
    async fn create_account(
        &self,
        email: &str,
        profile: &BusinessProfile,
    ) -> EscrowResult<String> {
        let response: AccountResponse = self
            .post(
                "/v1/accounts",
                &CreateAccountRequest {
                    email,
                    business_profile: profile,
                },
            )
            .await?;
        Ok(response.id)
    }

    async fn create_onboarding_link(&self, account_ref: &str) -> EscrowResult<String> {
        let response: OnboardingLinkResponse = self
            .post(
                "/v1/account_links",
                &OnboardingLinkRequest {
                    account: account_ref,
                },
            )
            .await?;
        Ok(response.url)
    }

    async fn create_hold(&self, amount: i64, payer_payment_method: &str) -> EscrowResult<String> {
        let response: HoldResponse = self
            .post(
                "/v1/holds",
                &CreateHoldRequest {
                    amount,
                    currency: "usd",
                    payment_method: payer_payment_method,
                },
            )
            .await?;
        Ok(response.id)
    }

    async fn transfer(
        &self,
        account_ref: &str,
        amount: i64,
        source_hold_ref: &str,
    ) -> EscrowResult<String> {
        let response: TransferResponse = self
            .post(
                "/v1/transfers",
                &TransferRequest {
                    amount,
                    currency: "usd",
                    destination: account_ref,
                    source_hold: source_hold_ref,
                },
            )
            .await?;
        Ok(response.id)
    }

    async fn reverse_hold(&self, hold_ref: &str) -> EscrowResult<()> {
        let _: serde_json::Value = self
            .post(&format!("/v1/holds/{}/reverse", hold_ref), &())
            .await?;
        Ok(())
    }

    fn verify_webhook(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> EscrowResult<ReconciliationEvent> {
        let expected = sign_payload(&self.config.webhook_secret, raw_payload);
        if !expected.eq_ignore_ascii_case(signature_header.trim()) {
            return Err(EscrowError::invalid_signature(
                "signature does not match payload",
            ));
        }
        parse_wire_event(raw_payload)
    }
}
