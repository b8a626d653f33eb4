//! Test doubles and fixtures shared across module tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::gateway::{parse_wire_event, sign_payload, BusinessProfile, ProcessorGateway};
use crate::ledger::{DepositRequest, EscrowLedger, EscrowLedgerConfig};
use crate::models::{AccountStatus, EscrowTransaction, ReconciliationEvent};
use crate::notify::{NotificationKind, Notifier};
use crate::projects::StaticProjectDirectory;
use crate::registry::PayoutAccountRegistry;
use crate::store::{AccountStore, LedgerStore};
use crate::{error::EscrowError, EscrowResult};

/// Initialise test logging once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One recorded transfer call
#[derive(Debug, Clone)]
pub struct TransferCall {
    pub account: String,
    pub amount: i64,
    pub hold_ref: String,
}

/// Scriptable processor double that records every call
pub struct MockGateway {
    webhook_secret: String,
    holds: Mutex<Vec<(i64, String)>>,
    transfers: Mutex<Vec<TransferCall>>,
    reversals: Mutex<Vec<String>>,
    accounts_created: AtomicUsize,
    fail_holds: AtomicBool,
    fail_transfers: AtomicBool,
    transfer_delay: std::sync::Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new(webhook_secret: &str) -> Self {
        Self {
            webhook_secret: webhook_secret.to_string(),
            holds: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            reversals: Mutex::new(Vec::new()),
            accounts_created: AtomicUsize::new(0),
            fail_holds: AtomicBool::new(false),
            fail_transfers: AtomicBool::new(false),
            transfer_delay: std::sync::Mutex::new(None),
        }
    }

    pub fn fail_holds(&self, fail: bool) {
        self.fail_holds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn delay_transfers(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = Some(delay);
    }

    pub async fn holds_created(&self) -> usize {
        self.holds.lock().await.len()
    }

    pub async fn transfers(&self) -> Vec<TransferCall> {
        self.transfers.lock().await.clone()
    }

    pub async fn reversals(&self) -> Vec<String> {
        self.reversals.lock().await.clone()
    }

    /// Sign a payload the way the processor would
    pub fn sign(&self, payload: &[u8]) -> String {
        sign_payload(&self.webhook_secret, payload)
    }
}

#[async_trait]
impl ProcessorGateway for MockGateway {
    async fn create_account(
        &self,
        _email: &str,
        _profile: &BusinessProfile,
    ) -> EscrowResult<String> {
        let n = self.accounts_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("acct_{}", n))
    }

    async fn create_onboarding_link(&self, account_ref: &str) -> EscrowResult<String> {
        Ok(format!("https://onboarding.example/{}", account_ref))
    }

    async fn create_hold(&self, amount: i64, payer_payment_method: &str) -> EscrowResult<String> {
        if self.fail_holds.load(Ordering::SeqCst) {
            return Err(EscrowError::gateway("simulated hold failure"));
        }
        let mut holds = self.holds.lock().await;
        holds.push((amount, payer_payment_method.to_string()));
        Ok(format!("hold_{}", holds.len()))
    }

    async fn transfer(
        &self,
        account_ref: &str,
        amount: i64,
        source_hold_ref: &str,
    ) -> EscrowResult<String> {
        let delay = *self.transfer_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(EscrowError::gateway("simulated transfer failure"));
        }
        let mut transfers = self.transfers.lock().await;
        transfers.push(TransferCall {
            account: account_ref.to_string(),
            amount,
            hold_ref: source_hold_ref.to_string(),
        });
        Ok(format!("tr_{}", transfers.len()))
    }

    async fn reverse_hold(&self, hold_ref: &str) -> EscrowResult<()> {
        self.reversals.lock().await.push(hold_ref.to_string());
        Ok(())
    }

    fn verify_webhook(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> EscrowResult<ReconciliationEvent> {
        let expected = sign_payload(&self.webhook_secret, raw_payload);
        if expected != signature_header {
            return Err(EscrowError::invalid_signature("signature mismatch"));
        }
        parse_wire_event(raw_payload)
    }
}

/// Notifier that records every send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, String, NotificationKind)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(Uuid, String, NotificationKind)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        user_id: Uuid,
        title: &str,
        _body: &str,
        kind: NotificationKind,
        _refs: Value,
    ) -> EscrowResult<()> {
        self.sent
            .lock()
            .await
            .push((user_id, title.to_string(), kind));
        Ok(())
    }
}

/// A wired ledger with an active contractor payout account
pub struct LedgerFixture {
    pub ledger: Arc<EscrowLedger>,
    pub registry: Arc<PayoutAccountRegistry>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub project_id: Uuid,
    pub payer_id: Uuid,
    pub contractor_id: Uuid,
    pub contractor_account_ref: String,
}

impl LedgerFixture {
    /// Deposit with defaults and unwrap; test helper only
    pub async fn deposit(&self, amount: i64, milestone_id: Option<Uuid>) -> EscrowTransaction {
        self.ledger
            .deposit(DepositRequest {
                project_id: self.project_id,
                payer_id: self.payer_id,
                amount,
                milestone_id,
                payment_method: "pm_card".to_string(),
            })
            .await
            .expect("fixture deposit")
    }
}

/// Build a ledger wired to mocks, with the contractor already onboarded
pub async fn ledger_fixture() -> LedgerFixture {
    init_tracing();

    let gateway = Arc::new(MockGateway::new("whsec_test"));
    let registry = Arc::new(PayoutAccountRegistry::new(
        AccountStore::new(),
        gateway.clone(),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let projects = Arc::new(StaticProjectDirectory::new());

    let project_id = Uuid::new_v4();
    let payer_id = Uuid::new_v4();
    let contractor_id = Uuid::new_v4();
    projects.assign(project_id, contractor_id).await;

    let provisioned = registry
        .provision(
            contractor_id,
            "contractor@example.com",
            &BusinessProfile::default(),
        )
        .await
        .expect("fixture provision");
    let contractor_account_ref = provisioned
        .account
        .external_account_id
        .expect("fixture account ref");
    registry
        .apply_status(&contractor_account_ref, AccountStatus::Active)
        .await
        .expect("fixture activation");

    let ledger = Arc::new(EscrowLedger::new(
        EscrowLedgerConfig {
            platform_fee_bps: 500,
            gateway_timeout: Duration::from_millis(100),
        },
        LedgerStore::new(),
        registry.clone(),
        gateway.clone(),
        notifier.clone(),
        projects,
    ));

    LedgerFixture {
        ledger,
        registry,
        gateway,
        notifier,
        project_id,
        payer_id,
        contractor_id,
        contractor_account_ref,
    }
}
