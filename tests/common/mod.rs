#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use stablesend_core::adapters::MemoryStore;
use stablesend_core::clock::{Clock, ManualClock};
use stablesend_core::config::{
    ComplianceConfig, Config, ExchangeConfig, FeeConfig, LimitConfig, SendConfig,
};
use stablesend_core::domain::{
    Beneficiary, DepositMetadata, DestinationAccount, Transaction, TransactionKind,
    TransactionMetadata, TransactionStatus, User, UserStatus, Wallet,
};
use stablesend_core::exchange::{
    ExchangeApi, ExchangeError, ExchangeHealth, InstantQuote, Market, MarketRate, OrderResult,
    WithdrawalReceipt, WithdrawalRequest, WithdrawalStatus,
};
use stablesend_core::ports::Repositories;
use stablesend_core::services::{
    AuditEvent, AuditSink, MemoryRateCache, OrchestratorSettings, RateProvider, SendRequest,
    TransactionOrchestrator,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const TRON_ADDRESS: &str = "TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// In-process stand-in for the exchange. Counts every call by name.
#[derive(Default)]
pub struct FakeExchange {
    calls: Mutex<Vec<String>>,
    sequence: AtomicU32,
    pub fail_order: AtomicBool,
    pub fail_withdraw: AtomicBool,
    pub statuses: Mutex<HashMap<String, Result<WithdrawalStatus, u16>>>,
}

impl FakeExchange {
    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn set_status(&self, withdrawal_id: &str, status: &str, hash: Option<&str>, confirmations: u32) {
        self.statuses.lock().unwrap().insert(
            withdrawal_id.to_string(),
            Ok(WithdrawalStatus {
                id: withdrawal_id.to_string(),
                status: status.to_string(),
                transaction_hash: hash.map(str::to_string),
                confirmations,
            }),
        );
    }

    pub fn set_status_error(&self, withdrawal_id: &str, http_status: u16) {
        self.statuses
            .lock()
            .unwrap()
            .insert(withdrawal_id.to_string(), Err(http_status));
    }

    fn record(&self, name: &str) -> u32 {
        self.calls.lock().unwrap().push(name.to_string());
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn get_market_rate(&self, pair: &str) -> Result<MarketRate, ExchangeError> {
        self.record("get_market_rate");
        Ok(MarketRate {
            pair: pair.to_string(),
            bid_price: BigDecimal::from_str("18.40").unwrap(),
            ask_price: BigDecimal::from_str("18.50").unwrap(),
            mid_price: BigDecimal::from_str("18.45").unwrap(),
            last_trade: BigDecimal::from_str("18.45").unwrap(),
            timestamp: Utc::now(),
        })
    }

    async fn get_instant_quote(
        &self,
        pair: &str,
        pay_amount: &BigDecimal,
    ) -> Result<InstantQuote, ExchangeError> {
        let n = self.record("get_instant_quote");
        Ok(InstantQuote {
            id: format!("quote-{}", n),
            currency_pair: Some(pair.to_string()),
            pay_amount: pay_amount.clone(),
            receive_amount: (pay_amount / BigDecimal::from_str("18.50").unwrap()).round(6),
            fee: None,
            expires_at: None,
        })
    }

    async fn execute_order(
        &self,
        _quote_id: &str,
        _idempotency_key: &str,
    ) -> Result<OrderResult, ExchangeError> {
        let n = self.record("execute_order");
        if self.fail_order.load(Ordering::SeqCst) {
            return Err(ExchangeError::Http {
                status: 400,
                body: "quote expired".to_string(),
            });
        }
        Ok(OrderResult {
            id: format!("order-{}", n),
            status: Some("PLACED".to_string()),
        })
    }

    async fn withdraw(
        &self,
        _request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ExchangeError> {
        let n = self.record("withdraw");
        if self.fail_withdraw.load(Ordering::SeqCst) {
            return Err(ExchangeError::Http {
                status: 500,
                body: "withdrawals paused".to_string(),
            });
        }
        Ok(WithdrawalReceipt {
            id: format!("wd-{}", n),
        })
    }

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalStatus, ExchangeError> {
        self.record("get_withdrawal_status");
        match self.statuses.lock().unwrap().get(withdrawal_id) {
            Some(Ok(status)) => Ok(status.clone()),
            Some(Err(code)) => Err(ExchangeError::Http {
                status: *code,
                body: String::new(),
            }),
            None => Ok(WithdrawalStatus {
                id: withdrawal_id.to_string(),
                status: "Processing".to_string(),
                transaction_hash: None,
                confirmations: 0,
            }),
        }
    }

    async fn health_check(&self) -> ExchangeHealth {
        ExchangeHealth {
            exchange_configured: true,
            exchange_healthy: true,
            circuit_breaker_open: false,
            failure_count: 0,
        }
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }
}

impl AuditSink for RecordingAudit {
    fn log(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        market: Market::default(),
        fees: FeeConfig::default(),
        limits: LimitConfig::default(),
        compliance: ComplianceConfig::default(),
        send: SendConfig::default(),
    }
}

pub fn config() -> Config {
    let settings = settings();
    Config {
        server_port: 0,
        database_url: "postgres://unused".to_string(),
        redis_url: None,
        poll_interval_secs: 30,
        poll_batch_size: 100,
        audit_queue_capacity: 16,
        exchange: ExchangeConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            api_secret: None,
            webhook_secret: WEBHOOK_SECRET.to_string(),
            pair: "USDTZAR".to_string(),
            asset: "USDT".to_string(),
            quote_currency: "ZAR".to_string(),
            verified_network: "TRON".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1,
            breaker_threshold: 5,
            breaker_cooldown_secs: 300,
            rate_cache_ttl_secs: 60,
        },
        fees: settings.fees,
        limits: settings.limits,
        compliance: settings.compliance,
        send: settings.send,
    }
}

pub fn destination(beneficiary_id: Uuid, country: &str, created_at: DateTime<Utc>) -> DestinationAccount {
    DestinationAccount {
        id: Uuid::new_v4(),
        beneficiary_id,
        address: TRON_ADDRESS.to_string(),
        network: "TRON".to_string(),
        country: country.to_string(),
        is_active: true,
        cooldown_until: None,
        total_sends: 0,
        total_asset_sent: BigDecimal::from(0),
        total_sent: 0,
        first_send_at: None,
        created_at,
    }
}

/// A funded, verified user with one established South African beneficiary.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub exchange: Arc<FakeExchange>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<RecordingAudit>,
    pub orchestrator: TransactionOrchestrator,
    pub user_id: Uuid,
    pub wallet_id: Uuid,
    pub beneficiary_id: Uuid,
    pub destination_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(customize: impl FnOnce(&mut OrchestratorSettings)) -> Self {
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(FakeExchange::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let audit = Arc::new(RecordingAudit::default());
        let now = clock.now();

        let user_id = Uuid::new_v4();
        store.insert_user(User {
            id: user_id,
            full_name: "Sipho Ndlovu".to_string(),
            country: "ZA".to_string(),
            kyc_tier: 2,
            status: UserStatus::Active,
            created_at: now - Duration::days(365),
        });

        let wallet_id = Uuid::new_v4();
        store.insert_wallet(Wallet {
            id: wallet_id,
            user_id,
            balance: 10_000_000,
            updated_at: now,
        });

        let beneficiary_id = Uuid::new_v4();
        let dest = destination(beneficiary_id, "ZA", now - Duration::days(30));
        let destination_id = dest.id;
        store.insert_beneficiary(Beneficiary {
            id: beneficiary_id,
            user_id,
            name: "Thandi Mokoena".to_string(),
            destinations: vec![dest],
            created_at: now - Duration::days(30),
        });

        let mut settings = settings();
        customize(&mut settings);

        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let dyn_exchange: Arc<dyn ExchangeApi> = exchange.clone();
        let rates = Arc::new(RateProvider::new(
            dyn_exchange.clone(),
            Arc::new(MemoryRateCache::new(dyn_clock.clone())),
            std::time::Duration::from_secs(60),
        ));
        let orchestrator = TransactionOrchestrator::new(
            Repositories::from_store(store.clone()),
            dyn_exchange,
            rates,
            audit.clone(),
            settings,
            dyn_clock,
        );

        Self {
            store,
            exchange,
            clock,
            audit,
            orchestrator,
            user_id,
            wallet_id,
            beneficiary_id,
            destination_id,
        }
    }

    pub fn request(&self, face_value: i64, key: &str) -> SendRequest {
        SendRequest {
            face_value,
            beneficiary_id: self.beneficiary_id,
            destination_id: None,
            purpose: "Family support".to_string(),
            idempotency_key: Some(key.to_string()),
        }
    }

    /// Adds a beneficiary with a single destination, returning both ids.
    pub fn add_beneficiary(&self, country: &str, created_at: DateTime<Utc>) -> (Uuid, Uuid) {
        let beneficiary_id = Uuid::new_v4();
        let dest = destination(beneficiary_id, country, created_at);
        let destination_id = dest.id;
        self.store.insert_beneficiary(Beneficiary {
            id: beneficiary_id,
            user_id: self.user_id,
            name: "Recipient".to_string(),
            destinations: vec![dest],
            created_at,
        });
        (beneficiary_id, destination_id)
    }

    pub fn seed_deposit(&self, amount: i64, at: DateTime<Utc>) {
        self.store.seed_transaction(Transaction::new(
            format!("dep-{}", Uuid::new_v4()),
            self.user_id,
            Some(self.wallet_id),
            TransactionKind::Deposit,
            TransactionStatus::Completed,
            amount,
            amount,
            None,
            TransactionMetadata::Deposit(DepositMetadata {
                reference: Some("EFT".to_string()),
            }),
            at,
        ));
    }

    pub fn balance(&self) -> i64 {
        self.store.wallet_balance(self.wallet_id).unwrap()
    }
}
