use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::CooldownPolicy;
use crate::exchange::{CircuitBreakerConfig, Market, RetryPolicy};
use crate::validation::validate_country_code;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub poll_interval_secs: u64,
    pub poll_batch_size: i64,
    pub audit_queue_capacity: usize,
    pub exchange: ExchangeConfig,
    pub fees: FeeConfig,
    pub limits: LimitConfig,
    pub compliance: ComplianceConfig,
    pub send: SendConfig,
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub webhook_secret: String,
    pub pair: String,
    pub asset: String,
    pub quote_currency: String,
    pub verified_network: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: i64,
    pub rate_cache_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// Service fee in basis points of face value (750 = 7.5%).
    pub fee_bps: i64,
    pub vat_inclusive: bool,
    /// Flat withdrawal fee charged by the network, in asset units.
    pub network_fee_asset: BigDecimal,
}

/// All amounts in minor units.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    pub min_amount: i64,
    pub per_transaction: i64,
    pub daily: i64,
    pub monthly: i64,
    pub new_beneficiary_daily: i64,
    pub new_beneficiary_days: i64,
}

#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub blocked_countries: HashSet<String>,
    pub high_risk_countries: HashSet<String>,
    pub rapid_cashout_minutes: i64,
    pub rapid_cashout_min_deposit: i64,
    pub velocity_max_sends: i64,
    pub surge_max_new_destinations: i64,
    pub surge_window_days: i64,
}

#[derive(Debug, Clone)]
pub struct SendConfig {
    pub min_kyc_tier: i32,
    pub quote_ttl_secs: i64,
    pub cooldown_threshold: i64,
    pub cooldown_hours: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: parse_var("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: optional_var("REDIS_URL"),
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", 30)?,
            poll_batch_size: parse_var("POLL_BATCH_SIZE", 100)?,
            audit_queue_capacity: parse_var("AUDIT_QUEUE_CAPACITY", 1024)?,
            exchange: ExchangeConfig::from_env()?,
            fees: FeeConfig::from_env()?,
            limits: LimitConfig::from_env()?,
            compliance: ComplianceConfig::from_env()?,
            send: SendConfig::from_env()?,
        })
    }

    /// Cross-field checks run by `config validate` and at startup.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.min_amount <= 0 {
            anyhow::bail!("MIN_SEND_AMOUNT must be positive");
        }
        if limits.min_amount > limits.per_transaction {
            anyhow::bail!("MIN_SEND_AMOUNT exceeds PER_TRANSACTION_LIMIT");
        }
        if limits.per_transaction > limits.daily || limits.daily > limits.monthly {
            anyhow::bail!("limits must satisfy per-transaction <= daily <= monthly");
        }
        if !(0..10_000).contains(&self.fees.fee_bps) {
            anyhow::bail!("FEE_BPS must be between 0 and 9999");
        }
        if self.exchange.max_attempts == 0 {
            anyhow::bail!("EXCHANGE_MAX_ATTEMPTS must be at least 1");
        }
        self.compliance.validate()
    }
}

impl ExchangeConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api.valr.com".to_string()),
            api_key: optional_var("EXCHANGE_API_KEY"),
            api_secret: optional_var("EXCHANGE_API_SECRET"),
            webhook_secret: env::var("EXCHANGE_WEBHOOK_SECRET").unwrap_or_default(),
            pair: env::var("EXCHANGE_PAIR").unwrap_or_else(|_| "USDTZAR".to_string()),
            asset: env::var("EXCHANGE_ASSET").unwrap_or_else(|_| "USDT".to_string()),
            quote_currency: env::var("EXCHANGE_QUOTE_CURRENCY")
                .unwrap_or_else(|_| "ZAR".to_string()),
            verified_network: env::var("EXCHANGE_NETWORK").unwrap_or_else(|_| "TRON".to_string()),
            timeout_secs: parse_var("EXCHANGE_TIMEOUT_SECS", 30)?,
            max_attempts: parse_var("EXCHANGE_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_var("EXCHANGE_RETRY_BASE_MS", 1000)?,
            breaker_threshold: parse_var("EXCHANGE_BREAKER_THRESHOLD", 5)?,
            breaker_cooldown_secs: parse_var("EXCHANGE_BREAKER_COOLDOWN_SECS", 300)?,
            rate_cache_ttl_secs: parse_var("RATE_CACHE_TTL_SECS", 60)?,
        })
    }

    pub fn market(&self) -> Market {
        Market {
            pair: self.pair.clone(),
            asset: self.asset.clone(),
            quote_currency: self.quote_currency.clone(),
            verified_network: self.verified_network.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_threshold,
            cooldown: chrono::Duration::seconds(self.breaker_cooldown_secs),
        }
    }
}

impl FeeConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            fee_bps: parse_var("FEE_BPS", 750)?,
            vat_inclusive: parse_var("FEE_VAT_INCLUSIVE", true)?,
            network_fee_asset: parse_var("NETWORK_FEE_ASSET", BigDecimal::from(1))?,
        })
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            fee_bps: 750,
            vat_inclusive: true,
            network_fee_asset: BigDecimal::from(1),
        }
    }
}

impl LimitConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            min_amount: parse_var("MIN_SEND_AMOUNT", defaults.min_amount)?,
            per_transaction: parse_var("PER_TRANSACTION_LIMIT", defaults.per_transaction)?,
            daily: parse_var("DAILY_LIMIT", defaults.daily)?,
            monthly: parse_var("MONTHLY_LIMIT", defaults.monthly)?,
            new_beneficiary_daily: parse_var(
                "NEW_BENEFICIARY_DAILY_LIMIT",
                defaults.new_beneficiary_daily,
            )?,
            new_beneficiary_days: parse_var("NEW_BENEFICIARY_DAYS", defaults.new_beneficiary_days)?,
        })
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            min_amount: 1_000,
            per_transaction: 5_000_000,
            daily: 10_000_000,
            monthly: 50_000_000,
            new_beneficiary_daily: 500_000,
            new_beneficiary_days: 7,
        }
    }
}

impl ComplianceConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            blocked_countries: optional_var("BLOCKED_COUNTRIES")
                .map(|raw| parse_countries(&raw))
                .unwrap_or(defaults.blocked_countries),
            high_risk_countries: optional_var("HIGH_RISK_COUNTRIES")
                .map(|raw| parse_countries(&raw))
                .unwrap_or(defaults.high_risk_countries),
            rapid_cashout_minutes: parse_var("RAPID_CASHOUT_MINUTES", defaults.rapid_cashout_minutes)?,
            rapid_cashout_min_deposit: parse_var(
                "RAPID_CASHOUT_MIN_DEPOSIT",
                defaults.rapid_cashout_min_deposit,
            )?,
            velocity_max_sends: parse_var("VELOCITY_MAX_SENDS", defaults.velocity_max_sends)?,
            surge_max_new_destinations: parse_var(
                "SURGE_MAX_NEW_DESTINATIONS",
                defaults.surge_max_new_destinations,
            )?,
            surge_window_days: parse_var("SURGE_WINDOW_DAYS", defaults.surge_window_days)?,
        })
    }
}

impl ComplianceConfig {
    pub fn validate(&self) -> Result<()> {
        for (var, codes) in [
            ("BLOCKED_COUNTRIES", &self.blocked_countries),
            ("HIGH_RISK_COUNTRIES", &self.high_risk_countries),
        ] {
            for code in codes {
                if let Err(err) = validate_country_code(var, code) {
                    anyhow::bail!("{} entry '{}' {}", var, code, err.message);
                }
            }
        }
        Ok(())
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            blocked_countries: parse_countries("KP,IR,SY,CU"),
            high_risk_countries: parse_countries("AF,MM,YE,HT,SS,VE"),
            rapid_cashout_minutes: 10,
            rapid_cashout_min_deposit: 100_000,
            velocity_max_sends: 10,
            surge_max_new_destinations: 5,
            surge_window_days: 7,
        }
    }
}

impl SendConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            min_kyc_tier: parse_var("MIN_KYC_TIER", defaults.min_kyc_tier)?,
            quote_ttl_secs: parse_var("QUOTE_TTL_SECS", defaults.quote_ttl_secs)?,
            cooldown_threshold: parse_var("COOLDOWN_THRESHOLD", defaults.cooldown_threshold)?,
            cooldown_hours: parse_var("COOLDOWN_HOURS", defaults.cooldown_hours)?,
        })
    }

    pub fn cooldown_policy(&self, limits: &LimitConfig) -> CooldownPolicy {
        CooldownPolicy {
            threshold: self.cooldown_threshold,
            duration: chrono::Duration::hours(self.cooldown_hours),
            new_destination_age: chrono::Duration::days(limits.new_beneficiary_days),
        }
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            min_kyc_tier: 2,
            quote_ttl_secs: 60,
            cooldown_threshold: 500_000,
            cooldown_hours: 24,
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_countries(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}
