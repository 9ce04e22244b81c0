pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod signing;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use client::{ApiCredentials, ExchangeApi, ExchangeClient, Market};
pub use error::ExchangeError;
pub use models::{
    ExchangeHealth, InstantQuote, MarketRate, OrderResult, WithdrawalReceipt, WithdrawalRequest,
    WithdrawalStatus,
};
pub use retry::RetryPolicy;
