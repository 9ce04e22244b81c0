use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::models::{
    ExchangeHealth, InstantQuote, MarketRate, MarketSummary, OrderResult, WithdrawalReceipt,
    WithdrawalRequest, WithdrawalStatus,
};
use super::retry::RetryPolicy;
use super::signing::{sign_request, API_KEY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use super::ExchangeError;
use crate::clock::Clock;

/// Operations the rest of the service needs from the exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_market_rate(&self, pair: &str) -> Result<MarketRate, ExchangeError>;

    async fn get_instant_quote(
        &self,
        pair: &str,
        pay_amount: &BigDecimal,
    ) -> Result<InstantQuote, ExchangeError>;

    async fn execute_order(
        &self,
        quote_id: &str,
        idempotency_key: &str,
    ) -> Result<OrderResult, ExchangeError>;

    async fn withdraw(&self, request: &WithdrawalRequest)
        -> Result<WithdrawalReceipt, ExchangeError>;

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalStatus, ExchangeError>;

    async fn health_check(&self) -> ExchangeHealth;
}

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// What the client trades and where it may withdraw to.
#[derive(Debug, Clone)]
pub struct Market {
    pub pair: String,
    pub asset: String,
    pub quote_currency: String,
    pub verified_network: String,
}

impl Default for Market {
    fn default() -> Self {
        Self {
            pair: "USDTZAR".to_string(),
            asset: "USDT".to_string(),
            quote_currency: "ZAR".to_string(),
            verified_network: "TRON".to_string(),
        }
    }
}

/// HTTP client for the exchange REST API with signing, retries and a shared
/// circuit breaker.
#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    market: Market,
    retry: RetryPolicy,
    circuit_breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
}

impl ExchangeClient {
    /// Creates a new ExchangeClient with the default 30 s request timeout
    pub fn new(base_url: String, circuit_breaker: Arc<CircuitBreaker>, clock: Arc<dyn Clock>) -> Self {
        Self::with_timeout(base_url, circuit_breaker, clock, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: String,
        circuit_breaker: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        ExchangeClient {
            client,
            base_url,
            credentials: None,
            market: Market::default(),
            retry: RetryPolicy::default(),
            circuit_breaker,
            clock,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<ApiCredentials>) -> Self {
        self.credentials = credentials.filter(|c| !c.api_key.is_empty() && !c.api_secret.is_empty());
        self
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = market;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Runs one logical call through the breaker and retry policy. Every
    /// terminal failure counts against the breaker.
    async fn call<T: DeserializeOwned + Send>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        if signed && self.credentials.is_none() {
            return Err(ExchangeError::NotConfigured);
        }
        self.circuit_breaker.try_acquire()?;

        let method_ref = &method;
        let result = self
            .retry
            .run(move |attempt| {
                tracing::debug!(method = %method_ref, path, attempt, "Calling exchange");
                self.send_once(method_ref.clone(), path, body, signed)
            })
            .await;

        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) => {
                tracing::error!(%method, path, error = %e, "Exchange call failed");
                self.circuit_breaker.record_failure();
            }
        }
        result
    }

    async fn send_once<T: DeserializeOwned + Send>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let body_text = body.map(Value::to_string).unwrap_or_default();

        let mut request = self.client.request(method.clone(), &url);
        if signed {
            let credentials = self.credentials.as_ref().ok_or(ExchangeError::NotConfigured)?;
            let timestamp = self.clock.now().timestamp_millis();
            let signature = sign_request(
                &credentials.api_secret,
                timestamp,
                method.as_str(),
                path,
                &body_text,
            );
            request = request
                .header(API_KEY_HEADER, &credentials.api_key)
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp.to_string());
        }
        if body.is_some() {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body_text);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ExchangeApi for ExchangeClient {
    async fn get_market_rate(&self, pair: &str) -> Result<MarketRate, ExchangeError> {
        let path = format!("/v1/public/{}/marketsummary", pair);
        let summary: MarketSummary = self.call(Method::GET, &path, None, false).await?;
        Ok(MarketRate::from_summary(pair, summary, self.clock.now()))
    }

    async fn get_instant_quote(
        &self,
        pair: &str,
        pay_amount: &BigDecimal,
    ) -> Result<InstantQuote, ExchangeError> {
        let path = format!("/v1/simple/{}/quote", pair);
        let body = json!({
            "payInCurrency": self.market.quote_currency,
            "payAmount": pay_amount.with_scale(2).to_string(),
            "side": "BUY",
        });
        self.call(Method::POST, &path, Some(&body), true).await
    }

    async fn execute_order(
        &self,
        quote_id: &str,
        idempotency_key: &str,
    ) -> Result<OrderResult, ExchangeError> {
        let path = format!("/v1/simple/{}/order", self.market.pair);
        let body = json!({
            "quoteId": quote_id,
            "customerOrderId": idempotency_key,
        });
        self.call(Method::POST, &path, Some(&body), true).await
    }

    async fn withdraw(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalReceipt, ExchangeError> {
        if !request
            .network
            .eq_ignore_ascii_case(&self.market.verified_network)
        {
            return Err(ExchangeError::UnsupportedNetwork {
                requested: request.network.clone(),
                allowed: self.market.verified_network.clone(),
            });
        }

        let path = format!("/v1/wallet/crypto/{}/withdraw", self.market.asset);
        let body = json!({
            "amount": request.amount.to_string(),
            "address": request.address,
            "network": self.market.verified_network,
            "customerReference": request.reference,
        });
        self.call(Method::POST, &path, Some(&body), true).await
    }

    async fn get_withdrawal_status(
        &self,
        withdrawal_id: &str,
    ) -> Result<WithdrawalStatus, ExchangeError> {
        let path = format!(
            "/v1/wallet/crypto/{}/withdraw/{}",
            self.market.asset, withdrawal_id
        );
        self.call(Method::GET, &path, None, true).await
    }

    async fn health_check(&self) -> ExchangeHealth {
        let breaker = self.circuit_breaker.snapshot();
        let exchange_healthy = if breaker.open {
            false
        } else {
            self.send_once::<Value>(Method::GET, "/v1/public/time", None, false)
                .await
                .map_err(|e| tracing::warn!(error = %e, "Exchange health check failed"))
                .is_ok()
        };

        ExchangeHealth {
            exchange_configured: self.is_configured(),
            exchange_healthy,
            circuit_breaker_open: breaker.open,
            failure_count: breaker.failure_count,
        }
    }
}
