//! The send path: quote, then execute inside a single unit of work.
//!
//! `execute` is safe to retry with the same idempotency key. The first call
//! that commits wins; every later call gets the stored transaction back with
//! `replayed = true` and causes no side effects.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ComplianceConfig, FeeConfig, LimitConfig, SendConfig};
use crate::domain::money::{format_minor, minor_to_decimal};
use crate::domain::{
    AssetSendMetadata, Beneficiary, ComplianceResult, CooldownPolicy, DestinationAccount,
    OnchainState, OnchainStatus, Transaction, TransactionKind, TransactionMetadata,
    TransactionStatus, TravelRuleInfo, User,
};
use crate::error::AppError;
use crate::exchange::{ExchangeApi, Market, MarketRate, WithdrawalRequest};
use crate::ports::{Repositories, RepositoryError, UnitOfWork};
use crate::services::audit::{AuditEvent, AuditSink};
use crate::services::compliance::ComplianceScreener;
use crate::services::fees::{Charges, FeeBreakdown, FeeCalculator};
use crate::services::ledger::LedgerPoster;
use crate::services::limits::LimitValidator;
use crate::services::rates::RateProvider;
use crate::validation::{
    sanitize_string, validate_destination_address, validate_idempotency_key, validate_purpose,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    /// Minor units.
    pub face_value: i64,
    pub beneficiary_id: Uuid,
    #[serde(default)]
    pub destination_id: Option<Uuid>,
    pub purpose: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Indicative pricing. Nothing is reserved or persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub user_id: Uuid,
    pub pair: String,
    pub face_value: i64,
    pub rate: MarketRate,
    pub fees: FeeBreakdown,
    pub exchange_quote_id: String,
    pub asset_amount: BigDecimal,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Completed,
    ComplianceHold,
    /// Pending without a hold. Not produced by `execute` today.
    Processing,
    Failed,
}

impl SendOutcome {
    fn of(tx: &Transaction) -> Self {
        match tx.status {
            TransactionStatus::Completed => SendOutcome::Completed,
            TransactionStatus::Failed => SendOutcome::Failed,
            TransactionStatus::Pending if tx.is_compliance_hold() => SendOutcome::ComplianceHold,
            TransactionStatus::Pending => SendOutcome::Processing,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub transaction: Transaction,
    pub outcome: SendOutcome,
    pub replayed: bool,
}

impl SendResult {
    fn new(transaction: Transaction, replayed: bool) -> Self {
        Self {
            outcome: SendOutcome::of(&transaction),
            transaction,
            replayed,
        }
    }
}

/// Everything the orchestrator reads from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub market: Market,
    pub fees: FeeConfig,
    pub limits: LimitConfig,
    pub compliance: ComplianceConfig,
    pub send: SendConfig,
}

enum Step {
    /// Another request committed this key while we waited for the user lock.
    Replay(Transaction),
    /// Staged in the unit of work, ready to commit.
    Staged(Transaction),
    /// The insert hit the unique key.
    Conflict,
}

pub struct TransactionOrchestrator {
    repos: Repositories,
    exchange: Arc<dyn ExchangeApi>,
    rates: Arc<RateProvider>,
    fees: FeeCalculator,
    limits: LimitValidator,
    compliance: ComplianceScreener,
    ledger: LedgerPoster,
    audit: Arc<dyn AuditSink>,
    market: Market,
    send: SendConfig,
    min_amount: i64,
    per_transaction: i64,
    cooldown: CooldownPolicy,
    clock: Arc<dyn Clock>,
}

impl TransactionOrchestrator {
    pub fn new(
        repos: Repositories,
        exchange: Arc<dyn ExchangeApi>,
        rates: Arc<RateProvider>,
        audit: Arc<dyn AuditSink>,
        settings: OrchestratorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cooldown = settings.send.cooldown_policy(&settings.limits);
        Self {
            fees: FeeCalculator::new(settings.fees),
            min_amount: settings.limits.min_amount,
            per_transaction: settings.limits.per_transaction,
            limits: LimitValidator::new(
                repos.transactions.clone(),
                settings.limits,
                clock.clone(),
            ),
            compliance: ComplianceScreener::new(
                repos.transactions.clone(),
                repos.beneficiaries.clone(),
                settings.compliance,
                clock.clone(),
            ),
            ledger: LedgerPoster::new(clock.clone()),
            repos,
            exchange,
            rates,
            audit,
            market: settings.market,
            send: settings.send,
            cooldown,
            clock,
        }
    }

    /// Prices a send for `user_id` without mutating anything.
    pub async fn quote(&self, user_id: Uuid, face_value: i64) -> Result<Quote, AppError> {
        let user = self.load_user(user_id).await?;
        self.check_user(&user)?;

        if face_value < self.min_amount || face_value > self.per_transaction {
            return Err(AppError::InvalidAmount(format!(
                "amount must be between {} and {}",
                format_minor(self.min_amount),
                format_minor(self.per_transaction)
            )));
        }

        let rate = self.rates.get_rate(&self.market.pair).await?;
        let fees = self.fees.calculate(face_value, &rate.ask_price)?;
        let exchange_quote = self
            .exchange
            .get_instant_quote(
                &self.market.pair,
                &minor_to_decimal(fees.charges.net_to_exchange),
            )
            .await?;

        tracing::debug!(
            %user_id,
            face_value,
            quote_id = %exchange_quote.id,
            "Quoted send"
        );

        Ok(Quote {
            user_id,
            pair: self.market.pair.clone(),
            face_value,
            asset_amount: fees.asset_amount.clone(),
            exchange_quote_id: exchange_quote.id,
            expires_at: self.clock.now() + Duration::seconds(self.send.quote_ttl_secs),
            rate,
            fees,
        })
    }

    /// Executes a send from `wallet_id`. Any error after the unit of work
    /// begins rolls back every staged write, the wallet debit included.
    pub async fn execute(
        &self,
        user_id: Uuid,
        wallet_id: Uuid,
        request: SendRequest,
    ) -> Result<SendResult, AppError> {
        let transaction_id = match request.idempotency_key.as_deref() {
            Some(key) => {
                validate_idempotency_key(key)?;
                key.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };
        validate_purpose(&request.purpose)?;
        if request.face_value <= 0 {
            return Err(AppError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        if request.face_value < self.min_amount {
            return Err(AppError::InvalidAmount(format!(
                "amount must be at least {}",
                format_minor(self.min_amount)
            )));
        }

        if let Some(existing) = self
            .repos
            .transactions
            .find_by_transaction_id(&transaction_id)
            .await?
        {
            tracing::info!(%transaction_id, "Replaying completed send");
            return replay(existing, user_id, wallet_id, &request);
        }

        let mut uow = self.repos.begin().await?;
        let step = self
            .stage_send(uow.as_mut(), user_id, wallet_id, &transaction_id, &request)
            .await;

        match step {
            Ok(Step::Staged(tx)) => match uow.commit().await {
                Ok(()) => {
                    self.record_committed(&tx);
                    Ok(SendResult::new(tx, false))
                }
                Err(RepositoryError::Duplicate(_)) => {
                    self.replay_committed(&transaction_id, user_id, wallet_id, &request)
                        .await
                }
                Err(e) => Err(e.into()),
            },
            Ok(Step::Replay(tx)) => {
                rollback(uow.as_mut(), &transaction_id).await;
                tracing::info!(%transaction_id, "Replaying send committed concurrently");
                replay(tx, user_id, wallet_id, &request)
            }
            Ok(Step::Conflict) => {
                rollback(uow.as_mut(), &transaction_id).await;
                self.replay_committed(&transaction_id, user_id, wallet_id, &request)
                    .await
            }
            Err(e) => {
                rollback(uow.as_mut(), &transaction_id).await;
                tracing::warn!(%transaction_id, %user_id, code = e.code(), error = %e, "Send rejected");
                Err(e)
            }
        }
    }

    async fn stage_send(
        &self,
        uow: &mut dyn UnitOfWork,
        user_id: Uuid,
        wallet_id: Uuid,
        transaction_id: &str,
        request: &SendRequest,
    ) -> Result<Step, AppError> {
        uow.lock_user(user_id).await?;
        if let Some(existing) = uow.find_by_transaction_id(transaction_id).await? {
            return Ok(Step::Replay(existing));
        }

        let user = self.load_user(user_id).await?;
        self.check_user(&user)?;

        let beneficiary = self
            .repos
            .beneficiaries
            .get_by_id(user_id, request.beneficiary_id)
            .await?
            .ok_or(AppError::BeneficiaryNotFound(request.beneficiary_id))?;
        let mut destination = beneficiary
            .select_destination(request.destination_id)
            .cloned()
            .ok_or(AppError::NoDestinationAccount(beneficiary.id))?;
        self.check_destination(&destination)?;

        self.limits
            .validate(user_id, request.face_value, &destination)
            .await?
            .into_result()?;

        let screening = self
            .compliance
            .screen(user_id, request.face_value, &destination)
            .await?;
        let travel_rule = travel_rule(&user, &beneficiary, &destination, &request.purpose);

        if screening.hold {
            let charges = self.fees.charges(request.face_value)?;
            let tx = self.build_transaction(
                transaction_id,
                &user,
                wallet_id,
                TransactionStatus::Pending,
                0,
                &destination,
                SendDetails {
                    charges,
                    asset_amount: None,
                    exchange_rate: None,
                    exchange_order_id: None,
                    withdrawal_id: None,
                    onchain_status: OnchainStatus::NotSubmitted,
                },
                travel_rule,
                screening,
            );
            return insert(uow, tx).await;
        }

        let wallet = uow
            .lock_wallet(wallet_id)
            .await?
            .filter(|w| w.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", wallet_id)))?;

        let rate = self.rates.refresh(&self.market.pair).await?;
        let fees = self.fees.calculate(request.face_value, &rate.ask_price)?;
        let total_charge = fees.charges.total_charge;
        if wallet.balance < total_charge {
            return Err(AppError::InsufficientBalance {
                available: wallet.balance,
                required: total_charge,
            });
        }

        let exchange_quote = self
            .exchange
            .get_instant_quote(
                &self.market.pair,
                &minor_to_decimal(fees.charges.net_to_exchange),
            )
            .await?;
        let order = self
            .exchange
            .execute_order(&exchange_quote.id, transaction_id)
            .await?;

        uow.debit_wallet(wallet_id, total_charge)
            .await
            .map_err(|e| match e {
                RepositoryError::Constraint(_) => AppError::InsufficientBalance {
                    available: wallet.balance,
                    required: total_charge,
                },
                other => other.into(),
            })?;

        self.ledger
            .post(
                uow,
                &format!("{} send to {}", self.market.asset, beneficiary.name),
                transaction_id,
                LedgerPoster::send_lines(&fees.charges),
            )
            .await?;

        let receipt = self
            .exchange
            .withdraw(&WithdrawalRequest {
                amount: fees.asset_amount.clone(),
                address: destination.address.clone(),
                network: destination.network.clone(),
                reference: transaction_id.to_string(),
            })
            .await?;

        let tx = self.build_transaction(
            transaction_id,
            &user,
            wallet_id,
            TransactionStatus::Completed,
            -total_charge,
            &destination,
            SendDetails {
                charges: fees.charges,
                asset_amount: Some(fees.asset_amount.clone()),
                exchange_rate: Some(rate.ask_price.clone()),
                exchange_order_id: Some(order.id),
                withdrawal_id: Some(receipt.id),
                onchain_status: OnchainStatus::Processing,
            },
            travel_rule,
            screening,
        );
        let step = insert(uow, tx).await?;

        destination.record_send(
            request.face_value,
            &fees.asset_amount,
            self.clock.now(),
            &self.cooldown,
        );
        uow.save_destination(&destination).await?;

        Ok(step)
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.repos
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))
    }

    fn check_user(&self, user: &User) -> Result<(), AppError> {
        if !user.is_active() {
            return Err(AppError::UserNotActive);
        }
        if user.kyc_tier < self.send.min_kyc_tier {
            return Err(AppError::KycTierInsufficient {
                required: self.send.min_kyc_tier,
                actual: user.kyc_tier,
            });
        }
        Ok(())
    }

    fn check_destination(&self, destination: &DestinationAccount) -> Result<(), AppError> {
        if !destination
            .network
            .eq_ignore_ascii_case(&self.market.verified_network)
        {
            return Err(AppError::InvalidDestination(format!(
                "network {} is not supported, only {}",
                destination.network, self.market.verified_network
            )));
        }
        validate_destination_address(&destination.network, &destination.address)
            .map_err(|e| AppError::InvalidDestination(e.message))?;

        if destination.in_cooldown(self.clock.now()) {
            if let Some(until) = destination.cooldown_until {
                return Err(AppError::BeneficiaryCooldown { until });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_transaction(
        &self,
        transaction_id: &str,
        user: &User,
        wallet_id: Uuid,
        status: TransactionStatus,
        amount: i64,
        destination: &DestinationAccount,
        details: SendDetails,
        travel_rule: TravelRuleInfo,
        compliance: ComplianceResult,
    ) -> Transaction {
        let now = self.clock.now();
        let charges = details.charges;
        let metadata = TransactionMetadata::AssetSend(AssetSendMetadata {
            beneficiary_id: destination.beneficiary_id,
            destination_id: destination.id,
            asset: self.market.asset.clone(),
            network: destination.network.clone(),
            destination_address: destination.address.clone(),
            face_value: charges.face_value,
            fee_amount: charges.fee_amount,
            vat_portion: charges.vat_portion,
            fee_ex_vat: charges.fee_ex_vat,
            net_to_exchange: charges.net_to_exchange,
            total_charge: charges.total_charge,
            asset_amount: details.asset_amount,
            exchange_rate: details.exchange_rate,
            travel_rule,
            compliance,
            exchange_order_id: details.exchange_order_id,
            withdrawal_id: details.withdrawal_id,
            onchain: OnchainState {
                status: details.onchain_status,
                tx_hash: None,
                confirmations: 0,
                updated_at: now,
            },
        });

        Transaction::new(
            transaction_id.to_string(),
            user.id,
            Some(wallet_id),
            TransactionKind::AssetSend,
            status,
            amount,
            charges.face_value,
            Some(destination.id),
            metadata,
            now,
        )
    }

    async fn replay_committed(
        &self,
        transaction_id: &str,
        user_id: Uuid,
        wallet_id: Uuid,
        request: &SendRequest,
    ) -> Result<SendResult, AppError> {
        let original = self
            .repos
            .transactions
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "transaction {} conflicted but was not found",
                    transaction_id
                ))
            })?;
        tracing::info!(%transaction_id, "Concurrent duplicate send, returning original");
        replay(original, user_id, wallet_id, request)
    }

    fn record_committed(&self, tx: &Transaction) {
        let outcome = SendOutcome::of(tx);
        let (action, details) = match tx.asset_send() {
            Some(meta) => (
                if outcome == SendOutcome::ComplianceHold {
                    "asset_send.held"
                } else {
                    "asset_send.completed"
                },
                json!({
                    "face_value": meta.face_value,
                    "total_charge": meta.total_charge,
                    "asset_amount": meta.asset_amount,
                    "destination_id": meta.destination_id,
                    "withdrawal_id": meta.withdrawal_id,
                    "risk_score": meta.compliance.risk_score,
                    "flags": meta.compliance.flags,
                }),
            ),
            None => ("asset_send.completed", json!({})),
        };

        match outcome {
            SendOutcome::ComplianceHold => tracing::warn!(
                transaction_id = %tx.transaction_id,
                user_id = %tx.user_id,
                face_value = tx.face_value,
                "Send held for compliance review"
            ),
            _ => tracing::info!(
                transaction_id = %tx.transaction_id,
                user_id = %tx.user_id,
                face_value = tx.face_value,
                amount = tx.amount,
                "Send completed"
            ),
        }

        self.audit.log(AuditEvent::new(
            action,
            Some(tx.user_id),
            tx.transaction_id.clone(),
            details,
            tx.created_at,
        ));
    }
}

struct SendDetails {
    charges: Charges,
    asset_amount: Option<BigDecimal>,
    exchange_rate: Option<BigDecimal>,
    exchange_order_id: Option<String>,
    withdrawal_id: Option<String>,
    onchain_status: OnchainStatus,
}

fn travel_rule(
    user: &User,
    beneficiary: &Beneficiary,
    destination: &DestinationAccount,
    purpose: &str,
) -> TravelRuleInfo {
    TravelRuleInfo {
        originator_id: user.id,
        originator_name: user.full_name.clone(),
        originator_country: user.country.clone(),
        beneficiary_name: beneficiary.name.clone(),
        beneficiary_country: destination.country.clone(),
        beneficiary_address: destination.address.clone(),
        purpose: sanitize_string(purpose),
    }
}

async fn insert(uow: &mut dyn UnitOfWork, tx: Transaction) -> Result<Step, AppError> {
    match uow.insert_transaction(&tx).await {
        Ok(stored) => Ok(Step::Staged(stored)),
        Err(RepositoryError::Duplicate(_)) => Ok(Step::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// A repeated key only replays the send it was first used for. Any other
/// caller or request shape is a conflict, and nothing of the stored send is
/// returned.
fn replay(
    existing: Transaction,
    user_id: Uuid,
    wallet_id: Uuid,
    request: &SendRequest,
) -> Result<SendResult, AppError> {
    let same_send = existing.user_id == user_id
        && existing.wallet_id == Some(wallet_id)
        && existing.face_value == request.face_value
        && existing.asset_send().map(|m| m.beneficiary_id) == Some(request.beneficiary_id);

    if !same_send {
        tracing::warn!(
            transaction_id = %existing.transaction_id,
            %user_id,
            "Idempotency key reused for a different send"
        );
        return Err(AppError::IdempotencyConflict(existing.transaction_id));
    }
    Ok(SendResult::new(existing, true))
}

async fn rollback(uow: &mut dyn UnitOfWork, transaction_id: &str) {
    if let Err(e) = uow.rollback().await {
        tracing::warn!(%transaction_id, error = %e, "Rollback failed");
    }
}
