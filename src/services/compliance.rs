use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ComplianceConfig;
use crate::domain::money::format_minor;
use crate::domain::{
    ComplianceFlag, ComplianceResult, ComplianceRule, DestinationAccount, Severity,
    TransactionKind,
};
use crate::ports::{BeneficiaryRepository, RepositoryResult, TransactionRepository};

/// Screens a prospective send. Every rule is evaluated so the stored result
/// shows the full picture for review, not just the first hit.
pub struct ComplianceScreener {
    transactions: Arc<dyn TransactionRepository>,
    beneficiaries: Arc<dyn BeneficiaryRepository>,
    config: ComplianceConfig,
    clock: Arc<dyn Clock>,
}

impl ComplianceScreener {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        beneficiaries: Arc<dyn BeneficiaryRepository>,
        config: ComplianceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transactions,
            beneficiaries,
            config,
            clock,
        }
    }

    pub async fn screen(
        &self,
        user_id: Uuid,
        amount: i64,
        destination: &DestinationAccount,
    ) -> RepositoryResult<ComplianceResult> {
        let now = self.clock.now();
        let mut flags = Vec::new();
        let country = destination.country.to_ascii_uppercase();

        if self.config.blocked_countries.contains(&country) {
            flags.push(ComplianceFlag {
                rule: ComplianceRule::BlockedCountry,
                message: format!("Destination country {} is sanctioned", country),
                severity: Severity::Critical,
            });
        }

        if self.config.high_risk_countries.contains(&country) {
            flags.push(ComplianceFlag {
                rule: ComplianceRule::HighRiskCountry,
                message: format!(
                    "Destination country {} requires enhanced due diligence",
                    country
                ),
                severity: Severity::High,
            });
        }

        let cashout_window = Duration::minutes(self.config.rapid_cashout_minutes);
        if self
            .transactions
            .has_deposit_since(
                user_id,
                now - cashout_window,
                self.config.rapid_cashout_min_deposit,
            )
            .await?
        {
            flags.push(ComplianceFlag {
                rule: ComplianceRule::RapidCashOut,
                message: format!(
                    "Send of {} within {} minutes of a deposit",
                    format_minor(amount),
                    self.config.rapid_cashout_minutes
                ),
                severity: Severity::High,
            });
        }

        let recent_sends = self
            .transactions
            .count_since(user_id, TransactionKind::AssetSend, now - Duration::hours(24))
            .await?;
        if recent_sends >= self.config.velocity_max_sends {
            flags.push(ComplianceFlag {
                rule: ComplianceRule::Velocity,
                message: format!("{} sends in the last 24 hours", recent_sends),
                severity: Severity::Medium,
            });
        }

        let new_destinations = self
            .beneficiaries
            .count_new_destinations_since(
                user_id,
                now - Duration::days(self.config.surge_window_days),
            )
            .await?;
        if new_destinations >= self.config.surge_max_new_destinations {
            flags.push(ComplianceFlag {
                rule: ComplianceRule::NewBeneficiarySurge,
                message: format!(
                    "{} new destinations added in the last {} days",
                    new_destinations, self.config.surge_window_days
                ),
                severity: Severity::Medium,
            });
        }

        let result = ComplianceResult::from_flags(flags);
        if result.hold {
            tracing::warn!(
                %user_id,
                destination_id = %destination.id,
                risk_score = result.risk_score,
                flags = result.flags.len(),
                "Send held for compliance review"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::clock::ManualClock;
    use crate::domain::{
        AssetSendMetadata, DepositMetadata, OnchainState, OnchainStatus, Transaction,
        TransactionMetadata, TransactionStatus, TravelRuleInfo,
    };
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};

    fn destination(country: &str, created_at: chrono::DateTime<Utc>) -> DestinationAccount {
        DestinationAccount {
            id: Uuid::new_v4(),
            beneficiary_id: Uuid::new_v4(),
            address: "TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7".to_string(),
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

    fn seed_send(store: &MemoryStore, user_id: Uuid, key: &str, at: chrono::DateTime<Utc>) {
        let dest = destination("ZA", at - Duration::days(90));
        let metadata = AssetSendMetadata {
            beneficiary_id: dest.beneficiary_id,
            destination_id: dest.id,
            asset: "USDT".to_string(),
            network: "TRON".to_string(),
            destination_address: dest.address.clone(),
            face_value: 10_000,
            fee_amount: 750,
            vat_portion: 98,
            fee_ex_vat: 652,
            net_to_exchange: 9_250,
            total_charge: 10_000,
            asset_amount: None,
            exchange_rate: None,
            travel_rule: TravelRuleInfo {
                originator_id: user_id,
                originator_name: "Sipho Ndlovu".to_string(),
                originator_country: "ZA".to_string(),
                beneficiary_name: "Thandi Mokoena".to_string(),
                beneficiary_country: "ZA".to_string(),
                beneficiary_address: dest.address.clone(),
                purpose: "Family support".to_string(),
            },
            compliance: ComplianceResult::clear(),
            exchange_order_id: None,
            withdrawal_id: None,
            onchain: OnchainState {
                status: OnchainStatus::Processing,
                tx_hash: None,
                confirmations: 0,
                updated_at: at,
            },
        };
        store.seed_transaction(Transaction::new(
            key.to_string(),
            user_id,
            None,
            TransactionKind::AssetSend,
            TransactionStatus::Completed,
            -10_000,
            10_000,
            Some(dest.id),
            TransactionMetadata::AssetSend(metadata),
            at,
        ));
    }

    fn screener(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> ComplianceScreener {
        ComplianceScreener::new(store.clone(), store, ComplianceConfig::default(), clock)
    }

    #[tokio::test]
    async fn clean_send_is_not_held() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new());
        let dest = destination("ZA", clock.now() - Duration::days(90));

        let result = screener(store, clock)
            .screen(Uuid::new_v4(), 100_000, &dest)
            .await
            .unwrap();

        assert_eq!(result, ComplianceResult::clear());
        assert!(!result.review_required);
    }

    #[tokio::test]
    async fn every_rule_is_evaluated_and_scored() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        store.seed_transaction(Transaction::new(
            "dep-1".to_string(),
            user_id,
            None,
            TransactionKind::Deposit,
            TransactionStatus::Completed,
            250_000,
            250_000,
            None,
            TransactionMetadata::Deposit(DepositMetadata { reference: None }),
            clock.now() - Duration::minutes(3),
        ));
        let dest = destination("ve", clock.now() - Duration::days(90));

        let result = screener(store, clock)
            .screen(user_id, 100_000, &dest)
            .await
            .unwrap();

        assert!(result.hold);
        assert!(result.has_rule(ComplianceRule::HighRiskCountry));
        assert!(result.has_rule(ComplianceRule::RapidCashOut));
        assert_eq!(result.risk_score, 50);
        assert_eq!(result.severity, Some(Severity::High));
    }

    #[tokio::test]
    async fn small_or_pending_deposits_do_not_trigger_rapid_cash_out() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        for (key, amount, status) in [
            ("dep-small", 50_000, TransactionStatus::Completed),
            ("dep-pending", 500_000, TransactionStatus::Pending),
        ] {
            store.seed_transaction(Transaction::new(
                key.to_string(),
                user_id,
                None,
                TransactionKind::Deposit,
                status,
                amount,
                amount,
                None,
                TransactionMetadata::Deposit(DepositMetadata { reference: None }),
                clock.now() - Duration::minutes(1),
            ));
        }
        let dest = destination("ZA", clock.now() - Duration::days(90));

        let result = screener(store, clock)
            .screen(user_id, 100_000, &dest)
            .await
            .unwrap();

        assert!(!result.has_rule(ComplianceRule::RapidCashOut));
    }

    #[tokio::test]
    async fn velocity_flags_at_the_configured_send_count() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let dest = destination("ZA", clock.now() - Duration::days(90));

        // Outside the trailing 24 hours; never counted.
        for i in 0..3 {
            seed_send(&store, user_id, &format!("old-{}", i), clock.now() - Duration::hours(25));
        }
        for i in 0..9 {
            seed_send(&store, user_id, &format!("recent-{}", i), clock.now() - Duration::hours(2));
        }
        let screener = screener(store.clone(), clock.clone());

        let below = screener.screen(user_id, 100_000, &dest).await.unwrap();
        assert!(!below.has_rule(ComplianceRule::Velocity));
        assert!(!below.hold);

        seed_send(&store, user_id, "recent-9", clock.now() - Duration::minutes(30));
        let at_limit = screener.screen(user_id, 100_000, &dest).await.unwrap();

        assert!(at_limit.hold);
        assert_eq!(at_limit.flags.len(), 1);
        assert_eq!(at_limit.flags[0].rule, ComplianceRule::Velocity);
        assert_eq!(at_limit.flags[0].severity, Severity::Medium);
        assert_eq!(at_limit.risk_score, 15);
        assert!(at_limit.review_required);
    }
}
