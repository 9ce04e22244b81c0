mod common;

use bigdecimal::BigDecimal;
use chrono::Duration;
use common::{Fixture, TRON_ADDRESS};
use stablesend_core::adapters::Fault;
use stablesend_core::clock::Clock;
use stablesend_core::domain::{
    ComplianceRule, LedgerAccount, OnchainStatus, TransactionStatus, User, UserStatus, Wallet,
};
use stablesend_core::error::AppError;
use stablesend_core::services::SendOutcome;
use std::str::FromStr;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_completed_send_debits_wallet_and_withdraws() {
    let fx = Fixture::new();

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-1"))
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::Completed);
    assert!(!result.replayed);
    assert_eq!(fx.balance(), 10_000_000 - 100_000);

    let tx = &result.transaction;
    assert_eq!(tx.transaction_id, "send-1");
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.amount, -100_000);
    assert_eq!(tx.face_value, 100_000);

    let meta = tx.asset_send().unwrap();
    assert_eq!(meta.fee_amount, 7_500);
    assert_eq!(meta.vat_portion, 978);
    assert_eq!(meta.net_to_exchange, 92_500);
    assert_eq!(meta.asset_amount, Some(BigDecimal::from_str("50.000000").unwrap()));
    assert_eq!(meta.onchain.status, OnchainStatus::Processing);
    assert!(meta.exchange_order_id.is_some());
    assert!(meta.withdrawal_id.is_some());
    assert_eq!(meta.travel_rule.originator_name, "Sipho Ndlovu");
    assert_eq!(meta.travel_rule.beneficiary_address, TRON_ADDRESS);
    assert_eq!(meta.travel_rule.purpose, "Family support");

    assert_eq!(fx.exchange.calls("execute_order"), 1);
    assert_eq!(fx.exchange.calls("withdraw"), 1);
    assert_eq!(fx.audit.actions(), vec!["asset_send.completed"]);

    let destination = fx.store.destination(fx.destination_id).unwrap();
    assert_eq!(destination.total_sends, 1);
    assert_eq!(destination.total_sent, 100_000);
    assert_eq!(destination.first_send_at, Some(fx.clock.now()));
}

#[tokio::test]
async fn test_completed_send_posts_balanced_journal() {
    let fx = Fixture::new();
    fx.orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-ledger"))
        .await
        .unwrap();

    let journal = fx.store.journal_entries();
    assert_eq!(journal.len(), 1);
    let entry = &journal[0];
    assert_eq!(entry.reference, "send-ledger");

    let amount = |account: LedgerAccount| {
        entry
            .lines()
            .iter()
            .find(|l| l.account == account)
            .map(|l| l.debit + l.credit)
            .unwrap_or(0)
    };
    assert_eq!(amount(LedgerAccount::UserWallets), 100_000);
    assert_eq!(amount(LedgerAccount::ExchangeFloat), 92_500);
    assert_eq!(amount(LedgerAccount::FeeRevenue), 6_522);
    assert_eq!(amount(LedgerAccount::VatPayable), 978);
}

#[tokio::test]
async fn test_vat_exclusive_send_charges_vat_on_top() {
    let fx = Fixture::with_settings(|s| s.fees.vat_inclusive = false);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-excl"))
        .await
        .unwrap();

    assert_eq!(result.transaction.amount, -101_125);
    assert_eq!(fx.balance(), 10_000_000 - 101_125);
    assert_eq!(fx.store.journal_entries()[0].total(), 101_125);
}

#[tokio::test]
async fn test_replay_with_same_key_has_no_side_effects() {
    let fx = Fixture::new();

    let first = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-replay"))
        .await
        .unwrap();
    let second = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-replay"))
        .await
        .unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(fx.balance(), 10_000_000 - 100_000);
    assert_eq!(fx.exchange.calls("withdraw"), 1);
    assert_eq!(fx.store.transactions().len(), 1);
    assert_eq!(fx.store.journal_entries().len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_execute_once() {
    let fx = Fixture::new();

    let (a, b) = tokio::join!(
        fx.orchestrator
            .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-race")),
        fx.orchestrator
            .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-race")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.replayed, b.replayed);
    assert_eq!(a.transaction.id, b.transaction.id);
    assert_eq!(fx.balance(), 10_000_000 - 100_000);
    assert_eq!(fx.exchange.calls("withdraw"), 1);
}

#[tokio::test]
async fn test_per_transaction_limit_boundary() {
    let fx = Fixture::new();

    let at_limit = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(5_000_000, "send-max"))
        .await;
    assert!(at_limit.is_ok());

    let over = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(5_000_001, "send-over"))
        .await;
    match over {
        Err(AppError::LimitExceeded { limit, detail }) => {
            assert_eq!(limit, "per_transaction");
            assert!(detail.contains("R50000.00"), "{}", detail);
        }
        other => panic!("expected per-transaction limit, got {:?}", other.map(|r| r.outcome)),
    }
    assert_eq!(fx.balance(), 10_000_000 - 5_000_000);
}

#[tokio::test]
async fn test_daily_limit_includes_earlier_sends() {
    let fx = Fixture::new();
    for key in ["d-1", "d-2"] {
        fx.orchestrator
            .execute(fx.user_id, fx.wallet_id, fx.request(4_500_000, key))
            .await
            .unwrap();
    }

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(1_500_000, "d-3"))
        .await;

    match result {
        Err(AppError::LimitExceeded { limit, detail }) => {
            assert_eq!(limit, "daily");
            assert!(detail.contains("R90000.00"), "{}", detail);
        }
        other => panic!("expected daily limit, got {:?}", other.map(|r| r.outcome)),
    }
}

#[tokio::test]
async fn test_below_minimum_amount_is_rejected() {
    let fx = Fixture::new();
    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(999, "send-tiny"))
        .await;
    assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    assert_eq!(fx.exchange.total_calls(), 0);
}

#[tokio::test]
async fn test_blocked_country_is_held_without_touching_wallet() {
    let fx = Fixture::new();
    let (beneficiary_id, _) = fx.add_beneficiary("KP", fx.clock.now() - Duration::days(60));
    let mut request = fx.request(100_000, "send-held");
    request.beneficiary_id = beneficiary_id;

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, request)
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::ComplianceHold);
    assert_eq!(fx.balance(), 10_000_000);
    assert_eq!(fx.exchange.total_calls(), 0);
    assert!(fx.store.journal_entries().is_empty());

    let tx = &result.transaction;
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.amount, 0);
    let meta = tx.asset_send().unwrap();
    assert!(meta.compliance.hold);
    assert!(meta.compliance.has_rule(ComplianceRule::BlockedCountry));
    assert_eq!(meta.compliance.risk_score, 40);
    assert_eq!(meta.onchain.status, OnchainStatus::NotSubmitted);
    assert_eq!(meta.travel_rule.beneficiary_country, "KP");
    assert_eq!(fx.audit.actions(), vec!["asset_send.held"]);
}

#[tokio::test]
async fn test_rapid_cash_out_is_held() {
    let fx = Fixture::new();
    fx.seed_deposit(200_000, fx.clock.now() - Duration::minutes(5));

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-rapid"))
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::ComplianceHold);
    let compliance = &result.transaction.asset_send().unwrap().compliance;
    assert!(compliance.has_rule(ComplianceRule::RapidCashOut));
    assert_eq!(fx.balance(), 10_000_000);
}

#[tokio::test]
async fn test_old_deposit_does_not_trigger_rapid_cash_out() {
    let fx = Fixture::new();
    fx.seed_deposit(200_000, fx.clock.now() - Duration::minutes(30));

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-calm"))
        .await
        .unwrap();
    assert_eq!(result.outcome, SendOutcome::Completed);
}

#[tokio::test]
async fn test_new_beneficiary_surge_is_held() {
    let fx = Fixture::new();
    for _ in 0..5 {
        fx.add_beneficiary("ZA", fx.clock.now() - Duration::days(1));
    }

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-surge"))
        .await
        .unwrap();

    assert_eq!(result.outcome, SendOutcome::ComplianceHold);
    let compliance = &result.transaction.asset_send().unwrap().compliance;
    assert!(compliance.has_rule(ComplianceRule::NewBeneficiarySurge));
}

#[tokio::test]
async fn test_journal_failure_rolls_back_debit() {
    let fx = Fixture::new();
    fx.store.fail_next(Fault::InsertJournal);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-rollback"))
        .await;

    assert!(matches!(result, Err(AppError::Database(_))));
    assert_eq!(fx.balance(), 10_000_000);
    assert!(fx.store.transactions().is_empty());
    assert!(fx.store.journal_entries().is_empty());
    assert_eq!(fx.store.destination(fx.destination_id).unwrap().total_sends, 0);
    assert!(fx.audit.actions().is_empty());

    // The key was never committed, so a retry goes through.
    let retry = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-rollback"))
        .await
        .unwrap();
    assert!(!retry.replayed);
    assert_eq!(fx.balance(), 10_000_000 - 100_000);
}

#[tokio::test]
async fn test_withdraw_failure_rolls_back_debit() {
    let fx = Fixture::new();
    fx.exchange.fail_withdraw.store(true, Ordering::SeqCst);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-wd-fail"))
        .await;

    assert!(matches!(result, Err(AppError::ExternalApi(_))));
    assert_eq!(fx.balance(), 10_000_000);
    assert!(fx.store.transactions().is_empty());
    assert!(fx.store.journal_entries().is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_nothing_behind() {
    let fx = Fixture::new();
    fx.store.fail_next(Fault::Commit);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-commit"))
        .await;

    assert!(result.is_err());
    assert_eq!(fx.balance(), 10_000_000);
    assert!(fx.store.transactions().is_empty());
}

#[tokio::test]
async fn test_insufficient_balance() {
    let fx = Fixture::with_settings(|s| s.limits.daily = 20_000_000);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(5_000_000, "big-1"))
        .await;
    assert!(result.is_ok());
    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(4_000_000, "big-2"))
        .await;
    assert!(result.is_ok());

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(1_000_001, "big-3"))
        .await;
    match result {
        Err(AppError::InsufficientBalance { available, required }) => {
            assert_eq!(available, 1_000_000);
            assert_eq!(required, 1_000_001);
        }
        other => panic!("expected insufficient balance, got {:?}", other.map(|r| r.outcome)),
    }
    assert_eq!(fx.exchange.calls("execute_order"), 2);
    assert_eq!(fx.balance(), 1_000_000);
}

#[tokio::test]
async fn test_kyc_tier_is_enforced() {
    let fx = Fixture::with_settings(|s| s.send.min_kyc_tier = 3);

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-kyc"))
        .await;
    assert!(matches!(
        result,
        Err(AppError::KycTierInsufficient {
            required: 3,
            actual: 2
        })
    ));

    let quote = fx.orchestrator.quote(fx.user_id, 100_000).await;
    assert!(matches!(quote, Err(AppError::KycTierInsufficient { .. })));
}

#[tokio::test]
async fn test_unknown_and_empty_beneficiaries() {
    let fx = Fixture::new();

    let mut request = fx.request(100_000, "send-unknown");
    request.beneficiary_id = uuid::Uuid::new_v4();
    let result = fx.orchestrator.execute(fx.user_id, fx.wallet_id, request).await;
    assert!(matches!(result, Err(AppError::BeneficiaryNotFound(_))));

    let mut request = fx.request(100_000, "send-wrong-dest");
    request.destination_id = Some(uuid::Uuid::new_v4());
    let result = fx.orchestrator.execute(fx.user_id, fx.wallet_id, request).await;
    assert!(matches!(result, Err(AppError::NoDestinationAccount(_))));
}

#[tokio::test]
async fn test_large_send_to_new_destination_starts_cooldown() {
    let fx = Fixture::with_settings(|s| s.send.cooldown_threshold = 300_000);
    let (beneficiary_id, destination_id) =
        fx.add_beneficiary("ZA", fx.clock.now() - Duration::days(1));

    let mut request = fx.request(400_000, "cool-1");
    request.beneficiary_id = beneficiary_id;
    fx.orchestrator
        .execute(fx.user_id, fx.wallet_id, request)
        .await
        .unwrap();
    let destination = fx.store.destination(destination_id).unwrap();
    assert_eq!(
        destination.cooldown_until,
        Some(fx.clock.now() + Duration::hours(24))
    );

    let mut request = fx.request(10_000, "cool-2");
    request.beneficiary_id = beneficiary_id;
    let result = fx.orchestrator.execute(fx.user_id, fx.wallet_id, request).await;
    assert!(matches!(result, Err(AppError::BeneficiaryCooldown { .. })));

    fx.clock.advance(Duration::hours(25));
    let mut request = fx.request(10_000, "cool-3");
    request.beneficiary_id = beneficiary_id;
    assert!(fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, request)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_new_destination_daily_limit() {
    let fx = Fixture::new();
    let (beneficiary_id, _) = fx.add_beneficiary("ZA", fx.clock.now() - Duration::days(2));

    let mut request = fx.request(500_001, "new-dest");
    request.beneficiary_id = beneficiary_id;
    let result = fx.orchestrator.execute(fx.user_id, fx.wallet_id, request).await;

    assert!(matches!(
        result,
        Err(AppError::LimitExceeded {
            limit: "new_beneficiary_daily",
            ..
        })
    ));
}

#[tokio::test]
async fn test_quote_prices_without_mutation() {
    let fx = Fixture::new();

    let quote = fx.orchestrator.quote(fx.user_id, 100_000).await.unwrap();

    assert_eq!(quote.asset_amount, BigDecimal::from_str("50.000000").unwrap());
    assert_eq!(quote.fees.charges.total_charge, 100_000);
    assert_eq!(quote.fees.network_fee_estimate, 1_850);
    assert_eq!(quote.expires_at, fx.clock.now() + Duration::seconds(60));
    assert_eq!(fx.balance(), 10_000_000);
    assert!(fx.store.transactions().is_empty());
    assert_eq!(fx.exchange.calls("execute_order"), 0);

    // Second quote is served from the rate cache.
    fx.orchestrator.quote(fx.user_id, 200_000).await.unwrap();
    assert_eq!(fx.exchange.calls("get_market_rate"), 1);
}

#[tokio::test]
async fn test_quote_rejects_amounts_outside_bounds() {
    let fx = Fixture::new();
    for amount in [999, 5_000_001] {
        let result = fx.orchestrator.quote(fx.user_id, amount).await;
        assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    }
}

#[tokio::test]
async fn test_suspended_user_cannot_send() {
    let fx = Fixture::new();
    fx.store.insert_user(User {
        id: fx.user_id,
        full_name: "Sipho Ndlovu".to_string(),
        country: "ZA".to_string(),
        kyc_tier: 2,
        status: UserStatus::Suspended,
        created_at: fx.clock.now() - Duration::days(365),
    });

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-suspended"))
        .await;

    assert!(matches!(result, Err(AppError::UserNotActive)));
    assert_eq!(fx.exchange.total_calls(), 0);
}

#[tokio::test]
async fn test_wallet_of_another_user_is_not_found() {
    let fx = Fixture::new();
    let other_wallet = uuid::Uuid::new_v4();
    fx.store.insert_wallet(Wallet {
        id: other_wallet,
        user_id: uuid::Uuid::new_v4(),
        balance: 10_000_000,
        updated_at: fx.clock.now(),
    });

    let result = fx
        .orchestrator
        .execute(fx.user_id, other_wallet, fx.request(100_000, "send-foreign"))
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert_eq!(fx.store.wallet_balance(other_wallet), Some(10_000_000));
    assert_eq!(fx.exchange.calls("execute_order"), 0);
}

#[tokio::test]
async fn test_key_reused_by_another_user_is_a_conflict() {
    let fx = Fixture::new();
    fx.orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "shared-key"))
        .await
        .unwrap();

    let other_user = uuid::Uuid::new_v4();
    let other_wallet = uuid::Uuid::new_v4();
    fx.store.insert_user(User {
        id: other_user,
        full_name: "Lerato Dlamini".to_string(),
        country: "ZA".to_string(),
        kyc_tier: 0,
        status: UserStatus::Suspended,
        created_at: fx.clock.now(),
    });
    fx.store.insert_wallet(Wallet {
        id: other_wallet,
        user_id: other_user,
        balance: 1_000_000,
        updated_at: fx.clock.now(),
    });
    let mut request = fx.request(100_000, "shared-key");
    request.beneficiary_id = uuid::Uuid::new_v4();

    let result = fx.orchestrator.execute(other_user, other_wallet, request).await;

    match result {
        Err(e @ AppError::IdempotencyConflict(_)) => {
            assert_eq!(e.code(), "IDEMPOTENCY_CONFLICT");
            assert!(!e.to_string().contains("Sipho"));
        }
        other => panic!("expected idempotency conflict, got {:?}", other.map(|r| r.replayed)),
    }
    assert_eq!(fx.store.wallet_balance(other_wallet), Some(1_000_000));
    assert_eq!(fx.exchange.calls("withdraw"), 1);
}

#[tokio::test]
async fn test_key_reused_with_different_amount_is_a_conflict() {
    let fx = Fixture::new();
    fx.orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(100_000, "send-amended"))
        .await
        .unwrap();

    let result = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, fx.request(200_000, "send-amended"))
        .await;

    assert!(matches!(result, Err(AppError::IdempotencyConflict(_))));
    assert_eq!(fx.balance(), 10_000_000 - 100_000);
    assert_eq!(fx.store.transactions().len(), 1);
}

#[tokio::test]
async fn test_held_send_replays_for_its_owner() {
    let fx = Fixture::new();
    let (beneficiary_id, _) = fx.add_beneficiary("KP", fx.clock.now() - Duration::days(60));
    let mut request = fx.request(100_000, "send-held-replay");
    request.beneficiary_id = beneficiary_id;

    fx.orchestrator
        .execute(fx.user_id, fx.wallet_id, request.clone())
        .await
        .unwrap();
    let replay = fx
        .orchestrator
        .execute(fx.user_id, fx.wallet_id, request)
        .await
        .unwrap();

    assert!(replay.replayed);
    assert_eq!(replay.outcome, SendOutcome::ComplianceHold);
}
