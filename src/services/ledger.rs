use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::{JournalEntry, JournalLine, LedgerAccount};
use crate::ports::{RepositoryResult, UnitOfWork};
use crate::services::fees::Charges;

/// Writes balanced journal entries inside the caller's unit of work, so a
/// rollback discards the entry together with the wallet debit it describes.
pub struct LedgerPoster {
    clock: Arc<dyn Clock>,
}

impl LedgerPoster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Panics if the lines do not balance.
    pub async fn post(
        &self,
        uow: &mut dyn UnitOfWork,
        description: &str,
        reference: &str,
        lines: Vec<JournalLine>,
    ) -> RepositoryResult<JournalEntry> {
        let entry = JournalEntry::balanced(description, reference, lines, self.clock.now());
        uow.insert_journal(&entry).await?;
        tracing::debug!(
            entry_id = %entry.id,
            reference,
            total = entry.total(),
            "Posted journal entry"
        );
        Ok(entry)
    }

    /// Lines for a completed send: the user's wallets are credited with the
    /// full charge, split across the float, fee revenue and VAT owed.
    pub fn send_lines(fees: &Charges) -> Vec<JournalLine> {
        let candidates = [
            JournalLine::credit(LedgerAccount::UserWallets, fees.total_charge),
            JournalLine::debit(LedgerAccount::ExchangeFloat, fees.net_to_exchange),
            JournalLine::debit(LedgerAccount::FeeRevenue, fees.fee_revenue()),
            JournalLine::debit(LedgerAccount::VatPayable, fees.vat_portion),
        ];
        candidates
            .into_iter()
            .filter(|line| line.debit != 0 || line.credit != 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::clock::SystemClock;
    use crate::config::FeeConfig;
    use crate::ports::Store;
    use crate::services::fees::FeeCalculator;
    use bigdecimal::BigDecimal;

    fn fees(vat_inclusive: bool) -> Charges {
        FeeCalculator::new(FeeConfig {
            fee_bps: 750,
            vat_inclusive,
            network_fee_asset: BigDecimal::from(1),
        })
        .charges(100_000)
        .unwrap()
    }

    fn debits(lines: &[JournalLine]) -> i64 {
        lines.iter().map(|l| l.debit).sum()
    }

    fn credits(lines: &[JournalLine]) -> i64 {
        lines.iter().map(|l| l.credit).sum()
    }

    #[test]
    fn send_lines_balance_for_both_vat_modes() {
        for inclusive in [true, false] {
            let fees = fees(inclusive);
            let lines = LedgerPoster::send_lines(&fees);
            assert_eq!(debits(&lines), credits(&lines));
            assert_eq!(credits(&lines), fees.total_charge);
        }
    }

    #[test]
    fn zero_fee_send_skips_empty_lines() {
        let fees = FeeCalculator::new(FeeConfig {
            fee_bps: 0,
            vat_inclusive: true,
            network_fee_asset: BigDecimal::from(0),
        })
        .charges(50_000)
        .unwrap();

        let lines = LedgerPoster::send_lines(&fees);
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn post_writes_through_unit_of_work() {
        let store = MemoryStore::new();
        let poster = LedgerPoster::new(Arc::new(SystemClock));
        let mut uow = store.begin().await.unwrap();

        let entry = poster
            .post(
                uow.as_mut(),
                "Asset send",
                "tx-1",
                LedgerPoster::send_lines(&fees(true)),
            )
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let journal = store.journal_entries();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].id, entry.id);
        assert_eq!(journal[0].reference, "tx-1");
    }

    #[tokio::test]
    #[should_panic(expected = "unbalanced journal entry")]
    async fn unbalanced_entry_panics() {
        let store = MemoryStore::new();
        let poster = LedgerPoster::new(Arc::new(SystemClock));
        let mut uow = store.begin().await.unwrap();

        let _ = poster
            .post(
                uow.as_mut(),
                "Broken",
                "tx-2",
                vec![
                    JournalLine::credit(LedgerAccount::UserWallets, 100),
                    JournalLine::debit(LedgerAccount::ExchangeFloat, 99),
                ],
            )
            .await;
    }
}
