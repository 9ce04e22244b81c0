//! Double-entry journal types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed chart of accounts touched by the send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAccount {
    UserWallets,
    ExchangeFloat,
    FeeRevenue,
    VatPayable,
}

impl LedgerAccount {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerAccount::UserWallets => "USER_WALLETS",
            LedgerAccount::ExchangeFloat => "EXCHANGE_FLOAT",
            LedgerAccount::FeeRevenue => "FEE_REVENUE",
            LedgerAccount::VatPayable => "VAT_PAYABLE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account: LedgerAccount,
    pub debit: i64,
    pub credit: i64,
}

impl JournalLine {
    pub fn debit(account: LedgerAccount, amount: i64) -> Self {
        Self {
            account,
            debit: amount,
            credit: 0,
        }
    }

    pub fn credit(account: LedgerAccount, amount: i64) -> Self {
        Self {
            account,
            debit: 0,
            credit: amount,
        }
    }
}

/// A balanced set of lines. Only constructible through [`JournalEntry::balanced`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub description: String,
    /// Transaction id the entry belongs to.
    pub reference: String,
    lines: Vec<JournalLine>,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Builds an entry, panicking if the lines do not balance. An unbalanced
    /// posting is a bug in the caller, never a runtime condition.
    pub fn balanced(
        description: impl Into<String>,
        reference: impl Into<String>,
        lines: Vec<JournalLine>,
        now: DateTime<Utc>,
    ) -> Self {
        assert!(!lines.is_empty(), "journal entry has no lines");
        for line in &lines {
            assert!(
                line.debit >= 0 && line.credit >= 0,
                "negative amount on {} line",
                line.account.code()
            );
            assert!(
                (line.debit == 0) != (line.credit == 0),
                "{} line must carry exactly one of debit or credit",
                line.account.code()
            );
        }
        let debits: i64 = lines.iter().map(|l| l.debit).sum();
        let credits: i64 = lines.iter().map(|l| l.credit).sum();
        assert_eq!(debits, credits, "unbalanced journal entry");

        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            reference: reference.into(),
            lines,
            created_at: now,
        }
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    pub fn total(&self) -> i64 {
        self.lines.iter().map(|l| l.debit).sum()
    }
}
