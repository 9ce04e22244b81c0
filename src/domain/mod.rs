//! Framework-agnostic domain types.

pub mod beneficiary;
pub mod compliance;
pub mod ledger;
pub mod money;
pub mod transaction;
pub mod user;

pub use beneficiary::{Beneficiary, CooldownPolicy, DestinationAccount};
pub use compliance::{ComplianceFlag, ComplianceResult, ComplianceRule, Severity};
pub use ledger::{JournalEntry, JournalLine, LedgerAccount};
pub use transaction::{
    AssetSendMetadata, DepositMetadata, OnchainState, OnchainStatus, Transaction,
    TransactionKind, TransactionMetadata, TransactionStatus, TravelRuleInfo,
};
pub use user::{User, UserStatus, Wallet};
