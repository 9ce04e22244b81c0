//! Persistence ports consumed by the services. Adapters live in `adapters`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Beneficiary, DestinationAccount, JournalEntry, Transaction, TransactionKind,
    TransactionMetadata, TransactionStatus, User, Wallet,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Wallet>>;
}

#[async_trait]
pub trait BeneficiaryRepository: Send + Sync {
    /// Only returns the beneficiary if `user_id` owns it.
    async fn get_by_id(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Option<Beneficiary>>;

    /// Destinations created under the user's beneficiaries since `since`.
    async fn count_new_destinations_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64>;
}

/// Read side of the transaction history. Every sum and count here is an
/// aggregate query in the store, so rows committed by concurrent requests are
/// always included.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Face value of the user's pending and completed transactions of `kind`
    /// created at or after `since`.
    async fn aggregate_sum(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    /// Face value sent to one destination since `since`.
    async fn aggregate_destination_sum(
        &self,
        destination_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    async fn count_since(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    /// Whether the user has a completed deposit of at least `min_amount`
    /// since `since`.
    async fn has_deposit_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        min_amount: i64,
    ) -> RepositoryResult<bool>;

    /// Sends with a withdrawal id whose on-chain state is not final.
    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    /// Advances status and settlement detail. Amount and identity columns are
    /// never touched.
    async fn update_settlement(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        metadata: &TransactionMetadata,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()>;
}

/// One database transaction. Dropping it without `commit` discards every
/// staged write.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Serializes all units of work for the same user until commit/rollback.
    async fn lock_user(&mut self, user_id: Uuid) -> RepositoryResult<()>;

    async fn find_by_transaction_id(
        &mut self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Loads the wallet with a row lock held until the unit of work ends.
    async fn lock_wallet(&mut self, wallet_id: Uuid) -> RepositoryResult<Option<Wallet>>;

    /// Single atomic `balance = balance - amount`; fails rather than going
    /// negative.
    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: i64) -> RepositoryResult<Wallet>;

    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn insert_journal(&mut self, entry: &JournalEntry) -> RepositoryResult<()>;

    async fn save_destination(&mut self, destination: &DestinationAccount) -> RepositoryResult<()>;

    async fn commit(&mut self) -> RepositoryResult<()>;

    async fn rollback(&mut self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait Store:
    UserRepository + WalletRepository + BeneficiaryRepository + TransactionRepository
{
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;
}

/// The store seen through each port, so services only depend on what they use.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub beneficiaries: Arc<dyn BeneficiaryRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    store: Arc<dyn Store>,
}

impl Repositories {
    pub fn from_store<S: Store + 'static>(store: Arc<S>) -> Self {
        Self {
            users: store.clone(),
            wallets: store.clone(),
            beneficiaries: store.clone(),
            transactions: store.clone(),
            store,
        }
    }

    pub async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        self.store.begin().await
    }
}
