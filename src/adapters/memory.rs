//! In-process implementation of the persistence ports.
//!
//! Used by the test-suite and for running the service without Postgres.
//! Writes made through a [`UnitOfWork`] are staged and only become visible on
//! commit, which mirrors the isolation the send path relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::domain::{
    Beneficiary, DestinationAccount, JournalEntry, Transaction, TransactionKind,
    TransactionMetadata, TransactionStatus, User, Wallet,
};
use crate::ports::{
    BeneficiaryRepository, RepositoryError, RepositoryResult, Store, TransactionRepository,
    UnitOfWork, UserRepository, WalletRepository,
};

/// Points at which a test can make the next unit of work fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    InsertJournal,
    InsertTransaction,
    Commit,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    wallets: HashMap<Uuid, Wallet>,
    beneficiaries: HashMap<Uuid, Beneficiary>,
    transactions: Vec<Transaction>,
    journal: Vec<JournalEntry>,
}

impl State {
    fn destination_mut(&mut self, id: Uuid) -> Option<&mut DestinationAccount> {
        self.beneficiaries
            .values_mut()
            .flat_map(|b| b.destinations.iter_mut())
            .find(|d| d.id == id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    user_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
    faults: Arc<Mutex<Vec<Fault>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    pub fn insert_wallet(&self, wallet: Wallet) {
        self.state().wallets.insert(wallet.id, wallet);
    }

    pub fn insert_beneficiary(&self, beneficiary: Beneficiary) {
        self.state().beneficiaries.insert(beneficiary.id, beneficiary);
    }

    /// Seeds history directly, bypassing any unit of work.
    pub fn seed_transaction(&self, tx: Transaction) {
        self.state().transactions.push(tx);
    }

    pub fn wallet_balance(&self, wallet_id: Uuid) -> Option<i64> {
        self.state().wallets.get(&wallet_id).map(|w| w.balance)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.state().journal.clone()
    }

    pub fn destination(&self, id: Uuid) -> Option<DestinationAccount> {
        self.state().destination_mut(id).map(|d| d.clone())
    }

    /// Arms a one-shot failure for the next unit of work that reaches `fault`.
    pub fn fail_next(&self, fault: Fault) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).push(fault);
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.iter().position(|f| *f == fault) {
            Some(idx) => {
                faults.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Locks nobody holds or waits on are dropped so the map tracks only
    /// in-flight users.
    fn user_lock(&self, user_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id).or_default().clone()
    }

    fn counts_toward_limits(tx: &Transaction) -> bool {
        matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Completed
        )
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>> {
        Ok(self.state().users.get(&id).cloned())
    }
}

#[async_trait]
impl WalletRepository for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        Ok(self.state().wallets.get(&id).cloned())
    }
}

#[async_trait]
impl BeneficiaryRepository for MemoryStore {
    async fn get_by_id(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Option<Beneficiary>> {
        Ok(self
            .state()
            .beneficiaries
            .get(&id)
            .filter(|b| b.user_id == user_id)
            .cloned())
    }

    async fn count_new_destinations_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count = self
            .state()
            .beneficiaries
            .values()
            .filter(|b| b.user_id == user_id)
            .flat_map(|b| b.destinations.iter())
            .filter(|d| d.created_at >= since)
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        Ok(self
            .state()
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }

    async fn aggregate_sum(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        Ok(self
            .state()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.kind == kind && t.created_at >= since)
            .filter(|t| Self::counts_toward_limits(t))
            .map(|t| t.face_value)
            .sum())
    }

    async fn aggregate_destination_sum(
        &self,
        destination_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        Ok(self
            .state()
            .transactions
            .iter()
            .filter(|t| t.destination_id == Some(destination_id) && t.created_at >= since)
            .filter(|t| Self::counts_toward_limits(t))
            .map(|t| t.face_value)
            .sum())
    }

    async fn count_since(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count = self
            .state()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.kind == kind && t.created_at >= since)
            .count();
        Ok(count as i64)
    }

    async fn has_deposit_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        min_amount: i64,
    ) -> RepositoryResult<bool> {
        Ok(self.state().transactions.iter().any(|t| {
            t.user_id == user_id
                && t.kind == TransactionKind::Deposit
                && t.status == TransactionStatus::Completed
                && t.created_at >= since
                && t.amount >= min_amount
        }))
    }

    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let mut pending: Vec<Transaction> = self
            .state()
            .transactions
            .iter()
            .filter(|t| {
                t.asset_send().map_or(false, |m| {
                    m.withdrawal_id.is_some() && !m.onchain.status.is_final()
                })
            })
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn update_settlement(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        metadata: &TransactionMetadata,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut state = self.state();
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.transaction_id == transaction_id)
            .ok_or_else(|| RepositoryError::NotFound(transaction_id.to_string()))?;
        tx.status = status;
        tx.metadata = metadata.clone();
        tx.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            user_guard: None,
            debits: HashMap::new(),
            transactions: Vec::new(),
            journal: Vec::new(),
            destinations: Vec::new(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    store: MemoryStore,
    user_guard: Option<OwnedMutexGuard<()>>,
    debits: HashMap<Uuid, i64>,
    transactions: Vec<Transaction>,
    journal: Vec<JournalEntry>,
    destinations: Vec<DestinationAccount>,
}

impl MemoryUnitOfWork {
    fn discard(&mut self) {
        self.debits.clear();
        self.transactions.clear();
        self.journal.clear();
        self.destinations.clear();
        self.user_guard = None;
    }

    fn staged_wallet(&self, state: &State, wallet_id: Uuid) -> Option<Wallet> {
        state.wallets.get(&wallet_id).map(|w| {
            let mut wallet = w.clone();
            wallet.balance -= self.debits.get(&wallet_id).copied().unwrap_or(0);
            wallet
        })
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_user(&mut self, user_id: Uuid) -> RepositoryResult<()> {
        if self.user_guard.is_none() {
            let lock = self.store.user_lock(user_id);
            self.user_guard = Some(lock.lock_owned().await);
        }
        Ok(())
    }

    async fn find_by_transaction_id(
        &mut self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        if let Some(tx) = self
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
        {
            return Ok(Some(tx.clone()));
        }
        TransactionRepository::find_by_transaction_id(&self.store, transaction_id).await
    }

    async fn lock_wallet(&mut self, wallet_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let state = self.store.state();
        Ok(self.staged_wallet(&state, wallet_id))
    }

    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: i64) -> RepositoryResult<Wallet> {
        let state = self.store.state();
        let mut wallet = self
            .staged_wallet(&state, wallet_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet {}", wallet_id)))?;
        if wallet.balance < amount {
            return Err(RepositoryError::Constraint(format!(
                "wallet {} balance would go negative",
                wallet_id
            )));
        }
        drop(state);
        wallet.balance -= amount;
        *self.debits.entry(wallet_id).or_insert(0) += amount;
        Ok(wallet)
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        if self.store.take_fault(Fault::InsertTransaction) {
            return Err(RepositoryError::Database("injected insert failure".to_string()));
        }
        let exists = self
            .transactions
            .iter()
            .any(|t| t.transaction_id == tx.transaction_id)
            || self
                .store
                .state()
                .transactions
                .iter()
                .any(|t| t.transaction_id == tx.transaction_id);
        if exists {
            return Err(RepositoryError::Duplicate(tx.transaction_id.clone()));
        }
        self.transactions.push(tx.clone());
        Ok(tx.clone())
    }

    async fn insert_journal(&mut self, entry: &JournalEntry) -> RepositoryResult<()> {
        if self.store.take_fault(Fault::InsertJournal) {
            return Err(RepositoryError::Database("injected journal failure".to_string()));
        }
        self.journal.push(entry.clone());
        Ok(())
    }

    async fn save_destination(&mut self, destination: &DestinationAccount) -> RepositoryResult<()> {
        self.destinations.retain(|d| d.id != destination.id);
        self.destinations.push(destination.clone());
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if self.store.take_fault(Fault::Commit) {
            self.discard();
            return Err(RepositoryError::Database("injected commit failure".to_string()));
        }
        {
            let mut state = self.store.state();
            let duplicate = self
                .transactions
                .iter()
                .find(|tx| {
                    state
                        .transactions
                        .iter()
                        .any(|t| t.transaction_id == tx.transaction_id)
                })
                .map(|tx| tx.transaction_id.clone());
            if let Some(key) = duplicate {
                drop(state);
                self.discard();
                return Err(RepositoryError::Duplicate(key));
            }
            for (wallet_id, amount) in self.debits.drain() {
                if let Some(wallet) = state.wallets.get_mut(&wallet_id) {
                    wallet.balance -= amount;
                    wallet.updated_at = Utc::now();
                }
            }
            state.transactions.append(&mut self.transactions);
            state.journal.append(&mut self.journal);
            for destination in self.destinations.drain(..) {
                if let Some(existing) = state.destination_mut(destination.id) {
                    *existing = destination;
                }
            }
        }
        self.discard();
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        self.discard();
        Ok(())
    }
}
