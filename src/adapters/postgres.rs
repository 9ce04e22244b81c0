//! Postgres implementation of the persistence ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use crate::domain::{
    Beneficiary, DestinationAccount, JournalEntry, Transaction, TransactionKind,
    TransactionMetadata, TransactionStatus, User, UserStatus, Wallet,
};
use crate::ports::{
    BeneficiaryRepository, RepositoryError, RepositoryResult, Store, TransactionRepository,
    UnitOfWork, UserRepository, WalletRepository,
};

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => {
                    return RepositoryError::Duplicate(db.message().to_string())
                }
                Some(PG_CHECK_VIOLATION) => {
                    return RepositoryError::Constraint(db.message().to_string())
                }
                _ => {}
            }
        }
        RepositoryError::Database(e.to_string())
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TRANSACTION_COLUMNS: &str = "id, transaction_id, user_id, wallet_id, kind, status, amount, \
     face_value, destination_id, metadata, created_at, updated_at";

#[async_trait]
impl UserRepository for PostgresStore {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, full_name, country, kyc_tier, status, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_domain).transpose()
    }
}

#[async_trait]
impl WalletRepository for PostgresStore {
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WalletRow::into_domain))
    }
}

#[async_trait]
impl BeneficiaryRepository for PostgresStore {
    async fn get_by_id(&self, user_id: Uuid, id: Uuid) -> RepositoryResult<Option<Beneficiary>> {
        let row = sqlx::query_as::<_, BeneficiaryRow>(
            "SELECT id, user_id, name, created_at FROM beneficiaries WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let destinations = sqlx::query_as::<_, DestinationRow>(
            r#"
            SELECT id, beneficiary_id, address, network, country, is_active, cooldown_until,
                   total_sends, total_asset_sent, total_sent, first_send_at, created_at
            FROM destination_accounts
            WHERE beneficiary_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Beneficiary {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            destinations: destinations.into_iter().map(DestinationRow::into_domain).collect(),
            created_at: row.created_at,
        }))
    }

    async fn count_new_destinations_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM destination_accounts d
            JOIN beneficiaries b ON b.id = d.beneficiary_id
            WHERE b.user_id = $1 AND d.created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl TransactionRepository for PostgresStore {
    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn aggregate_sum(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let sum = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(face_value), 0)::BIGINT
            FROM transactions
            WHERE user_id = $1
              AND kind = $2
              AND status IN ('pending', 'completed')
              AND created_at >= $3
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    async fn aggregate_destination_sum(
        &self,
        destination_id: Uuid,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let sum = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(face_value), 0)::BIGINT
            FROM transactions
            WHERE destination_id = $1
              AND status IN ('pending', 'completed')
              AND created_at >= $2
            "#,
        )
        .bind(destination_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    async fn count_since(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        since: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transactions WHERE user_id = $1 AND kind = $2 AND created_at >= $3",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn has_deposit_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        min_amount: i64,
    ) -> RepositoryResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM transactions
                WHERE user_id = $1
                  AND kind = 'deposit'
                  AND status = 'completed'
                  AND created_at >= $2
                  AND amount >= $3
            )
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(min_amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE kind = 'asset_send'
              AND metadata->>'withdrawal_id' IS NOT NULL
              AND COALESCE(metadata #>> '{{onchain,status}}', '') NOT IN ('confirmed', 'failed')
            ORDER BY created_at ASC
            LIMIT $1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn update_settlement(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        metadata: &TransactionMetadata,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, metadata = $3, updated_at = $4 WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(status.as_str())
        .bind(serde_json::to_value(metadata)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(transaction_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }
}

/// Wraps one sqlx transaction. Dropped without commit, sqlx rolls it back.
pub struct PgUnitOfWork {
    tx: Option<SqlxTransaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> RepositoryResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| RepositoryError::Database("unit of work already finished".to_string()))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_user(&mut self, user_id: Uuid) -> RepositoryResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(user_id.to_string())
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn find_by_transaction_id(
        &mut self,
        transaction_id: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(self.conn()?)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn lock_wallet(&mut self, wallet_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, updated_at FROM wallets WHERE id = $1 FOR UPDATE",
        )
        .bind(wallet_id)
        .fetch_optional(self.conn()?)
        .await?;

        Ok(row.map(WalletRow::into_domain))
    }

    async fn debit_wallet(&mut self, wallet_id: Uuid, amount: i64) -> RepositoryResult<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            UPDATE wallets
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            RETURNING id, user_id, balance, updated_at
            "#,
        )
        .bind(wallet_id)
        .bind(amount)
        .fetch_optional(self.conn()?)
        .await?;

        row.map(WalletRow::into_domain).ok_or_else(|| {
            RepositoryError::Constraint(format!("wallet {} balance would go negative", wallet_id))
        })
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let metadata = serde_json::to_value(&tx.metadata)?;
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (
                id, transaction_id, user_id, wallet_id, kind, status, amount,
                face_value, destination_id, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(&tx.transaction_id)
        .bind(tx.user_id)
        .bind(tx.wallet_id)
        .bind(tx.kind.as_str())
        .bind(tx.status.as_str())
        .bind(tx.amount)
        .bind(tx.face_value)
        .bind(tx.destination_id)
        .bind(metadata)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(self.conn()?)
        .await?;

        row.into_domain()
    }

    async fn insert_journal(&mut self, entry: &JournalEntry) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO journal_entries (id, reference, description, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.id)
        .bind(&entry.reference)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(self.conn()?)
        .await?;

        for line in entry.lines() {
            sqlx::query(
                "INSERT INTO journal_lines (entry_id, account_code, debit, credit) VALUES ($1, $2, $3, $4)",
            )
            .bind(entry.id)
            .bind(line.account.code())
            .bind(line.debit)
            .bind(line.credit)
            .execute(self.conn()?)
            .await?;
        }
        Ok(())
    }

    async fn save_destination(&mut self, destination: &DestinationAccount) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            UPDATE destination_accounts
            SET cooldown_until = $2, total_sends = $3, total_asset_sent = $4,
                total_sent = $5, first_send_at = $6
            WHERE id = $1
            "#,
        )
        .bind(destination.id)
        .bind(destination.cooldown_until)
        .bind(destination.total_sends)
        .bind(&destination.total_asset_sent)
        .bind(destination.total_sent)
        .bind(destination.first_send_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> RepositoryResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    full_name: String,
    country: String,
    kyc_tier: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> RepositoryResult<User> {
        let status = UserStatus::parse(&self.status)
            .ok_or_else(|| RepositoryError::Corrupt(format!("user status '{}'", self.status)))?;
        Ok(User {
            id: self.id,
            full_name: self.full_name,
            country: self.country.trim().to_string(),
            kyc_tier: self.kyc_tier,
            status,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance: i64,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_domain(self) -> Wallet {
        Wallet {
            id: self.id,
            user_id: self.user_id,
            balance: self.balance,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BeneficiaryRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct DestinationRow {
    id: Uuid,
    beneficiary_id: Uuid,
    address: String,
    network: String,
    country: String,
    is_active: bool,
    cooldown_until: Option<DateTime<Utc>>,
    total_sends: i64,
    total_asset_sent: BigDecimal,
    total_sent: i64,
    first_send_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl DestinationRow {
    fn into_domain(self) -> DestinationAccount {
        DestinationAccount {
            id: self.id,
            beneficiary_id: self.beneficiary_id,
            address: self.address,
            network: self.network,
            country: self.country.trim().to_string(),
            is_active: self.is_active,
            cooldown_until: self.cooldown_until,
            total_sends: self.total_sends,
            total_asset_sent: self.total_asset_sent,
            total_sent: self.total_sent,
            first_send_at: self.first_send_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    user_id: Uuid,
    wallet_id: Option<Uuid>,
    kind: String,
    status: String,
    amount: i64,
    face_value: i64,
    destination_id: Option<Uuid>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let kind = TransactionKind::parse(&self.kind)
            .ok_or_else(|| RepositoryError::Corrupt(format!("transaction kind '{}'", self.kind)))?;
        let status = TransactionStatus::parse(&self.status).ok_or_else(|| {
            RepositoryError::Corrupt(format!("transaction status '{}'", self.status))
        })?;
        Ok(Transaction {
            id: self.id,
            transaction_id: self.transaction_id,
            user_id: self.user_id,
            wallet_id: self.wallet_id,
            kind,
            status,
            amount: self.amount,
            face_value: self.face_value,
            destination_id: self.destination_id,
            metadata: serde_json::from_value(self.metadata)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
