//! Storage backends
//!
//! The ledger runs against PostgreSQL in production. An in-memory backend with
//! the same transactional semantics is available for tests and local
//! development (`STORAGE_BACKEND=memory`).
//!
//! Writes always go through a [`LedgerTx`]. A Postgres transaction that is
//! dropped without [`LedgerTx::commit`] rolls back; an in-memory transaction
//! works on a staged copy of the tables and discards it on drop.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::LedgerResult;
use crate::events::WebhookEventRecord;
use crate::purchases::Purchase;

/// Create a PostgreSQL connection pool
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> LedgerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Database pool created");
    Ok(pool)
}

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> LedgerResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Ledger migrations applied");
    Ok(())
}

/// In-memory copy of the `webhook_logs` and `purchases` tables
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub(crate) events: Vec<WebhookEventRecord>,
    pub(crate) purchases: Vec<Purchase>,
}

impl MemoryTables {
    // Rows are never deleted, so ids follow insertion order.
    pub(crate) fn next_event_id(&self) -> i64 {
        self.events.len() as i64 + 1
    }

    pub(crate) fn next_purchase_id(&self) -> i64 {
        self.purchases.len() as i64 + 1
    }
}

/// Handle to the ledger's persistent state
#[derive(Clone)]
pub enum LedgerStore {
    Postgres(PgPool),
    Memory(Arc<Mutex<MemoryTables>>),
}

impl LedgerStore {
    pub fn postgres(pool: PgPool) -> Self {
        LedgerStore::Postgres(pool)
    }

    pub fn new_in_memory() -> Self {
        LedgerStore::Memory(Arc::new(Mutex::new(MemoryTables::default())))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            LedgerStore::Postgres(_) => "postgres",
            LedgerStore::Memory(_) => "memory",
        }
    }

    /// Start a write transaction.
    ///
    /// In-memory transactions are serialized: the table lock is held until the
    /// transaction is committed or dropped.
    pub async fn begin(&self) -> LedgerResult<LedgerTx> {
        match self {
            LedgerStore::Postgres(pool) => Ok(LedgerTx::Postgres(pool.begin().await?)),
            LedgerStore::Memory(tables) => {
                let guard = Arc::clone(tables).lock_owned().await;
                let staged = guard.clone();
                Ok(LedgerTx::Memory { guard, staged })
            }
        }
    }

    /// Cheap connectivity probe used by the health endpoint
    pub async fn ping(&self) -> LedgerResult<()> {
        match self {
            LedgerStore::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            LedgerStore::Memory(_) => {}
        }
        Ok(())
    }
}

/// An open write transaction against a [`LedgerStore`]
pub enum LedgerTx {
    Postgres(Transaction<'static, Postgres>),
    Memory {
        guard: OwnedMutexGuard<MemoryTables>,
        staged: MemoryTables,
    },
}

impl LedgerTx {
    pub async fn commit(self) -> LedgerResult<()> {
        match self {
            LedgerTx::Postgres(tx) => tx.commit().await?,
            LedgerTx::Memory { mut guard, staged } => *guard = staged,
        }
        Ok(())
    }

    pub async fn rollback(self) -> LedgerResult<()> {
        match self {
            LedgerTx::Postgres(tx) => tx.rollback().await?,
            LedgerTx::Memory { .. } => {}
        }
        Ok(())
    }
}
