//! Database layer for the plan store.
//!
//! Row-level helpers take a `&Connection` so they can run inside a caller's
//! transaction (a `rusqlite::Transaction` derefs to `Connection`); the
//! `impl Database` wrappers in each module are the standalone entry points.

pub mod epics;
pub mod features;
pub mod history;
pub mod integrity;
pub mod tasks;

use crate::error::PlanResult;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while another process holds the write lock
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> PlanResult<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    fn run_migrations(&self) -> PlanResult<()> {
        let mut conn = self.lock();
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    // A panic while holding the lock cannot leave SQLite half-written, so a
    // poisoned mutex is still safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> PlanResult<T>
    where
        F: FnOnce(&Connection) -> PlanResult<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> PlanResult<T>
    where
        F: FnOnce(&mut Connection) -> PlanResult<T>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front so two processes allocating keys
    /// cannot both read the same maximum. `f` decides whether to commit;
    /// dropping the transaction without committing rolls it back.
    pub fn with_immediate_tx<F, T>(&self, f: F) -> PlanResult<T>
    where
        F: FnOnce(Transaction<'_>) -> PlanResult<T>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            f(tx)
        })
    }
}

/// Current time, truncated to milliseconds so it survives a round trip
/// through the TEXT timestamp columns unchanged.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Serialize a string list column.
pub(crate) fn encode_list(items: &[String]) -> PlanResult<Option<String>> {
    if items.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(items)?))
    }
}

/// Parse a string list column; malformed content reads as empty.
pub(crate) fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| serde_json::from_str(&s).unwrap_or_default())
        .unwrap_or_default()
}
