//! Connection management for the Control Store.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// A thread-safe handle to the Control Store's SQLite database.
///
/// Cloning is cheap: it shares the same underlying connection behind a
/// mutex, matching the single-writer model SQLite's WAL journal expects.
#[derive(Debug, Clone)]
pub struct ControlStore {
    connection: Arc<Mutex<Connection>>,
}

impl ControlStore {
    /// Open (creating if absent) the store at `path`, applying pragmas
    /// and bootstrapping the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store, for tests and for ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::migrations::MigrationManager::migrate(conn)?;
        Ok(())
    }

    pub fn connection(&self) -> &Mutex<Connection> {
        &self.connection
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back
    /// on `Err`. Lets callers bound the history-insert and
    /// migration-insert in one atomic commit (spec §4.1).
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| crate::error::Error::Lock(e.to_string()))?;
        let tx = conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}
