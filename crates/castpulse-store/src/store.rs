use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db::init_db;
use crate::error::Result;

/// Shared handle to the SQLite database.
///
/// One connection behind a mutex; repository methods live in the
/// entity modules as further `impl Store` blocks. Clones share the
/// connection, so a clone is cheap and safe to hand to every worker.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            // Best effort; open() reports the real failure if any.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        // The task queue shares this file through its own connection.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database with full schema, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}
