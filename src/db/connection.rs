use rusqlite::Connection;
use std::sync::Mutex;

use crate::db::migration_runner::MigrationRunner;
use crate::error::Result;

/// Shared handle to the journal database. Owned by the process bootstrap
/// and passed to every component that reads or writes rows.
pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(conn, db_path)
    }

    /// Fresh in-memory database with the full schema applied
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, ":memory:")
    }

    fn initialize(conn: Connection, db_path: &str) -> Result<Self> {
        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        // Enable WAL mode for better concurrency
        if db_path != ":memory:" {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        let runner = MigrationRunner::new();
        let applied = runner.run_pending_migrations(&conn, db_path)?;
        if applied > 0 {
            log::info!("Applied {} migrations to {}", applied, db_path);
        } else {
            log::debug!("Database schema is up to date");
        }

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_enables_foreign_keys() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_file_database_reopens_without_migrating_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let path = path.to_str().unwrap();

        drop(Database::new(path).unwrap());
        let db = Database::new(path).unwrap();

        let conn = db.conn.lock().unwrap();
        let versions: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
        assert!(!dir.path().join("backups").exists());
    }
}
