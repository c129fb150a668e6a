use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::db;
use crate::error::{JournalError, Result};

/// Pre-migration backups kept next to the database
const KEEP_BACKUPS: usize = 5;
const BACKUP_PREFIX: &str = "pre_migration_";

const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    execution_time_ms INTEGER NOT NULL DEFAULT 0
)";

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("migrations/001_initial_schema.sql"),
}];

impl Migration {
    /// SHA-256 of the embedded SQL, recorded when the migration is applied
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Applies the embedded migrations in version order. Each one runs in its
/// own transaction together with its ledger row.
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self {
            migrations: MIGRATIONS.to_vec(),
        }
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_migrations(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Verify what is already applied, then apply the rest. A database that
    /// already has a schema is backed up first unless it lives in memory.
    pub fn run_pending_migrations(&self, conn: &Connection, db_path: &str) -> Result<usize> {
        conn.execute_batch(LEDGER_SQL)?;
        self.verify_migrations(conn)?;

        let current = self.get_current_version(conn)?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| current.map_or(true, |v| m.version > v))
            .collect();

        let Some(target) = pending.last().map(|m| m.version) else {
            return Ok(0);
        };
        log::info!("Migrating schema from {:?} to version {}", current, target);

        if current.is_some() && !is_memory_path(db_path) {
            let backup = create_backup(conn, db_path, target)?;
            log::info!("Backup created: {}", backup.display());
        }

        for migration in &pending {
            if let Err(e) = apply_migration(conn, migration) {
                log::error!("Migration {} ({}) failed: {}", migration.version, migration.name, e);
                return Err(e);
            }
        }

        Ok(pending.len())
    }

    /// Fail when an applied migration's SQL no longer matches the embedded
    /// copy, or when the database was written by a newer build.
    pub fn verify_migrations(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare("SELECT version, name, checksum FROM schema_migrations ORDER BY version")?;
        let applied = stmt
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (version, name, stored) in applied {
            let Some(migration) = self.migrations.iter().find(|m| m.version == version) else {
                return Err(JournalError::Database(format!(
                    "Schema version {} ({}) is newer than this build",
                    version, name
                )));
            };
            if migration.checksum() != stored {
                log::error!("Checksum mismatch for migration {} ({})", version, name);
                return Err(JournalError::Database(format!(
                    "Migration {} ({}) was modified after it was applied; restore it or use a backup",
                    version, name
                )));
            }
        }

        Ok(())
    }

    pub fn get_current_version(&self, conn: &Connection) -> Result<Option<u32>> {
        let version = conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
        Ok(version)
    }
}

fn is_memory_path(db_path: &str) -> bool {
    db_path.is_empty() || db_path == ":memory:"
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let started = Instant::now();
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, checksum, applied_at, execution_time_ms)
         VALUES (?, ?, ?, ?, ?)",
        params![
            migration.version,
            migration.name,
            migration.checksum(),
            db::now_millis(),
            started.elapsed().as_millis() as i64
        ],
    )?;
    tx.commit()?;

    log::info!(
        "Applied migration {} ({}) in {}ms",
        migration.version,
        migration.name,
        started.elapsed().as_millis()
    );
    Ok(())
}

/// Copy the live database into `backups/` beside it and check the copy
fn create_backup(conn: &Connection, db_path: &str, target_version: u32) -> Result<PathBuf> {
    let dir = Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let backup_dir = dir.join("backups");
    fs::create_dir_all(&backup_dir)?;

    // Millis first so names sort chronologically
    let backup_path = backup_dir.join(format!(
        "{}{}_v{}.db",
        BACKUP_PREFIX,
        db::now_millis(),
        target_version
    ));

    let mut dst = Connection::open(&backup_path)?;
    {
        let backup = rusqlite::backup::Backup::new(conn, &mut dst)?;
        backup.run_to_completion(5, Duration::from_millis(250), None)?;
    }

    let integrity: String = dst.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if integrity != "ok" {
        return Err(JournalError::Database(format!(
            "Backup {} failed its integrity check: {}",
            backup_path.display(),
            integrity
        )));
    }

    prune_backups(&backup_dir)?;
    Ok(backup_path)
}

fn prune_backups(backup_dir: &Path) -> Result<()> {
    let mut backups: Vec<PathBuf> = fs::read_dir(backup_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".db"))
        })
        .collect();
    backups.sort();

    let excess = backups.len().saturating_sub(KEEP_BACKUPS);
    for old in &backups[..excess] {
        if let Err(e) = fs::remove_file(old) {
            log::warn!("Failed to delete old backup {}: {}", old.display(), e);
        }
    }
    Ok(())
}
