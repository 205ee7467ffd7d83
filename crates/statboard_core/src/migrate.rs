use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

struct Migration {
    version: u32,
    label: &'static str,
    script: &'static str,
}

/// Ordered schema history. Versions are append-only.
const SCHEMA_HISTORY: &[Migration] = &[
    Migration {
        version: 1,
        label: "baseline",
        script: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        label: "indexes",
        script: include_str!("migrations/v002_indexes.sql"),
    },
];

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Bring the database at `db_path` to the latest schema, creating the file if needed.
pub fn run_migrations(db_path: &Path) -> Result<MigrateReport> {
    ensure_db_parent(db_path)?;
    let connection = open_connection(db_path)?;
    let applied = migrate_connection(&connection)?;
    Ok(MigrateReport {
        applied,
        current_version: current_version(&connection)?,
    })
}

pub fn migrate_connection(connection: &Connection) -> Result<Vec<AppliedMigration>> {
    create_version_table(connection)?;
    let from = current_version(connection)?;

    let mut applied = Vec::new();
    for migration in SCHEMA_HISTORY.iter().filter(|m| m.version > from) {
        apply(connection, migration).with_context(|| {
            format!("failed to apply migration v{:03}_{}", migration.version, migration.label)
        })?;
        info!(version = migration.version, name = migration.label, "applied schema migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.label.to_string(),
        });
    }
    Ok(applied)
}

pub fn pending_migration_count(db_path: &Path) -> Result<usize> {
    if !db_path.exists() {
        return Ok(SCHEMA_HISTORY.len());
    }
    let connection = open_connection(db_path)?;
    let has_table = connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(()),
        )
        .optional()
        .context("failed to inspect sqlite_master")?
        .is_some();
    let from = if has_table {
        current_version(&connection)?
    } else {
        0
    };
    Ok(SCHEMA_HISTORY.iter().filter(|m| m.version > from).count())
}

/// Highest recorded version; 0 for a fresh database.
pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: Option<i64> = connection
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .context("failed to read schema version")?;
    u32::try_from(version.unwrap_or(0)).context("schema version is out of range")
}

pub fn latest_version() -> u32 {
    SCHEMA_HISTORY.last().map(|m| m.version).unwrap_or(0)
}

fn create_version_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );",
        )
        .context("failed to create schema_version table")
}

/// One migration per transaction; dropping the transaction on error rolls it back.
fn apply(connection: &Connection, migration: &Migration) -> Result<()> {
    let transaction = connection
        .unchecked_transaction()
        .context("failed to begin migration transaction")?;
    transaction
        .execute_batch(migration.script)
        .with_context(|| format!("schema script v{:03} failed", migration.version))?;
    transaction
        .execute(
            "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                i64::from(migration.version),
                migration.label,
                Utc::now().to_rfc3339()
            ],
        )
        .context("failed to record schema version")?;
    transaction
        .commit()
        .context("failed to commit migration transaction")
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;
    for (pragma, value) in [("foreign_keys", "ON"), ("journal_mode", "WAL")] {
        connection
            .pragma_update(None, pragma, value)
            .with_context(|| format!("failed to set PRAGMA {pragma}"))?;
    }
    Ok(connection)
}

pub(crate) fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let parent = db_path
        .parent()
        .ok_or_else(|| anyhow!("database path has no parent: {}", db_path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create data directory {}", parent.display()))
}
