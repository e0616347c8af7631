//! Schema migrations: forward-only, one transaction per migration.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::StoreError;

/// Latest schema version known to this build.
pub const LATEST_VERSION: u32 = 2;

type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

const MIGRATIONS: [(u32, &str, MigrationFn); 2] = [
    (1, "initial_schema", v001_initial_schema),
    (2, "one_trial_per_module", v002_one_trial_per_module),
];

fn v001_initial_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE modules (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            description   TEXT NOT NULL DEFAULT '',
            version       TEXT NOT NULL,
            author        TEXT NOT NULL DEFAULT '',
            category      TEXT NOT NULL DEFAULT '',
            price         REAL NOT NULL DEFAULT 0,
            features      TEXT NOT NULL DEFAULT '[]',
            is_active     INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE module_licenses (
            id                TEXT PRIMARY KEY,
            module_id         TEXT NOT NULL REFERENCES modules(id),
            license_key       TEXT NOT NULL UNIQUE,
            organization_name TEXT,
            contact_email     TEXT,
            status            TEXT NOT NULL
                CHECK (status IN ('ACTIVE', 'TRIAL', 'EXPIRED', 'SUSPENDED')),
            activated_at      INTEGER NOT NULL,
            expires_at        INTEGER NOT NULL,
            max_users         INTEGER NOT NULL,
            features          TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX idx_module_licenses_module ON module_licenses(module_id);",
    )
}

fn v002_one_trial_per_module(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE UNIQUE INDEX idx_module_licenses_single_trial
            ON module_licenses(module_id) WHERE status = 'TRIAL';",
    )
}

/// Current schema version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply every pending migration. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32, StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let current = current_version(conn)?;
    if current >= LATEST_VERSION {
        debug!("license schema is up to date (v{current})");
        return Ok(0);
    }

    let mut applied = 0;
    for (version, name, migrate) in MIGRATIONS {
        if version <= current {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        migrate(&tx).map_err(|e| StoreError::MigrationFailed {
            version,
            name: name.to_string(),
            message: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![version, name, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;

        info!(version, name, "applied license schema migration");
        applied += 1;
    }

    Ok(applied)
}
