//! SQLite-backed persistence for the module catalog and license rows.
//!
//! The store only reads and writes rows. Whether a license grants access is
//! decided by `license::entitlement`, never in SQL.

mod migrations;


use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::license::{LicenseStatus, Module, ModuleLicense};

pub use migrations::{current_version, LATEST_VERSION};

/// Unique constraint that rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Another license already uses the key
    LicenseKey,
    /// The module already has a TRIAL license
    ModuleTrial,
    /// Another license already uses the id
    LicenseId,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LicenseKey => f.write_str("license key"),
            Self::ModuleTrial => f.write_str("trial per module"),
            Self::LicenseId => f.write_str("license id"),
        }
    }
}

/// Storage-layer errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unique constraint violated: {0}")]
    Conflict(Conflict),

    #[error("Migration {version} ({name}) failed: {message}")]
    MigrationFailed {
        version: u32,
        name: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

const MODULE_COLUMNS: &str =
    "id, name, display_name, description, version, author, category, price, features, is_active";

const LICENSE_COLUMNS: &str = "id, module_id, license_key, organization_name, contact_email, \
     status, activated_at, expires_at, max_users, features";

/// Catalog and license persistence
pub struct LicenseStore {
    conn: Mutex<Connection>,
}

impl LicenseStore {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        debug!(path = %path.display(), "opened license database");
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        current_version(&self.conn.lock())
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Insert a module unless one with the same name exists; returns the stored row
    pub fn upsert_module(&self, module: &Module) -> Result<Module, StoreError> {
        let features = serde_json::to_string(&module.features)?;
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO modules (
                id, name, display_name, description, version, author, category,
                price, features, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(name) DO NOTHING",
            params![
                module.id,
                module.name,
                module.display_name,
                module.description,
                module.version,
                module.author,
                module.category,
                module.price,
                features,
                module.is_active,
            ],
        )?;

        let stored = conn.query_row(
            &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE name = ?1"),
            [&module.name],
            module_from_row,
        )?;
        Ok(stored)
    }

    pub fn find_module(&self, id: &str) -> Result<Option<Module>, StoreError> {
        let conn = self.conn.lock();
        let module = conn
            .query_row(
                &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = ?1"),
                [id],
                module_from_row,
            )
            .optional()?;
        Ok(module)
    }

    pub fn find_module_by_name(&self, name: &str) -> Result<Option<Module>, StoreError> {
        let conn = self.conn.lock();
        let module = conn
            .query_row(
                &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE name = ?1"),
                [name],
                module_from_row,
            )
            .optional()?;
        Ok(module)
    }

    /// Active modules in insertion order
    pub fn list_active_modules(&self) -> Result<Vec<Module>, StoreError> {
        self.query_modules("WHERE is_active = 1")
    }

    /// Every module, active or not
    pub fn list_all_modules(&self) -> Result<Vec<Module>, StoreError> {
        self.query_modules("")
    }

    fn query_modules(&self, filter: &str) -> Result<Vec<Module>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MODULE_COLUMNS} FROM modules {filter} ORDER BY rowid"
        ))?;
        let modules = stmt
            .query_map([], module_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(modules)
    }

    /// Toggle catalog visibility. Returns false when the module does not exist.
    pub fn set_module_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE modules SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // Licenses
    // ========================================================================

    /// Insert a new license row.
    ///
    /// Key reuse and a second TRIAL row for a module are rejected by the
    /// schema and surface as `StoreError::Conflict`.
    pub fn insert_license(&self, license: &ModuleLicense) -> Result<(), StoreError> {
        let features = serde_json::to_string(&license.features)?;
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO module_licenses (
                id, module_id, license_key, organization_name, contact_email,
                status, activated_at, expires_at, max_users, features
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                license.id,
                license.module_id,
                license.license_key,
                license.organization_name,
                license.contact_email,
                license.status,
                license.activated_at.timestamp_millis(),
                license.expires_at.timestamp_millis(),
                license.max_users,
                features,
            ],
        )
        .map_err(classify_write_error)?;

        Ok(())
    }

    pub fn find_license(&self, id: &str) -> Result<Option<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let license = conn
            .query_row(
                &format!("SELECT {LICENSE_COLUMNS} FROM module_licenses WHERE id = ?1"),
                [id],
                license_from_row,
            )
            .optional()?;
        Ok(license)
    }

    pub fn find_license_by_key(&self, key: &str) -> Result<Option<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let license = conn
            .query_row(
                &format!("SELECT {LICENSE_COLUMNS} FROM module_licenses WHERE license_key = ?1"),
                [key],
                license_from_row,
            )
            .optional()?;
        Ok(license)
    }

    /// The module's TRIAL license, expired or not
    pub fn find_trial(&self, module_id: &str) -> Result<Option<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let license = conn
            .query_row(
                &format!(
                    "SELECT {LICENSE_COLUMNS} FROM module_licenses
                     WHERE module_id = ?1 AND status = ?2 LIMIT 1"
                ),
                params![module_id, LicenseStatus::Trial],
                license_from_row,
            )
            .optional()?;
        Ok(license)
    }

    pub fn licenses_for_module(&self, module_id: &str) -> Result<Vec<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LICENSE_COLUMNS} FROM module_licenses WHERE module_id = ?1 ORDER BY rowid"
        ))?;
        let licenses = stmt
            .query_map([module_id], license_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(licenses)
    }

    pub fn list_licenses(&self) -> Result<Vec<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LICENSE_COLUMNS} FROM module_licenses ORDER BY rowid"
        ))?;
        let licenses = stmt
            .query_map([], license_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(licenses)
    }

    pub fn count_licenses(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM module_licenses", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Force a license to SUSPENDED. Returns the updated row, or None for an unknown id.
    pub fn suspend_license(&self, id: &str) -> Result<Option<ModuleLicense>, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE module_licenses SET status = ?2 WHERE id = ?1",
            params![id, LicenseStatus::Suspended],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let license = conn.query_row(
            &format!("SELECT {LICENSE_COLUMNS} FROM module_licenses WHERE id = ?1"),
            [id],
            license_from_row,
        )?;
        Ok(Some(license))
    }
}

impl fmt::Debug for LicenseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseStore").finish_non_exhaustive()
    }
}

fn classify_write_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("module_licenses.license_key") {
                return StoreError::Conflict(Conflict::LicenseKey);
            }
            if message.contains("module_licenses.module_id") {
                return StoreError::Conflict(Conflict::ModuleTrial);
            }
            if message.contains("module_licenses.id") {
                return StoreError::Conflict(Conflict::LicenseId);
            }
        }
    }
    StoreError::Sqlite(err)
}

// ============================================================================
// Row mapping
// ============================================================================

impl ToSql for LicenseStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LicenseStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        LicenseStatus::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown license status {raw:?}").into()))
    }
}

fn module_from_row(row: &Row<'_>) -> rusqlite::Result<Module> {
    Ok(Module {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        version: row.get(4)?,
        author: row.get(5)?,
        category: row.get(6)?,
        price: row.get(7)?,
        features: string_list(row, 8)?,
        is_active: row.get(9)?,
    })
}

fn license_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleLicense> {
    Ok(ModuleLicense {
        id: row.get(0)?,
        module_id: row.get(1)?,
        license_key: row.get(2)?,
        organization_name: row.get(3)?,
        contact_email: row.get(4)?,
        status: row.get(5)?,
        activated_at: timestamp(row, 6)?,
        expires_at: timestamp(row, 7)?,
        max_users: row.get(8)?,
        features: string_list(row, 9)?,
    })
}

fn string_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}
