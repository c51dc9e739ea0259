//! Schema migrations.
//!
//! Migrations are applied in order and tracked by name in the `migrations`
//! table. A missing tracking table means nothing has been applied yet, so the
//! first run bootstraps the schema. A migration is recorded only after it
//! applied successfully, which makes the runner safe to re-run.

use chrono::Utc;

use super::Database;
use crate::env_sync::EnvFile;
use crate::error::{StoreError, StoreResult};

pub const INITIAL_SCHEMA: &str = "initial_schema";
pub const ADD_WALLET_RPC_COLUMN: &str = "add_wallet_rpc_column";
pub const ADD_PROFILE_TIMESTAMPS: &str = "add_profile_timestamps";
pub const UPDATE_ENV_WITH_PROFILE_DATA: &str = "update_env_with_profile_data";

const MIGRATIONS_TABLE: &str = "migrations";

const INITIAL_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    image TEXT,
    emailVerified TEXT
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    userId TEXT UNIQUE NOT NULL,
    parentName TEXT,
    studentName TEXT,
    school TEXT,
    grade TEXT,
    parentTelegram TEXT,
    studentTelegram TEXT,
    parentWallet TEXT,
    studentWallet TEXT,
    openaiKey TEXT,
    telegramToken TEXT,
    evmKey TEXT,
    isCompleted INTEGER NOT NULL DEFAULT 0,
    createdAt TEXT DEFAULT (datetime('now')),
    updatedAt TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (userId) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    appliedAt TEXT NOT NULL
);
";

/// What to do when a migration fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    /// Stop the run and return the error; the process must not serve requests
    Abort,
    /// Log, leave unrecorded so it is retried on next start, and continue
    Skip,
}

struct Migration {
    name: &'static str,
    on_failure: OnFailure,
    apply: fn(&Database, &EnvFile) -> StoreResult<()>,
}

/// The fixed, ordered migration list
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: INITIAL_SCHEMA,
        on_failure: OnFailure::Abort,
        apply: create_tables,
    },
    Migration {
        name: ADD_WALLET_RPC_COLUMN,
        on_failure: OnFailure::Skip,
        apply: add_wallet_rpc_column,
    },
    Migration {
        name: ADD_PROFILE_TIMESTAMPS,
        on_failure: OnFailure::Skip,
        apply: add_profile_timestamps,
    },
    Migration {
        name: UPDATE_ENV_WITH_PROFILE_DATA,
        on_failure: OnFailure::Skip,
        apply: update_env_with_profile_data,
    },
];

/// Outcome of a migration run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

/// Whether `name` has been recorded. Without a tracking table nothing has.
pub fn is_migration_applied(db: &Database, name: &str) -> StoreResult<bool> {
    if !db.table_exists(MIGRATIONS_TABLE) {
        return Ok(false);
    }

    let conn = db.conn()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM migrations WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn record_migration(db: &Database, name: &str) -> StoreResult<()> {
    let conn = db.conn()?;
    conn.execute(
        "INSERT OR IGNORE INTO migrations (name, appliedAt) VALUES (?1, ?2)",
        rusqlite::params![name, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Apply every pending migration in order.
///
/// Fails only when a migration marked abort-on-failure (the initial schema)
/// fails, or when the tracking table can't be read or written.
pub fn run_migrations(db: &Database, env_file: &EnvFile) -> StoreResult<MigrationReport> {
    log::info!("Running database migrations...");
    let mut report = MigrationReport::default();

    for migration in MIGRATIONS {
        if is_migration_applied(db, migration.name)? {
            report.skipped.push(migration.name);
            continue;
        }

        log::info!("Applying migration: {}", migration.name);
        match (migration.apply)(db, env_file) {
            Ok(()) => {
                // The initial schema creates the tracking table itself
                if db.table_exists(MIGRATIONS_TABLE) {
                    record_migration(db, migration.name)?;
                }
                log::info!("Migration applied: {}", migration.name);
                report.applied.push(migration.name);
            }
            Err(e) if migration.on_failure == OnFailure::Abort => {
                log::error!("Migration {} failed: {}", migration.name, e);
                return Err(StoreError::Migration {
                    name: migration.name,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                log::error!("Error in migration {}: {}", migration.name, e);
                report.failed.push(migration.name);
            }
        }
    }

    log::info!(
        "All migrations completed ({} applied, {} already applied, {} failed)",
        report.applied.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

fn create_tables(db: &Database, _env_file: &EnvFile) -> StoreResult<()> {
    db.conn()?.execute_batch(INITIAL_SCHEMA_SQL)?;
    Ok(())
}

fn add_wallet_rpc_column(db: &Database, _env_file: &EnvFile) -> StoreResult<()> {
    if !db.column_exists("profiles", "walletRpc")? {
        db.conn()?
            .execute("ALTER TABLE profiles ADD COLUMN walletRpc TEXT", [])?;
        log::info!("Added walletRpc column to profiles table");
    }
    Ok(())
}

/// Databases created before timestamps were tracked lack these columns.
/// SQLite can't add a column with a non-constant default, so backfill instead.
fn add_profile_timestamps(db: &Database, _env_file: &EnvFile) -> StoreResult<()> {
    for column in ["createdAt", "updatedAt"] {
        if db.column_exists("profiles", column)? {
            continue;
        }
        let conn = db.conn()?;
        conn.execute(&format!("ALTER TABLE profiles ADD COLUMN {} TEXT", column), [])?;
        conn.execute(
            &format!("UPDATE profiles SET {} = ?1 WHERE {} IS NULL", column, column),
            [Utc::now().to_rfc3339()],
        )?;
        log::info!("Added {} column to profiles table", column);
    }
    Ok(())
}

/// Push the secrets of the first completed profile into the agent's .env file
fn update_env_with_profile_data(db: &Database, env_file: &EnvFile) -> StoreResult<()> {
    let profiles = db.list_completed_profiles()?;
    let Some(profile) = profiles.first() else {
        log::info!("No completed profiles found, skipping .env update");
        return Ok(());
    };

    let vars = profile.env_vars();
    if !vars.is_empty() {
        log::info!("Updating .env file with data from profile {}", profile.id);
        env_file.update(&vars);
    }
    Ok(())
}
