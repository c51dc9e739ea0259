use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use crate::error::StoreResult;
use crate::profile_hooks::ProfileHooks;

type SqlitePool = Pool<SqliteConnectionManager>;

/// The profile store: an r2d2 pool over the SQLite file plus the hooks
/// notified after profile writes.
///
/// Schema setup lives in [`crate::db::migrations`]; run it before serving.
pub struct Database {
    pool: SqlitePool,
    hooks: ProfileHooks,
}

impl Database {
    pub fn new(database_url: &str) -> StoreResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Failed to create database directory {:?}: {}", parent, e);
                }
            }
        }

        let manager = SqliteConnectionManager::file(database_url).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder().build(manager)?;

        Ok(Self {
            pool,
            hooks: ProfileHooks::new(),
        })
    }

    /// Get a pooled connection. Drop it before calling other `Database` methods.
    pub(crate) fn conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Listeners notified after every profile write
    pub fn hooks(&self) -> &ProfileHooks {
        &self.hooks
    }

    /// Check the catalog for a table. Any failure counts as "does not exist".
    pub fn table_exists(&self, table: &str) -> bool {
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Error checking if table {} exists: {}", table, e);
                return false;
            }
        };

        conn.query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get::<_, String>(0),
        )
        .is_ok()
    }

    /// Check whether `table` has a column named `column`
    pub fn column_exists(&self, table: &str, column: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        // PRAGMA arguments can't be bound; only called with our own table names
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|name| name == column))
    }

    /// The CREATE statements of every table, ordered by name
    #[cfg(test)]
    pub fn schema(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL ORDER BY name",
        )?;
        let sql = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("allowme.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        assert!(path.parent().unwrap().exists());
        assert!(!db.table_exists("users"));
    }

    #[test]
    fn test_column_exists() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("t.db").to_str().unwrap()).unwrap();
        db.conn()
            .unwrap()
            .execute_batch("CREATE TABLE things (id TEXT PRIMARY KEY, label TEXT)")
            .unwrap();

        assert!(db.table_exists("things"));
        assert!(db.column_exists("things", "label").unwrap());
        assert!(!db.column_exists("things", "walletRpc").unwrap());
    }
}
