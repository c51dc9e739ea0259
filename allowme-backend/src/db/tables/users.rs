//! User database operations

use chrono::{DateTime, Utc};
use rusqlite::{ffi, OptionalExtension};
use uuid::Uuid;

use super::super::Database;
use crate::error::{StoreError, StoreResult};
use crate::models::{NewUser, User};

impl Database {
    /// Create a user with a generated id. Fails with `DuplicateEmail` if the email is taken.
    pub fn create_user(&self, new_user: &NewUser) -> StoreResult<User> {
        let conn = self.conn()?;
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO users (id, name, email, image, emailVerified) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &id,
                &new_user.name,
                &new_user.email,
                &new_user.image,
                new_user.email_verified.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                StoreError::DuplicateEmail(new_user.email.clone())
            }
            other => other.into(),
        })?;

        log::info!("Created user {}", id);
        Ok(User {
            id,
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            image: new_user.image.clone(),
            email_verified: new_user.email_verified,
        })
    }

    /// Find a user by email. A miss (or an uninitialized store) is `Ok(None)`.
    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        if !self.table_exists("users") {
            return Ok(None);
        }

        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, name, email, image, emailVerified FROM users WHERE email = ?1",
                [email],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        if !self.table_exists("users") {
            return Ok(None);
        }

        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, name, email, image, emailVerified FROM users WHERE id = ?1",
                [id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let email_verified: Option<String> = row.get(4)?;

        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            image: row.get(3)?,
            email_verified: email_verified
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}
