//! Profile database operations
//!
//! Writes go through `ProfileFields`, so only whitelisted columns are ever
//! assigned. Every successful write emits a `ProfileSaved` event.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::super::Database;
use crate::error::{StoreError, StoreResult};
use crate::models::{Profile, ProfileField, ProfileFields};
use crate::profile_hooks::ProfileSaved;

const PROFILE_COLUMNS: &str = "id, userId, parentName, studentName, school, grade, \
     parentTelegram, studentTelegram, parentWallet, studentWallet, \
     openaiKey, telegramToken, evmKey, walletRpc, isCompleted, createdAt, updatedAt";

/// Parse a stored timestamp: RFC 3339 from this service, or SQLite's `datetime('now')` format
fn parse_timestamp(value: Option<String>) -> DateTime<Utc> {
    value
        .and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|t| t.and_utc())
                })
        })
        .unwrap_or_else(Utc::now)
}

impl Database {
    /// Create the profile for an existing user.
    ///
    /// Completion is computed from the stored fields, never taken from the client.
    pub fn create_profile(&self, user_id: &str, fields: &ProfileFields) -> StoreResult<Profile> {
        if self.get_user(user_id)?.is_none() {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }

        let mut profile = Profile::empty(Uuid::new_v4().to_string(), user_id.to_string(), Utc::now());
        profile.apply(fields);

        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO profiles ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                PROFILE_COLUMNS
            ),
            rusqlite::params![
                &profile.id,
                &profile.user_id,
                &profile.parent_name,
                &profile.student_name,
                &profile.school,
                &profile.grade,
                &profile.parent_telegram,
                &profile.student_telegram,
                &profile.parent_wallet,
                &profile.student_wallet,
                &profile.openai_key,
                &profile.telegram_token,
                &profile.evm_key,
                &profile.wallet_rpc,
                profile.is_completed,
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ],
        )?;
        drop(conn);

        log::info!(
            "Created profile {} for user {} (completed: {})",
            profile.id,
            user_id,
            profile.is_completed
        );
        self.hooks().emit(&ProfileSaved::created(profile.clone(), fields.clone()));
        Ok(profile)
    }

    pub fn get_profile_by_user_id(&self, user_id: &str) -> StoreResult<Option<Profile>> {
        if !self.table_exists("profiles") {
            return Ok(None);
        }

        let conn = self.conn()?;
        let profile = conn
            .query_row(
                &format!("SELECT {} FROM profiles WHERE userId = ?1", PROFILE_COLUMNS),
                [user_id],
                Self::row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Upsert: create the profile if missing, otherwise write only the supplied fields.
    ///
    /// `id` and `userId` are never modified.
    pub fn update_profile(&self, user_id: &str, fields: &ProfileFields) -> StoreResult<Profile> {
        let Some(existing) = self.get_profile_by_user_id(user_id)? else {
            return self.create_profile(user_id, fields);
        };

        let supplied = fields.supplied();
        if supplied.is_empty() {
            return Ok(existing);
        }

        let mut next = existing.clone();
        next.apply(fields);
        next.updated_at = Utc::now();

        // Build dynamic update query from the whitelisted columns
        let mut updates = Vec::with_capacity(supplied.len() + 2);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(supplied.len() + 3);
        for (field, value) in &supplied {
            updates.push(format!("{} = ?{}", field.column(), params.len() + 1));
            params.push(Box::new(value.to_string()));
        }
        updates.push(format!("isCompleted = ?{}", params.len() + 1));
        params.push(Box::new(next.is_completed));
        updates.push(format!("updatedAt = ?{}", params.len() + 1));
        params.push(Box::new(next.updated_at.to_rfc3339()));

        let sql = format!(
            "UPDATE profiles SET {} WHERE userId = ?{}",
            updates.join(", "),
            params.len() + 1
        );
        params.push(Box::new(user_id.to_string()));

        let conn = self.conn()?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        drop(conn);

        let updated = self.get_profile_by_user_id(user_id)?.unwrap_or(next);
        log::info!(
            "Updated {} field(s) of profile {} (completed: {})",
            supplied.len(),
            updated.id,
            updated.is_completed
        );
        self.hooks()
            .emit(&ProfileSaved::updated(existing, updated.clone(), fields.clone()));
        Ok(updated)
    }

    /// False when there is no profile, the store is uninitialized, or the lookup fails
    pub fn is_profile_completed(&self, user_id: &str) -> bool {
        match self.get_profile_by_user_id(user_id) {
            Ok(profile) => profile.is_some_and(|p| p.is_completed),
            Err(e) => {
                log::error!("Error checking if profile is completed: {}", e);
                false
            }
        }
    }

    /// Completed profiles in insertion order
    pub fn list_completed_profiles(&self) -> StoreResult<Vec<Profile>> {
        if !self.table_exists("profiles") {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM profiles WHERE isCompleted = 1 ORDER BY rowid",
            PROFILE_COLUMNS
        ))?;
        let profiles = stmt
            .query_map([], Self::row_to_profile)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }

    fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
        let text = |field: ProfileField| row.get::<_, Option<String>>(field.column());

        Ok(Profile {
            id: row.get("id")?,
            user_id: row.get("userId")?,
            parent_name: text(ProfileField::ParentName)?,
            student_name: text(ProfileField::StudentName)?,
            school: text(ProfileField::School)?,
            grade: text(ProfileField::Grade)?,
            parent_telegram: text(ProfileField::ParentTelegram)?,
            student_telegram: text(ProfileField::StudentTelegram)?,
            parent_wallet: text(ProfileField::ParentWallet)?,
            student_wallet: text(ProfileField::StudentWallet)?,
            openai_key: text(ProfileField::OpenaiKey)?,
            telegram_token: text(ProfileField::TelegramToken)?,
            evm_key: text(ProfileField::EvmKey)?,
            wallet_rpc: text(ProfileField::WalletRpc)?,
            is_completed: row.get::<_, Option<i64>>("isCompleted")?.unwrap_or(0) != 0,
            created_at: parse_timestamp(row.get("createdAt")?),
            updated_at: parse_timestamp(row.get("updatedAt")?),
        })
    }
}
