use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Enum of every writable profile column.
///
/// This is the whitelist for partial updates: `id`, `userId` and
/// `isCompleted` are deliberately not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum ProfileField {
    #[strum(serialize = "parentName")]
    ParentName,
    #[strum(serialize = "studentName")]
    StudentName,
    #[strum(serialize = "school")]
    School,
    #[strum(serialize = "grade")]
    Grade,
    #[strum(serialize = "parentTelegram")]
    ParentTelegram,
    #[strum(serialize = "studentTelegram")]
    StudentTelegram,
    #[strum(serialize = "parentWallet")]
    ParentWallet,
    #[strum(serialize = "studentWallet")]
    StudentWallet,
    #[strum(serialize = "openaiKey")]
    OpenaiKey,
    #[strum(serialize = "telegramToken")]
    TelegramToken,
    #[strum(serialize = "evmKey")]
    EvmKey,
    #[strum(serialize = "walletRpc")]
    WalletRpc,
}

impl ProfileField {
    /// The column name in the `profiles` table
    pub fn column(&self) -> &'static str {
        (*self).into()
    }

    /// Environment variable the agent reads this field from, for secret fields
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenaiKey => Some("OPENAI_API_KEY"),
            Self::TelegramToken => Some("TELEGRAM_BOT_TOKEN"),
            Self::EvmKey => Some("EVM_PRIVATE_KEY"),
            Self::WalletRpc => Some("EVM_PROVIDER_URL"),
            _ => None,
        }
    }

    /// Fields that must be non-blank for a profile to count as completed
    pub fn required() -> impl Iterator<Item = ProfileField> {
        Self::iter()
    }

    /// Fields propagated to the agent's environment file
    pub fn secrets() -> impl Iterator<Item = ProfileField> {
        Self::iter().filter(|f| f.env_var().is_some())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// A household profile as stored in the `profiles` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub parent_name: Option<String>,
    pub student_name: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
    pub parent_telegram: Option<String>,
    pub student_telegram: Option<String>,
    pub parent_wallet: Option<String>,
    pub student_wallet: Option<String>,
    pub openai_key: Option<String>,
    pub telegram_token: Option<String>,
    pub evm_key: Option<String>,
    pub wallet_rpc: Option<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let value = match field {
            ProfileField::ParentName => &self.parent_name,
            ProfileField::StudentName => &self.student_name,
            ProfileField::School => &self.school,
            ProfileField::Grade => &self.grade,
            ProfileField::ParentTelegram => &self.parent_telegram,
            ProfileField::StudentTelegram => &self.student_telegram,
            ProfileField::ParentWallet => &self.parent_wallet,
            ProfileField::StudentWallet => &self.student_wallet,
            ProfileField::OpenaiKey => &self.openai_key,
            ProfileField::TelegramToken => &self.telegram_token,
            ProfileField::EvmKey => &self.evm_key,
            ProfileField::WalletRpc => &self.wallet_rpc,
        };
        value.as_deref()
    }

    fn slot(&mut self, field: ProfileField) -> &mut Option<String> {
        match field {
            ProfileField::ParentName => &mut self.parent_name,
            ProfileField::StudentName => &mut self.student_name,
            ProfileField::School => &mut self.school,
            ProfileField::Grade => &mut self.grade,
            ProfileField::ParentTelegram => &mut self.parent_telegram,
            ProfileField::StudentTelegram => &mut self.student_telegram,
            ProfileField::ParentWallet => &mut self.parent_wallet,
            ProfileField::StudentWallet => &mut self.student_wallet,
            ProfileField::OpenaiKey => &mut self.openai_key,
            ProfileField::TelegramToken => &mut self.telegram_token,
            ProfileField::EvmKey => &mut self.evm_key,
            ProfileField::WalletRpc => &mut self.wallet_rpc,
        }
    }

    /// An empty profile owned by `user_id`
    pub fn empty(id: String, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            parent_name: None,
            student_name: None,
            school: None,
            grade: None,
            parent_telegram: None,
            student_telegram: None,
            parent_wallet: None,
            student_wallet: None,
            openai_key: None,
            telegram_token: None,
            evm_key: None,
            wallet_rpc: None,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite every field supplied in `fields`, leaving the rest untouched,
    /// and recompute the completion flag.
    pub fn apply(&mut self, fields: &ProfileFields) {
        for (field, value) in fields.supplied() {
            *self.slot(field) = Some(value.to_string());
        }
        self.is_completed = self.has_required_fields();
    }

    pub fn has_required_fields(&self) -> bool {
        ProfileField::required().all(|f| !is_blank(self.get(f)))
    }

    /// The grade, if one is on file
    pub fn grade(&self) -> Option<&str> {
        self.grade.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }

    /// Non-empty secret values keyed by environment variable name
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        collect_env_vars(ProfileField::secrets().map(|f| (f, self.get(f))))
    }
}

fn collect_env_vars<'a>(
    values: impl Iterator<Item = (ProfileField, Option<&'a str>)>,
) -> Vec<(&'static str, String)> {
    values
        .filter(|(_, value)| !is_blank(*value))
        .filter_map(|(field, value)| Some((field.env_var()?, value?.to_string())))
        .collect()
}

/// Partial profile payload: only fields present in the request are written.
///
/// Unknown keys (including `id`, `userId` and `isCompleted`) are ignored on
/// deserialization, so identity columns can never be overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_rpc: Option<String>,
}

impl ProfileFields {
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let value = match field {
            ProfileField::ParentName => &self.parent_name,
            ProfileField::StudentName => &self.student_name,
            ProfileField::School => &self.school,
            ProfileField::Grade => &self.grade,
            ProfileField::ParentTelegram => &self.parent_telegram,
            ProfileField::StudentTelegram => &self.student_telegram,
            ProfileField::ParentWallet => &self.parent_wallet,
            ProfileField::StudentWallet => &self.student_wallet,
            ProfileField::OpenaiKey => &self.openai_key,
            ProfileField::TelegramToken => &self.telegram_token,
            ProfileField::EvmKey => &self.evm_key,
            ProfileField::WalletRpc => &self.wallet_rpc,
        };
        value.as_deref()
    }

    /// Fields present in this payload, in column order
    pub fn supplied(&self) -> Vec<(ProfileField, &str)> {
        ProfileField::iter()
            .filter_map(|f| self.get(f).map(|v| (f, v)))
            .collect()
    }

    /// Non-empty secret values present in this payload, keyed by environment variable name
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        collect_env_vars(ProfileField::secrets().map(|f| (f, self.get(f))))
    }
}

/// Mask a secret for display (e.g. "sk-a...wxyz")
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Response type for the profile API; secret fields are masked
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: String,
    pub user_id: String,
    pub parent_name: Option<String>,
    pub student_name: Option<String>,
    pub school: Option<String>,
    pub grade: Option<String>,
    pub parent_telegram: Option<String>,
    pub student_telegram: Option<String>,
    pub parent_wallet: Option<String>,
    pub student_wallet: Option<String>,
    pub openai_key: Option<String>,
    pub telegram_token: Option<String>,
    pub evm_key: Option<String>,
    pub wallet_rpc: Option<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Profile> for ProfileResponse {
    fn from(p: &Profile) -> Self {
        let masked = |v: &Option<String>| v.as_deref().map(mask_secret);
        Self {
            id: p.id.clone(),
            user_id: p.user_id.clone(),
            parent_name: p.parent_name.clone(),
            student_name: p.student_name.clone(),
            school: p.school.clone(),
            grade: p.grade.clone(),
            parent_telegram: p.parent_telegram.clone(),
            student_telegram: p.student_telegram.clone(),
            parent_wallet: p.parent_wallet.clone(),
            student_wallet: p.student_wallet.clone(),
            openai_key: masked(&p.openai_key),
            telegram_token: masked(&p.telegram_token),
            evm_key: masked(&p.evm_key),
            wallet_rpc: masked(&p.wallet_rpc),
            is_completed: p.is_completed,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
