use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A household account, created on first sign-in through the wallet SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}

/// Fields needed to create a user; the id is generated by the store
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub email_verified: Option<DateTime<Utc>>,
}
