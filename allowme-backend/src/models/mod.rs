pub mod profile;
pub mod user;

use serde::Serialize;

pub use profile::{Profile, ProfileField, ProfileFields, ProfileResponse};
pub use user::{NewUser, User};

/// A user together with their (masked) profile, as returned by the profile API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[serde(flatten)]
    pub user: User,
    pub profile: Option<ProfileResponse>,
}

impl UserResponse {
    pub fn new(user: User, profile: Option<&Profile>) -> Self {
        Self {
            user,
            profile: profile.map(ProfileResponse::from),
        }
    }
}
