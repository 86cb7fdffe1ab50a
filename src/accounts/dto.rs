use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

use super::error::ValidationErrors;
use super::repo_types::User;

/// Request body for registration. Unknown fields are rejected, not ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Externally visible user: no credential material, picture as a temporary
/// URL rather than a raw storage key.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PublicUser {
    /// Absent or unpresignable avatar falls back to "use default" (None).
    pub async fn from_user(st: &AppState, user: User) -> Self {
        let avatar_url = match &user.avatar_key {
            Some(key) => match crate::avatars::services::presign(st, key).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, user_id = %user.id, "failed to presign avatar");
                    None
                }
            },
            None => None,
        };
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            bio: user.bio,
            avatar_url,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// Registration result: errors flattened to a message list.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
}

/// Simple success/error notification, used by delete and by error paths of
/// GET endpoints.
#[derive(Debug, Serialize)]
pub struct Notification {
    pub success: bool,
    pub message: String,
}

/// Password-change result, `status` is "success" or "error".
#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub status: &'static str,
    pub message: String,
}
