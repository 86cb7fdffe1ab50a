use tracing::{info, warn};

use crate::accounts::password::verify_password;
use crate::accounts::repo_types::User;
use crate::accounts::services::touch_last_login;
use crate::state::AppState;

pub const INVALID_CREDENTIALS_MSG: &str = "Invalid username or password, try again.";
pub const LAST_LOGIN_WARNING: &str = "Could not update last login time.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Deliberately identical for unknown username and wrong password, so
    /// callers cannot enumerate accounts.
    #[error("Invalid username or password, try again.")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Resolve username + password to an authenticated user.
///
/// A successful authentication also stamps the last login. That stamp is
/// bookkeeping: if it fails the session is still established and the failure
/// comes back as a warning string.
pub async fn authenticate(
    st: &AppState,
    username: &str,
    password: &str,
) -> Result<(User, Option<String>), SessionError> {
    let user = st
        .users
        .find_by_username(username)
        .await
        .map_err(|e| SessionError::Internal(e.into()))?
        .ok_or(SessionError::InvalidCredentials)?;

    if !verify_password(password, &user.password_hash) {
        return Err(SessionError::InvalidCredentials);
    }

    let mut warning = None;
    let user = match touch_last_login(st, user.id).await {
        Ok(()) => st
            .users
            .find_by_id(user.id)
            .await
            .ok()
            .flatten()
            .unwrap_or(user),
        Err(e) => {
            warn!(error = %e, user_id = %user.id, "failed to update last login time");
            warning = Some(LAST_LOGIN_WARNING.to_string());
            user
        }
    };

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((user, warning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::services::{change_password, register, RegisterInput};
    use time::OffsetDateTime;

    fn input(username: &str, email: &str, password: &str) -> RegisterInput {
        RegisterInput {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            display_name: None,
            bio: None,
        }
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_are_indistinguishable() {
        let st = AppState::fake();
        register(&st, input("alice", "alice@x.com", "secret123"))
            .await
            .unwrap();

        let unknown = authenticate(&st, "nobody", "whatever").await.unwrap_err();
        let wrong = authenticate(&st, "alice", "wrong-password")
            .await
            .unwrap_err();

        assert!(matches!(unknown, SessionError::InvalidCredentials));
        assert!(matches!(wrong, SessionError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.to_string(), INVALID_CREDENTIALS_MSG);
    }

    #[tokio::test]
    async fn login_stamps_last_login() {
        let st = AppState::fake();
        let created = register(&st, input("bob", "bob@x.com", "secret123"))
            .await
            .unwrap();
        assert!(created.last_login_at.is_none());

        let before = OffsetDateTime::now_utc();
        let (user, warning) = authenticate(&st, "bob", "secret123").await.unwrap();
        assert!(warning.is_none());
        assert!(user.last_login_at.expect("stamped") >= before);
    }

    #[tokio::test]
    async fn full_account_lifecycle() {
        let st = AppState::fake();
        let user = register(&st, input("alice", "alice@x.com", "secret123"))
            .await
            .unwrap();

        assert!(matches!(
            authenticate(&st, "alice", "wrong").await,
            Err(SessionError::InvalidCredentials)
        ));

        let (logged_in, _) = authenticate(&st, "alice", "secret123").await.unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login_at.is_some());

        change_password(&st, user.id, "secret123", "newpass99")
            .await
            .unwrap();

        assert!(matches!(
            authenticate(&st, "alice", "secret123").await,
            Err(SessionError::InvalidCredentials)
        ));
        assert!(authenticate(&st, "alice", "newpass99").await.is_ok());
    }
}
