use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::avatars::services::{store_avatar, UploadItem};
use crate::state::AppState;

use super::error::{AccountError, ValidationErrors};
use super::password::{hash_password, verify_password};
use super::repo_types::{NewUser, ProfilePatch, User};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{1,32}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

#[derive(Debug)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

fn validate_profile_fields(
    errors: &mut ValidationErrors,
    display_name: &Option<String>,
    bio: &Option<String>,
) {
    if let Some(name) = display_name {
        if name.len() > 100 {
            errors.insert(
                "display_name".into(),
                "Display name must be at most 100 characters.".into(),
            );
        }
    }
    if let Some(bio) = bio {
        if bio.len() > 1000 {
            errors.insert("bio".into(), "Bio must be at most 1000 characters.".into());
        }
    }
}

pub async fn register(st: &AppState, mut input: RegisterInput) -> Result<User, AccountError> {
    input.username = input.username.trim().to_string();
    input.email = input.email.trim().to_lowercase();

    let mut errors = ValidationErrors::new();
    if input.username.is_empty() {
        errors.insert("username".into(), "Username is required.".into());
    } else if !is_valid_username(&input.username) {
        errors.insert(
            "username".into(),
            "Username may only contain letters, digits, '.', '-' and '_' (max 32).".into(),
        );
    }
    if !is_valid_email(&input.email) {
        errors.insert("email".into(), "Please enter a valid email address.".into());
    }
    if input.password.len() < st.config.policy.min_password_len {
        errors.insert(
            "password".into(),
            format!(
                "Password must be at least {} characters.",
                st.config.policy.min_password_len
            ),
        );
    }
    validate_profile_fields(&mut errors, &input.display_name, &input.bio);
    if !errors.is_empty() {
        return Err(AccountError::Validation(errors));
    }

    let password_hash = hash_password(&input.password)?;
    let user = st
        .users
        .insert(NewUser {
            username: input.username,
            email: input.email,
            password_hash,
            display_name: input.display_name,
            bio: input.bio,
        })
        .await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn view(st: &AppState, id: Uuid) -> Result<User, AccountError> {
    st.users.find_by_id(id).await?.ok_or(AccountError::NotFound)
}

fn require_owner(actor: Uuid, target: Uuid) -> Result<(), AccountError> {
    if actor != target {
        return Err(AccountError::Forbidden);
    }
    Ok(())
}

/// Edit a profile, optionally replacing the picture.
///
/// The asset is stored first; its key joins the profile fields in a single
/// repository write, so a record never references an object that was not
/// stored. If storing fails, the edit downgrades to fields-only and the
/// returned warning says so. No asset supplied leaves the stored reference
/// untouched.
pub async fn edit_profile(
    st: &AppState,
    actor: Uuid,
    target: Uuid,
    update: ProfileUpdate,
    avatar: Option<UploadItem>,
) -> Result<(User, Option<String>), AccountError> {
    if st.users.find_by_id(target).await?.is_none() {
        return Err(AccountError::NotFound);
    }
    require_owner(actor, target)?;

    let mut errors = ValidationErrors::new();
    validate_profile_fields(&mut errors, &update.display_name, &update.bio);
    if !errors.is_empty() {
        return Err(AccountError::Validation(errors));
    }

    let mut warning = None;
    let avatar_key = match avatar {
        Some(item) => match store_avatar(st, target, item).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, user_id = %target, "avatar upload failed, saving fields only");
                warning = Some("Unable to upload the profile picture.".to_string());
                None
            }
        },
        None => None,
    };

    let user = st
        .users
        .update_profile(
            target,
            ProfilePatch {
                display_name: update.display_name,
                bio: update.bio,
                avatar_key,
            },
        )
        .await?;

    info!(user_id = %user.id, "profile updated");
    Ok((user, warning))
}

/// Replace the stored credential. Requires the current secret to verify;
/// a mismatch mutates nothing. Neither secret is logged.
pub async fn change_password(
    st: &AppState,
    actor: Uuid,
    current_password: &str,
    new_password: &str,
) -> Result<(), AccountError> {
    let user = st
        .users
        .find_by_id(actor)
        .await?
        .ok_or(AccountError::NotFound)?;

    if !verify_password(current_password, &user.password_hash) {
        return Err(AccountError::CurrentPasswordIncorrect);
    }

    if new_password.len() < st.config.policy.min_password_len {
        return Err(AccountError::field(
            "new_password",
            &format!(
                "Password must be at least {} characters.",
                st.config.policy.min_password_len
            ),
        ));
    }

    let hash = hash_password(new_password)?;
    st.users.set_password_hash(actor, &hash).await?;
    info!(user_id = %actor, "password changed");
    Ok(())
}

/// Terminal removal; the stored avatar is cleaned up best-effort.
pub async fn delete_account(st: &AppState, actor: Uuid, target: Uuid) -> Result<(), AccountError> {
    let user = st
        .users
        .find_by_id(target)
        .await?
        .ok_or(AccountError::NotFound)?;
    require_owner(actor, target)?;

    st.users.delete(target).await?;
    if let Some(key) = &user.avatar_key {
        crate::avatars::services::remove(st, key).await;
    }
    info!(user_id = %target, "account deleted");
    Ok(())
}

/// Stamp the last successful login. Failures are the caller's to downgrade.
pub async fn touch_last_login(st: &AppState, id: Uuid) -> Result<(), AccountError> {
    let now = st.clock.now();
    st.users.set_last_login(id, now).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn input(username: &str, email: &str, password: &str) -> RegisterInput {
        RegisterInput {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            display_name: None,
            bio: None,
        }
    }

    fn png() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"png-bytes"),
            content_type: "image/png".into(),
        }
    }

    #[test]
    fn email_and_username_validation() {
        assert!(is_valid_email("alice@x.com"));
        assert!(!is_valid_email("alice@x"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@x.com"));

        assert!(is_valid_username("alice"));
        assert!(is_valid_username("al.ice_2-x"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(33)));
    }

    #[tokio::test]
    async fn register_collects_per_field_errors() {
        let st = AppState::fake();
        let err = register(&st, input("", "bad-email", "short"))
            .await
            .unwrap_err();
        match err {
            AccountError::Validation(map) => {
                assert!(map.contains_key("username"));
                assert!(map.contains_key("email"));
                assert!(map.contains_key("password"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_never_exposes_plaintext_and_normalizes_email() {
        let st = AppState::fake();
        let user = register(&st, input("alice", "  Alice@X.COM ", "secret123"))
            .await
            .unwrap();
        assert_eq!(user.email, "alice@x.com");
        assert_ne!(user.password_hash, "secret123");
        assert!(verify_password("secret123", &user.password_hash));
        // hash never serialized
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn duplicate_username_fails_second_registration_only() {
        let st = AppState::fake();
        register(&st, input("alice", "alice@x.com", "secret123"))
            .await
            .unwrap();
        let err = register(&st, input("alice", "other@x.com", "secret123"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Duplicate { field: "username" }
        ));
        // first registration unaffected
        let alice = st.users.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(alice.email, "alice@x.com");
    }

    #[tokio::test]
    async fn change_password_requires_correct_current_secret() {
        let st = AppState::fake();
        let user = register(&st, input("bob", "bob@x.com", "secret123"))
            .await
            .unwrap();
        let before = st
            .users
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;

        let err = change_password(&st, user.id, "wrong", "newpass99")
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::CurrentPasswordIncorrect));
        let after = st
            .users
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;
        assert_eq!(before, after);

        change_password(&st, user.id, "secret123", "newpass99")
            .await
            .unwrap();
        let hash = st
            .users
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;
        assert!(!verify_password("secret123", &hash));
        assert!(verify_password("newpass99", &hash));
    }

    #[tokio::test]
    async fn edit_requires_ownership_and_existing_target() {
        let st = AppState::fake();
        let alice = register(&st, input("alice", "alice@x.com", "secret123"))
            .await
            .unwrap();
        let mallory = register(&st, input("mallory", "m@x.com", "secret123"))
            .await
            .unwrap();

        let err = edit_profile(&st, mallory.id, alice.id, ProfileUpdate::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Forbidden));

        let err = edit_profile(
            &st,
            alice.id,
            Uuid::new_v4(),
            ProfileUpdate::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
    }

    #[tokio::test]
    async fn edit_without_asset_preserves_avatar() {
        let st = AppState::fake();
        let user = register(&st, input("carol", "carol@x.com", "secret123"))
            .await
            .unwrap();

        let (with_pic, warning) = edit_profile(
            &st,
            user.id,
            user.id,
            ProfileUpdate::default(),
            Some(png()),
        )
        .await
        .unwrap();
        assert!(warning.is_none());
        let key = with_pic.avatar_key.clone().expect("avatar set");

        let (updated, _) = edit_profile(
            &st,
            user.id,
            user.id,
            ProfileUpdate {
                display_name: Some("Carol".into()),
                bio: Some("hello".into()),
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Carol"));
        assert_eq!(updated.avatar_key.as_deref(), Some(key.as_str()));
    }

    #[tokio::test]
    async fn avatar_only_edit_preserves_profile_fields() {
        let st = AppState::fake();
        let user = register(
            &st,
            RegisterInput {
                display_name: Some("Frank".into()),
                bio: Some("hello".into()),
                ..input("frank", "frank@x.com", "secret123")
            },
        )
        .await
        .unwrap();

        let (updated, warning) = edit_profile(
            &st,
            user.id,
            user.id,
            ProfileUpdate::default(),
            Some(png()),
        )
        .await
        .unwrap();

        assert!(warning.is_none());
        assert!(updated.avatar_key.is_some());
        assert_eq!(updated.display_name.as_deref(), Some("Frank"));
        assert_eq!(updated.bio.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn failed_asset_store_downgrades_to_fields_only() {
        use crate::storage::StorageClient;
        use axum::async_trait;
        use std::sync::Arc;

        struct BrokenStorage;
        #[async_trait]
        impl StorageClient for BrokenStorage {
            async fn put_object(
                &self,
                _k: &str,
                _b: Bytes,
                _ct: &str,
            ) -> anyhow::Result<()> {
                anyhow::bail!("storage down")
            }
            async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
                anyhow::bail!("storage down")
            }
            async fn presign_get(&self, _k: &str, _s: u64) -> anyhow::Result<String> {
                anyhow::bail!("storage down")
            }
        }

        let base = AppState::fake();
        let st = AppState::from_parts(
            base.config.clone(),
            base.users.clone(),
            Arc::new(BrokenStorage),
            base.clock.clone(),
        );

        let user = register(&st, input("dave", "dave@x.com", "secret123"))
            .await
            .unwrap();
        let (updated, warning) = edit_profile(
            &st,
            user.id,
            user.id,
            ProfileUpdate {
                display_name: Some("Dave".into()),
                bio: None,
            },
            Some(png()),
        )
        .await
        .unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("Dave"));
        assert!(updated.avatar_key.is_none());
        assert!(warning.unwrap().contains("Unable to upload"));
    }

    #[tokio::test]
    async fn delete_missing_user_is_not_found_and_changes_nothing() {
        let st = AppState::fake();
        let user = register(&st, input("erin", "erin@x.com", "secret123"))
            .await
            .unwrap();

        let ghost = Uuid::new_v4();
        let err = delete_account(&st, ghost, ghost).await.unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
        assert!(st.users.find_by_id(user.id).await.unwrap().is_some());

        delete_account(&st, user.id, user.id).await.unwrap();
        assert!(st.users.find_by_id(user.id).await.unwrap().is_none());
        assert!(matches!(
            view(&st, user.id).await,
            Err(AccountError::NotFound)
        ));
    }
}
