use std::collections::HashMap;

use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfilePatch, User};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Unique constraint violation; `field` is "username" or "email".
    #[error("duplicate {field}")]
    Duplicate { field: &'static str },
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Narrow persistence interface for user records. Every write of a given
/// record is atomic per call: all supplied fields apply or none do.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError>;
    async fn insert(&self, new: NewUser) -> Result<User, RepoError>;
    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<User, RepoError>;
    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), RepoError>;
    async fn set_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError>;
    async fn delete(&self, id: Uuid) -> Result<(), RepoError>;
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, bio, avatar_key, last_login_at, created_at";

pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_sqlx(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some(c) if c.contains("username") => "username",
                _ => "email",
            };
            return RepoError::Duplicate { field };
        }
    }
    RepoError::Backend(e.into())
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx)?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx)?;
        Ok(user)
    }

    async fn insert(&self, new: NewUser) -> Result<User, RepoError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, display_name, bio)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.display_name)
        .bind(&new.bio)
        .fetch_one(&self.db)
        .await
        .map_err(map_sqlx)?;
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<User, RepoError> {
        // One statement: fields absent from the patch keep their stored
        // value.
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET display_name = COALESCE($2, display_name),
                   bio = COALESCE($3, bio),
                   avatar_key = COALESCE($4, avatar_key)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.display_name)
        .bind(&patch.bio)
        .bind(&patch.avatar_key)
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx)?;
        user.ok_or(RepoError::NotFound)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), RepoError> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn set_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        let res = sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

/// In-memory repository backing `AppState::fake()` and the service tests.
/// Mirrors the Postgres uniqueness and atomic-write semantics.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert(&self, new: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.username == new.username) {
            return Err(RepoError::Duplicate { field: "username" });
        }
        if users.values().any(|u| u.email == new.email) {
            return Err(RepoError::Duplicate { field: "email" });
        }
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            display_name: new.display_name,
            bio: new.bio,
            avatar_key: None,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, patch: ProfilePatch) -> Result<User, RepoError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(name) = patch.display_name {
            user.display_name = Some(name);
        }
        if let Some(bio) = patch.bio {
            user.bio = Some(bio);
        }
        if let Some(key) = patch.avatar_key {
            user.avatar_key = Some(key);
        }
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), RepoError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.password_hash = hash.to_string();
        Ok(())
    }

    async fn set_last_login(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.last_login_at = Some(at);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let mut users = self.users.lock().await;
        users.remove(&id).map(|_| ()).ok_or(RepoError::NotFound)
    }
}
