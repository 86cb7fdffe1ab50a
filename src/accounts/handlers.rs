use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use bytes::Bytes;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::avatars::services::UploadItem;
use crate::sessions::jwt::AuthUser;
use crate::state::AppState;

use super::dto::{
    ChangePasswordRequest, ChangePasswordResponse, EditResponse, Notification, PublicUser,
    RegisterRequest, RegisterResponse,
};
use super::error::AccountError;
use super::services::{self, ProfileUpdate, RegisterInput};

pub fn register_routes() -> Router<AppState> {
    Router::new().route("/auth/register", post(register))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(view_user))
        .route("/users/:id", put(edit_user))
        .route("/users/:id", delete(delete_user))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/me/password", post(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), (StatusCode, Json<RegisterResponse>)> {
    let input = RegisterInput {
        username: payload.username,
        email: payload.email,
        password: payload.password,
        display_name: payload.display_name,
        bio: payload.bio,
    };

    match services::register(&state, input).await {
        Ok(user) => Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                success: true,
                message: "Account created successfully!".into(),
                errors: None,
                user: Some(PublicUser::from_user(&state, user).await),
            }),
        )),
        Err(e) => {
            if let AccountError::Internal(ref cause) = e {
                error!(error = %cause, "register failed");
            }
            // The original surface reports registration problems as a flat
            // list of messages.
            let errors = e
                .field_errors()
                .map(|map| map.into_values().collect::<Vec<_>>());
            Err((
                e.status(),
                Json(RegisterResponse {
                    success: false,
                    message: "Account could not be created.".into(),
                    errors,
                    user: None,
                }),
            ))
        }
    }
}

#[instrument(skip(state))]
pub async fn view_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, (StatusCode, Json<Notification>)> {
    match services::view(&state, id).await {
        Ok(user) => Ok(Json(PublicUser::from_user(&state, user).await)),
        Err(e) => {
            if let AccountError::Internal(ref cause) = e {
                error!(error = %cause, %id, "view_user failed");
            }
            Err((
                e.status(),
                Json(Notification {
                    success: false,
                    message: "Invalid user".into(),
                }),
            ))
        }
    }
}

fn edit_failure(e: AccountError) -> (StatusCode, Json<EditResponse>) {
    if let AccountError::Internal(ref cause) = e {
        error!(error = %cause, "edit_user failed");
    }
    let message = match &e {
        AccountError::NotFound => "Invalid user".to_string(),
        AccountError::Forbidden => "You may only edit your own profile.".to_string(),
        _ => "The user could not be saved. Please, try again.".to_string(),
    };
    (
        e.status(),
        Json(EditResponse {
            success: false,
            message,
            warning: None,
            errors: e.field_errors(),
            user: None,
        }),
    )
}

/// PUT /users/:id — multipart form: `display_name`, `bio`, optional
/// `avatar` file. Unknown parts are rejected rather than ignored.
#[instrument(skip(state, mp))]
pub async fn edit_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    mut mp: Multipart,
) -> Result<Json<EditResponse>, (StatusCode, Json<EditResponse>)> {
    let mut update = ProfileUpdate::default();
    let mut avatar: Option<UploadItem> = None;

    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // A truncated or malformed body must reject the whole edit, not
            // apply whatever parsed before the stream broke.
            Err(e) => {
                return Err(edit_failure(AccountError::field("body", &e.to_string())));
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "display_name" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| edit_failure(AccountError::field("display_name", &e.to_string())))?;
                update.display_name = Some(text);
            }
            "bio" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| edit_failure(AccountError::field("bio", &e.to_string())))?;
                update.bio = Some(text);
            }
            "avatar" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data: Bytes = field
                    .bytes()
                    .await
                    .map_err(|e| edit_failure(AccountError::field("avatar", &e.to_string())))?;
                // A file input submitted without a file arrives as an empty
                // part; that means "keep the current picture".
                if !data.is_empty() {
                    avatar = Some(UploadItem {
                        body: data,
                        content_type,
                    });
                }
            }
            other => {
                return Err(edit_failure(AccountError::field(
                    other,
                    "Unknown field.",
                )));
            }
        }
    }

    let (user, warning) = services::edit_profile(&state, actor, id, update, avatar)
        .await
        .map_err(edit_failure)?;

    Ok(Json(EditResponse {
        success: true,
        message: "The user has been saved.".into(),
        warning,
        errors: None,
        user: Some(PublicUser::from_user(&state, user).await),
    }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, (StatusCode, Json<Notification>)> {
    match services::delete_account(&state, actor, id).await {
        Ok(()) => Ok(Json(Notification {
            success: true,
            message: "The user has been deleted.".into(),
        })),
        Err(e) => {
            if let AccountError::Internal(ref cause) = e {
                error!(error = %cause, %id, "delete_user failed");
            }
            let message = match &e {
                AccountError::NotFound => "Invalid user".to_string(),
                AccountError::Forbidden => "You may only delete your own account.".to_string(),
                _ => "The user could not be deleted. Please, try again.".to_string(),
            };
            Err((
                e.status(),
                Json(Notification {
                    success: false,
                    message,
                }),
            ))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, (StatusCode, Json<ChangePasswordResponse>)> {
    match services::change_password(
        &state,
        actor,
        &payload.current_password,
        &payload.new_password,
    )
    .await
    {
        Ok(()) => Ok(Json(ChangePasswordResponse {
            status: "success",
            message: "Password updated successfully".into(),
        })),
        Err(e) => {
            if let AccountError::Internal(ref cause) = e {
                error!(error = %cause, "change_password failed");
            }
            let message = match &e {
                AccountError::NotFound => "User not found".to_string(),
                AccountError::CurrentPasswordIncorrect => {
                    "Current password is incorrect".to_string()
                }
                AccountError::Validation(map) => map
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => "Password could not be updated.".to_string(),
            };
            Err((
                e.status(),
                Json(ChangePasswordResponse {
                    status: "error",
                    message,
                }),
            ))
        }
    }
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, Json<Notification>)> {
    match services::view(&state, user_id).await {
        Ok(user) => Ok(Json(PublicUser::from_user(&state, user).await)),
        Err(AccountError::Internal(cause)) => {
            error!(error = %cause, %user_id, "get_me failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Notification {
                    success: false,
                    message: "Something went wrong, try again later.".into(),
                }),
            ))
        }
        Err(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(Notification {
                success: false,
                message: "User not found".into(),
            }),
        )),
    }
}
