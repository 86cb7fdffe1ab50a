use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{error, instrument};

use crate::accounts::dto::{Notification, PublicUser};
use crate::state::AppState;

use super::dto::{LoginRequest, LoginResponse, RefreshRequest, TokenPairResponse};
use super::jwt::JwtKeys;
use super::services::{authenticate, SessionError, INVALID_CREDENTIALS_MSG};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
}

fn login_failure(status: StatusCode, message: &str) -> (StatusCode, Json<LoginResponse>) {
    (
        status,
        Json(LoginResponse {
            success: false,
            message: message.to_string(),
            warning: None,
            access_token: None,
            refresh_token: None,
            user: None,
        }),
    )
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<LoginResponse>)> {
    let (user, warning) = match authenticate(&state, &payload.username, &payload.password).await {
        Ok(ok) => ok,
        Err(SessionError::InvalidCredentials) => {
            return Err(login_failure(
                StatusCode::UNAUTHORIZED,
                INVALID_CREDENTIALS_MSG,
            ));
        }
        Err(SessionError::Internal(e)) => {
            error!(error = %e, "login failed");
            return Err(login_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong, try again later.",
            ));
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let tokens = keys
        .sign_access(user.id)
        .and_then(|access| keys.sign_refresh(user.id).map(|refresh| (access, refresh)));
    let (access_token, refresh_token) = match tokens {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "jwt signing failed");
            return Err(login_failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong, try again later.",
            ));
        }
    };

    Ok(Json(LoginResponse {
        success: true,
        message: "Account logged in successfully!".into(),
        warning,
        access_token: Some(access_token),
        refresh_token: Some(refresh_token),
        user: Some(PublicUser::from_user(&state, user).await),
    }))
}

/// Sessions are bearer tokens the client discards; logging out an already
/// anonymous caller is a no-op success.
#[instrument]
pub async fn logout() -> Json<Notification> {
    Json(Notification {
        success: true,
        message: "Logged out.".into(),
    })
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, (StatusCode, String)> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    // The account may have been deleted since the token was issued.
    let exists = state
        .users
        .find_by_id(claims.sub)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .is_some();
    if !exists {
        return Err((StatusCode::UNAUTHORIZED, "User not found".into()));
    }

    let access_token = keys
        .sign_access(claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let refresh_token = keys
        .sign_refresh(claims.sub)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(TokenPairResponse {
        access_token,
        refresh_token,
    }))
}
