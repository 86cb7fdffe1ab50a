use std::collections::BTreeMap;

use axum::http::StatusCode;

use super::repo::RepoError;

/// Per-field, user-correctable validation messages.
pub type ValidationErrors = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("validation failed")]
    Validation(ValidationErrors),
    /// Uniqueness violation. Rendered to callers as a per-field validation
    /// message, never as a generic failure.
    #[error("duplicate {field}")]
    Duplicate { field: &'static str },
    /// Wrong current password on a credential change. The caller is already
    /// authenticated, so the specific wording is not an enumeration surface.
    #[error("current password is incorrect")]
    CurrentPasswordIncorrect,
    #[error("not allowed to modify this account")]
    Forbidden,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccountError::Validation(_) => StatusCode::BAD_REQUEST,
            AccountError::Duplicate { .. } => StatusCode::CONFLICT,
            AccountError::CurrentPasswordIncorrect => StatusCode::BAD_REQUEST,
            AccountError::Forbidden => StatusCode::FORBIDDEN,
            AccountError::NotFound => StatusCode::NOT_FOUND,
            AccountError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Field->message map for the response body, when the error has one.
    pub fn field_errors(&self) -> Option<ValidationErrors> {
        match self {
            AccountError::Validation(errors) => Some(errors.clone()),
            AccountError::Duplicate { field } => {
                let mut errors = ValidationErrors::new();
                errors.insert(field.to_string(), format!("This {field} is already taken."));
                Some(errors)
            }
            _ => None,
        }
    }

    pub fn field(field: &str, message: &str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.insert(field.to_string(), message.to_string());
        AccountError::Validation(errors)
    }
}

impl From<RepoError> for AccountError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Duplicate { field } => AccountError::Duplicate { field },
            RepoError::NotFound => AccountError::NotFound,
            RepoError::Backend(e) => AccountError::Internal(e),
        }
    }
}
