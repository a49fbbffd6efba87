//! Error handler for keygate.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Business-rule failures of the verification engine.
///
/// Every variant maps to a stable machine-readable kind so callers can
/// branch without string-matching messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("an account with this email already exists")]
    DuplicateAccount,
    #[error("no account matches this email")]
    AccountNotFound,
    #[error("email address is already verified")]
    AlreadyVerified,
    #[error("email address has not been verified")]
    EmailNotVerified,
    #[error("verification code expired, request a new one")]
    ChallengeExpired,
    #[error("too many wrong attempts, request a new code")]
    TooManyAttempts,
    #[error("wrong verification code")]
    InvalidCode,
    #[error("no verification code is pending")]
    NoActiveChallenge,
    #[error("reset token is invalid or expired")]
    InvalidOrExpiredToken,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token is invalid")]
    TokenInvalid,
    #[error("authorization required")]
    Unauthorized,
}

impl AuthError {
    /// Stable kind identifier, exposed as `type` on error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateAccount => "duplicate_account",
            Self::AccountNotFound => "account_not_found",
            Self::AlreadyVerified => "already_verified",
            Self::EmailNotVerified => "email_not_verified",
            Self::ChallengeExpired => "challenge_expired",
            Self::TooManyAttempts => "too_many_attempts",
            Self::InvalidCode => "invalid_code",
            Self::NoActiveChallenge => "no_active_challenge",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::PasswordMismatch => "password_mismatch",
            Self::InvalidCredentials => "invalid_credentials",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid => "token_invalid",
            Self::Unauthorized => "unauthorized",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::DuplicateAccount | Self::AlreadyVerified => StatusCode::CONFLICT,
            Self::AccountNotFound => StatusCode::NOT_FOUND,
            Self::EmailNotVerified => StatusCode::FORBIDDEN,
            Self::ChallengeExpired => StatusCode::GONE,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidCode
            | Self::NoActiveChallenge
            | Self::InvalidOrExpiredToken
            | Self::PasswordMismatch => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("password hashing failed: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("invalid amqp scheme")]
    InvalidScheme,

    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal server error, {details}")]
    Internal { details: String },
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Set the machine-readable error kind.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response
                .title("There were validation errors with your request.")
                .errors(validation_errors),

            ServerError::Auth(err) => response
                .title("Request was rejected.")
                .kind(err.kind())
                .status(err.status()),

            ServerError::Axum(err) => response.details(&err.to_string()),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "account store unavailable");
                ResponseError::default()
            },

            ServerError::Internal { details } => {
                tracing::error!(%details, "server returned 500 status");
                ResponseError::default()
            },

            err => {
                tracing::error!(error = %err, "server returned 500 status");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
