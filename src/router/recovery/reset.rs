//! Spend or pre-flight a reset token.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::AccountService;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Validity {
    pub valid: bool,
}

/// Handler for the mailed-link path: tells whether a token would be
/// accepted, without consuming anything.
pub async fn validate(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Validity>> {
    let valid = AccountService::new(&state)
        .validate_reset_token(&query.token)
        .await?;

    Ok(Json(Validity { valid }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    pub token: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub confirm: String,
}

/// Handler to change a password with a reset token.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<StatusCode> {
    AccountService::new(&state)
        .complete_reset(&body.token, &body.password, &body.confirm)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
