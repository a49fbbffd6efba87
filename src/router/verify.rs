//! Signup email confirmation.

use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::AccountService;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits."))]
    pub code: String,
}

/// Handler to confirm an address with its code.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<StatusCode> {
    AccountService::new(&state)
        .verify_signup(&body.email, &body.code)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ResendBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// Handler to re-send a fresh code to an unverified address.
pub async fn resend(
    State(state): State<AppState>,
    Valid(body): Valid<ResendBody>,
) -> Result<StatusCode> {
    AccountService::new(&state).resend_signup(&body.email).await?;

    Ok(StatusCode::NO_CONTENT)
}
