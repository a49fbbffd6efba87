//! Authenticated password change.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::{Account, AccountService};
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    pub current_password: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub confirm: String,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(account): Extension<Account>,
    Valid(body): Valid<Body>,
) -> Result<StatusCode> {
    AccountService::new(&state)
        .change_password(
            &account,
            &body.current_password,
            &body.password,
            &body.confirm,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
