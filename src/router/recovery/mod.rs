//! Password recovery HTTP API.

pub mod reset;
pub mod verify;

use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::AccountService;
use crate::error::Result;
use crate::router::Valid;

/// Returned for every reset request, existing account or not.
const GENERIC_MESSAGE: &str = "If this account exists, a code was sent.";

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /login/recovery` starts a reset.
        .route("/", post(request))
        // `POST /login/recovery/verify` trades the code for a token.
        .route("/verify", post(verify::handler))
        // `GET /login/recovery/token` pre-flight checks a mailed token.
        .route("/token", get(reset::validate))
        // `POST /login/recovery/reset` spends the token.
        .route("/reset", post(reset::handler))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: String,
}

/// Handler to start a password reset.
///
/// The response never tells whether the account exists.
async fn request(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    AccountService::new(&state).request_recovery(&body.email).await?;

    Ok(Json(Response {
        message: GENERIC_MESSAGE.to_owned(),
    }))
}
