//! Users-related HTTP API.
mod password;

use axum::extract::{Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::patch;
use axum::{Router, middleware};

use crate::error::AuthError;
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";

/// Custom middleware for authentification.
///
/// Beyond signature and expiry, the account is re-loaded on every
/// request: a deleted or never-verified account cannot use a previously
/// issued token.
async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: middleware::Next,
) -> Result<Response, ServerError> {
    let claims = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
    {
        Some(token) => {
            let token = token.replace(BEARER, "");
            state.token.decode(&token)?
        },
        None => return Err(AuthError::Unauthorized.into()),
    };

    let account = state
        .accounts
        .find_by_id(&claims.sub)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    if !account.email_verified {
        return Err(AuthError::Unauthorized.into());
    }

    req.extensions_mut().insert(account);
    Ok(next.run(req).await)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `PATCH /users/@me/password` goes to `password`. Authorization
        // required.
        .route("/@me/password", patch(password::handler))
        .route_layer(middleware::from_fn_with_state(state, auth))
}
