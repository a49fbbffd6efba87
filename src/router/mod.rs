//! HTTP surface of the verification engine.

pub mod create;
pub mod login;
pub mod recovery;
pub mod status;
pub mod users;
pub mod verify;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ServerError;

/// JSON body extractor running `validator` rules before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

#[cfg(test)]
pub(crate) fn state(pool: sqlx::PgPool) -> crate::AppState {
    use std::sync::Arc;

    crate::AppState {
        config: Arc::new(crate::config::Configuration::default()),
        db: crate::database::Database {
            postgres: pool.clone(),
        },
        crypto: Arc::new(
            crate::crypto::PasswordManager::new(Some(crate::config::Argon2 {
                memory_cost: 1024,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            }))
            .expect("cannot build password manager"),
        ),
        token: crate::token::TokenManager::new("keygate.test", "test-secret"),
        mail: crate::mail::MailManager::default(),
        accounts: crate::account::AccountRepository::with_capability(pool, true),
    }
}
