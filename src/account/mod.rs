mod repository;
mod service;

pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::challenge::{Challenge, RecoveryPath, RecoveryState, SignupState};

const ID_BYTES: usize = 16;

/// Lower-cased, trimmed form of an address, the unique account key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
pub struct Account {
    pub id: String,
    #[serde(skip)]
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub email_verified: bool,
    #[serde(skip)]
    pub signup_code: Option<String>,
    #[serde(skip)]
    pub signup_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub signup_attempts: i32,
    #[serde(skip)]
    pub recovery_code: Option<String>,
    #[serde(skip)]
    pub recovery_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub recovery_attempts: i32,
    #[serde(skip)]
    pub legacy_token: Option<String>,
    #[serde(skip)]
    pub reset_token: Option<String>,
    #[serde(skip)]
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: chrono::NaiveDate,
}

impl Account {
    /// Opaque identifier for a new account.
    pub fn generate_id() -> String {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Signup-side state, resolved from the challenge columns.
    pub fn signup_state(&self) -> SignupState {
        if self.email_verified {
            return SignupState::Verified;
        }

        match (&self.signup_code, self.signup_expires_at) {
            (Some(code), Some(expires_at)) if !code.is_empty() => {
                SignupState::ChallengeIssued(Challenge {
                    code: code.clone(),
                    expires_at,
                    attempts: self.signup_attempts,
                })
            },
            _ => SignupState::Unverified,
        }
    }

    /// Recovery-side state.
    ///
    /// The dedicated columns win; the single-field encoding is only
    /// consulted when they are empty, so both storage paths resolve to
    /// one state.
    pub fn recovery_state(&self) -> RecoveryState {
        match (&self.recovery_code, self.recovery_expires_at) {
            (Some(code), Some(expires_at)) if !code.is_empty() => {
                return RecoveryState::OtpIssued {
                    challenge: Challenge {
                        code: code.clone(),
                        expires_at,
                        attempts: self.recovery_attempts,
                    },
                    path: RecoveryPath::Dedicated,
                };
            },
            _ => {},
        }

        if let Some(challenge) = self
            .legacy_token
            .as_deref()
            .and_then(|t| Challenge::parse_fallback(t, self.recovery_expires_at))
        {
            return RecoveryState::OtpIssued {
                challenge,
                path: RecoveryPath::Fallback,
            };
        }

        match (&self.reset_token, self.reset_expires_at) {
            (Some(token), Some(expires_at)) if !token.is_empty() => {
                RecoveryState::TokenIssued { expires_at }
            },
            _ => RecoveryState::None,
        }
    }
}
