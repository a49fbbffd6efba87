//! Verification challenge state.
//!
//! A challenge is the `{code, expires_at, attempts}` triple guarding one
//! email-control proof. Recovery challenges can live in two places on an
//! account row: dedicated columns, or a single-field encoding
//! `OTP:<code>:<expiryEpochMillis>` kept for schemas without the
//! dedicated columns. Both yield the same [`Challenge`] here, so flow
//! logic never branches on the storage path.

use chrono::{DateTime, Utc};

/// Wrong guesses allowed before a challenge permanently rejects.
pub const MAX_ATTEMPTS: i32 = 5;

/// Prefix of the single-field challenge encoding.
pub const FALLBACK_PREFIX: &str = "OTP";

/// One outstanding verification code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Challenge {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() > self.expires_at.timestamp_millis()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= MAX_ATTEMPTS
    }

    /// Single-field rendition of this challenge.
    pub fn encode_fallback(&self) -> String {
        format!(
            "{FALLBACK_PREFIX}:{}:{}",
            self.code,
            self.expires_at.timestamp_millis()
        )
    }

    /// Parse the single-field encoding.
    ///
    /// Three segments carry their own expiry in epoch milliseconds. The
    /// older two-segment layout stored only the code and kept the expiry
    /// in a separate column, passed here as `column_expiry`.
    pub fn parse_fallback(
        encoded: &str,
        column_expiry: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let segments: Vec<&str> = encoded.split(':').collect();
        if segments.first() != Some(&FALLBACK_PREFIX) {
            return None;
        }

        let code = segments.get(1)?.to_string();
        if code.is_empty() {
            return None;
        }

        let expires_at = match segments.get(2) {
            Some(millis) => {
                DateTime::<Utc>::from_timestamp_millis(millis.parse().ok()?)?
            },
            None => column_expiry?,
        };

        Some(Self {
            code,
            expires_at,
            // The encoding cannot carry a counter.
            attempts: 0,
        })
    }
}

/// Which storage path holds an active recovery challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPath {
    /// Dedicated columns; attempts are tracked.
    Dedicated,
    /// Single-field encoding; attempts cannot be tracked.
    Fallback,
}

/// Signup-side verification state of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignupState {
    /// Email confirmed, terminal.
    Verified,
    /// A code is outstanding.
    ChallengeIssued(Challenge),
    /// Unverified with no outstanding code.
    Unverified,
}

/// Recovery-side state of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    /// No recovery in progress.
    None,
    /// A reset code is outstanding.
    OtpIssued {
        challenge: Challenge,
        path: RecoveryPath,
    },
    /// The code was traded for a single-use reset token.
    TokenIssued { expires_at: DateTime<Utc> },
}
