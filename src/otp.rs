//! One-time code and reset-token generation.

use chrono::{Duration, Utc};
use rand::Rng;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::challenge::Challenge;

const RESET_TOKEN_BYTES: usize = 32;

/// Validity window of a signup verification code.
pub fn signup_window() -> Duration {
    Duration::minutes(10)
}

/// Validity window of a recovery verification code.
pub fn recovery_window() -> Duration {
    Duration::minutes(5)
}

/// Validity window of a minted reset token.
pub fn reset_token_window() -> Duration {
    Duration::minutes(15)
}

/// Generate a fresh 6-digit challenge expiring after `window`.
///
/// The code is drawn uniformly from `100000..=999999`, so it always has
/// six digits.
pub fn generate(window: Duration) -> Challenge {
    let code = OsRng.gen_range(100_000..=999_999u32);

    Challenge {
        code: code.to_string(),
        expires_at: Utc::now() + window,
        attempts: 0,
    }
}

/// Mint a 256-bit single-use reset token, hex-encoded.
pub fn reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_always_six_digits() {
        for _ in 0..1_000 {
            let challenge = generate(signup_window());

            assert_eq!(challenge.code.len(), 6);
            assert!(challenge.code.bytes().all(|b| b.is_ascii_digit()));

            let value: u32 = challenge.code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn test_window_applied() {
        let before = Utc::now();
        let challenge = generate(recovery_window());
        let after = Utc::now();

        assert!(challenge.expires_at >= before + recovery_window());
        assert!(challenge.expires_at <= after + recovery_window());
        assert_eq!(challenge.attempts, 0);
    }

    #[test]
    fn test_reset_token_entropy() {
        let token = reset_token();

        assert_eq!(token.len(), RESET_TOKEN_BYTES * 2);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(token, reset_token());
    }
}
