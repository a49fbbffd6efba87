//! Manage bearer tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Fixed token lifetime, in seconds. Logout is client-side discard, no
/// server-side revocation list exists.
pub const EXPIRATION_TIME: u64 = 60 * 60 * 24 * 7; // 7 days.

/// Pieces of information asserted on a token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the token is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the token must not
    /// be accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the token was issued.
    pub iat: u64,
    /// Identifies the instance that issued the token.
    pub iss: String,
    /// Account ID.
    pub sub: String,
}

/// Manage signed bearer tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    name: String,
    audience: String,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance.
    pub fn new(name: &str, secret: &str) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            name: name.to_owned(),
            audience: name.to_owned(),
        }
    }

    /// Set `audience` field on tokens.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Create a new signed token for an account.
    pub fn create(&self, account_id: &str) -> Result<String, AuthError> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::TokenInvalid)?
            .as_secs();
        let header = Header::new(self.algorithm);
        let claims = Claims {
            aud: self.audience.clone(),
            exp: time + EXPIRATION_TIME,
            iat: time,
            iss: self.name.clone(),
            sub: account_id.to_owned(),
        };

        encode(&header, &claims, &self.encoding_key)
            .map_err(|_| AuthError::TokenInvalid)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AuthError::TokenExpired
                },
                _ => AuthError::TokenInvalid,
            })
    }
}
