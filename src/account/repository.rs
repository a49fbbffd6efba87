//! Handle database requests.
//!
//! Every read-check-then-write sequence on challenge fields goes through
//! a conditional UPDATE keyed on the pre-read value, with the affected
//! row count checked, so concurrent calls on the same account cannot
//! both win.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::account::Account;
use crate::challenge::Challenge;
use crate::error::{AuthError, Result, ServerError};

const ACCOUNT_COLUMNS: &str = "id, email, password, email_verified, \
     signup_code, signup_expires_at, signup_attempts, \
     recovery_code, recovery_expires_at, recovery_attempts, \
     legacy_token, reset_token, reset_expires_at, created_at";

#[derive(Clone)]
pub struct AccountRepository {
    pool: Pool<Postgres>,
    /// Whether the schema carries the dedicated recovery columns.
    dedicated_recovery: bool,
}

impl AccountRepository {
    /// Create a new [`AccountRepository`], probing the live schema for
    /// the dedicated recovery columns.
    pub async fn detect(pool: Pool<Postgres>) -> Self {
        let dedicated_recovery = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM information_schema.columns
                WHERE table_name = 'accounts' AND column_name = 'recovery_code'"#,
        )
        .fetch_one(&pool)
        .await
        .map(|count| count > 0)
        .unwrap_or(false);

        if !dedicated_recovery {
            tracing::warn!(
                "schema lacks dedicated recovery columns, challenges \
                 will use the encoded fallback"
            );
        }

        Self {
            pool,
            dedicated_recovery,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_capability(
        pool: Pool<Postgres>,
        dedicated_recovery: bool,
    ) -> Self {
        Self {
            pool,
            dedicated_recovery,
        }
    }

    /// Insert [`Account`] into database.
    pub async fn insert(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO accounts
                (id, email, password, email_verified,
                 signup_code, signup_expires_at, signup_attempts)
                VALUES ($1, $2, $3, FALSE, $4, $5, 0)"#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.password)
        .bind(&account.signup_code)
        .bind(account.signup_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServerError::Auth(AuthError::DuplicateAccount)
            },
            _ => err.into(),
        })?;

        Ok(())
    }

    /// Find an account using its normalized `email` field.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Find an account using its `id` field.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Find the account holding an unexpired reset token.
    pub async fn find_by_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE reset_token = $1 AND reset_expires_at > $2"
        );

        Ok(sqlx::query_as::<_, Account>(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Overwrite the signup challenge, resetting the attempt counter.
    pub async fn set_signup_challenge(
        &self,
        id: &str,
        challenge: &Challenge,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts
                SET signup_code = $2, signup_expires_at = $3, signup_attempts = 0
                WHERE id = $1"#,
        )
        .bind(id)
        .bind(&challenge.code)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count one wrong signup guess against the still-current challenge.
    pub async fn bump_signup_attempts(
        &self,
        id: &str,
        code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts SET signup_attempts = signup_attempts + 1
                WHERE id = $1 AND signup_code = $2"#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip `email_verified` and clear the challenge in one statement.
    ///
    /// Returns false when another call already consumed the challenge.
    pub async fn confirm_email(&self, id: &str, code: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE accounts
                SET email_verified = TRUE, signup_code = NULL,
                    signup_expires_at = NULL, signup_attempts = 0
                WHERE id = $1 AND signup_code = $2 AND email_verified = FALSE"#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Overwrite the recovery challenge.
    ///
    /// Writes the dedicated columns when the schema has them, and always
    /// best-effort writes the encoded form for schemas that read the
    /// single-field layout. At least one representation must land.
    pub async fn set_recovery_challenge(
        &self,
        id: &str,
        challenge: &Challenge,
    ) -> Result<()> {
        let mut stored = false;

        if self.dedicated_recovery {
            let write = sqlx::query(
                r#"UPDATE accounts
                    SET recovery_code = $2, recovery_expires_at = $3,
                        recovery_attempts = 0
                    WHERE id = $1"#,
            )
            .bind(id)
            .bind(&challenge.code)
            .bind(challenge.expires_at)
            .execute(&self.pool)
            .await;

            match write {
                Ok(_) => stored = true,
                Err(err) => tracing::warn!(
                    error = %err,
                    "dedicated recovery columns rejected write, falling back"
                ),
            }
        }

        let write = sqlx::query(
            r#"UPDATE accounts SET legacy_token = $2 WHERE id = $1"#,
        )
        .bind(id)
        .bind(challenge.encode_fallback())
        .execute(&self.pool)
        .await;

        match write {
            Ok(_) => Ok(()),
            Err(err) if stored => {
                tracing::warn!(error = %err, "encoded challenge write failed");
                Ok(())
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Count one wrong recovery guess against the still-current challenge.
    pub async fn bump_recovery_attempts(
        &self,
        id: &str,
        code: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE accounts SET recovery_attempts = recovery_attempts + 1
                WHERE id = $1 AND recovery_code = $2"#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Trade a matched recovery code for a reset token, clearing both
    /// challenge representations in the same statement.
    ///
    /// Returns false when the challenge was already consumed, so a
    /// concurrent call can never mint a second token.
    pub async fn mint_reset_token(
        &self,
        id: &str,
        expected_code: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE accounts
                SET recovery_code = NULL, recovery_expires_at = NULL,
                    recovery_attempts = 0, legacy_token = NULL,
                    reset_token = $3, reset_expires_at = $4
                WHERE id = $1 AND recovery_code = $2"#,
        )
        .bind(id)
        .bind(expected_code)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fallback-path variant of [`Self::mint_reset_token`], keyed on the
    /// raw encoded challenge.
    pub async fn mint_reset_token_encoded(
        &self,
        id: &str,
        expected_encoding: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE accounts
                SET recovery_code = NULL, recovery_expires_at = NULL,
                    recovery_attempts = 0, legacy_token = NULL,
                    reset_token = $3, reset_expires_at = $4
                WHERE id = $1 AND legacy_token = $2 AND recovery_code IS NULL"#,
        )
        .bind(id)
        .bind(expected_encoding)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Write the new password hash and clear the reset token in one
    /// statement. Returns false when no row holds the unexpired token,
    /// which also covers a token already spent.
    pub async fn consume_reset_token(
        &self,
        token: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE accounts
                SET password = $2, reset_token = NULL, reset_expires_at = NULL
                WHERE reset_token = $1 AND reset_expires_at > $3"#,
        )
        .bind(token)
        .bind(password)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Overwrite the password hash of an authenticated account.
    pub async fn update_password(&self, id: &str, password: &str) -> Result<()> {
        sqlx::query(r#"UPDATE accounts SET password = $2 WHERE id = $1"#)
            .bind(id)
            .bind(password)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
