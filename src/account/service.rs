//! Verification and recovery flows over the account store.

use std::sync::Arc;

use chrono::Utc;

use crate::AppState;
use crate::account::{Account, AccountRepository, normalize_email};
use crate::challenge::{RecoveryPath, RecoveryState, SignupState};
use crate::crypto::PasswordManager;
use crate::error::{AuthError, Result};
use crate::mail::{MailManager, Template};
use crate::otp;
use crate::token::TokenManager;

/// Account manager.
#[derive(Clone)]
pub struct AccountService {
    repo: AccountRepository,
    crypto: Arc<PasswordManager>,
    token: TokenManager,
    mail: MailManager,
}

impl AccountService {
    /// Create a new [`AccountService`] from shared state.
    pub fn new(state: &AppState) -> Self {
        Self {
            repo: state.accounts.clone(),
            crypto: Arc::clone(&state.crypto),
            token: state.token.clone(),
            mail: state.mail.clone(),
        }
    }

    /// Create an unverified account and send its confirmation code.
    ///
    /// A failed delivery is logged only: the account exists and the code
    /// can be re-sent.
    pub async fn register(&self, email: &str, password: &str) -> Result<Account> {
        let email = normalize_email(email);

        if self.repo.find_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateAccount.into());
        }

        let challenge = otp::generate(otp::signup_window());
        let account = Account {
            id: Account::generate_id(),
            email,
            password: self.crypto.hash_password(password)?,
            signup_code: Some(challenge.code.clone()),
            signup_expires_at: Some(challenge.expires_at),
            ..Default::default()
        };

        // The unique index on email closes the check-then-insert window.
        self.repo.insert(&account).await?;

        if !self
            .mail
            .send(&account.email, Template::SignupCode, &challenge.code)
            .await
        {
            tracing::warn!(account_id = account.id, "signup code not delivered");
        }

        Ok(account)
    }

    /// Confirm an address with its signup code.
    pub async fn verify_signup(&self, email: &str, code: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(account) = self.repo.find_by_email(&email).await? else {
            return Err(AuthError::AccountNotFound.into());
        };

        let challenge = match account.signup_state() {
            SignupState::Verified => {
                return Err(AuthError::AlreadyVerified.into());
            },
            SignupState::Unverified => {
                return Err(AuthError::NoActiveChallenge.into());
            },
            SignupState::ChallengeIssued(challenge) => challenge,
        };

        if challenge.is_expired(Utc::now()) {
            return Err(AuthError::ChallengeExpired.into());
        }
        if challenge.is_exhausted() {
            return Err(AuthError::TooManyAttempts.into());
        }
        if challenge.code != code {
            self.repo
                .bump_signup_attempts(&account.id, &challenge.code)
                .await?;
            return Err(AuthError::InvalidCode.into());
        }

        // A concurrent verify may have consumed the challenge between the
        // read and this statement; only one call flips the flag.
        if !self.repo.confirm_email(&account.id, &challenge.code).await? {
            return Err(AuthError::NoActiveChallenge.into());
        }

        tracing::info!(account_id = account.id, "email verified");

        Ok(())
    }

    /// Replace the signup challenge and notify again.
    pub async fn resend_signup(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(account) = self.repo.find_by_email(&email).await? else {
            return Err(AuthError::AccountNotFound.into());
        };
        if account.email_verified {
            return Err(AuthError::AlreadyVerified.into());
        }

        let challenge = otp::generate(otp::signup_window());
        self.repo
            .set_signup_challenge(&account.id, &challenge)
            .await?;

        if !self
            .mail
            .send(&account.email, Template::SignupCode, &challenge.code)
            .await
        {
            tracing::warn!(account_id = account.id, "signup code not delivered");
        }

        Ok(())
    }

    /// Check a credential pair and issue a bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let email = normalize_email(email);

        // A missing account and a wrong password collapse into the same
        // generic failure, no existence signal leaks here.
        let Some(account) = self.repo.find_by_email(&email).await? else {
            return Err(AuthError::InvalidCredentials.into());
        };
        if !self.crypto.verify_password(password, &account.password) {
            return Err(AuthError::InvalidCredentials.into());
        }
        if !account.email_verified {
            return Err(AuthError::EmailNotVerified.into());
        }

        Ok(self.token.create(&account.id)?)
    }

    /// Start a password reset.
    ///
    /// Deliberately silent about whether the account exists; callers get
    /// the same generic success either way.
    pub async fn request_recovery(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(account) = self.repo.find_by_email(&email).await? else {
            tracing::debug!("reset requested for unknown address");
            return Ok(());
        };

        let challenge = otp::generate(otp::recovery_window());
        self.repo
            .set_recovery_challenge(&account.id, &challenge)
            .await?;

        if !self
            .mail
            .send(&account.email, Template::RecoveryCode, &challenge.code)
            .await
        {
            tracing::warn!(account_id = account.id, "reset code not delivered");
        }

        Ok(())
    }

    /// Trade a valid recovery code for a single-use reset token.
    pub async fn verify_recovery(&self, email: &str, code: &str) -> Result<String> {
        let email = normalize_email(email);
        let Some(account) = self.repo.find_by_email(&email).await? else {
            return Err(AuthError::AccountNotFound.into());
        };
        // A reset proves control of an address, which requires the
        // address to have been confirmed as owned in the first place.
        if !account.email_verified {
            return Err(AuthError::EmailNotVerified.into());
        }

        let (challenge, path) = match account.recovery_state() {
            RecoveryState::OtpIssued { challenge, path } => (challenge, path),
            RecoveryState::TokenIssued { expires_at } => {
                tracing::debug!(
                    account_id = account.id,
                    %expires_at,
                    "challenge already traded for a reset token"
                );
                return Err(AuthError::NoActiveChallenge.into());
            },
            RecoveryState::None => {
                return Err(AuthError::NoActiveChallenge.into());
            },
        };

        if challenge.is_expired(Utc::now()) {
            return Err(AuthError::ChallengeExpired.into());
        }
        // The encoded layout has nowhere to keep a counter, so only the
        // dedicated columns enforce the attempt limit.
        if path == RecoveryPath::Dedicated && challenge.is_exhausted() {
            return Err(AuthError::TooManyAttempts.into());
        }
        if challenge.code != code {
            if path == RecoveryPath::Dedicated {
                self.repo
                    .bump_recovery_attempts(&account.id, &challenge.code)
                    .await?;
            }
            return Err(AuthError::InvalidCode.into());
        }

        if path == RecoveryPath::Fallback {
            tracing::warn!(
                account_id = account.id,
                "recovery code accepted via encoded challenge, attempts untracked"
            );
        }

        let token = otp::reset_token();
        let expires_at = Utc::now() + otp::reset_token_window();

        let minted = match path {
            RecoveryPath::Dedicated => {
                self.repo
                    .mint_reset_token(
                        &account.id,
                        &challenge.code,
                        &token,
                        expires_at,
                    )
                    .await?
            },
            RecoveryPath::Fallback => {
                // Key on the stored encoding verbatim, the legacy layout
                // does not round-trip through a re-encode.
                self.repo
                    .mint_reset_token_encoded(
                        &account.id,
                        account.legacy_token.as_deref().unwrap_or_default(),
                        &token,
                        expires_at,
                    )
                    .await?
            },
        };

        // The losing side of a concurrent verify finds the challenge
        // already cleared and never receives a token.
        if !minted {
            return Err(AuthError::NoActiveChallenge.into());
        }

        Ok(token)
    }

    /// Non-mutating pre-flight check of a reset token.
    pub async fn validate_reset_token(&self, token: &str) -> Result<bool> {
        Ok(self
            .repo
            .find_by_reset_token(token, Utc::now())
            .await?
            .is_some())
    }

    /// Spend a reset token on a password change.
    pub async fn complete_reset(
        &self,
        token: &str,
        password: &str,
        confirm: &str,
    ) -> Result<()> {
        if password != confirm {
            return Err(AuthError::PasswordMismatch.into());
        }

        let hash = self.crypto.hash_password(password)?;
        if !self
            .repo
            .consume_reset_token(token, &hash, Utc::now())
            .await?
        {
            return Err(AuthError::InvalidOrExpiredToken.into());
        }

        Ok(())
    }

    /// Change the password of an authenticated account.
    pub async fn change_password(
        &self,
        account: &Account,
        current: &str,
        password: &str,
        confirm: &str,
    ) -> Result<()> {
        if !self.crypto.verify_password(current, &account.password) {
            return Err(AuthError::InvalidCredentials.into());
        }
        if password != confirm {
            return Err(AuthError::PasswordMismatch.into());
        }

        let hash = self.crypto.hash_password(password)?;
        self.repo.update_password(&account.id, &hash).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Argon2 as ArgonConfig;
    use crate::error::ServerError;
    use sqlx::{Pool, Postgres};

    fn service(pool: Pool<Postgres>) -> AccountService {
        AccountService {
            repo: AccountRepository::with_capability(pool, true),
            crypto: Arc::new(
                PasswordManager::new(Some(ArgonConfig {
                    memory_cost: 1024,
                    iterations: 1,
                    parallelism: 1,
                    hash_length: 32,
                }))
                .unwrap(),
            ),
            token: TokenManager::new("keygate.test", "test-secret"),
            mail: MailManager::default(),
        }
    }

    fn auth_err(result: Result<impl std::fmt::Debug>) -> AuthError {
        match result {
            Err(ServerError::Auth(err)) => err,
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    async fn signup_code(pool: &Pool<Postgres>, email: &str) -> String {
        sqlx::query_scalar::<_, String>(
            "SELECT signup_code FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn registered(
        service: &AccountService,
        pool: &Pool<Postgres>,
        email: &str,
    ) -> Account {
        let account = service.register(email, "P$soW%920$n&").await.unwrap();
        let code = signup_code(pool, &account.email).await;
        service.verify_signup(email, &code).await.unwrap();
        account
    }

    #[sqlx::test]
    async fn test_register_rejects_duplicate_case_insensitively(
        pool: Pool<Postgres>,
    ) {
        let service = service(pool);
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();

        let err = auth_err(service.register(" Bob@Example.COM ", "0ther&Pwd!").await);
        assert_eq!(err, AuthError::DuplicateAccount);
    }

    #[sqlx::test]
    async fn test_verify_signup_is_case_insensitive(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@Example.com", "P$soW%920$n&").await.unwrap();

        let code = signup_code(&pool, "bob@example.com").await;
        service.verify_signup("bob@example.com", &code).await.unwrap();

        let verified = sqlx::query_scalar::<_, bool>(
            "SELECT email_verified FROM accounts WHERE email = $1",
        )
        .bind("bob@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(verified);
    }

    #[sqlx::test]
    async fn test_verify_signup_single_winner(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();
        let code = signup_code(&pool, "bob@example.com").await;

        service.verify_signup("bob@example.com", &code).await.unwrap();

        // The second identical call finds the challenge consumed.
        let err = auth_err(service.verify_signup("bob@example.com", &code).await);
        assert_eq!(err, AuthError::AlreadyVerified);
    }

    #[sqlx::test]
    async fn test_wrong_code_exhausts_after_five_attempts(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();
        let code = signup_code(&pool, "bob@example.com").await;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        for _ in 0..5 {
            let err =
                auth_err(service.verify_signup("bob@example.com", wrong).await);
            assert_eq!(err, AuthError::InvalidCode);
        }

        // Even the right code is rejected once the limit is reached.
        let err = auth_err(service.verify_signup("bob@example.com", &code).await);
        assert_eq!(err, AuthError::TooManyAttempts);
    }

    #[sqlx::test]
    async fn test_resend_resets_the_attempt_counter(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();
        let code = signup_code(&pool, "bob@example.com").await;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        for _ in 0..5 {
            let _ = service.verify_signup("bob@example.com", wrong).await;
        }
        service.resend_signup("bob@example.com").await.unwrap();

        let fresh = signup_code(&pool, "bob@example.com").await;
        service.verify_signup("bob@example.com", &fresh).await.unwrap();
    }

    #[sqlx::test]
    async fn test_expired_signup_code_rejected(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();
        let code = signup_code(&pool, "bob@example.com").await;

        sqlx::query(
            "UPDATE accounts SET signup_expires_at = NOW() - INTERVAL '1 second'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = auth_err(service.verify_signup("bob@example.com", &code).await);
        assert_eq!(err, AuthError::ChallengeExpired);
    }

    #[sqlx::test]
    async fn test_login_issues_token_only_when_verified(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();

        let err = auth_err(service.login("bob@example.com", "P$soW%920$n&").await);
        assert_eq!(err, AuthError::EmailNotVerified);

        let code = signup_code(&pool, "bob@example.com").await;
        service.verify_signup("bob@example.com", &code).await.unwrap();

        let token = service.login("Bob@Example.com", "P$soW%920$n&").await.unwrap();
        assert!(!token.is_empty());

        let err = auth_err(service.login("bob@example.com", "wrong").await);
        assert_eq!(err, AuthError::InvalidCredentials);
        let err = auth_err(service.login("nobody@example.com", "x").await);
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[sqlx::test]
    async fn test_request_recovery_never_reveals_existence(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();

        // Unknown and known addresses answer identically.
        service.request_recovery("nobody@example.com").await.unwrap();
        service.request_recovery("bob@example.com").await.unwrap();
    }

    #[sqlx::test]
    async fn test_recovery_round_trip(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        registered(&service, &pool, "bob@example.com").await;

        service.request_recovery("bob@example.com").await.unwrap();
        let code = sqlx::query_scalar::<_, String>(
            "SELECT recovery_code FROM accounts WHERE email = $1",
        )
        .bind("bob@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();

        let token = service.verify_recovery("bob@example.com", &code).await.unwrap();
        assert!(service.validate_reset_token(&token).await.unwrap());

        // The winning call cleared the challenge for everyone.
        let err = auth_err(service.verify_recovery("bob@example.com", &code).await);
        assert_eq!(err, AuthError::NoActiveChallenge);

        service
            .complete_reset(&token, "N3w&P$ssword", "N3w&P$ssword")
            .await
            .unwrap();
        service.login("bob@example.com", "N3w&P$ssword").await.unwrap();

        // Single use: the spent token no longer exists.
        let err = auth_err(
            service.complete_reset(&token, "0ther&Pwd!", "0ther&Pwd!").await,
        );
        assert_eq!(err, AuthError::InvalidOrExpiredToken);
        assert!(!service.validate_reset_token(&token).await.unwrap());
    }

    #[sqlx::test]
    async fn test_recovery_requires_verified_email(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        service.register("bob@example.com", "P$soW%920$n&").await.unwrap();
        service.request_recovery("bob@example.com").await.unwrap();

        let err = auth_err(service.verify_recovery("bob@example.com", "123456").await);
        assert_eq!(err, AuthError::EmailNotVerified);
    }

    #[sqlx::test]
    async fn test_expired_recovery_code_rejected(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        registered(&service, &pool, "alice@example.com").await;
        service.request_recovery("alice@example.com").await.unwrap();

        let code = sqlx::query_scalar::<_, String>(
            "SELECT recovery_code FROM accounts WHERE email = $1",
        )
        .bind("alice@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();

        // One second past the window.
        sqlx::query(
            r#"UPDATE accounts
                SET recovery_expires_at = NOW() - INTERVAL '1 second',
                    legacy_token = NULL"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = auth_err(service.verify_recovery("alice@example.com", &code).await);
        assert_eq!(err, AuthError::ChallengeExpired);
    }

    #[sqlx::test]
    async fn test_recovery_via_encoded_challenge(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        let account = registered(&service, &pool, "bob@example.com").await;

        // A row written by a deployment without the dedicated columns.
        let expires_ms = (Utc::now() + chrono::Duration::minutes(5))
            .timestamp_millis();
        sqlx::query("UPDATE accounts SET legacy_token = $2 WHERE id = $1")
            .bind(&account.id)
            .bind(format!("OTP:654321:{expires_ms}"))
            .execute(&pool)
            .await
            .unwrap();

        let err = auth_err(service.verify_recovery("bob@example.com", "111111").await);
        assert_eq!(err, AuthError::InvalidCode);

        let token = service
            .verify_recovery("bob@example.com", "654321")
            .await
            .unwrap();
        service
            .complete_reset(&token, "N3w&P$ssword", "N3w&P$ssword")
            .await
            .unwrap();
    }

    #[sqlx::test]
    async fn test_legacy_two_field_challenge(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        let account = registered(&service, &pool, "bob@example.com").await;

        // Oldest layout: code-only encoding, expiry in its own column.
        sqlx::query(
            r#"UPDATE accounts
                SET legacy_token = 'OTP:654321', recovery_code = NULL,
                    recovery_expires_at = NOW() + INTERVAL '5 minutes'
                WHERE id = $1"#,
        )
        .bind(&account.id)
        .execute(&pool)
        .await
        .unwrap();

        service
            .verify_recovery("bob@example.com", "654321")
            .await
            .unwrap();
    }

    #[sqlx::test]
    async fn test_reset_mismatch_leaves_hash_untouched(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        registered(&service, &pool, "bob@example.com").await;
        service.request_recovery("bob@example.com").await.unwrap();

        let code = sqlx::query_scalar::<_, String>(
            "SELECT recovery_code FROM accounts WHERE email = $1",
        )
        .bind("bob@example.com")
        .fetch_one(&pool)
        .await
        .unwrap();
        let token = service.verify_recovery("bob@example.com", &code).await.unwrap();

        let err = auth_err(service.complete_reset(&token, "abc", "xyz").await);
        assert_eq!(err, AuthError::PasswordMismatch);

        // The old credential still works.
        service.login("bob@example.com", "P$soW%920$n&").await.unwrap();
    }

    #[sqlx::test]
    async fn test_change_password_checks_current(pool: Pool<Postgres>) {
        let service = service(pool.clone());
        let account = registered(&service, &pool, "bob@example.com").await;
        let account = service
            .repo
            .find_by_id(&account.id)
            .await
            .unwrap()
            .unwrap();

        let err = auth_err(
            service
                .change_password(&account, "wrong", "N3w&P$ssword", "N3w&P$ssword")
                .await,
        );
        assert_eq!(err, AuthError::InvalidCredentials);

        let err = auth_err(
            service
                .change_password(&account, "P$soW%920$n&", "abc", "xyz")
                .await,
        );
        assert_eq!(err, AuthError::PasswordMismatch);

        service
            .change_password(&account, "P$soW%920$n&", "N3w&P$ssword", "N3w&P$ssword")
            .await
            .unwrap();
        service.login("bob@example.com", "N3w&P$ssword").await.unwrap();
    }
}
