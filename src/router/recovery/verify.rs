//! Trade a reset code for a single-use token.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::account::AccountService;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits."))]
    pub code: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Proof of code success, spent on one password change.
    pub token: String,
    /// Seconds before the token expires.
    pub expires_in: u64,
}

pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let token = AccountService::new(&state)
        .verify_recovery(&body.email, &body.code)
        .await?;

    Ok(Json(Response {
        token,
        expires_in: crate::otp::reset_token_window().num_seconds() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    async fn recovering_account(
        app: axum::Router,
        pool: &Pool<Postgres>,
        email: &str,
    ) -> String {
        let body = json!(router::create::Body {
            email: email.into(),
            password: "P$soW%920$n&".into(),
        });
        make_request(None, app.clone(), Method::POST, "/create", body.to_string())
            .await;

        let code = sqlx::query_scalar::<_, String>(
            "SELECT signup_code FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap();
        let body = json!(router::verify::Body {
            email: email.into(),
            code,
        });
        make_request(
            None,
            app.clone(),
            Method::POST,
            "/create/verify",
            body.to_string(),
        )
        .await;

        let body = json!(super::super::Body {
            email: email.into(),
        });
        make_request(
            None,
            app,
            Method::POST,
            "/login/recovery",
            body.to_string(),
        )
        .await;

        sqlx::query_scalar::<_, String>(
            "SELECT recovery_code FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_verify_mints_single_token(pool: Pool<Postgres>) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let code = recovering_account(app.clone(), &pool, "bob@example.com").await;

        let body = json!(Body {
            email: "bob@example.com".into(),
            code: code.clone(),
        });
        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/login/recovery/verify",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let minted: Response = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(minted.token.len(), 64);
        assert_eq!(minted.expires_in, 900);

        // Replaying the same still-valid code finds nothing to consume.
        let response = make_request(
            None,
            app,
            Method::POST,
            "/login/recovery/verify",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_attempt_limit(pool: Pool<Postgres>) {
        let state = router::state(pool.clone());
        let app = app(state.clone());

        let code = recovering_account(app.clone(), &pool, "bob@example.com").await;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        let body = json!(Body {
            email: "bob@example.com".into(),
            code: wrong.into(),
        });
        for _ in 0..5 {
            let response = make_request(
                None,
                app.clone(),
                Method::POST,
                "/login/recovery/verify",
                body.to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        // Sixth attempt with the right code is still turned away.
        let body = json!(Body {
            email: "bob@example.com".into(),
            code,
        });
        let response = make_request(
            None,
            app,
            Method::POST,
            "/login/recovery/verify",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
