//! Keygate proves control of an email address and guards password
//! changes behind one-time codes and short-lived tokens.

#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
mod account;
mod challenge;
mod crypto;
mod database;
pub mod error;
mod mail;
mod otp;
mod router;
pub mod telemetry;
mod token;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    auth: Option<(&AppState, &str)>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let token = match auth {
        Some((state, account_id)) => state
            .token
            .create(account_id)
            .expect("cannot create bearer token"),
        None => String::default(),
    };

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, token)
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::PasswordManager>,
    pub token: token::TokenManager,
    pub mail: mail::MailManager,
    pub accounts: account::AccountRepository,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let create_router = Router::new()
        // `POST /create` goes to `create`.
        .route("/", post(router::create::handler))
        // `POST /create/verify` confirms the mailed code.
        .route("/verify", post(router::verify::handler))
        // `POST /create/resend` re-issues the code.
        .route("/resend", post(router::verify::resend));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .nest("/create", create_router)
        // Reset flow, never needs a prior session.
        .nest("/login/recovery", router::recovery::router())
        .nest("/users", router::users::router(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.postgres {
        Some(ref config) => database::Database::new(config).await?,
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let crypto =
        Arc::new(crypto::PasswordManager::new(config.argon2.clone())?);

    // handle bearer tokens.
    let Some(token_config) = &config.token else {
        tracing::warn!("missing `token` entry on `config.yaml` file");
        std::process::exit(0);
    };
    let mut token = token::TokenManager::new(&config.url, &token_config.secret);
    if let Some(audience) = &token_config.audience {
        token.audience(audience);
    }

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        mail::MailManager::new(cfg).await?
    } else {
        mail::MailManager::default()
    };

    // probe the schema once for the recovery storage path.
    let accounts = account::AccountRepository::detect(db.postgres.clone()).await;

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        accounts,
    })
}
