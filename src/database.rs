//! database (db) union structure.
use axum::extract::FromRef;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::AppState;
use crate::config::Postgres;

const DEFAULT_CREDENTIALS: &str = "postgres";
const DEFAULT_DATABASE_NAME: &str = "keygate";
const DEFAULT_POOL_SIZE: u32 = 10;

/// Custom db structure to pass to Axum.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections from configuration.
    pub async fn new(config: &Postgres) -> Result<Self, sqlx::Error> {
        let hostname = &config.address;
        let username =
            config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password =
            config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let db =
            config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);

        let addr = format!("postgres://{username}:{password}@{hostname}/{db}");
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE));
        let postgres = pool.connect(&addr).await?;

        tracing::info!(%hostname, %db, "postgres connected");

        Ok(Self { postgres })
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
