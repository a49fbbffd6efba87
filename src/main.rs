use axum::routing::get;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 1111;

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = match keygate::initialize_state().await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot initialize state");
            return;
        },
    };

    let mut app = keygate::app(state);

    match keygate::telemetry::setup_metrics_recorder() {
        Ok(handle) => {
            app = app.route(
                "/metrics",
                get(move || std::future::ready(handle.render())),
            );
        },
        Err(err) => tracing::warn!(error = %err, "metrics recorder not installed"),
    }

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await
    {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %port, "cannot bind port");
            return;
        },
    };

    tracing::info!(%port, "server started");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped unexpectedly");
    }
}
