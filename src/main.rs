use boardsync::config::RelayConfig;
use boardsync::routes;
use boardsync::state::RelayState;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt::init();
    if let Err(e) = dotenv {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    let config = RelayConfig::from_env();
    let app = routes::app(RelayState::new());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tracing::info!(port = config.port, "boardsync relay listening");
    axum::serve(listener, app).await
}
