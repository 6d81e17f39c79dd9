//! Entry point: load config, wire dependencies, and run the server.

use std::sync::Arc;

use chathub::auth::JwtSecret;
use chathub::config::Config;
use chathub::db;
use chathub::services::PgChatMembership;
use chathub::{create_app, AppState, Hub};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = db::create_pool(&config.database_url).await?;
    let membership = Arc::new(PgChatMembership::new(db_pool));
    let tokens = Arc::new(JwtSecret::new(config.auth_token_secret.clone()));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (hub, runner) = Hub::new();
    let hub_task = tokio::spawn(runner.run(async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    }));

    let state = AppState::new(hub, tokens, membership, config.connection);
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    hub_task.await?;
    Ok(())
}
