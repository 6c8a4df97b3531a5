use std::sync::Arc;

use courier::config::SimulatorConfig;
use courier::simulator::{SimulatorState, email_routes};
use mockable::DefaultClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SimulatorConfig::from_env("EMAIL_PROVIDER_API_KEY", 8002)?;
    let state = Arc::new(SimulatorState::new("email", &config, Arc::new(DefaultClock)));

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(
        addr = %config.bind_addr(),
        webhook = %config.webhook_url,
        replies = config.simulate_replies,
        cache_size = config.cache_size,
        "Email simulator started"
    );
    axum::serve(listener, email_routes(state)).await?;

    Ok(())
}
