use std::sync::Arc;

use courier::api::{AppState, api_routes};
use courier::channels::{EmailAdapter, ProviderAdapter, ReqwestTransport, SmsMmsAdapter};
use courier::config::ServiceConfig;
use courier::pipeline::MessagePipeline;
use courier::store::{Database, LibSqlBackend};
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

    let config = ServiceConfig::from_env()?;

    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    tracing::info!(path = %config.db_path.display(), "Database ready");

    let transport = Arc::new(ReqwestTransport::new(config.provider_timeout));
    let sms: Arc<dyn ProviderAdapter> = Arc::new(SmsMmsAdapter::new(
        config.sms_provider.clone(),
        transport.clone(),
    ));
    let email: Arc<dyn ProviderAdapter> =
        Arc::new(EmailAdapter::new(config.email_provider.clone(), transport));

    let pipeline = MessagePipeline::new(db, sms, email, Arc::new(DefaultClock), config.retry);
    let app = api_routes(AppState {
        pipeline: Arc::new(pipeline),
        version: config.version.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(
        addr = %config.bind_addr(),
        sms_provider = %config.sms_provider.base_url,
        email_provider = %config.email_provider.base_url,
        "Messaging service started"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
