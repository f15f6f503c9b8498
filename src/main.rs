use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kayak_deal_engine::api;
use kayak_deal_engine::config::Config;
use kayak_deal_engine::service::Service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "kayak_deal_engine=info,tower_http=warn".into()),
        )
        .init();

    let config = Config::from_env()?;
    let port = config.port;

    let service = Arc::new(Service::new(config)?);
    service.spawn_background_tasks();

    let app = api::router(service.clone())
        .layer(axum::middleware::from_fn(kayak_deal_engine::middleware::request_logging))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "kayak deal engine listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(service))
    .await?;

    Ok(())
}

async fn shutdown_signal(service: Arc<Service>) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl+c handler");
    tracing::info!("shutdown signal received");
    service.shutdown();
}
