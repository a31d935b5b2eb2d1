use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use box_office::{
    config::{Config, LogFormat},
    router,
    services::cleanup::ExpirySweeper,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting box office ({})", config.app.environment);

    let app_state = AppState::build(&config).await?;

    // --- Background tasks ---

    // Settle abandoned purchases and drop lapsed holds
    ExpirySweeper::new(
        app_state.coordinator.clone(),
        app_state.store.clone(),
        config.reservation.settled_retention,
    )
    .spawn(config.reservation.sweep_interval);

    // --- Web server ---

    let app = router(app_state);
    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
