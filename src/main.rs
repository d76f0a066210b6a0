use anyhow::Result;
use deposit_monitor::{
    config::Config,
    handlers::{router, AppState},
    services::*,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting deposit-monitor v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Initialize services
    let redis = match config.redis_url.as_deref() {
        Some(url) => connect_redis(url).await,
        None => None,
    };
    let store = open_store(redis.clone());
    let ledger = Arc::new(Ledger::new(redis));
    let oracle = Arc::new(BalanceOracle::from_config(&config)?);
    let rates = Arc::new(RateService::from_config(&config));

    let monitor = Arc::new(PaymentMonitor::new(
        store.clone(),
        oracle.clone(),
        ledger.clone(),
        config.poll_interval,
    ));
    let payments = Arc::new(PaymentService::new(
        store,
        rates,
        monitor.clone(),
        config.payment_ttl,
    ));
    payments.resume_pending().await?;

    let app_state = AppState {
        payments,
        ledger,
        oracle,
        started_at: Instant::now(),
    };

    // Build router
    let app = router(app_state, config.admin_api_keys.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.shutdown();
    tracing::info!("Monitors stopped; pending payments resume on next start");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
