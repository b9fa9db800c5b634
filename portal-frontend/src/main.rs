use dotenvy::dotenv;
use portal_frontend::config::get_configuration;
use portal_frontend::services::session_store::SessionStore;
use portal_frontend::services::storage::{FileStore, MemoryStore};
use portal_frontend::services::supabase::SupabaseGateway;
use portal_frontend::startup::build_router;
use portal_frontend::AppState;
use service_core::observability::init_tracing;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let observability = &configuration.observability;
    init_tracing(
        &observability.service_name,
        &observability.log_level,
        observability.otlp_endpoint.as_deref(),
    );

    portal_frontend::services::metrics::init_metrics();

    if configuration.supabase.is_demo() {
        tracing::warn!(
            "Using demo Supabase configuration. Set APP_SUPABASE__URL and APP_SUPABASE__ANON_KEY for real deployments."
        );
    }

    let durable = FileStore::open(&configuration.storage.durable_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open durable store at {}: {}",
            configuration.storage.durable_path.display(),
            e
        )
    })?;

    let gateway = Arc::new(SupabaseGateway::new(
        configuration.supabase.clone(),
        Arc::new(durable),
        Arc::new(MemoryStore::new()),
    )?);

    let refresh_shutdown = CancellationToken::new();
    let refresh_task = configuration
        .auth
        .auto_refresh
        .then(|| gateway.clone().spawn_auto_refresh(refresh_shutdown.clone()));

    let session_store = SessionStore::start(gateway);
    let app = build_router(AppState::new(session_store.clone(), configuration.auth.clone()));

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting portal-frontend on {}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            anyhow::anyhow!("Server error: {}", e)
        })?;

    refresh_shutdown.cancel();
    if let Some(task) = refresh_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Session auto-refresh task ended abnormally");
        }
    }
    session_store.shutdown().await;

    info!("portal-frontend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
