use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use paloa_backend::{
    app,
    config::Config,
    jobs,
    models::AppState,
    store::{FileSnapshotBackend, VideoStore},
    system_info,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "paloa_backend={},tower_http=debug",
            config.logging.log_level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Open the library
    let store = if config.store.persist {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        VideoStore::open(
            Box::new(FileSnapshotBackend::new(&config.data_dir)),
            config.store.namespace.clone(),
        )
    } else {
        VideoStore::in_memory(config.store.namespace.clone())
    };
    let store = Arc::new(store);

    system_info::print_startup_info(&config, store.len());

    let _store_log = store.subscribe(|event| debug!("[store] {:?}", event));

    let app_state = Arc::new(AppState::new(store, config.clone()));
    jobs::start_reaper_task(
        app_state.jobs.clone(),
        app_state.conversations.clone(),
        &config.limits,
    );

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Server listening on {}", addr);

    axum::serve(listener, app(app_state)).await?;

    Ok(())
}
