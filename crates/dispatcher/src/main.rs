//! Tidings dispatcher binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tidings_common::config::AppConfig;
use tidings_common::db;
use tidings_notifier::FcmClient;

use tidings_dispatcher::listener::CreationListener;
use tidings_dispatcher::scheduler::ScanLoop;
use tidings_dispatcher::state::Services;

const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tidings_dispatcher=info,tidings_engine=info,tidings_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Tidings dispatcher starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database and apply migrations
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    // Push channel
    let push = Arc::new(FcmClient::from_config(&config).await?);

    let services = Services::connect(&config, pool.clone(), push).await?;
    let scan_loop = ScanLoop::new(
        services.orchestrator.clone(),
        config.scan_interval_secs,
        config.scan_timeout_secs,
    );
    let listener = CreationListener::new(pool, services.reactive.clone());

    // The scan covers anything missed while the listener is down, so listener
    // failures are retried instead of stopping the process.
    let reactive = async {
        if !config.reactive_trigger_enabled {
            tracing::info!("On-create dispatch disabled");
            return std::future::pending::<()>().await;
        }
        loop {
            if let Err(e) = listener.run().await {
                tracing::error!(error = %e, "Creation listener failed; reconnecting");
            }
            tokio::time::sleep(LISTENER_RETRY_DELAY).await;
        }
    };

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        _ = scan_loop.run() => {}
        _ = reactive => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Tidings dispatcher stopped.");
    Ok(())
}
