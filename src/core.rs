use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::auth::{AuthState, TokenKeys};
use crate::automation::{self, BrowserExecutor, Pause};
use crate::config::AppConfig;
use crate::jobs::JobQueue;
use crate::server::{self, AppState};
use crate::state::{self, UserStore};
use crate::trigger::TriggerStore;

/// Start the HTTP API and the job worker; return after Ctrl+C.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    // 1. State store
    let pool = state::open_pool(&config.state.db_path).await?;
    info!("State store initialized ({})", config.state.db_path);

    // 2. Auth
    let secret = config.auth.resolve_secret()?;
    let auth_state = AuthState {
        users: UserStore::new(pool.clone()),
        keys: Arc::new(TokenKeys::new(&secret, config.auth.token_expire_minutes)),
        bcrypt_cost: config.auth.bcrypt_cost,
    };

    // 3. Job worker
    let hold = Pause::For(Duration::from_secs(config.automation.hold_open_secs));
    let executor = Arc::new(BrowserExecutor::new(Arc::clone(&config), hold));
    let (jobs, worker) = JobQueue::start(executor, &config.jobs);
    info!(
        capacity = config.jobs.queue_capacity,
        "Job worker started"
    );

    // 4. HTTP API
    let triggers = Arc::new(TriggerStore::new(&config.trigger.path));
    info!(path = %triggers.path().display(), "Trigger file location");
    let app_state = AppState {
        config: Arc::clone(&config),
        triggers,
        jobs,
    };
    let app = server::build_router(app_state, auth_state)?;

    info!("Starting chartpilot v{}", env!("CARGO_PKG_VERSION"));
    let result = server::serve(app, &config.server.bind, config.server.port, shutdown_signal()).await;

    // Every job sender went away with the router; the worker drains what
    // is already queued and stops.
    if let Err(e) = worker.await {
        warn!("Job worker ended abnormally: {}", e);
    }
    pool.close().await;
    info!("Shutdown complete");
    result
}

/// One run from the trigger file, holding the browser until Enter.
pub async fn run_once(config: AppConfig) -> anyhow::Result<()> {
    match automation::run_from_trigger_file(&config, Pause::UntilEnter).await {
        Ok(summary) => {
            for failure in &summary.step_failures {
                warn!("Step failed: {}", failure);
            }
            info!(
                symbol = %summary.symbol,
                timeframe = %summary.timeframe,
                trendline = summary.trendline_drawn,
                "Run finished"
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            Err(e)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
