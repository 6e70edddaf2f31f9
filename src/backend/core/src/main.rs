//! Monitra Server - Main entry point
//!
//! Runs the scheduler, the check worker pool and the notification dispatcher
//! until SIGINT/SIGTERM.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use monitra_core::{
    checks::CheckHandler,
    clock::{SharedClock, SystemClock},
    config::Config,
    jobs::{CheckScheduler, JobWorker, RetryPolicy, WorkerConfig, CHECK_QUEUE, NOTIFICATION_QUEUE},
    notifications::{transport_from_config, NotificationHandler},
    probe::ProbeExecutor,
    service::Backends,
    telemetry,
};

#[derive(Parser)]
#[command(name = "monitra-server", version, about = "Monitra check scheduler and workers")]
struct Args {
    /// Configuration file, layered under MONITRA__* environment variables
    #[arg(short, long, env = "MONITRA_CONFIG")]
    config: Option<String>,

    /// Run without PostgreSQL and Redis; state is lost on exit
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    let telemetry = telemetry::init_telemetry(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        in_memory = args.in_memory,
        "Starting Monitra Server"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let backends = if args.in_memory {
        tracing::warn!("Running with in-memory store and queues");
        Backends::in_memory(clock.clone())
    } else {
        Backends::connect(&config, clock.clone()).await?
    };

    let check_queue = backends.queue(CHECK_QUEUE);
    let notification_queue = backends.queue(NOTIFICATION_QUEUE);

    // Rebuild every timer from persisted endpoints before anything fires.
    let scheduler = Arc::new(CheckScheduler::new(check_queue.clone(), clock.clone()));
    let active = backends.store.list_active_endpoints().await?;
    let report = scheduler.reconcile(&active).await?;
    tracing::info!(scheduled = scheduler.len(), added = report.added, "Initial schedule built");

    let check_handler = CheckHandler::new(
        backends.store.clone(),
        ProbeExecutor::new(&config.probe)?,
        notification_queue.clone(),
        clock.clone(),
    )
    .notify_on_first_check(config.notifications.notify_on_first_check)
    .with_retry_policy(RetryPolicy::with_retries(config.worker.max_attempts));

    let notification_handler = NotificationHandler::new(
        transport_from_config(&config.notifications, &config.probe)?,
        config.notifications.from_address.clone(),
    )?;

    let check_worker = JobWorker::new(WorkerConfig::for_checks(&config.worker))
        .start(check_queue, Arc::new(check_handler));
    let notification_worker = JobWorker::new(WorkerConfig::for_notifications(
        &config.worker,
        &config.notifications,
    ))
    .start(notification_queue, Arc::new(notification_handler));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.clone().run(
        backends.store.clone(),
        config.scheduler.clone(),
        shutdown_rx,
    ));

    shutdown_signal().await;

    // Stop producing first, then drain the consumers.
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task panicked");
    }
    check_worker.stop().await;
    notification_worker.stop().await;

    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
