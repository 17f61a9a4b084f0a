use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bindery_core::batch::BatchStatus;
use bindery_events::{DerivedMetadataWorker, EventBus, PgLibraryStats};
use bindery_pipeline::{ConversionPipeline, LocalArchiveBackend, PgFileCatalog};
use bindery_worker::config::EngineConfig;
use bindery_worker::executors::{ExecutorDeps, ExecutorRegistry};
use bindery_worker::store::PgBatchStore;
use bindery_worker::{BatchOrchestrator, OrchestratorSettings, ProgressSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bindery_worker=debug,bindery_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        renaming_enabled = config.renaming_enabled,
        page_size = config.page_size,
        flush_every = config.flush_every,
        resume_on_start = config.resume_on_start,
        "Loaded engine configuration"
    );

    // --- Database ---
    let pool = bindery_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    bindery_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    bindery_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let shutdown = CancellationToken::new();

    // Spawn the derived metadata worker (library statistics).
    let derived = DerivedMetadataWorker::new(Arc::new(PgLibraryStats::new(pool.clone())));
    let derived_rx = event_bus.subscribe();
    let derived_cancel = shutdown.clone();
    let derived_handle = tokio::spawn(async move {
        derived.run(derived_rx, derived_cancel).await;
    });
    tracing::info!("Derived metadata worker started");

    // --- Orchestrator ---
    let catalog = Arc::new(PgFileCatalog::new(pool.clone()));
    let pipeline = ConversionPipeline::new(
        Arc::new(LocalArchiveBackend::new(config.unrar_bin.clone())),
        catalog.clone(),
    )
    .with_scratch_dir(config.scratch_dir.clone())
    .with_quarantine_dir(config.quarantine_dir.clone());

    let executors = ExecutorRegistry::standard(ExecutorDeps {
        pipeline: Arc::new(pipeline),
        catalog,
        trash_dir: config.trash_dir.clone(),
    });
    let orchestrator = Arc::new(
        BatchOrchestrator::new(
            Arc::new(PgBatchStore::new(pool.clone())),
            executors,
            OrchestratorSettings::from(&config),
        )
        .with_events(Arc::clone(&event_bus)),
    );

    // --- Crash recovery ---
    let recovered = orchestrator.recover_interrupted().await?;
    tracing::info!(count = recovered.len(), "Interrupted batches recovered");

    let runner_handle = config.resume_on_start.then(|| {
        let orchestrator = Arc::clone(&orchestrator);
        let bus = Arc::clone(&event_bus);
        let cancel = shutdown.clone();
        tokio::spawn(async move { resume_paused(&orchestrator, bus.as_ref(), &cancel).await })
    });

    shutdown_signal().await;

    // --- Shutdown ---
    shutdown.cancel();
    if orchestrator.request_cancellation() {
        tracing::info!("Waiting for the active batch to pause");
    }
    if let Some(handle) = runner_handle {
        let _ = handle.await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), derived_handle).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run every paused batch to its next stopping point, oldest first.
async fn resume_paused(
    orchestrator: &BatchOrchestrator,
    sink: &dyn ProgressSink,
    shutdown: &CancellationToken,
) {
    let paused = match orchestrator.list_batches(BatchStatus::Paused).await {
        Ok(paused) => paused,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list paused batches");
            return;
        }
    };

    for batch in paused {
        if shutdown.is_cancelled() {
            break;
        }
        match orchestrator.execute_batch(batch.id, Some(sink)).await {
            Ok(result) => tracing::info!(
                batch_id = result.batch_id,
                status = %result.status,
                "Resumed batch run ended"
            ),
            Err(e) => tracing::error!(batch_id = batch.id, error = %e, "Resumed batch failed"),
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), requesting cancellation"),
        () = terminate => tracing::info!("Received SIGTERM, requesting cancellation"),
    }
}
