//! Sluice Worker
//!
//! Long-lived orchestrator process. Serves the job/connection API and the
//! engine completion callback, and drives execution workflows as worker
//! tasks bounded by a concurrency cap.
//!
//! # Configuration
//!
//! Environment variables (see `config.rs`):
//! - DATABASE_URL - PostgreSQL connection string
//! - JWT_SECRET - signing key for callback tokens
//! - SERVER_PORT - HTTP port (default: 8080)
//! - WORKER_ENGINE_IMAGE - migration engine image
//! - SLUICE_ENC_KEY - base64 32-byte key for connection passwords

use sluice_notify::{EmailNotifier, NotificationService, Notifier, PushNotifier};
use sluice_runtime::{Activities, DockerRunner, EngineSettings, ExecutionWorkflow};
use sluice_storage::{migrations, PostgresStorage, SecretCipher};
use sluice_worker::config::{mask_password, Config};
use sluice_worker::handlers::{router, AppState};
use sluice_worker::LoggingMailer;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_worker=info,sluice_runtime=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Sluice worker");

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        database_url = %mask_password(&config.database_url),
        port = config.server_port,
        engine_image = %config.worker.engine_image,
        "Configuration loaded"
    );

    let cipher = match SecretCipher::from_env() {
        Ok(cipher) => cipher,
        Err(e) => {
            error!(error = %e, "Failed to load encryption key");
            std::process::exit(1);
        }
    };

    let storage = match PostgresStorage::new(&config.database_url, cipher).await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(error = %e, "Failed to initialize storage");
            std::process::exit(1);
        }
    };

    if let Err(e) = migrations::run_migrations(storage.pool()).await {
        error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }
    info!("Storage initialized");

    let runner = match DockerRunner::new() {
        Ok(runner) => Arc::new(runner),
        Err(e) => {
            error!(error = %e, "Failed to connect to Docker daemon");
            std::process::exit(1);
        }
    };

    let mut sinks: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(email) = &config.email {
        sinks.push(Arc::new(EmailNotifier::new(
            Box::new(LoggingMailer::new(
                email.from.clone(),
                email.smtp_host.clone(),
                email.smtp_port,
            )),
            email.alert_recipients.clone(),
        )));
    }
    sinks.push(Arc::new(PushNotifier::new(config.push_endpoint.clone())));
    let notifier = Arc::new(NotificationService::new(storage.clone(), sinks));

    let settings = EngineSettings {
        engine_image: config.worker.engine_image.clone(),
        temp_dir: config.worker.temp_dir.clone(),
        container_cpu_limit: config.worker.container_cpu_limit,
        container_memory_limit: config.worker.container_memory_limit,
        callback_host: config.worker.callback_host.clone(),
        callback_port: config.server_port,
        jwt_secret: config.jwt_secret.as_bytes().to_vec(),
    };

    let activities = Arc::new(Activities::new(
        storage.clone(),
        storage.clone(),
        runner,
        Some(notifier.clone()),
        settings,
    ));
    let workflow = Arc::new(ExecutionWorkflow::new(activities));

    let shutdown = CancellationToken::new();
    let state = AppState {
        jobs: storage.clone(),
        connections: storage.clone(),
        notifier,
        workflow,
        jwt_secret: Arc::new(config.jwt_secret.as_bytes().to_vec()),
        workflow_permits: Arc::new(Semaphore::new(config.worker.max_concurrent_workflows)),
        shutdown: shutdown.clone(),
    };

    tokio::spawn(resume_loop(
        state.clone(),
        config.worker.poll_interval,
        shutdown.clone(),
    ));

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, address = %addr, "Failed to bind server");
            std::process::exit(1);
        }
    };

    info!(address = %addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }

    info!("Server shut down gracefully");
}

/// Periodically claim pending executions whose workflow died with a
/// previous process and resume them. Only rows older than two poll
/// intervals are candidates, so freshly scheduled runs stay with the
/// workflow that minted them.
async fn resume_loop(state: AppState, poll_interval: Duration, shutdown: CancellationToken) {
    let staleness_secs = (poll_interval.as_secs() * 2).max(60) as i64;
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        loop {
            match state.jobs.claim_stale_pending_execution(staleness_secs).await {
                Ok(Some(execution)) => {
                    info!(
                        execution_id = %execution.id,
                        tenant_id = %execution.tenant_id,
                        "Resuming orphaned execution"
                    );
                    state.spawn_workflow(sluice_runtime::ExecutionParams {
                        tenant_id: execution.tenant_id.as_str().into(),
                        execution_id: execution.id,
                        job_definition_id: execution.job_definition_id,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to scan for orphaned executions");
                    break;
                }
            }
        }
    }
}

/// Wait for SIGTERM or Ctrl-C, then cancel running workflows.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }

    shutdown.cancel();
}
