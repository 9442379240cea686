use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crackhash_core::{
    create_connector, load_config, validate_config, BrokerBackend, JobOrchestrator, JobStore,
    Role, SqliteJobStore, TaskExecutor, Transport,
};
use crackhash_server::{api::create_router, state::AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("CRACKHASH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    // Compute config fingerprint
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = config_hash[..16].to_string();

    info!("Configuration loaded successfully ({})", config_hash_short);
    info!("Role: {}", config.role.as_str());
    info!(
        "Broker: {:?}, tasks on {}, results on {}",
        config.broker.backend, config.broker.task_topic, config.broker.result_topic
    );

    if config.broker.backend == BrokerBackend::Memory && config.role != Role::Standalone {
        warn!(
            "Memory broker only reaches components in this process; use sqlite across processes"
        );
    }

    // Create broker connector, shared by every component in this process
    let connector = create_connector(&config.broker).context("Failed to open broker")?;
    let transport = Arc::new(
        Transport::new(Arc::clone(&connector), config.broker.retry_delay())
            .with_max_attempts(config.broker.max_delivery_attempts),
    );

    // Create orchestrator if this role runs one
    let orchestrator = if config.role.runs_orchestrator() {
        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
        );
        info!("Job store initialized at {:?}", config.database.path);

        let orch = Arc::new(JobOrchestrator::new(
            config.orchestrator.clone(),
            store,
            Arc::clone(&transport),
            config.broker.task_topic.clone(),
            config.broker.result_topic.clone(),
        ));
        orch.start().await;
        info!("Job orchestrator started");
        Some(orch)
    } else {
        info!("Orchestrator disabled for role {}", config.role.as_str());
        None
    };

    // Create executor if this role runs one
    let executor = if config.role.runs_executor() {
        let executor_transport = Arc::new(
            Transport::new(Arc::clone(&connector), config.broker.retry_delay())
                .with_max_attempts(config.broker.max_delivery_attempts),
        );
        let executor = TaskExecutor::new(
            config.executor.clone(),
            executor_transport,
            config.broker.task_topic.clone(),
            config.broker.result_topic.clone(),
        );
        executor.start().await;
        Some(executor)
    } else {
        None
    };

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        config_hash_short,
        Arc::clone(&transport),
        orchestrator.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Stop executor first so no new results are produced
    if let Some(ref executor) = executor {
        info!("Stopping executor...");
        executor.stop().await;
    }

    // Stop orchestrator if running
    if let Some(ref orch) = orchestrator {
        info!("Stopping orchestrator...");
        orch.stop().await;
        info!("Orchestrator stopped");
    }

    transport.close().await;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
