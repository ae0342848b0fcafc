mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use reelgen::{
    assets::AssetManager,
    backend, config,
    maintenance::MaintenanceTask,
    queue::QueueManager,
    server::{self, AppContext},
    storage::ObjectStore,
    webhook::WebhookNotifier,
};
use reelgen_db::{get_conn, init_pool, queries};

async fn start(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting reelgen");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let db_path = config.database.path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path);
    let db = init_pool(&db_path)?;

    let store = ObjectStore::open(
        &config.storage.root,
        &config.storage.bucket,
        &config.storage.public_base_url,
    )?;
    let backend = backend::create_backend(&config.backend)?;

    let queue = QueueManager::new(
        db.clone(),
        store,
        backend,
        config.queue.clone(),
        &config.webhooks,
    );

    let cancel = CancellationToken::new();
    let queue_handle = tokio::spawn(queue.clone().run(cancel.child_token()));

    let maintenance_handle = if config.maintenance.enabled {
        let task = Arc::new(MaintenanceTask::new(
            db.clone(),
            queue.assets().clone(),
            queue.notifier().clone(),
            config.maintenance.clone(),
        ));
        Some(tokio::spawn(task.run(cancel.child_token())))
    } else {
        tracing::info!("Maintenance loop disabled by config");
        None
    };

    let ctx = AppContext {
        queue: queue.clone(),
        config: Arc::new(config),
    };
    let server_result = server::start_server(ctx).await;

    // server returned; stop the background loops before exiting
    tracing::info!("Shutting down...");
    cancel.cancel();
    let _ = queue_handle.await;
    if let Some(handle) = maintenance_handle {
        let _ = handle.await;
    }

    server_result
}

async fn maintain(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db = init_pool(&config.database.path.to_string_lossy())?;
    let store = ObjectStore::open(
        &config.storage.root,
        &config.storage.bucket,
        &config.storage.public_base_url,
    )?;
    let assets = Arc::new(AssetManager::new(db.clone(), store));
    let notifier = Arc::new(WebhookNotifier::new(&config.webhooks));
    let task = MaintenanceTask::new(db, assets, notifier, config.maintenance.clone());

    let report = task.run_once().await;
    println!("Stuck jobs reset: {}", report.stuck_reset);
    println!("Frame dirs swept: {}", report.frames_swept);
    println!("Prunable jobs:    {}", report.prunable_jobs);
    Ok(())
}

fn stats(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db = init_pool(&config.database.path.to_string_lossy())?;
    let conn = get_conn(&db)?;
    let stats = queries::jobs::counts_by_status(&conn)?;

    println!("Pending:    {}", stats.pending);
    println!("Processing: {}", stats.processing);
    println!("Completed:  {}", stats.completed);
    println!("Failed:     {}", stats.failed);
    println!("Total:      {}", stats.total());
    Ok(())
}

fn validate(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Database: {:?}", config.database.path);
            println!("  Storage bucket: {}", config.storage.bucket);
            println!("  Backend mode: {:?}", config.backend.mode);
            println!("  Max concurrent jobs: {}", config.queue.max_concurrent_jobs);
            println!("  Maintenance enabled: {}", config.maintenance.enabled);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelgen=trace,reelgen_db=debug,reelgen_core=debug,tower_http=debug".to_string()
        } else {
            "reelgen=info,reelgen_db=info,tower_http=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(host, port, cli.config.as_deref()))
        }
        Commands::Maintain => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(maintain(cli.config.as_deref()))
        }
        Commands::Stats => stats(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate(path.as_deref())
        }
        Commands::Version => {
            println!("reelgen {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
