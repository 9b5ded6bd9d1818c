use std::sync::Arc;

use tracing::{error, info};

use podhub::clock::SystemClock;
use podhub::http::build_client;
use podhub::{Config, Database, Engine, WebServer};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = podhub::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        podhub::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> podhub::Result<()> {
    config.validate()?;

    info!("podhub {}", env!("CARGO_PKG_VERSION"));
    info!("Callback URL: {}", config.websub.callback_url);

    let db = Database::open(&config.database.path).await?;
    let client = build_client(&config.feed)?;
    let engine = Arc::new(Engine::new(
        &config,
        db.clone(),
        client,
        Arc::new(SystemClock),
    )?);

    let scheduler = if config.scheduler.enabled {
        Some(engine.scheduler().clone().spawn())
    } else {
        info!("Reconciliation scheduler disabled");
        None
    };

    let server = WebServer::new(&config, engine)?;
    let served = server.run(shutdown_signal()).await;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    db.close().await;
    info!("Shutdown complete");

    served.map_err(podhub::PodhubError::Io)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
