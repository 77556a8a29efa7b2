use std::{path::PathBuf, sync::Arc, time::Duration};

use charge_api::create_app;
use charge_core::StationConfig;
use charge_engine::{
    Engine, JsonFileStore, MemoryStore, StationStore, SystemClock, TracingNotifier,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Command line arguments for the charging station server
#[derive(Parser, Debug)]
#[command(name = "charge-station")]
#[command(about = "EV charging station dispatcher")]
struct Args {
    /// Path to the station configuration JSON file
    #[arg(short, long)]
    config: PathBuf,

    /// Port to bind the server to
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// File that holds the station state between runs; kept in memory when omitted
    #[arg(short, long)]
    state: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_content = tokio::fs::read_to_string(&args.config).await.map_err(|e| {
        format!(
            "Failed to read config file '{}': {}",
            args.config.display(),
            e
        )
    })?;

    let station_config: StationConfig = serde_json::from_str(&config_content).map_err(|e| {
        format!(
            "Failed to parse config file '{}': {}",
            args.config.display(),
            e
        )
    })?;

    tracing::info!(
        "Loaded station config from {}: {}",
        args.config.display(),
        station_config.station_id
    );

    let store: Arc<dyn StationStore> = match &args.state {
        Some(path) => Arc::new(JsonFileStore::new(path.clone())),
        None => Arc::new(MemoryStore::new()),
    };
    let sweep_every = Duration::from_secs(station_config.sweep_interval_secs);

    let engine = Arc::new(
        Engine::open(
            station_config,
            store,
            Arc::new(TracingNotifier),
            Arc::new(SystemClock),
        )
        .await?,
    );
    let _sweeper = engine.spawn_sweeper(sweep_every);

    let app = create_app(engine);

    let bind_addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", bind_addr, e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server error: {}", e))?;

    Ok(())
}
