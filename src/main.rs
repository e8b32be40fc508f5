use clap::{Parser, Subcommand};
use deep_option_pricer::config::AppConfig;
use deep_option_pricer::feeds::ingest;
use deep_option_pricer::feeds::yahoo::MarketDataClient;
use deep_option_pricer::models::pipeline::InferenceAssets;
use deep_option_pricer::state::{AppState, DbCommand};
use deep_option_pricer::{db, server};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Neural option pricer: smile service and chain ingestion
#[derive(Parser)]
#[command(name = "deep_option_pricer")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST + websocket API (default)
    Serve,

    /// Fetch every listed expiry once and store complete rows
    Ingest {
        /// Underlying symbol; falls back to DEFAULT_TICKER
        ticker: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    let market = MarketDataClient::new(&cfg.market_data_base_url);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Ingest { ticker } => {
            let ticker = ticker
                .map(|t| t.to_uppercase())
                .unwrap_or_else(|| cfg.default_ticker.clone());
            match ingest::run_ingest(&market, &db_pool, &ticker).await {
                Ok(n) => tracing::info!(ticker = %ticker, records = n, "ingest complete"),
                Err(e) => {
                    tracing::error!(ticker = %ticker, "ingest failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Serve => serve(cfg, db_pool, market).await,
    }
}

async fn serve(cfg: AppConfig, db_pool: db::DbPool, market: MarketDataClient) {
    tracing::info!("deep_option_pricer server starting");

    // Trained artifacts: loaded once, read-only from here on
    let assets = match InferenceAssets::load(&cfg) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!("model assets error: {e}");
            std::process::exit(1);
        }
    };

    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(64);

    let db_pool_writer = db_pool.clone();
    tokio::spawn(async move {
        db::run_db_writer(db_pool_writer, db_rx).await;
    });

    let port = cfg.server_port;
    let app_state = AppState::new(cfg, db_pool, assets, market, db_tx);
    let app = server::router(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
