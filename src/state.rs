use crate::config::AppConfig;
use crate::db::{DbPool, OptionRecord};
use crate::feeds::yahoo::MarketDataClient;
use crate::models::pipeline::InferenceAssets;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertRecords { records: Vec<OptionRecord> },
}

// ── Messages OUT to dashboard clients ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "hello")]
    Hello {
        model: String,
        default_ticker: String,
    },

    #[serde(rename = "smile_computed")]
    SmileComputed {
        ticker: String,
        expiry: String,
        spot: f64,
        rows: usize,
        undefined_iv: usize,
        timestamp: String,
    },

    #[serde(rename = "snapshot_stored")]
    SnapshotStored {
        ticker: String,
        records: usize,
    },
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub smiles_served: AtomicU64,
    pub rows_priced: AtomicU64,
    pub undefined_ivs: AtomicU64,
    pub records_queued: AtomicU64,
    pub errors_recovered: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            smiles_served: AtomicU64::new(0),
            rows_priced: AtomicU64::new(0),
            undefined_ivs: AtomicU64::new(0),
            records_queued: AtomicU64::new(0),
            errors_recovered: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    /// Scaler + network, loaded once and never mutated
    pub assets: Arc<InferenceAssets>,

    pub market: MarketDataClient,

    // Server -> Dashboard: event stream (broadcast for WS clients)
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Server -> DB Writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        assets: Arc<InferenceAssets>,
        market: MarketDataClient,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            config,
            db,
            assets,
            market,
            ws_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
