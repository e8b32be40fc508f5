use crate::db;
use crate::errors::{PricerError, PricerResult};
use crate::feeds::ingest::{days_to_expiry, process_chain};
use crate::models::black_scholes::black_scholes_price_str;
use crate::models::implied_vol::implied_volatility;
use crate::models::pipeline::{predict_smile, SmileContext, SmileRow};
use crate::models::OptionKind;
use crate::state::{AppState, DbCommand, WsMessage};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Json;
use chrono::{NaiveDate, Utc};
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct MarketQuery {
    pub ticker: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct SmileQuery {
    pub ticker: Option<String>,
    /// YYYY-MM-DD
    pub expiry: String,
}

#[derive(serde::Deserialize)]
pub struct PriceQuery {
    pub spot: f64,
    pub strike: f64,
    pub rate: Option<f64>,
    pub t: f64,
    pub sigma: f64,
    pub kind: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct IvQuery {
    pub price: f64,
    pub spot: f64,
    pub strike: f64,
    pub t: f64,
    pub rate: Option<f64>,
    pub kind: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct QuotesQuery {
    pub ticker: Option<String>,
    pub limit: Option<usize>,
}

fn ticker_or_default(state: &AppState, ticker: Option<String>) -> String {
    ticker
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.config.default_ticker.clone())
}

fn error_json(state: &AppState, e: PricerError) -> Json<serde_json::Value> {
    state.counters.errors_recovered.fetch_add(1, Relaxed);
    Json(serde_json::json!({ "error": e.to_string() }))
}

/// Malformed query strings get the same JSON error body as handler failures.
fn query_or_error<T>(
    state: &AppState,
    query: Result<Query<T>, QueryRejection>,
) -> Result<T, Json<serde_json::Value>> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| error_json(state, PricerError::InvalidInput(rejection.body_text())))
}

/// GET /api/market -- spot price and listed expirations
pub async fn get_market(
    State(state): State<Arc<AppState>>,
    query: Result<Query<MarketQuery>, QueryRejection>,
) -> Json<serde_json::Value> {
    let params = match query_or_error(&state, query) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let ticker = ticker_or_default(&state, params.ticker);
    match state.market.get_spot_and_expirations(&ticker).await {
        Ok((spot, expirations)) => Json(serde_json::json!({
            "ticker": ticker,
            "spot": spot,
            "expirations": expirations
                .iter()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .collect::<Vec<_>>(),
        })),
        Err(e) => {
            tracing::warn!(ticker = %ticker, error = %e, "market lookup failed");
            error_json(&state, e)
        }
    }
}

/// GET /api/smile -- market smile vs model smile for one expiry (calls)
pub async fn get_smile(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SmileQuery>, QueryRejection>,
) -> Json<serde_json::Value> {
    let params = match query_or_error(&state, query) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let ticker = ticker_or_default(&state, params.ticker);
    match compute_smile(&state, &ticker, &params.expiry).await {
        Ok((spot, dte, rows)) => Json(serde_json::json!({
            "ticker": ticker,
            "expiry": params.expiry,
            "spot": spot,
            "days_to_expiry": dte,
            "rate": state.config.risk_free_rate,
            "rows": rows,
        })),
        Err(e) => {
            tracing::warn!(ticker = %ticker, expiry = %params.expiry, error = %e, "smile failed");
            error_json(&state, e)
        }
    }
}

async fn compute_smile(
    state: &AppState,
    ticker: &str,
    expiry: &str,
) -> PricerResult<(f64, u32, Vec<SmileRow>)> {
    let expiry = NaiveDate::parse_from_str(expiry, "%Y-%m-%d")
        .map_err(|e| PricerError::InvalidInput(format!("expiry {expiry:?}: {e}")))?;

    let chain = state.market.get_option_chain(ticker, expiry).await?;
    let now = Utc::now();
    let ctx = SmileContext {
        spot: chain.spot,
        days_to_expiry: days_to_expiry(expiry, now),
        rate: state.config.risk_free_rate,
    };

    let rows = predict_smile(&chain.calls, ctx, &state.assets, state.config.max_ai_price)?;

    let undefined_iv = rows.iter().filter(|r| r.ai_iv.is_nan()).count();
    state.counters.smiles_served.fetch_add(1, Relaxed);
    state.counters.rows_priced.fetch_add(rows.len() as u64, Relaxed);
    state.counters.undefined_ivs.fetch_add(undefined_iv as u64, Relaxed);
    tracing::info!(
        ticker,
        %expiry,
        spot = ctx.spot,
        dte = ctx.days_to_expiry,
        rows = rows.len(),
        undefined_iv,
        "smile computed"
    );

    // Persist the snapshot the smile was built from
    let run_id = uuid::Uuid::new_v4().to_string();
    let records = process_chain(
        &chain.calls,
        OptionKind::Call,
        expiry,
        now,
        ticker,
        chain.spot,
        &run_id,
    );
    let stored = records.len();
    if stored > 0 {
        state.counters.records_queued.fetch_add(stored as u64, Relaxed);
        if state.db_tx.send(DbCommand::InsertRecords { records }).await.is_err() {
            tracing::error!("db writer channel closed, snapshot not stored");
        } else {
            state.broadcast(WsMessage::SnapshotStored {
                ticker: ticker.to_string(),
                records: stored,
            });
        }
    }

    state.broadcast(WsMessage::SmileComputed {
        ticker: ticker.to_string(),
        expiry: expiry.format("%Y-%m-%d").to_string(),
        spot: ctx.spot,
        rows: rows.len(),
        undefined_iv,
        timestamp: now.to_rfc3339(),
    });

    Ok((ctx.spot, ctx.days_to_expiry, rows))
}

/// GET /api/price -- Black-Scholes calculator
pub async fn get_price(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PriceQuery>, QueryRejection>,
) -> Json<serde_json::Value> {
    let q = match query_or_error(&state, query) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let rate = q.rate.unwrap_or(state.config.risk_free_rate);
    let kind = q.kind.unwrap_or_else(|| "call".into());
    match black_scholes_price_str(q.spot, q.strike, rate, q.t, q.sigma, &kind) {
        Ok(price) => Json(serde_json::json!({ "price": price, "kind": kind, "rate": rate })),
        Err(e) => error_json(&state, e),
    }
}

/// GET /api/iv -- implied volatility calculator; null when undefined
pub async fn get_iv(
    State(state): State<Arc<AppState>>,
    query: Result<Query<IvQuery>, QueryRejection>,
) -> Json<serde_json::Value> {
    let q = match query_or_error(&state, query) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let rate = q.rate.unwrap_or(state.config.risk_free_rate);
    let result = q
        .kind
        .as_deref()
        .unwrap_or("call")
        .parse::<OptionKind>()
        .and_then(|kind| implied_volatility(q.price, q.spot, q.strike, q.t, rate, kind));
    match result {
        Ok(iv) => Json(serde_json::json!({
            "implied_volatility": iv,
            "defined": !iv.is_nan(),
        })),
        Err(e) => error_json(&state, e),
    }
}

/// GET /api/quotes -- stored snapshots, newest first
pub async fn get_quotes(
    State(state): State<Arc<AppState>>,
    query: Result<Query<QuotesQuery>, QueryRejection>,
) -> Json<serde_json::Value> {
    let params = match query_or_error(&state, query) {
        Ok(p) => p,
        Err(err) => return err,
    };
    let ticker = ticker_or_default(&state, params.ticker);
    let limit = params.limit.unwrap_or(100).min(1000);
    match db::get_recent_quotes(&state.db, &ticker, limit) {
        Ok(quotes) => Json(serde_json::json!({ "ticker": ticker, "quotes": quotes })),
        Err(e) => error_json(&state, e),
    }
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "smiles_served": state.counters.smiles_served.load(Relaxed),
        "rows_priced": state.counters.rows_priced.load(Relaxed),
        "undefined_ivs": state.counters.undefined_ivs.load(Relaxed),
        "records_queued": state.counters.records_queued.load(Relaxed),
        "errors_recovered": state.counters.errors_recovered.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
        "model": state.assets.model.name(),
    }))
}
