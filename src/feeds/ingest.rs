use super::yahoo::MarketDataClient;
use crate::db::{self, DbPool, OptionRecord};
use crate::errors::PricerResult;
use crate::models::pipeline::OptionQuote;
use crate::models::OptionKind;
use chrono::{DateTime, NaiveDate, Utc};

/// Whole days from `now` until midnight UTC of `expiry`, floored, never
/// negative. Same-day and expired contracts map to 0.
pub fn days_to_expiry(expiry: NaiveDate, now: DateTime<Utc>) -> u32 {
    let Some(midnight) = expiry.and_hms_opt(0, 0, 0) else {
        return 0;
    };
    let secs = (midnight.and_utc() - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs / 86_400) as u32
    }
}

/// Turn one side of a chain into storable records. Rows missing strike,
/// last price or implied volatility are dropped.
pub fn process_chain(
    rows: &[OptionQuote],
    kind: OptionKind,
    expiry: NaiveDate,
    fetch_time: DateTime<Utc>,
    ticker: &str,
    spot: f64,
    run_id: &str,
) -> Vec<OptionRecord> {
    let dte = days_to_expiry(expiry, fetch_time);
    let fetch_timestamp = fetch_time.to_rfc3339();

    rows.iter()
        .filter_map(|q| q.complete())
        .map(|(strike, price, iv)| OptionRecord {
            run_id: run_id.to_string(),
            fetch_timestamp: fetch_timestamp.clone(),
            ticker: ticker.to_string(),
            stock_price: spot,
            option_type: kind,
            expiry_date: expiry,
            strike_price: strike,
            market_price: price,
            implied_volatility: iv,
            dte,
        })
        .collect()
}

/// One pass of the data pipeline: every listed expiry, calls and puts,
/// committed together. Per-expiry fetch failures are logged and skipped.
/// Returns the number of records written.
pub async fn run_ingest(
    client: &MarketDataClient,
    db: &DbPool,
    ticker: &str,
) -> PricerResult<usize> {
    tracing::info!(ticker, "starting data pipeline");

    let (spot, expirations) = client.get_spot_and_expirations(ticker).await?;
    let fetch_time = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();

    let mut records: Vec<OptionRecord> = Vec::new();
    for expiry in expirations {
        let chain = match client.get_option_chain(ticker, expiry).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(ticker, %expiry, error = %e, "chain fetch failed, skipping expiry");
                continue;
            }
        };

        let before = records.len();
        for (side, kind) in [(&chain.calls, OptionKind::Call), (&chain.puts, OptionKind::Put)] {
            records.extend(process_chain(side, kind, expiry, fetch_time, ticker, spot, &run_id));
        }
        tracing::debug!(%expiry, rows = records.len() - before, "expiry processed");
    }

    if records.is_empty() {
        tracing::warn!(ticker, "no complete option rows found");
        return Ok(0);
    }

    let written = db::insert_records(db, &records)?;
    tracing::info!(ticker, run_id = %run_id, records = written, spot, "pipeline finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use chrono::TimeZone;
    use std::collections::HashMap;

    // 2025-10-17 and 2025-10-24, midnight UTC
    const GOOD_EXPIRY: &str = "1760659200";

    const CHAIN: &str = r#"{
      "optionChain": {
        "result": [{
          "expirationDates": [1760659200, 1761264000],
          "quote": { "regularMarketPrice": 247.45 },
          "options": [{
            "calls": [
              { "strike": 200.0, "lastPrice": 48.1, "impliedVolatility": 0.61 },
              { "strike": 250.0, "lastPrice": 3.2 },
              { "strike": 260.0, "lastPrice": 0.9, "impliedVolatility": 0.24 }
            ],
            "puts": [
              { "strike": 240.0, "lastPrice": 2.7, "impliedVolatility": 0.27 }
            ]
          }]
        }]
      }
    }"#;

    const INCOMPLETE_CHAIN: &str = r#"{
      "optionChain": {
        "result": [{
          "expirationDates": [1760659200],
          "quote": { "regularMarketPrice": 247.45 },
          "options": [{
            "calls": [{ "strike": 250.0, "lastPrice": 3.2 }],
            "puts": [{ "strike": 240.0, "impliedVolatility": 0.27 }]
          }]
        }]
      }
    }"#;

    /// Serves `body` for the bare request and the good expiry; every other
    /// expiry fails with HTTP 500.
    async fn options_handler(
        State(body): State<&'static str>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        match params.get("date").map(String::as_str) {
            None | Some(GOOD_EXPIRY) => {
                ([(header::CONTENT_TYPE, "application/json")], body).into_response()
            }
            Some(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response(),
        }
    }

    async fn spawn_market(body: &'static str) -> MarketDataClient {
        let app = axum::Router::new()
            .route("/options/{ticker}", get(options_handler))
            .with_state(body);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        MarketDataClient::new(&format!("http://{addr}"))
    }

    fn quote(strike: Option<f64>, price: Option<f64>, iv: Option<f64>) -> OptionQuote {
        OptionQuote {
            strike,
            market_price: price,
            market_iv: iv,
            kind: OptionKind::Call,
        }
    }

    #[test]
    fn test_days_to_expiry_floors() {
        let expiry = NaiveDate::from_ymd_opt(2025, 10, 17).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 10, 5, 15, 30, 0).unwrap();
        // 11 days 8.5 hours
        assert_eq!(days_to_expiry(expiry, now), 11);
    }

    #[test]
    fn test_days_to_expiry_never_negative() {
        let expiry = NaiveDate::from_ymd_opt(2025, 10, 17).unwrap();
        let same_day = Utc.with_ymd_and_hms(2025, 10, 17, 13, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        assert_eq!(days_to_expiry(expiry, same_day), 0);
        assert_eq!(days_to_expiry(expiry, after), 0);
    }

    #[test]
    fn test_process_chain_drops_incomplete() {
        let rows = vec![
            quote(Some(200.0), Some(48.1), Some(0.61)),
            quote(Some(250.0), Some(3.2), None),
            quote(None, Some(1.0), Some(0.3)),
            quote(Some(260.0), None, Some(0.24)),
            quote(Some(270.0), Some(0.4), Some(0.22)),
        ];
        let expiry = NaiveDate::from_ymd_opt(2025, 10, 17).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 10, 5, 15, 30, 0).unwrap();
        let records =
            process_chain(&rows, OptionKind::Put, expiry, now, "AAPL", 247.45, "run-1");

        let strikes: Vec<f64> = records.iter().map(|r| r.strike_price).collect();
        assert_eq!(strikes, vec![200.0, 270.0]);
        assert!(records.iter().all(|r| r.option_type == OptionKind::Put && r.dte == 11));
        assert_eq!(records[0].fetch_timestamp, now.to_rfc3339());
    }

    #[tokio::test]
    async fn test_run_ingest_skips_failed_expiry() {
        let client = spawn_market(CHAIN).await;
        let db = db::init_memory_db().unwrap();

        let written = run_ingest(&client, &db, "AAPL").await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(db::count_records(&db).unwrap(), 3);

        let stored = db::get_recent_quotes(&db, "AAPL", 10).unwrap();
        let good = NaiveDate::from_ymd_opt(2025, 10, 17).unwrap();
        assert!(stored.iter().all(|r| r.expiry_date == good));
        assert!(stored.iter().all(|r| r.run_id == stored[0].run_id));
        let calls = stored.iter().filter(|r| r.option_type == OptionKind::Call).count();
        assert_eq!(calls, 2);
        assert_eq!(stored.len() - calls, 1);
    }

    #[tokio::test]
    async fn test_run_ingest_without_complete_rows_writes_nothing() {
        let client = spawn_market(INCOMPLETE_CHAIN).await;
        let db = db::init_memory_db().unwrap();

        assert_eq!(run_ingest(&client, &db, "AAPL").await.unwrap(), 0);
        assert_eq!(db::count_records(&db).unwrap(), 0);
    }
}
