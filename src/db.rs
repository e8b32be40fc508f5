use crate::errors::{PricerError, PricerResult};
use crate::models::OptionKind;
use crate::state::DbCommand;
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> PricerResult<DbPool> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| PricerError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("options_data.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn init_memory_db() -> PricerResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// One persisted option observation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OptionRecord {
    /// Groups every row written by one pipeline pass
    pub run_id: String,
    pub fetch_timestamp: String,
    pub ticker: String,
    pub stock_price: f64,
    pub option_type: OptionKind,
    pub expiry_date: NaiveDate,
    pub strike_price: f64,
    pub market_price: f64,
    pub implied_volatility: f64,
    pub dte: u32,
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes through the connection while serving.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> PricerResult<()> {
    match cmd {
        DbCommand::InsertRecords { records } => {
            let n = insert_records(db, &records)?;
            tracing::debug!(rows = n, "snapshot persisted");
        }
    }
    Ok(())
}

/// Insert all records in a single transaction. Returns the row count.
pub fn insert_records(db: &DbPool, records: &[OptionRecord]) -> PricerResult<usize> {
    let mut conn = db.lock().map_err(|e| PricerError::Database(format!("lock poisoned: {e}")))?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO options (run_id, fetch_timestamp, ticker, stock_price, option_type,
                                  expiry_date, strike_price, market_price, implied_volatility, dte)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for r in records {
            stmt.execute(rusqlite::params![
                r.run_id,
                r.fetch_timestamp,
                r.ticker,
                r.stock_price,
                r.option_type.as_str(),
                r.expiry_date.format("%Y-%m-%d").to_string(),
                r.strike_price,
                r.market_price,
                r.implied_volatility,
                r.dte,
            ])?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}

/// Most recent observations for a ticker, newest first.
pub fn get_recent_quotes(
    db: &DbPool,
    ticker: &str,
    limit: usize,
) -> PricerResult<Vec<OptionRecord>> {
    let conn = db.lock().map_err(|e| PricerError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT run_id, fetch_timestamp, ticker, stock_price, option_type,
                expiry_date, strike_price, market_price, implied_volatility, dte
         FROM options WHERE ticker = ?1 ORDER BY fetch_timestamp DESC, id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![ticker, limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, f64>(6)?,
            row.get::<_, f64>(7)?,
            row.get::<_, f64>(8)?,
            row.get::<_, u32>(9)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (
            run_id,
            fetch_timestamp,
            ticker,
            stock_price,
            kind,
            expiry,
            strike_price,
            market_price,
            implied_volatility,
            dte,
        ) = row?;
        out.push(OptionRecord {
            run_id,
            fetch_timestamp,
            ticker,
            stock_price,
            option_type: kind.parse()?,
            expiry_date: NaiveDate::parse_from_str(&expiry, "%Y-%m-%d")
                .map_err(|e| PricerError::Database(format!("bad expiry_date {expiry:?}: {e}")))?,
            strike_price,
            market_price,
            implied_volatility,
            dte,
        });
    }
    Ok(out)
}

pub fn count_records(db: &DbPool) -> PricerResult<i64> {
    let conn = db.lock().map_err(|e| PricerError::Database(format!("lock: {e}")))?;
    Ok(conn.query_row("SELECT COUNT(*) FROM options", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str, strike: f64, kind: OptionKind) -> OptionRecord {
        OptionRecord {
            run_id: "run-1".into(),
            fetch_timestamp: ts.into(),
            ticker: "AAPL".into(),
            stock_price: 247.45,
            option_type: kind,
            expiry_date: NaiveDate::from_ymd_opt(2025, 10, 17).unwrap(),
            strike_price: strike,
            market_price: 3.2,
            implied_volatility: 0.31,
            dte: 12,
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = init_memory_db().unwrap();
        let records = vec![
            record("2025-10-05T14:00:00Z", 240.0, OptionKind::Call),
            record("2025-10-05T14:00:00Z", 240.0, OptionKind::Put),
        ];
        assert_eq!(insert_records(&db, &records).unwrap(), 2);
        assert_eq!(count_records(&db).unwrap(), 2);

        let back = get_recent_quotes(&db, "AAPL", 10).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_recent_quotes_newest_first_and_limited() {
        let db = init_memory_db().unwrap();
        insert_records(&db, &[record("2025-10-01T14:00:00Z", 200.0, OptionKind::Call)]).unwrap();
        insert_records(&db, &[record("2025-10-03T14:00:00Z", 210.0, OptionKind::Call)]).unwrap();
        insert_records(&db, &[record("2025-10-02T14:00:00Z", 220.0, OptionKind::Call)]).unwrap();

        let back = get_recent_quotes(&db, "AAPL", 2).unwrap();
        let strikes: Vec<f64> = back.iter().map(|r| r.strike_price).collect();
        assert_eq!(strikes, vec![210.0, 220.0]);
        assert!(get_recent_quotes(&db, "MSFT", 10).unwrap().is_empty());
    }

    #[test]
    fn test_schema_rejects_unknown_kind() {
        let db = init_memory_db().unwrap();
        let conn = db.lock().unwrap();
        let res = conn.execute(
            "INSERT INTO options (run_id, fetch_timestamp, ticker, stock_price, option_type,
                                  expiry_date, strike_price, market_price, implied_volatility, dte)
             VALUES ('r', 't', 'AAPL', 1.0, 'straddle', '2025-10-17', 1.0, 1.0, 0.2, 1)",
            [],
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_writer_task_persists_commands() {
        let db = init_memory_db().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_db_writer(db.clone(), rx));

        tx.send(DbCommand::InsertRecords {
            records: vec![record("2025-10-05T14:00:00Z", 240.0, OptionKind::Call)],
        })
        .await
        .unwrap();
        drop(tx);
        writer.await.unwrap();

        assert_eq!(count_records(&db).unwrap(), 1);
    }
}
