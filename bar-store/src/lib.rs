// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! SQLite row store for minute OHLCV bars.
//!
//! One database per (symbol, month) partition, keyed on `(symbol, ts_utc)`.
//! The SQL layer is a dumb row provider: aggregation and every derived
//! filter live above it in [`aggregate`].

pub mod aggregate;

use std::path::Path;

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use core_types::error::ErrorKind;
use core_types::types::{Symbol, UnderlyingBar, MONEY_SCALE};
use rusqlite::{params, Connection, OpenFlags};
use rust_decimal::Decimal;
use thiserror::Error;

pub use aggregate::{aggregate_bars, AggregatedBars};

/// Fixed-width UTC text timestamps sort lexicographically in session order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const EXPECTED_COLUMNS: [&str; 7] = ["symbol", "ts_utc", "open", "high", "low", "close", "volume"];

#[derive(Debug, Error)]
pub enum BarStoreError {
    #[error("bar store unavailable: {0}")]
    Unavailable(String),
    #[error("bar store busy: {0}")]
    Busy(String),
    #[error("bar store schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid stored value: {0}")]
    BadValue(String),
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl BarStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BarStoreError::Unavailable(_) => ErrorKind::StorageUnavailable,
            BarStoreError::Busy(_) => ErrorKind::StorageBusy,
            BarStoreError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            BarStoreError::BadValue(_) => ErrorKind::IntegrityViolation,
            BarStoreError::Sqlite(_) => ErrorKind::StorageUnavailable,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, BarStoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for BarStoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                BarStoreError::Busy(err.to_string())
            }
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => {
                BarStoreError::Unavailable(err.to_string())
            }
            _ => BarStoreError::Sqlite(err),
        }
    }
}

/// Open (creating as needed) a month database for writing.
pub fn open_rw(path: &Path) -> Result<Connection, BarStoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| BarStoreError::Unavailable(format!("{}: {err}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    check_schema(&conn)?;
    Ok(conn)
}

/// Open an existing month database read-only; missing file is
/// `StorageUnavailable` by contract.
pub fn open_ro(path: &Path) -> Result<Connection, BarStoreError> {
    if !path.is_file() {
        return Err(BarStoreError::Unavailable(format!(
            "missing bar database {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    check_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), BarStoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS bars (
            symbol TEXT NOT NULL,
            ts_utc TEXT NOT NULL,
            open TEXT NOT NULL,
            high TEXT NOT NULL,
            low TEXT NOT NULL,
            close TEXT NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (symbol, ts_utc)
        );
        CREATE INDEX IF NOT EXISTS idx_bars_symbol_ts ON bars(symbol, ts_utc);
        "#,
    )?;
    Ok(())
}

fn check_schema(conn: &Connection) -> Result<(), BarStoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(bars)")?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    if columns.is_empty() {
        return Err(BarStoreError::SchemaMismatch(
            "bars table is missing".to_string(),
        ));
    }
    if columns != EXPECTED_COLUMNS {
        return Err(BarStoreError::SchemaMismatch(format!(
            "bars columns {columns:?} do not match expected {EXPECTED_COLUMNS:?}"
        )));
    }
    Ok(())
}

/// Idempotent batch upsert. Transactional: either every row of the batch is
/// visible or none is.
pub fn put_bars(conn: &mut Connection, bars: &[UnderlyingBar]) -> Result<usize, BarStoreError> {
    let tx = conn.transaction()?;
    let mut written = 0usize;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO bars (symbol, ts_utc, open, high, low, close, volume) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for bar in bars {
            stmt.execute(params![
                bar.symbol.as_str(),
                fmt_ts(bar.ts_utc),
                money_text(bar.open),
                money_text(bar.high),
                money_text(bar.low),
                money_text(bar.close),
                bar.volume as i64,
            ])?;
            written += 1;
        }
    }
    tx.commit()?;
    Ok(written)
}

/// Bars in `[from, to]` for one symbol, ordered by `ts_utc` ascending.
pub fn scan_range(
    conn: &Connection,
    symbol: &Symbol,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<UnderlyingBar>, BarStoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT symbol, ts_utc, open, high, low, close, volume FROM bars \
         WHERE symbol = ?1 AND ts_utc >= ?2 AND ts_utc <= ?3 ORDER BY ts_utc ASC",
    )?;
    let rows = stmt.query_map(
        params![symbol.as_str(), fmt_ts(from), fmt_ts(to)],
        decode_bar_row,
    )?;
    let mut bars = Vec::new();
    for row in rows {
        bars.push(row??);
    }
    Ok(bars)
}

/// Close of the latest bar at or before `at`, bounded to `at`'s session.
pub fn latest_close_at_or_before(
    conn: &Connection,
    symbol: &Symbol,
    at: DateTime<Utc>,
) -> Result<Option<Decimal>, BarStoreError> {
    let session_start = day_start(at.date_naive());
    let mut stmt = conn.prepare_cached(
        "SELECT close FROM bars \
         WHERE symbol = ?1 AND ts_utc <= ?2 AND ts_utc >= ?3 \
         ORDER BY ts_utc DESC LIMIT 1",
    )?;
    let close: Option<String> = stmt
        .query_row(
            params![symbol.as_str(), fmt_ts(at), fmt_ts(session_start)],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    close.map(|text| parse_money(&text)).transpose()
}

/// Whether the session holds any bar strictly after `at`. Used to tell a
/// pre-open instant apart from a session with no underlying at all.
pub fn has_bar_after(
    conn: &Connection,
    symbol: &Symbol,
    at: DateTime<Utc>,
) -> Result<bool, BarStoreError> {
    let session_end = day_start(at.date_naive() + Days::new(1));
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM bars WHERE symbol = ?1 AND ts_utc > ?2 AND ts_utc < ?3)",
    )?;
    let found: i64 = stmt.query_row(
        params![symbol.as_str(), fmt_ts(at), fmt_ts(session_end)],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

/// Minute bars observed in one session.
pub fn session_bar_count(
    conn: &Connection,
    symbol: &Symbol,
    session_date: NaiveDate,
) -> Result<u64, BarStoreError> {
    let start = day_start(session_date);
    let end = day_start(session_date + Days::new(1));
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND ts_utc >= ?2 AND ts_utc < ?3",
    )?;
    let count: i64 = stmt.query_row(
        params![symbol.as_str(), fmt_ts(start), fmt_ts(end)],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Total rows in the database, recorded into the partition manifest.
pub fn row_count(conn: &Connection) -> Result<u64, BarStoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM bars", [], |row| row.get(0))?;
    Ok(count as u64)
}

fn decode_bar_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<UnderlyingBar, BarStoreError>> {
    let symbol: String = row.get(0)?;
    let ts: String = row.get(1)?;
    let open: String = row.get(2)?;
    let high: String = row.get(3)?;
    let low: String = row.get(4)?;
    let close: String = row.get(5)?;
    let volume: i64 = row.get(6)?;
    Ok(build_bar(symbol, ts, open, high, low, close, volume))
}

fn build_bar(
    symbol: String,
    ts: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: i64,
) -> Result<UnderlyingBar, BarStoreError> {
    Ok(UnderlyingBar {
        symbol: Symbol::parse(&symbol)
            .map_err(|err| BarStoreError::BadValue(format!("symbol {symbol:?}: {err}")))?,
        ts_utc: parse_ts(&ts)?,
        open: parse_money(&open)?,
        high: parse_money(&high)?,
        low: parse_money(&low)?,
        close: parse_money(&close)?,
        volume: volume.max(0) as u64,
    })
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>, BarStoreError> {
    NaiveDateTime::parse_from_str(text, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| BarStoreError::BadValue(format!("timestamp {text:?}: {err}")))
}

fn money_text(value: Decimal) -> String {
    value.round_dp(MONEY_SCALE).to_string()
}

fn parse_money(text: &str) -> Result<Decimal, BarStoreError> {
    text.parse()
        .map_err(|err| BarStoreError::BadValue(format!("decimal {text:?}: {err}")))
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc()
}
