// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest days-to-expiry retained anywhere in the dataset.
pub const DTE_CEILING: u16 = 45;

pub const MAX_SYMBOL_LEN: usize = 6;

/// Fixed-point scale used for every price, strike, and moneyness column.
pub const MONEY_SCALE: u32 = 4;

/// Default retention and query half-width for |strike/spot - 1|.
pub fn default_moneyness_half_width() -> Decimal {
    Decimal::new(15, 2)
}

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol is empty")]
    Empty,
    #[error("symbol {0:?} is longer than {MAX_SYMBOL_LEN} characters")]
    TooLong(String),
    #[error("symbol {0:?} contains non-alphabetic characters")]
    BadCharacter(String),
}

/// Uppercase exchange symbol tag, e.g. SPX or QQQ.
///
/// Shape is validated on construction; vocabulary membership is the
/// engine's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        if raw.is_empty() {
            return Err(SymbolError::Empty);
        }
        if raw.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(raw.to_string()));
        }
        if !raw.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(SymbolError::BadCharacter(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Option right. Ordering is C before P, matching emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Right {
    Call,
    Put,
}

impl Right {
    /// One-character storage tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Right::Call => "C",
            Right::Put => "P",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "C" => Some(Right::Call),
            "P" => Some(Right::Put),
            _ => None,
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error)]
#[error("unrecognised interval {0:?} (expected 1m, 5m, 15m, 1h, or 1d)")]
pub struct IntervalParseError(pub String);

/// Bar aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Minute,
    FiveMinutes,
    FifteenMinutes,
    Hour,
    Day,
}

impl Interval {
    /// Window length in whole minutes; `None` for civil-day windows.
    pub fn minutes(&self) -> Option<i64> {
        match self {
            Interval::Minute => Some(1),
            Interval::FiveMinutes => Some(5),
            Interval::FifteenMinutes => Some(15),
            Interval::Hour => Some(60),
            Interval::Day => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interval::Minute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::Hour => "1h",
            Interval::Day => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::Minute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::Hour),
            "1d" => Ok(Interval::Day),
            other => Err(IntervalParseError(other.to_string())),
        }
    }
}

/// Minute OHLCV bar for the underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingBar {
    pub symbol: Symbol,
    pub ts_utc: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// One row of the daily contract universe (chain file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRow {
    pub symbol: Symbol,
    pub session_date: NaiveDate,
    pub ts_utc: DateTime<Utc>,
    pub expiry_date: NaiveDate,
    pub strike: Decimal,
    pub right: Right,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub last: Option<Decimal>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub open_interest: Option<u64>,
    pub volume: Option<u64>,
}

/// One minute-snapshot quote row, including the derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub symbol: Symbol,
    pub session_date: NaiveDate,
    pub ts_utc: DateTime<Utc>,
    pub expiry_date: NaiveDate,
    pub strike: Decimal,
    pub right: Right,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub last: Option<Decimal>,
    pub iv: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub open_interest: Option<u64>,
    pub volume: Option<u64>,
    pub dte: i32,
    pub moneyness: Option<Decimal>,
}

impl SnapshotRow {
    /// Identity of the contract this row observes.
    pub fn contract_key(&self) -> (NaiveDate, Decimal, Right) {
        (self.expiry_date, self.strike, self.right)
    }

    /// Bid+ask sum used as the last-resort tie-break between equal-instant rows.
    pub fn quote_sum(&self) -> Decimal {
        self.bid.unwrap_or_default() + self.ask.unwrap_or_default()
    }
}

/// Hint attached to an empty chain view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewHint {
    /// No underlying close at or before the query instant in the session.
    NoUnderlying,
    /// The instant precedes the session's first observation.
    BeforeSession,
}

/// Result of chain snapshot reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainView {
    pub symbol: Symbol,
    pub at: DateTime<Utc>,
    pub session_date: NaiveDate,
    pub spot: Option<Decimal>,
    pub rows: Vec<SnapshotRow>,
    pub hint: Option<ViewHint>,
}

impl ChainView {
    pub fn empty(symbol: Symbol, at: DateTime<Utc>, hint: Option<ViewHint>) -> Self {
        Self {
            symbol,
            session_date: at.date_naive(),
            at,
            spot: None,
            rows: Vec::new(),
            hint,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Minute-aligned spot lookup seam between the column store and the bar store.
pub trait SpotSource {
    /// Close of the latest bar at or before `at` within the same session.
    fn spot(&self, symbol: &Symbol, at: DateTime<Utc>) -> Option<Decimal>;
}

pub fn is_minute_aligned(ts: DateTime<Utc>) -> bool {
    ts.second() == 0 && ts.timestamp_subsec_nanos() == 0
}

/// Session date of an instant: its UTC civil day.
pub fn session_date_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// Whole-day distance from session date to expiry.
pub fn days_to_expiry(expiry: NaiveDate, session_date: NaiveDate) -> i64 {
    (expiry - session_date).num_days()
}

/// `strike / spot - 1` at the fixed money scale; `None` for a zero spot.
pub fn moneyness(strike: Decimal, spot: Decimal) -> Option<Decimal> {
    let ratio = strike.checked_div(spot)?;
    Some((ratio - Decimal::ONE).round_dp(MONEY_SCALE))
}

/// Quote midpoint at the fixed money scale (banker's rounding).
pub fn mid_price(bid: Decimal, ask: Decimal) -> Decimal {
    ((bid + ask) / Decimal::TWO).round_dp(MONEY_SCALE)
}
