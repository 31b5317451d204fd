// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Completeness scorer v2: reduces a chain view to one actionable scalar.
//!
//! Rows bucket by integer DTE; each bucket earns up to 1.0 from four
//! weighted components; the overall score is the unweighted mean across
//! active buckets. Hints fire only when the overall score drops under 0.9.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use core_types::types::{moneyness, ChainView, Right, SnapshotRow, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

pub const STRIKE_DENSITY_WEIGHT: f64 = 0.4;
pub const QUOTE_COVERAGE_WEIGHT: f64 = 0.2;
pub const ATM_SPREAD_WEIGHT: f64 = 0.2;
pub const LIQUIDITY_WEIGHT: f64 = 0.2;

/// Strikes per side required within the ATM band for full density credit.
pub const MIN_ATM_STRIKES_PER_SIDE: usize = 3;
/// Active-bucket count under which the DTE range is considered narrow.
pub const MIN_ACTIVE_BUCKETS: usize = 3;
/// Hints are suppressed at or above this overall score.
pub const HINT_THRESHOLD: f64 = 0.9;

/// ATM band half-width |strike/spot - 1|.
pub fn atm_half_width() -> Decimal {
    Decimal::new(5, 2)
}

/// 100 bps ceiling on the mean relative ATM spread.
pub fn max_atm_spread() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketScore {
    pub dte: i32,
    pub rows: usize,
    pub strike_density: bool,
    pub quote_coverage: bool,
    pub atm_spread: bool,
    pub liquidity: bool,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessReport {
    pub symbol: Symbol,
    pub at: DateTime<Utc>,
    pub overall: f64,
    pub buckets: Vec<BucketScore>,
    pub hints: Vec<String>,
}

/// Score a reconstructed chain view. Deterministic: identical views yield
/// identical reports, hints included.
pub fn score(view: &ChainView) -> CompletenessReport {
    let mut by_dte: BTreeMap<i32, Vec<&SnapshotRow>> = BTreeMap::new();
    for row in &view.rows {
        by_dte.entry(row.dte).or_default().push(row);
    }

    let buckets: Vec<BucketScore> = by_dte
        .iter()
        .map(|(&dte, rows)| score_bucket(dte, rows, view.spot))
        .collect();
    let overall = if buckets.is_empty() {
        0.0
    } else {
        buckets.iter().map(|b| b.score).sum::<f64>() / buckets.len() as f64
    };

    let mut hints = Vec::new();
    if overall < HINT_THRESHOLD {
        if view.spot.is_none() {
            hints.push("no underlying price at T".to_string());
        }
        for bucket in &buckets {
            if !bucket.strike_density {
                hints.push(format!(
                    "dte {}: fewer than {MIN_ATM_STRIKES_PER_SIDE} put and {MIN_ATM_STRIKES_PER_SIDE} call strikes within 5% of spot; widen strike coverage",
                    bucket.dte
                ));
            }
            if !bucket.quote_coverage {
                hints.push(format!(
                    "dte {}: under 80% of rows carry both bid and ask; backfill quotes",
                    bucket.dte
                ));
            }
            if !bucket.atm_spread {
                hints.push(format!(
                    "dte {}: mean ATM spread at or above 100 bps; review quote quality",
                    bucket.dte
                ));
            }
            if !bucket.liquidity {
                hints.push(format!(
                    "dte {}: under 70% of rows show open interest or volume; confirm vendor liquidity fields",
                    bucket.dte
                ));
            }
        }
        if buckets.len() < MIN_ACTIVE_BUCKETS {
            hints.push("expand DTE range".to_string());
        }
    }

    CompletenessReport {
        symbol: view.symbol.clone(),
        at: view.at,
        overall,
        buckets,
        hints,
    }
}

fn score_bucket(dte: i32, rows: &[&SnapshotRow], spot: Option<Decimal>) -> BucketScore {
    let total = rows.len();
    let strike_density = has_strike_density(rows, spot);
    let quote_coverage = {
        let quoted = rows
            .iter()
            .filter(|row| row.bid.is_some() && row.ask.is_some())
            .count();
        quoted * 5 >= total * 4
    };
    let atm_spread = mean_atm_spread(rows, spot)
        .map(|mean| mean < max_atm_spread())
        .unwrap_or(false);
    let liquidity = {
        let live = rows
            .iter()
            .filter(|row| row.open_interest.unwrap_or(0) > 0 || row.volume.unwrap_or(0) > 0)
            .count();
        live * 10 >= total * 7
    };

    let mut score = 0.0;
    if strike_density {
        score += STRIKE_DENSITY_WEIGHT;
    }
    if quote_coverage {
        score += QUOTE_COVERAGE_WEIGHT;
    }
    if atm_spread {
        score += ATM_SPREAD_WEIGHT;
    }
    if liquidity {
        score += LIQUIDITY_WEIGHT;
    }

    BucketScore {
        dte,
        rows: total,
        strike_density,
        quote_coverage,
        atm_spread,
        liquidity,
        score,
    }
}

fn row_moneyness(row: &SnapshotRow, spot: Option<Decimal>) -> Option<Decimal> {
    row.moneyness
        .or_else(|| spot.and_then(|s| moneyness(row.strike, s)))
}

fn is_atm(row: &SnapshotRow, spot: Option<Decimal>) -> bool {
    row_moneyness(row, spot)
        .map(|m| m.abs() <= atm_half_width())
        .unwrap_or(false)
}

/// At least three distinct put strikes and three distinct call strikes
/// inside the ATM band.
fn has_strike_density(rows: &[&SnapshotRow], spot: Option<Decimal>) -> bool {
    let mut put_strikes: BTreeSet<Decimal> = BTreeSet::new();
    let mut call_strikes: BTreeSet<Decimal> = BTreeSet::new();
    for row in rows {
        if !is_atm(row, spot) {
            continue;
        }
        match row.right {
            Right::Put => put_strikes.insert(row.strike),
            Right::Call => call_strikes.insert(row.strike),
        };
    }
    put_strikes.len() >= MIN_ATM_STRIKES_PER_SIDE && call_strikes.len() >= MIN_ATM_STRIKES_PER_SIDE
}

/// Mean relative spread `(ask - bid) / mid` over quoted ATM rows; `None`
/// when no ATM row carries a usable two-sided quote.
fn mean_atm_spread(rows: &[&SnapshotRow], spot: Option<Decimal>) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    let mut count = 0u32;
    for row in rows {
        if !is_atm(row, spot) {
            continue;
        }
        let (Some(bid), Some(ask)) = (row.bid, row.ask) else {
            continue;
        };
        let mid = (bid + ask) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            continue;
        }
        let Some(rel) = (ask - bid).checked_div(mid) else {
            continue;
        };
        sum += rel;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        sum.checked_div(Decimal::from(count))
    }
}
