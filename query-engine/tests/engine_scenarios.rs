// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! End-to-end scenarios over a seeded on-disk dataset.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_types::config::EngineConfig;
use core_types::types::{
    mid_price, ChainView, ContractRow, Right, SnapshotRow, Symbol, UnderlyingBar, ViewHint,
};
use manifest::{PartitionStatus, SessionStatus};
use query_engine::{BarQuery, ChainQuery, Engine, QueryCtx};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn spx() -> Symbol {
    Symbol::parse("SPX").unwrap()
}

fn session() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, 0).unwrap()
}

fn dec(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

fn bar(ts: DateTime<Utc>, open: i64, close: i64) -> UnderlyingBar {
    UnderlyingBar {
        symbol: spx(),
        ts_utc: ts,
        open: dec(open),
        high: dec(close),
        low: dec(open),
        close: dec(close),
        volume: 100,
    }
}

fn snap_quoted(
    expiry: NaiveDate,
    strike: i64,
    right: Right,
    ts: DateTime<Utc>,
    bid: Decimal,
    ask: Decimal,
) -> SnapshotRow {
    SnapshotRow {
        symbol: spx(),
        session_date: session(),
        ts_utc: ts,
        expiry_date: expiry,
        strike: dec(strike),
        right,
        bid: Some(bid),
        ask: Some(ask),
        mid: Some(mid_price(bid, ask)),
        last: None,
        iv: Some(0.16),
        delta: None,
        gamma: None,
        theta: None,
        vega: None,
        open_interest: Some(150),
        volume: Some(25),
        dte: 0, // recomputed by the writer
        moneyness: None,
    }
}

fn snap(expiry: NaiveDate, strike: i64, right: Right, ts: DateTime<Utc>, bid_cents: i64) -> SnapshotRow {
    let bid = Decimal::new(bid_cents, 2);
    let ask = bid + Decimal::new(50, 2);
    snap_quoted(expiry, strike, right, ts, bid, ask)
}

fn universe_row(row: &SnapshotRow) -> ContractRow {
    ContractRow {
        symbol: row.symbol.clone(),
        session_date: row.session_date,
        ts_utc: row.ts_utc,
        expiry_date: row.expiry_date,
        strike: row.strike,
        right: row.right,
        bid: row.bid,
        ask: row.ask,
        mid: row.mid,
        last: row.last,
        iv: row.iv,
        delta: row.delta,
        gamma: row.gamma,
        theta: row.theta,
        vega: row.vega,
        open_interest: row.open_interest,
        volume: row.volume,
    }
}

/// The observable contract set on 2024-01-15: a 0-DTE call, the next-day
/// ATM pair, and strike ladders on the two following weeklies.
fn contract_set() -> Vec<(NaiveDate, i64, Right)> {
    let mut contracts = vec![
        (date(2024, 1, 15), 4755, Right::Call),
        (date(2024, 1, 16), 4750, Right::Put),
        (date(2024, 1, 16), 4775, Right::Call),
        (date(2024, 1, 22), 4755, Right::Call),
    ];
    for expiry in [date(2024, 1, 22), date(2024, 1, 29)] {
        for strike in [4725, 4750, 4775] {
            contracts.push((expiry, strike, Right::Call));
            contracts.push((expiry, strike, Right::Put));
        }
    }
    contracts
}

fn seeded_engine() -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(EngineConfig::new(dir.path())).unwrap();

    // Minute bars 14:55-14:59 with opens 4750..4754 and closes 4751..4755,
    // then the 15:00 bar closing at the session spot of 4755.
    let mut bars = Vec::new();
    for step in 0..5 {
        let ts = Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 55 + step, 0)
            .unwrap();
        bars.push(bar(ts, 4750 + i64::from(step), 4751 + i64::from(step)));
    }
    bars.push(bar(at(15, 0), 4754, 4755));
    engine.put_bars(&bars).unwrap();

    // One snapshot observation per contract at 15:00, plus a stale 14:59
    // observation of the next-day 4750 put that reconstruction must shadow.
    let mut rows: Vec<SnapshotRow> = contract_set()
        .into_iter()
        .map(|(expiry, strike, right)| snap(expiry, strike, right, at(15, 0), 120))
        .collect();
    rows.push(snap(date(2024, 1, 16), 4750, Right::Put, at(14, 59), 90));
    engine
        .write_snapshots("SPX", session(), rows.clone())
        .unwrap();

    let universe: Vec<ContractRow> = rows[..rows.len() - 1].iter().map(universe_row).collect();
    engine.write_chain("SPX", session(), &universe).unwrap();

    (dir, engine)
}

fn keys(view: &ChainView) -> Vec<(NaiveDate, Decimal, Right)> {
    view.rows.iter().map(|row| row.contract_key()).collect()
}

#[test]
fn happy_path_query_returns_the_full_ordered_chain() {
    let (_dir, engine) = seeded_engine();
    let view = engine
        .chain_snapshot(&ChainQuery::new("SPX", at(15, 0)), &QueryCtx::default())
        .unwrap();

    assert_eq!(view.spot, Some(dec(4755)));
    assert!(view.hint.is_none());

    let expected: Vec<(NaiveDate, Decimal, Right)> = vec![
        (date(2024, 1, 15), dec(4755), Right::Call),
        (date(2024, 1, 16), dec(4750), Right::Put),
        (date(2024, 1, 16), dec(4775), Right::Call),
        (date(2024, 1, 22), dec(4725), Right::Call),
        (date(2024, 1, 22), dec(4725), Right::Put),
        (date(2024, 1, 22), dec(4750), Right::Call),
        (date(2024, 1, 22), dec(4750), Right::Put),
        (date(2024, 1, 22), dec(4755), Right::Call),
        (date(2024, 1, 22), dec(4775), Right::Call),
        (date(2024, 1, 22), dec(4775), Right::Put),
        (date(2024, 1, 29), dec(4725), Right::Call),
        (date(2024, 1, 29), dec(4725), Right::Put),
        (date(2024, 1, 29), dec(4750), Right::Call),
        (date(2024, 1, 29), dec(4750), Right::Put),
        (date(2024, 1, 29), dec(4775), Right::Call),
        (date(2024, 1, 29), dec(4775), Right::Put),
    ];
    assert_eq!(keys(&view), expected);

    // The duplicate-observed contract resolved to its latest observation.
    let shadowed = view
        .rows
        .iter()
        .find(|row| row.contract_key() == (date(2024, 1, 16), dec(4750), Right::Put))
        .unwrap();
    assert_eq!(shadowed.ts_utc, at(15, 0));
    assert_eq!(shadowed.bid, Some(Decimal::new(120, 2)));
}

#[test]
fn identical_queries_are_deterministic_across_engines() {
    let (dir, engine) = seeded_engine();
    let query = ChainQuery::new("SPX", at(15, 0));
    let first = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    let again = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert_eq!(first, again);

    // A second engine over the same disk state observes the same bytes.
    let other = Engine::new(EngineConfig::new(dir.path())).unwrap();
    let fresh = other.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert_eq!(first, fresh);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&fresh).unwrap()
    );
}

#[test]
fn dte_filter_keeps_only_the_weekly() {
    let (_dir, engine) = seeded_engine();
    let mut query = ChainQuery::new("SPX", at(15, 0));
    query.dte_min = 2;
    query.dte_max = 7;
    let view = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert_eq!(view.rows.len(), 7);
    assert!(view
        .rows
        .iter()
        .all(|row| row.expiry_date == date(2024, 1, 22) && row.dte == 7));
}

#[test]
fn zero_dte_bounds_return_only_the_same_day_contract() {
    let (_dir, engine) = seeded_engine();
    let mut query = ChainQuery::new("SPX", at(15, 0));
    query.dte_min = 0;
    query.dte_max = 0;
    let view = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert_eq!(
        keys(&view),
        vec![(date(2024, 1, 15), dec(4755), Right::Call)]
    );
}

#[test]
fn tight_moneyness_band_keeps_only_in_band_strikes() {
    let (_dir, engine) = seeded_engine();
    // |K/4755 - 1| <= 0.001 admits [4750.245, 4759.755]: of the seeded
    // strikes only 4755 qualifies (4750 sits just outside the band).
    let mut query = ChainQuery::new("SPX", at(15, 0));
    query.moneyness_half_width = Decimal::new(1, 3);
    let view = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert_eq!(
        keys(&view),
        vec![
            (date(2024, 1, 15), dec(4755), Right::Call),
            (date(2024, 1, 22), dec(4755), Right::Call),
        ]
    );

    // Zero half-width: exact ATM only.
    let mut query = ChainQuery::new("SPX", at(15, 0));
    query.moneyness_half_width = Decimal::ZERO;
    let view = engine.chain_snapshot(&query, &QueryCtx::default()).unwrap();
    assert!(view.rows.iter().all(|row| row.strike == dec(4755)));
    assert_eq!(view.rows.len(), 2);
}

#[test]
fn instant_after_the_last_observation_returns_the_final_state() {
    let (_dir, engine) = seeded_engine();
    let at_close = engine
        .chain_snapshot(&ChainQuery::new("SPX", at(15, 0)), &QueryCtx::default())
        .unwrap();
    let late = engine
        .chain_snapshot(
            &ChainQuery::new("SPX", Utc.with_ymd_and_hms(2024, 1, 15, 15, 30, 0).unwrap()),
            &QueryCtx::default(),
        )
        .unwrap();
    assert_eq!(keys(&at_close), keys(&late));
    assert_eq!(late.spot, Some(dec(4755)));
}

#[test]
fn pre_open_instant_reports_before_session() {
    let (_dir, engine) = seeded_engine();
    let view = engine
        .chain_snapshot(&ChainQuery::new("SPX", at(14, 0)), &QueryCtx::default())
        .unwrap();
    assert!(view.rows.is_empty());
    assert_eq!(view.hint, Some(ViewHint::BeforeSession));
}

#[test]
fn session_without_underlying_reports_no_underlying() {
    let (_dir, engine) = seeded_engine();
    let next_day = Utc.with_ymd_and_hms(2024, 1, 16, 15, 0, 0).unwrap();
    let view = engine
        .chain_snapshot(&ChainQuery::new("SPX", next_day), &QueryCtx::default())
        .unwrap();
    assert!(view.rows.is_empty());
    assert_eq!(view.hint, Some(ViewHint::NoUnderlying));
}

#[test]
fn spot_resolves_to_the_first_bar_at_session_open() {
    let (_dir, engine) = seeded_engine();
    let open = Utc.with_ymd_and_hms(2024, 1, 15, 14, 55, 0).unwrap();
    let spot = engine.spot("SPX", open, &QueryCtx::default()).unwrap();
    assert_eq!(spot, Some(dec(4751)));
}

#[test]
fn five_minute_aggregation_folds_the_seeded_bars() {
    let (_dir, engine) = seeded_engine();
    let mut query = BarQuery::new(
        "SPX",
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 55, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 59, 0).unwrap(),
    );
    query.interval = "5m".parse().unwrap();
    let bars = engine.bars(&query, &QueryCtx::default()).unwrap();
    assert_eq!(bars.len(), 1);
    let folded = &bars[0];
    assert_eq!(folded.open, dec(4750));
    assert_eq!(folded.high, dec(4755));
    assert_eq!(folded.low, dec(4750));
    assert_eq!(folded.close, dec(4755));
    assert_eq!(folded.volume, 500);
}

#[test]
fn bar_writes_invalidate_cached_reads() {
    let (_dir, engine) = seeded_engine();
    let query = BarQuery::new(
        "SPX",
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 55, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 5, 0).unwrap(),
    );
    let before = engine.bars(&query, &QueryCtx::default()).unwrap();
    assert_eq!(before.len(), 6);

    engine
        .put_bars(&[bar(
            Utc.with_ymd_and_hms(2024, 1, 15, 15, 1, 0).unwrap(),
            4755,
            4756,
        )])
        .unwrap();
    let after = engine.bars(&query, &QueryCtx::default()).unwrap();
    assert_eq!(after.len(), 7);
}

#[test]
fn reingesting_bars_does_not_duplicate_rows() {
    let (_dir, engine) = seeded_engine();
    let duplicate = bar(at(15, 0), 4754, 4755);
    engine.put_bars(&[duplicate]).unwrap();
    let query = BarQuery::new(
        "SPX",
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 55, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(),
    );
    let bars = engine.bars(&query, &QueryCtx::default()).unwrap();
    assert_eq!(bars.len(), 6);
}

#[test]
fn expiry_enumeration_is_session_wide_and_dte_capped() {
    let (_dir, engine) = seeded_engine();
    let all = engine
        .expiries("SPX", at(15, 0), 45, &QueryCtx::default())
        .unwrap();
    assert_eq!(
        all,
        vec![
            date(2024, 1, 15),
            date(2024, 1, 16),
            date(2024, 1, 22),
            date(2024, 1, 29),
        ]
    );

    let capped = engine
        .expiries("SPX", at(15, 0), 7, &QueryCtx::default())
        .unwrap();
    assert_eq!(
        capped,
        vec![date(2024, 1, 15), date(2024, 1, 16), date(2024, 1, 22)]
    );

    // Session-wide: a pre-open as_of sees the same set.
    let pre_open = engine
        .expiries("SPX", at(14, 0), 45, &QueryCtx::default())
        .unwrap();
    assert_eq!(pre_open, all);
}

#[test]
fn complete_two_bucket_dataset_scores_one_with_no_hints() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(EngineConfig::new(dir.path())).unwrap();
    engine.put_bars(&[bar(at(15, 0), 4754, 4755)]).unwrap();

    let bid = Decimal::new(998, 2); // 9.98 / 10.02: a 40 bps spread
    let ask = Decimal::new(1002, 2);
    let mut rows = Vec::new();
    for expiry in [date(2024, 1, 16), date(2024, 1, 22)] {
        for strike in [4740, 4745, 4750] {
            rows.push(snap_quoted(expiry, strike, Right::Put, at(15, 0), bid, ask));
        }
        for strike in [4760, 4765, 4770] {
            rows.push(snap_quoted(expiry, strike, Right::Call, at(15, 0), bid, ask));
        }
    }
    engine.write_snapshots("SPX", session(), rows).unwrap();

    let report = engine
        .completeness(&ChainQuery::new("SPX", at(15, 0)), &QueryCtx::default())
        .unwrap();
    assert_eq!(report.buckets.len(), 2);
    for bucket in &report.buckets {
        assert!((bucket.score - 1.0).abs() < 1e-9);
    }
    assert!((report.overall - 1.0).abs() < 1e-9);
    assert!(report.hints.is_empty());
}

#[test]
fn corrupting_one_file_is_reported_exactly() {
    let (_dir, engine) = seeded_engine();
    let chain_path = engine.layout().chain_path(&spx(), session());
    let mut bytes = std::fs::read(&chain_path).unwrap();
    let flip_at = bytes.len() / 2;
    bytes[flip_at] ^= 0xff;
    std::fs::write(&chain_path, &bytes).unwrap();

    match engine.verify_partition("SPX", 2024, 1).unwrap() {
        PartitionStatus::Corrupted(report) => {
            assert_eq!(
                report.corrupted_files,
                vec![chain_path.file_name().unwrap().to_str().unwrap().to_string()]
            );
            assert!(report.missing_files.is_empty());
            assert!(report.unexpected_files.is_empty());
            assert_eq!(report.verified_files, report.total_files - 1);
        }
        other => panic!("expected Corrupted, got {other:?}"),
    }
}

#[test]
fn partially_seeded_session_grades_corrupted_on_bar_ratio() {
    let (_dir, engine) = seeded_engine();
    // Six observed bars against 390 expected.
    let report = engine.validate_session("SPX", session()).unwrap();
    assert_eq!(report.expected_minute_bars, 390);
    assert_eq!(report.actual_minute_bars, 6);
    assert_eq!(report.status, SessionStatus::Corrupted);
    assert!(!report.metadata_missing);
}

#[test]
fn closed_sessions_validate_on_files_alone() {
    let (_dir, engine) = seeded_engine();
    // Saturday within the seeded month: expected bars 0.
    let report = engine.validate_session("SPX", date(2024, 1, 13)).unwrap();
    assert_eq!(report.expected_minute_bars, 0);
    assert_eq!(report.status, SessionStatus::Valid);
    assert!((report.bar_ratio - 1.0).abs() < f64::EPSILON);
}

#[test]
fn verify_root_enumerates_the_seeded_partition() {
    let (_dir, engine) = seeded_engine();
    let outcomes = engine.verify_root().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes.get("SPX/2024/01"), Some(&PartitionStatus::Valid));
}
