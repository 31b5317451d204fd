// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! The query engine: chain snapshot reconstruction, expiry enumeration,
//! interval bars, session validation, and the storage plumbing behind them.
//!
//! Each engine owns its handle pool, caches, and per-partition write
//! latches; multiple engines in one process are fully independent.

mod cache;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bar_store::BarStoreError;
use chain_store::{
    ChainStoreError, MoneynessBand, SnapshotFilter, SnapshotWriteOptions, WriteResult,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use completeness::CompletenessReport;
use core_types::cancel::CancelToken;
use core_types::config::EngineConfig;
use core_types::error::ErrorKind;
use core_types::layout::{PartitionId, PartitionLayout, BARS_FILE};
use core_types::retry::RetryPolicy;
use core_types::types::{
    default_moneyness_half_width, is_minute_aligned, ChainView, ContractRow, Interval, SnapshotRow,
    SpotSource, Symbol, UnderlyingBar, ViewHint, DTE_CEILING,
};
use handle_pool::{HandlePool, LeaseContext, LeaseError, PoolOptions, PoolResource, PooledHandle};
use log::info;
use manifest::{ManifestError, PartitionStatus, SessionIntegrityReport};
use parking_lot::Mutex;
use rusqlite::Connection;
use rust_decimal::Decimal;
use session_calendar::SessionCalendar;

use crate::cache::QueryCaches;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error(transparent)]
    Bars(#[from] BarStoreError),
    #[error(transparent)]
    Chain(#[from] ChainStoreError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl EngineError {
    /// Stable kind for the external boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::Unavailable(_) => ErrorKind::StorageUnavailable,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::Bars(err) => err.kind(),
            EngineError::Chain(err) => err.kind(),
            EngineError::Manifest(err) => err.kind(),
        }
    }
}

/// Cancellation flag and single external deadline, observed at suspension
/// points: pool acquisition and file reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCtx<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub deadline: Option<Instant>,
}

impl<'a> QueryCtx<'a> {
    fn check(&self) -> Result<(), EngineError> {
        if let Some(cancel) = self.cancel {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled(
                    "cancelled at suspension point".to_string(),
                ));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::Cancelled("query deadline expired".to_string()));
            }
        }
        Ok(())
    }

    fn lease(&self) -> LeaseContext<'a> {
        LeaseContext {
            cancel: self.cancel,
            deadline: self.deadline,
        }
    }
}

/// Chain snapshot request; defaults cover the full retained surface.
#[derive(Debug, Clone)]
pub struct ChainQuery {
    pub symbol: String,
    pub at: DateTime<Utc>,
    pub dte_min: u16,
    pub dte_max: u16,
    pub moneyness_half_width: Decimal,
}

impl ChainQuery {
    pub fn new(symbol: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            at,
            dte_min: 0,
            dte_max: DTE_CEILING,
            moneyness_half_width: default_moneyness_half_width(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BarQuery {
    pub symbol: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: Interval,
}

impl BarQuery {
    pub fn new(symbol: impl Into<String>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            from,
            to,
            interval: Interval::Minute,
        }
    }
}

/// Pooled storage handle: a row-store session or a columnar session file.
enum StorageHandle {
    Bars(Connection),
    Session(File),
}

impl PoolResource for StorageHandle {}

impl StorageHandle {
    fn bars(&self) -> Result<&Connection, EngineError> {
        match self {
            StorageHandle::Bars(conn) => Ok(conn),
            StorageHandle::Session(_) => Err(EngineError::Unavailable(
                "pooled handle type mismatch".to_string(),
            )),
        }
    }

    fn session(&self) -> Result<&File, EngineError> {
        match self {
            StorageHandle::Session(file) => Ok(file),
            StorageHandle::Bars(_) => Err(EngineError::Unavailable(
                "pooled handle type mismatch".to_string(),
            )),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    layout: PartitionLayout,
    calendar: SessionCalendar,
    vocabulary: BTreeSet<Symbol>,
    pool: HandlePool<StorageHandle>,
    caches: QueryCaches,
    write_latches: Mutex<HashMap<PartitionId, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let mut vocabulary = BTreeSet::new();
        for raw in &config.symbols {
            let symbol = Symbol::parse(raw)
                .map_err(|err| EngineError::InvalidArgument(format!("vocabulary: {err}")))?;
            vocabulary.insert(symbol);
        }
        if vocabulary.is_empty() {
            return Err(EngineError::InvalidArgument(
                "symbol vocabulary is empty".to_string(),
            ));
        }
        let pool = HandlePool::new(PoolOptions {
            max_handles: config.pool.max_handles,
            idle_timeout: Duration::from_secs(config.pool.idle_timeout_s),
            sweep_interval: Duration::from_secs(config.pool.sweep_interval_s),
        });
        pool.start_reaper("alpha");
        Ok(Self {
            layout: PartitionLayout::new(&config.root),
            calendar: SessionCalendar,
            vocabulary,
            pool,
            caches: QueryCaches::from_config(&config.cache),
            write_latches: Mutex::new(HashMap::new()),
            retry: RetryPolicy::from_config(&config.write_retry),
            config,
        })
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    pub fn calendar(&self) -> &SessionCalendar {
        &self.calendar
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Minute-aligned chain snapshot reconstruction (latest observation at
    /// or before the instant per contract, DTE and moneyness filtered,
    /// totally ordered).
    pub fn chain_snapshot(
        &self,
        query: &ChainQuery,
        ctx: &QueryCtx<'_>,
    ) -> Result<ChainView, EngineError> {
        let symbol = self.validate_symbol(&query.symbol)?;
        ensure_minute_aligned(query.at)?;
        if query.dte_min > query.dte_max {
            return Err(EngineError::InvalidArgument(format!(
                "dte_min {} exceeds dte_max {}",
                query.dte_min, query.dte_max
            )));
        }
        if query.dte_max > DTE_CEILING {
            return Err(EngineError::InvalidArgument(format!(
                "dte_max {} outside [0, {DTE_CEILING}]",
                query.dte_max
            )));
        }
        if query.moneyness_half_width < Decimal::ZERO {
            return Err(EngineError::InvalidArgument(
                "moneyness half-width is negative".to_string(),
            ));
        }

        let fingerprint = format!(
            "{symbol}|{}|{}|{}-{}",
            fmt_instant(query.at),
            query.moneyness_half_width,
            query.dte_min,
            query.dte_max
        );
        if let Some(view) = self.caches.chains.get(&fingerprint) {
            return Ok(view);
        }
        ctx.check()?;

        let session_date = query.at.date_naive();
        let spot = self.resolve_spot(&symbol, query.at, ctx)?;
        let Some(spot) = spot else {
            let hint = if self.session_has_later_bar(&symbol, query.at, ctx)? {
                ViewHint::BeforeSession
            } else {
                ViewHint::NoUnderlying
            };
            let view = ChainView::empty(symbol, query.at, Some(hint));
            self.caches.chains.put(fingerprint, view.clone());
            return Ok(view);
        };

        let snapshots_path = self.layout.snapshots_path(&symbol, session_date);
        if !snapshots_path.is_file() {
            let view = ChainView {
                symbol,
                at: query.at,
                session_date,
                spot: Some(spot),
                rows: Vec::new(),
                hint: None,
            };
            self.caches.chains.put(fingerprint, view.clone());
            return Ok(view);
        }

        let filter = SnapshotFilter {
            ts_max: Some(query.at),
            dte_min: Some(i32::from(query.dte_min)),
            dte_max: Some(i32::from(query.dte_max)),
            moneyness: Some(MoneynessBand {
                spot,
                half_width: query.moneyness_half_width,
            }),
            ..SnapshotFilter::default()
        };
        let handle = self.rent_session(&snapshots_path, ctx)?;
        let observed = chain_store::read_snapshots(handle.session()?, &filter, ctx.cancel)?;
        drop(handle);
        ctx.check()?;

        let mut latest: HashMap<(NaiveDate, Decimal, core_types::types::Right), SnapshotRow> =
            HashMap::with_capacity(observed.len());
        for row in observed {
            match latest.entry(row.contract_key()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(row);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let held = slot.get();
                    // Last-resort tie-break on equal instants: greater bid+ask.
                    if row.ts_utc > held.ts_utc
                        || (row.ts_utc == held.ts_utc && row.quote_sum() > held.quote_sum())
                    {
                        slot.insert(row);
                    }
                }
            }
        }
        let mut rows: Vec<SnapshotRow> = latest.into_values().collect();
        rows.sort_by(|a, b| a.contract_key().cmp(&b.contract_key()));

        let view = ChainView {
            symbol,
            at: query.at,
            session_date,
            spot: Some(spot),
            rows,
            hint: None,
        };
        self.caches.chains.put(fingerprint, view.clone());
        Ok(view)
    }

    /// Chain snapshot plus its completeness report.
    pub fn completeness(
        &self,
        query: &ChainQuery,
        ctx: &QueryCtx<'_>,
    ) -> Result<CompletenessReport, EngineError> {
        let view = self.chain_snapshot(query, ctx)?;
        Ok(completeness::score(&view))
    }

    /// Sorted distinct expiries observed in the session of `as_of` with
    /// `0 <= DTE <= dte_max`. Session-wide: the set does not depend on the
    /// intra-session position of `as_of`.
    pub fn expiries(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        dte_max: u16,
        ctx: &QueryCtx<'_>,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let symbol = self.validate_symbol(symbol)?;
        ensure_minute_aligned(as_of)?;
        if dte_max > DTE_CEILING {
            return Err(EngineError::InvalidArgument(format!(
                "dte_max {dte_max} outside [0, {DTE_CEILING}]"
            )));
        }
        let session_date = as_of.date_naive();
        ctx.check()?;

        let mut expiries: BTreeSet<NaiveDate> = BTreeSet::new();
        let chain_path = self.layout.chain_path(&symbol, session_date);
        if chain_path.is_file() {
            let handle = self.rent_session(&chain_path, ctx)?;
            for row in chain_store::read_chain(handle.session()?)? {
                expiries.insert(row.expiry_date);
            }
        } else {
            let snapshots_path = self.layout.snapshots_path(&symbol, session_date);
            if snapshots_path.is_file() {
                let handle = self.rent_session(&snapshots_path, ctx)?;
                let all =
                    chain_store::read_snapshots(handle.session()?, &SnapshotFilter::default(), ctx.cancel)?;
                for row in all {
                    expiries.insert(row.expiry_date);
                }
            }
        }
        Ok(expiries
            .into_iter()
            .filter(|expiry| {
                let dte = (*expiry - session_date).num_days();
                dte >= 0 && dte <= i64::from(dte_max)
            })
            .collect())
    }

    /// Interval-aggregated bars over `[from, to]`, ordered ascending.
    pub fn bars(
        &self,
        query: &BarQuery,
        ctx: &QueryCtx<'_>,
    ) -> Result<Vec<UnderlyingBar>, EngineError> {
        let symbol = self.validate_symbol(&query.symbol)?;
        ensure_minute_aligned(query.from)?;
        ensure_minute_aligned(query.to)?;
        if query.from > query.to {
            return Err(EngineError::InvalidArgument(format!(
                "inverted range: {} after {}",
                fmt_instant(query.from),
                fmt_instant(query.to)
            )));
        }
        let fingerprint = format!(
            "{symbol}|{}|{}|{}",
            fmt_instant(query.from),
            fmt_instant(query.to),
            query.interval
        );
        if let Some(bars) = self.caches.bars.get(&fingerprint) {
            return Ok(bars);
        }

        let mut minute_bars = Vec::new();
        let mut any_database = false;
        for (year, month) in months_in_range(query.from.date_naive(), query.to.date_naive()) {
            let path = self.layout.bars_path(&symbol, year, month);
            if !path.is_file() {
                continue;
            }
            any_database = true;
            ctx.check()?;
            let handle = self.rent_bars(&path, ctx)?;
            minute_bars.extend(bar_store::scan_range(
                handle.bars()?,
                &symbol,
                query.from,
                query.to,
            )?);
        }
        if !any_database {
            return Err(EngineError::Unavailable(format!(
                "no bar database for {symbol} in range"
            )));
        }
        let bars: Vec<UnderlyingBar> =
            bar_store::aggregate_bars(minute_bars, query.interval).collect();
        self.caches.bars.put(fingerprint, bars.clone());
        Ok(bars)
    }

    /// Close of the latest bar at or before `at` within its session.
    pub fn spot(
        &self,
        symbol: &str,
        at: DateTime<Utc>,
        ctx: &QueryCtx<'_>,
    ) -> Result<Option<Decimal>, EngineError> {
        let symbol = self.validate_symbol(symbol)?;
        ensure_minute_aligned(at)?;
        self.resolve_spot(&symbol, at, ctx)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Idempotent minute-bar ingest. Batches group by (symbol, month);
    /// each group commits transactionally, republishes its manifest, and
    /// invalidates the symbol's cache entries.
    pub fn put_bars(&self, bars: &[UnderlyingBar]) -> Result<usize, EngineError> {
        let mut grouped: BTreeMap<PartitionId, Vec<UnderlyingBar>> = BTreeMap::new();
        for bar in bars {
            if !self.vocabulary.contains(&bar.symbol) {
                return Err(EngineError::InvalidArgument(format!(
                    "symbol {} not in vocabulary",
                    bar.symbol
                )));
            }
            ensure_minute_aligned(bar.ts_utc)?;
            grouped
                .entry(PartitionId::for_date(bar.symbol.clone(), bar.ts_utc.date_naive()))
                .or_default()
                .push(bar.clone());
        }
        let mut total = 0usize;
        for (partition, rows) in grouped {
            let latch = self.partition_latch(&partition);
            let _write_guard = latch.lock();
            let path = self.layout.bars_path(&partition.symbol, partition.year, partition.month);
            let (written, record_count) = self.retry.retry(
                |_| {
                    let mut conn = bar_store::open_rw(&path)?;
                    let written = bar_store::put_bars(&mut conn, &rows)?;
                    let record_count = bar_store::row_count(&conn)?;
                    Ok::<(usize, u64), BarStoreError>((written, record_count))
                },
                |err| err.is_busy(),
            )?;
            let session_date = rows
                .iter()
                .map(|bar| bar.ts_utc.date_naive())
                .max()
                .expect("non-empty group");
            let sha256 = manifest::sha256_file(&path)
                .map_err(|err| EngineError::Unavailable(err.to_string()))?;
            manifest::record_file(
                &self.layout.partition_dir_of(&partition),
                manifest::ManifestEntry {
                    file_name: BARS_FILE.to_string(),
                    record_count,
                    sha256,
                    symbol: partition.symbol.as_str().to_string(),
                    session_date,
                    created_utc: Utc::now(),
                    build_version: self.config.build_version.clone(),
                },
            )?;
            self.caches.invalidate_symbol(&partition.symbol);
            info!("ingested {written} bars into {partition}");
            total += written;
        }
        Ok(total)
    }

    /// Publish a session's daily contract universe.
    pub fn write_chain(
        &self,
        symbol: &str,
        session_date: NaiveDate,
        rows: &[ContractRow],
    ) -> Result<WriteResult, EngineError> {
        let symbol = self.validate_symbol(symbol)?;
        let partition = PartitionId::for_date(symbol.clone(), session_date);
        let latch = self.partition_latch(&partition);
        let _write_guard = latch.lock();
        let result = chain_store::write_chain(
            &self.layout,
            &self.config.build_version,
            &symbol,
            session_date,
            rows,
        )?;
        self.caches.invalidate_symbol(&symbol);
        Ok(result)
    }

    /// Publish a session's minute snapshots from a lazy producer. Retention
    /// (DTE window, moneyness band against the bar-store spot) is enforced
    /// row by row.
    pub fn write_snapshots<I>(
        &self,
        symbol: &str,
        session_date: NaiveDate,
        rows: I,
    ) -> Result<WriteResult, EngineError>
    where
        I: IntoIterator<Item = SnapshotRow>,
    {
        let symbol = self.validate_symbol(symbol)?;
        let partition = PartitionId::for_date(symbol.clone(), session_date);
        let latch = self.partition_latch(&partition);
        let _write_guard = latch.lock();
        let spot_source = BarSpotSource::new(&self.layout);
        let opts = SnapshotWriteOptions {
            spot: Some(&spot_source),
            ..SnapshotWriteOptions::default()
        };
        let result = chain_store::write_snapshots(
            &self.layout,
            &self.config.build_version,
            &symbol,
            session_date,
            rows,
            &opts,
        )?;
        self.caches.invalidate_symbol(&symbol);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Integrity
    // ------------------------------------------------------------------

    /// Re-hash one month partition against its manifest.
    pub fn verify_partition(
        &self,
        symbol: &str,
        year: i32,
        month: u32,
    ) -> Result<PartitionStatus, EngineError> {
        let symbol = self.validate_symbol(symbol)?;
        let dir = self.layout.partition_dir(&symbol, year, month);
        if !dir.is_dir() {
            return Err(EngineError::Unavailable(format!(
                "missing partition {}",
                dir.display()
            )));
        }
        Ok(manifest::verify_partition(&dir)?)
    }

    /// File verification combined with the expected-vs-actual minute-bar
    /// ratio for one session.
    pub fn validate_session(
        &self,
        symbol: &str,
        session_date: NaiveDate,
    ) -> Result<SessionIntegrityReport, EngineError> {
        let symbol = self.validate_symbol(symbol)?;
        let dir = self.layout.partition_dir_for(&symbol, session_date);
        let partition_status = if dir.is_dir() {
            manifest::verify_partition(&dir)?
        } else {
            PartitionStatus::MetadataMissing
        };
        let bars_path = self.layout.bars_path_for(&symbol, session_date);
        let actual_minute_bars = if bars_path.is_file() {
            let conn = bar_store::open_ro(&bars_path)?;
            bar_store::session_bar_count(&conn, &symbol, session_date)?
        } else {
            0
        };
        let expected_minute_bars = self.calendar.expected_minute_bars(session_date);
        let (status, bar_ratio) =
            manifest::grade_session(&partition_status, expected_minute_bars, actual_minute_bars);
        let metadata_missing = matches!(partition_status, PartitionStatus::MetadataMissing);
        let files = match partition_status {
            PartitionStatus::Corrupted(report) => Some(report),
            _ => None,
        };
        Ok(SessionIntegrityReport {
            symbol: symbol.as_str().to_string(),
            session_date,
            status,
            expected_minute_bars,
            actual_minute_bars,
            bar_ratio,
            metadata_missing,
            files,
        })
    }

    /// Verify every partition under the root; keys are `SYMBOL/YYYY/MM`.
    pub fn verify_root(&self) -> Result<BTreeMap<String, PartitionStatus>, EngineError> {
        let partitions = self
            .layout
            .enumerate_partitions()
            .map_err(|err| EngineError::Unavailable(err.to_string()))?;
        let mut outcomes = BTreeMap::new();
        for id in partitions {
            let dir = self.layout.partition_dir_of(&id);
            outcomes.insert(id.to_string(), manifest::verify_partition(&dir)?);
        }
        Ok(outcomes)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_symbol(&self, raw: &str) -> Result<Symbol, EngineError> {
        let symbol = Symbol::parse(raw)
            .map_err(|err| EngineError::InvalidArgument(err.to_string()))?;
        if !self.vocabulary.contains(&symbol) {
            return Err(EngineError::InvalidArgument(format!(
                "symbol {symbol} not in vocabulary"
            )));
        }
        Ok(symbol)
    }

    fn resolve_spot(
        &self,
        symbol: &Symbol,
        at: DateTime<Utc>,
        ctx: &QueryCtx<'_>,
    ) -> Result<Option<Decimal>, EngineError> {
        let fingerprint = format!("{symbol}|{}", fmt_instant(at));
        if let Some(spot) = self.caches.spot.get(&fingerprint) {
            return Ok(spot);
        }
        ctx.check()?;
        let path = self.layout.bars_path_for(symbol, at.date_naive());
        if !path.is_file() {
            self.caches.spot.put(fingerprint, None);
            return Ok(None);
        }
        let handle = self.rent_bars(&path, ctx)?;
        let spot = bar_store::latest_close_at_or_before(handle.bars()?, symbol, at)?;
        self.caches.spot.put(fingerprint, spot);
        Ok(spot)
    }

    fn session_has_later_bar(
        &self,
        symbol: &Symbol,
        at: DateTime<Utc>,
        ctx: &QueryCtx<'_>,
    ) -> Result<bool, EngineError> {
        let path = self.layout.bars_path_for(symbol, at.date_naive());
        if !path.is_file() {
            return Ok(false);
        }
        let handle = self.rent_bars(&path, ctx)?;
        Ok(bar_store::has_bar_after(handle.bars()?, symbol, at)?)
    }

    fn rent_bars(
        &self,
        path: &Path,
        ctx: &QueryCtx<'_>,
    ) -> Result<PooledHandle<StorageHandle>, EngineError> {
        let key = path.to_string_lossy().to_string();
        self.pool
            .rent(&key, ctx.lease(), || {
                bar_store::open_ro(path)
                    .map(StorageHandle::Bars)
                    .map_err(EngineError::from)
            })
            .map_err(map_lease)
    }

    fn rent_session(
        &self,
        path: &Path,
        ctx: &QueryCtx<'_>,
    ) -> Result<PooledHandle<StorageHandle>, EngineError> {
        let key = path.to_string_lossy().to_string();
        self.pool
            .rent(&key, ctx.lease(), || {
                chain_store::reader::open_session_file(path)
                    .map(StorageHandle::Session)
                    .map_err(EngineError::from)
            })
            .map_err(map_lease)
    }

    fn partition_latch(&self, partition: &PartitionId) -> Arc<Mutex<()>> {
        let mut latches = self.write_latches.lock();
        Arc::clone(
            latches
                .entry(partition.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn map_lease(err: LeaseError<EngineError>) -> EngineError {
    match err {
        LeaseError::Disposed => EngineError::Unavailable("handle pool disposed".to_string()),
        LeaseError::Cancelled => {
            EngineError::Cancelled("cancelled while waiting for a storage handle".to_string())
        }
        LeaseError::DeadlineExceeded => {
            EngineError::Cancelled("deadline expired while waiting for a storage handle".to_string())
        }
        LeaseError::Open(inner) => inner,
    }
}

fn ensure_minute_aligned(at: DateTime<Utc>) -> Result<(), EngineError> {
    if !is_minute_aligned(at) {
        return Err(EngineError::InvalidArgument(format!(
            "timestamp {at} is not minute-aligned"
        )));
    }
    Ok(())
}

fn fmt_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Inclusive (year, month) walk between two dates.
fn months_in_range(from: NaiveDate, to: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let (mut year, mut month) = (from.year(), from.month());
    loop {
        months.push((year, month));
        if (year, month) == (to.year(), to.month()) {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    months
}

/// Write-time spot seam: resolves the minute-aligned close straight from
/// the month databases, memoizing per minute under the partition latch.
struct BarSpotSource<'a> {
    layout: &'a PartitionLayout,
    connections: RefCell<HashMap<PathBuf, Option<Connection>>>,
    memo: RefCell<HashMap<(Symbol, DateTime<Utc>), Option<Decimal>>>,
}

impl<'a> BarSpotSource<'a> {
    fn new(layout: &'a PartitionLayout) -> Self {
        Self {
            layout,
            connections: RefCell::new(HashMap::new()),
            memo: RefCell::new(HashMap::new()),
        }
    }
}

impl SpotSource for BarSpotSource<'_> {
    fn spot(&self, symbol: &Symbol, at: DateTime<Utc>) -> Option<Decimal> {
        let memo_key = (symbol.clone(), at);
        if let Some(known) = self.memo.borrow().get(&memo_key) {
            return *known;
        }
        let path = self.layout.bars_path_for(symbol, at.date_naive());
        let mut connections = self.connections.borrow_mut();
        let conn = connections
            .entry(path.clone())
            .or_insert_with(|| bar_store::open_ro(&path).ok());
        let spot = conn
            .as_ref()
            .and_then(|conn| bar_store::latest_close_at_or_before(conn, symbol, at).ok())
            .flatten();
        self.memo.borrow_mut().insert(memo_key, spot);
        spot
    }
}
