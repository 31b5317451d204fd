// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Atomic parquet publication for chain and snapshot files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, Utc};
use core_types::layout::PartitionLayout;
use core_types::schema::{chain_schema, snapshot_schema};
use core_types::types::{
    days_to_expiry, mid_price, moneyness, ContractRow, SnapshotRow, SpotSource, Symbol,
    DTE_CEILING, MONEY_SCALE,
};
use log::{debug, info};
use manifest::ManifestEntry;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::codec::{chain_rows_to_batch, snapshot_rows_to_batch};
use crate::ChainStoreError;

/// Snapshot writes batch by row group so an unbounded producer never
/// materialises a whole session in memory.
pub const ROW_GROUP_SIZE: usize = 8_192;

/// One ulp at the money scale: the tolerance for stored derived values.
fn money_ulp() -> Decimal {
    Decimal::new(1, MONEY_SCALE)
}

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub path: PathBuf,
    pub rows_written: u64,
    pub rows_dropped: u64,
    pub sha256: String,
}

/// Retention policy applied row-by-row on the snapshot write path.
pub struct SnapshotWriteOptions<'a> {
    pub dte_min: u16,
    pub dte_max: u16,
    pub moneyness_half_width: Decimal,
    /// Minute-aligned spot resolver; without one the moneyness band cannot
    /// be enforced and stored moneyness passes through unchanged.
    pub spot: Option<&'a dyn SpotSource>,
}

impl<'a> Default for SnapshotWriteOptions<'a> {
    fn default() -> Self {
        Self {
            dte_min: 0,
            dte_max: DTE_CEILING,
            moneyness_half_width: core_types::types::default_moneyness_half_width(),
            spot: None,
        }
    }
}

/// Write the daily contract universe. Atomic: temp file, hash, rename,
/// then manifest publication; a failure at any step leaves the prior state.
pub fn write_chain(
    layout: &PartitionLayout,
    build_version: &str,
    symbol: &Symbol,
    session_date: NaiveDate,
    rows: &[ContractRow],
) -> Result<WriteResult, ChainStoreError> {
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = 0u64;
    for row in rows {
        match validate_chain_row(symbol, session_date, row) {
            Ok(()) => kept.push(row.clone()),
            Err(reason) => {
                dropped += 1;
                debug!("chain row dropped: {reason}");
            }
        }
    }
    let final_path = layout.chain_path(symbol, session_date);
    let mut sink = AtomicParquet::create(&final_path, Arc::new(chain_schema()))?;
    if !kept.is_empty() {
        sink.write(&chain_rows_to_batch(&kept)?)?;
    }
    let sha256 = sink.finish()?;
    record_manifest(
        &final_path,
        kept.len() as u64,
        &sha256,
        symbol,
        session_date,
        build_version,
    )?;
    info!(
        "wrote chain {} ({} rows, {} dropped)",
        final_path.display(),
        kept.len(),
        dropped
    );
    Ok(WriteResult {
        path: final_path,
        rows_written: kept.len() as u64,
        rows_dropped: dropped,
        sha256,
    })
}

/// Write a session's minute snapshots from a lazy producer, enforcing the
/// DTE window and moneyness band at write time.
pub fn write_snapshots<I>(
    layout: &PartitionLayout,
    build_version: &str,
    symbol: &Symbol,
    session_date: NaiveDate,
    rows: I,
    opts: &SnapshotWriteOptions<'_>,
) -> Result<WriteResult, ChainStoreError>
where
    I: IntoIterator<Item = SnapshotRow>,
{
    let final_path = layout.snapshots_path(symbol, session_date);
    let mut sink = AtomicParquet::create(&final_path, Arc::new(snapshot_schema()))?;
    let mut buffer: Vec<SnapshotRow> = Vec::with_capacity(ROW_GROUP_SIZE);
    let mut written = 0u64;
    let mut dropped = 0u64;
    for row in rows {
        match conform_snapshot_row(symbol, session_date, row, opts) {
            Ok(row) => {
                buffer.push(row);
                if buffer.len() >= ROW_GROUP_SIZE {
                    written += buffer.len() as u64;
                    sink.write(&snapshot_rows_to_batch(&buffer)?)?;
                    buffer.clear();
                }
            }
            Err(reason) => {
                dropped += 1;
                debug!("snapshot row dropped: {reason}");
            }
        }
    }
    if !buffer.is_empty() {
        written += buffer.len() as u64;
        sink.write(&snapshot_rows_to_batch(&buffer)?)?;
        buffer.clear();
    }
    let sha256 = sink.finish()?;
    record_manifest(
        &final_path,
        written,
        &sha256,
        symbol,
        session_date,
        build_version,
    )?;
    info!(
        "wrote snapshots {} ({written} rows, {dropped} dropped)",
        final_path.display()
    );
    Ok(WriteResult {
        path: final_path,
        rows_written: written,
        rows_dropped: dropped,
        sha256,
    })
}

fn validate_chain_row(
    symbol: &Symbol,
    session_date: NaiveDate,
    row: &ContractRow,
) -> Result<(), String> {
    if row.symbol != *symbol {
        return Err(format!("symbol {} does not match {symbol}", row.symbol));
    }
    if row.session_date != session_date {
        return Err(format!(
            "session date {} does not match {session_date}",
            row.session_date
        ));
    }
    check_dte(row.expiry_date, session_date, 0, DTE_CEILING)?;
    check_quote(row.bid, row.ask, row.mid)
}

fn conform_snapshot_row(
    symbol: &Symbol,
    session_date: NaiveDate,
    mut row: SnapshotRow,
    opts: &SnapshotWriteOptions<'_>,
) -> Result<SnapshotRow, String> {
    if row.symbol != *symbol {
        return Err(format!("symbol {} does not match {symbol}", row.symbol));
    }
    if row.session_date != session_date {
        return Err(format!(
            "session date {} does not match {session_date}",
            row.session_date
        ));
    }
    let dte = check_dte(row.expiry_date, session_date, opts.dte_min, opts.dte_max)?;
    check_quote(row.bid, row.ask, row.mid)?;
    // Stored derived columns always agree with recomputation.
    row.dte = dte;
    if let Some(source) = opts.spot {
        if let Some(spot) = source.spot(symbol, row.ts_utc) {
            let m = moneyness(row.strike, spot)
                .ok_or_else(|| "zero spot resolves no moneyness".to_string())?;
            if m.abs() > opts.moneyness_half_width {
                return Err(format!(
                    "strike {} outside the {} band around spot {spot}",
                    row.strike, opts.moneyness_half_width
                ));
            }
            row.moneyness = Some(m);
        } else {
            row.moneyness = None;
        }
    }
    Ok(row)
}

fn check_dte(
    expiry: NaiveDate,
    session_date: NaiveDate,
    dte_min: u16,
    dte_max: u16,
) -> Result<i32, String> {
    let dte = days_to_expiry(expiry, session_date);
    if dte < i64::from(dte_min) || dte > i64::from(dte_max) {
        return Err(format!("dte {dte} outside [{dte_min}, {dte_max}]"));
    }
    Ok(dte as i32)
}

fn check_quote(
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    mid: Option<Decimal>,
) -> Result<(), String> {
    if let (Some(bid), Some(ask)) = (bid, ask) {
        if bid > ask {
            return Err(format!("crossed quote bid {bid} > ask {ask}"));
        }
        if let Some(mid) = mid {
            if (mid - mid_price(bid, ask)).abs() > money_ulp() {
                return Err(format!("mid {mid} disagrees with (bid+ask)/2"));
            }
        }
    }
    Ok(())
}

fn record_manifest(
    final_path: &Path,
    record_count: u64,
    sha256: &str,
    symbol: &Symbol,
    session_date: NaiveDate,
    build_version: &str,
) -> Result<(), ChainStoreError> {
    let partition_dir = final_path
        .parent()
        .ok_or_else(|| ChainStoreError::Unavailable("file has no partition dir".to_string()))?;
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ChainStoreError::Unavailable("file has no name".to_string()))?;
    manifest::record_file(
        partition_dir,
        ManifestEntry {
            file_name: file_name.to_string(),
            record_count,
            sha256: sha256.to_string(),
            symbol: symbol.as_str().to_string(),
            session_date,
            created_utc: Utc::now(),
            build_version: build_version.to_string(),
        },
    )?;
    Ok(())
}

/// Temp-write-then-rename parquet sink; the rename happens only after the
/// writer closed cleanly and the content hash is known.
struct AtomicParquet {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: ArrowWriter<File>,
}

impl AtomicParquet {
    fn create(final_path: &Path, schema: SchemaRef) -> Result<Self, ChainStoreError> {
        let parent = final_path
            .parent()
            .ok_or_else(|| ChainStoreError::Unavailable("file has no partition dir".to_string()))?;
        std::fs::create_dir_all(parent)?;
        let name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChainStoreError::Unavailable("file has no name".to_string()))?;
        let temp_path = parent.join(format!("{name}.tmp-{}", Uuid::new_v4()));
        let file = File::create(&temp_path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(Default::default()))
            .set_max_row_group_size(ROW_GROUP_SIZE)
            .build();
        let writer = ArrowWriter::try_new(file, schema, Some(props))?;
        Ok(Self {
            temp_path,
            final_path: final_path.to_path_buf(),
            writer,
        })
    }

    fn write(&mut self, batch: &RecordBatch) -> Result<(), ChainStoreError> {
        self.writer.write(batch)?;
        Ok(())
    }

    fn finish(self) -> Result<String, ChainStoreError> {
        self.writer.close()?;
        let sha256 = manifest::sha256_file(&self.temp_path)?;
        std::fs::rename(&self.temp_path, &self.final_path)?;
        Ok(sha256)
    }
}
