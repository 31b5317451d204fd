// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Filtered reads over the columnar session files.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use core_types::cancel::CancelToken;
use core_types::types::{moneyness, ContractRow, Right, SnapshotRow};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rust_decimal::Decimal;

use crate::codec::{decode_chain_row, decode_snapshot_row, QuoteColumns, SnapshotColumns};
use crate::ChainStoreError;

/// Open a session file for reading; a missing file is `StorageUnavailable`.
pub fn open_session_file(path: &Path) -> Result<File, ChainStoreError> {
    if !path.is_file() {
        return Err(ChainStoreError::Unavailable(format!(
            "missing session file {}",
            path.display()
        )));
    }
    Ok(File::open(path)?)
}

#[derive(Debug, Clone, Copy)]
pub struct MoneynessBand {
    pub spot: Decimal,
    pub half_width: Decimal,
}

impl MoneynessBand {
    fn admits(&self, strike: Decimal) -> bool {
        moneyness(strike, self.spot)
            .map(|m| m.abs() <= self.half_width)
            .unwrap_or(false)
    }
}

/// Row filter for snapshot reads: instant range, DTE range, moneyness band,
/// and right, all inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotFilter {
    pub ts_min: Option<DateTime<Utc>>,
    pub ts_max: Option<DateTime<Utc>>,
    pub dte_min: Option<i32>,
    pub dte_max: Option<i32>,
    pub right: Option<Right>,
    pub moneyness: Option<MoneynessBand>,
}

impl SnapshotFilter {
    fn matches(&self, row: &SnapshotRow) -> bool {
        if let Some(ts_min) = self.ts_min {
            if row.ts_utc < ts_min {
                return false;
            }
        }
        if let Some(ts_max) = self.ts_max {
            if row.ts_utc > ts_max {
                return false;
            }
        }
        if let Some(dte_min) = self.dte_min {
            if row.dte < dte_min {
                return false;
            }
        }
        if let Some(dte_max) = self.dte_max {
            if row.dte > dte_max {
                return false;
            }
        }
        if let Some(right) = self.right {
            if row.right != right {
                return false;
            }
        }
        if let Some(band) = self.moneyness {
            if !band.admits(row.strike) {
                return false;
            }
        }
        true
    }
}

/// Read the whole daily contract universe in file order.
pub fn read_chain(file: &File) -> Result<Vec<ContractRow>, ChainStoreError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file.try_clone()?)?;
    let columns = QuoteColumns::from_schema(builder.schema())?;
    let reader = builder.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        for index in 0..batch.num_rows() {
            rows.push(decode_chain_row(&batch, index, &columns)?);
        }
    }
    Ok(rows)
}

/// Read snapshot rows matching `filter` in file order. Cancellation is
/// honored between record batches.
pub fn read_snapshots(
    file: &File,
    filter: &SnapshotFilter,
    cancel: Option<&CancelToken>,
) -> Result<Vec<SnapshotRow>, ChainStoreError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file.try_clone()?)?;
    let columns = SnapshotColumns::from_schema(builder.schema())?;
    let reader = builder.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(ChainStoreError::Cancelled);
            }
        }
        let batch = batch?;
        for index in 0..batch.num_rows() {
            let row = decode_snapshot_row(&batch, index, &columns)?;
            if filter.matches(&row) {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{write_chain, write_snapshots, SnapshotWriteOptions};
    use chrono::{NaiveDate, TimeZone};
    use core_types::layout::PartitionLayout;
    use core_types::types::{mid_price, SpotSource, Symbol};
    use tempfile::tempdir;

    fn sym() -> Symbol {
        Symbol::parse("SPX").unwrap()
    }

    fn session() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 15, minute, 0).unwrap()
    }

    fn quote(strike: i64, right: Right, dte_days: u64, minute: u32) -> SnapshotRow {
        let bid = Decimal::new(strike, 2);
        let ask = bid + Decimal::new(50, 2);
        SnapshotRow {
            symbol: sym(),
            session_date: session(),
            ts_utc: ts(minute),
            expiry_date: session() + chrono::Days::new(dte_days),
            strike: Decimal::new(strike, 0),
            right,
            bid: Some(bid),
            ask: Some(ask),
            mid: Some(mid_price(bid, ask)),
            last: None,
            iv: Some(0.17),
            delta: None,
            gamma: None,
            theta: None,
            vega: None,
            open_interest: Some(120),
            volume: Some(40),
            dte: 0, // overwritten by the writer
            moneyness: None,
        }
    }

    fn contract(strike: i64, right: Right, dte_days: u64) -> ContractRow {
        let snapshot = quote(strike, right, dte_days, 0);
        ContractRow {
            symbol: snapshot.symbol,
            session_date: snapshot.session_date,
            ts_utc: snapshot.ts_utc,
            expiry_date: snapshot.expiry_date,
            strike: snapshot.strike,
            right: snapshot.right,
            bid: snapshot.bid,
            ask: snapshot.ask,
            mid: snapshot.mid,
            last: snapshot.last,
            iv: snapshot.iv,
            delta: snapshot.delta,
            gamma: snapshot.gamma,
            theta: snapshot.theta,
            vega: snapshot.vega,
            open_interest: snapshot.open_interest,
            volume: snapshot.volume,
        }
    }

    struct FixedSpot(Decimal);

    impl SpotSource for FixedSpot {
        fn spot(&self, _symbol: &Symbol, _at: DateTime<Utc>) -> Option<Decimal> {
            Some(self.0)
        }
    }

    #[test]
    fn chain_write_read_round_trip_preserves_rows() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let rows = vec![
            contract(4750, Right::Put, 1),
            contract(4775, Right::Call, 1),
            contract(4700, Right::Put, 7),
        ];
        let result = write_chain(&layout, "0.3.0", &sym(), session(), &rows).unwrap();
        assert_eq!(result.rows_written, 3);
        assert_eq!(result.rows_dropped, 0);

        let file = open_session_file(&result.path).unwrap();
        let read = read_chain(&file).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn rewriting_identical_rows_is_byte_identical() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let rows = vec![contract(4750, Right::Put, 1), contract(4775, Right::Call, 1)];
        let first = write_chain(&layout, "0.3.0", &sym(), session(), &rows).unwrap();
        let first_bytes = std::fs::read(&first.path).unwrap();
        let second = write_chain(&layout, "0.3.0", &sym(), session(), &rows).unwrap();
        let second_bytes = std::fs::read(&second.path).unwrap();
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn snapshot_writer_enforces_dte_and_band() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let spot = FixedSpot(Decimal::new(4755, 0));
        let opts = SnapshotWriteOptions {
            spot: Some(&spot),
            ..SnapshotWriteOptions::default()
        };
        let rows = vec![
            quote(4750, Right::Put, 1, 0),    // retained
            quote(4750, Right::Put, 60, 0),   // dte beyond ceiling
            quote(9000, Right::Call, 1, 0),   // far outside the band
        ];
        let result =
            write_snapshots(&layout, "0.3.0", &sym(), session(), rows, &opts).unwrap();
        assert_eq!(result.rows_written, 1);
        assert_eq!(result.rows_dropped, 2);

        let file = open_session_file(&result.path).unwrap();
        let read = read_snapshots(&file, &SnapshotFilter::default(), None).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].dte, 1);
        let stored = read[0].moneyness.expect("moneyness recorded with a spot");
        assert_eq!(
            stored,
            moneyness(Decimal::new(4750, 0), Decimal::new(4755, 0)).unwrap()
        );
    }

    #[test]
    fn crossed_quotes_and_bad_mids_are_dropped() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let mut crossed = quote(4750, Right::Put, 1, 0);
        crossed.bid = Some(Decimal::new(4800, 2));
        crossed.ask = Some(Decimal::new(4700, 2));
        crossed.mid = None;
        let mut bad_mid = quote(4760, Right::Call, 1, 0);
        bad_mid.mid = Some(Decimal::new(1, 0));
        let rows = vec![quote(4755, Right::Call, 1, 0), crossed, bad_mid];
        let result = write_snapshots(
            &layout,
            "0.3.0",
            &sym(),
            session(),
            rows,
            &SnapshotWriteOptions::default(),
        )
        .unwrap();
        assert_eq!(result.rows_written, 1);
        assert_eq!(result.rows_dropped, 2);
    }

    #[test]
    fn snapshot_filter_applies_all_axes() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let rows = vec![
            quote(4750, Right::Put, 1, 0),
            quote(4750, Right::Put, 1, 5),
            quote(4775, Right::Call, 1, 5),
            quote(4750, Right::Put, 7, 5),
        ];
        let result = write_snapshots(
            &layout,
            "0.3.0",
            &sym(),
            session(),
            rows,
            &SnapshotWriteOptions::default(),
        )
        .unwrap();
        let file = open_session_file(&result.path).unwrap();

        // Instant ceiling keeps only minute 0.
        let early = read_snapshots(
            &file,
            &SnapshotFilter {
                ts_max: Some(ts(0)),
                ..SnapshotFilter::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(early.len(), 1);

        // DTE range excludes the weekly.
        let near = read_snapshots(
            &file,
            &SnapshotFilter {
                dte_min: Some(0),
                dte_max: Some(1),
                ..SnapshotFilter::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(near.len(), 3);

        // Right selects calls only.
        let calls = read_snapshots(
            &file,
            &SnapshotFilter {
                right: Some(Right::Call),
                ..SnapshotFilter::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(calls.len(), 1);

        // A tight band keeps the near-the-money put rows only.
        let banded = read_snapshots(
            &file,
            &SnapshotFilter {
                moneyness: Some(MoneynessBand {
                    spot: Decimal::new(4755, 0),
                    half_width: Decimal::new(11, 4),
                }),
                ..SnapshotFilter::default()
            },
            None,
        )
        .unwrap();
        assert!(banded.iter().all(|row| row.strike == Decimal::new(4750, 0)));
        assert_eq!(banded.len(), 3);
    }

    #[test]
    fn cancelled_read_stops_with_cancelled() {
        let dir = tempdir().unwrap();
        let layout = PartitionLayout::new(dir.path());
        let rows = vec![quote(4750, Right::Put, 1, 0)];
        let result = write_snapshots(
            &layout,
            "0.3.0",
            &sym(),
            session(),
            rows,
            &SnapshotWriteOptions::default(),
        )
        .unwrap();
        let file = open_session_file(&result.path).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let read = read_snapshots(&file, &SnapshotFilter::default(), Some(&token));
        assert!(matches!(read, Err(ChainStoreError::Cancelled)));
    }

    #[test]
    fn foreign_parquet_is_a_schema_mismatch() {
        use arrow::array::Int64Array;
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1_i64, 2, 3]))],
        )
        .unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let file = open_session_file(&path).unwrap();
        assert!(matches!(
            read_chain(&file),
            Err(ChainStoreError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn missing_session_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.parquet");
        assert!(matches!(
            open_session_file(&path),
            Err(ChainStoreError::Unavailable(_))
        ));
    }
}
