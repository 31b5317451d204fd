// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! RecordBatch encode/decode for the chain and snapshot schemas.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Date32Array, Decimal128Array, Float64Array, Int32Array, StringArray,
    TimestampMicrosecondArray, UInt64Array,
};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Days, NaiveDate, Utc};
use core_types::schema::{chain_schema, snapshot_schema, DECIMAL_PRECISION, DECIMAL_SCALE};
use core_types::types::{ContractRow, Right, SnapshotRow, Symbol, MONEY_SCALE};
use rust_decimal::Decimal;

use crate::ChainStoreError;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch exists")
}

fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn days_to_date(days: i32) -> NaiveDate {
    if days >= 0 {
        epoch() + Days::new(days as u64)
    } else {
        epoch() - Days::new(days.unsigned_abs() as u64)
    }
}

fn money_to_i128(value: Decimal) -> i128 {
    let mut scaled = value;
    scaled.rescale(MONEY_SCALE);
    scaled.mantissa()
}

fn i128_to_money(raw: i128, scale: u32) -> Decimal {
    Decimal::from_i128_with_scale(raw, scale)
}

fn decimal_array(values: Vec<Option<i128>>) -> Result<Decimal128Array, ChainStoreError> {
    Ok(Decimal128Array::from(values)
        .with_precision_and_scale(DECIMAL_PRECISION, DECIMAL_SCALE)?)
}

struct QuoteArrays {
    symbol: Vec<String>,
    session_date: Vec<i32>,
    ts_utc: Vec<i64>,
    expiry_date: Vec<i32>,
    strike: Vec<Option<i128>>,
    right: Vec<String>,
    bid: Vec<Option<i128>>,
    ask: Vec<Option<i128>>,
    mid: Vec<Option<i128>>,
    last: Vec<Option<i128>>,
    iv: Vec<Option<f64>>,
    delta: Vec<Option<f64>>,
    gamma: Vec<Option<f64>>,
    theta: Vec<Option<f64>>,
    vega: Vec<Option<f64>>,
    open_interest: Vec<Option<u64>>,
    volume: Vec<Option<u64>>,
}

impl QuoteArrays {
    fn with_capacity(len: usize) -> Self {
        Self {
            symbol: Vec::with_capacity(len),
            session_date: Vec::with_capacity(len),
            ts_utc: Vec::with_capacity(len),
            expiry_date: Vec::with_capacity(len),
            strike: Vec::with_capacity(len),
            right: Vec::with_capacity(len),
            bid: Vec::with_capacity(len),
            ask: Vec::with_capacity(len),
            mid: Vec::with_capacity(len),
            last: Vec::with_capacity(len),
            iv: Vec::with_capacity(len),
            delta: Vec::with_capacity(len),
            gamma: Vec::with_capacity(len),
            theta: Vec::with_capacity(len),
            vega: Vec::with_capacity(len),
            open_interest: Vec::with_capacity(len),
            volume: Vec::with_capacity(len),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        symbol: &Symbol,
        session_date: NaiveDate,
        ts_utc: DateTime<Utc>,
        expiry_date: NaiveDate,
        strike: Decimal,
        right: Right,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        mid: Option<Decimal>,
        last: Option<Decimal>,
        iv: Option<f64>,
        delta: Option<f64>,
        gamma: Option<f64>,
        theta: Option<f64>,
        vega: Option<f64>,
        open_interest: Option<u64>,
        volume: Option<u64>,
    ) {
        self.symbol.push(symbol.as_str().to_string());
        self.session_date.push(date_to_days(session_date));
        self.ts_utc.push(ts_utc.timestamp_micros());
        self.expiry_date.push(date_to_days(expiry_date));
        self.strike.push(Some(money_to_i128(strike)));
        self.right.push(right.tag().to_string());
        self.bid.push(bid.map(money_to_i128));
        self.ask.push(ask.map(money_to_i128));
        self.mid.push(mid.map(money_to_i128));
        self.last.push(last.map(money_to_i128));
        self.iv.push(iv);
        self.delta.push(delta);
        self.gamma.push(gamma);
        self.theta.push(theta);
        self.vega.push(vega);
        self.open_interest.push(open_interest);
        self.volume.push(volume);
    }

    fn into_arrays(self) -> Result<Vec<ArrayRef>, ChainStoreError> {
        Ok(vec![
            Arc::new(StringArray::from(self.symbol)),
            Arc::new(Date32Array::from(self.session_date)),
            Arc::new(TimestampMicrosecondArray::from(self.ts_utc).with_timezone("UTC")),
            Arc::new(Date32Array::from(self.expiry_date)),
            Arc::new(decimal_array(self.strike)?),
            Arc::new(StringArray::from(self.right)),
            Arc::new(decimal_array(self.bid)?),
            Arc::new(decimal_array(self.ask)?),
            Arc::new(decimal_array(self.mid)?),
            Arc::new(decimal_array(self.last)?),
            Arc::new(Float64Array::from(self.iv)),
            Arc::new(Float64Array::from(self.delta)),
            Arc::new(Float64Array::from(self.gamma)),
            Arc::new(Float64Array::from(self.theta)),
            Arc::new(Float64Array::from(self.vega)),
            Arc::new(UInt64Array::from(self.open_interest)),
            Arc::new(UInt64Array::from(self.volume)),
        ])
    }
}

pub(crate) fn chain_rows_to_batch(rows: &[ContractRow]) -> Result<RecordBatch, ChainStoreError> {
    let mut arrays = QuoteArrays::with_capacity(rows.len());
    for row in rows {
        arrays.push(
            &row.symbol,
            row.session_date,
            row.ts_utc,
            row.expiry_date,
            row.strike,
            row.right,
            row.bid,
            row.ask,
            row.mid,
            row.last,
            row.iv,
            row.delta,
            row.gamma,
            row.theta,
            row.vega,
            row.open_interest,
            row.volume,
        );
    }
    let schema: SchemaRef = Arc::new(chain_schema());
    Ok(RecordBatch::try_new(schema, arrays.into_arrays()?)?)
}

pub(crate) fn snapshot_rows_to_batch(rows: &[SnapshotRow]) -> Result<RecordBatch, ChainStoreError> {
    let mut arrays = QuoteArrays::with_capacity(rows.len());
    let mut dte: Vec<i32> = Vec::with_capacity(rows.len());
    let mut moneyness: Vec<Option<i128>> = Vec::with_capacity(rows.len());
    for row in rows {
        arrays.push(
            &row.symbol,
            row.session_date,
            row.ts_utc,
            row.expiry_date,
            row.strike,
            row.right,
            row.bid,
            row.ask,
            row.mid,
            row.last,
            row.iv,
            row.delta,
            row.gamma,
            row.theta,
            row.vega,
            row.open_interest,
            row.volume,
        );
        dte.push(row.dte);
        moneyness.push(row.moneyness.map(money_to_i128));
    }
    let mut columns = arrays.into_arrays()?;
    columns.push(Arc::new(Int32Array::from(dte)));
    columns.push(Arc::new(decimal_array(moneyness)?));
    let schema: SchemaRef = Arc::new(snapshot_schema());
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Column indices resolved by name so a reordered or foreign file surfaces
/// as a schema mismatch rather than silently misreading.
pub(crate) struct QuoteColumns {
    symbol: usize,
    session_date: usize,
    ts_utc: usize,
    expiry_date: usize,
    strike: usize,
    right: usize,
    bid: usize,
    ask: usize,
    mid: usize,
    last: usize,
    iv: usize,
    delta: usize,
    gamma: usize,
    theta: usize,
    vega: usize,
    open_interest: usize,
    volume: usize,
}

impl QuoteColumns {
    pub(crate) fn from_schema(schema: &SchemaRef) -> Result<Self, ChainStoreError> {
        Ok(Self {
            symbol: column_index(schema, "symbol")?,
            session_date: column_index(schema, "session_date")?,
            ts_utc: column_index(schema, "ts_utc")?,
            expiry_date: column_index(schema, "expiry_date")?,
            strike: column_index(schema, "strike")?,
            right: column_index(schema, "right")?,
            bid: column_index(schema, "bid")?,
            ask: column_index(schema, "ask")?,
            mid: column_index(schema, "mid")?,
            last: column_index(schema, "last")?,
            iv: column_index(schema, "iv")?,
            delta: column_index(schema, "delta")?,
            gamma: column_index(schema, "gamma")?,
            theta: column_index(schema, "theta")?,
            vega: column_index(schema, "vega")?,
            open_interest: column_index(schema, "open_interest")?,
            volume: column_index(schema, "volume")?,
        })
    }
}

pub(crate) struct SnapshotColumns {
    quote: QuoteColumns,
    dte: usize,
    moneyness: usize,
}

impl SnapshotColumns {
    pub(crate) fn from_schema(schema: &SchemaRef) -> Result<Self, ChainStoreError> {
        Ok(Self {
            quote: QuoteColumns::from_schema(schema)?,
            dte: column_index(schema, "dte")?,
            moneyness: column_index(schema, "moneyness")?,
        })
    }
}

fn column_index(schema: &SchemaRef, name: &str) -> Result<usize, ChainStoreError> {
    schema
        .column_with_name(name)
        .map(|(idx, _)| idx)
        .ok_or_else(|| {
            ChainStoreError::SchemaMismatch(format!("column {name:?} missing from file schema"))
        })
}

fn as_array<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    column: usize,
    name: &str,
) -> Result<&'a T, ChainStoreError> {
    batch
        .column(column)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ChainStoreError::SchemaMismatch(format!("column {name:?} type mismatch")))
}

fn symbol_value(batch: &RecordBatch, column: usize, row: usize) -> Result<Symbol, ChainStoreError> {
    let array = as_array::<StringArray>(batch, column, "symbol")?;
    Symbol::parse(array.value(row))
        .map_err(|err| ChainStoreError::SchemaMismatch(format!("bad symbol value: {err}")))
}

fn right_value(batch: &RecordBatch, column: usize, row: usize) -> Result<Right, ChainStoreError> {
    let array = as_array::<StringArray>(batch, column, "right")?;
    let tag = array.value(row);
    Right::from_tag(tag)
        .ok_or_else(|| ChainStoreError::SchemaMismatch(format!("bad right tag {tag:?}")))
}

fn date_value(
    batch: &RecordBatch,
    column: usize,
    row: usize,
    name: &str,
) -> Result<NaiveDate, ChainStoreError> {
    let array = as_array::<Date32Array>(batch, column, name)?;
    Ok(days_to_date(array.value(row)))
}

fn instant_value(
    batch: &RecordBatch,
    column: usize,
    row: usize,
) -> Result<DateTime<Utc>, ChainStoreError> {
    let array = as_array::<TimestampMicrosecondArray>(batch, column, "ts_utc")?;
    let micros = array.value(row);
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ChainStoreError::SchemaMismatch(format!("timestamp {micros} out of range")))
}

fn money_value(
    batch: &RecordBatch,
    column: usize,
    row: usize,
    name: &str,
) -> Result<Decimal, ChainStoreError> {
    let array = as_array::<Decimal128Array>(batch, column, name)?;
    Ok(i128_to_money(array.value(row), array.scale() as u32))
}

fn money_opt(
    batch: &RecordBatch,
    column: usize,
    row: usize,
    name: &str,
) -> Result<Option<Decimal>, ChainStoreError> {
    let array = as_array::<Decimal128Array>(batch, column, name)?;
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(i128_to_money(array.value(row), array.scale() as u32)))
    }
}

fn f64_opt(
    batch: &RecordBatch,
    column: usize,
    row: usize,
    name: &str,
) -> Result<Option<f64>, ChainStoreError> {
    let array = as_array::<Float64Array>(batch, column, name)?;
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(array.value(row)))
    }
}

fn u64_opt(
    batch: &RecordBatch,
    column: usize,
    row: usize,
    name: &str,
) -> Result<Option<u64>, ChainStoreError> {
    let array = as_array::<UInt64Array>(batch, column, name)?;
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(array.value(row)))
    }
}

pub(crate) fn decode_chain_row(
    batch: &RecordBatch,
    row: usize,
    cols: &QuoteColumns,
) -> Result<ContractRow, ChainStoreError> {
    Ok(ContractRow {
        symbol: symbol_value(batch, cols.symbol, row)?,
        session_date: date_value(batch, cols.session_date, row, "session_date")?,
        ts_utc: instant_value(batch, cols.ts_utc, row)?,
        expiry_date: date_value(batch, cols.expiry_date, row, "expiry_date")?,
        strike: money_value(batch, cols.strike, row, "strike")?,
        right: right_value(batch, cols.right, row)?,
        bid: money_opt(batch, cols.bid, row, "bid")?,
        ask: money_opt(batch, cols.ask, row, "ask")?,
        mid: money_opt(batch, cols.mid, row, "mid")?,
        last: money_opt(batch, cols.last, row, "last")?,
        iv: f64_opt(batch, cols.iv, row, "iv")?,
        delta: f64_opt(batch, cols.delta, row, "delta")?,
        gamma: f64_opt(batch, cols.gamma, row, "gamma")?,
        theta: f64_opt(batch, cols.theta, row, "theta")?,
        vega: f64_opt(batch, cols.vega, row, "vega")?,
        open_interest: u64_opt(batch, cols.open_interest, row, "open_interest")?,
        volume: u64_opt(batch, cols.volume, row, "volume")?,
    })
}

pub(crate) fn decode_snapshot_row(
    batch: &RecordBatch,
    row: usize,
    cols: &SnapshotColumns,
) -> Result<SnapshotRow, ChainStoreError> {
    let quote = decode_chain_row(batch, row, &cols.quote)?;
    let dte_array = as_array::<Int32Array>(batch, cols.dte, "dte")?;
    Ok(SnapshotRow {
        symbol: quote.symbol,
        session_date: quote.session_date,
        ts_utc: quote.ts_utc,
        expiry_date: quote.expiry_date,
        strike: quote.strike,
        right: quote.right,
        bid: quote.bid,
        ask: quote.ask,
        mid: quote.mid,
        last: quote.last,
        iv: quote.iv,
        delta: quote.delta,
        gamma: quote.gamma,
        theta: quote.theta,
        vega: quote.vega,
        open_interest: quote.open_interest,
        volume: quote.volume,
        dte: dte_array.value(row),
        moneyness: money_opt(batch, cols.moneyness, row, "moneyness")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_scaling_round_trips() {
        let value = Decimal::new(47_551_234, 4); // 4755.1234
        let raw = money_to_i128(value);
        assert_eq!(raw, 47_551_234);
        assert_eq!(i128_to_money(raw, MONEY_SCALE), value);
        // Whole-number strikes pad to the fixed scale.
        assert_eq!(money_to_i128(Decimal::new(4750, 0)), 47_500_000);
    }

    #[test]
    fn dates_round_trip_through_days_since_epoch() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(days_to_date(date_to_days(date)), date);
        let early = NaiveDate::from_ymd_opt(1969, 12, 30).unwrap();
        assert_eq!(days_to_date(date_to_days(early)), early);
    }
}
