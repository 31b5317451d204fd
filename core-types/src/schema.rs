// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Arrow schema builders for the columnar session files.

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

/// Decimal128 layout shared by every money column.
pub const DECIMAL_PRECISION: u8 = 18;
pub const DECIMAL_SCALE: i8 = 4;

pub fn money_type() -> DataType {
    DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE)
}

pub fn instant_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

fn quote_fields() -> Vec<Field> {
    vec![
        Field::new("symbol", DataType::Utf8, false),
        Field::new("session_date", DataType::Date32, false),
        Field::new("ts_utc", instant_type(), false),
        Field::new("expiry_date", DataType::Date32, false),
        Field::new("strike", money_type(), false),
        Field::new("right", DataType::Utf8, false),
        Field::new("bid", money_type(), true),
        Field::new("ask", money_type(), true),
        Field::new("mid", money_type(), true),
        Field::new("last", money_type(), true),
        Field::new("iv", DataType::Float64, true),
        Field::new("delta", DataType::Float64, true),
        Field::new("gamma", DataType::Float64, true),
        Field::new("theta", DataType::Float64, true),
        Field::new("vega", DataType::Float64, true),
        Field::new("open_interest", DataType::UInt64, true),
        Field::new("volume", DataType::UInt64, true),
    ]
}

/// Daily contract-universe file schema.
pub fn chain_schema() -> Schema {
    Schema::new(quote_fields())
}

/// Minute snapshot file schema: quote columns plus the derived dte and
/// moneyness columns (stored values must agree with recomputation).
pub fn snapshot_schema() -> Schema {
    let mut fields = quote_fields();
    fields.push(Field::new("dte", DataType::Int32, false));
    fields.push(Field::new("moneyness", money_type(), true));
    Schema::new(fields)
}
