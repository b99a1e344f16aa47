//! Candle <-> Arrow record batch conversion
//!
//! Prices and volumes are `Decimal128(38, 12)`; values with more than 12
//! fractional digits are rounded on write.

use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Decimal128Array, StringArray, TimestampMillisecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use rust_decimal::Decimal;

use trading_common::data::{millis_to_utc, Candle, Timeframe};

use super::{ArchiveError, ArchiveResult};

pub const DECIMAL_PRECISION: u8 = 38;
pub const DECIMAL_SCALE: i8 = 12;

pub fn schema() -> SchemaRef {
    let decimal = DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE);
    Arc::new(Schema::new(vec![
        Field::new("exchange", DataType::Utf8, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("timeframe", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("open", decimal.clone(), false),
        Field::new("high", decimal.clone(), false),
        Field::new("low", decimal.clone(), false),
        Field::new("close", decimal.clone(), false),
        Field::new("volume", decimal.clone(), false),
        Field::new("quote_volume", decimal.clone(), true),
        Field::new("trades_count", DataType::UInt64, true),
        Field::new("taker_buy_volume", decimal.clone(), true),
        Field::new("taker_buy_quote_volume", decimal, true),
    ]))
}

fn to_i128(value: Decimal) -> i128 {
    let mut scaled = value;
    scaled.rescale(DECIMAL_SCALE as u32);
    scaled.mantissa()
}

fn from_i128(raw: i128) -> ArchiveResult<Decimal> {
    Decimal::try_from_i128_with_scale(raw, DECIMAL_SCALE as u32)
        .map(|d| d.normalize())
        .map_err(|e| ArchiveError::Schema(format!("decimal out of range: {}", e)))
}

fn decimal_array(values: impl Iterator<Item = Option<Decimal>>) -> ArchiveResult<ArrayRef> {
    let array = values
        .map(|v| v.map(to_i128))
        .collect::<Decimal128Array>()
        .with_precision_and_scale(DECIMAL_PRECISION, DECIMAL_SCALE)?;
    Ok(Arc::new(array))
}

/// Encode candles into one record batch.
pub fn encode(candles: &[Candle]) -> ArchiveResult<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(candles.iter().map(|c| c.exchange.as_str()))),
        Arc::new(StringArray::from_iter_values(candles.iter().map(|c| c.symbol.as_str()))),
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| c.timeframe.as_str()),
        )),
        Arc::new(
            TimestampMillisecondArray::from(
                candles.iter().map(|c| c.timestamp_millis()).collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        decimal_array(candles.iter().map(|c| Some(c.open)))?,
        decimal_array(candles.iter().map(|c| Some(c.high)))?,
        decimal_array(candles.iter().map(|c| Some(c.low)))?,
        decimal_array(candles.iter().map(|c| Some(c.close)))?,
        decimal_array(candles.iter().map(|c| Some(c.volume)))?,
        decimal_array(candles.iter().map(|c| c.quote_volume))?,
        Arc::new(candles.iter().map(|c| c.trades_count).collect::<UInt64Array>()),
        decimal_array(candles.iter().map(|c| c.taker_buy_volume))?,
        decimal_array(candles.iter().map(|c| c.taker_buy_quote_volume))?,
    ];
    Ok(RecordBatch::try_new(schema(), columns)?)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> ArchiveResult<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| ArchiveError::Schema(format!("missing or mistyped column '{}'", name)))
}

fn optional_decimal(array: &Decimal128Array, row: usize) -> ArchiveResult<Option<Decimal>> {
    if array.is_null(row) {
        Ok(None)
    } else {
        from_i128(array.value(row)).map(Some)
    }
}

/// Decode a record batch written by `encode`.
pub fn decode(batch: &RecordBatch) -> ArchiveResult<Vec<Candle>> {
    let exchange = column::<StringArray>(batch, "exchange")?;
    let symbol = column::<StringArray>(batch, "symbol")?;
    let timeframe = column::<StringArray>(batch, "timeframe")?;
    let timestamp = column::<TimestampMillisecondArray>(batch, "timestamp")?;
    let open = column::<Decimal128Array>(batch, "open")?;
    let high = column::<Decimal128Array>(batch, "high")?;
    let low = column::<Decimal128Array>(batch, "low")?;
    let close = column::<Decimal128Array>(batch, "close")?;
    let volume = column::<Decimal128Array>(batch, "volume")?;
    let quote_volume = column::<Decimal128Array>(batch, "quote_volume")?;
    let trades_count = column::<UInt64Array>(batch, "trades_count")?;
    let taker_buy_volume = column::<Decimal128Array>(batch, "taker_buy_volume")?;
    let taker_buy_quote_volume = column::<Decimal128Array>(batch, "taker_buy_quote_volume")?;

    (0..batch.num_rows())
        .map(|row| {
            let tf = Timeframe::from_str(timeframe.value(row))
                .map_err(|e| ArchiveError::Schema(e.to_string()))?;
            let ts = millis_to_utc(timestamp.value(row))
                .map_err(|e| ArchiveError::Schema(e.to_string()))?;
            let mut candle = Candle::new(
                exchange.value(row),
                symbol.value(row),
                tf,
                ts,
                from_i128(open.value(row))?,
                from_i128(high.value(row))?,
                from_i128(low.value(row))?,
                from_i128(close.value(row))?,
                from_i128(volume.value(row))?,
            );
            candle.quote_volume = optional_decimal(quote_volume, row)?;
            candle.trades_count = (!trades_count.is_null(row)).then(|| trades_count.value(row));
            candle.taker_buy_volume = optional_decimal(taker_buy_volume, row)?;
            candle.taker_buy_quote_volume = optional_decimal(taker_buy_quote_volume, row)?;
            Ok(candle)
        })
        .collect()
}
