//! Volume-by-price aggregation over an uploaded OHLCV CSV.
//!
//! Rows inside an inclusive time window are grouped by exact price for each
//! of the open/close/high/low columns; volume is summed and the first
//! timestamp (in file order) is kept for every price.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{json, Value};

pub const EMPTY_RANGE_MESSAGE: &str = "No data found in selected time range.";

const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M";
const OUTPUT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ROW_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];
const PRICE_COLUMNS: [&str; 4] = ["open", "close", "high", "low"];

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Time parsing error: {0}")]
    TimeWindow(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV is missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("Invalid number '{value}' in column '{column}' (row {row})")]
    BadNumber {
        column: String,
        value: String,
        row: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct VolumeReport {
    pub symbol: String,
    pub timeframe: String,
    pub volume_vs_open: Vec<Value>,
    pub volume_vs_close: Vec<Value>,
    pub volume_vs_high: Vec<Value>,
    pub volume_vs_low: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One parsed row. Price slots follow `PRICE_COLUMNS`; `None` when the
/// column is absent or the cell is empty.
struct Row {
    time: Option<NaiveDateTime>,
    volume: f64,
    prices: [Option<f64>; 4],
}

pub fn aggregate_volume(
    csv_bytes: &[u8],
    symbol: &str,
    timeframe: &str,
    start_time: &str,
    end_time: &str,
) -> Result<VolumeReport, AggregateError> {
    let rows = parse_rows(csv_bytes)?;
    let start = parse_window_bound(start_time)?;
    let end = parse_window_bound(end_time)?;

    let in_range: Vec<&Row> = rows
        .iter()
        .filter(|r| matches!(r.time, Some(t) if t >= start && t <= end))
        .collect();

    let mut report = VolumeReport {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        volume_vs_open: Vec::new(),
        volume_vs_close: Vec::new(),
        volume_vs_high: Vec::new(),
        volume_vs_low: Vec::new(),
        message: None,
    };

    if in_range.is_empty() {
        tracing::info!(symbol, start_time, end_time, "No rows in selected time range");
        report.message = Some(EMPTY_RANGE_MESSAGE.to_string());
        return Ok(report);
    }

    report.volume_vs_open = group_by_price(&in_range, 0);
    report.volume_vs_close = group_by_price(&in_range, 1);
    report.volume_vs_high = group_by_price(&in_range, 2);
    report.volume_vs_low = group_by_price(&in_range, 3);
    tracing::info!(
        symbol,
        rows = in_range.len(),
        open_levels = report.volume_vs_open.len(),
        "Volume aggregated"
    );
    Ok(report)
}

fn parse_window_bound(value: &str) -> Result<NaiveDateTime, AggregateError> {
    NaiveDateTime::parse_from_str(value.trim(), WINDOW_FORMAT)
        .map_err(|e| AggregateError::TimeWindow(format!("'{}': {}", value, e)))
}

/// Strip any `+HH:MM` offset and parse as a naive timestamp. Anything that
/// does not parse yields `None` and never matches a window.
pub fn parse_row_time(raw: &str) -> Option<NaiveDateTime> {
    let naive = raw.split('+').next().unwrap_or("").trim();
    if naive.is_empty() {
        return None;
    }
    ROW_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(naive, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_rows(csv_bytes: &[u8]) -> Result<Vec<Row>, AggregateError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_bytes);
    let headers = reader.headers()?.clone();
    let index_of = |name: &str| headers.iter().position(|h| h == name);

    let time_idx = index_of("time").ok_or(AggregateError::MissingColumn("time"))?;
    let volume_idx = index_of("Volume").ok_or(AggregateError::MissingColumn("Volume"))?;
    let price_idx: Vec<Option<usize>> = PRICE_COLUMNS.iter().map(|c| index_of(c)).collect();

    let mut rows = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let record = record?;
        let row_no = n + 1;
        let cell = |idx: usize| record.get(idx).unwrap_or("");

        let volume = parse_number(&headers[volume_idx], cell(volume_idx), row_no)?.unwrap_or(0.0);
        let mut prices = [None; 4];
        for (slot, idx) in price_idx.iter().enumerate() {
            if let Some(idx) = idx {
                prices[slot] = parse_number(&headers[*idx], cell(*idx), row_no)?;
            }
        }

        rows.push(Row {
            time: parse_row_time(cell(time_idx)),
            volume,
            prices,
        });
    }
    Ok(rows)
}

fn parse_number(column: &str, value: &str, row: usize) -> Result<Option<f64>, AggregateError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| AggregateError::BadNumber {
            column: column.to_string(),
            value: value.to_string(),
            row,
        })
}

fn group_by_price(rows: &[&Row], slot: usize) -> Vec<Value> {
    struct Level {
        price: f64,
        volume: f64,
        first_time: NaiveDateTime,
    }

    let mut levels: Vec<Level> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();

    for row in rows {
        let (Some(price), Some(time)) = (row.prices[slot], row.time) else {
            continue;
        };
        // -0.0 and 0.0 are the same price
        let key = if price == 0.0 { 0.0f64 } else { price }.to_bits();
        match index.get(&key) {
            Some(&i) => levels[i].volume += row.volume,
            None => {
                index.insert(key, levels.len());
                levels.push(Level {
                    price,
                    volume: row.volume,
                    first_time: time,
                });
            }
        }
    }

    levels.sort_by(|a, b| a.price.total_cmp(&b.price));

    let column = PRICE_COLUMNS[slot];
    levels
        .into_iter()
        .map(|l| {
            let mut record = serde_json::Map::new();
            record.insert(column.to_string(), json!(l.price));
            record.insert("Volume".to_string(), json!(l.volume));
            record.insert(
                "time".to_string(),
                json!(l.first_time.format(OUTPUT_TIME_FORMAT).to_string()),
            );
            Value::Object(record)
        })
        .collect()
}
