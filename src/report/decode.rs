use std::borrow::Cow;
use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::Value;

use super::Record;
use crate::error::{ExtractError, ExtractResult};

/// Decodes a downloaded report: optionally gzipped, UTF-8 (BOM tolerated)
/// CSV with a header row. Rows come back in file order.
///
/// Short rows get `null` for the missing columns and fields past the last
/// header are dropped, so one ragged line does not cost the whole report.
pub fn decode_report(payload: &[u8]) -> ExtractResult<Vec<Record>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let bytes = match gunzip(payload) {
        Some(inflated) => Cow::Owned(inflated),
        None => Cow::Borrowed(payload),
    };

    let text = std::str::from_utf8(&bytes)
        .map_err(|e| ExtractError::Decode(format!("report is not UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Decode(e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| ExtractError::Decode(e.to_string()))?;
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = row
                    .get(i)
                    .map_or(Value::Null, |v| Value::String(v.to_string()));
                (name.to_string(), value)
            })
            .collect();
        records.push(record);
    }

    Ok(records)
}

/// Any failure, including a truncated stream, means "treat as plain".
fn gunzip(payload: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = GzDecoder::new(payload);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated).ok()?;
    Some(inflated)
}
