//! Work sources: CSV key columns, sample files, synthetic records.

use std::path::Path;

use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::WorkItem;

/// Read the `column` values of a headed CSV file, in file order.
///
/// Values are trimmed; empty cells are skipped.
pub fn read_keys(path: &Path, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let position = reader
        .headers()?
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| {
            Error::Config(format!("column {column} not found in {}", path.display()))
        })?;

    let mut keys = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(position).filter(|v| !v.is_empty()) {
            keys.push(value.to_string());
        }
    }

    info!(path = %path.display(), column, records = keys.len(), "loaded work source");
    Ok(keys)
}

/// Read keys from a CSV file and wrap them as work items.
pub fn read_items(path: &Path, column: &str) -> Result<Vec<WorkItem>> {
    Ok(read_keys(path, column)?
        .into_iter()
        .map(WorkItem::new)
        .collect())
}

/// Write a one-column sample file with keys `USER001..`.
pub fn write_sample_csv(path: &Path, column: &str, count: usize) -> Result<()> {
    let width = count.to_string().len().max(3);
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([column])?;
    for i in 1..=count {
        writer.write_record([format!("USER{i:0width$}")])?;
    }
    writer.flush()?;

    info!(path = %path.display(), count, "created sample csv");
    Ok(())
}

/// Generated records for bulk creation, keyed by vehicle number.
pub fn synthetic_items(total: usize) -> Vec<WorkItem> {
    (0..total)
        .map(|i| {
            let vehicle_number = format!("VH{i:06}");
            WorkItem::new(vehicle_number.clone()).with_payload(json!({
                "index": i,
                "vehicle_number": vehicle_number,
                "model": format!("Model_{}", i % 10),
                "year": 2020 + (i % 5),
                "owner_id": format!("OWNER_{i}"),
            }))
        })
        .collect()
}
