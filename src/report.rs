//! Run summaries and result files.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::engine::RunReport;
use crate::error::Result;
use crate::model::Captured;

/// Render the end-of-run summary as plain text.
pub fn summary(report: &RunReport, sequence: &str) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_summary(&mut out, report, sequence);
    out
}

fn write_summary(out: &mut String, report: &RunReport, sequence: &str) -> std::fmt::Result {
    let stats = &report.stats;
    writeln!(out, "=== {sequence}: run finished ({}) ===", report.reason)?;
    writeln!(
        out,
        "Processed:        {} of {} records",
        stats.total_processed, stats.total_items
    )?;
    writeln!(
        out,
        "Succeeded:        {} ({:.1}%)",
        stats.succeeded,
        stats.success_rate()
    )?;
    writeln!(out, "Failed:           {}", stats.failed)?;
    if stats.skipped > 0 {
        writeln!(out, "Duplicates:       {} skipped", stats.skipped)?;
    }
    writeln!(out, "Total Requests:   {}", stats.total_requests)?;
    writeln!(out, "Total Failures:   {}", stats.total_failures)?;
    writeln!(out, "Average Response: {:.2}ms", stats.avg_latency_ms())?;
    writeln!(
        out,
        "Elapsed:          {:.1}s ({:.1} records/sec, {:.1} req/sec)",
        stats.elapsed_ms as f64 / 1000.0,
        stats.items_per_sec(),
        stats.requests_per_sec()
    )?;

    if !stats.stages.is_empty() {
        writeln!(out)?;
        writeln!(
            out,
            "{:<28}  {:>8}  {:>8}  {:>9}  {:>9}  {:>9}",
            "STAGE", "REQS", "FAILS", "AVG ms", "MIN ms", "MAX ms"
        )?;
        writeln!(out, "{}", "-".repeat(82))?;
        for (name, stage) in &stats.stages {
            writeln!(
                out,
                "{:<28}  {:>8}  {:>8}  {:>9.2}  {:>9.2}  {:>9.2}",
                name,
                stage.requests,
                stage.failures,
                stage.avg_latency_ms(),
                stage.min_latency_ms.unwrap_or(0.0),
                stage.max_latency_ms.unwrap_or(0.0),
            )?;
        }
    }
    Ok(())
}

/// Write the full report as pretty JSON.
pub fn write_json_report(path: &Path, report: &RunReport) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut file, report)?;
    file.write_all(b"\n")?;
    info!(path = %path.display(), "wrote json report");
    Ok(())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write captured values as `id,index,key,captured_at` rows.
pub fn write_captured_csv(path: &Path, captured: &[Captured]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["id", "index", "key", "captured_at"])?;
    for (i, c) in captured.iter().enumerate() {
        writer.write_record([
            value_text(&c.value),
            i.to_string(),
            c.key.clone(),
            c.captured_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;
    info!(path = %path.display(), count = captured.len(), "saved captured ids");
    Ok(())
}

#[derive(Serialize)]
struct CapturedFile<'a> {
    total_count: usize,
    records: &'a [Captured],
}

/// Write captured values as a JSON document.
pub fn write_captured_json(path: &Path, captured: &[Captured]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(
        file,
        &CapturedFile {
            total_count: captured.len(),
            records: captured,
        },
    )?;
    info!(path = %path.display(), count = captured.len(), "saved captured ids");
    Ok(())
}

// ---------------------------------------------------------------------------
// Detailed records
// ---------------------------------------------------------------------------

/// One created record with the generated fields it was created from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub vehicle_id: String,
    pub sequence_number: usize,
    pub vehicle_number: String,
    pub model: String,
    pub year: String,
    pub owner_id: String,
    pub created_timestamp: String,
    pub batch_id: String,
}

/// Join each captured ID with its item payload. Missing payload fields are
/// left empty.
pub fn detail_rows(captured: &[Captured], batch_id: &str) -> Vec<DetailRow> {
    captured
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let field = |name: &str| {
                c.payload
                    .as_ref()
                    .and_then(|p| p.get(name))
                    .map(value_text)
                    .unwrap_or_default()
            };
            DetailRow {
                vehicle_id: value_text(&c.value),
                sequence_number: i + 1,
                vehicle_number: field("vehicle_number"),
                model: field("model"),
                year: field("year"),
                owner_id: field("owner_id"),
                created_timestamp: c.captured_at.to_rfc3339(),
                batch_id: batch_id.to_string(),
            }
        })
        .collect()
}

/// Write detail rows as CSV, header taken from the field names.
pub fn write_detailed_csv(path: &Path, rows: &[DetailRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), count = rows.len(), "saved detailed records");
    Ok(())
}

/// Plain-text table of the first `limit` detail rows.
pub fn detail_preview(rows: &[DetailRow], limit: usize) -> String {
    let mut out = String::new();
    let _ = write_preview(&mut out, rows, limit);
    out
}

fn write_preview(out: &mut String, rows: &[DetailRow], limit: usize) -> std::fmt::Result {
    writeln!(
        out,
        "{:<38}  {:>5}  {:<10}  {:<8}  {:<4}  {:<12}",
        "vehicle_id", "seq", "number", "model", "year", "owner_id"
    )?;
    for row in rows.iter().take(limit) {
        writeln!(
            out,
            "{:<38}  {:>5}  {:<10}  {:<8}  {:<4}  {:<12}",
            row.vehicle_id,
            row.sequence_number,
            row.vehicle_number,
            row.model,
            row.year,
            row.owner_id
        )?;
    }
    Ok(())
}
