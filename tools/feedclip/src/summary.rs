//! Run summary output.

use anyhow::{Context, Result};
use feedclip_transit::pipeline::{ExtractSummary, TableCount};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Serialize)]
struct SummaryFile<'a> {
    tool: &'static str,
    version: &'static str,
    input: &'a Path,
    #[serde(flatten)]
    summary: &'a ExtractSummary,
}

fn log_table(name: &str, count: &TableCount) {
    log::info!("{:<15} {:>8} of {:>8} rows kept", name, count.kept, count.seen);
}

pub fn log_summary(summary: &ExtractSummary) {
    log::info!("=== Extraction Statistics ===");
    log::info!("Region: {}", summary.region);
    log_table("stops", &summary.stops);
    log_table("stop_times", &summary.stop_times);
    log_table("trips", &summary.trips);
    log_table("routes", &summary.routes);
    log_table("shapes", &summary.shapes);
    if let Some(calendar) = &summary.calendar {
        log_table("calendar", calendar);
    }
    if let Some(calendar_dates) = &summary.calendar_dates {
        log_table("calendar_dates", calendar_dates);
    }

    let shapes = &summary.shape_stats;
    log::info!(
        "Shapes: {} ({} clipped, {} connected from stops)",
        summary.shape_count,
        shapes.clipped,
        shapes.fallback_missing + shapes.fallback_degenerate + shapes.fallback_empty_clip
    );

    let reindex = &summary.reindex;
    if reindex.rows_malformed > 0 || shapes.malformed_points > 0 {
        log::warn!(
            "Malformed rows skipped: {} stop times, {} shape points",
            reindex.rows_malformed,
            shapes.malformed_points
        );
    }
    if reindex.trips_by_departure > 0 {
        log::warn!("Trips ordered by departure time: {}", reindex.trips_by_departure);
    }
    if summary.prune.total_removed() > 0 {
        log::info!("Rows removed by cross-reference pruning: {}", summary.prune.total_removed());
    }

    if let Some(report) = &summary.validation {
        log::info!("Validation: {:?} (exit code {:?})", report.verdict, report.exit_code);
        for file in &report.report_files {
            log::info!("  Report: {}", file.display());
        }
    }
}

/// Write the summary as pretty-printed JSON.
pub fn write_summary_json(summary: &ExtractSummary, input: &Path, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let document = SummaryFile {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        input,
        summary,
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &document)?;
    Ok(())
}
