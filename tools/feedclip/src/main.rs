use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use feedclip_transit::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

mod region;
mod summary;

use region::{GeoJsonRegion, PbfHeaderRegion};
use summary::{log_summary, write_summary_json};

fn parse_bbox(value: &str) -> std::result::Result<BoundingRegion, String> {
    value.parse().map_err(|err: ExtractError| err.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedclip",
    author,
    version,
    about = "Extract a regional subset of a GTFS feed",
    long_about = "Keeps the stops inside a bounding region and everything that still refers to them.\n\n\
                  Stop times are renumbered per trip, trips left with fewer than two stops are \
                  dropped, every kept trip gets its own shape clipped to the region, and the \
                  remaining tables are pruned until every reference resolves."
)]
#[command(group(ArgGroup::new("region").required(true).args(["bbox", "region_geojson", "region_pbf"])))]
struct Args {
    /// Source GTFS feed directory
    #[arg(short, long)]
    input: PathBuf,

    /// Output feed directory
    #[arg(short, long)]
    output: PathBuf,

    /// Region as min_lon,min_lat,max_lon,max_lat
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<BoundingRegion>,

    /// Use the bounding rectangle of the first polygon in this GeoJSON file
    #[arg(long)]
    region_geojson: Option<PathBuf>,

    /// Use the bounding box from the header of this OSM PBF extract
    #[arg(long)]
    region_pbf: Option<PathBuf>,

    /// Replace the output directory if it exists
    #[arg(long)]
    overwrite: bool,

    /// Validator program to run on the extracted feed
    #[arg(long)]
    validator: Option<String>,

    /// Validator argument; {feed} and {report} are substituted (repeatable)
    #[arg(long = "validator-arg", allow_hyphen_values = true)]
    validator_args: Vec<String>,

    /// Directory for validator reports (default: <output>-validation)
    #[arg(long)]
    validator_report_dir: Option<PathBuf>,

    /// Seconds to wait for validator output after it exits
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Write a JSON run summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Verbose output (show debug messages)
    #[arg(short, long)]
    verbose: bool,
}

fn region_source(args: &Args) -> Result<Box<dyn RegionSource>> {
    if let Some(bbox) = args.bbox {
        log::info!("Region: bounding box {}", bbox);
        return Ok(Box::new(FixedRegion(bbox)));
    }
    if let Some(path) = &args.region_geojson {
        log::info!("Region: GeoJSON {}", path.display());
        return Ok(Box::new(GeoJsonRegion::new(path)));
    }
    if let Some(path) = &args.region_pbf {
        log::info!("Region: PBF header {}", path.display());
        return Ok(Box::new(PbfHeaderRegion::new(path)));
    }
    bail!("One of --bbox, --region-geojson or --region-pbf is required")
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    log::info!("=== GTFS Regional Extract ===");
    log::info!("Input: {}", args.input.display());
    log::info!("Output: {}", args.output.display());

    if !args.input.is_dir() {
        bail!("Input feed directory does not exist: {}", args.input.display());
    }

    let mut extractor = FeedExtractor::new(region_source(&args)?);

    if let Some(program) = &args.validator {
        log::info!("Validator: {}", program);
        let mut validator = ProcessValidator::new(program.as_str())
            .with_args(args.validator_args.iter().cloned())
            .with_drain_timeout(Duration::from_secs(args.drain_timeout_secs));
        if let Some(dir) = &args.validator_report_dir {
            validator = validator.with_report_dir(dir);
        }
        extractor = extractor.with_validator(validator);
    }

    let options = ExtractOptions::new(&args.input, &args.output).overwrite(args.overwrite);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .context("Invalid progress template")?,
    );
    pb.set_message("Extracting feed...");
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = extractor.run(&options);
    pb.finish_and_clear();
    let summary = result.context("Extraction failed")?;

    log::info!("");
    log_summary(&summary);

    if let Some(path) = &args.summary {
        write_summary_json(&summary, &args.input, path).context("Failed to write summary")?;
        log::info!("Summary written to {}", path.display());
    }

    log::info!("");
    log::info!("Output written to: {}", args.output.display());
    log::info!("Done!");

    Ok(())
}
