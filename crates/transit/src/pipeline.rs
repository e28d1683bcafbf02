//! Extraction pipeline.
//!
//! Runs the stages in dependency order against a source feed directory and
//! publishes the result atomically: tables are written to a staging
//! directory beside the output, normalized, and only then moved into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::collaborators::{
    AgencyResolver, CanonicalNormalizer, FeedNormalizer, FeedValidator, RegionSource, SourceAgencyResolver,
    ValidationReport,
};
use crate::extract::{
    clip_shapes, prune_references, reindex_stop_times, retain_routed_trips, retain_used_stops, select_routes,
    select_stops_in_region, select_trips, FeedTables, PruneStats, ReindexStats, ShapeStats, SourceShapes,
};
use crate::identifiers::ShapeIdentifier;
use crate::models::{filter_table_file, BoundingRegion, ExtractError, FeedTable, FilterStats, KeySet, Result};
use crate::spatial::{PlanarGeometry, PolylineGeometry};

/// Optional tables copied to the output unchanged.
pub const PASSTHROUGH_TABLES: [&str; 2] = ["calendar", "calendar_dates"];

pub fn table_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.txt", name))
}

// ============================================================================
// Options and summary
// ============================================================================

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Replace an existing non-empty output directory
    pub overwrite: bool,
}

impl ExtractOptions {
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            overwrite: false,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// `.<output-name>.staging`, next to the output directory.
    pub fn staging_dir(&self) -> Result<PathBuf> {
        let name = self.output_dir.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("output path {} has no directory name", self.output_dir.display()),
            )
        })?;

        let mut staging = std::ffi::OsString::from(".");
        staging.push(name);
        staging.push(".staging");
        Ok(self.output_dir.with_file_name(staging))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TableCount {
    pub seen: usize,
    pub kept: usize,
}

impl TableCount {
    fn new(seen: usize, kept: usize) -> Self {
        Self { seen, kept }
    }
}

impl From<FilterStats> for TableCount {
    fn from(stats: FilterStats) -> Self {
        Self::new(stats.seen, stats.kept)
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExtractSummary {
    pub region: BoundingRegion,
    pub output_dir: PathBuf,
    pub stops: TableCount,
    pub stop_times: TableCount,
    pub trips: TableCount,
    pub routes: TableCount,
    pub shapes: TableCount,
    pub calendar: Option<TableCount>,
    pub calendar_dates: Option<TableCount>,
    pub reindex: ReindexStats,
    pub shape_stats: ShapeStats,
    pub prune: PruneStats,
    /// Distinct shapes referenced by output trips
    pub shape_count: usize,
    pub validation: Option<ValidationReport>,
}

/// Source tables the pipeline needs.
struct SourceFeed {
    stops: FeedTable,
    stop_times: FeedTable,
    trips: FeedTable,
    routes: FeedTable,
    shapes: Option<FeedTable>,
}

impl SourceFeed {
    fn read(dir: &Path) -> Result<Self> {
        let feed = Self {
            stops: FeedTable::read(&table_path(dir, "stops"))?,
            stop_times: FeedTable::read(&table_path(dir, "stop_times"))?,
            trips: FeedTable::read(&table_path(dir, "trips"))?,
            routes: FeedTable::read(&table_path(dir, "routes"))?,
            shapes: FeedTable::read_optional(&table_path(dir, "shapes"))?,
        };

        log::info!(
            "  Read {} stops, {} stop times, {} trips, {} routes, {} shape points",
            feed.stops.len(),
            feed.stop_times.len(),
            feed.trips.len(),
            feed.routes.len(),
            feed.shapes.as_ref().map_or(0, FeedTable::len)
        );
        Ok(feed)
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Regional extraction with pluggable collaborators.
pub struct FeedExtractor {
    region: Box<dyn RegionSource>,
    agency: Box<dyn AgencyResolver>,
    normalizer: Box<dyn FeedNormalizer>,
    validator: Option<Box<dyn FeedValidator>>,
    geometry: Box<dyn PolylineGeometry>,
}

impl FeedExtractor {
    /// Extractor with the default agency resolver (environment overrides),
    /// canonical normalizer, planar geometry and no validator.
    pub fn new(region: impl RegionSource + 'static) -> Self {
        Self {
            region: Box::new(region),
            agency: Box::new(SourceAgencyResolver::from_env()),
            normalizer: Box::new(CanonicalNormalizer),
            validator: None,
            geometry: Box::new(PlanarGeometry),
        }
    }

    pub fn with_agency_resolver(mut self, agency: impl AgencyResolver + 'static) -> Self {
        self.agency = Box::new(agency);
        self
    }

    pub fn with_normalizer(mut self, normalizer: impl FeedNormalizer + 'static) -> Self {
        self.normalizer = Box::new(normalizer);
        self
    }

    pub fn with_validator(mut self, validator: impl FeedValidator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn with_geometry(mut self, geometry: impl PolylineGeometry + 'static) -> Self {
        self.geometry = Box::new(geometry);
        self
    }

    /// Run the whole extraction. On error nothing is left behind but a
    /// pre-existing output, which is only replaced once the new feed is
    /// complete.
    pub fn run(&self, options: &ExtractOptions) -> Result<ExtractSummary> {
        log::info!("Phase 1: Resolving region...");
        let region = self.region.bounding_region()?;
        log::info!("  Region: {}", region);

        if output_occupied(&options.output_dir)? && !options.overwrite {
            return Err(ExtractError::OutputExists(options.output_dir.clone()));
        }

        let staging = options.staging_dir()?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        match self.run_staged(options, &region, &staging) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                if staging.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&staging) {
                        log::warn!("Could not remove staging directory {}: {}", staging.display(), cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    fn run_staged(&self, options: &ExtractOptions, region: &BoundingRegion, staging: &Path) -> Result<ExtractSummary> {
        log::info!("");
        log::info!("Phase 2: Reading source tables from {}...", options.source_dir.display());
        let source = SourceFeed::read(&options.source_dir)?;

        log::info!("");
        log::info!("Phase 3: Selecting stops in region...");
        let selection = select_stops_in_region(&source.stops, region)?;

        log::info!("");
        log::info!("Phase 4: Reindexing stop times...");
        let reindexed = reindex_stop_times(&source.stop_times, &selection.kept)?;
        log::info!(
            "  Kept {} of {} trips ({} rows outside region, {} duplicates, {} malformed)",
            reindexed.kept_trips.len(),
            reindexed.stats.trips_seen,
            reindexed.stats.rows_outside,
            reindexed.stats.duplicates_dropped,
            reindexed.stats.rows_malformed
        );
        let (stops, _) = retain_used_stops(&selection.stops, &reindexed.used_stops)?;

        log::info!("");
        log::info!("Phase 5: Selecting trips and routes...");
        let trips = select_trips(&source.trips, &reindexed.kept_trips)?;
        let (routes, _) = select_routes(&source.routes, &trips.route_ids)?;
        let (routed_trips, _) = retain_routed_trips(&trips.trips, &routes)?;

        log::info!("");
        log::info!("Phase 6: Clipping shapes...");
        let source_shapes = match &source.shapes {
            Some(table) => SourceShapes::from_table(table, &trips.shape_ids)?,
            None => {
                log::warn!("  No shapes table, every trip gets a stop-connecting shape");
                SourceShapes::default()
            }
        };
        let clipped = clip_shapes(
            self.geometry.as_ref(),
            &routed_trips,
            &source_shapes,
            &reindexed.trip_stops,
            &selection.index,
            region,
        )?;

        log::info!("");
        log::info!("Phase 7: Copying calendars and agency...");
        let mut passthrough = Vec::with_capacity(PASSTHROUGH_TABLES.len());
        for name in PASSTHROUGH_TABLES {
            let stats = filter_table_file(
                &table_path(&options.source_dir, name),
                &table_path(staging, name),
                |_, _| true,
            )?;
            passthrough.push(stats.map(TableCount::from));
        }
        let agency = self.agency.resolve(&options.source_dir)?;
        agency.write(&table_path(staging, "agency"))?;

        log::info!("");
        log::info!("Phase 8: Pruning cross references...");
        let (pruned, prune_stats) = prune_references(FeedTables {
            stops,
            stop_times: reindexed.stop_times,
            trips: clipped.trips,
            routes,
            shapes: Some(clipped.shapes),
        })?;

        pruned.stops.write(&table_path(staging, "stops"))?;
        pruned.stop_times.write(&table_path(staging, "stop_times"))?;
        pruned.trips.write(&table_path(staging, "trips"))?;
        pruned.routes.write(&table_path(staging, "routes"))?;
        let shape_rows = match &pruned.shapes {
            Some(shapes) => {
                shapes.write(&table_path(staging, "shapes"))?;
                shapes.len()
            }
            None => 0,
        };

        log::info!("");
        log::info!("Phase 9: Normalizing...");
        let normalized = self.normalizer.normalize(staging).map_err(|err| match err {
            ExtractError::Normalize(_) => err,
            other => ExtractError::Normalize(Box::new(other)),
        })?;
        publish(&normalized, staging, &options.output_dir)?;
        log::info!("  Wrote feed to {}", options.output_dir.display());

        let validation = match &self.validator {
            Some(validator) => {
                log::info!("");
                log::info!("Phase 10: Validating...");
                let report = validator.validate(&options.output_dir);
                log::info!("  Validator verdict: {:?}", report.verdict);
                Some(report)
            }
            None => None,
        };

        let shape_ids: KeySet<ShapeIdentifier> = pruned.trips.key_set("shape_id")?;
        let mut passthrough = passthrough.into_iter();

        Ok(ExtractSummary {
            region: *region,
            output_dir: options.output_dir.clone(),
            stops: TableCount::new(source.stops.len(), pruned.stops.len()),
            stop_times: TableCount::new(source.stop_times.len(), pruned.stop_times.len()),
            trips: TableCount::new(source.trips.len(), pruned.trips.len()),
            routes: TableCount::new(source.routes.len(), pruned.routes.len()),
            shapes: TableCount::new(source.shapes.as_ref().map_or(0, FeedTable::len), shape_rows),
            calendar: passthrough.next().flatten(),
            calendar_dates: passthrough.next().flatten(),
            reindex: reindexed.stats,
            shape_stats: clipped.stats,
            prune: prune_stats,
            shape_count: shape_ids.len(),
            validation,
        })
    }
}

/// True when `path` exists and is a file or a non-empty directory.
fn output_occupied(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    if !path.is_dir() {
        return Ok(true);
    }
    Ok(fs::read_dir(path)?.next().is_some())
}

/// Move the normalized feed to `output`, replacing whatever is there, and
/// discard the staging directory.
fn publish(normalized: &Path, staging: &Path, output: &Path) -> Result<()> {
    if output.is_dir() {
        fs::remove_dir_all(output)?;
    } else if output.exists() {
        fs::remove_file(output)?;
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::rename(normalized, output)?;
    if normalized != staging && staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FixedRegion;

    #[test]
    fn test_staging_dir_is_hidden_sibling() {
        let options = ExtractOptions::new("in", "/data/out/city");
        assert_eq!(options.staging_dir().unwrap(), PathBuf::from("/data/out/.city.staging"));
    }

    #[test]
    fn test_missing_table_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("stops.txt"), "stop_id,stop_lat,stop_lon\nA,1,1\n").unwrap();

        let options = ExtractOptions::new(&source, dir.path().join("out"));
        let extractor = FeedExtractor::new(FixedRegion::new(0.0, 0.0, 2.0, 2.0).unwrap());

        let err = extractor.run(&options).unwrap_err();
        assert!(matches!(err, ExtractError::MissingTable(_)));
        assert!(!options.staging_dir().unwrap().exists());
        assert!(!options.output_dir.exists());
    }

    #[test]
    fn test_existing_output_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        fs::create_dir(&output).unwrap();
        fs::write(output.join("keep.txt"), "x").unwrap();

        let options = ExtractOptions::new(dir.path(), &output);
        let extractor = FeedExtractor::new(FixedRegion::new(0.0, 0.0, 1.0, 1.0).unwrap());
        assert!(matches!(extractor.run(&options), Err(ExtractError::OutputExists(_))));
        assert!(output.join("keep.txt").exists());
    }
}
