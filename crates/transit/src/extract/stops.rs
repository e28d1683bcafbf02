//! Stop selection by region membership.

use crate::identifiers::StopIdentifier;
use crate::models::{BoundingRegion, FeedTable, FilterStats, KeySet, Result};
use crate::spatial::StopIndex;

/// Stops inside the region, with the index used to find them.
pub struct StopSelection {
    pub stops: FeedTable,
    pub kept: KeySet<StopIdentifier>,
    pub index: StopIndex,
    pub stats: FilterStats,
}

/// Keep the stops whose coordinates fall inside `region`, boundary included.
pub fn select_stops_in_region(stops: &FeedTable, region: &BoundingRegion) -> Result<StopSelection> {
    let index = StopIndex::from_table(stops)?;
    let kept = index.stops_within(region);
    let (table, mut stats) = stops.filter_by_key("stop_id", &kept)?;
    stats.malformed += index.unlocated();

    log::info!("  Stops in region: {} of {}", stats.kept, stats.seen);

    Ok(StopSelection {
        stops: table,
        kept,
        index,
        stats,
    })
}

/// Re-filter the stops table down to the stops some kept trip still visits.
pub fn retain_used_stops(stops: &FeedTable, used: &KeySet<StopIdentifier>) -> Result<(FeedTable, FilterStats)> {
    let (table, stats) = stops.filter_by_key("stop_id", used)?;
    if stats.dropped() > 0 {
        log::info!("  Dropped {} stops not served by any kept trip", stats.dropped());
    }
    Ok((table, stats))
}
