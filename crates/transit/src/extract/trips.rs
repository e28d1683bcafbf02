//! Trip and route selection.

use std::collections::HashSet;

use crate::identifiers::{RouteIdentifier, ShapeIdentifier, TripIdentifier};
use crate::models::{field, FeedTable, FilterStats, KeySet, Result};

/// Trips that kept enough stops, with the keys they reference.
#[derive(Debug)]
pub struct TripSelection {
    pub trips: FeedTable,
    pub route_ids: KeySet<RouteIdentifier>,
    pub shape_ids: KeySet<ShapeIdentifier>,
    pub stats: FilterStats,
}

/// Keep the trips in `kept`. A trip id listed twice keeps its first row.
pub fn select_trips(trips: &FeedTable, kept: &KeySet<TripIdentifier>) -> Result<TripSelection> {
    let trip_idx = trips.require_column("trip_id")?;
    trips.require_column("route_id")?;

    let mut seen: HashSet<TripIdentifier> = HashSet::new();
    let mut repeated = 0;
    let (table, stats) = trips.filter(|_, record| {
        let Some(trip_id) = field(record, trip_idx) else {
            return false;
        };
        if !kept.contains(trip_id) {
            return false;
        }
        if !seen.insert(TripIdentifier::new(trip_id)) {
            repeated += 1;
            return false;
        }
        true
    });

    if repeated > 0 {
        log::warn!("  {} repeated trip rows ignored", repeated);
    }

    let route_ids = table.key_set("route_id")?;
    let shape_ids = if table.columns().get("shape_id").is_some() {
        table.key_set("shape_id")?
    } else {
        KeySet::empty()
    };

    log::info!(
        "  Trips kept: {} of {} ({} routes, {} shapes referenced)",
        stats.kept,
        stats.seen,
        route_ids.len(),
        shape_ids.len()
    );

    Ok(TripSelection {
        trips: table,
        route_ids,
        shape_ids,
        stats,
    })
}

/// Keep the routes referenced by at least one kept trip.
pub fn select_routes(routes: &FeedTable, referenced: &KeySet<RouteIdentifier>) -> Result<(FeedTable, FilterStats)> {
    let (table, stats) = routes.filter_by_key("route_id", referenced)?;
    log::info!("  Routes kept: {} of {}", stats.kept, stats.seen);
    Ok((table, stats))
}

/// Drop trips whose `route_id` has no row in `routes`. Runs before shape ids
/// are minted so every id goes to a trip that reaches the output.
pub fn retain_routed_trips(trips: &FeedTable, routes: &FeedTable) -> Result<(FeedTable, FilterStats)> {
    let known: KeySet<RouteIdentifier> = routes.key_set("route_id")?;
    let (table, stats) = trips.filter_by_key("route_id", &known)?;
    if stats.dropped() > 0 {
        log::warn!("  {} trips reference routes missing from routes table", stats.dropped());
    }
    Ok((table, stats))
}
