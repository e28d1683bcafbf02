//! Cross-reference pruning.
//!
//! Stages filter their tables independently, so the last pass closes the
//! references between them: stop times need their trip and stop, trips need
//! their route and at least one stop time, and stops, routes and shapes need
//! someone referencing them. Removing rows from one table can orphan rows in
//! another, so passes repeat until nothing changes.

use crate::identifiers::{RouteIdentifier, ShapeIdentifier, StopIdentifier, TripIdentifier};
use crate::models::{field, FeedTable, KeySet, Result};

/// The tables the pruner keeps consistent with each other.
#[derive(Clone, Debug)]
pub struct FeedTables {
    pub stops: FeedTable,
    pub stop_times: FeedTable,
    pub trips: FeedTable,
    pub routes: FeedTable,
    pub shapes: Option<FeedTable>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PruneStats {
    pub passes: usize,
    pub stops_removed: usize,
    pub stop_times_removed: usize,
    pub trips_removed: usize,
    pub routes_removed: usize,
    pub shapes_removed: usize,
}

impl PruneStats {
    pub fn total_removed(&self) -> usize {
        self.stops_removed + self.stop_times_removed + self.trips_removed + self.routes_removed + self.shapes_removed
    }
}

fn prune_pass(tables: FeedTables, stats: &mut PruneStats) -> Result<(FeedTables, usize)> {
    let stop_ids: KeySet<StopIdentifier> = tables.stops.key_set("stop_id")?;
    let trip_ids: KeySet<TripIdentifier> = tables.trips.key_set("trip_id")?;
    let route_ids: KeySet<RouteIdentifier> = tables.routes.key_set("route_id")?;

    let st_trip = tables.stop_times.require_column("trip_id")?;
    let st_stop = tables.stop_times.require_column("stop_id")?;
    let (stop_times, st_stats) = tables.stop_times.filter(|_, record| {
        field(record, st_trip).map_or(false, |id| trip_ids.contains(id))
            && field(record, st_stop).map_or(false, |id| stop_ids.contains(id))
    });

    let scheduled: KeySet<TripIdentifier> = stop_times.key_set("trip_id")?;
    let trip_idx = tables.trips.require_column("trip_id")?;
    let route_idx = tables.trips.require_column("route_id")?;
    let (trips, trip_stats) = tables.trips.filter(|_, record| {
        field(record, trip_idx).map_or(false, |id| scheduled.contains(id))
            && field(record, route_idx).map_or(false, |id| route_ids.contains(id))
    });

    let used_stops: KeySet<StopIdentifier> = stop_times.key_set("stop_id")?;
    let (stops, stop_stats) = tables.stops.filter_by_key("stop_id", &used_stops)?;

    let used_routes: KeySet<RouteIdentifier> = trips.key_set("route_id")?;
    let (routes, route_stats) = tables.routes.filter_by_key("route_id", &used_routes)?;

    let mut shapes_removed = 0;
    let shapes = match tables.shapes {
        Some(shapes) => {
            let used_shapes: KeySet<ShapeIdentifier> = if trips.columns().get("shape_id").is_some() {
                trips.key_set("shape_id")?
            } else {
                KeySet::empty()
            };
            let (filtered, shape_stats) = shapes.filter_by_key("shape_id", &used_shapes)?;
            shapes_removed = shape_stats.dropped();
            Some(filtered)
        }
        None => None,
    };

    stats.stop_times_removed += st_stats.dropped();
    stats.trips_removed += trip_stats.dropped();
    stats.stops_removed += stop_stats.dropped();
    stats.routes_removed += route_stats.dropped();
    stats.shapes_removed += shapes_removed;

    let removed = st_stats.dropped()
        + trip_stats.dropped()
        + stop_stats.dropped()
        + route_stats.dropped()
        + shapes_removed;

    Ok((
        FeedTables {
            stops,
            stop_times,
            trips,
            routes,
            shapes,
        },
        removed,
    ))
}

/// Remove rows whose references no longer resolve, until none are left.
///
/// Running it on its own output removes nothing.
pub fn prune_references(mut tables: FeedTables) -> Result<(FeedTables, PruneStats)> {
    let mut stats = PruneStats::default();

    loop {
        let (pruned, removed) = prune_pass(tables, &mut stats)?;
        tables = pruned;
        stats.passes += 1;

        if removed == 0 {
            break;
        }
        log::debug!("  Prune pass {} removed {} rows", stats.passes, removed);
    }

    log::info!(
        "  Pruned {} rows in {} passes (stops {}, stop_times {}, trips {}, routes {}, shapes {})",
        stats.total_removed(),
        stats.passes,
        stats.stops_removed,
        stats.stop_times_removed,
        stats.trips_removed,
        stats.routes_removed,
        stats.shapes_removed
    );

    Ok((tables, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> FeedTables {
        FeedTables {
            stops: FeedTable::parse("stops", "stop_id,stop_lat,stop_lon\nA,1,1\nB,2,2\nC,3,3\nD,4,4\n").unwrap(),
            stop_times: FeedTable::parse(
                "stop_times",
                "trip_id,stop_id,stop_sequence\nT1,A,1\nT1,B,2\nT2,C,1\nT2,D,2\n",
            )
            .unwrap(),
            trips: FeedTable::parse("trips", "route_id,trip_id,shape_id\nR1,T1,1\nR9,T2,2\n").unwrap(),
            routes: FeedTable::parse("routes", "route_id\nR1\nR2\n").unwrap(),
            shapes: Some(
                FeedTable::parse(
                    "shapes",
                    "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n1,1,1,1\n1,2,2,2\n2,3,3,1\n2,4,4,2\n",
                )
                .unwrap(),
            ),
        }
    }

    fn column(table: &FeedTable, name: &str) -> Vec<String> {
        let idx = table.columns().get(name).unwrap();
        table.rows().iter().map(|r| r[idx].to_string()).collect()
    }

    #[test]
    fn test_dangling_route_cascades() {
        let (pruned, stats) = prune_references(tables()).unwrap();

        // T2 points at a route that does not exist
        assert_eq!(column(&pruned.trips, "trip_id"), vec!["T1"]);
        assert_eq!(column(&pruned.stop_times, "stop_id"), vec!["A", "B"]);
        assert_eq!(column(&pruned.stops, "stop_id"), vec!["A", "B"]);
        assert_eq!(column(&pruned.routes, "route_id"), vec!["R1"]);
        assert_eq!(column(pruned.shapes.as_ref().unwrap(), "shape_id"), vec!["1", "1"]);

        assert_eq!(stats.trips_removed, 1);
        assert_eq!(stats.stop_times_removed, 2);
        assert_eq!(stats.stops_removed, 2);
        assert_eq!(stats.routes_removed, 1);
        assert_eq!(stats.shapes_removed, 2);
        assert_eq!(stats.passes, 3);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let (once, _) = prune_references(tables()).unwrap();
        let (twice, stats) = prune_references(once.clone()).unwrap();

        assert_eq!(stats.total_removed(), 0);
        assert_eq!(stats.passes, 1);
        assert_eq!(twice.stop_times.rows(), once.stop_times.rows());
        assert_eq!(twice.trips.rows(), once.trips.rows());
    }

    #[test]
    fn test_trip_without_stop_times_is_removed() {
        let mut input = tables();
        input.stop_times = FeedTable::parse("stop_times", "trip_id,stop_id,stop_sequence\nT1,A,1\nT1,B,2\n").unwrap();
        input.trips = FeedTable::parse("trips", "route_id,trip_id\nR1,T1\nR1,T5\n").unwrap();
        input.shapes = None;

        let (pruned, stats) = prune_references(input).unwrap();
        assert_eq!(column(&pruned.trips, "trip_id"), vec!["T1"]);
        assert_eq!(stats.trips_removed, 1);
        assert!(pruned.shapes.is_none());
    }
}
