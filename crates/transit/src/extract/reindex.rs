//! Stop-time reindexing.
//!
//! Applies the kept-stop filter to `stop_times`, then restores the per-trip
//! sequencing invariants: rows ordered, adjacent duplicate sequence numbers
//! removed, trips with fewer than two rows dropped and the survivors
//! renumbered `1..N`.

use std::collections::HashMap;

use csv::StringRecord;

use crate::identifiers::{StopIdentifier, TripIdentifier};
use crate::models::table::with_field;
use crate::models::{field, FeedTable, KeySet, Result};

/// Minimum number of stop-time rows a trip needs to be kept.
pub const MIN_TRIP_STOPS: usize = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReindexStats {
    pub rows_seen: usize,
    pub rows_outside: usize,
    pub rows_malformed: usize,
    pub duplicates_dropped: usize,
    pub trips_seen: usize,
    pub trips_dropped: usize,
    /// Trips ordered by departure time because a sequence did not parse
    pub trips_by_departure: usize,
}

/// Output of [`reindex_stop_times`].
#[derive(Debug)]
pub struct Reindexed {
    pub stop_times: FeedTable,
    pub kept_trips: KeySet<TripIdentifier>,
    /// Stops that survived into at least one kept trip
    pub used_stops: KeySet<StopIdentifier>,
    /// Final stop order of every kept trip
    pub trip_stops: HashMap<TripIdentifier, Vec<StopIdentifier>>,
    pub stats: ReindexStats,
}

/// Parse `H:MM:SS` into seconds. Hours may exceed 24.
pub fn parse_time_of_day(value: &str) -> Option<u64> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

struct StopTimeRow<'a> {
    record: &'a StringRecord,
    stop_id: &'a str,
    sequence: Option<u64>,
    departure: &'a str,
}

impl StopTimeRow<'_> {
    /// Total order used when a trip cannot be ordered by sequence. Parsed
    /// times come first, unparsable ones after them in text order.
    fn departure_key(&self) -> (bool, u64, &str) {
        match parse_time_of_day(self.departure) {
            Some(seconds) => (false, seconds, self.departure),
            None => (true, 0, self.departure),
        }
    }
}

struct TripGroup<'a> {
    trip_id: &'a str,
    rows: Vec<StopTimeRow<'a>>,
}

/// Order a trip's rows and drop adjacent duplicate sequence numbers.
///
/// Returns the surviving rows, the number of duplicates removed, and whether
/// the departure-time fallback was used.
fn order_trip<'a>(mut rows: Vec<StopTimeRow<'a>>) -> (Vec<StopTimeRow<'a>>, usize, bool) {
    let by_departure = rows.iter().any(|row| row.sequence.is_none());
    if by_departure {
        rows.sort_by(|a, b| a.departure_key().cmp(&b.departure_key()));
    } else {
        rows.sort_by_key(|row| row.sequence);
    }

    let before = rows.len();
    let mut kept: Vec<StopTimeRow<'a>> = Vec::with_capacity(rows.len());
    for row in rows {
        let duplicate = match (kept.last().and_then(|prev| prev.sequence), row.sequence) {
            (Some(prev), Some(current)) => prev == current,
            _ => false,
        };
        if !duplicate {
            kept.push(row);
        }
    }

    let duplicates = before - kept.len();
    (kept, duplicates, by_departure)
}

/// Filter `stop_times` to `kept_stops` and renumber every surviving trip.
///
/// Trips are emitted in the order their first row appears in the source.
pub fn reindex_stop_times(stop_times: &FeedTable, kept_stops: &KeySet<StopIdentifier>) -> Result<Reindexed> {
    let trip_idx = stop_times.require_column("trip_id")?;
    let stop_idx = stop_times.require_column("stop_id")?;
    let seq_idx = stop_times.require_column("stop_sequence")?;
    let departure_idx = stop_times.columns().get("departure_time");

    let mut stats = ReindexStats {
        rows_seen: stop_times.len(),
        rows_malformed: stop_times.malformed(),
        ..Default::default()
    };

    let mut groups: Vec<TripGroup> = Vec::new();
    let mut group_lookup: HashMap<&str, usize> = HashMap::new();

    for record in stop_times.rows() {
        let (Some(trip_id), Some(stop_id)) = (field(record, trip_idx), field(record, stop_idx)) else {
            stats.rows_malformed += 1;
            continue;
        };
        if trip_id.is_empty() || stop_id.is_empty() {
            stats.rows_malformed += 1;
            continue;
        }

        if !kept_stops.contains(stop_id) {
            stats.rows_outside += 1;
            continue;
        }

        let row = StopTimeRow {
            record,
            stop_id,
            sequence: field(record, seq_idx).and_then(|v| v.parse().ok()),
            departure: departure_idx.and_then(|idx| field(record, idx)).unwrap_or(""),
        };

        let slot = *group_lookup.entry(trip_id).or_insert_with(|| {
            groups.push(TripGroup {
                trip_id,
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].rows.push(row);
    }

    stats.trips_seen = groups.len();

    let mut output = Vec::new();
    let mut kept_trips = Vec::new();
    let mut used_stops = Vec::new();
    let mut trip_stops = HashMap::new();

    for group in groups {
        let (rows, duplicates, by_departure) = order_trip(group.rows);
        stats.duplicates_dropped += duplicates;
        if by_departure {
            log::debug!("Trip {} has unparsable stop_sequence values, ordering by departure_time", group.trip_id);
            stats.trips_by_departure += 1;
        }

        if rows.len() < MIN_TRIP_STOPS {
            log::debug!("Dropping trip {}: {} stop(s) left in region", group.trip_id, rows.len());
            stats.trips_dropped += 1;
            continue;
        }

        let trip_id = TripIdentifier::new(group.trip_id);
        let mut stops = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            output.push(with_field(row.record, seq_idx, &(position + 1).to_string()));
            let stop_id = StopIdentifier::new(row.stop_id);
            used_stops.push(stop_id.clone());
            stops.push(stop_id);
        }

        trip_stops.insert(trip_id.clone(), stops);
        kept_trips.push(trip_id);
    }

    Ok(Reindexed {
        stop_times: stop_times.derive(output),
        kept_trips: kept_trips.into_iter().collect(),
        used_stops: used_stops.into_iter().collect(),
        trip_stops,
        stats,
    })
}
