//! Shape clipping.
//!
//! Every kept trip gets a private shape covering only the part of its route
//! geometry inside the region. The source shape is cut down to the span
//! between the trip's first and last kept stop, intersected with the region,
//! and the resulting pieces are put back in order along the line. When that
//! yields nothing usable the trip's stops are connected instead.

use std::cmp::Ordering;
use std::collections::HashMap;

use csv::StringRecord;
use geo::{Coord, LineString};

use crate::identifiers::{ShapeIdentifier, StopIdentifier, TripIdentifier};
use crate::models::table::{with_field, DEFAULT_DELIMITER};
use crate::models::{field, BoundingRegion, FeedTable, KeySet, Result};
use crate::spatial::{LinearPosition, PolylineGeometry, StopIndex};

pub const SHAPES_HEADER: [&str; 4] = ["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"];

// ============================================================================
// Source shapes
// ============================================================================

/// Source shape polylines, keyed by their original id.
#[derive(Debug)]
pub struct SourceShapes {
    lines: HashMap<ShapeIdentifier, LineString<f64>>,
    delimiter: u8,
    malformed: usize,
}

impl Default for SourceShapes {
    fn default() -> Self {
        Self {
            lines: HashMap::new(),
            delimiter: DEFAULT_DELIMITER,
            malformed: 0,
        }
    }
}

impl SourceShapes {
    /// Build polylines for the shapes in `wanted`, points ordered by
    /// `shape_pt_sequence`. Rows that do not parse are skipped and counted.
    pub fn from_table(table: &FeedTable, wanted: &KeySet<ShapeIdentifier>) -> Result<Self> {
        let id_idx = table.require_column("shape_id")?;
        let lat_idx = table.require_column("shape_pt_lat")?;
        let lon_idx = table.require_column("shape_pt_lon")?;
        let seq_idx = table.require_column("shape_pt_sequence")?;

        let mut points: HashMap<ShapeIdentifier, Vec<(u64, Coord<f64>)>> = HashMap::new();
        let mut malformed = table.malformed();

        for record in table.rows() {
            let Some(shape_id) = field(record, id_idx) else {
                malformed += 1;
                continue;
            };
            if !wanted.contains(shape_id) {
                continue;
            }

            let lat = field(record, lat_idx).and_then(|v| v.parse::<f64>().ok());
            let lon = field(record, lon_idx).and_then(|v| v.parse::<f64>().ok());
            let seq = field(record, seq_idx).and_then(|v| v.parse::<u64>().ok());
            match (lat, lon, seq) {
                (Some(lat), Some(lon), Some(seq)) if lat.is_finite() && lon.is_finite() => {
                    points
                        .entry(ShapeIdentifier::new(shape_id))
                        .or_default()
                        .push((seq, Coord { x: lon, y: lat }));
                }
                _ => {
                    log::debug!("Skipping unparsable point of shape {}", shape_id);
                    malformed += 1;
                }
            }
        }

        let lines: HashMap<ShapeIdentifier, LineString<f64>> = points
            .into_iter()
            .map(|(id, mut pts)| {
                pts.sort_by_key(|(seq, _)| *seq);
                (id, pts.into_iter().map(|(_, coord)| coord).collect::<LineString<f64>>())
            })
            .collect();

        Ok(Self {
            lines,
            delimiter: table.delimiter(),
            malformed,
        })
    }

    pub fn get(&self, shape_id: &str) -> Option<&LineString<f64>> {
        self.lines.get(shape_id)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

// ============================================================================
// Per-trip clipping
// ============================================================================

/// How a trip's output polyline was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeSource {
    /// Clipped from the source shape
    Clipped,
    /// No source shape, stops connected
    FallbackMissing,
    /// Source shape had fewer than 2 points
    FallbackDegenerate,
    /// Sub-line or clip produced fewer than 2 points
    FallbackEmptyClip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ShapeStats {
    pub clipped: usize,
    pub fallback_missing: usize,
    pub fallback_degenerate: usize,
    pub fallback_empty_clip: usize,
    pub malformed_points: usize,
}

impl ShapeStats {
    fn record(&mut self, source: ShapeSource) {
        match source {
            ShapeSource::Clipped => self.clipped += 1,
            ShapeSource::FallbackMissing => self.fallback_missing += 1,
            ShapeSource::FallbackDegenerate => self.fallback_degenerate += 1,
            ShapeSource::FallbackEmptyClip => self.fallback_empty_clip += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.clipped + self.fallback_missing + self.fallback_degenerate + self.fallback_empty_clip
    }
}

/// Append `coords` to `out`, skipping any point equal to the last one emitted.
fn extend_distinct(out: &mut Vec<Coord<f64>>, coords: impl IntoIterator<Item = Coord<f64>>) {
    for coord in coords {
        if out.last() != Some(&coord) {
            out.push(coord);
        }
    }
}

/// Connect the stops in order. Stops that all share one coordinate are
/// emitted as-is so the polyline still has two points.
fn connect_stops(stops: &[Coord<f64>], source: ShapeSource) -> (Vec<Coord<f64>>, ShapeSource) {
    let mut points = Vec::with_capacity(stops.len());
    extend_distinct(&mut points, stops.iter().copied());
    if points.len() < 2 {
        points = stops.to_vec();
    }
    (points, source)
}

/// Produce the output polyline for one trip.
///
/// `stops` are the trip's final stop coordinates in sequence order.
pub fn clip_trip_shape<G>(
    geometry: &G,
    shape: Option<&LineString<f64>>,
    stops: &[Coord<f64>],
    region: &BoundingRegion,
) -> (Vec<Coord<f64>>, ShapeSource)
where
    G: PolylineGeometry + ?Sized,
{
    let shape = match shape {
        None => return connect_stops(stops, ShapeSource::FallbackMissing),
        Some(line) if line.0.len() < 2 => return connect_stops(stops, ShapeSource::FallbackDegenerate),
        Some(line) => line,
    };

    let (Some(&first), Some(&last)) = (stops.first(), stops.last()) else {
        return connect_stops(stops, ShapeSource::FallbackEmptyClip);
    };
    let (Some(a), Some(b)) = (geometry.project(shape, first), geometry.project(shape, last)) else {
        return connect_stops(stops, ShapeSource::FallbackDegenerate);
    };

    let (start, end) = match b.cmp_along(&a) {
        Ordering::Less => (b, a),
        _ => (a, b),
    };
    let sub_line = geometry.sub_line(shape, &start, &end);
    if sub_line.0.len() < 2 {
        return connect_stops(stops, ShapeSource::FallbackEmptyClip);
    }

    let mut pieces: Vec<(LinearPosition, Vec<Coord<f64>>)> = Vec::new();
    for part in geometry.clip_to_region(&sub_line, region) {
        let mut coords = part.0;
        let (Some(&head), Some(&tail)) = (coords.first(), coords.last()) else {
            continue;
        };
        let (Some(head_pos), Some(tail_pos)) = (geometry.project(&sub_line, head), geometry.project(&sub_line, tail)) else {
            continue;
        };

        if tail_pos.cmp_along(&head_pos) == Ordering::Less {
            coords.reverse();
            pieces.push((tail_pos, coords));
        } else {
            pieces.push((head_pos, coords));
        }
    }
    pieces.sort_by(|(a, _), (b, _)| a.cmp_along(b));

    let mut points = Vec::new();
    for (_, coords) in pieces {
        extend_distinct(&mut points, coords);
    }

    if points.len() < 2 {
        return connect_stops(stops, ShapeSource::FallbackEmptyClip);
    }
    (points, ShapeSource::Clipped)
}

// ============================================================================
// Table-level clipping
// ============================================================================

#[derive(Debug)]
pub struct ClippedShapes {
    /// Trips with `shape_id` rewritten to the new ids
    pub trips: FeedTable,
    pub shapes: FeedTable,
    pub stats: ShapeStats,
}

/// Clip one shape per trip and mint new shape ids `1, 2, ...` in trips-table
/// row order.
pub fn clip_shapes<G>(
    geometry: &G,
    trips: &FeedTable,
    source: &SourceShapes,
    trip_stops: &HashMap<TripIdentifier, Vec<StopIdentifier>>,
    stops: &StopIndex,
    region: &BoundingRegion,
) -> Result<ClippedShapes>
where
    G: PolylineGeometry + ?Sized,
{
    let trip_idx = trips.require_column("trip_id")?;
    let original_idx = trips.columns().get("shape_id");
    let (trips, shape_idx) = trips.with_column("shape_id");

    let mut stats = ShapeStats {
        malformed_points: source.malformed(),
        ..Default::default()
    };
    let mut trip_rows = Vec::with_capacity(trips.len());
    let mut shape_rows = Vec::new();
    let mut next_id: u64 = 1;

    for record in trips.rows() {
        let stop_coords: Option<Vec<Coord<f64>>> = field(record, trip_idx)
            .and_then(|trip_id| trip_stops.get(trip_id))
            .map(|ids| ids.iter().filter_map(|id| stops.coordinate(id.as_str())).collect());

        let Some(stop_coords) = stop_coords else {
            // Not a reindexed trip; it owns no stop times and is pruned later
            trip_rows.push(with_field(record, shape_idx, ""));
            continue;
        };

        let original = original_idx
            .and_then(|idx| field(record, idx))
            .filter(|id| !id.is_empty())
            .and_then(|id| source.get(id));

        let (points, how) = clip_trip_shape(geometry, original, &stop_coords, region);
        stats.record(how);

        let shape_id = next_id.to_string();
        next_id += 1;

        for (position, coord) in points.iter().enumerate() {
            shape_rows.push(StringRecord::from(vec![
                shape_id.clone(),
                coord.y.to_string(),
                coord.x.to_string(),
                (position + 1).to_string(),
            ]));
        }
        trip_rows.push(with_field(record, shape_idx, &shape_id));
    }

    log::info!(
        "  Shapes: {} clipped, {} fallback (missing {}, degenerate {}, empty clip {})",
        stats.clipped,
        stats.fallback_missing + stats.fallback_degenerate + stats.fallback_empty_clip,
        stats.fallback_missing,
        stats.fallback_degenerate,
        stats.fallback_empty_clip
    );

    let shapes = FeedTable::from_parts(
        "shapes",
        source.delimiter(),
        StringRecord::from(SHAPES_HEADER.to_vec()),
        shape_rows,
    );

    Ok(ClippedShapes {
        trips: trips.derive(trip_rows),
        shapes,
        stats,
    })
}
