//! Polyline geometry used by the shape clipper.
//!
//! The clipper only needs three operations: project a point to a linear
//! position, cut a sub-line between two positions, and intersect a line with
//! a rectangle. They sit behind [`PolylineGeometry`] so the clipping
//! algorithm does not depend on one geometry engine's conventions.

use std::cmp::Ordering;

use geo::{Coord, LineString, MultiLineString, Rect};

use crate::models::BoundingRegion;

/// Position along a polyline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearPosition {
    /// Index of the segment the position falls on
    pub segment: usize,
    /// Fraction along that segment, in `[0, 1]`
    pub fraction: f64,
    /// Distance from the start of the line
    pub distance: f64,
}

impl LinearPosition {
    /// Index of the last vertex at or before this position.
    pub fn vertex_at_or_before(&self) -> usize {
        if self.fraction >= 1.0 {
            self.segment + 1
        } else {
            self.segment
        }
    }

    /// Index of the first vertex at or after this position.
    pub fn vertex_at_or_after(&self) -> usize {
        if self.fraction <= 0.0 {
            self.segment
        } else {
            self.segment + 1
        }
    }

    pub fn cmp_along(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.segment.cmp(&other.segment))
            .then(self.fraction.total_cmp(&other.fraction))
    }
}

pub trait PolylineGeometry: Send + Sync {
    /// Nearest position on `line` to `point`, `None` for lines with fewer than 2 points.
    fn project(&self, line: &LineString<f64>, point: Coord<f64>) -> Option<LinearPosition>;

    /// Vertices from the one at or before `start` to the one at or after `end`.
    /// Empty when the two positions do not span a segment.
    fn sub_line(&self, line: &LineString<f64>, start: &LinearPosition, end: &LinearPosition) -> LineString<f64>;

    /// Parts of `line` inside `region`. No ordering of the parts is promised.
    fn clip_to_region(&self, line: &LineString<f64>, region: &BoundingRegion) -> MultiLineString<f64>;
}

// ============================================================================
// Planar implementation
// ============================================================================

/// Euclidean geometry directly on lon/lat degrees.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanarGeometry;

fn segment_length(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dx * dx + dy * dy).sqrt()
}

/// Closest point parameter on segment `ab` for `point`, clamped to `[0, 1]`,
/// with the squared distance to it.
fn project_on_segment(point: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> (f64, f64) {
    let ab = Coord { x: b.x - a.x, y: b.y - a.y };
    let ap = Coord { x: point.x - a.x, y: point.y - a.y };

    let ab_len_sq = ab.x * ab.x + ab.y * ab.y;
    if ab_len_sq < 1e-24 {
        // Degenerate segment
        return (0.0, ap.x * ap.x + ap.y * ap.y);
    }

    let t = ((ap.x * ab.x + ap.y * ab.y) / ab_len_sq).clamp(0.0, 1.0);
    let nearest = Coord { x: a.x + t * ab.x, y: a.y + t * ab.y };
    let dx = point.x - nearest.x;
    let dy = point.y - nearest.y;
    (t, dx * dx + dy * dy)
}

#[derive(Clone, Copy, Debug)]
enum Bound {
    MinLon,
    MaxLon,
    MinLat,
    MaxLat,
}

/// Where a clipped piece of a segment starts or ends.
#[derive(Clone, Copy, Debug)]
enum ClipEnd {
    Vertex,
    Crossing(f64, Bound),
}

/// Liang–Barsky clip of segment `ab` to the region, bounds inclusive.
fn clip_segment(a: Coord<f64>, b: Coord<f64>, region: &BoundingRegion) -> Option<(ClipEnd, ClipEnd)> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let constraints = [
        (-dx, a.x - region.min_lon, Bound::MinLon),
        (dx, region.max_lon - a.x, Bound::MaxLon),
        (-dy, a.y - region.min_lat, Bound::MinLat),
        (dy, region.max_lat - a.y, Bound::MaxLat),
    ];

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let (mut start, mut end) = (ClipEnd::Vertex, ClipEnd::Vertex);

    for (p, q, bound) in constraints {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }

        let r = q / p;
        if p < 0.0 && r > t0 {
            t0 = r;
            start = ClipEnd::Crossing(r, bound);
        } else if p > 0.0 && r < t1 {
            t1 = r;
            end = ClipEnd::Crossing(r, bound);
        }

        if t0 > t1 {
            return None;
        }
    }

    Some((start, end))
}

/// Resolve a clip end to a coordinate. Crossings land exactly on the bound
/// they cross, so clipping an already clipped line is a no-op.
fn resolve_end(vertex: Coord<f64>, a: Coord<f64>, b: Coord<f64>, end: ClipEnd, region: &BoundingRegion) -> Coord<f64> {
    let ClipEnd::Crossing(t, bound) = end else {
        return vertex;
    };

    let mut coord = Coord {
        x: a.x + t * (b.x - a.x),
        y: a.y + t * (b.y - a.y),
    };
    match bound {
        Bound::MinLon => coord.x = region.min_lon,
        Bound::MaxLon => coord.x = region.max_lon,
        Bound::MinLat => coord.y = region.min_lat,
        Bound::MaxLat => coord.y = region.max_lat,
    }
    region.clamp(coord)
}

impl PolylineGeometry for PlanarGeometry {
    fn project(&self, line: &LineString<f64>, point: Coord<f64>) -> Option<LinearPosition> {
        if line.0.len() < 2 {
            return None;
        }

        let mut best: Option<(LinearPosition, f64)> = None;
        let mut walked = 0.0;

        for (segment, pair) in line.0.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            let length = segment_length(a, b);
            let (fraction, dist_sq) = project_on_segment(point, a, b);

            // Strictly closer wins, so ties keep the earliest segment
            if best.map_or(true, |(_, best_dist)| dist_sq < best_dist) {
                best = Some((
                    LinearPosition {
                        segment,
                        fraction,
                        distance: walked + fraction * length,
                    },
                    dist_sq,
                ));
            }

            walked += length;
        }

        best.map(|(position, _)| position)
    }

    fn sub_line(&self, line: &LineString<f64>, start: &LinearPosition, end: &LinearPosition) -> LineString<f64> {
        let first = start.vertex_at_or_before();
        let last = end.vertex_at_or_after().min(line.0.len().saturating_sub(1));

        if last <= first {
            return LineString::new(vec![]);
        }

        LineString::new(line.0[first..=last].to_vec())
    }

    fn clip_to_region(&self, line: &LineString<f64>, region: &BoundingRegion) -> MultiLineString<f64> {
        let mut parts: Vec<LineString<f64>> = Vec::new();
        let mut current: Vec<Coord<f64>> = Vec::new();

        for pair in line.0.windows(2) {
            let (a, b) = (pair[0], pair[1]);

            let Some((start_end, finish_end)) = clip_segment(a, b, region) else {
                if current.len() >= 2 {
                    parts.push(LineString::new(std::mem::take(&mut current)));
                }
                current.clear();
                continue;
            };

            let start = resolve_end(a, a, b, start_end, region);
            let end = resolve_end(b, a, b, finish_end, region);
            if start == end {
                // Touches the region in a single point
                continue;
            }

            if current.last() != Some(&start) {
                if current.len() >= 2 {
                    parts.push(LineString::new(std::mem::take(&mut current)));
                }
                current.clear();
                current.push(start);
            }
            current.push(end);
        }

        if current.len() >= 2 {
            parts.push(LineString::new(current));
        }

        MultiLineString::new(parts)
    }
}
