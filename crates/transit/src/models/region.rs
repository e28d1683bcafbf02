//! Axis-aligned bounding region in geographic coordinates.

use std::fmt;
use std::str::FromStr;

use geo::{Coord, Rect};
use rstar::AABB;

use crate::models::types::{ExtractError, Result};

/// Rectangle used as the spatial inclusion predicate.
///
/// Containment is inclusive on all four edges, matching R-tree envelope
/// containment, so a stop sitting exactly on the boundary is kept.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingRegion {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingRegion {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let bounds = [min_lon, min_lat, max_lon, max_lat];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(ExtractError::InvalidRegion(format!(
                "non-finite bounds {:?}",
                bounds
            )));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(ExtractError::InvalidRegion(format!(
                "minimum exceeds maximum in {},{},{},{}",
                min_lon, min_lat, max_lon, max_lat
            )));
        }

        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn contains_coord(&self, coord: Coord<f64>) -> bool {
        self.contains(coord.x, coord.y)
    }

    /// Pull a coordinate onto the rectangle. Only used to absorb rounding on
    /// points that are already inside up to floating-point error.
    pub fn clamp(&self, coord: Coord<f64>) -> Coord<f64> {
        Coord {
            x: coord.x.clamp(self.min_lon, self.max_lon),
            y: coord.y.clamp(self.min_lat, self.max_lat),
        }
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord { x: self.min_lon, y: self.min_lat },
            Coord { x: self.max_lon, y: self.max_lat },
        )
    }

    pub fn from_rect(rect: Rect<f64>) -> Result<Self> {
        let min = rect.min();
        let max = rect.max();
        Self::new(min.x, min.y, max.x, max.y)
    }

    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }
}

impl fmt::Display for BoundingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] x [{}, {}]",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// Parses `min_lon,min_lat,max_lon,max_lat`.
impl FromStr for BoundingRegion {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| ExtractError::InvalidRegion(format!("{}: {}", s, e)))?;

        match values.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => Self::new(*min_lon, *min_lat, *max_lon, *max_lat),
            _ => Err(ExtractError::InvalidRegion(format!(
                "expected min_lon,min_lat,max_lon,max_lat, got {} values",
                values.len()
            ))),
        }
    }
}
