//! Region sources that need no I/O.

use crate::collaborators::RegionSource;
use crate::models::{BoundingRegion, Result};

/// A region known up front, e.g. parsed from a command line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedRegion(pub BoundingRegion);

impl FixedRegion {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        BoundingRegion::new(min_lon, min_lat, max_lon, max_lat).map(Self)
    }
}

impl From<BoundingRegion> for FixedRegion {
    fn from(region: BoundingRegion) -> Self {
        Self(region)
    }
}

impl RegionSource for FixedRegion {
    fn bounding_region(&self) -> Result<BoundingRegion> {
        Ok(self.0)
    }
}
