//! R-tree over stop coordinates.
//!
//! Answers the region-membership query for the stops table and serves the
//! coordinate lookups the shape clipper needs once trips are reindexed.

use std::collections::HashMap;

use geo::Coord;
use rstar::{Envelope, RTree, RTreeObject, SelectionFunction, AABB};

use crate::identifiers::StopIdentifier;
use crate::models::{field, BoundingRegion, FeedTable, KeySet, Result};

// ============================================================================
// Stop Spatial Node
// ============================================================================

#[derive(Clone, Debug)]
pub struct StopNode {
    pub stop_id: StopIdentifier,
    point: [f64; 2],
}

impl StopNode {
    pub fn new(stop_id: StopIdentifier, location: Coord<f64>) -> Self {
        Self {
            stop_id,
            point: [location.x, location.y],
        }
    }
}

impl RTreeObject for StopNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// Selects stops inside an envelope, edges included.
struct WithinEnvelope(AABB<[f64; 2]>);

impl SelectionFunction<StopNode> for WithinEnvelope {
    fn should_unpack_parent(&self, envelope: &AABB<[f64; 2]>) -> bool {
        self.0.intersects(envelope)
    }

    fn should_unpack_leaf(&self, leaf: &StopNode) -> bool {
        self.0.contains_point(&leaf.point)
    }
}

// ============================================================================
// Stop Index
// ============================================================================

pub struct StopIndex {
    tree: RTree<StopNode>,
    coordinates: HashMap<StopIdentifier, Coord<f64>>,
    unlocated: usize,
}

fn parse_coordinate(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

impl StopIndex {
    /// Index every stop row with a parsable `stop_lat`/`stop_lon`.
    ///
    /// Rows without usable coordinates are counted and left out, so they can
    /// never fall inside a region.
    pub fn from_table(stops: &FeedTable) -> Result<Self> {
        let id_idx = stops.require_column("stop_id")?;
        let lat_idx = stops.require_column("stop_lat")?;
        let lon_idx = stops.require_column("stop_lon")?;

        let mut coordinates = HashMap::with_capacity(stops.len());
        let mut nodes = Vec::with_capacity(stops.len());
        let mut unlocated = 0;

        for record in stops.rows() {
            let id = match field(record, id_idx) {
                Some(id) if !id.is_empty() => id,
                _ => {
                    unlocated += 1;
                    continue;
                }
            };

            let lat = parse_coordinate(field(record, lat_idx));
            let lon = parse_coordinate(field(record, lon_idx));
            let (Some(lat), Some(lon)) = (lat, lon) else {
                log::debug!("Stop {} has no usable coordinates", id);
                unlocated += 1;
                continue;
            };

            let stop_id = StopIdentifier::new(id);
            let location = Coord { x: lon, y: lat };
            // First row wins on duplicated ids
            if !coordinates.contains_key(&stop_id) {
                coordinates.insert(stop_id.clone(), location);
                nodes.push(StopNode::new(stop_id, location));
            }
        }

        if unlocated > 0 {
            log::warn!("  {} stops without usable coordinates were skipped", unlocated);
        }

        Ok(Self {
            tree: RTree::bulk_load(nodes),
            coordinates,
            unlocated,
        })
    }

    /// Stops inside `region`, boundary included.
    pub fn stops_within(&self, region: &BoundingRegion) -> KeySet<StopIdentifier> {
        self.tree
            .locate_with_selection_function(WithinEnvelope(region.envelope()))
            .map(|node| node.stop_id.clone())
            .collect()
    }

    pub fn coordinate(&self, stop_id: &str) -> Option<Coord<f64>> {
        self.coordinates.get(stop_id).copied()
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn unlocated(&self) -> usize {
        self.unlocated
    }
}
