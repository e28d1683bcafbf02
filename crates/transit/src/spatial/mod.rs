//! Spatial indexing and polyline geometry.

pub mod geometry;
pub mod index;

pub use geometry::{LinearPosition, PlanarGeometry, PolylineGeometry};
pub use index::StopIndex;
