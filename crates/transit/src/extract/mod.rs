//! The extraction stages, in the order the pipeline runs them.

pub mod prune;
pub mod reindex;
pub mod shapes;
pub mod stops;
pub mod trips;

pub use prune::{prune_references, FeedTables, PruneStats};
pub use reindex::{reindex_stop_times, ReindexStats, Reindexed};
pub use shapes::{clip_shapes, clip_trip_shape, ClippedShapes, ShapeSource, ShapeStats, SourceShapes};
pub use stops::{retain_used_stops, select_stops_in_region, StopSelection};
pub use trips::{retain_routed_trips, select_routes, select_trips, TripSelection};
