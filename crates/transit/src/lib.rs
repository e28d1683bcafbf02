//! # feedclip-transit
//!
//! Regional extraction of GTFS feeds with referential closure.
//!
//! ## Features
//!
//! - **Spatial selection**: R-tree backed stop lookup against a bounding region
//! - **Sequence repair**: stop times reordered, de-duplicated and renumbered per trip
//! - **Shape clipping**: each trip gets its own shape cut to the region
//! - **Referential closure**: no output row points at a row that was dropped
//! - **Pluggable collaborators**: bring your own region source, normalizer or validator
//!
//! ## Example
//!
//! ```no_run
//! use feedclip_transit::prelude::*;
//!
//! let region = FixedRegion::new(-74.05, 40.68, -73.90, 40.82)?;
//! let extractor = FeedExtractor::new(region)
//!     .with_validator(ProcessValidator::new("gtfs-validator").with_args(["-i", "{feed}", "-o", "{report}"]));
//!
//! let summary = extractor.run(&ExtractOptions::new("feeds/nyc", "feeds/manhattan"))?;
//! println!("kept {} of {} trips", summary.trips.kept, summary.trips.seen);
//! # Ok::<(), ExtractError>(())
//! ```

pub mod collaborators;
pub mod extract;
pub mod identifiers;
pub mod models;
pub mod pipeline;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::collaborators::{
        AgencyDefaults, AgencyResolver, CanonicalNormalizer, FeedNormalizer, FeedValidator, FixedRegion,
        ProcessValidator, RegionSource, SourceAgencyResolver, ValidationReport, ValidatorVerdict,
    };
    pub use crate::identifiers::*;
    pub use crate::models::{BoundingRegion, ExtractError, FeedTable, FilterStats, KeySet, Result};
    pub use crate::pipeline::{ExtractOptions, ExtractSummary, FeedExtractor, TableCount};
    pub use crate::spatial::{PlanarGeometry, PolylineGeometry};
}

pub use prelude::*;
