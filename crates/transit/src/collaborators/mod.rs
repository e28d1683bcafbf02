//! Pluggable collaborators.
//!
//! The pipeline only talks to the outside world through these traits:
//! where the region comes from, what agency record to write, how the
//! finished tables are normalized, and who validates the result.

use std::path::{Path, PathBuf};

use crate::models::{BoundingRegion, FeedTable, Result};

pub mod agency;
pub mod normalizer;
pub mod region;
pub mod validator;

pub use agency::{AgencyDefaults, SourceAgencyResolver};
pub use normalizer::CanonicalNormalizer;
pub use region::FixedRegion;
pub use validator::{classify, ProcessValidator, ValidationReport, ValidatorVerdict};

/// Supplies the bounding region to extract
pub trait RegionSource: Send + Sync {
    /// Fails when no boundary information is available.
    fn bounding_region(&self) -> Result<BoundingRegion>;
}

impl<R: RegionSource + ?Sized> RegionSource for Box<R> {
    fn bounding_region(&self) -> Result<BoundingRegion> {
        (**self).bounding_region()
    }
}

/// Produces the agency table written with the extracted feed
pub trait AgencyResolver: Send + Sync {
    fn resolve(&self, source_dir: &Path) -> Result<FeedTable>;
}

/// Rewrites a finished feed directory into its final form
pub trait FeedNormalizer: Send + Sync {
    /// Returns the directory holding the normalized feed, which may be
    /// `feed_dir` itself.
    fn normalize(&self, feed_dir: &Path) -> Result<PathBuf>;
}

/// Checks a finished feed. Failures are reported in the returned report,
/// never as errors.
pub trait FeedValidator: Send + Sync {
    fn validate(&self, feed_dir: &Path) -> ValidationReport;
}
