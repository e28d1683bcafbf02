//! Feed data models: tables, key sets, the bounding region and errors.

pub mod keys;
pub mod region;
pub mod table;
pub mod types;

// Re-exports for convenience
pub use keys::KeySet;
pub use region::BoundingRegion;
pub use table::{detect_delimiter, field, filter_table_file, ColumnIndex, FeedTable, FilterStats};
pub use types::{ExtractError, Result};
