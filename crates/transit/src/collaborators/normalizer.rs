//! Canonical re-serialization of a finished feed.

use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::collaborators::FeedNormalizer;
use crate::models::table::DEFAULT_DELIMITER;
use crate::models::{ExtractError, FeedTable, Result};

/// Re-parses every `.txt` table and writes it back with a comma delimiter,
/// lowercase trimmed headers, trimmed fields and every row exactly as wide
/// as its header.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalNormalizer;

impl CanonicalNormalizer {
    /// Sibling directory the normalized feed is written to.
    pub fn target_dir(feed_dir: &Path) -> PathBuf {
        let mut name = feed_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "feed".into());
        name.push(".normalized");
        feed_dir.with_file_name(name)
    }

    pub fn canonicalize(table: &FeedTable) -> FeedTable {
        let header: StringRecord = table
            .header()
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
            .collect();
        let width = header.len();

        let rows = table
            .rows()
            .iter()
            .map(|record| {
                let mut fields: Vec<&str> = record.iter().map(str::trim).take(width).collect();
                fields.resize(width, "");
                StringRecord::from(fields)
            })
            .collect();

        FeedTable::from_parts(table.name(), DEFAULT_DELIMITER, header, rows)
    }

    fn table_files(feed_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(feed_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "txt") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn write_normalized(&self, feed_dir: &Path, target: &Path) -> Result<()> {
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::create_dir_all(target)?;

        for path in Self::table_files(feed_dir)? {
            let table = FeedTable::read(&path)?;
            let canonical = Self::canonicalize(&table);
            if let Some(file_name) = path.file_name() {
                canonical.write(&target.join(file_name))?;
            }
            log::debug!("  Normalized {} ({} rows)", table.name(), canonical.len());
        }

        Ok(())
    }
}

impl FeedNormalizer for CanonicalNormalizer {
    fn normalize(&self, feed_dir: &Path) -> Result<PathBuf> {
        let target = Self::target_dir(feed_dir);

        if let Err(err) = self.write_normalized(feed_dir, &target) {
            if target.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&target) {
                    log::warn!("Could not remove {}: {}", target.display(), cleanup);
                }
            }
            return Err(ExtractError::Normalize(Box::new(err)));
        }

        Ok(target)
    }
}
