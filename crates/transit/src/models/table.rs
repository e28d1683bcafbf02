//! Delimited feed tables.
//!
//! A table is read once into memory with its header, detected delimiter and
//! records. Stages derive new tables from it, so the delimiter and column
//! order of the source survive every filter pass.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::models::keys::KeySet;
use crate::models::types::{ExtractError, Result};

pub const DEFAULT_DELIMITER: u8 = b',';

/// Pick the delimiter from a header line: `;`, then tab, then `,`.
pub fn detect_delimiter(first_line: &str) -> u8 {
    if first_line.contains(';') {
        b';'
    } else if first_line.contains('\t') {
        b'\t'
    } else {
        DEFAULT_DELIMITER
    }
}

fn detect_file_delimiter(path: &Path) -> Result<u8> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first_line = Vec::new();
    reader.read_until(b'\n', &mut first_line)?;
    Ok(detect_delimiter(&String::from_utf8_lossy(&first_line)))
}

fn table_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn normalize_column_name(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}

/// Trimmed field at `idx`, or `None` when the row is too short.
pub fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim)
}

/// Copy of `record` with the field at `idx` replaced, padding short rows.
pub fn with_field(record: &StringRecord, idx: usize, value: &str) -> StringRecord {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.len() <= idx {
        fields.resize(idx + 1, "");
    }
    fields[idx] = value;
    StringRecord::from(fields)
}

// ============================================================================
// Column lookup
// ============================================================================

/// Case-insensitive column name → position mapping built from a header.
#[derive(Clone, Debug, Default)]
pub struct ColumnIndex {
    lookup: HashMap<String, usize>,
    width: usize,
}

impl ColumnIndex {
    pub fn from_header(header: &StringRecord) -> Self {
        let mut lookup = HashMap::with_capacity(header.len());
        for (idx, name) in header.iter().enumerate() {
            // First occurrence wins on duplicated names
            lookup.entry(normalize_column_name(name)).or_insert(idx);
        }

        Self {
            lookup,
            width: header.len(),
        }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.lookup.get(&normalize_column_name(name)).copied()
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Rows seen and kept by a filter pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FilterStats {
    pub seen: usize,
    pub kept: usize,
    pub malformed: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.seen - self.kept
    }
}

// ============================================================================
// Feed table
// ============================================================================

#[derive(Clone, Debug)]
pub struct FeedTable {
    name: String,
    delimiter: u8,
    header: StringRecord,
    columns: ColumnIndex,
    rows: Vec<StringRecord>,
    malformed: usize,
}

impl FeedTable {
    pub fn from_parts(
        name: impl Into<String>,
        delimiter: u8,
        header: StringRecord,
        rows: Vec<StringRecord>,
    ) -> Self {
        let columns = ColumnIndex::from_header(&header);
        Self {
            name: name.into(),
            delimiter,
            header,
            columns,
            rows,
            malformed: 0,
        }
    }

    /// Read a required table. A missing file is `ExtractError::MissingTable`.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ExtractError::MissingTable(path.to_path_buf()));
        }

        let delimiter = detect_file_delimiter(path)?;
        let file = File::open(path)?;
        Self::from_reader(table_name(path), delimiter, file)
    }

    /// Read an optional table, `None` when the file does not exist.
    pub fn read_optional(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        Self::read(path).map(Some)
    }

    /// Parse a table held in memory, detecting the delimiter from its first line.
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let delimiter = detect_delimiter(text.lines().next().unwrap_or(""));
        Self::from_reader(name.to_string(), delimiter, text.as_bytes())
    }

    fn from_reader<R: Read>(name: String, delimiter: u8, reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = rdr.headers()?.clone();
        let mut rows = Vec::new();
        let mut malformed = 0;

        for result in rdr.records() {
            match result {
                Ok(record) => rows.push(record),
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    malformed += 1;
                    log::debug!("Skipping unreadable row in {}: {}", name, err);
                }
            }
        }

        if malformed > 0 {
            log::warn!("{}: skipped {} unreadable rows", name, malformed);
        }

        let columns = ColumnIndex::from_header(&header);
        Ok(Self {
            name,
            delimiter,
            header,
            columns,
            rows,
            malformed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn header(&self) -> &StringRecord {
        &self.header
    }

    pub fn columns(&self) -> &ColumnIndex {
        &self.columns
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows the CSV reader rejected while loading this table.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    pub fn require_column(&self, column: &str) -> Result<usize> {
        self.columns
            .get(column)
            .ok_or_else(|| ExtractError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// New table with the same name, header and delimiter but other rows.
    pub fn derive(&self, rows: Vec<StringRecord>) -> FeedTable {
        FeedTable {
            name: self.name.clone(),
            delimiter: self.delimiter,
            header: self.header.clone(),
            columns: self.columns.clone(),
            rows,
            malformed: 0,
        }
    }

    /// Copy of this table with `column` guaranteed present in the header.
    /// Returns the table and the column position.
    pub fn with_column(&self, column: &str) -> (FeedTable, usize) {
        if let Some(idx) = self.columns.get(column) {
            return (self.clone(), idx);
        }

        let mut header = self.header.clone();
        header.push_field(column);
        let idx = header.len() - 1;

        let mut table = self.derive(self.rows.clone());
        table.columns = ColumnIndex::from_header(&header);
        table.header = header;
        (table, idx)
    }

    /// Keep every row for which `keep` returns true.
    pub fn filter<F>(&self, mut keep: F) -> (FeedTable, FilterStats)
    where
        F: FnMut(&ColumnIndex, &StringRecord) -> bool,
    {
        let rows: Vec<StringRecord> = self
            .rows
            .iter()
            .filter(|record| keep(&self.columns, record))
            .cloned()
            .collect();

        let stats = FilterStats {
            seen: self.rows.len(),
            kept: rows.len(),
            malformed: self.malformed,
        };

        (self.derive(rows), stats)
    }

    /// Keep rows whose `column` value is a member of `keys`. Rows too short
    /// to hold the column never match.
    pub fn filter_by_key<K>(&self, column: &str, keys: &KeySet<K>) -> Result<(FeedTable, FilterStats)>
    where
        K: Borrow<str> + Ord,
    {
        let idx = self.require_column(column)?;
        Ok(self.filter(|_, record| field(record, idx).map_or(false, |value| keys.contains(value))))
    }

    /// Distinct non-empty values of `column`.
    pub fn key_set<K>(&self, column: &str) -> Result<KeySet<K>>
    where
        K: Ord + for<'a> From<&'a str>,
    {
        let idx = self.require_column(column)?;
        Ok(self
            .rows
            .iter()
            .filter_map(|record| field(record, idx))
            .filter(|value| !value.is_empty())
            .map(K::from)
            .collect())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)?;

        wtr.write_record(&self.header)?;
        for record in &self.rows {
            wtr.write_record(record)?;
        }
        wtr.flush()?;

        Ok(())
    }
}

/// Copy `source` to `destination` keeping only rows accepted by `keep`.
///
/// A missing source is reported and produces no output file.
pub fn filter_table_file<F>(source: &Path, destination: &Path, keep: F) -> Result<Option<FilterStats>>
where
    F: FnMut(&ColumnIndex, &StringRecord) -> bool,
{
    let Some(table) = FeedTable::read_optional(source)? else {
        log::warn!("  {} not found, skipping", source.display());
        return Ok(None);
    };

    let (filtered, stats) = table.filter(keep);
    filtered.write(destination)?;

    log::info!(
        "  {}: kept {} of {} rows",
        table.name(),
        stats.kept,
        stats.seen
    );

    Ok(Some(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::StopIdentifier;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("stop_id;stop_lat;stop_lon"), b';');
        assert_eq!(detect_delimiter("stop_id\tstop_lat"), b'\t');
        assert_eq!(detect_delimiter("stop_id,stop_lat"), b',');
        // Semicolon takes priority over tab
        assert_eq!(detect_delimiter("a;b\tc"), b';');
        assert_eq!(detect_delimiter(""), b',');
    }

    #[test]
    fn test_columns_are_case_insensitive() {
        let table = FeedTable::parse("stops", "\u{feff}Stop_ID, STOP_LAT ,stop_lon\n1,2,3\n").unwrap();
        assert_eq!(table.columns().get("stop_id"), Some(0));
        assert_eq!(table.columns().get("stop_lat"), Some(1));
        assert_eq!(table.columns().get("STOP_LON"), Some(2));
        assert_eq!(table.columns().get("stop_name"), None);
    }

    #[test]
    fn test_require_column_reports_table() {
        let table = FeedTable::parse("routes", "route_short_name\nA\n").unwrap();
        match table.require_column("route_id") {
            Err(ExtractError::MissingColumn { table, column }) => {
                assert_eq!(table, "routes");
                assert_eq!(column, "route_id");
            }
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_by_key_drops_short_rows() {
        let table = FeedTable::parse("stop_times", "trip_id,arrival_time,stop_id\nt1,08:00:00,a\nt1,08:05:00\nt1,08:10:00,b\n").unwrap();
        let keys: KeySet<StopIdentifier> = ["a", "b"].into_iter().map(StopIdentifier::from).collect();

        let (filtered, stats) = table.filter_by_key("stop_id", &keys).unwrap();
        assert_eq!(stats.seen, 3);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(filtered.rows()[1].get(2), Some("b"));
    }

    #[test]
    fn test_quoted_fields_are_single_values() {
        let table = FeedTable::parse("stops", "stop_id,stop_name\n1,\"Main St, North\"\n").unwrap();
        assert_eq!(table.rows()[0].len(), 2);
        assert_eq!(table.rows()[0].get(1), Some("Main St, North"));
    }

    #[test]
    fn test_with_column_appends_once() {
        let table = FeedTable::parse("trips", "route_id,trip_id\nr1,t1\n").unwrap();
        let (table, idx) = table.with_column("shape_id");
        assert_eq!(idx, 2);
        let (table, again) = table.with_column("SHAPE_ID");
        assert_eq!(again, 2);
        assert_eq!(table.header().len(), 3);
    }

    #[test]
    fn test_with_field_pads_short_rows() {
        let record = StringRecord::from(vec!["r1", "t1"]);
        let updated = with_field(&record, 3, "7");
        assert_eq!(updated.iter().collect::<Vec<_>>(), vec!["r1", "t1", "", "7"]);
    }

    #[test]
    fn test_write_preserves_delimiter_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("stops.txt");
        std::fs::write(&source, "stop_name;stop_id;stop_lat;stop_lon\nA;1;0.5;0.5\nB;2;5.0;5.0\n").unwrap();

        let destination = dir.path().join("out.txt");
        let stats = filter_table_file(&source, &destination, |columns, record| {
            columns
                .get("stop_id")
                .and_then(|idx| field(record, idx))
                .map_or(false, |id| id == "2")
        })
        .unwrap()
        .unwrap();

        assert_eq!(stats.kept, 1);
        let written = std::fs::read_to_string(&destination).unwrap();
        assert_eq!(written, "stop_name;stop_id;stop_lat;stop_lon\nB;2;5.0;5.0\n");
    }

    #[test]
    fn test_filter_missing_source_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.txt");
        let result = filter_table_file(&dir.path().join("absent.txt"), &destination, |_, _| true).unwrap();
        assert!(result.is_none());
        assert!(!destination.exists());
    }

    #[test]
    fn test_read_missing_required_table() {
        let dir = tempfile::tempdir().unwrap();
        let err = FeedTable::read(&dir.path().join("stops.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::MissingTable(_)));
    }

    #[test]
    fn test_unreadable_rows_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.txt");
        std::fs::write(&path, b"route_id,route_short_name\nr1,A\nr2,\xff\xfe\nr3,C\n").unwrap();

        let table = FeedTable::read(&path).unwrap();
        assert_eq!(table.name(), "routes");
        assert_eq!(table.len(), 2);
        assert_eq!(table.malformed(), 1);
    }
}
