//! Agency record resolution.

use std::path::Path;

use csv::StringRecord;

use crate::collaborators::AgencyResolver;
use crate::models::table::DEFAULT_DELIMITER;
use crate::models::{FeedTable, Result};

pub const AGENCY_COLUMNS: [&str; 4] = ["agency_id", "agency_name", "agency_url", "agency_timezone"];

pub const ENV_AGENCY_ID: &str = "FEEDCLIP_AGENCY_ID";
pub const ENV_AGENCY_NAME: &str = "FEEDCLIP_AGENCY_NAME";
pub const ENV_AGENCY_URL: &str = "FEEDCLIP_AGENCY_URL";
pub const ENV_AGENCY_TIMEZONE: &str = "FEEDCLIP_AGENCY_TIMEZONE";

/// Values of the synthesized agency row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgencyDefaults {
    pub id: String,
    pub name: String,
    pub url: String,
    pub timezone: String,
}

impl Default for AgencyDefaults {
    fn default() -> Self {
        Self {
            id: "1".into(),
            name: "Unknown agency".into(),
            url: "https://example.com".into(),
            timezone: "UTC".into(),
        }
    }
}

impl AgencyDefaults {
    /// Defaults overridden by the `FEEDCLIP_AGENCY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Empty values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let pick = |key: &str, fallback: String| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback)
        };

        Self {
            id: pick(ENV_AGENCY_ID, base.id),
            name: pick(ENV_AGENCY_NAME, base.name),
            url: pick(ENV_AGENCY_URL, base.url),
            timezone: pick(ENV_AGENCY_TIMEZONE, base.timezone),
        }
    }

    pub fn to_table(&self) -> FeedTable {
        let row = StringRecord::from(vec![
            self.id.as_str(),
            self.name.as_str(),
            self.url.as_str(),
            self.timezone.as_str(),
        ]);
        FeedTable::from_parts(
            "agency",
            DEFAULT_DELIMITER,
            StringRecord::from(AGENCY_COLUMNS.to_vec()),
            vec![row],
        )
    }
}

/// Uses the source feed's agency table, or a synthesized one when it is
/// missing or empty.
#[derive(Clone, Debug, Default)]
pub struct SourceAgencyResolver {
    defaults: AgencyDefaults,
}

impl SourceAgencyResolver {
    pub fn new(defaults: AgencyDefaults) -> Self {
        Self { defaults }
    }

    pub fn from_env() -> Self {
        Self::new(AgencyDefaults::from_env())
    }
}

impl AgencyResolver for SourceAgencyResolver {
    fn resolve(&self, source_dir: &Path) -> Result<FeedTable> {
        let path = source_dir.join("agency.txt");
        match FeedTable::read_optional(&path)? {
            Some(table) if !table.is_empty() => {
                log::info!("  Agency: {} record(s) from source", table.len());
                Ok(table)
            }
            Some(_) => {
                log::warn!("  {} has no records, writing default agency {}", path.display(), self.defaults.name);
                Ok(self.defaults.to_table())
            }
            None => {
                log::warn!("  {} not found, writing default agency {}", path.display(), self.defaults.name);
                Ok(self.defaults.to_table())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = [(ENV_AGENCY_NAME, "Metro"), (ENV_AGENCY_TIMEZONE, " ")].into_iter().collect();
        let defaults = AgencyDefaults::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(defaults.name, "Metro");
        assert_eq!(defaults.id, "1");
        // Blank values fall back
        assert_eq!(defaults.timezone, "UTC");
    }

    #[test]
    fn test_missing_agency_is_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let table = SourceAgencyResolver::default().resolve(dir.path()).unwrap();

        assert_eq!(table.header().iter().collect::<Vec<_>>(), AGENCY_COLUMNS.to_vec());
        assert_eq!(table.rows()[0].iter().collect::<Vec<_>>(), vec!["1", "Unknown agency", "https://example.com", "UTC"]);
    }

    #[test]
    fn test_source_agency_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agency.txt"),
            "agency_id;agency_name;agency_url;agency_timezone\nMTA;Transit Authority;https://mta.example;America/New_York\n",
        )
        .unwrap();

        let table = SourceAgencyResolver::default().resolve(dir.path()).unwrap();
        assert_eq!(table.delimiter(), b';');
        assert_eq!(&table.rows()[0][1], "Transit Authority");
    }
}
