//! Region sources backed by files.

use anyhow::{bail, Context, Result};
use feedclip_transit::models::{BoundingRegion, ExtractError};
use feedclip_transit::RegionSource;
use geo::{BoundingRect, Coord, LineString, Polygon};
use geojson::GeoJson;
use osmpbf::{BlobDecode, BlobReader};
use std::path::{Path, PathBuf};

fn unavailable(err: anyhow::Error) -> ExtractError {
    ExtractError::RegionUnavailable(format!("{:#}", err))
}

// ============================================================================
// GeoJSON polygon
// ============================================================================

/// Bounding rectangle of the first polygon in a GeoJSON file.
pub struct GeoJsonRegion {
    path: PathBuf,
}

impl GeoJsonRegion {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<BoundingRegion> {
        let polygon = read_region_polygon(&self.path)?;
        let rect = polygon
            .bounding_rect()
            .with_context(|| format!("Polygon has no coordinates: {}", self.path.display()))?;
        Ok(BoundingRegion::from_rect(rect)?)
    }
}

impl RegionSource for GeoJsonRegion {
    fn bounding_region(&self) -> feedclip_transit::Result<BoundingRegion> {
        self.read().map_err(unavailable)
    }
}

/// Read a polygon from a GeoJSON file
fn read_region_polygon(path: &Path) -> Result<Polygon<f64>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read region file: {}", path.display()))?;

    let geojson: GeoJson = content
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON from: {}", path.display()))?;

    polygon_from_geojson(geojson).with_context(|| format!("No valid polygon found in: {}", path.display()))
}

fn polygon_from_geojson(geojson: GeoJson) -> Result<Polygon<f64>> {
    match geojson {
        GeoJson::Geometry(geom) => geometry_to_polygon(geom.value),
        GeoJson::Feature(feature) => match feature.geometry {
            Some(geom) => geometry_to_polygon(geom.value),
            None => bail!("Feature has no geometry"),
        },
        GeoJson::FeatureCollection(fc) => {
            for feature in fc.features {
                if let Some(geom) = feature.geometry {
                    if let Ok(poly) = geometry_to_polygon(geom.value) {
                        return Ok(poly);
                    }
                }
            }
            bail!("No polygon found in FeatureCollection")
        }
    }
}

fn geometry_to_polygon(value: geojson::Value) -> Result<Polygon<f64>> {
    let rings = match value {
        geojson::Value::Polygon(rings) => rings,
        // Only the first polygon is used
        geojson::Value::MultiPolygon(polygons) => match polygons.into_iter().next() {
            Some(rings) => rings,
            None => bail!("MultiPolygon is empty"),
        },
        _ => bail!("Geometry is not a Polygon or MultiPolygon"),
    };

    let Some(exterior) = rings.first() else {
        bail!("Polygon has no rings");
    };
    // Holes cannot widen the bounding rectangle
    Ok(Polygon::new(ring_to_linestring(exterior), vec![]))
}

fn ring_to_linestring(coords: &[Vec<f64>]) -> LineString<f64> {
    coords
        .iter()
        .filter_map(|c| match c.as_slice() {
            [x, y, ..] => Some(Coord { x: *x, y: *y }),
            _ => None,
        })
        .collect()
}

// ============================================================================
// OSM PBF header
// ============================================================================

/// Bounding box recorded in the header block of an OSM PBF extract.
pub struct PbfHeaderRegion {
    path: PathBuf,
}

impl PbfHeaderRegion {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<BoundingRegion> {
        let mut reader = BlobReader::from_path(&self.path)
            .with_context(|| format!("Failed to open PBF file: {}", self.path.display()))?;

        // The header is the first blob of a well-formed file
        let Some(blob) = reader.next() else {
            bail!("PBF file is empty: {}", self.path.display());
        };
        let blob = blob.context("Failed to read PBF blob")?;

        match blob.decode().context("Failed to decode PBF blob")? {
            BlobDecode::OsmHeader(header) => {
                let bbox = header
                    .bbox()
                    .with_context(|| format!("PBF header has no bounding box: {}", self.path.display()))?;
                log::debug!(
                    "PBF header bbox: left={} bottom={} right={} top={}",
                    bbox.left,
                    bbox.bottom,
                    bbox.right,
                    bbox.top
                );
                Ok(BoundingRegion::new(bbox.left, bbox.bottom, bbox.right, bbox.top)?)
            }
            _ => bail!("First blob is not a header block: {}", self.path.display()),
        }
    }
}

impl RegionSource for PbfHeaderRegion {
    fn bounding_region(&self) -> feedclip_transit::Result<BoundingRegion> {
        self.read().map_err(unavailable)
    }
}
