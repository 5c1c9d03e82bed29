//! Catalog records and the delimited catalog reader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// A sky direction in degrees, normalized on construction.
///
/// RA is wrapped into [0, 360); Dec is clamped to [-90, 90]. Every position
/// consumed by partitioning or query code goes through this constructor, so
/// shard assignment and query lookup can never disagree on the direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    ra_deg: f64,
    dec_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        let ra = ((ra_deg % 360.0) + 360.0) % 360.0;
        let dec = dec_deg.clamp(-90.0, 90.0);
        SkyPosition {
            ra_deg: ra,
            dec_deg: dec,
        }
    }

    pub fn ra_deg(&self) -> f64 {
        self.ra_deg
    }

    pub fn dec_deg(&self) -> f64 {
        self.dec_deg
    }

    /// (lon, lat) in radians, for the tessellation.
    pub fn lon_lat_rad(&self) -> (f64, f64) {
        (self.ra_deg.to_radians(), self.dec_deg.to_radians())
    }

    /// Great-circle separation to another position, in degrees.
    ///
    /// Spherical law of cosines; the cosine is clamped to [-1, 1] before
    /// `acos` so floating-point overshoot near coincident or antipodal
    /// points cannot produce NaN.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        let ra1 = self.ra_deg.to_radians();
        let dec1 = self.dec_deg.to_radians();
        let ra2 = other.ra_deg.to_radians();
        let dec2 = other.dec_deg.to_radians();

        let cos_sep = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * (ra2 - ra1).cos();
        cos_sep.clamp(-1.0, 1.0).acos().to_degrees()
    }
}

/// One observation row from the catalog. Immutable once read.
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub timestamp: String,
    pub source_id: u32,
    pub position: SkyPosition,
    pub magnitude: f64,
    pub time_value: f64,
}

/// Read a comma-delimited catalog: header row, then
/// `ts,source_id,ra,dec,mag,jd_tcb` columns (extra columns ignored).
///
/// Rows that fail to parse are skipped and counted, never surfaced as
/// errors; an empty file (missing header) is an error.
pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRecord>> {
    let file = File::open(path)?;
    let mut lines = BufReader::new(file).lines();

    match lines.next() {
        Some(line) => {
            line?;
        }
        None => {
            return Err(Error::Catalog(format!(
                "{}: empty file, expected a header row",
                path.display()
            )));
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in lines {
        let line = line?;
        match parse_row(&line) {
            Some(record) => records.push(record),
            None => {
                if !line.trim().is_empty() {
                    skipped += 1;
                }
            }
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, "skipped malformed catalog rows");
    }
    tracing::info!(records = records.len(), "loaded catalog {}", path.display());

    Ok(records)
}

fn parse_row(line: &str) -> Option<CatalogRecord> {
    let mut fields = line.split(',');

    let timestamp = fields.next()?.trim().to_string();
    let source_id: u32 = fields.next()?.trim().parse().ok()?;
    let ra: f64 = fields.next()?.trim().parse().ok()?;
    let dec: f64 = fields.next()?.trim().parse().ok()?;
    let magnitude: f64 = fields.next()?.trim().parse().ok()?;
    let time_value: f64 = fields.next()?.trim().parse().ok()?;

    Some(CatalogRecord {
        timestamp,
        source_id,
        position: SkyPosition::new(ra, dec),
        magnitude,
        time_value,
    })
}
