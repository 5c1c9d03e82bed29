//! Synthetic catalog generator for exercising the import pipeline.
//!
//! Each source gets a center drawn uniformly over the sphere's coordinate
//! box, and its observations jitter within a few milli-degrees of that
//! center, so a generated catalog clusters per source the way the importer
//! expects. Rows come out time-sorted, like a real observation log.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::catalog::{CatalogRecord, SkyPosition};
use crate::error::Result;

/// Jitter half-width around a source center, in degrees.
const CENTER_JITTER_DEG: f64 = 0.001;

/// Julian date of the start of the observation year.
const JD_EPOCH: f64 = 2_460_311.0;

#[derive(Debug, Clone, Copy)]
pub struct GenerateConfig {
    /// Number of distinct sources, ids 1..=sources.
    pub sources: u32,
    /// Observations per source.
    pub records_per_source: u32,
    /// RNG seed; the same seed reproduces the same catalog.
    pub seed: u64,
}

/// Generate a time-sorted synthetic catalog.
pub fn generate_catalog(config: &GenerateConfig) -> Vec<CatalogRecord> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut records =
        Vec::with_capacity(config.sources as usize * config.records_per_source as usize);

    for source_id in 1..=config.sources {
        let ra_center = rng.gen_range(0.0..360.0);
        let dec_center = rng.gen_range(-90.0..90.0);

        for _ in 0..config.records_per_source {
            let ra = ra_center + rng.gen_range(-CENTER_JITTER_DEG..=CENTER_JITTER_DEG);
            let dec = dec_center + rng.gen_range(-CENTER_JITTER_DEG..=CENTER_JITTER_DEG);

            records.push(CatalogRecord {
                timestamp: random_timestamp(&mut rng),
                source_id,
                position: SkyPosition::new(ra, dec),
                magnitude: rng.gen_range(8.0..18.0),
                time_value: JD_EPOCH + rng.gen_range(0.0..365.0),
            });
        }
    }

    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    records
}

/// Write the catalog in the importer's input format.
pub fn write_catalog(path: &Path, records: &[CatalogRecord]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "ts,source_id,ra,dec,mag,jd_tcb")?;
    for record in records {
        writeln!(
            out,
            "{},{},{:.6},{:.6},{:.2},{:.6}",
            record.timestamp,
            record.source_id,
            record.position.ra_deg(),
            record.position.dec_deg(),
            record.magnitude,
            record.time_value,
        )?;
    }
    out.flush()?;
    Ok(())
}

/// A uniformly random second within 2024, formatted so lexicographic order
/// is chronological order.
fn random_timestamp(rng: &mut StdRng) -> String {
    // 2024 is a leap year.
    const MONTH_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut day_of_year = rng.gen_range(0..366u32);
    let mut month = 1;
    for days in MONTH_DAYS {
        if day_of_year < days {
            break;
        }
        day_of_year -= days;
        month += 1;
    }
    let day = day_of_year + 1;

    format!(
        "2024-{month:02}-{day:02} {:02}:{:02}:{:02}",
        rng.gen_range(0..24u32),
        rng.gen_range(0..60u32),
        rng.gen_range(0..60u32),
    )
}
