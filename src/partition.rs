//! Adaptive two-level partitioning.
//!
//! A single pass over the catalog counts records per base-resolution cell;
//! that frozen population then drives refinement: any base cell holding
//! strictly more records than the threshold is split into its fine-resolution
//! descendants. The resulting [`PartitionScheme`] is the one source of truth
//! for record-to-partition assignment, shared by the import pipeline and the
//! query engine so both sides always agree on where a position lives.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::catalog::{CatalogRecord, SkyPosition};
use crate::error::Error;
use crate::healpix::{CellId, Tessellation};

/// Identifier of one shard of the catalog.
///
/// Plain ids name a base-resolution cell directly. Composite ids name a
/// fine-resolution cell under a refined base cell and carry a flag bit so
/// that `composite(0, f)` can never collide with the plain id `f`:
///
/// ```text
/// bit 63        bits 62..32      bits 31..0
/// [flag = 1]    [base cell id]   [fine cell id]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u64);

const FINE_BITS: u32 = 32;
const COMPOSITE_FLAG: u64 = 1 << 63;

impl PartitionId {
    pub fn base(cell: CellId) -> Self {
        debug_assert_eq!(cell & COMPOSITE_FLAG, 0);
        PartitionId(cell)
    }

    pub fn composite(base: CellId, fine: CellId) -> Self {
        debug_assert!(fine < 1 << FINE_BITS, "fine cell id overflows 32 bits");
        debug_assert!(base < 1 << (63 - FINE_BITS));
        PartitionId(COMPOSITE_FLAG | (base << FINE_BITS) | fine)
    }

    pub fn is_composite(&self) -> bool {
        self.0 & COMPOSITE_FLAG != 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_composite() {
            let base = (self.0 & !COMPOSITE_FLAG) >> FINE_BITS;
            let fine = self.0 & ((1 << FINE_BITS) - 1);
            write!(f, "{base}/{fine}")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Planner parameters.
#[derive(Debug, Clone, Copy)]
pub struct PlanConfig {
    /// Tessellation depth of the coarse level.
    pub base_depth: u8,
    /// Tessellation depth used inside refined base cells. Must be >= base_depth.
    pub fine_depth: u8,
    /// A base cell is refined when its population is strictly greater than this.
    pub threshold: u64,
}

impl PlanConfig {
    /// Nested fine cell ids must fit the 32-bit slot of a composite
    /// partition id; 12 * 4^15 cells would overflow it.
    pub const MAX_FINE_DEPTH: u8 = 14;

    /// Check the depth ordering and encoding limits. Call this on
    /// user-supplied parameters before planning; [`plan`] asserts the same
    /// conditions as invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fine_depth < self.base_depth {
            return Err(Error::Config(format!(
                "fine depth {} below base depth {}",
                self.fine_depth, self.base_depth
            )));
        }
        if self.fine_depth > Self::MAX_FINE_DEPTH {
            return Err(Error::Config(format!(
                "fine depth {} exceeds the maximum of {}",
                self.fine_depth,
                Self::MAX_FINE_DEPTH
            )));
        }
        Ok(())
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            base_depth: 6,
            fine_depth: 8,
            threshold: 10_000,
        }
    }
}

/// The frozen outcome of planning: which base cells are refined, and the
/// tessellations needed to map any position to its partition.
#[derive(Debug, Clone)]
pub struct PartitionScheme {
    base: Tessellation,
    fine: Tessellation,
    refined: HashSet<CellId>,
}

impl PartitionScheme {
    pub fn base(&self) -> &Tessellation {
        &self.base
    }

    pub fn fine(&self) -> &Tessellation {
        &self.fine
    }

    pub fn is_refined(&self, base_cell: CellId) -> bool {
        self.refined.contains(&base_cell)
    }

    pub fn refined_count(&self) -> usize {
        self.refined.len()
    }

    /// Partition holding the given position.
    pub fn partition_of(&self, pos: &SkyPosition) -> PartitionId {
        let (lon, lat) = pos.lon_lat_rad();
        let base_cell = self.base.cell_of(lon, lat);
        if self.refined.contains(&base_cell) {
            let fine_cell = self.fine.cell_of(lon, lat);
            PartitionId::composite(base_cell, fine_cell)
        } else {
            PartitionId::base(base_cell)
        }
    }

    /// All partitions whose records lie inside the given base cell.
    ///
    /// For an unrefined cell this is the plain id itself. For a refined cell
    /// the nested indexing scheme makes the descendants a contiguous range:
    /// each extra depth level splits a cell into 4, appending two index bits,
    /// so the fine cells under `c` are exactly `[c * 4^dd, (c + 1) * 4^dd)`.
    pub fn expand_base_cell(&self, base_cell: CellId) -> Vec<PartitionId> {
        if !self.refined.contains(&base_cell) {
            return vec![PartitionId::base(base_cell)];
        }
        let shift = 2 * u32::from(self.fine.depth() - self.base.depth());
        let first = base_cell << shift;
        let last = (base_cell + 1) << shift;
        (first..last)
            .map(|fine| PartitionId::composite(base_cell, fine))
            .collect()
    }
}

/// Population statistics gathered during planning, reported after import.
#[derive(Debug, Clone, Copy)]
pub struct PopulationReport {
    /// Number of distinct base cells that hold at least one record.
    pub occupied_cells: u64,
    pub min_population: u64,
    pub max_population: u64,
    pub avg_population: f64,
    pub refined_cells: u64,
    pub total_records: u64,
}

/// A complete import plan: one partition per record, plus the scheme and
/// population statistics.
#[derive(Debug)]
pub struct Plan {
    pub assignments: Vec<PartitionId>,
    pub scheme: PartitionScheme,
    pub report: PopulationReport,
}

/// Build the partition plan for a catalog.
///
/// Two passes over the records: the first freezes the base-cell population
/// and decides refinement, the second assigns every record under the frozen
/// scheme. Records arriving later never change which cells were refined.
pub fn plan(records: &[CatalogRecord], config: &PlanConfig) -> Plan {
    assert!(
        config.fine_depth >= config.base_depth,
        "fine depth {} below base depth {}",
        config.fine_depth,
        config.base_depth
    );
    assert!(
        config.fine_depth <= PlanConfig::MAX_FINE_DEPTH,
        "fine depth {} overflows the composite id encoding",
        config.fine_depth
    );

    let base = Tessellation::new(config.base_depth);
    let fine = Tessellation::new(config.fine_depth);

    let mut population: HashMap<CellId, u64> = HashMap::new();
    for record in records {
        let (lon, lat) = record.position.lon_lat_rad();
        *population.entry(base.cell_of(lon, lat)).or_insert(0) += 1;
    }

    let refined: HashSet<CellId> = population
        .iter()
        .filter(|(_, &count)| count > config.threshold)
        .map(|(&cell, _)| cell)
        .collect();

    let report = summarize(&population, refined.len() as u64, records.len() as u64);

    tracing::info!(
        occupied = report.occupied_cells,
        refined = report.refined_cells,
        max = report.max_population,
        "partition plan ready"
    );

    let scheme = PartitionScheme {
        base,
        fine,
        refined,
    };

    let assignments = records
        .iter()
        .map(|record| scheme.partition_of(&record.position))
        .collect();

    Plan {
        assignments,
        scheme,
        report,
    }
}

fn summarize(population: &HashMap<CellId, u64>, refined: u64, total: u64) -> PopulationReport {
    let occupied = population.len() as u64;
    let min = population.values().copied().min().unwrap_or(0);
    let max = population.values().copied().max().unwrap_or(0);
    let avg = if occupied > 0 {
        total as f64 / occupied as f64
    } else {
        0.0
    };
    PopulationReport {
        occupied_cells: occupied,
        min_population: min,
        max_population: max,
        avg_population: avg,
        refined_cells: refined,
        total_records: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn record(source_id: u32, ra: f64, dec: f64) -> CatalogRecord {
        CatalogRecord {
            timestamp: "2024-01-01 00:00:00".to_string(),
            source_id,
            position: SkyPosition::new(ra, dec),
            magnitude: 12.0,
            time_value: 2460310.5,
        }
    }

    #[test]
    fn sparse_catalog_stays_at_base_resolution() {
        // Scenario: a handful of scattered records, threshold far above any
        // single cell's population. Every assignment must be a plain id.
        let mut rng = StdRng::seed_from_u64(7);
        let records: Vec<_> = (0..10)
            .map(|i| {
                record(
                    i,
                    rng.gen_range(0.0..360.0),
                    rng.gen_range(-80.0..80.0),
                )
            })
            .collect();

        let config = PlanConfig {
            base_depth: 4,
            fine_depth: 6,
            threshold: 1000,
        };
        let p = plan(&records, &config);

        assert_eq!(p.assignments.len(), records.len());
        assert!(p.assignments.iter().all(|id| !id.is_composite()));
        assert_eq!(p.report.refined_cells, 0);
        assert_eq!(p.report.total_records, 10);
    }

    #[test]
    fn dense_cell_is_refined_sparse_cell_is_not() {
        // 1500 records in one spot, 20 in an antipodal spot, threshold 1000.
        let mut records = Vec::new();
        for i in 0..1500u32 {
            records.push(record(i, 10.0, 10.0));
        }
        for i in 0..20u32 {
            records.push(record(10_000 + i, 190.0, -10.0));
        }

        let config = PlanConfig {
            base_depth: 4,
            fine_depth: 6,
            threshold: 1000,
        };
        let p = plan(&records, &config);

        assert!(p.assignments[..1500].iter().all(|id| id.is_composite()));
        assert!(p.assignments[1500..].iter().all(|id| !id.is_composite()));
        assert_eq!(p.report.refined_cells, 1);
    }

    #[test]
    fn population_exactly_at_threshold_is_not_refined() {
        let records: Vec<_> = (0..100u32).map(|i| record(i, 45.0, 45.0)).collect();
        let config = PlanConfig {
            base_depth: 3,
            fine_depth: 5,
            threshold: 100,
        };
        let p = plan(&records, &config);
        assert_eq!(p.report.refined_cells, 0);

        let config = PlanConfig {
            threshold: 99,
            ..config
        };
        let p = plan(&records, &config);
        assert_eq!(p.report.refined_cells, 1);
    }

    #[test]
    fn planning_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(42);
        let records: Vec<_> = (0..2000)
            .map(|i| {
                record(
                    i,
                    rng.gen_range(0.0..360.0),
                    rng.gen_range(-89.0..89.0),
                )
            })
            .collect();
        let config = PlanConfig {
            base_depth: 2,
            fine_depth: 4,
            threshold: 50,
        };

        let a = plan(&records, &config);
        let b = plan(&records, &config);
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.report.refined_cells, b.report.refined_cells);
    }

    #[test]
    fn composite_ids_never_collide_with_plain_ids() {
        let plain = PartitionId::base(0);
        let composite = PartitionId::composite(0, 0);
        assert_ne!(plain, composite);
        assert!(composite.is_composite());
        assert!(!plain.is_composite());

        // Distinct (base, fine) pairs map to distinct ids.
        let mut seen = HashSet::new();
        for base in 0..8u64 {
            assert!(seen.insert(PartitionId::base(base).as_u64()));
            for fine in 0..8u64 {
                assert!(seen.insert(PartitionId::composite(base, fine).as_u64()));
            }
        }
    }

    #[test]
    fn expand_base_cell_covers_exactly_the_descendants() {
        let records: Vec<_> = (0..200u32).map(|i| record(i, 10.0, 10.0)).collect();
        let config = PlanConfig {
            base_depth: 2,
            fine_depth: 4,
            threshold: 100,
        };
        let p = plan(&records, &config);
        assert_eq!(p.report.refined_cells, 1);

        let (lon, lat) = records[0].position.lon_lat_rad();
        let base_cell = p.scheme.base().cell_of(lon, lat);
        let expanded = p.scheme.expand_base_cell(base_cell);

        // Depth delta of 2 means 4^2 = 16 descendants.
        assert_eq!(expanded.len(), 16);
        assert!(expanded.iter().all(|id| id.is_composite()));
        assert!(expanded.contains(&p.assignments[0]));

        // An unrefined cell expands to itself.
        let other = if base_cell == 0 { 1 } else { 0 };
        assert_eq!(p.scheme.expand_base_cell(other), vec![PartitionId::base(other)]);
    }

    #[test]
    fn partition_of_matches_assignments() {
        let mut rng = StdRng::seed_from_u64(3);
        let records: Vec<_> = (0..500)
            .map(|i| {
                record(
                    i,
                    rng.gen_range(0.0..360.0),
                    rng.gen_range(-89.0..89.0),
                )
            })
            .collect();
        let config = PlanConfig {
            base_depth: 1,
            fine_depth: 3,
            threshold: 10,
        };
        let p = plan(&records, &config);
        for (record, id) in records.iter().zip(&p.assignments) {
            assert_eq!(p.scheme.partition_of(&record.position), *id);
        }
    }

    #[test]
    fn validate_rejects_bad_depths() {
        let mut config = PlanConfig::default();
        assert!(config.validate().is_ok());

        config.fine_depth = config.base_depth - 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config = PlanConfig {
            base_depth: 6,
            fine_depth: PlanConfig::MAX_FINE_DEPTH + 1,
            threshold: 10_000,
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.fine_depth = PlanConfig::MAX_FINE_DEPTH;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn display_formats() {
        assert_eq!(PartitionId::base(17).to_string(), "17");
        assert_eq!(PartitionId::composite(3, 44).to_string(), "3/44");
    }
}
