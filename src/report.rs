//! Import outputs: the source-to-partition map and the run report.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::catalog::CatalogRecord;
use crate::error::Result;
use crate::ingest::stats::StatsSnapshot;
use crate::partition::{PartitionId, PlanConfig, PopulationReport};

/// Write `source_id,partition_id` rows, one per distinct source, sorted by
/// source id. A source seen under several partitions keeps its first one.
pub fn write_source_map(
    path: &Path,
    records: &[CatalogRecord],
    assignments: &[PartitionId],
) -> Result<()> {
    debug_assert_eq!(records.len(), assignments.len());

    let mut first_seen: HashMap<u32, PartitionId> = HashMap::new();
    for (record, &partition) in records.iter().zip(assignments) {
        first_seen.entry(record.source_id).or_insert(partition);
    }

    let mut sources: Vec<_> = first_seen.into_iter().collect();
    sources.sort_unstable_by_key(|&(source_id, _)| source_id);

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "source_id,partition_id")?;
    for (source_id, partition) in sources {
        writeln!(out, "{source_id},{partition}")?;
    }
    out.flush()?;
    Ok(())
}

/// Everything the run report needs, gathered after the workers finish.
#[derive(Debug)]
pub struct RunSummary<'a> {
    pub input: &'a Path,
    pub config: PlanConfig,
    pub population: PopulationReport,
    pub stats: StatsSnapshot,
    pub tasks_total: u64,
    pub shard_count: usize,
    pub workers: usize,
    pub pool_size: usize,
    pub batch_size: usize,
    pub elapsed: Duration,
}

pub fn write_run_report(path: &Path, summary: &RunSummary<'_>) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let total = summary.stats.total();
    let rate = if total > 0 {
        100.0 * summary.stats.success as f64 / total as f64
    } else {
        100.0
    };
    let secs = summary.elapsed.as_secs_f64();
    let throughput = if secs > 0.0 {
        summary.stats.success as f64 / secs
    } else {
        0.0
    };

    writeln!(out, "import run report")?;
    writeln!(out, "=================")?;
    writeln!(out, "input:            {}", summary.input.display())?;
    writeln!(out, "base depth:       {}", summary.config.base_depth)?;
    writeln!(out, "fine depth:       {}", summary.config.fine_depth)?;
    writeln!(out, "split threshold:  {}", summary.config.threshold)?;
    writeln!(out, "workers:          {}", summary.workers)?;
    writeln!(out, "pool size:        {}", summary.pool_size)?;
    writeln!(out, "batch size:       {}", summary.batch_size)?;
    writeln!(out)?;
    writeln!(out, "records:          {}", summary.population.total_records)?;
    writeln!(out, "occupied cells:   {}", summary.population.occupied_cells)?;
    writeln!(
        out,
        "cell population:  min {} / max {} / avg {:.1}",
        summary.population.min_population,
        summary.population.max_population,
        summary.population.avg_population
    )?;
    writeln!(out, "refined cells:    {}", summary.population.refined_cells)?;
    writeln!(out, "shards created:   {}", summary.shard_count)?;
    writeln!(out)?;
    writeln!(
        out,
        "tasks:            {} / {}",
        summary.stats.tasks_done, summary.tasks_total
    )?;
    writeln!(out, "rows imported:    {}", summary.stats.success)?;
    writeln!(out, "rows failed:      {}", summary.stats.error)?;
    writeln!(out, "success rate:     {rate:.2}%")?;
    writeln!(out, "elapsed:          {secs:.2}s")?;
    writeln!(out, "throughput:       {throughput:.0} rows/s")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SkyPosition;

    fn record(source_id: u32) -> CatalogRecord {
        CatalogRecord {
            timestamp: "2024-01-01 00:00:00".to_string(),
            source_id,
            position: SkyPosition::new(0.0, 0.0),
            magnitude: 10.0,
            time_value: 0.0,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("skyshard_test_{name}_{}", std::process::id()))
    }

    #[test]
    fn source_map_is_sorted_and_deduplicated() {
        let records = vec![record(5), record(2), record(5), record(9)];
        let assignments = vec![
            PartitionId::base(10),
            PartitionId::base(20),
            PartitionId::composite(1, 3),
            PartitionId::base(30),
        ];

        let path = temp_path("source_map.csv");
        write_source_map(&path, &records, &assignments).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "source_id,partition_id");
        // Source 5 keeps its first partition (10), not the later composite.
        assert_eq!(lines[1], "2,20");
        assert_eq!(lines[2], "5,10");
        assert_eq!(lines[3], "9,30");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn run_report_carries_the_key_numbers() {
        use crate::ingest::stats::StatsSnapshot;

        let summary = RunSummary {
            input: Path::new("catalog.csv"),
            config: PlanConfig {
                base_depth: 6,
                fine_depth: 8,
                threshold: 10_000,
            },
            population: PopulationReport {
                occupied_cells: 12,
                min_population: 1,
                max_population: 15_000,
                avg_population: 833.3,
                refined_cells: 1,
                total_records: 10_000,
            },
            stats: StatsSnapshot {
                success: 9_900,
                error: 100,
                tasks_done: 40,
            },
            tasks_total: 40,
            shard_count: 40,
            workers: 8,
            pool_size: 8,
            batch_size: 500,
            elapsed: Duration::from_secs_f64(2.0),
        };

        let path = temp_path("run_report.txt");
        write_run_report(&path, &summary).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(contents.contains("rows imported:    9900"));
        assert!(contents.contains("rows failed:      100"));
        assert!(contents.contains("success rate:     99.00%"));
        assert!(contents.contains("refined cells:    1"));
        assert!(contents.contains("throughput:       4950 rows/s"));
    }
}
