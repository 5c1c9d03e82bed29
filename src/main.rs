use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use skyshard::catalog::{read_catalog, SkyPosition};
use skyshard::generate::{generate_catalog, write_catalog, GenerateConfig};
use skyshard::ingest::pool::ConnectionPool;
use skyshard::ingest::queue::TaskQueue;
use skyshard::ingest::stats::StatsAggregator;
use skyshard::ingest::worker::run_import;
use skyshard::ingest::{group, ImportTask};
use skyshard::partition::{plan, Plan, PlanConfig};
use skyshard::query::{nearest_batch, InflightLimiter, QueryEngine};
use skyshard::report::{write_run_report, write_source_map, RunSummary};
use skyshard::storage::{MemoryStorage, StorageConnector};
use skyshard::Result;

#[derive(Parser)]
#[command(name = "skyshard", about = "Adaptive HEALPix catalog sharding")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic observation catalog.
    Generate {
        /// Output path for the generated CSV.
        #[arg(long, default_value = "generated_catalog.csv")]
        output: PathBuf,

        /// Number of distinct sources.
        #[arg(long, default_value = "100000")]
        sources: u32,

        /// Observations per source.
        #[arg(long, default_value = "100")]
        records_per_source: u32,

        /// RNG seed; reruns with the same seed produce the same catalog.
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Partition a catalog and bulk-load it into storage.
    Import {
        /// Path to the catalog CSV (ts,source_id,ra,dec,mag,jd_tcb).
        input: PathBuf,

        /// Output path for the source-to-partition map CSV.
        #[arg(long, default_value = "source_map.csv")]
        map_out: PathBuf,

        /// Output path for the run report.
        #[arg(long, default_value = "import_report.txt")]
        report_out: PathBuf,

        /// HEALPix depth of the base tessellation.
        #[arg(long, default_value = "6")]
        base_depth: u8,

        /// HEALPix depth inside refined cells.
        #[arg(long, default_value = "8")]
        fine_depth: u8,

        /// Refine a base cell when its population exceeds this.
        #[arg(long, default_value = "10000")]
        threshold: u64,

        /// Rows per batch write.
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// Number of import worker threads.
        #[arg(long, default_value = "8")]
        workers: usize,

        /// Number of storage connections to open.
        #[arg(long, default_value = "8")]
        pool_size: usize,
    },

    /// Import a catalog in memory and time proximity queries against it.
    QueryBench {
        /// Path to the catalog CSV.
        input: PathBuf,

        /// HEALPix depth of the base tessellation.
        #[arg(long, default_value = "6")]
        base_depth: u8,

        /// HEALPix depth inside refined cells.
        #[arg(long, default_value = "8")]
        fine_depth: u8,

        /// Refine a base cell when its population exceeds this.
        #[arg(long, default_value = "10000")]
        threshold: u64,

        /// Number of nearest-neighbour targets to sample.
        #[arg(long, default_value = "500")]
        nn_targets: usize,

        /// Number of cone-search targets to sample.
        #[arg(long, default_value = "100")]
        cone_targets: usize,

        /// Cap on concurrent nearest-neighbour queries.
        #[arg(long, default_value = "16")]
        max_inflight: usize,
    },
}

/// Shared import driver: plan, queue, pool, workers, progress.
fn import_into(
    storage: &MemoryStorage,
    input: &Path,
    config: &PlanConfig,
    batch_size: usize,
    workers: usize,
    pool_size: usize,
    show_progress: bool,
) -> Result<(Plan, Vec<skyshard::catalog::CatalogRecord>, Arc<StatsAggregator>, u64, Duration)> {
    config.validate()?;
    let records = read_catalog(input)?;
    eprintln!("Loaded {} records from {}", records.len(), input.display());

    let p = plan(&records, config);
    eprintln!(
        "Plan: {} occupied cells, {} refined (threshold {})",
        p.report.occupied_cells, p.report.refined_cells, config.threshold
    );

    let tasks: Vec<ImportTask> = group(&records, &p.assignments);
    let tasks_total = tasks.len() as u64;
    let total_rows = records.len() as u64;

    let pool = ConnectionPool::new(storage, pool_size)?;
    let queue = TaskQueue::new();
    for task in tasks {
        queue.push(task);
    }
    queue.close();

    let stats = Arc::new(StatsAggregator::new());
    let bar = if show_progress {
        let bar = ProgressBar::new(total_rows);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} rows ({per_sec}, eta {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let t0 = Instant::now();
    std::thread::scope(|scope| {
        let monitor = bar.as_ref().map(|bar| {
            let stats = Arc::clone(&stats);
            scope.spawn(move || loop {
                let snap = stats.snapshot();
                bar.set_position(snap.total());
                if snap.tasks_done >= tasks_total {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            })
        });

        run_import(&records, &queue, &pool, batch_size, &stats, workers);

        if let Some(monitor) = monitor {
            let _ = monitor.join();
        }
    });
    let elapsed = t0.elapsed();

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    Ok((p, records, stats, tasks_total, elapsed))
}

fn cmd_generate(output: &Path, config: &GenerateConfig) -> Result<()> {
    let records = generate_catalog(config);
    write_catalog(output, &records)?;
    println!(
        "Generated {} records ({} sources) to {}",
        records.len(),
        config.sources,
        output.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_import(
    input: &Path,
    map_out: &Path,
    report_out: &Path,
    config: &PlanConfig,
    batch_size: usize,
    workers: usize,
    pool_size: usize,
) -> Result<()> {
    let storage = MemoryStorage::new();
    let (p, records, stats, tasks_total, elapsed) =
        import_into(&storage, input, config, batch_size, workers, pool_size, true)?;

    write_source_map(map_out, &records, &p.assignments)?;
    eprintln!("Wrote source map to {}", map_out.display());

    let snap = stats.snapshot();
    let summary = RunSummary {
        input,
        config: *config,
        population: p.report,
        stats: snap,
        tasks_total,
        shard_count: storage.shard_count(),
        workers,
        pool_size,
        batch_size,
        elapsed,
    };
    write_run_report(report_out, &summary)?;
    eprintln!("Wrote run report to {}", report_out.display());

    println!(
        "Imported {}/{} rows in {:.2}s ({} shards, {} failed)",
        snap.success,
        snap.total(),
        elapsed.as_secs_f64(),
        storage.shard_count(),
        snap.error,
    );
    Ok(())
}

fn cmd_query_bench(
    input: &Path,
    config: &PlanConfig,
    nn_targets: usize,
    cone_targets: usize,
    max_inflight: usize,
) -> Result<()> {
    let storage = MemoryStorage::new();
    let (p, records, stats, _, import_elapsed) =
        import_into(&storage, input, config, 500, 8, 8, false)?;
    let snap = stats.snapshot();
    eprintln!(
        "Imported {} rows in {:.2}s, running queries",
        snap.success,
        import_elapsed.as_secs_f64()
    );

    // Every k-th record, so targets spread over the whole input.
    let sample = |count: usize| -> Vec<SkyPosition> {
        if records.is_empty() || count == 0 {
            return Vec::new();
        }
        let step = (records.len() / count).max(1);
        records
            .iter()
            .step_by(step)
            .take(count)
            .map(|r| r.position)
            .collect()
    };

    let targets = sample(nn_targets);
    let limiter = InflightLimiter::new(max_inflight);
    let pool = ConnectionPool::new(&storage, max_inflight.min(8).max(1))?;

    let t0 = Instant::now();
    let results = nearest_batch(&targets, &p.scheme, &pool, &limiter);
    let nn_elapsed = t0.elapsed();

    let mut found = 0usize;
    let mut misses = 0usize;
    let mut errors = 0usize;
    for result in &results {
        match result {
            Ok(Some(_)) => found += 1,
            Ok(None) => misses += 1,
            Err(_) => errors += 1,
        }
    }
    println!(
        "nearest: {} targets in {:.3}s ({:.1} q/s): {} found, {} empty, {} errors",
        targets.len(),
        nn_elapsed.as_secs_f64(),
        targets.len() as f64 / nn_elapsed.as_secs_f64().max(1e-9),
        found,
        misses,
        errors,
    );

    let cone_sample = sample(cone_targets);
    let mut engine = QueryEngine::new(storage.connect()?, &p.scheme);
    for radius in [0.01, 0.05, 0.1, 0.5, 1.0] {
        let t0 = Instant::now();
        let mut hits = 0usize;
        for target in &cone_sample {
            hits += engine.cone(target, radius)?.len();
        }
        let elapsed = t0.elapsed();
        println!(
            "cone r={radius:<5}: {} targets in {:.3}s ({:.1} q/s), {:.1} hits/query",
            cone_sample.len(),
            elapsed.as_secs_f64(),
            cone_sample.len() as f64 / elapsed.as_secs_f64().max(1e-9),
            hits as f64 / cone_sample.len().max(1) as f64,
        );
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let outcome = match &cli.command {
        Commands::Generate {
            output,
            sources,
            records_per_source,
            seed,
        } => {
            let config = GenerateConfig {
                sources: *sources,
                records_per_source: *records_per_source,
                seed: *seed,
            };
            cmd_generate(output, &config)
        }
        Commands::Import {
            input,
            map_out,
            report_out,
            base_depth,
            fine_depth,
            threshold,
            batch_size,
            workers,
            pool_size,
        } => {
            let config = PlanConfig {
                base_depth: *base_depth,
                fine_depth: *fine_depth,
                threshold: *threshold,
            };
            cmd_import(
                input,
                map_out,
                report_out,
                &config,
                *batch_size,
                *workers,
                *pool_size,
            )
        }
        Commands::QueryBench {
            input,
            base_depth,
            fine_depth,
            threshold,
            nn_targets,
            cone_targets,
            max_inflight,
        } => {
            let config = PlanConfig {
                base_depth: *base_depth,
                fine_depth: *fine_depth,
                threshold: *threshold,
            };
            cmd_query_bench(input, &config, *nn_targets, *cone_targets, *max_inflight)
        }
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
