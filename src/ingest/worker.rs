//! Import worker loop.

use super::pool::ConnectionPool;
use super::queue::TaskQueue;
use super::stats::StatsAggregator;
use super::ImportTask;
use crate::catalog::CatalogRecord;
use crate::storage::StorageConnection;

/// Run `workers` threads that drain the queue until it is closed and empty.
///
/// Failures are isolated per task and per batch: a failed shard creation
/// abandons only that task's rows, a failed batch write loses only that
/// batch. The counters always balance, success + error equals the number of
/// rows across all queued tasks.
pub fn run_import<C: StorageConnection>(
    records: &[CatalogRecord],
    queue: &TaskQueue,
    pool: &ConnectionPool<C>,
    batch_size: usize,
    stats: &StatsAggregator,
    workers: usize,
) {
    assert!(batch_size > 0, "batch size must be positive");
    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| {
                while let Some(task) = queue.pop() {
                    process_task(records, &task, pool, batch_size, stats);
                    stats.task_done();
                }
            });
        }
    });
}

fn process_task<C: StorageConnection>(
    records: &[CatalogRecord],
    task: &ImportTask,
    pool: &ConnectionPool<C>,
    batch_size: usize,
    stats: &StatsAggregator,
) {
    let key = task.shard_key();
    let mut conn = pool.acquire();

    if let Err(err) = conn.ensure_shard(&key) {
        tracing::warn!(
            partition = %task.partition,
            source = task.source_id,
            %err,
            "shard creation failed, abandoning task"
        );
        stats.add_error(task.rows.len() as u64);
        return;
    }

    for batch in task.rows.chunks(batch_size) {
        let rows: Vec<&CatalogRecord> = batch.iter().map(|&row| &records[row]).collect();
        match conn.write_batch(&key, &rows) {
            Ok(()) => stats.add_success(rows.len() as u64),
            Err(err) => {
                tracing::warn!(
                    partition = %task.partition,
                    source = task.source_id,
                    rows = rows.len(),
                    %err,
                    "batch write failed"
                );
                stats.add_error(rows.len() as u64);
            }
        }
    }
}
