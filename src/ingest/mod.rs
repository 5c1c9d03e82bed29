//! Concurrent bulk-load pipeline: task grouping, a blocking task queue, a
//! bounded connection pool, worker threads, and shared import statistics.

pub mod pool;
pub mod queue;
pub mod stats;
pub mod worker;

use std::collections::HashMap;

use crate::catalog::CatalogRecord;
use crate::partition::PartitionId;
use crate::storage::ShardKey;

/// One unit of import work: every record of one source that falls in one
/// partition. Rows are indices into the caller's record slice, kept in
/// input order.
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub partition: PartitionId,
    pub source_id: u32,
    pub rows: Vec<usize>,
}

impl ImportTask {
    pub fn shard_key(&self) -> ShardKey {
        ShardKey {
            partition: self.partition,
            source_id: self.source_id,
        }
    }
}

/// Group records into import tasks keyed by (partition, source).
///
/// Tasks come out in first-seen order and together cover every record
/// exactly once.
pub fn group(records: &[CatalogRecord], assignments: &[PartitionId]) -> Vec<ImportTask> {
    debug_assert_eq!(records.len(), assignments.len());

    let mut index: HashMap<ShardKey, usize> = HashMap::new();
    let mut tasks: Vec<ImportTask> = Vec::new();

    for (row, (record, &partition)) in records.iter().zip(assignments).enumerate() {
        let key = ShardKey {
            partition,
            source_id: record.source_id,
        };
        match index.get(&key) {
            Some(&at) => tasks[at].rows.push(row),
            None => {
                index.insert(key, tasks.len());
                tasks.push(ImportTask {
                    partition,
                    source_id: record.source_id,
                    rows: vec![row],
                });
            }
        }
    }

    tasks
}
