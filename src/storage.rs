//! Storage abstraction for catalog shards.
//!
//! The import pipeline and query engine talk to a backend only through the
//! [`StorageConnector`] / [`StorageConnection`] traits, so the pipeline can
//! be exercised end to end against [`MemoryStorage`] and a networked backend
//! slots in without touching pipeline code.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::catalog::{CatalogRecord, SkyPosition};
use crate::error::{Error, Result};
use crate::partition::PartitionId;

/// A shard holds the observations of one source within one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub partition: PartitionId,
    pub source_id: u32,
}

/// Factory for storage connections. One connector, many connections.
pub trait StorageConnector {
    type Conn: StorageConnection;

    fn connect(&self) -> Result<Self::Conn>;
}

/// A single session against the storage backend.
///
/// Connections are handed out by the pool and used by one worker at a time,
/// so the methods take `&mut self` and implementations need no internal
/// locking beyond what their backend requires.
pub trait StorageConnection: Send {
    /// Make sure the shard exists before rows are written into it.
    fn ensure_shard(&mut self, key: &ShardKey) -> Result<()>;

    /// Append a batch of rows to a shard. All-or-nothing per call.
    fn write_batch(&mut self, key: &ShardKey, rows: &[&CatalogRecord]) -> Result<()>;

    /// Positions of every record stored under any of the given partitions.
    fn query_positions(&mut self, partitions: &[PartitionId]) -> Result<Vec<SkyPosition>>;
}

impl<C: StorageConnection> StorageConnection for &mut C {
    fn ensure_shard(&mut self, key: &ShardKey) -> Result<()> {
        (**self).ensure_shard(key)
    }

    fn write_batch(&mut self, key: &ShardKey, rows: &[&CatalogRecord]) -> Result<()> {
        (**self).write_batch(key, rows)
    }

    fn query_positions(&mut self, partitions: &[PartitionId]) -> Result<Vec<SkyPosition>> {
        (**self).query_positions(partitions)
    }
}

/// In-memory backend: a shared map from shard key to rows.
///
/// Clones share the same underlying store, mirroring how connections to a
/// real backend all see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    shards: Arc<Mutex<HashMap<ShardKey, Vec<CatalogRecord>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shard_count(&self) -> usize {
        match self.shards.lock() {
            Ok(shards) => shards.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn row_count(&self) -> usize {
        match self.shards.lock() {
            Ok(shards) => shards.values().map(Vec::len).sum(),
            Err(poisoned) => poisoned.into_inner().values().map(Vec::len).sum(),
        }
    }
}

impl StorageConnector for MemoryStorage {
    type Conn = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection> {
        Ok(MemoryConnection {
            shards: Arc::clone(&self.shards),
        })
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    shards: Arc<Mutex<HashMap<ShardKey, Vec<CatalogRecord>>>>,
}

impl MemoryConnection {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ShardKey, Vec<CatalogRecord>>>> {
        self.shards
            .lock()
            .map_err(|_| Error::Storage("shard map lock poisoned".to_string()))
    }
}

impl StorageConnection for MemoryConnection {
    fn ensure_shard(&mut self, key: &ShardKey) -> Result<()> {
        self.lock()?.entry(*key).or_default();
        Ok(())
    }

    fn write_batch(&mut self, key: &ShardKey, rows: &[&CatalogRecord]) -> Result<()> {
        let mut shards = self.lock()?;
        let shard = shards
            .get_mut(key)
            .ok_or_else(|| Error::Storage(format!("shard {}/{} missing", key.partition, key.source_id)))?;
        shard.extend(rows.iter().map(|r| (*r).clone()));
        Ok(())
    }

    fn query_positions(&mut self, partitions: &[PartitionId]) -> Result<Vec<SkyPosition>> {
        let shards = self.lock()?;
        let mut positions = Vec::new();
        for (key, rows) in shards.iter() {
            if partitions.contains(&key.partition) {
                positions.extend(rows.iter().map(|r| r.position));
            }
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_id: u32, ra: f64, dec: f64) -> CatalogRecord {
        CatalogRecord {
            timestamp: "2024-01-01 00:00:00".to_string(),
            source_id,
            position: SkyPosition::new(ra, dec),
            magnitude: 10.0,
            time_value: 2460310.5,
        }
    }

    #[test]
    fn write_requires_ensure_shard() {
        let storage = MemoryStorage::new();
        let mut conn = storage.connect().unwrap();
        let key = ShardKey {
            partition: PartitionId::base(5),
            source_id: 1,
        };
        let row = record(1, 10.0, 20.0);

        assert!(conn.write_batch(&key, &[&row]).is_err());
        conn.ensure_shard(&key).unwrap();
        conn.write_batch(&key, &[&row]).unwrap();
        assert_eq!(storage.row_count(), 1);
    }

    #[test]
    fn connections_share_the_store() {
        let storage = MemoryStorage::new();
        let mut a = storage.connect().unwrap();
        let mut b = storage.connect().unwrap();
        let key = ShardKey {
            partition: PartitionId::base(3),
            source_id: 9,
        };
        let row = record(9, 100.0, -45.0);

        a.ensure_shard(&key).unwrap();
        a.write_batch(&key, &[&row]).unwrap();

        let positions = b.query_positions(&[PartitionId::base(3)]).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0], row.position);
    }

    #[test]
    fn query_filters_by_partition() {
        let storage = MemoryStorage::new();
        let mut conn = storage.connect().unwrap();
        for (partition, source_id, ra) in [(1u64, 1u32, 10.0), (2, 2, 20.0), (3, 3, 30.0)] {
            let key = ShardKey {
                partition: PartitionId::base(partition),
                source_id,
            };
            conn.ensure_shard(&key).unwrap();
            let row = record(source_id, ra, 0.0);
            conn.write_batch(&key, &[&row]).unwrap();
        }

        let hits = conn
            .query_positions(&[PartitionId::base(1), PartitionId::base(3)])
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|p| p.ra_deg() == 10.0 || p.ra_deg() == 30.0));

        let none = conn.query_positions(&[PartitionId::base(99)]).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn ensure_shard_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut conn = storage.connect().unwrap();
        let key = ShardKey {
            partition: PartitionId::composite(2, 7),
            source_id: 4,
        };
        conn.ensure_shard(&key).unwrap();
        let row = record(4, 1.0, 2.0);
        conn.write_batch(&key, &[&row]).unwrap();
        conn.ensure_shard(&key).unwrap();
        assert_eq!(storage.row_count(), 1);
    }
}
