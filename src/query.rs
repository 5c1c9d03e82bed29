//! Proximity queries over the sharded catalog.
//!
//! Both query forms resolve sky regions to partition ids through the same
//! [`PartitionScheme`] the import used, so records living in refined
//! fine-level shards are always reachable.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::catalog::SkyPosition;
use crate::error::{Error, Result};
use crate::healpix::CellId;
use crate::ingest::pool::ConnectionPool;
use crate::partition::{PartitionId, PartitionScheme};
use crate::storage::StorageConnection;

/// Query session bound to one storage connection and a partition scheme.
pub struct QueryEngine<'s, C: StorageConnection> {
    conn: C,
    scheme: &'s PartitionScheme,
}

impl<'s, C: StorageConnection> QueryEngine<'s, C> {
    pub fn new(conn: C, scheme: &'s PartitionScheme) -> Self {
        QueryEngine { conn, scheme }
    }

    /// Approximate nearest-neighbour: separation in degrees to the closest
    /// stored record in the target's cell neighbourhood, or `None` when the
    /// neighbourhood holds no records.
    ///
    /// The neighbourhood is the target's base cell plus eight cells probed
    /// one cell-step away in colatitude and longitude. A true nearest
    /// neighbour sitting just outside that ring is missed; callers that
    /// need exact semantics should use [`cone`](Self::cone) instead.
    pub fn nearest(&mut self, target: &SkyPosition) -> Result<Option<f64>> {
        let cells = self.neighbourhood_cells(target);
        let partitions = self.expand(&cells);
        let positions = self.conn.query_positions(&partitions)?;

        let best = positions
            .iter()
            .map(|p| target.separation_deg(p))
            .fold(None, |best: Option<f64>, sep| match best {
                Some(b) if b <= sep => Some(b),
                _ => Some(sep),
            });
        Ok(best)
    }

    /// Exact cone search: every stored position within `radius_deg` of the
    /// target, boundary included. A zero radius returns exact coincidences.
    pub fn cone(&mut self, target: &SkyPosition, radius_deg: f64) -> Result<Vec<SkyPosition>> {
        let (lon, lat) = target.lon_lat_rad();
        let base = self.scheme.base();

        let mut cells = base.cells_in_disc(lon, lat, radius_deg.to_radians());
        if cells.is_empty() {
            cells.push(base.cell_of(lon, lat));
        }
        let partitions = self.expand(&cells);
        let positions = self.conn.query_positions(&partitions)?;

        Ok(positions
            .into_iter()
            .filter(|p| target.separation_deg(p) <= radius_deg)
            .collect())
    }

    /// Center cell plus the 8 cells one cell-step away in each direction.
    fn neighbourhood_cells(&self, target: &SkyPosition) -> Vec<CellId> {
        let base = self.scheme.base();
        let (lon, lat) = target.lon_lat_rad();
        let nside = base.nside() as f64;
        let dtheta = FRAC_PI_2 / nside;
        let dphi = TAU / (4.0 * nside);
        let theta0 = FRAC_PI_2 - lat;

        let mut cells = vec![base.cell_of(lon, lat)];
        for dt in [-1.0, 0.0, 1.0] {
            for dp in [-1.0, 0.0, 1.0] {
                if dt == 0.0 && dp == 0.0 {
                    continue;
                }
                let theta = theta0 + dt * dtheta;
                if !(0.0..=PI).contains(&theta) {
                    continue;
                }
                let phi = (lon + dp * dphi).rem_euclid(TAU);
                cells.push(base.cell_of(phi, FRAC_PI_2 - theta));
            }
        }
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    fn expand(&self, cells: &[CellId]) -> Vec<PartitionId> {
        let mut partitions = Vec::new();
        for &cell in cells {
            partitions.extend(self.scheme.expand_base_cell(cell));
        }
        partitions
    }
}

/// Caps the number of queries in flight at once.
///
/// `acquire` blocks until a slot frees up; dropping the permit releases it.
/// Taking the permit before spawning a query thread turns the cap into
/// backpressure on the spawner.
pub struct InflightLimiter {
    in_flight: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl InflightLimiter {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "limit must be positive");
        InflightLimiter {
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    pub fn acquire(&self) -> InflightPermit<'_> {
        let mut count = lock_clean(&self.in_flight);
        while *count >= self.limit {
            count = match self.freed.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *count += 1;
        InflightPermit { limiter: self }
    }

    pub fn in_flight(&self) -> usize {
        *lock_clean(&self.in_flight)
    }
}

fn lock_clean(mutex: &Mutex<usize>) -> MutexGuard<'_, usize> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct InflightPermit<'a> {
    limiter: &'a InflightLimiter,
}

impl Drop for InflightPermit<'_> {
    fn drop(&mut self) {
        let mut count = lock_clean(&self.limiter.in_flight);
        *count -= 1;
        drop(count);
        self.limiter.freed.notify_one();
    }
}

/// Run a nearest-neighbour query per target on its own thread, drawing
/// connections from the pool and never exceeding the limiter's cap.
/// Results come back in target order.
pub fn nearest_batch<C: StorageConnection>(
    targets: &[SkyPosition],
    scheme: &PartitionScheme,
    pool: &ConnectionPool<C>,
    limiter: &InflightLimiter,
) -> Vec<Result<Option<f64>>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| {
                let permit = limiter.acquire();
                scope.spawn(move || {
                    let _permit = permit;
                    let mut conn = pool.acquire();
                    let mut engine = QueryEngine::new(&mut *conn, scheme);
                    engine.nearest(target)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Storage("query thread panicked".to_string())),
            })
            .collect()
    })
}
