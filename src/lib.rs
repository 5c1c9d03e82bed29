//! Adaptive HEALPix sharding and proximity search for sky catalogs.
//!
//! A catalog of timestamped sky observations is partitioned over a two-level
//! HEALPix tessellation: every record maps to a coarse base cell, and base
//! cells whose population exceeds a threshold are split into fine-level
//! shards. The [`ingest`] pipeline bulk-loads the sharded catalog through a
//! bounded connection pool, and [`query`] answers nearest-neighbour and
//! cone searches against the same partition scheme the import used.

pub mod catalog;
pub mod error;
pub mod generate;
pub mod healpix;
pub mod ingest;
pub mod partition;
pub mod query;
pub mod report;
pub mod sphere;
pub mod storage;

pub use error::{Error, Result};
