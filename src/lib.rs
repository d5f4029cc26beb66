#![deny(missing_docs)]
//! Core of a distributed analytics storage engine.
//!
//! Two tightly coupled subsystems:
//! - An LSM-style partition writer ([`lsm`]) that ingests versioned records
//!   into in-memory arenas and flushes them to immutable columnar tables
//!   (parquet `.cst` files with a `.idx` version sidecar), evolving the
//!   partition through copy-on-write snapshots.
//! - A MapReduce shard scheduler ([`mapreduce`]) that flattens a task tree
//!   into a topologically ordered shard list and drives remote shard
//!   execution across replicas with failover.
//!
//! Cluster metadata, partition discovery and auth live outside this crate;
//! [`cluster`] holds the boundary traits the engine consumes.

pub mod cluster;
pub mod codec;
/// Partition configuration.
pub mod config;
/// Record, partition and result identifiers.
pub mod id;
mod logging;
pub mod lsm;
pub mod mapreduce;
/// The record type handed to the partition writer.
pub mod record;
pub mod schema;

pub use config::PartitionConfig;
pub use id::RecordId;
pub use lsm::{LsmPartitionWriter, PartitionError, PartitionSnapshot};
pub use record::RecordRef;
pub use schema::TableSchema;
