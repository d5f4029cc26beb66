use crate::cluster::ReplicaRef;

/// Errors from shard building and execution.
#[derive(Debug, thiserror::Error)]
pub enum MapReduceError {
    /// One replica rejected or failed the request; the caller moves on to
    /// the next replica.
    #[error("remote shard execution on {host} failed: {detail}")]
    Remote {
        /// Replica that failed.
        host: ReplicaRef,
        /// Response or protocol detail.
        detail: String,
    },
    /// Transport-level failure before any response arrived.
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    /// Every replica failed for a shard; per-host causes joined.
    #[error("shard execution failed on all replicas: {0}")]
    AllReplicasFailed(String),
    /// A shard's stored state is unusable.
    #[error("malformed shard: {0}")]
    InvalidShard(&'static str),
}
