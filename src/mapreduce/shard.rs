use std::sync::Arc;

use bytes::Bytes;

use crate::{cluster::ReplicaRef, id::RecordId, mapreduce::task::MapReduceTask};

/// One unit of MapReduce work: a back-reference to its task, the indices of
/// every upstream shard it consumes, and optional opaque per-shard
/// parameters encoded by the owning task.
pub struct MapReduceTaskShard {
    task: Arc<dyn MapReduceTask>,
    dependencies: Vec<usize>,
    params: Bytes,
}

impl MapReduceTaskShard {
    /// Build a shard with no per-shard parameters.
    pub fn new(task: Arc<dyn MapReduceTask>, dependencies: Vec<usize>) -> Self {
        Self::with_params(task, dependencies, Bytes::new())
    }

    /// Build a shard carrying task-defined parameters.
    pub fn with_params(
        task: Arc<dyn MapReduceTask>,
        dependencies: Vec<usize>,
        params: Bytes,
    ) -> Self {
        Self {
            task,
            dependencies,
            params,
        }
    }

    /// The task that executes this shard.
    pub fn task(&self) -> &Arc<dyn MapReduceTask> {
        &self.task
    }

    /// Indices of upstream shards, all strictly smaller than this shard's
    /// own index.
    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    /// Opaque parameters the owning task attached at build time.
    pub fn params(&self) -> &Bytes {
        &self.params
    }
}

/// Flat, topologically ordered list of shards produced by a build pass.
#[derive(Default)]
pub struct MapReduceShardList {
    shards: Vec<Arc<MapReduceTaskShard>>,
}

impl MapReduceShardList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shards built so far.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True iff no shard has been built.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Append a shard, returning its index.
    pub fn push(&mut self, shard: MapReduceTaskShard) -> usize {
        let index = self.shards.len();
        self.shards.push(Arc::new(shard));
        index
    }

    /// The shard at `index`, if built.
    pub fn get(&self, index: usize) -> Option<&Arc<MapReduceTaskShard>> {
        self.shards.get(index)
    }

    pub(crate) fn into_shards(self) -> Vec<Arc<MapReduceTaskShard>> {
        self.shards
    }
}

/// Location of the intermediate blob a shard produced on a specific
/// replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapReduceShardResult {
    /// Replica holding the blob.
    pub host: ReplicaRef,
    /// 160-bit identifier of the blob.
    pub result_id: RecordId,
}
