use std::sync::{Arc, RwLock};

use futures_util::{stream::FuturesUnordered, StreamExt};
use log::Level;

use crate::{
    logging::strata_log,
    mapreduce::{
        error::MapReduceError,
        shard::{MapReduceShardList, MapReduceShardResult, MapReduceTaskShard},
    },
};

enum ShardState {
    Pending,
    Running,
    Done(Option<MapReduceShardResult>),
}

/// Drives a built shard list to completion.
///
/// Each shard blocks on its own remote execution; parallelism comes from
/// running every shard whose dependencies are complete concurrently, up to
/// a bounded width. Because the list is topologically ordered, progress is
/// guaranteed while shards keep succeeding; the first shard that exhausts
/// its replicas fails the job.
pub struct MapReduceScheduler {
    shards: Vec<Arc<MapReduceTaskShard>>,
    states: RwLock<Vec<ShardState>>,
    max_concurrent_shards: usize,
}

impl MapReduceScheduler {
    /// Take ownership of a built shard list.
    pub fn new(shards: MapReduceShardList) -> Self {
        let shards = shards.into_shards();
        let states = shards.iter().map(|_| ShardState::Pending).collect();
        Self {
            shards,
            states: RwLock::new(states),
            max_concurrent_shards: 8,
        }
    }

    /// Bound the number of shards executing at once (at least one).
    pub fn with_max_concurrent_shards(mut self, max: usize) -> Self {
        self.max_concurrent_shards = max.max(1);
        self
    }

    /// Number of shards under this scheduler.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// URL of the result blob shard `index` produced, if it completed with
    /// output.
    pub fn result_url(&self, index: usize) -> Option<String> {
        let states = self
            .states
            .read()
            .expect("scheduler state lock should not be poisoned");
        match states.get(index) {
            Some(ShardState::Done(Some(result))) => Some(format!(
                "http://{}/api/v1/mapreduce/result/{}",
                result.host.addr, result.result_id
            )),
            _ => None,
        }
    }

    /// Result of shard `index`, if it completed with output.
    pub fn shard_result(&self, index: usize) -> Option<MapReduceShardResult> {
        let states = self
            .states
            .read()
            .expect("scheduler state lock should not be poisoned");
        match states.get(index) {
            Some(ShardState::Done(result)) => result.clone(),
            _ => None,
        }
    }

    /// Execute every shard, respecting dependency order.
    pub async fn run(&self) -> Result<(), MapReduceError> {
        let total = self.shards.len();
        let mut completed = 0usize;
        let mut in_flight = FuturesUnordered::new();

        while completed < total {
            {
                let mut states = self
                    .states
                    .write()
                    .expect("scheduler state lock should not be poisoned");
                for index in 0..total {
                    if in_flight.len() >= self.max_concurrent_shards {
                        break;
                    }
                    if !matches!(states[index], ShardState::Pending) {
                        continue;
                    }
                    let ready = self.shards[index]
                        .dependencies()
                        .iter()
                        .all(|&dep| matches!(states[dep], ShardState::Done(_)));
                    if !ready {
                        continue;
                    }
                    states[index] = ShardState::Running;
                    let shard = self.shards[index].clone();
                    in_flight.push(async move {
                        let task = shard.task().clone();
                        (index, task.execute(&shard, self).await)
                    });
                }
            }

            let Some((index, result)) = in_flight.next().await else {
                return Err(MapReduceError::InvalidShard(
                    "shard list is not topologically ordered",
                ));
            };

            match result {
                Ok(result) => {
                    strata_log!(
                        Level::Debug,
                        "shard-done",
                        "shard {index} completed, produced_output={}",
                        result.is_some(),
                    );
                    self.states
                        .write()
                        .expect("scheduler state lock should not be poisoned")[index] =
                        ShardState::Done(result);
                    completed += 1;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        cluster::ReplicaRef,
        id::RecordId,
        mapreduce::task::MapReduceTask,
    };

    /// Shared observation point for shards executed in one test: completion
    /// order plus an in-flight gauge with its high-water mark.
    #[derive(Default)]
    struct ExecutionProbe {
        order: Mutex<Vec<u8>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct LocalTask {
        label: u8,
        produce_output: bool,
        probe: Arc<ExecutionProbe>,
    }

    #[async_trait]
    impl MapReduceTask for LocalTask {
        fn build(self: Arc<Self>, _shards: &mut MapReduceShardList) -> Vec<usize> {
            unreachable!("scheduler tests assemble shard lists by hand")
        }

        async fn execute(
            &self,
            shard: &MapReduceTaskShard,
            job: &MapReduceScheduler,
        ) -> Result<Option<MapReduceShardResult>, MapReduceError> {
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            // Yield once mid-execution so concurrently launched shards
            // overlap and the gauge can observe them together.
            tokio::task::yield_now().await;

            // Every completed dependency with output must be resolvable.
            for &dep in shard.dependencies() {
                let _ = job.result_url(dep);
            }
            self.probe.order.lock().unwrap().push(self.label);

            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.produce_output {
                Ok(Some(MapReduceShardResult {
                    host: ReplicaRef::new("local:0"),
                    result_id: RecordId::new([self.label; crate::id::RECORD_ID_LEN]),
                }))
            } else {
                Ok(None)
            }
        }
    }

    fn local_shard(
        label: u8,
        produce_output: bool,
        dependencies: Vec<usize>,
        probe: &Arc<ExecutionProbe>,
    ) -> MapReduceTaskShard {
        MapReduceTaskShard::new(
            Arc::new(LocalTask {
                label,
                produce_output,
                probe: probe.clone(),
            }),
            dependencies,
        )
    }

    #[tokio::test]
    async fn runs_dependencies_before_dependents() {
        let probe = Arc::new(ExecutionProbe::default());
        let mut shards = MapReduceShardList::new();
        shards.push(local_shard(0, true, vec![], &probe));
        shards.push(local_shard(1, true, vec![], &probe));
        shards.push(local_shard(2, true, vec![0, 1], &probe));

        let scheduler = MapReduceScheduler::new(shards);
        scheduler.run().await.unwrap();

        let seen = probe.order.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(*seen.last().unwrap(), 2);
    }

    #[tokio::test]
    async fn publishes_result_urls_for_output_shards() {
        let probe = Arc::new(ExecutionProbe::default());
        let mut shards = MapReduceShardList::new();
        shards.push(local_shard(7, true, vec![], &probe));
        shards.push(local_shard(8, false, vec![0], &probe));

        let scheduler = MapReduceScheduler::new(shards);
        scheduler.run().await.unwrap();

        let url = scheduler.result_url(0).unwrap();
        assert_eq!(
            url,
            format!(
                "http://local:0/api/v1/mapreduce/result/{}",
                RecordId::new([7; crate::id::RECORD_ID_LEN])
            )
        );
        // Shard 1 completed without output: no URL, but a recorded state.
        assert!(scheduler.result_url(1).is_none());
        assert!(scheduler.shard_result(1).is_none());
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let probe = Arc::new(ExecutionProbe::default());
        let mut shards = MapReduceShardList::new();
        for label in 0..6u8 {
            shards.push(local_shard(label, true, vec![], &probe));
        }

        let scheduler = MapReduceScheduler::new(shards).with_max_concurrent_shards(2);
        scheduler.run().await.unwrap();

        assert_eq!(probe.order.lock().unwrap().len(), 6);
        // All six shards were ready from the start; the gauge proves the
        // scheduler never ran more than the configured two at once.
        let max = probe.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 2, "observed {max} shards in flight");
        assert!(max >= 1);
    }
}
