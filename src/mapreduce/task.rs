use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::Level;

use crate::{
    cluster::{JobSession, ReplicaRef, ReplicationPolicy, TokenSource},
    id::RecordId,
    logging::strata_log,
    mapreduce::{
        error::MapReduceError,
        scheduler::MapReduceScheduler,
        shard::{MapReduceShardList, MapReduceShardResult, MapReduceTaskShard},
    },
};

/// A node in the MapReduce task tree.
///
/// `build` appends this task's shards to the flat list and returns their
/// indices; because upstream tasks append before their consumers, every
/// dependency index is strictly smaller than the dependent's own index.
#[async_trait]
pub trait MapReduceTask: Send + Sync {
    /// Recursively append this task's shards to `shards`, returning the
    /// indices produced.
    fn build(self: Arc<Self>, shards: &mut MapReduceShardList) -> Vec<usize>;

    /// Execute one shard, consulting the scheduler for upstream results.
    ///
    /// `Ok(Some(_))` locates the produced blob, `Ok(None)` means the shard
    /// produced no output; both are terminal successes.
    async fn execute(
        &self,
        shard: &MapReduceTaskShard,
        job: &MapReduceScheduler,
    ) -> Result<Option<MapReduceShardResult>, MapReduceError>;
}

/// Program shared by every task of one job.
#[derive(Clone, Debug)]
pub struct JobSpec {
    /// Source text of the job's program, shipped to executors verbatim.
    pub program_source: String,
}

impl JobSpec {
    /// Wrap a program source.
    pub fn new(program_source: impl Into<String>) -> Self {
        Self {
            program_source: program_source.into(),
        }
    }
}

/// Reduce stage: `num_shards` shards, each fanning in from every shard of
/// every source task.
pub struct ReduceTask {
    session: JobSession,
    job_spec: Arc<JobSpec>,
    method_name: String,
    sources: Vec<Arc<dyn MapReduceTask>>,
    num_shards: usize,
    auth: Arc<dyn TokenSource>,
    repl: Arc<dyn ReplicationPolicy>,
    client: reqwest::Client,
}

impl ReduceTask {
    /// Build a reduce task over `sources`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: JobSession,
        job_spec: Arc<JobSpec>,
        method_name: impl Into<String>,
        sources: Vec<Arc<dyn MapReduceTask>>,
        num_shards: usize,
        auth: Arc<dyn TokenSource>,
        repl: Arc<dyn ReplicationPolicy>,
    ) -> Self {
        Self {
            session,
            job_spec,
            method_name: method_name.into(),
            sources,
            num_shards,
            auth,
            repl,
            client: reqwest::Client::new(),
        }
    }

    async fn execute_remote(
        &self,
        input_tables: &[String],
        host: &ReplicaRef,
    ) -> Result<Option<MapReduceShardResult>, MapReduceError> {
        strata_log!(
            Level::Debug,
            "reduce-shard",
            "executing remote reduce shard on {}; tenant={} input_tables={}",
            host,
            self.session.tenant,
            input_tables.len(),
        );

        let url = format!("http://{}/api/v1/mapreduce/tasks/reduce", host.addr);
        let mut query: Vec<(&str, &str)> = vec![
            ("program_source", self.job_spec.program_source.as_str()),
            ("method_name", self.method_name.as_str()),
        ];
        for table in input_tables {
            query.push(("input_table", table));
        }

        let token = self.auth.issue_token(&self.session);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .header("Authorization", format!("Token {token}"))
            .send()
            .await?;
        parse_shard_response(host, response).await
    }
}

#[async_trait]
impl MapReduceTask for ReduceTask {
    fn build(self: Arc<Self>, shards: &mut MapReduceShardList) -> Vec<usize> {
        let mut in_indexes = Vec::new();
        for source in &self.sources {
            in_indexes.extend(source.clone().build(shards));
        }

        let mut out_indexes = Vec::with_capacity(self.num_shards);
        for _ in 0..self.num_shards {
            let shard = MapReduceTaskShard::new(
                self.clone() as Arc<dyn MapReduceTask>,
                in_indexes.clone(),
            );
            out_indexes.push(shards.push(shard));
        }
        out_indexes
    }

    async fn execute(
        &self,
        shard: &MapReduceTaskShard,
        job: &MapReduceScheduler,
    ) -> Result<Option<MapReduceShardResult>, MapReduceError> {
        let mut input_tables = Vec::new();
        for &input in shard.dependencies() {
            // Upstream shards that produced no output have no URL.
            if let Some(url) = job.result_url(input) {
                input_tables.push(url);
            }
        }

        let output_id = RecordId::random();

        let mut errors = Vec::new();
        let hosts = self.repl.replicas_for(&output_id);
        for host in &hosts {
            match self.execute_remote(&input_tables, host).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    strata_log!(
                        Level::Error,
                        "reduce-shard",
                        "remote execution on {host} failed: {err}",
                    );
                    errors.push(format!("{host}: {err}"));
                }
            }
        }

        Err(MapReduceError::AllReplicasFailed(errors.join(", ")))
    }
}

/// Map stage over a table's partitions: one dependency-free shard per
/// partition.
pub struct MapTableTask {
    session: JobSession,
    job_spec: Arc<JobSpec>,
    method_name: String,
    table_name: String,
    partitions: Vec<RecordId>,
    auth: Arc<dyn TokenSource>,
    repl: Arc<dyn ReplicationPolicy>,
    client: reqwest::Client,
}

impl MapTableTask {
    /// Build a map task over the given partitions of `table_name`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: JobSession,
        job_spec: Arc<JobSpec>,
        method_name: impl Into<String>,
        table_name: impl Into<String>,
        partitions: Vec<RecordId>,
        auth: Arc<dyn TokenSource>,
        repl: Arc<dyn ReplicationPolicy>,
    ) -> Self {
        Self {
            session,
            job_spec,
            method_name: method_name.into(),
            table_name: table_name.into(),
            partitions,
            auth,
            repl,
            client: reqwest::Client::new(),
        }
    }

    async fn execute_remote(
        &self,
        partition: &RecordId,
        host: &ReplicaRef,
    ) -> Result<Option<MapReduceShardResult>, MapReduceError> {
        strata_log!(
            Level::Debug,
            "map-shard",
            "executing remote map shard on {}; tenant={} table={} partition={}",
            host,
            self.session.tenant,
            self.table_name,
            partition,
        );

        let url = format!("http://{}/api/v1/mapreduce/tasks/map_partition", host.addr);
        let partition_hex = partition.to_hex();
        let query: Vec<(&str, &str)> = vec![
            ("program_source", self.job_spec.program_source.as_str()),
            ("method_name", self.method_name.as_str()),
            ("table", self.table_name.as_str()),
            ("partition", partition_hex.as_str()),
        ];

        let token = self.auth.issue_token(&self.session);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .header("Authorization", format!("Token {token}"))
            .send()
            .await?;
        parse_shard_response(host, response).await
    }
}

#[async_trait]
impl MapReduceTask for MapTableTask {
    fn build(self: Arc<Self>, shards: &mut MapReduceShardList) -> Vec<usize> {
        let mut out_indexes = Vec::with_capacity(self.partitions.len());
        for partition in &self.partitions {
            let shard = MapReduceTaskShard::with_params(
                self.clone() as Arc<dyn MapReduceTask>,
                Vec::new(),
                Bytes::from(partition.to_hex()),
            );
            out_indexes.push(shards.push(shard));
        }
        out_indexes
    }

    async fn execute(
        &self,
        shard: &MapReduceTaskShard,
        _job: &MapReduceScheduler,
    ) -> Result<Option<MapReduceShardResult>, MapReduceError> {
        let partition = std::str::from_utf8(shard.params())
            .ok()
            .and_then(|hex| RecordId::from_hex(hex).ok())
            .ok_or(MapReduceError::InvalidShard(
                "map shard params must hold a partition id",
            ))?;

        let mut errors = Vec::new();
        let hosts = self.repl.replicas_for(&partition);
        for host in &hosts {
            match self.execute_remote(&partition, host).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    strata_log!(
                        Level::Error,
                        "map-shard",
                        "remote execution on {host} failed: {err}",
                    );
                    errors.push(format!("{host}: {err}"));
                }
            }
        }

        Err(MapReduceError::AllReplicasFailed(errors.join(", ")))
    }
}

pub(crate) async fn parse_shard_response(
    host: &ReplicaRef,
    response: reqwest::Response,
) -> Result<Option<MapReduceShardResult>, MapReduceError> {
    match response.status().as_u16() {
        204 => Ok(None),
        201 => {
            let body = response.text().await?;
            let result_id = RecordId::from_hex(&body).map_err(|_| MapReduceError::Remote {
                host: host.clone(),
                detail: format!("invalid result id in response body: {body:?}"),
            })?;
            Ok(Some(MapReduceShardResult {
                host: host.clone(),
                result_id,
            }))
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(MapReduceError::Remote {
                host: host.clone(),
                detail: format!("received non-201 response ({status}): {body}"),
            })
        }
    }
}
