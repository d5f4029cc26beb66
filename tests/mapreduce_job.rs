use std::sync::Arc;

use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use strata::{
    cluster::{FixedReplication, JobSession, ReplicaRef, StaticTokenSource},
    mapreduce::{
        JobSpec, MapReduceError, MapReduceScheduler, MapReduceShardList, MapReduceTask,
        MapTableTask, ReduceTask,
    },
    RecordId,
};

fn replica(server: &MockServer) -> ReplicaRef {
    ReplicaRef::new(server.address().to_string())
}

fn reduce_task(
    hosts: Vec<ReplicaRef>,
    sources: Vec<Arc<dyn MapReduceTask>>,
    num_shards: usize,
) -> Arc<ReduceTask> {
    Arc::new(ReduceTask::new(
        JobSession::new("acme"),
        Arc::new(JobSpec::new("def reduce_fn(rows): ...")),
        "reduce_fn",
        sources,
        num_shards,
        Arc::new(StaticTokenSource::new("test-token")),
        Arc::new(FixedReplication::new(hosts)),
    ))
}

fn scheduler_for(task: Arc<ReduceTask>) -> MapReduceScheduler {
    let mut shards = MapReduceShardList::new();
    task.build(&mut shards);
    MapReduceScheduler::new(shards)
}

#[tokio::test]
async fn failover_takes_the_next_replica() {
    let failing = MockServer::start().await;
    let healthy = MockServer::start().await;
    let result_id = "ab".repeat(20);

    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/reduce"))
        .respond_with(ResponseTemplate::new(500).set_body_string("executor on fire"))
        .expect(1)
        .mount(&failing)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/reduce"))
        .respond_with(ResponseTemplate::new(201).set_body_string(result_id.clone()))
        .expect(1)
        .mount(&healthy)
        .await;

    let task = reduce_task(vec![replica(&failing), replica(&healthy)], Vec::new(), 1);
    let scheduler = scheduler_for(task);
    scheduler.run().await.unwrap();

    let result = scheduler.shard_result(0).unwrap();
    assert_eq!(result.host, replica(&healthy));
    assert_eq!(result.result_id, RecordId::from_hex(&result_id).unwrap());
}

#[tokio::test]
async fn later_replicas_are_not_contacted_after_a_success() {
    let failing = MockServer::start().await;
    let healthy = MockServer::start().await;
    let spare = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&failing)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(201).set_body_string("cd".repeat(20)))
        .expect(1)
        .mount(&healthy)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(201).set_body_string("ef".repeat(20)))
        .expect(0)
        .mount(&spare)
        .await;

    let task = reduce_task(
        vec![replica(&failing), replica(&healthy), replica(&spare)],
        Vec::new(),
        1,
    );
    scheduler_for(task).run().await.unwrap();
    // Expectations on the spare server verify on drop that it saw nothing.
}

#[tokio::test]
async fn no_output_is_success_without_a_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/reduce"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let task = reduce_task(vec![replica(&server)], Vec::new(), 1);
    let scheduler = scheduler_for(task);
    scheduler.run().await.unwrap();

    assert!(scheduler.shard_result(0).is_none());
    assert!(scheduler.result_url(0).is_none());
}

#[tokio::test]
async fn exhausted_replicas_fail_the_job_with_all_causes() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(server)
            .await;
    }

    let task = reduce_task(vec![replica(&first), replica(&second)], Vec::new(), 1);
    let err = scheduler_for(task).run().await.unwrap_err();
    match err {
        MapReduceError::AllReplicasFailed(detail) => {
            assert!(detail.contains(&first.address().to_string()));
            assert!(detail.contains(&second.address().to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn requests_carry_the_session_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/reduce"))
        .and(header("Authorization", "Token test-token"))
        .and(query_param("method_name", "reduce_fn"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    // An unmatched request would fall through to wiremock's 404 and fail
    // the run, so completing proves the header and query were sent.
    let task = reduce_task(vec![replica(&server)], Vec::new(), 1);
    scheduler_for(task).run().await.unwrap();
}

#[tokio::test]
async fn map_then_reduce_job_runs_end_to_end() {
    let server = MockServer::start().await;
    let map_result = "11".repeat(20);
    let reduce_result = "22".repeat(20);

    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/map_partition"))
        .and(query_param("table", "events"))
        .respond_with(ResponseTemplate::new(201).set_body_string(map_result.clone()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/mapreduce/tasks/reduce"))
        .respond_with(ResponseTemplate::new(201).set_body_string(reduce_result.clone()))
        .expect(2)
        .mount(&server)
        .await;

    let session = JobSession::new("acme");
    let job_spec = Arc::new(JobSpec::new("def map_fn(row): ...\ndef reduce_fn(rows): ..."));
    let auth = Arc::new(StaticTokenSource::new("test-token"));
    let repl = Arc::new(FixedReplication::new(vec![replica(&server)]));

    let map: Arc<dyn MapReduceTask> = Arc::new(MapTableTask::new(
        session.clone(),
        job_spec.clone(),
        "map_fn",
        "events",
        vec![RecordId::random(), RecordId::random()],
        auth.clone(),
        repl.clone(),
    ));
    let reduce = Arc::new(ReduceTask::new(
        session,
        job_spec,
        "reduce_fn",
        vec![map],
        2,
        auth,
        repl,
    ));

    let mut shards = MapReduceShardList::new();
    let out = reduce.build(&mut shards);
    assert_eq!(out, vec![2, 3]);
    assert_eq!(shards.get(2).unwrap().dependencies(), &[0, 1]);

    let scheduler = MapReduceScheduler::new(shards);
    scheduler.run().await.unwrap();

    for index in [0usize, 1] {
        let result = scheduler.shard_result(index).unwrap();
        assert_eq!(result.result_id, RecordId::from_hex(&map_result).unwrap());
        assert_eq!(
            scheduler.result_url(index).unwrap(),
            format!(
                "http://{}/api/v1/mapreduce/result/{}",
                server.address(),
                map_result
            )
        );
    }
    for index in [2usize, 3] {
        let result = scheduler.shard_result(index).unwrap();
        assert_eq!(
            result.result_id,
            RecordId::from_hex(&reduce_result).unwrap()
        );
    }
}
