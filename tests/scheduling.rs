// tests/scheduling.rs
//
// End-to-end exercises of the store + supervisors + scheduler graph,
// built the same way the composition root builds it. No HTTP involved;
// tests drive the library API directly.

use chrono::{Duration, Utc};
use gridmaster::core::{
    HeartbeatRequest, JobCreate, JobSpec, JobStatus, NodeRegister, NodeStatus,
    ResourceRequirements, ResourceSnapshot,
};
use gridmaster::error::MasterError;
use gridmaster::jobs::JobSupervisor;
use gridmaster::nodes::NodeSupervisor;
use gridmaster::scheduler::Scheduler;
use gridmaster::store::{ClusterStore, NodePatch};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

// ── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<ClusterStore>,
    jobs: Arc<JobSupervisor>,
    nodes: Arc<NodeSupervisor>,
    scheduler: Arc<Scheduler>,
}

fn harness() -> Harness {
    harness_with_grace(Duration::seconds(10))
}

fn harness_with_grace(assignment_grace: Duration) -> Harness {
    let store = Arc::new(ClusterStore::new(2, assignment_grace));
    let jobs = Arc::new(JobSupervisor::new(store.clone()));
    let nodes = Arc::new(NodeSupervisor::new(store.clone(), Duration::seconds(60)));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        jobs.clone(),
        nodes.clone(),
        StdDuration::from_secs(5),
    ));
    Harness {
        store,
        jobs,
        nodes,
        scheduler,
    }
}

fn registration(hostname: &str, ip: &str, cpu: u32, mem_mb: i64, gpus: u32) -> NodeRegister {
    NodeRegister {
        hostname: hostname.to_string(),
        ip_address: ip.to_string(),
        port: 8081,
        resources: ResourceSnapshot {
            cpu_cores: cpu,
            cpu_usage_percent: 10.0,
            memory_total_mb: mem_mb,
            memory_used_mb: 0,
            gpu_count: gpus,
            gpu_names: vec!["RTX 3080".into(); gpus as usize],
            gpu_memory_total_mb: 10240 * i64::from(gpus),
            gpu_memory_used_mb: 0,
        },
        labels: HashMap::new(),
        version: "0.1.0".to_string(),
    }
}

fn training_job(name: &str, cpu: &str, memory: &str, gpu: u32) -> JobCreate {
    JobCreate {
        name: name.to_string(),
        labels: HashMap::from([("team".to_string(), "ml".to_string())]),
        spec: JobSpec {
            image: "pytorch/pytorch:2.0".to_string(),
            command: vec!["python".to_string(), "train.py".to_string()],
            args: vec![],
            resources: ResourceRequirements {
                cpu: cpu.to_string(),
                memory: memory.to_string(),
                gpu,
            },
            env: vec![],
            volumes: vec![],
            distributed: None,
        },
    }
}

// ── Scheduling scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn gpu_job_lands_on_gpu_node() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 16, 65536, 4)).unwrap();
    let job = h.jobs.create(training_job("train", "4", "8Gi", 1)).unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    h.scheduler.trigger().await;

    let job = h.jobs.get(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.worker_id.as_deref(), Some(node.id.as_str()));
    assert!(job.started_at.is_some());

    let node = h.nodes.get(&node.id).unwrap();
    assert!(node.current_jobs.contains(&job.id));
}

#[tokio::test]
async fn job_stays_queued_with_no_nodes() {
    let h = harness();
    let job = h.jobs.create(training_job("train", "4", "8Gi", 1)).unwrap();

    h.scheduler.trigger().await;

    let job = h.jobs.get(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn gpu_job_waits_for_gpu_node() {
    let h = harness();
    h.nodes.register(registration("cpu-only", "10.0.0.1", 2, 4096, 0)).unwrap();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 1)).unwrap();

    h.scheduler.trigger().await;
    assert_eq!(h.jobs.get(&job.id).unwrap().status, JobStatus::Queued);

    let gpu_node = h.nodes.register(registration("gpu-1", "10.0.0.2", 16, 65536, 2)).unwrap();
    h.scheduler.trigger().await;

    let job = h.jobs.get(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.worker_id.as_deref(), Some(gpu_node.id.as_str()));
}

#[tokio::test]
async fn reregistration_keeps_identity_and_assignments() {
    let h = harness();
    let first = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 1)).unwrap();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    h.scheduler.trigger().await;
    assert!(h.nodes.get(&first.id).unwrap().current_jobs.contains(&job.id));

    // Same (hostname, ip) comes back with fresher hardware numbers.
    let again = h.nodes.register(registration("w1", "10.0.0.1", 16, 32768, 1)).unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.status, NodeStatus::Online);
    assert_eq!(again.resources.cpu_cores, 16);
    assert!(again.current_jobs.contains(&job.id));

    // A different tuple mints a different node.
    let other = h.nodes.register(registration("w1", "10.0.0.2", 8, 16384, 1)).unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn stale_node_goes_offline() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();

    // Push the last heartbeat well past the 60s timeout.
    h.store.update_node(
        &node.id,
        NodePatch {
            last_heartbeat: Some(Some(Utc::now() - Duration::seconds(120))),
            ..NodePatch::default()
        },
    );

    let timed_out = h.nodes.check_timeouts();
    assert_eq!(timed_out, vec![node.id.clone()]);
    assert_eq!(h.nodes.get(&node.id).unwrap().status, NodeStatus::Offline);

    // Second sweep finds nothing: the node is no longer ONLINE.
    assert!(h.nodes.check_timeouts().is_empty());
}

#[tokio::test]
async fn node_without_heartbeat_is_exempt_from_timeout() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();
    h.store.update_node(
        &node.id,
        NodePatch {
            last_heartbeat: Some(None),
            ..NodePatch::default()
        },
    );

    assert!(h.nodes.check_timeouts().is_empty());
    assert_eq!(h.nodes.get(&node.id).unwrap().status, NodeStatus::Online);
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let h = harness();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    h.jobs.mark_completed(&job.id, json!({"accuracy": 0.95})).unwrap();

    let job = h.jobs.cancel(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"accuracy": 0.95})));

    // Cancelling again changes nothing either.
    let job = h.jobs.cancel(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// ── Fairness and capacity ───────────────────────────────────────────────────

#[tokio::test]
async fn fifo_oldest_job_wins_the_last_slot() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();
    h.store.update_node(
        &node.id,
        NodePatch {
            max_concurrent_jobs: Some(1),
            ..NodePatch::default()
        },
    );

    let first = h.jobs.create(training_job("first", "1", "1Gi", 0)).unwrap();
    std::thread::sleep(StdDuration::from_millis(2));
    let second = h.jobs.create(training_job("second", "1", "1Gi", 0)).unwrap();

    h.scheduler.trigger().await;

    assert_eq!(h.jobs.get(&first.id).unwrap().status, JobStatus::Running);
    assert_eq!(h.jobs.get(&second.id).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn node_capacity_is_never_exceeded() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();

    for i in 0..3 {
        h.jobs.create(training_job(&format!("job-{}", i), "1", "1Gi", 0)).unwrap();
        std::thread::sleep(StdDuration::from_millis(2));
    }
    h.scheduler.trigger().await;

    let node = h.nodes.get(&node.id).unwrap();
    assert_eq!(node.current_jobs.len(), 2); // default max_concurrent_jobs
    assert!(!node.has_capacity());

    let stats = h.jobs.stats();
    assert_eq!(stats.get("running"), Some(&2));
    assert_eq!(stats.get("queued"), Some(&1));
}

#[tokio::test]
async fn gpu_accounting_sums_assigned_requests() {
    let h = harness();
    // 4 GPUs, plenty of CPU and memory, room for 3 concurrent jobs.
    let node = h.nodes.register(registration("gpu-1", "10.0.0.1", 32, 131072, 4)).unwrap();
    h.store.update_node(
        &node.id,
        NodePatch {
            max_concurrent_jobs: Some(3),
            ..NodePatch::default()
        },
    );

    let big = h.jobs.create(training_job("big", "1", "1Gi", 3)).unwrap();
    std::thread::sleep(StdDuration::from_millis(2));
    let medium = h.jobs.create(training_job("medium", "1", "1Gi", 2)).unwrap();
    std::thread::sleep(StdDuration::from_millis(2));
    let small = h.jobs.create(training_job("small", "1", "1Gi", 1)).unwrap();

    h.scheduler.trigger().await;

    // big takes 3 of 4 GPUs; medium (2) no longer fits, small (1) does.
    assert_eq!(h.jobs.get(&big.id).unwrap().status, JobStatus::Running);
    assert_eq!(h.jobs.get(&medium.id).unwrap().status, JobStatus::Queued);
    assert_eq!(h.jobs.get(&small.id).unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn unparseable_quantities_leave_job_queued() {
    let h = harness();
    h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();

    let bad = h.jobs.create(training_job("bad", "lots", "1Gi", 0)).unwrap();
    std::thread::sleep(StdDuration::from_millis(2));
    let good = h.jobs.create(training_job("good", "1", "1Gi", 0)).unwrap();

    h.scheduler.trigger().await;

    // The bad job is contained; the tick still schedules the good one.
    assert_eq!(h.jobs.get(&bad.id).unwrap().status, JobStatus::Queued);
    assert_eq!(h.jobs.get(&good.id).unwrap().status, JobStatus::Running);
}

// ── Lifecycle guards ────────────────────────────────────────────────────────

#[tokio::test]
async fn terminal_states_are_absorbing() {
    let h = harness();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    let done = h.jobs.mark_failed(&job.id, "OOM on worker".to_string()).unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error.as_deref(), Some("OOM on worker"));
    let completed_at = done.completed_at.unwrap();

    let update = gridmaster::core::JobUpdate {
        status: Some(JobStatus::Running),
        ..Default::default()
    };
    let err = h.jobs.update(&job.id, update).unwrap_err();
    assert!(matches!(err, MasterError::InvalidTransition { .. }));

    // Re-asserting the same terminal status is an accepted retry and
    // does not move the completion timestamp.
    let retry = h.jobs.mark_failed(&job.id, "OOM on worker".to_string()).unwrap();
    assert_eq!(retry.completed_at.unwrap(), completed_at);
}

#[tokio::test]
async fn reporter_updates_stamp_timestamps() {
    let h = harness();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    assert!(job.started_at.is_none());

    let running = h
        .jobs
        .update(
            &job.id,
            gridmaster::core::JobUpdate {
                status: Some(JobStatus::Running),
                logs: Some("epoch 1/10".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());
    assert_eq!(running.logs.as_deref(), Some("epoch 1/10"));

    let done = h
        .jobs
        .update(
            &job.id,
            gridmaster::core::JobUpdate {
                status: Some(JobStatus::Completed),
                result: Some(json!({"loss": 0.01})),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(done.completed_at.is_some());
    assert_eq!(done.started_at, running.started_at);
}

#[tokio::test]
async fn result_requires_completed_status() {
    let h = harness();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();

    let err = h
        .jobs
        .update(
            &job.id,
            gridmaster::core::JobUpdate {
                result: Some(json!({"loss": 0.5})),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MasterError::Validation(_)));
}

// ── Heartbeat reconciliation ────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_heals_offline_node_and_refreshes_resources() {
    let h = harness();
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();
    h.store.update_node(
        &node.id,
        NodePatch {
            status: Some(NodeStatus::Offline),
            ..NodePatch::default()
        },
    );

    let mut resources = registration("w1", "10.0.0.1", 8, 16384, 0).resources;
    resources.memory_used_mb = 4096;
    let response = h.nodes.heartbeat(&HeartbeatRequest {
        worker_id: node.id.clone(),
        resources,
        active_jobs: vec![],
        uptime_seconds: 42.0,
    });
    assert!(response.acknowledged);
    assert!(response.assigned_jobs.is_empty());

    let node = h.nodes.get(&node.id).unwrap();
    assert_eq!(node.status, NodeStatus::Online);
    assert_eq!(node.resources.memory_used_mb, 4096);
    assert!(node.last_heartbeat.is_some());
}

#[tokio::test]
async fn heartbeat_from_unknown_worker_is_refused() {
    let h = harness();
    let response = h.nodes.heartbeat(&HeartbeatRequest {
        worker_id: "ghost".to_string(),
        resources: registration("w1", "10.0.0.1", 8, 16384, 0).resources,
        active_jobs: vec![],
        uptime_seconds: 1.0,
    });
    assert!(!response.acknowledged);
}

#[tokio::test]
async fn fresh_assignment_survives_heartbeat_overwrite() {
    let h = harness(); // 10s grace
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    h.scheduler.trigger().await;

    // The worker heartbeats before it has picked up the assignment.
    let response = h.nodes.heartbeat(&HeartbeatRequest {
        worker_id: node.id.clone(),
        resources: registration("w1", "10.0.0.1", 8, 16384, 0).resources,
        active_jobs: vec![],
        uptime_seconds: 1.0,
    });
    assert!(response.acknowledged);

    let node = h.nodes.get(&node.id).unwrap();
    assert!(
        node.current_jobs.contains(&job.id),
        "assignment inside the grace window must survive the overwrite"
    );
}

#[tokio::test]
async fn expired_assignment_yields_to_worker_report() {
    let h = harness_with_grace(Duration::zero());
    let node = h.nodes.register(registration("w1", "10.0.0.1", 8, 16384, 0)).unwrap();
    let job = h.jobs.create(training_job("train", "1", "1Gi", 0)).unwrap();
    h.scheduler.trigger().await;
    assert!(h.nodes.get(&node.id).unwrap().current_jobs.contains(&job.id));

    // Grace already over: the worker's report is authoritative.
    h.nodes.heartbeat(&HeartbeatRequest {
        worker_id: node.id.clone(),
        resources: registration("w1", "10.0.0.1", 8, 16384, 0).resources,
        active_jobs: vec![],
        uptime_seconds: 1.0,
    });

    assert!(h.nodes.get(&node.id).unwrap().current_jobs.is_empty());
}

// ── Listing and stats ───────────────────────────────────────────────────────

#[tokio::test]
async fn listing_filters_and_paginates() {
    let h = harness();
    for i in 0..5 {
        let mut create = training_job(&format!("job-{}", i), "1", "1Gi", 0);
        if i % 2 == 0 {
            create.labels.insert("tier".to_string(), "research".to_string());
        }
        h.jobs.create(create).unwrap();
        std::thread::sleep(StdDuration::from_millis(2));
    }

    let all = h.jobs.list(None, None, 100, 0);
    assert_eq!(all.len(), 5);
    // Newest first.
    assert_eq!(all[0].name, "job-4");

    let page = h.jobs.list(None, None, 2, 2);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].name, "job-2");

    let queued = h.jobs.list(Some(JobStatus::Queued), None, 100, 0);
    assert_eq!(queued.len(), 5);

    let tiered = h.jobs.list(None, Some("tier=research"), 100, 0);
    assert_eq!(tiered.len(), 3);
    let keyed = h.jobs.list(None, Some("tier"), 100, 0);
    assert_eq!(keyed.len(), 3);
    let team = h.jobs.list(None, Some("team=ml"), 100, 0);
    assert_eq!(team.len(), 5);
}

#[tokio::test]
async fn scheduler_start_and_stop_are_idempotent() {
    let h = harness();
    h.scheduler.start().await;
    h.scheduler.start().await; // no-op
    h.scheduler.stop().await;
    h.scheduler.stop().await; // no-op
}
