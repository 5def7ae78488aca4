// src/store.rs
//
// =============================================================================
// GRIDMASTER: CLUSTER STORE
// =============================================================================
//
// The authoritative in-memory registry of jobs and nodes.
//
// Architecture:
// - Two maps (jobs by id, nodes by id) behind one coarse mutex.
// - Every operation takes the lock; reads hand back owned clones, so a
//   snapshot a caller holds can never mix pre- and post-mutation fields.
// - Partial updates go through typed patch structs. A field the caller
//   does not set is not touched; there is no way to misspell one.
// - Assignment bookkeeping: the scheduler stamps each job-to-node
//   assignment, and heartbeats that overwrite `current_jobs` cannot evict
//   an assignment younger than the grace window (the worker may simply
//   not have heard about it yet).
//
// The store is memory-resident by design and discarded on restart.

use crate::core::{
    Job, JobCreate, JobStatus, Node, NodeRegister, NodeStatus, ResourceSnapshot,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// 1. TYPED PARTIAL UPDATES
// ============================================================================

/// Fields of a job that may change after creation. Every field is
/// optional; the store applies exactly the ones that are set.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub result: Option<Value>,
    pub logs: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields of a node that may change after registration.
/// `last_heartbeat` is double-optional because the field itself is
/// nullable: `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub status: Option<NodeStatus>,
    pub resources: Option<ResourceSnapshot>,
    pub labels: Option<HashMap<String, String>>,
    pub current_jobs: Option<Vec<String>>,
    pub max_concurrent_jobs: Option<u32>,
    pub version: Option<String>,
    pub last_heartbeat: Option<Option<DateTime<Utc>>>,
}

// ============================================================================
// 2. THE STORE
// ============================================================================

/// A scheduler assignment that may not yet be reflected in worker
/// heartbeats.
#[derive(Debug, Clone)]
struct AssignmentStamp {
    node_id: String,
    assigned_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<String, Job>,
    nodes: HashMap<String, Node>,
    assignments: HashMap<String, AssignmentStamp>,
}

pub struct ClusterStore {
    inner: Mutex<StoreInner>,
    default_max_jobs: u32,
    assignment_grace: Duration,
}

impl ClusterStore {
    pub fn new(default_max_jobs: u32, assignment_grace: Duration) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            default_max_jobs,
            assignment_grace,
        }
    }

    // -------------------------------------------------------------------------
    // JOB OPERATIONS
    // -------------------------------------------------------------------------

    /// Create a new job in `Pending` and add it to the store.
    pub fn create_job(&self, create: JobCreate) -> Job {
        let job = Job::new(create);
        let mut inner = self.inner.lock();
        inner.jobs.insert(job.id.clone(), job.clone());
        log::info!("Created job {} ({})", job.id, job.name);
        job
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    /// List jobs, newest first, with optional status and label filters.
    ///
    /// The label selector is `key=value` or a bare `key` (presence check).
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        label: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .filter(|j| match label {
                Some(selector) => match selector.split_once('=') {
                    Some((key, value)) => j.labels.get(key).map(String::as_str) == Some(value),
                    None => j.labels.contains_key(selector),
                },
                None => true,
            })
            .cloned()
            .collect();
        drop(inner);

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs.into_iter().skip(offset).take(limit).collect()
    }

    /// Jobs waiting for a node, oldest first. Ties on `created_at` break
    /// on the job id so a tick is deterministic.
    pub fn schedulable_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Queued))
            .cloned()
            .collect();
        drop(inner);

        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Apply a partial update. Returns the updated job, or `None` for an
    /// unknown id.
    pub fn update_job(&self, job_id: &str, patch: JobPatch) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(job_id)?;

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(worker_id) = patch.worker_id {
            job.worker_id = Some(worker_id);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        if let Some(logs) = patch.logs {
            job.logs = Some(logs);
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(started_at) = patch.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            job.completed_at = Some(completed_at);
        }

        Some(job.clone())
    }

    pub fn count_jobs_by_status(&self) -> HashMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for job in inner.jobs.values() {
            *counts.entry(job.status.as_str().to_string()).or_default() += 1;
        }
        counts
    }

    // -------------------------------------------------------------------------
    // NODE OPERATIONS
    // -------------------------------------------------------------------------

    /// Register a worker node.
    ///
    /// A registration whose `(hostname, ip_address)` matches an existing
    /// node is the same machine coming back: it keeps its id and its
    /// `current_jobs`, and only the mutable fields are refreshed.
    pub fn register_node(&self, reg: NodeRegister) -> Node {
        let mut inner = self.inner.lock();

        if let Some(node) = inner
            .nodes
            .values_mut()
            .find(|n| n.hostname == reg.hostname && n.ip_address == reg.ip_address)
        {
            node.status = NodeStatus::Online;
            node.resources = reg.resources;
            node.labels = reg.labels;
            node.last_heartbeat = Some(Utc::now());
            node.version = reg.version;
            let node = node.clone();
            log::info!("Re-registered node {} ({})", node.id, node.hostname);
            return node;
        }

        let node = Node::new(reg, self.default_max_jobs);
        inner.nodes.insert(node.id.clone(), node.clone());
        log::info!("Registered new node {} ({})", node.id, node.hostname);
        node
    }

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.inner.lock().nodes.get(node_id).cloned()
    }

    /// List nodes, most recently registered first.
    pub fn list_nodes(&self, status: Option<NodeStatus>) -> Vec<Node> {
        let inner = self.inner.lock();
        let mut nodes: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| status.map_or(true, |s| n.status == s))
            .cloned()
            .collect();
        drop(inner);

        nodes.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        nodes
    }

    pub fn update_node(&self, node_id: &str, patch: NodePatch) -> Option<Node> {
        let mut inner = self.inner.lock();
        let node = inner.nodes.get_mut(node_id)?;

        if let Some(status) = patch.status {
            node.status = status;
        }
        if let Some(resources) = patch.resources {
            node.resources = resources;
        }
        if let Some(labels) = patch.labels {
            node.labels = labels;
        }
        if let Some(current_jobs) = patch.current_jobs {
            node.current_jobs = current_jobs;
        }
        if let Some(max) = patch.max_concurrent_jobs {
            node.max_concurrent_jobs = max;
        }
        if let Some(version) = patch.version {
            node.version = version;
        }
        if let Some(last_heartbeat) = patch.last_heartbeat {
            node.last_heartbeat = last_heartbeat;
        }

        Some(node.clone())
    }

    pub fn remove_node(&self, node_id: &str) -> bool {
        self.inner.lock().nodes.remove(node_id).is_some()
    }

    /// Nodes eligible for new work: online and strictly below their
    /// concurrency cap, in `list_nodes` order.
    pub fn get_available_nodes(&self) -> Vec<Node> {
        let inner = self.inner.lock();
        let mut nodes: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| n.has_capacity())
            .cloned()
            .collect();
        drop(inner);

        nodes.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        nodes
    }

    // -------------------------------------------------------------------------
    // ASSIGNMENT BOOKKEEPING (Scheduler <-> Heartbeat)
    // -------------------------------------------------------------------------

    /// Record a scheduler assignment: append the job to the node's
    /// `current_jobs` and stamp the assignment time.
    pub fn assign_job(&self, node_id: &str, job_id: &str) -> Option<Node> {
        let mut inner = self.inner.lock();
        let node = inner.nodes.get_mut(node_id)?;
        if !node.current_jobs.iter().any(|j| j == job_id) {
            node.current_jobs.push(job_id.to_string());
        }
        let node = node.clone();
        inner.assignments.insert(
            job_id.to_string(),
            AssignmentStamp {
                node_id: node_id.to_string(),
                assigned_at: Utc::now(),
            },
        );
        Some(node)
    }

    /// Replace a node's `current_jobs` with the worker-reported set, but
    /// keep any assignment younger than the grace window that the report
    /// omits. A worker that heartbeats right after an assignment has not
    /// seen the job yet; dropping it here would orphan the assignment.
    pub fn merge_reported_jobs(&self, node_id: &str, reported: &[String]) -> Option<Vec<String>> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner
            .assignments
            .retain(|_, stamp| now - stamp.assigned_at < self.assignment_grace);

        let protected: Vec<String> = inner
            .assignments
            .iter()
            .filter(|(_, stamp)| stamp.node_id == node_id)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let node = inner.nodes.get_mut(node_id)?;
        let mut merged: Vec<String> = Vec::with_capacity(reported.len());
        for job_id in reported {
            if !merged.contains(job_id) {
                merged.push(job_id.clone());
            }
        }
        for job_id in protected {
            if !merged.contains(&job_id) {
                merged.push(job_id);
            }
        }

        node.current_jobs = merged.clone();
        Some(merged)
    }
}
