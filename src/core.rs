// src/core.rs
//
// =============================================================================
// GRIDMASTER: CORE SCHEMA AUTHORITY
// =============================================================================
//
// The shared vocabulary of the cluster.
// This file defines the strict data contracts between the master (Rust)
// and the execution layer (worker agents, SDKs, dashboards).
//
// Design Principles:
// 1. Serde-first: every type here crosses the wire as JSON.
// 2. One source of truth: supervisors and the store never invent fields.
// 3. String quantities: CPU/memory requests stay in their submitted form
//    ("4000m", "16Gi") and are parsed only at scheduling time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// 1. LIFECYCLE ENUMS
// ============================================================================

/// Lifecycle states for a job.
///
/// `Scheduled` exists on the wire for worker compatibility but the master
/// never produces it: the scheduler moves jobs from `Queued` straight to
/// `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are absorbing: no status, `started_at`, or
    /// `completed_at` mutation is allowed past this point.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health states for a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Draining,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Busy => "busy",
            NodeStatus::Draining => "draining",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// 2. RESOURCE MODELS
// ============================================================================

/// Resources requested by a job, in string form as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU cores, e.g. "4" or "4000m".
    #[serde(default = "default_cpu")]
    pub cpu: String,
    /// Memory, e.g. "16Gi" or "512Mi".
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Number of GPUs required.
    #[serde(default)]
    pub gpu: u32,
}

fn default_cpu() -> String {
    "1".into()
}

fn default_memory() -> String {
    "1Gi".into()
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
            gpu: 0,
        }
    }
}

/// Resource snapshot reported by a worker node.
/// The worker is the authority on usage numbers; the master only keeps
/// the latest report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Total CPU cores.
    pub cpu_cores: u32,
    /// Current CPU usage in percent.
    #[serde(default)]
    pub cpu_usage_percent: f32,
    /// Total RAM in MB.
    pub memory_total_mb: i64,
    /// Used RAM in MB.
    #[serde(default)]
    pub memory_used_mb: i64,
    /// Number of GPUs.
    #[serde(default)]
    pub gpu_count: u32,
    /// GPU model names.
    #[serde(default)]
    pub gpu_names: Vec<String>,
    /// Total GPU memory in MB.
    #[serde(default)]
    pub gpu_memory_total_mb: i64,
    /// Used GPU memory in MB.
    #[serde(default)]
    pub gpu_memory_used_mb: i64,
}

// ============================================================================
// 3. JOB MODELS
// ============================================================================

/// An environment variable key-value pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A volume mount specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    #[serde(alias = "mountPath")]
    pub mount_path: String,
    pub source: String,
}

/// Configuration for distributed multi-worker jobs.
/// Carried through the system untouched; the scheduler does not
/// gang-schedule replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Number of worker processes (must be >= 1).
    pub workers: u32,
    /// Framework type: pytorch, horovod, mpi.
    #[serde(rename = "type")]
    pub kind: String,
}

/// The spec section of a job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Container image to run.
    pub image: String,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub distributed: Option<DistributedConfig>,
}

/// Request body for creating a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreate {
    /// Job name, 1 to 128 characters.
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub spec: JobSpec,
}

/// Request body for updating a job (worker progress reports).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub logs: Option<String>,
}

/// Full job representation stored in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Node the job ran on. Set on first transition to `Running` and
    /// kept through terminal states as the assignment record.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub logs: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn new(create: JobCreate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: create.name,
            labels: create.labels,
            spec: create.spec,
            status: JobStatus::Pending,
            worker_id: None,
            result: None,
            logs: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

// ============================================================================
// 4. NODE MODELS
// ============================================================================

/// Request body when a worker registers with the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegister {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default = "default_worker_port")]
    pub port: u16,
    pub resources: ResourceSnapshot,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_worker_port() -> u16 {
    8081
}

fn default_version() -> String {
    "0.1.0".into()
}

/// Full worker node representation stored in the system.
///
/// Identity for re-registration purposes is the `(hostname, ip_address)`
/// pair: a worker that restarts and registers again keeps its id and its
/// `current_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub ip_address: String,
    pub port: u16,
    pub status: NodeStatus,
    pub resources: ResourceSnapshot,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Job ids currently assigned to this node, in assignment order.
    #[serde(default)]
    pub current_jobs: Vec<String>,
    pub max_concurrent_jobs: u32,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub version: String,
}

impl Node {
    pub fn new(reg: NodeRegister, max_concurrent_jobs: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            hostname: reg.hostname,
            ip_address: reg.ip_address,
            port: reg.port,
            status: NodeStatus::Online,
            resources: reg.resources,
            labels: reg.labels,
            current_jobs: Vec::new(),
            max_concurrent_jobs,
            registered_at: Utc::now(),
            last_heartbeat: Some(Utc::now()),
            version: reg.version,
        }
    }

    /// Online and strictly below its concurrency cap.
    pub fn has_capacity(&self) -> bool {
        self.status == NodeStatus::Online
            && (self.current_jobs.len() as u32) < self.max_concurrent_jobs
    }
}

// ============================================================================
// 5. WIRE PROTOCOL (Worker <-> Master)
// ============================================================================

/// Heartbeat payload sent by a worker to the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub resources: ResourceSnapshot,
    /// The worker's view of the jobs it is executing.
    #[serde(default)]
    pub active_jobs: Vec<String>,
    #[serde(default)]
    pub uptime_seconds: f64,
}

/// A job handed to a worker for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: String,
    pub spec: JobSpec,
}

/// Response from master to a worker heartbeat.
///
/// `assigned_jobs` and `commands` reserve room for push-style assignment
/// and control messages ("drain", "cancel:job-id"). The scheduler assigns
/// by direct store mutation today, so both lists stay empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    #[serde(default)]
    pub assigned_jobs: Vec<JobAssignment>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl HeartbeatResponse {
    pub fn ack() -> Self {
        Self {
            acknowledged: true,
            assigned_jobs: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn nack() -> Self {
        Self {
            acknowledged: false,
            assigned_jobs: Vec::new(),
            commands: Vec::new(),
        }
    }
}

/// Aggregated cluster status for dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub pending_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_cpu_cores: u64,
    pub total_gpu_count: u64,
    pub total_memory_mb: i64,
}
