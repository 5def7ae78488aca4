// src/jobs.rs
//
// =============================================================================
// GRIDMASTER: JOB SUPERVISOR
// =============================================================================
//
// Job lifecycle: PENDING -> QUEUED -> RUNNING -> {COMPLETED|FAILED|CANCELLED},
// with CANCELLED reachable from any non-terminal state.
//
// Terminal states are absorbing. Every path that could move a finished job
// funnels through the transition guard here; a reporter that retries a
// terminal update gets the job back unchanged, a reporter that tries to
// resurrect one gets INVALID_TRANSITION.

use crate::core::{Job, JobCreate, JobStatus, JobUpdate};
use crate::error::{MasterError, MasterResult};
use crate::store::{ClusterStore, JobPatch};

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct JobSupervisor {
    store: Arc<ClusterStore>,
}

impl JobSupervisor {
    pub fn new(store: Arc<ClusterStore>) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // SUBMISSION
    // -------------------------------------------------------------------------

    /// Create and enqueue a new job.
    ///
    /// The store writes PENDING first and the job moves to QUEUED right
    /// after; only a concurrent reader can observe the intermediate state.
    pub fn create(&self, create: JobCreate) -> MasterResult<Job> {
        if create.name.is_empty() || create.name.len() > 128 {
            return Err(MasterError::Validation(
                "job name must be 1 to 128 characters".into(),
            ));
        }
        if let Some(dist) = &create.spec.distributed {
            if dist.workers < 1 {
                return Err(MasterError::Validation(
                    "distributed.workers must be at least 1".into(),
                ));
            }
        }

        let job = self.store.create_job(create);
        let job = self
            .store
            .update_job(
                &job.id,
                JobPatch {
                    status: Some(JobStatus::Queued),
                    ..JobPatch::default()
                },
            )
            .ok_or_else(|| MasterError::Internal(format!("job {} vanished on enqueue", job.id)))?;

        log::info!("Job {} ({}) -> queued", job.id, job.name);
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.store.get_job(job_id)
    }

    pub fn list(
        &self,
        status: Option<JobStatus>,
        label: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<Job> {
        self.store.list_jobs(status, label, limit, offset)
    }

    // -------------------------------------------------------------------------
    // LIFECYCLE TRANSITIONS
    // -------------------------------------------------------------------------

    /// Apply a reporter update: status (with timestamp stamping), result,
    /// logs. Both result and logs overwrite.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> MasterResult<Job> {
        let job = self
            .store
            .get_job(job_id)
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))?;

        let mut patch = JobPatch::default();

        if let Some(status) = update.status {
            self.guard_transition(&job, status)?;
            if status != job.status {
                patch.status = Some(status);
                if status == JobStatus::Running && job.started_at.is_none() {
                    patch.started_at = Some(Utc::now());
                }
                if status.is_terminal() {
                    patch.completed_at = Some(Utc::now());
                }
            }
        }

        if let Some(result) = update.result {
            let effective = update.status.unwrap_or(job.status);
            if effective != JobStatus::Completed {
                return Err(MasterError::Validation(
                    "result is only accepted for completed jobs".into(),
                ));
            }
            patch.result = Some(result);
        }
        if let Some(logs) = update.logs {
            patch.logs = Some(logs);
        }

        let job = self
            .store
            .update_job(job_id, patch)
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))?;
        log::info!("Job {} updated (status {})", job.id, job.status);
        Ok(job)
    }

    /// Cancel a job. Terminal jobs are returned unchanged, so cancelling
    /// twice (or cancelling a finished job) is a no-op.
    pub fn cancel(&self, job_id: &str) -> MasterResult<Job> {
        let job = self
            .store
            .get_job(job_id)
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))?;

        if job.status.is_terminal() {
            log::warn!("Cancel of job {} ignored (already {})", job.id, job.status);
            return Ok(job);
        }

        self.store
            .update_job(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Cancelled),
                    completed_at: Some(Utc::now()),
                    ..JobPatch::default()
                },
            )
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))
    }

    /// Scheduler-only: bind a job to a node and start it.
    pub fn mark_running(&self, job_id: &str, worker_id: &str) -> Option<Job> {
        self.store.update_job(
            job_id,
            JobPatch {
                status: Some(JobStatus::Running),
                worker_id: Some(worker_id.to_string()),
                started_at: Some(Utc::now()),
                ..JobPatch::default()
            },
        )
    }

    /// Reporter path: the worker finished the job successfully.
    pub fn mark_completed(&self, job_id: &str, result: Value) -> MasterResult<Job> {
        self.finish(job_id, JobStatus::Completed, Some(result), None)
    }

    /// Reporter path: the worker gave up on the job.
    pub fn mark_failed(&self, job_id: &str, error: String) -> MasterResult<Job> {
        self.finish(job_id, JobStatus::Failed, None, Some(error))
    }

    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> MasterResult<Job> {
        let job = self
            .store
            .get_job(job_id)
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))?;
        self.guard_transition(&job, status)?;
        if job.status == status {
            // Reporter retry of a state already applied.
            return Ok(job);
        }

        self.store
            .update_job(
                job_id,
                JobPatch {
                    status: Some(status),
                    completed_at: Some(Utc::now()),
                    result,
                    error,
                    ..JobPatch::default()
                },
            )
            .ok_or_else(|| MasterError::JobNotFound(job_id.to_string()))
    }

    /// A terminal job may only be "re-asserted" with its current status.
    fn guard_transition(&self, job: &Job, to: JobStatus) -> MasterResult<()> {
        if job.status.is_terminal() && to != job.status {
            return Err(MasterError::InvalidTransition {
                id: job.id.clone(),
                from: job.status,
                to,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> HashMap<String, usize> {
        self.store.count_jobs_by_status()
    }
}
