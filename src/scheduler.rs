// src/scheduler.rs
//
// =============================================================================
// GRIDMASTER: SCHEDULER
// =============================================================================
//
// FIFO scheduler with resource-aware node matching.
//
// Each tick:
// 1. Sweeps node liveness (stale nodes go OFFLINE).
// 2. Takes waiting jobs oldest-first.
// 3. First-fits each job onto an available node snapshot.
// 4. Binds job to node (RUNNING + assignment record) on a match.
//
// Capacity policy is deliberately asymmetric:
// - CPU admits against TOTAL cores. Workers multiplex CPU, so already
//   assigned jobs do not discount it.
// - Memory admits against total minus used as reported by the worker.
// - GPU admits against the device count minus the GPUs requested by the
//   jobs already assigned to that node.
//
// The tick mutex makes the scheduler the single writer of assignments:
// the timer loop and manual triggers from the submission path can never
// run a pass concurrently.

use crate::error::MasterError;
use crate::jobs::JobSupervisor;
use crate::nodes::NodeSupervisor;
use crate::resources::check_resources_fit;
use crate::store::ClusterStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct Scheduler {
    store: Arc<ClusterStore>,
    jobs: Arc<JobSupervisor>,
    nodes: Arc<NodeSupervisor>,
    interval: Duration,
    running: AtomicBool,
    tick_lock: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<ClusterStore>,
        jobs: Arc<JobSupervisor>,
        nodes: Arc<NodeSupervisor>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            jobs,
            nodes,
            interval,
            running: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // LOOP CONTROL
    // -------------------------------------------------------------------------

    /// Launch the background loop. Calling start on a running scheduler
    /// is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run().await });
        *self.task.lock().await = Some(handle);
        log::info!("Scheduler started (interval={:?})", self.interval);
    }

    /// Stop the loop and wait for it to wind down. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation is the expected way down.
            let _ = handle.await;
            log::info!("Scheduler stopped");
        }
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            {
                let _serial = self.tick_lock.lock().await;
                if let Err(e) = self.tick() {
                    log::error!("Scheduler tick error: {}", e);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run one matching pass on the caller's task. The submission path
    /// calls this right after a job is created so the job does not have
    /// to wait out the timer interval.
    pub async fn trigger(&self) {
        let _serial = self.tick_lock.lock().await;
        if let Err(e) = self.tick() {
            log::error!("Scheduler tick error: {}", e);
        }
    }

    // -------------------------------------------------------------------------
    // THE TICK
    // -------------------------------------------------------------------------

    fn tick(&self) -> Result<(), MasterError> {
        // 1. Liveness sweep
        let timed_out = self.nodes.check_timeouts();
        if !timed_out.is_empty() {
            log::info!("Timed out {} nodes", timed_out.len());
        }

        // 2. Waiting jobs, oldest first
        let candidates = self.store.schedulable_jobs();
        if candidates.is_empty() {
            return Ok(());
        }

        // 3. Node working set for this pass
        let mut available = self.store.get_available_nodes();
        if available.is_empty() {
            log::debug!("{} jobs queued but no nodes available", candidates.len());
            return Ok(());
        }

        // 4. First-fit match, FIFO over jobs
        'jobs: for job in candidates {
            let req = &job.spec.resources;
            let mut assigned = false;
            let mut idx = 0;

            while idx < available.len() {
                let node = &available[idx];
                let avail_cpu = f64::from(node.resources.cpu_cores);
                let avail_mem = node.resources.memory_total_mb - node.resources.memory_used_mb;
                let assigned_gpus: i64 = node
                    .current_jobs
                    .iter()
                    .filter_map(|job_id| self.store.get_job(job_id))
                    .map(|j| i64::from(j.spec.resources.gpu))
                    .sum();
                let avail_gpu = i64::from(node.resources.gpu_count) - assigned_gpus;

                match check_resources_fit(
                    &req.cpu, &req.memory, req.gpu, avail_cpu, avail_mem, avail_gpu,
                ) {
                    Err(e) => {
                        // Bad quantity strings surface here, not at
                        // submission. The job stays queued.
                        log::error!(
                            "Job {} ({}) has unparseable resources, leaving it queued: {}",
                            job.id,
                            job.name,
                            e
                        );
                        continue 'jobs;
                    }
                    Ok((true, _)) => {
                        self.jobs.mark_running(&job.id, &node.id);
                        if let Some(updated) = self.store.assign_job(&node.id, &job.id) {
                            log::info!(
                                "Scheduled job {} ({}) -> node {} ({})",
                                job.id,
                                job.name,
                                updated.id,
                                updated.hostname
                            );
                            if (updated.current_jobs.len() as u32) >= updated.max_concurrent_jobs {
                                available.remove(idx);
                            } else {
                                // Keep the working-set copy current so the
                                // GPU accounting sees this assignment.
                                available[idx] = updated;
                            }
                        }
                        assigned = true;
                        break;
                    }
                    Ok((false, _reason)) => {
                        idx += 1;
                    }
                }
            }

            if !assigned {
                log::debug!(
                    "No suitable node for job {} ({}), staying queued",
                    job.id,
                    job.name
                );
            }
        }

        Ok(())
    }
}
