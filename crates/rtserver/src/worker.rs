//! # Worker Pool
//!
//! M threads that claim jobs, shoot every ray against every instance of the
//! job's session, and publish one result per job.
//!
//! ## State Machine
//!
//! ```text
//!   Idle-waiting ──claim──> Scanning ──pop──> Processing ──publish──┐
//!        ^                                                          │
//!        └──────────────────────────────────────────────────────────┘
//!   any state ──stop flag──> Terminated (checked before every claim)
//! ```

use crate::error::{RtResult, RtServerError};
use crate::registry::SessionSnapshot;
use crate::server::ServerContext;
use crate::weave::weave;
use rtserver_core::{Hit, Job, JobResult, Pooled, Ray, RayResult};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Snapshot of the worker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Workers processing a job right now.
    pub busy: usize,
    /// Most workers ever busy at once.
    pub peak_busy: usize,
    /// Jobs finished.
    pub jobs_completed: u64,
    /// Rays shot.
    pub rays_shot: u64,
}

/// Live worker counters, shared by every worker of a server.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    jobs_completed: AtomicU64,
    rays_shot: AtomicU64,
}

impl WorkerCounters {
    fn begin_job(&self) {
        let busy = self.busy.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_busy.fetch_max(busy, Ordering::AcqRel);
    }

    fn end_job(&self, rays: usize) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.rays_shot.fetch_add(rays as u64, Ordering::Relaxed);
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            busy: self.busy.load(Ordering::Acquire),
            peak_busy: self.peak_busy.load(Ordering::Acquire),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            rays_shot: self.rays_shot.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.busy.store(0, Ordering::Release);
        self.peak_busy.store(0, Ordering::Release);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.rays_shot.store(0, Ordering::Relaxed);
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Running worker threads. Dropping the pool stops and joins them.
pub struct WorkerPool {
    ctx: Arc<ServerContext>,
    workers: Vec<Worker>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Starts `count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::WorkerSpawn`] if a thread cannot be started;
    /// workers already started are stopped first.
    pub(crate) fn spawn(ctx: &Arc<ServerContext>, count: usize) -> RtResult<Self> {
        let mut pool = Self {
            ctx: Arc::clone(ctx),
            workers: Vec::with_capacity(count),
        };

        for i in 0..count {
            let stop = Arc::new(AtomicBool::new(false));
            let worker_ctx = Arc::clone(ctx);
            let worker_stop = Arc::clone(&stop);
            let spawned = thread::Builder::new()
                .name(format!("rtserver-worker-{i}"))
                .spawn(move || worker_loop(&worker_ctx, &worker_stop, i));

            match spawned {
                Ok(handle) => pool.workers.push(Worker {
                    stop,
                    handle: Some(handle),
                }),
                Err(e) => {
                    pool.stop();
                    return Err(RtServerError::WorkerSpawn(e));
                }
            }
        }

        tracing::info!(workers = count, "worker pool started");
        Ok(pool)
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns true if the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Raises every stop flag, wakes idle workers and joins them all.
    ///
    /// A worker in the middle of a job finishes and publishes it first.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            worker.stop.store(true, Ordering::Release);
        }
        self.ctx.queues.wake_all_workers();

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    tracing::error!("worker thread panicked");
                }
            }
        }
        tracing::info!(workers = self.workers.len(), "worker pool stopped");
        self.workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(ctx: &ServerContext, stop: &AtomicBool, id: usize) {
    tracing::debug!(worker = id, "worker started");

    while ctx.queues.wait_for_input(stop) {
        let Some((queue, job)) = ctx.queues.pop_next_input() else {
            continue;
        };

        ctx.counters.begin_job();
        let rays = job.rays.len();
        tracing::trace!(worker = id, job = %job.id, session = %job.session_id, queue, rays, "processing job");

        let result = process_job(ctx, job);
        ctx.publish(result, queue);
        ctx.counters.end_job(rays);
    }

    tracing::debug!(worker = id, "worker stopped");
}

/// Shoots every ray of `job` and wraps the outcome in a pooled result.
pub(crate) fn process_job(ctx: &ServerContext, job: Pooled<Job>) -> Pooled<JobResult> {
    let arena = &ctx.arena;
    let mut result = arena.acquire::<JobResult>();

    let snapshot = ctx.registry.read().snapshot(job.session_id);
    match &snapshot {
        Some(snapshot) => {
            for ray in &job.rays {
                let ray_result = shoot_ray(ctx, snapshot, ray, job.max_hits);
                if !ray_result.hits.is_empty() {
                    result.got_some_hits = true;
                }
                result.ray_results.push(ray_result);
            }
        }
        None => {
            tracing::warn!(job = %job.id, session = %job.session_id, "job addressed to a closed session, reporting misses");
            for ray in &job.rays {
                let mut ray_result = arena.acquire::<RayResult>();
                ray_result.ray = **ray;
                result.ray_results.push(ray_result);
            }
        }
    }

    result.job = Some(job);
    result
}

fn shoot_ray(
    ctx: &ServerContext,
    snapshot: &SessionSnapshot,
    ray: &Ray,
    max_hits: Option<usize>,
) -> Pooled<RayResult> {
    let arena = &ctx.arena;
    let mut ray_result = arena.acquire::<RayResult>();
    ray_result.ray = *ray;

    for instance in snapshot.instances.iter() {
        let local = instance.to_local(ray);
        // Tracers measure along the local ray; hits are reported in model units.
        let scale = instance.distance_scale(ray, &local);
        for partition in instance.tracer.shoot(&local, max_hits) {
            if partition.region.is_air() && !ctx.config.use_air {
                continue;
            }

            let mut hit: Pooled<Hit> = arena.acquire();
            hit.hit_dist = partition.in_dist * scale;
            hit.los = (partition.out_dist - partition.in_dist) * scale;
            hit.enter_normal = instance.to_model_normal(partition.in_normal);
            hit.exit_normal = instance.to_model_normal(partition.out_normal);
            hit.comp_id = snapshot
                .classifier
                .as_ref()
                .map_or(0, |c| c.classify(&partition.region));
            hit.region = Some(partition.region);
            ray_result.hits.push(hit);
        }
    }

    if snapshot.instances.len() > 1 {
        weave(&mut ray_result.hits, arena);
    }
    ray_result
}
