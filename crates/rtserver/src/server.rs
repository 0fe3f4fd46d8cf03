//! # Raytrace Server
//!
//! [`RtServer`] owns everything: the arena, the session registry, the queue
//! set, the waiter table and the worker pool. Nothing is global, so several
//! servers can live in one process.
//!
//! ## Lifecycle
//!
//! ```text
//!   new ──load_geometry──> loaded ──start_workers──> running ──shutdown──> new
//! ```
//!
//! [`RtServer::init`] does the first three steps at once. After
//! [`RtServer::shutdown`] the same server can be loaded and started again.

use crate::config::ServerConfig;
use crate::dispatch::{WaitError, WaiterTable};
use crate::error::{RtResult, RtServerError};
use crate::queue::QueueSet;
use crate::registry::SessionRegistry;
use crate::worker::{WorkerCounters, WorkerPool, WorkerStats};
use parking_lot::RwLock;
use rtserver_core::{
    Aabb, ArenaStats, Job, JobId, JobResult, Mat4, Pooled, Ray, ResourceArena, SessionId, Vec3,
};
use rtserver_geometry::GeometryLoader;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue used for single-ray shots.
pub const SINGLE_RAY_QUEUE: usize = 0;

/// Queue used for ray arrays, behind single rays.
pub const ARRAY_QUEUE: usize = 1;

/// State shared between the server handle and its workers.
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) arena: ResourceArena,
    pub(crate) registry: RwLock<SessionRegistry>,
    pub(crate) queues: QueueSet,
    pub(crate) waiters: WaiterTable,
    pub(crate) counters: WorkerCounters,
}

impl ServerContext {
    fn new(config: ServerConfig) -> Self {
        Self {
            arena: ResourceArena::new(),
            registry: RwLock::new(SessionRegistry::new(config.session_slot_block)),
            queues: QueueSet::new(config.num_queues),
            waiters: WaiterTable::new(),
            counters: WorkerCounters::default(),
            config,
        }
    }

    /// Hands a finished result to its synchronous caller, or queues it.
    pub(crate) fn publish(&self, result: Pooled<JobResult>, queue: usize) {
        let Err(result) = self.waiters.deliver(result) else {
            return;
        };
        if let Err(result) = self.queues.enqueue_output(result, queue) {
            tracing::error!(queue, "result for unknown output queue dropped");
            self.arena.recycle_job_result(result);
        }
    }
}

/// A grid of parallel rays shot as one job.
///
/// Ray `(row, col)` starts at `base + row * row_step + col * col_step` and
/// carries index `row * cols + col`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayShot {
    /// Origin of ray (0, 0).
    pub base: Vec3,
    /// Direction shared by every ray.
    pub direction: Vec3,
    /// Offset between rows.
    pub row_step: Vec3,
    /// Offset between columns.
    pub col_step: Vec3,
    /// Number of rows, at least 1.
    pub rows: usize,
    /// Number of columns, at least 1.
    pub cols: usize,
    /// Partitions reported per instance per ray. 0 reports all.
    pub max_hits: usize,
}

/// Resource summary of a server.
#[derive(Clone, Debug)]
pub struct ServerStats {
    /// Arena counters.
    pub arena: ArenaStats,
    /// Worker counters.
    pub workers: WorkerStats,
    /// Jobs waiting per input queue.
    pub queued_jobs: Vec<usize>,
    /// Results waiting per output queue.
    pub queued_results: Vec<usize>,
    /// Sessions in use.
    pub open_sessions: usize,
    /// Synchronous callers waiting.
    pub waiting_callers: usize,
}

/// The raytrace job server.
///
/// # Example
///
/// ```rust
/// use rtserver::{RtServer, ServerConfig};
/// use rtserver_core::Vec3;
/// use rtserver_geometry::SceneLoader;
///
/// let scene = r#"
///     title = "ball"
///     [rtserver]
///     tops = ["ball"]
///     [[objects]]
///     name = "ball"
///     [[objects.regions]]
///     name = "ball.r"
///     shape = { type = "sphere", center = [0.0, 0.0, 0.0], radius = 1.0 }
/// "#;
/// let loader = SceneLoader::new().with_source("ball", scene);
/// let server = RtServer::init(ServerConfig::default(), &loader, "ball", None).unwrap();
///
/// let session = server.open_session().unwrap();
/// let result = server
///     .shoot_ray(Vec3::new(-100.0, 0.0, 0.0), Vec3::X, session)
///     .unwrap();
/// assert!(result.got_some_hits);
/// server.release_result(result);
/// server.shutdown();
/// ```
pub struct RtServer {
    ctx: Arc<ServerContext>,
    workers: RwLock<Option<WorkerPool>>,
    next_job_id: AtomicU64,
}

impl std::fmt::Debug for RtServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtServer")
            .field("config", &self.ctx.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RtServer {
    /// Creates a server with no geometry and no workers.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            ctx: Arc::new(ServerContext::new(config.normalized())),
            workers: RwLock::new(None),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Creates a server, loads geometry and starts the workers.
    ///
    /// # Errors
    ///
    /// Returns the load error, or [`RtServerError::WorkerSpawn`].
    pub fn init(
        config: ServerConfig,
        loader: &dyn GeometryLoader,
        source: &str,
        object_names: Option<&[String]>,
    ) -> RtResult<Self> {
        let server = Self::new(config);
        server.load_geometry(loader, source, object_names)?;
        server.start_workers()?;
        Ok(server)
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// The arena jobs are built from and results are returned to.
    #[must_use]
    pub fn arena(&self) -> &ResourceArena {
        &self.ctx.arena
    }

    /// Loads geometry into session 0, replacing whatever was loaded.
    ///
    /// # Errors
    ///
    /// - [`RtServerError::AlreadyRunning`] while workers are running
    /// - [`RtServerError::Load`] if the loader fails
    pub fn load_geometry(
        &self,
        loader: &dyn GeometryLoader,
        source: &str,
        object_names: Option<&[String]>,
    ) -> RtResult<SessionId> {
        let workers = self.workers.read();
        if workers.is_some() {
            return Err(RtServerError::AlreadyRunning);
        }
        let config = &self.ctx.config;
        let id = self.ctx.registry.write().load_geometry(
            loader,
            source,
            object_names,
            config.use_air,
            config.classify_components,
        )?;
        drop(workers);
        Ok(id)
    }

    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// - [`RtServerError::AlreadyRunning`] if they are running
    /// - [`RtServerError::NoGeometry`] if nothing is loaded
    /// - [`RtServerError::WorkerSpawn`] if a thread cannot be started
    pub fn start_workers(&self) -> RtResult<()> {
        let mut workers = self.workers.write();
        if workers.is_some() {
            return Err(RtServerError::AlreadyRunning);
        }
        if !self.ctx.registry.read().is_loaded() {
            return Err(RtServerError::NoGeometry);
        }
        *workers = Some(WorkerPool::spawn(&self.ctx, self.ctx.config.num_threads)?);
        Ok(())
    }

    /// Returns true while the worker threads are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.workers.read().is_some()
    }

    /// Opens a session. See [`SessionRegistry::open_session`].
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::NoGeometry`] if nothing is loaded.
    pub fn open_session(&self) -> RtResult<SessionId> {
        self.ctx.registry.write().open_session()
    }

    /// Closes a session. Unknown ids are ignored.
    pub fn close_session(&self, id: SessionId) {
        self.ctx.registry.write().close_session(id);
    }

    /// Removes every transform of a session.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::InvalidSession`] if the session is not open.
    pub fn reset_transforms(&self, id: SessionId) -> RtResult<()> {
        self.ctx.registry.write().reset_transforms(id)
    }

    /// Places one instance of a session in the model.
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::set_transform`].
    pub fn set_transform(&self, id: SessionId, instance: usize, matrix: Mat4) -> RtResult<()> {
        self.ctx.registry.write().set_transform(id, instance, matrix)
    }

    /// Names of the instances of a session, in shooting order.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::InvalidSession`] if the session is not open.
    pub fn instance_names(&self, id: SessionId) -> RtResult<Vec<String>> {
        let registry = self.ctx.registry.read();
        let session = registry
            .session(id)
            .ok_or(RtServerError::InvalidSession(id))?;
        Ok(session.instances.iter().map(|i| i.name.clone()).collect())
    }

    /// Title of the loaded model.
    #[must_use]
    pub fn title(&self) -> String {
        self.ctx.registry.read().title().to_string()
    }

    /// Bounding box of a session.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::InvalidSession`] if the session is not open.
    pub fn bounding_box(&self, id: SessionId) -> RtResult<Aabb> {
        self.ctx.registry.read().bounding_box(id)
    }

    /// Component names indexed by component id.
    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        self.ctx.registry.read().component_names()
    }

    /// Library name and version.
    #[must_use]
    pub fn library_version() -> String {
        format!("rtserver {VERSION}")
    }

    /// Takes an empty job with a fresh id from the arena.
    #[must_use]
    pub fn new_job(&self, session: SessionId) -> Pooled<Job> {
        let mut job = self.ctx.arena.acquire::<Job>();
        job.id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        job.session_id = session;
        job
    }

    /// Takes a ray from the arena.
    #[must_use]
    pub fn new_ray(&self, origin: Vec3, direction: Vec3, index: i64) -> Pooled<Ray> {
        let mut ray = self.ctx.arena.acquire::<Ray>();
        *ray = Ray::new(origin, direction, index);
        ray
    }

    fn check_submit(&self, running: bool, session: SessionId, queue: usize) -> RtResult<()> {
        if !running {
            return Err(RtServerError::NotRunning);
        }
        let count = self.ctx.queues.len();
        if queue >= count {
            return Err(RtServerError::InvalidQueue { index: queue, count });
        }
        if !self.ctx.registry.read().is_valid(session) {
            return Err(RtServerError::InvalidSession(session));
        }
        Ok(())
    }

    /// Queues a job and returns at once. The result is collected with
    /// [`poll_result`](Self::poll_result) or [`wait_result`](Self::wait_result).
    ///
    /// The job belongs to the server from this call on; on error it is
    /// returned to the arena.
    ///
    /// # Errors
    ///
    /// - [`RtServerError::NotRunning`] if the workers are not running
    /// - [`RtServerError::InvalidQueue`] for an out-of-range queue
    /// - [`RtServerError::InvalidSession`] if the session is not open
    pub fn submit(&self, job: Pooled<Job>, queue: usize) -> RtResult<()> {
        let workers = self.workers.read();
        if let Err(e) = self.check_submit(workers.is_some(), job.session_id, queue) {
            self.ctx.arena.recycle_job(job);
            return Err(e);
        }
        if let Err(job) = self.ctx.queues.enqueue_input(job, queue) {
            self.ctx.arena.recycle_job(job);
            return Err(RtServerError::InvalidQueue {
                index: queue,
                count: self.ctx.queues.len(),
            });
        }
        Ok(())
    }

    /// Queues a job on queue 0 and blocks for its result, up to the
    /// configured `wait_timeout_ms`.
    ///
    /// # Errors
    ///
    /// Everything [`submit`](Self::submit) returns, plus
    /// [`RtServerError::Timeout`] and [`RtServerError::ShuttingDown`].
    pub fn submit_and_wait(&self, job: Pooled<Job>) -> RtResult<Pooled<JobResult>> {
        self.wait_on(job, SINGLE_RAY_QUEUE, self.ctx.config.wait_timeout())
    }

    /// Queues a job on `queue` and blocks for its result until `timeout`.
    ///
    /// On timeout the job keeps running; its result lands on the output
    /// queue and can be collected with [`poll_result`](Self::poll_result).
    ///
    /// # Errors
    ///
    /// As [`submit_and_wait`](Self::submit_and_wait).
    pub fn submit_and_wait_timeout(
        &self,
        job: Pooled<Job>,
        queue: usize,
        timeout: Duration,
    ) -> RtResult<Pooled<JobResult>> {
        self.wait_on(job, queue, Some(timeout))
    }

    fn wait_on(
        &self,
        job: Pooled<Job>,
        queue: usize,
        timeout: Option<Duration>,
    ) -> RtResult<Pooled<JobResult>> {
        let (id, session) = job.key();
        let waiter = {
            let workers = self.workers.read();
            if let Err(e) = self.check_submit(workers.is_some(), session, queue) {
                self.ctx.arena.recycle_job(job);
                return Err(e);
            }
            let Some(waiter) = self.ctx.waiters.register((id, session)) else {
                self.ctx.arena.recycle_job(job);
                return Err(RtServerError::DuplicateJob { id, session });
            };
            if let Err(job) = self.ctx.queues.enqueue_input(job, queue) {
                self.ctx.waiters.cancel((id, session));
                self.ctx.arena.recycle_job(job);
                return Err(RtServerError::InvalidQueue {
                    index: queue,
                    count: self.ctx.queues.len(),
                });
            }
            waiter
        };

        self.ctx
            .waiters
            .wait(waiter, timeout)
            .map_err(|e| match e {
                WaitError::Timeout => {
                    tracing::warn!(job = %id, session = %session, "synchronous shot timed out");
                    RtServerError::Timeout(timeout.unwrap_or_default())
                }
                WaitError::Closed => RtServerError::ShuttingDown,
            })
    }

    /// Removes the first finished result for `session`, without blocking.
    #[must_use]
    pub fn poll_result(&self, session: SessionId) -> Option<Pooled<JobResult>> {
        self.ctx.queues.take_result_for(session)
    }

    /// Blocks until a result for `session` is available, up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`RtServerError::NotRunning`] if the workers are not running
    /// - [`RtServerError::ShuttingDown`] if the server stops while waiting
    /// - [`RtServerError::Timeout`] if the deadline passes
    pub fn wait_result(
        &self,
        session: SessionId,
        timeout: Option<Duration>,
    ) -> RtResult<Pooled<JobResult>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut waited = false;
        loop {
            let seen = self.ctx.queues.output_generation();
            if let Some(result) = self.poll_result(session) {
                return Ok(result);
            }
            if !self.is_running() {
                return Err(if waited {
                    RtServerError::ShuttingDown
                } else {
                    RtServerError::NotRunning
                });
            }
            if self.ctx.queues.wait_for_output(seen, deadline).is_none() {
                return Err(RtServerError::Timeout(timeout.unwrap_or_default()));
            }
            waited = true;
        }
    }

    /// Returns a result and everything it owns to the arena.
    pub fn release_result(&self, result: Pooled<JobResult>) {
        self.ctx.arena.recycle_job_result(result);
    }

    /// Shoots one ray (index 1) against a session and waits for the result.
    ///
    /// # Errors
    ///
    /// As [`submit_and_wait`](Self::submit_and_wait).
    pub fn shoot_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        session: SessionId,
    ) -> RtResult<Pooled<JobResult>> {
        let mut job = self.new_job(session);
        job.rays.push(self.new_ray(origin, direction, 1));
        self.submit_and_wait(job)
    }

    /// Shoots a grid of rays as one job on the array queue and waits for it.
    ///
    /// # Errors
    ///
    /// [`RtServerError::InvalidArray`] for an empty grid, otherwise as
    /// [`submit_and_wait`](Self::submit_and_wait).
    pub fn shoot_array(&self, shot: &ArrayShot, session: SessionId) -> RtResult<Pooled<JobResult>> {
        if shot.rows == 0 || shot.cols == 0 {
            return Err(RtServerError::InvalidArray {
                rows: shot.rows,
                cols: shot.cols,
            });
        }

        let mut job = self.new_job(session);
        job.max_hits = (shot.max_hits > 0).then_some(shot.max_hits);
        job.rays.reserve(shot.rows * shot.cols);
        for row in 0..shot.rows {
            let row_origin = shot.base + shot.row_step * row as f64;
            for col in 0..shot.cols {
                let origin = row_origin + shot.col_step * col as f64;
                let index = i64::try_from(row * shot.cols + col).unwrap_or(i64::MAX);
                job.rays.push(self.new_ray(origin, shot.direction, index));
            }
        }

        self.wait_on(job, ARRAY_QUEUE, self.ctx.config.wait_timeout())
    }

    /// Resource summary.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let queues = &self.ctx.queues;
        ServerStats {
            arena: self.ctx.arena.stats(),
            workers: self.ctx.counters.snapshot(),
            queued_jobs: (0..queues.len()).map(|i| queues.input_len(i)).collect(),
            queued_results: (0..queues.len()).map(|i| queues.output_len(i)).collect(),
            open_sessions: self.ctx.registry.read().open_count(),
            waiting_callers: self.ctx.waiters.len(),
        }
    }

    /// Logs the resource summary at debug level.
    pub fn log_resource_summary(&self) {
        let stats = self.stats();
        tracing::debug!(
            busy = stats.workers.busy,
            peak_busy = stats.workers.peak_busy,
            jobs = stats.workers.jobs_completed,
            rays = stats.workers.rays_shot,
            sessions = stats.open_sessions,
            waiting = stats.waiting_callers,
            "server resources"
        );
        self.ctx.arena.log_summary();
    }

    /// Stops and joins the workers, fails blocked callers, returns every
    /// queued job and result to the arena, drops all sessions and frees the
    /// arena. The server can be loaded and started again afterwards.
    pub fn shutdown(&self) {
        let pool = self.workers.write().take();
        let was_running = pool.is_some();
        if let Some(mut pool) = pool {
            pool.stop();
        }

        let ctx = &self.ctx;
        ctx.waiters.clear();
        for job in ctx.queues.drain_inputs() {
            ctx.arena.recycle_job(job);
        }
        for result in ctx.queues.drain_outputs() {
            ctx.arena.recycle_job_result(result);
        }
        ctx.queues.wake_output_waiters();

        ctx.registry.write().clear();
        ctx.arena.clear();
        ctx.counters.reset();

        if was_running {
            tracing::info!("server shut down");
        }
    }
}

impl Drop for RtServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
