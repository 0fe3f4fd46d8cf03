//! # Shot Records
//!
//! The data that moves between submitters, queues and workers.
//!
//! ```text
//!   Job ──owns──> [Ray]          JobResult ──owns──> Job
//!                                          └─owns──> [RayResult ──owns──> [Hit]]
//! ```
//!
//! All five record kinds are pooled by the [`ResourceArena`](crate::ResourceArena).

use crate::math::Vec3;
use crate::memory::Pooled;
use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::sync::Arc;

/// Identifier of a session in the registry. Session 0 is the loaded geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    /// The session created by the initial geometry load.
    pub const PRIMARY: Self = Self(0);

    /// Registry slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-visible job identifier. Only `(JobId, SessionId)` pairs are unique.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single ray to shoot.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Ray {
    /// Start point in model space.
    pub origin: Vec3,
    /// Direction in model space. Need not be unit length.
    pub direction: Vec3,
    /// Caller-supplied correlation index, echoed back in the result.
    pub index: i64,
}

impl Ray {
    /// Creates a ray.
    #[must_use]
    pub const fn new(origin: Vec3, direction: Vec3, index: i64) -> Self {
        Self {
            origin,
            direction,
            index,
        }
    }
}

/// A named solid region of the model, as reported by the geometry engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    /// Full path name of the region.
    pub name: String,
    /// Region identifier number.
    pub ident: u32,
    /// Air code. Non-zero marks an air region.
    pub aircode: u32,
    /// Component attribute used to build the component table.
    pub component: Option<String>,
}

impl Region {
    /// Returns true if this region is air.
    #[inline]
    #[must_use]
    pub const fn is_air(&self) -> bool {
        self.aircode != 0
    }
}

/// One solid segment along a ray.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hit {
    /// Distance from the ray origin to the entry point.
    pub hit_dist: f64,
    /// Line-of-sight thickness (exit distance - entry distance).
    pub los: f64,
    /// Surface normal at entry.
    pub enter_normal: Vec3,
    /// Surface normal at exit.
    pub exit_normal: Vec3,
    /// Component id, 0 when unclassified.
    pub comp_id: u32,
    /// Region that produced this hit.
    pub region: Option<Arc<Region>>,
}

impl Hit {
    /// Distance from the ray origin to the exit point.
    #[inline]
    #[must_use]
    pub fn exit_dist(&self) -> f64 {
        self.hit_dist + self.los
    }
}

/// All hits for one ray. An empty hit list is a miss.
#[derive(Debug, Default)]
pub struct RayResult {
    /// Copy of the ray that was shot.
    pub ray: Ray,
    /// Hits ordered by entry distance.
    pub hits: Vec<Pooled<Hit>>,
}

impl RayResult {
    /// Returns true if the ray missed everything.
    #[inline]
    #[must_use]
    pub fn is_miss(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A batch of rays addressed to one session.
#[derive(Debug, Default)]
pub struct Job {
    /// Caller-chosen id.
    pub id: JobId,
    /// Session the rays are shot against.
    pub session_id: SessionId,
    /// Maximum partitions per instance per ray. `None` reports all.
    pub max_hits: Option<usize>,
    /// Rays in submission order.
    pub rays: Vec<Pooled<Ray>>,
}

impl Job {
    /// Correlation key of this job.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> (JobId, SessionId) {
        (self.id, self.session_id)
    }
}

/// The outcome of one job: one [`RayResult`] per submitted ray.
///
/// The consumer owns a result once it has been handed out and must give it
/// back with `ResourceArena::recycle_job_result`.
#[derive(Debug, Default)]
pub struct JobResult {
    /// The job that produced this result.
    pub job: Option<Pooled<Job>>,
    /// One entry per ray, in submission order.
    pub ray_results: Vec<Pooled<RayResult>>,
    /// True if any ray hit anything.
    pub got_some_hits: bool,
}

impl JobResult {
    /// Correlation key of the originating job.
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<(JobId, SessionId)> {
        self.job.as_ref().map(|job| job.key())
    }

    /// Session of the originating job.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.job.as_ref().map(|job| job.session_id)
    }

    /// Total number of hits across all rays.
    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.ray_results.iter().map(|rr| rr.hits.len()).sum()
    }
}
