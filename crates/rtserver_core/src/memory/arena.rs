//! # Resource Arena
//!
//! Thread-safe free lists for every pooled record kind.
//!
//! One lock guards all free lists. Acquire and release are O(1) and reuse is
//! LIFO, so the most recently released (cache-warm) record comes back first.

use crate::record::{Hit, Job, JobResult, Ray, RayResult};
use bytemuck::Zeroable;
use parking_lot::Mutex;
use std::any::Any;

/// A record owned through the arena.
pub type Pooled<T> = Box<T>;

/// The pooled record kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolKind {
    /// [`Ray`]
    Ray = 0,
    /// [`Hit`]
    Hit = 1,
    /// [`RayResult`]
    RayResult = 2,
    /// [`Job`]
    Job = 3,
    /// [`JobResult`]
    JobResult = 4,
}

impl PoolKind {
    /// Number of kinds.
    pub const COUNT: usize = 5;

    /// Every kind, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Ray,
        Self::Hit,
        Self::RayResult,
        Self::Job,
        Self::JobResult,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ray => "ray",
            Self::Hit => "hit",
            Self::RayResult => "ray_result",
            Self::Job => "job",
            Self::JobResult => "job_result",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// A record that can live in the arena.
pub trait Poolable: Default + Send + 'static {
    /// Which free list this record belongs to.
    const KIND: PoolKind;

    /// Returns the record to its zeroed state. Vectors are cleared but keep
    /// their capacity.
    fn reset(&mut self);
}

impl Poolable for Ray {
    const KIND: PoolKind = PoolKind::Ray;

    fn reset(&mut self) {
        *self = Self::zeroed();
    }
}

impl Poolable for Hit {
    const KIND: PoolKind = PoolKind::Hit;

    fn reset(&mut self) {
        self.hit_dist = 0.0;
        self.los = 0.0;
        self.enter_normal = Zeroable::zeroed();
        self.exit_normal = Zeroable::zeroed();
        self.comp_id = 0;
        self.region = None;
    }
}

impl Poolable for RayResult {
    const KIND: PoolKind = PoolKind::RayResult;

    fn reset(&mut self) {
        self.ray = Ray::zeroed();
        self.hits.clear();
    }
}

impl Poolable for Job {
    const KIND: PoolKind = PoolKind::Job;

    fn reset(&mut self) {
        self.id = Default::default();
        self.session_id = Default::default();
        self.max_hits = None;
        self.rays.clear();
    }
}

impl Poolable for JobResult {
    const KIND: PoolKind = PoolKind::JobResult;

    fn reset(&mut self) {
        self.job = None;
        self.ray_results.clear();
        self.got_some_hits = false;
    }
}

/// Counters for one record kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindStats {
    /// The kind these counters describe.
    pub kind: PoolKind,
    /// Records created because the free list was empty.
    pub fresh: u64,
    /// Acquires served from the free list.
    pub reused: u64,
    /// Records released back to the free list.
    pub released: u64,
    /// Records currently on the free list.
    pub free: usize,
}

/// Snapshot of the arena counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// Per-kind counters, indexed like [`PoolKind::ALL`].
    pub kinds: [KindStats; PoolKind::COUNT],
}

impl ArenaStats {
    /// Counters for one kind.
    #[must_use]
    pub fn kind(&self, kind: PoolKind) -> &KindStats {
        &self.kinds[kind.index()]
    }

    /// Records created across all kinds.
    #[must_use]
    pub fn total_fresh(&self) -> u64 {
        self.kinds.iter().map(|k| k.fresh).sum()
    }

    /// Records sitting on free lists across all kinds.
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.kinds.iter().map(|k| k.free).sum()
    }
}

#[derive(Default)]
struct FreeList {
    records: Vec<Box<dyn Any + Send>>,
    fresh: u64,
    reused: u64,
    released: u64,
}

/// Pool of reusable records shared by submitters and workers.
///
/// # Example
///
/// ```rust
/// use rtserver_core::{PoolKind, Ray, ResourceArena};
///
/// let arena = ResourceArena::new();
/// for _ in 0..100 {
///     let ray = arena.acquire::<Ray>();
///     arena.release(ray);
/// }
/// assert_eq!(arena.stats().kind(PoolKind::Ray).fresh, 1);
/// ```
pub struct ResourceArena {
    lists: Mutex<[FreeList; PoolKind::COUNT]>,
}

impl Default for ResourceArena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceArena")
            .field("free", &self.stats().total_free())
            .finish()
    }
}

impl ResourceArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(std::array::from_fn(|_| FreeList::default())),
        }
    }

    /// Takes a zeroed record, reusing the most recently released one.
    #[must_use]
    pub fn acquire<T: Poolable>(&self) -> Pooled<T> {
        let recycled = {
            let mut lists = self.lists.lock();
            let list = &mut lists[T::KIND.index()];
            let record = list.records.pop();
            if record.is_some() {
                list.reused += 1;
            } else {
                list.fresh += 1;
            }
            record
        };

        match recycled.map(<Box<dyn Any + Send>>::downcast::<T>) {
            Some(Ok(record)) => record,
            _ => Pooled::<T>::default(),
        }
    }

    /// Returns a record to its free list.
    ///
    /// Children still attached are dropped rather than pooled; use the
    /// `recycle_*` helpers to return a whole graph.
    pub fn release<T: Poolable>(&self, mut record: Pooled<T>) {
        record.reset();
        let mut lists = self.lists.lock();
        let list = &mut lists[T::KIND.index()];
        list.released += 1;
        list.records.push(record);
    }

    /// Returns a job and all of its rays.
    pub fn recycle_job(&self, mut job: Pooled<Job>) {
        for ray in job.rays.drain(..) {
            self.release(ray);
        }
        self.release(job);
    }

    /// Returns a ray result and all of its hits.
    pub fn recycle_ray_result(&self, mut result: Pooled<RayResult>) {
        for hit in result.hits.drain(..) {
            self.release(hit);
        }
        self.release(result);
    }

    /// Returns a job result, its job, and everything below them.
    pub fn recycle_job_result(&self, mut result: Pooled<JobResult>) {
        for ray_result in result.ray_results.drain(..) {
            self.recycle_ray_result(ray_result);
        }
        if let Some(job) = result.job.take() {
            self.recycle_job(job);
        }
        self.release(result);
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let lists = self.lists.lock();
        ArenaStats {
            kinds: PoolKind::ALL.map(|kind| {
                let list = &lists[kind.index()];
                KindStats {
                    kind,
                    fresh: list.fresh,
                    reused: list.reused,
                    released: list.released,
                    free: list.records.len(),
                }
            }),
        }
    }

    /// Frees every pooled record. Counters are kept.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut lists = self.lists.lock();
            lists
                .iter_mut()
                .map(|list| std::mem::take(&mut list.records))
                .collect()
        };
        // Dropped outside the lock.
        drop(drained);
    }

    /// Logs one line per kind at debug level.
    pub fn log_summary(&self) {
        for k in &self.stats().kinds {
            tracing::debug!(
                kind = k.kind.name(),
                fresh = k.fresh,
                reused = k.reused,
                released = k.released,
                free = k.free,
                "arena usage"
            );
        }
    }
}
