//! # RTSERVER Core
//!
//! Shared building blocks of the raytrace server:
//! - [`math`]: double-precision points, vectors, transforms and boxes
//! - [`record`]: the pooled records that flow between submitters and workers
//! - [`memory`]: the [`ResourceArena`] that recycles those records
//!
//! ## Ownership Rules
//!
//! 1. A record handed out by the arena is zeroed with no children attached
//! 2. A record is unlinked from its children before it goes back to the arena
//! 3. A [`Job`] belongs to exactly one party at a time: submitter, queue, worker
//!
//! ## Example
//!
//! ```rust
//! use rtserver_core::{Job, Ray, ResourceArena, Vec3};
//!
//! let arena = ResourceArena::new();
//! let mut job = arena.acquire::<Job>();
//! let mut ray = arena.acquire::<Ray>();
//! ray.origin = Vec3::new(-100.0, 0.0, 0.0);
//! ray.direction = Vec3::X;
//! job.rays.push(ray);
//! arena.recycle_job(job);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod math;
pub mod memory;
pub mod record;

pub use math::{Aabb, Mat4, Vec3};
pub use memory::{ArenaStats, KindStats, PoolKind, Poolable, Pooled, ResourceArena};
pub use record::{Hit, Job, JobId, JobResult, Ray, RayResult, Region, SessionId};
