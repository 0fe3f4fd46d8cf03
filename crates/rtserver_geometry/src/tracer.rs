//! # Engine Boundary
//!
//! The traits the server uses to prepare geometry and shoot rays.

use crate::error::LoadResult;
use rtserver_core::{Aabb, Ray, Region, Vec3};
use std::sync::Arc;

/// One solid segment along a ray, as reported by a [`RayTracer`].
///
/// Distances are measured along the unit ray direction.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    /// Entry distance.
    pub in_dist: f64,
    /// Exit distance.
    pub out_dist: f64,
    /// Outward surface normal at entry.
    pub in_normal: Vec3,
    /// Outward surface normal at exit.
    pub out_normal: Vec3,
    /// Region the segment passes through.
    pub region: Arc<Region>,
}

/// Intersection engine for one prepared instance.
///
/// Implementations are shared read-only by every worker thread.
pub trait RayTracer: Send + Sync {
    /// Shoots one ray and returns its partitions ordered by entry distance.
    ///
    /// An empty vector is a miss. `max_partitions` limits the count; `None`
    /// reports them all.
    fn shoot(&self, ray: &Ray, max_partitions: Option<usize>) -> Vec<Partition>;

    /// Bounding box of everything this instance can hit.
    fn bounds(&self) -> Aabb;

    /// Every region this instance contains.
    fn regions(&self) -> &[Arc<Region>];
}

/// A prepared, immutable sub-model.
#[derive(Clone)]
pub struct PreparedInstance {
    /// Instance name.
    pub name: String,
    /// Top-level objects contained in this instance.
    pub objects: Vec<String>,
    /// The engine that shoots against it.
    pub tracer: Arc<dyn RayTracer>,
}

impl std::fmt::Debug for PreparedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedInstance")
            .field("name", &self.name)
            .field("objects", &self.objects)
            .field("regions", &self.tracer.regions().len())
            .finish()
    }
}

/// The output of a geometry load.
#[derive(Clone, Debug)]
pub struct LoadedGeometry {
    /// Model title.
    pub title: String,
    /// Prepared instances, in load order.
    pub instances: Vec<PreparedInstance>,
    /// Union of every instance's bounds.
    pub bounding_box: Aabb,
}

/// Turns a geometry source into prepared instances.
pub trait GeometryLoader: Send + Sync {
    /// Prepares the named objects of `source`, or its default top-level
    /// objects when `object_names` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`](crate::LoadError) if the source cannot be
    /// read or nothing loadable is found.
    fn prepare(&self, source: &str, object_names: Option<&[String]>)
        -> LoadResult<LoadedGeometry>;
}

/// Maps a region to a component id. 0 means unclassified.
pub trait ComponentClassifier: Send + Sync {
    /// Component id for `region`.
    fn classify(&self, region: &Region) -> u32;

    /// Component names indexed by id. Entry 0 names the unclassified bucket.
    fn names(&self) -> &[String];
}
