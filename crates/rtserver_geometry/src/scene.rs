//! # Scene Loader
//!
//! Reference [`GeometryLoader`] reading TOML scene files.
//!
//! A scene is a list of named objects, each made of regions, and each region
//! is a single primitive. The `[rtserver]` table names the default top-level
//! objects and whether each top is prepared as its own instance
//! (articulated) or all are combined into one.

use crate::csg::Primitive;
use crate::error::{LoadError, LoadResult};
use crate::tracer::{GeometryLoader, LoadedGeometry, Partition, PreparedInstance, RayTracer};
use rtserver_core::{Aabb, Ray, Region};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Instance name used when all tops are combined into one instance.
pub const COMBINED_INSTANCE_NAME: &str = "main";

/// Parsed scene file.
#[derive(Clone, Debug, Deserialize)]
pub struct SceneDescription {
    /// Model title.
    #[serde(default)]
    pub title: String,
    /// Server settings stored with the model.
    #[serde(default)]
    pub rtserver: Option<ServerTable>,
    /// Every object in the file.
    #[serde(default)]
    pub objects: Vec<ObjectDescription>,
}

/// The `[rtserver]` table of a scene.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerTable {
    /// Objects loaded when the caller names none.
    #[serde(default)]
    pub tops: Vec<String>,
    /// Prepare one instance per top instead of one combined instance.
    #[serde(default)]
    pub articulated: bool,
}

/// A named object.
#[derive(Clone, Debug, Deserialize)]
pub struct ObjectDescription {
    /// Object name.
    pub name: String,
    /// Regions making up the object.
    #[serde(default)]
    pub regions: Vec<RegionDescription>,
}

/// A region: one primitive plus its identification attributes.
#[derive(Clone, Debug, Deserialize)]
pub struct RegionDescription {
    /// Region name.
    pub name: String,
    /// Region identifier number.
    #[serde(default)]
    pub ident: u32,
    /// Air code, 0 for solid material.
    #[serde(default)]
    pub aircode: u32,
    /// Component attribute.
    #[serde(default)]
    pub component: Option<String>,
    /// The solid.
    pub shape: Primitive,
}

impl SceneDescription {
    /// Parses a scene from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Parse`] if the text is not a valid scene.
    pub fn parse(text: &str) -> LoadResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Prepares the named objects, or the default tops.
    ///
    /// # Errors
    ///
    /// - [`LoadError::ArticulationWithObjects`] if the scene is articulated
    ///   and `object_names` is given
    /// - [`LoadError::NoTopObjects`] if there is nothing to load
    /// - [`LoadError::UnknownObject`] for a name not in the scene
    /// - [`LoadError::InvalidPrimitive`] for a degenerate solid
    pub fn build(&self, object_names: Option<&[String]>) -> LoadResult<LoadedGeometry> {
        let table = self.rtserver.clone().unwrap_or_default();
        let explicit = object_names.filter(|names| !names.is_empty());

        let tops: Vec<String> = match explicit {
            Some(_) if table.articulated => return Err(LoadError::ArticulationWithObjects),
            Some(names) => names.to_vec(),
            None => table.tops.clone(),
        };
        if tops.is_empty() {
            return Err(LoadError::NoTopObjects);
        }

        let by_name: HashMap<&str, &ObjectDescription> =
            self.objects.iter().map(|o| (o.name.as_str(), o)).collect();

        let mut resolved = Vec::with_capacity(tops.len());
        for top in &tops {
            let object = by_name
                .get(top.as_str())
                .ok_or_else(|| LoadError::UnknownObject(top.clone()))?;
            resolved.push(*object);
        }

        let instances = if table.articulated {
            resolved
                .iter()
                .map(|object| {
                    let tracer = CsgTracer::from_objects(std::slice::from_ref(object))?;
                    Ok(PreparedInstance {
                        name: object.name.clone(),
                        objects: vec![object.name.clone()],
                        tracer: Arc::new(tracer),
                    })
                })
                .collect::<LoadResult<Vec<_>>>()?
        } else {
            vec![PreparedInstance {
                name: COMBINED_INSTANCE_NAME.to_string(),
                objects: tops,
                tracer: Arc::new(CsgTracer::from_objects(&resolved)?),
            }]
        };

        let mut bounding_box = Aabb::EMPTY;
        for instance in &instances {
            bounding_box.union(&instance.tracer.bounds());
        }

        tracing::info!(
            title = %self.title,
            instances = instances.len(),
            articulated = table.articulated,
            "scene prepared"
        );

        Ok(LoadedGeometry {
            title: self.title.clone(),
            instances,
            bounding_box,
        })
    }
}

/// Loads scenes from disk, or from sources registered in memory.
#[derive(Clone, Debug, Default)]
pub struct SceneLoader {
    inline: HashMap<String, String>,
}

impl SceneLoader {
    /// Creates a loader that reads scene files from disk.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers scene text under `name`. Registered names shadow files.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.inline.insert(name.into(), text.into());
        self
    }

    fn read(&self, source: &str) -> LoadResult<String> {
        if let Some(text) = self.inline.get(source) {
            return Ok(text.clone());
        }
        std::fs::read_to_string(Path::new(source)).map_err(|source_err| LoadError::Io {
            path: source.to_string(),
            source: source_err,
        })
    }
}

impl GeometryLoader for SceneLoader {
    fn prepare(
        &self,
        source: &str,
        object_names: Option<&[String]>,
    ) -> LoadResult<LoadedGeometry> {
        let text = self.read(source)?;
        SceneDescription::parse(&text)?.build(object_names)
    }
}

#[derive(Debug)]
struct Solid {
    shape: Primitive,
    region: Arc<Region>,
}

/// [`RayTracer`] over a flat list of primitive regions.
#[derive(Debug)]
pub struct CsgTracer {
    solids: Vec<Solid>,
    regions: Vec<Arc<Region>>,
    bounds: Aabb,
}

impl CsgTracer {
    fn from_objects(objects: &[&ObjectDescription]) -> LoadResult<Self> {
        let mut solids = Vec::new();
        let mut bounds = Aabb::EMPTY;

        for object in objects {
            for desc in &object.regions {
                desc.shape
                    .validate()
                    .map_err(|reason| LoadError::InvalidPrimitive {
                        region: desc.name.clone(),
                        reason,
                    })?;
                bounds.union(&desc.shape.bounds());
                solids.push(Solid {
                    shape: desc.shape,
                    region: Arc::new(Region {
                        name: desc.name.clone(),
                        ident: desc.ident,
                        aircode: desc.aircode,
                        component: desc.component.clone(),
                    }),
                });
            }
        }

        let regions = solids.iter().map(|s| Arc::clone(&s.region)).collect();
        Ok(Self {
            solids,
            regions,
            bounds,
        })
    }
}

impl RayTracer for CsgTracer {
    fn shoot(&self, ray: &Ray, max_partitions: Option<usize>) -> Vec<Partition> {
        let Some(dir) = ray.direction.normalized() else {
            return Vec::new();
        };

        let mut partitions: Vec<Partition> = self
            .solids
            .iter()
            .filter_map(|solid| {
                let span = solid.shape.intersect(ray.origin, dir)?;
                if span.t_out < 0.0 {
                    return None;
                }
                Some(Partition {
                    in_dist: span.t_in,
                    out_dist: span.t_out,
                    in_normal: span.n_in,
                    out_normal: span.n_out,
                    region: Arc::clone(&solid.region),
                })
            })
            .collect();

        partitions.sort_by(|a, b| a.in_dist.total_cmp(&b.in_dist));
        if let Some(limit) = max_partitions {
            partitions.truncate(limit);
        }
        partitions
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtserver_core::Vec3;

    const TWO_SPHERES: &str = r#"
        title = "two spheres"

        [rtserver]
        tops = ["left", "right"]

        [[objects]]
        name = "left"

        [[objects.regions]]
        name = "left/ball.r"
        ident = 100
        component = "ball"
        shape = { type = "sphere", center = [0.0, 0.0, 0.0], radius = 1.0 }

        [[objects]]
        name = "right"

        [[objects.regions]]
        name = "right/block.r"
        ident = 200
        shape = { type = "rpp", min = [5.0, -1.0, -1.0], max = [7.0, 1.0, 1.0] }
    "#;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_default_tops_build_one_instance() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let geometry = scene.build(None).unwrap();

        assert_eq!(geometry.title, "two spheres");
        assert_eq!(geometry.instances.len(), 1);
        assert_eq!(geometry.instances[0].name, COMBINED_INSTANCE_NAME);
        assert_eq!(geometry.instances[0].objects, names(&["left", "right"]));
        assert_eq!(geometry.bounding_box.min, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(geometry.bounding_box.max, Vec3::new(7.0, 1.0, 1.0));
    }

    #[test]
    fn test_partitions_sorted_and_limited() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let geometry = scene.build(None).unwrap();
        let tracer = &geometry.instances[0].tracer;

        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), 0);
        let all = tracer.shoot(&ray, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].region.name, "left/ball.r");
        assert!((all[0].in_dist - 9.0).abs() < 1.0e-9);
        assert_eq!(all[1].region.name, "right/block.r");
        assert!((all[1].in_dist - 15.0).abs() < 1.0e-9);

        assert_eq!(tracer.shoot(&ray, Some(1)).len(), 1);
    }

    #[test]
    fn test_partitions_behind_origin_dropped() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let geometry = scene.build(None).unwrap();
        let ray = Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::X, 0);
        let hits = geometry.instances[0].tracer.shoot(&ray, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].region.ident, 200);
    }

    #[test]
    fn test_zero_direction_is_a_miss() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let geometry = scene.build(None).unwrap();
        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::ZERO, 0);
        assert!(geometry.instances[0].tracer.shoot(&ray, None).is_empty());
    }

    #[test]
    fn test_explicit_objects_override_tops() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let geometry = scene.build(Some(names(&["right"]).as_slice())).unwrap();
        assert_eq!(geometry.instances[0].objects, names(&["right"]));
        assert_eq!(geometry.instances[0].tracer.regions().len(), 1);
    }

    #[test]
    fn test_articulated_builds_instance_per_top() {
        let text = TWO_SPHERES.replace(
            "tops = [\"left\", \"right\"]",
            "tops = [\"left\", \"right\"]\n        articulated = true",
        );
        let scene = SceneDescription::parse(&text).unwrap();
        let geometry = scene.build(None).unwrap();
        assert_eq!(geometry.instances.len(), 2);
        assert_eq!(geometry.instances[1].name, "right");

        let err = scene.build(Some(names(&["left"]).as_slice())).unwrap_err();
        assert!(matches!(err, LoadError::ArticulationWithObjects));
    }

    #[test]
    fn test_load_errors() {
        let scene = SceneDescription::parse(TWO_SPHERES).unwrap();
        let err = scene.build(Some(names(&["nope"]).as_slice())).unwrap_err();
        assert!(matches!(err, LoadError::UnknownObject(name) if name == "nope"));

        let bare = SceneDescription::parse("title = \"empty\"").unwrap();
        assert!(matches!(bare.build(None), Err(LoadError::NoTopObjects)));

        assert!(matches!(
            SceneDescription::parse("objects = 5"),
            Err(LoadError::Parse(_))
        ));

        let loader = SceneLoader::new();
        assert!(matches!(
            loader.prepare("/nonexistent/scene.toml", None),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn test_inline_source() {
        let loader = SceneLoader::new().with_source("mem:two", TWO_SPHERES);
        let geometry = loader.prepare("mem:two", None).unwrap();
        assert_eq!(geometry.instances[0].tracer.regions().len(), 2);
    }
}
