//! # Session Registry
//!
//! A growable table of sessions. Slot 0 holds the geometry as loaded; every
//! other slot is a copy of slot 0 that shares the prepared geometry and owns
//! its own transforms.
//!
//! ## Lifecycle
//!
//! ```text
//!   load_geometry ──> slot 0 valid, unused
//!   open_session  ──> first call: 0        later calls: copy of 0 in a free slot
//!   close_session ──> 0: unused, transforms cleared    other: slot freed
//! ```
//!
//! Workers snapshot a session's instance list (an `Arc` clone) and shoot
//! without holding the registry lock. Transform updates are copy-on-write,
//! so an in-flight job keeps the transforms it started with.

use crate::error::{RtResult, RtServerError};
use rtserver_core::{Aabb, Mat4, Ray, SessionId, Vec3};
use rtserver_geometry::{
    ComponentClassifier, ComponentTable, GeometryLoader, LoadedGeometry, PreparedInstance,
    RayTracer,
};
use std::sync::Arc;

/// Placement of an instance, with its precomputed inverse and normal matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Maps instance coordinates to model coordinates.
    pub matrix: Mat4,
    /// Maps model coordinates to instance coordinates.
    pub inverse: Mat4,
    /// Maps instance normals to model normals.
    pub normal: Mat4,
}

impl Transform {
    /// Creates a transform, or `None` if `matrix` is singular.
    #[must_use]
    pub fn new(matrix: Mat4) -> Option<Self> {
        Some(Self {
            matrix,
            inverse: matrix.inverse()?,
            normal: matrix.normal_matrix()?,
        })
    }
}

/// One raytraceable sub-model of a session.
#[derive(Clone)]
pub struct RtInstance {
    /// Instance name.
    pub name: String,
    /// Top-level objects it contains.
    pub objects: Vec<String>,
    /// Shared, immutable prepared geometry.
    pub tracer: Arc<dyn RayTracer>,
    /// Placement. `None` is identity.
    pub transform: Option<Transform>,
}

impl std::fmt::Debug for RtInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtInstance")
            .field("name", &self.name)
            .field("objects", &self.objects)
            .field("transform", &self.transform)
            .finish_non_exhaustive()
    }
}

impl RtInstance {
    fn from_prepared(prepared: PreparedInstance) -> Self {
        Self {
            name: prepared.name,
            objects: prepared.objects,
            tracer: prepared.tracer,
            transform: None,
        }
    }

    fn untransformed(&self) -> Self {
        Self {
            transform: None,
            ..self.clone()
        }
    }

    /// Maps a model-space ray into this instance's coordinates.
    #[must_use]
    pub fn to_local(&self, ray: &Ray) -> Ray {
        match &self.transform {
            Some(t) => Ray::new(
                t.inverse.transform_point(ray.origin),
                t.inverse.transform_vector(ray.direction),
                ray.index,
            ),
            None => *ray,
        }
    }

    /// Model-space bounds, the corners of the local box carried through
    /// the transform.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        let local = self.tracer.bounds();
        let Some(t) = &self.transform else {
            return local;
        };
        if local.is_empty() {
            return local;
        }
        let mut bounds = Aabb::EMPTY;
        for corner in 0..8u8 {
            let pick = |bit: u8, lo: f64, hi: f64| if corner & bit == 0 { lo } else { hi };
            let p = Vec3::new(
                pick(1, local.min.x, local.max.x),
                pick(2, local.min.y, local.max.y),
                pick(4, local.min.z, local.max.z),
            );
            bounds.union_point(t.matrix.transform_point(p));
        }
        bounds
    }

    /// Factor turning a distance along `local` (from [`to_local`]) into
    /// a distance along `model`.
    ///
    /// [`to_local`]: Self::to_local
    #[must_use]
    pub fn distance_scale(&self, model: &Ray, local: &Ray) -> f64 {
        if self.transform.is_none() {
            return 1.0;
        }
        let local_len = local.direction.length();
        let model_len = model.direction.length();
        if local_len > 0.0 && model_len.is_finite() && local_len.is_finite() {
            model_len / local_len
        } else {
            1.0
        }
    }

    /// Maps an instance-space normal back into model coordinates.
    #[must_use]
    pub fn to_model_normal(&self, normal: Vec3) -> Vec3 {
        match &self.transform {
            Some(t) => {
                let mapped = t.normal.transform_vector(normal);
                mapped.normalized().unwrap_or(mapped)
            }
            None => normal,
        }
    }
}

/// A session: an ordered instance list and its bounds.
#[derive(Clone, Debug)]
pub struct Session {
    /// Registry slot.
    pub id: SessionId,
    /// Instances, shared with in-flight jobs.
    pub instances: Arc<Vec<RtInstance>>,
    /// Union of the instance bounds.
    pub bounding_box: Aabb,
}

impl Session {
    fn bounds_of(instances: &[RtInstance]) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for instance in instances {
            bounds.union(&instance.bounds());
        }
        bounds
    }
}

/// What a worker needs to shoot one job.
#[derive(Clone)]
pub struct SessionSnapshot {
    /// Instances as they were when the snapshot was taken.
    pub instances: Arc<Vec<RtInstance>>,
    /// Component classifier built at load time.
    pub classifier: Option<Arc<dyn ComponentClassifier>>,
}

/// Table of open sessions.
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
    primary_open: bool,
    title: String,
    classifier: Option<Arc<dyn ComponentClassifier>>,
    slot_block: usize,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("slots", &self.slots.len())
            .field("open", &self.open_count())
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Creates an empty registry that grows `slot_block` slots at a time.
    #[must_use]
    pub fn new(slot_block: usize) -> Self {
        Self {
            slots: Vec::new(),
            primary_open: false,
            title: String::new(),
            classifier: None,
            slot_block: slot_block.max(1),
        }
    }

    /// Loads geometry into session 0, discarding every existing session first.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::Load`] if the loader fails. The registry is
    /// left empty in that case.
    pub fn load_geometry(
        &mut self,
        loader: &dyn GeometryLoader,
        source: &str,
        object_names: Option<&[String]>,
        use_air: bool,
        classify_components: bool,
    ) -> RtResult<SessionId> {
        self.clear();
        let geometry = loader.prepare(source, object_names)?;
        let classifier: Option<Arc<dyn ComponentClassifier>> = if classify_components {
            let regions = geometry
                .instances
                .iter()
                .flat_map(|instance| instance.tracer.regions().iter().map(|r| &**r));
            Some(Arc::new(ComponentTable::build(regions, use_air)))
        } else {
            None
        };
        Ok(self.install(geometry, classifier))
    }

    /// Installs already-prepared geometry as session 0.
    pub fn install(
        &mut self,
        geometry: LoadedGeometry,
        classifier: Option<Arc<dyn ComponentClassifier>>,
    ) -> SessionId {
        self.clear();
        let instances: Vec<RtInstance> = geometry
            .instances
            .into_iter()
            .map(RtInstance::from_prepared)
            .collect();

        self.slots = (0..self.slot_block).map(|_| None).collect();
        self.slots[0] = Some(Session {
            id: SessionId::PRIMARY,
            instances: Arc::new(instances),
            bounding_box: geometry.bounding_box,
        });
        self.title = geometry.title;
        self.classifier = classifier;

        tracing::info!(title = %self.title, "geometry loaded into session 0");
        SessionId::PRIMARY
    }

    /// Returns true once geometry is loaded.
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self.slots.first(), Some(Some(_)))
    }

    /// Opens a session.
    ///
    /// The first call returns session 0. Later calls copy session 0 into
    /// the lowest free slot, growing the table when it is full.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::NoGeometry`] if nothing is loaded.
    pub fn open_session(&mut self) -> RtResult<SessionId> {
        let Some(Some(primary)) = self.slots.first() else {
            return Err(RtServerError::NoGeometry);
        };

        if !self.primary_open {
            self.primary_open = true;
            return Ok(SessionId::PRIMARY);
        }

        let instances: Vec<RtInstance> =
            primary.instances.iter().map(RtInstance::untransformed).collect();
        let bounding_box = Session::bounds_of(&instances);

        let index = match self.slots.iter().skip(1).position(Option::is_none) {
            Some(pos) => pos + 1,
            None => {
                let index = self.slots.len();
                self.slots.resize_with(index + self.slot_block, || None);
                index
            }
        };

        let id = SessionId(u32::try_from(index).map_err(|_| {
            RtServerError::Config(format!("session table cannot grow past {index} slots"))
        })?);
        self.slots[index] = Some(Session {
            id,
            instances: Arc::new(instances),
            bounding_box,
        });

        tracing::info!(session = %id, "session opened");
        Ok(id)
    }

    /// Closes a session. Closing session 0 only marks it unused and clears
    /// its transforms. Unknown or already-closed ids are ignored.
    pub fn close_session(&mut self, id: SessionId) {
        if id == SessionId::PRIMARY {
            if self.is_loaded() {
                self.primary_open = false;
                self.clear_transforms(id);
                tracing::info!(session = %id, "session closed");
            }
            return;
        }

        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.take().is_some() {
                tracing::info!(session = %id, "session closed");
            }
        }
    }

    /// Removes every transform of a session.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::InvalidSession`] if the session is not open.
    pub fn reset_transforms(&mut self, id: SessionId) -> RtResult<()> {
        if self.session(id).is_none() {
            return Err(RtServerError::InvalidSession(id));
        }
        self.clear_transforms(id);
        Ok(())
    }

    fn clear_transforms(&mut self, id: SessionId) {
        if let Some(Some(session)) = self.slots.get_mut(id.index()) {
            if session.instances.iter().any(|i| i.transform.is_some()) {
                for instance in Arc::make_mut(&mut session.instances) {
                    instance.transform = None;
                }
                session.bounding_box = Session::bounds_of(&session.instances);
            }
        }
    }

    /// Places one instance of a session.
    ///
    /// # Errors
    ///
    /// - [`RtServerError::InvalidSession`] if the session is not open
    /// - [`RtServerError::InvalidInstance`] if the index is out of range
    /// - [`RtServerError::SingularTransform`] if `matrix` has no inverse
    pub fn set_transform(
        &mut self,
        id: SessionId,
        instance: usize,
        matrix: Mat4,
    ) -> RtResult<()> {
        let Some(Some(session)) = self.slots.get_mut(id.index()) else {
            return Err(RtServerError::InvalidSession(id));
        };
        if instance >= session.instances.len() {
            return Err(RtServerError::InvalidInstance {
                session: id,
                index: instance,
            });
        }
        let transform = Transform::new(matrix).ok_or(RtServerError::SingularTransform)?;
        Arc::make_mut(&mut session.instances)[instance].transform = Some(transform);
        session.bounding_box = Session::bounds_of(&session.instances);
        Ok(())
    }

    /// Returns an open session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns true if jobs may be addressed to `id`.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, id: SessionId) -> bool {
        self.session(id).is_some()
    }

    /// Takes what a worker needs to shoot against `id`.
    #[must_use]
    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.session(id).map(|session| SessionSnapshot {
            instances: Arc::clone(&session.instances),
            classifier: self.classifier.clone(),
        })
    }

    /// Bounding box of a session.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::InvalidSession`] if the session is not open.
    pub fn bounding_box(&self, id: SessionId) -> RtResult<Aabb> {
        self.session(id)
            .map(|s| s.bounding_box)
            .ok_or(RtServerError::InvalidSession(id))
    }

    /// Title of the loaded model.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Component names indexed by id.
    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        self.classifier
            .as_ref()
            .map(|c| c.names().to_vec())
            .unwrap_or_default()
    }

    /// Number of sessions in use, counting session 0 only while open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        let copies = self.slots.iter().skip(1).filter(|s| s.is_some()).count();
        copies + usize::from(self.primary_open)
    }

    /// Number of slots, used or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drops every session and the loaded geometry.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.primary_open = false;
        self.title.clear();
        self.classifier = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtserver_geometry::SceneLoader;

    const SCENE: &str = r#"
        title = "registry test"

        [rtserver]
        tops = ["ball"]

        [[objects]]
        name = "ball"

        [[objects.regions]]
        name = "ball.r"
        ident = 1
        component = "ball"
        shape = { type = "sphere", center = [0.0, 0.0, 0.0], radius = 1.0 }
    "#;

    fn loaded(block: usize) -> SessionRegistry {
        let loader = SceneLoader::new().with_source("scene", SCENE);
        let mut registry = SessionRegistry::new(block);
        registry
            .load_geometry(&loader, "scene", None, false, true)
            .unwrap();
        registry
    }

    #[test]
    fn test_open_without_geometry() {
        let mut registry = SessionRegistry::new(5);
        assert!(matches!(registry.open_session(), Err(RtServerError::NoGeometry)));
    }

    #[test]
    fn test_first_open_is_session_zero() {
        let mut registry = loaded(5);
        assert_eq!(registry.open_session().unwrap(), SessionId(0));
        assert_eq!(registry.open_session().unwrap(), SessionId(1));
        assert_eq!(registry.open_session().unwrap(), SessionId(2));
        assert_eq!(registry.title(), "registry test");
        assert_eq!(registry.component_names(), vec!["unclassified", "ball"]);
    }

    #[test]
    fn test_table_grows_in_blocks_and_reuses_slots() {
        let mut registry = loaded(2);
        registry.open_session().unwrap();
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.open_session().unwrap(), SessionId(1));
        assert_eq!(registry.open_session().unwrap(), SessionId(2));
        assert_eq!(registry.capacity(), 4);

        registry.close_session(SessionId(1));
        assert!(!registry.is_valid(SessionId(1)));
        assert_eq!(registry.open_session().unwrap(), SessionId(1));
        assert_eq!(registry.open_count(), 3);
    }

    #[test]
    fn test_close_primary_is_idempotent() {
        let mut registry = loaded(5);
        registry.open_session().unwrap();
        registry
            .set_transform(SessionId(0), 0, Mat4::from_translation(Vec3::X))
            .unwrap();

        registry.close_session(SessionId(0));
        let once = registry.session(SessionId(0)).unwrap().instances[0].transform;
        let count_once = registry.open_count();
        registry.close_session(SessionId(0));

        assert!(once.is_none());
        assert!(registry.is_valid(SessionId(0)));
        assert_eq!(registry.open_count(), count_once);
        assert_eq!(registry.open_session().unwrap(), SessionId(0));
    }

    #[test]
    fn test_close_unknown_is_noop() {
        let mut registry = loaded(5);
        registry.close_session(SessionId(3));
        registry.close_session(SessionId(999));
        assert!(registry.is_valid(SessionId(0)));
    }

    #[test]
    fn test_copies_start_untransformed_and_isolated() {
        let mut registry = loaded(5);
        registry.open_session().unwrap();
        registry
            .set_transform(SessionId(0), 0, Mat4::from_translation(Vec3::Y))
            .unwrap();
        let copy = registry.open_session().unwrap();

        let snapshot = registry.snapshot(copy).unwrap();
        assert!(snapshot.instances[0].transform.is_none());
        assert!(Arc::ptr_eq(
            &snapshot.instances[0].tracer,
            &registry.snapshot(SessionId(0)).unwrap().instances[0].tracer
        ));

        registry
            .set_transform(copy, 0, Mat4::from_translation(Vec3::Z))
            .unwrap();
        // The earlier snapshot is not affected.
        assert!(snapshot.instances[0].transform.is_none());
    }

    #[test]
    fn test_set_transform_errors() {
        let mut registry = loaded(5);
        assert!(matches!(
            registry.set_transform(SessionId(0), 4, Mat4::IDENTITY),
            Err(RtServerError::InvalidInstance { index: 4, .. })
        ));
        assert!(matches!(
            registry.set_transform(SessionId(0), 0, Mat4::from_scale(Vec3::ZERO)),
            Err(RtServerError::SingularTransform)
        ));
        assert!(matches!(
            registry.reset_transforms(SessionId(7)),
            Err(RtServerError::InvalidSession(SessionId(7)))
        ));
    }

    #[test]
    fn test_to_local_applies_inverse() {
        let registry = {
            let mut r = loaded(5);
            r.set_transform(SessionId(0), 0, Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)))
                .unwrap();
            r
        };
        let snapshot = registry.snapshot(SessionId(0)).unwrap();
        let ray = Ray::new(Vec3::new(10.0, 0.0, -5.0), Vec3::Z, 3);
        let local = snapshot.instances[0].to_local(&ray);
        assert!(local.origin.approx_eq(Vec3::new(0.0, 0.0, -5.0), 1.0e-12));
        assert_eq!(local.direction, Vec3::Z);
        assert_eq!(local.index, 3);
    }

    #[test]
    fn test_failed_load_leaves_registry_empty() {
        let mut registry = loaded(5);
        let loader = SceneLoader::new();
        assert!(registry
            .load_geometry(&loader, "/nonexistent.toml", None, false, true)
            .is_err());
        assert!(!registry.is_loaded());
    }

    #[test]
    fn test_scaled_instance_maps_distances_and_normals() {
        let mut registry = loaded(5);
        registry.open_session().unwrap();
        registry
            .set_transform(SessionId(0), 0, Mat4::from_scale(Vec3::new(1.0, 4.0, 1.0)))
            .unwrap();
        let session = registry.session(SessionId(0)).unwrap();
        let instance = &session.instances[0];

        let model = Ray::new(Vec3::new(-10.0, 2.4, 0.0), Vec3::X, 0);
        let local = instance.to_local(&model);
        assert!(local.origin.approx_eq(Vec3::new(-10.0, 0.6, 0.0), 1e-12));
        assert!((instance.distance_scale(&model, &local) - 1.0).abs() < 1e-12);

        // Local entry point (-0.8, 0.6, 0) on the unit sphere.
        let normal = instance.to_model_normal(Vec3::new(-0.8, 0.6, 0.0));
        let expected = Vec3::new(-0.8, 0.15, 0.0).normalized().unwrap();
        assert!(normal.approx_eq(expected, 1e-9));

        let mut registry = loaded(5);
        registry.open_session().unwrap();
        registry
            .set_transform(SessionId(0), 0, Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0)))
            .unwrap();
        let instance = &registry.session(SessionId(0)).unwrap().instances[0];
        let local = instance.to_local(&model);
        assert!((instance.distance_scale(&model, &local) - 2.0).abs() < 1e-12);
    }
}
