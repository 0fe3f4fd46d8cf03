//! # RTSERVER Geometry
//!
//! Everything the server needs from a geometry engine, behind three traits:
//!
//! - [`GeometryLoader`]: turns a source into prepared, immutable instances
//! - [`RayTracer`]: shoots one ray against one prepared instance
//! - [`ComponentClassifier`]: maps a region to a small component id
//!
//! The crate also ships a reference engine: [`SceneLoader`] reads TOML scene
//! files made of spheres and boxes, and [`ComponentTable`] classifies regions
//! by their `component` attribute.
//!
//! ## Scene Format
//!
//! ```toml
//! title = "test article"
//!
//! [rtserver]
//! tops = ["hull"]
//!
//! [[objects]]
//! name = "hull"
//!
//! [[objects.regions]]
//! name = "hull/armor.r"
//! ident = 1000
//! component = "armor"
//! shape = { type = "sphere", center = [0.0, 0.0, 0.0], radius = 1.0 }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod components;
pub mod csg;
pub mod error;
pub mod scene;
pub mod tracer;

pub use components::ComponentTable;
pub use csg::{Primitive, Span};
pub use error::{LoadError, LoadResult};
pub use scene::{CsgTracer, SceneDescription, SceneLoader};
pub use tracer::{
    ComponentClassifier, GeometryLoader, LoadedGeometry, Partition, PreparedInstance, RayTracer,
};
