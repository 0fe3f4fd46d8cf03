//! # Primitive Solids
//!
//! Exact ray intersection for the solids the reference engine supports.

use rtserver_core::{Aabb, Vec3};
use serde::Deserialize;

/// Directions with a component smaller than this are parallel to a slab.
const PARALLEL_EPSILON: f64 = 1.0e-12;

/// A primitive solid.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Primitive {
    /// Sphere.
    Sphere {
        /// Centre point.
        center: Vec3,
        /// Radius, must be positive.
        radius: f64,
    },
    /// Axis-aligned rectangular parallelepiped.
    Rpp {
        /// Minimum corner.
        min: Vec3,
        /// Maximum corner.
        max: Vec3,
    },
}

/// Entry and exit of a ray through one solid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Span {
    /// Entry distance.
    pub t_in: f64,
    /// Exit distance.
    pub t_out: f64,
    /// Outward normal at entry.
    pub n_in: Vec3,
    /// Outward normal at exit.
    pub n_out: Vec3,
}

impl Primitive {
    /// Checks the parameters, returning a description of the first problem.
    ///
    /// # Errors
    ///
    /// Returns the reason the primitive is degenerate.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Sphere { radius, .. } => {
                if radius > 0.0 && radius.is_finite() {
                    Ok(())
                } else {
                    Err(format!("sphere radius must be positive, got {radius}"))
                }
            }
            Self::Rpp { min, max } => {
                if min.x < max.x && min.y < max.y && min.z < max.z {
                    Ok(())
                } else {
                    Err("rpp min corner must be below max corner on every axis".to_string())
                }
            }
        }
    }

    /// Bounding box of the solid.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        match *self {
            Self::Sphere { center, radius } => {
                let r = Vec3::new(radius, radius, radius);
                Aabb::new(center - r, center + r)
            }
            Self::Rpp { min, max } => Aabb::new(min, max),
        }
    }

    /// Intersects a ray with a unit-length `dir`.
    ///
    /// Returns the full span along the infinite line; callers drop spans
    /// behind the origin. Tangent grazes are misses.
    #[must_use]
    pub fn intersect(&self, origin: Vec3, dir: Vec3) -> Option<Span> {
        match *self {
            Self::Sphere { center, radius } => intersect_sphere(center, radius, origin, dir),
            Self::Rpp { min, max } => intersect_rpp(min, max, origin, dir),
        }
    }
}

fn intersect_sphere(center: Vec3, radius: f64, origin: Vec3, dir: Vec3) -> Option<Span> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc <= 0.0 {
        return None;
    }

    let s = disc.sqrt();
    let t_in = -b - s;
    let t_out = -b + s;
    let inv_r = 1.0 / radius;
    Some(Span {
        t_in,
        t_out,
        n_in: (origin + dir * t_in - center) * inv_r,
        n_out: (origin + dir * t_out - center) * inv_r,
    })
}

fn intersect_rpp(min: Vec3, max: Vec3, origin: Vec3, dir: Vec3) -> Option<Span> {
    let o = origin.to_array();
    let d = dir.to_array();
    let lo = min.to_array();
    let hi = max.to_array();

    let mut t_in = f64::NEG_INFINITY;
    let mut t_out = f64::INFINITY;
    let mut n_in = Vec3::ZERO;
    let mut n_out = Vec3::ZERO;

    for axis in 0..3 {
        if d[axis].abs() < PARALLEL_EPSILON {
            if o[axis] < lo[axis] || o[axis] > hi[axis] {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d[axis];
        let (near, far) = {
            let t0 = (lo[axis] - o[axis]) * inv;
            let t1 = (hi[axis] - o[axis]) * inv;
            if t0 < t1 {
                (t0, t1)
            } else {
                (t1, t0)
            }
        };

        // Entering through the face the ray travels towards.
        let sign = if d[axis] > 0.0 { 1.0 } else { -1.0 };
        if near > t_in {
            t_in = near;
            n_in = axis_normal(axis, -sign);
        }
        if far < t_out {
            t_out = far;
            n_out = axis_normal(axis, sign);
        }
    }

    if t_out <= t_in {
        return None;
    }
    Some(Span {
        t_in,
        t_out,
        n_in,
        n_out,
    })
}

fn axis_normal(axis: usize, sign: f64) -> Vec3 {
    match axis {
        0 => Vec3::new(sign, 0.0, 0.0),
        1 => Vec3::new(0.0, sign, 0.0),
        _ => Vec3::new(0.0, 0.0, sign),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1.0e-9;

    #[test]
    fn test_sphere_through_center() {
        let sphere = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        let span = sphere.intersect(Vec3::new(-100.0, 0.0, 0.0), Vec3::X).unwrap();
        assert!((span.t_in - 99.0).abs() < TOL);
        assert!((span.t_out - 101.0).abs() < TOL);
        assert!(span.n_in.approx_eq(-Vec3::X, TOL));
        assert!(span.n_out.approx_eq(Vec3::X, TOL));
    }

    #[test]
    fn test_sphere_miss_and_graze() {
        let sphere = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        assert!(sphere.intersect(Vec3::new(-100.0, 5.0, 0.0), Vec3::X).is_none());
        assert!(sphere.intersect(Vec3::new(-100.0, 1.0, 0.0), Vec3::X).is_none());
    }

    #[test]
    fn test_rpp_slabs() {
        let rpp = Primitive::Rpp {
            min: Vec3::new(-1.0, -2.0, -3.0),
            max: Vec3::new(1.0, 2.0, 3.0),
        };
        let span = rpp.intersect(Vec3::new(0.0, -10.0, 0.0), Vec3::Y).unwrap();
        assert!((span.t_in - 8.0).abs() < TOL);
        assert!((span.t_out - 12.0).abs() < TOL);
        assert_eq!(span.n_in, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(span.n_out, Vec3::new(0.0, 1.0, 0.0));

        let span = rpp.intersect(Vec3::new(0.0, 0.0, 10.0), -Vec3::Z).unwrap();
        assert!((span.t_in - 7.0).abs() < TOL);
        assert_eq!(span.n_in, Vec3::Z);
        assert_eq!(span.n_out, -Vec3::Z);
    }

    #[test]
    fn test_rpp_parallel_outside_misses() {
        let rpp = Primitive::Rpp {
            min: Vec3::new(-1.0, -1.0, -1.0),
            max: Vec3::new(1.0, 1.0, 1.0),
        };
        assert!(rpp.intersect(Vec3::new(-10.0, 5.0, 0.0), Vec3::X).is_none());
    }

    #[test]
    fn test_validate() {
        let bad = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 0.0,
        };
        assert!(bad.validate().is_err());
        let bad = Primitive::Rpp {
            min: Vec3::ZERO,
            max: Vec3::new(1.0, 0.0, 1.0),
        };
        assert!(bad.validate().is_err());
    }
}
