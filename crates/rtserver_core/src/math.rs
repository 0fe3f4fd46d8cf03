//! Double-precision geometry types.
//!
//! Model space is measured in millimetres, so everything is `f64`.

use bytemuck::{Pod, Zeroable};
use glam::{DMat3, DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a matrix is treated as singular.
const SINGULAR_EPSILON: f64 = 1.0e-12;

/// 3D vector - point or direction
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Vec3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Unit X vector
    pub const X: Self = Self::new(1.0, 0.0, 0.0);

    /// Unit Y vector
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);

    /// Unit Z vector
    pub const Z: Self = Self::new(0.0, 0.0, 1.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Dot product
    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Length squared (avoids sqrt)
    #[inline]
    #[must_use]
    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    /// Length
    #[inline]
    #[must_use]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len < SINGULAR_EPSILON || !len.is_finite() {
            None
        } else {
            Some(self * (1.0 / len))
        }
    }

    /// Component-wise minimum
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Approximate equality, per component.
    #[must_use]
    pub fn approx_eq(self, other: Self, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl From<[f64; 3]> for Vec3 {
    fn from(arr: [f64; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }
}

impl From<Vec3> for [f64; 3] {
    fn from(v: Vec3) -> Self {
        v.to_array()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl From<DVec3> for Vec3 {
    fn from(v: DVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for DVec3 {
    fn from(v: Vec3) -> Self {
        DVec3::new(v.x, v.y, v.z)
    }
}

/// 4x4 affine transform over [`glam::DMat4`], taking and returning [`Vec3`].
///
/// Points are column vectors: `p' = M * [x y z 1]^T`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat4(pub DMat4);

impl Mat4 {
    /// Identity transform
    pub const IDENTITY: Self = Self(DMat4::IDENTITY);

    /// Pure translation
    #[must_use]
    pub fn from_translation(t: Vec3) -> Self {
        Self(DMat4::from_translation(t.into()))
    }

    /// Per-axis scale about the origin
    #[must_use]
    pub fn from_scale(s: Vec3) -> Self {
        Self(DMat4::from_scale(s.into()))
    }

    /// Right-handed rotation about +Z, in radians.
    #[must_use]
    pub fn from_rotation_z(angle: f64) -> Self {
        Self(DMat4::from_rotation_z(angle))
    }

    /// Transforms a point, including translation.
    #[inline]
    #[must_use]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.0.transform_point3(p.into()).into()
    }

    /// Transforms a direction with the upper 3x3 block only.
    #[inline]
    #[must_use]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.0.transform_vector3(v.into()).into()
    }

    /// Inverse, or `None` when the matrix is singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.0.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        Some(Self(self.0.inverse()))
    }

    /// Inverse-transpose of the upper 3x3 block, the matrix that carries
    /// surface normals. `None` when that block is singular.
    #[must_use]
    pub fn normal_matrix(&self) -> Option<Self> {
        let linear = DMat3::from_mat4(self.0);
        let det = linear.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return None;
        }
        Some(Self(DMat4::from_mat3(linear.inverse().transpose())))
    }
}

impl std::ops::Mul for Mat4 {
    type Output = Self;
    /// `self * rhs` applies `rhs` first.
    fn mul(self, rhs: Self) -> Self {
        Self(self.0 * rhs.0)
    }
}

impl From<DMat4> for Mat4 {
    fn from(m: DMat4) -> Self {
        Self(m)
    }
}

/// Axis-aligned bounding box.
///
/// The empty box has `min = +inf` and `max = -inf` so that any union
/// replaces it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// The empty box.
    pub const EMPTY: Self = Self {
        min: Vec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
        max: Vec3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
    };

    /// Creates a box from two corners.
    #[must_use]
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Returns true if nothing has been added to the box.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grows the box to contain `p`.
    pub fn union_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grows the box to contain `other`.
    pub fn union(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        self.union_point(other.min);
        self.union_point(other.max);
    }

    /// Centre of the box
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along each axis
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Returns true if `p` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1.0e-9;

    #[test]
    fn test_vec3_ops() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(a + b, Vec3::new(5.0, 7.0, 9.0));
        assert_eq!(b - a, Vec3::new(3.0, 3.0, 3.0));
        assert_eq!(-a, Vec3::new(-1.0, -2.0, -3.0));
        assert!((a.dot(b) - 32.0).abs() < TOL);
        assert_eq!(Vec3::X.cross(Vec3::Y), Vec3::Z);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert!(Vec3::ZERO.normalized().is_none());
        let n = Vec3::new(0.0, 3.0, 4.0).normalized().unwrap();
        assert!((n.length() - 1.0).abs() < TOL);
    }

    #[test]
    fn test_translation_moves_points_not_vectors() {
        let m = Mat4::from_translation(Vec3::new(10.0, 0.0, -5.0));
        assert!(m.transform_point(Vec3::ZERO).approx_eq(Vec3::new(10.0, 0.0, -5.0), TOL));
        assert!(m.transform_vector(Vec3::X).approx_eq(Vec3::X, TOL));
    }

    #[test]
    fn test_rotation_z_quarter_turn() {
        let m = Mat4::from_rotation_z(std::f64::consts::FRAC_PI_2);
        assert!(m.transform_vector(Vec3::X).approx_eq(Vec3::Y, TOL));
    }

    #[test]
    fn test_inverse_undoes_transform() {
        let m = Mat4::from_translation(Vec3::new(3.0, -2.0, 7.0))
            * Mat4::from_rotation_z(0.7)
            * Mat4::from_scale(Vec3::new(2.0, 2.0, 0.5));
        let inv = m.inverse().unwrap();
        let p = Vec3::new(1.5, -4.0, 9.0);
        assert!(inv.transform_point(m.transform_point(p)).approx_eq(p, TOL));
        assert!((m * inv).0.abs_diff_eq(DMat4::IDENTITY, TOL));
    }

    #[test]
    fn test_singular_matrix_has_no_inverse() {
        let m = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert!(m.inverse().is_none());
        assert!(m.normal_matrix().is_none());
    }

    #[test]
    fn test_normal_matrix_under_non_uniform_scale() {
        // Unit sphere squashed to an ellipsoid 4 tall: the surface point
        // (0.8, 0.6, 0) moves to (0.8, 2.4, 0) and its normal tilts toward X.
        let m = Mat4::from_scale(Vec3::new(1.0, 4.0, 1.0));
        let n = m
            .normal_matrix()
            .unwrap()
            .transform_vector(Vec3::new(0.8, 0.6, 0.0))
            .normalized()
            .unwrap();
        assert!(n.approx_eq(Vec3::new(0.8, 0.15, 0.0).normalized().unwrap(), TOL));
        // Still perpendicular to the carried tangent.
        let tangent = m.transform_vector(Vec3::new(-0.6, 0.8, 0.0));
        assert!(n.dot(tangent).abs() < TOL);
    }

    #[test]
    fn test_aabb_union() {
        let mut b = Aabb::EMPTY;
        assert!(b.is_empty());
        b.union(&Aabb::EMPTY);
        assert!(b.is_empty());

        b.union_point(Vec3::new(1.0, 1.0, 1.0));
        b.union(&Aabb::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.5)));
        assert!(!b.is_empty());
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 1.0));
        assert!(b.contains(Vec3::new(0.0, 1.0, 0.5)));
    }
}
