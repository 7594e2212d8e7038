//! Geometric primitives shared by the scene and the propagation engine

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// An infinite oriented plane `dot(normal, p) + d = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane3 {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane3 {
    /// Plane through `point` with the given unit normal.
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    /// Plane through three points, normal oriented by winding (CCW front).
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self::from_point_normal(a, normal)
    }

    /// Signed distance from `point` to the plane, positive on the normal side.
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Mirror `point` across the plane.
    #[inline]
    pub fn reflect_point(&self, point: Vec3) -> Vec3 {
        point - 2.0 * self.signed_distance(point) * self.normal
    }

    /// The same plane facing the other way.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            d: -self.d,
        }
    }
}

/// A ray with unit (or caller-chosen) direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray3 {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray3 {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// The point at parameter `t` along the ray.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut bounds = Self::EMPTY;
        for point in points {
            bounds.expand_to(point);
        }
        bounds
    }

    pub fn expand_to(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test: does `ray` hit the box within `[0, t_max]`?
    ///
    /// `inv_direction` is the component-wise reciprocal of the ray
    /// direction; infinities from zero components fall out correctly.
    #[inline]
    pub fn intersects_ray(&self, ray: &Ray3, inv_direction: Vec3, t_max: f32) -> bool {
        let t0 = (self.min - ray.origin) * inv_direction;
        let t1 = (self.max - ray.origin) * inv_direction;
        let t_near = t0.min(t1);
        let t_far = t0.max(t1);
        let enter = t_near.max_element().max(0.0);
        let exit = t_far.min_element().min(t_max);
        enter <= exit
    }
}

/// A rigid transform with uniform scale: object space to world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    /// Translation applied after rotation and scale.
    pub position: Vec3,
    /// Orthonormal rotation, columns are the object basis in world space.
    pub orientation: Mat3,
    /// Uniform scale factor, must be positive.
    pub scale: f32,
}

impl Transform3 {
    pub fn new(position: Vec3, orientation: Mat3, scale: f32) -> Self {
        Self {
            position,
            orientation,
            scale,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Mat3::IDENTITY,
            scale: 1.0,
        }
    }

    #[inline]
    pub fn point_to_world(&self, point: Vec3) -> Vec3 {
        self.orientation * (point * self.scale) + self.position
    }

    #[inline]
    pub fn point_to_object(&self, point: Vec3) -> Vec3 {
        (self.orientation.transpose() * (point - self.position)) / self.scale
    }

    #[inline]
    pub fn vector_to_world(&self, vector: Vec3) -> Vec3 {
        self.orientation * (vector * self.scale)
    }

    #[inline]
    pub fn vector_to_object(&self, vector: Vec3) -> Vec3 {
        (self.orientation.transpose() * vector) / self.scale
    }

    /// Transform a plane into world space.
    pub fn plane_to_world(&self, plane: &Plane3) -> Plane3 {
        let normal = self.orientation * plane.normal;
        // Any point on the object-space plane maps to a world-space point.
        let point = self.point_to_world(plane.normal * -plane.d);
        Plane3::from_point_normal(point, normal)
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Mat3::IDENTITY,
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::vec3;

    #[test]
    fn plane_reflection_mirrors_distance() {
        let plane = Plane3::from_point_normal(vec3(0.0, 1.0, 0.0), Vec3::Y);
        let reflected = plane.reflect_point(vec3(2.0, 4.0, -1.0));
        assert_relative_eq!(reflected.y, -2.0);
        assert_relative_eq!(reflected.x, 2.0);
        assert_relative_eq!(reflected.z, -1.0);
    }

    #[test]
    fn plane_from_points_faces_winding() {
        let plane = Plane3::from_points(Vec3::ZERO, Vec3::X, Vec3::Y);
        assert_relative_eq!(plane.normal.z, 1.0);
        assert!(plane.signed_distance(vec3(0.0, 0.0, 2.0)) > 0.0);
    }

    #[test]
    fn aabb_slab_test() {
        let bounds = Aabb::new(vec3(-1.0, -1.0, -1.0), vec3(1.0, 1.0, 1.0));
        let ray = Ray3::new(vec3(0.0, 0.0, -5.0), Vec3::Z);
        let inv = ray.direction.recip();
        assert!(bounds.intersects_ray(&ray, inv, f32::INFINITY));
        assert!(!bounds.intersects_ray(&ray, inv, 1.0));

        let miss = Ray3::new(vec3(3.0, 0.0, -5.0), Vec3::Z);
        assert!(!bounds.intersects_ray(&miss, miss.direction.recip(), f32::INFINITY));
    }

    #[test]
    fn transform_round_trips() {
        let transform = Transform3::new(
            vec3(1.0, 2.0, 3.0),
            Mat3::from_rotation_y(0.7),
            2.0,
        );
        let point = vec3(-4.0, 0.5, 9.0);
        let there = transform.point_to_world(point);
        let back = transform.point_to_object(there);
        assert_relative_eq!(back.x, point.x, epsilon = 1.0e-5);
        assert_relative_eq!(back.y, point.y, epsilon = 1.0e-5);
        assert_relative_eq!(back.z, point.z, epsilon = 1.0e-5);
    }

    #[test]
    fn plane_transform_preserves_membership() {
        let transform = Transform3::new(vec3(0.0, 5.0, 0.0), Mat3::from_rotation_x(1.1), 3.0);
        let plane = Plane3::from_point_normal(vec3(0.0, 1.0, 0.0), Vec3::Y);
        let world_plane = transform.plane_to_world(&plane);
        let on_plane = transform.point_to_world(vec3(7.0, 1.0, -2.0));
        assert_relative_eq!(world_plane.signed_distance(on_plane), 0.0, epsilon = 1.0e-4);
    }
}
