//! Ray queries against a scene
//!
//! The `RayTracer` answers the three question shapes the propagation engine
//! asks: closest hit (probe reflection), binary occlusion (path validation)
//! and all hits (transmission through boundaries). Queries walk the scene's
//! object BVH, transform the ray into each candidate object's space and walk
//! that mesh's triangle BVH. Distances are kept in world units throughout.

use crate::math::Ray3;
use crate::mesh::MeshTriangle;
use crate::object::{ObjectId, SoundObject};
use crate::scene::SceneGeometry;
use glam::Vec3;

/// A triangle identified by its object and index: the stable identity used
/// in caches and path descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectSpaceTriangle {
    pub object: ObjectId,
    pub triangle: u32,
}

impl ObjectSpaceTriangle {
    /// Stable hash mixing the object and triangle ids.
    #[inline]
    pub fn hash_code(&self) -> u64 {
        (self.object.raw() as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(1)
            ^ (self.triangle as u64).wrapping_mul(0x85EB_CA6B)
    }
}

/// A triangle with its corners and plane brought into world space.
#[derive(Debug, Clone, Copy)]
pub struct WorldSpaceTriangle {
    pub v1: Vec3,
    pub v2: Vec3,
    pub v3: Vec3,
    pub plane: crate::math::Plane3,
    pub triangle: ObjectSpaceTriangle,
}

impl WorldSpaceTriangle {
    /// Resolve `triangle` against the scene, if its object still exists.
    pub fn resolve(geometry: &SceneGeometry<'_>, triangle: ObjectSpaceTriangle) -> Option<Self> {
        let object = geometry.object(triangle.object)?;
        let mesh = object.mesh();
        if triangle.triangle as usize >= mesh.triangles().len() {
            return None;
        }
        let [a, b, c] = mesh.triangle_corners(triangle.triangle);
        let transform = object.transform();
        let plane = transform.plane_to_world(mesh.triangle(triangle.triangle).plane());
        Some(Self {
            v1: transform.point_to_world(a),
            v2: transform.point_to_world(b),
            v3: transform.point_to_world(c),
            plane,
            triangle,
        })
    }

    /// World-space corners of edge `edge` (canonical edge order).
    pub fn edge_vertices(&self, edge: usize) -> (Vec3, Vec3) {
        match edge {
            0 => (self.v1, self.v2),
            1 => (self.v1, self.v3),
            _ => (self.v2, self.v3),
        }
    }

    /// World-space corner not on edge `edge`.
    pub fn free_vertex(&self, edge: usize) -> Vec3 {
        match edge {
            0 => self.v3,
            1 => self.v2,
            _ => self.v1,
        }
    }
}

/// A closest-hit result.
#[derive(Debug, Clone, Copy)]
pub struct ProbeHit {
    /// Distance along the ray in world units.
    pub distance: f32,
    pub triangle: ObjectSpaceTriangle,
}

/// One boundary crossing found by a transmission ray.
#[derive(Debug, Clone, Copy)]
pub struct TransmissionHit {
    pub distance: f32,
    pub triangle: ObjectSpaceTriangle,
}

/// Möller-Trumbore ray/triangle intersection.
///
/// `direction` need not be unit length; the returned parameter is in units
/// of its length. Returns the distance along the ray, or None.
pub fn ray_triangle_intersection(
    origin: Vec3,
    direction: Vec3,
    v1: Vec3,
    v2: Vec3,
    v3: Vec3,
) -> Option<f32> {
    let edge1 = v2 - v1;
    let edge2 = v3 - v1;
    let pvec = direction.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < f32::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - v1;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(edge1);
    let v = direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(qvec) * inv_det;
    (t > 0.0).then_some(t)
}

/// Ray queries over one frame's immutable scene geometry.
pub struct RayTracer<'a> {
    geometry: SceneGeometry<'a>,
}

impl<'a> RayTracer<'a> {
    pub fn new(geometry: SceneGeometry<'a>) -> Self {
        Self { geometry }
    }

    #[inline]
    pub fn geometry(&self) -> &SceneGeometry<'a> {
        &self.geometry
    }

    /// The closest triangle hit by `ray`, if any.
    pub fn closest_hit(&self, ray: &Ray3) -> Option<ProbeHit> {
        let mut best: Option<ProbeHit> = None;
        self.geometry.bvh.traverse(ray, f32::INFINITY, |index, t_max| {
            let object = &self.geometry.objects[index as usize];
            let mut nearest = t_max;
            if let Some(hit) = closest_hit_in_object(object, ray, nearest) {
                nearest = hit.distance;
                best = Some(hit);
            }
            nearest
        });
        best
    }

    /// Whether anything blocks `ray` within `max_distance`.
    pub fn occluded(&self, ray: &Ray3, max_distance: f32) -> bool {
        if max_distance <= 0.0 {
            return false;
        }
        let mut blocked = false;
        self.geometry.bvh.traverse(ray, max_distance, |index, t_max| {
            let object = &self.geometry.objects[index as usize];
            if closest_hit_in_object(object, ray, t_max).is_some() {
                blocked = true;
                return 0.0;
            }
            t_max
        });
        blocked
    }

    /// Collect every boundary crossing within `max_distance` into `hits`,
    /// unsorted. Returns true if any were found.
    pub fn all_hits(&self, ray: &Ray3, max_distance: f32, hits: &mut Vec<TransmissionHit>) -> bool {
        hits.clear();
        self.geometry.bvh.traverse(ray, max_distance, |index, t_max| {
            let object = &self.geometry.objects[index as usize];
            collect_hits_in_object(object, ray, max_distance, hits);
            t_max
        });
        !hits.is_empty()
    }
}

fn closest_hit_in_object(object: &SoundObject, ray: &Ray3, t_max: f32) -> Option<ProbeHit> {
    let transform = object.transform();
    // Directions keep their world length through the inverse transform, so
    // the BVH parameter stays in world units.
    let local = Ray3::new(
        transform.point_to_object(ray.origin),
        transform.vector_to_object(ray.direction),
    );
    let mesh = object.mesh();
    let mut best: Option<ProbeHit> = None;
    mesh.bvh().traverse(&local, t_max, |index, t_nearest| {
        let [a, b, c] = mesh.triangle_corners(index);
        match ray_triangle_intersection(local.origin, local.direction, a, b, c) {
            Some(t) if t < t_nearest => {
                best = Some(ProbeHit {
                    distance: t,
                    triangle: ObjectSpaceTriangle {
                        object: object.id(),
                        triangle: index,
                    },
                });
                t
            }
            _ => t_nearest,
        }
    });
    best
}

fn collect_hits_in_object(
    object: &SoundObject,
    ray: &Ray3,
    max_distance: f32,
    hits: &mut Vec<TransmissionHit>,
) {
    let transform = object.transform();
    let local = Ray3::new(
        transform.point_to_object(ray.origin),
        transform.vector_to_object(ray.direction),
    );
    let mesh = object.mesh();
    mesh.bvh().traverse(&local, max_distance, |index, t_max| {
        let [a, b, c] = mesh.triangle_corners(index);
        if let Some(t) = ray_triangle_intersection(local.origin, local.direction, a, b, c) {
            if t <= max_distance {
                hits.push(TransmissionHit {
                    distance: t,
                    triangle: ObjectSpaceTriangle {
                        object: object.id(),
                        triangle: index,
                    },
                });
            }
        }
        t_max
    });
}

/// Look up the triangle record behind an `ObjectSpaceTriangle`.
pub fn resolve_triangle<'a>(
    geometry: &'a SceneGeometry<'a>,
    triangle: ObjectSpaceTriangle,
) -> Option<(&'a SoundObject, &'a MeshTriangle)> {
    let object = geometry.object(triangle.object)?;
    let mesh = object.mesh();
    mesh.triangles()
        .get(triangle.triangle as usize)
        .map(|t| (object, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::vec3;

    #[test]
    fn moller_trumbore_hits_inside() {
        let t = ray_triangle_intersection(
            vec3(0.25, 0.25, -3.0),
            Vec3::Z,
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        assert_relative_eq!(t.unwrap(), 3.0);
    }

    #[test]
    fn moller_trumbore_misses_outside() {
        let t = ray_triangle_intersection(
            vec3(0.9, 0.9, -3.0),
            Vec3::Z,
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        assert!(t.is_none());
    }

    #[test]
    fn moller_trumbore_ignores_behind() {
        let t = ray_triangle_intersection(
            vec3(0.25, 0.25, 3.0),
            Vec3::Z,
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        assert!(t.is_none());
    }

    #[test]
    fn parallel_ray_misses() {
        let t = ray_triangle_intersection(
            vec3(0.0, 0.0, -1.0),
            Vec3::X,
            vec3(0.0, 0.0, 0.0),
            vec3(1.0, 0.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        assert!(t.is_none());
    }
}
