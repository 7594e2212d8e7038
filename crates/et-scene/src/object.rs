//! Mesh instances

use crate::math::{Aabb, Transform3};
use crate::mesh::SoundMesh;
use std::sync::Arc;

/// Stable identity of an object within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    /// Build an id from its raw value. Only ids handed out by a scene
    /// resolve against that scene; this exists for tests and tooling.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A rigid instance of a mesh in the scene.
///
/// Multiple objects may share one mesh. The transform may change between
/// frames; the scene recomputes world bounds on `refresh`.
#[derive(Debug, Clone)]
pub struct SoundObject {
    id: ObjectId,
    mesh: Arc<SoundMesh>,
    transform: Transform3,
    world_bounds: Aabb,
}

impl SoundObject {
    pub(crate) fn new(id: ObjectId, mesh: Arc<SoundMesh>, transform: Transform3) -> Self {
        let mut object = Self {
            id,
            mesh,
            transform,
            world_bounds: Aabb::EMPTY,
        };
        object.update_world_bounds();
        object
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn mesh(&self) -> &Arc<SoundMesh> {
        &self.mesh
    }

    #[inline]
    pub fn transform(&self) -> &Transform3 {
        &self.transform
    }

    /// Move or reorient the object. Takes effect at the next scene refresh.
    pub fn set_transform(&mut self, transform: Transform3) {
        self.transform = transform;
        self.update_world_bounds();
    }

    /// World-space bounds derived from the mesh bounding sphere.
    #[inline]
    pub fn world_bounds(&self) -> &Aabb {
        &self.world_bounds
    }

    fn update_world_bounds(&mut self) {
        let sphere = self.mesh.bounding_sphere();
        let center = self.transform.point_to_world(sphere.center);
        let radius = sphere.radius * self.transform.scale;
        self.world_bounds = Aabb::new(
            center - glam::Vec3::splat(radius),
            center + glam::Vec3::splat(radius),
        );
    }
}
