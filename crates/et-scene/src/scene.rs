//! The sound scene
//!
//! A scene owns its objects and sources behind stable handles and keeps a
//! BVH over object world bounds. Object transforms may change between
//! frames; call `refresh` afterwards so ray queries see the new bounds.

use crate::bvh::Bvh;
use crate::math::Transform3;
use crate::mesh::SoundMesh;
use crate::object::{ObjectId, SoundObject};
use crate::source::SoundSource;
use log::debug;
use std::sync::Arc;

/// Speed of sound in dry air at room temperature, m/s.
pub const DEFAULT_SPEED_OF_SOUND: f32 = 343.0;

/// A set of objects and sources that sound propagates through.
#[derive(Debug)]
pub struct SoundScene {
    /// Objects sorted by id (ids are handed out monotonically).
    objects: Vec<SoundObject>,
    sources: Vec<SoundSource>,
    object_bvh: Bvh,
    bvh_dirty: bool,
    next_object_id: u32,
    speed_of_sound: f32,
}

/// Immutable view of a scene's geometry for ray queries, disjoint from the
/// mutable source list so the propagator can update per-source caches while
/// tracing.
#[derive(Clone, Copy)]
pub struct SceneGeometry<'a> {
    pub objects: &'a [SoundObject],
    pub bvh: &'a Bvh,
    pub speed_of_sound: f32,
}

impl<'a> SceneGeometry<'a> {
    /// Resolve an object by id. Ids are sorted, so this is a binary search.
    pub fn object(&self, id: ObjectId) -> Option<&'a SoundObject> {
        self.objects
            .binary_search_by_key(&id, |object| object.id())
            .ok()
            .map(|index| &self.objects[index])
    }
}

impl Default for SoundScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundScene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            sources: Vec::new(),
            object_bvh: Bvh::default(),
            bvh_dirty: false,
            next_object_id: 0,
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
        }
    }

    #[inline]
    pub fn speed_of_sound(&self) -> f32 {
        self.speed_of_sound
    }

    /// Set the medium's speed of sound in world units per second. Must match
    /// the scene's spatial units or delays and Doppler shifts will be off.
    pub fn set_speed_of_sound(&mut self, speed_of_sound: f32) {
        self.speed_of_sound = speed_of_sound.max(0.0);
    }

    /// Add a mesh instance and return its handle.
    pub fn add_object(&mut self, mesh: Arc<SoundMesh>, transform: Transform3) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.push(SoundObject::new(id, mesh, transform));
        self.bvh_dirty = true;
        id
    }

    /// Remove an object. Cached paths through it stop validating and age out.
    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        match self.objects.binary_search_by_key(&id, |object| object.id()) {
            Ok(index) => {
                self.objects.remove(index);
                self.bvh_dirty = true;
                true
            }
            Err(_) => false,
        }
    }

    pub fn object(&self, id: ObjectId) -> Option<&SoundObject> {
        self.objects
            .binary_search_by_key(&id, |object| object.id())
            .ok()
            .map(|index| &self.objects[index])
    }

    /// Mutable object access; marks the object BVH for rebuild.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SoundObject> {
        self.bvh_dirty = true;
        self.objects
            .binary_search_by_key(&id, |object| object.id())
            .ok()
            .map(|index| &mut self.objects[index])
    }

    #[inline]
    pub fn objects(&self) -> &[SoundObject] {
        &self.objects
    }

    #[inline]
    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// Add a source; the returned index stays valid until a removal.
    pub fn add_source(&mut self, source: SoundSource) -> usize {
        self.sources.push(source);
        self.sources.len() - 1
    }

    pub fn remove_source(&mut self, index: usize) -> Option<SoundSource> {
        (index < self.sources.len()).then(|| self.sources.remove(index))
    }

    #[inline]
    pub fn sources(&self) -> &[SoundSource] {
        &self.sources
    }

    #[inline]
    pub fn sources_mut(&mut self) -> &mut [SoundSource] {
        &mut self.sources
    }

    #[inline]
    pub fn source(&self, index: usize) -> Option<&SoundSource> {
        self.sources.get(index)
    }

    #[inline]
    pub fn source_mut(&mut self, index: usize) -> Option<&mut SoundSource> {
        self.sources.get_mut(index)
    }

    #[inline]
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Rebuild the object BVH if any object moved, was added or removed.
    pub fn refresh(&mut self) {
        if !self.bvh_dirty {
            return;
        }
        let bounds: Vec<_> = self.objects.iter().map(|o| *o.world_bounds()).collect();
        self.object_bvh = Bvh::build(&bounds);
        self.bvh_dirty = false;
        debug!("rebuilt scene BVH over {} objects", self.objects.len());
    }

    /// Split into an immutable geometry view and the mutable source list.
    ///
    /// Refreshes the object BVH first so queries are consistent.
    pub fn split_sources(&mut self) -> (SceneGeometry<'_>, &mut [SoundSource]) {
        self.refresh();
        (
            SceneGeometry {
                objects: &self.objects,
                bvh: &self.object_bvh,
                speed_of_sound: self.speed_of_sound,
            },
            &mut self.sources,
        )
    }

    /// Immutable geometry view; `refresh` must have run since the last
    /// object mutation.
    pub fn geometry(&self) -> SceneGeometry<'_> {
        SceneGeometry {
            objects: &self.objects,
            bvh: &self.object_bvh,
            speed_of_sound: self.speed_of_sound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Ray3;
    use crate::mesh::SoundTriangle;
    use crate::ray::RayTracer;
    use et_core::SoundMaterial;
    use glam::{vec3, Vec3};

    fn wall_mesh() -> Arc<SoundMesh> {
        let vertices = vec![
            vec3(-1.0, -1.0, 0.0),
            vec3(1.0, -1.0, 0.0),
            vec3(1.0, 1.0, 0.0),
            vec3(-1.0, 1.0, 0.0),
        ];
        let triangles = [
            SoundTriangle::new(0, 1, 2, 0),
            SoundTriangle::new(0, 2, 3, 0),
        ];
        Arc::new(SoundMesh::build(vertices, &triangles, vec![SoundMaterial::default()]).unwrap())
    }

    #[test]
    fn ray_hits_translated_object() {
        let mut scene = SoundScene::new();
        scene.add_object(wall_mesh(), Transform3::from_position(vec3(0.0, 0.0, 5.0)));
        scene.refresh();

        let tracer = RayTracer::new(scene.geometry());
        let hit = tracer
            .closest_hit(&Ray3::new(Vec3::ZERO, Vec3::Z))
            .expect("wall should be hit");
        assert!((hit.distance - 5.0).abs() < 1.0e-4);
    }

    #[test]
    fn occlusion_respects_distance() {
        let mut scene = SoundScene::new();
        scene.add_object(wall_mesh(), Transform3::from_position(vec3(0.0, 0.0, 5.0)));
        scene.refresh();

        let tracer = RayTracer::new(scene.geometry());
        let ray = Ray3::new(Vec3::ZERO, Vec3::Z);
        assert!(tracer.occluded(&ray, 10.0));
        assert!(!tracer.occluded(&ray, 4.0));
    }

    #[test]
    fn removed_object_is_unhittable() {
        let mut scene = SoundScene::new();
        let id = scene.add_object(wall_mesh(), Transform3::from_position(vec3(0.0, 0.0, 5.0)));
        scene.refresh();
        assert!(scene.remove_object(id));
        scene.refresh();

        let tracer = RayTracer::new(scene.geometry());
        assert!(tracer.closest_hit(&Ray3::new(Vec3::ZERO, Vec3::Z)).is_none());
        assert!(scene.object(id).is_none());
    }

    #[test]
    fn scaled_object_distances_stay_world_metric() {
        let mut scene = SoundScene::new();
        let transform = Transform3::new(vec3(0.0, 0.0, 4.0), glam::Mat3::IDENTITY, 3.0);
        scene.add_object(wall_mesh(), transform);
        scene.refresh();

        let tracer = RayTracer::new(scene.geometry());
        // Hit the wall off-center; the scaled wall spans +/-3 world units.
        let hit = tracer
            .closest_hit(&Ray3::new(vec3(2.0, 0.0, 0.0), Vec3::Z))
            .expect("scaled wall should be hit");
        assert!((hit.distance - 4.0).abs() < 1.0e-4);
    }
}
