//! The sound listener

use crate::cache::{ProbePathCache, ProbedTriangleCache, RayDistributionCache};
use glam::{Mat3, Vec3};

/// What a listener probe ray learned about a triangle.
#[derive(Debug, Clone, Copy)]
pub struct ListenerProbeRecord {
    /// Dot of the probing ray direction with the triangle normal.
    pub ray_dot_normal: f32,
    /// Direction the probe ray left the listener, in listener space.
    pub first_ray_direction: Vec3,
    /// Frame stamp of the most recent probe.
    pub time_stamp: u64,
}

/// The receiver of propagated sound.
///
/// The orientation is a right-handed orthonormal basis whose columns are the
/// listener's axes expressed in world space; directions are brought into
/// listener space with the transpose.
#[derive(Debug)]
pub struct SoundListener {
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Mat3,
    /// Probe paths discovered on earlier frames, revalidated each tick.
    pub probe_paths: ProbePathCache,
    /// Triangles recently seen by listener probe rays.
    pub probed_triangles: ProbedTriangleCache<ListenerProbeRecord>,
    /// Importance map biasing probe ray directions.
    pub ray_distribution: RayDistributionCache,
}

impl SoundListener {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            orientation: Mat3::IDENTITY,
            probe_paths: ProbePathCache::new(),
            probed_triangles: ProbedTriangleCache::new(),
            ray_distribution: RayDistributionCache::new(),
        }
    }

    /// Bring a world-space direction into listener space.
    #[inline]
    pub fn world_to_listener(&self, direction: Vec3) -> Vec3 {
        self.orientation.transpose() * direction
    }
}
