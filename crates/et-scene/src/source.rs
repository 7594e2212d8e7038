//! Point sound sources

use crate::cache::ProbedTriangleCache;
use et_core::{DistanceAttenuation, FrequencyResponse, SoundInputHandle};
use glam::Vec3;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of a sound source.
///
/// Ids are unique for the lifetime of the process, so path identities and
/// renderer state maps survive sources being removed and re-added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What a source probe ray learned about a triangle.
#[derive(Debug, Clone, Copy)]
pub struct SourceProbeRecord {
    /// Dot of the probing ray direction with the triangle normal; the sign
    /// says which face was seen.
    pub ray_dot_normal: f32,
    /// Frame stamp of the most recent probe.
    pub time_stamp: u64,
}

/// A point sound source.
pub struct SoundSource {
    id: SourceId,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Unit facing direction used for directivity blending.
    pub direction: Vec3,
    /// Linear output intensity.
    pub intensity: f32,
    /// Radius of the emitting sphere; occlusion rays stop this short.
    pub radius: f32,
    /// Frequency response on the facing axis.
    pub on_axis_response: FrequencyResponse,
    /// Frequency response directly behind the source.
    pub off_axis_response: FrequencyResponse,
    /// When false only `on_axis_response` is used.
    pub is_directional: bool,
    /// Distance rolloff applied to deterministic paths.
    pub direct_attenuation: DistanceAttenuation,
    /// Distance rolloff applied to the statistical reverb.
    pub reverb_attenuation: DistanceAttenuation,
    /// Audio pulled by the renderer. `None` renders silence.
    pub input: Option<SoundInputHandle>,
    pub enabled: bool,
    /// Triangles recently seen by this source's reverb probe rays.
    pub probed_triangles: ProbedTriangleCache<SourceProbeRecord>,
}

impl std::fmt::Debug for SoundSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundSource")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("intensity", &self.intensity)
            .field("enabled", &self.enabled)
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

impl SoundSource {
    pub fn new(position: Vec3) -> Self {
        Self {
            id: SourceId::next(),
            position,
            velocity: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            intensity: 1.0,
            radius: 0.0,
            on_axis_response: FrequencyResponse::default(),
            off_axis_response: FrequencyResponse::default(),
            is_directional: false,
            direct_attenuation: DistanceAttenuation::default(),
            reverb_attenuation: DistanceAttenuation::default(),
            input: None,
            enabled: true,
            probed_triangles: ProbedTriangleCache::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Direct-path distance attenuation at `distance`.
    #[inline]
    pub fn distance_attenuation(&self, distance: f32) -> f32 {
        self.direct_attenuation.attenuation(distance)
    }

    /// Reverb distance attenuation at `distance`.
    #[inline]
    pub fn reverb_distance_attenuation(&self, distance: f32) -> f32 {
        self.reverb_attenuation.attenuation(distance)
    }
}
