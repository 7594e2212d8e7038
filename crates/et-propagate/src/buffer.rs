//! Propagation output buffers
//!
//! The `PropagationPathBuffer` is the hand-off container between the engine
//! and the renderer. The engine clears and refills it every tick; the
//! renderer copies out what it needs under its own lock, so the caller may
//! reuse the buffer immediately after `update_paths` returns.

use crate::path::PropagationPath;
use et_core::{DistanceAttenuation, FrequencyResponse, SoundInputHandle};
use et_scene::{SoundSource, SourceId};

/// Statistical late-reverb estimate for one source.
#[derive(Debug, Clone)]
pub struct ReverbResponse {
    /// Approximate enclosed volume, world units cubed.
    pub volume: f32,
    /// Approximate total surface area, world units squared.
    pub surface_area: f32,
    /// Area-weighted average surface reflection attenuation per band.
    pub surface_attenuation: FrequencyResponse,
    /// Band gain applied to the reverb send.
    pub distance_attenuation: FrequencyResponse,
}

impl Default for ReverbResponse {
    fn default() -> Self {
        Self {
            volume: 0.0,
            surface_area: 0.0,
            surface_attenuation: FrequencyResponse::flat(0.0),
            distance_attenuation: FrequencyResponse::flat(0.0),
        }
    }
}

/// Snapshot of the source parameters the renderer needs, copied per frame so
/// the renderer never touches scene state.
#[derive(Clone)]
pub struct SourceRenderInfo {
    pub id: SourceId,
    pub intensity: f32,
    pub direct_attenuation: DistanceAttenuation,
    pub reverb_attenuation: DistanceAttenuation,
    pub input: Option<SoundInputHandle>,
    pub enabled: bool,
}

impl std::fmt::Debug for SourceRenderInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRenderInfo")
            .field("id", &self.id)
            .field("intensity", &self.intensity)
            .field("enabled", &self.enabled)
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

impl SourceRenderInfo {
    pub fn from_source(source: &SoundSource) -> Self {
        Self {
            id: source.id(),
            intensity: source.intensity,
            direct_attenuation: source.direct_attenuation,
            reverb_attenuation: source.reverb_attenuation,
            input: source.input.clone(),
            enabled: source.enabled,
        }
    }
}

/// Paths and reverb for one source, one frame.
#[derive(Debug)]
pub struct SourcePathBuffer {
    pub source: SourceRenderInfo,
    pub paths: Vec<PropagationPath>,
    pub reverb: ReverbResponse,
}

impl SourcePathBuffer {
    fn new(source: SourceRenderInfo) -> Self {
        Self {
            source,
            paths: Vec::new(),
            reverb: ReverbResponse::default(),
        }
    }
}

/// Per-source propagation output for one frame.
#[derive(Debug, Default)]
pub struct PropagationPathBuffer {
    sources: Vec<SourcePathBuffer>,
}

impl PropagationPathBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear and resize for this frame's sources, attaching fresh snapshots
    /// of their render parameters. Path vectors keep their allocations.
    pub fn prepare(&mut self, sources: &[SoundSource]) {
        self.sources.truncate(sources.len());
        for (index, source) in sources.iter().enumerate() {
            match self.sources.get_mut(index) {
                Some(buffer) => {
                    buffer.source = SourceRenderInfo::from_source(source);
                    buffer.paths.clear();
                    buffer.reverb = ReverbResponse::default();
                }
                None => self
                    .sources
                    .push(SourcePathBuffer::new(SourceRenderInfo::from_source(source))),
            }
        }
    }

    #[inline]
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    pub fn source_buffers(&self) -> &[SourcePathBuffer] {
        &self.sources
    }

    #[inline]
    pub fn source_buffer(&self, index: usize) -> &SourcePathBuffer {
        &self.sources[index]
    }

    #[inline]
    pub fn source_buffer_mut(&mut self, index: usize) -> &mut SourcePathBuffer {
        &mut self.sources[index]
    }

    /// Total path count across all sources.
    pub fn total_paths(&self) -> usize {
        self.sources.iter().map(|s| s.paths.len()).sum()
    }
}
