//! Real-time propagation rendering
//!
//! Per source the renderer keeps a band-interleaved ring delay buffer fed
//! from the source's input through the band splitter. Every propagation
//! path reads the ring through a time-varying fractional-delay tap with
//! per-band, per-channel gain ramps; the reverb bank reads the same ring
//! through parallel comb filters and series all-pass filters. All shared
//! state sits behind one mutex: `update_paths` runs on the simulation
//! thread, `fill_buffer` on the audio thread.

use crate::crossover::BandSplitter;
use crate::speaker::SpeakerConfiguration;
use et_core::{FrequencyPartition, Sample, SoundInputHandle};
use et_propagate::{PathId, PropagationPathBuffer, ReverbResponse, SourceRenderInfo};
use et_scene::SourceId;
use log::debug;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use wide::f32x8;

/// SIMD lane width for band-interleaved buffers.
const LANES: usize = 8;

/// Number of parallel comb filters per source.
const NUM_COMB_FILTERS: usize = 10;

/// Comb filter delay range, seconds.
const COMB_DELAY_RANGE: (f32, f32) = (0.02, 0.05);

/// Number of series all-pass filters per source.
const NUM_ALLPASS_FILTERS: usize = 2;

/// All-pass delay range, seconds.
const ALLPASS_DELAY_RANGE: (f32, f32) = (0.005, 0.03);

/// Fixed all-pass decay time, seconds.
const ALLPASS_DECAY_TIME: f32 = 0.1;

/// Eyring coefficient `-4 ln(10^-6) / c` at the 343 m/s reference.
const REVERB_DECAY_CONSTANT: f32 = 4.0 * 13.815511 / 343.0;

/// Renderer configuration, fixed at construction; the layout, partition and
/// sample rate can be swapped later at the cost of per-source state.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub speakers: SpeakerConfiguration,
    pub partition: FrequencyPartition,
    pub sample_rate: f32,
    /// Longest renderable path delay, seconds.
    pub max_delay_time: f32,
    /// Aggregate path budget across all sources.
    pub max_paths: usize,
    /// Frames a path may go unseen before its render state is dropped.
    pub max_path_age: u64,
    pub reverb_enabled: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            speakers: SpeakerConfiguration::stereo(),
            partition: FrequencyPartition::default(),
            sample_rate: 48000.0,
            max_delay_time: 0.5,
            max_paths: usize::MAX,
            max_path_age: 10,
            reverb_enabled: true,
        }
    }
}

/// Linear gain ramped over one callback.
#[derive(Debug, Clone, Copy, Default)]
struct GainRamp {
    current: f32,
    target: f32,
}

/// Render state of one propagation path.
#[derive(Debug)]
struct PathRenderState {
    current_delay: f32,
    target_delay: f32,
    delay_change_per_sec: f32,
    time_stamp: u64,
    /// Channel-major: `gains[channel * frame_width + lane]`.
    gains: Vec<GainRamp>,
}

#[derive(Debug)]
struct CombBand {
    feedback: f32,
    gain: GainRamp,
}

#[derive(Debug)]
struct CombChannel {
    delay_time: f32,
    delay_samples: usize,
    read_index: usize,
    /// Band-interleaved ring of `delay_samples * frame_width` samples.
    ring: Vec<Sample>,
    /// One entry per lane; pad lanes stay silent.
    bands: Vec<CombBand>,
}

#[derive(Debug)]
struct CombFilter {
    channels: Vec<CombChannel>,
}

#[derive(Debug)]
struct AllPassChannel {
    delay_samples: usize,
    read_index: usize,
    ring: Vec<Sample>,
    feedback: f32,
}

#[derive(Debug)]
struct AllPassFilter {
    channels: Vec<AllPassChannel>,
}

/// Everything rendered for one source.
struct SourceRenderState {
    input: Option<SoundInputHandle>,
    splitter: BandSplitter,
    /// Band-interleaved ring of `ring_frames * frame_width` samples shared
    /// by every output channel.
    ring: Vec<Sample>,
    ring_frames: usize,
    write_index: usize,
    paths: HashMap<PathId, PathRenderState>,
    combs: Vec<CombFilter>,
    allpasses: Vec<AllPassFilter>,
    time_stamp: u64,
}

impl SourceRenderState {
    fn new(
        info: &SourceRenderInfo,
        config: &RendererConfig,
        frame_width: usize,
        time_stamp: u64,
    ) -> Self {
        let num_channels = config.speakers.num_channels();
        let ring_frames = ((2.0 * config.sample_rate * config.max_delay_time) as usize).max(1);

        // Reverb delay lengths are drawn once per source from a generator
        // seeded with the source id, so a given source always gets the same
        // bank.
        let mut rng = ChaCha8Rng::seed_from_u64(info.id.raw());
        let combs = (0..NUM_COMB_FILTERS)
            .map(|_| CombFilter {
                channels: (0..num_channels)
                    .map(|_| {
                        let delay_time =
                            rng.random_range(COMB_DELAY_RANGE.0..COMB_DELAY_RANGE.1);
                        let delay_samples =
                            ((config.sample_rate * delay_time) as usize).max(1);
                        CombChannel {
                            delay_time,
                            delay_samples,
                            read_index: 0,
                            ring: vec![0.0; delay_samples * frame_width],
                            bands: (0..frame_width)
                                .map(|_| CombBand {
                                    feedback: 0.0,
                                    gain: GainRamp::default(),
                                })
                                .collect(),
                        }
                    })
                    .collect(),
            })
            .collect();
        let allpasses = (0..NUM_ALLPASS_FILTERS)
            .map(|_| AllPassFilter {
                channels: (0..num_channels)
                    .map(|_| {
                        let delay_time =
                            rng.random_range(ALLPASS_DELAY_RANGE.0..ALLPASS_DELAY_RANGE.1);
                        let delay_samples =
                            ((config.sample_rate * delay_time) as usize).max(1);
                        AllPassChannel {
                            delay_samples,
                            read_index: 0,
                            ring: vec![0.0; delay_samples],
                            feedback: 0.001f32.powf(delay_time / ALLPASS_DECAY_TIME),
                        }
                    })
                    .collect(),
            })
            .collect();

        Self {
            input: info.input.clone(),
            splitter: BandSplitter::new(&config.partition, config.sample_rate),
            ring: vec![0.0; ring_frames * frame_width],
            ring_frames,
            write_index: 0,
            paths: HashMap::new(),
            combs,
            allpasses,
            time_stamp,
        }
    }
}

struct RendererState {
    config: RendererConfig,
    frame_width: usize,
    sources: HashMap<SourceId, SourceRenderState>,
    time_stamp: u64,
    // Scratch reused across calls.
    pan_gains: Vec<f32>,
    mono_scratch: Vec<Sample>,
    reverb_scratch: Vec<Sample>,
    impulses: Vec<Impulse>,
}

/// A path's render parameters for one update, used for amplitude culling.
#[derive(Debug, Clone, Copy)]
struct Impulse {
    amplitude: f32,
    delay: f32,
    delay_change_per_sec: f32,
    path_index: usize,
}

/// The propagation renderer.
pub struct PropagationRenderer {
    state: Mutex<RendererState>,
}

impl PropagationRenderer {
    pub fn new(config: RendererConfig) -> Self {
        let frame_width = lane_width(config.partition.num_bands());
        Self {
            state: Mutex::new(RendererState {
                config,
                frame_width,
                sources: HashMap::new(),
                time_stamp: 0,
                pan_gains: Vec::new(),
                mono_scratch: Vec::new(),
                reverb_scratch: Vec::new(),
                impulses: Vec::new(),
            }),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.state.lock().config.speakers.num_channels()
    }

    pub fn sample_rate(&self) -> f32 {
        self.state.lock().config.sample_rate
    }

    /// Number of live path render states for a source, if it is known.
    pub fn active_path_count(&self, source: SourceId) -> Option<usize> {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|state| state.paths.len())
    }

    pub fn num_active_sources(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Swap in a new speaker layout; per-source render state is discarded.
    pub fn set_speaker_configuration(&self, speakers: SpeakerConfiguration) {
        let mut state = self.state.lock();
        state.sources.clear();
        state.config.speakers = speakers;
    }

    /// Swap in a new partition; per-source render state is discarded.
    pub fn set_frequency_partition(&self, partition: FrequencyPartition) {
        let mut state = self.state.lock();
        state.frame_width = lane_width(partition.num_bands());
        state.config.partition = partition;
        state.sources.clear();
    }

    /// Change the output sample rate; per-source render state is discarded.
    pub fn set_sample_rate(&self, sample_rate: f32) {
        let mut state = self.state.lock();
        state.config.sample_rate = sample_rate.max(1.0);
        state.sources.clear();
    }

    /// Take this frame's propagation output. Called on the simulation
    /// thread; holds the render mutex only for the state update, and the
    /// buffer may be reused by the caller immediately after return.
    pub fn update_paths(&self, buffer: &PropagationPathBuffer) {
        let mut state = self.state.lock();
        state.update_paths(buffer);
    }

    /// Render interleaved output frames. `output` length must be a multiple
    /// of the channel count. Called on the audio thread.
    pub fn fill_buffer(&self, output: &mut [Sample]) {
        let mut state = self.state.lock();
        state.fill_buffer(output);
    }
}

impl RendererState {
    fn update_paths(&mut self, buffer: &PropagationPathBuffer) {
        let total_paths = buffer.total_paths();
        let cull = total_paths > self.config.max_paths;
        let keep_fraction = if total_paths > 0 {
            self.config.max_paths as f32 / total_paths as f32
        } else {
            1.0
        };
        if cull {
            debug!(
                "culling paths: {total_paths} found, keeping {}",
                self.config.max_paths
            );
        }

        let time_stamp = self.time_stamp;
        let frame_width = self.frame_width;

        for source_buffer in buffer.source_buffers() {
            let info = &source_buffer.source;
            let max_source_paths = if cull {
                (keep_fraction * source_buffer.paths.len() as f32) as usize
            } else {
                source_buffer.paths.len()
            };

            // Take the state out of the map while updating it so the update
            // can borrow the renderer's scratch buffers.
            let existing = self.sources.remove(&info.id);
            let was_known = existing.is_some();
            let mut source_state = match existing {
                Some(state) => state,
                None => {
                    if !info.enabled {
                        continue;
                    }
                    SourceRenderState::new(info, &self.config, frame_width, time_stamp)
                }
            };

            if !info.enabled {
                // Disabled sources drop their paths; the sweep below removes
                // the rest of their state.
                source_state.paths.clear();
                self.sources.insert(info.id, source_state);
                continue;
            }
            if was_known && source_state.time_stamp == time_stamp {
                // A second buffer for the same source in one frame; ignore.
                self.sources.insert(info.id, source_state);
                continue;
            }
            source_state.time_stamp = time_stamp;
            self.update_source_paths(source_buffer, &mut source_state, max_source_paths);
            self.sources.insert(info.id, source_state);
        }

        // Drop render state for sources absent from this frame's buffer.
        self.sources
            .retain(|_, source_state| source_state.time_stamp >= time_stamp);

        self.time_stamp += 1;
    }

    fn update_source_paths(
        &mut self,
        source_buffer: &et_propagate::SourcePathBuffer,
        source_state: &mut SourceRenderState,
        max_source_paths: usize,
    ) {
        let info = &source_buffer.source;
        let num_channels = self.config.speakers.num_channels();
        let num_bands = self.config.partition.num_bands();
        let frame_width = self.frame_width;

        // Track input swaps on the source.
        let input_changed = match (&source_state.input, &info.input) {
            (Some(a), Some(b)) => !std::sync::Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if input_changed {
            source_state.input = info.input.clone();
            source_state.splitter.reset();
        }

        // Build the impulse list and cull the quietest paths if needed.
        self.impulses.clear();
        for (path_index, path) in source_buffer.paths.iter().enumerate() {
            let inverse_speed = 1.0 / path.speed_of_sound;
            let delay = (path.distance * inverse_speed).min(self.config.max_delay_time);
            self.impulses.push(Impulse {
                amplitude: info.intensity * info.direct_attenuation.attenuation(path.distance),
                delay,
                delay_change_per_sec: path.relative_speed * inverse_speed,
                path_index,
            });
        }
        if self.impulses.len() > max_source_paths {
            self.impulses
                .sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
            self.impulses.truncate(max_source_paths);
        }

        for impulse in &self.impulses {
            let path = &source_buffer.paths[impulse.path_index];
            self.config
                .speakers
                .pan_gains(path.direction, &mut self.pan_gains);

            let is_new = !source_state.paths.contains_key(&path.id);
            let entry = source_state
                .paths
                .entry(path.id.clone())
                .or_insert_with(|| PathRenderState {
                    current_delay: impulse.delay,
                    target_delay: impulse.delay,
                    delay_change_per_sec: impulse.delay_change_per_sec,
                    time_stamp: source_state.time_stamp,
                    gains: vec![GainRamp::default(); num_channels * frame_width],
                });

            entry.target_delay = impulse.delay;
            entry.delay_change_per_sec = impulse.delay_change_per_sec;
            entry.time_stamp = source_state.time_stamp;

            for band in 0..num_bands {
                let (low, high) = self.config.partition.band_range(band);
                let band_gain =
                    path.attenuation.band_average_gain(low, high) * impulse.amplitude;
                for channel in 0..num_channels {
                    let gain = band_gain * self.pan_gains[channel];
                    let ramp = &mut entry.gains[channel * frame_width + band];
                    ramp.target = gain;
                    if is_new {
                        // New paths start at their target instead of fading
                        // in; their first frame is already audible.
                        ramp.current = gain;
                    }
                }
            }
        }

        // Fade and drop aging paths.
        let max_age = self.config.max_path_age;
        let current_stamp = source_state.time_stamp;
        source_state.paths.retain(|_, path_state| {
            if path_state.time_stamp >= current_stamp {
                return true;
            }
            if path_state.gains.len() != num_channels * frame_width {
                return false;
            }
            let age = current_stamp - path_state.time_stamp;
            if age > max_age {
                return false;
            }
            let last_fade = square(1.0 - (age - 1) as f32 / max_age as f32);
            let fade = square(1.0 - age as f32 / max_age as f32);
            for ramp in &mut path_state.gains {
                let original = if last_fade > 0.0 {
                    ramp.current / last_fade
                } else {
                    0.0
                };
                ramp.target = original * fade;
            }
            true
        });

        // Update the reverb bank from this frame's reverb response.
        if self.config.reverb_enabled {
            self.update_source_reverb(info, &source_buffer.reverb, source_state);
        } else {
            for comb in &mut source_state.combs {
                for channel in &mut comb.channels {
                    for band in &mut channel.bands {
                        band.feedback = 0.0;
                        band.gain.target = 0.0;
                    }
                }
            }
        }
    }

    fn update_source_reverb(
        &mut self,
        info: &SourceRenderInfo,
        reverb: &ReverbResponse,
        source_state: &mut SourceRenderState,
    ) {
        let num_bands = self.config.partition.num_bands();
        let comb_split = 1.0 / source_state.combs.len() as f32;

        for band in 0..num_bands {
            let (low, high) = self.config.partition.band_range(band);

            // Eyring decay from the estimated room statistics.
            let decay_time = if reverb.surface_area <= f32::EPSILON {
                0.0
            } else {
                let alpha = reverb
                    .surface_attenuation
                    .band_average_gain(low, high)
                    .clamp(1.0e-6, 0.999_999);
                REVERB_DECAY_CONSTANT * reverb.volume / (reverb.surface_area * -alpha.ln())
            };

            let band_amplitude =
                reverb.distance_attenuation.band_average_gain(low, high) * info.intensity;

            for comb in &mut source_state.combs {
                for channel in &mut comb.channels {
                    let comb_band = &mut channel.bands[band];
                    comb_band.feedback = if decay_time > 0.0 {
                        0.001f32.powf(channel.delay_time / decay_time)
                    } else {
                        0.0
                    };
                    comb_band.gain.target = band_amplitude * comb_split;
                }
            }
        }
    }

    fn fill_buffer(&mut self, output: &mut [Sample]) {
        let num_channels = self.config.speakers.num_channels();
        if num_channels == 0 || output.is_empty() {
            return;
        }
        let frames = output.len() / num_channels;
        output.fill(0.0);

        // The borrow splitter again: take each source state out while
        // rendering it against &self scratch.
        let ids: Vec<SourceId> = self.sources.keys().copied().collect();
        for id in ids {
            let mut source_state = match self.sources.remove(&id) {
                Some(state) => state,
                None => continue,
            };
            self.render_source(&mut source_state, output, frames);
            self.sources.insert(id, source_state);
        }
    }

    fn render_source(
        &mut self,
        source_state: &mut SourceRenderState,
        output: &mut [Sample],
        frames: usize,
    ) {
        let num_channels = self.config.speakers.num_channels();
        let num_bands = self.config.partition.num_bands();
        let frame_width = self.frame_width;
        let sample_rate = self.config.sample_rate;
        let ring_frames = source_state.ring_frames;

        // ------------------------------------------------------------------
        // Pull input through the band splitter into the ring.
        let read_base = source_state.write_index;

        self.mono_scratch.clear();
        self.mono_scratch.resize(frames, 0.0);
        if let Some(input) = &source_state.input {
            // A short read leaves zeros behind: exhausted inputs fall
            // silent while their delay and reverb tails keep playing out.
            let _ = input.lock().read(&mut self.mono_scratch[..]);
        }
        for &mono in self.mono_scratch.iter() {
            let bands = source_state.splitter.process(mono);
            let frame_start = source_state.write_index * frame_width;
            let frame = &mut source_state.ring[frame_start..frame_start + frame_width];
            frame[..num_bands].copy_from_slice(&bands[..num_bands]);
            frame[num_bands..].fill(0.0);
            source_state.write_index = (source_state.write_index + 1) % ring_frames;
        }

        // ------------------------------------------------------------------
        // Render every path.
        let buffer_seconds = frames as f32 / sample_rate;
        let half_sample = 0.5 / sample_rate;
        let inverse_frames = 1.0 / frames as f32;

        for path_state in source_state.paths.values_mut() {
            let (snapped, new_delay) = next_delay_time(
                path_state.current_delay,
                path_state.target_delay,
                path_state.delay_change_per_sec,
                buffer_seconds,
                half_sample,
            );
            path_state.current_delay = snapped;

            let delay_step_per_sample =
                1.0 - (new_delay - path_state.current_delay) * inverse_frames * sample_rate;

            let mut delay_start =
                read_base as f32 - path_state.current_delay * sample_rate;
            if delay_start < 0.0 {
                delay_start += ring_frames as f32;
            }
            let fractional = delay_start - delay_start.floor();
            let start_frame = (delay_start as usize).min(ring_frames - 1);

            for channel in 0..num_channels {
                let gains =
                    &mut path_state.gains[channel * frame_width..(channel + 1) * frame_width];
                let mut amps = Vec::with_capacity(frame_width / LANES);
                let mut steps = Vec::with_capacity(frame_width / LANES);
                for chunk in 0..frame_width / LANES {
                    let mut current = [0.0f32; LANES];
                    let mut step = [0.0f32; LANES];
                    for lane in 0..LANES {
                        let ramp = &mut gains[chunk * LANES + lane];
                        current[lane] = ramp.current;
                        step[lane] = (ramp.target - ramp.current) * inverse_frames;
                        ramp.current = ramp.target;
                    }
                    amps.push(f32x8::from(current));
                    steps.push(f32x8::from(step));
                }

                if path_state.current_delay == new_delay {
                    render_constant_delay(
                        &source_state.ring,
                        ring_frames,
                        frame_width,
                        start_frame,
                        &mut amps,
                        &steps,
                        output,
                        num_channels,
                        channel,
                        frames,
                    );
                } else {
                    render_changing_delay(
                        &source_state.ring,
                        ring_frames,
                        frame_width,
                        start_frame,
                        fractional,
                        delay_step_per_sample,
                        &mut amps,
                        &steps,
                        output,
                        num_channels,
                        channel,
                        frames,
                    );
                }
            }

            path_state.current_delay = new_delay;
        }

        // ------------------------------------------------------------------
        // Reverb bank.
        if self.config.reverb_enabled {
            self.reverb_scratch.clear();
            self.reverb_scratch.resize(num_channels * frames, 0.0);

            for comb in &mut source_state.combs {
                for (channel, comb_channel) in comb.channels.iter_mut().enumerate() {
                    render_comb_channel(
                        comb_channel,
                        &source_state.ring,
                        ring_frames,
                        frame_width,
                        read_base,
                        &mut self.reverb_scratch[channel * frames..(channel + 1) * frames],
                        inverse_frames,
                    );
                }
            }

            for allpass in &mut source_state.allpasses {
                for (channel, allpass_channel) in allpass.channels.iter_mut().enumerate() {
                    render_allpass_channel(
                        allpass_channel,
                        &mut self.reverb_scratch[channel * frames..(channel + 1) * frames],
                    );
                }
            }

            for channel in 0..num_channels {
                let scratch = &self.reverb_scratch[channel * frames..(channel + 1) * frames];
                for (frame, &sample) in scratch.iter().enumerate() {
                    output[frame * num_channels + channel] += sample;
                }
            }
        }
    }
}

/// Decide the delay trajectory for one callback.
///
/// Snaps to the target when within half a sample, otherwise extrapolates by
/// the Doppler rate when one exists and tracks the midpoint toward the
/// target when it does not. Returns `(snapped_current, new_delay)`.
fn next_delay_time(
    current: f32,
    target: f32,
    delay_change_per_sec: f32,
    buffer_seconds: f32,
    half_sample: f32,
) -> (f32, f32) {
    let current = if (current - target).abs() < half_sample {
        target
    } else {
        current
    };
    if current == target {
        return (current, target);
    }
    let doppler = buffer_seconds * delay_change_per_sec;
    let midpoint = buffer_seconds * ((current + target) * 0.5 - current);
    let change = if doppler.abs() < f32::EPSILON {
        midpoint
    } else {
        doppler
    };
    (current, current + change)
}

#[allow(clippy::too_many_arguments)]
fn render_constant_delay(
    ring: &[Sample],
    ring_frames: usize,
    frame_width: usize,
    start_frame: usize,
    amps: &mut [f32x8],
    steps: &[f32x8],
    output: &mut [Sample],
    num_channels: usize,
    channel: usize,
    frames: usize,
) {
    let mut frame = start_frame;
    for i in 0..frames {
        if frame >= ring_frames {
            frame = 0;
        }
        let mut acc = 0.0f32;
        for (chunk, (amp, step)) in amps.iter_mut().zip(steps).enumerate() {
            let lanes = load_lanes(ring, frame * frame_width + chunk * LANES);
            acc += (lanes * *amp).reduce_add();
            *amp += *step;
        }
        output[i * num_channels + channel] += acc;
        frame += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn render_changing_delay(
    ring: &[Sample],
    ring_frames: usize,
    frame_width: usize,
    start_frame: usize,
    fractional: f32,
    delay_step_per_sample: f32,
    amps: &mut [f32x8],
    steps: &[f32x8],
    output: &mut [Sample],
    num_channels: usize,
    channel: usize,
    frames: usize,
) {
    let mut last_frame = start_frame;
    let mut next_frame = (start_frame + 1) % ring_frames;
    let mut phase = fractional;

    for i in 0..frames {
        let mut acc = 0.0f32;
        let phase_splat = f32x8::splat(phase);
        let inverse_splat = f32x8::splat(1.0 - phase);
        for (chunk, (amp, step)) in amps.iter_mut().zip(steps).enumerate() {
            let next = load_lanes(ring, next_frame * frame_width + chunk * LANES);
            let last = load_lanes(ring, last_frame * frame_width + chunk * LANES);
            acc += ((next * phase_splat + last * inverse_splat) * *amp).reduce_add();
            *amp += *step;
        }
        output[i * num_channels + channel] += acc;

        phase += delay_step_per_sample;
        while phase > 1.0 {
            phase -= 1.0;
            last_frame = next_frame;
            next_frame = (next_frame + 1) % ring_frames;
        }
    }
}

fn render_comb_channel(
    comb: &mut CombChannel,
    source_ring: &[Sample],
    ring_frames: usize,
    frame_width: usize,
    read_base: usize,
    scratch: &mut [Sample],
    inverse_frames: f32,
) {
    let chunks = frame_width / LANES;
    let mut feedbacks = Vec::with_capacity(chunks);
    let mut amps = Vec::with_capacity(chunks);
    let mut steps = Vec::with_capacity(chunks);
    for chunk in 0..chunks {
        let mut feedback = [0.0f32; LANES];
        let mut current = [0.0f32; LANES];
        let mut step = [0.0f32; LANES];
        for lane in 0..LANES {
            let band = &mut comb.bands[chunk * LANES + lane];
            feedback[lane] = band.feedback;
            current[lane] = band.gain.current;
            step[lane] = (band.gain.target - band.gain.current) * inverse_frames;
            band.gain.current = band.gain.target;
        }
        feedbacks.push(f32x8::from(feedback));
        amps.push(f32x8::from(current));
        steps.push(f32x8::from(step));
    }

    let mut read = comb.read_index;
    let mut source_frame = read_base;
    for sample in scratch.iter_mut() {
        if read >= comb.delay_samples {
            read = 0;
        }
        if source_frame >= ring_frames {
            source_frame = 0;
        }
        let mut acc = 0.0f32;
        for chunk in 0..chunks {
            let offset = read * frame_width + chunk * LANES;
            let delayed = load_lanes(&comb.ring, offset);
            acc += (delayed * amps[chunk]).reduce_add();
            let input = load_lanes(source_ring, source_frame * frame_width + chunk * LANES);
            store_lanes(
                &mut comb.ring,
                offset,
                delayed * feedbacks[chunk] + input,
            );
            amps[chunk] += steps[chunk];
        }
        *sample += acc;
        read += 1;
        source_frame += 1;
    }
    comb.read_index = (comb.read_index + scratch.len()) % comb.delay_samples;
}

fn render_allpass_channel(allpass: &mut AllPassChannel, scratch: &mut [Sample]) {
    let feedback = allpass.feedback;
    let mut read = allpass.read_index;
    for sample in scratch.iter_mut() {
        if read >= allpass.delay_samples {
            read = 0;
        }
        let delayed = allpass.ring[read];
        let written = delayed * feedback + *sample;
        allpass.ring[read] = written;
        *sample = delayed - feedback * written;
        read += 1;
    }
    allpass.read_index = (allpass.read_index + scratch.len()) % allpass.delay_samples;
}

#[inline]
fn load_lanes(buffer: &[Sample], offset: usize) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(&buffer[offset..offset + LANES]);
    f32x8::from(lanes)
}

#[inline]
fn store_lanes(buffer: &mut [Sample], offset: usize, lanes: f32x8) {
    buffer[offset..offset + LANES].copy_from_slice(&lanes.to_array());
}

#[inline]
fn square(value: f32) -> f32 {
    value * value
}

/// Smallest multiple of the SIMD lane count covering `bands`.
fn lane_width(bands: usize) -> usize {
    bands.div_ceil(LANES) * LANES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_width_rounds_up() {
        assert_eq!(lane_width(1), 8);
        assert_eq!(lane_width(8), 8);
        assert_eq!(lane_width(9), 16);
    }

    #[test]
    fn delay_snaps_within_half_sample() {
        let (current, new) = next_delay_time(0.100001, 0.1, 0.0, 0.01, 0.5 / 48000.0);
        assert_eq!(current, 0.1);
        assert_eq!(new, 0.1);
    }

    #[test]
    fn doppler_rate_drives_delay() {
        let (current, new) = next_delay_time(0.1, 0.2, 0.05, 0.01, 0.5 / 48000.0);
        assert_eq!(current, 0.1);
        // 10 ms of buffer at +0.05 s/s: delay grows by 0.5 ms.
        assert!((new - 0.1005).abs() < 1.0e-6);
    }

    #[test]
    fn midpoint_tracking_without_doppler() {
        let (current, new) = next_delay_time(0.1, 0.2, 0.0, 0.01, 0.5 / 48000.0);
        assert_eq!(current, 0.1);
        // Moves toward the midpoint, scaled by the buffer length.
        assert!(new > 0.1 && new < 0.15);
    }

    #[test]
    fn allpass_preserves_energy_roughly() {
        let mut channel = AllPassChannel {
            delay_samples: 48,
            read_index: 0,
            ring: vec![0.0; 48],
            feedback: 0.5,
        };
        let mut buffer = vec![0.0f32; 4800];
        buffer[0] = 1.0;
        render_allpass_channel(&mut channel, &mut buffer);
        let energy: f32 = buffer.iter().map(|x| x * x).sum();
        assert!((energy - 1.0).abs() < 0.2, "energy {energy}");
    }
}
