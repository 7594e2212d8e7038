//! Offline render of a sine source inside a box room.
//!
//! Builds a 8x3x12 m room, runs the adaptive propagation loop for a few
//! simulated seconds and pulls stereo audio through the renderer, printing
//! per-frame statistics. Run with `RUST_LOG=debug` for engine internals.

use et_core::{FrequencyPartition, LoopedBuffer, SoundMaterial};
use et_propagate::{ControllerConfig, PropagationController, PropagationPathBuffer, SoundPropagator};
use et_render::{PropagationRenderer, RendererConfig, SpeakerConfiguration};
use et_scene::{SoundListener, SoundMesh, SoundScene, SoundSource, SoundTriangle, Transform3};
use glam::vec3;
use parking_lot::Mutex;
use std::sync::Arc;

const SAMPLE_RATE: f32 = 48000.0;

fn room_mesh() -> Arc<SoundMesh> {
    let min = vec3(-4.0, 0.0, -6.0);
    let max = vec3(4.0, 3.0, 6.0);
    let corners = [
        vec3(min.x, min.y, min.z),
        vec3(max.x, min.y, min.z),
        vec3(max.x, max.y, min.z),
        vec3(min.x, max.y, min.z),
        vec3(min.x, min.y, max.z),
        vec3(max.x, min.y, max.z),
        vec3(max.x, max.y, max.z),
        vec3(min.x, max.y, max.z),
    ];
    // Inward-facing faces: the listener sits inside the room.
    let quads: [[u32; 4]; 6] = [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [3, 7, 6, 2],
        [0, 4, 7, 3],
        [1, 2, 6, 5],
    ];
    let mut triangles = Vec::new();
    for quad in quads {
        triangles.push(SoundTriangle::new(quad[0], quad[1], quad[2], 0));
        triangles.push(SoundTriangle::new(quad[0], quad[2], quad[3], 0));
    }
    Arc::new(
        SoundMesh::build(corners.to_vec(), &triangles, vec![SoundMaterial::default()]).unwrap(),
    )
}

fn sine_input(frequency: f32, seconds: f32) -> et_core::SoundInputHandle {
    let samples = (0..(SAMPLE_RATE * seconds) as usize)
        .map(|n| (2.0 * std::f32::consts::PI * frequency * n as f32 / SAMPLE_RATE).sin() * 0.25)
        .collect();
    Arc::new(Mutex::new(LoopedBuffer::new(samples, SAMPLE_RATE)))
}

fn main() {
    env_logger::init();

    let mut scene = SoundScene::new();
    scene.add_object(room_mesh(), Transform3::default());

    let mut source = SoundSource::new(vec3(2.0, 1.5, -4.0));
    source.input = Some(sine_input(440.0, 1.0));
    scene.add_source(source);

    let mut listener = SoundListener::new(vec3(0.0, 1.5, 4.0));

    let mut propagator = SoundPropagator::new();
    let mut controller = PropagationController::new(ControllerConfig::default());
    let mut buffer = PropagationPathBuffer::new();

    let renderer = PropagationRenderer::new(RendererConfig {
        speakers: SpeakerConfiguration::stereo(),
        partition: FrequencyPartition::default(),
        sample_rate: SAMPLE_RATE,
        ..RendererConfig::default()
    });

    // 60 simulation ticks at ~50 Hz, pulling matching audio per tick.
    let frames_per_tick = (SAMPLE_RATE / 50.0) as usize;
    let mut output = vec![0.0f32; frames_per_tick * 2];
    let mut peak = 0.0f32;

    for tick in 0..60 {
        controller.propagate(&mut propagator, &mut scene, &mut listener, 4, 4, &mut buffer);
        renderer.update_paths(&buffer);
        renderer.fill_buffer(&mut output);

        let tick_peak = output.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        peak = peak.max(tick_peak);
        if tick % 10 == 0 {
            println!(
                "tick {tick:>3}: {} paths, {} listener rays, {:.2} ms propagation, peak {:.3}",
                buffer.total_paths(),
                controller.num_listener_rays(),
                controller.last_frame_time() * 1.0e3,
                tick_peak,
            );
        }
    }

    println!("done; overall peak {peak:.3}");
}
