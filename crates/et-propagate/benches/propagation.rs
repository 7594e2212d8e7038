//! Propagation throughput on a closed box room

use criterion::{criterion_group, criterion_main, Criterion};
use et_core::SoundMaterial;
use et_propagate::{PropagationPathBuffer, SoundPropagator};
use et_scene::{SoundListener, SoundMesh, SoundScene, SoundSource, SoundTriangle, Transform3};
use glam::vec3;
use std::sync::Arc;

fn box_room_scene() -> (SoundScene, SoundListener) {
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
    let quads: [[u32; 4]; 6] = [
        [0, 1, 2, 3],
        [4, 7, 6, 5],
        [0, 4, 5, 1],
        [3, 2, 6, 7],
        [0, 3, 7, 4],
        [1, 5, 6, 2],
    ];
    let mut triangles = Vec::new();
    for quad in quads {
        triangles.push(SoundTriangle::new(quad[0], quad[1], quad[2], 0));
        triangles.push(SoundTriangle::new(quad[0], quad[2], quad[3], 0));
    }
    let mesh = Arc::new(
        SoundMesh::build(corners.to_vec(), &triangles, vec![SoundMaterial::default()]).unwrap(),
    );

    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(SoundSource::new(vec3(2.0, 1.5, -3.0)));
    scene.add_source(SoundSource::new(vec3(-2.0, 1.5, 3.0)));
    let listener = SoundListener::new(vec3(0.0, 1.5, 0.0));
    (scene, listener)
}

fn bench_propagate(c: &mut Criterion) {
    let (mut scene, mut listener) = box_room_scene();
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    c.bench_function("propagate_box_room_1000_rays", |b| {
        b.iter(|| {
            propagator.propagate(&mut scene, &mut listener, 4, 1000, 4, 100, &mut buffer);
            std::hint::black_box(buffer.total_paths())
        })
    });
}

criterion_group!(benches, bench_propagate);
criterion_main!(benches);
