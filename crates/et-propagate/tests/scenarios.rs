//! End-to-end propagation scenarios
//!
//! Scenes are built in meters with c = 343 m/s. Each test drives the full
//! `propagate` pipeline and checks the emitted paths against hand-computed
//! geometry.

use approx::assert_relative_eq;
use et_core::{DistanceAttenuation, FrequencyResponse, SoundMaterial, NUM_BANDS};
use et_propagate::{PathPoint, PropagationPathBuffer, SoundPropagator};
use et_scene::{SoundListener, SoundMesh, SoundScene, SoundSource, SoundTriangle, Transform3};
use glam::{vec3, Vec3};
use std::sync::Arc;

const SPEED_OF_SOUND: f32 = 343.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Axis-aligned box mesh with inward-facing or outward-facing winding
/// depending on `inward`.
fn box_mesh(min: Vec3, max: Vec3, material: SoundMaterial, inward: bool) -> Arc<SoundMesh> {
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
    // Outward-facing quads (CCW seen from outside).
    let quads: [[u32; 4]; 6] = [
        [0, 3, 2, 1], // -z
        [4, 5, 6, 7], // +z
        [0, 1, 5, 4], // -y
        [3, 7, 6, 2], // +y
        [0, 4, 7, 3], // -x
        [1, 2, 6, 5], // +x
    ];
    let mut triangles = Vec::new();
    for quad in quads {
        let [a, b, c, d] = if inward {
            [quad[0], quad[3], quad[2], quad[1]]
        } else {
            quad
        };
        triangles.push(SoundTriangle::new(a, b, c, 0));
        triangles.push(SoundTriangle::new(a, c, d, 0));
    }
    Arc::new(SoundMesh::build(corners.to_vec(), &triangles, vec![material]).unwrap())
}

fn simple_source(position: Vec3) -> SoundSource {
    let mut source = SoundSource::new(position);
    source.direct_attenuation = DistanceAttenuation::new(1.0, 0.0, 0.0);
    source.reverb_attenuation = DistanceAttenuation::new(1.0, 0.0, 0.0);
    source
}

fn direct_paths(buffer: &PropagationPathBuffer, source_index: usize) -> Vec<&et_propagate::PropagationPath> {
    buffer.source_buffer(source_index)
        .paths
        .iter()
        .filter(|path| path.id.depth() == 0)
        .collect()
}

#[test]
fn free_field_direct_path() {
    init_logging();
    let mut scene = SoundScene::new();
    scene.add_source(simple_source(vec3(0.0, 1.5, 5.0)));
    let mut listener = SoundListener::new(vec3(0.0, 1.5, 0.0));
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    propagator.propagate(&mut scene, &mut listener, 4, 100, 4, 10, &mut buffer);

    assert_eq!(buffer.num_sources(), 1);
    let paths = &buffer.source_buffer(0).paths;
    assert_eq!(paths.len(), 1, "free field must emit exactly the direct path");

    let path = &paths[0];
    assert_relative_eq!(path.distance, 5.0, epsilon = 1.0e-4);
    let delay = path.distance / path.speed_of_sound;
    assert_relative_eq!(delay, 5.0 / SPEED_OF_SOUND, epsilon = 1.0e-6);
    // Identity orientation: world +Z is listener +Z.
    assert!(path.direction.distance(vec3(0.0, 0.0, 1.0)) < 1.0e-4);
    // No geometry: attenuation is pure directivity (unity here).
    for band in 0..NUM_BANDS {
        assert!((path.attenuation[band] - 1.0).abs() < 1.0e-6);
    }
    assert_eq!(path.id.depth(), 0);
    assert_eq!(path.id.points().len(), 2);
}

#[test]
fn box_room_first_order_reflections() {
    init_logging();
    let material = SoundMaterial::default();
    let mesh = box_mesh(
        vec3(-2.0, 0.0, -4.0),
        vec3(2.0, 3.0, 4.0),
        material,
        true,
    );
    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(0.0, 1.5, -3.0)));
    let mut listener = SoundListener::new(vec3(0.0, 1.5, 0.0));
    let mut propagator = SoundPropagator::new();
    propagator.diffraction_enabled = false;
    let mut buffer = PropagationPathBuffer::new();

    // A couple of hundred frames; the probe cache accumulates the stable
    // reflection set.
    for _ in 0..200 {
        propagator.propagate(&mut scene, &mut listener, 4, 1000, 4, 100, &mut buffer);
    }

    let paths = &buffer.source_buffer(0).paths;
    let direct: Vec<_> = direct_paths(&buffer, 0);
    assert_eq!(direct.len(), 1);
    assert!((direct[0].distance - 3.0).abs() < 1.0e-3);

    // Expected first-order mirror distances:
    // floor/ceiling (y=0 / y=3): 2*sqrt(1.5^2 + ...) via images at y=-1.5, y=4.5
    let image_distances = [
        (vec3(0.0, -1.5, -3.0), "floor"),
        (vec3(0.0, 4.5, -3.0), "ceiling"),
        (vec3(-4.0, 1.5, -3.0), "left wall"),
        (vec3(4.0, 1.5, -3.0), "right wall"),
        (vec3(0.0, 1.5, -5.0), "back wall"),
        (vec3(0.0, 1.5, 11.0), "front wall"),
    ];
    let first_order: Vec<_> = paths.iter().filter(|p| p.id.depth() == 1).collect();
    assert!(
        first_order.len() >= 4,
        "expected most first-order reflections, got {}",
        first_order.len()
    );
    for path in &first_order {
        let image_match = image_distances.iter().any(|(image, _)| {
            (image.distance(listener.position) - path.distance).abs() < 1.0e-2
        });
        assert!(
            image_match,
            "first-order path distance {} matches no wall image",
            path.distance
        );
    }

    // Path count settles: re-running another frame keeps the set stable.
    let count = paths.len();
    propagator.propagate(&mut scene, &mut listener, 4, 1000, 4, 100, &mut buffer);
    let count_after = buffer.source_buffer(0).paths.len();
    assert!((count as i64 - count_after as i64).unsigned_abs() <= count as u64 / 4 + 2);
}

#[test]
fn edge_diffraction_around_occluding_wall() {
    // A zero-thickness wall in the x = 0 plane with a free vertical edge at
    // z = 0. Source and listener face each other through the wall; the only
    // way around is to bend at that edge.
    let material = SoundMaterial::new(
        FrequencyResponse::flat(0.9),
        FrequencyResponse::flat(0.0),
        FrequencyResponse::flat(0.0),
    );
    let vertices = vec![
        vec3(0.0, 0.0, -2.0),
        vec3(0.0, 0.0, 0.0),
        vec3(0.0, 3.0, 0.0),
        vec3(0.0, 3.0, -2.0),
    ];
    let triangles = [
        SoundTriangle::new(0, 1, 2, 0),
        SoundTriangle::new(0, 2, 3, 0),
    ];
    let mesh = Arc::new(SoundMesh::build(vertices, &triangles, vec![material]).unwrap());

    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(2.0, 1.5, -1.0)));
    let mut listener = SoundListener::new(vec3(-2.0, 1.5, -1.0));
    let mut propagator = SoundPropagator::new();
    propagator.transmission_enabled = false;
    let mut buffer = PropagationPathBuffer::new();

    for _ in 0..50 {
        propagator.propagate(&mut scene, &mut listener, 4, 2000, 0, 0, &mut buffer);
    }

    assert!(
        direct_paths(&buffer, 0).is_empty(),
        "direct path must be occluded by the wall"
    );

    let paths = &buffer.source_buffer(0).paths;
    let diffraction: Vec<_> = paths
        .iter()
        .filter(|p| {
            p.id.depth() == 1
                && p.id
                    .points()
                    .iter()
                    .any(|point| matches!(point, PathPoint::Diffraction { .. }))
        })
        .collect();
    assert!(
        !diffraction.is_empty(),
        "expected a first-order diffraction path around the wall edge"
    );

    for path in &diffraction {
        // Bending at the edge (0, 1.5, 0) gives 2 * sqrt(4 + 1) ~ 4.47 m.
        assert!(path.distance > 4.0, "distance {}", path.distance);
        assert!(path.distance < 6.0, "distance {}", path.distance);
        // Strictly inside the shadow: the 1 kHz gain sits below the
        // shadow-boundary value of 1.
        assert!(path.attenuation[4] < 1.0);
        assert!(path.attenuation[4] >= 0.0);
    }
}

#[test]
fn transmission_through_thin_wall() {
    let material = SoundMaterial::new(
        FrequencyResponse::flat(0.5),
        FrequencyResponse::flat(0.5),
        FrequencyResponse::flat(0.5),
    );
    // One large triangle between listener and source.
    let vertices = vec![
        vec3(-10.0, -10.0, 2.0),
        vec3(10.0, -10.0, 2.0),
        vec3(0.0, 20.0, 2.0),
    ];
    let triangles = [SoundTriangle::new(0, 1, 2, 0)];
    let mesh = Arc::new(SoundMesh::build(vertices, &triangles, vec![material]).unwrap());

    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(0.0, 0.0, 4.0)));
    let mut listener = SoundListener::new(vec3(0.0, 0.0, 0.0));
    let mut propagator = SoundPropagator::new();
    propagator.reflection_enabled = false;
    propagator.diffraction_enabled = false;
    let mut buffer = PropagationPathBuffer::new();

    propagator.propagate(&mut scene, &mut listener, 0, 0, 0, 0, &mut buffer);

    let paths = &buffer.source_buffer(0).paths;
    assert_eq!(paths.len(), 1, "expected exactly the transmitted path");
    let path = &paths[0];
    assert!((path.distance - 4.0).abs() < 1.0e-4);
    // Single boundary: ((1 - R) * A)^2 = ((1 - 0.5) * 0.5)^2 = 0.0625.
    for band in 0..NUM_BANDS {
        assert!((path.attenuation[band] - 0.0625).abs() < 1.0e-5);
    }
}

#[test]
fn transmission_through_two_walls() {
    let material = SoundMaterial::new(
        FrequencyResponse::flat(0.5),
        FrequencyResponse::flat(0.5),
        FrequencyResponse::flat(0.5),
    );
    // Two parallel walls one meter apart delimit a material interval.
    let vertices = vec![
        vec3(-10.0, -10.0, 1.5),
        vec3(10.0, -10.0, 1.5),
        vec3(0.0, 20.0, 1.5),
        vec3(-10.0, -10.0, 2.5),
        vec3(10.0, -10.0, 2.5),
        vec3(0.0, 20.0, 2.5),
    ];
    let triangles = [
        SoundTriangle::new(0, 1, 2, 0),
        SoundTriangle::new(3, 4, 5, 0),
    ];
    let mesh = Arc::new(SoundMesh::build(vertices, &triangles, vec![material]).unwrap());

    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(0.0, 0.0, 4.0)));
    let mut listener = SoundListener::new(vec3(0.0, 0.0, 0.0));
    let mut propagator = SoundPropagator::new();
    propagator.reflection_enabled = false;
    propagator.diffraction_enabled = false;
    let mut buffer = PropagationPathBuffer::new();

    propagator.propagate(&mut scene, &mut listener, 0, 0, 0, 0, &mut buffer);

    let paths = &buffer.source_buffer(0).paths;
    assert_eq!(paths.len(), 1);
    let path = &paths[0];
    // Boundary pair: (1 - R) * A at each crossing, transmission^length for
    // the interval between them: 0.25 * 0.25 * 0.5^1 = 0.03125.
    for band in 0..NUM_BANDS {
        assert!(
            (path.attenuation[band] - 0.03125).abs() < 1.0e-5,
            "band {band}: {}",
            path.attenuation[band]
        );
    }
}

#[test]
fn single_wall_reflection_matches_image_source() {
    let material = SoundMaterial::default();
    // One large wall in the z = 2 plane.
    let vertices = vec![
        vec3(-10.0, -10.0, 2.0),
        vec3(10.0, -10.0, 2.0),
        vec3(10.0, 10.0, 2.0),
        vec3(-10.0, 10.0, 2.0),
    ];
    let triangles = [
        SoundTriangle::new(0, 1, 2, 0),
        SoundTriangle::new(0, 2, 3, 0),
    ];
    let mesh = Arc::new(SoundMesh::build(vertices, &triangles, vec![material]).unwrap());

    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(1.0, 0.0, 0.0)));
    let mut listener = SoundListener::new(vec3(0.0, 0.0, 0.0));
    let mut propagator = SoundPropagator::new();
    propagator.diffraction_enabled = false;
    let mut buffer = PropagationPathBuffer::new();

    for _ in 0..20 {
        propagator.propagate(&mut scene, &mut listener, 2, 2000, 0, 0, &mut buffer);
    }

    let paths = &buffer.source_buffer(0).paths;
    let reflection = paths
        .iter()
        .find(|p| p.id.depth() == 1)
        .expect("wall reflection not found");

    // Image of the source across z = 2 sits at (1, 0, 4).
    let expected = vec3(1.0, 0.0, 4.0).distance(listener.position);
    assert!(
        (reflection.distance - expected).abs() < 1.0e-2,
        "distance {} vs image {}",
        reflection.distance,
        expected
    );
    // One bounce multiplies the material's reflection response in.
    let material_reflection = SoundMaterial::default();
    for band in 0..NUM_BANDS {
        assert!(
            (reflection.attenuation[band] - material_reflection.reflection()[band]).abs() < 1.0e-4,
            "band {band}"
        );
    }
}

#[test]
fn closed_box_reverb_statistics() {
    let material = SoundMaterial::default();
    let mesh = box_mesh(vec3(0.0, 0.0, 0.0), vec3(4.0, 4.0, 4.0), material, true);
    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(2.0, 2.0, 2.0)));
    let mut listener = SoundListener::new(vec3(1.0, 2.0, 2.0));
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    for _ in 0..20 {
        propagator.propagate(&mut scene, &mut listener, 4, 2000, 8, 500, &mut buffer);
    }

    let reverb = &buffer.source_buffer(0).reverb;
    // Surface area of a 4 m cube: 96 m^2; volume 64 m^3. The stochastic
    // estimates converge within a generous tolerance.
    assert!(
        (reverb.surface_area - 96.0).abs() < 15.0,
        "surface area estimate {} too far from 96",
        reverb.surface_area
    );
    assert!(
        (reverb.volume - 64.0).abs() < 20.0,
        "volume estimate {} too far from 64",
        reverb.volume
    );

    // Eyring reverb time at 1 kHz from the estimated statistics matches the
    // closed-form value computed from the true box within ~10%.
    let alpha = reverb.surface_attenuation[4].clamp(1.0e-6, 0.999);
    let t_estimated =
        (-4.0 * (1.0e-6f32).ln() / SPEED_OF_SOUND) * reverb.volume / (96.0 * -(alpha.ln()));
    let material_alpha = material.reflection()[4];
    let t_reference =
        (-4.0 * (1.0e-6f32).ln() / SPEED_OF_SOUND) * 64.0 / (96.0 * -(material_alpha.ln()));
    assert!(
        (t_estimated - t_reference).abs() / t_reference < 0.25,
        "estimated T60 {t_estimated} vs reference {t_reference}"
    );

    // With unity distance rolloff and both endpoints inside the box, the
    // reverb send gain is live.
    assert!(reverb.distance_attenuation[4] > 0.0);
}

#[test]
fn reverb_send_follows_direct_distance_rolloff() {
    // Two sources at the same spot in the same box, with the direct and
    // reverb rolloffs swapped between them. The reverb send gain scales
    // with the direct polynomial evaluated at the mean free path, so the
    // source whose *direct* rolloff is heavy gets a quiet send and the one
    // whose *reverb* rolloff is heavy does not.
    let flat = DistanceAttenuation::new(1.0, 0.0, 0.0);
    let heavy = DistanceAttenuation::new(1.0, 0.0, 100.0);

    let material = SoundMaterial::default();
    let mesh = box_mesh(vec3(0.0, 0.0, 0.0), vec3(4.0, 4.0, 4.0), material, true);
    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());

    let mut flat_direct = SoundSource::new(vec3(2.0, 2.0, 2.0));
    flat_direct.direct_attenuation = flat;
    flat_direct.reverb_attenuation = heavy;
    scene.add_source(flat_direct);

    let mut heavy_direct = SoundSource::new(vec3(2.0, 2.0, 2.0));
    heavy_direct.direct_attenuation = heavy;
    heavy_direct.reverb_attenuation = flat;
    scene.add_source(heavy_direct);

    let mut listener = SoundListener::new(vec3(1.0, 2.0, 2.0));
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    for _ in 0..20 {
        propagator.propagate(&mut scene, &mut listener, 4, 2000, 8, 500, &mut buffer);
    }

    let flat_send = buffer.source_buffer(0).reverb.distance_attenuation[4];
    let heavy_send = buffer.source_buffer(1).reverb.distance_attenuation[4];

    // Mean free path of the 4 m cube is ~2.7 m; the heavy rolloff cuts the
    // send by two to three orders of magnitude there.
    assert!(
        flat_send > 0.1,
        "flat direct rolloff should leave the send audible, got {flat_send}"
    );
    assert!(
        heavy_send < 0.05,
        "heavy direct rolloff should choke the send, got {heavy_send}"
    );
    assert!(flat_send > 10.0 * heavy_send);
}

#[test]
fn doppler_relative_speed_on_moving_source() {
    let mut scene = SoundScene::new();
    let mut source = simple_source(vec3(0.0, 1.5, 5.0));
    // Receding along the listener-to-source direction (+Z).
    source.velocity = vec3(0.0, 0.0, 10.0);
    scene.add_source(source);
    let mut listener = SoundListener::new(vec3(0.0, 1.5, 0.0));
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    propagator.propagate(&mut scene, &mut listener, 0, 0, 0, 0, &mut buffer);

    let paths = &buffer.source_buffer(0).paths;
    assert_eq!(paths.len(), 1);
    let path = &paths[0];
    assert!((path.relative_speed - 10.0).abs() < 1.0e-4);
    let delay_change_per_second = path.relative_speed / path.speed_of_sound;
    assert!((delay_change_per_second - 10.0 / SPEED_OF_SOUND).abs() < 1.0e-6);
}

#[test]
fn disabled_source_emits_nothing() {
    let mut scene = SoundScene::new();
    let mut source = simple_source(vec3(0.0, 0.0, 5.0));
    source.enabled = false;
    scene.add_source(source);
    let mut listener = SoundListener::new(Vec3::ZERO);
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    propagator.propagate(&mut scene, &mut listener, 4, 100, 4, 10, &mut buffer);

    assert_eq!(buffer.num_sources(), 1);
    assert!(buffer.source_buffer(0).paths.is_empty());
}

#[test]
fn path_distance_never_below_straight_line() {
    let material = SoundMaterial::default();
    let mesh = box_mesh(vec3(-3.0, 0.0, -3.0), vec3(3.0, 3.0, 3.0), material, true);
    let mut scene = SoundScene::new();
    scene.add_object(mesh, Transform3::default());
    scene.add_source(simple_source(vec3(1.0, 1.5, 1.0)));
    let mut listener = SoundListener::new(vec3(-1.0, 1.5, -1.0));
    let mut propagator = SoundPropagator::new();
    let mut buffer = PropagationPathBuffer::new();

    for _ in 0..20 {
        propagator.propagate(&mut scene, &mut listener, 4, 1000, 4, 100, &mut buffer);
    }

    let straight = listener.position.distance(vec3(1.0, 1.5, 1.0));
    for path in &buffer.source_buffer(0).paths {
        assert!(
            path.distance >= straight - 1.0e-3,
            "path distance {} below straight-line {}",
            path.distance,
            straight
        );
    }
}
