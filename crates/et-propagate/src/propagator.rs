//! The propagation engine
//!
//! One `propagate` call per simulation tick runs the pipeline in order:
//! 1. prepare the output buffer
//! 2. revalidate probe paths cached on earlier frames
//! 3. direct and transmitted paths, one ray per source
//! 4. listener probe rays: specular reflection discovery via the
//!    image-source method plus edge diffraction candidates
//! 5. source probe rays: statistical reverb estimation
//! 6. cache aging
//!
//! Validation failures reject candidates silently; the engine never errors
//! at runtime.

use crate::buffer::{PropagationPathBuffer, ReverbResponse, SourcePathBuffer};
use crate::diffraction::diffraction_response;
use crate::path::{PathId, PathPoint, PropagationPath};
use et_core::{FrequencyResponse, NUM_BANDS};
use et_scene::{
    ray_triangle_intersection, resolve_triangle, EdgeType, ListenerProbeRecord, Plane3, ProbePath,
    Ray3, RayTracer, SoundListener, SoundScene, SoundSource, SourceProbeRecord, TransmissionHit,
    WorldSpaceTriangle,
};
use glam::{Mat3, Vec3};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One probe bounce: the struck triangle and the listener's image after
/// reflecting across every plane up to and including this one.
#[derive(Debug, Clone, Copy)]
struct ProbeRecord {
    triangle: WorldSpaceTriangle,
    image_position: Vec3,
}

/// The listener fields the path finders read.
#[derive(Debug, Clone, Copy)]
struct ListenerView {
    position: Vec3,
    velocity: Vec3,
    orientation: Mat3,
}

impl ListenerView {
    fn of(listener: &SoundListener) -> Self {
        Self {
            position: listener.position,
            velocity: listener.velocity,
            orientation: listener.orientation,
        }
    }

    #[inline]
    fn world_to_listener(&self, direction: Vec3) -> Vec3 {
        self.orientation.transpose() * direction
    }
}

/// A validated reflection sub-path.
struct ReflectionValidation {
    total_distance: f32,
    direction_from_listener: Vec3,
    direction_to_source: Vec3,
    attenuation: FrequencyResponse,
}

/// The propagation engine.
///
/// Owns no scene state; per-frame caches live on the listener and sources.
pub struct SoundPropagator {
    /// Emit direct (unoccluded) paths.
    pub direct_enabled: bool,
    /// Emit transmitted paths through occluders.
    pub transmission_enabled: bool,
    /// Validate specular reflection paths.
    pub reflection_enabled: bool,
    /// Search diffracting edges for shadow-region paths.
    pub diffraction_enabled: bool,
    /// Gather reverb statistics from source probes.
    pub reverb_enabled: bool,
    ray_epsilon: f32,
    max_reverb_cache_age: u64,
    time_stamp: u64,
    rng: ChaCha8Rng,
    // Scratch reused across frames.
    description: PathId,
    records: Vec<ProbeRecord>,
    transmission_hits: Vec<TransmissionHit>,
}

impl SoundPropagator {
    pub fn new() -> Self {
        Self {
            direct_enabled: true,
            transmission_enabled: true,
            reflection_enabled: true,
            diffraction_enabled: true,
            reverb_enabled: true,
            ray_epsilon: 1.0e-4,
            max_reverb_cache_age: 10,
            time_stamp: 0,
            rng: ChaCha8Rng::seed_from_u64(0x5EED_CAFE),
            description: PathId::new(),
            records: Vec::new(),
            transmission_hits: Vec::new(),
        }
    }

    /// Intersection bias distance used to step off surfaces.
    pub fn ray_epsilon(&self) -> f32 {
        self.ray_epsilon
    }

    pub fn set_ray_epsilon(&mut self, epsilon: f32) {
        self.ray_epsilon = epsilon.max(0.0);
    }

    /// Frames a probed triangle or probe path may go unseen before removal.
    pub fn max_reverb_cache_age(&self) -> u64 {
        self.max_reverb_cache_age
    }

    pub fn set_max_reverb_cache_age(&mut self, age: u64) {
        self.max_reverb_cache_age = age.max(1);
    }

    /// Reseed the probe direction stream, for reproducible runs.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Run one tick of sound propagation.
    ///
    /// Fills `buffer` with one `SourcePathBuffer` per scene source. The
    /// scene's object BVH is refreshed first if objects moved.
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &mut self,
        scene: &mut SoundScene,
        listener: &mut SoundListener,
        max_listener_depth: usize,
        num_listener_rays: usize,
        max_source_depth: usize,
        num_source_rays: usize,
        buffer: &mut PropagationPathBuffer,
    ) {
        let speed_of_sound = scene.speed_of_sound();
        let (geometry, sources) = scene.split_sources();
        let tracer = RayTracer::new(geometry);

        buffer.prepare(sources);

        self.validate_cached_paths(&tracer, listener, sources, speed_of_sound, buffer);
        self.add_direct_paths(&tracer, listener, sources, speed_of_sound, buffer);

        if !geometry.objects.is_empty() {
            if max_listener_depth > 0 && num_listener_rays > 0 {
                self.listener_propagation(
                    &tracer,
                    listener,
                    sources,
                    max_listener_depth,
                    num_listener_rays,
                    speed_of_sound,
                    buffer,
                );
            }
            if max_source_depth > 0 && num_source_rays > 0 {
                self.source_propagation(
                    &tracer,
                    listener,
                    sources,
                    max_source_depth,
                    num_source_rays,
                    buffer,
                );
            }
        }

        debug!(
            "frame {}: {} paths across {} sources, {} cached probe paths",
            self.time_stamp,
            buffer.total_paths(),
            buffer.num_sources(),
            listener.probe_paths.len(),
        );
        self.time_stamp += 1;
    }

    /// Revalidate probe paths kept from earlier frames, emitting any paths
    /// that still hold and dropping paths that produced nothing last frame.
    fn validate_cached_paths(
        &mut self,
        tracer: &RayTracer<'_>,
        listener: &mut SoundListener,
        sources: &[SoundSource],
        speed_of_sound: f32,
        buffer: &mut PropagationPathBuffer,
    ) {
        let view = ListenerView::of(listener);
        let ray_epsilon = self.ray_epsilon;
        let reflection_enabled = self.reflection_enabled;
        let diffraction_enabled = self.diffraction_enabled;
        let description = &mut self.description;
        let records = &mut self.records;

        listener.probe_paths.retain(|probe_path| {
            if !probe_path.found_paths {
                return false;
            }

            // Rebuild the bounce records from the current listener position.
            records.clear();
            let mut image_position = view.position;
            for &triangle in probe_path.triangles() {
                let Some(world) = WorldSpaceTriangle::resolve(tracer.geometry(), triangle) else {
                    // The object vanished; the path cannot validate again.
                    return false;
                };
                image_position = world.plane.reflect_point(image_position);
                records.push(ProbeRecord {
                    triangle: world,
                    image_position,
                });
            }

            let mut found = false;
            if reflection_enabled {
                for (index, source) in sources.iter().enumerate() {
                    if !source.enabled {
                        continue;
                    }
                    description.clear();
                    description.push(PathPoint::Source(source.id()));
                    if let Some(validation) = validate_reflection_path(
                        tracer,
                        ray_epsilon,
                        description,
                        source.position,
                        view.position,
                        source.radius,
                        records,
                    ) {
                        description.push(PathPoint::Listener);
                        emit_reflection_path(
                            buffer.source_buffer_mut(index),
                            &view,
                            source,
                            &validation,
                            speed_of_sound,
                            description,
                        );
                        found = true;
                    }
                }
            }

            if diffraction_enabled {
                if let Some(last) = records.pop() {
                    found |= add_diffraction_paths(
                        tracer,
                        ray_epsilon,
                        description,
                        &view,
                        sources,
                        &last.triangle,
                        records,
                        speed_of_sound,
                        buffer,
                    );
                }
            }

            probe_path.found_paths = found;
            true
        });
    }

    /// Direct and transmitted paths: one ray from the listener to each
    /// enabled source.
    fn add_direct_paths(
        &mut self,
        tracer: &RayTracer<'_>,
        listener: &SoundListener,
        sources: &[SoundSource],
        speed_of_sound: f32,
        buffer: &mut PropagationPathBuffer,
    ) {
        let view = ListenerView::of(listener);

        for (index, source) in sources.iter().enumerate() {
            if !source.enabled {
                continue;
            }
            let mut to_source = source.position - view.position;
            let distance = to_source.length();
            if distance <= f32::EPSILON {
                continue;
            }
            to_source /= distance;
            let ray = Ray3::new(view.position, to_source);

            let mut attenuation = FrequencyResponse::default();
            let unoccluded = !tracer.occluded(&ray, distance - source.radius);

            let emit = if self.direct_enabled && unoccluded {
                true
            } else if self.transmission_enabled {
                trace_transmission_ray(
                    tracer,
                    &ray,
                    distance,
                    &mut self.transmission_hits,
                    &mut attenuation,
                )
            } else {
                false
            };

            if emit {
                self.description.clear();
                self.description.push(PathPoint::Source(source.id()));
                self.description.push(PathPoint::Listener);

                let relative_speed = relative_speed(&view, to_source, source, to_source);
                attenuation *= source_directivity(source, to_source);

                buffer.source_buffer_mut(index).paths.push(PropagationPath {
                    direction: view.world_to_listener(to_source),
                    distance,
                    relative_speed,
                    speed_of_sound,
                    attenuation,
                    id: self.description.clone(),
                });
            }
        }
    }

    /// Shoot probe rays from the listener, discovering reflection and
    /// diffraction paths and feeding the probed-triangle cache.
    #[allow(clippy::too_many_arguments)]
    fn listener_propagation(
        &mut self,
        tracer: &RayTracer<'_>,
        listener: &mut SoundListener,
        sources: &[SoundSource],
        max_depth: usize,
        num_rays: usize,
        speed_of_sound: f32,
        buffer: &mut PropagationPathBuffer,
    ) {
        let view = ListenerView::of(listener);
        let ray_epsilon = self.ray_epsilon;
        let time_stamp = self.time_stamp;
        let distribution = &mut listener.ray_distribution;
        let probe_paths = &mut listener.probe_paths;
        let probed_triangles = &mut listener.probed_triangles;

        let affinity_sum = distribution.sum();
        if affinity_sum <= 0.0 {
            return;
        }
        let rays_per_cell = num_rays as f32 / affinity_sum;

        let mut probe_path = ProbePath::new();

        for cell in 0..distribution.cell_count() {
            let num_cell_rays = ((distribution.affinity(cell) * rays_per_cell) as usize).max(1);
            let (longitude_low, longitude_high) = distribution.cell_longitudes(cell);
            let (latitude_low, latitude_high) = distribution.cell_latitudes(cell);

            for _ in 0..num_cell_rays {
                probe_path.clear();
                self.records.clear();

                let longitude = self.rng.random_range(longitude_low..longitude_high);
                let latitude = self.rng.random_range(latitude_low..latitude_high);
                let direction = Vec3::new(
                    longitude.cos() * latitude.sin(),
                    latitude.cos(),
                    longitude.sin() * latitude.sin(),
                );
                let mut ray = Ray3::new(view.position, direction);
                let first_ray_direction = view.world_to_listener(direction);

                let mut image_position = view.position;

                for _ in 0..max_depth {
                    let Some(hit) = tracer.closest_hit(&ray) else {
                        distribution.penalize(cell);
                        break;
                    };

                    probe_path.push_triangle(hit.triangle);
                    let not_visited = !probe_paths.contains(&probe_path);

                    let Some(world) = WorldSpaceTriangle::resolve(tracer.geometry(), hit.triangle)
                    else {
                        break;
                    };
                    let normal = world.plane.normal;
                    let ray_dot_normal = ray.direction.dot(normal);

                    probed_triangles.insert(
                        hit.triangle,
                        ListenerProbeRecord {
                            ray_dot_normal,
                            first_ray_direction,
                            time_stamp,
                        },
                    );

                    // Reflect the probe ray, stepping off the surface.
                    let mut intersection = ray.at(hit.distance);
                    let reflected = ray.direction - 2.0 * ray_dot_normal * normal;
                    let bias = normal * ray_epsilon;
                    intersection += if ray_dot_normal < 0.0 { bias } else { -bias };
                    ray = Ray3::new(intersection, reflected);

                    let mut found = false;
                    if not_visited && self.diffraction_enabled {
                        found = add_diffraction_paths(
                            tracer,
                            ray_epsilon,
                            &mut self.description,
                            &view,
                            sources,
                            &world,
                            &self.records,
                            speed_of_sound,
                            buffer,
                        );
                    }

                    image_position = world.plane.reflect_point(image_position);
                    self.records.push(ProbeRecord {
                        triangle: world,
                        image_position,
                    });

                    if not_visited {
                        if self.reflection_enabled {
                            for (index, source) in sources.iter().enumerate() {
                                if !source.enabled {
                                    continue;
                                }
                                self.description.clear();
                                self.description.push(PathPoint::Source(source.id()));
                                if let Some(validation) = validate_reflection_path(
                                    tracer,
                                    ray_epsilon,
                                    &mut self.description,
                                    source.position,
                                    view.position,
                                    source.radius,
                                    &self.records,
                                ) {
                                    self.description.push(PathPoint::Listener);
                                    emit_reflection_path(
                                        buffer.source_buffer_mut(index),
                                        &view,
                                        source,
                                        &validation,
                                        speed_of_sound,
                                        &self.description,
                                    );
                                    found = true;
                                }
                            }
                        }

                        if found {
                            distribution.reward(cell);
                        }
                        probe_path.found_paths = found;
                        probe_paths.insert(&probe_path);
                    }
                }
            }
        }

        // Age out listener-probed triangles.
        let max_age = self.max_reverb_cache_age;
        probed_triangles.retain(|_, record| time_stamp - record.time_stamp < max_age);
    }

    /// Shoot uniform probe rays from each source and derive its reverb
    /// statistics from the triangles both endpoints have seen recently.
    fn source_propagation(
        &mut self,
        tracer: &RayTracer<'_>,
        listener: &SoundListener,
        sources: &mut [SoundSource],
        max_depth: usize,
        num_rays: usize,
        buffer: &mut PropagationPathBuffer,
    ) {
        let ray_epsilon = self.ray_epsilon;
        let time_stamp = self.time_stamp;
        let max_age = self.max_reverb_cache_age;
        let total_rays = (num_rays * max_depth).max(1);

        for (index, source) in sources.iter_mut().enumerate() {
            if !source.enabled {
                continue;
            }

            let mut valid_hits = 0usize;
            let mut total_free_path = 0.0f32;

            for _ in 0..num_rays {
                let direction = random_unit_vector(&mut self.rng);
                let mut ray = Ray3::new(source.position + direction * source.radius, direction);

                for _ in 0..max_depth {
                    let Some(hit) = tracer.closest_hit(&ray) else {
                        break;
                    };
                    let Some(world) = WorldSpaceTriangle::resolve(tracer.geometry(), hit.triangle)
                    else {
                        break;
                    };
                    let normal = world.plane.normal;
                    let ray_dot_normal = ray.direction.dot(normal);

                    let mut intersection = ray.at(hit.distance);
                    let reflected = ray.direction - 2.0 * ray_dot_normal * normal;
                    let bias = normal * ray_epsilon;
                    intersection += if ray_dot_normal < 0.0 { bias } else { -bias };
                    ray = Ray3::new(intersection, reflected);

                    valid_hits += 1;
                    if self.reverb_enabled {
                        total_free_path += hit.distance;
                        source.probed_triangles.insert(
                            hit.triangle,
                            SourceProbeRecord {
                                ray_dot_normal,
                                time_stamp,
                            },
                        );
                    }
                }
            }

            // Accumulate area statistics while aging out stale records.
            let mut total_surface_area = 0.0f32;
            let mut listener_overlap_area = 0.0f32;
            let mut attenuation_area = FrequencyResponse::flat(0.0);

            source.probed_triangles.retain(|triangle, record| {
                let age = time_stamp - record.time_stamp;
                if age >= max_age {
                    return false;
                }
                let Some((object, mesh_triangle)) = resolve_triangle(tracer.geometry(), *triangle)
                else {
                    return false;
                };
                let scale = object.transform().scale;
                let area = scale * scale * mesh_triangle.area();
                total_surface_area += area;
                let material = object.mesh().material(mesh_triangle.material_index());
                attenuation_area += *material.reflection() * area;

                if let Some(listener_record) = listener.probed_triangles.get(triangle) {
                    // The overlap only counts when both endpoints probed the
                    // same face of the triangle.
                    if record.ray_dot_normal.signum() == listener_record.ray_dot_normal.signum() {
                        let source_weight = 1.0 - age as f32 / max_age as f32;
                        let listener_age = time_stamp - listener_record.time_stamp;
                        let listener_weight = 1.0 - listener_age as f32 / max_age as f32;
                        listener_overlap_area += area * 0.5 * (source_weight + listener_weight);
                    }
                }
                true
            });

            let void_fraction = valid_hits as f32 / total_rays as f32;
            let mean_free_path = if valid_hits > 0 {
                total_free_path / valid_hits as f32
            } else {
                0.0
            };
            let total_volume = total_surface_area * mean_free_path / 4.0;

            let reverb = if total_surface_area <= f32::EPSILON {
                ReverbResponse::default()
            } else {
                let overlap_ratio = listener_overlap_area / total_surface_area;
                let average_attenuation = attenuation_area * (1.0 / total_surface_area);
                let scalar = overlap_ratio
                    * source.distance_attenuation(mean_free_path)
                    * void_fraction;
                ReverbResponse {
                    volume: total_volume,
                    surface_area: total_surface_area,
                    surface_attenuation: average_attenuation,
                    distance_attenuation: average_attenuation * scalar,
                }
            };
            buffer.source_buffer_mut(index).reverb = reverb;
        }
    }
}

impl Default for SoundPropagator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a reflection path backwards from the deepest bounce using the
/// image-source method, appending one `Reflection` point per bounce.
///
/// Returns None (leaving `description` partially extended) if any bounce
/// misses its triangle or an occlusion test fails; callers reset the
/// description before reuse.
fn validate_reflection_path(
    tracer: &RayTracer<'_>,
    ray_epsilon: f32,
    description: &mut PathId,
    source_position: Vec3,
    listener_position: Vec3,
    source_radius: f32,
    records: &[ProbeRecord],
) -> Option<ReflectionValidation> {
    let mut total_distance = 0.0f32;
    let mut attenuation = FrequencyResponse::default();
    let mut virtual_source = source_position;
    let mut virtual_radius = source_radius;
    let mut direction_to_source = Vec3::ZERO;

    for (step, record) in records.iter().rev().enumerate() {
        let triangle = &record.triangle;
        let image = record.image_position;

        let mut ray_direction = virtual_source - image;
        let ray_distance = ray_direction.length();
        if ray_distance <= f32::EPSILON {
            return None;
        }
        ray_direction /= ray_distance;

        // The segment from the listener image to the virtual source must
        // pass through the reflecting triangle.
        let t = ray_triangle_intersection(
            image,
            ray_direction,
            triangle.v1,
            triangle.v2,
            triangle.v3,
        )?;
        if t > ray_distance {
            return None;
        }

        // Step the new virtual source off the source side of the plane.
        virtual_source = image + ray_direction * t;
        let bias = triangle.plane.normal * ray_epsilon;
        virtual_source += if ray_direction.dot(triangle.plane.normal) > 0.0 {
            bias
        } else {
            -bias
        };

        if tracer.occluded(
            &Ray3::new(virtual_source, ray_direction),
            ray_distance - t - ray_epsilon - virtual_radius,
        ) {
            return None;
        }

        let (object, mesh_triangle) = resolve_triangle(tracer.geometry(), triangle.triangle)?;
        attenuation *= *object.mesh().material(mesh_triangle.material_index()).reflection();
        total_distance += ray_distance - t;
        description.push(PathPoint::Reflection(triangle.triangle));

        if step == 0 {
            // Virtual sources past the first reflection have no radius.
            virtual_radius = 0.0;
            direction_to_source = ray_direction;
        }
    }

    // Final leg: listener to the innermost reflection point.
    let mut direction_from_listener = virtual_source - listener_position;
    let ray_distance = direction_from_listener.length();
    if ray_distance <= f32::EPSILON {
        return None;
    }
    direction_from_listener /= ray_distance;

    if tracer.occluded(&Ray3::new(listener_position, direction_from_listener), ray_distance) {
        return None;
    }
    total_distance += ray_distance;

    if records.is_empty() {
        direction_to_source = direction_from_listener;
    }

    Some(ReflectionValidation {
        total_distance,
        direction_from_listener,
        direction_to_source,
        attenuation,
    })
}

/// Search the diffracting edges of a probed triangle for valid paths into
/// the shadow region, one candidate per enabled source.
#[allow(clippy::too_many_arguments)]
fn add_diffraction_paths(
    tracer: &RayTracer<'_>,
    ray_epsilon: f32,
    description: &mut PathId,
    view: &ListenerView,
    sources: &[SoundSource],
    probed: &WorldSpaceTriangle,
    records: &[ProbeRecord],
    speed_of_sound: f32,
    buffer: &mut PropagationPathBuffer,
) -> bool {
    let Some((object, mesh_triangle)) = resolve_triangle(tracer.geometry(), probed.triangle) else {
        return false;
    };
    let transform = *object.transform();
    let mesh = object.mesh().clone();
    let mut found = false;

    let listener_image = records
        .last()
        .map(|record| record.image_position)
        .unwrap_or(view.position);

    for edge in 0..3 {
        if mesh_triangle.edge_type(edge) != EdgeType::Diffracting {
            continue;
        }

        let free_vertex = probed.free_vertex(edge);
        let (shared_v1, shared_v2) = probed.edge_vertices(edge);

        // Face the probed plane toward the listener image.
        let probed_plane = if probed.plane.signed_distance(listener_image) < 0.0 {
            probed.plane.flipped()
        } else {
            probed.plane
        };

        // The plane of the neighboring face; an unshared edge behaves like a
        // fold straight back on itself.
        let mut neighbor_plane = probed_plane.flipped();

        // Half-plane bounding the shadow region, oriented into it.
        let mut shadow_boundary = Plane3::from_points(listener_image, shared_v1, shared_v2);
        if shadow_boundary.signed_distance(free_vertex) < 0.0 {
            shadow_boundary = shadow_boundary.flipped();
        }

        if let Some(neighbor_index) = mesh_triangle.neighbor(edge) {
            let neighbor = mesh.triangle(neighbor_index);
            // The neighbor's vertex off the shared edge, found through its
            // backlink to the probed triangle.
            let back_edge = (0..3).find(|&e| {
                neighbor.neighbor(e) == Some(probed.triangle.triangle)
            });
            let Some(back_edge) = back_edge else {
                continue;
            };
            let neighbor_free_vertex =
                transform.point_to_world(mesh.vertex(neighbor.free_vertex_index(back_edge)));

            // If the neighbor's free vertex is on the listener's side of the
            // probed plane we are looking at the interior of the edge.
            if probed_plane.signed_distance(neighbor_free_vertex) > 0.0 {
                continue;
            }

            neighbor_plane = transform.plane_to_world(neighbor.plane());
            // Orient the neighbor normal away from the probed free vertex so
            // both normals point outward from the wedge.
            if neighbor_plane.signed_distance(free_vertex) > 0.0 {
                neighbor_plane = neighbor_plane.flipped();
            }
            if neighbor_plane.signed_distance(listener_image) > 0.0 {
                continue;
            }
        }

        let mut edge_vector = shared_v2 - shared_v1;
        let edge_length = edge_vector.length();
        if edge_length <= f32::EPSILON {
            continue;
        }
        edge_vector /= edge_length;

        for (index, source) in sources.iter().enumerate() {
            if !source.enabled {
                continue;
            }
            let source_position = source.position;

            // The source must lie inside the diffraction wedge.
            if shadow_boundary.signed_distance(source_position) < 0.0
                || neighbor_plane.signed_distance(source_position) < 0.0
            {
                continue;
            }

            let listener_to_source = (source_position - listener_image).normalize_or_zero();

            // Point on the edge line closest to the listener-source line.
            let Some(edge_t) = closest_approach_on_second_line(
                listener_image,
                listener_to_source,
                shared_v1,
                edge_vector,
            ) else {
                continue;
            };
            if !(0.0..=edge_length).contains(&edge_t) {
                continue;
            }
            let diffraction_point = shared_v1 + edge_vector * edge_t;

            let mut to_source = source_position - diffraction_point;
            let source_distance = to_source.length();
            if source_distance <= f32::EPSILON {
                continue;
            }
            to_source /= source_distance;

            if tracer.occluded(
                &Ray3::new(diffraction_point + to_source * ray_epsilon, to_source),
                source_distance - source.radius,
            ) {
                continue;
            }

            let to_listener = (listener_image - diffraction_point).normalize_or_zero();

            description.clear();
            description.push(PathPoint::Source(source.id()));
            description.push(PathPoint::Diffraction {
                triangle: probed.triangle,
                edge: edge as u8,
            });

            // The reflection sub-path up to the edge must itself validate,
            // with the diffraction point standing in for the source.
            let Some(validation) = validate_reflection_path(
                tracer,
                ray_epsilon,
                description,
                diffraction_point + to_listener * ray_epsilon,
                view.position,
                0.0,
                records,
            ) else {
                continue;
            };

            let mut attenuation = validation.attenuation
                * diffraction_response(
                    source_position,
                    view.position,
                    diffraction_point,
                    neighbor_plane.normal,
                    probed_plane.normal,
                    edge_vector,
                    speed_of_sound,
                );
            attenuation *= source_directivity(source, to_source);

            let source_speed = source.velocity.dot(to_source);
            let listener_speed = view.velocity.dot(validation.direction_from_listener);

            description.push(PathPoint::Listener);

            buffer.source_buffer_mut(index).paths.push(PropagationPath {
                direction: view.world_to_listener(validation.direction_from_listener),
                distance: validation.total_distance + source_distance,
                relative_speed: source_speed - listener_speed,
                speed_of_sound,
                attenuation,
                id: description.clone(),
            });
            found = true;
        }
    }

    found
}

/// Accumulate frequency-dependent attenuation of an all-hits transmission
/// ray. Returns false when the ray crosses no boundary.
fn trace_transmission_ray(
    tracer: &RayTracer<'_>,
    ray: &Ray3,
    max_distance: f32,
    hits: &mut Vec<TransmissionHit>,
    attenuation: &mut FrequencyResponse,
) -> bool {
    if !tracer.all_hits(ray, max_distance, hits) {
        return false;
    }
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    if hits.len() == 1 {
        // A lone boundary: a thin wall crossed once, absorbing on the way in
        // and out.
        let Some((object, triangle)) = resolve_triangle(tracer.geometry(), hits[0].triangle) else {
            return false;
        };
        let material = object.mesh().material(triangle.material_index());
        for band in 0..NUM_BANDS {
            let boundary = (1.0 - material.reflection()[band]) * material.absorption()[band];
            attenuation[band] = boundary * boundary;
        }
        return true;
    }

    *attenuation = FrequencyResponse::default();
    let mut pair = 0;
    while pair + 1 < hits.len() {
        let enter = &hits[pair];
        let exit = &hits[pair + 1];
        let segment_length = exit.distance - enter.distance;

        let Some((enter_object, enter_triangle)) =
            resolve_triangle(tracer.geometry(), enter.triangle)
        else {
            return false;
        };
        let Some((exit_object, exit_triangle)) = resolve_triangle(tracer.geometry(), exit.triangle)
        else {
            return false;
        };
        let enter_material = enter_object.mesh().material(enter_triangle.material_index());
        let exit_material = exit_object.mesh().material(exit_triangle.material_index());

        for band in 0..NUM_BANDS {
            let enter_boundary =
                (1.0 - enter_material.reflection()[band]) * enter_material.absorption()[band];
            let exit_boundary =
                (1.0 - exit_material.reflection()[band]) * exit_material.absorption()[band];
            let interior = 0.5
                * (enter_material.transmission()[band] + exit_material.transmission()[band]);
            attenuation[band] *=
                interior.powf(segment_length) * enter_boundary * exit_boundary;
        }
        pair += 2;
    }
    true
}

/// Blend the source's on- and off-axis responses for a path whose last leg
/// runs along `direction` (unit, pointing from the receiving point toward
/// the source). A source facing straight back down the path is fully
/// on-axis.
fn source_directivity(source: &SoundSource, direction: Vec3) -> FrequencyResponse {
    if source.is_directional {
        let amount_on_axis = (1.0 - source.direction.dot(direction)) * 0.5;
        source.on_axis_response * amount_on_axis
            + source.off_axis_response * (1.0 - amount_on_axis)
    } else {
        source.on_axis_response
    }
}

/// Relative speed of source and listener along a path. Positive values mean
/// the endpoints are separating and the delay grows.
fn relative_speed(
    view: &ListenerView,
    direction_from_listener: Vec3,
    source: &SoundSource,
    direction_to_source: Vec3,
) -> f32 {
    source.velocity.dot(direction_to_source) - view.velocity.dot(direction_from_listener)
}

fn emit_reflection_path(
    buffer: &mut SourcePathBuffer,
    view: &ListenerView,
    source: &SoundSource,
    validation: &ReflectionValidation,
    speed_of_sound: f32,
    description: &PathId,
) {
    let relative = relative_speed(
        view,
        validation.direction_from_listener,
        source,
        validation.direction_to_source,
    );
    let attenuation =
        validation.attenuation * source_directivity(source, validation.direction_to_source);
    buffer.paths.push(PropagationPath {
        direction: view.world_to_listener(validation.direction_from_listener),
        distance: validation.total_distance,
        relative_speed: relative,
        speed_of_sound,
        attenuation,
        id: description.clone(),
    });
}

/// Parameter on the second line of the closest approach between two lines.
/// None when the lines are near parallel.
fn closest_approach_on_second_line(p1: Vec3, v1: Vec3, p2: Vec3, v2: Vec3) -> Option<f32> {
    let v1_dot_v2 = v1.dot(v2);
    let denominator = 1.0 - v1_dot_v2 * v1_dot_v2;
    if denominator.abs() < 1.0e-6 {
        return None;
    }
    let p2_to_p1 = p1 - p2;
    Some((p2_to_p1.dot(v2) - p2_to_p1.dot(v1) * v1_dot_v2) / denominator)
}

/// Uniform random direction on the unit sphere.
fn random_unit_vector(rng: &mut ChaCha8Rng) -> Vec3 {
    loop {
        let candidate = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let length = candidate.length();
        if length > 1.0e-3 && length <= 1.0 {
            return candidate / length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_approach_of_crossing_lines() {
        // Line 1 along X at origin, line 2 along Y passing through (3, -1, 0).
        let t = closest_approach_on_second_line(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(3.0, -1.0, 0.0),
            Vec3::Y,
        )
        .unwrap();
        assert!((t - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn closest_approach_rejects_parallel() {
        let t = closest_approach_on_second_line(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::X,
        );
        assert!(t.is_none());
    }

    #[test]
    fn random_directions_are_unit() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let v = random_unit_vector(&mut rng);
            assert!((v.length() - 1.0).abs() < 1.0e-5);
        }
    }

    #[test]
    fn directivity_blends_axes() {
        let mut source = SoundSource::new(Vec3::ZERO);
        source.direction = Vec3::NEG_Z;
        source.is_directional = true;
        source.on_axis_response = FrequencyResponse::flat(1.0);
        source.off_axis_response = FrequencyResponse::flat(0.0);

        // Straight ahead: fully off-axis blend weight is zero.
        let ahead = source_directivity(&source, Vec3::NEG_Z);
        // Straight behind: fully on-axis weight.
        let behind = source_directivity(&source, Vec3::Z);
        assert!(ahead[0] < behind[0]);
    }
}
