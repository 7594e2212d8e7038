//! Edge diffraction attenuation
//!
//! Computes a per-band attenuation for sound bending over a wedge edge
//! using the Uniform Theory of Diffraction with the Kouyoumjian transition
//! function. The raw UTD coefficient is normalized by its value just inside
//! the shadow boundary, clamped to [0, 1] and squared, so the result is a
//! linear power gain of 1 at the shadow boundary falling off into the
//! shadow region.

use et_core::{FrequencyResponse, NUM_BANDS};
use glam::Vec3;
use num_complex::Complex32;
use std::f32::consts::PI;

/// Per-band UTD diffraction attenuation for one wedge geometry.
///
/// - `source_face_normal`: outward normal of the face toward the source
/// - `listener_face_normal`: outward normal of the face toward the listener
/// - `edge_axis`: unit vector along the diffracting edge
pub fn diffraction_response(
    source_position: Vec3,
    listener_position: Vec3,
    diffraction_point: Vec3,
    source_face_normal: Vec3,
    listener_face_normal: Vec3,
    edge_axis: Vec3,
    speed_of_sound: f32,
) -> FrequencyResponse {
    let source_face_vector = edge_axis.cross(source_face_normal);

    // Wedge index from the exterior angle between the faces.
    let n = 2.0 - angle_between(-source_face_normal, listener_face_normal) / PI;

    let mut source_direction = source_position - diffraction_point;
    let mut listener_direction = listener_position - diffraction_point;
    let p = source_direction.length();
    let r = listener_direction.length();
    source_direction /= p;
    listener_direction /= r;

    // Edge incidence angle, folded into [0, pi/2].
    let mut theta_i = angle_between(source_direction, edge_axis);
    if theta_i > PI * 0.5 {
        theta_i = PI - theta_i;
    }

    // Azimuths around the wedge measured from the source face, in the plane
    // perpendicular to the edge.
    let s_dir = project_to_plane(source_direction, edge_axis);
    let r_dir = project_to_plane(listener_direction, edge_axis);
    let alpha_i = angle_between(-s_dir, source_face_vector);
    let alpha_d = angle_between(r_dir, source_face_vector) + PI;

    let mut response = FrequencyResponse::default();
    for band in 0..NUM_BANDS {
        let wavelength = speed_of_sound / FrequencyResponse::band_center_frequency(band);
        let k = 2.0 * PI / wavelength;

        let utd = utd_coefficient(n, k, p, r, theta_i, alpha_i, alpha_d);
        // Value just inside the shadow boundary, for normalization.
        let boundary = utd_coefficient(n, k, p, r, theta_i, alpha_i, alpha_i + PI + 0.001);

        response[band] = if boundary > 0.0 {
            ((utd / boundary) * (utd / boundary)).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
    response
}

/// Magnitude of the UTD diffraction coefficient.
fn utd_coefficient(n: f32, k: f32, p: f32, r: f32, theta_i: f32, alpha_i: f32, alpha_d: f32) -> f32 {
    let frequency_term = utd_frequency_term(n, k, theta_i);
    let l = utd_l(p, r, theta_i);

    let f1 = transition_function(k * l * utd_alpha(alpha_d - alpha_i, n, 1));
    let f2 = transition_function(k * l * utd_alpha(alpha_d - alpha_i, n, -1));
    let f3 = transition_function(k * l * utd_alpha(alpha_d + alpha_i, n, 1));
    let f4 = transition_function(k * l * utd_alpha(alpha_d + alpha_i, n, -1));

    let cot1 = cotangent((PI + (alpha_d - alpha_i)) / (2.0 * n));
    let cot2 = cotangent((PI - (alpha_d - alpha_i)) / (2.0 * n));
    let cot3 = cotangent((PI + (alpha_d + alpha_i)) / (2.0 * n));
    let cot4 = cotangent((PI - (alpha_d + alpha_i)) / (2.0 * n));

    let mut coefficient = f1 * cot1 + f2 * cot2 + f3 * cot3 + f4 * cot4;
    coefficient *= frequency_term;
    coefficient *= unit_phasor(-k * r);
    coefficient *= spherical_spread(r, p).sqrt();

    coefficient.norm()
}

/// The `a+/-(beta)` angular measure of the transition function argument.
fn utd_alpha(beta: f32, n: f32, n_sign: i32) -> f32 {
    let big_n = utd_n(beta, n, n_sign) as f32;
    let cosine = ((2.0 * PI * n * big_n - beta) * 0.5).cos();
    2.0 * cosine * cosine
}

/// Distance parameter for spherical-wave incidence.
fn utd_l(p: f32, r: f32, theta_i: f32) -> f32 {
    let sine = theta_i.sin();
    (r * p / (p + r)) * sine * sine
}

/// The integer N+/- minimizing the argument of the transition function.
fn utd_n(beta: f32, n: f32, n_sign: i32) -> i32 {
    if n_sign > 0 {
        if beta <= PI * (n - 1.0) {
            0
        } else {
            1
        }
    } else if beta < PI * (1.0 - n) {
        -1
    } else if beta <= PI * (1.0 + n) {
        0
    } else {
        1
    }
}

/// Approximate Kouyoumjian-Pathak Fresnel transition function.
fn transition_function(x: f32) -> Complex32 {
    let phase = unit_phasor(PI * 0.25 * (x / (x + 1.4)).sqrt());
    if x < 0.8 {
        let sqrt_x = x.sqrt();
        phase * (PI * x).sqrt() * (1.0 - sqrt_x / (0.7 * sqrt_x + 1.2))
    } else {
        phase * (1.0 - 0.8 / ((x + 1.25) * (x + 1.25)))
    }
}

/// The frequency-dependent leading factor of the UTD coefficient.
fn utd_frequency_term(n: f32, k: f32, theta_i: f32) -> Complex32 {
    let numerator = unit_phasor(-PI * 0.25);
    let denominator = 2.0 * n * (2.0 * PI * k).sqrt() * theta_i.sin();
    -numerator / denominator
}

/// Spherical spreading factor for a source at `p` and receiver at `r` from
/// the apex.
fn spherical_spread(r: f32, p: f32) -> f32 {
    p / (r * (p + r))
}

fn unit_phasor(angle: f32) -> Complex32 {
    Complex32::new(angle.cos(), angle.sin())
}

fn cotangent(x: f32) -> f32 {
    if x.abs() < f32::EPSILON {
        f32::MAX
    } else {
        1.0 / x.tan()
    }
}

fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let cosine = a.normalize_or_zero().dot(b.normalize_or_zero());
    if cosine >= 1.0 {
        0.0
    } else if cosine <= -1.0 {
        PI
    } else {
        cosine.acos()
    }
}

fn project_to_plane(v: Vec3, normal: Vec3) -> Vec3 {
    v - v.dot(normal) * normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    /// A right-angle wedge along +Y: source side faces +X, listener side
    /// faces +Z, with the listener deep in shadow behind the corner.
    fn right_angle_response(listener: Vec3) -> FrequencyResponse {
        diffraction_response(
            vec3(2.0, 0.0, -1.0),
            listener,
            vec3(0.0, 0.0, 0.0),
            Vec3::X,
            Vec3::Z,
            Vec3::Y,
            343.0,
        )
    }

    #[test]
    fn gains_are_valid_power_fractions() {
        let response = right_angle_response(vec3(-2.0, 0.0, 1.5));
        for band in 0..NUM_BANDS {
            assert!(response[band].is_finite());
            assert!((0.0..=1.0).contains(&response[band]), "band {band}");
        }
    }

    #[test]
    fn deeper_shadow_attenuates_more() {
        let shallow = right_angle_response(vec3(-1.0, 0.0, 2.0));
        let deep = right_angle_response(vec3(-2.5, 0.0, 0.6));
        // Compare at 1 kHz.
        assert!(deep[4] <= shallow[4] + 1.0e-3);
    }

    #[test]
    fn higher_bands_attenuate_at_least_as_much() {
        // Diffraction bends low frequencies more readily; deep in shadow the
        // 8 kHz band must not exceed the 125 Hz band.
        let response = right_angle_response(vec3(-2.0, 0.0, 1.0));
        assert!(response[7] <= response[1] + 1.0e-3);
    }
}
