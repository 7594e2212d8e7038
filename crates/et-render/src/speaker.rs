//! Speaker configurations and amplitude panning

use glam::{vec3, Vec3};
use serde::{Deserialize, Serialize};

/// One output channel with its direction in listener space.
///
/// Listener space is right-handed with -Z forward, +X right, +Y up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub direction: Vec3,
}

/// An ordered set of speakers defining the output channel layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerConfiguration {
    speakers: Vec<Speaker>,
}

impl SpeakerConfiguration {
    /// A layout from explicit speaker directions; directions are
    /// normalized, zero vectors fall back to forward.
    pub fn new(directions: impl IntoIterator<Item = Vec3>) -> Self {
        let speakers = directions
            .into_iter()
            .map(|direction| Speaker {
                direction: if direction.length_squared() > 0.0 {
                    direction.normalize()
                } else {
                    Vec3::NEG_Z
                },
            })
            .collect();
        Self { speakers }
    }

    /// Single speaker straight ahead.
    pub fn mono() -> Self {
        Self::new([Vec3::NEG_Z])
    }

    /// Stereo pair at +/-45 degrees.
    pub fn stereo() -> Self {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        Self::new([vec3(-s, 0.0, -s), vec3(s, 0.0, -s)])
    }

    /// Quad layout at +/-45 front and +/-135 rear.
    pub fn quad() -> Self {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        Self::new([
            vec3(-s, 0.0, -s),
            vec3(s, 0.0, -s),
            vec3(-s, 0.0, s),
            vec3(s, 0.0, s),
        ])
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.speakers.len()
    }

    #[inline]
    pub fn speakers(&self) -> &[Speaker] {
        &self.speakers
    }

    /// Constant-power pan gains for a sound arriving from `direction`
    /// (listener space). Writes one gain per channel into `gains`.
    pub fn pan_gains(&self, direction: Vec3, gains: &mut Vec<f32>) {
        gains.clear();
        gains.resize(self.speakers.len(), 0.0);
        if self.speakers.is_empty() {
            return;
        }
        let direction = direction.normalize_or_zero();

        let mut power = 0.0f32;
        for (gain, speaker) in gains.iter_mut().zip(&self.speakers) {
            *gain = speaker.direction.dot(direction).max(0.0);
            power += *gain * *gain;
        }

        if power > 1.0e-8 {
            let scale = power.sqrt().recip();
            for gain in gains.iter_mut() {
                *gain *= scale;
            }
        } else {
            // No speaker faces the source; spread it evenly.
            let equal = (self.speakers.len() as f32).sqrt().recip();
            for gain in gains.iter_mut() {
                *gain = equal;
            }
        }
    }
}

impl Default for SpeakerConfiguration {
    fn default() -> Self {
        Self::stereo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frontal_source_pans_center() {
        let config = SpeakerConfiguration::stereo();
        let mut gains = Vec::new();
        config.pan_gains(Vec3::NEG_Z, &mut gains);
        assert_eq!(gains.len(), 2);
        assert_relative_eq!(gains[0], gains[1], epsilon = 1.0e-6);
        // Constant power.
        assert_relative_eq!(gains[0] * gains[0] + gains[1] * gains[1], 1.0, epsilon = 1.0e-5);
    }

    #[test]
    fn hard_left_source_favors_left() {
        let config = SpeakerConfiguration::stereo();
        let mut gains = Vec::new();
        config.pan_gains(Vec3::NEG_X, &mut gains);
        assert!(gains[0] > 0.9);
        assert!(gains[1] < 0.1);
    }

    #[test]
    fn rear_source_still_has_power() {
        let config = SpeakerConfiguration::stereo();
        let mut gains = Vec::new();
        config.pan_gains(Vec3::Z, &mut gains);
        let power: f32 = gains.iter().map(|g| g * g).sum();
        assert!(power > 0.5);
    }
}
