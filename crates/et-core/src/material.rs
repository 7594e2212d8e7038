//! Acoustic surface materials

use crate::response::FrequencyResponse;
use serde::{Deserialize, Serialize};

/// Acoustic properties of a surface.
///
/// Three frequency responses describe what happens to sound that meets the
/// surface:
/// - `reflection`: gain applied on a specular bounce
/// - `absorption`: gain applied to sound crossing the surface boundary
/// - `transmission`: gain per world unit of travel *inside* the material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundMaterial {
    reflection: FrequencyResponse,
    absorption: FrequencyResponse,
    transmission: FrequencyResponse,
}

impl SoundMaterial {
    pub fn new(
        reflection: FrequencyResponse,
        absorption: FrequencyResponse,
        transmission: FrequencyResponse,
    ) -> Self {
        Self {
            reflection,
            absorption,
            transmission,
        }
    }

    /// Gain applied to sound specularly reflected off this material.
    #[inline]
    pub fn reflection(&self) -> &FrequencyResponse {
        &self.reflection
    }

    /// Gain applied to sound crossing a boundary of this material.
    #[inline]
    pub fn absorption(&self) -> &FrequencyResponse {
        &self.absorption
    }

    /// Gain per unit distance for sound travelling inside this material.
    #[inline]
    pub fn transmission(&self) -> &FrequencyResponse {
        &self.transmission
    }
}

impl Default for SoundMaterial {
    /// A generic wall: strongly reflective in the mid range with rolloffs
    /// below 200 Hz and above 1 kHz, moderately absorptive, opaque.
    fn default() -> Self {
        Self {
            reflection: FrequencyResponse::linear_high_rolloff(1000.0)
                * FrequencyResponse::linear_low_rolloff(200.0)
                * 0.9,
            absorption: FrequencyResponse::flat(0.5),
            transmission: FrequencyResponse::flat(0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_material_reflects_mids_best() {
        let material = SoundMaterial::default();
        let reflection = material.reflection();
        // 500 Hz sits inside both rolloffs' flat regions.
        assert!(reflection[3] > reflection[0]);
        assert!(reflection[3] > reflection[7]);
        assert!(reflection[3] <= 0.9);
    }
}
