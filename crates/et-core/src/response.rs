//! Fixed 8-band frequency response algebra
//!
//! A `FrequencyResponse` stores one linear gain coefficient per band at
//! predetermined center frequencies covering the range of human hearing:
//! 67.5, 125, 250, 500, 1000, 2000, 4000 and 8000 Hz. Band count is fixed
//! at compile time so responses multiply without allocating.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, MulAssign};
use wide::f32x8;

/// Number of frequency bands in a response
pub const NUM_BANDS: usize = 8;

/// Band center frequencies in Hz, ascending
pub const BAND_CENTER_FREQUENCIES: [f32; NUM_BANDS] =
    [67.5, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0];

/// A frequency response over the range of human hearing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResponse {
    gains: [f32; NUM_BANDS],
}

impl FrequencyResponse {
    /// Response with the given gain across all bands.
    pub fn flat(gain: f32) -> Self {
        Self {
            gains: [gain; NUM_BANDS],
        }
    }

    /// Response from explicit per-band gains, lowest band first.
    pub fn from_gains(gains: [f32; NUM_BANDS]) -> Self {
        Self { gains }
    }

    /// Center frequency of the band at `band`, in Hz.
    #[inline]
    pub fn band_center_frequency(band: usize) -> f32 {
        BAND_CENTER_FREQUENCIES[band]
    }

    /// Number of bands.
    #[inline]
    pub fn num_bands(&self) -> usize {
        NUM_BANDS
    }

    /// Per-band gains, lowest band first.
    #[inline]
    pub fn gains(&self) -> &[f32; NUM_BANDS] {
        &self.gains
    }

    /// Average gain over all bands.
    pub fn average_gain(&self) -> f32 {
        self.gains.iter().sum::<f32>() / NUM_BANDS as f32
    }

    /// Average gain of the bands whose centers fall in `[low, high]` Hz.
    ///
    /// The bounds are clamped to the center-frequency range and swapped if
    /// given out of order, so the result is invariant under argument swap.
    pub fn band_average_gain(&self, low: f32, high: f32) -> f32 {
        let min = BAND_CENTER_FREQUENCIES[0];
        let max = BAND_CENTER_FREQUENCIES[NUM_BANDS - 1];
        let mut low = low.clamp(min, max);
        let mut high = high.clamp(min, max);
        if high < low {
            std::mem::swap(&mut low, &mut high);
        }

        let low_band = BAND_CENTER_FREQUENCIES
            .iter()
            .position(|&f| f >= low)
            .unwrap_or(NUM_BANDS - 1);
        let high_band = BAND_CENTER_FREQUENCIES
            .iter()
            .position(|&f| f >= high)
            .unwrap_or(NUM_BANDS - 1);

        let sum: f32 = self.gains[low_band..=high_band].iter().sum();
        sum / (high_band - low_band + 1) as f32
    }

    /// Ramp from unity down to zero over the bands above `start_frequency`.
    ///
    /// Bands below the starting band keep unity gain; the highest band
    /// reaches zero.
    pub fn linear_high_rolloff(start_frequency: f32) -> Self {
        let start = rolloff_start_band(start_frequency);
        let mut response = Self::default();
        let num_rolloff_bands = (NUM_BANDS - start).saturating_sub(1).max(1) as f32;
        for band in start..NUM_BANDS {
            response.gains[band] = (num_rolloff_bands - (band - start) as f32) / num_rolloff_bands;
        }
        response
    }

    /// Ramp from zero at the lowest band up to unity at `start_frequency`.
    pub fn linear_low_rolloff(start_frequency: f32) -> Self {
        let start = rolloff_start_band(start_frequency);
        let mut response = Self::default();
        let num_rolloff_bands = start.max(1) as f32;
        for band in 0..=start.min(NUM_BANDS - 1) {
            response.gains[band] = (num_rolloff_bands - (start - band) as f32) / num_rolloff_bands;
        }
        response
    }

    /// True if every band gain is finite.
    pub fn is_finite(&self) -> bool {
        self.gains.iter().all(|g| g.is_finite())
    }
}

/// Index of the first band at or above the given frequency.
fn rolloff_start_band(frequency: f32) -> usize {
    let frequency = frequency.clamp(
        BAND_CENTER_FREQUENCIES[0],
        BAND_CENTER_FREQUENCIES[NUM_BANDS - 1],
    );
    BAND_CENTER_FREQUENCIES
        .iter()
        .position(|&f| f >= frequency)
        .unwrap_or(NUM_BANDS - 1)
}

impl Default for FrequencyResponse {
    /// Unity gain across all bands.
    fn default() -> Self {
        Self::flat(1.0)
    }
}

impl Index<usize> for FrequencyResponse {
    type Output = f32;

    #[inline]
    fn index(&self, band: usize) -> &f32 {
        &self.gains[band]
    }
}

impl IndexMut<usize> for FrequencyResponse {
    #[inline]
    fn index_mut(&mut self, band: usize) -> &mut f32 {
        &mut self.gains[band]
    }
}

impl Add for FrequencyResponse {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            gains: (f32x8::from(self.gains) + f32x8::from(other.gains)).to_array(),
        }
    }
}

impl AddAssign for FrequencyResponse {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Mul for FrequencyResponse {
    type Output = Self;

    #[inline]
    fn mul(self, other: Self) -> Self {
        Self {
            gains: (f32x8::from(self.gains) * f32x8::from(other.gains)).to_array(),
        }
    }
}

impl MulAssign for FrequencyResponse {
    #[inline]
    fn mul_assign(&mut self, other: Self) {
        *self = *self * other;
    }
}

impl Mul<f32> for FrequencyResponse {
    type Output = Self;

    #[inline]
    fn mul(self, gain: f32) -> Self {
        Self {
            gains: (f32x8::from(self.gains) * f32x8::splat(gain)).to_array(),
        }
    }
}

impl MulAssign<f32> for FrequencyResponse {
    #[inline]
    fn mul_assign(&mut self, gain: f32) {
        *self = *self * gain;
    }
}
