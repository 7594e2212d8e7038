//! Frequency partitions for band-split rendering
//!
//! A partition is an ordered list of split frequencies dividing the audible
//! range into N+1 rendering bands. The renderer splits each source's audio
//! at these frequencies and applies per-band gains averaged from the
//! propagation output's 8-band responses.

use crate::response::BAND_CENTER_FREQUENCIES;
use crate::NUM_BANDS;
use serde::{Deserialize, Serialize};

/// Ordered split frequencies defining rendering bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPartition {
    split_frequencies: Vec<f32>,
}

impl FrequencyPartition {
    /// Create a partition from the given split frequencies.
    ///
    /// Non-finite and non-positive frequencies are discarded; the remainder
    /// is sorted ascending and deduplicated.
    pub fn new(split_frequencies: impl IntoIterator<Item = f32>) -> Self {
        let mut splits: Vec<f32> = split_frequencies
            .into_iter()
            .filter(|f| f.is_finite() && *f > 0.0)
            .collect();
        splits.sort_by(|a, b| a.total_cmp(b));
        splits.dedup();
        Self {
            split_frequencies: splits,
        }
    }

    /// A partition with a single full-range band.
    pub fn full_range() -> Self {
        Self {
            split_frequencies: Vec::new(),
        }
    }

    /// Insert one split frequency, keeping the list sorted.
    ///
    /// Out-of-range values are ignored.
    pub fn add_split_frequency(&mut self, frequency: f32) {
        if !frequency.is_finite() || frequency <= 0.0 {
            return;
        }
        match self
            .split_frequencies
            .binary_search_by(|f| f.total_cmp(&frequency))
        {
            Ok(_) => {}
            Err(index) => self.split_frequencies.insert(index, frequency),
        }
    }

    /// The sorted split frequencies.
    pub fn split_frequencies(&self) -> &[f32] {
        &self.split_frequencies
    }

    /// Number of rendering bands (splits + 1).
    pub fn num_bands(&self) -> usize {
        self.split_frequencies.len() + 1
    }

    /// The frequency range `(low, high)` covered by rendering band `band`.
    ///
    /// The outermost bands extend to the lowest and highest band-response
    /// center frequencies so that averaging a `FrequencyResponse` over the
    /// range covers the full spectrum.
    pub fn band_range(&self, band: usize) -> (f32, f32) {
        debug_assert!(band < self.num_bands());
        let low = if band == 0 {
            BAND_CENTER_FREQUENCIES[0]
        } else {
            self.split_frequencies[band - 1]
        };
        let high = if band == self.split_frequencies.len() {
            BAND_CENTER_FREQUENCIES[NUM_BANDS - 1]
        } else {
            self.split_frequencies[band]
        };
        (low, high)
    }
}

impl Default for FrequencyPartition {
    /// Four bands split at 250, 1000, and 4000 Hz.
    fn default() -> Self {
        Self::new([250.0, 1000.0, 4000.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_sorts() {
        let partition =
            FrequencyPartition::new([4000.0, f32::NAN, 250.0, -10.0, f32::INFINITY, 1000.0, 0.0]);
        assert_eq!(partition.split_frequencies(), &[250.0, 1000.0, 4000.0]);
        assert_eq!(partition.num_bands(), 4);
    }

    #[test]
    fn splits_always_sorted_positive_finite() {
        let mut partition = FrequencyPartition::full_range();
        for f in [800.0, 100.0, f32::NAN, 100.0, 12000.0, -4.0] {
            partition.add_split_frequency(f);
        }
        let splits = partition.split_frequencies();
        assert_eq!(splits, &[100.0, 800.0, 12000.0]);
        assert!(splits.windows(2).all(|w| w[0] < w[1]));
        assert!(splits.iter().all(|f| f.is_finite() && *f > 0.0));
    }

    #[test]
    fn band_ranges_tile_the_spectrum() {
        let partition = FrequencyPartition::default();
        assert_eq!(partition.band_range(0), (67.5, 250.0));
        assert_eq!(partition.band_range(1), (250.0, 1000.0));
        assert_eq!(partition.band_range(2), (1000.0, 4000.0));
        assert_eq!(partition.band_range(3), (4000.0, 8000.0));
    }

    #[test]
    fn full_range_is_one_band() {
        let partition = FrequencyPartition::full_range();
        assert_eq!(partition.num_bands(), 1);
        assert_eq!(partition.band_range(0), (67.5, 8000.0));
    }
}
