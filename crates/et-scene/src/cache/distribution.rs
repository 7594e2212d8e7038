//! Adaptive probe ray distribution
//!
//! The unit sphere around the listener is tiled into `divisions` longitude
//! columns by `divisions / 2` latitude rows of equal solid angle (heights
//! uniformly spaced, latitudes arcsin-spaced). Each cell holds an affinity
//! in `[min, max]`; the propagator hands cells rays in proportion to their
//! affinities, rewards cells whose rays produced paths and penalizes cells
//! whose rays escaped the scene.

use std::f32::consts::PI;

/// Importance map over probe ray directions.
#[derive(Debug, Clone)]
pub struct RayDistributionCache {
    divisions: usize,
    cells: Vec<f32>,
    min_affinity: f32,
    max_affinity: f32,
}

/// Affinity gained when a cell's ray finds at least one valid path.
const AFFINITY_REWARD: f32 = 0.1;

/// Affinity lost when a cell's ray misses all geometry.
const AFFINITY_PENALTY: f32 = 0.01;

impl RayDistributionCache {
    /// The default 10 x 5 grid.
    pub fn new() -> Self {
        Self::with_divisions(10)
    }

    /// A grid with the given number of longitude divisions, rounded up to
    /// the next even count.
    pub fn with_divisions(divisions: usize) -> Self {
        let divisions = (divisions.max(2) + 1) & !1;
        let cell_count = divisions * (divisions / 2);
        Self {
            divisions,
            cells: vec![1.0; cell_count],
            min_affinity: 0.05,
            max_affinity: 1.0,
        }
    }

    #[inline]
    pub fn divisions(&self) -> usize {
        self.divisions
    }

    /// Total number of cells: `divisions * divisions / 2`.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn min_affinity(&self) -> f32 {
        self.min_affinity
    }

    #[inline]
    pub fn max_affinity(&self) -> f32 {
        self.max_affinity
    }

    /// Set the smallest affinity a cell can reach, clamped to `[0, 1]`.
    pub fn set_min_affinity(&mut self, min_affinity: f32) {
        self.min_affinity = min_affinity.clamp(0.0, 1.0);
    }

    /// Set the largest affinity a cell can reach, clamped to `[1, 100]`.
    pub fn set_max_affinity(&mut self, max_affinity: f32) {
        self.max_affinity = max_affinity.clamp(1.0, 100.0);
    }

    #[inline]
    pub fn affinity(&self, cell: usize) -> f32 {
        self.cells[cell]
    }

    /// Ray from this cell found at least one valid propagation path.
    pub fn reward(&mut self, cell: usize) {
        self.cells[cell] = (self.cells[cell] + AFFINITY_REWARD).min(self.max_affinity);
    }

    /// Ray from this cell missed all geometry.
    pub fn penalize(&mut self, cell: usize) {
        self.cells[cell] = (self.cells[cell] - AFFINITY_PENALTY).max(self.min_affinity);
    }

    /// Sum of all cell affinities.
    pub fn sum(&self) -> f32 {
        self.cells.iter().sum()
    }

    /// Rescale affinities so their sum equals the cell count.
    pub fn normalize(&mut self) {
        let sum = self.sum();
        if sum <= 0.0 {
            return;
        }
        let multiplier = self.cells.len() as f32 / sum;
        for cell in &mut self.cells {
            *cell *= multiplier;
        }
    }

    /// Longitude range `(low, high)` in radians covered by `cell`.
    pub fn cell_longitudes(&self, cell: usize) -> (f32, f32) {
        let rows = self.divisions / 2;
        let column = cell / rows;
        let width = 2.0 * PI / self.divisions as f32;
        let low = column as f32 * width;
        (low, low + width)
    }

    /// Latitude (polar angle) range `(low, high)` in radians covered by
    /// `cell`. Rows are arcsin-spaced so every cell subtends the same solid
    /// angle.
    pub fn cell_latitudes(&self, cell: usize) -> (f32, f32) {
        let rows = self.divisions / 2;
        let row = cell % rows;
        let height = |r: usize| 1.0 - 2.0 * r as f32 / rows as f32;
        let a = height(row).clamp(-1.0, 1.0).asin() + PI * 0.5;
        let b = height(row + 1).clamp(-1.0, 1.0).asin() + PI * 0.5;
        (a.min(b), a.max(b))
    }
}

impl Default for RayDistributionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_grid_has_fifty_cells() {
        let cache = RayDistributionCache::new();
        assert_eq!(cache.cell_count(), 50);
        assert_relative_eq!(cache.sum(), 50.0);
    }

    #[test]
    fn divisions_round_up_to_even() {
        let cache = RayDistributionCache::with_divisions(7);
        assert_eq!(cache.divisions(), 8);
        assert_eq!(cache.cell_count(), 32);
    }

    #[test]
    fn affinities_stay_clamped() {
        let mut cache = RayDistributionCache::new();
        for _ in 0..1000 {
            cache.reward(0);
            cache.penalize(1);
        }
        assert_relative_eq!(cache.affinity(0), cache.max_affinity());
        assert_relative_eq!(cache.affinity(1), cache.min_affinity());
        for cell in 0..cache.cell_count() {
            let affinity = cache.affinity(cell);
            assert!(affinity >= cache.min_affinity() && affinity <= cache.max_affinity());
        }
    }

    #[test]
    fn cells_tile_the_sphere() {
        let cache = RayDistributionCache::new();
        let mut solid_angle = 0.0f32;
        for cell in 0..cache.cell_count() {
            let (lon_low, lon_high) = cache.cell_longitudes(cell);
            let (lat_low, lat_high) = cache.cell_latitudes(cell);
            assert!(lon_low < lon_high);
            assert!(lat_low < lat_high);
            // Solid angle of a (longitude x polar) patch.
            solid_angle += (lon_high - lon_low) * (lat_low.cos() - lat_high.cos());
        }
        assert_relative_eq!(solid_angle, 4.0 * PI, epsilon = 1.0e-3);
    }

    #[test]
    fn normalize_restores_cell_count_sum() {
        let mut cache = RayDistributionCache::new();
        for _ in 0..30 {
            cache.penalize(3);
        }
        cache.normalize();
        assert_relative_eq!(cache.sum(), cache.cell_count() as f32, epsilon = 1.0e-3);
    }
}
