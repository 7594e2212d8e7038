//! Adaptive ray budget control
//!
//! Wraps a propagator and steers ray counts toward a wall-clock frame
//! budget: additive growth while under budget, multiplicative shrink when
//! over. Overshoot is tolerated for one frame; there is no hysteresis.

use crate::buffer::PropagationPathBuffer;
use crate::propagator::SoundPropagator;
use et_scene::{SoundListener, SoundScene};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Tunables for the adaptive controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Target wall-clock budget for one propagation call, seconds.
    pub max_frame_time: f64,
    /// Listener rays added per under-budget frame.
    pub increase_amount: usize,
    /// Source rays as a fraction of listener rays.
    pub source_ray_ratio: f32,
    /// Floor for the listener ray count.
    pub min_listener_rays: usize,
    /// Floor for the source ray count.
    pub min_source_rays: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_frame_time: 0.030,
            increase_amount: 1,
            source_ray_ratio: 0.1,
            min_listener_rays: 50,
            min_source_rays: 10,
        }
    }
}

/// Drives a propagator while adapting its ray counts.
pub struct PropagationController {
    config: ControllerConfig,
    num_listener_rays: usize,
    num_source_rays: usize,
    last_frame_time: f64,
}

impl PropagationController {
    pub fn new(config: ControllerConfig) -> Self {
        let num_listener_rays = 1000.max(config.min_listener_rays);
        let num_source_rays = 100.max(config.min_source_rays);
        Self {
            config,
            num_listener_rays,
            num_source_rays,
            last_frame_time: 0.0,
        }
    }

    pub fn with_ray_counts(
        config: ControllerConfig,
        num_listener_rays: usize,
        num_source_rays: usize,
    ) -> Self {
        Self {
            num_listener_rays: num_listener_rays.max(config.min_listener_rays),
            num_source_rays: num_source_rays.max(config.min_source_rays),
            config,
            last_frame_time: 0.0,
        }
    }

    #[inline]
    pub fn num_listener_rays(&self) -> usize {
        self.num_listener_rays
    }

    #[inline]
    pub fn num_source_rays(&self) -> usize {
        self.num_source_rays
    }

    /// Wall-clock duration of the previous propagation call, seconds.
    #[inline]
    pub fn last_frame_time(&self) -> f64 {
        self.last_frame_time
    }

    #[inline]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one propagation tick with the current ray budget, then adapt the
    /// budget from the measured duration.
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &mut self,
        propagator: &mut SoundPropagator,
        scene: &mut SoundScene,
        listener: &mut SoundListener,
        max_listener_depth: usize,
        max_source_depth: usize,
        buffer: &mut PropagationPathBuffer,
    ) {
        let start = Instant::now();
        propagator.propagate(
            scene,
            listener,
            max_listener_depth,
            self.num_listener_rays,
            max_source_depth,
            self.num_source_rays,
            buffer,
        );
        self.last_frame_time = start.elapsed().as_secs_f64();
        self.adapt();
    }

    fn adapt(&mut self) {
        if self.last_frame_time <= 0.0 {
            return;
        }
        if self.last_frame_time < self.config.max_frame_time {
            self.num_listener_rays += self.config.increase_amount;
            self.num_source_rays = ((self.num_listener_rays as f32
                * self.config.source_ray_ratio) as usize)
                .max(self.config.min_source_rays);
        } else {
            let shrink = (self.config.max_frame_time / self.last_frame_time) as f32;
            self.num_listener_rays = ((self.num_listener_rays as f32 * shrink) as usize)
                .max(self.config.min_listener_rays);
            self.num_source_rays = ((self.num_source_rays as f32 * shrink) as usize)
                .max(self.config.min_source_rays);
            debug!(
                "over frame budget ({:.1} ms), shrinking to {} listener rays",
                self.last_frame_time * 1.0e3,
                self.num_listener_rays
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> PropagationController {
        PropagationController::with_ray_counts(ControllerConfig::default(), 1000, 100)
    }

    #[test]
    fn under_budget_grows_additively() {
        let mut controller = controller();
        controller.last_frame_time = 0.001;
        controller.adapt();
        assert_eq!(controller.num_listener_rays(), 1001);
        assert_eq!(controller.num_source_rays(), 100);
    }

    #[test]
    fn over_budget_shrinks_multiplicatively() {
        let mut controller = controller();
        controller.last_frame_time = 0.060; // 2x budget
        controller.adapt();
        assert_eq!(controller.num_listener_rays(), 500);
        assert_eq!(controller.num_source_rays(), 50);
    }

    #[test]
    fn shrink_respects_minima() {
        let mut controller =
            PropagationController::with_ray_counts(ControllerConfig::default(), 60, 12);
        controller.last_frame_time = 3.0;
        controller.adapt();
        assert_eq!(controller.num_listener_rays(), 50);
        assert_eq!(controller.num_source_rays(), 10);
    }

    #[test]
    fn zero_frame_time_changes_nothing() {
        let mut controller = controller();
        controller.last_frame_time = 0.0;
        controller.adapt();
        assert_eq!(controller.num_listener_rays(), 1000);
    }
}
