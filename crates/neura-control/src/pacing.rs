// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Closed-loop idle computation for the render scheduler.
//!
//! In adaptive mode the controller re-derives the idle interval on every
//! iteration from the most recent cost samples, so
//! `cost / (cost + idle)` tracks the configured utilization target. In
//! fixed mode the target period is constant and the idle is whatever of
//! it the render cost left over.

use crate::samples::RingBuffer;
use neura_core::config::{PacingConfig, PacingMode};
use std::time::Duration;

/// How many cost samples the controller can retain.
const COST_CAPACITY: usize = 64;

/// Computes the idle interval between scheduler iterations.
#[derive(Debug)]
pub struct PacingController {
    mode: PacingMode,
    fixed_period: Duration,
    min_interval: Duration,
    target: f64,
    cost_window: usize,
    costs: RingBuffer<f32, COST_CAPACITY>,
    overruns: u64,
}

impl PacingController {
    /// Builds a controller from pacing configuration.
    ///
    /// The utilization target is normalized into the accepted band and
    /// the cost window is clamped to the buffer capacity.
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            mode: config.mode,
            fixed_period: config.fixed_period(),
            min_interval: config.min_interval(),
            target: config.clamped_target(),
            cost_window: config.cost_window.clamp(1, COST_CAPACITY),
            costs: RingBuffer::new(),
            overruns: 0,
        }
    }

    /// The strategy this controller runs.
    #[inline]
    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    /// Overruns counted so far (render cost above the pacing reference).
    #[inline]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Records one measured render cost and returns the idle interval to
    /// wait before the next iteration.
    ///
    /// Fixed mode: `period - cost`, never negative. Adaptive mode:
    /// `avg_cost * (1 - target) / target` over the recent cost window,
    /// never below the minimum interval.
    pub fn plan_idle(&mut self, render_cost: Duration) -> Duration {
        self.costs.push(render_cost.as_secs_f32() * 1_000.0);

        let reference = match self.mode {
            PacingMode::Fixed => self.fixed_period,
            PacingMode::Adaptive => self.min_interval,
        };
        if render_cost > reference {
            self.overruns += 1;
            log::debug!(
                "Pacing: overrun #{} (cost {:.2}ms above {:.2}ms)",
                self.overruns,
                render_cost.as_secs_f64() * 1_000.0,
                reference.as_secs_f64() * 1_000.0
            );
        }

        match self.mode {
            PacingMode::Fixed => self.fixed_period.saturating_sub(render_cost),
            PacingMode::Adaptive => {
                let avg_cost_ms = self.costs.recent_average(self.cost_window) as f64;
                let idle_ms = avg_cost_ms * (1.0 - self.target) / self.target;
                Duration::from_secs_f64(idle_ms.max(0.0) / 1_000.0).max(self.min_interval)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn adaptive_config(target: f64, min_interval_ms: u64) -> PacingConfig {
        PacingConfig {
            mode: PacingMode::Adaptive,
            utilization_target: target,
            min_interval_ms,
            ..PacingConfig::default()
        }
    }

    #[test]
    fn adaptive_idle_converges_to_cost_at_half_utilization() {
        let mut controller = PacingController::new(&adaptive_config(0.5, 1));

        let mut idle = Duration::ZERO;
        for _ in 0..50 {
            idle = controller.plan_idle(Duration::from_millis(10));
        }

        assert_relative_eq!(idle.as_secs_f64(), 0.010, max_relative = 0.01);
    }

    #[test]
    fn adaptive_idle_never_drops_below_min_interval() {
        // A high target asks for almost no idle; the floor must hold.
        let mut controller = PacingController::new(&adaptive_config(0.95, 5));

        let idle = controller.plan_idle(Duration::from_millis(10));
        assert_eq!(idle, Duration::from_millis(5));
    }

    #[test]
    fn adaptive_idle_tracks_a_cost_increase() {
        let mut controller = PacingController::new(&adaptive_config(0.5, 1));

        for _ in 0..COST_CAPACITY {
            controller.plan_idle(Duration::from_millis(10));
        }
        let mut idle = Duration::ZERO;
        for _ in 0..COST_CAPACITY {
            idle = controller.plan_idle(Duration::from_millis(20));
        }

        // The window is fully refreshed, so the idle follows the new cost.
        assert_relative_eq!(idle.as_secs_f64(), 0.020, max_relative = 0.01);
    }

    #[test]
    fn small_cost_window_reacts_to_the_last_sample_only() {
        let mut config = adaptive_config(0.5, 1);
        config.cost_window = 0; // clamped up to 1

        let mut controller = PacingController::new(&config);
        controller.plan_idle(Duration::from_millis(10));
        let idle = controller.plan_idle(Duration::from_millis(30));

        assert_relative_eq!(idle.as_secs_f64(), 0.030, max_relative = 0.01);
    }

    #[test]
    fn fixed_idle_is_the_leftover_period_and_never_negative() {
        let config = PacingConfig {
            mode: PacingMode::Fixed,
            fixed_period_ms: 16,
            ..PacingConfig::default()
        };
        let mut controller = PacingController::new(&config);

        assert_eq!(
            controller.plan_idle(Duration::from_millis(10)),
            Duration::from_millis(6)
        );
        assert_eq!(controller.overruns(), 0);

        assert_eq!(controller.plan_idle(Duration::from_millis(20)), Duration::ZERO);
        assert_eq!(controller.overruns(), 1);
    }

    #[test]
    fn adaptive_overrun_is_cost_above_min_interval() {
        let mut controller = PacingController::new(&adaptive_config(0.5, 5));

        controller.plan_idle(Duration::from_millis(4));
        assert_eq!(controller.overruns(), 0);

        controller.plan_idle(Duration::from_millis(6));
        controller.plan_idle(Duration::from_millis(7));
        assert_eq!(controller.overruns(), 2);
    }
}
