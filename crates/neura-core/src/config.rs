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

//! Plain key/value configuration for the coordination layer.
//!
//! Durations are carried as integer milliseconds in the serialized
//! form. Every struct has sensible defaults, so partial JSON documents
//! are enough to override a single knob.

use crate::state::Aggregation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Lowest utilization target the pacing controller will accept.
pub const UTILIZATION_TARGET_MIN: f64 = 0.05;
/// Highest utilization target the pacing controller will accept.
pub const UTILIZATION_TARGET_MAX: f64 = 0.95;

/// Errors from loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The document could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which pacing strategy the render scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// Constant target period regardless of measured cost.
    Fixed,
    /// Closed-loop idle derived from recent render cost.
    Adaptive,
}

/// Render-loop pacing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Strategy the scheduler runs.
    pub mode: PacingMode,
    /// Target period in fixed mode.
    pub fixed_period_ms: u64,
    /// Floor for the computed idle interval in adaptive mode.
    pub min_interval_ms: u64,
    /// Fraction of wall-clock time to spend rendering in adaptive mode.
    pub utilization_target: f64,
    /// How many of the most recent cost samples feed the controller.
    pub cost_window: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mode: PacingMode::Adaptive,
            fixed_period_ms: 33,
            min_interval_ms: 1,
            utilization_target: 0.5,
            cost_window: 32,
        }
    }
}

impl PacingConfig {
    /// Target period for fixed mode.
    #[inline]
    pub fn fixed_period(&self) -> Duration {
        Duration::from_millis(self.fixed_period_ms)
    }

    /// Idle floor for adaptive mode.
    #[inline]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Utilization target normalized into the accepted band.
    ///
    /// A degenerate target would pin the idle computation at zero or
    /// starve rendering entirely, so out-of-range values are clamped
    /// with a warning instead of failing startup.
    pub fn clamped_target(&self) -> f64 {
        let clamped = self
            .utilization_target
            .clamp(UTILIZATION_TARGET_MIN, UTILIZATION_TARGET_MAX);
        if (clamped - self.utilization_target).abs() > f64::EPSILON {
            log::warn!(
                "Config: utilization_target {} outside [{}, {}], using {}",
                self.utilization_target,
                UTILIZATION_TARGET_MIN,
                UTILIZATION_TARGET_MAX,
                clamped
            );
        }
        clamped
    }
}

/// Producer availability timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Silence after which a producer becomes suspect.
    pub timeout_suspect_ms: u64,
    /// Additional silence after which a suspect producer is disconnected.
    pub timeout_disconnect_ms: u64,
    /// Cadence of the watchdog sweep evaluating the timeouts.
    pub sweep_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout_suspect_ms: 1_000,
            timeout_disconnect_ms: 5_000,
            sweep_interval_ms: 100,
        }
    }
}

impl LifecycleConfig {
    /// Silence threshold for the suspect transition.
    #[inline]
    pub fn timeout_suspect(&self) -> Duration {
        Duration::from_millis(self.timeout_suspect_ms)
    }

    /// Additional silence threshold for the disconnect transition.
    #[inline]
    pub fn timeout_disconnect(&self) -> Duration {
        Duration::from_millis(self.timeout_disconnect_ms)
    }

    /// Watchdog sweep cadence.
    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Top-level configuration consumed by the peripheral runtime.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Render-loop pacing.
    pub pacing: PacingConfig,
    /// Producer availability timeouts.
    pub lifecycle: LifecycleConfig,
    /// Aggregation strategy per topic; unlisted topics overwrite.
    pub aggregations: HashMap<String, Aggregation>,
}

impl RuntimeConfig {
    /// Parses a configuration from a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
