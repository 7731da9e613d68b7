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

//! Contract between the scheduler and the rendering side.

use crate::state::StateSnapshot;
use std::fmt;

/// Failure reported by a renderer for one frame.
///
/// The scheduler logs it, counts it, and keeps looping.
#[derive(Debug)]
pub enum RenderError {
    /// The frame could not be produced.
    FrameFailed(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::FrameFailed(msg) => write!(f, "Render failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

/// Consumer of state snapshots, invoked once per scheduler iteration.
///
/// The scheduler owns the thread that calls this, measures the
/// wall-clock cost of each call, and paces itself from that feedback.
pub trait Renderer: Send {
    /// Produces one frame from a point-in-time view of the state.
    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), RenderError>;
}
