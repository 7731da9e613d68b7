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

//! # Neura Control
//!
//! Control-plane services running on top of a [`neura_core::EventBus`]:
//! the lifecycle tracker judging producer availability from event
//! traffic, and the render scheduler pacing a renderer against measured
//! cost.
//!
//! Both services own a background thread with the same contract: `start`
//! spawns it, `stop` joins it, dropping the service stops it.

#![warn(missing_docs)]

pub mod lifecycle;
pub mod pacing;
pub mod samples;
pub mod scheduler;

pub use lifecycle::{LifecycleState, LifecycleTracker, LIFECYCLE_TOPIC_PREFIX};
pub use pacing::PacingController;
pub use samples::{RingBuffer, TimingSample};
pub use scheduler::{RenderScheduler, SchedulerStats};
