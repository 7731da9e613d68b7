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

//! # Neura Runtime
//!
//! The hosting layer of the Neura peripheral runtime. It assembles the
//! shared [`EventBus`](neura_core::EventBus), the state store, the
//! lifecycle watchdog, and the paced render loop, and runs one worker
//! thread per registered driver.
//!
//! Applications construct a [`host::PeripheralRuntime`], register
//! drivers, hand it a renderer, and start it.

#![warn(missing_docs)]

pub mod drivers;
pub mod host;

pub use drivers::ScriptedDriver;
pub use host::{PeripheralRuntime, RuntimeError};

/// Everything an application embedding the runtime typically needs.
pub mod prelude {
    pub use crate::drivers::ScriptedDriver;
    pub use crate::host::{PeripheralRuntime, RuntimeError};
    pub use neura_control::lifecycle::{LifecycleState, LifecycleTracker};
    pub use neura_control::scheduler::SchedulerStats;
    pub use neura_core::config::{LifecycleConfig, PacingConfig, PacingMode, RuntimeConfig};
    pub use neura_core::driver::{DriverError, PeripheralDriver, Reading};
    pub use neura_core::event::bus::{SubscriberError, SubscriberResult, TopicFilter};
    pub use neura_core::render::{RenderError, Renderer};
    pub use neura_core::state::{
        Aggregate, Aggregation, StateEntry, StateKey, StateSnapshot, StateStore,
    };
    pub use neura_core::{Event, EventBus, Payload, ProducerId, Topic};
}
