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

//! # Neura Core
//!
//! Foundational crate of the coordination layer: the typed event model,
//! the synchronous bus, the latest-value state store, and the contracts
//! drivers and renderers implement.

#![warn(missing_docs)]

pub mod config;
pub mod driver;
pub mod event;
pub mod render;
pub mod state;
pub mod time;

pub use event::bus::EventBus;
pub use event::{Event, Payload, ProducerId, Topic};
pub use state::StateStore;
pub use time::Stopwatch;
