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

//! Contract between the runtime and hardware-facing drivers.

use crate::event::{Payload, ProducerId, Topic};
use std::fmt;
use std::time::Duration;

/// One normalized reading a driver hands to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Topic the reading should be emitted under.
    pub topic: Topic,
    /// The normalized value.
    pub payload: Payload,
}

impl Reading {
    /// Builds a reading.
    pub fn new(topic: impl Into<Topic>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Failure modes a driver can report from a poll.
///
/// The owning worker logs these and keeps polling; availability is
/// tracked by the lifecycle timeouts, not by the error itself.
#[derive(Debug)]
pub enum DriverError {
    /// The device answered but the reading could not be obtained.
    ReadFailed(String),
    /// The device is not reachable right now.
    Disconnected(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::ReadFailed(msg) => write!(f, "Driver read failed: {}", msg),
            DriverError::Disconnected(msg) => write!(f, "Driver disconnected: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}

/// A hardware-facing producer polled by its own runtime worker thread.
///
/// Implementations normalize raw device readings into [`Reading`]s; the
/// runtime turns those into events on the shared bus under this driver's
/// [`producer_id`](PeripheralDriver::producer_id). A driver is owned
/// exclusively by one worker, so polling takes `&mut self`.
pub trait PeripheralDriver: Send {
    /// Stable identifier for the producer this driver represents.
    fn producer_id(&self) -> ProducerId;

    /// Obtains the readings that accumulated since the previous poll.
    ///
    /// An empty vector is a normal outcome (nothing happened). Errors
    /// are absorbed by the worker; they never reach the bus.
    fn poll(&mut self) -> Result<Vec<Reading>, DriverError>;

    /// How long the worker idles between polls.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}
