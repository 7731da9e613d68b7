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

//! A driver that replays a prepared sequence of readings.
//!
//! Each poll hands out the next scripted batch. Once the script is
//! exhausted the driver goes silent (empty polls), which is exactly the
//! shape of a device falling off the wire as far as lifecycle tracking
//! is concerned. A looping driver replays its script forever instead.

use neura_core::driver::{DriverError, PeripheralDriver, Reading};
use neura_core::event::ProducerId;
use std::collections::VecDeque;
use std::time::Duration;

/// Replays scripted reading batches at a fixed poll cadence.
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    producer: ProducerId,
    interval: Duration,
    script: VecDeque<Vec<Reading>>,
    looped: bool,
}

impl ScriptedDriver {
    /// An empty script for the given producer and poll cadence.
    pub fn new(producer: impl Into<ProducerId>, interval: Duration) -> Self {
        Self {
            producer: producer.into(),
            interval,
            script: VecDeque::new(),
            looped: false,
        }
    }

    /// Appends a batch delivered by one future poll.
    pub fn with_batch(mut self, readings: Vec<Reading>) -> Self {
        self.script.push_back(readings);
        self
    }

    /// Appends a single-reading batch.
    pub fn with_reading(self, reading: Reading) -> Self {
        self.with_batch(vec![reading])
    }

    /// Makes the script repeat from the start instead of going silent.
    pub fn looping(mut self) -> Self {
        self.looped = true;
        self
    }

    /// Batches not yet handed out (one full cycle when looping).
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PeripheralDriver for ScriptedDriver {
    fn producer_id(&self) -> ProducerId {
        self.producer.clone()
    }

    fn poll(&mut self) -> Result<Vec<Reading>, DriverError> {
        match self.script.pop_front() {
            Some(batch) => {
                if self.looped {
                    self.script.push_back(batch.clone());
                }
                Ok(batch)
            }
            None => Ok(Vec::new()),
        }
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}
