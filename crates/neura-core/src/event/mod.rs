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

//! The typed event model shared by producers, the bus, and the store.
//!
//! An [`Event`] is an immutable value: once constructed it is passed by
//! value into the bus and never mutated. Identity is the
//! `(topic, producer)` pair; the payload is a closed [`Payload`] enum so
//! downstream aggregation never needs to know where a reading came from.

pub mod bus;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// String identifier categorizing the shape and meaning of a payload,
/// e.g. `"switch.pressed"` or `"dial.rotated"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Creates a topic from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the topic as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable identifier of the hardware-facing worker that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(String);

impl ProducerId {
    /// Creates a producer id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProducerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The value carried by an event.
///
/// Closed set of shapes a normalized reading can take. Numeric variants
/// participate in `sum` aggregation via [`Payload::as_f64`]; everything
/// else aggregates by replacement or history only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// A pure occurrence with no data (e.g. a button tap).
    Signal,
    /// A boolean reading (e.g. switch closed/open).
    Bool(bool),
    /// A signed integer reading (e.g. an encoder step count).
    Integer(i64),
    /// A floating point reading (e.g. a dial position).
    Float(f64),
    /// A free-form text reading.
    Text(String),
    /// A structured reading for payloads with internal shape.
    Json(serde_json::Value),
}

impl Payload {
    /// Numeric view of the payload, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Integer(v) => Some(*v as f64),
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view of the payload, when it has one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the payload, when it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Signal => write!(f, "signal"),
            Payload::Bool(v) => write!(f, "{}", v),
            Payload::Integer(v) => write!(f, "{}", v),
            Payload::Float(v) => write!(f, "{}", v),
            Payload::Text(v) => write!(f, "{}", v),
            Payload::Json(v) => write!(f, "{}", v),
        }
    }
}

/// An immutable normalized reading flowing through the bus.
///
/// Created by a producer, consumed by value in
/// [`EventBus::emit`](bus::EventBus::emit). The timestamp is monotonic
/// (`Instant`), taken at construction.
#[derive(Debug, Clone)]
pub struct Event {
    /// What kind of reading this is.
    pub topic: Topic,
    /// Which producer emitted it.
    pub producer: ProducerId,
    /// Monotonic construction time.
    pub timestamp: Instant,
    /// The normalized value.
    pub payload: Payload,
}

impl Event {
    /// Builds an event stamped with the current monotonic time.
    pub fn new(
        topic: impl Into<Topic>,
        producer: impl Into<ProducerId>,
        payload: Payload,
    ) -> Self {
        Self {
            topic: topic.into(),
            producer: producer.into(),
            timestamp: Instant::now(),
            payload,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} = {}", self.topic, self.producer, self.payload)
    }
}
