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

//! Keyed latest-value cache fed by the bus on every emission.
//!
//! The store keeps one [`StateEntry`] per observed `(topic, producer)`
//! key behind a `RwLock<HashMap>` (multiple readers, single writer).
//! Readers always clone, so a held [`StateSnapshot`] or a returned entry
//! is never mutated by later updates and a read can never observe a
//! half-applied entry.

use crate::event::{Event, Payload, ProducerId, Topic};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Convenience alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors surfaced by store mutation paths.
#[derive(Debug)]
pub enum StateError {
    /// The underlying lock was poisoned by a panicking writer.
    StorageError(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::StorageError(msg) => write!(f, "State storage error: {}", msg),
        }
    }
}

impl std::error::Error for StateError {}

/// How successive payloads for one topic are folded into an entry.
///
/// Selected per topic via [`StateStore::register_aggregation`]; topics
/// without a registration fall back to [`Aggregation::Overwrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Keep only the most recent payload.
    Overwrite,
    /// Keep a numeric running total alongside the latest payload.
    Sum,
    /// Keep a bounded history of payloads, oldest evicted first.
    Sequence {
        /// Maximum retained history length, at least 1.
        capacity: usize,
    },
}

/// Aggregated view accumulated inside an entry, shaped by its strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// No accumulation beyond the latest payload.
    Latest,
    /// Running numeric total of every numeric payload observed.
    Sum(f64),
    /// Bounded chronological history of payloads.
    History(VecDeque<Payload>),
}

/// Identity of one entry: which reading, from which producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// The reading's topic.
    pub topic: Topic,
    /// The emitting producer.
    pub producer: ProducerId,
}

impl StateKey {
    /// Builds a key from its two halves.
    pub fn new(topic: impl Into<Topic>, producer: impl Into<ProducerId>) -> Self {
        Self {
            topic: topic.into(),
            producer: producer.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.topic, self.producer)
    }
}

/// Latest known state for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    /// Payload of the most recent event for this key.
    pub latest: Payload,
    /// Accumulated view per the topic's strategy.
    pub aggregate: Aggregate,
    /// Timestamp of the most recent event for this key.
    pub last_updated: Instant,
    /// Number of events observed for this key.
    pub updates: u64,
}

impl StateEntry {
    fn fresh(strategy: Aggregation, event: &Event) -> Self {
        let mut aggregate = match strategy {
            Aggregation::Overwrite => Aggregate::Latest,
            Aggregation::Sum => Aggregate::Sum(0.0),
            Aggregation::Sequence { capacity } => {
                Aggregate::History(VecDeque::with_capacity(capacity))
            }
        };
        Self::fold(&mut aggregate, strategy, event);
        Self {
            latest: event.payload.clone(),
            aggregate,
            last_updated: event.timestamp,
            updates: 1,
        }
    }

    fn apply(&mut self, strategy: Aggregation, event: &Event) {
        let shape_matches = matches!(
            (&self.aggregate, strategy),
            (Aggregate::Latest, Aggregation::Overwrite)
                | (Aggregate::Sum(_), Aggregation::Sum)
                | (Aggregate::History(_), Aggregation::Sequence { .. })
        );
        if !shape_matches {
            // Strategy changed after this entry was created; reseed.
            *self = Self::fresh(strategy, event);
            return;
        }
        Self::fold(&mut self.aggregate, strategy, event);
        self.latest = event.payload.clone();
        self.last_updated = event.timestamp;
        self.updates += 1;
    }

    fn fold(aggregate: &mut Aggregate, strategy: Aggregation, event: &Event) {
        match (aggregate, strategy) {
            (Aggregate::Sum(total), Aggregation::Sum) => match event.payload.as_f64() {
                Some(value) => *total += value,
                None => log::debug!(
                    "StateStore: non-numeric payload for summed topic '{}', total unchanged",
                    event.topic
                ),
            },
            (Aggregate::History(history), Aggregation::Sequence { capacity }) => {
                history.push_back(event.payload.clone());
                while history.len() > capacity {
                    history.pop_front();
                }
            }
            _ => {}
        }
    }
}

/// A point-in-time copy of every entry, safe to hold across updates.
pub type StateSnapshot = HashMap<StateKey, StateEntry>;

/// Thread-safe latest-value cache with per-topic aggregation.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: RwLock<HashMap<StateKey, StateEntry>>,
    strategies: RwLock<HashMap<Topic, Aggregation>>,
}

impl StateStore {
    /// Creates an empty store with no registered strategies.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Selects the aggregation strategy for a topic.
    ///
    /// Takes effect on the next update for that topic; an existing
    /// entry's aggregate is reseeded when its shape no longer matches.
    /// A `sequence` capacity of 0 is raised to 1.
    pub fn register_aggregation(
        &self,
        topic: impl Into<Topic>,
        strategy: Aggregation,
    ) -> StateResult<()> {
        let topic = topic.into();
        let strategy = match strategy {
            Aggregation::Sequence { capacity: 0 } => {
                log::warn!(
                    "StateStore: sequence capacity 0 for topic '{}' raised to 1",
                    topic
                );
                Aggregation::Sequence { capacity: 1 }
            }
            other => other,
        };
        let mut strategies = self
            .strategies
            .write()
            .map_err(|_| StateError::StorageError("Failed to acquire strategy lock".to_string()))?;
        strategies.insert(topic, strategy);
        Ok(())
    }

    /// Applies one event to its entry per the topic's strategy.
    ///
    /// Creates the entry on first sight of the key. Safe to call while
    /// other threads read; readers see either the pre- or post-update
    /// entry, never a partial one.
    pub fn update(&self, event: &Event) -> StateResult<()> {
        let strategy = self.strategy_for(&event.topic);
        let key = StateKey::new(event.topic.clone(), event.producer.clone());

        let mut entries = self
            .entries
            .write()
            .map_err(|_| StateError::StorageError("Failed to acquire write lock".to_string()))?;

        match entries.get_mut(&key) {
            Some(entry) => entry.apply(strategy, event),
            None => {
                entries.insert(key, StateEntry::fresh(strategy, event));
            }
        }
        Ok(())
    }

    /// Point lookup for one key.
    ///
    /// `None` means no event has been observed for the key yet, which is
    /// distinct from any payload value.
    pub fn get_latest(
        &self,
        topic: impl Into<Topic>,
        producer: impl Into<ProducerId>,
    ) -> Option<StateEntry> {
        let key = StateKey::new(topic, producer);
        if let Ok(entries) = self.entries.read() {
            entries.get(&key).cloned()
        } else {
            None
        }
    }

    /// Copies every current entry into an owned snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        if let Ok(entries) = self.entries.read() {
            entries.clone()
        } else {
            StateSnapshot::new()
        }
    }

    /// Number of keys observed so far.
    pub fn len(&self) -> usize {
        if let Ok(entries) = self.entries.read() {
            entries.len()
        } else {
            0
        }
    }

    /// True when no event has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn strategy_for(&self, topic: &Topic) -> Aggregation {
        if let Ok(strategies) = self.strategies.read() {
            strategies
                .get(topic)
                .copied()
                .unwrap_or(Aggregation::Overwrite)
        } else {
            Aggregation::Overwrite
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn event(topic: &str, producer: &str, payload: Payload) -> Event {
        Event::new(topic, producer, payload)
    }

    #[test]
    fn overwrite_keeps_only_the_last_of_n_emissions() {
        let store = StateStore::new();
        for i in 0..10 {
            store
                .update(&event("dial.rotated", "d1", Payload::Integer(i)))
                .expect("update");
        }

        let entry = store.get_latest("dial.rotated", "d1").expect("entry");
        assert_eq!(entry.latest, Payload::Integer(9));
        assert_eq!(entry.aggregate, Aggregate::Latest);
        assert_eq!(entry.updates, 10);
    }

    #[test]
    fn sum_accumulates_numeric_payloads() {
        let store = StateStore::new();
        store
            .register_aggregation("dial.delta", Aggregation::Sum)
            .expect("register");

        for value in [1.5, 2.5, -1.0] {
            store
                .update(&event("dial.delta", "d1", Payload::Float(value)))
                .expect("update");
        }

        let entry = store.get_latest("dial.delta", "d1").expect("entry");
        assert_eq!(entry.latest, Payload::Float(-1.0));
        assert_eq!(entry.aggregate, Aggregate::Sum(3.0));
    }

    #[test]
    fn sum_leaves_total_unchanged_for_non_numeric_payloads() {
        let store = StateStore::new();
        store
            .register_aggregation("mixed", Aggregation::Sum)
            .expect("register");

        store
            .update(&event("mixed", "p1", Payload::Integer(4)))
            .expect("update");
        store
            .update(&event("mixed", "p1", Payload::Text("oops".into())))
            .expect("update");

        let entry = store.get_latest("mixed", "p1").expect("entry");
        assert_eq!(entry.aggregate, Aggregate::Sum(4.0));
        assert_eq!(entry.latest, Payload::Text("oops".into()));
    }

    #[test]
    fn sequence_evicts_oldest_beyond_capacity() {
        let store = StateStore::new();
        store
            .register_aggregation("key.typed", Aggregation::Sequence { capacity: 3 })
            .expect("register");

        for i in 0..5 {
            store
                .update(&event("key.typed", "kbd", Payload::Integer(i)))
                .expect("update");
        }

        let entry = store.get_latest("key.typed", "kbd").expect("entry");
        match entry.aggregate {
            Aggregate::History(history) => {
                let values: Vec<_> = history.iter().cloned().collect();
                assert_eq!(
                    values,
                    vec![Payload::Integer(2), Payload::Integer(3), Payload::Integer(4)],
                    "History should keep the three most recent payloads in order"
                );
            }
            other => panic!("Expected History aggregate, got {:?}", other),
        }
    }

    #[test]
    fn absent_key_is_distinct_from_default_payload() {
        let store = StateStore::new();
        assert!(store.get_latest("switch.pressed", "sw1").is_none());

        store
            .update(&event("switch.pressed", "sw1", Payload::Bool(false)))
            .expect("update");

        // A falsy payload is still a present entry.
        let entry = store.get_latest("switch.pressed", "sw1").expect("entry");
        assert_eq!(entry.latest, Payload::Bool(false));
        assert!(store.get_latest("switch.pressed", "sw2").is_none());
    }

    #[test]
    fn snapshot_is_isolated_from_later_updates() {
        let store = StateStore::new();
        store
            .update(&event("dial.rotated", "d1", Payload::Integer(1)))
            .expect("update");

        let snapshot = store.snapshot();
        store
            .update(&event("dial.rotated", "d1", Payload::Integer(2)))
            .expect("update");

        let held = snapshot
            .get(&StateKey::new("dial.rotated", "d1"))
            .expect("snapshot entry");
        assert_eq!(held.latest, Payload::Integer(1));
        let live = store.get_latest("dial.rotated", "d1").expect("entry");
        assert_eq!(live.latest, Payload::Integer(2));
    }

    #[test]
    fn strategy_registered_after_events_reseeds_on_next_update() {
        let store = StateStore::new();
        store
            .update(&event("dial.delta", "d1", Payload::Integer(5)))
            .expect("update");

        store
            .register_aggregation("dial.delta", Aggregation::Sum)
            .expect("register");
        store
            .update(&event("dial.delta", "d1", Payload::Integer(2)))
            .expect("update");

        let entry = store.get_latest("dial.delta", "d1").expect("entry");
        // The reseeded aggregate only covers events from the reseed on.
        assert_eq!(entry.aggregate, Aggregate::Sum(2.0));
        assert_eq!(entry.updates, 1);
    }

    #[test]
    fn concurrent_snapshots_never_observe_torn_entries() {
        let store = Arc::new(StateStore::new());
        let writer_store = Arc::clone(&store);

        let writer = thread::spawn(move || {
            for i in 0..1_000u64 {
                let payload = if i % 2 == 0 {
                    Payload::Text("pressed".into())
                } else {
                    Payload::Text("released".into())
                };
                writer_store
                    .update(&event("switch.state", "sw1", payload))
                    .expect("update");
            }
        });

        let mut observed = 0;
        while observed < 200 {
            let snapshot = store.snapshot();
            if let Some(entry) = snapshot.get(&StateKey::new("switch.state", "sw1")) {
                let text = entry.latest.as_str().expect("text payload");
                assert!(
                    text == "pressed" || text == "released",
                    "Snapshot exposed a torn payload: {:?}",
                    text
                );
                observed += 1;
            }
        }

        writer.join().expect("writer thread");
        let entry = store.get_latest("switch.state", "sw1").expect("entry");
        assert_eq!(entry.updates, 1_000);
    }
}
