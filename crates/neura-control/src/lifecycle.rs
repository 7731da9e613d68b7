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

//! Producer availability tracking.
//!
//! The tracker observes every event on the bus through a wildcard
//! subscription and keeps a health table keyed by producer. Silence
//! moves a producer one step at a time towards `Disconnected`; any new
//! event from a suspect or disconnected producer moves it back to
//! `Recovered`. Each transition is announced exactly once on a
//! `lifecycle.*` topic, and those announcements are themselves invisible
//! to the activity tracking so the tracker cannot keep a dead producer
//! alive with its own traffic.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use neura_core::config::LifecycleConfig;
use neura_core::event::bus::{EventBus, SubscriptionHandle, TopicFilter};
use neura_core::event::{Event, Payload, ProducerId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::thread;
use std::time::Instant;

/// Topic prefix of tracker announcements. Events under it never count
/// as producer activity.
pub const LIFECYCLE_TOPIC_PREFIX: &str = "lifecycle.";

/// Availability of one producer as judged by its event traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Producer has emitted and is within the silence budget.
    Connected,
    /// Silent past the suspect timeout, not yet written off.
    SuspectedDisconnect,
    /// Emitted again after having been suspect or disconnected.
    Recovered,
    /// Silent past the suspect and disconnect timeouts combined.
    Disconnected,
}

impl LifecycleState {
    /// Stable wire name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Connected => "connected",
            LifecycleState::SuspectedDisconnect => "suspected_disconnect",
            LifecycleState::Recovered => "recovered",
            LifecycleState::Disconnected => "disconnected",
        }
    }

    /// Topic on which entering this state is announced.
    pub fn topic(&self) -> String {
        format!("{}{}", LIFECYCLE_TOPIC_PREFIX, self.as_str())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct ProducerHealth {
    state: LifecycleState,
    last_seen: Instant,
    last_published: Option<LifecycleState>,
}

/// Shared between the tracker handle, its bus subscription, and the
/// watchdog thread.
struct TrackerInner {
    table: RwLock<HashMap<ProducerId, ProducerHealth>>,
    config: LifecycleConfig,
    // Weak: the bus owns the subscription closure owning this inner.
    bus: Weak<EventBus>,
}

impl TrackerInner {
    /// Folds one bus event into the health table.
    fn observe(&self, event: &Event) {
        if event.topic.as_str().starts_with(LIFECYCLE_TOPIC_PREFIX) {
            return;
        }

        let mut pending: Option<LifecycleState> = None;
        if let Ok(mut table) = self.table.write() {
            match table.entry(event.producer.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(ProducerHealth {
                        state: LifecycleState::Connected,
                        last_seen: event.timestamp,
                        last_published: Some(LifecycleState::Connected),
                    });
                    pending = Some(LifecycleState::Connected);
                }
                Entry::Occupied(mut slot) => {
                    let health = slot.get_mut();
                    health.last_seen = event.timestamp;
                    if matches!(
                        health.state,
                        LifecycleState::SuspectedDisconnect | LifecycleState::Disconnected
                    ) {
                        health.state = LifecycleState::Recovered;
                        if health.last_published != Some(LifecycleState::Recovered) {
                            health.last_published = Some(LifecycleState::Recovered);
                            pending = Some(LifecycleState::Recovered);
                        }
                    }
                }
            }
        }

        // Publish with the table lock released; the announcement fans
        // out to subscribers that may query the tracker re-entrantly.
        if let Some(state) = pending {
            self.publish(&event.producer, state);
        }
    }

    /// Applies the silence timeouts as of `now` and returns how many
    /// producers changed state.
    fn sweep_at(&self, now: Instant) -> usize {
        let suspect_after = self.config.timeout_suspect();
        let disconnect_after = suspect_after + self.config.timeout_disconnect();

        let mut transitions = 0usize;
        let mut pending: Vec<(ProducerId, LifecycleState)> = Vec::new();
        if let Ok(mut table) = self.table.write() {
            for (producer, health) in table.iter_mut() {
                let silent_for = now.saturating_duration_since(health.last_seen);
                let next = match health.state {
                    LifecycleState::Connected | LifecycleState::Recovered
                        if silent_for >= suspect_after =>
                    {
                        LifecycleState::SuspectedDisconnect
                    }
                    LifecycleState::SuspectedDisconnect if silent_for >= disconnect_after => {
                        LifecycleState::Disconnected
                    }
                    _ => continue,
                };

                health.state = next;
                transitions += 1;
                if health.last_published != Some(next) {
                    health.last_published = Some(next);
                    pending.push((producer.clone(), next));
                }
            }
        }

        for (producer, state) in pending {
            self.publish(&producer, state);
        }
        transitions
    }

    fn publish(&self, producer: &ProducerId, state: LifecycleState) {
        if let Some(bus) = self.bus.upgrade() {
            log::info!("Lifecycle: {} -> {}", producer, state);
            bus.emit(Event::new(
                state.topic(),
                producer.clone(),
                Payload::Text(state.as_str().to_string()),
            ));
        }
    }

    fn state_of(&self, producer: &ProducerId) -> Option<LifecycleState> {
        self.table.read().ok()?.get(producer).map(|h| h.state)
    }

    fn states(&self) -> HashMap<ProducerId, LifecycleState> {
        if let Ok(table) = self.table.read() {
            table.iter().map(|(p, h)| (p.clone(), h.state)).collect()
        } else {
            HashMap::new()
        }
    }
}

/// Watches producer activity on a bus and announces availability
/// transitions.
///
/// Attach it once per bus; dropping it removes the subscription and
/// stops the watchdog.
pub struct LifecycleTracker {
    inner: Arc<TrackerInner>,
    subscription: SubscriptionHandle,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
}

impl LifecycleTracker {
    /// Subscribes a tracker to every event on `bus`.
    ///
    /// The watchdog is not started yet; call [`start`](Self::start) for
    /// background sweeps, or drive [`sweep_at`](Self::sweep_at) by hand.
    pub fn attach(bus: &Arc<EventBus>, config: LifecycleConfig) -> Self {
        let inner = Arc::new(TrackerInner {
            table: RwLock::new(HashMap::new()),
            config,
            bus: Arc::downgrade(bus),
        });

        let observer = Arc::clone(&inner);
        let subscription =
            bus.subscribe_default(TopicFilter::all(), "lifecycle-tracker", move |event| {
                observer.observe(event);
                Ok(())
            });

        Self {
            inner,
            subscription,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            stop_tx: None,
        }
    }

    /// Starts the background watchdog sweeping at the configured cadence.
    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let inner = Arc::clone(&self.inner);
        let interval = self.inner.config.sweep_interval();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            log::info!("Lifecycle: watchdog started (sweep every {:?})", interval);
            while running.load(Ordering::Relaxed) {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        inner.sweep_at(Instant::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::info!("Lifecycle: watchdog stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
    }

    /// Stops the background watchdog, if running.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender wakes the watchdog out of its wait.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the background watchdog is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one sweep evaluating producer silence against `now`.
    ///
    /// Returns the number of producers that changed state. A producer
    /// moves at most one step per sweep.
    pub fn sweep_at(&self, now: Instant) -> usize {
        self.inner.sweep_at(now)
    }

    /// Runs one sweep against the current instant.
    pub fn sweep(&self) -> usize {
        self.inner.sweep_at(Instant::now())
    }

    /// Current state of one producer, if it has ever emitted.
    pub fn state_of(&self, producer: &ProducerId) -> Option<LifecycleState> {
        self.inner.state_of(producer)
    }

    /// Current state of every known producer.
    pub fn states(&self) -> HashMap<ProducerId, LifecycleState> {
        self.inner.states()
    }
}

impl Drop for LifecycleTracker {
    fn drop(&mut self) {
        self.stop();
        if let Some(bus) = self.inner.bus.upgrade() {
            bus.unsubscribe(self.subscription);
        }
    }
}

impl fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("producers", &self.inner.states().len())
            .field("running", &self.is_running())
            .finish()
    }
}
