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

//! Synchronous publish/subscribe dispatcher.
//!
//! [`EventBus::emit`] runs every matching callback on the calling thread
//! and returns only after all of them (and the state store update) have
//! completed. Delivery order is deterministic: exact-topic subscriptions
//! first, wildcards second, each group sorted by descending priority and
//! ascending registration sequence. The delivery list is snapshotted at
//! dispatch start, so a callback may subscribe or unsubscribe without
//! affecting the in-flight emission.
//!
//! A callback that returns an error or panics is logged with its label
//! and isolated; it never stops delivery to the remaining subscribers
//! and never reaches the emitting producer.

use crate::event::{Event, Topic};
use crate::state::StateStore;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Convenience alias for what a subscriber callback returns.
pub type SubscriberResult = Result<(), SubscriberError>;

/// Error a subscriber reports back to the dispatcher.
///
/// Dispatch logs it against the subscription's label and moves on; it is
/// never surfaced to the emitter.
#[derive(Debug)]
pub enum SubscriberError {
    /// The callback could not handle the event.
    CallbackFailed(String),
}

impl SubscriberError {
    /// Shorthand for the common failure case.
    pub fn failed(msg: impl Into<String>) -> Self {
        SubscriberError::CallbackFailed(msg.into())
    }
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberError::CallbackFailed(msg) => {
                write!(f, "Subscriber callback failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for SubscriberError {}

/// What a subscription listens to: one exact topic, or every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Matches events whose topic equals this one exactly.
    Exact(Topic),
    /// Matches every event (the wildcard pattern).
    Any,
}

impl TopicFilter {
    /// Filter for one exact topic.
    pub fn exact(topic: impl Into<Topic>) -> Self {
        TopicFilter::Exact(topic.into())
    }

    /// The wildcard filter.
    pub fn all() -> Self {
        TopicFilter::Any
    }

    /// Whether this filter matches the given topic.
    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            TopicFilter::Exact(own) => own == topic,
            TopicFilter::Any => true,
        }
    }

    fn pattern_string(&self) -> String {
        match self {
            TopicFilter::Exact(topic) => topic.as_str().to_string(),
            TopicFilter::Any => "*".to_string(),
        }
    }
}

/// Opaque identity of one registration, usable for
/// [`EventBus::unsubscribe`]. Wraps the registration sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// The registration sequence this handle refers to.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

type Callback = dyn Fn(&Event) -> SubscriberResult + Send + Sync;

struct SubscriptionEntry {
    filter: TopicFilter,
    label: String,
    priority: i32,
    sequence: u64,
    callback: Arc<Callback>,
}

/// One row of [`BusGraph`]: a subscription without its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// The exact topic, or `"*"` for the wildcard.
    pub pattern: String,
    /// Caller-supplied label identifying the subscriber.
    pub label: String,
    /// Dispatch priority (higher runs earlier within its group).
    pub priority: i32,
    /// Registration sequence (earlier runs first at equal priority).
    pub sequence: u64,
}

/// Immutable, serializable view of the subscription table, ordered by
/// registration sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusGraph {
    /// Every live subscription at snapshot time.
    pub subscriptions: Vec<SubscriptionInfo>,
}

/// The synchronous dispatcher shared by all producers and consumers.
///
/// Shared as `Arc<EventBus>`; every method takes `&self`.
pub struct EventBus {
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
    next_sequence: AtomicU64,
    store: Arc<StateStore>,
    trace: Mutex<Option<SubscriptionHandle>>,
}

impl EventBus {
    /// Creates a bus with its own private [`StateStore`].
    pub fn new() -> Self {
        Self::with_store(Arc::new(StateStore::new()))
    }

    /// Creates a bus updating the given store on every emission.
    pub fn with_store(store: Arc<StateStore>) -> Self {
        log::info!("Bus: initialized");
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            store,
            trace: Mutex::new(None),
        }
    }

    /// The store this bus updates; consumers read snapshots from it.
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Registers a callback for events matching `filter`.
    ///
    /// Higher `priority` runs earlier within its match group; ties run in
    /// registration order. The label identifies the subscriber in logs
    /// and in [`EventBus::snapshot_graph`].
    pub fn subscribe<F>(
        &self,
        filter: TopicFilter,
        label: &str,
        priority: i32,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&Event) -> SubscriberResult + Send + Sync + 'static,
    {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriptionEntry {
            filter,
            label: label.to_string(),
            priority,
            sequence,
            callback: Arc::new(callback),
        };

        match self.subscriptions.write() {
            Ok(mut subscriptions) => {
                log::debug!(
                    "Bus: subscribed '{}' (pattern={}, priority={}, seq={})",
                    entry.label,
                    entry.filter.pattern_string(),
                    entry.priority,
                    entry.sequence
                );
                subscriptions.push(entry);
                subscriptions
                    .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
            }
            Err(_) => {
                log::error!(
                    "Bus: subscription table lock poisoned, '{}' not registered",
                    entry.label
                );
            }
        }
        SubscriptionHandle(sequence)
    }

    /// Registers a callback with the default priority of 0.
    pub fn subscribe_default<F>(&self, filter: TopicFilter, label: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> SubscriberResult + Send + Sync + 'static,
    {
        self.subscribe(filter, label, 0, callback)
    }

    /// Removes a registration. Returns whether a subscription was removed.
    ///
    /// Safe to call from within a callback during dispatch: the in-flight
    /// delivery list was snapshotted when the emission started.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        match self.subscriptions.write() {
            Ok(mut subscriptions) => {
                let before = subscriptions.len();
                subscriptions.retain(|entry| entry.sequence != handle.sequence());
                let removed = subscriptions.len() < before;
                if removed {
                    log::debug!("Bus: unsubscribed seq={}", handle.sequence());
                }
                removed
            }
            Err(_) => {
                log::error!(
                    "Bus: subscription table lock poisoned, seq={} not removed",
                    handle.sequence()
                );
                false
            }
        }
    }

    /// Number of live subscriptions (the stdout trace counts as one).
    pub fn subscriber_count(&self) -> usize {
        if let Ok(subscriptions) = self.subscriptions.read() {
            subscriptions.len()
        } else {
            0
        }
    }

    /// Synchronously delivers an event on the calling thread.
    ///
    /// Exact-topic matches run first, then wildcards, each group in
    /// (priority desc, sequence asc) order; the state store is updated
    /// last. Returns once all callbacks have run or failed.
    pub fn emit(&self, event: Event) {
        // 1. Snapshot the delivery list so table mutation stays safe.
        let mut exact: Vec<(Arc<Callback>, String, u64)> = Vec::new();
        let mut wildcard: Vec<(Arc<Callback>, String, u64)> = Vec::new();
        if let Ok(subscriptions) = self.subscriptions.read() {
            for entry in subscriptions.iter() {
                match &entry.filter {
                    TopicFilter::Exact(topic) if topic == &event.topic => {
                        exact.push((Arc::clone(&entry.callback), entry.label.clone(), entry.sequence));
                    }
                    TopicFilter::Any => {
                        wildcard.push((Arc::clone(&entry.callback), entry.label.clone(), entry.sequence));
                    }
                    _ => {}
                }
            }
        } else {
            log::error!("Bus: subscription table lock poisoned, dropping '{}'", event);
            return;
        }

        // 2. Run callbacks with the table lock released.
        for (callback, label, sequence) in exact.iter().chain(wildcard.iter()) {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    log::warn!(
                        "Bus: subscriber '{}' (seq={}) failed on '{}': {}",
                        label,
                        sequence,
                        event.topic,
                        error
                    );
                }
                Err(_) => {
                    log::error!(
                        "Bus: subscriber '{}' (seq={}) panicked on '{}'",
                        label,
                        sequence,
                        event.topic
                    );
                }
            }
        }

        // 3. Fold the event into the store once delivery is complete.
        if let Err(error) = self.store.update(&event) {
            log::error!("Bus: state update failed for '{}': {}", event, error);
        }
    }

    /// Installs the wildcard stdout echo subscription. Idempotent.
    pub fn enable_stdout_trace(&self) {
        let mut trace = match self.trace.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("Bus: trace lock poisoned, stdout trace unchanged");
                return;
            }
        };
        if trace.is_some() {
            return;
        }
        let handle = self.subscribe(TopicFilter::all(), "stdout-trace", 0, |event| {
            println!("[trace] {}", event);
            Ok(())
        });
        *trace = Some(handle);
        log::info!("Bus: stdout trace enabled");
    }

    /// Removes the stdout echo subscription. Idempotent.
    pub fn disable_stdout_trace(&self) {
        let mut trace = match self.trace.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("Bus: trace lock poisoned, stdout trace unchanged");
                return;
            }
        };
        if let Some(handle) = trace.take() {
            self.unsubscribe(handle);
            log::info!("Bus: stdout trace disabled");
        }
    }

    /// Whether the stdout trace subscription is currently installed.
    pub fn stdout_trace_enabled(&self) -> bool {
        match self.trace.lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        }
    }

    /// Copies the subscription table into an immutable, serializable
    /// graph ordered by registration sequence.
    pub fn snapshot_graph(&self) -> BusGraph {
        let mut subscriptions: Vec<SubscriptionInfo> = if let Ok(entries) = self.subscriptions.read()
        {
            entries
                .iter()
                .map(|entry| SubscriptionInfo {
                    pattern: entry.filter.pattern_string(),
                    label: entry.label.clone(),
                    priority: entry.priority,
                    sequence: entry.sequence,
                })
                .collect()
        } else {
            Vec::new()
        };
        subscriptions.sort_by_key(|info| info.sequence);
        BusGraph { subscriptions }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriber_count())
            .field("trace", &self.stdout_trace_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use std::sync::Mutex;

    fn recording_callback(
        log: &Arc<Mutex<Vec<String>>>,
        name: &str,
    ) -> impl Fn(&Event) -> SubscriberResult + Send + Sync + 'static {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |_event| {
            log.lock().unwrap().push(name.clone());
            Ok(())
        }
    }

    // ── Ordering ─────────────────────────────────────────────────────

    #[test]
    fn delivery_order_is_priority_desc_then_sequence_asc() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            TopicFilter::exact("switch.pressed"),
            "low-first",
            0,
            recording_callback(&order, "low-first"),
        );
        bus.subscribe(
            TopicFilter::exact("switch.pressed"),
            "high",
            5,
            recording_callback(&order, "high"),
        );
        bus.subscribe(
            TopicFilter::exact("switch.pressed"),
            "low-second",
            0,
            recording_callback(&order, "low-second"),
        );

        bus.emit(Event::new("switch.pressed", "sw1", Payload::Bool(true)));

        assert_eq!(
            *order.lock().unwrap(),
            vec!["high", "low-first", "low-second"],
            "Priority should win, then registration order"
        );
    }

    #[test]
    fn equal_priorities_preserve_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["c", "a", "b"] {
            bus.subscribe(
                TopicFilter::exact("dial.rotated"),
                name,
                0,
                recording_callback(&order, name),
            );
        }

        bus.emit(Event::new("dial.rotated", "d1", Payload::Integer(1)));

        assert_eq!(*order.lock().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn exact_matches_run_before_wildcards_regardless_of_priority() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            TopicFilter::all(),
            "wildcard-high",
            100,
            recording_callback(&order, "wildcard-high"),
        );
        bus.subscribe(
            TopicFilter::exact("switch.pressed"),
            "exact-low",
            0,
            recording_callback(&order, "exact-low"),
        );

        bus.emit(Event::new("switch.pressed", "sw1", Payload::Signal));

        assert_eq!(*order.lock().unwrap(), vec!["exact-low", "wildcard-high"]);
    }

    #[test]
    fn wildcard_receives_every_topic() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(TopicFilter::all(), "all", 0, recording_callback(&order, "all"));

        bus.emit(Event::new("switch.pressed", "sw1", Payload::Signal));
        bus.emit(Event::new("dial.rotated", "d1", Payload::Integer(3)));

        assert_eq!(order.lock().unwrap().len(), 2);
    }

    // ── Failure isolation ────────────────────────────────────────────

    #[test]
    fn failing_subscriber_never_blocks_others_across_100_emissions() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(0u32));

        bus.subscribe(TopicFilter::exact("tick"), "always-fails", 1, |_event| {
            Err(SubscriberError::failed("permanently broken"))
        });
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(TopicFilter::exact("tick"), "counts", 0, move |_event| {
                *delivered.lock().unwrap() += 1;
                Ok(())
            });
        }

        for i in 0..100 {
            bus.emit(Event::new("tick", "clock", Payload::Integer(i)));
        }

        assert_eq!(*delivered.lock().unwrap(), 100);
    }

    #[test]
    fn panicking_subscriber_is_isolated_from_emitter_and_peers() {
        let bus = EventBus::new();
        let delivered = Arc::new(Mutex::new(0u32));

        bus.subscribe(TopicFilter::exact("tick"), "always-panics", 1, |_event| {
            panic!("subscriber blew up");
        });
        {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(TopicFilter::exact("tick"), "counts", 0, move |_event| {
                *delivered.lock().unwrap() += 1;
                Ok(())
            });
        }

        // emit must neither unwind nor skip the second subscriber.
        bus.emit(Event::new("tick", "clock", Payload::Signal));
        bus.emit(Event::new("tick", "clock", Payload::Signal));

        assert_eq!(*delivered.lock().unwrap(), 2);
    }

    // ── Table mutation during dispatch ───────────────────────────────

    #[test]
    fn unsubscribing_a_peer_mid_dispatch_spares_the_in_flight_delivery() {
        let bus = Arc::new(EventBus::new());
        let delivered = Arc::new(Mutex::new(0u32));

        let peer_handle = {
            let delivered = Arc::clone(&delivered);
            bus.subscribe(TopicFilter::exact("tick"), "peer", 0, move |_event| {
                *delivered.lock().unwrap() += 1;
                Ok(())
            })
        };
        {
            let bus_inner = Arc::clone(&bus);
            bus.subscribe(TopicFilter::exact("tick"), "remover", 1, move |_event| {
                bus_inner.unsubscribe(peer_handle);
                Ok(())
            });
        }

        bus.emit(Event::new("tick", "clock", Payload::Signal));
        assert_eq!(
            *delivered.lock().unwrap(),
            1,
            "The snapshotted delivery list should still include the peer"
        );

        bus.emit(Event::new("tick", "clock", Payload::Signal));
        assert_eq!(
            *delivered.lock().unwrap(),
            1,
            "The peer should be gone for subsequent emissions"
        );
    }

    #[test]
    fn a_subscriber_can_remove_itself_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0u32));
        let own_handle = Arc::new(Mutex::new(None::<SubscriptionHandle>));

        let handle = {
            let bus_inner = Arc::clone(&bus);
            let calls = Arc::clone(&calls);
            let own_handle = Arc::clone(&own_handle);
            bus.subscribe(TopicFilter::exact("tick"), "one-shot", 0, move |_event| {
                *calls.lock().unwrap() += 1;
                if let Some(handle) = *own_handle.lock().unwrap() {
                    bus_inner.unsubscribe(handle);
                }
                Ok(())
            })
        };
        *own_handle.lock().unwrap() = Some(handle);

        bus.emit(Event::new("tick", "clock", Payload::Signal));
        bus.emit(Event::new("tick", "clock", Payload::Signal));

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn emitting_from_within_a_callback_is_supported() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = Arc::clone(&order);
            bus.subscribe(TopicFilter::exact("derived"), "derived-listener", 0, move |event| {
                order.lock().unwrap().push(format!("derived:{}", event.producer));
                Ok(())
            });
        }
        {
            let bus_inner = Arc::clone(&bus);
            let order = Arc::clone(&order);
            bus.subscribe(TopicFilter::exact("raw"), "forwarder", 0, move |event| {
                order.lock().unwrap().push("raw".to_string());
                bus_inner.emit(Event::new("derived", event.producer.clone(), Payload::Signal));
                Ok(())
            });
        }

        bus.emit(Event::new("raw", "sw1", Payload::Signal));

        assert_eq!(*order.lock().unwrap(), vec!["raw", "derived:sw1"]);
    }

    // ── Store interaction ────────────────────────────────────────────

    #[test]
    fn store_is_updated_after_callbacks_have_run() {
        let bus = Arc::new(EventBus::new());
        let saw_pre_event_state = Arc::new(Mutex::new(None::<bool>));

        {
            let store = bus.store();
            let saw = Arc::clone(&saw_pre_event_state);
            bus.subscribe(TopicFilter::exact("switch.pressed"), "probe", 0, move |_event| {
                let absent = store.get_latest("switch.pressed", "sw1").is_none();
                *saw.lock().unwrap() = Some(absent);
                Ok(())
            });
        }

        bus.emit(Event::new("switch.pressed", "sw1", Payload::Bool(true)));

        assert_eq!(
            *saw_pre_event_state.lock().unwrap(),
            Some(true),
            "During dispatch the store should still hold the pre-event state"
        );
        let entry = bus.store().get_latest("switch.pressed", "sw1").expect("entry");
        assert_eq!(entry.latest, Payload::Bool(true));
    }

    // ── Trace and graph ──────────────────────────────────────────────

    #[test]
    fn stdout_trace_toggles_idempotently() {
        let bus = EventBus::new();
        assert!(!bus.stdout_trace_enabled());

        bus.enable_stdout_trace();
        bus.enable_stdout_trace();
        assert!(bus.stdout_trace_enabled());
        assert_eq!(bus.subscriber_count(), 1);

        bus.disable_stdout_trace();
        bus.disable_stdout_trace();
        assert!(!bus.stdout_trace_enabled());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn snapshot_graph_lists_registrations_in_sequence_order() {
        let bus = EventBus::new();
        bus.subscribe(TopicFilter::exact("switch.pressed"), "renderer", 10, |_e| Ok(()));
        bus.subscribe(TopicFilter::all(), "trace", 0, |_e| Ok(()));

        let graph = bus.snapshot_graph();
        assert_eq!(graph.subscriptions.len(), 2);
        assert_eq!(graph.subscriptions[0].pattern, "switch.pressed");
        assert_eq!(graph.subscriptions[0].label, "renderer");
        assert_eq!(graph.subscriptions[0].priority, 10);
        assert_eq!(graph.subscriptions[1].pattern, "*");
        assert!(graph.subscriptions[0].sequence < graph.subscriptions[1].sequence);

        let json = serde_json::to_string(&graph).expect("graph serializes");
        assert!(json.contains("\"renderer\""));
    }

    #[test]
    fn unsubscribe_reports_whether_something_was_removed() {
        let bus = EventBus::new();
        let handle = bus.subscribe_default(TopicFilter::all(), "once", |_e| Ok(()));
        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
    }
}
