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

//! The peripheral host tying the whole runtime together.
//!
//! [`PeripheralRuntime`] owns the shared bus and store, the lifecycle
//! watchdog, the render scheduler, and one worker thread per registered
//! driver. Every worker emits into the same bus instance; none hold
//! private dispatch state.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use neura_control::lifecycle::LifecycleTracker;
use neura_control::scheduler::{RenderScheduler, SchedulerStats};
use neura_core::config::RuntimeConfig;
use neura_core::driver::PeripheralDriver;
use neura_core::event::bus::EventBus;
use neura_core::event::{Event, ProducerId};
use neura_core::render::Renderer;
use neura_core::state::StateStore;
use neura_core::time::Stopwatch;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Failures of runtime orchestration calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The requested operation needs the runtime to be stopped.
    #[error("runtime is already running")]
    AlreadyRunning,
    /// Another driver already claims this producer id.
    #[error("a driver for producer '{0}' is already registered")]
    DuplicateDriver(ProducerId),
}

/// One polling thread wrapping a driver.
///
/// The thread gives the driver back when it finishes, so a stopped
/// runtime can be started again with the same drivers.
struct DriverWorker {
    producer: ProducerId,
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<Box<dyn PeripheralDriver>>>,
}

impl DriverWorker {
    fn spawn(mut driver: Box<dyn PeripheralDriver>, bus: Arc<EventBus>) -> Self {
        let producer = driver.producer_id();
        let interval = driver.poll_interval();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_producer = producer.clone();

        let handle = thread::spawn(move || {
            log::info!(
                "Host: worker '{}' polling every {:?}",
                thread_producer,
                interval
            );
            loop {
                match driver.poll() {
                    Ok(readings) => {
                        for reading in readings {
                            bus.emit(Event::new(
                                reading.topic,
                                thread_producer.clone(),
                                reading.payload,
                            ));
                        }
                    }
                    // Read failures surface through lifecycle timeouts
                    // as silence; the worker itself keeps polling.
                    Err(error) => {
                        log::warn!("Host: worker '{}' poll failed: {}", thread_producer, error);
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::info!("Host: worker '{}' stopped", thread_producer);
            driver
        });

        Self {
            producer,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Wakes the worker out of its poll wait; it exits at the next
    /// iteration boundary.
    fn signal_stop(&mut self) {
        self.stop_tx.take();
    }

    fn join(&mut self) -> Option<Box<dyn PeripheralDriver>> {
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

/// Owns and orchestrates the full peripheral-to-renderer pipeline.
///
/// Construction wires the store, bus, lifecycle tracker, and scheduler;
/// [`start`](Self::start) brings the threads up and
/// [`stop`](Self::stop) (or dropping the runtime) tears them down.
pub struct PeripheralRuntime {
    config: RuntimeConfig,
    bus: Arc<EventBus>,
    tracker: LifecycleTracker,
    scheduler: RenderScheduler,
    staged: Vec<Box<dyn PeripheralDriver>>,
    workers: Vec<DriverWorker>,
    running: bool,
    uptime: Option<Stopwatch>,
}

impl PeripheralRuntime {
    /// Wires up a stopped runtime from configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        // 1. The store carries the per-topic aggregation strategies.
        let store = Arc::new(StateStore::new());
        for (topic, strategy) in &config.aggregations {
            if let Err(error) = store.register_aggregation(topic.as_str(), *strategy) {
                log::error!("Host: aggregation for '{}' not registered: {}", topic, error);
            }
        }

        // 2. One bus shared by every worker and service.
        let bus = Arc::new(EventBus::with_store(Arc::clone(&store)));

        // 3. Control services layered on the bus and store.
        let tracker = LifecycleTracker::attach(&bus, config.lifecycle.clone());
        let scheduler = RenderScheduler::new(store, config.pacing.clone());

        Self {
            config,
            bus,
            tracker,
            scheduler,
            staged: Vec::new(),
            workers: Vec::new(),
            running: false,
            uptime: None,
        }
    }

    /// Registers a driver to be polled once the runtime starts.
    ///
    /// Producer ids must be unique across registered drivers, and the
    /// runtime must be stopped.
    pub fn add_driver(&mut self, driver: Box<dyn PeripheralDriver>) -> Result<(), RuntimeError> {
        if self.running {
            return Err(RuntimeError::AlreadyRunning);
        }
        let producer = driver.producer_id();
        if self.staged.iter().any(|d| d.producer_id() == producer) {
            return Err(RuntimeError::DuplicateDriver(producer));
        }
        log::info!("Host: driver '{}' registered", producer);
        self.staged.push(driver);
        Ok(())
    }

    /// Starts the watchdog, one worker per driver, and the render loop.
    pub fn start(&mut self, renderer: Box<dyn Renderer>) -> Result<(), RuntimeError> {
        if self.running {
            return Err(RuntimeError::AlreadyRunning);
        }

        // 1. Watchdog first, so silence is measured from startup.
        self.tracker.start();

        // 2. One worker thread per driver, all sharing the one bus.
        for driver in self.staged.drain(..) {
            self.workers
                .push(DriverWorker::spawn(driver, Arc::clone(&self.bus)));
        }

        // 3. The consumer loop.
        self.scheduler.start(renderer);

        self.uptime = Some(Stopwatch::new());
        self.running = true;
        log::info!("Host: runtime started with {} driver(s)", self.workers.len());
        Ok(())
    }

    /// Stops workers, the render loop, and the watchdog, joining every
    /// thread. Drivers are recovered for a later restart.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        // Quiet the producers first, then the consumer, then the
        // watchdog.
        for worker in &mut self.workers {
            worker.signal_stop();
        }
        for mut worker in self.workers.drain(..) {
            match worker.join() {
                Some(driver) => self.staged.push(driver),
                None => log::error!("Host: worker '{}' lost its driver", worker.producer),
            }
        }
        self.scheduler.stop();
        self.tracker.stop();

        self.running = false;
        if let Some(uptime) = self.uptime.take() {
            log::info!(
                "Host: runtime stopped after {:.1}s",
                uptime.elapsed_secs_f64()
            );
        }
    }

    /// Whether the runtime threads are up.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The shared bus, for subscribing consumers and extra producers.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The state store the bus folds every emission into.
    pub fn store(&self) -> Arc<StateStore> {
        self.bus.store()
    }

    /// The lifecycle tracker judging producer availability.
    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    /// Current render-loop statistics.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// The configuration this runtime was built from.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Number of registered drivers, running or staged.
    pub fn driver_count(&self) -> usize {
        self.staged.len() + self.workers.len()
    }

    /// Time since [`start`](Self::start), while running.
    pub fn uptime(&self) -> Option<Duration> {
        self.uptime.as_ref().map(|watch| watch.elapsed())
    }
}

impl Drop for PeripheralRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neura_core::driver::{DriverError, Reading};
    use neura_core::render::RenderError;
    use neura_core::state::StateSnapshot;
    use neura_core::Payload;

    struct NullRenderer;

    impl Renderer for NullRenderer {
        fn render(&mut self, _snapshot: &StateSnapshot) -> Result<(), RenderError> {
            Ok(())
        }
    }

    struct TickDriver {
        producer: ProducerId,
        ticks: i64,
    }

    impl TickDriver {
        fn boxed(producer: &str) -> Box<dyn PeripheralDriver> {
            Box::new(Self {
                producer: ProducerId::from(producer),
                ticks: 0,
            })
        }
    }

    impl PeripheralDriver for TickDriver {
        fn producer_id(&self) -> ProducerId {
            self.producer.clone()
        }

        fn poll(&mut self) -> Result<Vec<Reading>, DriverError> {
            self.ticks += 1;
            Ok(vec![Reading::new("tick", Payload::Integer(self.ticks))])
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_millis(5)
        }
    }

    #[test]
    fn duplicate_producers_are_rejected() {
        let mut runtime = PeripheralRuntime::new(RuntimeConfig::default());
        runtime.add_driver(TickDriver::boxed("t1")).unwrap();

        let error = runtime.add_driver(TickDriver::boxed("t1")).unwrap_err();
        assert!(matches!(error, RuntimeError::DuplicateDriver(_)));
        assert_eq!(runtime.driver_count(), 1);
    }

    #[test]
    fn starting_twice_is_an_error() {
        let mut runtime = PeripheralRuntime::new(RuntimeConfig::default());
        runtime.start(Box::new(NullRenderer)).unwrap();

        assert!(matches!(
            runtime.start(Box::new(NullRenderer)),
            Err(RuntimeError::AlreadyRunning)
        ));
        assert!(matches!(
            runtime.add_driver(TickDriver::boxed("t1")),
            Err(RuntimeError::AlreadyRunning)
        ));
        runtime.stop();
    }

    #[test]
    fn drivers_survive_a_stop_for_restart() {
        let mut runtime = PeripheralRuntime::new(RuntimeConfig::default());
        runtime.add_driver(TickDriver::boxed("t1")).unwrap();

        runtime.start(Box::new(NullRenderer)).unwrap();
        assert!(runtime.uptime().is_some());
        thread::sleep(Duration::from_millis(30));
        runtime.stop();

        assert_eq!(runtime.driver_count(), 1);
        assert!(runtime.uptime().is_none());

        // The recovered driver picks up where it left off.
        runtime.start(Box::new(NullRenderer)).unwrap();
        thread::sleep(Duration::from_millis(30));
        runtime.stop();

        let entry = runtime.store().get_latest("tick", "t1").expect("ticks");
        assert!(entry.updates >= 2);
    }
}
