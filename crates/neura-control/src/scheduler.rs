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

//! Background render loop decoupled from event arrival.
//!
//! The scheduler owns one thread that repeatedly snapshots the state
//! store, hands the snapshot to the renderer, measures the render cost,
//! and idles for the interval the [`PacingController`] derives from
//! that cost. Renderer failures and panics are logged and counted; the
//! loop itself never dies from them.

use crate::pacing::PacingController;
use crate::samples::{RingBuffer, TimingSample};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use neura_core::config::PacingConfig;
use neura_core::render::Renderer;
use neura_core::state::StateStore;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How many of the most recent iterations feed the timing statistics.
const SAMPLE_CAPACITY: usize = 120;

/// Point-in-time counters and timings of the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SchedulerStats {
    /// Iterations completed so far.
    pub frames: u64,
    /// Iterations whose render cost exceeded the pacing reference.
    pub overruns: u64,
    /// Render calls that returned an error or panicked.
    pub render_failures: u64,
    /// Mean render cost over the recent sample window, in milliseconds.
    pub average_render_cost_ms: f32,
    /// Worst render cost over the recent sample window, in milliseconds.
    pub max_render_cost_ms: f32,
    /// Mean full-iteration time (render plus idle), in milliseconds.
    pub average_iteration_ms: f32,
    /// Idle interval chosen on the most recent iteration, in milliseconds.
    pub last_idle_ms: f32,
}

#[derive(Default)]
struct StatsInner {
    samples: RingBuffer<TimingSample, SAMPLE_CAPACITY>,
    frames: u64,
    overruns: u64,
    render_failures: u64,
    last_idle: Duration,
}

/// Drives a [`Renderer`] on its own thread at a configured pace.
///
/// Dropping the scheduler stops the loop and joins the thread.
pub struct RenderScheduler {
    config: PacingConfig,
    store: Arc<StateStore>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    stop_tx: Option<Sender<()>>,
    stats: Arc<Mutex<StatsInner>>,
}

impl RenderScheduler {
    /// Creates a scheduler reading snapshots from `store`.
    pub fn new(store: Arc<StateStore>, config: PacingConfig) -> Self {
        Self {
            config,
            store,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            stop_tx: None,
            stats: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    /// Starts the render loop with the given renderer.
    ///
    /// A second call while running is ignored and drops `renderer`.
    pub fn start(&mut self, renderer: Box<dyn Renderer>) {
        if self.running.load(Ordering::SeqCst) {
            log::warn!("Scheduler: already running, start ignored");
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let config = self.config.clone();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::spawn(move || {
            let mut renderer = renderer;
            let mut controller = PacingController::new(&config);
            let mut render_failures = 0u64;

            log::info!("Scheduler: render loop started ({:?} pacing)", config.mode);

            while running.load(Ordering::Relaxed) {
                let iteration_started = Instant::now();

                // 1. Snapshot the state for this frame.
                let snapshot = store.snapshot();

                // 2. Render, isolating errors and panics.
                let render_started = Instant::now();
                match catch_unwind(AssertUnwindSafe(|| renderer.render(&snapshot))) {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        render_failures += 1;
                        log::warn!("Scheduler: renderer failed: {}", error);
                    }
                    Err(_) => {
                        render_failures += 1;
                        log::error!("Scheduler: renderer panicked");
                    }
                }
                let render_cost = render_started.elapsed();

                // 3. Derive the idle from the measured cost.
                let idle = controller.plan_idle(render_cost);

                // 4. Wait out the idle, waking early on stop.
                let stopped = !matches!(
                    stop_rx.recv_timeout(idle),
                    Err(RecvTimeoutError::Timeout)
                );

                // 5. Record the iteration.
                if let Ok(mut inner) = stats.lock() {
                    inner.frames += 1;
                    inner.overruns = controller.overruns();
                    inner.render_failures = render_failures;
                    inner.last_idle = idle;
                    inner.samples.push(TimingSample {
                        iteration: iteration_started.elapsed(),
                        render_cost,
                    });
                }

                if stopped {
                    break;
                }
            }
            log::info!("Scheduler: render loop stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
    }

    /// Stops the render loop and joins its thread, if running.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender wakes the loop out of its idle wait.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the render loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copies out the current loop statistics.
    pub fn stats(&self) -> SchedulerStats {
        match self.stats.lock() {
            Ok(inner) => SchedulerStats {
                frames: inner.frames,
                overruns: inner.overruns,
                render_failures: inner.render_failures,
                average_render_cost_ms: inner.samples.average_render_cost_ms(),
                max_render_cost_ms: inner.samples.max_render_cost_ms(),
                average_iteration_ms: inner.samples.average_iteration_ms(),
                last_idle_ms: inner.last_idle.as_secs_f32() * 1_000.0,
            },
            Err(_) => SchedulerStats::default(),
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
