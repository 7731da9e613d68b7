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

// Neura Runtime Sandbox
// Scripted peripherals, a console renderer, and live pacing stats

use anyhow::Result;
use neura_runtime::prelude::*;
use std::thread;
use std::time::Duration;

const CONFIG: &str = r#"{
    "pacing": {
        "mode": "adaptive",
        "utilization_target": 0.35,
        "min_interval_ms": 8,
        "cost_window": 32
    },
    "lifecycle": {
        "timeout_suspect_ms": 800,
        "timeout_disconnect_ms": 1200,
        "sweep_interval_ms": 100
    },
    "aggregations": {
        "dial.delta": "sum",
        "beacon.ping": { "sequence": { "capacity": 4 } }
    }
}"#;

/// Renders the tracked state as a periodic console summary.
struct ConsoleRenderer {
    frames: u64,
}

impl Renderer for ConsoleRenderer {
    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), RenderError> {
        self.frames += 1;
        if self.frames % 60 != 0 {
            return Ok(());
        }

        let dial_total = match snapshot.get(&StateKey::new("dial.delta", "dial")) {
            Some(StateEntry {
                aggregate: Aggregate::Sum(total),
                ..
            }) => *total,
            _ => 0.0,
        };
        log::info!(
            "Frame {}: {} key(s) tracked, dial total {:+}",
            self.frames,
            snapshot.len(),
            dial_total
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    // --- Step 1: Build the runtime from JSON configuration ---
    let config = RuntimeConfig::from_json_str(CONFIG)?;
    let mut runtime = PeripheralRuntime::new(config);

    // --- Step 2: Register scripted peripherals ---
    // Two chatty devices, and a beacon that dies after one ping so the
    // lifecycle timeouts have something to catch.
    let switch = ScriptedDriver::new("sw1", Duration::from_millis(40))
        .with_reading(Reading::new("switch.pressed", Payload::Bool(true)))
        .with_reading(Reading::new("switch.released", Payload::Bool(false)))
        .looping();
    let dial = ScriptedDriver::new("dial", Duration::from_millis(25))
        .with_reading(Reading::new("dial.delta", Payload::Integer(2)))
        .with_reading(Reading::new("dial.delta", Payload::Integer(1)))
        .with_reading(Reading::new("dial.delta", Payload::Integer(-1)))
        .looping();
    let beacon = ScriptedDriver::new("beacon", Duration::from_millis(30))
        .with_reading(Reading::new("beacon.ping", Payload::Signal));
    runtime.add_driver(Box::new(switch))?;
    runtime.add_driver(Box::new(dial))?;
    runtime.add_driver(Box::new(beacon))?;

    // --- Step 3: Run, tracing the opening moments to stdout ---
    runtime.bus().enable_stdout_trace();
    runtime.start(Box::new(ConsoleRenderer { frames: 0 }))?;
    thread::sleep(Duration::from_millis(600));
    runtime.bus().disable_stdout_trace();
    thread::sleep(Duration::from_secs(3));

    // --- Step 4: Report and shut down ---
    let graph = serde_json::to_string_pretty(&runtime.bus().snapshot_graph())?;
    log::info!("Subscription graph:\n{}", graph);
    log::info!("Scheduler stats: {:#?}", runtime.stats());
    for (producer, state) in runtime.tracker().states() {
        log::info!(" -> {} is {}", producer, state);
    }
    runtime.stop();

    Ok(())
}
