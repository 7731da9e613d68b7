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

//! Bounded sample storage for scheduler feedback.

use std::time::Duration;

/// A fixed-size circular buffer, oldest value overwritten when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    data: [T; N],
    index: usize,
    count: usize,
}

impl<T: Default + Copy, const N: usize> RingBuffer<T, N> {
    /// Creates a new, empty ring buffer.
    pub fn new() -> Self {
        Self {
            data: [T::default(); N],
            index: 0,
            count: 0,
        }
    }

    /// Pushes a new value, evicting the oldest if the buffer is full.
    pub fn push(&mut self, value: T) {
        self.data[self.index] = value;
        self.index = (self.index + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    /// Number of values currently stored.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Iterates the values in chronological order (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (left, right) = self.data.split_at(self.index);
        if self.count < N {
            // Buffer not full: only the values below the write index exist.
            right[N - self.index..]
                .iter()
                .chain(left[..self.index].iter())
        } else {
            right.iter().chain(left.iter())
        }
    }
}

impl<T: Default + Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<f32, N> {
    /// Mean of the `window` most recent values, 0.0 when empty.
    pub fn recent_average(&self, window: usize) -> f32 {
        if self.count == 0 || window == 0 {
            return 0.0;
        }
        let taken = window.min(self.count);
        let sum: f32 = self.iter().skip(self.count - taken).sum();
        sum / taken as f32
    }
}

/// One scheduler iteration: how long the whole lap took, and how much
/// of it was spent inside the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSample {
    /// Full iteration duration including the idle period.
    pub iteration: Duration,
    /// Wall-clock cost of the render invocation alone.
    pub render_cost: Duration,
}

impl<const N: usize> RingBuffer<TimingSample, N> {
    /// Mean render cost over the stored samples, in milliseconds.
    pub fn average_render_cost_ms(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let sum: f32 = self.iter().map(|s| s.render_cost.as_secs_f32() * 1_000.0).sum();
        sum / self.count as f32
    }

    /// Largest render cost among the stored samples, in milliseconds.
    pub fn max_render_cost_ms(&self) -> f32 {
        self.iter()
            .map(|s| s.render_cost.as_secs_f32() * 1_000.0)
            .fold(0.0, f32::max)
    }

    /// Mean full-iteration duration over the stored samples, in
    /// milliseconds.
    pub fn average_iteration_ms(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let sum: f32 = self.iter().map(|s| s.iteration.as_secs_f32() * 1_000.0).sum();
        sum / self.count as f32
    }
}
