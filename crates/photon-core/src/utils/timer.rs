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

//! Wall-clock stopwatch used for compile, build and kernel timings.

use std::time::{Duration, Instant};

/// A simple monotonic stopwatch.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start_time: Option<Instant>,
}

impl Stopwatch {
    /// Creates a stopwatch that is already running.
    #[inline]
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
        }
    }

    /// Creates a stopwatch that has not been started.
    pub const fn stopped() -> Self {
        Self { start_time: None }
    }

    /// Restarts the measurement from now.
    pub fn restart(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Returns the elapsed time since the stopwatch was started.
    /// ## Returns
    /// `None` if the stopwatch was never started.
    #[inline]
    pub fn elapsed(&self) -> Option<Duration> {
        self.start_time.map(|start| start.elapsed())
    }

    /// Elapsed milliseconds.
    #[inline]
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed().map(|d| d.as_millis() as u64)
    }

    /// Elapsed microseconds.
    #[inline]
    pub fn elapsed_us(&self) -> Option<u64> {
        self.elapsed().map(|d| d.as_micros() as u64)
    }

    /// Elapsed seconds as `f64`.
    #[inline]
    pub fn elapsed_secs_f64(&self) -> Option<f64> {
        self.elapsed().map(|d| d.as_secs_f64())
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stopped_stopwatch_reports_nothing() {
        let mut watch = Stopwatch::stopped();
        assert!(watch.elapsed().is_none());
        watch.restart();
        assert!(watch.elapsed_us().is_some());
    }

    #[test]
    fn elapsed_grows_after_sleep() {
        let watch = Stopwatch::new();
        thread::sleep(Duration::from_millis(20));
        let elapsed = watch.elapsed_ms().unwrap();
        assert!(elapsed >= 20, "elapsed {elapsed}ms");
        assert!(watch.elapsed_secs_f64().unwrap() >= 0.02);
    }
}
