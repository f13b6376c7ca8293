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

//! A [`Profiler`] that turns device events into metrics.

use crate::metrics::registry::MetricsRegistry;
use photon_core::device::{ProfileEvent, Profiler};
use photon_core::telemetry::MetricId;

/// Records launches, synchronizations, compiles and builds into a registry.
///
/// Metrics land in the `kernel` and `bvh` namespaces, labelled by device and
/// kernel or variant.
#[derive(Debug, Clone)]
pub struct KernelProfiler {
    registry: MetricsRegistry,
}

impl KernelProfiler {
    /// Profiler writing into `registry`.
    pub fn new(registry: MetricsRegistry) -> Self {
        Self { registry }
    }

    /// The backing registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }
}

impl Profiler for KernelProfiler {
    fn record(&self, event: ProfileEvent) {
        let result = match event {
            ProfileEvent::KernelLaunch {
                device,
                kernel,
                work_size,
            } => {
                let base = MetricId::new("kernel", "launches")
                    .with_label("device", device.0.to_string())
                    .with_label("kernel", kernel.entry_point());
                let items = MetricId::new("kernel", "work_items")
                    .with_label("device", device.0.to_string())
                    .with_label("kernel", kernel.entry_point());
                self.registry
                    .counter(base)
                    .and_then(|c| c.increment())
                    .and_then(|_| self.registry.counter(items))
                    .and_then(|c| c.increment_by(work_size as u64))
                    .map(|_| ())
            }
            ProfileEvent::Synchronize { device, elapsed } => self
                .registry
                .histogram(
                    MetricId::new("kernel", "synchronize_ms")
                        .with_label("device", device.0.to_string()),
                )
                .and_then(|h| h.observe(elapsed.as_secs_f64() * 1000.0)),
            ProfileEvent::KernelCompile { variant, elapsed } => self
                .registry
                .histogram(MetricId::new("kernel", "compile_ms").with_label("variant", variant))
                .and_then(|h| h.observe(elapsed.as_secs_f64() * 1000.0)),
            ProfileEvent::BvhBuild {
                device,
                refit,
                elapsed,
            } => {
                let name = if refit { "refit_ms" } else { "build_ms" };
                self.registry
                    .histogram(MetricId::new("bvh", name).with_label("device", device.0.to_string()))
                    .and_then(|h| h.observe(elapsed.as_secs_f64() * 1000.0))
            }
        };
        if let Err(e) = result {
            log::warn!("KernelProfiler: failed to record event: {e}");
        }
    }
}
