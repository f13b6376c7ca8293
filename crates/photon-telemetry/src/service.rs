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

//! Service tying metrics and monitors together.

use crate::metrics::registry::MetricsRegistry;
use crate::monitoring::MonitorRegistry;
use crate::profiler::KernelProfiler;
use photon_core::telemetry::MetricId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owns the metrics registry and the monitors, and polls monitors on a schedule.
#[derive(Debug)]
pub struct TelemetryService {
    metrics: MetricsRegistry,
    monitors: MonitorRegistry,
    last_update: Instant,
    update_interval: Duration,
}

impl TelemetryService {
    /// Creates a service polling monitors every `update_interval`.
    pub fn new(update_interval: Duration) -> Self {
        Self {
            metrics: MetricsRegistry::new(),
            monitors: MonitorRegistry::new(),
            last_update: Instant::now(),
            update_interval,
        }
    }

    /// Polls monitors if the interval has passed and publishes their usage as
    /// gauges in the `resource` namespace. Returns `true` if it polled.
    pub fn tick(&mut self) -> bool {
        if self.last_update.elapsed() < self.update_interval {
            return false;
        }
        log::trace!("Updating all resource monitors...");
        self.monitors.update_all();
        for monitor in self.monitors.get_all_monitors() {
            let report = monitor.get_usage_report();
            let id = MetricId::new("resource", "bytes_used")
                .with_label("monitor", monitor.monitor_id().to_string());
            if let Err(e) = self
                .metrics
                .gauge(id)
                .and_then(|g| g.set(report.current_bytes as f64))
            {
                log::warn!("TelemetryService: {e}");
            }
        }
        self.last_update = Instant::now();
        true
    }

    /// A profiler that devices can report into.
    pub fn profiler(&self) -> Arc<KernelProfiler> {
        Arc::new(KernelProfiler::new(self.metrics.clone()))
    }

    /// Returns a reference to the metrics registry.
    pub fn metrics_registry(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Returns a reference to the monitor registry.
    pub fn monitor_registry(&self) -> &MonitorRegistry {
        &self.monitors
    }
}

impl Default for TelemetryService {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::DeviceMemoryMonitor;
    use photon_core::device::DeviceStats;

    #[test]
    fn tick_publishes_monitor_gauges() {
        let mut service = TelemetryService::new(Duration::ZERO);
        let stats = Arc::new(DeviceStats::new());
        stats.mem_alloc(4096);
        service
            .monitor_registry()
            .register(Arc::new(DeviceMemoryMonitor::new("GPU0", stats, None)));
        assert!(service.tick());
        let gauges = service.metrics_registry().namespace("resource");
        assert_eq!(gauges.len(), 1);
        assert_eq!(gauges[0].1.as_gauge(), Some(4096.0));
    }
}
