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

use photon_core::device::DeviceStats;
use photon_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use std::borrow::Cow;
use std::sync::Arc;

/// Reports the memory counters of one device.
///
/// The counters are updated by the device itself, so this monitor is passive.
#[derive(Debug)]
pub struct DeviceMemoryMonitor {
    label: String,
    stats: Arc<DeviceStats>,
    capacity: Option<u64>,
}

impl DeviceMemoryMonitor {
    /// Monitors `stats`; `capacity` is the device memory size when known.
    pub fn new(label: impl Into<String>, stats: Arc<DeviceStats>, capacity: Option<u64>) -> Self {
        Self {
            label: label.into(),
            stats,
            capacity,
        }
    }
}

impl ResourceMonitor for DeviceMemoryMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(format!("DeviceMemory_{}", self.label))
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::DeviceMemory
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let snapshot = self.stats.snapshot();
        ResourceUsageReport {
            current_bytes: snapshot.mem_used,
            peak_bytes: Some(snapshot.mem_peak),
            total_capacity_bytes: self.capacity,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_follows_stats() {
        let stats = Arc::new(DeviceStats::new());
        let monitor = DeviceMemoryMonitor::new("CPU", stats.clone(), Some(1000));
        stats.mem_alloc(600);
        stats.mem_free(200);
        let report = monitor.get_usage_report();
        assert_eq!(report.current_bytes, 400);
        assert_eq!(report.peak_bytes, Some(600));
        assert_eq!(report.utilization(), Some(0.4));
        assert_eq!(monitor.monitor_id(), "DeviceMemory_CPU");
    }
}
