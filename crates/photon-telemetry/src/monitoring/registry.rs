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

//! Registry of the monitors watching devices and host memory.
//!
//! Monitors are keyed by [`ResourceMonitor::monitor_id`]. Registering a second
//! monitor under an existing id replaces the first, which is what happens when
//! a device is recreated after a fault.

use super::DeviceMemoryMonitor;
use photon_core::device::{DeviceInfo, DeviceStats};
use photon_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use std::sync::{Arc, Mutex};

/// A thread-safe, shareable set of resource monitors.
#[derive(Debug, Clone, Default)]
pub struct MonitorRegistry {
    monitors: Arc<Mutex<Vec<Arc<dyn ResourceMonitor>>>>,
}

impl MonitorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `monitor`, replacing any monitor with the same id.
    /// Returns `true` if one was replaced.
    pub fn register(&self, monitor: Arc<dyn ResourceMonitor>) -> bool {
        let id = monitor.monitor_id();
        let Ok(mut monitors) = self.monitors.lock() else {
            return false;
        };
        match monitors.iter().position(|m| m.monitor_id() == id) {
            Some(index) => {
                monitors[index] = monitor;
                log::debug!("Replaced resource monitor: {id}");
                true
            }
            None => {
                monitors.push(monitor);
                log::info!("Registered resource monitor: {id}");
                false
            }
        }
    }

    /// Watches the memory counters of the device described by `info`.
    ///
    /// Multi devices share one `stats` across their sub-devices, so they get a
    /// single monitor labelled by the multi device's id.
    pub fn watch_device(&self, info: &DeviceInfo, stats: Arc<DeviceStats>) -> Arc<DeviceMemoryMonitor> {
        let capacity = if info.is_multi() {
            info.multi_devices
                .iter()
                .map(|sub| sub.memory_capacity)
                .sum::<Option<u64>>()
        } else {
            info.memory_capacity
        };
        let monitor = Arc::new(DeviceMemoryMonitor::new(info.id.clone(), stats, capacity));
        self.register(monitor.clone());
        monitor
    }

    /// Removes the monitor with `monitor_id`. Returns `true` if it existed.
    pub fn unregister(&self, monitor_id: &str) -> bool {
        let Ok(mut monitors) = self.monitors.lock() else {
            return false;
        };
        let before = monitors.len();
        monitors.retain(|m| m.monitor_id() != monitor_id);
        before != monitors.len()
    }

    /// Refreshes every active monitor.
    pub fn update_all(&self) {
        for monitor in self.get_all_monitors() {
            monitor.update();
        }
    }

    /// Snapshot of all monitors. The lock is not held while callers poll them.
    pub fn get_all_monitors(&self) -> Vec<Arc<dyn ResourceMonitor>> {
        self.monitors
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Current reports of every monitor of `kind`, by monitor id.
    pub fn reports(&self, kind: MonitoredResourceType) -> Vec<(String, ResourceUsageReport)> {
        self.get_all_monitors()
            .into_iter()
            .filter(|m| m.resource_type() == kind)
            .map(|m| (m.monitor_id().into_owned(), m.get_usage_report()))
            .collect()
    }

    /// Device memory in use summed over every watched device.
    pub fn device_memory_used(&self) -> u64 {
        self.reports(MonitoredResourceType::DeviceMemory)
            .iter()
            .map(|(_, report)| report.current_bytes)
            .sum()
    }
}
