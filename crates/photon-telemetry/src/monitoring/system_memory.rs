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

use photon_core::telemetry::{MonitoredResourceType, ResourceMonitor, ResourceUsageReport};
use std::borrow::Cow;
use std::sync::Mutex;
use sysinfo::System;

/// Host RAM usage, polled through `sysinfo`.
#[derive(Debug)]
pub struct SystemMemoryMonitor {
    system: Mutex<System>,
    peak: Mutex<u64>,
}

impl SystemMemoryMonitor {
    /// Creates the monitor and takes a first sample.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let used = system.used_memory();
        Self {
            system: Mutex::new(system),
            peak: Mutex::new(used),
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemMemoryMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Borrowed("SystemRam")
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::SystemRam
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let Ok(system) = self.system.lock() else {
            return ResourceUsageReport::default();
        };
        ResourceUsageReport {
            current_bytes: system.used_memory(),
            peak_bytes: self.peak.lock().ok().map(|p| *p),
            total_capacity_bytes: Some(system.total_memory()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn update(&self) {
        if let Ok(mut system) = self.system.lock() {
            system.refresh_memory();
            if let Ok(mut peak) = self.peak.lock() {
                *peak = (*peak).max(system.used_memory());
            }
        }
    }
}
