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

//! Active resource monitoring.
//!
//! A monitor polls a resource (device memory, host RAM, the kernel cache) and
//! produces a snapshot, as opposed to metrics which are pushed event by event.

use std::borrow::Cow;
use std::fmt::Debug;

/// A stateful poller of one resource.
pub trait ResourceMonitor: Send + Sync + Debug + 'static {
    /// Unique, human-readable identifier.
    fn monitor_id(&self) -> Cow<'static, str>;

    /// Kind of resource.
    fn resource_type(&self) -> MonitoredResourceType;

    /// Current usage snapshot.
    fn get_usage_report(&self) -> ResourceUsageReport;

    /// Allows downcasting to the concrete monitor.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Refreshes internal state. Passive monitors keep the default.
    fn update(&self) {}
}

/// Kinds of monitored resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredResourceType {
    /// Memory of a compute device.
    DeviceMemory,
    /// Host RAM.
    SystemRam,
    /// On-disk kernel cache.
    KernelCache,
}

/// A usage snapshot in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsageReport {
    /// Bytes in use.
    pub current_bytes: u64,
    /// High-water mark, if tracked.
    pub peak_bytes: Option<u64>,
    /// Capacity, if known.
    pub total_capacity_bytes: Option<u64>,
}

impl ResourceUsageReport {
    /// Fraction of capacity in use, when capacity is known and non-zero.
    pub fn utilization(&self) -> Option<f64> {
        match self.total_capacity_bytes {
            Some(total) if total > 0 => Some(self.current_bytes as f64 / total as f64),
            _ => None,
        }
    }
}
