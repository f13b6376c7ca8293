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

//! # Photon Telemetry
//!
//! Logging setup, a metrics registry, the kernel profiler devices report into,
//! and monitors over device and host memory.

#![warn(missing_docs)]

pub mod logging;
pub mod metrics;
pub mod monitoring;
pub mod profiler;
pub mod service;
pub mod timer;

pub use logging::{init_logging, init_tracing};
pub use metrics::registry::{CounterHandle, GaugeHandle, HistogramHandle, MetricsRegistry};
pub use monitoring::{DeviceMemoryMonitor, MonitorRegistry, SystemMemoryMonitor};
pub use profiler::KernelProfiler;
pub use service::TelemetryService;
pub use timer::ScopedMetricTimer;
