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

//! Profiling hooks devices report into.

use super::info::DeviceId;
use super::kernel::DeviceKernel;
use std::fmt::Debug;
use std::time::Duration;

/// Something a device did that is worth timing or counting.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    /// A kernel was enqueued.
    KernelLaunch {
        /// Device.
        device: DeviceId,
        /// Kernel.
        kernel: DeviceKernel,
        /// Work items.
        work_size: usize,
    },
    /// A queue finished synchronizing.
    Synchronize {
        /// Device.
        device: DeviceId,
        /// Time spent blocked.
        elapsed: Duration,
    },
    /// A kernel module was compiled.
    KernelCompile {
        /// Variant name.
        variant: String,
        /// Compile time.
        elapsed: Duration,
    },
    /// An acceleration structure was built or refit.
    BvhBuild {
        /// Device.
        device: DeviceId,
        /// `true` for refits.
        refit: bool,
        /// Build time.
        elapsed: Duration,
    },
}

/// Receives [`ProfileEvent`]s. Implementations must be cheap and thread-safe.
pub trait Profiler: Send + Sync + Debug {
    /// Records one event.
    fn record(&self, event: ProfileEvent);
}

/// A profiler that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProfiler;

impl Profiler for NullProfiler {
    fn record(&self, _event: ProfileEvent) {}
}
