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

//! Devices, memory descriptors, kernels and queues.
//!
//! This module holds the abstract "what" of compute: the [`Device`] contract,
//! the values passed through it, and the errors it reports. Concrete devices
//! live in `photon-infra`.

pub mod config;
pub mod error;
pub mod info;
pub mod kernel;
pub mod memory;
pub mod profiler;
pub mod progress;
pub mod queue;
pub mod selector;
pub mod stats;
pub mod traits;

pub use self::config::{ConfigError, DeviceConfig};
pub use self::error::{BuildError, DeviceError};
pub use self::info::{DeviceId, DeviceInfo, DeviceType, DeviceTypeMask};
pub use self::kernel::{
    DeviceKernel, KernelArg, KernelArgs, KernelFeatures, KernelProgram, KernelVariant,
    ParamLayout,
};
pub use self::memory::{DataType, DevicePtr, MemoryDescriptor, MemoryType};
pub use self::profiler::{NullProfiler, ProfileEvent, Profiler};
pub use self::progress::{Progress, SharedProgress};
pub use self::queue::{execute_batches, BatchOutcome, DeviceQueue, KernelLaunch, QueueState};
pub use self::selector::ComputeAdapterSelector;
pub use self::stats::{DeviceStats, DeviceStatsSnapshot};
pub use self::traits::Device;
