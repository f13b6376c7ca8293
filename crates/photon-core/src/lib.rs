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

//! # Photon Core
//!
//! Foundational crate containing the contracts, core types and math shared by
//! every compute backend: memory descriptors, the `Device` and `DeviceQueue`
//! traits, kernel identifiers, acceleration-structure inputs and the graphics
//! interop contracts.

#![warn(missing_docs)]

pub mod bvh;
pub mod device;
pub mod interop;
pub mod math;
pub mod telemetry;
pub mod utils;

pub use device::{
    Device, DeviceConfig, DeviceError, DeviceId, DeviceInfo, DeviceQueue, DeviceStats, DeviceType,
    MemoryDescriptor,
};
pub use utils::timer::Stopwatch;

#[doc(hidden)]
pub use serde as __serde;
