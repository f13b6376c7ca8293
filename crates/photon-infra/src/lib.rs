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

//! # Photon Infra
//!
//! Concrete implementations of the `photon-core` contracts: the CPU, GPU,
//! multi and dummy devices, the GPU driver seam with its wgpu driver, the
//! kernel compiler and on-disk cache, software and hardware acceleration
//! structure builders, and display interop.

#![warn(missing_docs)]

pub mod bvh;
pub mod device;
pub mod interop;
pub mod kernel;
pub mod thread;

pub use device::{CpuDevice, DeviceFactory, DriverFactory, DummyDevice, GpuDevice, MultiDevice};
pub use interop::{InteropMode, PixelDisplay};
pub use kernel::{KernelCache, KernelResolver};
