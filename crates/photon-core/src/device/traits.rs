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

//! The polymorphic compute-device contract.

use super::error::DeviceError;
use super::info::{DeviceId, DeviceInfo};
use super::kernel::KernelFeatures;
use super::memory::MemoryDescriptor;
use super::progress::Progress;
use super::queue::DeviceQueue;
use super::stats::DeviceStats;
use crate::bvh::{AccelState, BvhBuildRequest, BvhHandle, BvhLayoutMask};
use crate::interop::GraphicsApi;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// One compute device: a CPU thread pool, a GPU, or several devices acting as one.
///
/// Implementations are shared across threads behind an `Arc`. Every method takes
/// `&self`; devices synchronize internally. Fallible operations that fail at the
/// backend level also record the failure as the device's sticky error, after
/// which [`Device::have_error`] stays `true` for the lifetime of the device.
pub trait Device: Send + Sync + Debug {
    /// Process-unique id of this instance.
    fn id(&self) -> DeviceId;

    /// The description this device was created from.
    fn info(&self) -> &DeviceInfo;

    /// Memory counters shared with the session.
    fn stats(&self) -> &Arc<DeviceStats>;

    /// The sticky error message, empty while healthy.
    fn error_message(&self) -> String;

    /// `true` once any error was recorded.
    fn have_error(&self) -> bool {
        !self.error_message().is_empty()
    }

    /// Records `message` as the sticky error.
    fn set_error(&self, message: &str);

    /// Acceleration-structure layouts this device consumes.
    fn bvh_layout_mask(&self) -> BvhLayoutMask {
        self.info().bvh_layouts
    }

    /// Allocates device storage for a linear buffer.
    ///
    /// ## Errors
    /// [`DeviceError::InvalidMemoryType`] for `Texture` and `Global` descriptors,
    /// which go through [`Device::mem_copy_to`]. [`DeviceError::OutOfMemory`] when
    /// neither device nor mapped host memory can hold the buffer.
    fn mem_alloc(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Uploads the host bytes, allocating first if needed.
    ///
    /// Globals are freed, reallocated, copied and re-bound by name into every
    /// loaded module. Textures are freed and reallocated as images.
    fn mem_copy_to(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Reads back `h` rows of `w` elements of `elem` bytes each, starting at row `y`.
    ///
    /// A descriptor without device storage yields zeroed host rows.
    fn mem_copy_from(
        &self,
        mem: &mut MemoryDescriptor,
        y: usize,
        w: usize,
        h: usize,
        elem: usize,
    ) -> Result<(), DeviceError>;

    /// Zeroes the device copy, allocating first if needed.
    fn mem_zero(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Releases device storage. Does nothing for descriptors this device does
    /// not own.
    fn mem_free(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Writes `data` into the named field of the constant-parameter block.
    ///
    /// ## Errors
    /// [`DeviceError::ParamSizeMismatch`] if the declared field width differs
    /// from `data.len()`.
    fn const_copy_to(&self, name: &str, data: &[u8]) -> Result<(), DeviceError>;

    /// Compiles or fetches, then loads, the kernels covering `features`.
    ///
    /// Idempotent when the loaded modules already cover `features`.
    fn load_kernels(&self, features: KernelFeatures) -> Result<(), DeviceError>;

    /// Builds, rebuilds or refits an acceleration structure.
    ///
    /// ## Arguments
    /// * `request` - Level, geometry or instances, policy, and an optional
    ///   existing handle to rebuild or refit in place.
    /// * `progress` - Receives substatus updates and build errors.
    /// * `refit` - Refit the existing structure instead of rebuilding it.
    ///
    /// ## Returns
    /// The handle of the built structure, equal to the existing handle on refit.
    fn build_bvh(
        &self,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
    ) -> Result<BvhHandle, DeviceError>;

    /// Drops the caller's reference. Storage is reclaimed once no top-level
    /// structure references it and submitted work that may read it has completed.
    fn release_bvh(&self, handle: BvhHandle) -> Result<(), DeviceError>;

    /// Current state of `handle`, `None` for stale or unknown handles.
    fn bvh_state(&self, handle: BvhHandle) -> Option<AccelState>;

    /// Reclaims deferred frees whose queue epoch has completed.
    ///
    /// ## Returns
    /// The number of structures whose storage was released.
    fn flush_deferred_frees(&self) -> usize;

    /// Creates a new queue bound to this device.
    fn queue_create(&self) -> Result<Box<dyn DeviceQueue>, DeviceError>;

    /// Negotiates peer access with `other`, in both directions.
    fn check_peer_access(&self, _other: &dyn Device) -> bool {
        false
    }

    /// `true` if display buffers of `api` can be mapped for kernels directly.
    fn should_use_graphics_interop(&self, _api: GraphicsApi) -> bool {
        false
    }

    /// Allows downcasting to a concrete device type.
    fn as_any(&self) -> &dyn Any;
}
