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

//! The seam between [`GpuDevice`](super::GpuDevice) and a concrete GPU API.
//!
//! A driver exposes raw allocations, module loading and launches. Everything
//! the device layer adds on top (virtual pointers, headroom, host fallback,
//! sticky errors, acceleration structures) lives in the device, so CUDA, HIP,
//! oneAPI, Metal and wgpu drivers only translate calls.

use crate::bvh::hardware::RayTracingEngine;
use photon_core::device::{DataType, DeviceType, KernelArgs, ParamLayout};
use photon_core::device::memory::{ExtensionType, InterpolationType};
use photon_core::device::kernel::RtPipeline;
use photon_core::interop::GraphicsApi;
use std::any::Any;
use std::fmt::{self, Debug};

/// An address in the driver's own address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawPtr(pub u64);

impl RawPtr {
    /// Pointer `bytes` past `self`.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        RawPtr(self.0 + bytes)
    }
}

impl fmt::Display for RawPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A loaded kernel module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// A texture object created by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// A graphics resource registered for interop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsResource(pub u64);

/// Failure reported by a driver call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The allocation does not fit.
    #[error("out of memory")]
    OutOfMemory,
    /// An argument was rejected.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// A module image could not be loaded.
    #[error("module load failed: {0}")]
    ModuleLoad(String),
    /// A launch was rejected or failed.
    #[error("launch failed: {0}")]
    Launch(String),
    /// The driver does not implement this call.
    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
    /// The device was lost or reset.
    #[error("device lost")]
    DeviceLost,
    /// Anything else, with the driver's message.
    #[error("{0}")]
    Other(String),
}

/// Filter mode of a texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Nearest texel.
    Point,
    /// Hardware linear filtering.
    Linear,
}

/// Address mode of a texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Repeat.
    Wrap,
    /// Clamp to edge.
    Clamp,
    /// Transparent border.
    Border,
    /// Mirror.
    Mirror,
}

impl FilterMode {
    /// Cubic and smart interpolation sample points and filter in kernel code.
    pub fn from_interpolation(interpolation: InterpolationType) -> Self {
        match interpolation {
            InterpolationType::Linear => FilterMode::Linear,
            InterpolationType::Closest | InterpolationType::Cubic | InterpolationType::Smart => {
                FilterMode::Point
            }
        }
    }
}

impl AddressMode {
    /// Address mode for an image extension.
    pub fn from_extension(extension: ExtensionType) -> Self {
        match extension {
            ExtensionType::Repeat => AddressMode::Wrap,
            ExtensionType::Extend => AddressMode::Clamp,
            ExtensionType::Clip => AddressMode::Border,
            ExtensionType::Mirror => AddressMode::Mirror,
        }
    }
}

/// Everything a driver needs to create a texture object over device memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureDesc {
    /// Width in texels.
    pub width: usize,
    /// Height in texels, 0 for 1D.
    pub height: usize,
    /// Depth in texels, 0 for 2D.
    pub depth: usize,
    /// Component type.
    pub data_type: DataType,
    /// Components per texel.
    pub components: usize,
    /// Bytes between rows for pitched 2D images.
    pub pitch: usize,
    /// Filtering.
    pub filter: FilterMode,
    /// Addressing.
    pub address: AddressMode,
}

/// Grid and block size of a compute launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    /// Blocks.
    pub grid: u32,
    /// Threads per block.
    pub block: u32,
}

impl LaunchDims {
    /// Enough blocks of `block` threads to cover `work_size`.
    pub fn cover(work_size: usize, block: u32) -> Self {
        let block = block.max(1);
        Self {
            grid: (work_size as u64).div_ceil(block as u64).max(1) as u32,
            block,
        }
    }
}

/// A native GPU API binding.
///
/// Calls are made with the device's context lock held, so implementations may
/// assume one caller at a time per driver instance.
pub trait GpuDriver: Send + Sync + Debug {
    /// Backend this driver implements.
    fn backend(&self) -> DeviceType;

    /// Device name as reported by the API.
    fn name(&self) -> String;

    /// `(major, minor)` compute capability, or the API's equivalent.
    fn compute_capability(&self) -> (u32, u32);

    /// Architecture string used in kernel cache keys (`sm_86`, `gfx1100`, ...).
    fn architecture(&self) -> String;

    /// Makes the driver context current on this thread.
    fn context_push(&self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Releases the context made current by [`GpuDriver::context_push`].
    fn context_pop(&self) {}

    /// `(free, total)` device memory in bytes.
    fn mem_get_info(&self) -> Result<(u64, u64), DriverError>;

    /// Allocates device memory.
    fn mem_alloc(&self, size: u64) -> Result<RawPtr, DriverError>;

    /// Frees device memory.
    fn mem_free(&self, ptr: RawPtr);

    /// `true` if pinned host memory can be mapped into the device address space.
    fn can_map_host(&self) -> bool {
        false
    }

    /// Allocates mapped pinned host memory and returns its device address.
    fn mem_host_alloc(&self, _size: u64) -> Result<RawPtr, DriverError> {
        Err(DriverError::Unsupported("mapped host memory"))
    }

    /// Frees memory from [`GpuDriver::mem_host_alloc`].
    fn mem_host_free(&self, _ptr: RawPtr) {}

    /// Copies `src` to device address `dst`.
    fn memcpy_htod(&self, dst: RawPtr, src: &[u8]) -> Result<(), DriverError>;

    /// Copies from device address `src` into `dst`.
    fn memcpy_dtoh(&self, dst: &mut [u8], src: RawPtr) -> Result<(), DriverError>;

    /// Copies between device addresses, staged through the host by default.
    fn memcpy_dtod(&self, dst: RawPtr, src: RawPtr, size: u64) -> Result<(), DriverError> {
        let mut staging = vec![0u8; size as usize];
        self.memcpy_dtoh(&mut staging, src)?;
        self.memcpy_htod(dst, &staging)
    }

    /// Fills `size` bytes at `dst` with `value`.
    fn memset(&self, dst: RawPtr, value: u8, size: u64) -> Result<(), DriverError>;

    /// Loads a compiled module image whose constant block follows `params`.
    fn module_load(&self, image: &[u8], params: &ParamLayout) -> Result<ModuleId, DriverError>;

    /// Unloads a module.
    fn module_unload(&self, module: ModuleId);

    /// Writes `data` at `offset` of the module's constant-parameter block.
    fn const_write(&self, module: ModuleId, offset: usize, data: &[u8]) -> Result<(), DriverError>;

    /// Binds a global buffer by name into the module.
    fn bind_global(&self, module: ModuleId, name: &str, ptr: RawPtr, size: u64) -> Result<(), DriverError>;

    /// Threads per block giving the best occupancy for `entry`.
    fn occupancy_block_size(&self, _module: ModuleId, _entry: &str) -> Result<u32, DriverError> {
        Ok(256)
    }

    /// Launches a compute kernel.
    fn launch(&self, module: ModuleId, entry: &str, dims: LaunchDims, args: &KernelArgs) -> Result<(), DriverError>;

    /// Launches a ray-tracing pipeline with the given raygen record.
    fn launch_ray_tracing(
        &self,
        _module: ModuleId,
        _pipeline: RtPipeline,
        _raygen: u32,
        _work_size: usize,
        _args: &KernelArgs,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("ray-tracing launches"))
    }

    /// Blocks until all submitted work completed.
    fn synchronize(&self) -> Result<(), DriverError>;

    /// `true` if this device can read memory of `other`.
    fn can_access_peer(&self, _other: &dyn GpuDriver) -> bool {
        false
    }

    /// Enables access from this device to memory of `other`.
    fn enable_peer_access(&self, _other: &dyn GpuDriver) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("peer access"))
    }

    /// The hardware ray-tracing engine, when the device has one.
    fn ray_tracing(&self) -> Option<&dyn RayTracingEngine> {
        None
    }

    /// Creates a texture object over `data`.
    fn texture_create(&self, _desc: &TextureDesc, _data: RawPtr) -> Result<TextureHandle, DriverError> {
        Err(DriverError::Unsupported("texture objects"))
    }

    /// Destroys a texture object.
    fn texture_destroy(&self, _texture: TextureHandle) {}

    /// Row alignment of pitched 2D images.
    fn pitch_alignment(&self) -> usize {
        32
    }

    /// `true` if buffers of `api` can be registered for interop.
    fn graphics_interop_supported(&self, _api: GraphicsApi) -> bool {
        false
    }

    /// Registers a graphics buffer.
    fn graphics_register(&self, _api: GraphicsApi, _handle: u64) -> Result<GraphicsResource, DriverError> {
        Err(DriverError::Unsupported("graphics interop"))
    }

    /// Maps a registered buffer and returns its device address.
    fn graphics_map(&self, _resource: GraphicsResource) -> Result<RawPtr, DriverError> {
        Err(DriverError::Unsupported("graphics interop"))
    }

    /// Unmaps a registered buffer.
    fn graphics_unmap(&self, _resource: GraphicsResource) -> Result<(), DriverError> {
        Ok(())
    }

    /// Unregisters a graphics buffer.
    fn graphics_unregister(&self, _resource: GraphicsResource) {}

    /// Allows downcasting to a concrete driver.
    fn as_any(&self) -> &dyn Any;
}
