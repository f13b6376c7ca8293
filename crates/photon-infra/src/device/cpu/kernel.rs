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

//! Host kernels and the view of device memory they run against.

use super::memory::{CpuBuffer, CpuMemory};
use photon_core::device::{DeviceKernel, DevicePtr, KernelArg, KernelArgs, ParamLayout};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// A host kernel, called once per chunk of the work range.
pub type CpuKernelFn = Arc<dyn Fn(&CpuKernelContext, Range<usize>) -> Result<(), String> + Send + Sync>;

/// The host implementations a CPU device can launch.
#[derive(Clone, Default)]
pub struct CpuKernels {
    kernels: HashMap<DeviceKernel, CpuKernelFn>,
}

impl fmt::Debug for CpuKernels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kernels.keys()).finish()
    }
}

impl CpuKernels {
    /// No kernels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the implementation of `kernel`.
    pub fn with(
        mut self,
        kernel: DeviceKernel,
        f: impl Fn(&CpuKernelContext, Range<usize>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.kernels.insert(kernel, Arc::new(f));
        self
    }

    /// Implementation of `kernel`.
    pub fn get(&self, kernel: DeviceKernel) -> Option<&CpuKernelFn> {
        self.kernels.get(&kernel)
    }

    /// Number of registered kernels.
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Everything a host kernel can reach during one launch.
///
/// Buffers are locked per call, so a kernel should read its inputs and write
/// its outputs once per chunk rather than once per work item.
pub struct CpuKernelContext {
    pub(super) args: KernelArgs,
    pub(super) memory: Arc<CpuMemory>,
    pub(super) params: Vec<u8>,
    pub(super) layout: ParamLayout,
}

impl CpuKernelContext {
    /// Launch arguments.
    pub fn args(&self) -> &[KernelArg] {
        self.args.as_slice()
    }

    /// The `index`-th argument as a pointer.
    pub fn ptr_arg(&self, index: usize) -> Result<DevicePtr, String> {
        match self.args.as_slice().get(index) {
            Some(KernelArg::Pointer(ptr)) => Ok(*ptr),
            other => Err(format!("argument {index} is not a pointer: {other:?}")),
        }
    }

    /// The `index`-th argument as an integer.
    pub fn int_arg(&self, index: usize) -> Result<i64, String> {
        match self.args.as_slice().get(index) {
            Some(KernelArg::Int(v)) => Ok(i64::from(*v)),
            Some(KernelArg::UInt(v)) => Ok(i64::from(*v)),
            other => Err(format!("argument {index} is not an integer: {other:?}")),
        }
    }

    /// The `index`-th argument as a float.
    pub fn float_arg(&self, index: usize) -> Result<f32, String> {
        match self.args.as_slice().get(index) {
            Some(KernelArg::Float(v)) => Ok(*v),
            other => Err(format!("argument {index} is not a float: {other:?}")),
        }
    }

    /// Bytes of the constant-parameter field `name`.
    pub fn param(&self, name: &str) -> Option<&[u8]> {
        let field = self.layout.get(name)?;
        self.params.get(field.offset..field.offset + field.size)
    }

    /// Pointer bound to the global `name`.
    pub fn global(&self, name: &str) -> Option<DevicePtr> {
        self.memory.global(name)
    }

    /// Pointer of the texture in `slot`.
    pub fn texture(&self, slot: usize) -> Option<DevicePtr> {
        self.memory.texture(slot)
    }

    fn buffer(&self, ptr: DevicePtr) -> Result<(Arc<CpuBuffer>, usize), String> {
        self.memory
            .resolve(ptr)
            .ok_or_else(|| format!("invalid device pointer {:#x}", ptr.0))
    }

    /// Copies `count` elements of `T` starting at `ptr`.
    pub fn read<T: bytemuck::Pod>(&self, ptr: DevicePtr, count: usize) -> Result<Vec<T>, String> {
        let (buffer, offset) = self.buffer(ptr)?;
        let bytes = buffer.read();
        let size = count * std::mem::size_of::<T>();
        let slice = bytes
            .get(offset..offset + size)
            .ok_or_else(|| format!("read of {size} bytes past the end of {:#x}", ptr.0))?;
        Ok(bytemuck::pod_collect_to_vec(slice))
    }

    /// Writes `data` at element `index` of the buffer at `ptr`.
    pub fn write<T: bytemuck::Pod>(&self, ptr: DevicePtr, index: usize, data: &[T]) -> Result<(), String> {
        let (buffer, offset) = self.buffer(ptr)?;
        let mut bytes = buffer.write();
        let start = offset + index * std::mem::size_of::<T>();
        let src: &[u8] = bytemuck::cast_slice(data);
        let dst = bytes
            .get_mut(start..start + src.len())
            .ok_or_else(|| format!("write of {} bytes past the end of {:#x}", src.len(), ptr.0))?;
        dst.copy_from_slice(src);
        Ok(())
    }
}
