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

//! Backend-agnostic description of one device buffer.
//!
//! A [`MemoryDescriptor`] is owned by scene or session code. Devices only touch
//! its pointer fields and, for downloads, its host bytes.

use super::info::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a buffer is used by kernels, which decides the allocation entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// Read-only constant data uploaded from the host.
    ReadOnly,
    /// Plain buffer written by kernels and read back.
    ReadWrite,
    /// Scratch storage that never round-trips to the host.
    DeviceOnly,
    /// Broadcast buffer bound by name into the kernel parameter block.
    Global,
    /// Image sampled through a texture object.
    Texture,
    /// Display pixels, possibly shared with the graphics API.
    Pixels,
}

/// Scalar type of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `u8`.
    UChar,
    /// `u16`.
    UInt16,
    /// `u32`.
    UInt,
    /// `i32`.
    Int,
    /// `f32`.
    Float,
    /// IEEE half float.
    Half,
    /// `u64`.
    UInt64,
}

impl DataType {
    /// Size of one component in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::UChar => 1,
            DataType::UInt16 | DataType::Half => 2,
            DataType::UInt | DataType::Int | DataType::Float => 4,
            DataType::UInt64 => 8,
        }
    }
}

/// An opaque device address. `DevicePtr::NULL` means "not allocated".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null pointer.
    pub const NULL: Self = DevicePtr(0);

    /// `true` for the null pointer.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pointer `bytes` past `self`.
    #[inline]
    pub fn offset(self, bytes: u64) -> Self {
        DevicePtr(self.0 + bytes)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterpolationType {
    /// Bilinear / trilinear.
    #[default]
    Linear,
    /// Nearest texel.
    Closest,
    /// Bicubic, evaluated in kernel code from point samples.
    Cubic,
    /// Cubic when magnified, linear otherwise; also point-sampled in hardware.
    Smart,
}

/// Texture addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExtensionType {
    /// Wrap around.
    #[default]
    Repeat,
    /// Clamp to the edge texel.
    Extend,
    /// Transparent black outside the image.
    Clip,
    /// Mirror at the edges.
    Mirror,
}

/// Sampling description of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Filtering.
    pub interpolation: InterpolationType,
    /// Addressing.
    pub extension: ExtensionType,
}

/// One device buffer.
///
/// Exactly one device is the resident owner of `device_pointer`. In a
/// multi-device setup other devices may see the same pointer through peer
/// access; they must check [`MemoryDescriptor::is_resident`] before freeing.
#[derive(Debug, Clone)]
pub struct MemoryDescriptor {
    /// Name used for global bindings and diagnostics.
    pub name: String,
    /// Usage class.
    pub mem_type: MemoryType,
    /// Component type.
    pub data_type: DataType,
    /// Components per element (e.g. 4 for `float4`).
    pub data_elements: usize,
    /// Width in elements.
    pub data_width: usize,
    /// Height in elements, 0 for linear buffers.
    pub data_height: usize,
    /// Depth in elements, 0 for 2D images and linear buffers.
    pub data_depth: usize,
    /// Sampling for textures.
    pub image: ImageInfo,
    /// Device address, owned by the device that allocated it.
    pub device_pointer: DevicePtr,
    /// Bytes reserved on the device.
    pub device_size: u64,
    /// Host-mapped region shared between devices, when the allocation fell back
    /// to mapped host memory.
    pub shared_pointer: Option<DevicePtr>,
    /// Number of devices using `shared_pointer`.
    pub shared_counter: u32,
    /// The device owning `device_pointer`.
    pub resident: Option<DeviceId>,
    /// Slot in the device texture-info table.
    pub slot: Option<usize>,
    host: Vec<u8>,
}

impl MemoryDescriptor {
    /// Creates an empty descriptor.
    pub fn new(name: impl Into<String>, mem_type: MemoryType, data_type: DataType, data_elements: usize) -> Self {
        Self {
            name: name.into(),
            mem_type,
            data_type,
            data_elements: data_elements.max(1),
            data_width: 0,
            data_height: 0,
            data_depth: 0,
            image: ImageInfo::default(),
            device_pointer: DevicePtr::NULL,
            device_size: 0,
            shared_pointer: None,
            shared_counter: 0,
            resident: None,
            slot: None,
            host: Vec::new(),
        }
    }

    /// Creates a linear descriptor whose host bytes are a copy of `data`.
    pub fn from_slice<T: bytemuck::Pod>(
        name: impl Into<String>,
        mem_type: MemoryType,
        data_type: DataType,
        data_elements: usize,
        data: &[T],
    ) -> Self {
        let mut mem = Self::new(name, mem_type, data_type, data_elements);
        mem.set_host_data(data);
        mem
    }

    /// Replaces the host bytes with `data`, treating it as a linear buffer.
    pub fn set_host_data<T: bytemuck::Pod>(&mut self, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.host = bytes.to_vec();
        self.data_width = bytes.len() / self.element_size();
        self.data_height = 0;
        self.data_depth = 0;
    }

    /// Sizes the host storage for `width x height x depth` elements, zero-filled.
    pub fn alloc_host(&mut self, width: usize, height: usize, depth: usize) {
        self.data_width = width;
        self.data_height = height;
        self.data_depth = depth;
        self.host = vec![0; self.memory_size()];
    }

    /// Drops the host storage.
    pub fn free_host(&mut self) {
        self.host = Vec::new();
    }

    /// Host bytes.
    pub fn host(&self) -> &[u8] {
        &self.host
    }

    /// Mutable host bytes.
    pub fn host_mut(&mut self) -> &mut [u8] {
        &mut self.host
    }

    /// `true` when the descriptor has host storage.
    pub fn has_host(&self) -> bool {
        !self.host.is_empty()
    }

    /// Copies the host bytes out as typed values.
    pub fn host_to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.host)
    }

    /// Bytes per element.
    pub fn element_size(&self) -> usize {
        self.data_elements * self.data_type.size()
    }

    /// Number of elements.
    pub fn data_size(&self) -> usize {
        self.data_width * self.data_height.max(1) * self.data_depth.max(1)
    }

    /// Size in bytes of the whole buffer.
    pub fn memory_size(&self) -> usize {
        self.data_size() * self.element_size()
    }

    /// `true` for 2D or 3D images.
    pub fn is_image(&self) -> bool {
        self.mem_type == MemoryType::Texture
    }

    /// `true` if `device` owns the device storage, or nobody does yet.
    pub fn is_resident(&self, device: DeviceId) -> bool {
        self.resident.map_or(true, |owner| owner == device)
    }

    /// Clears the device-side fields after a free.
    pub fn reset_device(&mut self) {
        self.device_pointer = DevicePtr::NULL;
        self.device_size = 0;
        self.resident = None;
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_type_and_dimensions() {
        let mut mem = MemoryDescriptor::new("image", MemoryType::Texture, DataType::Half, 4);
        mem.alloc_host(16, 8, 0);
        assert_eq!(mem.element_size(), 8);
        assert_eq!(mem.data_size(), 128);
        assert_eq!(mem.memory_size(), 1024);
        assert_eq!(mem.host().len(), 1024);
        assert!(mem.is_image());
    }

    #[test]
    fn from_slice_derives_width() {
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let mem = MemoryDescriptor::from_slice("v", MemoryType::ReadOnly, DataType::Float, 3, &data);
        assert_eq!(mem.data_width, 4);
        assert_eq!(mem.memory_size(), 48);
        assert_eq!(mem.host_to_vec::<f32>(), data);
    }

    #[test]
    fn residency_defaults_to_anyone() {
        let mut mem = MemoryDescriptor::new("b", MemoryType::ReadWrite, DataType::UInt, 1);
        let a = DeviceId(10);
        let b = DeviceId(11);
        assert!(mem.is_resident(a));
        mem.resident = Some(a);
        assert!(mem.is_resident(a));
        assert!(!mem.is_resident(b));
        mem.reset_device();
        assert!(mem.is_resident(b));
    }
}
