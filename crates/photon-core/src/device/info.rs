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

//! Device identification: backend kinds, selection masks and `DeviceInfo`.

use crate::bvh::BvhLayoutMask;
use crate::photon_bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// The closed set of compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    /// Host threads.
    Cpu,
    /// NVIDIA CUDA.
    Cuda,
    /// NVIDIA OptiX (CUDA with hardware ray tracing).
    Optix,
    /// AMD HIP.
    Hip,
    /// AMD HIP with the HIP-RT ray tracing library.
    HipRt,
    /// Intel oneAPI / SYCL.
    OneApi,
    /// Apple Metal (compute through wgpu).
    Metal,
    /// Vulkan (compute through wgpu).
    Vulkan,
    /// Direct3D 12 (compute through wgpu).
    Dx12,
    /// Several devices driven together.
    Multi,
    /// A device that failed to initialize.
    Dummy,
}

impl DeviceType {
    /// Short uppercase name used in device ids and log lines.
    pub fn name(self) -> &'static str {
        match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Cuda => "CUDA",
            DeviceType::Optix => "OPTIX",
            DeviceType::Hip => "HIP",
            DeviceType::HipRt => "HIPRT",
            DeviceType::OneApi => "ONEAPI",
            DeviceType::Metal => "METAL",
            DeviceType::Vulkan => "VULKAN",
            DeviceType::Dx12 => "DX12",
            DeviceType::Multi => "MULTI",
            DeviceType::Dummy => "DUMMY",
        }
    }

    /// The bit of this type in a [`DeviceTypeMask`].
    pub fn mask(self) -> DeviceTypeMask {
        match self {
            DeviceType::Cpu => DeviceTypeMask::CPU,
            DeviceType::Cuda => DeviceTypeMask::CUDA,
            DeviceType::Optix => DeviceTypeMask::OPTIX,
            DeviceType::Hip => DeviceTypeMask::HIP,
            DeviceType::HipRt => DeviceTypeMask::HIPRT,
            DeviceType::OneApi => DeviceTypeMask::ONEAPI,
            DeviceType::Metal => DeviceTypeMask::METAL,
            DeviceType::Vulkan => DeviceTypeMask::VULKAN,
            DeviceType::Dx12 => DeviceTypeMask::DX12,
            DeviceType::Multi | DeviceType::Dummy => DeviceTypeMask::EMPTY,
        }
    }

    /// Backends that share driver contexts and may negotiate peer access.
    ///
    /// OptiX runs on CUDA contexts and HIP-RT on HIP contexts.
    pub fn family(self) -> DeviceType {
        match self {
            DeviceType::Optix => DeviceType::Cuda,
            DeviceType::HipRt => DeviceType::Hip,
            other => other,
        }
    }

    /// `true` for backends that execute on a GPU.
    pub fn is_gpu(self) -> bool {
        !matches!(self, DeviceType::Cpu | DeviceType::Multi | DeviceType::Dummy)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

photon_bitflags! {
    /// Device selection mask supplied by configuration.
    pub struct DeviceTypeMask: u32 {
        /// Host threads.
        const CPU = 1 << 0;
        /// CUDA devices.
        const CUDA = 1 << 1;
        /// OptiX devices.
        const OPTIX = 1 << 2;
        /// HIP devices.
        const HIP = 1 << 3;
        /// HIP-RT devices.
        const HIPRT = 1 << 4;
        /// oneAPI devices.
        const ONEAPI = 1 << 5;
        /// Metal devices.
        const METAL = 1 << 6;
        /// Vulkan devices.
        const VULKAN = 1 << 7;
        /// Direct3D 12 devices.
        const DX12 = 1 << 8;
    }
}

/// Process-unique identity of one constructed device instance.
///
/// Memory descriptors record the resident owner by `DeviceId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

impl DeviceId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Description of a selectable device, as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend kind.
    pub device_type: DeviceType,
    /// Human-readable name, e.g. `"NVIDIA GeForce RTX 4080"`.
    pub description: String,
    /// Stable identifier, e.g. `"CUDA_NVIDIA GeForce RTX 4080_0000:01:00"`.
    pub id: String,
    /// Index among devices of the same backend.
    pub num: usize,
    /// The device also drives a display; interop is possible.
    pub display_device: bool,
    /// Supports peer access to devices of the same family.
    pub has_peer_memory: bool,
    /// Supports half-float images.
    pub has_half_images: bool,
    /// Supports hardware ray tracing.
    pub use_hardware_raytracing: bool,
    /// Acceleration-structure layouts the device can consume.
    pub bvh_layouts: BvhLayoutMask,
    /// Worker threads for CPU devices, 0 for automatic.
    pub cpu_threads: usize,
    /// Device memory capacity, when known.
    pub memory_capacity: Option<u64>,
    /// Sub-devices of a multi device.
    pub multi_devices: Vec<DeviceInfo>,
}

impl DeviceInfo {
    /// Creates an info record with conservative capability defaults.
    pub fn new(device_type: DeviceType, description: impl Into<String>, num: usize) -> Self {
        let description = description.into();
        Self {
            id: format!("{}_{}_{}", device_type.name(), description, num),
            device_type,
            description,
            num,
            display_device: false,
            has_peer_memory: false,
            has_half_images: true,
            use_hardware_raytracing: false,
            bvh_layouts: BvhLayoutMask::BVH2,
            cpu_threads: 0,
            memory_capacity: None,
            multi_devices: Vec::new(),
        }
    }

    /// A stable UUID derived from the textual id.
    pub fn uuid(&self) -> uuid::Uuid {
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, self.id.as_bytes())
    }

    /// Combines several devices into one multi-device description.
    ///
    /// Capabilities are the intersection of the sub-devices' capabilities.
    pub fn multi(subdevices: Vec<DeviceInfo>) -> Self {
        if subdevices.len() == 1 {
            if let Some(only) = subdevices.into_iter().next() {
                return only;
            }
            return Self::new(DeviceType::Dummy, "No devices", 0);
        }
        let description = subdevices
            .iter()
            .map(|d| d.description.as_str())
            .collect::<Vec<_>>()
            .join(" + ");
        let mut info = Self::new(DeviceType::Multi, description, 0);
        info.id = subdevices
            .iter()
            .map(|d| d.id.as_str())
            .collect::<Vec<_>>()
            .join("|");
        info.display_device = subdevices.iter().any(|d| d.display_device);
        info.has_half_images = subdevices.iter().all(|d| d.has_half_images);
        info.has_peer_memory = subdevices.iter().all(|d| d.has_peer_memory);
        info.use_hardware_raytracing = subdevices.iter().all(|d| d.use_hardware_raytracing);
        info.bvh_layouts = subdevices
            .iter()
            .fold(BvhLayoutMask::all(), |acc, d| acc & d.bvh_layouts);
        info.multi_devices = subdevices;
        info
    }

    /// `true` if this description selects more than one device.
    pub fn is_multi(&self) -> bool {
        self.device_type == DeviceType::Multi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_groups_rt_variants() {
        assert_eq!(DeviceType::Optix.family(), DeviceType::Cuda);
        assert_eq!(DeviceType::HipRt.family(), DeviceType::Hip);
        assert_eq!(DeviceType::Metal.family(), DeviceType::Metal);
    }

    #[test]
    fn multi_intersects_capabilities() {
        let mut a = DeviceInfo::new(DeviceType::Cuda, "A", 0);
        a.has_peer_memory = true;
        a.bvh_layouts = BvhLayoutMask::BVH2 | BvhLayoutMask::OPTIX;
        let mut b = DeviceInfo::new(DeviceType::Cuda, "B", 1);
        b.bvh_layouts = BvhLayoutMask::BVH2;
        let multi = DeviceInfo::multi(vec![a, b]);
        assert!(multi.is_multi());
        assert!(!multi.has_peer_memory);
        assert_eq!(multi.bvh_layouts, BvhLayoutMask::BVH2);
        assert_eq!(multi.description, "A + B");
    }

    #[test]
    fn multi_of_one_is_that_device() {
        let a = DeviceInfo::new(DeviceType::Cpu, "Host", 0);
        assert_eq!(DeviceInfo::multi(vec![a.clone()]), a);
    }

    #[test]
    fn device_ids_are_unique() {
        assert_ne!(DeviceId::next(), DeviceId::next());
    }
}
