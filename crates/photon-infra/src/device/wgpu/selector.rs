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

//! Compute adapter discovery through wgpu.

use super::driver::device_type_for;
use async_trait::async_trait;
use photon_core::device::{ComputeAdapterSelector, DeviceInfo, DeviceType, DeviceTypeMask};
use wgpu::{Adapter, Instance, PowerPreference, RequestAdapterOptions};

/// Returns a human-readable name for a backend.
pub fn backend_name(backend: wgpu::Backend) -> &'static str {
    match backend {
        wgpu::Backend::Vulkan => "Vulkan",
        wgpu::Backend::Metal => "Metal",
        wgpu::Backend::Dx12 => "DirectX 12",
        wgpu::Backend::Gl => "OpenGL",
        wgpu::Backend::BrowserWebGpu => "WebGPU",
        wgpu::Backend::Noop => "No-op",
    }
}

/// wgpu implementation of [`ComputeAdapterSelector`].
///
/// wgpu only hands out adapters by preference, so listing asks once per power
/// preference and drops duplicates.
pub struct WgpuAdapterSelector {
    instance: Instance,
}

impl std::fmt::Debug for WgpuAdapterSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuAdapterSelector").finish_non_exhaustive()
    }
}

impl WgpuAdapterSelector {
    /// Create a selector over a shared instance.
    pub fn new(instance: Instance) -> Self {
        Self { instance }
    }

    /// A selector over a default instance.
    pub fn with_default_instance() -> Self {
        Self::new(Instance::new(wgpu::InstanceDescriptor::new_without_display_handle()))
    }

    /// The instance adapters are requested from.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Describes `adapter` as the `num`-th device of its type.
    pub fn adapter_to_info(adapter: &Adapter, num: usize) -> Option<DeviceInfo> {
        let info = adapter.get_info();
        let device_type = device_type_for(info.backend)?;
        let mut device = DeviceInfo::new(device_type, info.name.clone(), num);
        device.display_device = matches!(
            info.device_type,
            wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu
        );
        device.has_peer_memory = false;
        device.has_half_images = adapter.features().contains(wgpu::Features::SHADER_F16);
        Some(device)
    }

    /// Every distinct adapter whose backend is in `mask`.
    pub async fn adapters(&self, mask: DeviceTypeMask) -> Vec<Adapter> {
        let mut found: Vec<Adapter> = Vec::new();
        for power_preference in [PowerPreference::HighPerformance, PowerPreference::LowPower] {
            let adapter = match self
                .instance
                .request_adapter(&RequestAdapterOptions {
                    power_preference,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
            {
                Ok(adapter) => adapter,
                Err(e) => {
                    log::debug!("WgpuAdapterSelector: no adapter for {power_preference:?}: {e}");
                    continue;
                }
            };
            let info = adapter.get_info();
            let Some(device_type) = device_type_for(info.backend) else {
                log::debug!(
                    "WgpuAdapterSelector: skipping \"{}\" on {}",
                    info.name,
                    backend_name(info.backend)
                );
                continue;
            };
            if !mask.contains(device_type.mask()) {
                continue;
            }
            let duplicate = found.iter().any(|other| {
                let other = other.get_info();
                other.name == info.name && other.backend == info.backend && other.device == info.device
            });
            if !duplicate {
                log::info!(
                    "WgpuAdapterSelector: found \"{}\" ({})",
                    info.name,
                    backend_name(info.backend)
                );
                found.push(adapter);
            }
        }
        found
    }
}

#[async_trait]
impl ComputeAdapterSelector for WgpuAdapterSelector {
    type Error = String;

    async fn list_adapters(&self, mask: DeviceTypeMask) -> Result<Vec<DeviceInfo>, Self::Error> {
        if !self.is_backend_supported(mask) {
            return Ok(Vec::new());
        }
        let mut counts: Vec<(DeviceType, usize)> = Vec::new();
        let mut infos = Vec::new();
        for adapter in self.adapters(mask).await {
            let Some(device_type) = device_type_for(adapter.get_info().backend) else {
                continue;
            };
            let num = match counts.iter_mut().find(|(t, _)| *t == device_type) {
                Some((_, count)) => {
                    *count += 1;
                    *count - 1
                }
                None => {
                    counts.push((device_type, 1));
                    0
                }
            };
            infos.extend(Self::adapter_to_info(&adapter, num));
        }
        Ok(infos)
    }

    fn is_backend_supported(&self, mask: DeviceTypeMask) -> bool {
        let mut supported = DeviceTypeMask::EMPTY;
        #[cfg(any(target_os = "windows", target_os = "linux"))]
        {
            supported |= DeviceTypeMask::VULKAN;
        }
        #[cfg(target_os = "windows")]
        {
            supported |= DeviceTypeMask::DX12;
        }
        #[cfg(target_os = "macos")]
        {
            supported |= DeviceTypeMask::METAL;
        }
        mask.intersects(supported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        assert_eq!(backend_name(wgpu::Backend::Vulkan), "Vulkan");
        assert_eq!(backend_name(wgpu::Backend::Metal), "Metal");
        assert_eq!(backend_name(wgpu::Backend::Dx12), "DirectX 12");
        assert_eq!(backend_name(wgpu::Backend::Gl), "OpenGL");
    }

    #[test]
    fn masks_without_wgpu_backends_list_nothing() {
        let selector = WgpuAdapterSelector::with_default_instance();
        assert!(!selector.is_backend_supported(DeviceTypeMask::CUDA | DeviceTypeMask::CPU));
        let listed = pollster::block_on(selector.list_adapters(DeviceTypeMask::CUDA)).unwrap();
        assert!(listed.is_empty());
    }
}
