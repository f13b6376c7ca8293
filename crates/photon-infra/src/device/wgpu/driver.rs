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

//! A [`GpuDriver`] over `wgpu` compute.
//!
//! wgpu has no raw device addresses, so the driver hands out synthetic
//! addresses and keeps one `wgpu::Buffer` per allocation. Interior pointers
//! resolve to a buffer plus offset.
//!
//! Binding convention for WGSL kernels:
//! - group 0, binding 0: the module's constant-parameter block (uniform);
//! - group 0, other bindings: globals at the binding their [`ParamLayout`] field declares;
//! - group 1, binding `i`: the `i`-th pointer argument (storage);
//! - group 1, binding after the pointers: every non-pointer argument packed in order (uniform).

use crate::device::gpu::driver::{DriverError, GpuDriver, LaunchDims, ModuleId, RawPtr};
use photon_core::device::{DeviceType, KernelArg, KernelArgs, ParamLayout};
use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Threads per workgroup every kernel declares.
pub const WORKGROUP_SIZE: u32 = 64;

const ADDRESS_BASE: u64 = 1 << 32;
const MAX_WORKGROUPS_PER_DIM: u32 = 65_535;
const DEFAULT_CAPACITY: u64 = 4 << 30;

#[derive(Debug)]
struct Global {
    ptr: RawPtr,
    size: u64,
    binding: u32,
}

#[derive(Debug)]
struct WgpuModule {
    shader: wgpu::ShaderModule,
    params: ParamLayout,
    param_buffer: wgpu::Buffer,
    globals: HashMap<String, Global>,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
}

#[derive(Debug, Default)]
struct WgpuState {
    buffers: BTreeMap<u64, wgpu::Buffer>,
    next_address: u64,
    used: u64,
    modules: HashMap<u32, WgpuModule>,
    next_module: u32,
}

impl WgpuState {
    fn lookup(&self, ptr: RawPtr) -> Result<(&wgpu::Buffer, u64), DriverError> {
        let (base, buffer) = self
            .buffers
            .range(..=ptr.0)
            .next_back()
            .ok_or_else(|| DriverError::InvalidValue(format!("unknown address {ptr}")))?;
        let offset = ptr.0 - base;
        if offset >= buffer.size() {
            return Err(DriverError::InvalidValue(format!("address {ptr} is past its buffer")));
        }
        Ok((buffer, offset))
    }

    fn module(&mut self, module: ModuleId) -> Result<&mut WgpuModule, DriverError> {
        self.modules
            .get_mut(&module.0)
            .ok_or_else(|| DriverError::InvalidValue(format!("unknown module {}", module.0)))
    }
}

/// A wgpu adapter, its device and queue.
pub struct WgpuDriver {
    backend: DeviceType,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    capacity: u64,
    state: Mutex<WgpuState>,
}

impl fmt::Debug for WgpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDriver")
            .field("backend", &self.backend)
            .field("adapter", &self.adapter_info.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Maps a wgpu backend onto the closed set of device types.
pub fn device_type_for(backend: wgpu::Backend) -> Option<DeviceType> {
    match backend {
        wgpu::Backend::Vulkan => Some(DeviceType::Vulkan),
        wgpu::Backend::Metal => Some(DeviceType::Metal),
        wgpu::Backend::Dx12 => Some(DeviceType::Dx12),
        _ => None,
    }
}

fn align4(size: u64) -> u64 {
    size.max(4).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

impl WgpuDriver {
    /// Opens a logical device on `adapter`.
    ///
    /// `capacity` is the memory budget reported through
    /// [`GpuDriver::mem_get_info`]; wgpu cannot query it.
    pub async fn new(adapter: &wgpu::Adapter, capacity: Option<u64>) -> anyhow::Result<Self> {
        let adapter_info = adapter.get_info();
        let backend = device_type_for(adapter_info.backend)
            .ok_or_else(|| anyhow::anyhow!("{:?} has no compute device type", adapter_info.backend))?;

        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            max_storage_buffers_per_shader_stage: adapter_limits.max_storage_buffers_per_shader_stage,
            ..wgpu::Limits::default()
        };
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Photon Compute Device"),
                required_limits,
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create logical device: {e}"))?;

        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            log::error!("WgpuDriver: uncaptured error: {e:?}");
        }));

        log::info!(
            "WgpuDriver: opened \"{}\" ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Self {
            backend,
            adapter_info,
            device,
            queue,
            capacity: capacity.unwrap_or(DEFAULT_CAPACITY),
            state: Mutex::new(WgpuState {
                next_address: ADDRESS_BASE,
                ..Default::default()
            }),
        })
    }

    /// Adapter description.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn state(&self) -> MutexGuard<'_, WgpuState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait(&self) -> Result<(), DriverError> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| DriverError::Other(format!("poll failed: {e:?}")))
    }

    fn write_padded(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> Result<(), DriverError> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(DriverError::InvalidValue(format!("unaligned write offset {offset}")));
        }
        if data.is_empty() {
            return Ok(());
        }
        let padded = align4(data.len() as u64);
        if offset + padded > buffer.size() {
            return Err(DriverError::InvalidValue("write past the end of a buffer".into()));
        }
        if padded == data.len() as u64 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let mut bytes = data.to_vec();
            bytes.resize(padded as usize, 0);
            self.queue.write_buffer(buffer, offset, &bytes);
        }
        Ok(())
    }

    fn pipeline(&self, module: &mut WgpuModule, entry: &str) -> wgpu::ComputePipeline {
        module
            .pipelines
            .entry(entry.to_string())
            .or_insert_with(|| {
                log::debug!("WgpuDriver: creating pipeline for {entry}");
                self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: None,
                    module: &module.shader,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
            .clone()
    }
}

impl GpuDriver for WgpuDriver {
    fn backend(&self) -> DeviceType {
        self.backend
    }

    fn name(&self) -> String {
        format!("wgpu {:?}", self.adapter_info.backend)
    }

    fn compute_capability(&self) -> (u32, u32) {
        (0, 0)
    }

    fn architecture(&self) -> String {
        format!(
            "{}_{:04x}_{:04x}",
            self.backend.name().to_lowercase(),
            self.adapter_info.vendor,
            self.adapter_info.device
        )
    }

    fn mem_get_info(&self) -> Result<(u64, u64), DriverError> {
        let used = self.state().used;
        Ok((self.capacity.saturating_sub(used), self.capacity))
    }

    fn mem_alloc(&self, size: u64) -> Result<RawPtr, DriverError> {
        let size = align4(size);
        let mut state = self.state();
        if state.used + size > self.capacity {
            return Err(DriverError::OutOfMemory);
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("photon allocation"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let address = state.next_address;
        let alignment = u64::from(self.device.limits().min_storage_buffer_offset_alignment).max(256);
        state.next_address += size.next_multiple_of(alignment);
        state.used += size;
        state.buffers.insert(address, buffer);
        Ok(RawPtr(address))
    }

    fn mem_free(&self, ptr: RawPtr) {
        let mut state = self.state();
        if let Some(buffer) = state.buffers.remove(&ptr.0) {
            state.used = state.used.saturating_sub(buffer.size());
            buffer.destroy();
        }
    }

    fn memcpy_htod(&self, dst: RawPtr, src: &[u8]) -> Result<(), DriverError> {
        let state = self.state();
        let (buffer, offset) = state.lookup(dst)?;
        self.write_padded(buffer, offset, src)
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: RawPtr) -> Result<(), DriverError> {
        if dst.is_empty() {
            return Ok(());
        }
        let size = align4(dst.len() as u64);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("photon readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        {
            let state = self.state();
            let (buffer, offset) = state.lookup(src)?;
            if offset + size > buffer.size() {
                return Err(DriverError::InvalidValue("read past the end of a buffer".into()));
            }
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("photon readback"),
                });
            encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
            self.queue.submit(Some(encoder.finish()));
        }

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait()?;
        receiver
            .recv()
            .map_err(|_| DriverError::DeviceLost)?
            .map_err(|e| DriverError::Other(format!("map_async failed: {e:?}")))?;
        {
            let data = slice.get_mapped_range();
            dst.copy_from_slice(&data[..dst.len()]);
        }
        staging.unmap();
        Ok(())
    }

    fn memcpy_dtod(&self, dst: RawPtr, src: RawPtr, size: u64) -> Result<(), DriverError> {
        let state = self.state();
        let (src_buffer, src_offset) = state.lookup(src)?;
        let (dst_buffer, dst_offset) = state.lookup(dst)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("photon copy"),
            });
        encoder.copy_buffer_to_buffer(src_buffer, src_offset, dst_buffer, dst_offset, align4(size));
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn memset(&self, dst: RawPtr, value: u8, size: u64) -> Result<(), DriverError> {
        let state = self.state();
        let (buffer, offset) = state.lookup(dst)?;
        if value != 0 {
            return self.write_padded(buffer, offset, &vec![value; size as usize]);
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("photon clear"),
            });
        encoder.clear_buffer(buffer, offset, Some(align4(size).min(buffer.size() - offset)));
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn module_load(&self, image: &[u8], params: &ParamLayout) -> Result<ModuleId, DriverError> {
        let source = std::str::from_utf8(image)
            .map_err(|e| DriverError::ModuleLoad(format!("WGSL is not UTF-8: {e}")))?;
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("photon kernels"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
        });
        let param_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("photon params"),
            size: params.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut state = self.state();
        let id = state.next_module;
        state.next_module += 1;
        state.modules.insert(
            id,
            WgpuModule {
                shader,
                params: params.clone(),
                param_buffer,
                globals: HashMap::new(),
                pipelines: HashMap::new(),
            },
        );
        Ok(ModuleId(id))
    }

    fn module_unload(&self, module: ModuleId) {
        if let Some(module) = self.state().modules.remove(&module.0) {
            module.param_buffer.destroy();
        }
    }

    fn const_write(&self, module: ModuleId, offset: usize, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let module = state.module(module)?;
        self.write_padded(&module.param_buffer, offset as u64, data)
    }

    fn bind_global(&self, module: ModuleId, name: &str, ptr: RawPtr, size: u64) -> Result<(), DriverError> {
        let mut state = self.state();
        let module = state.module(module)?;
        let binding = module
            .params
            .get(name)
            .and_then(|field| field.binding)
            .ok_or_else(|| DriverError::InvalidValue(format!("'{name}' has no binding")))?;
        module.globals.insert(name.to_string(), Global { ptr, size, binding });
        Ok(())
    }

    fn occupancy_block_size(&self, _module: ModuleId, _entry: &str) -> Result<u32, DriverError> {
        Ok(WORKGROUP_SIZE)
    }

    fn launch(&self, module: ModuleId, entry: &str, dims: LaunchDims, args: &KernelArgs) -> Result<(), DriverError> {
        let mut state = self.state();
        let pipeline = {
            let module = state.module(module)?;
            self.pipeline(module, entry)
        };
        let state = &*state;
        let loaded = state
            .modules
            .get(&module.0)
            .ok_or_else(|| DriverError::InvalidValue(format!("unknown module {}", module.0)))?;

        let mut params = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: loaded.param_buffer.as_entire_binding(),
        }];
        for global in loaded.globals.values() {
            let (buffer, offset) = state.lookup(global.ptr)?;
            params.push(wgpu::BindGroupEntry {
                binding: global.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset,
                    size: wgpu::BufferSize::new(global.size),
                }),
            });
        }

        let mut scalars = Vec::new();
        let mut entries = Vec::new();
        for arg in args.as_slice() {
            match arg {
                KernelArg::Pointer(ptr) => {
                    let (buffer, offset) = state.lookup(RawPtr(ptr.0))?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: entries.len() as u32,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset,
                            size: None,
                        }),
                    });
                }
                other => scalars.extend_from_slice(&other.to_bytes()),
            }
        }
        let scalar_buffer = (!scalars.is_empty()).then(|| {
            scalars.resize(scalars.len().next_multiple_of(16), 0);
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("photon launch args"),
                size: scalars.len() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.queue.write_buffer(&buffer, 0, &scalars);
            buffer
        });
        if let Some(buffer) = &scalar_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: entries.len() as u32,
                resource: buffer.as_entire_binding(),
            });
        }

        let group0 = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("photon params"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &params,
        });
        let group1 = (!entries.is_empty()).then(|| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("photon args"),
                layout: &pipeline.get_bind_group_layout(1),
                entries: &entries,
            })
        });

        let x = dims.grid.min(MAX_WORKGROUPS_PER_DIM);
        let y = dims.grid.div_ceil(MAX_WORKGROUPS_PER_DIM);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(entry) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &group0, &[]);
            if let Some(group1) = &group1 {
                pass.set_bind_group(1, group1, &[]);
            }
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DriverError> {
        self.wait()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for WgpuDriver {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            log::warn!("WgpuDriver: failed to poll device during shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_driver() -> Option<WgpuDriver> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())).ok()?;
        device_type_for(adapter.get_info().backend)?;
        pollster::block_on(WgpuDriver::new(&adapter, Some(64 << 20))).ok()
    }

    #[test]
    fn backends_map_to_device_types() {
        assert_eq!(device_type_for(wgpu::Backend::Vulkan), Some(DeviceType::Vulkan));
        assert_eq!(device_type_for(wgpu::Backend::Metal), Some(DeviceType::Metal));
        assert_eq!(device_type_for(wgpu::Backend::Dx12), Some(DeviceType::Dx12));
        assert_eq!(device_type_for(wgpu::Backend::Gl), None);
    }

    #[test]
    fn copies_roundtrip_or_skip() {
        // Needs a physical adapter; skipped on machines without one.
        let Some(driver) = create_test_driver() else {
            println!("Skipping wgpu driver test: no compute adapter.");
            return;
        };
        let ptr = driver.mem_alloc(16).unwrap();
        driver.memcpy_htod(ptr, &[1, 2, 3, 4, 5, 6]).unwrap();
        let mut out = [0u8; 6];
        driver.memcpy_dtoh(&mut out, ptr).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);

        driver.memset(ptr, 0, 16).unwrap();
        driver.memcpy_dtoh(&mut out, ptr).unwrap();
        assert_eq!(out, [0; 6]);

        let (free, total) = driver.mem_get_info().unwrap();
        assert_eq!(total, 64 << 20);
        assert_eq!(free, total - 16);
        driver.mem_free(ptr);
        assert_eq!(driver.mem_get_info().unwrap().0, total);
    }

    #[test]
    fn allocations_beyond_capacity_fail_or_skip() {
        let Some(driver) = create_test_driver() else {
            return;
        };
        assert_eq!(driver.mem_alloc(128 << 20), Err(DriverError::OutOfMemory));
    }
}
