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

//! The host-thread device.
//!
//! Kernels are Rust closures registered in [`CpuKernels`] and run on a
//! [`TaskPool`]. Device memory is host memory behind stable handles, and
//! acceleration structures are always software BVH2.

mod kernel;
mod memory;
mod queue;

pub use kernel::{CpuKernelContext, CpuKernelFn, CpuKernels};
pub use memory::{CpuBuffer, CpuMemory};
pub use queue::CpuQueue;

use super::accel::{AccelBackend, AccelManager, BuildOutcome};
use super::epoch::QueueEpochs;
use crate::bvh::{ResolvedInstance, SoftwareAccel};
use crate::thread::TaskPool;
use photon_core::bvh::{
    AccelLevel, AccelState, BuildFlags, BvhBuildRequest, BvhHandle, BvhParams, GeometryProvider,
};
use photon_core::device::{
    BuildError, Device, DeviceConfig, DeviceError, DeviceId, DeviceInfo, DeviceQueue, DeviceStats, DeviceType,
    KernelFeatures, MemoryDescriptor, MemoryType, ParamLayout, ProfileEvent, Profiler, Progress,
};
use photon_core::math::Aabb;
use photon_core::Stopwatch;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};

/// Describes the host CPU as a device.
pub fn cpu_device_info(threads: usize) -> DeviceInfo {
    let mut system = sysinfo::System::new();
    system.refresh_cpu_all();
    let brand = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "CPU".to_string());
    system.refresh_memory();

    let mut info = DeviceInfo::new(DeviceType::Cpu, brand, 0);
    info.cpu_threads = threads;
    info.has_peer_memory = false;
    info.memory_capacity = Some(system.total_memory());
    info
}

/// Everything a [`CpuDevice`] is made from.
#[derive(Debug, Clone)]
pub struct CpuDeviceDesc {
    /// Description of the device.
    pub info: DeviceInfo,
    /// Configuration.
    pub config: DeviceConfig,
    /// Host kernels.
    pub kernels: CpuKernels,
    /// Layout of the constant-parameter block.
    pub params: ParamLayout,
}

#[derive(Debug, Default)]
struct Loaded {
    features: Option<KernelFeatures>,
    params: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct CpuDeviceInternal {
    id: DeviceId,
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    profiler: Arc<dyn Profiler>,
    pool: TaskPool,
    memory: Arc<CpuMemory>,
    kernels: CpuKernels,
    layout: ParamLayout,
    loaded: Mutex<Loaded>,
    error: Mutex<String>,
    accels: AccelManager<SoftwareAccel>,
    epochs: QueueEpochs,
}

impl CpuDeviceInternal {
    fn loaded(&self) -> MutexGuard<'_, Loaded> {
        self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn error_message(&self) -> String {
        self.error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_error(&self, message: &str) {
        log::error!("CpuDevice: {message}");
        let mut error = self.error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *error = message.to_string();
    }

    fn alloc(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        let size = mem.memory_size() as u64;
        let ptr = self.memory.alloc(size).ok_or_else(|| {
            let total = self.memory.budget().unwrap_or(0);
            let err = DeviceError::OutOfMemory {
                requested: size,
                free: total.saturating_sub(self.memory.used()),
                total,
            };
            log::error!("CpuDevice: {err} while allocating '{}'", mem.name);
            err
        })?;
        mem.device_pointer = ptr;
        mem.device_size = size;
        mem.resident = Some(self.id);
        self.stats.mem_alloc(size);
        Ok(())
    }

    fn free(&self, mem: &mut MemoryDescriptor) {
        if mem.device_pointer.is_null() {
            return;
        }
        if let Some(size) = self.memory.free(mem.device_pointer) {
            self.stats.mem_free(size);
        }
        mem.reset_device();
    }

    fn upload(&self, mem: &MemoryDescriptor) -> Result<(), DeviceError> {
        let (buffer, _) = self
            .memory
            .resolve(mem.device_pointer)
            .ok_or(DeviceError::InvalidPointer(mem.device_pointer.0))?;
        let mut bytes = buffer.write();
        let len = bytes.len().min(mem.host().len());
        bytes[..len].copy_from_slice(&mem.host()[..len]);
        Ok(())
    }

    fn backend(&self) -> CpuAccelBackend {
        CpuAccelBackend
    }
}

struct CpuAccelBackend;

impl AccelBackend for CpuAccelBackend {
    type Payload = SoftwareAccel;

    fn build_bottom(
        &self,
        geometry: &dyn GeometryProvider,
        params: &BvhParams,
        _flags: BuildFlags,
        existing: Option<&mut SoftwareAccel>,
    ) -> Result<BuildOutcome<SoftwareAccel>, BuildError> {
        match existing {
            Some(accel) => Ok(BuildOutcome::Refit {
                bounds: accel.refit_bottom(geometry, params)?,
                retired: None,
            }),
            None => {
                let (payload, bounds) = SoftwareAccel::build_bottom(geometry, params)?;
                Ok(BuildOutcome::Built {
                    payload,
                    bounds,
                    references: Vec::new(),
                })
            }
        }
    }

    fn build_top(
        &self,
        resolved: &[ResolvedInstance<'_, SoftwareAccel>],
        params: &BvhParams,
        _flags: BuildFlags,
        existing: Option<&mut SoftwareAccel>,
    ) -> Result<BuildOutcome<SoftwareAccel>, BuildError> {
        match existing {
            Some(accel) => Ok(BuildOutcome::Refit {
                bounds: accel.refit_top(resolved)?,
                retired: None,
            }),
            None => {
                let (payload, bounds, references) = SoftwareAccel::build_top(resolved, params)?;
                Ok(BuildOutcome::Built {
                    payload,
                    bounds,
                    references,
                })
            }
        }
    }

    fn free(&self, payloads: Vec<SoftwareAccel>) {
        log::debug!("CpuDevice: freed {} acceleration structures", payloads.len());
    }
}

/// A device running kernels on host threads.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    internal: Arc<CpuDeviceInternal>,
}

impl CpuDevice {
    /// Creates a device with `desc.config.cpu_threads` workers, one per core when zero.
    pub fn new(desc: CpuDeviceDesc, stats: Arc<DeviceStats>, profiler: Arc<dyn Profiler>) -> Self {
        let CpuDeviceDesc {
            mut info,
            config,
            kernels,
            params,
        } = desc;
        let pool = TaskPool::new(config.cpu_threads);
        info.cpu_threads = pool.num_threads();
        log::info!(
            "CpuDevice: created '{}' with {} threads and {} kernels",
            info.description,
            info.cpu_threads,
            kernels.len()
        );
        Self {
            internal: Arc::new(CpuDeviceInternal {
                id: DeviceId::next(),
                info,
                stats,
                profiler,
                pool,
                memory: Arc::new(CpuMemory::new(config.memory_budget)),
                kernels,
                layout: params,
                loaded: Mutex::new(Loaded::default()),
                error: Mutex::new(String::new()),
                accels: AccelManager::new(),
                epochs: QueueEpochs::new(),
            }),
        }
    }

    /// Device memory, for host-side inspection.
    pub fn memory(&self) -> &Arc<CpuMemory> {
        &self.internal.memory
    }

    /// Calls `f` with a built structure and its bounds.
    pub fn with_accel<R>(
        &self,
        handle: BvhHandle,
        level: AccelLevel,
        f: impl FnOnce(&SoftwareAccel, Aabb) -> R,
    ) -> Option<R> {
        self.internal.accels.with_built(handle, level, f)
    }

    /// Retired structures waiting for the queues.
    pub fn pending_bvh_frees(&self) -> usize {
        self.internal.accels.pending_frees()
    }
}

impl Device for CpuDevice {
    fn id(&self) -> DeviceId {
        self.internal.id
    }

    fn info(&self) -> &DeviceInfo {
        &self.internal.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.internal.stats
    }

    fn error_message(&self) -> String {
        self.internal.error_message()
    }

    fn set_error(&self, message: &str) {
        self.internal.set_error(message);
    }

    fn mem_alloc(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if matches!(mem.mem_type, MemoryType::Texture | MemoryType::Global) {
            return Err(DeviceError::InvalidMemoryType {
                operation: "mem_alloc",
                mem_type: mem.mem_type,
            });
        }
        self.internal.free(mem);
        self.internal.alloc(mem)
    }

    fn mem_copy_to(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        let internal = &self.internal;
        if !mem.is_resident(internal.id) {
            return Ok(());
        }
        match mem.mem_type {
            MemoryType::Global => {
                internal.free(mem);
                internal.alloc(mem)?;
                internal.upload(mem)?;
                internal.memory.set_global(&mem.name, mem.device_pointer);
            }
            MemoryType::Texture => {
                let slot = mem.slot;
                internal.free(mem);
                internal.alloc(mem)?;
                internal.upload(mem)?;
                mem.slot = Some(internal.memory.set_texture(slot, mem.device_pointer));
            }
            _ => {
                if !mem.device_pointer.is_null() && mem.device_size != mem.memory_size() as u64 {
                    internal.free(mem);
                }
                if mem.device_pointer.is_null() {
                    internal.alloc(mem)?;
                }
                internal.upload(mem)?;
            }
        }
        Ok(())
    }

    fn mem_copy_from(
        &self,
        mem: &mut MemoryDescriptor,
        y: usize,
        w: usize,
        h: usize,
        elem: usize,
    ) -> Result<(), DeviceError> {
        let offset = elem * y * w;
        let size = elem * w * h;
        if mem.host().len() < offset + size {
            return Err(DeviceError::Unsupported(format!(
                "host buffer of '{}' holds {} bytes, rows need {}",
                mem.name,
                mem.host().len(),
                offset + size
            )));
        }
        if mem.device_pointer.is_null() {
            mem.host_mut()[offset..offset + size].fill(0);
            return Ok(());
        }
        let (buffer, base) = self
            .internal
            .memory
            .resolve(mem.device_pointer)
            .ok_or(DeviceError::InvalidPointer(mem.device_pointer.0))?;
        let bytes = buffer.read();
        let src = bytes
            .get(base + offset..base + offset + size)
            .ok_or(DeviceError::InvalidPointer(mem.device_pointer.0))?;
        mem.host_mut()[offset..offset + size].copy_from_slice(src);
        Ok(())
    }

    fn mem_zero(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if mem.device_pointer.is_null() {
            self.mem_alloc(mem)?;
        }
        let (buffer, _) = self
            .internal
            .memory
            .resolve(mem.device_pointer)
            .ok_or(DeviceError::InvalidPointer(mem.device_pointer.0))?;
        buffer.write().fill(0);
        Ok(())
    }

    fn mem_free(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if mem.is_resident(self.internal.id) {
            self.internal.free(mem);
        }
        Ok(())
    }

    fn const_copy_to(&self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        let internal = &self.internal;
        let mut loaded = internal.loaded();
        if loaded.features.is_none() {
            return Err(DeviceError::KernelsNotLoaded);
        }
        let field = internal
            .layout
            .get(name)
            .ok_or_else(|| DeviceError::UnknownParam(name.to_string()))?;
        if field.size != data.len() {
            log::error!(
                "CpuDevice: parameter '{name}' is {} bytes, got {}",
                field.size,
                data.len()
            );
            return Err(DeviceError::ParamSizeMismatch {
                name: name.to_string(),
                expected: field.size,
                actual: data.len(),
            });
        }
        loaded.params[field.offset..field.offset + field.size].copy_from_slice(data);
        Ok(())
    }

    fn load_kernels(&self, features: KernelFeatures) -> Result<(), DeviceError> {
        let internal = &self.internal;
        let mut loaded = internal.loaded();
        if loaded.features.is_some() {
            return Ok(());
        }
        if internal.kernels.is_empty() {
            let message = "No CPU kernels registered".to_string();
            internal.set_error(&message);
            return Err(DeviceError::Setup(message));
        }
        loaded.features = Some(features);
        loaded.params = vec![0; internal.layout.size()];
        log::info!(
            "CpuDevice: {} kernels ready for features {features:?}",
            internal.kernels.len()
        );
        Ok(())
    }

    fn build_bvh(
        &self,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
    ) -> Result<BvhHandle, DeviceError> {
        let internal = &self.internal;
        let timer = Stopwatch::new();
        let result = internal
            .accels
            .build(&internal.backend(), request, progress, refit, &internal.epochs);
        internal.profiler.record(ProfileEvent::BvhBuild {
            device: internal.id,
            refit,
            elapsed: timer.elapsed().unwrap_or_default(),
        });
        Ok(result?)
    }

    fn release_bvh(&self, handle: BvhHandle) -> Result<(), DeviceError> {
        let internal = &self.internal;
        Ok(internal.accels.release(&internal.backend(), handle, &internal.epochs)?)
    }

    fn bvh_state(&self, handle: BvhHandle) -> Option<AccelState> {
        self.internal.accels.state(handle)
    }

    fn flush_deferred_frees(&self) -> usize {
        let internal = &self.internal;
        internal.accels.reclaim(&internal.backend(), &internal.epochs)
    }

    fn queue_create(&self) -> Result<Box<dyn DeviceQueue>, DeviceError> {
        Ok(Box::new(CpuQueue::new(self.clone())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for CpuDeviceInternal {
    fn drop(&mut self) {
        self.accels.free_all(&self.backend());
        let (count, bytes) = self.memory.clear();
        if count > 0 {
            log::debug!("CpuDevice: released {count} allocations at shutdown");
            self.stats.mem_free(bytes);
        }
    }
}
