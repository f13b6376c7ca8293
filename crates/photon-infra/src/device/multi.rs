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

//! Several devices acting as one.
//!
//! Sub-devices that can reach each other's memory form a peer island. Each
//! buffer has one resident owner per island, and the multi device hands out
//! its own pointers that translate to the owner's pointer on every
//! sub-device. Render results are read back by splitting rows across
//! sub-devices, and acceleration structures are built on every sub-device
//! behind one multi handle.

use photon_core::bvh::{AccelState, BvhBuildRequest, BvhHandle, BvhInput, ObjectInstance};
use photon_core::device::error::format_bytes;
use photon_core::device::{
    BuildError, Device, DeviceError, DeviceId, DeviceInfo, DeviceKernel, DevicePtr, DeviceQueue, DeviceStats,
    KernelArgs, KernelFeatures, MemoryDescriptor, MemoryType, Progress, QueueState,
};
use photon_core::interop::GraphicsApi;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Multi pointers carry the buffer key above this bit and a byte offset below it:
/// buffers up to 1 TiB, 16M live keys.
const KEY_SHIFT: u32 = 40;
const OFFSET_MASK: u64 = (1 << KEY_SHIFT) - 1;
const MAX_KEY: u64 = 1 << (64 - KEY_SHIFT);

#[derive(Debug, Clone, Copy)]
struct SubAlloc {
    ptr: DevicePtr,
    size: u64,
}

#[derive(Debug)]
struct SubDevice {
    device: Arc<dyn Device>,
    island: usize,
    allocs: Mutex<HashMap<u64, SubAlloc>>,
}

impl SubDevice {
    fn allocs(&self) -> MutexGuard<'_, HashMap<u64, SubAlloc>> {
        self.allocs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, key: u64) -> Option<SubAlloc> {
        self.allocs().get(&key).copied()
    }

    fn owned_bytes(&self) -> u64 {
        self.allocs().values().map(|a| a.size).sum()
    }
}

#[derive(Debug, Default)]
struct BvhMap {
    handles: HashMap<BvhHandle, Vec<BvhHandle>>,
    next: u32,
}

#[derive(Debug)]
struct MultiInternal {
    id: DeviceId,
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    subs: Vec<SubDevice>,
    islands: Vec<Vec<usize>>,
    next_key: AtomicU64,
    bvhs: Mutex<BvhMap>,
    error: Mutex<String>,
}

/// Groups `devices` into islands whose members all have peer access to each other.
fn peer_islands(devices: &[Arc<dyn Device>]) -> Vec<Vec<usize>> {
    let mut islands: Vec<Vec<usize>> = Vec::new();
    for (index, device) in devices.iter().enumerate() {
        let joined = islands
            .iter_mut()
            .find(|island| island.iter().all(|&peer| devices[peer].check_peer_access(device.as_ref())));
        match joined {
            Some(island) => island.push(index),
            None => islands.push(vec![index]),
        }
    }
    islands
}

impl MultiInternal {
    fn bvhs(&self) -> MutexGuard<'_, BvhMap> {
        self.bvhs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_of(&self, mem: &MemoryDescriptor) -> Result<u64, DeviceError> {
        let size = mem.memory_size() as u64;
        if size > OFFSET_MASK {
            return Err(DeviceError::Setup(format!(
                "'{}' needs {}, more than a multi-device buffer can address ({})",
                mem.name,
                format_bytes(size),
                format_bytes(OFFSET_MASK)
            )));
        }
        if !mem.device_pointer.is_null() {
            return Ok(mem.device_pointer.0 & !OFFSET_MASK);
        }
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        if key >= MAX_KEY {
            return Err(DeviceError::Setup("multi-device buffer keys exhausted".to_string()));
        }
        Ok(key << KEY_SHIFT)
    }

    /// The sub-device of `island` holding `key`, or the least loaded one.
    fn owner(&self, island: &[usize], key: u64) -> Option<usize> {
        island
            .iter()
            .copied()
            .find(|&i| self.subs[i].get(key).is_some())
            .or_else(|| island.iter().copied().min_by_key(|&i| self.subs[i].owned_bytes()))
    }

    /// The sub-device whose copy of `key` the sub-device `sub` reads.
    fn matching(&self, sub: usize, key: u64) -> Option<usize> {
        if self.subs[sub].get(key).is_some() {
            return Some(sub);
        }
        let island = self.islands.get(self.subs[sub].island)?;
        island.iter().copied().find(|&i| self.subs[i].get(key).is_some())
    }

    /// Runs `op` against sub-device `index` with its view of the descriptor.
    fn on_sub(
        &self,
        index: usize,
        key: u64,
        mem: &mut MemoryDescriptor,
        op: impl FnOnce(&dyn Device, &mut MemoryDescriptor) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        let sub = &self.subs[index];
        let previous = sub.get(key);
        mem.device_pointer = previous.map_or(DevicePtr::NULL, |a| a.ptr);
        mem.device_size = previous.map_or(0, |a| a.size);
        mem.resident = previous.map(|_| sub.device.id());

        let result = op(sub.device.as_ref(), mem);

        let mut allocs = sub.allocs();
        if mem.device_pointer.is_null() {
            allocs.remove(&key);
        } else {
            allocs.insert(
                key,
                SubAlloc {
                    ptr: mem.device_pointer,
                    size: mem.device_size,
                },
            );
        }
        mem.device_pointer = DevicePtr(key);
        mem.resident = Some(self.id);
        result
    }

    /// Translates a multi pointer to the pointer sub-device `sub` dereferences.
    fn translate(&self, sub: usize, ptr: DevicePtr) -> Result<DevicePtr, DeviceError> {
        if ptr.is_null() {
            return Ok(ptr);
        }
        let key = ptr.0 & !OFFSET_MASK;
        self.matching(sub, key)
            .and_then(|owner| self.subs[owner].get(key))
            .map(|alloc| alloc.ptr.offset(ptr.0 & OFFSET_MASK))
            .ok_or(DeviceError::InvalidPointer(ptr.0))
    }

    fn sub_handles(&self, handle: BvhHandle) -> Result<Vec<BvhHandle>, BuildError> {
        self.bvhs().handles.get(&handle).cloned().ok_or(BuildError::InvalidHandle)
    }

    fn translate_instances(&self, instances: &[ObjectInstance], sub: usize) -> Result<Vec<ObjectInstance>, BuildError> {
        let bvhs = self.bvhs();
        instances
            .iter()
            .map(|instance| {
                let bottom = bvhs
                    .handles
                    .get(&instance.bottom)
                    .and_then(|handles| handles.get(sub))
                    .copied()
                    .ok_or(BuildError::InvalidHandle)?;
                Ok(ObjectInstance {
                    bottom,
                    ..instance.clone()
                })
            })
            .collect()
    }
}

/// Several devices presented as one [`Device`].
#[derive(Debug, Clone)]
pub struct MultiDevice {
    internal: Arc<MultiInternal>,
}

impl MultiDevice {
    /// Combines `devices`, negotiating peer access between them.
    pub fn new(devices: Vec<Arc<dyn Device>>, stats: Arc<DeviceStats>) -> Self {
        let islands = peer_islands(&devices);
        let info = DeviceInfo::multi(devices.iter().map(|d| d.info().clone()).collect());
        log::info!(
            "MultiDevice: {} devices in {} peer islands",
            devices.len(),
            islands.len()
        );
        let mut subs: Vec<SubDevice> = devices
            .into_iter()
            .map(|device| SubDevice {
                device,
                island: 0,
                allocs: Mutex::new(HashMap::new()),
            })
            .collect();
        for (island_index, island) in islands.iter().enumerate() {
            for &member in island {
                subs[member].island = island_index;
            }
        }
        Self {
            internal: Arc::new(MultiInternal {
                id: DeviceId::next(),
                info,
                stats,
                subs,
                islands,
                next_key: AtomicU64::new(1),
                bvhs: Mutex::new(BvhMap::default()),
                error: Mutex::new(String::new()),
            }),
        }
    }

    /// The sub-devices, in creation order.
    pub fn sub_devices(&self) -> impl Iterator<Item = &Arc<dyn Device>> {
        self.internal.subs.iter().map(|sub| &sub.device)
    }

    /// Peer islands as indices into [`MultiDevice::sub_devices`].
    pub fn islands(&self) -> &[Vec<usize>] {
        &self.internal.islands
    }

    /// The structure behind `handle` on sub-device `sub`.
    pub fn sub_bvh(&self, handle: BvhHandle, sub: usize) -> Option<BvhHandle> {
        self.internal.sub_handles(handle).ok()?.get(sub).copied()
    }

    /// A queue on sub-device `sub` that accepts this device's pointers.
    pub fn queue_for(&self, sub: usize) -> Result<Box<dyn DeviceQueue>, DeviceError> {
        let device = self
            .internal
            .subs
            .get(sub)
            .ok_or_else(|| DeviceError::Unsupported(format!("no sub-device {sub}")))?;
        let queue = device.device.queue_create()?;
        Ok(Box::new(MultiSubQueue {
            multi: self.internal.clone(),
            sub,
            queue,
        }))
    }

    fn for_each_owner(
        &self,
        mem: &mut MemoryDescriptor,
        mut op: impl FnMut(&dyn Device, &mut MemoryDescriptor) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        let internal = &self.internal;
        let key = internal.key_of(mem)?;
        let broadcast = matches!(mem.mem_type, MemoryType::Global | MemoryType::Texture);
        for island in &internal.islands {
            if broadcast {
                for &member in island {
                    internal.on_sub(member, key, mem, &mut op)?;
                }
            } else if let Some(owner) = internal.owner(island, key) {
                internal.on_sub(owner, key, mem, &mut op)?;
            }
        }
        Ok(())
    }
}

impl Device for MultiDevice {
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
        let own = self
            .internal
            .error
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        if !own.is_empty() {
            return own;
        }
        self.internal
            .subs
            .iter()
            .map(|sub| sub.device.error_message())
            .find(|message| !message.is_empty())
            .unwrap_or_default()
    }

    fn set_error(&self, message: &str) {
        log::error!("MultiDevice: {message}");
        let mut error = self.internal.error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *error = message.to_string();
    }

    fn mem_alloc(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if matches!(mem.mem_type, MemoryType::Texture | MemoryType::Global) {
            return Err(DeviceError::InvalidMemoryType {
                operation: "mem_alloc",
                mem_type: mem.mem_type,
            });
        }
        self.for_each_owner(mem, |device, m| device.mem_alloc(m))
    }

    fn mem_copy_to(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if !mem.is_resident(self.internal.id) {
            return Ok(());
        }
        self.for_each_owner(mem, |device, m| device.mem_copy_to(m))
    }

    fn mem_copy_from(
        &self,
        mem: &mut MemoryDescriptor,
        y: usize,
        w: usize,
        h: usize,
        elem: usize,
    ) -> Result<(), DeviceError> {
        let internal = &self.internal;
        if mem.device_pointer.is_null() {
            let (offset, size) = (elem * y * w, elem * w * h);
            if let Some(rows) = mem.host_mut().get_mut(offset..offset + size) {
                rows.fill(0);
            }
            return Ok(());
        }
        let key = internal.key_of(mem)?;
        let count = internal.subs.len();
        let sub_h = h / count.max(1);
        for i in 0..count {
            let sy = y + i * sub_h;
            let sh = if i + 1 == count { h - sub_h * i } else { sub_h };
            if sh == 0 {
                continue;
            }
            let Some(owner) = internal.matching(i, key) else {
                continue;
            };
            internal.on_sub(owner, key, mem, |device, m| device.mem_copy_from(m, sy, w, sh, elem))?;
        }
        Ok(())
    }

    fn mem_zero(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if !mem.is_resident(self.internal.id) {
            return Ok(());
        }
        self.for_each_owner(mem, |device, m| device.mem_zero(m))
    }

    fn mem_free(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        let internal = &self.internal;
        if mem.device_pointer.is_null() || !mem.is_resident(internal.id) {
            return Ok(());
        }
        let key = internal.key_of(mem)?;
        let mut result = Ok(());
        for index in 0..internal.subs.len() {
            if internal.subs[index].get(key).is_some() {
                let freed = internal.on_sub(index, key, mem, |device, m| device.mem_free(m));
                if result.is_ok() {
                    result = freed;
                }
            }
        }
        mem.reset_device();
        result
    }

    fn const_copy_to(&self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        for sub in &self.internal.subs {
            sub.device.const_copy_to(name, data)?;
        }
        Ok(())
    }

    fn load_kernels(&self, features: KernelFeatures) -> Result<(), DeviceError> {
        let results: Vec<Result<(), DeviceError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .internal
                .subs
                .iter()
                .map(|sub| scope.spawn(move || sub.device.load_kernels(features)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(DeviceError::Setup("kernel loading thread panicked".to_string())))
                })
                .collect()
        });
        match results.into_iter().find(Result::is_err) {
            Some(Err(err)) => {
                self.set_error(&err.to_string());
                Err(err)
            }
            _ => Ok(()),
        }
    }

    fn build_bvh(
        &self,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
    ) -> Result<BvhHandle, DeviceError> {
        let internal = &self.internal;
        let existing = request.existing.map(|h| internal.sub_handles(h)).transpose()?;
        let mut built = Vec::with_capacity(internal.subs.len());

        for (index, sub) in internal.subs.iter().enumerate() {
            let translated;
            let input = match request.input {
                BvhInput::Bottom(geometry) => BvhInput::Bottom(geometry),
                BvhInput::Top(instances) => {
                    translated = internal.translate_instances(instances, index)?;
                    BvhInput::Top(&translated)
                }
            };
            let sub_request = BvhBuildRequest {
                params: request.params.clone(),
                input,
                existing: existing.as_ref().and_then(|handles| handles.get(index).copied()),
            };
            match sub.device.build_bvh(sub_request, progress, refit) {
                Ok(handle) => built.push(handle),
                Err(err) => {
                    if existing.is_none() {
                        for (sub, handle) in internal.subs.iter().zip(built) {
                            if let Err(release) = sub.device.release_bvh(handle) {
                                log::warn!("MultiDevice: failed to release partial build: {release}");
                            }
                        }
                    }
                    return Err(err);
                }
            }
        }

        let mut bvhs = internal.bvhs();
        let handle = match request.existing {
            Some(handle) => handle,
            None => {
                let handle = BvhHandle {
                    index: bvhs.next,
                    generation: 0,
                };
                bvhs.next += 1;
                handle
            }
        };
        bvhs.handles.insert(handle, built);
        Ok(handle)
    }

    fn release_bvh(&self, handle: BvhHandle) -> Result<(), DeviceError> {
        let internal = &self.internal;
        let handles = internal
            .bvhs()
            .handles
            .remove(&handle)
            .ok_or(BuildError::InvalidHandle)?;
        for (sub, handle) in internal.subs.iter().zip(handles) {
            sub.device.release_bvh(handle)?;
        }
        Ok(())
    }

    fn bvh_state(&self, handle: BvhHandle) -> Option<AccelState> {
        let internal = &self.internal;
        let first = *internal.bvhs().handles.get(&handle)?.first()?;
        internal.subs.first()?.device.bvh_state(first)
    }

    fn flush_deferred_frees(&self) -> usize {
        self.internal.subs.iter().map(|sub| sub.device.flush_deferred_frees()).sum()
    }

    fn queue_create(&self) -> Result<Box<dyn DeviceQueue>, DeviceError> {
        Err(DeviceError::Unsupported(
            "queues of a multi device are created per sub-device".to_string(),
        ))
    }

    fn should_use_graphics_interop(&self, api: GraphicsApi) -> bool {
        self.internal
            .subs
            .iter()
            .find(|sub| sub.device.info().display_device)
            .is_some_and(|sub| sub.device.should_use_graphics_interop(api))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A sub-device queue that translates multi pointers on the way in.
struct MultiSubQueue {
    multi: Arc<MultiInternal>,
    sub: usize,
    queue: Box<dyn DeviceQueue>,
}

impl MultiSubQueue {
    fn on_owner(
        &self,
        mem: &mut MemoryDescriptor,
        op: impl FnOnce(&dyn Device, &mut MemoryDescriptor) -> Result<(), DeviceError>,
    ) -> Result<(), DeviceError> {
        let key = self.multi.key_of(mem)?;
        let owner = self.multi.matching(self.sub, key).unwrap_or(self.sub);
        self.multi.on_sub(owner, key, mem, op)
    }
}

impl DeviceQueue for MultiSubQueue {
    fn device_id(&self) -> DeviceId {
        self.queue.device_id()
    }

    fn init_execution(&mut self) -> Result<(), DeviceError> {
        self.queue.init_execution()
    }

    fn enqueue(&mut self, kernel: DeviceKernel, work_size: usize, args: &KernelArgs) -> Result<(), DeviceError> {
        let args = args.map_pointers(|ptr| self.multi.translate(self.sub, ptr))?;
        self.queue.enqueue(kernel, work_size, &args)
    }

    fn synchronize(&mut self) -> Result<(), DeviceError> {
        self.queue.synchronize()
    }

    fn zero_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.on_owner(mem, |device, m| device.mem_zero(m))
    }

    fn copy_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.on_owner(mem, |device, m| device.mem_copy_to(m))
    }

    fn copy_from_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        let (width, elem) = (mem.data_size(), mem.element_size());
        self.on_owner(mem, |device, m| device.mem_copy_from(m, 0, width, 1, elem))
    }

    fn state(&self) -> QueueState {
        self.queue.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cpu::{CpuDevice, CpuDeviceDesc, CpuKernels};
    use photon_core::bvh::{BuildPolicy, BvhParams, OwnedGeometry};
    use photon_core::device::{DataType, DeviceConfig, DeviceType, NullProfiler, ParamLayout, SharedProgress};
    use photon_core::math::{Mat4, Vec3};

    fn cpu(stats: &Arc<DeviceStats>, num: usize) -> Arc<dyn Device> {
        let kernels = CpuKernels::new().with(DeviceKernel::FilmConvert, |ctx, range| {
            let buffer = ctx.ptr_arg(0)?;
            let value = ctx.float_arg(1)?;
            ctx.write(buffer, range.start, &vec![value; range.len()])
        });
        let desc = CpuDeviceDesc {
            info: DeviceInfo::new(DeviceType::Cpu, "cpu", num),
            config: DeviceConfig {
                cpu_threads: 1,
                ..DeviceConfig::default()
            },
            kernels,
            params: ParamLayout::new().field("seed", 4),
        };
        Arc::new(CpuDevice::new(desc, stats.clone(), Arc::new(NullProfiler)))
    }

    fn multi() -> MultiDevice {
        let stats = Arc::new(DeviceStats::new());
        MultiDevice::new(vec![cpu(&stats, 0), cpu(&stats, 1)], stats)
    }

    #[test]
    fn cpu_devices_form_separate_islands() {
        let device = multi();
        assert_eq!(device.islands(), &[vec![0], vec![1]]);
        assert_eq!(device.info().device_type, DeviceType::Multi);
    }

    #[test]
    fn every_island_gets_a_copy_and_frees_it() {
        let device = multi();
        let mut mem = MemoryDescriptor::new("film", MemoryType::ReadWrite, DataType::Float, 1);
        mem.alloc_host(4, 2, 1);
        device.mem_alloc(&mut mem).unwrap();
        assert_eq!(device.stats().mem_used(), 64);
        assert_eq!(mem.resident, Some(device.id()));

        device.mem_free(&mut mem).unwrap();
        assert_eq!(device.stats().mem_used(), 0);
        assert!(mem.device_pointer.is_null());
    }

    #[test]
    fn offsets_past_four_gib_keep_their_high_bits() {
        let device = multi();
        let mut mem = MemoryDescriptor::new("film", MemoryType::ReadWrite, DataType::Float, 1);
        mem.alloc_host(4, 1, 1);
        device.mem_alloc(&mut mem).unwrap();
        let base = device.internal.translate(0, mem.device_pointer).unwrap();
        let far = 5u64 << 30;
        let translated = device.internal.translate(0, mem.device_pointer.offset(far)).unwrap();
        assert_eq!(translated, base.offset(far));
        device.mem_free(&mut mem).unwrap();

        let mut huge = MemoryDescriptor::new("huge", MemoryType::ReadWrite, DataType::Float, 1);
        huge.data_width = 1 << 38;
        assert!(matches!(device.mem_alloc(&mut huge), Err(DeviceError::Setup(_))));
        assert!(huge.device_pointer.is_null());
        assert_eq!(device.stats().mem_used(), 0);
    }

    #[test]
    fn readback_splits_rows_across_devices() {
        let device = multi();
        device.load_kernels(KernelFeatures::all()).unwrap();
        let mut mem = MemoryDescriptor::new("film", MemoryType::ReadWrite, DataType::Float, 1);
        mem.alloc_host(4, 2, 1);
        device.mem_alloc(&mut mem).unwrap();

        for (sub, value) in [(0, 1.0f32), (1, 2.0)] {
            let mut queue = device.queue_for(sub).unwrap();
            let args = KernelArgs::new().ptr(mem.device_pointer).float(value);
            queue.enqueue(DeviceKernel::FilmConvert, 8, &args).unwrap();
            queue.synchronize().unwrap();
        }
        device.mem_copy_from(&mut mem, 0, 4, 2, 4).unwrap();
        let values: Vec<f32> = mem.host_to_vec();
        assert_eq!(&values[..4], &[1.0; 4]);
        assert_eq!(&values[4..], &[2.0; 4]);
        device.mem_free(&mut mem).unwrap();
    }

    #[test]
    fn const_copy_reaches_every_device() {
        let device = multi();
        device.load_kernels(KernelFeatures::all()).unwrap();
        device.const_copy_to("seed", &7u32.to_ne_bytes()).unwrap();
        assert!(matches!(
            device.const_copy_to("seed", &[0; 2]),
            Err(DeviceError::ParamSizeMismatch { .. })
        ));
    }

    #[test]
    fn bvh_handles_map_to_every_device() {
        let device = multi();
        let progress = SharedProgress::new();
        let geometry = OwnedGeometry::mesh(1, vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![[0, 1, 2]]);
        let bottom = device
            .build_bvh(
                BvhBuildRequest::bottom(BvhParams::new("mesh", BuildPolicy::Static), &geometry),
                &progress,
                false,
            )
            .unwrap();
        assert!(device.sub_bvh(bottom, 0).is_some());
        assert!(device.sub_bvh(bottom, 1).is_some());

        let instances = vec![ObjectInstance::new(0, bottom, Mat4::IDENTITY)];
        let top = device
            .build_bvh(
                BvhBuildRequest::top(BvhParams::new("scene", BuildPolicy::Static), &instances),
                &progress,
                false,
            )
            .unwrap();
        assert_eq!(device.bvh_state(top), Some(AccelState::Built));

        device.release_bvh(top).unwrap();
        assert_eq!(device.bvh_state(top), None);
        assert!(device.release_bvh(top).is_err());
        device.release_bvh(bottom).unwrap();
    }

    #[test]
    fn queue_create_is_per_sub_device() {
        let device = multi();
        assert!(device.queue_create().is_err());
        assert!(device.queue_for(1).is_ok());
        assert!(device.queue_for(2).is_err());
    }
}
