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

//! Device memory of [`GpuDevice`](super::GpuDevice).
//!
//! Descriptors receive virtual pointers from a [`MemoryMap`]; the map resolves
//! them to whatever backs the allocation right now. An allocation can move
//! from device to mapped host memory without the descriptor noticing.

use super::driver::{AddressMode, DriverError, FilterMode, RawPtr, TextureDesc, TextureHandle};
use super::{GpuDeviceInternal, GpuState};
use bytemuck::{Pod, Zeroable};
use photon_core::device::error::format_bytes;
use photon_core::device::memory::{ExtensionType, InterpolationType};
use photon_core::device::{DataType, DevicePtr, DeviceError, MemoryDescriptor, MemoryType};
use std::collections::BTreeMap;

const HANDLE_BASE: u64 = 1 << 40;
const HANDLE_ALIGN: u64 = 256;
/// Slots added past the highest requested slot when the texture table grows.
pub const TEXTURE_INFO_GROWTH: usize = 128;

/// Where an allocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Device memory.
    Device,
    /// Pinned host memory mapped into the device address space.
    MappedHost,
}

/// One live allocation.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Backing pointer.
    pub raw: RawPtr,
    /// Bytes.
    pub size: u64,
    /// Backing kind.
    pub placement: Placement,
    /// Descriptor type.
    pub mem_type: MemoryType,
    /// Descriptor name, used for globals and logging.
    pub name: String,
    /// Texture object and its description.
    pub texture: Option<(TextureHandle, TextureDesc)>,
    /// Texture-info slot.
    pub slot: Option<usize>,
}

/// Per-texture record kernels index by slot. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TextureInfo {
    /// Texture object, or the raw pointer for bindless access.
    pub data: u64,
    /// [`DataType`] code.
    pub data_type: u32,
    /// [`InterpolationType`] code.
    pub interpolation: u32,
    /// [`ExtensionType`] code.
    pub extension: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u32,
}

fn data_type_code(data_type: DataType) -> u32 {
    match data_type {
        DataType::UChar => 0,
        DataType::UInt16 => 1,
        DataType::UInt => 2,
        DataType::Int => 3,
        DataType::Float => 4,
        DataType::Half => 5,
        DataType::UInt64 => 6,
    }
}

fn interpolation_code(interpolation: InterpolationType) -> u32 {
    match interpolation {
        InterpolationType::Linear => 0,
        InterpolationType::Closest => 1,
        InterpolationType::Cubic => 2,
        InterpolationType::Smart => 3,
    }
}

fn extension_code(extension: ExtensionType) -> u32 {
    match extension {
        ExtensionType::Repeat => 0,
        ExtensionType::Extend => 1,
        ExtensionType::Clip => 2,
        ExtensionType::Mirror => 3,
    }
}

/// Virtual pointers, usage counters and the texture-info table of one device.
#[derive(Debug)]
pub struct MemoryMap {
    next_handle: u64,
    allocations: BTreeMap<u64, Allocation>,
    /// Bytes in device memory.
    pub device_used: u64,
    /// Bytes in mapped host memory.
    pub map_host_used: u64,
    /// Upper bound for `map_host_used`.
    pub map_host_limit: u64,
    texture_info: Vec<TextureInfo>,
    texture_info_dirty: bool,
    texture_info_buffer: Option<(RawPtr, u64)>,
}

impl MemoryMap {
    /// An empty map.
    pub fn new(map_host_limit: u64) -> Self {
        Self {
            next_handle: HANDLE_BASE,
            allocations: BTreeMap::new(),
            device_used: 0,
            map_host_used: 0,
            map_host_limit,
            texture_info: Vec::new(),
            texture_info_dirty: false,
            texture_info_buffer: None,
        }
    }

    /// Registers an allocation and returns its stable handle.
    pub fn insert(&mut self, allocation: Allocation) -> DevicePtr {
        let handle = self.next_handle;
        // One empty block between allocations so an off-by-one never resolves.
        self.next_handle += allocation.size.max(1).div_ceil(HANDLE_ALIGN) * HANDLE_ALIGN + HANDLE_ALIGN;
        match allocation.placement {
            Placement::Device => self.device_used += allocation.size,
            Placement::MappedHost => self.map_host_used += allocation.size,
        }
        self.allocations.insert(handle, allocation);
        DevicePtr(handle)
    }

    /// Allocation starting at `ptr`.
    pub fn get(&self, ptr: DevicePtr) -> Option<&Allocation> {
        self.allocations.get(&ptr.0)
    }

    /// Removes the allocation starting at `ptr`.
    pub fn remove(&mut self, ptr: DevicePtr) -> Option<Allocation> {
        let allocation = self.allocations.remove(&ptr.0)?;
        match allocation.placement {
            Placement::Device => self.device_used = self.device_used.saturating_sub(allocation.size),
            Placement::MappedHost => {
                self.map_host_used = self.map_host_used.saturating_sub(allocation.size)
            }
        }
        Some(allocation)
    }

    /// Translates a pointer anywhere inside an allocation. Null stays null.
    pub fn resolve(&self, ptr: DevicePtr) -> Option<RawPtr> {
        if ptr.is_null() {
            return Some(RawPtr(0));
        }
        let (base, allocation) = self.allocations.range(..=ptr.0).next_back()?;
        let offset = ptr.0 - base;
        (offset < allocation.size.max(1)).then(|| allocation.raw.offset(offset))
    }

    /// Moves an allocation to a new backing.
    pub fn rebind(&mut self, ptr: DevicePtr, raw: RawPtr, placement: Placement) {
        let Some(allocation) = self.allocations.get_mut(&ptr.0) else {
            return;
        };
        match allocation.placement {
            Placement::Device => self.device_used = self.device_used.saturating_sub(allocation.size),
            Placement::MappedHost => {
                self.map_host_used = self.map_host_used.saturating_sub(allocation.size)
            }
        }
        allocation.raw = raw;
        allocation.placement = placement;
        match placement {
            Placement::Device => self.device_used += allocation.size,
            Placement::MappedHost => self.map_host_used += allocation.size,
        }
    }

    /// Replaces the texture object of an allocation.
    pub fn set_texture(&mut self, ptr: DevicePtr, texture: Option<(TextureHandle, TextureDesc)>) {
        if let Some(allocation) = self.allocations.get_mut(&ptr.0) {
            allocation.texture = texture;
        }
    }

    /// Textures and globals in device memory, largest first.
    pub fn movable_to_host(&self) -> Vec<(DevicePtr, u64)> {
        let mut movable: Vec<(DevicePtr, u64)> = self
            .allocations
            .iter()
            .filter(|(_, a)| {
                a.placement == Placement::Device
                    && matches!(a.mem_type, MemoryType::Texture | MemoryType::Global)
            })
            .map(|(handle, a)| (DevicePtr(*handle), a.size))
            .collect();
        movable.sort_by(|a, b| b.1.cmp(&a.1));
        movable
    }

    /// Every global: name, backing and size.
    pub fn globals(&self) -> Vec<(String, RawPtr, u64)> {
        self.allocations
            .values()
            .filter(|a| a.mem_type == MemoryType::Global)
            .map(|a| (a.name.clone(), a.raw, a.size))
            .collect()
    }

    /// Every allocation, for teardown.
    pub fn drain(&mut self) -> Vec<Allocation> {
        self.device_used = 0;
        self.map_host_used = 0;
        std::mem::take(&mut self.allocations).into_values().collect()
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    /// `true` without live allocations.
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// First slot not in use.
    pub fn free_texture_slot(&self) -> usize {
        self.texture_info
            .iter()
            .position(|info| info.data == 0)
            .unwrap_or(self.texture_info.len())
    }

    /// Writes a slot, growing the table to `slot + 128` when needed.
    pub fn set_texture_info(&mut self, slot: usize, info: TextureInfo) {
        if slot >= self.texture_info.len() {
            self.texture_info
                .resize(slot + TEXTURE_INFO_GROWTH, TextureInfo::default());
        }
        self.texture_info[slot] = info;
        self.texture_info_dirty = true;
    }

    /// Clears a slot.
    pub fn clear_texture_info(&mut self, slot: usize) {
        if let Some(info) = self.texture_info.get_mut(slot) {
            *info = TextureInfo::default();
            self.texture_info_dirty = true;
        }
    }

    /// Current table.
    pub fn texture_info(&self) -> &[TextureInfo] {
        &self.texture_info
    }

    /// Forces the next upload, e.g. after new modules were loaded.
    pub fn invalidate_texture_info(&mut self) {
        self.texture_info_dirty = !self.texture_info.is_empty();
    }

    /// `true` when the table changed since the last upload.
    pub fn texture_info_dirty(&self) -> bool {
        self.texture_info_dirty
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

impl GpuDeviceInternal {
    /// Allocates `size` bytes for `mem`, in device memory when it fits and in
    /// mapped host memory otherwise.
    pub(super) fn generic_alloc(
        &self,
        state: &mut GpuState,
        mem: &mut MemoryDescriptor,
        size: u64,
    ) -> Result<(), DeviceError> {
        let is_image = mem.is_image();
        let headroom = if is_image {
            self.config.texture_headroom
        } else {
            self.config.working_headroom
        };
        let can_map_host = self.driver.can_map_host();

        let mut fits = self.fits_on_device(state, size, headroom)?;
        if !fits && !is_image && can_map_host {
            let moved = self.move_textures_to_host(state, size + headroom);
            if moved > 0 {
                fits = self.fits_on_device(state, size, headroom)?;
            }
        }

        let mut backing = None;
        if fits {
            match self.driver.mem_alloc(size.max(1)) {
                Ok(raw) => backing = Some((raw, Placement::Device)),
                Err(DriverError::OutOfMemory) => {}
                Err(err) => return Err(self.fail_setup(format!("Failed to allocate '{}': {err}", mem.name))),
            }
        }

        let mut adopted = false;
        if backing.is_none() && can_map_host && mem.mem_type != MemoryType::DeviceOnly {
            if let Some(shared) = mem.shared_pointer {
                backing = Some((RawPtr(shared.0), Placement::MappedHost));
                adopted = true;
            } else if state.memory.map_host_used + size <= state.memory.map_host_limit {
                match self.driver.mem_host_alloc(size.max(1)) {
                    Ok(raw) => backing = Some((raw, Placement::MappedHost)),
                    Err(err) => log::warn!("GpuDevice: mapped host allocation failed: {err}"),
                }
            }
        }

        let Some((raw, placement)) = backing else {
            let (free, total) = self.driver.mem_get_info().unwrap_or((0, 0));
            let message = if can_map_host {
                "System is out of GPU and shared host memory"
            } else {
                "System is out of GPU memory"
            };
            self.set_error(&format!(
                "{message} (requested {} for '{}')",
                format_bytes(size),
                mem.name
            ));
            return Err(DeviceError::OutOfMemory {
                requested: size,
                free,
                total,
            });
        };

        if placement == Placement::MappedHost {
            log::info!(
                "GpuDevice: '{}' ({}) placed in mapped host memory",
                mem.name,
                format_bytes(size)
            );
            if adopted {
                mem.shared_counter += 1;
            } else {
                mem.shared_pointer = Some(DevicePtr(raw.0));
                mem.shared_counter = 1;
            }
        }

        let handle = state.memory.insert(Allocation {
            raw,
            size,
            placement,
            mem_type: mem.mem_type,
            name: mem.name.clone(),
            texture: None,
            slot: None,
        });
        mem.device_pointer = handle;
        mem.device_size = size;
        mem.resident = Some(self.id);
        self.stats.mem_alloc(size);
        Ok(())
    }

    fn fits_on_device(&self, state: &GpuState, size: u64, headroom: u64) -> Result<bool, DeviceError> {
        let (free, _) = self
            .driver
            .mem_get_info()
            .map_err(|err| self.fail_setup(format!("Failed to query device memory: {err}")))?;
        let within_budget = self
            .config
            .memory_budget
            .map_or(true, |budget| state.memory.device_used + size <= budget);
        Ok(within_budget && free >= size.saturating_add(headroom))
    }

    /// Moves textures and globals to mapped host memory until `needed` bytes
    /// of device memory were released. Returns the bytes released.
    pub(super) fn move_textures_to_host(&self, state: &mut GpuState, needed: u64) -> u64 {
        let mut released = 0;
        let mut moved_globals = false;
        for (handle, size) in state.memory.movable_to_host() {
            if released >= needed {
                break;
            }
            if state.memory.map_host_used + size > state.memory.map_host_limit {
                continue;
            }
            let Some(allocation) = state.memory.get(handle).cloned() else {
                continue;
            };
            let host = match self.driver.mem_host_alloc(size.max(1)) {
                Ok(host) => host,
                Err(err) => {
                    log::warn!("GpuDevice: cannot move '{}' to host: {err}", allocation.name);
                    break;
                }
            };
            if let Err(err) = self.driver.memcpy_dtod(host, allocation.raw, size) {
                log::warn!("GpuDevice: cannot move '{}' to host: {err}", allocation.name);
                self.driver.mem_host_free(host);
                continue;
            }
            if let Some((texture, desc)) = allocation.texture {
                self.driver.texture_destroy(texture);
                let recreated = self.driver.texture_create(&desc, host).ok();
                state.memory.set_texture(handle, recreated.map(|t| (t, desc)));
                if let Some(slot) = allocation.slot {
                    let mut info = state
                        .memory
                        .texture_info()
                        .get(slot)
                        .copied()
                        .unwrap_or_default();
                    info.data = recreated.map_or(host.0, |t| t.0);
                    state.memory.set_texture_info(slot, info);
                }
            }
            self.driver.mem_free(allocation.raw);
            state.memory.rebind(handle, host, Placement::MappedHost);
            moved_globals |= allocation.mem_type == MemoryType::Global;
            released += size;
            log::info!(
                "GpuDevice: moved '{}' ({}) to host memory",
                allocation.name,
                format_bytes(size)
            );
        }
        if moved_globals {
            self.bind_globals(state);
        }
        released
    }

    /// Copies the host data of `mem` to its device allocation.
    pub(super) fn generic_copy_to(&self, state: &GpuState, mem: &MemoryDescriptor) -> Result<(), DeviceError> {
        if !mem.has_host() || mem.device_pointer.is_null() {
            return Ok(());
        }
        let raw = self.raw_pointer(state, mem.device_pointer)?;
        let len = mem.host().len().min(mem.device_size as usize);
        self.driver
            .memcpy_htod(raw, &mem.host()[..len])
            .map_err(|err| self.fail_setup(format!("Failed to copy '{}' to device: {err}", mem.name)))
    }

    /// Frees the device side of `mem`.
    pub(super) fn generic_free(&self, state: &mut GpuState, mem: &mut MemoryDescriptor) {
        if mem.device_pointer.is_null() {
            return;
        }
        let Some(allocation) = state.memory.remove(mem.device_pointer) else {
            log::warn!("GpuDevice: freeing unknown pointer {} of '{}'", mem.device_pointer, mem.name);
            mem.reset_device();
            return;
        };
        if let Some((texture, _)) = allocation.texture {
            self.driver.texture_destroy(texture);
        }
        if let Some(slot) = allocation.slot {
            state.memory.clear_texture_info(slot);
        }
        match allocation.placement {
            Placement::Device => self.driver.mem_free(allocation.raw),
            Placement::MappedHost => {
                mem.shared_counter = mem.shared_counter.saturating_sub(1);
                if mem.shared_counter == 0 {
                    self.driver.mem_host_free(allocation.raw);
                    mem.shared_pointer = None;
                }
            }
        }
        self.stats.mem_free(allocation.size);
        mem.reset_device();
    }

    /// Backing of a device pointer.
    pub(super) fn raw_pointer(&self, state: &GpuState, ptr: DevicePtr) -> Result<RawPtr, DeviceError> {
        state
            .memory
            .resolve(ptr)
            .ok_or(DeviceError::InvalidPointer(ptr.0))
    }

    /// Allocates and uploads a global, then binds it by name.
    pub(super) fn global_alloc(&self, state: &mut GpuState, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.generic_alloc(state, mem, mem.memory_size() as u64)?;
        self.generic_copy_to(state, mem)?;
        self.bind_globals(state);
        Ok(())
    }

    /// Re-binds every global into every loaded module that declares it.
    pub(super) fn bind_globals(&self, state: &GpuState) {
        for (name, raw, size) in state.memory.globals() {
            let mut bound = false;
            for loaded in &state.modules {
                if loaded.variant.params.get(&name).is_none() {
                    continue;
                }
                match self.driver.bind_global(loaded.module, &name, raw, size) {
                    Ok(()) => bound = true,
                    Err(err) => log::error!("GpuDevice: binding global '{name}' failed: {err}"),
                }
            }
            if !bound && !state.modules.is_empty() {
                log::warn!("GpuDevice: no loaded module declares global '{name}'");
            }
        }
    }

    /// Allocates a texture: pitched rows for 2D images, a texture object and a
    /// texture-info slot.
    pub(super) fn tex_alloc(&self, state: &mut GpuState, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        let elem = mem.element_size();
        let width = mem.data_width;
        let height = mem.data_height.max(1);
        let depth = mem.data_depth.max(1);
        let is_2d = mem.data_height > 1 && depth == 1;
        let row = width * elem;
        let pitch = if is_2d {
            align_up(row, self.driver.pitch_alignment())
        } else {
            row
        };
        let size = (pitch * height * depth) as u64;

        self.generic_alloc(state, mem, size)?;
        let raw = self.raw_pointer(state, mem.device_pointer)?;

        if mem.has_host() {
            let upload = if pitch == row {
                mem.host().to_vec()
            } else {
                let mut padded = vec![0u8; size as usize];
                for (y, src) in mem.host().chunks(row).take(height).enumerate() {
                    padded[y * pitch..y * pitch + src.len()].copy_from_slice(src);
                }
                padded
            };
            let len = upload.len().min(size as usize);
            self.driver
                .memcpy_htod(raw, &upload[..len])
                .map_err(|err| self.fail_setup(format!("Failed to upload texture '{}': {err}", mem.name)))?;
        }

        let desc = TextureDesc {
            width,
            height,
            depth,
            data_type: mem.data_type,
            components: mem.data_elements,
            pitch,
            filter: FilterMode::from_interpolation(mem.image.interpolation),
            address: AddressMode::from_extension(mem.image.extension),
        };
        let texture = match self.driver.texture_create(&desc, raw) {
            Ok(texture) => Some(texture),
            Err(DriverError::Unsupported(_)) => None,
            Err(err) => {
                self.generic_free(state, mem);
                return Err(self.fail_setup(format!("Failed to create texture '{}': {err}", mem.name)));
            }
        };

        let slot = mem.slot.unwrap_or_else(|| state.memory.free_texture_slot());
        mem.slot = Some(slot);
        state.memory.set_texture(mem.device_pointer, texture.map(|t| (t, desc)));
        if let Some(allocation) = state.memory.allocations.get_mut(&mem.device_pointer.0) {
            allocation.slot = Some(slot);
        }
        state.memory.set_texture_info(
            slot,
            TextureInfo {
                data: texture.map_or(raw.0, |t| t.0),
                data_type: data_type_code(mem.data_type),
                interpolation: interpolation_code(mem.image.interpolation),
                extension: extension_code(mem.image.extension),
                width: width as u32,
                height: height as u32,
                depth: depth as u32,
            },
        );
        Ok(())
    }

    /// Uploads the texture-info table if it changed.
    pub(super) fn upload_texture_info(&self, state: &mut GpuState) -> Result<(), DeviceError> {
        if !state.memory.texture_info_dirty {
            return Ok(());
        }
        let bytes: Vec<u8> = bytemuck::cast_slice(&state.memory.texture_info).to_vec();
        let size = bytes.len() as u64;
        let raw = match state.memory.texture_info_buffer {
            Some((raw, capacity)) if capacity >= size => raw,
            previous => {
                if let Some((old, capacity)) = previous {
                    self.driver.mem_free(old);
                    self.stats.mem_free(capacity);
                }
                let raw = self
                    .driver
                    .mem_alloc(size.max(1))
                    .map_err(|err| self.fail_setup(format!("Failed to allocate texture info: {err}")))?;
                self.stats.mem_alloc(size);
                state.memory.texture_info_buffer = Some((raw, size));
                raw
            }
        };
        self.driver
            .memcpy_htod(raw, &bytes)
            .map_err(|err| self.fail_setup(format!("Failed to upload texture info: {err}")))?;
        for loaded in &state.modules {
            if loaded.variant.params.get("texture_info").is_some() {
                self.driver
                    .bind_global(loaded.module, "texture_info", raw, size)
                    .map_err(|err| self.fail_setup(format!("Failed to bind texture info: {err}")))?;
            }
        }
        state.memory.texture_info_dirty = false;
        log::debug!(
            "GpuDevice: uploaded {} texture info slots",
            state.memory.texture_info.len()
        );
        Ok(())
    }

    /// Frees every allocation. Used on teardown.
    pub(super) fn free_all_memory(&self, state: &mut GpuState) {
        for allocation in state.memory.drain() {
            if let Some((texture, _)) = allocation.texture {
                self.driver.texture_destroy(texture);
            }
            match allocation.placement {
                Placement::Device => self.driver.mem_free(allocation.raw),
                Placement::MappedHost => self.driver.mem_host_free(allocation.raw),
            }
            self.stats.mem_free(allocation.size);
        }
        if let Some((raw, size)) = state.memory.texture_info_buffer.take() {
            self.driver.mem_free(raw);
            self.stats.mem_free(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(size: u64, mem_type: MemoryType) -> Allocation {
        Allocation {
            raw: RawPtr(0x9000),
            size,
            placement: Placement::Device,
            mem_type,
            name: "a".into(),
            texture: None,
            slot: None,
        }
    }

    #[test]
    fn interior_pointers_resolve() {
        let mut map = MemoryMap::new(0);
        let a = map.insert(allocation(100, MemoryType::ReadWrite));
        let b = map.insert(allocation(8, MemoryType::ReadWrite));
        assert_eq!(map.resolve(a.offset(40)), Some(RawPtr(0x9000 + 40)));
        assert_eq!(map.resolve(a.offset(100)), None);
        assert_eq!(map.resolve(b), Some(RawPtr(0x9000)));
        assert_eq!(map.resolve(DevicePtr::NULL), Some(RawPtr(0)));
        assert_eq!(map.device_used, 108);
        map.remove(a);
        assert_eq!(map.resolve(a), None);
        assert_eq!(map.device_used, 8);
    }

    #[test]
    fn rebind_keeps_handle_and_moves_accounting() {
        let mut map = MemoryMap::new(1 << 20);
        let a = map.insert(allocation(64, MemoryType::Texture));
        map.rebind(a, RawPtr(0x5000), Placement::MappedHost);
        assert_eq!(map.resolve(a), Some(RawPtr(0x5000)));
        assert_eq!(map.device_used, 0);
        assert_eq!(map.map_host_used, 64);
        assert!(map.movable_to_host().is_empty());
    }

    #[test]
    fn texture_table_grows_past_slot() {
        let mut map = MemoryMap::new(0);
        map.set_texture_info(3, TextureInfo { data: 1, ..Default::default() });
        assert_eq!(map.texture_info().len(), 3 + TEXTURE_INFO_GROWTH);
        assert!(map.texture_info_dirty());
        assert_eq!(map.free_texture_slot(), 0);
    }

    #[test]
    fn texture_info_is_32_bytes() {
        assert_eq!(std::mem::size_of::<TextureInfo>(), 32);
    }
}
