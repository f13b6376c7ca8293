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

use photon_core::device::DevicePtr;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

const HANDLE_BASE: u64 = 1 << 32;
const HANDLE_ALIGN: u64 = 64;

/// One host allocation standing in for device memory.
#[derive(Debug)]
pub struct CpuBuffer {
    data: RwLock<Vec<u8>>,
}

impl CpuBuffer {
    fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0; size]),
        }
    }

    /// Shared access to the bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusive access to the bytes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct State {
    buffers: BTreeMap<u64, Arc<CpuBuffer>>,
    next_handle: u64,
    used: u64,
    globals: HashMap<String, DevicePtr>,
    textures: Vec<Option<DevicePtr>>,
}

/// Allocations of a CPU device, addressed through stable handles.
#[derive(Debug)]
pub struct CpuMemory {
    state: Mutex<State>,
    budget: Option<u64>,
}

impl CpuMemory {
    /// Empty memory, optionally capped at `budget` bytes.
    pub fn new(budget: Option<u64>) -> Self {
        Self {
            state: Mutex::new(State {
                buffers: BTreeMap::new(),
                next_handle: HANDLE_BASE,
                used: 0,
                globals: HashMap::new(),
                textures: Vec::new(),
            }),
            budget,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bytes allocated.
    pub fn used(&self) -> u64 {
        self.state().used
    }

    /// The cap, if any.
    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    /// Allocates `size` zeroed bytes. `None` past the budget.
    pub fn alloc(&self, size: u64) -> Option<DevicePtr> {
        let mut state = self.state();
        if self.budget.is_some_and(|budget| state.used + size > budget) {
            return None;
        }
        let handle = state.next_handle;
        state.next_handle += size.max(1).div_ceil(HANDLE_ALIGN) * HANDLE_ALIGN + HANDLE_ALIGN;
        state.used += size;
        state.buffers.insert(handle, Arc::new(CpuBuffer::new(size as usize)));
        Some(DevicePtr(handle))
    }

    /// Frees the allocation at `ptr` and returns its size.
    pub fn free(&self, ptr: DevicePtr) -> Option<u64> {
        let mut state = self.state();
        let buffer = state.buffers.remove(&ptr.0)?;
        let size = buffer.len() as u64;
        state.used = state.used.saturating_sub(size);
        state.globals.retain(|_, bound| *bound != ptr);
        for slot in state.textures.iter_mut() {
            if *slot == Some(ptr) {
                *slot = None;
            }
        }
        Some(size)
    }

    /// The buffer containing `ptr` and the offset of `ptr` inside it.
    pub fn resolve(&self, ptr: DevicePtr) -> Option<(Arc<CpuBuffer>, usize)> {
        let state = self.state();
        let (base, buffer) = state.buffers.range(..=ptr.0).next_back()?;
        let offset = (ptr.0 - base) as usize;
        (offset < buffer.len().max(1)).then(|| (buffer.clone(), offset))
    }

    /// Binds `ptr` to the global `name`.
    pub fn set_global(&self, name: &str, ptr: DevicePtr) {
        self.state().globals.insert(name.to_string(), ptr);
    }

    /// Pointer bound to the global `name`.
    pub fn global(&self, name: &str) -> Option<DevicePtr> {
        self.state().globals.get(name).copied()
    }

    /// Puts `ptr` in `slot`, or in the first free slot. Returns the slot used.
    pub fn set_texture(&self, slot: Option<usize>, ptr: DevicePtr) -> usize {
        let mut state = self.state();
        let slot = slot.unwrap_or_else(|| {
            state
                .textures
                .iter()
                .position(Option::is_none)
                .unwrap_or(state.textures.len())
        });
        if state.textures.len() <= slot {
            state.textures.resize(slot + 1, None);
        }
        state.textures[slot] = Some(ptr);
        slot
    }

    /// Pointer of the texture in `slot`.
    pub fn texture(&self, slot: usize) -> Option<DevicePtr> {
        self.state().textures.get(slot).copied().flatten()
    }

    /// Frees everything. Returns the number of allocations and bytes released.
    pub fn clear(&self) -> (usize, u64) {
        let mut state = self.state();
        let count = state.buffers.len();
        let bytes = state.used;
        state.buffers.clear();
        state.globals.clear();
        state.textures.clear();
        state.used = 0;
        (count, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced() {
        let memory = CpuMemory::new(Some(100));
        let a = memory.alloc(60).unwrap();
        assert!(memory.alloc(60).is_none());
        assert_eq!(memory.free(a), Some(60));
        assert!(memory.alloc(60).is_some());
    }

    #[test]
    fn interior_pointers_resolve_to_their_buffer() {
        let memory = CpuMemory::new(None);
        let a = memory.alloc(16).unwrap();
        let b = memory.alloc(16).unwrap();
        let (_, offset) = memory.resolve(a.offset(12)).unwrap();
        assert_eq!(offset, 12);
        assert!(memory.resolve(a.offset(16)).is_none());
        assert_eq!(memory.resolve(b).unwrap().1, 0);
    }

    #[test]
    fn freeing_unbinds_globals_and_textures() {
        let memory = CpuMemory::new(None);
        let a = memory.alloc(8).unwrap();
        memory.set_global("lookup", a);
        let slot = memory.set_texture(None, a);
        memory.free(a);
        assert!(memory.global("lookup").is_none());
        assert!(memory.texture(slot).is_none());
    }
}
