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

//! Generational storage for acceleration structures.
//!
//! Slots are addressed by [`BvhHandle`]. Bottom structures count the top
//! structures referencing them; a released bottom stays alive until the last
//! reference goes away. Storage is never dropped on release: payloads move to
//! a deferred queue tagged with the queue epoch at release time and come back
//! out of [`AccelStore::reclaim`] once that epoch has completed.

use photon_core::bvh::{AccelLevel, AccelState, BuildFlags, BvhHandle};
use photon_core::device::BuildError;
use photon_core::math::Aabb;
use std::collections::VecDeque;

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    state: AccelState,
    level: AccelLevel,
    flags: BuildFlags,
    label: String,
    payload: Option<T>,
    bounds: Aabb,
    // Bottoms referenced by a top, deduplicated.
    references: Vec<BvhHandle>,
    // Tops referencing a bottom.
    ref_count: u32,
    owner_alive: bool,
}

impl<T> Slot<T> {
    fn vacant(generation: u32) -> Self {
        Self {
            generation,
            state: AccelState::Freed,
            level: AccelLevel::Bottom,
            flags: BuildFlags::EMPTY,
            label: String::new(),
            payload: None,
            bounds: Aabb::INVALID,
            references: Vec::new(),
            ref_count: 0,
            owner_alive: false,
        }
    }
}

#[derive(Debug)]
struct Deferred<T> {
    epoch: u64,
    payload: Option<T>,
    // Slot to recycle once reclaimed; `None` for payloads replaced by a rebuild.
    slot: Option<u32>,
}

/// Arena of acceleration structures with reference counts and deferred frees.
#[derive(Debug)]
pub struct AccelStore<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    deferred: VecDeque<Deferred<T>>,
}

impl<T> Default for AccelStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AccelStore<T> {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    fn slot(&self, handle: BvhHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: BvhHandle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
    }

    fn live_slot_mut(&mut self, handle: BvhHandle) -> Result<&mut Slot<T>, BuildError> {
        match self.slot_mut(handle) {
            Some(slot) if slot.owner_alive && slot.state != AccelState::Freed => Ok(slot),
            _ => Err(BuildError::InvalidHandle),
        }
    }

    /// Reserves an unbuilt structure.
    pub fn allocate(&mut self, level: AccelLevel, flags: BuildFlags, label: &str) -> BvhHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::vacant(0));
                self.slots.len() as u32 - 1
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.state = AccelState::Unbuilt;
        slot.level = level;
        slot.flags = flags;
        slot.label = label.to_owned();
        slot.owner_alive = true;
        BvhHandle {
            index,
            generation: slot.generation,
        }
    }

    /// Moves a structure into its building state.
    ///
    /// Without `existing` a new structure is allocated. With it, the structure
    /// is rebuilt, or refit when `refit` is set.
    ///
    /// ## Errors
    /// * [`BuildError::RefitBeforeBuild`] when refitting something never built.
    /// * [`BuildError::RefitNotAllowed`] when refitting a structure built
    ///   without [`BuildFlags::ALLOW_UPDATE`].
    /// * [`BuildError::WrongLevel`] and [`BuildError::InvalidHandle`] for bad handles.
    pub fn begin(
        &mut self,
        level: AccelLevel,
        existing: Option<BvhHandle>,
        refit: bool,
        flags: BuildFlags,
        label: &str,
    ) -> Result<BvhHandle, BuildError> {
        let Some(handle) = existing else {
            if refit {
                return Err(BuildError::RefitBeforeBuild);
            }
            let handle = self.allocate(level, flags, label);
            self.slots[handle.index as usize].state = AccelState::Building;
            return Ok(handle);
        };

        let slot = self.live_slot_mut(handle)?;
        if slot.level != level {
            return Err(BuildError::WrongLevel);
        }
        slot.state = match (slot.state, refit) {
            (AccelState::Unbuilt, true) => return Err(BuildError::RefitBeforeBuild),
            (AccelState::Unbuilt, false) => {
                slot.flags = flags;
                AccelState::Building
            }
            (AccelState::Built, true) => {
                if !slot.flags.contains(BuildFlags::ALLOW_UPDATE) {
                    return Err(BuildError::RefitNotAllowed {
                        label: slot.label.clone(),
                    });
                }
                AccelState::Refitting
            }
            (AccelState::Built, false) => {
                slot.flags = flags;
                AccelState::Rebuilding
            }
            (state, _) => {
                return Err(BuildError::Backend(format!(
                    "'{}' is already in state {state:?}",
                    slot.label
                )))
            }
        };
        Ok(handle)
    }

    /// Finishes a build or rebuild with a new payload.
    ///
    /// The previous payload, if any, is deferred until `retire_epoch` completes.
    /// `references` replaces the set of bottoms a top refers to.
    pub fn complete(
        &mut self,
        handle: BvhHandle,
        payload: T,
        bounds: Aabb,
        references: Vec<BvhHandle>,
        retire_epoch: u64,
    ) -> Result<(), BuildError> {
        let mut references = references;
        references.sort_unstable();
        references.dedup();
        for r in &references {
            if let Some(bottom) = self.slot_mut(*r) {
                bottom.ref_count += 1;
            }
        }

        let slot = self.slot_mut(handle).ok_or(BuildError::InvalidHandle)?;
        let old_payload = slot.payload.replace(payload);
        let old_refs = std::mem::replace(&mut slot.references, references);
        slot.bounds = bounds;
        slot.state = AccelState::Built;

        if old_payload.is_some() {
            self.deferred.push_back(Deferred {
                epoch: retire_epoch,
                payload: old_payload,
                slot: None,
            });
        }
        for r in old_refs {
            self.drop_reference(r, retire_epoch);
        }
        Ok(())
    }

    /// Finishes an in-place refit.
    ///
    /// `retired` is storage the refit replaced; it is deferred like a rebuilt
    /// payload until `retire_epoch` completes.
    pub fn complete_refit(
        &mut self,
        handle: BvhHandle,
        bounds: Aabb,
        retired: Option<T>,
        retire_epoch: u64,
    ) -> Result<(), BuildError> {
        let slot = self.slot_mut(handle).ok_or(BuildError::InvalidHandle)?;
        slot.bounds = bounds;
        slot.state = AccelState::Built;
        if retired.is_some() {
            self.deferred.push_back(Deferred {
                epoch: retire_epoch,
                payload: retired,
                slot: None,
            });
        }
        Ok(())
    }

    /// `true` if `bottoms` is exactly the set of bottoms the top `handle` references.
    pub fn references_match(&self, handle: BvhHandle, bottoms: impl IntoIterator<Item = BvhHandle>) -> bool {
        let Some(slot) = self.slot(handle) else {
            return false;
        };
        let mut bottoms: Vec<BvhHandle> = bottoms.into_iter().collect();
        bottoms.sort_unstable();
        bottoms.dedup();
        bottoms == slot.references
    }

    /// Abandons a build. A previously built structure stays usable; a first
    /// build returns to `Unbuilt`.
    pub fn fail(&mut self, handle: BvhHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.state = match slot.state {
                AccelState::Refitting | AccelState::Rebuilding => AccelState::Built,
                AccelState::Building => AccelState::Unbuilt,
                other => other,
            };
        }
    }

    /// Drops the owner's reference.
    ///
    /// The structure is retired now if no top references it, otherwise when
    /// the last referencing top is rebuilt without it or released.
    pub fn release(&mut self, handle: BvhHandle, retire_epoch: u64) -> Result<(), BuildError> {
        let slot = self.live_slot_mut(handle)?;
        slot.owner_alive = false;
        if slot.ref_count == 0 {
            self.retire(handle.index, retire_epoch);
        }
        Ok(())
    }

    fn drop_reference(&mut self, bottom: BvhHandle, retire_epoch: u64) {
        let Some(slot) = self.slot_mut(bottom) else {
            return;
        };
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 && !slot.owner_alive && slot.state != AccelState::Freed {
            self.retire(bottom.index, retire_epoch);
        }
    }

    fn retire(&mut self, index: u32, retire_epoch: u64) {
        let slot = &mut self.slots[index as usize];
        slot.state = AccelState::Freed;
        let payload = slot.payload.take();
        let references = std::mem::take(&mut slot.references);
        self.deferred.push_back(Deferred {
            epoch: retire_epoch,
            payload,
            slot: Some(index),
        });
        let generation = self.slots[index as usize].generation;
        log::trace!("AccelStore: retiring slot {index}v{generation} at epoch {retire_epoch}");
        for r in references {
            self.drop_reference(r, retire_epoch);
        }
    }

    /// Removes every deferred entry whose epoch is at most `safe_epoch` and
    /// returns the payloads so the caller can free their storage.
    pub fn reclaim(&mut self, safe_epoch: u64) -> Vec<T> {
        let mut payloads = Vec::new();
        let mut pending = VecDeque::with_capacity(self.deferred.len());
        while let Some(entry) = self.deferred.pop_front() {
            if entry.epoch > safe_epoch {
                pending.push_back(entry);
                continue;
            }
            payloads.extend(entry.payload);
            if let Some(index) = entry.slot {
                let slot = &mut self.slots[index as usize];
                *slot = Slot::vacant(slot.generation.wrapping_add(1));
                self.free.push(index);
            }
        }
        self.deferred = pending;
        payloads
    }

    /// Entries waiting in the deferred queue.
    pub fn pending_frees(&self) -> usize {
        self.deferred.len()
    }

    /// State of `handle`, `None` once the slot was recycled.
    pub fn state(&self, handle: BvhHandle) -> Option<AccelState> {
        self.slot(handle).map(|s| s.state)
    }

    /// Payload of a built structure of `level`.
    pub fn built(&self, handle: BvhHandle, level: AccelLevel) -> Option<(&T, Aabb)> {
        let slot = self.slot(handle)?;
        if slot.level != level || slot.state == AccelState::Freed {
            return None;
        }
        match (&slot.payload, slot.state) {
            (Some(p), AccelState::Built | AccelState::Refitting | AccelState::Rebuilding) => {
                Some((p, slot.bounds))
            }
            _ => None,
        }
    }

    /// Mutable payload for in-place refits.
    pub fn payload_mut(&mut self, handle: BvhHandle) -> Option<&mut T> {
        self.slot_mut(handle)?.payload.as_mut()
    }

    /// Moves the payload out while a refit needs shared access to the rest of
    /// the store.
    pub fn take_payload(&mut self, handle: BvhHandle) -> Option<T> {
        self.slot_mut(handle)?.payload.take()
    }

    /// Returns a payload moved out with [`AccelStore::take_payload`].
    pub fn restore_payload(&mut self, handle: BvhHandle, payload: T) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.payload = Some(payload);
        }
    }

    /// Flags the structure was last built with.
    pub fn flags(&self, handle: BvhHandle) -> Option<BuildFlags> {
        self.slot(handle).map(|s| s.flags)
    }

    /// Number of tops referencing a bottom.
    pub fn ref_count(&self, handle: BvhHandle) -> u32 {
        self.slot(handle).map_or(0, |s| s.ref_count)
    }

    /// Payloads of every structure still holding storage, live or deferred.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut payloads: Vec<T> = self.deferred.drain(..).filter_map(|d| d.payload).collect();
        payloads.extend(self.slots.iter_mut().filter_map(|s| s.payload.take()));
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_core::bvh::BuildPolicy;

    fn built_bottom(store: &mut AccelStore<&'static str>, flags: BuildFlags) -> BvhHandle {
        let h = store.begin(AccelLevel::Bottom, None, false, flags, "mesh").unwrap();
        store.complete(h, "blas", Aabb::INVALID, Vec::new(), 0).unwrap();
        h
    }

    #[test]
    fn refit_requires_update_flag() {
        let mut store = AccelStore::new();
        let stat = built_bottom(&mut store, BuildPolicy::Static.flags());
        let err = store
            .begin(AccelLevel::Bottom, Some(stat), true, BuildFlags::EMPTY, "mesh")
            .unwrap_err();
        assert_eq!(err, BuildError::RefitNotAllowed { label: "mesh".into() });
        assert_eq!(store.state(stat), Some(AccelState::Built));

        let dynamic = built_bottom(&mut store, BuildPolicy::Dynamic.flags());
        store
            .begin(AccelLevel::Bottom, Some(dynamic), true, BuildFlags::EMPTY, "mesh")
            .unwrap();
        assert_eq!(store.state(dynamic), Some(AccelState::Refitting));
        store.complete_refit(dynamic, Aabb::INVALID, None, 0).unwrap();
        assert_eq!(store.pending_frees(), 0);
        assert_eq!(store.state(dynamic), Some(AccelState::Built));
    }

    #[test]
    fn refit_before_build_is_rejected() {
        let mut store: AccelStore<()> = AccelStore::new();
        let flags = BuildPolicy::Dynamic.flags();
        assert_eq!(
            store.begin(AccelLevel::Bottom, None, true, flags, "x"),
            Err(BuildError::RefitBeforeBuild)
        );
        let h = store.allocate(AccelLevel::Bottom, flags, "x");
        assert_eq!(
            store.begin(AccelLevel::Bottom, Some(h), true, flags, "x"),
            Err(BuildError::RefitBeforeBuild)
        );
        assert_eq!(
            store.begin(AccelLevel::Top, Some(h), false, flags, "x"),
            Err(BuildError::WrongLevel)
        );
    }

    #[test]
    fn referenced_bottom_outlives_its_owner() {
        let mut store = AccelStore::new();
        let bottom = built_bottom(&mut store, BuildFlags::EMPTY);
        let top = store.begin(AccelLevel::Top, None, false, BuildFlags::EMPTY, "scene").unwrap();
        store
            .complete(top, "tlas", Aabb::INVALID, vec![bottom, bottom], 0)
            .unwrap();
        assert_eq!(store.ref_count(bottom), 1);

        store.release(bottom, 1).unwrap();
        assert!(store.reclaim(u64::MAX).is_empty());
        assert_eq!(store.state(bottom), Some(AccelState::Built));

        store.release(top, 2).unwrap();
        assert_eq!(store.state(bottom), Some(AccelState::Freed));
        assert_eq!(store.reclaim(1), Vec::<&str>::new());
        let mut freed = store.reclaim(2);
        freed.sort_unstable();
        assert_eq!(freed, vec!["blas", "tlas"]);
        assert_eq!(store.state(bottom), None);
    }

    #[test]
    fn rebuild_defers_the_old_payload() {
        let mut store = AccelStore::new();
        let h = built_bottom(&mut store, BuildFlags::EMPTY);
        store.begin(AccelLevel::Bottom, Some(h), false, BuildFlags::EMPTY, "mesh").unwrap();
        assert_eq!(store.state(h), Some(AccelState::Rebuilding));
        store.complete(h, "blas2", Aabb::INVALID, Vec::new(), 7).unwrap();
        assert_eq!(store.pending_frees(), 1);
        assert!(store.reclaim(6).is_empty());
        assert_eq!(store.reclaim(7), vec!["blas"]);
        assert_eq!(store.built(h, AccelLevel::Bottom).map(|(p, _)| *p), Some("blas2"));
    }

    #[test]
    fn refit_defers_replaced_storage() {
        let mut store = AccelStore::new();
        let bottom = built_bottom(&mut store, BuildFlags::EMPTY);
        let other = built_bottom(&mut store, BuildFlags::EMPTY);
        let flags = BuildPolicy::Dynamic.flags();
        let top = store.begin(AccelLevel::Top, None, false, flags, "scene").unwrap();
        store.complete(top, "tlas", Aabb::INVALID, vec![bottom], 0).unwrap();
        assert!(store.references_match(top, [bottom, bottom]));
        assert!(!store.references_match(top, [other]));
        assert!(!store.references_match(top, [bottom, other]));

        store.begin(AccelLevel::Top, Some(top), true, flags, "scene").unwrap();
        store.complete_refit(top, Aabb::INVALID, Some("motion"), 3).unwrap();
        assert_eq!(store.pending_frees(), 1);
        assert!(store.reclaim(2).is_empty());
        assert_eq!(store.reclaim(3), vec!["motion"]);
        assert_eq!(store.built(top, AccelLevel::Top).map(|(p, _)| *p), Some("tlas"));
    }

    #[test]
    fn recycled_slots_invalidate_old_handles() {
        let mut store = AccelStore::new();
        let old = built_bottom(&mut store, BuildFlags::EMPTY);
        store.release(old, 0).unwrap();
        assert_eq!(store.release(old, 0), Err(BuildError::InvalidHandle));
        store.reclaim(0);
        let new = built_bottom(&mut store, BuildFlags::EMPTY);
        assert_eq!(new.index, old.index);
        assert_ne!(new.generation, old.generation);
        assert_eq!(store.state(old), None);
    }

    #[test]
    fn failed_build_keeps_previous_structure() {
        let mut store = AccelStore::new();
        let h = built_bottom(&mut store, BuildFlags::EMPTY);
        store.begin(AccelLevel::Bottom, Some(h), false, BuildFlags::EMPTY, "mesh").unwrap();
        store.fail(h);
        assert_eq!(store.state(h), Some(AccelState::Built));

        let fresh = store.begin(AccelLevel::Bottom, None, false, BuildFlags::EMPTY, "m").unwrap();
        store.fail(fresh);
        assert_eq!(store.state(fresh), Some(AccelState::Unbuilt));
    }
}
