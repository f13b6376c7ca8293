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

//! The acceleration-structure build flow shared by every device.
//!
//! Devices plug in an [`AccelBackend`] that knows how to build one payload type;
//! [`AccelManager`] owns the arena, serializes builds, resolves instances,
//! reports failures to the progress sink and recycles retired payloads once the
//! queues have moved past them.

use super::epoch::QueueEpochs;
use crate::bvh::{resolve_instances, AccelStore, ResolvedInstance};
use photon_core::bvh::{AccelLevel, AccelState, BuildFlags, BvhBuildRequest, BvhHandle, BvhInput, BvhParams, GeometryProvider};
use photon_core::device::{BuildError, Progress};
use photon_core::math::Aabb;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

/// What a backend produced.
#[derive(Debug)]
pub enum BuildOutcome<T> {
    /// A new payload replacing any previous one.
    Built {
        /// The structure.
        payload: T,
        /// Its bounds.
        bounds: Aabb,
        /// Bottoms a top references.
        references: Vec<BvhHandle>,
    },
    /// The existing payload was updated in place.
    Refit {
        /// New bounds.
        bounds: Aabb,
        /// Storage the update replaced. Freed once the queues move past it.
        retired: Option<T>,
    },
}

/// Builds one payload type.
pub trait AccelBackend {
    /// Stored structure.
    type Payload: Send + Debug;

    /// Builds a bottom structure, or refits `existing` in place.
    fn build_bottom(
        &self,
        geometry: &dyn GeometryProvider,
        params: &BvhParams,
        flags: BuildFlags,
        existing: Option<&mut Self::Payload>,
    ) -> Result<BuildOutcome<Self::Payload>, BuildError>;

    /// Builds a top structure, or refits `existing` in place.
    fn build_top(
        &self,
        resolved: &[ResolvedInstance<'_, Self::Payload>],
        params: &BvhParams,
        flags: BuildFlags,
        existing: Option<&mut Self::Payload>,
    ) -> Result<BuildOutcome<Self::Payload>, BuildError>;

    /// Frees the storage of retired payloads.
    fn free(&self, payloads: Vec<Self::Payload>);
}

/// Arena, build lock and deferred frees of one device.
#[derive(Debug)]
pub struct AccelManager<T> {
    store: Mutex<AccelStore<T>>,
    build_lock: Mutex<()>,
}

impl<T> Default for AccelManager<T> {
    fn default() -> Self {
        Self {
            store: Mutex::new(AccelStore::new()),
            build_lock: Mutex::new(()),
        }
    }
}

impl<T: Send + Debug> AccelManager<T> {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, AccelStore<T>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one build or refit.
    ///
    /// Failures leave a previously built structure usable and are also sent to
    /// `progress`.
    pub fn build<B>(
        &self,
        backend: &B,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
        epochs: &QueueEpochs,
    ) -> Result<BvhHandle, BuildError>
    where
        B: AccelBackend<Payload = T>,
    {
        let _span = tracing::debug_span!(
            "bvh_build",
            label = %request.params.label,
            level = ?request.input.level(),
            refit
        )
        .entered();
        let result = self.build_inner(backend, request, progress, refit, epochs);
        if let Err(err) = &result {
            progress.set_error(&err.to_string());
        }
        result
    }

    fn build_inner<B>(
        &self,
        backend: &B,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
        epochs: &QueueEpochs,
    ) -> Result<BvhHandle, BuildError>
    where
        B: AccelBackend<Payload = T>,
    {
        let _serial = self.build_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.reclaim(backend, epochs);
        if progress.get_cancel() {
            return Err(BuildError::Cancelled);
        }

        let BvhBuildRequest {
            params,
            input,
            existing,
        } = request;
        let flags = params.policy.flags();
        let handle = self
            .store()
            .begin(input.level(), existing, refit, flags, &params.label)?;
        progress.set_substatus(&format!(
            "{} {}",
            if refit { "Refitting" } else { "Building" },
            params.label
        ));

        let outcome = {
            let mut store = self.store();
            let mut own = if refit { store.take_payload(handle) } else { None };
            let outcome = match input {
                BvhInput::Bottom(geometry) => backend.build_bottom(geometry, &params, flags, own.as_mut()),
                BvhInput::Top(instances) => {
                    let view = &*store;
                    resolve_instances(instances, |h| view.built(h, AccelLevel::Bottom)).and_then(|resolved| {
                        // A refit keeps the reference counts, so it may not point at new bottoms.
                        if own.is_some() && !view.references_match(handle, resolved.iter().map(|r| r.instance.bottom)) {
                            return Err(BuildError::TopologyChanged);
                        }
                        backend.build_top(&resolved, &params, flags, own.as_mut())
                    })
                }
            };
            if let Some(payload) = own {
                store.restore_payload(handle, payload);
            }
            outcome
        };

        let mut store = self.store();
        match outcome {
            Ok(BuildOutcome::Built {
                payload,
                bounds,
                references,
            }) => store.complete(handle, payload, bounds, references, epochs.current())?,
            Ok(BuildOutcome::Refit { bounds, retired }) => {
                store.complete_refit(handle, bounds, retired, epochs.current())?
            }
            Err(err) => {
                store.fail(handle);
                log::error!("AccelManager: building '{}' failed: {err}", params.label);
                return Err(err);
            }
        }
        log::debug!("AccelManager: '{}' is {handle}", params.label);
        Ok(handle)
    }

    /// Releases the owner's reference to `handle`.
    pub fn release<B>(&self, backend: &B, handle: BvhHandle, epochs: &QueueEpochs) -> Result<(), BuildError>
    where
        B: AccelBackend<Payload = T>,
    {
        self.store().release(handle, epochs.current())?;
        self.reclaim(backend, epochs);
        Ok(())
    }

    /// Frees every retired payload the queues are done with. Returns the count.
    pub fn reclaim<B>(&self, backend: &B, epochs: &QueueEpochs) -> usize
    where
        B: AccelBackend<Payload = T>,
    {
        let payloads = self.store().reclaim(epochs.safe_epoch());
        let count = payloads.len();
        if count > 0 {
            log::debug!("AccelManager: reclaimed {count} retired structures");
            backend.free(payloads);
        }
        count
    }

    /// State of `handle`.
    pub fn state(&self, handle: BvhHandle) -> Option<AccelState> {
        self.store().state(handle)
    }

    /// Retired payloads still waiting for the queues.
    pub fn pending_frees(&self) -> usize {
        self.store().pending_frees()
    }

    /// Runs `f` on a built structure.
    pub fn with_built<R>(&self, handle: BvhHandle, level: AccelLevel, f: impl FnOnce(&T, Aabb) -> R) -> Option<R> {
        let store = self.store();
        store.built(handle, level).map(|(payload, bounds)| f(payload, bounds))
    }

    /// Frees everything, live or retired. Used on device teardown.
    pub fn free_all<B>(&self, backend: &B)
    where
        B: AccelBackend<Payload = T>,
    {
        let payloads = self.store().drain_all();
        if !payloads.is_empty() {
            backend.free(payloads);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::SoftwareAccel;
    use photon_core::bvh::{BuildPolicy, ObjectInstance, OwnedGeometry};
    use photon_core::device::SharedProgress;
    use photon_core::math::{Mat4, Vec3};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct HostBackend {
        freed: AtomicUsize,
    }

    impl AccelBackend for HostBackend {
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
            self.freed.fetch_add(payloads.len(), Ordering::SeqCst);
        }
    }

    fn triangle() -> OwnedGeometry {
        OwnedGeometry::mesh(1, vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![[0, 1, 2]])
    }

    #[test]
    fn static_refit_is_rejected_and_reported() {
        let manager = AccelManager::new();
        let backend = HostBackend::default();
        let epochs = QueueEpochs::new();
        let progress = SharedProgress::new();
        let geometry = triangle();
        let params = BvhParams::new("static", BuildPolicy::Static);

        let handle = manager
            .build(&backend, BvhBuildRequest::bottom(params.clone(), &geometry), &progress, false, &epochs)
            .unwrap();
        let err = manager
            .build(
                &backend,
                BvhBuildRequest::bottom(params, &geometry).with_existing(handle),
                &progress,
                true,
                &epochs,
            )
            .unwrap_err();
        assert_eq!(err, BuildError::RefitNotAllowed { label: "static".into() });
        assert!(progress.error().is_some());
        assert_eq!(manager.state(handle), Some(AccelState::Built));
    }

    #[test]
    fn top_refit_keeps_payload() {
        let manager = AccelManager::new();
        let backend = HostBackend::default();
        let epochs = QueueEpochs::new();
        let progress = SharedProgress::new();
        let geometry = triangle();
        let bottom = manager
            .build(
                &backend,
                BvhBuildRequest::bottom(BvhParams::new("mesh", BuildPolicy::Static), &geometry),
                &progress,
                false,
                &epochs,
            )
            .unwrap();

        let params = BvhParams::new("scene", BuildPolicy::Dynamic);
        let mut instances = vec![ObjectInstance::new(0, bottom, Mat4::IDENTITY)];
        let top = manager
            .build(&backend, BvhBuildRequest::top(params.clone(), &instances), &progress, false, &epochs)
            .unwrap();

        instances[0].transform = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        manager
            .build(
                &backend,
                BvhBuildRequest::top(params, &instances).with_existing(top),
                &progress,
                true,
                &epochs,
            )
            .unwrap();
        let max_x = manager
            .with_built(top, AccelLevel::Top, |_, bounds| bounds.max.x)
            .unwrap();
        assert!(max_x >= 11.0 - 1e-4);
    }

    #[test]
    fn release_waits_for_queue() {
        let manager = AccelManager::new();
        let backend = HostBackend::default();
        let epochs = QueueEpochs::new();
        let progress = SharedProgress::new();
        let geometry = triangle();
        let handle = manager
            .build(
                &backend,
                BvhBuildRequest::bottom(BvhParams::default(), &geometry),
                &progress,
                false,
                &epochs,
            )
            .unwrap();

        let queue = epochs.register();
        epochs.submit(queue);
        manager.release(&backend, handle, &epochs).unwrap();
        assert_eq!(backend.freed.load(Ordering::SeqCst), 0);
        assert_eq!(manager.pending_frees(), 1);

        epochs.complete(queue);
        assert_eq!(manager.reclaim(&backend, &epochs), 1);
        assert_eq!(backend.freed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(handle), None);
    }

    #[test]
    fn cancelled_build_does_not_allocate() {
        let manager: AccelManager<SoftwareAccel> = AccelManager::new();
        let backend = HostBackend::default();
        let epochs = QueueEpochs::new();
        let progress = SharedProgress::new();
        progress.cancel();
        let geometry = triangle();
        let err = manager
            .build(
                &backend,
                BvhBuildRequest::bottom(BvhParams::default(), &geometry),
                &progress,
                false,
                &epochs,
            )
            .unwrap_err();
        assert_eq!(err, BuildError::Cancelled);
    }
}
