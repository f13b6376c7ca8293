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

//! GPU devices over a [`GpuDriver`].
//!
//! One [`GpuDevice`] type serves every GPU backend. Backend differences stay
//! in the driver; the device adds virtual pointers, memory headroom and host
//! fallback, kernel resolution and loading, sticky errors, acceleration
//! structures and queues.

pub mod driver;
pub mod interop;
pub mod memory;
pub mod queue;

pub use driver::{DriverError, GpuDriver, LaunchDims, ModuleId, RawPtr};
pub use interop::GpuGraphicsInterop;
pub use queue::GpuQueue;

use self::memory::MemoryMap;
use super::accel::{AccelBackend, AccelManager, BuildOutcome};
use super::epoch::QueueEpochs;
use crate::bvh::hardware::{HardwareBuilder, HwAccel, MotionNodes};
use crate::bvh::{instance_bounds, primitive_bounds, ResolvedInstance, SoftwareAccel};
use crate::kernel::{KernelArtifact, KernelCompiler, KernelResolver, ResolverOptions};
use photon_core::bvh::{
    AccelState, BuildFlags, BvhBuildRequest, BvhHandle, BvhLayoutMask, BvhParams, GeometryProvider,
};
use photon_core::device::error::format_bytes;
use photon_core::device::kernel::LoadState;
use photon_core::device::{
    BuildError, Device, DeviceConfig, DeviceError, DeviceId, DeviceInfo, DeviceQueue, DeviceStats,
    DeviceType, KernelArgs, KernelFeatures, KernelProgram, KernelVariant, MemoryDescriptor,
    MemoryType, ProfileEvent, Profiler, Progress,
};
use photon_core::interop::GraphicsApi;
use photon_core::math::Aabb;
use photon_core::Stopwatch;
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// Oldest supported CUDA compute capability.
pub const MIN_COMPUTE_CAPABILITY: (u32, u32) = (3, 0);

const TROUBLESHOOTING_HINT: &str =
    "Refer to the GPU rendering troubleshooting section of the user manual for possible solutions";

/// Mapped host memory limit for a machine with `total_ram` bytes:
/// half the RAM, and never the last 4 GiB.
pub fn map_host_limit_for(total_ram: u64) -> u64 {
    (total_ram / 2).min(total_ram.saturating_sub(4 << 30))
}

fn system_map_host_limit() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    map_host_limit_for(system.total_memory())
}

#[derive(Debug, Default)]
struct StickyError {
    message: String,
    hinted: bool,
}

/// A kernel module loaded into the driver.
#[derive(Debug)]
pub(crate) struct LoadedModule {
    variant: KernelVariant,
    module: ModuleId,
    artifact: KernelArtifact,
}

/// Everything guarded by the context lock.
#[derive(Debug)]
pub(crate) struct GpuState {
    memory: MemoryMap,
    modules: Vec<LoadedModule>,
}

/// Holds the context lock with the driver context current.
pub(crate) struct ContextScope<'a> {
    state: MutexGuard<'a, GpuState>,
    driver: &'a dyn GpuDriver,
}

impl Deref for ContextScope<'_> {
    type Target = GpuState;

    fn deref(&self) -> &GpuState {
        &self.state
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut GpuState {
        &mut self.state
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.driver.context_pop();
    }
}

/// Acceleration structure owned by a GPU device.
#[derive(Debug)]
pub enum GpuAccel {
    /// Software BVH2 uploaded to device memory.
    Software {
        /// Host copy, kept for refits.
        accel: SoftwareAccel,
        /// Device copy.
        storage: RawPtr,
        /// Bytes of `storage`.
        size: u64,
    },
    /// Hardware structure.
    Hardware(HwAccel),
    /// Motion nodes a hardware refit replaced. Only ever sits in the
    /// deferred-free queue.
    MotionNodes(MotionNodes),
}

/// Everything a [`GpuDevice`] is made from.
#[derive(Debug, Clone)]
pub struct GpuDeviceDesc {
    /// Description of the device.
    pub info: DeviceInfo,
    /// Backend driver.
    pub driver: Arc<dyn GpuDriver>,
    /// Configuration.
    pub config: DeviceConfig,
    /// Kernel modules to load.
    pub program: KernelProgram,
    /// Compiler producing the modules.
    pub compiler: Arc<dyn KernelCompiler>,
    /// Overrides the mapped host memory limit derived from system RAM.
    pub map_host_limit: Option<u64>,
}

pub(crate) struct GpuDeviceInternal {
    id: DeviceId,
    info: DeviceInfo,
    config: DeviceConfig,
    driver: Arc<dyn GpuDriver>,
    stats: Arc<DeviceStats>,
    profiler: Arc<dyn Profiler>,
    hardware_rt: bool,
    state: Mutex<GpuState>,
    error: Mutex<StickyError>,
    program: KernelProgram,
    resolver: KernelResolver,
    accels: AccelManager<GpuAccel>,
    epochs: QueueEpochs,
}

impl fmt::Debug for GpuDeviceInternal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuDeviceInternal")
            .field("id", &self.id)
            .field("device", &self.info.description)
            .field("driver", &self.driver.name())
            .field("hardware_rt", &self.hardware_rt)
            .finish_non_exhaustive()
    }
}

impl GpuDeviceInternal {
    fn context(&self) -> Result<ContextScope<'_>, DeviceError> {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.driver
            .context_push()
            .map_err(|err| self.fail_setup(format!("Failed to make the device context current: {err}")))?;
        Ok(ContextScope {
            state,
            driver: &*self.driver,
        })
    }

    fn error_message(&self) -> String {
        self.error
            .lock()
            .map(|e| e.message.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().message.clone())
    }

    /// Rejects driver work once a sticky error is set. Freeing stays allowed
    /// so a faulted device can still be torn down.
    pub(crate) fn check_faulted(&self) -> Result<(), DeviceError> {
        let message = self.error_message();
        if message.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::DeviceFaulted(message))
        }
    }

    fn set_error(&self, message: &str) {
        let mut error = self.error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log::error!("GpuDevice: {message}");
        if !error.hinted {
            log::error!("GpuDevice: {TROUBLESHOOTING_HINT}");
            error.hinted = true;
        }
        error.message = message.to_string();
    }

    fn fail_setup(&self, message: String) -> DeviceError {
        self.set_error(&message);
        DeviceError::Setup(message)
    }

    fn fail(&self, err: DeviceError) -> DeviceError {
        self.set_error(&err.to_string());
        err
    }

    fn mem_alloc(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        if matches!(mem.mem_type, MemoryType::Texture | MemoryType::Global) {
            return Err(DeviceError::InvalidMemoryType {
                operation: "mem_alloc",
                mem_type: mem.mem_type,
            });
        }
        let mut ctx = self.context()?;
        if !mem.device_pointer.is_null() {
            self.generic_free(&mut ctx, mem);
        }
        let size = mem.memory_size() as u64;
        self.generic_alloc(&mut ctx, mem, size)
    }

    fn mem_copy_to(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        if !mem.is_resident(self.id) {
            log::debug!("GpuDevice: '{}' is resident elsewhere, not copying", mem.name);
            return Ok(());
        }
        let mut ctx = self.context()?;
        match mem.mem_type {
            MemoryType::Global => {
                self.generic_free(&mut ctx, mem);
                self.global_alloc(&mut ctx, mem)
            }
            MemoryType::Texture => {
                self.generic_free(&mut ctx, mem);
                self.tex_alloc(&mut ctx, mem)
            }
            _ => {
                let size = mem.memory_size() as u64;
                if !mem.device_pointer.is_null() && mem.device_size != size {
                    self.generic_free(&mut ctx, mem);
                }
                if mem.device_pointer.is_null() {
                    self.generic_alloc(&mut ctx, mem, size)?;
                }
                self.generic_copy_to(&ctx, mem)
            }
        }
    }

    fn mem_copy_from(
        &self,
        mem: &mut MemoryDescriptor,
        y: usize,
        w: usize,
        h: usize,
        elem: usize,
    ) -> Result<(), DeviceError> {
        self.check_faulted()?;
        if mem.mem_type == MemoryType::Texture {
            return Err(DeviceError::InvalidMemoryType {
                operation: "mem_copy_from",
                mem_type: mem.mem_type,
            });
        }
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
        let ctx = self.context()?;
        let raw = self.raw_pointer(&ctx, mem.device_pointer)?;
        let name = mem.name.clone();
        self.driver
            .memcpy_dtoh(&mut mem.host_mut()[offset..offset + size], raw.offset(offset as u64))
            .map_err(|err| self.fail_setup(format!("Failed to copy '{name}' from device: {err}")))
    }

    fn mem_zero(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        if mem.device_pointer.is_null() {
            self.mem_alloc(mem)?;
        }
        let ctx = self.context()?;
        let raw = self.raw_pointer(&ctx, mem.device_pointer)?;
        self.driver
            .memset(raw, 0, mem.device_size)
            .map_err(|err| self.fail_setup(format!("Failed to zero '{}': {err}", mem.name)))
    }

    fn mem_free(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        if !mem.is_resident(self.id) {
            log::debug!("GpuDevice: '{}' is resident elsewhere, not freeing", mem.name);
            return Ok(());
        }
        let mut ctx = self.context()?;
        self.generic_free(&mut ctx, mem);
        Ok(())
    }

    fn const_copy_to(&self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let ctx = self.context()?;
        if ctx.modules.is_empty() {
            return Err(DeviceError::KernelsNotLoaded);
        }
        let mut found = false;
        for loaded in &ctx.modules {
            let Some(field) = loaded.variant.params.get(name) else {
                continue;
            };
            if field.size != data.len() {
                log::error!(
                    "GpuDevice: parameter '{name}' is {} bytes, got {}",
                    field.size,
                    data.len()
                );
                return Err(DeviceError::ParamSizeMismatch {
                    name: name.to_string(),
                    expected: field.size,
                    actual: data.len(),
                });
            }
            self.driver
                .const_write(loaded.module, field.offset, data)
                .map_err(|err| self.fail_setup(format!("Failed to write parameter '{name}': {err}")))?;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(DeviceError::UnknownParam(name.to_string()))
        }
    }

    fn load_kernels(&self, features: KernelFeatures) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let (major, minor) = self.driver.compute_capability();
        if self.info.device_type.family() == DeviceType::Cuda && (major, minor) < MIN_COMPUTE_CAPABILITY {
            return Err(self.fail_setup(format!(
                "{}: unsupported compute capability {major}.{minor}, {}.{} or newer is required",
                self.info.description, MIN_COMPUTE_CAPABILITY.0, MIN_COMPUTE_CAPABILITY.1
            )));
        }

        let mut ctx = self.context()?;
        if !ctx.modules.is_empty() {
            if ctx.modules.iter().all(|m| m.artifact.covers(features)) {
                return Ok(());
            }
            let err = DeviceError::KernelReloadUnsupported;
            log::error!("GpuDevice: {err}");
            return Err(err);
        }

        let arch = self.driver.architecture();
        let mut loaded = Vec::with_capacity(self.program.variants.len());
        for variant in &self.program.variants {
            match self.load_variant(variant, &arch, features) {
                Ok(module) => loaded.push(module),
                Err(err) => {
                    for module in loaded {
                        self.driver.module_unload(module.module);
                    }
                    return Err(self.fail(err));
                }
            }
        }
        ctx.modules = loaded;
        self.bind_globals(&ctx);
        ctx.memory.invalidate_texture_info();
        self.reserve_local_memory(&ctx);
        Ok(())
    }

    fn load_variant(&self, variant: &KernelVariant, arch: &str, features: KernelFeatures) -> Result<LoadedModule, DeviceError> {
        let mut artifact = self
            .resolver
            .resolve(&self.program.source_dir, variant, arch, features)?;
        let image = artifact.read()?;
        let module = self.driver.module_load(&image, &variant.params).map_err(|err| {
            DeviceError::Setup(format!(
                "Failed to load kernel module '{}': {err}",
                artifact.path.display()
            ))
        })?;
        artifact.load_state = LoadState::Loaded;
        log::info!(
            "GpuDevice: loaded '{}' from '{}'",
            variant.name,
            artifact.path.display()
        );
        Ok(LoadedModule {
            variant: variant.clone(),
            module,
            artifact,
        })
    }

    // Launches each reserve kernel once so lazily committed local memory is
    // accounted for before scene data is allocated.
    fn reserve_local_memory(&self, state: &GpuState) {
        let free_before = self.driver.mem_get_info().map(|(free, _)| free).unwrap_or(0);
        let mut launched = false;
        for loaded in &state.modules {
            let Some(kernel) = loaded.variant.reserve_kernel else {
                continue;
            };
            let entry = kernel.entry_point();
            let result = self
                .driver
                .occupancy_block_size(loaded.module, entry)
                .and_then(|block| {
                    self.driver
                        .launch(loaded.module, entry, LaunchDims::cover(1, block), &KernelArgs::new())
                });
            match result {
                Ok(()) => launched = true,
                Err(err) => log::warn!("GpuDevice: reserve launch of {entry} failed: {err}"),
            }
        }
        if !launched {
            return;
        }
        if let Err(err) = self.driver.synchronize() {
            log::warn!("GpuDevice: synchronize after reserve launch failed: {err}");
            return;
        }
        let free_after = self.driver.mem_get_info().map(|(free, _)| free).unwrap_or(0);
        log::info!(
            "GpuDevice: local memory reserved {} ({} free)",
            format_bytes(free_before.saturating_sub(free_after)),
            format_bytes(free_after)
        );
    }

    fn backend(&self) -> GpuAccelBackend<'_> {
        GpuAccelBackend { device: self }
    }
}

impl Drop for GpuDeviceInternal {
    fn drop(&mut self) {
        self.accels.free_all(&self.backend());
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for module in state.modules.drain(..) {
            self.driver.module_unload(module.module);
        }
        self.free_all_memory(&mut state);
        log::debug!("GpuDevice: released '{}'", self.info.description);
    }
}

struct GpuAccelBackend<'a> {
    device: &'a GpuDeviceInternal,
}

impl GpuAccelBackend<'_> {
    fn backend_error(err: DeviceError) -> BuildError {
        match err {
            DeviceError::Build(err) => err,
            other => BuildError::Backend(other.to_string()),
        }
    }

    fn hardware(&self) -> Result<HardwareBuilder<'_>, BuildError> {
        let driver = &*self.device.driver;
        let engine = driver
            .ray_tracing()
            .ok_or_else(|| BuildError::Backend("driver has no ray-tracing engine".into()))?;
        Ok(HardwareBuilder::new(driver, engine))
    }

    fn upload(&self, accel: SoftwareAccel) -> Result<GpuAccel, BuildError> {
        let bytes = accel.to_bytes();
        let size = bytes.len() as u64;
        let driver = &self.device.driver;
        let storage = driver
            .mem_alloc(size.max(1))
            .map_err(|err| BuildError::Backend(format!("BVH storage allocation failed: {err}")))?;
        if let Err(err) = driver.memcpy_htod(storage, &bytes) {
            driver.mem_free(storage);
            return Err(BuildError::Backend(format!("BVH upload failed: {err}")));
        }
        self.device.stats.mem_alloc(size);
        Ok(GpuAccel::Software { accel, storage, size })
    }

    fn reupload(&self, accel: &SoftwareAccel, storage: RawPtr) -> Result<(), BuildError> {
        self.device
            .driver
            .memcpy_htod(storage, &accel.to_bytes())
            .map_err(|err| BuildError::Backend(format!("BVH upload failed: {err}")))
    }

    /// Swaps in an updated structure. The motion nodes it no longer uses are
    /// handed back for deferred freeing.
    fn replace_hardware(&self, hw: &mut HwAccel, updated: HwAccel) -> Option<GpuAccel> {
        let previous = std::mem::replace(hw, updated);
        if previous.motion_nodes.is_empty() && hw.motion_nodes.is_empty() {
            return None;
        }
        self.device.stats.mem_alloc(hw.motion_nodes.size);
        Some(GpuAccel::MotionNodes(previous.motion_nodes))
    }
}

fn geometry_bounds(geometry: &dyn GeometryProvider, params: &BvhParams) -> Result<Aabb, BuildError> {
    let (bounds, _) = primitive_bounds(geometry, params.use_motion)?;
    Ok(bounds.iter().fold(Aabb::INVALID, |acc, b| acc.merge(b)))
}

impl AccelBackend for GpuAccelBackend<'_> {
    type Payload = GpuAccel;

    fn build_bottom(
        &self,
        geometry: &dyn GeometryProvider,
        params: &BvhParams,
        flags: BuildFlags,
        existing: Option<&mut GpuAccel>,
    ) -> Result<BuildOutcome<GpuAccel>, BuildError> {
        let _ctx = self.device.context().map_err(Self::backend_error)?;
        match existing {
            Some(GpuAccel::Software { accel, storage, .. }) => {
                let bounds = accel.refit_bottom(geometry, params)?;
                self.reupload(accel, *storage)?;
                Ok(BuildOutcome::Refit { bounds, retired: None })
            }
            Some(GpuAccel::Hardware(hw)) => {
                let bounds = geometry_bounds(geometry, params)?;
                let updated = self.hardware()?.build_bottom(geometry, params, flags, Some(&*hw))?;
                let retired = self.replace_hardware(hw, updated);
                Ok(BuildOutcome::Refit { bounds, retired })
            }
            Some(GpuAccel::MotionNodes(_)) => Err(BuildError::Backend("retired motion nodes cannot be refit".into())),
            None if self.device.hardware_rt => {
                let hw = self.hardware()?.build_bottom(geometry, params, flags, None)?;
                self.device.stats.mem_alloc(hw.memory_size());
                Ok(BuildOutcome::Built {
                    payload: GpuAccel::Hardware(hw),
                    bounds: geometry_bounds(geometry, params)?,
                    references: Vec::new(),
                })
            }
            None => {
                let (accel, bounds) = SoftwareAccel::build_bottom(geometry, params)?;
                Ok(BuildOutcome::Built {
                    payload: self.upload(accel)?,
                    bounds,
                    references: Vec::new(),
                })
            }
        }
    }

    fn build_top(
        &self,
        resolved: &[ResolvedInstance<'_, GpuAccel>],
        params: &BvhParams,
        flags: BuildFlags,
        existing: Option<&mut GpuAccel>,
    ) -> Result<BuildOutcome<GpuAccel>, BuildError> {
        let _ctx = self.device.context().map_err(Self::backend_error)?;
        let traversable = |payload: &GpuAccel| match payload {
            GpuAccel::Hardware(hw) => Some(hw.traversable),
            GpuAccel::Software { .. } | GpuAccel::MotionNodes(_) => None,
        };
        let world = || {
            resolved
                .iter()
                .fold(Aabb::INVALID, |acc, r| acc.merge(&instance_bounds(&r.bottom_bounds, r.instance)))
        };
        match existing {
            Some(GpuAccel::Software { accel, storage, .. }) => {
                let bounds = accel.refit_top(resolved)?;
                self.reupload(accel, *storage)?;
                Ok(BuildOutcome::Refit { bounds, retired: None })
            }
            Some(GpuAccel::Hardware(hw)) => {
                let updated = self.hardware()?.build_top(resolved, traversable, flags, Some(&*hw))?;
                let retired = self.replace_hardware(hw, updated);
                Ok(BuildOutcome::Refit { bounds: world(), retired })
            }
            Some(GpuAccel::MotionNodes(_)) => Err(BuildError::Backend("retired motion nodes cannot be refit".into())),
            None if self.device.hardware_rt => {
                let hw = self.hardware()?.build_top(resolved, traversable, flags, None)?;
                self.device.stats.mem_alloc(hw.memory_size());
                Ok(BuildOutcome::Built {
                    payload: GpuAccel::Hardware(hw),
                    bounds: world(),
                    references: resolved.iter().map(|r| r.instance.bottom).collect(),
                })
            }
            None => {
                let (accel, bounds, references) = SoftwareAccel::build_top(resolved, params)?;
                Ok(BuildOutcome::Built {
                    payload: self.upload(accel)?,
                    bounds,
                    references,
                })
            }
        }
    }

    fn free(&self, payloads: Vec<GpuAccel>) {
        let _ctx = self.device.context();
        for payload in payloads {
            match payload {
                GpuAccel::Software { storage, size, .. } => {
                    self.device.driver.mem_free(storage);
                    self.device.stats.mem_free(size);
                }
                GpuAccel::Hardware(hw) => {
                    self.device.stats.mem_free(hw.memory_size());
                    hw.free(&*self.device.driver);
                }
                GpuAccel::MotionNodes(nodes) => {
                    self.device.stats.mem_free(nodes.size);
                    nodes.free(&*self.device.driver);
                }
            }
        }
    }
}

/// A GPU device.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    internal: Arc<GpuDeviceInternal>,
}

impl GpuDevice {
    /// Creates a device. Fails when the kernel cache cannot be opened.
    pub fn new(desc: GpuDeviceDesc, stats: Arc<DeviceStats>, profiler: Arc<dyn Profiler>) -> Result<Self, DeviceError> {
        let GpuDeviceDesc {
            mut info,
            driver,
            config,
            program,
            compiler,
            map_host_limit,
        } = desc;

        let options = ResolverOptions::from_config(&config, info.device_type);
        let resolver = KernelResolver::new(info.device_type, compiler, options)?.with_profiler(profiler.clone());

        let engine_layout = driver.ray_tracing().map(|engine| engine.caps().layout);
        let hardware_rt = config.use_hardware_raytracing && info.use_hardware_raytracing && engine_layout.is_some();
        info.bvh_layouts = match engine_layout {
            Some(layout) if hardware_rt => layout.mask(),
            _ => BvhLayoutMask::BVH2,
        };
        info.use_hardware_raytracing = hardware_rt;
        if info.memory_capacity.is_none() {
            info.memory_capacity = driver.mem_get_info().ok().map(|(_, total)| total);
        }

        let map_host_limit = map_host_limit.unwrap_or_else(|| {
            if driver.can_map_host() {
                system_map_host_limit()
            } else {
                0
            }
        });
        let (major, minor) = driver.compute_capability();
        log::info!(
            "GpuDevice: created '{}' on {} ({} {major}.{minor}, {})",
            info.description,
            driver.name(),
            info.device_type,
            if hardware_rt { "hardware ray tracing" } else { "software BVH" }
        );

        Ok(Self {
            internal: Arc::new(GpuDeviceInternal {
                id: DeviceId::next(),
                info,
                config,
                driver,
                stats,
                profiler,
                hardware_rt,
                state: Mutex::new(GpuState {
                    memory: MemoryMap::new(map_host_limit),
                    modules: Vec::new(),
                }),
                error: Mutex::new(StickyError::default()),
                program,
                resolver,
                accels: AccelManager::new(),
                epochs: QueueEpochs::new(),
            }),
        })
    }

    /// The backend driver.
    pub fn driver(&self) -> &Arc<dyn GpuDriver> {
        &self.internal.driver
    }

    /// Kernel resolver, for inspecting compiler and cache state.
    pub fn resolver(&self) -> &KernelResolver {
        &self.internal.resolver
    }

    /// Bytes in device memory and in mapped host memory.
    pub fn memory_usage(&self) -> (u64, u64) {
        let state = self.internal.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (state.memory.device_used, state.memory.map_host_used)
    }

    /// Retired structures waiting for the queues.
    pub fn pending_bvh_frees(&self) -> usize {
        self.internal.accels.pending_frees()
    }

    /// Moves textures and globals to mapped host memory to release `bytes`.
    pub fn move_textures_to_host(&self, bytes: u64) -> Result<u64, DeviceError> {
        let mut ctx = self.internal.context()?;
        Ok(self.internal.move_textures_to_host(&mut ctx, bytes))
    }
}

impl Device for GpuDevice {
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
        self.internal.mem_alloc(mem)
    }

    fn mem_copy_to(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.internal.mem_copy_to(mem)
    }

    fn mem_copy_from(
        &self,
        mem: &mut MemoryDescriptor,
        y: usize,
        w: usize,
        h: usize,
        elem: usize,
    ) -> Result<(), DeviceError> {
        self.internal.mem_copy_from(mem, y, w, h, elem)
    }

    fn mem_zero(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.internal.mem_zero(mem)
    }

    fn mem_free(&self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.internal.mem_free(mem)
    }

    fn const_copy_to(&self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        self.internal.const_copy_to(name, data)
    }

    fn load_kernels(&self, features: KernelFeatures) -> Result<(), DeviceError> {
        self.internal.load_kernels(features)
    }

    fn build_bvh(
        &self,
        request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        refit: bool,
    ) -> Result<BvhHandle, DeviceError> {
        let internal = &self.internal;
        if let Err(err) = internal.check_faulted() {
            progress.set_error(&err.to_string());
            return Err(err);
        }
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
        Ok(Box::new(GpuQueue::new(self.internal.clone())))
    }

    fn check_peer_access(&self, other: &dyn Device) -> bool {
        let Some(peer) = other.as_any().downcast_ref::<GpuDevice>() else {
            return false;
        };
        if peer.id() == self.id() {
            return false;
        }
        if peer.info().device_type.family() != self.info().device_type.family() {
            return false;
        }
        let (a, b) = (&*self.internal.driver, &*peer.internal.driver);
        if !a.can_access_peer(b) || !b.can_access_peer(a) {
            return false;
        }
        for (device, from, to) in [(&self.internal, a, b), (&peer.internal, b, a)] {
            let Ok(_ctx) = device.context() else {
                return false;
            };
            if let Err(err) = from.enable_peer_access(to) {
                device.set_error(&format!("Failed to enable peer access: {err}"));
                return false;
            }
        }
        log::info!(
            "GpuDevice: peer access enabled between '{}' and '{}'",
            self.info().description,
            peer.info().description
        );
        true
    }

    fn should_use_graphics_interop(&self, api: GraphicsApi) -> bool {
        self.internal.info.display_device && self.internal.driver.graphics_interop_supported(api)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
