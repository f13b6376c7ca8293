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

//! Scripted GPU driver, ray-tracing engine and compiler shared by the
//! integration tests.

#![allow(dead_code)]

use photon_core::bvh::{BuildFlags, BvhLayout};
use photon_core::device::kernel::RtPipeline;
use photon_core::device::{
    DeviceConfig, DeviceInfo, DeviceKernel, DeviceStats, DeviceType, KernelArgs, KernelProgram, KernelVariant,
    NullProfiler, ParamLayout,
};
use photon_core::interop::GraphicsApi;
use photon_infra::bvh::hardware::{
    AccelBuildInput, AccelBuildOutput, AccelBuildSizes, RayTracingCaps, RayTracingEngine, SrtKey,
};
use photon_infra::device::gpu::driver::{GraphicsResource, TextureDesc, TextureHandle};
use photon_infra::device::gpu::{DriverError, GpuDriver, LaunchDims, ModuleId, RawPtr};
use photon_infra::device::{GpuDevice, GpuDeviceDesc};
use photon_infra::kernel::{CompileRequest, CompilerError, KernelCompiler};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const DEVICE_BASE: u64 = 0x1000_0000;
const HOST_BASE: u64 = 0x7000_0000_0000;
const INTEROP_SIZE: usize = 1 << 20;

#[derive(Debug, Default)]
struct Region {
    bytes: Vec<u8>,
    host: bool,
}

#[derive(Debug, Default)]
struct MockMemory {
    regions: BTreeMap<u64, Region>,
    next_device: u64,
    next_host: u64,
    used: u64,
}

impl MockMemory {
    fn find(&mut self, ptr: RawPtr, len: usize) -> Result<&mut [u8], DriverError> {
        let (base, region) = self
            .regions
            .range_mut(..=ptr.0)
            .next_back()
            .ok_or_else(|| DriverError::InvalidValue(format!("unknown address {ptr}")))?;
        let start = (ptr.0 - base) as usize;
        region
            .bytes
            .get_mut(start..start + len)
            .ok_or_else(|| DriverError::InvalidValue(format!("{len} bytes at {ptr} out of range")))
    }
}

/// Call counters observed by the tests.
#[derive(Debug, Default)]
pub struct Calls {
    pub launches: AtomicUsize,
    pub module_loads: AtomicUsize,
    pub host_allocs: AtomicUsize,
    pub frees: AtomicUsize,
    pub registrations: AtomicUsize,
    pub synchronizes: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// An in-memory GPU.
#[derive(Debug)]
pub struct MockDriver {
    pub device_type: DeviceType,
    pub capacity: u64,
    pub map_host: bool,
    pub compute_capability: (u32, u32),
    pub interop_api: Option<GraphicsApi>,
    pub fail_launches: AtomicBool,
    pub fail_registration: AtomicBool,
    pub fail_synchronize: AtomicBool,
    pub calls: Calls,
    pub engine: Option<MockEngine>,
    memory: Mutex<MockMemory>,
    modules: AtomicUsize,
    textures: Mutex<Vec<(TextureDesc, RawPtr)>>,
    bindings: Mutex<Vec<(String, RawPtr, u64)>>,
}

impl MockDriver {
    pub fn new(device_type: DeviceType, capacity: u64) -> Self {
        Self {
            device_type,
            capacity,
            map_host: false,
            compute_capability: (8, 6),
            interop_api: None,
            fail_launches: AtomicBool::new(false),
            fail_registration: AtomicBool::new(false),
            fail_synchronize: AtomicBool::new(false),
            calls: Calls::default(),
            engine: None,
            memory: Mutex::new(MockMemory {
                next_device: DEVICE_BASE,
                next_host: HOST_BASE,
                ..MockMemory::default()
            }),
            modules: AtomicUsize::new(0),
            textures: Mutex::new(Vec::new()),
            bindings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_map_host(mut self) -> Self {
        self.map_host = true;
        self
    }

    pub fn with_engine(mut self, max_instances: usize) -> Self {
        self.engine = Some(MockEngine {
            max_instances,
            supports_motion: false,
            compacted_size: None,
        });
        self
    }

    /// Lets the engine build SRT motion transforms.
    pub fn with_motion(mut self) -> Self {
        if let Some(engine) = self.engine.as_mut() {
            engine.supports_motion = true;
        }
        self
    }

    /// Makes every build report `size` bytes after compaction.
    pub fn with_compaction(mut self, size: u64) -> Self {
        if let Some(engine) = self.engine.as_mut() {
            engine.compacted_size = Some(size);
        }
        self
    }

    pub fn with_interop(mut self, api: GraphicsApi) -> Self {
        self.interop_api = Some(api);
        self
    }

    pub fn with_compute_capability(mut self, major: u32, minor: u32) -> Self {
        self.compute_capability = (major, minor);
        self
    }

    /// Device bytes currently allocated.
    pub fn used(&self) -> u64 {
        self.memory.lock().unwrap().used
    }

    /// Copy of `len` bytes at `ptr`.
    pub fn read(&self, ptr: RawPtr, len: usize) -> Vec<u8> {
        self.memory.lock().unwrap().find(ptr, len).unwrap().to_vec()
    }

    /// Texture objects created so far with the memory they sample.
    pub fn textures(&self) -> Vec<(TextureDesc, RawPtr)> {
        self.textures.lock().unwrap().clone()
    }

    /// Every binding of the global `name`, oldest first.
    pub fn bound(&self, name: &str) -> Vec<(RawPtr, u64)> {
        self.bindings
            .lock()
            .unwrap()
            .iter()
            .filter(|(bound, ..)| bound == name)
            .map(|(_, ptr, size)| (*ptr, *size))
            .collect()
    }

    /// Live regions, device and host.
    pub fn live_regions(&self) -> usize {
        self.memory.lock().unwrap().regions.len()
    }

    fn region(&self, size: u64, host: bool) -> RawPtr {
        let mut memory = self.memory.lock().unwrap();
        let size = size.max(1);
        let base = if host {
            let base = memory.next_host;
            memory.next_host += size.next_multiple_of(256);
            base
        } else {
            let base = memory.next_device;
            memory.next_device += size.next_multiple_of(256);
            memory.used += size;
            base
        };
        memory.regions.insert(
            base,
            Region {
                bytes: vec![0; size as usize],
                host,
            },
        );
        RawPtr(base)
    }

    fn release(&self, ptr: RawPtr) {
        let mut memory = self.memory.lock().unwrap();
        if let Some(region) = memory.regions.remove(&ptr.0) {
            if !region.host {
                memory.used -= region.bytes.len() as u64;
            }
            self.calls.frees.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl GpuDriver for MockDriver {
    fn backend(&self) -> DeviceType {
        self.device_type
    }

    fn name(&self) -> String {
        "Mock GPU".to_string()
    }

    fn compute_capability(&self) -> (u32, u32) {
        self.compute_capability
    }

    fn architecture(&self) -> String {
        format!("sm_{}{}", self.compute_capability.0, self.compute_capability.1)
    }

    fn mem_get_info(&self) -> Result<(u64, u64), DriverError> {
        let used = self.used();
        Ok((self.capacity.saturating_sub(used), self.capacity))
    }

    fn mem_alloc(&self, size: u64) -> Result<RawPtr, DriverError> {
        if self.used() + size > self.capacity {
            return Err(DriverError::OutOfMemory);
        }
        Ok(self.region(size, false))
    }

    fn mem_free(&self, ptr: RawPtr) {
        self.release(ptr);
    }

    fn can_map_host(&self) -> bool {
        self.map_host
    }

    fn mem_host_alloc(&self, size: u64) -> Result<RawPtr, DriverError> {
        if !self.map_host {
            return Err(DriverError::Unsupported("mapped host memory"));
        }
        self.calls.host_allocs.fetch_add(1, Ordering::SeqCst);
        Ok(self.region(size, true))
    }

    fn mem_host_free(&self, ptr: RawPtr) {
        self.release(ptr);
    }

    fn memcpy_htod(&self, dst: RawPtr, src: &[u8]) -> Result<(), DriverError> {
        let mut memory = self.memory.lock().unwrap();
        memory.find(dst, src.len())?.copy_from_slice(src);
        Ok(())
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: RawPtr) -> Result<(), DriverError> {
        let mut memory = self.memory.lock().unwrap();
        dst.copy_from_slice(memory.find(src, dst.len())?);
        Ok(())
    }

    fn memset(&self, dst: RawPtr, value: u8, size: u64) -> Result<(), DriverError> {
        let mut memory = self.memory.lock().unwrap();
        memory.find(dst, size as usize)?.fill(value);
        Ok(())
    }

    fn module_load(&self, image: &[u8], _params: &ParamLayout) -> Result<ModuleId, DriverError> {
        if image.is_empty() {
            return Err(DriverError::ModuleLoad("empty image".to_string()));
        }
        self.calls.module_loads.fetch_add(1, Ordering::SeqCst);
        Ok(ModuleId(self.modules.fetch_add(1, Ordering::SeqCst) as u32))
    }

    fn module_unload(&self, _module: ModuleId) {}

    fn const_write(&self, _module: ModuleId, _offset: usize, _data: &[u8]) -> Result<(), DriverError> {
        Ok(())
    }

    fn bind_global(&self, _module: ModuleId, name: &str, ptr: RawPtr, size: u64) -> Result<(), DriverError> {
        self.bindings.lock().unwrap().push((name.to_string(), ptr, size));
        Ok(())
    }

    fn texture_create(&self, desc: &TextureDesc, data: RawPtr) -> Result<TextureHandle, DriverError> {
        let mut textures = self.textures.lock().unwrap();
        textures.push((*desc, data));
        Ok(TextureHandle(textures.len() as u64))
    }

    fn launch(&self, _module: ModuleId, entry: &str, _dims: LaunchDims, _args: &KernelArgs) -> Result<(), DriverError> {
        self.calls.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(DriverError::Launch(format!("{entry}: illegal address")));
        }
        Ok(())
    }

    fn launch_ray_tracing(
        &self,
        _module: ModuleId,
        _pipeline: RtPipeline,
        _raygen: u32,
        _work_size: usize,
        _args: &KernelArgs,
    ) -> Result<(), DriverError> {
        self.calls.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DriverError> {
        self.calls.synchronizes.fetch_add(1, Ordering::SeqCst);
        if self.fail_synchronize.load(Ordering::SeqCst) {
            return Err(DriverError::Other("stream timed out".to_string()));
        }
        Ok(())
    }

    fn can_access_peer(&self, other: &dyn GpuDriver) -> bool {
        other.as_any().downcast_ref::<MockDriver>().is_some()
    }

    fn enable_peer_access(&self, _other: &dyn GpuDriver) -> Result<(), DriverError> {
        Ok(())
    }

    fn ray_tracing(&self) -> Option<&dyn RayTracingEngine> {
        self.engine.as_ref().map(|engine| engine as &dyn RayTracingEngine)
    }

    fn graphics_interop_supported(&self, api: GraphicsApi) -> bool {
        self.interop_api == Some(api)
    }

    fn graphics_register(&self, api: GraphicsApi, handle: u64) -> Result<GraphicsResource, DriverError> {
        self.calls.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_registration.load(Ordering::SeqCst) || !self.graphics_interop_supported(api) {
            return Err(DriverError::Other(format!("cannot register buffer {handle}")));
        }
        Ok(GraphicsResource(self.region(INTEROP_SIZE as u64, true).0))
    }

    fn graphics_map(&self, resource: GraphicsResource) -> Result<RawPtr, DriverError> {
        Ok(RawPtr(resource.0))
    }

    fn graphics_unregister(&self, resource: GraphicsResource) {
        self.release(RawPtr(resource.0));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A ray-tracing engine whose structures are plain device buffers.
#[derive(Debug)]
pub struct MockEngine {
    pub max_instances: usize,
    pub supports_motion: bool,
    pub compacted_size: Option<u64>,
}

impl RayTracingEngine for MockEngine {
    fn caps(&self) -> RayTracingCaps {
        RayTracingCaps {
            layout: BvhLayout::Optix,
            max_instances: self.max_instances,
            native_curves: None,
            supports_motion: self.supports_motion,
        }
    }

    fn compute_sizes(&self, _input: &AccelBuildInput, _flags: BuildFlags) -> Result<AccelBuildSizes, DriverError> {
        Ok(AccelBuildSizes {
            output: 1024,
            temp: 256,
            update_temp: 128,
        })
    }

    fn build(
        &self,
        _input: &AccelBuildInput,
        _flags: BuildFlags,
        _update: bool,
        _temp: RawPtr,
        output: RawPtr,
        _output_size: u64,
    ) -> Result<AccelBuildOutput, DriverError> {
        Ok(AccelBuildOutput {
            traversable: output.0,
            compacted_size: self.compacted_size,
        })
    }

    fn compact(&self, _traversable: u64, output: RawPtr, _size: u64) -> Result<u64, DriverError> {
        Ok(output.0)
    }

    fn create_motion_transform(&self, _child: u64, _keys: &[SrtKey], storage: RawPtr) -> Result<u64, DriverError> {
        Ok(storage.0)
    }
}

/// Writes the variant name as the artifact and counts invocations.
#[derive(Debug, Default)]
pub struct MockCompiler {
    invocations: AtomicUsize,
}

impl KernelCompiler for MockCompiler {
    fn identity(&self) -> String {
        "mockcc 1.0".to_string()
    }

    fn artifact_extension(&self) -> &str {
        "bin"
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<(), CompilerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        std::fs::write(request.output, request.variant.name.as_bytes()).map_err(|source| CompilerError::Io {
            compiler: "mockcc".to_string(),
            source,
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

/// A kernel source tree with one file.
pub fn kernel_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("kernel.cu"), "__global__ void film_convert() {}").unwrap();
    dir
}

pub fn program(source: &TempDir) -> KernelProgram {
    KernelProgram {
        source_dir: source.path().to_path_buf(),
        variants: vec![KernelVariant {
            name: "kernel".to_string(),
            kernels: vec![
                DeviceKernel::IntegratorInitFromCamera,
                DeviceKernel::IntegratorIntersectClosest,
                DeviceKernel::FilmConvert,
            ],
            params: ParamLayout::new()
                .field("integrator", 16)
                .field("texture_info", 8)
                .field("lights", 8),
            reserve_kernel: None,
        }],
    }
}

/// A GPU device over a [`MockDriver`] with everything the test needs kept alive.
pub struct Harness {
    pub device: GpuDevice,
    pub driver: Arc<MockDriver>,
    pub compiler: Arc<MockCompiler>,
    pub stats: Arc<DeviceStats>,
    _source: TempDir,
    _cache: TempDir,
}

impl Harness {
    pub fn new(driver: MockDriver) -> Self {
        Self::with_config(driver, |_| {}, |_| {})
    }

    pub fn with_config(
        driver: MockDriver,
        configure: impl FnOnce(&mut DeviceConfig),
        describe: impl FnOnce(&mut DeviceInfo),
    ) -> Self {
        let source = kernel_tree();
        let cache = tempfile::tempdir().unwrap();
        let mut config = DeviceConfig {
            kernel_cache_dir: cache.path().to_path_buf(),
            working_headroom: 0,
            texture_headroom: 0,
            ..DeviceConfig::default()
        };
        configure(&mut config);

        let mut info = DeviceInfo::new(driver.device_type, "Mock GPU", 0);
        info.use_hardware_raytracing = driver.engine.is_some();
        describe(&mut info);

        let driver = Arc::new(driver);
        let compiler = Arc::new(MockCompiler::default());
        let stats = Arc::new(DeviceStats::new());
        let desc = GpuDeviceDesc {
            info,
            driver: driver.clone(),
            config,
            program: program(&source),
            compiler: compiler.clone(),
            map_host_limit: Some(1 << 30),
        };
        let device = GpuDevice::new(desc, stats.clone(), Arc::new(NullProfiler)).unwrap();
        Self {
            device,
            driver,
            compiler,
            stats,
            _source: source,
            _cache: cache,
        }
    }
}
