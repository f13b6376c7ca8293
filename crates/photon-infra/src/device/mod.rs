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

//! Concrete devices and the factory that creates them.
//!
//! Every device implements [`photon_core::Device`]. The CPU device runs
//! host kernels on a task pool; GPU devices share one implementation over
//! the [`gpu::GpuDriver`] seam, fed either by native drivers registered
//! through a [`DriverFactory`] or by the built-in wgpu driver; a
//! [`multi::MultiDevice`] groups several devices and [`dummy::DummyDevice`]
//! stands in for devices that failed to come up.

pub mod accel;
pub mod cpu;
pub mod dummy;
pub mod epoch;
pub mod gpu;
pub mod multi;
pub mod wgpu;

pub use self::cpu::{CpuDevice, CpuDeviceDesc, CpuKernels};
pub use self::dummy::DummyDevice;
pub use self::gpu::{GpuDevice, GpuDeviceDesc};
pub use self::multi::MultiDevice;

use self::gpu::{DriverError, GpuDriver};
use self::wgpu::{device_type_for, WgpuAdapterSelector, WgpuDriver};
use crate::kernel::{KernelCompiler, WgslAssembler};
use anyhow::Context;
use photon_core::device::{
    ComputeAdapterSelector, Device, DeviceConfig, DeviceInfo, DeviceStats, DeviceType, DeviceTypeMask, KernelProgram,
    ParamLayout, Profiler,
};
use std::fmt::Debug;
use std::sync::Arc;

/// Registration seam for native GPU drivers.
///
/// A factory enumerates the devices of one backend and opens a driver for
/// any of them; [`DeviceFactory`] wraps the driver in a [`GpuDevice`].
pub trait DriverFactory: Send + Sync + Debug {
    /// Backend served.
    fn device_type(&self) -> DeviceType;

    /// Devices the driver can open.
    fn enumerate(&self) -> Vec<DeviceInfo>;

    /// Opens the device described by `info`.
    fn open(&self, info: &DeviceInfo) -> Result<Arc<dyn GpuDriver>, DriverError>;
}

/// Kernels of one GPU backend.
#[derive(Debug, Clone)]
struct BackendKernels {
    program: KernelProgram,
    compiler: Arc<dyn KernelCompiler>,
}

#[derive(Debug)]
struct NativeBackend {
    factory: Arc<dyn DriverFactory>,
    kernels: BackendKernels,
}

/// Enumerates and creates devices.
///
/// ## Example
/// ```no_run
/// use photon_core::device::{DeviceConfig, DeviceStats, DeviceTypeMask, NullProfiler};
/// use photon_infra::device::DeviceFactory;
/// use std::sync::Arc;
///
/// let factory = DeviceFactory::new(DeviceConfig::default());
/// let infos = factory.available_devices(DeviceTypeMask::CPU);
/// let device = factory.create(&infos[0], Arc::new(DeviceStats::new()), Arc::new(NullProfiler));
/// println!("{}: {}", device.info().description, device.error_message());
/// ```
#[derive(Debug)]
pub struct DeviceFactory {
    config: DeviceConfig,
    native: Vec<NativeBackend>,
    cpu_kernels: CpuKernels,
    params: ParamLayout,
    wgpu: Option<(WgpuAdapterSelector, BackendKernels)>,
}

impl DeviceFactory {
    /// A factory offering the CPU device only.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            native: Vec::new(),
            cpu_kernels: CpuKernels::new(),
            params: ParamLayout::new(),
            wgpu: None,
        }
    }

    /// Host kernels and the constant-parameter layout they read.
    pub fn with_cpu_kernels(mut self, kernels: CpuKernels, params: ParamLayout) -> Self {
        self.cpu_kernels = kernels;
        self.params = params;
        self
    }

    /// Registers a native driver with the kernels it loads.
    pub fn with_driver(
        mut self,
        factory: Arc<dyn DriverFactory>,
        program: KernelProgram,
        compiler: Arc<dyn KernelCompiler>,
    ) -> Self {
        log::info!("DeviceFactory: registered {} driver", factory.device_type());
        self.native.push(NativeBackend {
            factory,
            kernels: BackendKernels { program, compiler },
        });
        self
    }

    /// Enables Vulkan, Metal and Direct3D 12 devices through wgpu, running
    /// the WGSL modules of `program`.
    pub fn with_wgpu(mut self, program: KernelProgram) -> Self {
        let kernels = BackendKernels {
            program,
            compiler: Arc::new(WgslAssembler::new()),
        };
        self.wgpu = Some((WgpuAdapterSelector::with_default_instance(), kernels));
        self
    }

    /// The configuration devices are created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Devices of the types in `mask` that the configuration allows.
    pub fn available_devices(&self, mask: DeviceTypeMask) -> Vec<DeviceInfo> {
        let mask = mask & self.config.device_mask;
        let mut devices = Vec::new();
        if mask.contains(DeviceTypeMask::CPU) {
            devices.push(cpu::cpu_device_info(self.config.cpu_threads));
        }
        for backend in &self.native {
            if mask.intersects(backend.factory.device_type().mask()) {
                devices.extend(backend.factory.enumerate());
            }
        }
        if let Some((selector, _)) = &self.wgpu {
            match pollster::block_on(selector.list_adapters(mask)) {
                Ok(found) => devices.extend(found),
                Err(err) => log::warn!("DeviceFactory: wgpu enumeration failed: {err}"),
            }
        }
        devices
    }

    /// Creates the device described by `info`.
    ///
    /// Never fails: a device that cannot be created comes back as a
    /// [`DummyDevice`] whose error message says why.
    pub fn create(&self, info: &DeviceInfo, stats: Arc<DeviceStats>, profiler: Arc<dyn Profiler>) -> Arc<dyn Device> {
        match info.device_type {
            DeviceType::Multi => {
                let subs = info
                    .multi_devices
                    .iter()
                    .map(|sub| self.create(sub, stats.clone(), profiler.clone()))
                    .collect();
                Arc::new(MultiDevice::new(subs, stats))
            }
            DeviceType::Cpu => {
                let desc = CpuDeviceDesc {
                    info: info.clone(),
                    config: self.config.clone(),
                    kernels: self.cpu_kernels.clone(),
                    params: self.params.clone(),
                };
                Arc::new(CpuDevice::new(desc, stats, profiler))
            }
            DeviceType::Dummy => Arc::new(DummyDevice::new(info.clone(), stats, "No devices available")),
            device_type => match self.create_gpu(info, stats.clone(), profiler) {
                Ok(device) => Arc::new(device),
                Err(err) => {
                    let message = match err {
                        CreateError::NotBuilt => format!("{device_type} support is not available in this build"),
                        CreateError::Failed(err) => format!("{err:#}"),
                    };
                    Arc::new(DummyDevice::new(info.clone(), stats, message))
                }
            },
        }
    }

    fn create_gpu(
        &self,
        info: &DeviceInfo,
        stats: Arc<DeviceStats>,
        profiler: Arc<dyn Profiler>,
    ) -> Result<GpuDevice, CreateError> {
        let (driver, kernels) = if let Some(backend) = self
            .native
            .iter()
            .find(|backend| backend.factory.device_type() == info.device_type)
        {
            let driver = backend
                .factory
                .open(info)
                .with_context(|| format!("Failed to open {} device '{}'", info.device_type, info.description))?;
            (driver, &backend.kernels)
        } else if let Some((selector, kernels)) = self.wgpu.as_ref().filter(|_| is_wgpu_type(info.device_type)) {
            let driver: Arc<dyn GpuDriver> = Arc::new(self.open_wgpu(selector, info)?);
            (driver, kernels)
        } else {
            return Err(CreateError::NotBuilt);
        };

        let desc = GpuDeviceDesc {
            info: info.clone(),
            driver,
            config: self.config.clone(),
            program: kernels.program.clone(),
            compiler: kernels.compiler.clone(),
            map_host_limit: None,
        };
        GpuDevice::new(desc, stats, profiler)
            .with_context(|| format!("Failed to create {} device '{}'", info.device_type, info.description))
            .map_err(CreateError::Failed)
    }

    fn open_wgpu(&self, selector: &WgpuAdapterSelector, info: &DeviceInfo) -> anyhow::Result<WgpuDriver> {
        let adapters = pollster::block_on(selector.adapters(info.device_type.mask()));
        let adapter = adapters
            .iter()
            .filter(|adapter| device_type_for(adapter.get_info().backend) == Some(info.device_type))
            .nth(info.num)
            .with_context(|| format!("Adapter '{}' is no longer available", info.description))?;
        pollster::block_on(WgpuDriver::new(adapter, self.config.memory_budget))
    }
}

fn is_wgpu_type(device_type: DeviceType) -> bool {
    matches!(device_type, DeviceType::Vulkan | DeviceType::Dx12 | DeviceType::Metal)
}

enum CreateError {
    NotBuilt,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for CreateError {
    fn from(err: anyhow::Error) -> Self {
        CreateError::Failed(err)
    }
}
