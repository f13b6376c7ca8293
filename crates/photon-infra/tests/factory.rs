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

mod common;

use common::{kernel_tree, program, MockCompiler, MockDriver};
use photon_core::device::{
    DeviceConfig, DeviceInfo, DeviceStats, DeviceType, DeviceTypeMask, KernelFeatures, NullProfiler,
};
use photon_infra::device::gpu::{DriverError, GpuDriver};
use photon_infra::device::{DriverFactory, GpuDevice};
use photon_infra::DeviceFactory;
use std::sync::Arc;

const MIB: u64 = 1 << 20;

#[derive(Debug)]
struct MockFactory {
    broken: bool,
}

impl DriverFactory for MockFactory {
    fn device_type(&self) -> DeviceType {
        DeviceType::Hip
    }

    fn enumerate(&self) -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::new(DeviceType::Hip, "Mock HIP 0", 0),
            DeviceInfo::new(DeviceType::Hip, "Mock HIP 1", 1),
        ]
    }

    fn open(&self, _info: &DeviceInfo) -> Result<Arc<dyn GpuDriver>, DriverError> {
        if self.broken {
            return Err(DriverError::DeviceLost);
        }
        Ok(Arc::new(MockDriver::new(DeviceType::Hip, 64 * MIB)))
    }
}

fn factory(broken: bool) -> (DeviceFactory, tempfile::TempDir, tempfile::TempDir) {
    let source = kernel_tree();
    let cache = tempfile::tempdir().unwrap();
    let config = DeviceConfig {
        kernel_cache_dir: cache.path().to_path_buf(),
        ..DeviceConfig::default()
    };
    let factory = DeviceFactory::new(config).with_driver(
        Arc::new(MockFactory { broken }),
        program(&source),
        Arc::new(MockCompiler::default()),
    );
    (factory, source, cache)
}

#[test]
fn registered_driver_devices_are_listed() {
    let (factory, _source, _cache) = factory(false);
    let hip = factory.available_devices(DeviceTypeMask::HIP);
    assert_eq!(hip.len(), 2);
    assert!(hip.iter().all(|d| d.device_type == DeviceType::Hip));

    let cpu_only = factory.available_devices(DeviceTypeMask::CPU);
    assert!(cpu_only.iter().all(|d| d.device_type == DeviceType::Cpu));
}

#[test]
fn registered_driver_creates_gpu_devices() {
    let (factory, _source, _cache) = factory(false);
    let info = &factory.available_devices(DeviceTypeMask::HIP)[0];
    let device = factory.create(info, Arc::new(DeviceStats::new()), Arc::new(NullProfiler));
    assert!(device.as_any().downcast_ref::<GpuDevice>().is_some());
    assert!(!device.have_error());
    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();
}

#[test]
fn driver_that_fails_to_open_yields_dummy() {
    let (factory, _source, _cache) = factory(true);
    let info = DeviceInfo::new(DeviceType::Hip, "Mock HIP 0", 0);
    let device = factory.create(&info, Arc::new(DeviceStats::new()), Arc::new(NullProfiler));
    assert!(device.have_error());
    let message = device.error_message();
    assert!(message.contains("Failed to open HIP device 'Mock HIP 0'"), "{message}");
    assert!(device.queue_create().is_err());
}

#[test]
fn peer_access_between_mock_gpus() {
    let (factory, _source, _cache) = factory(false);
    let infos = factory.available_devices(DeviceTypeMask::HIP);
    let stats = Arc::new(DeviceStats::new());
    let a = factory.create(&infos[0], stats.clone(), Arc::new(NullProfiler));
    let b = factory.create(&infos[1], stats, Arc::new(NullProfiler));
    assert!(a.check_peer_access(b.as_ref()));
    assert!(!a.check_peer_access(a.as_ref()));
}
