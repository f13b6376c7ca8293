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

//! A device that failed to come up.

use photon_core::bvh::{AccelState, BvhBuildRequest, BvhHandle};
use photon_core::device::{
    Device, DeviceError, DeviceId, DeviceInfo, DeviceQueue, DeviceStats, KernelFeatures, MemoryDescriptor, Progress,
};
use std::any::Any;
use std::sync::Arc;

/// Stands in for a device that could not be created.
///
/// The device is in the error state from the start and refuses every
/// operation with its creation message, so the session reports the failure
/// through the same sticky-error path as any other device.
#[derive(Debug)]
pub struct DummyDevice {
    id: DeviceId,
    info: DeviceInfo,
    stats: Arc<DeviceStats>,
    message: String,
}

impl DummyDevice {
    /// Creates a failed device carrying `message`.
    pub fn new(info: DeviceInfo, stats: Arc<DeviceStats>, message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("DummyDevice: '{}' unavailable: {message}", info.description);
        Self {
            id: DeviceId::next(),
            info,
            stats,
            message,
        }
    }

    fn refuse(&self) -> DeviceError {
        DeviceError::DeviceFaulted(self.message.clone())
    }
}

impl Device for DummyDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stats(&self) -> &Arc<DeviceStats> {
        &self.stats
    }

    fn error_message(&self) -> String {
        self.message.clone()
    }

    fn set_error(&self, message: &str) {
        log::error!("DummyDevice: {message}");
    }

    fn mem_alloc(&self, _mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        Err(self.refuse())
    }

    fn mem_copy_to(&self, _mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        Err(self.refuse())
    }

    fn mem_copy_from(
        &self,
        _mem: &mut MemoryDescriptor,
        _y: usize,
        _w: usize,
        _h: usize,
        _elem: usize,
    ) -> Result<(), DeviceError> {
        Err(self.refuse())
    }

    fn mem_zero(&self, _mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        Err(self.refuse())
    }

    fn mem_free(&self, _mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        Ok(())
    }

    fn const_copy_to(&self, _name: &str, _data: &[u8]) -> Result<(), DeviceError> {
        Err(self.refuse())
    }

    fn load_kernels(&self, _features: KernelFeatures) -> Result<(), DeviceError> {
        Err(DeviceError::Setup(self.message.clone()))
    }

    fn build_bvh(
        &self,
        _request: BvhBuildRequest<'_>,
        progress: &dyn Progress,
        _refit: bool,
    ) -> Result<BvhHandle, DeviceError> {
        progress.set_error(&self.message);
        Err(self.refuse())
    }

    fn release_bvh(&self, _handle: BvhHandle) -> Result<(), DeviceError> {
        Ok(())
    }

    fn bvh_state(&self, _handle: BvhHandle) -> Option<AccelState> {
        None
    }

    fn flush_deferred_frees(&self) -> usize {
        0
    }

    fn queue_create(&self) -> Result<Box<dyn DeviceQueue>, DeviceError> {
        Err(self.refuse())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_core::device::{DataType, DeviceType, MemoryType};

    #[test]
    fn starts_in_error_state() {
        let device = DummyDevice::new(
            DeviceInfo::new(DeviceType::Cuda, "missing", 0),
            Arc::new(DeviceStats::new()),
            "CUDA support is not available in this build",
        );
        assert!(device.have_error());
        assert!(device.error_message().contains("CUDA"));

        let mut mem = MemoryDescriptor::new("buf", MemoryType::ReadWrite, DataType::Float, 1);
        assert!(matches!(device.mem_alloc(&mut mem), Err(DeviceError::DeviceFaulted(_))));
        assert!(device.mem_free(&mut mem).is_ok());
        assert!(matches!(
            device.load_kernels(KernelFeatures::all()),
            Err(DeviceError::Setup(_))
        ));
        assert!(device.queue_create().is_err());
    }
}
