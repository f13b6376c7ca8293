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

use super::driver::LaunchDims;
use super::interop::GpuGraphicsInterop;
use super::GpuDeviceInternal;
use crate::device::epoch::QueueTicket;
use photon_core::device::kernel::{launch_route, LaunchRoute};
use photon_core::device::{
    DeviceError, DeviceId, DeviceKernel, DevicePtr, DeviceQueue, KernelArgs, MemoryDescriptor, ProfileEvent,
    QueueState,
};
use photon_core::interop::DeviceGraphicsInterop;
use photon_core::Stopwatch;
use std::sync::Arc;

/// A queue on a [`super::GpuDevice`].
///
/// Launches go through the device's driver stream; every launch takes an epoch
/// so retired acceleration structures outlive the work that may read them.
#[derive(Debug)]
pub struct GpuQueue {
    device: Arc<GpuDeviceInternal>,
    ticket: QueueTicket,
    state: QueueState,
}

impl GpuQueue {
    pub(crate) fn new(device: Arc<GpuDeviceInternal>) -> Self {
        let ticket = device.epochs.register();
        Self {
            device,
            ticket,
            state: QueueState::Idle,
        }
    }

    fn check_faulted(&mut self) -> Result<(), DeviceError> {
        let result = self.device.check_faulted();
        if result.is_err() {
            self.state = QueueState::Error;
        }
        result
    }

    fn fail(&mut self, message: String) -> DeviceError {
        self.device.set_error(&message);
        self.state = QueueState::Error;
        DeviceError::Dispatch(message)
    }
}

impl DeviceQueue for GpuQueue {
    fn device_id(&self) -> DeviceId {
        self.device.id
    }

    fn init_execution(&mut self) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let mut ctx = self.device.context()?;
        self.device.upload_texture_info(&mut ctx)
    }

    fn enqueue(&mut self, kernel: DeviceKernel, work_size: usize, args: &KernelArgs) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let device = self.device.clone();

        let result = {
            let ctx = device.context()?;
            let loaded = ctx
                .modules
                .iter()
                .find(|m| m.variant.kernels.contains(&kernel))
                .ok_or(DeviceError::KernelsNotLoaded)?;
            let args = args.map_pointers(|ptr| {
                ctx.memory
                    .resolve(ptr)
                    .map(|raw| DevicePtr(raw.0))
                    .ok_or(DeviceError::InvalidPointer(ptr.0))
            })?;

            device.epochs.submit(self.ticket);
            let entry = kernel.entry_point();
            match launch_route(kernel) {
                LaunchRoute::RayTracing { pipeline, raygen } if device.hardware_rt => device
                    .driver
                    .launch_ray_tracing(loaded.module, pipeline, raygen, work_size, &args),
                _ => device
                    .driver
                    .occupancy_block_size(loaded.module, entry)
                    .and_then(|block| {
                        device
                            .driver
                            .launch(loaded.module, entry, LaunchDims::cover(work_size, block), &args)
                    }),
            }
        };

        if let Err(err) = result {
            return Err(self.fail(format!("{} failed: {err}", kernel.entry_point())));
        }
        device.profiler.record(ProfileEvent::KernelLaunch {
            device: device.id,
            kernel,
            work_size,
        });
        self.state = QueueState::Busy;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let device = self.device.clone();
        let timer = Stopwatch::new();
        let result = {
            let _ctx = device.context()?;
            device.driver.synchronize()
        };
        if let Err(err) = result {
            return Err(self.fail(format!("Synchronize failed: {err}")));
        }
        device.epochs.complete(self.ticket);
        device.profiler.record(ProfileEvent::Synchronize {
            device: device.id,
            elapsed: timer.elapsed().unwrap_or_default(),
        });
        let reclaimed = device.accels.reclaim(&device.backend(), &device.epochs);
        if reclaimed > 0 {
            log::debug!("GpuQueue: reclaimed {reclaimed} retired acceleration structures");
        }
        self.state = QueueState::Idle;
        Ok(())
    }

    fn zero_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        self.device.mem_zero(mem)
    }

    fn copy_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        self.device.mem_copy_to(mem)
    }

    fn copy_from_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let (width, elem) = (mem.data_size(), mem.element_size());
        self.device.mem_copy_from(mem, 0, width, 1, elem)
    }

    fn state(&self) -> QueueState {
        self.state
    }

    fn graphics_interop_create(&mut self) -> Option<Box<dyn DeviceGraphicsInterop>> {
        GpuGraphicsInterop::new(self.device.clone()).map(|interop| Box::new(interop) as Box<dyn DeviceGraphicsInterop>)
    }
}

impl Drop for GpuQueue {
    fn drop(&mut self) {
        let device = self.device.clone();
        if self.state != QueueState::Idle {
            let drained = device.check_faulted().and_then(|()| {
                let _ctx = device.context()?;
                device
                    .driver
                    .synchronize()
                    .map_err(|err| DeviceError::Dispatch(format!("Synchronize failed: {err}")))
            });
            if let Err(err) = drained {
                // The ticket stays pending, so nothing it may still read is reclaimed before teardown.
                log::warn!("GpuQueue: dropped with unfinished work: {err}");
                return;
            }
        }
        device.epochs.unregister(self.ticket);
        device.accels.reclaim(&device.backend(), &device.epochs);
    }
}
