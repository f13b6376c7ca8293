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

use super::kernel::CpuKernelContext;
use super::CpuDevice;
use crate::device::epoch::QueueTicket;
use photon_core::device::{
    Device, DeviceError, DeviceId, DeviceKernel, DeviceQueue, KernelArgs, MemoryDescriptor, ProfileEvent, QueueState,
};
use photon_core::Stopwatch;
use std::sync::{Arc, Mutex};

/// A queue on a [`CpuDevice`].
///
/// Launches run to completion on the device's task pool before `enqueue`
/// returns, so `synchronize` only retires the epoch.
#[derive(Debug)]
pub struct CpuQueue {
    device: CpuDevice,
    ticket: QueueTicket,
    state: QueueState,
}

impl CpuQueue {
    pub(super) fn new(device: CpuDevice) -> Self {
        let ticket = device.internal.epochs.register();
        Self {
            device,
            ticket,
            state: QueueState::Idle,
        }
    }

    fn check_faulted(&mut self) -> Result<(), DeviceError> {
        let message = self.device.error_message();
        if message.is_empty() {
            return Ok(());
        }
        self.state = QueueState::Error;
        Err(DeviceError::DeviceFaulted(message))
    }

    fn fail(&mut self, message: String) -> DeviceError {
        self.device.set_error(&message);
        self.state = QueueState::Error;
        DeviceError::Dispatch(message)
    }
}

impl DeviceQueue for CpuQueue {
    fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    fn init_execution(&mut self) -> Result<(), DeviceError> {
        self.check_faulted()
    }

    fn enqueue(&mut self, kernel: DeviceKernel, work_size: usize, args: &KernelArgs) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let internal = self.device.internal.clone();

        let params = {
            let loaded = internal.loaded();
            if loaded.features.is_none() {
                return Err(DeviceError::KernelsNotLoaded);
            }
            loaded.params.clone()
        };
        let Some(f) = internal.kernels.get(kernel).cloned() else {
            return Err(self.fail(format!("{} has no host implementation", kernel.entry_point())));
        };

        internal.epochs.submit(self.ticket);
        let context = Arc::new(CpuKernelContext {
            args: args.clone(),
            memory: internal.memory.clone(),
            params,
            layout: internal.layout.clone(),
        });
        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        {
            let failure = failure.clone();
            internal.pool.parallel_for(
                work_size,
                Arc::new(move |range| {
                    if let Err(err) = f(&context, range) {
                        if let Ok(mut slot) = failure.lock() {
                            slot.get_or_insert(err);
                        }
                    }
                }),
            );
        }

        let failure = failure.lock().map(|mut slot| slot.take()).unwrap_or(None);
        if let Some(err) = failure {
            return Err(self.fail(format!("{} failed: {err}", kernel.entry_point())));
        }
        internal.profiler.record(ProfileEvent::KernelLaunch {
            device: internal.id,
            kernel,
            work_size,
        });
        self.state = QueueState::Busy;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<(), DeviceError> {
        self.check_faulted()?;
        let internal = &self.device.internal;
        let timer = Stopwatch::new();
        internal.epochs.complete(self.ticket);
        internal.profiler.record(ProfileEvent::Synchronize {
            device: internal.id,
            elapsed: timer.elapsed().unwrap_or_default(),
        });
        let reclaimed = internal.accels.reclaim(&internal.backend(), &internal.epochs);
        if reclaimed > 0 {
            log::debug!("CpuQueue: reclaimed {reclaimed} retired acceleration structures");
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
}

impl Drop for CpuQueue {
    fn drop(&mut self) {
        self.device.internal.epochs.unregister(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CpuDeviceDesc, CpuKernels};
    use super::*;
    use photon_core::device::{
        DataType, DeviceConfig, DeviceInfo, DeviceStats, DeviceType, KernelFeatures, MemoryType, NullProfiler,
        ParamLayout,
    };

    fn scale_device() -> CpuDevice {
        let kernels = CpuKernels::new()
            .with(DeviceKernel::FilmConvert, |ctx, range| {
                let buffer = ctx.ptr_arg(0)?;
                let factor = ctx.float_arg(1)?;
                let values: Vec<f32> = ctx.read(buffer.offset((range.start * 4) as u64), range.len())?;
                let scaled: Vec<f32> = values.iter().map(|v| v * factor).collect();
                ctx.write(buffer, range.start, &scaled)
            })
            .with(DeviceKernel::ShaderEvalBackground, |_, _| Err("boom".to_string()));
        let desc = CpuDeviceDesc {
            info: DeviceInfo::new(DeviceType::Cpu, "test cpu", 0),
            config: DeviceConfig {
                cpu_threads: 3,
                ..DeviceConfig::default()
            },
            kernels,
            params: ParamLayout::new(),
        };
        CpuDevice::new(desc, Arc::new(DeviceStats::new()), Arc::new(NullProfiler))
    }

    #[test]
    fn enqueue_runs_over_every_work_item() {
        let device = scale_device();
        device.load_kernels(KernelFeatures::all()).unwrap();
        let mut mem = MemoryDescriptor::from_slice(
            "values",
            MemoryType::ReadWrite,
            DataType::Float,
            1,
            &(0..100).map(|i| i as f32).collect::<Vec<_>>(),
        );
        let mut queue = device.queue_create().unwrap();
        queue.copy_to_device(&mut mem).unwrap();
        let args = KernelArgs::new().ptr(mem.device_pointer).float(2.0);
        queue.enqueue(DeviceKernel::FilmConvert, 100, &args).unwrap();
        queue.synchronize().unwrap();
        queue.copy_from_device(&mut mem).unwrap();
        let values: Vec<f32> = mem.host_to_vec();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[99], 198.0);
        device.mem_free(&mut mem).unwrap();
    }

    #[test]
    fn kernel_failure_becomes_sticky() {
        let device = scale_device();
        device.load_kernels(KernelFeatures::all()).unwrap();
        let mut queue = device.queue_create().unwrap();
        let err = queue.enqueue(DeviceKernel::ShaderEvalBackground, 8, &KernelArgs::new()).unwrap_err();
        assert!(matches!(err, DeviceError::Dispatch(_)));
        assert_eq!(queue.state(), QueueState::Error);

        let mut other = device.queue_create().unwrap();
        let err = other.enqueue(DeviceKernel::FilmConvert, 8, &KernelArgs::new()).unwrap_err();
        assert!(matches!(err, DeviceError::DeviceFaulted(_)));
    }

    #[test]
    fn enqueue_before_load_is_rejected() {
        let device = scale_device();
        let mut queue = device.queue_create().unwrap();
        let err = queue.enqueue(DeviceKernel::FilmConvert, 1, &KernelArgs::new()).unwrap_err();
        assert_eq!(err, DeviceError::KernelsNotLoaded);
        assert!(!device.have_error());
    }
}
