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

//! The ordered command stream bound to one device.

use super::error::DeviceError;
use super::info::DeviceId;
use super::kernel::{DeviceKernel, KernelArgs};
use super::memory::MemoryDescriptor;
use super::progress::Progress;
use crate::interop::DeviceGraphicsInterop;

/// Lifecycle of a queue. `Error` is sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Nothing in flight.
    Idle,
    /// Work enqueued since the last synchronize.
    Busy,
    /// A launch or synchronize failed.
    Error,
}

/// An ordered stream of launches and copies on one device.
///
/// Work enqueued on the same queue executes in FIFO order. A queue is used by
/// one thread at a time; different queues of the same device may be driven
/// from different threads.
pub trait DeviceQueue: Send {
    /// The device this queue submits to.
    fn device_id(&self) -> DeviceId;

    /// Prepares the device for the first launch of a batch.
    ///
    /// Uploads pending texture-info tables.
    fn init_execution(&mut self) -> Result<(), DeviceError>;

    /// Enqueues `kernel` over `work_size` work items.
    ///
    /// ## Errors
    /// [`DeviceError::DeviceFaulted`] if the device already has an error, in which
    /// case the backend is not touched. [`DeviceError::Dispatch`] if the launch
    /// fails; the failure also becomes the device's sticky error.
    fn enqueue(
        &mut self,
        kernel: DeviceKernel,
        work_size: usize,
        args: &KernelArgs,
    ) -> Result<(), DeviceError>;

    /// Blocks until everything enqueued so far has completed.
    fn synchronize(&mut self) -> Result<(), DeviceError>;

    /// Queue-ordered zero fill of the device copy.
    fn zero_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Queue-ordered host to device copy.
    fn copy_to_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Queue-ordered device to host copy.
    fn copy_from_device(&mut self, mem: &mut MemoryDescriptor) -> Result<(), DeviceError>;

    /// Current state.
    fn state(&self) -> QueueState;

    /// An interop object for zero-copy display, if the device supports it.
    fn graphics_interop_create(&mut self) -> Option<Box<dyn DeviceGraphicsInterop>> {
        None
    }
}

/// One entry of a batch passed to [`execute_batches`].
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    /// Kernel to run.
    pub kernel: DeviceKernel,
    /// Work items.
    pub work_size: usize,
    /// Arguments.
    pub args: KernelArgs,
}

impl KernelLaunch {
    /// Creates a launch.
    pub fn new(kernel: DeviceKernel, work_size: usize, args: KernelArgs) -> Self {
        Self {
            kernel,
            work_size,
            args,
        }
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every launch was enqueued and the queue drained.
    Completed {
        /// Launches enqueued.
        launched: usize,
    },
    /// Cancellation was observed between launches; the queue still drained.
    Cancelled {
        /// Launches enqueued before the cancel.
        launched: usize,
    },
}

/// Runs `launches` in order on `queue`.
///
/// The cancel flag is checked between launches, never during one. The queue is
/// always synchronized before returning, even when a launch fails.
pub fn execute_batches(
    queue: &mut dyn DeviceQueue,
    progress: &dyn Progress,
    launches: &[KernelLaunch],
) -> Result<BatchOutcome, DeviceError> {
    queue.init_execution()?;

    let mut launched = 0;
    let mut cancelled = false;
    let mut failure = None;
    for launch in launches {
        if progress.get_cancel() {
            cancelled = true;
            break;
        }
        if let Err(err) = queue.enqueue(launch.kernel, launch.work_size, &launch.args) {
            failure = Some(err);
            break;
        }
        launched += 1;
    }

    let sync = queue.synchronize();
    if let Some(err) = failure {
        return Err(err);
    }
    sync?;

    if cancelled {
        log::debug!("DeviceQueue: batch cancelled after {launched} launches");
        Ok(BatchOutcome::Cancelled { launched })
    } else {
        Ok(BatchOutcome::Completed { launched })
    }
}
