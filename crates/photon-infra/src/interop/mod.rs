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

//! Presenting render results on a display.
//!
//! A [`PixelDisplay`] decides once, at creation, whether kernels write
//! straight into the display's pixel buffer or into a device buffer that is
//! copied back and uploaded after every frame.

use photon_core::device::{DataType, Device, DeviceError, DevicePtr, DeviceQueue, MemoryDescriptor, MemoryType};
use photon_core::interop::{DeviceGraphicsInterop, DisplayBuffer, DisplayDriver, GraphicsApi};
use std::sync::{Arc, Mutex, MutexGuard};

/// How pixels reach the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteropMode {
    /// Kernels write into the mapped display buffer.
    ZeroCopy,
    /// Kernels write into a device buffer that is read back and uploaded.
    CopyFallback,
}

#[derive(Debug)]
struct DisplayState {
    device: Arc<dyn Device>,
    driver: Box<dyn DisplayDriver>,
    mode: InteropMode,
    interop: Option<Box<dyn DeviceGraphicsInterop>>,
    buffer: Option<DisplayBuffer>,
    pixels: MemoryDescriptor,
    mapped: bool,
}

impl DisplayState {
    fn fall_back(&mut self, reason: &DeviceError) {
        log::warn!("PixelDisplay: graphics interop unavailable, copying pixels instead: {reason}");
        self.interop = None;
        self.mode = InteropMode::CopyFallback;
    }

    fn release_pixels(&mut self) {
        if let Err(err) = self.device.mem_free(&mut self.pixels) {
            log::warn!("PixelDisplay: failed to free pixel buffer: {err}");
        }
    }
}

/// The display end of a render session.
///
/// All methods serialize on an internal lock, so mapping, unmapping and
/// drawing never interleave.
#[derive(Debug)]
pub struct PixelDisplay {
    state: Mutex<DisplayState>,
}

impl PixelDisplay {
    /// Negotiates the interop mode between `device` and `driver`.
    ///
    /// Zero copy needs a display device that supports the display's API and
    /// a queue that yields an interop object. Anything else copies.
    pub fn new(device: Arc<dyn Device>, queue: &mut dyn DeviceQueue, driver: Box<dyn DisplayDriver>) -> Self {
        let api = driver.graphics_api();
        let interop = if api != GraphicsApi::None
            && device.info().display_device
            && device.should_use_graphics_interop(api)
        {
            queue.graphics_interop_create()
        } else {
            None
        };
        let mode = if interop.is_some() {
            InteropMode::ZeroCopy
        } else {
            InteropMode::CopyFallback
        };
        log::info!(
            "PixelDisplay: {mode:?} display on '{}' ({api})",
            device.info().description
        );
        Self {
            state: Mutex::new(DisplayState {
                device,
                driver,
                mode,
                interop,
                buffer: None,
                pixels: MemoryDescriptor::new("display_pixels", MemoryType::Pixels, DataType::Half, 4),
                mapped: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The negotiated mode.
    pub fn mode(&self) -> InteropMode {
        self.state().mode
    }

    /// Recreates the display buffer at `width x height`.
    ///
    /// A buffer the device refuses to register switches the display to the
    /// copy fallback for good.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.mapped {
            return Err(DeviceError::Unsupported("resize while the display buffer is mapped".to_string()));
        }
        if state.buffer.is_some_and(|b| b.width == width && b.height == height) {
            return Ok(());
        }
        if let Some(old) = state.buffer.take() {
            state.driver.free_pixel_buffer(old);
        }
        let buffer = state.driver.create_pixel_buffer(width, height)?;
        state.buffer = Some(buffer);

        if let Some(interop) = state.interop.as_mut() {
            if let Err(err) = interop.set_buffer(&buffer) {
                state.fall_back(&err);
            }
        }
        if state.mode == InteropMode::CopyFallback {
            state.release_pixels();
            state.pixels.alloc_host(width as usize, height as usize, 1);
            let DisplayState { device, pixels, .. } = &mut *state;
            device.mem_alloc(pixels)?;
        }
        Ok(())
    }

    /// The address kernels write pixels to until [`PixelDisplay::unmap`].
    pub fn map(&self) -> Result<DevicePtr, DeviceError> {
        let mut state = self.state();
        if state.buffer.is_none() {
            return Err(DeviceError::Unsupported("display buffer not created".to_string()));
        }
        let ptr = match state.interop.as_mut() {
            Some(interop) => interop.map()?,
            None => state.pixels.device_pointer,
        };
        state.mapped = true;
        Ok(ptr)
    }

    /// Hands the written pixels to the display.
    ///
    /// The copy fallback reads the device buffer back through `queue` and
    /// uploads it.
    pub fn unmap(&self, queue: &mut dyn DeviceQueue) -> Result<(), DeviceError> {
        let mut state = self.state();
        if !state.mapped {
            return Ok(());
        }
        state.mapped = false;
        if let Some(interop) = state.interop.as_mut() {
            return interop.unmap();
        }
        let DisplayState {
            driver, buffer, pixels, ..
        } = &mut *state;
        let Some(buffer) = buffer.as_ref() else {
            return Ok(());
        };
        queue.synchronize()?;
        queue.copy_from_device(pixels)?;
        driver.upload_pixels(buffer, pixels.host())
    }

    /// Presents the current buffer.
    pub fn draw(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.mapped {
            return Err(DeviceError::Unsupported("draw while the display buffer is mapped".to_string()));
        }
        let DisplayState { driver, buffer, .. } = &mut *state;
        match buffer.as_ref() {
            Some(buffer) => driver.draw(buffer),
            None => Ok(()),
        }
    }
}

impl Drop for PixelDisplay {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.mapped {
            if let Some(interop) = state.interop.as_mut() {
                if let Err(err) = interop.unmap() {
                    log::warn!("PixelDisplay: failed to unmap at shutdown: {err}");
                }
            }
        }
        state.interop = None;
        state.release_pixels();
        if let Some(buffer) = state.buffer.take() {
            state.driver.free_pixel_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cpu::{CpuDevice, CpuDeviceDesc, CpuKernels};
    use photon_core::device::{DeviceConfig, DeviceInfo, DeviceKernel, DeviceStats, DeviceType, KernelArgs};
    use photon_core::device::{KernelFeatures, NullProfiler, ParamLayout};

    #[derive(Debug)]
    struct RecordingDisplay {
        uploads: Arc<Mutex<Vec<Vec<u8>>>>,
        api: GraphicsApi,
    }

    impl DisplayDriver for RecordingDisplay {
        fn graphics_api(&self) -> GraphicsApi {
            self.api
        }

        fn create_pixel_buffer(&mut self, width: u32, height: u32) -> Result<DisplayBuffer, DeviceError> {
            Ok(DisplayBuffer {
                id: 1,
                handle: 7,
                width,
                height,
            })
        }

        fn free_pixel_buffer(&mut self, _buffer: DisplayBuffer) {}

        fn upload_pixels(&mut self, _buffer: &DisplayBuffer, pixels: &[u8]) -> Result<(), DeviceError> {
            self.uploads.lock().unwrap().push(pixels.to_vec());
            Ok(())
        }

        fn draw(&mut self, _buffer: &DisplayBuffer) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn cpu_device() -> Arc<dyn Device> {
        let kernels = CpuKernels::new().with(DeviceKernel::FilmConvert, |ctx, range| {
            let out = ctx.ptr_arg(0)?;
            ctx.write(out, range.start, &vec![0x3c00u16; range.len()])
        });
        let desc = CpuDeviceDesc {
            info: DeviceInfo::new(DeviceType::Cpu, "cpu", 0),
            config: DeviceConfig {
                cpu_threads: 2,
                ..DeviceConfig::default()
            },
            kernels,
            params: ParamLayout::new(),
        };
        Arc::new(CpuDevice::new(desc, Arc::new(DeviceStats::new()), Arc::new(NullProfiler)))
    }

    #[test]
    fn cpu_display_copies_pixels() {
        let device = cpu_device();
        device.load_kernels(KernelFeatures::all()).unwrap();
        let mut queue = device.queue_create().unwrap();
        let uploads: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
        let display = PixelDisplay::new(
            device.clone(),
            queue.as_mut(),
            Box::new(RecordingDisplay {
                uploads: uploads.clone(),
                api: GraphicsApi::OpenGl,
            }),
        );
        assert_eq!(display.mode(), InteropMode::CopyFallback);

        display.resize(2, 2).unwrap();
        let ptr = display.map().unwrap();
        queue
            .enqueue(DeviceKernel::FilmConvert, 16, &KernelArgs::new().ptr(ptr))
            .unwrap();
        display.unmap(queue.as_mut()).unwrap();
        display.draw().unwrap();

        let uploads = uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].len(), 32);
        assert_eq!(&uploads[0][..2], &0x3c00u16.to_ne_bytes());
    }

    #[test]
    fn dropping_display_frees_device_memory() {
        let device = cpu_device();
        let mut queue = device.queue_create().unwrap();
        let display = PixelDisplay::new(
            device.clone(),
            queue.as_mut(),
            Box::new(RecordingDisplay {
                uploads: Arc::default(),
                api: GraphicsApi::None,
            }),
        );
        display.resize(8, 8).unwrap();
        assert_eq!(device.stats().mem_used(), 512);
        display.resize(8, 8).unwrap();
        drop(display);
        assert_eq!(device.stats().mem_used(), 0);
    }
}
