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

//! Contracts between compute devices and the display.
//!
//! The display side is an external collaborator implementing [`DisplayDriver`].
//! Devices that can write straight into display buffers hand out a
//! [`DeviceGraphicsInterop`] from their queues.

use crate::device::{DeviceError, DevicePtr};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Graphics API backing a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GraphicsApi {
    /// OpenGL pixel buffer objects.
    OpenGl,
    /// Vulkan external memory.
    Vulkan,
    /// Metal shared buffers.
    Metal,
    /// No graphics API; background rendering.
    #[default]
    None,
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsApi::OpenGl => "OpenGL",
            GraphicsApi::Vulkan => "Vulkan",
            GraphicsApi::Metal => "Metal",
            GraphicsApi::None => "None",
        };
        f.write_str(name)
    }
}

/// A pixel buffer owned by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayBuffer {
    /// Display-side identity.
    pub id: u64,
    /// Native handle exported for interop (PBO name, memory fd, ...).
    pub handle: u64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl DisplayBuffer {
    /// Size in bytes of half4 pixels.
    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 8
    }
}

/// The display collaborator.
pub trait DisplayDriver: Send + Debug {
    /// API the display draws with.
    fn graphics_api(&self) -> GraphicsApi;

    /// Creates a pixel buffer of half4 pixels.
    fn create_pixel_buffer(&mut self, width: u32, height: u32) -> Result<DisplayBuffer, DeviceError>;

    /// Releases a buffer created by [`DisplayDriver::create_pixel_buffer`].
    fn free_pixel_buffer(&mut self, buffer: DisplayBuffer);

    /// Copies host pixels into `buffer`.
    fn upload_pixels(&mut self, buffer: &DisplayBuffer, pixels: &[u8]) -> Result<(), DeviceError>;

    /// Presents `buffer`.
    fn draw(&mut self, buffer: &DisplayBuffer) -> Result<(), DeviceError>;
}

/// A device-side mapping of a display buffer.
pub trait DeviceGraphicsInterop: Send + Debug {
    /// Registers `buffer` with the device. Re-registers when the handle or size changed.
    fn set_buffer(&mut self, buffer: &DisplayBuffer) -> Result<(), DeviceError>;

    /// Maps the registered buffer and returns an address kernels can write.
    fn map(&mut self) -> Result<DevicePtr, DeviceError>;

    /// Unmaps the buffer so the display can draw it.
    fn unmap(&mut self) -> Result<(), DeviceError>;
}
