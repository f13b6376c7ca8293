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

use super::driver::GraphicsResource;
use super::memory::{Allocation, Placement};
use super::GpuDeviceInternal;
use photon_core::device::{DeviceError, DevicePtr, MemoryType};
use photon_core::interop::{DeviceGraphicsInterop, DisplayBuffer, GraphicsApi};
use std::sync::Arc;

const APIS: [GraphicsApi; 3] = [GraphicsApi::OpenGl, GraphicsApi::Vulkan, GraphicsApi::Metal];

#[derive(Debug)]
struct Registered {
    resource: GraphicsResource,
    buffer: DisplayBuffer,
}

/// Maps display buffers into a GPU device's address space.
#[derive(Debug)]
pub struct GpuGraphicsInterop {
    device: Arc<GpuDeviceInternal>,
    api: GraphicsApi,
    registered: Option<Registered>,
    mapped: Option<DevicePtr>,
}

impl GpuGraphicsInterop {
    /// `None` when the driver supports no graphics API.
    pub(crate) fn new(device: Arc<GpuDeviceInternal>) -> Option<Self> {
        let api = APIS
            .into_iter()
            .find(|api| device.driver.graphics_interop_supported(*api))?;
        Some(Self {
            device,
            api,
            registered: None,
            mapped: None,
        })
    }

    /// API the buffers are registered with.
    pub fn api(&self) -> GraphicsApi {
        self.api
    }

    fn unregister(&mut self) {
        if let Some(registered) = self.registered.take() {
            self.device.driver.graphics_unregister(registered.resource);
        }
    }

    fn interop_error(&self, action: &str, err: impl std::fmt::Display) -> DeviceError {
        let message = format!("Failed to {action} {} display buffer: {err}", self.api);
        log::error!("GpuGraphicsInterop: {message}");
        DeviceError::Unsupported(message)
    }
}

impl DeviceGraphicsInterop for GpuGraphicsInterop {
    fn set_buffer(&mut self, buffer: &DisplayBuffer) -> Result<(), DeviceError> {
        if let Some(registered) = &self.registered {
            if registered.buffer.handle == buffer.handle && registered.buffer.size_bytes() == buffer.size_bytes() {
                return Ok(());
            }
        }
        if self.mapped.is_some() {
            self.unmap()?;
        }
        let device = self.device.clone();
        let _ctx = device.context()?;
        self.unregister();
        let resource = self
            .device
            .driver
            .graphics_register(self.api, buffer.handle)
            .map_err(|err| self.interop_error("register", err))?;
        log::debug!(
            "GpuGraphicsInterop: registered {}x{} {} buffer",
            buffer.width,
            buffer.height,
            self.api
        );
        self.registered = Some(Registered {
            resource,
            buffer: *buffer,
        });
        Ok(())
    }

    fn map(&mut self) -> Result<DevicePtr, DeviceError> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        let Some(registered) = &self.registered else {
            return Err(DeviceError::Unsupported("no display buffer registered".into()));
        };
        let (resource, size) = (registered.resource, registered.buffer.size_bytes() as u64);
        let mut ctx = self.device.context()?;
        let raw = self
            .device
            .driver
            .graphics_map(resource)
            .map_err(|err| self.interop_error("map", err))?;
        let ptr = ctx.memory.insert(Allocation {
            raw,
            size,
            placement: Placement::Device,
            mem_type: MemoryType::Pixels,
            name: "display_buffer".into(),
            texture: None,
            slot: None,
        });
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    fn unmap(&mut self) -> Result<(), DeviceError> {
        let Some(ptr) = self.mapped.take() else {
            return Ok(());
        };
        let mut ctx = self.device.context()?;
        ctx.memory.remove(ptr);
        if let Some(registered) = &self.registered {
            self.device
                .driver
                .graphics_unmap(registered.resource)
                .map_err(|err| self.interop_error("unmap", err))?;
        }
        Ok(())
    }
}

impl Drop for GpuGraphicsInterop {
    fn drop(&mut self) {
        if let Err(err) = self.unmap() {
            log::warn!("GpuGraphicsInterop: {err}");
        }
        let device = self.device.clone();
        if let Ok(_ctx) = device.context() {
            self.unregister();
        };
    }
}
