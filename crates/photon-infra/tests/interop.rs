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

use common::{Calls, Harness, MockDriver};
use photon_core::device::{Device, DeviceError, DeviceType};
use photon_core::interop::{DisplayBuffer, DisplayDriver, GraphicsApi};
use photon_infra::{InteropMode, PixelDisplay};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

const MIB: u64 = 1 << 20;

#[derive(Debug, Default)]
struct DisplayLog {
    created: usize,
    freed: usize,
    uploads: Vec<usize>,
    draws: usize,
}

#[derive(Debug)]
struct FakeDisplay {
    api: GraphicsApi,
    log: Arc<Mutex<DisplayLog>>,
}

impl FakeDisplay {
    fn new(api: GraphicsApi) -> (Box<dyn DisplayDriver>, Arc<Mutex<DisplayLog>>) {
        let log = Arc::new(Mutex::new(DisplayLog::default()));
        (Box::new(Self { api, log: log.clone() }), log)
    }
}

impl DisplayDriver for FakeDisplay {
    fn graphics_api(&self) -> GraphicsApi {
        self.api
    }

    fn create_pixel_buffer(&mut self, width: u32, height: u32) -> Result<DisplayBuffer, DeviceError> {
        let mut log = self.log.lock().unwrap();
        log.created += 1;
        Ok(DisplayBuffer {
            id: log.created as u64,
            handle: 100 + log.created as u64,
            width,
            height,
        })
    }

    fn free_pixel_buffer(&mut self, _buffer: DisplayBuffer) {
        self.log.lock().unwrap().freed += 1;
    }

    fn upload_pixels(&mut self, _buffer: &DisplayBuffer, pixels: &[u8]) -> Result<(), DeviceError> {
        self.log.lock().unwrap().uploads.push(pixels.len());
        Ok(())
    }

    fn draw(&mut self, _buffer: &DisplayBuffer) -> Result<(), DeviceError> {
        self.log.lock().unwrap().draws += 1;
        Ok(())
    }
}

fn display_harness(driver: MockDriver) -> Harness {
    Harness::with_config(driver, |_| {}, |info| info.display_device = true)
}

#[test]
fn display_device_writes_straight_into_the_buffer() {
    let harness = display_harness(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::OpenGl));
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, log) = FakeDisplay::new(GraphicsApi::OpenGl);

    let display = PixelDisplay::new(device.clone(), queue.as_mut(), driver);
    assert_eq!(display.mode(), InteropMode::ZeroCopy);

    display.resize(16, 16).unwrap();
    let ptr = display.map().unwrap();
    assert!(!ptr.is_null());
    display.unmap(queue.as_mut()).unwrap();
    display.draw().unwrap();

    assert_eq!(Calls::get(&harness.driver.calls.registrations), 1);
    assert!(log.lock().unwrap().uploads.is_empty());
    assert_eq!(log.lock().unwrap().draws, 1);
    // Pixels never took device memory.
    assert_eq!(harness.stats.mem_used(), 0);

    drop(display);
    assert_eq!(log.lock().unwrap().freed, 1);
    assert_eq!(harness.driver.live_regions(), 0);
}

#[test]
fn same_size_resize_keeps_the_registration() {
    let harness = display_harness(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::OpenGl));
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, log) = FakeDisplay::new(GraphicsApi::OpenGl);
    let display = PixelDisplay::new(device, queue.as_mut(), driver);

    display.resize(32, 8).unwrap();
    display.resize(32, 8).unwrap();
    assert_eq!(log.lock().unwrap().created, 1);
    assert_eq!(Calls::get(&harness.driver.calls.registrations), 1);

    display.resize(64, 8).unwrap();
    assert_eq!(log.lock().unwrap().created, 2);
    assert_eq!(Calls::get(&harness.driver.calls.registrations), 2);
}

#[test]
fn refused_registration_falls_back_to_copying() {
    let harness = display_harness(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::OpenGl));
    harness.driver.fail_registration.store(true, Ordering::SeqCst);
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, log) = FakeDisplay::new(GraphicsApi::OpenGl);

    let display = PixelDisplay::new(device.clone(), queue.as_mut(), driver);
    assert_eq!(display.mode(), InteropMode::ZeroCopy);
    display.resize(16, 16).unwrap();
    assert_eq!(display.mode(), InteropMode::CopyFallback);
    // The failed registration is not a device fault.
    assert!(device.error_message().is_empty());

    let ptr = display.map().unwrap();
    assert!(!ptr.is_null());
    display.unmap(queue.as_mut()).unwrap();
    assert_eq!(log.lock().unwrap().uploads, vec![16 * 16 * 8]);
    assert_eq!(harness.stats.mem_used(), 16 * 16 * 8);

    drop(display);
    assert_eq!(harness.stats.mem_used(), 0);
}

#[test]
fn headless_device_copies() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::OpenGl));
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, _log) = FakeDisplay::new(GraphicsApi::OpenGl);

    let display = PixelDisplay::new(device, queue.as_mut(), driver);
    assert_eq!(display.mode(), InteropMode::CopyFallback);
    display.resize(4, 4).unwrap();
    assert_eq!(Calls::get(&harness.driver.calls.registrations), 0);
}

#[test]
fn mismatched_api_copies() {
    let harness = display_harness(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::Vulkan));
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, _log) = FakeDisplay::new(GraphicsApi::OpenGl);

    let display = PixelDisplay::new(device, queue.as_mut(), driver);
    assert_eq!(display.mode(), InteropMode::CopyFallback);
}

#[test]
fn map_before_resize_is_rejected() {
    let harness = display_harness(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_interop(GraphicsApi::OpenGl));
    let device: Arc<dyn Device> = Arc::new(harness.device.clone());
    let mut queue = device.queue_create().unwrap();
    let (driver, _log) = FakeDisplay::new(GraphicsApi::OpenGl);
    let display = PixelDisplay::new(device, queue.as_mut(), driver);
    assert!(matches!(display.map(), Err(DeviceError::Unsupported(_))));
}
