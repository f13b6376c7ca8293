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
use photon_core::bvh::{BuildPolicy, BvhBuildRequest, BvhParams, OwnedGeometry};
use photon_core::device::{
    DataType, Device, DeviceError, DeviceKernel, DeviceType, KernelArgs, KernelFeatures, MemoryDescriptor,
    MemoryType, SharedProgress,
};
use photon_core::math::Vec3;
use photon_infra::kernel::KernelCompiler;
use std::sync::atomic::Ordering;

const MIB: u64 = 1 << 20;

fn floats(count: usize) -> Vec<f32> {
    (0..count).map(|i| i as f32 * 0.5).collect()
}

#[test]
fn memory_round_trip_leaves_no_residue() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    let values = floats(1024);
    let mut mem = MemoryDescriptor::from_slice("values", MemoryType::ReadWrite, DataType::Float, 1, &values);

    device.mem_copy_to(&mut mem).unwrap();
    assert!(!mem.device_pointer.is_null());
    assert_eq!(mem.device_size, 4096);
    assert_eq!(harness.stats.mem_used(), 4096);

    mem.host_mut().fill(0);
    device.mem_copy_from(&mut mem, 0, 1024, 1, 4).unwrap();
    assert_eq!(mem.host_to_vec::<f32>(), values);

    device.mem_free(&mut mem).unwrap();
    assert!(mem.device_pointer.is_null());
    let snapshot = harness.stats.snapshot();
    assert_eq!(snapshot.mem_used, 0);
    assert_eq!(snapshot.live_allocations(), 0);
    assert_eq!(harness.driver.used(), 0);
    assert_eq!(harness.device.memory_usage(), (0, 0));
}

#[test]
fn zeroing_clears_device_copy() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    let mut mem = MemoryDescriptor::from_slice("accum", MemoryType::ReadWrite, DataType::Float, 1, &floats(64));
    device.mem_copy_to(&mut mem).unwrap();
    device.mem_zero(&mut mem).unwrap();
    device.mem_copy_from(&mut mem, 0, 64, 1, 4).unwrap();
    assert!(mem.host_to_vec::<f32>().iter().all(|v| *v == 0.0));
    device.mem_free(&mut mem).unwrap();
}

#[test]
fn kernels_compile_once_and_load_once() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let features = KernelFeatures::PATH_TRACING | KernelFeatures::HAIR;
    harness.device.load_kernels(features).unwrap();
    harness.device.load_kernels(features).unwrap();

    assert_eq!(harness.device.resolver().compiler().invocations(), 1);
    assert_eq!(Calls::get(&harness.driver.calls.module_loads), 1);
    assert!(harness.device.error_message().is_empty());
}

#[test]
fn adaptive_reload_with_new_features_is_rejected() {
    let harness = Harness::with_config(
        MockDriver::new(DeviceType::Cuda, 64 * MIB),
        |config| config.adaptive_compile = true,
        |_| {},
    );
    harness.device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();
    // Subset of what is loaded.
    harness.device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();

    let err = harness
        .device
        .load_kernels(KernelFeatures::PATH_TRACING | KernelFeatures::VOLUME)
        .unwrap_err();
    assert_eq!(err, DeviceError::KernelReloadUnsupported);
    assert_eq!(Calls::get(&harness.driver.calls.module_loads), 1);
}

#[test]
fn old_compute_capability_is_a_setup_error() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB).with_compute_capability(2, 1));
    let err = harness.device.load_kernels(KernelFeatures::PATH_TRACING).unwrap_err();
    assert!(matches!(err, DeviceError::Setup(ref msg) if msg.contains("compute capability 2.1")));
    assert!(!harness.device.error_message().is_empty());
    assert_eq!(harness.compiler.invocations(), 0);
}

#[test]
fn failed_launch_faults_every_queue() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();

    let mut mem = MemoryDescriptor::from_slice("state", MemoryType::ReadWrite, DataType::Float, 1, &floats(16));
    device.mem_copy_to(&mut mem).unwrap();
    let args = KernelArgs::new().ptr(mem.device_pointer).int(16);

    let mut first = device.queue_create().unwrap();
    let mut second = device.queue_create().unwrap();
    harness.driver.fail_launches.store(true, Ordering::SeqCst);

    let err = first
        .enqueue(DeviceKernel::IntegratorInitFromCamera, 16, &args)
        .unwrap_err();
    assert!(matches!(err, DeviceError::Dispatch(ref msg) if msg.contains("illegal address")));
    assert!(device.error_message().contains("illegal address"));

    harness.driver.fail_launches.store(false, Ordering::SeqCst);
    assert!(matches!(
        first.enqueue(DeviceKernel::FilmConvert, 16, &args),
        Err(DeviceError::DeviceFaulted(_))
    ));
    assert!(matches!(
        second.enqueue(DeviceKernel::FilmConvert, 16, &args),
        Err(DeviceError::DeviceFaulted(_))
    ));
    assert!(matches!(second.synchronize(), Err(DeviceError::DeviceFaulted(_))));
    // Only the failing launch reached the driver.
    assert_eq!(Calls::get(&harness.driver.calls.launches), 1);
}

#[test]
fn faulted_device_rejects_driver_work_but_still_frees() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();
    let mut state = MemoryDescriptor::from_slice("state", MemoryType::ReadWrite, DataType::Float, 1, &floats(16));
    device.mem_copy_to(&mut state).unwrap();
    let mut queue = device.queue_create().unwrap();
    harness.driver.fail_launches.store(true, Ordering::SeqCst);
    let args = KernelArgs::new().ptr(state.device_pointer).int(16);
    assert!(queue.enqueue(DeviceKernel::FilmConvert, 16, &args).is_err());
    harness.driver.fail_launches.store(false, Ordering::SeqCst);
    let used = harness.driver.used();

    let faulted = |result: Result<(), DeviceError>| matches!(result, Err(DeviceError::DeviceFaulted(ref msg)) if msg.contains("illegal address"));
    let mut fresh = MemoryDescriptor::from_slice("fresh", MemoryType::ReadOnly, DataType::Float, 1, &floats(256));
    assert!(faulted(device.mem_copy_to(&mut fresh)));
    assert!(fresh.device_pointer.is_null());
    assert!(faulted(device.mem_alloc(&mut fresh)));
    assert!(faulted(device.mem_zero(&mut state)));
    assert!(faulted(device.mem_copy_from(&mut state, 0, 16, 1, 4)));
    assert!(faulted(device.const_copy_to("integrator", &[0; 16])));
    assert!(faulted(device.load_kernels(KernelFeatures::PATH_TRACING)));

    let mesh = OwnedGeometry::mesh(1, vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![[0, 1, 2]]);
    let progress = SharedProgress::new();
    let request = BvhBuildRequest::bottom(BvhParams::new("mesh", BuildPolicy::Static), &mesh);
    assert!(matches!(
        device.build_bvh(request, &progress, false),
        Err(DeviceError::DeviceFaulted(_))
    ));
    assert!(progress.error().is_some());

    assert_eq!(harness.driver.used(), used);
    assert_eq!(Calls::get(&harness.driver.calls.module_loads), 1);
    assert_eq!(Calls::get(&harness.driver.calls.launches), 1);

    device.mem_free(&mut state).unwrap();
    assert_eq!(harness.driver.used(), 0);
    assert_eq!(harness.stats.mem_used(), 0);
}

#[test]
fn enqueue_resolves_pointers_and_rejects_unknown_ones() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();

    let mut mem = MemoryDescriptor::from_slice("paths", MemoryType::ReadWrite, DataType::UInt, 1, &[0u32; 32]);
    device.mem_copy_to(&mut mem).unwrap();

    let mut queue = device.queue_create().unwrap();
    queue.init_execution().unwrap();
    queue
        .enqueue(DeviceKernel::IntegratorIntersectClosest, 32, &KernelArgs::new().ptr(mem.device_pointer))
        .unwrap();
    queue.synchronize().unwrap();

    let bogus = mem.device_pointer.offset(1 << 40);
    let err = queue
        .enqueue(DeviceKernel::IntegratorIntersectClosest, 32, &KernelArgs::new().ptr(bogus))
        .unwrap_err();
    assert_eq!(err, DeviceError::InvalidPointer(bogus.0));
    device.mem_free(&mut mem).unwrap();
}

#[test]
fn full_device_spills_to_mapped_host_memory() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, MIB).with_map_host());
    let device = &harness.device;
    let mut big = MemoryDescriptor::new("big", MemoryType::ReadOnly, DataType::UChar, 1);
    big.alloc_host(2 * MIB as usize, 1, 1);
    big.host_mut()[7] = 42;

    device.mem_copy_to(&mut big).unwrap();
    assert!(big.shared_pointer.is_some());
    assert_eq!(big.shared_counter, 1);
    assert_eq!(Calls::get(&harness.driver.calls.host_allocs), 1);
    assert_eq!(device.memory_usage(), (0, 2 * MIB));

    big.host_mut()[7] = 0;
    device.mem_copy_from(&mut big, 0, 2 * MIB as usize, 1, 1).unwrap();
    assert_eq!(big.host()[7], 42);

    device.mem_free(&mut big).unwrap();
    assert!(big.shared_pointer.is_none());
    assert_eq!(device.memory_usage(), (0, 0));
    assert!(device.error_message().is_empty());
}

#[test]
fn out_of_memory_without_host_mapping_is_sticky() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, MIB));
    let device = &harness.device;
    let mut big = MemoryDescriptor::new("big", MemoryType::ReadWrite, DataType::Float, 1);
    big.alloc_host(MIB as usize, 1, 1);

    let err = device.mem_alloc(&mut big).unwrap_err();
    assert!(matches!(err, DeviceError::OutOfMemory { requested, .. } if requested == 4 * MIB));
    assert!(device.error_message().starts_with("System is out of GPU memory"));
    assert!(big.device_pointer.is_null());
    assert_eq!(harness.stats.mem_used(), 0);

    let mut queue = device.queue_create().unwrap();
    assert!(matches!(queue.init_execution(), Err(DeviceError::DeviceFaulted(_))));
}

#[test]
fn allocating_textures_directly_is_rejected() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let mut tex = MemoryDescriptor::new("tex", MemoryType::Texture, DataType::UChar, 4);
    tex.alloc_host(4, 4, 1);
    assert!(matches!(
        harness.device.mem_alloc(&mut tex),
        Err(DeviceError::InvalidMemoryType { operation: "mem_alloc", .. })
    ));
}

#[test]
fn constant_parameters_are_checked() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    assert_eq!(device.const_copy_to("integrator", &[0; 16]), Err(DeviceError::KernelsNotLoaded));

    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();
    device.const_copy_to("integrator", &[1; 16]).unwrap();
    assert_eq!(
        device.const_copy_to("missing", &[0; 4]),
        Err(DeviceError::UnknownParam("missing".to_string()))
    );
    assert!(matches!(
        device.const_copy_to("integrator", &[0; 8]),
        Err(DeviceError::ParamSizeMismatch { .. })
    ));
}

#[test]
fn reuploaded_globals_are_bound_again() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    let mut lights = MemoryDescriptor::from_slice("lights", MemoryType::Global, DataType::Float, 1, &floats(8));
    device.mem_copy_to(&mut lights).unwrap();
    // No module declares it yet.
    assert!(harness.driver.bound("lights").is_empty());

    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();
    let bound = harness.driver.bound("lights");
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].1, 32);

    let brighter: Vec<f32> = floats(8).iter().map(|v| v * 4.0).collect();
    lights.set_host_data(&brighter);
    device.mem_copy_to(&mut lights).unwrap();
    let bound = harness.driver.bound("lights");
    assert_eq!(bound.len(), 2);
    let (ptr, size) = bound[1];
    assert_eq!(harness.driver.read(ptr, size as usize), bytemuck::cast_slice::<f32, u8>(&brighter));
    // The first allocation went back to the driver.
    assert_eq!(harness.driver.used(), 32);

    device.mem_free(&mut lights).unwrap();
    assert_eq!(harness.driver.used(), 0);
}

fn texture_slot(table: &[u8], slot: usize) -> (u64, [u32; 3]) {
    let record = &table[slot * 32..(slot + 1) * 32];
    let word = |at: usize| u32::from_le_bytes(record[at..at + 4].try_into().unwrap());
    let data = u64::from_le_bytes(record[..8].try_into().unwrap());
    (data, [word(20), word(24), word(28)])
}

#[test]
fn textures_are_pitched_slotted_and_published_on_init() {
    let harness = Harness::new(MockDriver::new(DeviceType::Cuda, 64 * MIB));
    let device = &harness.device;
    device.load_kernels(KernelFeatures::PATH_TRACING).unwrap();

    let mut image = MemoryDescriptor::new("image", MemoryType::Texture, DataType::UChar, 4);
    image.alloc_host(4, 4, 1);
    image.host_mut().fill(7);
    device.mem_copy_to(&mut image).unwrap();
    let mut mask = MemoryDescriptor::new("mask", MemoryType::Texture, DataType::UChar, 1);
    mask.alloc_host(8, 1, 1);
    device.mem_copy_to(&mut mask).unwrap();
    assert_eq!((image.slot, mask.slot), (Some(0), Some(1)));

    let textures = harness.driver.textures();
    assert_eq!(textures.len(), 2);
    let (desc, raw) = textures[0];
    // 16-byte rows padded to the 32-byte pitch alignment.
    assert_eq!((desc.width, desc.height, desc.pitch), (4, 4, 32));
    let rows = harness.driver.read(raw, 128);
    assert!(rows[..16].iter().all(|b| *b == 7));
    assert!(rows[16..32].iter().all(|b| *b == 0));
    assert!(rows[96..112].iter().all(|b| *b == 7));
    assert_eq!(textures[1].0.pitch, 8);

    // The table only reaches the device when a queue starts executing.
    assert!(harness.driver.bound("texture_info").is_empty());
    let mut queue = device.queue_create().unwrap();
    queue.init_execution().unwrap();
    let bound = harness.driver.bound("texture_info");
    assert_eq!(bound.len(), 1);
    let (table_ptr, table_size) = bound[0];
    assert_eq!(table_size, 128 * 32);
    let table = harness.driver.read(table_ptr, table_size as usize);
    assert_eq!(texture_slot(&table, 0), (1, [4, 4, 1]));
    assert_eq!(texture_slot(&table, 1), (2, [8, 1, 1]));
    assert_eq!(texture_slot(&table, 2).0, 0);

    queue.init_execution().unwrap();
    assert_eq!(harness.driver.bound("texture_info").len(), 1);

    // A freed slot is handed to the next texture.
    device.mem_free(&mut image).unwrap();
    let mut ramp = MemoryDescriptor::new("ramp", MemoryType::Texture, DataType::UChar, 1);
    ramp.alloc_host(16, 1, 1);
    device.mem_copy_to(&mut ramp).unwrap();
    assert_eq!(ramp.slot, Some(0));
    queue.init_execution().unwrap();
    let bound = harness.driver.bound("texture_info");
    assert_eq!(bound.len(), 2);
    assert_eq!(bound[1].0, table_ptr);
    let table = harness.driver.read(table_ptr, table_size as usize);
    assert_eq!(texture_slot(&table, 0), (3, [16, 1, 1]));
}
