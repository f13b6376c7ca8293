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

//! Hardware ray-tracing structures.
//!
//! A [`RayTracingEngine`] wraps OptiX, HIP-RT, Metal or Embree GPU builds. The
//! [`HardwareBuilder`] turns geometry and instances into engine inputs in device
//! memory, runs the build, compacts static results and returns a [`HwAccel`].

use super::curves::convert_keys;
use super::primitives::{step_bounds, Topology};
use super::ResolvedInstance;
use crate::device::gpu::driver::{DriverError, GpuDriver, RawPtr};
use bytemuck::{Pod, Zeroable};
use photon_core::bvh::{
    BuildFlags, BvhLayout, BvhParams, CurveBasis, CurveShape, GeometryPrimitives, GeometryProvider,
};
use photon_core::bvh::geometry::motion_step;
use photon_core::device::BuildError;
use photon_core::math::transform::decompose_motion;
use photon_core::math::{DecomposedTransform, Mat4};
use std::fmt::Debug;

/// What an engine can build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayTracingCaps {
    /// Layout of the structures it produces.
    pub layout: BvhLayout,
    /// Largest instance count of one top structure.
    pub max_instances: usize,
    /// Basis of natively intersected round curves, if any.
    pub native_curves: Option<CurveBasis>,
    /// Builds motion structures and SRT motion transforms.
    pub supports_motion: bool,
}

/// Buffer sizes a build needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelBuildSizes {
    /// Output structure.
    pub output: u64,
    /// Scratch for a full build.
    pub temp: u64,
    /// Scratch for an update.
    pub update_temp: u64,
}

/// Build input in device memory. Per-step buffers are ordered by motion time.
#[derive(Debug, Clone, PartialEq)]
pub enum AccelBuildInput {
    /// Indexed triangles with `float3` vertices.
    Triangles {
        /// Vertex buffer of every motion step.
        vertex_buffers: Vec<RawPtr>,
        /// Vertices per step.
        vertex_count: usize,
        /// `uint3` indices.
        index_buffer: RawPtr,
        /// Triangles.
        triangle_count: usize,
    },
    /// Custom primitives as `float3 min, float3 max` boxes.
    Aabbs {
        /// Box buffer of every motion step.
        aabb_buffers: Vec<RawPtr>,
        /// Boxes per step.
        count: usize,
    },
    /// Round curves, four `float4` keys per segment.
    Curves {
        /// Key buffer of every motion step.
        key_buffers: Vec<RawPtr>,
        /// Keys per step.
        key_count: usize,
        /// First key of every segment.
        index_buffer: RawPtr,
        /// Segments.
        segment_count: usize,
        /// Basis of the keys.
        basis: CurveBasis,
    },
    /// [`HwInstance`] records.
    Instances {
        /// Instance buffer.
        buffer: RawPtr,
        /// Instances.
        count: usize,
        /// Any instance references a motion transform.
        motion: bool,
    },
}

/// Result of one engine build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelBuildOutput {
    /// Handle traversal kernels and instances use.
    pub traversable: u64,
    /// Size after compaction, when the build requested it.
    pub compacted_size: Option<u64>,
}

/// A hardware acceleration-structure API.
pub trait RayTracingEngine: Send + Sync + Debug {
    /// Capabilities.
    fn caps(&self) -> RayTracingCaps;

    /// Buffer sizes for building `input`.
    fn compute_sizes(&self, input: &AccelBuildInput, flags: BuildFlags) -> Result<AccelBuildSizes, DriverError>;

    /// Builds, or updates in place when `update` is set.
    fn build(
        &self,
        input: &AccelBuildInput,
        flags: BuildFlags,
        update: bool,
        temp: RawPtr,
        output: RawPtr,
        output_size: u64,
    ) -> Result<AccelBuildOutput, DriverError>;

    /// Copies a built structure into a smaller buffer.
    fn compact(&self, traversable: u64, output: RawPtr, size: u64) -> Result<u64, DriverError>;

    /// Bytes of an SRT motion transform node with `steps` keys.
    fn motion_transform_size(&self, steps: usize) -> u64 {
        64 + steps as u64 * std::mem::size_of::<SrtKey>() as u64
    }

    /// Writes an SRT motion transform over `child` into `storage`.
    fn create_motion_transform(&self, _child: u64, _keys: &[SrtKey], _storage: RawPtr) -> Result<u64, DriverError> {
        Err(DriverError::Unsupported("motion transforms"))
    }
}

/// One instance as hardware top-level builds consume it. 72 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HwInstance {
    /// Object-to-world, 3x4 row major.
    pub transform: [f32; 12],
    /// User instance id.
    pub instance_id: u32,
    /// Visibility mask, low 8 bits.
    pub mask: u32,
    /// Shader binding table offset.
    pub sbt_offset: u32,
    /// Engine instance flags.
    pub flags: u32,
    /// Bottom structure or motion transform.
    pub traversable: u64,
}

/// One key of a scale-rotation-translation motion transform, laid out as
/// `sx a b pvx sy c pvy sz pvz qx qy qz qw tx ty tz`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SrtKey(pub [f32; 16]);

impl SrtKey {
    /// Key of a decomposed transform with the pivot at the origin.
    pub fn from_decomposed(d: &DecomposedTransform) -> Self {
        let DecomposedTransform {
            translation: t,
            rotation: q,
            scale: s,
            shear,
        } = *d;
        SrtKey([
            s.x, shear.x, shear.y, 0.0, s.y, shear.z, 0.0, s.z, 0.0, q.x, q.y, q.z, q.w, t.x, t.y, t.z,
        ])
    }
}

/// SRT keys for a motion sequence.
pub fn srt_motion_keys(motion: &[Mat4]) -> Vec<SrtKey> {
    decompose_motion(motion)
        .iter()
        .map(SrtKey::from_decomposed)
        .collect()
}

/// Fails with [`BuildError::TooManyInstances`] past the engine limit.
pub fn check_instance_limit(count: usize, caps: &RayTracingCaps) -> Result<(), BuildError> {
    if count > caps.max_instances {
        return Err(BuildError::TooManyInstances {
            requested: count,
            limit: caps.max_instances,
        });
    }
    Ok(())
}

/// SRT motion transform nodes an instance-level structure points into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionNodes {
    /// One node per moving instance.
    pub nodes: Vec<RawPtr>,
    /// Bytes of all nodes.
    pub size: u64,
}

impl MotionNodes {
    /// `true` if no instance moves.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns every node to the driver.
    pub fn free(self, driver: &dyn GpuDriver) {
        for node in self.nodes {
            driver.mem_free(node);
        }
    }
}

/// A built hardware structure and the device memory it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct HwAccel {
    /// Traversable handle.
    pub traversable: u64,
    /// Structure storage.
    pub buffer: RawPtr,
    /// Bytes of `buffer`.
    pub size: u64,
    /// Motion transform nodes kept alive with the structure.
    pub motion_nodes: MotionNodes,
    /// Scratch size an update needs.
    pub update_temp: u64,
    /// Shape used to validate refits.
    pub topology: Topology,
}

impl HwAccel {
    /// Returns every buffer to the driver.
    pub fn free(self, driver: &dyn GpuDriver) {
        driver.mem_free(self.buffer);
        self.motion_nodes.free(driver);
    }

    /// Bytes of device memory held, motion nodes included.
    pub fn memory_size(&self) -> u64 {
        self.size + self.motion_nodes.size
    }
}

// Device allocations freed when the build is over.
struct Scratch<'a> {
    driver: &'a dyn GpuDriver,
    buffers: Vec<RawPtr>,
}

impl<'a> Scratch<'a> {
    fn new(driver: &'a dyn GpuDriver) -> Self {
        Self {
            driver,
            buffers: Vec::new(),
        }
    }

    fn alloc(&mut self, size: u64) -> Result<RawPtr, BuildError> {
        let ptr = self.driver.mem_alloc(size.max(1)).map_err(backend_error)?;
        self.buffers.push(ptr);
        Ok(ptr)
    }

    fn upload<T: Pod>(&mut self, data: &[T]) -> Result<RawPtr, BuildError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let ptr = self.alloc(bytes.len() as u64)?;
        self.driver.memcpy_htod(ptr, bytes).map_err(backend_error)?;
        Ok(ptr)
    }

    // Hands a buffer over to the caller instead of freeing it.
    fn keep(&mut self, ptr: RawPtr) {
        self.buffers.retain(|b| *b != ptr);
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        for ptr in self.buffers.drain(..) {
            self.driver.mem_free(ptr);
        }
    }
}

fn backend_error(err: DriverError) -> BuildError {
    BuildError::Backend(err.to_string())
}

/// Builds hardware structures with one driver and its engine.
#[derive(Debug, Clone, Copy)]
pub struct HardwareBuilder<'a> {
    driver: &'a dyn GpuDriver,
    engine: &'a dyn RayTracingEngine,
}

impl<'a> HardwareBuilder<'a> {
    /// A builder over `engine`, allocating through `driver`.
    pub fn new(driver: &'a dyn GpuDriver, engine: &'a dyn RayTracingEngine) -> Self {
        Self { driver, engine }
    }

    /// Builds a bottom structure, or updates `existing` in place.
    pub fn build_bottom(
        &self,
        geometry: &dyn GeometryProvider,
        params: &BvhParams,
        flags: BuildFlags,
        existing: Option<&HwAccel>,
    ) -> Result<HwAccel, BuildError> {
        let topology = Topology::of(geometry);
        if topology.primitives == 0 {
            return Err(BuildError::EmptyGeometry);
        }
        if let Some(existing) = existing {
            if existing.topology != topology {
                return Err(BuildError::TopologyChanged);
            }
        }
        let caps = self.engine.caps();
        let steps = if params.use_motion && caps.supports_motion {
            topology.steps
        } else {
            1
        };
        let mut scratch = Scratch::new(self.driver);
        let input = self.geometry_input(geometry, steps, &caps, &mut scratch)?;
        self.run(&input, flags, existing, topology, MotionNodes::default(), &mut scratch)
    }

    fn geometry_input(
        &self,
        geometry: &dyn GeometryProvider,
        steps: usize,
        caps: &RayTracingCaps,
        scratch: &mut Scratch<'_>,
    ) -> Result<AccelBuildInput, BuildError> {
        let all_steps = geometry.motion_steps().max(1);
        // With motion disabled only the center step is uploaded.
        let step_indices: Vec<usize> = if steps > 1 {
            (0..all_steps).collect()
        } else {
            vec![all_steps / 2]
        };

        match geometry.primitives() {
            GeometryPrimitives::Triangles(mesh) => {
                let mut vertex_buffers = Vec::with_capacity(step_indices.len());
                for &step in &step_indices {
                    let verts = motion_step(mesh.vertices, mesh.motion_vertices, all_steps, step);
                    let packed: Vec<[f32; 3]> = verts.iter().map(|v| v.to_array()).collect();
                    vertex_buffers.push(scratch.upload(&packed)?);
                }
                Ok(AccelBuildInput::Triangles {
                    vertex_buffers,
                    vertex_count: mesh.vertices.len(),
                    index_buffer: scratch.upload(mesh.triangles)?,
                    triangle_count: mesh.triangles.len(),
                })
            }
            GeometryPrimitives::Curves(set) if set.shape == CurveShape::Thick && caps.native_curves.is_some() => {
                let native = caps.native_curves.unwrap_or(set.basis);
                let mut key_buffers = Vec::with_capacity(step_indices.len());
                let mut key_count = 0;
                for &step in &step_indices {
                    let keys = motion_step(set.keys, set.motion_keys, all_steps, step);
                    let converted = convert_keys(keys, set.curves, set.basis, native);
                    key_count = converted.len();
                    key_buffers.push(scratch.upload(&converted)?);
                }
                let segment_count = key_count / 4;
                let starts: Vec<u32> = (0..segment_count as u32).map(|s| s * 4).collect();
                Ok(AccelBuildInput::Curves {
                    key_buffers,
                    key_count,
                    index_buffer: scratch.upload(&starts)?,
                    segment_count,
                    basis: native,
                })
            }
            GeometryPrimitives::Curves(_) | GeometryPrimitives::Points(_) => {
                let mut aabb_buffers = Vec::with_capacity(step_indices.len());
                let mut count = 0;
                for &step in &step_indices {
                    let boxes: Vec<[f32; 6]> = step_bounds(geometry, step)
                        .iter()
                        .map(|b| {
                            let (lo, hi) = (b.min, b.max);
                            [lo.x, lo.y, lo.z, hi.x, hi.y, hi.z]
                        })
                        .collect();
                    count = boxes.len();
                    aabb_buffers.push(scratch.upload(&boxes)?);
                }
                Ok(AccelBuildInput::Aabbs { aabb_buffers, count })
            }
        }
    }

    /// Builds a top structure over resolved instances, or updates `existing`.
    ///
    /// `traversable` extracts the handle of an instance's bottom payload.
    pub fn build_top<T>(
        &self,
        resolved: &[ResolvedInstance<'_, T>],
        traversable: impl Fn(&T) -> Option<u64>,
        flags: BuildFlags,
        existing: Option<&HwAccel>,
    ) -> Result<HwAccel, BuildError> {
        let caps = self.engine.caps();
        check_instance_limit(resolved.len(), &caps)?;
        let topology = Topology {
            primitives: resolved.len(),
            steps: 1,
        };
        if let Some(existing) = existing {
            if existing.topology != topology {
                return Err(BuildError::TopologyChanged);
            }
        }

        let mut scratch = Scratch::new(self.driver);
        let mut motion_nodes = MotionNodes::default();
        let mut records = Vec::with_capacity(resolved.len());
        let mut any_motion = false;
        for r in resolved {
            let child = traversable(r.bottom).ok_or_else(|| {
                BuildError::Backend(format!(
                    "instance {} references a structure of another layout",
                    r.index
                ))
            })?;
            let instance = r.instance;
            let (transform, handle) = if instance.has_motion() && caps.supports_motion {
                let keys = srt_motion_keys(&instance.motion);
                let node_size = self.engine.motion_transform_size(keys.len());
                let node = scratch.alloc(node_size)?;
                let handle = self
                    .engine
                    .create_motion_transform(child, &keys, node)
                    .map_err(backend_error)?;
                scratch.keep(node);
                motion_nodes.nodes.push(node);
                motion_nodes.size += node_size;
                any_motion = true;
                (Mat4::IDENTITY.to_rows_3x4(), handle)
            } else {
                (instance.transform.to_rows_3x4(), child)
            };
            records.push(HwInstance {
                transform,
                instance_id: instance.object_id,
                mask: instance.visibility.instance_mask() as u32,
                sbt_offset: 0,
                flags: 0,
                traversable: handle,
            });
        }

        let buffer = scratch.upload(&records)?;
        let input = AccelBuildInput::Instances {
            buffer,
            count: records.len(),
            motion: any_motion,
        };
        let built = self.run(&input, flags, existing, topology, motion_nodes.clone(), &mut scratch);
        if built.is_err() {
            motion_nodes.free(self.driver);
        }
        built
    }

    fn run(
        &self,
        input: &AccelBuildInput,
        flags: BuildFlags,
        existing: Option<&HwAccel>,
        topology: Topology,
        motion_nodes: MotionNodes,
        scratch: &mut Scratch<'_>,
    ) -> Result<HwAccel, BuildError> {
        let sizes = self.engine.compute_sizes(input, flags).map_err(backend_error)?;

        if let Some(existing) = existing {
            let temp = scratch.alloc(sizes.update_temp.max(existing.update_temp))?;
            let out = self
                .engine
                .build(input, flags, true, temp, existing.buffer, existing.size)
                .map_err(backend_error)?;
            return Ok(HwAccel {
                traversable: out.traversable,
                buffer: existing.buffer,
                size: existing.size,
                motion_nodes,
                update_temp: existing.update_temp,
                topology,
            });
        }

        let temp = scratch.alloc(sizes.temp)?;
        let output = scratch.alloc(sizes.output)?;
        let out = self
            .engine
            .build(input, flags, false, temp, output, sizes.output)
            .map_err(backend_error)?;

        let mut accel = HwAccel {
            traversable: out.traversable,
            buffer: output,
            size: sizes.output,
            motion_nodes,
            update_temp: sizes.update_temp,
            topology,
        };

        match out.compacted_size {
            Some(compacted) if flags.contains(BuildFlags::ALLOW_COMPACTION) && compacted < sizes.output => {
                let target = scratch.alloc(compacted)?;
                accel.traversable = self
                    .engine
                    .compact(out.traversable, target, compacted)
                    .map_err(backend_error)?;
                scratch.keep(target);
                accel.buffer = target;
                accel.size = compacted;
                log::debug!(
                    "HardwareBuilder: compacted structure from {} to {} bytes",
                    sizes.output,
                    compacted
                );
            }
            _ => scratch.keep(output),
        }
        Ok(accel)
    }
}
