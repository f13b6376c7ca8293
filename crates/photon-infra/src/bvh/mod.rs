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

//! Acceleration-structure builders.
//!
//! Devices keep their structures in an [`AccelStore`]. Software structures are
//! built here on the host ([`SoftwareAccel`]); hardware structures go through a
//! [`RayTracingEngine`](hardware::RayTracingEngine) exposed by the GPU driver.

pub mod arena;
pub mod bvh2;
pub mod curves;
pub mod dynamic;
pub mod hardware;
pub mod primitives;

pub use arena::AccelStore;
pub use bvh2::{Bvh2, PackedNode};
pub use dynamic::DynamicBvh;
pub use primitives::{primitive_bounds, step_bounds, Topology};

use bytemuck::{Pod, Zeroable};
use photon_core::bvh::{BuildPolicy, BvhHandle, BvhParams, GeometryProvider, ObjectInstance};
use photon_core::device::BuildError;
use photon_core::math::transform::decompose_motion;
use photon_core::math::{Aabb, Mat4};

/// Interpolated samples per motion interval when bounding rotating instances.
const MOTION_BOUND_SAMPLES: usize = 4;

/// A traced instance whose bottom structure was found built.
#[derive(Debug)]
pub struct ResolvedInstance<'a, T> {
    /// Index in the caller's instance list.
    pub index: usize,
    /// The instance.
    pub instance: &'a ObjectInstance,
    /// Payload of its bottom structure.
    pub bottom: &'a T,
    /// Object-space bounds of the bottom structure.
    pub bottom_bounds: Aabb,
}

/// Resolves the bottom structure of every traced instance.
///
/// ## Errors
/// [`BuildError::BottomNotBuilt`] for the first instance whose bottom is not built.
pub fn resolve_instances<'a, T>(
    instances: &'a [ObjectInstance],
    lookup: impl Fn(BvhHandle) -> Option<(&'a T, Aabb)>,
) -> Result<Vec<ResolvedInstance<'a, T>>, BuildError> {
    instances
        .iter()
        .enumerate()
        .filter(|(_, instance)| instance.is_traced())
        .map(|(index, instance)| {
            let (bottom, bottom_bounds) =
                lookup(instance.bottom).ok_or(BuildError::BottomNotBuilt { instance: index })?;
            Ok(ResolvedInstance {
                index,
                instance,
                bottom,
                bottom_bounds,
            })
        })
        .collect()
}

/// World bounds of an instance over its whole motion.
pub fn instance_bounds(bottom_bounds: &Aabb, instance: &ObjectInstance) -> Aabb {
    if !instance.has_motion() {
        return bottom_bounds.transform(&instance.transform);
    }
    let keys = decompose_motion(&instance.motion);
    let mut bounds = Aabb::INVALID;
    for pair in keys.windows(2) {
        for i in 0..=MOTION_BOUND_SAMPLES {
            let t = i as f32 / MOTION_BOUND_SAMPLES as f32;
            let m = pair[0].interpolate(&pair[1], t).to_matrix();
            bounds = bounds.merge(&bottom_bounds.transform(&m));
        }
    }
    bounds
}

/// Instance record read by software traversal kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PackedInstance {
    /// Object-to-world, 3x4 row major.
    pub transform: [f32; 12],
    /// World-to-object, 3x4 row major.
    pub inverse: [f32; 12],
    /// Arena slot of the bottom structure.
    pub bottom: u32,
    /// User instance id.
    pub object_id: u32,
    /// Visibility mask.
    pub visibility: u32,
    /// First motion transform in the motion table.
    pub motion_offset: u32,
    /// Motion transforms, 0 when static.
    pub motion_steps: u32,
}

impl PackedInstance {
    fn new(instance: &ObjectInstance, bottom: BvhHandle, motion_offset: usize) -> Self {
        let inverse = instance
            .transform
            .affine_inverse()
            .unwrap_or(Mat4::IDENTITY);
        Self {
            transform: instance.transform.to_rows_3x4(),
            inverse: inverse.to_rows_3x4(),
            bottom: bottom.index,
            object_id: instance.object_id,
            visibility: instance.visibility.bits(),
            motion_offset: motion_offset as u32,
            motion_steps: if instance.has_motion() { instance.motion.len() as u32 } else { 0 },
        }
    }
}

/// The node hierarchy of a software structure.
#[derive(Debug, Clone)]
pub enum SoftwareBvh {
    /// Binned SAH tree, refit by sweeping nodes.
    Static(Bvh2),
    /// Incremental tree with fat leaves, repacked after every refit.
    Dynamic {
        /// Tree.
        tree: DynamicBvh,
        /// Packed copy uploaded to devices.
        packed: Bvh2,
    },
}

impl SoftwareBvh {
    /// Builds the hierarchy the policy asks for.
    pub fn build(bounds: &[Aabb], params: &BvhParams) -> Self {
        match params.policy {
            BuildPolicy::Static => {
                SoftwareBvh::Static(Bvh2::build(bounds, params.max_leaf_size, params.num_bins))
            }
            BuildPolicy::Dynamic => {
                let tree = DynamicBvh::build(bounds);
                let packed = tree.pack();
                SoftwareBvh::Dynamic { tree, packed }
            }
        }
    }

    /// Updates bounds in place and returns the new root bounds.
    pub fn refit(&mut self, bounds: &[Aabb]) -> Aabb {
        match self {
            SoftwareBvh::Static(bvh) => bvh.refit(bounds),
            SoftwareBvh::Dynamic { tree, packed } => {
                let moved = tree.refit(bounds);
                log::trace!("SoftwareBvh: refit reinserted {moved} leaves");
                *packed = tree.pack();
                packed.root_bounds()
            }
        }
    }

    /// The packed nodes.
    pub fn packed(&self) -> &Bvh2 {
        match self {
            SoftwareBvh::Static(bvh) => bvh,
            SoftwareBvh::Dynamic { packed, .. } => packed,
        }
    }
}

/// A complete software structure: hierarchy plus, for tops, instance records.
#[derive(Debug, Clone)]
pub struct SoftwareAccel {
    /// Hierarchy.
    pub bvh: SoftwareBvh,
    /// Instance records, empty for bottoms.
    pub instances: Vec<PackedInstance>,
    /// Motion transforms referenced by instances, 3x4 row major.
    pub motion: Vec<[f32; 12]>,
    /// Shape used to validate refits.
    pub topology: Topology,
}

impl SoftwareAccel {
    /// Builds a bottom structure. Returns the structure and its bounds.
    pub fn build_bottom(geometry: &dyn GeometryProvider, params: &BvhParams) -> Result<(Self, Aabb), BuildError> {
        let (bounds, topology) = primitive_bounds(geometry, params.use_motion)?;
        let bvh = SoftwareBvh::build(&bounds, params);
        let root = bvh.packed().root_bounds();
        let accel = Self {
            bvh,
            instances: Vec::new(),
            motion: Vec::new(),
            topology,
        };
        Ok((accel, root))
    }

    /// Refits a bottom structure to moved geometry.
    ///
    /// ## Errors
    /// [`BuildError::TopologyChanged`] when the primitive count or motion
    /// layout differs from the original build.
    pub fn refit_bottom(&mut self, geometry: &dyn GeometryProvider, params: &BvhParams) -> Result<Aabb, BuildError> {
        let (bounds, topology) = primitive_bounds(geometry, params.use_motion)?;
        if topology != self.topology {
            return Err(BuildError::TopologyChanged);
        }
        Ok(self.bvh.refit(&bounds))
    }

    /// Builds a top structure over resolved instances.
    ///
    /// Returns the structure, its bounds and the bottoms it references.
    pub fn build_top<T>(
        resolved: &[ResolvedInstance<'_, T>],
        params: &BvhParams,
    ) -> Result<(Self, Aabb, Vec<BvhHandle>), BuildError> {
        let (bounds, instances, motion) = Self::instance_data(resolved);
        let bvh = SoftwareBvh::build(&bounds, params);
        let root = bvh.packed().root_bounds();
        let references = resolved.iter().map(|r| r.instance.bottom).collect();
        let accel = Self {
            bvh,
            instances,
            motion,
            topology: Topology {
                primitives: resolved.len(),
                steps: 1,
            },
        };
        Ok((accel, root, references))
    }

    /// Refits a top structure after instance transforms changed.
    ///
    /// ## Errors
    /// [`BuildError::TopologyChanged`] when the instance count differs or an
    /// instance now points at another bottom.
    pub fn refit_top<T>(&mut self, resolved: &[ResolvedInstance<'_, T>]) -> Result<Aabb, BuildError> {
        if resolved.len() != self.topology.primitives {
            return Err(BuildError::TopologyChanged);
        }
        let rebound = self
            .instances
            .iter()
            .zip(resolved)
            .any(|(packed, r)| packed.bottom != r.instance.bottom.index);
        if rebound {
            return Err(BuildError::TopologyChanged);
        }
        let (bounds, instances, motion) = Self::instance_data(resolved);
        self.instances = instances;
        self.motion = motion;
        Ok(self.bvh.refit(&bounds))
    }

    fn instance_data<T>(resolved: &[ResolvedInstance<'_, T>]) -> (Vec<Aabb>, Vec<PackedInstance>, Vec<[f32; 12]>) {
        let mut bounds = Vec::with_capacity(resolved.len());
        let mut instances = Vec::with_capacity(resolved.len());
        let mut motion = Vec::new();
        for r in resolved {
            bounds.push(instance_bounds(&r.bottom_bounds, r.instance));
            instances.push(PackedInstance::new(r.instance, r.instance.bottom, motion.len()));
            if r.instance.has_motion() {
                motion.extend(r.instance.motion.iter().map(Mat4::to_rows_3x4));
            }
        }
        (bounds, instances, motion)
    }

    /// Bytes uploaded to the device: nodes, primitive indices, instances and
    /// motion transforms, back to back.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bvh.packed().to_bytes();
        bytes.extend_from_slice(bytemuck::cast_slice(&self.instances));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.motion));
        bytes
    }
}
