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

//! Acceleration-structure contracts: layouts, build policy, handles and the
//! geometry the builders consume.

pub mod geometry;

pub use geometry::{
    CurveBasis, CurveRange, CurveSet, CurveShape, GeometryId, GeometryPrimitives,
    GeometryProvider, ObjectInstance, OwnedGeometry, PointSet, RayVisibility, TriangleMesh,
};

use crate::photon_bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acceleration-structure formats a device consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BvhLayout {
    /// Software binary BVH traversed by kernel code.
    Bvh2,
    /// OptiX hardware structures.
    Optix,
    /// HIP-RT hardware structures.
    HipRt,
    /// Metal hardware structures.
    Metal,
    /// oneAPI / Embree GPU structures.
    OneApi,
}

photon_bitflags! {
    /// Set of [`BvhLayout`]s.
    pub struct BvhLayoutMask: u32 {
        /// Software BVH2.
        const BVH2 = 1 << 0;
        /// OptiX.
        const OPTIX = 1 << 1;
        /// HIP-RT.
        const HIPRT = 1 << 2;
        /// Metal.
        const METAL = 1 << 3;
        /// oneAPI.
        const ONEAPI = 1 << 4;
    }
}

impl BvhLayout {
    /// The bit of this layout.
    pub fn mask(self) -> BvhLayoutMask {
        match self {
            BvhLayout::Bvh2 => BvhLayoutMask::BVH2,
            BvhLayout::Optix => BvhLayoutMask::OPTIX,
            BvhLayout::HipRt => BvhLayoutMask::HIPRT,
            BvhLayout::Metal => BvhLayoutMask::METAL,
            BvhLayout::OneApi => BvhLayoutMask::ONEAPI,
        }
    }
}

photon_bitflags! {
    /// Flags a structure was built with.
    pub struct BuildFlags: u32 {
        /// Optimize for traversal speed.
        const PREFER_FAST_TRACE = 1 << 0;
        /// Optimize for build speed.
        const PREFER_FAST_BUILD = 1 << 1;
        /// The structure may be compacted after building.
        const ALLOW_COMPACTION = 1 << 2;
        /// The structure may be refit in place.
        const ALLOW_UPDATE = 1 << 3;
    }
}

/// Whether a structure is reused across frames or rebuilt interactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildPolicy {
    /// Built once, traced many times: fast trace and compaction.
    #[default]
    Static,
    /// Rebuilt or refit every frame: fast build and update.
    Dynamic,
}

impl BuildPolicy {
    /// Build flags implied by the policy.
    pub fn flags(self) -> BuildFlags {
        match self {
            BuildPolicy::Static => BuildFlags::PREFER_FAST_TRACE | BuildFlags::ALLOW_COMPACTION,
            BuildPolicy::Dynamic => BuildFlags::PREFER_FAST_BUILD | BuildFlags::ALLOW_UPDATE,
        }
    }
}

/// Parameters of one build request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvhParams {
    /// Debug label.
    pub label: String,
    /// Build policy.
    pub policy: BuildPolicy,
    /// Largest primitive count in a software leaf.
    pub max_leaf_size: usize,
    /// SAH bins per axis for the software builder.
    pub num_bins: usize,
    /// Build motion bounds when geometry has motion steps.
    pub use_motion: bool,
}

impl Default for BvhParams {
    fn default() -> Self {
        Self {
            label: String::from("bvh"),
            policy: BuildPolicy::Static,
            max_leaf_size: 4,
            num_bins: 16,
            use_motion: true,
        }
    }
}

impl BvhParams {
    /// Default parameters with a label and policy.
    pub fn new(label: impl Into<String>, policy: BuildPolicy) -> Self {
        Self {
            label: label.into(),
            policy,
            ..Self::default()
        }
    }
}

/// Generational index of a structure in a device's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BvhHandle {
    /// Slot index.
    pub index: u32,
    /// Slot generation at allocation time.
    pub generation: u32,
}

impl fmt::Display for BvhHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bvh#{}v{}", self.index, self.generation)
    }
}

/// Bottom (per geometry) or top (per scene) level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelLevel {
    /// Per-geometry structure.
    Bottom,
    /// Instanced scene structure.
    Top,
}

/// Lifecycle of one structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelState {
    /// Allocated, never built.
    Unbuilt,
    /// First build in progress.
    Building,
    /// Ready for tracing.
    Built,
    /// Refit in progress.
    Refitting,
    /// Full rebuild of a previously built structure in progress.
    Rebuilding,
    /// Released; memory reclaimed or queued for reclamation.
    Freed,
}

/// What to build.
#[derive(Debug, Clone, Copy)]
pub enum BvhInput<'a> {
    /// One geometry.
    Bottom(&'a dyn GeometryProvider),
    /// Instances of previously built bottom structures.
    Top(&'a [ObjectInstance]),
}

impl BvhInput<'_> {
    /// Level produced by this input.
    pub fn level(&self) -> AccelLevel {
        match self {
            BvhInput::Bottom(_) => AccelLevel::Bottom,
            BvhInput::Top(_) => AccelLevel::Top,
        }
    }
}

/// A build, rebuild or refit request.
#[derive(Debug, Clone)]
pub struct BvhBuildRequest<'a> {
    /// Parameters.
    pub params: BvhParams,
    /// Geometry or instances.
    pub input: BvhInput<'a>,
    /// Structure to rebuild or refit; `None` builds a new one.
    pub existing: Option<BvhHandle>,
}

impl<'a> BvhBuildRequest<'a> {
    /// A new bottom-level structure.
    pub fn bottom(params: BvhParams, geometry: &'a dyn GeometryProvider) -> Self {
        Self {
            params,
            input: BvhInput::Bottom(geometry),
            existing: None,
        }
    }

    /// A new top-level structure.
    pub fn top(params: BvhParams, instances: &'a [ObjectInstance]) -> Self {
        Self {
            params,
            input: BvhInput::Top(instances),
            existing: None,
        }
    }

    /// Targets an existing structure.
    pub fn with_existing(mut self, handle: BvhHandle) -> Self {
        self.existing = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_map_to_exclusive_flag_sets() {
        let stat = BuildPolicy::Static.flags();
        let dynamic = BuildPolicy::Dynamic.flags();
        assert!(stat.contains(BuildFlags::ALLOW_COMPACTION));
        assert!(!stat.contains(BuildFlags::ALLOW_UPDATE));
        assert!(dynamic.contains(BuildFlags::ALLOW_UPDATE));
        assert!(!dynamic.intersects(BuildFlags::ALLOW_COMPACTION | BuildFlags::PREFER_FAST_TRACE));
    }
}
