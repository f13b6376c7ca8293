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

//! Kernel identifiers, launch routing, feature masks, arguments and the
//! constant-parameter layout.

use super::memory::DevicePtr;
use crate::photon_bitflags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Every kernel the integrator can enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKernel {
    /// Generates camera rays for new paths.
    IntegratorInitFromCamera,
    /// Initializes paths for baking.
    IntegratorInitFromBake,
    /// Closest-hit intersection.
    IntegratorIntersectClosest,
    /// Shadow-ray intersection.
    IntegratorIntersectShadow,
    /// Subsurface scattering intersection.
    IntegratorIntersectSubsurface,
    /// Volume stack initialization intersection.
    IntegratorIntersectVolumeStack,
    /// Background shading.
    IntegratorShadeBackground,
    /// Light shading.
    IntegratorShadeLight,
    /// Surface shading.
    IntegratorShadeSurface,
    /// Surface shading with ray-traced AO or bevel.
    IntegratorShadeSurfaceRaytrace,
    /// Surface shading with manifold next-event estimation.
    IntegratorShadeSurfaceMnee,
    /// Volume shading.
    IntegratorShadeVolume,
    /// Shadow shading.
    IntegratorShadeShadow,
    /// The whole path loop in one kernel.
    IntegratorMegakernel,
    /// Compacts active path states.
    IntegratorCompactStates,
    /// Resets integrator state.
    IntegratorReset,
    /// Shader evaluation for displacement.
    ShaderEvalDisplace,
    /// Shader evaluation for the background.
    ShaderEvalBackground,
    /// Adaptive sampling convergence check.
    AdaptiveSamplingCheck,
    /// Converts render buffers into display pixels.
    FilmConvert,
    /// Prefix sum over a buffer.
    PrefixSum,
}

impl DeviceKernel {
    /// Every kernel, in declaration order.
    pub const ALL: [DeviceKernel; 21] = [
        DeviceKernel::IntegratorInitFromCamera,
        DeviceKernel::IntegratorInitFromBake,
        DeviceKernel::IntegratorIntersectClosest,
        DeviceKernel::IntegratorIntersectShadow,
        DeviceKernel::IntegratorIntersectSubsurface,
        DeviceKernel::IntegratorIntersectVolumeStack,
        DeviceKernel::IntegratorShadeBackground,
        DeviceKernel::IntegratorShadeLight,
        DeviceKernel::IntegratorShadeSurface,
        DeviceKernel::IntegratorShadeSurfaceRaytrace,
        DeviceKernel::IntegratorShadeSurfaceMnee,
        DeviceKernel::IntegratorShadeVolume,
        DeviceKernel::IntegratorShadeShadow,
        DeviceKernel::IntegratorMegakernel,
        DeviceKernel::IntegratorCompactStates,
        DeviceKernel::IntegratorReset,
        DeviceKernel::ShaderEvalDisplace,
        DeviceKernel::ShaderEvalBackground,
        DeviceKernel::AdaptiveSamplingCheck,
        DeviceKernel::FilmConvert,
        DeviceKernel::PrefixSum,
    ];

    /// Entry-point name in compiled modules.
    pub fn entry_point(self) -> &'static str {
        match self {
            DeviceKernel::IntegratorInitFromCamera => "integrator_init_from_camera",
            DeviceKernel::IntegratorInitFromBake => "integrator_init_from_bake",
            DeviceKernel::IntegratorIntersectClosest => "integrator_intersect_closest",
            DeviceKernel::IntegratorIntersectShadow => "integrator_intersect_shadow",
            DeviceKernel::IntegratorIntersectSubsurface => "integrator_intersect_subsurface",
            DeviceKernel::IntegratorIntersectVolumeStack => "integrator_intersect_volume_stack",
            DeviceKernel::IntegratorShadeBackground => "integrator_shade_background",
            DeviceKernel::IntegratorShadeLight => "integrator_shade_light",
            DeviceKernel::IntegratorShadeSurface => "integrator_shade_surface",
            DeviceKernel::IntegratorShadeSurfaceRaytrace => "integrator_shade_surface_raytrace",
            DeviceKernel::IntegratorShadeSurfaceMnee => "integrator_shade_surface_mnee",
            DeviceKernel::IntegratorShadeVolume => "integrator_shade_volume",
            DeviceKernel::IntegratorShadeShadow => "integrator_shade_shadow",
            DeviceKernel::IntegratorMegakernel => "integrator_megakernel",
            DeviceKernel::IntegratorCompactStates => "integrator_compact_states",
            DeviceKernel::IntegratorReset => "integrator_reset",
            DeviceKernel::ShaderEvalDisplace => "shader_eval_displace",
            DeviceKernel::ShaderEvalBackground => "shader_eval_background",
            DeviceKernel::AdaptiveSamplingCheck => "adaptive_sampling_check",
            DeviceKernel::FilmConvert => "film_convert",
            DeviceKernel::PrefixSum => "prefix_sum",
        }
    }

    /// Category used for launch routing.
    pub fn category(self) -> KernelCategory {
        match self {
            DeviceKernel::IntegratorIntersectClosest
            | DeviceKernel::IntegratorIntersectShadow
            | DeviceKernel::IntegratorIntersectSubsurface
            | DeviceKernel::IntegratorIntersectVolumeStack => KernelCategory::Intersect,
            DeviceKernel::IntegratorShadeSurfaceRaytrace
            | DeviceKernel::IntegratorShadeSurfaceMnee => KernelCategory::ShadeWithTracing,
            _ => KernelCategory::Compute,
        }
    }
}

/// Broad classes of kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelCategory {
    /// Pure ray queries.
    Intersect,
    /// Shading that traces rays from inside the kernel.
    ShadeWithTracing,
    /// Everything else.
    Compute,
}

/// Physical ray-tracing pipelines on backends that distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtPipeline {
    /// Intersection-only programs.
    Intersect,
    /// Shading programs that may trace.
    Shade,
}

/// How a kernel is launched on a device with hardware ray tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchRoute {
    /// Ray-tracing launch with a pipeline and a raygen record selector.
    RayTracing {
        /// Pipeline to bind.
        pipeline: RtPipeline,
        /// Raygen record index in the shader binding table.
        raygen: u32,
    },
    /// Plain compute dispatch.
    Compute,
}

/// Pure routing decision for hardware ray-tracing backends.
pub fn launch_route(kernel: DeviceKernel) -> LaunchRoute {
    let raygen = match kernel {
        DeviceKernel::IntegratorIntersectClosest => 0,
        DeviceKernel::IntegratorIntersectShadow => 1,
        DeviceKernel::IntegratorIntersectSubsurface => 2,
        DeviceKernel::IntegratorIntersectVolumeStack => 3,
        DeviceKernel::IntegratorShadeSurfaceRaytrace => 4,
        DeviceKernel::IntegratorShadeSurfaceMnee => 5,
        _ => return LaunchRoute::Compute,
    };
    let pipeline = match kernel.category() {
        KernelCategory::Intersect => RtPipeline::Intersect,
        _ => RtPipeline::Shade,
    };
    LaunchRoute::RayTracing { pipeline, raygen }
}

photon_bitflags! {
    /// Kernel features requested by the scene. Adaptive compilation strips
    /// code for features that are not set.
    pub struct KernelFeatures: u32 {
        /// Camera ray generation and film.
        const PATH_TRACING = 1 << 0;
        /// Shader nodes beyond the basic set.
        const NODES_EXTRA = 1 << 1;
        /// Hair and curves.
        const HAIR = 1 << 2;
        /// Point clouds.
        const POINTCLOUD = 1 << 3;
        /// Object motion blur.
        const OBJECT_MOTION = 1 << 4;
        /// Deformation motion blur.
        const CAMERA_MOTION = 1 << 5;
        /// Volumes.
        const VOLUME = 1 << 6;
        /// Subsurface scattering.
        const SUBSURFACE = 1 << 7;
        /// Transparent shadows.
        const TRANSPARENT = 1 << 8;
        /// Shadow catcher.
        const SHADOW_CATCHER = 1 << 9;
        /// Denoising passes.
        const DENOISING = 1 << 10;
        /// Baking.
        const BAKING = 1 << 11;
        /// Ray-traced AO and bevel.
        const NODE_RAYTRACE = 1 << 12;
        /// Manifold next-event estimation.
        const MNEE = 1 << 13;
        /// Adaptive sampling.
        const ADAPTIVE_SAMPLING = 1 << 14;
    }
}

/// One argument of a kernel launch.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArg {
    /// A device pointer.
    Pointer(DevicePtr),
    /// A signed integer.
    Int(i32),
    /// An unsigned integer.
    UInt(u32),
    /// A float.
    Float(f32),
    /// Raw bytes of a by-value struct.
    Bytes(Vec<u8>),
}

impl KernelArg {
    /// Bytes as passed by value.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            KernelArg::Pointer(p) => p.0.to_le_bytes().to_vec(),
            KernelArg::Int(v) => v.to_le_bytes().to_vec(),
            KernelArg::UInt(v) => v.to_le_bytes().to_vec(),
            KernelArg::Float(v) => v.to_le_bytes().to_vec(),
            KernelArg::Bytes(b) => b.clone(),
        }
    }
}

/// Ordered launch arguments, built fluently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelArgs {
    args: Vec<KernelArg>,
}

impl KernelArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a device pointer.
    pub fn ptr(mut self, ptr: DevicePtr) -> Self {
        self.args.push(KernelArg::Pointer(ptr));
        self
    }

    /// Appends an `i32`.
    pub fn int(mut self, v: i32) -> Self {
        self.args.push(KernelArg::Int(v));
        self
    }

    /// Appends a `u32`.
    pub fn uint(mut self, v: u32) -> Self {
        self.args.push(KernelArg::UInt(v));
        self
    }

    /// Appends an `f32`.
    pub fn float(mut self, v: f32) -> Self {
        self.args.push(KernelArg::Float(v));
        self
    }

    /// Appends a by-value struct.
    pub fn bytes<T: bytemuck::Pod>(mut self, value: &T) -> Self {
        self.args.push(KernelArg::Bytes(bytemuck::bytes_of(value).to_vec()));
        self
    }

    /// Arguments in order.
    pub fn as_slice(&self) -> &[KernelArg] {
        &self.args
    }

    /// Replaces every pointer argument through `f`.
    pub fn map_pointers<E>(&self, mut f: impl FnMut(DevicePtr) -> Result<DevicePtr, E>) -> Result<Self, E> {
        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                KernelArg::Pointer(p) => f(*p).map(KernelArg::Pointer),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self { args })
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// `true` without arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A named field of the kernel constant-parameter block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamField {
    /// Field name; globals use the descriptor name.
    pub name: String,
    /// Byte offset inside the block.
    pub offset: usize,
    /// Declared size in bytes.
    pub size: usize,
    /// Backends without raw device pointers bind globals at this slot.
    pub binding: Option<u32>,
}

/// Layout of the single constant-parameter block shared by a kernel module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamLayout {
    fields: Vec<ParamField>,
    size: usize,
}

impl ParamLayout {
    /// Alignment of every field.
    pub const ALIGN: usize = 8;

    /// An empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field of `size` bytes.
    pub fn field(mut self, name: impl Into<String>, size: usize) -> Self {
        let offset = self.size.next_multiple_of(Self::ALIGN);
        self.fields.push(ParamField {
            name: name.into(),
            offset,
            size,
            binding: None,
        });
        self.size = offset + size;
        self
    }

    /// Appends an 8-byte pointer field for a global buffer bound at `binding`.
    pub fn global(mut self, name: impl Into<String>, binding: u32) -> Self {
        self = self.field(name, std::mem::size_of::<u64>());
        if let Some(last) = self.fields.last_mut() {
            last.binding = Some(binding);
        }
        self
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All fields.
    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    /// Total size rounded to 16 bytes, never zero.
    pub fn size(&self) -> usize {
        self.size.max(16).next_multiple_of(16)
    }
}

/// One compiled module: a name, the kernels it provides and its parameter layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelVariant {
    /// Variant name, used in cache file names (e.g. `"kernel"`, `"filter"`).
    pub name: String,
    /// Kernels exported by this module.
    pub kernels: Vec<DeviceKernel>,
    /// Constant-parameter layout.
    pub params: ParamLayout,
    /// Kernel launched once after load to commit lazily reserved local memory.
    pub reserve_kernel: Option<DeviceKernel>,
}

/// Everything a device needs to build and load its kernels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelProgram {
    /// Root of the kernel source tree.
    pub source_dir: PathBuf,
    /// Modules, loaded in order.
    pub variants: Vec<KernelVariant>,
}

impl KernelProgram {
    /// The variant exporting `kernel`.
    pub fn variant_for(&self, kernel: DeviceKernel) -> Option<&KernelVariant> {
        self.variants.iter().find(|v| v.kernels.contains(&kernel))
    }
}

/// Lifecycle of a kernel artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Not loaded into any context.
    Unloaded,
    /// Being compiled.
    Compiling,
    /// Loaded and current.
    Loaded,
    /// Compilation or load failed.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_by_category() {
        for kernel in DeviceKernel::ALL {
            match (kernel.category(), launch_route(kernel)) {
                (KernelCategory::Intersect, LaunchRoute::RayTracing { pipeline, .. }) => {
                    assert_eq!(pipeline, RtPipeline::Intersect)
                }
                (KernelCategory::ShadeWithTracing, LaunchRoute::RayTracing { pipeline, .. }) => {
                    assert_eq!(pipeline, RtPipeline::Shade)
                }
                (KernelCategory::Compute, LaunchRoute::Compute) => {}
                (category, route) => panic!("{kernel:?}: {category:?} routed to {route:?}"),
            }
        }
    }

    #[test]
    fn raygen_selectors_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kernel in DeviceKernel::ALL {
            if let LaunchRoute::RayTracing { raygen, .. } = launch_route(kernel) {
                assert!(seen.insert(raygen), "duplicate raygen {raygen}");
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn param_layout_aligns_fields() {
        let layout = ParamLayout::new()
            .field("flags", 4)
            .global("texture_info", 1)
            .field("data", 20);
        assert_eq!(layout.get("flags").unwrap().offset, 0);
        assert_eq!(layout.get("texture_info").unwrap().offset, 8);
        assert_eq!(layout.get("texture_info").unwrap().binding, Some(1));
        assert_eq!(layout.get("data").unwrap().offset, 16);
        assert_eq!(layout.size(), 48);
        assert!(layout.get("missing").is_none());
    }

    #[test]
    fn map_pointers_only_touches_pointers() {
        let args = KernelArgs::new().ptr(DevicePtr(7)).int(-3).float(1.5);
        let mapped = args
            .map_pointers::<()>(|p| Ok(DevicePtr(p.0 + 100)))
            .unwrap();
        assert_eq!(mapped.as_slice()[0], KernelArg::Pointer(DevicePtr(107)));
        assert_eq!(mapped.as_slice()[1], KernelArg::Int(-3));
        assert_eq!(mapped.len(), 3);
    }
}
