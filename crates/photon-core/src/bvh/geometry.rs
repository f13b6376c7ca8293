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

//! Read-only geometry exposed by the scene provider during builds.
//!
//! Motion steps follow one convention everywhere: a geometry with `n` steps
//! stores the center step (time 0.5) in the main array and the other `n - 1`
//! steps, in time order, in the motion array.

use super::BvhHandle;
use crate::math::{Mat4, Vec3, Vec4};
use crate::photon_bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Stable identity of a geometry in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeometryId(pub u32);

/// Cross-section of curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CurveShape {
    /// Flat camera-facing ribbons.
    Ribbon,
    /// Round tubes.
    #[default]
    Thick,
}

/// Spline basis of curve keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CurveBasis {
    /// Interpolating Catmull-Rom (the authoring basis).
    #[default]
    CatmullRom,
    /// Uniform cubic B-spline.
    BSpline,
    /// Piecewise linear.
    Linear,
}

/// Keys `first_key..first_key + num_keys` form one curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveRange {
    /// Index of the first key.
    pub first_key: u32,
    /// Number of keys.
    pub num_keys: u32,
}

impl CurveRange {
    /// Segments between consecutive keys.
    pub fn num_segments(&self) -> u32 {
        self.num_keys.saturating_sub(1)
    }
}

/// Indexed triangles.
#[derive(Debug, Clone, Copy)]
pub struct TriangleMesh<'a> {
    /// Center-step positions.
    pub vertices: &'a [Vec3],
    /// Vertex indices per triangle.
    pub triangles: &'a [[u32; 3]],
    /// Other motion steps, `vertices.len()` each.
    pub motion_vertices: &'a [Vec3],
}

/// Curves with per-key radius in `w`.
#[derive(Debug, Clone, Copy)]
pub struct CurveSet<'a> {
    /// Center-step keys.
    pub keys: &'a [Vec4],
    /// Curves.
    pub curves: &'a [CurveRange],
    /// Other motion steps, `keys.len()` each.
    pub motion_keys: &'a [Vec4],
    /// Cross-section.
    pub shape: CurveShape,
    /// Basis of `keys`.
    pub basis: CurveBasis,
}

/// Points with radius in `w`.
#[derive(Debug, Clone, Copy)]
pub struct PointSet<'a> {
    /// Center-step points.
    pub points: &'a [Vec4],
    /// Other motion steps, `points.len()` each.
    pub motion_points: &'a [Vec4],
}

/// Primitives of one geometry.
#[derive(Debug, Clone, Copy)]
pub enum GeometryPrimitives<'a> {
    /// A triangle mesh.
    Triangles(TriangleMesh<'a>),
    /// Hair or fur.
    Curves(CurveSet<'a>),
    /// A point cloud.
    Points(PointSet<'a>),
}

impl GeometryPrimitives<'_> {
    /// Number of primitives a builder sees (triangles, curve segments, points).
    pub fn primitive_count(&self) -> usize {
        match self {
            GeometryPrimitives::Triangles(mesh) => mesh.triangles.len(),
            GeometryPrimitives::Curves(curves) => curves
                .curves
                .iter()
                .map(|c| c.num_segments() as usize)
                .sum(),
            GeometryPrimitives::Points(points) => points.points.len(),
        }
    }
}

/// Implemented by the scene for every geometry that needs a bottom structure.
pub trait GeometryProvider: Send + Sync + Debug {
    /// Stable id.
    fn geometry_id(&self) -> GeometryId;

    /// Primitive arrays.
    fn primitives(&self) -> GeometryPrimitives<'_>;

    /// Number of motion steps, 1 without motion blur. Always odd.
    fn motion_steps(&self) -> usize {
        1
    }
}

/// Returns the data of `step` under the center-step convention.
///
/// `center` holds the step at index `steps / 2`; `motion` the others in order.
pub fn motion_step<'a, T>(center: &'a [T], motion: &'a [T], steps: usize, step: usize) -> &'a [T] {
    let mid = steps / 2;
    if steps <= 1 || step == mid {
        return center;
    }
    let n = center.len();
    let index = if step < mid { step } else { step - 1 };
    motion.get(index * n..(index + 1) * n).unwrap_or(center)
}

photon_bitflags! {
    /// Ray types an object is visible to.
    pub struct RayVisibility: u32 {
        /// Camera rays.
        const CAMERA = 1 << 0;
        /// Diffuse bounces.
        const DIFFUSE = 1 << 1;
        /// Glossy bounces.
        const GLOSSY = 1 << 2;
        /// Transmission.
        const TRANSMIT = 1 << 3;
        /// Volume scattering.
        const VOLUME_SCATTER = 1 << 4;
        /// Shadow rays.
        const SHADOW = 1 << 5;
        /// Shadow catcher rays.
        const SHADOW_CATCHER = 1 << 6;
    }
}

impl RayVisibility {
    /// 8-bit instance mask for hardware traversal.
    pub fn instance_mask(self) -> u8 {
        (self.bits() & 0xFF) as u8
    }
}

/// One object placed in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInstance {
    /// User instance id reported by intersections.
    pub object_id: u32,
    /// Bottom structure of the object's geometry.
    pub bottom: BvhHandle,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Transforms at evenly spaced times over `[0, 1]`; empty when static.
    pub motion: Vec<Mat4>,
    /// Ray visibility.
    pub visibility: RayVisibility,
    /// Excluded from the top structure when `false`.
    pub traceable: bool,
}

impl ObjectInstance {
    /// A static, fully visible instance.
    pub fn new(object_id: u32, bottom: BvhHandle, transform: Mat4) -> Self {
        Self {
            object_id,
            bottom,
            transform,
            motion: Vec::new(),
            visibility: RayVisibility::all(),
            traceable: true,
        }
    }

    /// `true` if the instance has at least two motion transforms.
    pub fn has_motion(&self) -> bool {
        self.motion.len() > 1
    }

    /// `true` if the instance goes into the top structure.
    pub fn is_traced(&self) -> bool {
        self.traceable && !self.visibility.is_empty()
    }
}

/// Owned primitive storage implementing [`GeometryProvider`].
#[derive(Debug, Clone)]
pub enum OwnedGeometry {
    /// Triangle mesh.
    Mesh {
        /// Id.
        id: GeometryId,
        /// Center-step positions.
        vertices: Vec<Vec3>,
        /// Triangles.
        triangles: Vec<[u32; 3]>,
        /// Other motion steps.
        motion_vertices: Vec<Vec3>,
        /// Motion step count.
        steps: usize,
    },
    /// Curves.
    Curves {
        /// Id.
        id: GeometryId,
        /// Keys.
        keys: Vec<Vec4>,
        /// Curve ranges.
        curves: Vec<CurveRange>,
        /// Other motion steps.
        motion_keys: Vec<Vec4>,
        /// Motion step count.
        steps: usize,
        /// Cross-section.
        shape: CurveShape,
        /// Basis.
        basis: CurveBasis,
    },
    /// Points.
    Points {
        /// Id.
        id: GeometryId,
        /// Points.
        points: Vec<Vec4>,
        /// Other motion steps.
        motion_points: Vec<Vec4>,
        /// Motion step count.
        steps: usize,
    },
}

impl OwnedGeometry {
    /// A static triangle mesh.
    pub fn mesh(id: u32, vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        OwnedGeometry::Mesh {
            id: GeometryId(id),
            vertices,
            triangles,
            motion_vertices: Vec::new(),
            steps: 1,
        }
    }

    /// Static Catmull-Rom curves.
    pub fn curves(id: u32, keys: Vec<Vec4>, curves: Vec<CurveRange>, shape: CurveShape) -> Self {
        OwnedGeometry::Curves {
            id: GeometryId(id),
            keys,
            curves,
            motion_keys: Vec::new(),
            steps: 1,
            shape,
            basis: CurveBasis::CatmullRom,
        }
    }

    /// A static point cloud.
    pub fn points(id: u32, points: Vec<Vec4>) -> Self {
        OwnedGeometry::Points {
            id: GeometryId(id),
            points,
            motion_points: Vec::new(),
            steps: 1,
        }
    }
}

impl GeometryProvider for OwnedGeometry {
    fn geometry_id(&self) -> GeometryId {
        match self {
            OwnedGeometry::Mesh { id, .. }
            | OwnedGeometry::Curves { id, .. }
            | OwnedGeometry::Points { id, .. } => *id,
        }
    }

    fn primitives(&self) -> GeometryPrimitives<'_> {
        match self {
            OwnedGeometry::Mesh {
                vertices,
                triangles,
                motion_vertices,
                ..
            } => GeometryPrimitives::Triangles(TriangleMesh {
                vertices,
                triangles,
                motion_vertices,
            }),
            OwnedGeometry::Curves {
                keys,
                curves,
                motion_keys,
                shape,
                basis,
                ..
            } => GeometryPrimitives::Curves(CurveSet {
                keys,
                curves,
                motion_keys,
                shape: *shape,
                basis: *basis,
            }),
            OwnedGeometry::Points {
                points,
                motion_points,
                ..
            } => GeometryPrimitives::Points(PointSet {
                points,
                motion_points,
            }),
        }
    }

    fn motion_steps(&self) -> usize {
        match self {
            OwnedGeometry::Mesh { steps, .. }
            | OwnedGeometry::Curves { steps, .. }
            | OwnedGeometry::Points { steps, .. } => (*steps).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_step_indexing() {
        let center = [10, 11];
        let motion = [0, 1, 20, 21];
        assert_eq!(motion_step(&center, &motion, 3, 0), &[0, 1]);
        assert_eq!(motion_step(&center, &motion, 3, 1), &[10, 11]);
        assert_eq!(motion_step(&center, &motion, 3, 2), &[20, 21]);
        assert_eq!(motion_step(&center, &motion, 1, 0), &[10, 11]);
    }

    #[test]
    fn curve_primitive_count_is_segments() {
        let geom = OwnedGeometry::curves(
            1,
            vec![Vec4::ZERO; 7],
            vec![
                CurveRange { first_key: 0, num_keys: 4 },
                CurveRange { first_key: 4, num_keys: 3 },
            ],
            CurveShape::Thick,
        );
        assert_eq!(geom.primitives().primitive_count(), 5);
    }

    #[test]
    fn invisible_instances_are_not_traced() {
        let handle = BvhHandle { index: 0, generation: 0 };
        let mut inst = ObjectInstance::new(3, handle, Mat4::IDENTITY);
        assert!(inst.is_traced());
        assert_eq!(inst.visibility.instance_mask(), 0x7F);
        inst.visibility = RayVisibility::EMPTY;
        assert!(!inst.is_traced());
    }
}
