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

//! Per-primitive bounds of bottom-level geometry.

use super::curves::segment_bounds;
use photon_core::bvh::geometry::motion_step;
use photon_core::bvh::{GeometryPrimitives, GeometryProvider};
use photon_core::device::BuildError;
use photon_core::math::{Aabb, Vec3, Vec4};

/// Shape of a geometry as far as a refit is concerned.
///
/// A refit is only valid when the primitive count and motion layout are unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topology {
    /// Primitives seen by the builder.
    pub primitives: usize,
    /// Motion steps.
    pub steps: usize,
}

impl Topology {
    /// Topology of `geometry`.
    pub fn of(geometry: &dyn GeometryProvider) -> Self {
        Self {
            primitives: geometry.primitives().primitive_count(),
            steps: geometry.motion_steps().max(1),
        }
    }
}

/// Bounds of every primitive at motion `step`. Primitives with invalid
/// indices get [`Aabb::INVALID`].
pub fn step_bounds(geometry: &dyn GeometryProvider, step: usize) -> Vec<Aabb> {
    let steps = geometry.motion_steps().max(1);
    match geometry.primitives() {
        GeometryPrimitives::Triangles(mesh) => {
            let verts = motion_step(mesh.vertices, mesh.motion_vertices, steps, step);
            mesh.triangles
                .iter()
                .map(|tri| {
                    tri.iter().fold(Aabb::INVALID, |acc, &i| match verts.get(i as usize) {
                        Some(v) => acc.grow(*v),
                        None => acc,
                    })
                })
                .collect()
        }
        GeometryPrimitives::Curves(set) => {
            let keys = motion_step(set.keys, set.motion_keys, steps, step);
            let mut bounds = Vec::with_capacity(GeometryPrimitives::Curves(set).primitive_count());
            for curve in set.curves {
                for segment in 0..curve.num_segments() {
                    bounds.push(segment_bounds(keys, curve, segment, set.basis));
                }
            }
            bounds
        }
        GeometryPrimitives::Points(set) => {
            let points = motion_step(set.points, set.motion_points, steps, step);
            points.iter().map(point_bounds).collect()
        }
    }
}

fn point_bounds(p: &Vec4) -> Aabb {
    Aabb::from_sphere(Vec3::new(p.x, p.y, p.z), p.w)
}

/// Bounds of every primitive, unioned over motion steps when `use_motion` is set.
///
/// ## Errors
/// [`BuildError::EmptyGeometry`] when there are no primitives.
pub fn primitive_bounds(
    geometry: &dyn GeometryProvider,
    use_motion: bool,
) -> Result<(Vec<Aabb>, Topology), BuildError> {
    let topology = Topology::of(geometry);
    if topology.primitives == 0 {
        return Err(BuildError::EmptyGeometry);
    }
    let center = topology.steps / 2;
    let mut bounds = step_bounds(geometry, center);
    if use_motion && topology.steps > 1 {
        for step in (0..topology.steps).filter(|&s| s != center) {
            for (acc, b) in bounds.iter_mut().zip(step_bounds(geometry, step)) {
                *acc = acc.merge(&b);
            }
        }
    }
    Ok((bounds, topology))
}

#[cfg(test)]
mod tests {
    use super::*;
    use photon_core::bvh::{CurveRange, CurveShape, OwnedGeometry};

    #[test]
    fn triangle_bounds_cover_vertices() {
        let mesh = OwnedGeometry::mesh(
            1,
            vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(5.0, 5.0, 5.0)],
            vec![[0, 1, 2], [1, 2, 3]],
        );
        let (bounds, topology) = primitive_bounds(&mesh, true).unwrap();
        assert_eq!(topology.primitives, 2);
        assert_eq!(bounds[0].max, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(bounds[1].max, Vec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn out_of_range_indices_are_invalid() {
        let mesh = OwnedGeometry::mesh(1, vec![Vec3::ZERO], vec![[7, 8, 9]]);
        let (bounds, _) = primitive_bounds(&mesh, false).unwrap();
        assert!(!bounds[0].is_valid());
    }

    #[test]
    fn motion_steps_are_unioned() {
        let mut points = OwnedGeometry::points(3, vec![Vec4::new(0.0, 0.0, 0.0, 0.5)]);
        if let OwnedGeometry::Points { motion_points, steps, .. } = &mut points {
            *motion_points = vec![Vec4::new(-2.0, 0.0, 0.0, 0.5), Vec4::new(2.0, 0.0, 0.0, 0.5)];
            *steps = 3;
        }
        let (still, _) = primitive_bounds(&points, false).unwrap();
        assert_eq!(still[0].min.x, -0.5);
        let (moving, topology) = primitive_bounds(&points, true).unwrap();
        assert_eq!(topology.steps, 3);
        assert_eq!(moving[0].min.x, -2.5);
        assert_eq!(moving[0].max.x, 2.5);
    }

    #[test]
    fn curves_yield_one_box_per_segment() {
        let keys = (0..4).map(|i| Vec4::new(i as f32, 0.0, 0.0, 0.1)).collect();
        let curves = OwnedGeometry::curves(
            2,
            keys,
            vec![CurveRange { first_key: 0, num_keys: 4 }],
            CurveShape::Thick,
        );
        let (bounds, topology) = primitive_bounds(&curves, true).unwrap();
        assert_eq!(topology.primitives, 3);
        assert_eq!(bounds.len(), 3);
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let mesh = OwnedGeometry::mesh(1, Vec::new(), Vec::new());
        assert_eq!(primitive_bounds(&mesh, true).unwrap_err(), BuildError::EmptyGeometry);
    }
}
