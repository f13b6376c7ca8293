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

//! Curve key conversion and segment bounds.

use photon_core::bvh::{CurveBasis, CurveRange};
use photon_core::math::{Aabb, Vec4};

/// Rows of `B⁻¹ · C` scaled by 6, mapping four Catmull-Rom control points to
/// the four uniform B-spline control points of the same segment.
const CATMULL_ROM_TO_BSPLINE: [[f32; 4]; 4] = [
    [7.0, -4.0, 5.0, -2.0],
    [-2.0, 11.0, -4.0, 1.0],
    [1.0, -4.0, 11.0, -2.0],
    [-2.0, 5.0, -4.0, 7.0],
];

/// The four keys controlling `segment` of `curve`, with end keys repeated.
pub fn segment_keys(keys: &[Vec4], curve: &CurveRange, segment: u32) -> [Vec4; 4] {
    let first = curve.first_key as usize;
    let last = first + curve.num_keys.saturating_sub(1) as usize;
    let at = |offset: i64| {
        let index = (first as i64 + segment as i64 + offset).clamp(first as i64, last as i64);
        keys.get(index as usize).copied().unwrap_or(Vec4::ZERO)
    };
    [at(-1), at(0), at(1), at(2)]
}

/// Converts one Catmull-Rom segment to B-spline control points. Radius is
/// converted along with position.
pub fn catmull_rom_to_bspline(cr: [Vec4; 4]) -> [Vec4; 4] {
    CATMULL_ROM_TO_BSPLINE.map(|row| {
        (cr[0] * row[0] + cr[1] * row[1] + cr[2] * row[2] + cr[3] * row[3]) * (1.0 / 6.0)
    })
}

/// Evaluates a uniform cubic B-spline segment at `t` in `[0, 1]`.
pub fn eval_bspline(p: [Vec4; 4], t: f32) -> Vec4 {
    let it = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    let b0 = it * it * it / 6.0;
    let b1 = (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0;
    let b2 = (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0;
    let b3 = t3 / 6.0;
    p[0] * b0 + p[1] * b1 + p[2] * b2 + p[3] * b3
}

/// Evaluates a Catmull-Rom segment at `t` in `[0, 1]`.
pub fn eval_catmull_rom(p: [Vec4; 4], t: f32) -> Vec4 {
    let t2 = t * t;
    let t3 = t2 * t;
    let b0 = -0.5 * t3 + t2 - 0.5 * t;
    let b1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let b2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let b3 = 0.5 * t3 - 0.5 * t2;
    p[0] * b0 + p[1] * b1 + p[2] * b2 + p[3] * b3
}

/// Conservative bounds of one segment including its radius.
///
/// Cubic segments are bounded by the convex hull of their B-spline control
/// points; linear segments by their two end keys.
pub fn segment_bounds(keys: &[Vec4], curve: &CurveRange, segment: u32, basis: CurveBasis) -> Aabb {
    let cr = segment_keys(keys, curve, segment);
    let control = match basis {
        CurveBasis::Linear => return linear_bounds(cr[1], cr[2]),
        CurveBasis::CatmullRom => catmull_rom_to_bspline(cr),
        CurveBasis::BSpline => cr,
    };
    control.iter().fold(Aabb::INVALID, |acc, k| {
        acc.merge(&Aabb::from_sphere(k.truncate(), k.w))
    })
}

fn linear_bounds(a: Vec4, b: Vec4) -> Aabb {
    Aabb::from_sphere(a.truncate(), a.w).merge(&Aabb::from_sphere(b.truncate(), b.w))
}

/// Re-expresses every key of `curves` in `target` basis for engines whose
/// native basis differs from the authoring basis.
///
/// The result holds four keys per segment, in segment order.
pub fn convert_keys(keys: &[Vec4], curves: &[CurveRange], from: CurveBasis, target: CurveBasis) -> Vec<Vec4> {
    let mut out = Vec::new();
    for curve in curves {
        for segment in 0..curve.num_segments() {
            let cr = segment_keys(keys, curve, segment);
            let converted = match (from, target) {
                (CurveBasis::CatmullRom, CurveBasis::BSpline) => catmull_rom_to_bspline(cr),
                _ => cr,
            };
            out.extend_from_slice(&converted);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn keys() -> Vec<Vec4> {
        vec![
            Vec4::new(0.0, 0.0, 0.0, 0.1),
            Vec4::new(1.0, 2.0, 0.0, 0.1),
            Vec4::new(2.0, -1.0, 1.0, 0.2),
            Vec4::new(3.0, 0.5, 2.0, 0.1),
            Vec4::new(4.0, 0.0, 0.0, 0.05),
        ]
    }

    #[test]
    fn conversion_reproduces_the_curve() {
        let keys = keys();
        let curve = CurveRange { first_key: 0, num_keys: 5 };
        for segment in 0..curve.num_segments() {
            let cr = segment_keys(&keys, &curve, segment);
            let bs = catmull_rom_to_bspline(cr);
            for i in 0..=8 {
                let t = i as f32 / 8.0;
                let a = eval_catmull_rom(cr, t);
                let b = eval_bspline(bs, t);
                for c in 0..4 {
                    assert_relative_eq!(a[c], b[c], epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn catmull_rom_interpolates_keys() {
        let keys = keys();
        let curve = CurveRange { first_key: 0, num_keys: 5 };
        let cr = segment_keys(&keys, &curve, 1);
        let start = eval_catmull_rom(cr, 0.0);
        let end = eval_catmull_rom(cr, 1.0);
        assert_relative_eq!(start.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(end.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn bounds_contain_sampled_points() {
        let keys = keys();
        let curve = CurveRange { first_key: 0, num_keys: 5 };
        for segment in 0..4 {
            let bounds = segment_bounds(&keys, &curve, segment, CurveBasis::CatmullRom);
            let cr = segment_keys(&keys, &curve, segment);
            for i in 0..=16 {
                let p = eval_catmull_rom(cr, i as f32 / 16.0);
                let sample = Aabb::from_sphere(p.truncate(), p.w.abs());
                assert!(bounds.expand(1e-4).contains_aabb(&sample));
            }
        }
    }

    #[test]
    fn end_keys_are_clamped() {
        let keys = keys();
        let curve = CurveRange { first_key: 0, num_keys: 5 };
        let first = segment_keys(&keys, &curve, 0);
        assert_eq!(first[0], first[1]);
        let last = segment_keys(&keys, &curve, 3);
        assert_eq!(last[2], last[3]);
        assert_eq!(convert_keys(&keys, &[curve], CurveBasis::CatmullRom, CurveBasis::BSpline).len(), 16);
    }
}
