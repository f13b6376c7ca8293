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

//! Scale/rotate/translate decomposition of affine transforms.
//!
//! Motion-blurred instances are interpolated in SRT space so that rotations stay
//! rigid between time steps. The linear part is factored as `R * U` where `R` is
//! a proper rotation and `U` is upper triangular (scale on the diagonal, shear
//! above it), which is the layout hardware motion-transform nodes consume.

use super::{Mat3, Mat4, Quaternion, Vec3, EPSILON};

/// An affine transform split into translation, rotation and upper-triangular scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecomposedTransform {
    /// Translation.
    pub translation: Vec3,
    /// Rotation.
    pub rotation: Quaternion,
    /// Diagonal of the scale matrix `(sx, sy, sz)`.
    pub scale: Vec3,
    /// Off-diagonal terms `(a, b, c)` of the scale matrix
    /// `[[sx, a, b], [0, sy, c], [0, 0, sz]]`.
    pub shear: Vec3,
}

impl DecomposedTransform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quaternion::IDENTITY,
        scale: Vec3::ONE,
        shear: Vec3::ZERO,
    };

    /// Decomposes an affine matrix.
    pub fn from_matrix(m: &Mat4) -> Self {
        let linear = m.linear();
        let [c0, c1, c2] = linear.cols;

        let sx = c0.length();
        let q0 = if sx > EPSILON { c0 / sx } else { Vec3::X };

        let a = q0.dot(c1);
        let u1 = c1 - q0 * a;
        let sy = u1.length();
        let q1 = if sy > EPSILON {
            u1 / sy
        } else {
            any_orthogonal(q0)
        };

        let b = q0.dot(c2);
        let c = q1.dot(c2);
        let u2 = c2 - q0 * b - q1 * c;
        let mut sz = u2.length();
        let mut q2 = if sz > EPSILON { u2 / sz } else { q0.cross(q1) };

        // Keep the rotation proper; a mirror ends up as a negative z scale.
        if q0.cross(q1).dot(q2) < 0.0 {
            q2 = -q2;
            sz = -sz;
        }

        let rotation = Quaternion::from_rotation_matrix(&Mat3::from_cols(q0, q1, q2));
        Self {
            translation: m.translation(),
            rotation,
            scale: Vec3::new(sx, sy, sz),
            shear: Vec3::new(a, b, c),
        }
    }

    /// The upper-triangular scale matrix.
    pub fn scale_matrix(&self) -> Mat3 {
        Mat3::from_cols(
            Vec3::new(self.scale.x, 0.0, 0.0),
            Vec3::new(self.shear.x, self.scale.y, 0.0),
            Vec3::new(self.shear.y, self.shear.z, self.scale.z),
        )
    }

    /// Recomposes `T * R * U`.
    pub fn to_matrix(&self) -> Mat4 {
        let linear = Mat3::from_quat(self.rotation) * self.scale_matrix();
        Mat4::from_mat3_translation(linear, self.translation)
    }

    /// Interpolates towards `other` at `t` in `[0, 1]`.
    pub fn interpolate(&self, other: &Self, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
            shear: self.shear.lerp(other.shear, t),
        }
    }
}

impl Default for DecomposedTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Decomposes a sequence of motion steps, keeping consecutive rotations in the
/// same hemisphere so interpolation takes the short arc.
pub fn decompose_motion(steps: &[Mat4]) -> Vec<DecomposedTransform> {
    let mut out: Vec<DecomposedTransform> = Vec::with_capacity(steps.len());
    for m in steps {
        let mut d = DecomposedTransform::from_matrix(m);
        if let Some(prev) = out.last() {
            if prev.rotation.dot(d.rotation) < 0.0 {
                let q = d.rotation;
                d.rotation = Quaternion::new(-q.x, -q.y, -q.z, -q.w);
            }
        }
        out.push(d);
    }
    out
}

fn any_orthogonal(v: Vec3) -> Vec3 {
    let helper = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    v.cross(helper).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_mat_eq(a: &Mat4, b: &Mat4) {
        for c in 0..4 {
            for r in 0..4 {
                assert_relative_eq!(a.cols[c][r], b.cols[c][r], epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn roundtrip_scale_rotate_translate() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 0.5),
            Quaternion::from_axis_angle(Vec3::new(1.0, 1.0, 0.0), 0.9),
            Vec3::new(-4.0, 1.0, 2.5),
        );
        let d = DecomposedTransform::from_matrix(&m);
        assert_mat_eq(&d.to_matrix(), &m);
        assert_relative_eq!(d.shear.length(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn roundtrip_with_shear_and_mirror() {
        let linear = Mat3::from_cols(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.5, 1.0, 0.0),
            Vec3::new(0.0, 0.0, -2.0),
        );
        let m = Mat4::from_mat3_translation(linear, Vec3::new(1.0, 2.0, 3.0));
        let d = DecomposedTransform::from_matrix(&m);
        assert!(d.scale.z < 0.0);
        assert_mat_eq(&d.to_matrix(), &m);
    }

    #[test]
    fn motion_keeps_short_arc() {
        let a = Mat4::from_quat(Quaternion::from_axis_angle(Vec3::Z, 0.1));
        let b = Mat4::from_quat(Quaternion::from_axis_angle(Vec3::Z, 0.2));
        let steps = decompose_motion(&[a, b]);
        assert!(steps[0].rotation.dot(steps[1].rotation) > 0.0);
        let mid = steps[0].interpolate(&steps[1], 0.5).to_matrix();
        let expected = Mat4::from_quat(Quaternion::from_axis_angle(Vec3::Z, 0.15));
        assert_mat_eq(&mid, &expected);
    }
}
