// Transform utilities for instancing
//
// Extends glam::Mat4 with the checks the traversal kernel needs and adds a
// decomposed form for time-keyed (motion) transforms.

use crate::Aabb;
use glam::{Mat4, Quat, Vec3};

/// Determinant magnitude below which a transform is treated as singular.
const SINGULAR_DETERMINANT: f32 = 1e-20;

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Inverse of an affine transform, or `None` when it is singular or not
    /// finite.
    fn try_inverse(&self) -> Option<Mat4>;

    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl Mat4Ext for Mat4 {
    fn try_inverse(&self) -> Option<Mat4> {
        if !self.is_finite() {
            return None;
        }
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_DETERMINANT {
            return None;
        }
        let inv = self.inverse();
        inv.is_finite().then_some(inv)
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        if aabb.is_empty() {
            return Aabb::EMPTY;
        }

        let (lo, hi) = (aabb.min, aabb.max);
        (0..8).fold(Aabb::EMPTY, |acc, i| {
            let corner = Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            );
            acc.grow(self.transform_point3(corner))
        })
    }
}

/// Transform split into scale, rotation and translation so that motion keys
/// can be interpolated without shearing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecomposedTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl DecomposedTransform {
    pub const IDENTITY: DecomposedTransform = DecomposedTransform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_mat4(m: &Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Blend towards `other`: lerp translation and scale, slerp rotation.
    pub fn lerp(&self, other: &DecomposedTransform, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }
}

/// Evaluate time-keyed transforms at `time` in `[0, 1]`.
///
/// Keys are spaced uniformly over the shutter interval. A single key is
/// returned as is; times outside the interval are clamped.
pub fn interpolate_transform(keys: &[DecomposedTransform], time: f32) -> Mat4 {
    match keys {
        [] => Mat4::IDENTITY,
        [only] => only.to_mat4(),
        _ => {
            let last = (keys.len() - 1) as f32;
            let ft = time.clamp(0.0, 1.0) * last;
            let step = (ft as usize).min(keys.len() - 2);
            let frac = ft - step as f32;
            keys[step].lerp(&keys[step + 1], frac).to_mat4()
        }
    }
}
