//! Triangle and motion triangle intersection.
//!
//! Uses the Möller-Trumbore algorithm for ray-triangle intersection.

use rtk_math::Vec3;

use super::PrimHit;
use crate::scene::{MotionTriangleData, SceneBuffers};

/// Möller-Trumbore test of a ray against a triangle.
///
/// Accepts hits with `t_min < t < t_max`. `u` and `v` are the barycentric
/// weights of the second and third vertex.
#[inline]
pub fn intersect_triangle(
    verts: &[Vec3; 3],
    origin: Vec3,
    dir: Vec3,
    t_min: f32,
    t_max: f32,
    epsilon: f32,
) -> Option<PrimHit> {
    let [v0, v1, v2] = *verts;
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = dir.cross(edge2);
    let a = edge1.dot(h);

    // Ray is parallel to triangle (or the triangle is degenerate)
    if !(a.abs() >= epsilon) || a == 0.0 {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * dir.dot(q);
    if !(v >= 0.0 && u + v <= 1.0) {
        return None;
    }

    let t = f * edge2.dot(q);
    if !(t > t_min && t < t_max) {
        return None;
    }

    Some(PrimHit { t, u, v })
}

/// Vertices of a motion triangle at `time`, lerped between the two nearest
/// of its uniformly spaced steps.
pub fn motion_triangle_verts(scene: &SceneBuffers, tri: &MotionTriangleData, time: f32) -> [Vec3; 3] {
    let steps = tri.num_steps as usize;
    let first = tri.first_step as usize;
    if steps < 2 {
        return scene.motion_verts[first];
    }

    let ft = time.clamp(0.0, 1.0) * (steps - 1) as f32;
    let step = (ft as usize).min(steps - 2);
    let frac = ft - step as f32;

    let a = &scene.motion_verts[first + step];
    let b = &scene.motion_verts[first + step + 1];
    [a[0].lerp(b[0], frac), a[1].lerp(b[1], frac), a[2].lerp(b[2], frac)]
}
