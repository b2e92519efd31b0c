//! Curve segment intersection.
//!
//! A segment is treated as one or more cone frustums: a straight piece
//! between two keys whose radius varies linearly. Cardinal curves are
//! evaluated as a Catmull-Rom spline through the neighbouring keys and cut
//! into straight pieces. End caps are not tested; consecutive segments
//! share their end circles.
//!
//! Keys are passed around as `Vec4` with the radius in `w`.

use rand::{Rng, RngCore};
use rtk_math::{Aabb, Vec3, Vec4, Vec4Swizzles};

use super::PrimHit;
use crate::config::{CurveConfig, CurveShape};
use crate::node::MinWidth;
use crate::scene::{CurveData, CurveKey, SceneBuffers};

#[inline]
fn key(k: &CurveKey) -> Vec4 {
    Vec4::new(k.co[0], k.co[1], k.co[2], k.radius)
}

/// Keys `segment - 1 ..= segment + 2` of a curve, clamped at its ends.
///
/// Motion curves are evaluated at `time`; other curves ignore it.
pub fn segment_keys(
    scene: &SceneBuffers,
    curve: &CurveData,
    segment: u32,
    time: Option<f32>,
) -> [Vec4; 4] {
    let last = curve.num_keys as i64 - 1;
    let index = |offset: i64| (segment as i64 + offset).clamp(0, last) as usize;

    match time {
        Some(time) if curve.motion_steps >= 2 => {
            let steps = curve.motion_steps as usize;
            let ft = time.clamp(0.0, 1.0) * (steps - 1) as f32;
            let step = (ft as usize).min(steps - 2);
            let frac = ft - step as f32;

            let fetch = |step: usize, k: usize| {
                let at = curve.motion_first_key as usize + step * curve.num_keys as usize + k;
                key(&scene.curve_motion_keys[at])
            };
            [-1, 0, 1, 2].map(|offset| {
                let k = index(offset);
                fetch(step, k).lerp(fetch(step + 1, k), frac)
            })
        }
        _ => [-1, 0, 1, 2].map(|offset| key(&scene.curve_keys[curve.first_key as usize + index(offset)])),
    }
}

/// Catmull-Rom spline through `keys[1]` and `keys[2]` at `t` in `[0, 1]`.
fn catmull_rom(keys: &[Vec4; 4], t: f32) -> Vec4 {
    let [p0, p1, p2, p3] = *keys;
    let t2 = t * t;
    let t3 = t2 * t;
    let point = 0.5
        * (2.0 * p1
            + (p2 - p0) * t
            + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
            + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3);
    // the spline may overshoot below zero radius
    Vec4::new(point.x, point.y, point.z, point.w.max(0.0))
}

/// Bounds of a segment, including its radius.
pub fn segment_bounds(keys: &[Vec4; 4], shape: CurveShape) -> Aabb {
    let [p0, p1, p2, p3] = *keys;
    let (hull, radius) = match shape {
        CurveShape::Linear => (Aabb::from_points(p1.xyz(), p2.xyz()), p1.w.max(p2.w)),
        CurveShape::Cardinal => {
            // Bezier control points of the same cubic enclose it.
            let b1 = p1 + (p2 - p0) / 6.0;
            let b2 = p2 - (p3 - p1) / 6.0;
            let hull = Aabb::enclose([p1.xyz(), b1.xyz(), b2.xyz(), p2.xyz()]);
            (hull, p1.w.max(p2.w).max(b1.w).max(b2.w))
        }
    };
    hull.expand(radius)
}

/// Ray against the lateral surface of a cone frustum.
///
/// Returns the ray distance and the normalised position along the axis.
fn intersect_cone(
    a: Vec4,
    b: Vec4,
    origin: Vec3,
    dir: Vec3,
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32)> {
    let (p0, r0) = (a.xyz(), a.w);
    let axis = b.xyz() - p0;
    let len = axis.length();
    if !(len > 0.0) || !len.is_finite() {
        return None;
    }

    let w = axis / len;
    let slope = (b.w - r0) / len;
    let oc = origin - p0;
    let sd = dir.dot(w);
    let so = oc.dot(w);
    let k = 1.0 + slope * slope;

    // |d|^2 - s^2 = (r0 + slope * s)^2 with d = oc + t dir, s = d . w
    let qa = dir.dot(dir) - k * sd * sd;
    let qb = oc.dot(dir) - sd * (k * so + r0 * slope);
    let r_o = r0 + slope * so;
    let qc = oc.dot(oc) - so * so - r_o * r_o;

    let roots = if qa.abs() <= 1e-12 * dir.length_squared() {
        if qb == 0.0 {
            return None;
        }
        let t = -qc / (2.0 * qb);
        [t, t]
    } else {
        let disc = qb * qb - qa * qc;
        if !(disc >= 0.0) {
            return None;
        }
        let sq = disc.sqrt();
        let t0 = (-qb - sq) / qa;
        let t1 = (-qb + sq) / qa;
        [t0.min(t1), t0.max(t1)]
    };

    roots.into_iter().find_map(|t| {
        if !(t > t_min && t < t_max) {
            return None;
        }
        let s = so + t * sd;
        // Outside the frustum, or on the mirrored nappe of the cone.
        if !(0.0..=len).contains(&s) || r0 + slope * s < 0.0 {
            return None;
        }
        Some((t, s / len))
    })
}

/// Minimum width extension at a point: `min(difl * depth, extmax)`.
#[inline]
fn width_extension(point: Vec3, origin: Vec3, dir: Vec3, width: &MinWidth) -> f32 {
    let depth = (point - origin).dot(dir).abs() / dir.length();
    (width.difl * depth).min(width.extmax).max(0.0)
}

/// Intersect one curve segment given its four neighbourhood keys.
///
/// With `width` the radii are extended for distant rays. A widened hit is
/// then kept with probability `r / (r + e)` when a `jitter` source is given.
#[allow(clippy::too_many_arguments)]
pub fn intersect_curve(
    keys: &[Vec4; 4],
    config: &CurveConfig,
    origin: Vec3,
    dir: Vec3,
    t_min: f32,
    t_max: f32,
    width: Option<&MinWidth>,
    mut jitter: Option<&mut dyn RngCore>,
) -> Option<PrimHit> {
    let pieces = match config.shape {
        CurveShape::Linear => 1,
        CurveShape::Cardinal => config.subdivisions.max(1),
    };

    let mut best: Option<PrimHit> = None;
    let mut closest = t_max;
    let mut start = match config.shape {
        CurveShape::Linear => keys[1],
        CurveShape::Cardinal => catmull_rom(keys, 0.0),
    };

    for piece in 0..pieces {
        let end = match config.shape {
            CurveShape::Linear => keys[2],
            CurveShape::Cardinal => catmull_rom(keys, (piece + 1) as f32 / pieces as f32),
        };

        let (mut a, mut b) = (start, end);
        let mut ext = (0.0, 0.0);
        if let Some(width) = width {
            ext = (
                width_extension(a.xyz(), origin, dir, width),
                width_extension(b.xyz(), origin, dir, width),
            );
            a.w += ext.0;
            b.w += ext.1;
        }

        if let Some((t, s)) = intersect_cone(a, b, origin, dir, t_min, closest) {
            let e = ext.0 + (ext.1 - ext.0) * s;
            let keep = match jitter.as_deref_mut() {
                Some(rng) if e > 0.0 => {
                    let r = start.w + (end.w - start.w) * s;
                    rng.gen::<f32>() <= r / (r + e)
                }
                _ => true,
            };
            if keep {
                closest = t;
                best = Some(PrimHit {
                    t,
                    u: (piece as f32 + s) / pieces as f32,
                    v: 0.0,
                });
            }
        }

        start = end;
    }

    best
}
