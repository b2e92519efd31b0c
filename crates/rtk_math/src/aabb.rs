use crate::{Interval, Vec3};

/// Axis-aligned bounding box stored as two corners.
///
/// An empty box has `min > max` on every axis and grows correctly under
/// [`Aabb::surrounding`] and [`Aabb::grow`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Box containing nothing.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a box from its corners, which must already be ordered.
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB from two arbitrary corner points.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest box containing every point in the iterator.
    pub fn enclose<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Aabb::EMPTY, |acc, p| acc.grow(p))
    }

    /// Create an AABB that surrounds two other AABBs.
    pub fn surrounding(box0: &Aabb, box1: &Aabb) -> Self {
        Self {
            min: box0.min.min(box1.min),
            max: box0.max.max(box1.max),
        }
    }

    /// Extend the box to contain a point.
    pub fn grow(&self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    /// Pad every side by `delta`.
    pub fn expand(&self, delta: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(delta),
            max: self.max + Vec3::splat(delta),
        }
    }

    /// True when the box contains nothing on at least one axis.
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Returns the index (0=X, 1=Y, 2=Z) of the axis with the longest extent.
    pub fn longest_axis(&self) -> usize {
        let size = self.max - self.min;

        if size.x > size.y && size.x > size.z {
            0
        } else if size.y > size.z {
            1
        } else {
            2
        }
    }

    /// Returns the center point of the bounding box.
    pub fn centroid(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Slab test against a ray given as origin and inverse direction.
    ///
    /// This is the per-axis scalar formulation: each axis clips `range` to the
    /// entry/exit distances of its slab. The returned interval is empty on a
    /// miss. Any NaN or infinite slab distance is treated as a miss.
    pub fn slab_span(&self, origin: Vec3, inv_dir: Vec3, range: Interval) -> Interval {
        let mut span = range;

        for axis in 0..3 {
            let t0 = (self.min[axis] - origin[axis]) * inv_dir[axis];
            let t1 = (self.max[axis] - origin[axis]) * inv_dir[axis];
            if !t0.is_finite() || !t1.is_finite() {
                return Interval::EMPTY;
            }

            let (near, far) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            span = span.intersect(&Interval::new(near, far));
        }

        span
    }
}
