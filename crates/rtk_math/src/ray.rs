use crate::Vec3;

/// Smallest direction component magnitude used when inverting a direction.
///
/// Components closer to zero are replaced by this value (keeping the sign) so
/// the inverse stays finite and slab tests never divide by zero.
pub const DIRECTION_CLAMP_EPSILON: f32 = 8.271_806e-25;

/// A ray with an origin, a direction, a valid distance range and a time.
///
/// The direction does not need to be normalized; distances are measured in
/// units of the direction length. `t_max` is the exclusive upper bound of
/// the valid range and `time` in `[0, 1]` drives motion interpolation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_max: f32,
    pub time: f32,
}

impl Ray {
    /// Create a new ray at time 0.
    pub fn new(origin: Vec3, direction: Vec3, t_max: f32) -> Self {
        Self {
            origin,
            direction,
            t_max,
            time: 0.0,
        }
    }

    /// Create a ray with an explicit motion time.
    pub fn with_time(origin: Vec3, direction: Vec3, t_max: f32, time: f32) -> Self {
        Self {
            origin,
            direction,
            t_max,
            time,
        }
    }

    /// Create a ray with an unbounded distance range.
    pub fn infinite(origin: Vec3, direction: Vec3) -> Self {
        Self::new(origin, direction, f32::MAX)
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[inline]
fn clamp_component(x: f32) -> f32 {
    if x.abs() > DIRECTION_CLAMP_EPSILON {
        x
    } else {
        DIRECTION_CLAMP_EPSILON.copysign(x)
    }
}

/// Replace near-zero direction components so the direction can be inverted.
#[inline]
pub fn clamp_direction(dir: Vec3) -> Vec3 {
    Vec3::new(
        clamp_component(dir.x),
        clamp_component(dir.y),
        clamp_component(dir.z),
    )
}

/// Component-wise inverse of an already clamped direction.
#[inline]
pub fn inverse_direction(dir: Vec3) -> Vec3 {
    Vec3::ONE / dir
}
