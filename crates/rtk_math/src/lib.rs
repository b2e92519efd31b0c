//! Math types shared by the rtk traversal kernel.
//!
//! Re-exports glam and adds the small set of ray tracing types the kernel
//! is written against: rays with a valid distance range, parametric
//! intervals, axis-aligned boxes and transform helpers for instancing.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::{clamp_direction, inverse_direction, Ray, DIRECTION_CLAMP_EPSILON};
pub use transform::{interpolate_transform, DecomposedTransform, Mat4Ext};
