//! Moving the ray in and out of instance spaces.
//!
//! Entering an instance maps the working ray through the object's inverse
//! transform and normalises the direction; the current distance bound is
//! scaled by the length the direction had before normalising. Leaving the
//! instance restores the saved parent space and reports the factor that maps
//! distances back.

use rtk_math::{clamp_direction, interpolate_transform, inverse_direction, Mat4, Mat4Ext, Ray, Vec3};

use crate::error::TraversalError;
use crate::scene::{ObjectTransform, SceneBuffers};
use crate::types::{ObjectFlags, MAX_INSTANCE_DEPTH, OBJECT_NONE};

/// The ray as seen from the hierarchy level currently being walked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkingSpace {
    pub origin: Vec3,
    pub dir: Vec3,
    pub idir: Vec3,
    /// Distances here equal input distances times this factor.
    pub t_scale: f32,
}

impl WorkingSpace {
    pub fn from_ray(ray: &Ray) -> Self {
        Self {
            origin: ray.origin,
            dir: ray.direction,
            idir: inverse_direction(clamp_direction(ray.direction)),
            t_scale: 1.0,
        }
    }

    /// Space of an object with world-to-object matrix `itfm`.
    ///
    /// Returns the new space and the length of the transformed direction, or
    /// `None` when the transform does not produce a usable ray.
    pub fn enter(&self, itfm: &Mat4) -> Option<(WorkingSpace, f32)> {
        let origin = itfm.transform_point3(self.origin);
        let dir = itfm.transform_vector3(self.dir);
        let len = dir.length();
        if !(len > 0.0) || !len.is_finite() || !origin.is_finite() {
            return None;
        }

        let dir = dir / len;
        let space = WorkingSpace {
            origin,
            dir,
            idir: inverse_direction(clamp_direction(dir)),
            t_scale: self.t_scale * len,
        };
        Some((space, len))
    }
}

impl Default for WorkingSpace {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            dir: Vec3::Z,
            idir: inverse_direction(clamp_direction(Vec3::Z)),
            t_scale: 1.0,
        }
    }
}

/// World-to-object matrix of `object` at `time`.
///
/// Time-keyed transforms are only interpolated when `motion` is set;
/// otherwise their first key is used.
pub fn object_inverse(scene: &SceneBuffers, object: u32, time: f32, motion: bool) -> Option<Mat4> {
    match &scene.objects[object as usize].transform {
        ObjectTransform::Static { itfm, .. } => *itfm,
        ObjectTransform::Motion { keys } => {
            let time = if motion { time } else { 0.0 };
            interpolate_transform(keys, time).try_inverse()
        }
    }
}

/// Space of `object` seen from `space`, entering every instance that
/// encloses it, outermost first.
///
/// Returns the object's space and the product of the direction lengths met
/// on the way; `Ok(None)` when one of the transforms is degenerate. Objects
/// with `TRANSFORM_APPLIED` live in the top level and end the chain.
pub fn enter_object(
    scene: &SceneBuffers,
    object: u32,
    space: &WorkingSpace,
    time: f32,
    motion: bool,
) -> Result<Option<(WorkingSpace, f32)>, TraversalError> {
    let mut chain = [OBJECT_NONE; MAX_INSTANCE_DEPTH];
    let mut depth = 0;
    let mut current = object;
    while current != OBJECT_NONE {
        let data = &scene.objects[current as usize];
        if data.flags.contains(ObjectFlags::TRANSFORM_APPLIED) {
            break;
        }
        if depth == MAX_INSTANCE_DEPTH {
            return Err(TraversalError::InstanceDepthExceeded {
                max_depth: MAX_INSTANCE_DEPTH,
            });
        }
        chain[depth] = current;
        depth += 1;
        current = data.parent;
    }

    let mut local = *space;
    let mut len = 1.0;
    for &level in chain[..depth].iter().rev() {
        let itfm = object_inverse(scene, level, time, motion);
        let Some((next, step)) = itfm.and_then(|itfm| local.enter(&itfm)) else {
            return Ok(None);
        };
        local = next;
        len *= step;
    }
    Ok(Some((local, len)))
}

/// Saved state of the parent level while an instance is walked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceFrame {
    pub parent: WorkingSpace,
    pub parent_object: u32,
    /// Multiplier taking instance distances back to the parent space.
    pub factor: f32,
    /// Number of hits a multi-hit query had recorded on entry.
    pub first_hit: usize,
}

impl Default for InstanceFrame {
    fn default() -> Self {
        Self {
            parent: WorkingSpace::default(),
            parent_object: OBJECT_NONE,
            factor: 1.0,
            first_hit: 0,
        }
    }
}

/// Fixed capacity stack of open instance levels.
pub struct InstanceStack {
    frames: [InstanceFrame; MAX_INSTANCE_DEPTH],
    len: usize,
}

impl InstanceStack {
    pub fn new() -> Self {
        Self {
            frames: [InstanceFrame::default(); MAX_INSTANCE_DEPTH],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, frame: InstanceFrame) -> Result<(), TraversalError> {
        if self.len == MAX_INSTANCE_DEPTH {
            return Err(TraversalError::InstanceDepthExceeded {
                max_depth: MAX_INSTANCE_DEPTH,
            });
        }
        self.frames[self.len] = frame;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<InstanceFrame> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.frames[self.len])
    }
}

impl Default for InstanceStack {
    fn default() -> Self {
        Self::new()
    }
}
