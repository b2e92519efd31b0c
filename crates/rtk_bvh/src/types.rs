//! Intersection records, flags and shared constants.

use bitflags::bitflags;

/// Primitive id of a miss.
pub const PRIM_NONE: u32 = u32::MAX;

/// Object id of a hit outside any instance, or of a miss.
pub const OBJECT_NONE: u32 = u32::MAX;

/// Capacity of the per-call traversal stack.
pub const BVH_STACK_SIZE: usize = 192;

/// Deepest instance nesting a traversal will follow.
pub const MAX_INSTANCE_DEPTH: usize = 8;

/// Stack marker that terminates the walk of one hierarchy level.
///
/// It is the initial bottom entry of every traversal stack and is pushed
/// again each time the walk enters an instance. It is never a valid node
/// address.
pub const ENTRYPOINT_SENTINEL: i32 = 0x7654_3210;

bitflags! {
    /// Ray categories a primitive, leaf or node child is visible to.
    ///
    /// `CURVE` is not a ray category: builders set it on node children whose
    /// subtree contains curves so minimum width widening can find them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Visibility: u32 {
        const CAMERA = 1 << 0;
        const REFLECT = 1 << 1;
        const TRANSMIT = 1 << 2;
        const DIFFUSE = 1 << 3;
        const GLOSSY = 1 << 4;
        const SHADOW_OPAQUE = 1 << 5;
        const SHADOW_TRANSPARENT = 1 << 6;
        const VOLUME_SCATTER = 1 << 7;
        const CURVE = 1 << 31;

        const SHADOW = Self::SHADOW_OPAQUE.bits() | Self::SHADOW_TRANSPARENT.bits();
        const ALL = Self::CAMERA.bits()
            | Self::REFLECT.bits()
            | Self::TRANSMIT.bits()
            | Self::DIFFUSE.bits()
            | Self::GLOSSY.bits()
            | Self::SHADOW.bits()
            | Self::VOLUME_SCATTER.bits();
    }
}

impl Visibility {
    /// True when a child/primitive with this mask is visible to `ray`.
    #[inline]
    pub fn visible_to(self, ray: Visibility) -> bool {
        self.intersects(ray & Visibility::ALL)
    }
}

bitflags! {
    /// Per-object flags consulted during traversal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u32 {
        /// Object bounds a volume; volume queries only see these.
        const HAS_VOLUME = 1 << 0;
        /// Geometry is stored in world space in the top-level hierarchy.
        const TRANSFORM_APPLIED = 1 << 1;
        /// Object carries time-keyed transforms.
        const MOTION = 1 << 2;
        /// An instance nested somewhere in this object's hierarchy bounds a
        /// volume, so volume queries must enter it.
        const VOLUME_INSIDE = 1 << 3;
    }
}

bitflags! {
    /// Shader properties the traversal needs to know about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderFlags: u32 {
        /// Shadow rays may pass through with partial attenuation.
        const HAS_TRANSPARENT_SHADOW = 1 << 0;
    }
}

/// Primitive type tag stored per primitive.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    #[default]
    None = 0,
    Triangle = 1 << 0,
    MotionTriangle = 1 << 1,
    Curve = 1 << 2,
    MotionCurve = 1 << 3,
}

impl PrimitiveType {
    /// Bit used in leaf type masks.
    #[inline]
    pub fn bit(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_triangle(self) -> bool {
        matches!(self, PrimitiveType::Triangle | PrimitiveType::MotionTriangle)
    }

    #[inline]
    pub fn is_curve(self) -> bool {
        matches!(self, PrimitiveType::Curve | PrimitiveType::MotionCurve)
    }
}

/// Result of an intersection query.
///
/// `t` is measured along the query ray in the space of the input ray. A miss
/// has `prim == PRIM_NONE` and `t` equal to the ray's `t_max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Parametric hit distance.
    pub t: f32,
    /// Primitive-local parameters: barycentrics for triangles, curve
    /// parameter for curves.
    pub u: f32,
    pub v: f32,
    /// Index into the primitive arrays.
    pub prim: u32,
    /// Instance the hit was found in, or `OBJECT_NONE`.
    pub object: u32,
    pub prim_type: PrimitiveType,
}

impl Intersection {
    /// A miss for a ray with the given `t_max`.
    pub fn none(t_max: f32) -> Self {
        Self {
            t: t_max,
            u: 0.0,
            v: 0.0,
            prim: PRIM_NONE,
            object: OBJECT_NONE,
            prim_type: PrimitiveType::None,
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.prim != PRIM_NONE
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self::none(f32::MAX)
    }
}

/// Outcome of a shadow query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowResult {
    /// The ray is blocked: an opaque hit, or more transparent hits than fit.
    pub occluded: bool,
    /// Transparent hits written to the caller's list.
    pub num_hits: usize,
}

/// Outcome of a subsurface query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubsurfaceResult {
    /// Hits written to the caller's list (at most its length).
    pub num_hits: usize,
    /// Hits found along the ray, including those not stored.
    pub total_hits: usize,
}

impl SubsurfaceResult {
    /// More hits existed than the list could hold.
    pub fn saturated(&self) -> bool {
        self.total_hits > self.num_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_none() {
        let isect = Intersection::none(42.0);
        assert!(!isect.is_hit());
        assert_eq!(isect.t, 42.0);
        assert_eq!(isect.object, OBJECT_NONE);
    }

    #[test]
    fn test_visibility_ignores_curve_bit() {
        let child = Visibility::CURVE;
        assert!(!child.visible_to(Visibility::ALL | Visibility::CURVE));

        let child = Visibility::CAMERA | Visibility::CURVE;
        assert!(child.visible_to(Visibility::CAMERA));
        assert!(!child.visible_to(Visibility::SHADOW));
    }

    #[test]
    fn test_sentinel_is_not_a_leaf() {
        assert!(ENTRYPOINT_SENTINEL > 0);
    }

    #[test]
    fn test_primitive_type_bits_are_distinct() {
        let all = [
            PrimitiveType::Triangle,
            PrimitiveType::MotionTriangle,
            PrimitiveType::Curve,
            PrimitiveType::MotionCurve,
        ];
        let mask = all.iter().fold(0, |acc, t| acc | t.bit());
        assert_eq!(mask.count_ones(), 4);
        assert!(PrimitiveType::MotionTriangle.is_triangle());
        assert!(PrimitiveType::MotionCurve.is_curve());
    }

    #[test]
    fn test_subsurface_saturation() {
        let result = SubsurfaceResult {
            num_hits: 2,
            total_hits: 5,
        };
        assert!(result.saturated());
        assert!(!SubsurfaceResult::default().saturated());
    }
}
