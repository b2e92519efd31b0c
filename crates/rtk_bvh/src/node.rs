//! Child box tests for internal nodes.

use rtk_math::Vec3A;

use crate::scene::BvhNode;
use crate::types::Visibility;

/// Curve minimum-width widening applied to `CURVE` flagged children.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinWidth {
    pub difl: f32,
    pub extmax: f32,
}

/// Ray state needed to test node children, in the current working space.
#[derive(Debug, Clone, Copy)]
pub struct BoxRay {
    pub origin: Vec3A,
    pub idir: Vec3A,
    /// Current upper bound of the valid range.
    pub t: f32,
    /// Children whose mask misses these categories are skipped. `None`
    /// disables the check.
    pub visibility: Option<Visibility>,
    pub min_width: Option<MinWidth>,
}

/// Which children were hit, and their entry distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildHits {
    /// Bit `i` set when child `i` was hit.
    pub mask: u32,
    pub near: [f32; 2],
}

impl ChildHits {
    #[inline]
    pub fn hit(&self, child: usize) -> bool {
        self.mask & (1 << child) != 0
    }
}

impl BoxRay {
    /// Test both children of `node`.
    #[inline]
    pub fn intersect_children(&self, node: &BvhNode) -> ChildHits {
        let mut hits = ChildHits {
            mask: 0,
            near: [0.0; 2],
        };
        for child in 0..2 {
            if let Some(near) = self.intersect_child(node, child) {
                hits.mask |= 1 << child;
                hits.near[child] = near;
            }
        }
        hits
    }

    #[inline]
    fn intersect_child(&self, node: &BvhNode, child: usize) -> Option<f32> {
        let child_visibility = node.child_visibility(child);
        if let Some(visibility) = self.visibility {
            if !child_visibility.visible_to(visibility) {
                return None;
            }
        }

        let lo = (Vec3A::from_array(node.bounds_min[child]) - self.origin) * self.idir;
        let hi = (Vec3A::from_array(node.bounds_max[child]) - self.origin) * self.idir;
        if !lo.is_finite() || !hi.is_finite() {
            return None;
        }

        let mut near = lo.min(hi).max_element().max(0.0);
        let mut far = lo.max(hi).min_element().min(self.t);

        if let Some(MinWidth { difl, extmax }) = self.min_width {
            if difl != 0.0 && child_visibility.contains(Visibility::CURVE) {
                near = ((1.0 - difl) * near).max(near - extmax);
                far = ((1.0 + difl) * far).min(far + extmax);
            }
        }

        (far >= near).then_some(near)
    }
}
