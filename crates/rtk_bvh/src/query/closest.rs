//! Nearest hit along the ray.

use crate::scene::SceneBuffers;
use crate::traversal::{Flow, Query};
use crate::types::{Intersection, Visibility};

/// Keeps the nearest hit and shrinks the bound to it.
///
/// With `any_hit` set the walk stops at the first accepted hit, which is
/// then not necessarily the nearest.
pub(crate) struct ClosestHit {
    pub visibility: Visibility,
    pub any_hit: bool,
    pub hit: Option<Intersection>,
}

impl ClosestHit {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            any_hit: false,
            hit: None,
        }
    }

    pub fn any(visibility: Visibility) -> Self {
        Self {
            any_hit: true,
            ..Self::new(visibility)
        }
    }
}

impl Query for ClosestHit {
    fn visibility(&self) -> Option<Visibility> {
        Some(self.visibility)
    }

    fn record(&mut self, _scene: &SceneBuffers, hit: Intersection, t: &mut f32) -> Flow {
        *t = hit.t;
        self.hit = Some(hit);
        if self.any_hit {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
