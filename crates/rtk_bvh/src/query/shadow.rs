//! Any-hit query for shadow rays.

use crate::scene::SceneBuffers;
use crate::traversal::{Flow, Query};
use crate::types::{Intersection, ShaderFlags, Visibility};

/// Stops at the first opaque hit and collects transparent ones into the
/// caller's list. The distance bound never shrinks, so every transparent
/// surface up to `t_max` is found.
pub(crate) struct ShadowHits<'h> {
    pub visibility: Visibility,
    pub hits: &'h mut [Intersection],
    pub num_hits: usize,
    pub occluded: bool,
}

impl<'h> ShadowHits<'h> {
    pub fn new(visibility: Visibility, hits: &'h mut [Intersection]) -> Self {
        Self {
            visibility,
            hits,
            num_hits: 0,
            occluded: false,
        }
    }
}

impl Query for ShadowHits<'_> {
    fn visibility(&self) -> Option<Visibility> {
        Some(self.visibility)
    }

    fn record(&mut self, scene: &SceneBuffers, hit: Intersection, _t: &mut f32) -> Flow {
        let shader = scene.prim_shader(hit.prim as usize);
        if !scene
            .shader_flags(shader)
            .contains(ShaderFlags::HAS_TRANSPARENT_SHADOW)
        {
            self.occluded = true;
            return Flow::Stop;
        }

        if self.num_hits == self.hits.len() {
            self.occluded = true;
            return Flow::Stop;
        }

        self.hits[self.num_hits] = hit;
        self.num_hits += 1;
        Flow::Continue
    }

    fn recorded(&self) -> usize {
        self.num_hits
    }

    fn rescale(&mut self, first: usize, factor: f32) {
        for hit in &mut self.hits[first..self.num_hits] {
            hit.t *= factor;
        }
    }
}
