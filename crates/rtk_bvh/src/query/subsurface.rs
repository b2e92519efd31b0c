//! Hits against a single object, for subsurface scattering probes.

use rand::{Rng, RngCore};

use crate::scene::SceneBuffers;
use crate::traversal::{Flow, Query};
use crate::types::{Intersection, Visibility};

/// Collects triangle hits of one object with reservoir sampling.
///
/// Once more hits exist than the list holds, each new hit replaces a random
/// slot with probability `len / total`, so every hit is equally likely to
/// be kept.
pub(crate) struct SubsurfaceHits<'h, 'r> {
    pub object: u32,
    pub hits: &'h mut [Intersection],
    pub num_hits: usize,
    pub total_hits: usize,
    rng: &'r mut dyn RngCore,
}

impl<'h, 'r> SubsurfaceHits<'h, 'r> {
    pub fn new(object: u32, hits: &'h mut [Intersection], rng: &'r mut dyn RngCore) -> Self {
        Self {
            object,
            hits,
            num_hits: 0,
            total_hits: 0,
            rng,
        }
    }
}

impl Query for SubsurfaceHits<'_, '_> {
    fn visibility(&self) -> Option<Visibility> {
        None
    }

    fn accepts(&self, scene: &SceneBuffers, prim: usize, _object: u32) -> bool {
        scene.prim_type[prim].is_triangle() && scene.prim_object[prim] == self.object
    }

    fn enters(&self, _scene: &SceneBuffers, _object: u32) -> bool {
        false
    }

    fn record(&mut self, _scene: &SceneBuffers, hit: Intersection, _t: &mut f32) -> Flow {
        self.total_hits += 1;

        if self.num_hits < self.hits.len() {
            self.hits[self.num_hits] = hit;
            self.num_hits += 1;
        } else if !self.hits.is_empty() {
            let slot = self.rng.gen_range(0..self.total_hits);
            if slot < self.hits.len() {
                self.hits[slot] = hit;
            }
        }
        Flow::Continue
    }

    fn recorded(&self) -> usize {
        self.num_hits
    }
}
