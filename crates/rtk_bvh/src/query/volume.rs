//! Volume boundary queries.

use crate::scene::SceneBuffers;
use crate::traversal::{Flow, Query};
use crate::types::{Intersection, ObjectFlags, Visibility, OBJECT_NONE};

/// Whether `prim`, reached inside instance `object`, bounds a volume.
fn is_volume_boundary(scene: &SceneBuffers, prim: usize, object: u32) -> bool {
    if !scene.prim_type[prim].is_triangle() {
        return false;
    }
    let owner = if object == OBJECT_NONE {
        scene.prim_object[prim]
    } else {
        object
    };
    scene.object_flags(owner).contains(ObjectFlags::HAS_VOLUME)
}

/// Whether instance `object` bounds a volume or holds one further down.
fn leads_to_volume(scene: &SceneBuffers, object: u32) -> bool {
    scene
        .object_flags(object)
        .intersects(ObjectFlags::HAS_VOLUME | ObjectFlags::VOLUME_INSIDE)
}

/// Nearest volume boundary.
pub(crate) struct VolumeClosest {
    pub visibility: Visibility,
    pub hit: Option<Intersection>,
}

impl VolumeClosest {
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            hit: None,
        }
    }
}

impl Query for VolumeClosest {
    fn visibility(&self) -> Option<Visibility> {
        Some(self.visibility)
    }

    fn accepts(&self, scene: &SceneBuffers, prim: usize, object: u32) -> bool {
        is_volume_boundary(scene, prim, object)
    }

    fn enters(&self, scene: &SceneBuffers, object: u32) -> bool {
        leads_to_volume(scene, object)
    }

    fn record(&mut self, _scene: &SceneBuffers, hit: Intersection, t: &mut f32) -> Flow {
        *t = hit.t;
        self.hit = Some(hit);
        Flow::Continue
    }
}

/// Every volume boundary up to the list capacity, in visit order.
pub(crate) struct VolumeAll<'h> {
    pub visibility: Visibility,
    pub hits: &'h mut [Intersection],
    pub num_hits: usize,
}

impl<'h> VolumeAll<'h> {
    pub fn new(visibility: Visibility, hits: &'h mut [Intersection]) -> Self {
        Self {
            visibility,
            hits,
            num_hits: 0,
        }
    }
}

impl Query for VolumeAll<'_> {
    fn visibility(&self) -> Option<Visibility> {
        Some(self.visibility)
    }

    fn accepts(&self, scene: &SceneBuffers, prim: usize, object: u32) -> bool {
        is_volume_boundary(scene, prim, object)
    }

    fn enters(&self, scene: &SceneBuffers, object: u32) -> bool {
        leads_to_volume(scene, object)
    }

    fn record(&mut self, _scene: &SceneBuffers, hit: Intersection, _t: &mut f32) -> Flow {
        if self.num_hits == self.hits.len() {
            return Flow::Stop;
        }
        self.hits[self.num_hits] = hit;
        self.num_hits += 1;
        if self.num_hits == self.hits.len() {
            Flow::Stop
        } else {
            Flow::Continue
        }
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
