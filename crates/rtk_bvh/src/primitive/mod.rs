//! Per-primitive intersection, dispatched on the primitive type tag.

pub mod curve;
pub mod triangle;

use rand::RngCore;

use crate::config::TraversalConfig;
use crate::dispatch::FeatureSet;
use crate::instance::WorkingSpace;
use crate::node::MinWidth;
use crate::scene::SceneBuffers;
use crate::types::PrimitiveType;

/// A primitive hit in the working space of the walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Tests primitives for one traversal call.
///
/// Holds the per-call curve settings: the minimum width request and the
/// caller's jitter source.
pub struct PrimitiveTester<'a, 'r> {
    scene: &'a SceneBuffers,
    config: &'a TraversalConfig,
    min_width: Option<MinWidth>,
    jitter: Option<&'r mut dyn RngCore>,
}

impl<'a, 'r> PrimitiveTester<'a, 'r> {
    pub fn new(scene: &'a SceneBuffers, config: &'a TraversalConfig) -> Self {
        Self {
            scene,
            config,
            min_width: None,
            jitter: None,
        }
    }

    pub fn with_min_width(
        mut self,
        min_width: Option<MinWidth>,
        jitter: Option<&'r mut dyn RngCore>,
    ) -> Self {
        self.min_width = min_width;
        self.jitter = jitter;
        self
    }

    pub fn min_width(&self) -> Option<MinWidth> {
        self.min_width
    }

    /// Intersect primitive `prim` within `(t_min, t_max)`.
    ///
    /// Primitive types outside the feature set `F` never hit.
    #[inline]
    pub fn intersect<F: FeatureSet>(
        &mut self,
        prim: usize,
        space: &WorkingSpace,
        time: f32,
        t_min: f32,
        t_max: f32,
    ) -> Option<PrimHit> {
        let scene = self.scene;
        let index = scene.prim_index[prim] as usize;
        let epsilon = self.config.triangle_epsilon;

        match scene.prim_type[prim] {
            PrimitiveType::Triangle => triangle::intersect_triangle(
                &scene.triangles[index].verts,
                space.origin,
                space.dir,
                t_min,
                t_max,
                epsilon,
            ),
            PrimitiveType::MotionTriangle if F::MOTION => {
                let verts =
                    triangle::motion_triangle_verts(scene, &scene.motion_triangles[index], time);
                triangle::intersect_triangle(&verts, space.origin, space.dir, t_min, t_max, epsilon)
            }
            PrimitiveType::Curve if F::HAIR => self.intersect_curve::<F>(prim, None, space, t_min, t_max),
            PrimitiveType::MotionCurve if F::HAIR && F::MOTION => {
                self.intersect_curve::<F>(prim, Some(time), space, t_min, t_max)
            }
            _ => None,
        }
    }

    fn intersect_curve<F: FeatureSet>(
        &mut self,
        prim: usize,
        time: Option<f32>,
        space: &WorkingSpace,
        t_min: f32,
        t_max: f32,
    ) -> Option<PrimHit> {
        let scene = self.scene;
        let data = &scene.curves[scene.prim_index[prim] as usize];
        let keys = curve::segment_keys(scene, data, scene.prim_segment[prim], time);

        let width = if F::HAIR_MINIMUM_WIDTH {
            self.min_width.as_ref()
        } else {
            None
        };

        let jitter: Option<&mut dyn RngCore> = match self.jitter {
            Some(ref mut rng) => Some(&mut **rng),
            None => None,
        };

        curve::intersect_curve(
            &keys,
            &self.config.curve,
            space.origin,
            space.dir,
            t_min,
            t_max,
            width,
            jitter,
        )
    }
}
