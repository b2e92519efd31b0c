//! Public entry points.
//!
//! A [`Kernel`] borrows immutable scene buffers and a configuration. It is
//! `Sync`: worker threads share one kernel by reference and every call gets
//! its own stack, instance frames and counters.

use rand::RngCore;
use rayon::prelude::*;
use rtk_math::Ray;

use crate::config::TraversalConfig;
use crate::dispatch::{walk_variant, Variant};
use crate::error::{SceneResult, TraversalError};
use crate::instance::{self, WorkingSpace};
use crate::node::MinWidth;
use crate::query::{ClosestHit, ShadowHits, SubsurfaceHits, VolumeAll, VolumeClosest};
use crate::scene::SceneBuffers;
use crate::stats::{KernelStats, StatsSnapshot};
use crate::traversal::{WalkStart, Walker};
use crate::types::{
    Intersection, ObjectFlags, ShadowResult, SubsurfaceResult, Visibility, OBJECT_NONE,
};

/// Traversal context for one scene.
pub struct Kernel<'s> {
    scene: &'s SceneBuffers,
    config: TraversalConfig,
    stats: KernelStats,
}

impl<'s> Kernel<'s> {
    /// Kernel over buffers from a trusted builder.
    ///
    /// The walk indexes the buffers without checking them again, so they
    /// must pass [`SceneBuffers::validate`]. Debug builds check this; use
    /// [`try_new`](Self::try_new) for buffers from elsewhere.
    pub fn new(scene: &'s SceneBuffers, config: TraversalConfig) -> Self {
        debug_assert!(
            scene.validate().is_ok(),
            "kernel created over invalid scene buffers"
        );
        log::info!(
            "Traversal kernel ready: {} nodes, {} primitives, {:?}",
            scene.nodes.len(),
            scene.num_prims(),
            scene.capabilities
        );
        Self {
            scene,
            config,
            stats: KernelStats::default(),
        }
    }

    /// Validate `scene` and build a kernel over it.
    pub fn try_new(scene: &'s SceneBuffers, config: TraversalConfig) -> SceneResult<Self> {
        scene.validate()?;
        Ok(Self::new(scene, config))
    }

    pub fn scene(&self) -> &'s SceneBuffers {
        self.scene
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Nearest hit along `ray` among primitives visible to `visibility`.
    pub fn intersect(&self, ray: &Ray, visibility: Visibility) -> Intersection {
        self.intersect_min_width(ray, visibility, 0.0, None)
    }

    /// Some hit along `ray`, not necessarily the nearest. The walk stops at
    /// the first accepted primitive, which suits opaque shadow rays.
    pub fn intersect_any(&self, ray: &Ray, visibility: Visibility) -> Intersection {
        let variant = Variant::closest(&self.scene.capabilities, false);
        let mut walker = Walker::new(self.scene, &self.config);
        let mut query = ClosestHit::any(visibility);
        let result = walk_variant(variant, &mut walker, self.start(ray), &mut query);
        let t = self.finish(&walker, result);
        resolve_closest(ray, query.hit, t)
    }

    /// Like [`intersect`](Self::intersect), widening curves by `difl` times
    /// the hit distance (capped at `curve.maximum_width`).
    ///
    /// With `jitter`, widened hits are kept stochastically so thin curves
    /// keep their average coverage.
    pub fn intersect_min_width(
        &self,
        ray: &Ray,
        visibility: Visibility,
        difl: f32,
        jitter: Option<&mut dyn RngCore>,
    ) -> Intersection {
        let min_width = (difl != 0.0).then_some(MinWidth {
            difl,
            extmax: self.config.curve.maximum_width,
        });
        let variant = Variant::closest(&self.scene.capabilities, min_width.is_some());
        self.closest(variant, ray, visibility, min_width, jitter)
    }

    /// Closest hit using an explicit variant. The variant must cover the
    /// scene's capabilities for the result to be complete.
    pub fn intersect_with(&self, variant: Variant, ray: &Ray, visibility: Visibility) -> Intersection {
        self.closest(variant, ray, visibility, None, None)
    }

    /// Whether anything blocks `ray`, collecting transparent hits on the way.
    ///
    /// At most `hits.len()` transparent hits are stored; one more means the
    /// ray counts as occluded. Stored hits are in no particular order.
    pub fn intersect_shadow(
        &self,
        ray: &Ray,
        visibility: Visibility,
        hits: &mut [Intersection],
    ) -> ShadowResult {
        let variant = Variant::shadow(&self.scene.capabilities);
        let mut walker = Walker::new(self.scene, &self.config);
        let mut query = ShadowHits::new(visibility, hits);
        let result = walk_variant(variant, &mut walker, self.start(ray), &mut query);

        match self.finish(&walker, result) {
            Some(_) => ShadowResult {
                occluded: query.occluded,
                num_hits: query.num_hits,
            },
            None => ShadowResult::default(),
        }
    }

    /// Triangle hits of `object` along `ray`, ignoring everything else.
    ///
    /// When more hits exist than fit in `hits`, the stored ones are a
    /// uniform sample of all of them drawn with `rng`.
    pub fn intersect_subsurface(
        &self,
        ray: &Ray,
        object: u32,
        hits: &mut [Intersection],
        rng: &mut dyn RngCore,
    ) -> SubsurfaceResult {
        let Some(data) = self.scene.objects.get(object as usize) else {
            return SubsurfaceResult::default();
        };
        let variant = Variant::subsurface(&self.scene.capabilities);
        let mut start = WalkStart {
            root: data.root,
            ..self.start(ray)
        };

        let mut factor = 1.0;
        if !data.flags.contains(ObjectFlags::TRANSFORM_APPLIED) {
            let (_, motion, _, _) = variant.features();
            let entered =
                instance::enter_object(self.scene, object, &start.space, ray.time, motion);
            let entered = match entered {
                Ok(entered) => entered,
                Err(err) => {
                    self.abandon(err);
                    return SubsurfaceResult::default();
                }
            };
            let Some((space, len)) = entered else {
                log::debug!("Skipping subsurface walk of object {object}: degenerate transform");
                return SubsurfaceResult::default();
            };
            start.space = space;
            start.object = object;
            start.t *= len;
            factor = 1.0 / len;
        }

        let mut walker = Walker::new(self.scene, &self.config);
        let mut query = SubsurfaceHits::new(object, hits, rng);
        let result = walk_variant(variant, &mut walker, start, &mut query);
        if self.finish(&walker, result).is_none() {
            return SubsurfaceResult::default();
        }

        let (num_hits, total_hits) = (query.num_hits, query.total_hits);
        if factor != 1.0 {
            for hit in &mut hits[..num_hits] {
                hit.t *= factor;
            }
        }
        SubsurfaceResult {
            num_hits,
            total_hits,
        }
    }

    /// Nearest boundary of a volume object along `ray`.
    pub fn intersect_volume(&self, ray: &Ray, visibility: Visibility) -> Intersection {
        if !self.scene.capabilities.has_volume {
            return Intersection::none(ray.t_max);
        }

        let variant = Variant::volume(&self.scene.capabilities);
        let mut walker = Walker::new(self.scene, &self.config);
        let mut query = VolumeClosest::new(visibility);
        let result = walk_variant(variant, &mut walker, self.start(ray), &mut query);
        let t = self.finish(&walker, result);
        resolve_closest(ray, query.hit, t)
    }

    /// Volume boundaries along `ray`, up to `hits.len()` of them. Returns the
    /// number stored.
    pub fn intersect_volume_all(
        &self,
        ray: &Ray,
        visibility: Visibility,
        hits: &mut [Intersection],
    ) -> usize {
        if !self.scene.capabilities.has_volume || hits.is_empty() {
            return 0;
        }

        let variant = Variant::volume(&self.scene.capabilities);
        let mut walker = Walker::new(self.scene, &self.config);
        let mut query = VolumeAll::new(visibility, hits);
        let result = walk_variant(variant, &mut walker, self.start(ray), &mut query);
        match self.finish(&walker, result) {
            Some(_) => query.num_hits,
            None => 0,
        }
    }

    /// [`intersect`](Self::intersect) for many rays in parallel.
    pub fn intersect_batch(&self, rays: &[Ray], visibility: Visibility) -> Vec<Intersection> {
        rays.par_iter()
            .map(|ray| self.intersect(ray, visibility))
            .collect()
    }

    fn closest(
        &self,
        variant: Variant,
        ray: &Ray,
        visibility: Visibility,
        min_width: Option<MinWidth>,
        jitter: Option<&mut dyn RngCore>,
    ) -> Intersection {
        let mut walker = Walker::new(self.scene, &self.config).with_min_width(min_width, jitter);
        let mut query = ClosestHit::new(visibility);
        let result = walk_variant(variant, &mut walker, self.start(ray), &mut query);
        let t = self.finish(&walker, result);
        resolve_closest(ray, query.hit, t)
    }

    fn start(&self, ray: &Ray) -> WalkStart {
        WalkStart {
            root: self.scene.root,
            space: WorkingSpace::from_ray(ray),
            object: OBJECT_NONE,
            time: ray.time,
            t: ray.t_max,
        }
    }

    /// Flush counters and turn an abandoned walk into `None`.
    fn finish<T>(&self, walker: &Walker<'_, '_>, result: Result<T, TraversalError>) -> Option<T> {
        if self.config.collect_stats {
            self.stats.record_walk(&walker.counters);
        }
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.abandon(err);
                None
            }
        }
    }

    fn abandon(&self, err: TraversalError) {
        self.stats.record_overflow();
        log::warn!("Traversal abandoned, reporting no hit: {err}");
    }
}

/// The hit's distance is the walk's final bound, which is already in input
/// space; a miss reports the ray's own `t_max`.
fn resolve_closest(ray: &Ray, hit: Option<Intersection>, t: Option<f32>) -> Intersection {
    match (hit, t) {
        (Some(hit), Some(t)) => Intersection { t, ..hit },
        _ => Intersection::none(ray.t_max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ObjectDesc, Placement, SceneBuilder};
    use crate::config::CurveShape;
    use crate::scene::{
        leaf_address, BvhNode, CurveKey, LeafNode, ObjectData, ObjectTransform, SceneCapabilities,
        TriangleData,
    };
    use crate::types::{PrimitiveType, ShaderFlags, BVH_STACK_SIZE, PRIM_NONE};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rtk_math::{Aabb, DecomposedTransform, Mat4, Quat, Vec3};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quad_at(z: f32) -> Vec<[Vec3; 3]> {
        vec![
            [
                Vec3::new(-1.0, -1.0, z),
                Vec3::new(1.0, -1.0, z),
                Vec3::new(1.0, 1.0, z),
            ],
            [
                Vec3::new(-1.0, -1.0, z),
                Vec3::new(1.0, 1.0, z),
                Vec3::new(-1.0, 1.0, z),
            ],
        ]
    }

    /// Single triangle whose interior contains the z axis away from edges.
    fn tri_at(z: f32) -> Vec<[Vec3; 3]> {
        vec![[
            Vec3::new(-1.0, -1.0, z),
            Vec3::new(1.0, -1.0, z),
            Vec3::new(0.0, 1.0, z),
        ]]
    }

    fn applied(tris: Vec<[Vec3; 3]>) -> ObjectDesc {
        ObjectDesc::new(Placement::Applied(Mat4::IDENTITY)).with_triangles(tris)
    }

    fn stats_config() -> TraversalConfig {
        TraversalConfig {
            collect_stats: true,
            ..Default::default()
        }
    }

    fn forward_ray(t_max: f32) -> Ray {
        Ray::new(Vec3::new(0.3, -0.2, 0.0), Vec3::Z, t_max)
    }

    /// Two triangles covering the front of a unit sphere, one internal node
    /// with one leaf per triangle. `offset` instances the pair instead of
    /// placing it at the top level.
    fn two_triangle_scene(offset: Option<Mat4>) -> SceneBuffers {
        let [a, b, c, d] = [(-1.0, -1.5), (1.2, -1.5), (1.2, 1.0), (-1.0, 1.0)]
            .map(|(x, y)| Vec3::new(x, y, -1.0));
        let tris = [[a, b, c], [a, c, d]];
        let node = BvhNode::new(
            tris.map(Aabb::enclose),
            [leaf_address(0), leaf_address(1)],
            [Visibility::ALL; 2],
        );
        let mut leaves = vec![
            LeafNode::primitives(0, 1, Visibility::ALL, PrimitiveType::Triangle.bit()),
            LeafNode::primitives(1, 2, Visibility::ALL, PrimitiveType::Triangle.bit()),
        ];

        let (root, object) = match offset {
            None => (
                0,
                ObjectData {
                    transform: ObjectTransform::identity(),
                    flags: ObjectFlags::TRANSFORM_APPLIED,
                    root: 0,
                    parent: OBJECT_NONE,
                },
            ),
            Some(tfm) => {
                leaves.push(LeafNode::instance(0, Visibility::ALL));
                (
                    leaf_address(2),
                    ObjectData {
                        transform: ObjectTransform::from_matrix(tfm),
                        flags: ObjectFlags::empty(),
                        root: 0,
                        parent: OBJECT_NONE,
                    },
                )
            }
        };

        let scene = SceneBuffers {
            nodes: vec![node],
            leaves,
            root,
            prim_type: vec![PrimitiveType::Triangle; 2],
            prim_index: vec![0, 1],
            prim_segment: vec![0; 2],
            prim_object: vec![0; 2],
            prim_visibility: vec![Visibility::ALL.bits(); 2],
            triangles: tris
                .iter()
                .map(|&verts| TriangleData { verts, shader: 0 })
                .collect(),
            objects: vec![object],
            shaders: vec![ShaderFlags::empty()],
            capabilities: SceneCapabilities {
                has_instancing: offset.is_some(),
                ..Default::default()
            },
            ..Default::default()
        };
        scene.validate().unwrap();
        scene
    }

    fn random_point(rng: &mut StdRng, extent: f32) -> Vec3 {
        Vec3::new(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        )
    }

    fn random_triangles(rng: &mut StdRng, count: usize, extent: f32) -> Vec<[Vec3; 3]> {
        (0..count)
            .map(|_| {
                let a = random_point(rng, extent);
                [a, a + random_point(rng, 1.0), a + random_point(rng, 1.0)]
            })
            .collect()
    }

    /// Rays from a sphere of radius `radius` aimed at points inside the
    /// scene's extent.
    fn random_rays(rng: &mut StdRng, count: usize, radius: f32, extent: f32) -> Vec<Ray> {
        (0..count)
            .map(|_| {
                let origin = random_point(rng, 1.0).normalize_or(Vec3::X) * radius;
                let target = random_point(rng, extent);
                Ray::infinite(origin, target - origin)
            })
            .collect()
    }

    /// Rays from a sphere of radius `radius` aimed at the centroids of
    /// `tris` placed by `tfm`.
    fn rays_at_triangles(
        rng: &mut StdRng,
        tris: &[[Vec3; 3]],
        tfm: Mat4,
        count: usize,
        radius: f32,
    ) -> Vec<Ray> {
        (0..count)
            .map(|_| {
                let [a, b, c] = tris[rng.gen_range(0..tris.len())];
                let target = tfm.transform_point3((a + b + c) / 3.0);
                let origin = random_point(rng, 1.0).normalize_or(Vec3::X) * radius;
                Ray::infinite(origin, target - origin)
            })
            .collect()
    }

    #[test]
    fn test_two_triangle_example() {
        init();
        let scene = two_triangle_scene(None);
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::infinite(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);

        assert!(hit.is_hit());
        assert!((hit.t - 4.0).abs() < 1e-5);
        assert!(hit.prim == 0 || hit.prim == 1);
        assert_eq!(hit.object, OBJECT_NONE);
        assert_eq!(hit.prim_type, PrimitiveType::Triangle);
    }

    #[test]
    fn test_translated_instance_example() {
        init();
        let scene = two_triangle_scene(Some(Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))));
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        // Nothing is left near the origin once the pair moves away.
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z, 5.0);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(!hit.is_hit());
        assert_eq!(hit.t, 5.0);

        // The moved copy is still found further along, in world distance.
        let ray = Ray::infinite(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(hit.is_hit());
        assert!((hit.t - 14.0).abs() < 1e-4);
        assert_eq!(hit.object, 0);
    }

    #[test]
    fn test_miss_reports_t_max() {
        init();
        let scene = two_triangle_scene(None);
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), -Vec3::Z, 123.5);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert_eq!(hit.prim, PRIM_NONE);
        assert_eq!(hit.object, OBJECT_NONE);
        assert_eq!(hit.t, 123.5);
    }

    #[test]
    fn test_nearest_hit_matches_brute_force() {
        init();
        let mut rng = StdRng::seed_from_u64(7);
        let tris = random_triangles(&mut rng, 200, 5.0);
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(tris.clone()));
        let scene = builder.build().unwrap();
        let config = TraversalConfig::default();
        let kernel = Kernel::new(&scene, config);

        let mut hits = 0;
        for ray in rays_at_triangles(&mut rng, &tris, Mat4::IDENTITY, 300, 20.0) {
            let expected = tris
                .iter()
                .filter_map(|verts| {
                    crate::primitive::triangle::intersect_triangle(
                        verts,
                        ray.origin,
                        ray.direction,
                        0.0,
                        ray.t_max,
                        config.triangle_epsilon,
                    )
                })
                .map(|hit| hit.t)
                .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |a| a.min(t))));

            let hit = kernel.intersect(&ray, Visibility::CAMERA);
            match expected {
                Some(t) => {
                    hits += 1;
                    assert!(hit.is_hit());
                    assert!((hit.t - t).abs() <= 1e-5 * t.max(1.0), "{} vs {}", hit.t, t);
                }
                None => assert!(!hit.is_hit()),
            }
        }
        assert!(hits > 250, "only {hits} rays hit anything");
    }

    #[test]
    fn test_queries_are_idempotent() {
        init();
        let mut rng = StdRng::seed_from_u64(11);
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(random_triangles(&mut rng, 64, 3.0)));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        for ray in random_rays(&mut rng, 32, 10.0, 3.0) {
            let first = kernel.intersect(&ray, Visibility::CAMERA);
            let second = kernel.intersect(&ray, Visibility::CAMERA);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_instances_match_flattened_geometry() {
        init();
        let mut rng = StdRng::seed_from_u64(3);
        let tris = random_triangles(&mut rng, 50, 2.0);
        let outer = Mat4::from_scale_rotation_translation(
            Vec3::splat(1.5),
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let inner = Mat4::from_scale_rotation_translation(
            Vec3::new(0.5, 2.0, 1.0),
            Quat::from_rotation_x(-0.4),
            Vec3::new(0.0, -1.0, 0.5),
        );
        let combined = outer * inner;

        let mut flat = SceneBuilder::new();
        flat.add_object(ObjectDesc::new(Placement::Applied(combined)).with_triangles(tris.clone()));
        let flat = flat.build().unwrap();

        let mut single = SceneBuilder::new();
        single.add_object(ObjectDesc::new(Placement::Instanced(combined)).with_triangles(tris.clone()));
        let single = single.build().unwrap();

        let mut nested = SceneBuilder::new();
        let child =
            nested.add_object(ObjectDesc::new(Placement::Instanced(inner)).with_triangles(tris.clone()));
        nested.add_object(ObjectDesc::new(Placement::Instanced(outer)).with_children(vec![child]));
        let nested = nested.build().unwrap();

        let config = TraversalConfig::default();
        let kernels = [
            Kernel::new(&flat, config),
            Kernel::new(&single, config),
            Kernel::new(&nested, config),
        ];

        let mut mismatches = 0;
        let mut compared = 0;
        for ray in rays_at_triangles(&mut rng, &tris, combined, 200, 15.0) {
            let [a, b, c] = [0, 1, 2].map(|i| kernels[i].intersect(&ray, Visibility::CAMERA));
            if a.is_hit() != b.is_hit() || a.is_hit() != c.is_hit() {
                // Grazing hits on shared edges may differ by rounding.
                mismatches += 1;
                continue;
            }
            if a.is_hit() {
                compared += 1;
                let tol = 1e-3 * a.t.max(1.0);
                assert!((a.t - b.t).abs() < tol, "single instance {} vs {}", b.t, a.t);
                assert!((a.t - c.t).abs() < tol, "nested instance {} vs {}", c.t, a.t);
            }
        }
        assert!(mismatches <= 2, "{mismatches} hit/miss disagreements");
        assert!(compared > 150, "only {compared} rays hit");
    }

    #[test]
    fn test_covering_variants_agree() {
        init();
        let mut rng = StdRng::seed_from_u64(5);
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(random_triangles(&mut rng, 40, 3.0)));
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))))
                .with_triangles(random_triangles(&mut rng, 40, 2.0)),
        );
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let variants: Vec<Variant> = Variant::ALL
            .into_iter()
            .filter(|v| v.covers(&scene.capabilities))
            .collect();
        assert_eq!(variants.len(), 6);
        assert!(!variants.contains(&Variant::Base));

        for ray in random_rays(&mut rng, 100, 12.0, 3.0) {
            let reference = kernel.intersect(&ray, Visibility::CAMERA);
            for &variant in &variants {
                assert_eq!(kernel.intersect_with(variant, &ray, Visibility::CAMERA), reference);
            }
        }
    }

    #[test]
    fn test_visibility_filters_objects() {
        init();
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(quad_at(2.0)).with_visibility(Visibility::CAMERA));
        builder.add_object(applied(quad_at(5.0)));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let hit = kernel.intersect(&forward_ray(100.0), Visibility::CAMERA);
        assert!((hit.t - 2.0).abs() < 1e-5);

        let hit = kernel.intersect(&forward_ray(100.0), Visibility::REFLECT);
        assert!((hit.t - 5.0).abs() < 1e-5);
        assert_eq!(scene.prim_object[hit.prim as usize], 1);
    }

    #[test]
    fn test_min_distance_skips_near_hits() {
        init();
        let mut builder = SceneBuilder::new();
        builder.add_object(applied([quad_at(2.0), quad_at(5.0)].concat()));
        let scene = builder.build().unwrap();
        let config = TraversalConfig {
            min_distance: 3.0,
            ..Default::default()
        };
        let kernel = Kernel::new(&scene, config);

        let hit = kernel.intersect(&forward_ray(100.0), Visibility::CAMERA);
        assert!((hit.t - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_shadow_stops_at_first_opaque_hit() {
        init();
        let mut builder = SceneBuilder::new();
        let tris = (0..10).flat_map(|i| quad_at(2.0 + i as f32 * 3.0)).collect();
        builder.add_object(applied(tris));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, stats_config());

        let ray = forward_ray(100.0);
        let result = kernel.intersect_shadow(&ray, Visibility::SHADOW_OPAQUE, &mut []);
        assert!(result.occluded);
        assert_eq!(result.num_hits, 0);

        let stats = kernel.stats();
        assert_eq!(stats.traversals, 1);
        assert!(stats.primitive_tests <= 4, "{stats:?}");
        assert!(stats.primitive_tests < scene.num_prims() as u64);

        // Any-hit queries stop the same way.
        kernel.reset_stats();
        let hit = kernel.intersect_any(&ray, Visibility::SHADOW_OPAQUE);
        assert!(hit.is_hit());
        assert!(kernel.stats().primitive_tests <= 4);
    }

    #[test]
    fn test_shadow_visibility_still_finds_nearest() {
        init();
        // Four triangles in one leaf, the far quad tested first.
        let mut builder = SceneBuilder::new();
        builder.add_object(applied([quad_at(8.0), quad_at(2.0)].concat()));
        let scene = builder.build().unwrap();
        assert_eq!(scene.leaves.len(), 1);
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let ray = forward_ray(100.0);

        let camera = kernel.intersect(&ray, Visibility::CAMERA);
        assert!((camera.t - 2.0).abs() < 1e-5);
        for visibility in [Visibility::ALL, Visibility::SHADOW_OPAQUE, Visibility::SHADOW] {
            assert_eq!(kernel.intersect(&ray, visibility), camera);
        }

        let any = kernel.intersect_any(&ray, Visibility::ALL);
        assert!(any.is_hit());
        assert!((any.t - 8.0).abs() < 1e-5 || (any.t - 2.0).abs() < 1e-5, "{}", any.t);
    }

    #[test]
    fn test_shadow_collects_transparent_hits() {
        init();
        let mut builder = SceneBuilder::new();
        let glass = builder.add_shader(ShaderFlags::HAS_TRANSPARENT_SHADOW);
        for z in [2.0, 5.0, 8.0] {
            builder.add_object(applied(quad_at(z)).with_shader(glass));
        }
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let ray = forward_ray(100.0);

        let mut hits = [Intersection::default(); 8];
        let result = kernel.intersect_shadow(&ray, Visibility::SHADOW, &mut hits);
        assert!(!result.occluded);
        assert_eq!(result.num_hits, 3);
        let mut ts: Vec<f32> = hits[..3].iter().map(|h| h.t).collect();
        ts.sort_by(f32::total_cmp);
        for (t, expected) in ts.iter().zip([2.0, 5.0, 8.0]) {
            assert!((t - expected).abs() < 1e-5);
        }

        // A bound shorter than the last surface only sees the first two.
        let result = kernel.intersect_shadow(&forward_ray(6.0), Visibility::SHADOW, &mut hits);
        assert!(!result.occluded);
        assert_eq!(result.num_hits, 2);

        // One more hit than fits counts as blocked.
        let mut small = [Intersection::default(); 2];
        let result = kernel.intersect_shadow(&ray, Visibility::SHADOW, &mut small);
        assert!(result.occluded);
        assert_eq!(result.num_hits, 2);
    }

    #[test]
    fn test_shadow_opaque_behind_transparent() {
        init();
        let mut builder = SceneBuilder::new();
        let glass = builder.add_shader(ShaderFlags::HAS_TRANSPARENT_SHADOW);
        builder.add_object(applied(quad_at(2.0)).with_shader(glass));
        builder.add_object(applied(quad_at(11.0)));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let mut hits = [Intersection::default(); 8];
        let result = kernel.intersect_shadow(&forward_ray(100.0), Visibility::SHADOW, &mut hits);
        assert!(result.occluded);

        let result = kernel.intersect_shadow(&forward_ray(10.0), Visibility::SHADOW, &mut hits);
        assert!(!result.occluded);
        assert_eq!(result.num_hits, 1);
    }

    #[test]
    fn test_shadow_hits_inside_scaled_instance() {
        init();
        let mut builder = SceneBuilder::new();
        let glass = builder.add_shader(ShaderFlags::HAS_TRANSPARENT_SHADOW);
        let tfm = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 10.0),
        );
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(tfm))
                .with_triangles(quad_at(1.0))
                .with_shader(glass),
        );
        builder.add_object(applied(quad_at(3.0)).with_shader(glass));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::new(Vec3::new(0.5, 0.2, 0.0), Vec3::Z, 100.0);
        let mut hits = [Intersection::default(); 4];
        let result = kernel.intersect_shadow(&ray, Visibility::SHADOW, &mut hits);
        assert_eq!(result.num_hits, 2);

        // Quad sits at world z = 12.
        let instanced = hits[..2].iter().find(|h| h.object == 0).unwrap();
        assert!((instanced.t - 12.0).abs() < 1e-4);
        let top = hits[..2].iter().find(|h| h.object == OBJECT_NONE).unwrap();
        assert!((top.t - 3.0).abs() < 1e-5);
    }

    fn layered_subsurface_scene() -> (SceneBuffers, u32, u32) {
        let mut builder = SceneBuilder::new();
        let tfm = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 10.0),
        );
        let layers = (1..=5).flat_map(|z| quad_at(z as f32)).collect();
        let skin = builder.add_object(ObjectDesc::new(Placement::Instanced(tfm)).with_triangles(layers));
        let other = builder.add_object(applied(quad_at(3.0)));
        (builder.build().unwrap(), skin, other)
    }

    #[test]
    fn test_subsurface_keeps_only_target_object() {
        init();
        let (scene, skin, other) = layered_subsurface_scene();
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let ray = Ray::new(Vec3::new(0.5, 0.2, 0.0), Vec3::Z, 100.0);

        let mut hits = [Intersection::default(); 8];
        let result = kernel.intersect_subsurface(&ray, skin, &mut hits, &mut rng);
        assert_eq!(result.num_hits, 5);
        assert_eq!(result.total_hits, 5);
        assert!(!result.saturated());

        let mut ts: Vec<f32> = hits[..5].iter().map(|h| h.t).collect();
        ts.sort_by(f32::total_cmp);
        for (t, expected) in ts.iter().zip([12.0, 14.0, 16.0, 18.0, 20.0]) {
            assert!((t - expected).abs() < 1e-3, "{ts:?}");
        }
        assert!(hits[..5].iter().all(|h| h.object == skin));

        let result = kernel.intersect_subsurface(&ray, other, &mut hits, &mut rng);
        assert_eq!(result.num_hits, 1);
        assert!((hits[0].t - 3.0).abs() < 1e-5);
        assert_eq!(scene.prim_object[hits[0].prim as usize], other);
    }

    #[test]
    fn test_subsurface_reservoir_saturates() {
        init();
        let (scene, skin, _) = layered_subsurface_scene();
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let mut rng = StdRng::seed_from_u64(9);
        let ray = Ray::new(Vec3::new(0.5, 0.2, 0.0), Vec3::Z, 100.0);

        let mut hits = [Intersection::default(); 2];
        let result = kernel.intersect_subsurface(&ray, skin, &mut hits, &mut rng);
        assert_eq!(result.num_hits, 2);
        assert_eq!(result.total_hits, 5);
        assert!(result.saturated());
        for hit in &hits {
            assert_eq!(hit.object, skin);
            assert!(hit.t > 11.9 && hit.t < 20.1, "{}", hit.t);
        }
    }

    #[test]
    fn test_subsurface_without_reachable_primitives() {
        init();
        let (scene, skin, _) = layered_subsurface_scene();
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let mut rng = StdRng::seed_from_u64(2);

        let away = Ray::new(Vec3::new(0.5, 0.2, 0.0), -Vec3::Z, 100.0);
        let mut hits = [Intersection::default(); 4];
        let result = kernel.intersect_subsurface(&away, skin, &mut hits, &mut rng);
        assert_eq!(result, SubsurfaceResult::default());

        let result = kernel.intersect_subsurface(&away, 99, &mut hits, &mut rng);
        assert_eq!(result, SubsurfaceResult::default());
    }

    #[test]
    fn test_subsurface_inside_nested_instance() {
        init();
        let mut builder = SceneBuilder::new();
        let skin = builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))))
                .with_triangles(quad_at(5.0)),
        );
        let outer = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 10.0),
        );
        builder.add_object(ObjectDesc::new(Placement::Instanced(outer)).with_children(vec![skin]));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        // Quad sits at world z = 2 * (5 + 1) + 10.
        let ray = forward_ray(100.0);
        let closest = kernel.intersect(&ray, Visibility::CAMERA);
        assert_eq!(closest.object, skin);
        assert!((closest.t - 22.0).abs() < 1e-3, "{}", closest.t);

        let mut rng = StdRng::seed_from_u64(6);
        let mut hits = [Intersection::default(); 4];
        let result = kernel.intersect_subsurface(&ray, skin, &mut hits, &mut rng);
        assert_eq!(result.num_hits, 1);
        assert_eq!(hits[0].object, skin);
        assert!((hits[0].t - closest.t).abs() < 1e-3, "{}", hits[0].t);

        // Bounded short of the quad, nothing is found.
        let result = kernel.intersect_subsurface(&forward_ray(21.0), skin, &mut hits, &mut rng);
        assert_eq!(result.num_hits, 0);
    }

    fn volume_scene() -> SceneBuffers {
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(quad_at(3.0)));
        builder.add_object(applied([quad_at(6.0), quad_at(8.0)].concat()).with_volume());
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))))
                .with_triangles(quad_at(1.0)),
        );
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))))
                .with_triangles(quad_at(4.0))
                .with_volume(),
        );
        builder.build().unwrap()
    }

    #[test]
    fn test_volume_closest_skips_plain_surfaces() {
        init();
        let scene = volume_scene();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let hit = kernel.intersect_volume(&forward_ray(100.0), Visibility::ALL);
        assert!(hit.is_hit());
        assert!((hit.t - 6.0).abs() < 1e-5);
        assert_eq!(scene.prim_object[hit.prim as usize], 1);

        // Past the applied volume, the instanced one is next.
        let ray = Ray::new(Vec3::new(0.3, -0.2, 9.0), Vec3::Z, 100.0);
        let hit = kernel.intersect_volume(&ray, Visibility::ALL);
        assert!((hit.t - 5.0).abs() < 1e-4);
        assert_eq!(hit.object, 3);
    }

    #[test]
    fn test_volume_all_collects_boundaries() {
        init();
        let scene = volume_scene();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let mut hits = [Intersection::default(); 8];
        let n = kernel.intersect_volume_all(&forward_ray(100.0), Visibility::ALL, &mut hits);
        assert_eq!(n, 3);
        let mut ts: Vec<f32> = hits[..n].iter().map(|h| h.t).collect();
        ts.sort_by(f32::total_cmp);
        for (t, expected) in ts.iter().zip([6.0, 8.0, 14.0]) {
            assert!((t - expected).abs() < 1e-4, "{ts:?}");
        }

        let mut one = [Intersection::default(); 1];
        assert_eq!(kernel.intersect_volume_all(&forward_ray(100.0), Visibility::ALL, &mut one), 1);
        assert_eq!(kernel.intersect_volume_all(&forward_ray(100.0), Visibility::ALL, &mut []), 0);
    }

    #[test]
    fn test_volume_queries_on_scene_without_volumes() {
        init();
        let scene = two_triangle_scene(None);
        let kernel = Kernel::new(&scene, stats_config());
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z, 50.0);

        let hit = kernel.intersect_volume(&ray, Visibility::ALL);
        assert!(!hit.is_hit());
        assert_eq!(hit.t, 50.0);

        let mut hits = [Intersection::default(); 4];
        assert_eq!(kernel.intersect_volume_all(&ray, Visibility::ALL, &mut hits), 0);
        assert_eq!(kernel.stats().traversals, 0);
    }

    #[test]
    fn test_volume_inside_grouping_instance() {
        init();
        let mut builder = SceneBuilder::new();
        let fog = builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::IDENTITY))
                .with_triangles(quad_at(5.0))
                .with_volume(),
        );
        let wall = builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::IDENTITY)).with_triangles(quad_at(2.0)),
        );
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0))))
                .with_children(vec![fog, wall]),
        );
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let ray = forward_ray(100.0);

        let closest = kernel.intersect(&ray, Visibility::CAMERA);
        assert_eq!(closest.object, wall);
        assert!((closest.t - 3.0).abs() < 1e-4);

        let hit = kernel.intersect_volume(&ray, Visibility::ALL);
        assert!(hit.is_hit());
        assert_eq!(hit.object, fog);
        assert!((hit.t - 6.0).abs() < 1e-4, "{}", hit.t);

        let mut hits = [Intersection::default(); 4];
        assert_eq!(kernel.intersect_volume_all(&ray, Visibility::ALL, &mut hits), 1);
        assert_eq!(hits[0].object, fog);
        assert!((hits[0].t - 6.0).abs() < 1e-4);
    }

    /// A chain of nodes whose equal boxes make the walk push one leaf per
    /// level, deeper than the stack holds.
    fn overflowing_chain(levels: usize) -> SceneBuffers {
        let tri = tri_at(0.0);
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let nodes = (0..levels)
            .map(|i| {
                let next = if i + 1 < levels {
                    (i + 1) as i32
                } else {
                    leaf_address(0)
                };
                BvhNode::new([bounds; 2], [next, leaf_address(0)], [Visibility::ALL; 2])
            })
            .collect();

        let scene = SceneBuffers {
            nodes,
            leaves: vec![LeafNode::primitives(0, 1, Visibility::ALL, PrimitiveType::Triangle.bit())],
            root: 0,
            prim_type: vec![PrimitiveType::Triangle],
            prim_index: vec![0],
            prim_segment: vec![0],
            prim_object: vec![0],
            prim_visibility: vec![Visibility::ALL.bits()],
            triangles: vec![TriangleData {
                verts: tri[0],
                shader: 0,
            }],
            objects: vec![ObjectData {
                transform: ObjectTransform::identity(),
                flags: ObjectFlags::TRANSFORM_APPLIED,
                root: 0,
                parent: OBJECT_NONE,
            }],
            shaders: vec![ShaderFlags::empty()],
            ..Default::default()
        };
        scene.validate().unwrap();
        scene
    }

    #[test]
    fn test_stack_overflow_fails_closed() {
        init();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z, 100.0);

        let shallow = overflowing_chain(BVH_STACK_SIZE / 2);
        let kernel = Kernel::new(&shallow, TraversalConfig::default());
        assert!(kernel.intersect(&ray, Visibility::CAMERA).is_hit());
        assert_eq!(kernel.stats().stack_overflows, 0);

        let deep = overflowing_chain(BVH_STACK_SIZE + 8);
        let kernel = Kernel::new(&deep, TraversalConfig::default());
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(!hit.is_hit());
        assert_eq!(hit.t, 100.0);

        let result = kernel.intersect_shadow(&ray, Visibility::SHADOW, &mut []);
        assert!(!result.occluded);

        let stats = kernel.stats();
        assert_eq!(stats.stack_overflows, 2);
        // Only overflows are counted without collect_stats.
        assert_eq!(stats.traversals, 0);
    }

    fn nested_chain(levels: usize) -> SceneBuffers {
        let mut builder = SceneBuilder::new();
        let mut last = builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::IDENTITY)).with_triangles(tri_at(4.0)),
        );
        for _ in 1..levels {
            last = builder.add_object(
                ObjectDesc::new(Placement::Instanced(Mat4::IDENTITY)).with_children(vec![last]),
            );
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_instance_nesting_limit() {
        init();
        let ray = Ray::new(Vec3::ZERO, Vec3::Z, 100.0);

        let scene = nested_chain(crate::types::MAX_INSTANCE_DEPTH);
        let kernel = Kernel::new(&scene, stats_config());
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(hit.is_hit());
        assert!((hit.t - 4.0).abs() < 1e-5);
        assert_eq!(hit.object, 0);
        assert_eq!(kernel.stats().instance_pushes, crate::types::MAX_INSTANCE_DEPTH as u64);

        let scene = nested_chain(crate::types::MAX_INSTANCE_DEPTH + 2);
        let kernel = Kernel::new(&scene, TraversalConfig::default());
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(!hit.is_hit());
        assert_eq!(kernel.stats().stack_overflows, 1);
    }

    #[test]
    fn test_degenerate_instance_is_skipped() {
        init();
        let mut builder = SceneBuilder::new();
        builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::from_scale(Vec3::new(1.0, 1.0, 0.0))))
                .with_triangles(tri_at(2.0)),
        );
        let visible = builder.add_object(
            ObjectDesc::new(Placement::Instanced(Mat4::IDENTITY)).with_triangles(tri_at(5.0)),
        );
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::Z, 100.0);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!(hit.is_hit());
        assert_eq!(hit.object, visible);
        assert!((hit.t - 6.0).abs() < 1e-5);
        assert_eq!(kernel.stats().stack_overflows, 0);
    }

    #[test]
    fn test_motion_triangle_follows_time() {
        init();
        let mut builder = SceneBuilder::new();
        builder.add_object(
            ObjectDesc::new(Placement::Applied(Mat4::IDENTITY))
                .with_motion_triangles(vec![vec![tri_at(2.0)[0], tri_at(6.0)[0]]]),
        );
        let scene = builder.build().unwrap();
        assert!(scene.capabilities.has_motion);
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        for (time, expected) in [(0.0, 2.0), (0.5, 4.0), (1.0, 6.0)] {
            let ray = Ray::with_time(Vec3::ZERO, Vec3::Z, 100.0, time);
            let hit = kernel.intersect(&ray, Visibility::CAMERA);
            assert_eq!(hit.prim_type, PrimitiveType::MotionTriangle);
            assert!((hit.t - expected).abs() < 1e-4, "time {time}: {}", hit.t);
        }
    }

    #[test]
    fn test_motion_instance_follows_time() {
        init();
        let mut builder = SceneBuilder::new();
        let keys = vec![
            DecomposedTransform::from_translation(Vec3::ZERO),
            DecomposedTransform::from_translation(Vec3::new(0.0, 0.0, 4.0)),
        ];
        builder.add_object(
            ObjectDesc::new(Placement::InstancedMotion(keys)).with_triangles(tri_at(2.0)),
        );
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::with_time(Vec3::ZERO, Vec3::Z, 100.0, 0.5);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!((hit.t - 4.0).abs() < 1e-4);

        // Without motion the first key is used.
        let hit = kernel.intersect_with(Variant::Instancing, &ray, Visibility::CAMERA);
        assert!((hit.t - 2.0).abs() < 1e-4);
    }

    fn curve_along_x(radius: f32) -> Vec<CurveKey> {
        [-2.0, 0.0, 2.0]
            .into_iter()
            .map(|x| CurveKey::new(Vec3::new(x, 0.0, 5.0), radius))
            .collect()
    }

    #[test]
    fn test_curve_hit() {
        init();
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(Vec::new()).with_curves(vec![curve_along_x(0.5)]));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::new(Vec3::new(0.5, 0.0, 0.0), Vec3::Z, 100.0);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert_eq!(hit.prim_type, PrimitiveType::Curve);
        assert!((hit.t - 4.5).abs() < 1e-3, "{}", hit.t);
        assert!((hit.u - 0.25).abs() < 1e-3, "{}", hit.u);
        assert_eq!(scene.prim_segment[hit.prim as usize], 1);
    }

    #[test]
    fn test_cardinal_curve_hit() {
        init();
        let mut builder = SceneBuilder::new().curve_shape(CurveShape::Cardinal);
        builder.add_object(applied(Vec::new()).with_curves(vec![curve_along_x(0.5)]));
        let scene = builder.build().unwrap();
        let config = TraversalConfig {
            curve: crate::config::CurveConfig {
                shape: CurveShape::Cardinal,
                ..Default::default()
            },
            ..Default::default()
        };
        let kernel = Kernel::new(&scene, config);

        // Collinear keys make the spline a straight tube.
        let ray = Ray::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::Z, 100.0);
        let hit = kernel.intersect(&ray, Visibility::CAMERA);
        assert!((hit.t - 4.5).abs() < 1e-3, "{}", hit.t);
    }

    #[test]
    fn test_minimum_width_finds_thin_curves() {
        init();
        let mut builder = SceneBuilder::new().curve_minimum_width(0.1);
        builder.add_object(applied(Vec::new()).with_curves(vec![curve_along_x(0.001)]));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        let ray = Ray::new(Vec3::new(0.5, 0.05, 0.0), Vec3::Z, 100.0);
        assert!(!kernel.intersect(&ray, Visibility::CAMERA).is_hit());

        let hit = kernel.intersect_min_width(&ray, Visibility::CAMERA, 0.02, None);
        assert!(hit.is_hit());
        assert_eq!(hit.prim_type, PrimitiveType::Curve);
        assert!(hit.t > 4.8 && hit.t < 5.0, "{}", hit.t);

        // Jittered widening keeps only a fraction of the widened hits.
        let mut rng = StdRng::seed_from_u64(4);
        let kept = (0..200)
            .filter(|_| {
                kernel
                    .intersect_min_width(&ray, Visibility::CAMERA, 0.02, Some(&mut rng as &mut dyn RngCore))
                    .is_hit()
            })
            .count();
        assert!(kept < 40, "kept {kept} of 200");

        let [a, b] = [13, 13].map(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            kernel.intersect_min_width(&ray, Visibility::CAMERA, 0.02, Some(&mut rng as &mut dyn RngCore))
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_motion_curve_follows_time() {
        init();
        let mut builder = SceneBuilder::new();
        let far: Vec<CurveKey> = curve_along_x(0.5)
            .iter()
            .map(|k| CurveKey::new(k.position() + Vec3::new(0.0, 0.0, 4.0), k.radius))
            .collect();
        builder.add_object(
            applied(Vec::new()).with_motion_curves(vec![vec![curve_along_x(0.5), far]]),
        );
        let scene = builder.build().unwrap();
        assert!(scene.capabilities.has_motion && scene.capabilities.has_curves);
        let kernel = Kernel::new(&scene, TraversalConfig::default());

        for (time, expected) in [(0.0, 4.5), (0.5, 6.5), (1.0, 8.5)] {
            let ray = Ray::with_time(Vec3::new(0.5, 0.0, 0.0), Vec3::Z, 100.0, time);
            let hit = kernel.intersect(&ray, Visibility::CAMERA);
            assert_eq!(hit.prim_type, PrimitiveType::MotionCurve);
            assert!((hit.t - expected).abs() < 1e-3, "time {time}: {}", hit.t);
            assert!((hit.u - 0.25).abs() < 1e-3, "{}", hit.u);

            for variant in [Variant::HairMotion, Variant::HairMotionMinimumWidth] {
                assert_eq!(kernel.intersect_with(variant, &ray, Visibility::CAMERA), hit);
            }
        }

        // Where the curve was at shutter open is empty later on.
        let ray = Ray::with_time(Vec3::new(0.5, 0.0, 0.0), Vec3::Z, 5.0, 1.0);
        assert!(!kernel.intersect(&ray, Visibility::CAMERA).is_hit());
    }

    #[test]
    fn test_try_new_rejects_broken_buffers() {
        init();
        let mut scene = two_triangle_scene(None);
        assert!(Kernel::try_new(&scene, TraversalConfig::default()).is_ok());

        scene.leaves[1].prim_addr2 = 9;
        let err = Kernel::try_new(&scene, TraversalConfig::default()).err();
        assert!(matches!(err, Some(crate::error::SceneError::InvalidLeafRange { leaf: 1, .. })));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid scene buffers")]
    fn test_new_checks_buffers_in_debug() {
        let mut scene = two_triangle_scene(None);
        scene.objects[0].root = 40;
        let _ = Kernel::new(&scene, TraversalConfig::default());
    }

    #[test]
    fn test_batch_matches_serial() {
        init();
        let mut rng = StdRng::seed_from_u64(21);
        let mut builder = SceneBuilder::new();
        builder.add_object(applied(random_triangles(&mut rng, 100, 4.0)));
        let scene = builder.build().unwrap();
        let kernel = Kernel::new(&scene, stats_config());

        let rays = random_rays(&mut rng, 64, 15.0, 4.0);
        let batch = kernel.intersect_batch(&rays, Visibility::CAMERA);
        assert_eq!(batch.len(), rays.len());
        for (ray, hit) in rays.iter().zip(&batch) {
            assert_eq!(*hit, kernel.intersect(ray, Visibility::CAMERA));
        }
        assert_eq!(kernel.stats().traversals, 128);
    }

    #[test]
    fn test_kernel_is_sync() {
        fn assert_sync<T: Sync>() {}
        assert_sync::<Kernel<'static>>();
    }
}
