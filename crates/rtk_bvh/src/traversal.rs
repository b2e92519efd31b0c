//! The stack-based hierarchy walk shared by every query.
//!
//! The walk alternates between descending internal nodes (testing both child
//! boxes, following the nearer hit child and deferring the other), visiting
//! leaves and leaving instances. What happens to a primitive hit is up to the
//! [`Query`].

use rand::RngCore;
use rtk_math::Vec3A;

use crate::config::TraversalConfig;
use crate::dispatch::FeatureSet;
use crate::error::TraversalError;
use crate::instance::{self, InstanceFrame, InstanceStack, WorkingSpace};
use crate::node::{BoxRay, MinWidth};
use crate::primitive::PrimitiveTester;
use crate::scene::SceneBuffers;
use crate::stack::TraversalStack;
use crate::stats::WalkCounters;
use crate::types::{Intersection, Visibility, ENTRYPOINT_SENTINEL};

/// What the walk does after a hit was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Behaviour of one query flavour.
pub(crate) trait Query {
    /// Categories used to cull node children and primitives, `None` to
    /// visit everything.
    fn visibility(&self) -> Option<Visibility>;

    /// Whether primitive `prim`, reached inside `object`, is tested at all.
    fn accepts(&self, _scene: &SceneBuffers, _prim: usize, _object: u32) -> bool {
        true
    }

    /// Whether the walk descends into an instance of `object`.
    fn enters(&self, _scene: &SceneBuffers, _object: u32) -> bool {
        true
    }

    /// Handle a hit. `hit.t` and `t` are in the current working space; the
    /// query may tighten `t`.
    fn record(&mut self, scene: &SceneBuffers, hit: Intersection, t: &mut f32) -> Flow;

    /// Hits stored so far by multi-hit queries.
    fn recorded(&self) -> usize {
        0
    }

    /// Multiply the distance of hits stored from index `first` on.
    fn rescale(&mut self, _first: usize, _factor: f32) {}
}

/// Per-call context of a walk.
pub(crate) struct Walker<'a, 'r> {
    pub scene: &'a SceneBuffers,
    pub config: &'a TraversalConfig,
    pub tester: PrimitiveTester<'a, 'r>,
    pub counters: WalkCounters,
}

impl<'a, 'r> Walker<'a, 'r> {
    pub fn new(scene: &'a SceneBuffers, config: &'a TraversalConfig) -> Self {
        Self {
            scene,
            config,
            tester: PrimitiveTester::new(scene, config),
            counters: WalkCounters::default(),
        }
    }

    pub fn with_min_width(
        mut self,
        min_width: Option<MinWidth>,
        jitter: Option<&'r mut dyn RngCore>,
    ) -> Self {
        self.tester = self.tester.with_min_width(min_width, jitter);
        self
    }
}

/// Where a walk begins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkStart {
    pub root: i32,
    pub space: WorkingSpace,
    /// Instance the root belongs to, `OBJECT_NONE` for the top level.
    pub object: u32,
    pub time: f32,
    /// Initial distance bound in `space`.
    pub t: f32,
}

/// Walk the hierarchy under `start.root`.
///
/// Returns the final distance bound, mapped back to the space of
/// `start`. Fails when the node stack or the instance stack overflows.
pub(crate) fn walk<F: FeatureSet, Q: Query>(
    walker: &mut Walker<'_, '_>,
    start: WalkStart,
    query: &mut Q,
) -> Result<f32, TraversalError> {
    let scene = walker.scene;
    let visibility = query.visibility();
    let min_width = if F::HAIR_MINIMUM_WIDTH {
        walker.tester.min_width()
    } else {
        None
    };
    let min_distance = walker.config.min_distance;

    let mut stack = TraversalStack::new();
    let mut frames = InstanceStack::new();
    let mut space = start.space;
    let mut object = start.object;
    let mut t = start.t;
    let mut node_addr = start.root;

    loop {
        if node_addr == ENTRYPOINT_SENTINEL {
            let Some(frame) = frames.pop() else {
                break;
            };
            t *= frame.factor;
            query.rescale(frame.first_hit, frame.factor);
            space = frame.parent;
            object = frame.parent_object;
            node_addr = stack.pop();
            continue;
        }

        if node_addr >= 0 {
            walker.counters.node_visits += 1;
            let node = scene.node(node_addr);
            let box_ray = BoxRay {
                origin: Vec3A::from(space.origin),
                idir: Vec3A::from(space.idir),
                t,
                visibility,
                min_width,
            };
            let hits = box_ray.intersect_children(node);

            node_addr = match (hits.hit(0), hits.hit(1)) {
                (false, false) => stack.pop(),
                (true, false) => node.children[0],
                (false, true) => node.children[1],
                (true, true) => {
                    let (near, far) = if hits.near[1] < hits.near[0] {
                        (node.children[1], node.children[0])
                    } else {
                        (node.children[0], node.children[1])
                    };
                    stack.push(far)?;
                    near
                }
            };
            continue;
        }

        let leaf = *scene.leaf(node_addr);
        if let Some(visibility) = visibility {
            if !Visibility::from_bits_retain(leaf.visibility).visible_to(visibility) {
                node_addr = stack.pop();
                continue;
            }
        }

        if let Some(instance) = leaf.instance_object() {
            if !F::INSTANCING || !query.enters(scene, instance) {
                node_addr = stack.pop();
                continue;
            }

            let entered = instance::object_inverse(scene, instance, start.time, F::MOTION)
                .and_then(|itfm| space.enter(&itfm));
            let Some((local, len)) = entered else {
                log::debug!("Skipping instance of object {instance}: degenerate transform");
                node_addr = stack.pop();
                continue;
            };

            frames.push(InstanceFrame {
                parent: space,
                parent_object: object,
                factor: 1.0 / len,
                first_hit: query.recorded(),
            })?;
            stack.push(ENTRYPOINT_SENTINEL)?;
            walker.counters.instance_pushes += 1;

            space = local;
            object = instance;
            t *= len;
            node_addr = scene.objects[instance as usize].root;
            continue;
        }

        node_addr = stack.pop();
        let t_min = min_distance * space.t_scale;

        for prim in leaf.prim_addr as usize..leaf.prim_addr2 as usize {
            if let Some(visibility) = visibility {
                if !scene.prim_visibility(prim).visible_to(visibility) {
                    continue;
                }
            }
            if !query.accepts(scene, prim, object) {
                continue;
            }

            walker.counters.primitive_tests += 1;
            let Some(hit) = walker.tester.intersect::<F>(prim, &space, start.time, t_min, t) else {
                continue;
            };

            let isect = Intersection {
                t: hit.t,
                u: hit.u,
                v: hit.v,
                prim: prim as u32,
                object,
                prim_type: scene.prim_type[prim],
            };
            if query.record(scene, isect, &mut t) == Flow::Stop {
                // Leave open instances so the bound ends up in input space.
                while let Some(frame) = frames.pop() {
                    t *= frame.factor;
                    query.rescale(frame.first_hit, frame.factor);
                }
                return Ok(t);
            }
        }
    }

    Ok(t)
}
