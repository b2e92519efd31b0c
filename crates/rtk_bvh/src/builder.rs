//! Reference scene builder.
//!
//! Assembles valid [`SceneBuffers`] from object descriptions using a simple
//! median split: sort primitive centroids along the longest axis, split in
//! half, recurse. Good enough for tests and benchmarks; production builders
//! stay outside this crate.
//!
//! ```ignore
//! let mut builder = SceneBuilder::new();
//! builder.add_object(ObjectDesc::new(Placement::Applied(Mat4::IDENTITY)).with_triangles(tris));
//! let scene = builder.build()?;
//! ```

use rtk_math::{interpolate_transform, Aabb, DecomposedTransform, Mat4, Mat4Ext, Vec3, Vec4};

use crate::config::CurveShape;
use crate::error::{SceneError, SceneResult};
use crate::primitive::curve;
use crate::scene::{
    leaf_address, BvhNode, CurveData, CurveKey, LeafNode, MotionTriangleData, ObjectData,
    ObjectTransform, SceneBuffers, SceneCapabilities, TriangleData,
};
use crate::types::{ObjectFlags, PrimitiveType, ShaderFlags, Visibility, OBJECT_NONE};

/// Maximum primitives per leaf node before splitting.
const LEAF_MAX_SIZE: usize = 4;

/// Samples per key interval when bounding a moving instance.
const MOTION_BOUND_SAMPLES: usize = 8;

/// Pad thin dimensions to avoid degenerate boxes.
const BOUND_PADDING: f32 = 1e-4;

/// How an object's geometry reaches the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Geometry is transformed to world space and lives in the top level.
    Applied(Mat4),
    /// Geometry stays in object space under its own hierarchy.
    Instanced(Mat4),
    /// Like `Instanced`, with a time-keyed transform.
    InstancedMotion(Vec<DecomposedTransform>),
}

/// Description of one object.
#[derive(Debug, Clone)]
pub struct ObjectDesc {
    pub placement: Placement,
    pub visibility: Visibility,
    pub shader: u32,
    pub has_volume: bool,
    pub triangles: Vec<[Vec3; 3]>,
    /// Per triangle, its vertices at each motion step.
    pub motion_triangles: Vec<Vec<[Vec3; 3]>>,
    /// Per curve, its keys.
    pub curves: Vec<Vec<CurveKey>>,
    /// Per curve, its keys at each motion step.
    pub motion_curves: Vec<Vec<Vec<CurveKey>>>,
    /// Instanced objects placed inside this object's hierarchy.
    pub children: Vec<u32>,
}

impl ObjectDesc {
    pub fn new(placement: Placement) -> Self {
        Self {
            placement,
            visibility: Visibility::ALL,
            shader: 0,
            has_volume: false,
            triangles: Vec::new(),
            motion_triangles: Vec::new(),
            curves: Vec::new(),
            motion_curves: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_triangles(mut self, triangles: Vec<[Vec3; 3]>) -> Self {
        self.triangles = triangles;
        self
    }

    pub fn with_motion_triangles(mut self, triangles: Vec<Vec<[Vec3; 3]>>) -> Self {
        self.motion_triangles = triangles;
        self
    }

    pub fn with_curves(mut self, curves: Vec<Vec<CurveKey>>) -> Self {
        self.curves = curves;
        self
    }

    pub fn with_motion_curves(mut self, curves: Vec<Vec<Vec<CurveKey>>>) -> Self {
        self.motion_curves = curves;
        self
    }

    pub fn with_children(mut self, children: Vec<u32>) -> Self {
        self.children = children;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_shader(mut self, shader: u32) -> Self {
        self.shader = shader;
        self
    }

    pub fn with_volume(mut self) -> Self {
        self.has_volume = true;
        self
    }

    fn is_instanced(&self) -> bool {
        !matches!(self.placement, Placement::Applied(_))
    }
}

/// Primitive staged for the build, before leaf order is known.
#[derive(Debug, Clone, Copy)]
struct PrimRecord {
    ty: PrimitiveType,
    index: u32,
    segment: u32,
    object: u32,
    visibility: Visibility,
}

/// Something a leaf can hold.
#[derive(Debug, Clone, Copy)]
enum BuildItem {
    Prim { record: usize, bounds: Aabb },
    Instance { object: u32, bounds: Aabb, visibility: Visibility },
}

impl BuildItem {
    fn bounds(&self) -> Aabb {
        match self {
            BuildItem::Prim { bounds, .. } | BuildItem::Instance { bounds, .. } => *bounds,
        }
    }
}

/// Result of building one subtree.
struct Subtree {
    addr: i32,
    bounds: Aabb,
    /// Ray categories the subtree is visible to, plus `CURVE` when it
    /// contains curves.
    visibility: Visibility,
}

/// Assembles [`SceneBuffers`] from object descriptions.
#[derive(Debug, Clone)]
pub struct SceneBuilder {
    objects: Vec<ObjectDesc>,
    shaders: Vec<ShaderFlags>,
    curve_shape: CurveShape,
    /// Curve bound padding for minimum width, when enabled.
    curve_minimum_width: Option<f32>,
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneBuilder {
    /// New builder with one opaque shader at index 0.
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            shaders: vec![ShaderFlags::empty()],
            curve_shape: CurveShape::Linear,
            curve_minimum_width: None,
        }
    }

    /// Register a shader, returning its index.
    pub fn add_shader(&mut self, flags: ShaderFlags) -> u32 {
        self.shaders.push(flags);
        (self.shaders.len() - 1) as u32
    }

    /// Register an object, returning its id.
    pub fn add_object(&mut self, desc: ObjectDesc) -> u32 {
        self.objects.push(desc);
        (self.objects.len() - 1) as u32
    }

    /// Curve shape the traversal will use; cardinal curves need wider bounds.
    pub fn curve_shape(mut self, shape: CurveShape) -> Self {
        self.curve_shape = shape;
        self
    }

    /// Allow minimum width widening on this scene's curves. Curve bounds
    /// grow by `maximum_width`, which should match the traversal config.
    pub fn curve_minimum_width(mut self, maximum_width: f32) -> Self {
        self.curve_minimum_width = Some(maximum_width.max(0.0));
        self
    }

    pub fn build(self) -> SceneResult<SceneBuffers> {
        let mut state = BuildState {
            scene: SceneBuffers {
                shaders: self.shaders.clone(),
                ..Default::default()
            },
            records: Vec::new(),
            curve_shape: self.curve_shape,
            curve_padding: self.curve_minimum_width.unwrap_or(0.0),
        };

        let nested = self.check_nesting()?;

        // Object hierarchies first, in id order so children exist before
        // their parents reference them.
        let mut object_bounds = vec![Aabb::EMPTY; self.objects.len()];
        let mut object_visibility = vec![Visibility::empty(); self.objects.len()];
        let mut top_items = Vec::new();

        for (id, desc) in self.objects.iter().enumerate() {
            let id = id as u32;
            let world = match &desc.placement {
                Placement::Applied(tfm) => Some(*tfm),
                _ => None,
            };
            let mut items = state.stage_geometry(id, desc, world)?;

            if !desc.is_instanced() {
                state.scene.objects.push(ObjectData {
                    transform: ObjectTransform::from_matrix(world.unwrap_or(Mat4::IDENTITY)),
                    flags: object_flags(desc) | ObjectFlags::TRANSFORM_APPLIED,
                    root: 0,
                    parent: OBJECT_NONE,
                });
                top_items.append(&mut items);
                continue;
            }

            for &child in &desc.children {
                let child_desc = &self.objects[child as usize];
                items.push(BuildItem::Instance {
                    object: child,
                    bounds: instance_bounds(&child_desc.placement, &object_bounds[child as usize]),
                    visibility: object_visibility[child as usize],
                });
            }

            let subtree = state.build_root(items);
            object_bounds[id as usize] = subtree.bounds;
            object_visibility[id as usize] = desc.visibility | (subtree.visibility & Visibility::CURVE);

            let transform = match &desc.placement {
                Placement::InstancedMotion(keys) => ObjectTransform::Motion { keys: keys.clone() },
                Placement::Instanced(tfm) => ObjectTransform::from_matrix(*tfm),
                Placement::Applied(_) => ObjectTransform::identity(),
            };
            let mut flags = object_flags(desc);
            for &child in &desc.children {
                let child = &mut state.scene.objects[child as usize];
                child.parent = id;
                if child
                    .flags
                    .intersects(ObjectFlags::HAS_VOLUME | ObjectFlags::VOLUME_INSIDE)
                {
                    flags |= ObjectFlags::VOLUME_INSIDE;
                }
            }
            state.scene.objects.push(ObjectData {
                transform,
                flags,
                root: subtree.addr,
                parent: OBJECT_NONE,
            });

            if !nested[id as usize] {
                top_items.push(BuildItem::Instance {
                    object: id,
                    bounds: instance_bounds(&desc.placement, &subtree.bounds),
                    visibility: object_visibility[id as usize],
                });
            }
        }

        let top = state.build_root(top_items);
        state.scene.root = top.addr;
        for (object, desc) in state.scene.objects.iter_mut().zip(&self.objects) {
            if !desc.is_instanced() {
                object.root = top.addr;
            }
        }

        state.scene.capabilities = self.capabilities();
        let scene = state.scene;
        scene.validate()?;

        log::info!(
            "Built scene: {} objects, {} primitives, {} nodes, {} leaves, depth {}",
            scene.objects.len(),
            scene.num_prims(),
            scene.nodes.len(),
            scene.leaves.len(),
            scene.max_depth()
        );
        Ok(scene)
    }

    /// Which objects are placed inside another object rather than the top
    /// level.
    fn check_nesting(&self) -> SceneResult<Vec<bool>> {
        let mut nested = vec![false; self.objects.len()];
        for (parent, desc) in self.objects.iter().enumerate() {
            if desc.children.is_empty() {
                continue;
            }
            if !desc.is_instanced() {
                return Err(SceneError::InvalidObject {
                    object: parent,
                    reason: "only instanced objects can hold instances",
                });
            }
            for &child in &desc.children {
                let child = child as usize;
                if child >= parent || !self.objects[child].is_instanced() || nested[child] {
                    return Err(SceneError::InvalidObject {
                        object: child,
                        reason: "nested instances must be instanced, added before and used by one parent",
                    });
                }
                nested[child] = true;
            }
        }
        Ok(nested)
    }

    fn capabilities(&self) -> SceneCapabilities {
        let has_curves = self
            .objects
            .iter()
            .any(|o| !o.curves.is_empty() || !o.motion_curves.is_empty());
        SceneCapabilities {
            has_instancing: self.objects.iter().any(ObjectDesc::is_instanced),
            has_motion: self.objects.iter().any(|o| {
                !o.motion_triangles.is_empty()
                    || !o.motion_curves.is_empty()
                    || matches!(o.placement, Placement::InstancedMotion(_))
            }),
            has_curves,
            has_curve_minimum_width: has_curves && self.curve_minimum_width.is_some(),
            has_volume: self.objects.iter().any(|o| o.has_volume),
        }
    }
}

fn object_flags(desc: &ObjectDesc) -> ObjectFlags {
    let mut flags = ObjectFlags::empty();
    if desc.has_volume {
        flags |= ObjectFlags::HAS_VOLUME;
    }
    if matches!(desc.placement, Placement::InstancedMotion(_)) {
        flags |= ObjectFlags::MOTION;
    }
    flags
}

/// Bounds of an instance in its parent space.
fn instance_bounds(placement: &Placement, local: &Aabb) -> Aabb {
    match placement {
        Placement::Applied(_) => *local,
        Placement::Instanced(tfm) => tfm.transform_aabb(local),
        Placement::InstancedMotion(keys) => {
            let samples = keys.len().max(2) * MOTION_BOUND_SAMPLES;
            (0..=samples).fold(Aabb::EMPTY, |acc, i| {
                let tfm = interpolate_transform(keys, i as f32 / samples as f32);
                Aabb::surrounding(&acc, &tfm.transform_aabb(local))
            })
        }
    }
}

fn transform_key(tfm: &Mat4, key: &CurveKey) -> CurveKey {
    CurveKey::new(tfm.transform_point3(key.position()), key.radius)
}

struct BuildState {
    scene: SceneBuffers,
    records: Vec<PrimRecord>,
    curve_shape: CurveShape,
    curve_padding: f32,
}

impl BuildState {
    /// Copy an object's geometry into the scene buffers and stage one build
    /// item per primitive. `world` transforms geometry of applied objects.
    fn stage_geometry(
        &mut self,
        object: u32,
        desc: &ObjectDesc,
        world: Option<Mat4>,
    ) -> SceneResult<Vec<BuildItem>> {
        let mut items = Vec::new();
        let point = |p: Vec3| world.map_or(p, |tfm| tfm.transform_point3(p));
        let key = |k: &CurveKey| world.map_or(*k, |tfm| transform_key(&tfm, k));
        let scene = &mut self.scene;

        for verts in &desc.triangles {
            let verts = verts.map(point);
            let index = scene.triangles.len() as u32;
            scene.triangles.push(TriangleData {
                verts,
                shader: desc.shader,
            });
            items.push(stage(
                &mut self.records,
                PrimRecord {
                    ty: PrimitiveType::Triangle,
                    index,
                    segment: 0,
                    object,
                    visibility: desc.visibility,
                },
                Aabb::enclose(verts).expand(BOUND_PADDING),
            ));
        }

        for steps in &desc.motion_triangles {
            if steps.len() < 2 {
                return Err(SceneError::TooFewMotionSteps {
                    what: "motion triangle",
                    steps: steps.len() as u32,
                });
            }
            let index = scene.motion_triangles.len() as u32;
            let first_step = scene.motion_verts.len() as u32;
            let mut bounds = Aabb::EMPTY;
            for verts in steps {
                let verts = verts.map(point);
                bounds = Aabb::surrounding(&bounds, &Aabb::enclose(verts));
                scene.motion_verts.push(verts);
            }
            let bounds = bounds.expand(BOUND_PADDING);
            scene.motion_triangles.push(MotionTriangleData {
                first_step,
                num_steps: steps.len() as u32,
                shader: desc.shader,
            });
            items.push(stage(
                &mut self.records,
                PrimRecord {
                    ty: PrimitiveType::MotionTriangle,
                    index,
                    segment: 0,
                    object,
                    visibility: desc.visibility,
                },
                bounds,
            ));
        }

        for keys in &desc.curves {
            if keys.len() < 2 {
                return Err(SceneError::InvalidObject {
                    object: object as usize,
                    reason: "curve needs at least two keys",
                });
            }
            let index = scene.curves.len() as u32;
            let first_key = scene.curve_keys.len() as u32;
            scene.curve_keys.extend(keys.iter().map(key));
            let data = CurveData {
                first_key,
                num_keys: keys.len() as u32,
                shader: desc.shader,
                motion_first_key: 0,
                motion_steps: 0,
            };
            scene.curves.push(data);

            for segment in 0..data.num_keys - 1 {
                let bounds = curve::segment_bounds(
                    &curve::segment_keys(scene, &data, segment, None),
                    self.curve_shape,
                )
                .expand(self.curve_padding);
                items.push(stage(
                    &mut self.records,
                    PrimRecord {
                        ty: PrimitiveType::Curve,
                        index,
                        segment,
                        object,
                        visibility: desc.visibility,
                    },
                    bounds,
                ));
            }
        }

        for steps in &desc.motion_curves {
            let num_keys = steps.first().map_or(0, Vec::len);
            if steps.len() < 2 {
                return Err(SceneError::TooFewMotionSteps {
                    what: "motion curve",
                    steps: steps.len() as u32,
                });
            }
            if num_keys < 2 || steps.iter().any(|s| s.len() != num_keys) {
                return Err(SceneError::InvalidObject {
                    object: object as usize,
                    reason: "motion curve steps need the same key count, at least two",
                });
            }

            let index = scene.curves.len() as u32;
            let first_key = scene.curve_keys.len() as u32;
            scene.curve_keys.extend(steps[0].iter().map(key));
            let motion_first_key = scene.curve_motion_keys.len() as u32;
            for step in steps {
                scene.curve_motion_keys.extend(step.iter().map(key));
            }
            let data = CurveData {
                first_key,
                num_keys: num_keys as u32,
                shader: desc.shader,
                motion_first_key,
                motion_steps: steps.len() as u32,
            };
            scene.curves.push(data);

            for segment in 0..data.num_keys - 1 {
                let bounds = (0..steps.len()).fold(Aabb::EMPTY, |acc, step| {
                    let time = step as f32 / (steps.len() - 1) as f32;
                    let keys: [Vec4; 4] = curve::segment_keys(scene, &data, segment, Some(time));
                    Aabb::surrounding(&acc, &curve::segment_bounds(&keys, self.curve_shape))
                })
                .expand(self.curve_padding);
                items.push(stage(
                    &mut self.records,
                    PrimRecord {
                        ty: PrimitiveType::MotionCurve,
                        index,
                        segment,
                        object,
                        visibility: desc.visibility,
                    },
                    bounds,
                ));
            }
        }

        Ok(items)
    }

    /// Build a hierarchy over `items`. An empty set becomes an empty leaf.
    fn build_root(&mut self, items: Vec<BuildItem>) -> Subtree {
        if items.is_empty() {
            let start = self.scene.prim_type.len() as u32;
            self.scene
                .leaves
                .push(LeafNode::primitives(start, start, Visibility::empty(), 0));
            return Subtree {
                addr: leaf_address(self.scene.leaves.len() - 1),
                bounds: Aabb::EMPTY,
                visibility: Visibility::empty(),
            };
        }
        self.build(items)
    }

    /// Recursive median split.
    fn build(&mut self, mut items: Vec<BuildItem>) -> Subtree {
        let n = items.len();
        let bounds = items
            .iter()
            .fold(Aabb::EMPTY, |acc, item| Aabb::surrounding(&acc, &item.bounds()));

        let has_instance = items
            .iter()
            .any(|item| matches!(item, BuildItem::Instance { .. }));
        if n == 1 || (n <= LEAF_MAX_SIZE && !has_instance) {
            return self.make_leaf(&items, bounds);
        }

        // Choose split axis based on centroid spread
        let centroid_bounds = items
            .iter()
            .fold(Aabb::EMPTY, |acc, item| acc.grow(item.bounds().centroid()));
        let axis = centroid_bounds.longest_axis();

        items.sort_by(|a, b| {
            let a = a.bounds().centroid()[axis];
            let b = b.bounds().centroid()[axis];
            a.total_cmp(&b)
        });

        let right_items = items.split_off(n / 2);
        let left = self.build(items);
        let right = self.build(right_items);

        self.scene.nodes.push(BvhNode::new(
            [left.bounds, right.bounds],
            [left.addr, right.addr],
            [left.visibility, right.visibility],
        ));
        Subtree {
            addr: (self.scene.nodes.len() - 1) as i32,
            bounds,
            visibility: left.visibility | right.visibility,
        }
    }

    fn make_leaf(&mut self, items: &[BuildItem], bounds: Aabb) -> Subtree {
        if let [BuildItem::Instance {
            object, visibility, ..
        }] = items
        {
            self.scene.leaves.push(LeafNode::instance(*object, *visibility));
            return Subtree {
                addr: leaf_address(self.scene.leaves.len() - 1),
                bounds,
                visibility: *visibility,
            };
        }

        let start = self.scene.prim_type.len() as u32;
        let mut visibility = Visibility::empty();
        let mut type_mask = 0;
        for item in items {
            let BuildItem::Prim { record, .. } = item else {
                continue;
            };
            let record = self.records[*record];
            self.scene.prim_type.push(record.ty);
            self.scene.prim_index.push(record.index);
            self.scene.prim_segment.push(record.segment);
            self.scene.prim_object.push(record.object);
            self.scene.prim_visibility.push(record.visibility.bits());

            visibility |= record.visibility;
            type_mask |= record.ty.bit();
            if record.ty.is_curve() {
                visibility |= Visibility::CURVE;
            }
        }
        let end = self.scene.prim_type.len() as u32;

        self.scene
            .leaves
            .push(LeafNode::primitives(start, end, visibility, type_mask));
        Subtree {
            addr: leaf_address(self.scene.leaves.len() - 1),
            bounds,
            visibility,
        }
    }
}

fn stage(records: &mut Vec<PrimRecord>, record: PrimRecord, bounds: Aabb) -> BuildItem {
    records.push(record);
    BuildItem::Prim {
        record: records.len() - 1,
        bounds,
    }
}
