//! Read-only scene buffers consumed by the traversal.
//!
//! The layout is flat and index based so it can be filled by an external
//! builder (or uploaded from raw bytes) and shared by any number of
//! concurrent traversals without locking.
//!
//! Node references are `i32`: a non-negative value indexes [`SceneBuffers::nodes`],
//! a negative value `addr` refers to leaf `-addr - 1` in
//! [`SceneBuffers::leaves`]. A leaf whose `prim_addr` is negative is an
//! instance of object `-prim_addr - 1`.

use bytemuck::{Pod, Zeroable};
use rtk_math::{Aabb, DecomposedTransform, Mat4, Mat4Ext, Vec3};

use crate::error::{SceneError, SceneResult};
use crate::types::{
    ObjectFlags, PrimitiveType, ShaderFlags, Visibility, BVH_STACK_SIZE, ENTRYPOINT_SENTINEL,
    MAX_INSTANCE_DEPTH, OBJECT_NONE,
};

/// Internal node: bounds, references and visibility of both children.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub bounds_min: [[f32; 3]; 2],
    pub bounds_max: [[f32; 3]; 2],
    pub children: [i32; 2],
    pub visibility: [u32; 2],
}

impl BvhNode {
    pub fn new(bounds: [Aabb; 2], children: [i32; 2], visibility: [Visibility; 2]) -> Self {
        Self {
            bounds_min: [bounds[0].min.to_array(), bounds[1].min.to_array()],
            bounds_max: [bounds[0].max.to_array(), bounds[1].max.to_array()],
            children,
            visibility: [visibility[0].bits(), visibility[1].bits()],
        }
    }

    #[inline]
    pub fn child_bounds(&self, child: usize) -> Aabb {
        Aabb::new(
            Vec3::from_array(self.bounds_min[child]),
            Vec3::from_array(self.bounds_max[child]),
        )
    }

    #[inline]
    pub fn child_visibility(&self, child: usize) -> Visibility {
        Visibility::from_bits_retain(self.visibility[child])
    }
}

/// Leaf node: a primitive range, or an instance indirection.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct LeafNode {
    pub prim_addr: i32,
    pub prim_addr2: i32,
    pub visibility: u32,
    /// OR of the [`PrimitiveType::bit`] of every primitive in the range.
    pub type_mask: u32,
}

impl LeafNode {
    pub fn primitives(start: u32, end: u32, visibility: Visibility, type_mask: u32) -> Self {
        Self {
            prim_addr: start as i32,
            prim_addr2: end as i32,
            visibility: visibility.bits(),
            type_mask,
        }
    }

    pub fn instance(object: u32, visibility: Visibility) -> Self {
        Self {
            prim_addr: -(object as i32) - 1,
            prim_addr2: 0,
            visibility: visibility.bits(),
            type_mask: 0,
        }
    }

    /// Object id when this leaf is an instance indirection.
    #[inline]
    pub fn instance_object(&self) -> Option<u32> {
        (self.prim_addr < 0).then(|| (-self.prim_addr - 1) as u32)
    }
}

/// Encode a leaf index as a node reference.
#[inline]
pub fn leaf_address(leaf: usize) -> i32 {
    -(leaf as i32) - 1
}

/// Decode a negative node reference into a leaf index.
#[inline]
pub fn leaf_index(addr: i32) -> usize {
    debug_assert!(addr < 0);
    (-addr - 1) as usize
}

/// Static triangle in the space of its hierarchy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleData {
    pub verts: [Vec3; 3],
    pub shader: u32,
}

/// Triangle whose vertices are sampled at `num_steps` uniform times.
///
/// Step `s` lives at `motion_verts[first_step + s]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTriangleData {
    pub first_step: u32,
    pub num_steps: u32,
    pub shader: u32,
}

/// Curve control point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CurveKey {
    pub co: [f32; 3],
    pub radius: f32,
}

impl CurveKey {
    pub fn new(co: Vec3, radius: f32) -> Self {
        Self {
            co: co.to_array(),
            radius,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.co)
    }
}

/// A curve made of `num_keys` keys; each primitive is one segment of it.
///
/// Motion curves store `motion_steps` full copies of their keys starting at
/// `motion_first_key` in [`SceneBuffers::curve_motion_keys`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveData {
    pub first_key: u32,
    pub num_keys: u32,
    pub shader: u32,
    pub motion_first_key: u32,
    pub motion_steps: u32,
}

/// Object-to-parent transform of an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectTransform {
    /// Fixed transform with its precomputed inverse (`None` if singular).
    Static { tfm: Mat4, itfm: Option<Mat4> },
    /// Time-keyed transforms, uniformly spaced over the shutter.
    Motion { keys: Vec<DecomposedTransform> },
}

impl ObjectTransform {
    pub fn from_matrix(tfm: Mat4) -> Self {
        ObjectTransform::Static {
            tfm,
            itfm: tfm.try_inverse(),
        }
    }

    pub fn identity() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }

    /// Transform at the start of the shutter.
    pub fn static_matrix(&self) -> Mat4 {
        match self {
            ObjectTransform::Static { tfm, .. } => *tfm,
            ObjectTransform::Motion { keys } => rtk_math::interpolate_transform(keys, 0.0),
        }
    }
}

/// Per-object data.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub transform: ObjectTransform,
    pub flags: ObjectFlags,
    /// Root of the object's own hierarchy. For objects with
    /// `TRANSFORM_APPLIED` this is the hierarchy that holds its world-space
    /// primitives.
    pub root: i32,
    /// Instance whose hierarchy holds this one, `OBJECT_NONE` at the top
    /// level.
    pub parent: u32,
}

/// Scene-wide facts fixed at build time, used to pick a traversal variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneCapabilities {
    pub has_instancing: bool,
    pub has_motion: bool,
    pub has_curves: bool,
    pub has_curve_minimum_width: bool,
    pub has_volume: bool,
}

/// Immutable buffers describing a scene's hierarchies and primitives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneBuffers {
    pub nodes: Vec<BvhNode>,
    pub leaves: Vec<LeafNode>,
    /// Top-level root.
    pub root: i32,

    pub prim_type: Vec<PrimitiveType>,
    /// Index into the geometry buffer for the primitive's type.
    pub prim_index: Vec<u32>,
    /// Curve segment, zero for triangles.
    pub prim_segment: Vec<u32>,
    pub prim_object: Vec<u32>,
    pub prim_visibility: Vec<u32>,

    pub triangles: Vec<TriangleData>,
    pub motion_triangles: Vec<MotionTriangleData>,
    pub motion_verts: Vec<[Vec3; 3]>,
    pub curves: Vec<CurveData>,
    pub curve_keys: Vec<CurveKey>,
    pub curve_motion_keys: Vec<CurveKey>,

    pub objects: Vec<ObjectData>,
    pub shaders: Vec<ShaderFlags>,
    pub capabilities: SceneCapabilities,
}

impl SceneBuffers {
    #[inline]
    pub fn node(&self, addr: i32) -> &BvhNode {
        &self.nodes[addr as usize]
    }

    #[inline]
    pub fn leaf(&self, addr: i32) -> &LeafNode {
        &self.leaves[leaf_index(addr)]
    }

    #[inline]
    pub fn object_flags(&self, object: u32) -> ObjectFlags {
        self.objects[object as usize].flags
    }

    #[inline]
    pub fn prim_visibility(&self, prim: usize) -> Visibility {
        Visibility::from_bits_retain(self.prim_visibility[prim])
    }

    /// Shader index of a primitive, looked up through its geometry record.
    pub fn prim_shader(&self, prim: usize) -> u32 {
        let index = self.prim_index[prim] as usize;
        match self.prim_type[prim] {
            PrimitiveType::Triangle => self.triangles[index].shader,
            PrimitiveType::MotionTriangle => self.motion_triangles[index].shader,
            PrimitiveType::Curve | PrimitiveType::MotionCurve => self.curves[index].shader,
            PrimitiveType::None => 0,
        }
    }

    #[inline]
    pub fn shader_flags(&self, shader: u32) -> ShaderFlags {
        self.shaders
            .get(shader as usize)
            .copied()
            .unwrap_or(ShaderFlags::empty())
    }

    pub fn num_prims(&self) -> usize {
        self.prim_type.len()
    }

    fn valid_ref(&self, addr: i32) -> bool {
        if addr >= 0 {
            (addr as usize) < self.nodes.len()
        } else {
            leaf_index(addr) < self.leaves.len()
        }
    }

    /// Check every reference in the buffers.
    ///
    /// Traversal assumes valid buffers and does not re-check them; run this
    /// once after loading data from an untrusted builder.
    pub fn validate(&self) -> SceneResult<()> {
        if self.nodes.len() >= ENTRYPOINT_SENTINEL as usize {
            return Err(SceneError::TooManyNodes(self.nodes.len()));
        }
        if !self.valid_ref(self.root) {
            return Err(SceneError::InvalidRoot(self.root));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                if !self.valid_ref(child) {
                    return Err(SceneError::InvalidChild { node: i, child });
                }
            }
        }

        let n = self.num_prims();
        if self.prim_index.len() != n
            || self.prim_segment.len() != n
            || self.prim_object.len() != n
            || self.prim_visibility.len() != n
        {
            return Err(SceneError::MismatchedPrimitiveArrays);
        }

        for (i, leaf) in self.leaves.iter().enumerate() {
            if let Some(object) = leaf.instance_object() {
                if object as usize >= self.objects.len() {
                    return Err(SceneError::InvalidInstance { leaf: i, object });
                }
            } else if leaf.prim_addr > leaf.prim_addr2 || leaf.prim_addr2 as usize > n {
                return Err(SceneError::InvalidLeafRange {
                    leaf: i,
                    start: leaf.prim_addr,
                    end: leaf.prim_addr2,
                    len: n,
                });
            }
        }

        for prim in 0..n {
            self.validate_primitive(prim)?;
        }

        for (i, object) in self.objects.iter().enumerate() {
            if !self.valid_ref(object.root) {
                return Err(SceneError::InvalidObject {
                    object: i,
                    reason: "root node out of range",
                });
            }
            if let ObjectTransform::Motion { keys } = &object.transform {
                if keys.is_empty() {
                    return Err(SceneError::InvalidObject {
                        object: i,
                        reason: "motion transform without keys",
                    });
                }
            }
            if object.parent != OBJECT_NONE && object.parent as usize >= self.objects.len() {
                return Err(SceneError::InvalidObject {
                    object: i,
                    reason: "parent out of range",
                });
            }
        }

        for i in 0..self.objects.len() {
            let mut parent = self.objects[i].parent;
            let mut steps = 0;
            while parent != OBJECT_NONE {
                steps += 1;
                if steps > self.objects.len() {
                    return Err(SceneError::InvalidObject {
                        object: i,
                        reason: "parent chain loops",
                    });
                }
                parent = self.objects[parent as usize].parent;
            }
        }

        let depth = self.max_depth();
        if 2 * depth + 1 > BVH_STACK_SIZE {
            log::warn!(
                "Scene hierarchy is {} levels deep, traversal stack holds {} entries; \
                 rays through the deepest paths may report no hit",
                depth,
                BVH_STACK_SIZE
            );
        }

        Ok(())
    }

    fn validate_primitive(&self, prim: usize) -> SceneResult<()> {
        let index = self.prim_index[prim];
        let object = self.prim_object[prim];
        let bad = |what: &'static str, index: u32| SceneError::InvalidPrimitive { prim, what, index };

        if object as usize >= self.objects.len() {
            return Err(bad("object", object));
        }

        let shader = match self.prim_type[prim] {
            PrimitiveType::None => return Ok(()),
            PrimitiveType::Triangle => {
                let tri = self.triangles.get(index as usize).ok_or(bad("triangle", index))?;
                tri.shader
            }
            PrimitiveType::MotionTriangle => {
                let tri = self
                    .motion_triangles
                    .get(index as usize)
                    .ok_or(bad("motion triangle", index))?;
                if tri.num_steps < 2 {
                    return Err(SceneError::TooFewMotionSteps {
                        what: "motion triangle",
                        steps: tri.num_steps,
                    });
                }
                if (tri.first_step + tri.num_steps) as usize > self.motion_verts.len() {
                    return Err(bad("motion vertex step", tri.first_step + tri.num_steps));
                }
                tri.shader
            }
            ty @ (PrimitiveType::Curve | PrimitiveType::MotionCurve) => {
                let curve = self.curves.get(index as usize).ok_or(bad("curve", index))?;
                let segment = self.prim_segment[prim];
                if curve.num_keys < 2 || segment + 1 >= curve.num_keys {
                    return Err(bad("curve segment", segment));
                }
                if (curve.first_key + curve.num_keys) as usize > self.curve_keys.len() {
                    return Err(bad("curve key", curve.first_key + curve.num_keys));
                }
                if ty == PrimitiveType::MotionCurve {
                    if curve.motion_steps < 2 {
                        return Err(SceneError::TooFewMotionSteps {
                            what: "motion curve",
                            steps: curve.motion_steps,
                        });
                    }
                    let end = curve.motion_first_key + curve.motion_steps * curve.num_keys;
                    if end as usize > self.curve_motion_keys.len() {
                        return Err(bad("curve motion key", end));
                    }
                }
                curve.shader
            }
        };

        if shader as usize >= self.shaders.len() {
            return Err(bad("shader", shader));
        }
        Ok(())
    }

    /// Deepest path from the top-level root, counting internal nodes and
    /// instance levels. Instance nesting is followed up to
    /// [`MAX_INSTANCE_DEPTH`].
    pub fn max_depth(&self) -> usize {
        let mut depth = 0;
        let mut pending = vec![(self.root, 0usize, 0usize)];

        while let Some((addr, level, nesting)) = pending.pop() {
            depth = depth.max(level);
            if addr >= 0 {
                if let Some(node) = self.nodes.get(addr as usize) {
                    for &child in &node.children {
                        pending.push((child, level + 1, nesting));
                    }
                }
                continue;
            }
            let object = self
                .leaves
                .get(leaf_index(addr))
                .and_then(LeafNode::instance_object);
            if let Some(object) = object {
                if nesting < MAX_INSTANCE_DEPTH {
                    if let Some(data) = self.objects.get(object as usize) {
                        pending.push((data.root, level + 1, nesting + 1));
                    }
                }
            }
        }

        depth
    }

    /// Reinterpret a raw byte buffer as internal nodes.
    pub fn nodes_from_bytes(bytes: &[u8]) -> SceneResult<Vec<BvhNode>> {
        records_from_bytes(bytes, "BVH nodes")
    }

    /// Reinterpret a raw byte buffer as leaf nodes.
    pub fn leaves_from_bytes(bytes: &[u8]) -> SceneResult<Vec<LeafNode>> {
        records_from_bytes(bytes, "leaf nodes")
    }

    /// Raw bytes of the internal node buffer.
    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    /// Raw bytes of the leaf node buffer.
    pub fn leaf_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.leaves)
    }
}

fn records_from_bytes<T: Pod>(bytes: &[u8], what: &'static str) -> SceneResult<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(SceneError::InvalidBytes {
            what,
            len: bytes.len(),
            reason: format!("length is not a multiple of the {size}-byte record size"),
        });
    }
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::from_points(Vec3::ZERO, Vec3::ONE)
    }

    /// One internal node over two single-triangle leaves.
    fn two_leaf_scene() -> SceneBuffers {
        let tri = TriangleData {
            verts: [Vec3::ZERO, Vec3::X, Vec3::Y],
            shader: 0,
        };
        SceneBuffers {
            nodes: vec![BvhNode::new(
                [unit_box(), unit_box()],
                [leaf_address(0), leaf_address(1)],
                [Visibility::ALL, Visibility::ALL],
            )],
            leaves: vec![
                LeafNode::primitives(0, 1, Visibility::ALL, PrimitiveType::Triangle.bit()),
                LeafNode::primitives(1, 2, Visibility::ALL, PrimitiveType::Triangle.bit()),
            ],
            root: 0,
            prim_type: vec![PrimitiveType::Triangle; 2],
            prim_index: vec![0, 1],
            prim_segment: vec![0, 0],
            prim_object: vec![0, 0],
            prim_visibility: vec![Visibility::ALL.bits(); 2],
            triangles: vec![tri, tri],
            objects: vec![ObjectData {
                transform: ObjectTransform::identity(),
                flags: ObjectFlags::TRANSFORM_APPLIED,
                root: 0,
                parent: OBJECT_NONE,
            }],
            shaders: vec![ShaderFlags::empty()],
            ..Default::default()
        }
    }

    #[test]
    fn test_leaf_address_round_trip() {
        for i in [0usize, 1, 17, 4096] {
            let addr = leaf_address(i);
            assert!(addr < 0);
            assert_eq!(leaf_index(addr), i);
        }
    }

    #[test]
    fn test_instance_leaf_encoding() {
        let leaf = LeafNode::instance(5, Visibility::ALL);
        assert_eq!(leaf.instance_object(), Some(5));

        let leaf = LeafNode::primitives(3, 7, Visibility::ALL, 0);
        assert_eq!(leaf.instance_object(), None);
    }

    #[test]
    fn test_node_layout_has_no_padding() {
        assert_eq!(std::mem::size_of::<BvhNode>(), 64);
        assert_eq!(std::mem::size_of::<LeafNode>(), 16);
    }

    #[test]
    fn test_validate_accepts_good_scene() {
        assert_eq!(two_leaf_scene().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_child() {
        let mut scene = two_leaf_scene();
        scene.nodes[0].children[1] = leaf_address(9);
        assert_eq!(
            scene.validate(),
            Err(SceneError::InvalidChild {
                node: 0,
                child: leaf_address(9)
            })
        );
    }

    #[test]
    fn test_validate_rejects_bad_leaf_range() {
        let mut scene = two_leaf_scene();
        scene.leaves[1].prim_addr2 = 5;
        assert!(matches!(
            scene.validate(),
            Err(SceneError::InvalidLeafRange { leaf: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_instance_object() {
        let mut scene = two_leaf_scene();
        scene.leaves[0] = LeafNode::instance(3, Visibility::ALL);
        assert!(matches!(
            scene.validate(),
            Err(SceneError::InvalidInstance { leaf: 0, object: 3 })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_shader() {
        let mut scene = two_leaf_scene();
        scene.triangles[1].shader = 4;
        assert!(matches!(
            scene.validate(),
            Err(SceneError::InvalidPrimitive { what: "shader", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_short_motion() {
        let mut scene = two_leaf_scene();
        scene.prim_type[0] = PrimitiveType::MotionTriangle;
        scene.motion_triangles.push(MotionTriangleData {
            first_step: 0,
            num_steps: 1,
            shader: 0,
        });
        scene.motion_verts.push([Vec3::ZERO, Vec3::X, Vec3::Y]);
        assert!(matches!(
            scene.validate(),
            Err(SceneError::TooFewMotionSteps { steps: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_parent_loop() {
        let mut scene = two_leaf_scene();
        scene.objects[0].parent = 7;
        assert!(matches!(
            scene.validate(),
            Err(SceneError::InvalidObject {
                reason: "parent out of range",
                ..
            })
        ));

        scene.objects[0].parent = 0;
        assert!(matches!(
            scene.validate(),
            Err(SceneError::InvalidObject {
                reason: "parent chain loops",
                ..
            })
        ));
    }

    #[test]
    fn test_max_depth() {
        let scene = two_leaf_scene();
        assert_eq!(scene.max_depth(), 1);

        let leaf_only = SceneBuffers {
            root: leaf_address(0),
            ..two_leaf_scene()
        };
        assert_eq!(leaf_only.max_depth(), 0);
    }

    #[test]
    fn test_node_bytes_round_trip() {
        let scene = two_leaf_scene();
        let nodes = SceneBuffers::nodes_from_bytes(scene.node_bytes()).unwrap();
        assert_eq!(nodes, scene.nodes);

        let leaves = SceneBuffers::leaves_from_bytes(scene.leaf_bytes()).unwrap();
        assert_eq!(leaves, scene.leaves);
    }

    #[test]
    fn test_node_bytes_bad_length() {
        let err = SceneBuffers::nodes_from_bytes(&[0u8; 65]).unwrap_err();
        assert!(matches!(err, SceneError::InvalidBytes { len: 65, .. }));
    }

    #[test]
    fn test_prim_shader_lookup() {
        let mut scene = two_leaf_scene();
        scene.shaders.push(ShaderFlags::HAS_TRANSPARENT_SHADOW);
        scene.triangles[1].shader = 1;
        assert_eq!(scene.prim_shader(1), 1);
        assert!(scene
            .shader_flags(scene.prim_shader(1))
            .contains(ShaderFlags::HAS_TRANSPARENT_SHADOW));
        assert_eq!(scene.shader_flags(99), ShaderFlags::empty());
    }
}
