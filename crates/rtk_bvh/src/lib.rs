//! BVH ray traversal kernel.
//!
//! Answers ray queries against a prebuilt two-level bounding volume
//! hierarchy stored in flat, read-only buffers:
//!
//! - closest hit ([`Kernel::intersect`], with optional curve minimum width)
//!   and any hit ([`Kernel::intersect_any`]),
//! - shadow / any-hit with transparent hit collection ([`Kernel::intersect_shadow`]),
//! - subsurface hits within one object ([`Kernel::intersect_subsurface`]),
//! - volume boundaries ([`Kernel::intersect_volume`], [`Kernel::intersect_volume_all`]).
//!
//! Instances are handled by moving the ray into object space, and motion
//! blur by interpolating primitives and transforms at the ray's time. The
//! walk is specialised per feature combination ([`Variant`]) and picked at
//! runtime from the scene's capabilities.
//!
//! ```ignore
//! let scene = SceneBuilder::new().build()?;
//! let kernel = Kernel::new(&scene, TraversalConfig::default());
//! let hit = kernel.intersect(&Ray::infinite(origin, dir), Visibility::CAMERA);
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod kernel;
pub mod node;
pub mod primitive;
mod query;
pub mod scene;
pub mod stack;
pub mod stats;
mod traversal;
pub mod types;

pub use builder::{ObjectDesc, Placement, SceneBuilder};
pub use config::{CurveConfig, CurveShape, TraversalConfig};
pub use dispatch::Variant;
pub use error::{ConfigError, ConfigResult, SceneError, SceneResult, TraversalError};
pub use kernel::Kernel;
pub use scene::{
    BvhNode, CurveData, CurveKey, LeafNode, MotionTriangleData, ObjectData, ObjectTransform,
    SceneBuffers, SceneCapabilities, TriangleData,
};
pub use stats::{KernelStats, StatsSnapshot};
pub use types::{
    Intersection, ObjectFlags, PrimitiveType, ShaderFlags, ShadowResult, SubsurfaceResult,
    Visibility, BVH_STACK_SIZE, ENTRYPOINT_SENTINEL, MAX_INSTANCE_DEPTH, OBJECT_NONE, PRIM_NONE,
};

pub use rtk_math;
