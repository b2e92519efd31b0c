//! Query flavours plugged into the shared walk.

mod closest;
mod shadow;
mod subsurface;
mod volume;

pub(crate) use closest::ClosestHit;
pub(crate) use shadow::ShadowHits;
pub(crate) use subsurface::SubsurfaceHits;
pub(crate) use volume::{VolumeAll, VolumeClosest};
