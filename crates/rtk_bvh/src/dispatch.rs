//! Traversal specialisation.
//!
//! Each variant is a marker type implementing [`FeatureSet`]; the walk is
//! monomorphised per marker so feature checks fold away. [`Variant`] picks
//! the narrowest variant covering a scene's capabilities.

use crate::error::TraversalError;
use crate::scene::SceneCapabilities;
use crate::traversal::{walk, Query, WalkStart, Walker};

/// Compile-time feature switches of a traversal variant.
pub trait FeatureSet {
    const INSTANCING: bool;
    const MOTION: bool;
    const HAIR: bool;
    const HAIR_MINIMUM_WIDTH: bool;
}

macro_rules! feature_set {
    ($name:ident, $instancing:expr, $motion:expr, $hair:expr, $min_width:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl FeatureSet for $name {
            const INSTANCING: bool = $instancing;
            const MOTION: bool = $motion;
            const HAIR: bool = $hair;
            const HAIR_MINIMUM_WIDTH: bool = $min_width;
        }
    };
}

feature_set!(Base, false, false, false, false);
feature_set!(Instancing, true, false, false, false);
feature_set!(Motion, true, true, false, false);
feature_set!(Hair, true, false, true, false);
feature_set!(HairMinimumWidth, true, false, true, true);
feature_set!(HairMotion, true, true, true, false);
feature_set!(HairMotionMinimumWidth, true, true, true, true);

/// Runtime name of a traversal specialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Base,
    Instancing,
    Motion,
    Hair,
    HairMinimumWidth,
    HairMotion,
    HairMotionMinimumWidth,
}

impl Variant {
    pub const ALL: [Variant; 7] = [
        Variant::Base,
        Variant::Instancing,
        Variant::Motion,
        Variant::Hair,
        Variant::HairMinimumWidth,
        Variant::HairMotion,
        Variant::HairMotionMinimumWidth,
    ];

    /// `(instancing, motion, hair, hair_minimum_width)`
    pub fn features(self) -> (bool, bool, bool, bool) {
        match self {
            Variant::Base => (false, false, false, false),
            Variant::Instancing => (true, false, false, false),
            Variant::Motion => (true, true, false, false),
            Variant::Hair => (true, false, true, false),
            Variant::HairMinimumWidth => (true, false, true, true),
            Variant::HairMotion => (true, true, true, false),
            Variant::HairMotionMinimumWidth => (true, true, true, true),
        }
    }

    /// Variant for closest-hit queries.
    pub fn closest(caps: &SceneCapabilities, min_width: bool) -> Variant {
        let min_width = min_width && caps.has_curve_minimum_width;
        match (caps.has_motion, caps.has_curves, min_width) {
            (true, true, true) => Variant::HairMotionMinimumWidth,
            (true, true, false) => Variant::HairMotion,
            (true, false, _) => Variant::Motion,
            (false, true, true) => Variant::HairMinimumWidth,
            (false, true, false) => Variant::Hair,
            (false, false, _) if caps.has_instancing => Variant::Instancing,
            _ => Variant::Base,
        }
    }

    /// Variant for shadow queries, which never widen curves.
    pub fn shadow(caps: &SceneCapabilities) -> Variant {
        Self::closest(caps, false)
    }

    pub fn subsurface(caps: &SceneCapabilities) -> Variant {
        if caps.has_motion {
            Variant::Motion
        } else {
            Variant::Base
        }
    }

    pub fn volume(caps: &SceneCapabilities) -> Variant {
        if caps.has_motion {
            Variant::Motion
        } else if caps.has_instancing {
            Variant::Instancing
        } else {
            Variant::Base
        }
    }

    /// True when this variant handles every feature the scene uses.
    pub fn covers(self, caps: &SceneCapabilities) -> bool {
        let (instancing, motion, hair, _) = self.features();
        (instancing || !caps.has_instancing)
            && (motion || !caps.has_motion)
            && (hair || !caps.has_curves)
    }
}

/// Run the walk specialised for `variant`.
pub(crate) fn walk_variant<Q: Query>(
    variant: Variant,
    walker: &mut Walker<'_, '_>,
    start: WalkStart,
    query: &mut Q,
) -> Result<f32, TraversalError> {
    match variant {
        Variant::Base => walk::<Base, Q>(walker, start, query),
        Variant::Instancing => walk::<Instancing, Q>(walker, start, query),
        Variant::Motion => walk::<Motion, Q>(walker, start, query),
        Variant::Hair => walk::<Hair, Q>(walker, start, query),
        Variant::HairMinimumWidth => walk::<HairMinimumWidth, Q>(walker, start, query),
        Variant::HairMotion => walk::<HairMotion, Q>(walker, start, query),
        Variant::HairMotionMinimumWidth => walk::<HairMotionMinimumWidth, Q>(walker, start, query),
    }
}
