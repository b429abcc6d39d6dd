//! Animation blend tree: node arena, per-frame ticking and pose evaluation

pub mod node;
pub mod context;
pub mod event;
pub mod sequence;
pub mod synch;
mod eval;
pub mod blend;
pub mod crossfade;
pub mod blend_list;
pub mod per_bone;
pub mod multi_bone;
pub mod directional;
pub mod aim_offset;
pub mod mirror;
pub mod anim_tree;
pub mod definition;

#[cfg(test)]
pub(crate) mod test_rig;

pub use node::{AnimNode, ChildLink, NodeId, NodeKind};
pub use context::TraversalContext;
pub use event::TreeEvent;
pub use sequence::{PhaseAdvance, SequencePlayer};
pub use synch::SynchGroup;
pub use blend::Blend;
pub use crossfade::{Crossfade, WeightFade};
pub use blend_list::{BlendBySpeed, BlendList};
pub use per_bone::BlendPerBone;
pub use multi_bone::{BlendMultiBone, BlendTarget};
pub use directional::BlendDirectional;
pub use aim_offset::{AimComponent, AimDir, AimOffset, AimOffsetProfile, AimTransform};
pub use mirror::MirrorNode;
pub use anim_tree::AnimTree;
pub use definition::{GroupDefinition, KindDefinition, LinkDefinition, NodeDefinition, RigDefinition, TreeDefinition};
