//! Skeletal animation data: bones, clips, mirror tables and the mesh they bind to

pub mod bone_atom;
pub mod skeleton;
pub mod clip;
pub mod mirror;
pub mod component;
pub mod definition;

pub use bone_atom::{BoneAtom, RootMotion, KINDA_SMALL_NUMBER, ZERO_WEIGHT_THRESHOLD};
pub use skeleton::{Bone, Skeleton, SkeletonBuilder, MAX_BONES};
pub use clip::{AnimNotify, AnimationClip, BoneTrack, TransformKeyframe};
pub use mirror::{Axis, MirrorEntry, MirrorTable};
pub use component::{ActorState, EvaluationSettings, MeshComponent};
pub use definition::{BoneDefinition, ClipDefinition, MirrorDefinition, SkeletonDefinition};
