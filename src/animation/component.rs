//! Skeletal mesh component: the skeleton, clips and actor state a tree is bound to

use crate::animation::bone_atom::{BoneAtom, RootMotion};
use crate::animation::clip::AnimationClip;
use crate::animation::mirror::MirrorTable;
use crate::animation::skeleton::Skeleton;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Movement state of the owning actor, read by direction and speed driven blends
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActorState {
    pub velocity: Vec3,
    pub acceleration: Vec3,
    /// Facing; the actor looks down its local +X with +Z up
    pub rotation: Quat,
}

impl Default for ActorState {
    fn default() -> Self {
        Self {
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl ActorState {
    pub fn look_dir(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

/// Per-component evaluation settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Level of detail the mesh is expected to render at; 0 is the most detailed
    pub predicted_lod: u32,
    /// Multiplier applied to every sequence advance
    pub global_rate_scale: f32,
    /// Make every per-bone blend use plain local-space blending
    pub force_local_space_blend: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            predicted_lod: 0,
            global_rate_scale: 1.0,
            force_local_space_blend: false,
        }
    }
}

/// Everything a blend tree needs from its mesh: skeleton, clip set, mirror
/// table, actor movement and the buffers the final pose is written to.
#[derive(Clone, Debug)]
pub struct MeshComponent {
    pub skeleton: Arc<Skeleton>,
    clips: HashMap<String, Arc<AnimationClip>>,
    pub mirror_table: Option<MirrorTable>,
    pub actor: ActorState,
    pub settings: EvaluationSettings,
    required_bones: Vec<usize>,
    local_atoms: Vec<BoneAtom>,
    root_motion: RootMotion,
}

impl MeshComponent {
    pub fn new(skeleton: Arc<Skeleton>) -> Self {
        let required_bones = skeleton.all_bones();
        let local_atoms = skeleton.bones().iter().map(|b| b.ref_pose).collect();
        Self {
            skeleton,
            clips: HashMap::new(),
            mirror_table: None,
            actor: ActorState::default(),
            settings: EvaluationSettings::default(),
            required_bones,
            local_atoms,
            root_motion: RootMotion::NONE,
        }
    }

    pub fn add_clip(&mut self, clip: AnimationClip) -> Arc<AnimationClip> {
        let clip = Arc::new(clip);
        self.clips.insert(clip.name.clone(), Arc::clone(&clip));
        clip
    }

    pub fn find_clip(&self, name: &str) -> Option<Arc<AnimationClip>> {
        self.clips.get(name).cloned()
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn bone_count(&self) -> usize {
        self.skeleton.bone_count()
    }

    /// Mirror table if it matches this skeleton
    pub fn valid_mirror_table(&self) -> Option<&MirrorTable> {
        self.mirror_table
            .as_ref()
            .filter(|t| t.is_valid_for(self.skeleton.bone_count()))
    }

    /// Restrict evaluation to a bone subset; ancestors are added automatically
    pub fn set_required_bones(&mut self, bones: &[usize]) {
        let mut bones: Vec<usize> = bones
            .iter()
            .copied()
            .filter(|&b| b < self.skeleton.bone_count())
            .collect();
        self.skeleton.ensure_parents_present(&mut bones);
        self.required_bones = bones;
    }

    pub fn required_bones(&self) -> &[usize] {
        &self.required_bones
    }

    /// Final local-space pose written by the last evaluation
    pub fn local_atoms(&self) -> &[BoneAtom] {
        &self.local_atoms
    }

    pub fn root_motion(&self) -> RootMotion {
        self.root_motion
    }

    /// Component-space transforms of the last evaluated pose
    pub fn component_space_atoms(&self) -> Vec<BoneAtom> {
        let mut component = vec![BoneAtom::IDENTITY; self.skeleton.bone_count()];
        self.skeleton
            .calculate_component_space(&self.local_atoms, &self.required_bones, &mut component);
        component
    }

    pub(crate) fn take_output(&mut self) -> Vec<BoneAtom> {
        let mut atoms = std::mem::take(&mut self.local_atoms);
        atoms.resize(self.skeleton.bone_count(), BoneAtom::IDENTITY);
        atoms
    }

    pub(crate) fn store_output(&mut self, atoms: Vec<BoneAtom>, root_motion: RootMotion) {
        self.local_atoms = atoms;
        self.root_motion = root_motion;
    }
}
