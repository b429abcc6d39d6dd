//! Serializable tree and rig descriptions
//!
//! A [`RigDefinition`] bundles everything needed to drive a tree from a single
//! JSON file: the skeleton, its clips, an optional mirror table, evaluation
//! settings and the node graph. Nodes reference each other by name.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::animation::component::{EvaluationSettings, MeshComponent};
use crate::animation::definition::{ClipDefinition, MirrorDefinition, SkeletonDefinition};
use crate::core::{Error, Result};

use super::aim_offset::{AimOffset, AimOffsetProfile};
use super::anim_tree::AnimTree;
use super::blend::Blend;
use super::blend_list::{BlendBySpeed, BlendList};
use super::crossfade::{Crossfade, WeightFade};
use super::directional::BlendDirectional;
use super::mirror::MirrorNode;
use super::multi_bone::BlendMultiBone;
use super::node::{AnimNode, NodeId, NodeKind};
use super::per_bone::BlendPerBone;
use super::sequence::SequencePlayer;

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_blend_time() -> f32 {
    0.1
}

fn default_dir_rate() -> f32 {
    360.0
}

fn default_single_anim_lod() -> u32 {
    10
}

fn default_aim_lod() -> u32 {
    3
}

/// One child slot. An absent `node` leaves the slot empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LinkDefinition {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Initial weight; most kinds overwrite it from their own state
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub mirror: bool,
}

/// Layer settings for multi-bone children after the base
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiBoneTargetDefinition {
    pub start_bone: String,
    #[serde(default = "default_one")]
    pub per_bone_increase: f32,
    #[serde(default)]
    pub weight: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindDefinition {
    Sequence {
        #[serde(default)]
        anim: Option<String>,
        #[serde(default = "default_one")]
        rate: f32,
        #[serde(default)]
        playing: bool,
        #[serde(default)]
        looping: bool,
        #[serde(default)]
        start_time: f32,
        #[serde(default)]
        no_notifies: bool,
        #[serde(default)]
        notify_weight_threshold: f32,
        #[serde(default)]
        synch_group: Option<String>,
        #[serde(default)]
        synch_pos_offset: f32,
        #[serde(default)]
        force_always_slave: bool,
        #[serde(default = "default_true")]
        synchronize: bool,
        #[serde(default)]
        extract_root_motion: bool,
        #[serde(default)]
        zero_root_rotation: bool,
        #[serde(default)]
        zero_root_translation: bool,
    },
    Blend,
    Crossfade {
        #[serde(default)]
        child2_weight: f32,
    },
    BlendList {
        #[serde(default)]
        active_child: usize,
        #[serde(default)]
        play_active_child: bool,
    },
    BlendBySpeed {
        constraints: Vec<f32>,
        #[serde(default = "default_blend_time")]
        blend_up_time: f32,
        #[serde(default = "default_blend_time")]
        blend_down_time: f32,
        #[serde(default)]
        blend_down_perc: f32,
        #[serde(default)]
        use_acceleration: bool,
        #[serde(default)]
        play_active_child: bool,
    },
    PerBone {
        #[serde(default)]
        branch_start_bones: Vec<String>,
        #[serde(default = "default_one")]
        per_bone_increase: f32,
        #[serde(default)]
        child2_weight: f32,
        #[serde(default)]
        force_local_space_blend: bool,
    },
    MultiBone {
        /// One entry per child after the first
        #[serde(default)]
        targets: Vec<MultiBoneTargetDefinition>,
    },
    Directional {
        #[serde(default = "default_dir_rate")]
        dir_degrees_per_second: f32,
        #[serde(default = "default_single_anim_lod")]
        single_anim_at_or_above_lod: u32,
    },
    AimOffset {
        #[serde(default)]
        profiles: Vec<AimOffsetProfile>,
        #[serde(default)]
        active_profile: Option<String>,
        #[serde(default)]
        angle_offset: Vec2,
        #[serde(default = "default_aim_lod")]
        pass_through_at_or_above_lod: u32,
    },
    Mirror {
        #[serde(default = "default_true")]
        enable_mirroring: bool,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    #[serde(default)]
    pub skip_tick_when_zero_weight: bool,
    #[serde(default)]
    pub children: Vec<LinkDefinition>,
    #[serde(flatten)]
    pub kind: KindDefinition,
}

impl NodeDefinition {
    fn build_kind(&self) -> Result<NodeKind> {
        let kind = match &self.kind {
            KindDefinition::Sequence {
                anim,
                rate,
                playing,
                looping,
                start_time,
                no_notifies,
                notify_weight_threshold,
                synch_group,
                synch_pos_offset,
                force_always_slave,
                synchronize,
                extract_root_motion,
                zero_root_rotation,
                zero_root_translation,
            } => {
                let mut seq = SequencePlayer::new(anim.as_deref());
                seq.rate = *rate;
                seq.playing = *playing;
                seq.looping = *looping;
                seq.current_time = *start_time;
                seq.previous_time = *start_time;
                seq.no_notifies = *no_notifies;
                seq.notify_weight_threshold = *notify_weight_threshold;
                seq.synch_group = synch_group.clone();
                seq.synch_pos_offset = *synch_pos_offset;
                seq.force_always_slave = *force_always_slave;
                seq.synchronize = *synchronize;
                seq.extract_root_motion = *extract_root_motion;
                seq.zero_root_rotation = *zero_root_rotation;
                seq.zero_root_translation = *zero_root_translation;
                NodeKind::from(seq)
            }
            KindDefinition::Blend => NodeKind::from(Blend::new()),
            KindDefinition::Crossfade { child2_weight } => {
                NodeKind::from(Crossfade::new(child2_weight.clamp(0.0, 1.0)))
            }
            KindDefinition::BlendList {
                play_active_child, ..
            } => {
                let mut list = BlendList::new();
                list.play_active_child = *play_active_child;
                NodeKind::from(list)
            }
            KindDefinition::BlendBySpeed {
                constraints,
                blend_up_time,
                blend_down_time,
                blend_down_perc,
                use_acceleration,
                play_active_child,
            } => {
                if constraints.windows(2).any(|w| w[1] < w[0]) {
                    return Err(Error::Definition(format!(
                        "node '{}': speed constraints must be ascending",
                        self.name
                    )));
                }
                let mut by_speed = BlendBySpeed::new(constraints.clone());
                by_speed.blend_up_time = *blend_up_time;
                by_speed.blend_down_time = *blend_down_time;
                by_speed.blend_down_perc = *blend_down_perc;
                by_speed.use_acceleration = *use_acceleration;
                by_speed.list.play_active_child = *play_active_child;
                NodeKind::from(by_speed)
            }
            KindDefinition::PerBone {
                branch_start_bones,
                per_bone_increase,
                child2_weight,
                force_local_space_blend,
            } => {
                let mut per_bone = BlendPerBone::new(branch_start_bones.clone());
                per_bone.per_bone_increase = *per_bone_increase;
                per_bone.fade = WeightFade::new(child2_weight.clamp(0.0, 1.0));
                per_bone.force_local_space_blend = *force_local_space_blend;
                NodeKind::from(per_bone)
            }
            KindDefinition::MultiBone { .. } => NodeKind::from(BlendMultiBone::new()),
            KindDefinition::Directional {
                dir_degrees_per_second,
                single_anim_at_or_above_lod,
            } => {
                let mut directional = BlendDirectional::new();
                directional.dir_degrees_per_second = *dir_degrees_per_second;
                directional.single_anim_at_or_above_lod = *single_anim_at_or_above_lod;
                NodeKind::from(directional)
            }
            KindDefinition::AimOffset {
                profiles,
                active_profile,
                angle_offset,
                pass_through_at_or_above_lod,
            } => {
                let mut aim = AimOffset::new(profiles.clone());
                aim.angle_offset = *angle_offset;
                aim.pass_through_at_or_above_lod = *pass_through_at_or_above_lod;
                if let Some(profile) = active_profile {
                    aim.set_active_profile_by_name(profile, None)
                        .map_err(|e| Error::Definition(format!("node '{}': {}", self.name, e)))?;
                }
                NodeKind::from(aim)
            }
            KindDefinition::Mirror { enable_mirroring } => {
                let mut mirror = MirrorNode::new();
                mirror.enable_mirroring = *enable_mirroring;
                NodeKind::from(mirror)
            }
        };
        Ok(kind)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    #[serde(default = "default_one")]
    pub rate_scale: f32,
}

/// Node graph with names in place of arena indices
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TreeDefinition {
    pub nodes: Vec<NodeDefinition>,
    /// Defaults to the first node
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
}

impl TreeDefinition {
    /// Build an unbound tree; call [`AnimTree::init`] before ticking it
    pub fn build(&self) -> Result<AnimTree> {
        let mut tree = AnimTree::new();
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for def in &self.nodes {
            if ids.contains_key(def.name.as_str()) {
                return Err(Error::Definition(format!("duplicate node name '{}'", def.name)));
            }
            let node = AnimNode::new(def.build_kind()?)
                .with_name(def.name.clone())
                .with_skip_tick_when_zero_weight(def.skip_tick_when_zero_weight);
            ids.insert(def.name.as_str(), tree.add_node(node));
        }

        let lookup = |name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| Error::UnknownNode(name.to_string()))
        };

        for def in &self.nodes {
            let parent = lookup(&def.name)?;
            for link in &def.children {
                let child = link.node.as_deref().map(lookup).transpose()?;
                let index = tree
                    .add_child(parent, child)
                    .map_err(|e| Error::Definition(format!("node '{}': {}", def.name, e)))?;
                if let Some(weight) = link.weight {
                    tree.set_child_weight(parent, index, weight)?;
                }
                if link.mirror {
                    tree.set_child_mirror(parent, index, true)?;
                }
                if let Some(name) = &link.name {
                    if let Some(slot) = tree
                        .node_mut(parent)
                        .and_then(|n| n.kind.children_mut())
                        .and_then(|c| c.get_mut(index))
                    {
                        slot.name = name.clone();
                    }
                }
            }

            if let KindDefinition::BlendList { active_child, .. } = &def.kind {
                if *active_child >= def.children.len().max(1) {
                    return Err(Error::Definition(format!(
                        "node '{}': active child {} out of range",
                        def.name, active_child
                    )));
                }
                if let Some(NodeKind::BlendList(list)) = tree.node_mut(parent).map(|n| &mut n.kind) {
                    list.active_child = *active_child;
                }
            }

            if let KindDefinition::MultiBone { targets } = &def.kind {
                if targets.len() + 1 > def.children.len().max(1) {
                    return Err(Error::Definition(format!(
                        "node '{}': {} targets for {} layered children",
                        def.name,
                        targets.len(),
                        def.children.len().saturating_sub(1)
                    )));
                }
                if let Some(NodeKind::MultiBone(multi)) = tree.node_mut(parent).map(|n| &mut n.kind) {
                    multi.on_children_changed();
                    for (i, target) in targets.iter().enumerate() {
                        multi.set_target_start_bone(i + 1, &target.start_bone, target.per_bone_increase, None)?;
                        multi.targets[i + 1].fade = WeightFade::new(target.weight.clamp(0.0, 1.0));
                    }
                }
            }
        }

        let root = match &self.root {
            Some(name) => Some(lookup(name)?),
            None => (!self.nodes.is_empty()).then_some(NodeId(0)),
        };
        tree.set_root(root);

        for group in &self.groups {
            tree.add_group(&group.name, group.rate_scale);
        }
        Ok(tree)
    }
}

/// Skeleton, clips and tree in one document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RigDefinition {
    pub skeleton: SkeletonDefinition,
    #[serde(default)]
    pub clips: Vec<ClipDefinition>,
    #[serde(default)]
    pub mirror: Option<MirrorDefinition>,
    #[serde(default)]
    pub settings: EvaluationSettings,
    pub tree: TreeDefinition,
}

impl RigDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let rig: Self = serde_json::from_str(&text)?;
        log::info!(
            "Loaded rig {}: {} bones, {} clips, {} nodes",
            path.display(),
            rig.skeleton.bones.len(),
            rig.clips.len(),
            rig.tree.nodes.len()
        );
        Ok(rig)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn build_component(&self) -> Result<MeshComponent> {
        let skeleton = self.skeleton.build()?;
        let mut mesh = MeshComponent::new(Arc::new(skeleton));
        for clip in &self.clips {
            let clip = clip.build(&mesh.skeleton)?;
            if mesh.find_clip(&clip.name).is_some() {
                log::warn!("Clip '{}' defined twice, keeping the last", clip.name);
            }
            mesh.add_clip(clip);
        }
        if let Some(mirror) = &self.mirror {
            mesh.mirror_table = Some(mirror.build(&mesh.skeleton)?);
        }
        mesh.settings = self.settings;
        Ok(mesh)
    }

    /// Build the tree and bind it to a fresh component
    pub fn build(&self) -> Result<AnimTree> {
        let mesh = self.build_component()?;
        let mut tree = self.tree.build()?;
        tree.init(mesh);
        Ok(tree)
    }
}
