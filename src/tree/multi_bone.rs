//! Multi-bone layered blend
//!
//! Child 0 is the base pose. Every other child has its own start bone and
//! per-bone mask, and takes its share of each bone from the top of the stack
//! down; the base receives whatever weight remains.

use crate::animation::bone_atom::{BoneAtom, RootMotion, ZERO_WEIGHT_THRESHOLD};
use crate::animation::skeleton::Skeleton;
use crate::core::{Error, Result};

use super::blend::blend_root_motion;
use super::crossfade::WeightFade;
use super::eval::Evaluator;
use super::node::{ChildLink, NodeId, NodeKind};

/// Mask and weight for one layered child
#[derive(Clone, Debug, Default)]
pub struct BlendTarget {
    pub start_bone: Option<String>,
    pub per_bone_increase: f32,
    pub fade: WeightFade,
    per_bone_weights: Vec<f32>,
}

impl BlendTarget {
    pub fn per_bone_weights(&self) -> &[f32] {
        &self.per_bone_weights
    }

    fn rebuild(&mut self, skeleton: &Skeleton) {
        self.per_bone_weights = vec![0.0; skeleton.bone_count()];
        let Some(name) = &self.start_bone else {
            return;
        };
        let Some(start) = skeleton.find_bone(name) else {
            log::warn!("Multi-bone start bone '{}' not found in skeleton", name);
            return;
        };

        let increase = self.per_bone_increase.clamp(0.0, 1.0);
        for bone in 0..skeleton.bone_count() {
            self.per_bone_weights[bone] = if bone == start {
                increase
            } else {
                match skeleton.parent_index(bone) {
                    Some(parent) if self.per_bone_weights[parent] > 0.0 => {
                        (self.per_bone_weights[parent] + increase).min(1.0)
                    }
                    _ => 0.0,
                }
            };
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlendMultiBone {
    pub children: Vec<ChildLink>,
    /// One per child; entry 0 belongs to the base and is unused
    pub targets: Vec<BlendTarget>,
}

impl BlendMultiBone {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_children_changed(&mut self) {
        self.targets.resize_with(self.children.len(), BlendTarget::default);
    }

    /// Set where a layered child starts and how fast its mask ramps up
    pub fn set_target_start_bone(
        &mut self,
        target: usize,
        start_bone: &str,
        per_bone_increase: f32,
        skeleton: Option<&Skeleton>,
    ) -> Result<()> {
        if target == 0 || target >= self.targets.len() {
            return Err(Error::Tree(format!(
                "Multi-bone target {} out of range (1..{})",
                target,
                self.targets.len()
            )));
        }
        let entry = &mut self.targets[target];
        entry.start_bone = Some(start_bone.to_string());
        entry.per_bone_increase = per_bone_increase;
        if let Some(skeleton) = skeleton {
            if skeleton.find_bone(start_bone).is_none() {
                return Err(Error::UnknownBone(start_bone.to_string()));
            }
            entry.rebuild(skeleton);
        }
        Ok(())
    }

    pub fn set_blend_target(&mut self, target: usize, weight: f32, blend_time: f32) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.fade.set_target(weight, blend_time);
        }
        self.apply_weights();
    }

    pub(crate) fn init(&mut self, skeleton: &Skeleton) {
        self.on_children_changed();
        for target in self.targets.iter_mut().skip(1) {
            target.rebuild(skeleton);
        }
        self.apply_weights();
    }

    pub(crate) fn tick(&mut self, delta_seconds: f32) {
        for target in self.targets.iter_mut().skip(1) {
            target.fade.advance(delta_seconds);
        }
        self.apply_weights();
    }

    fn apply_weights(&mut self) {
        for (i, link) in self.children.iter_mut().enumerate() {
            link.weight = if i == 0 {
                1.0
            } else {
                self.targets.get(i).map(|t| t.fade.weight).unwrap_or(0.0)
            };
        }
    }
}

impl Evaluator<'_> {
    pub(crate) fn multi_bone_atoms(
        &mut self,
        id: NodeId,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let links = self.links(id);
        let Some(last) = links.iter().rposition(|l| l.weight > ZERO_WEIGHT_THRESHOLD) else {
            return self.ref_pose(desired_bones, out);
        };
        if last == 0 {
            return self.link_atoms(links[0], desired_bones, out);
        }

        // Evaluate each contributing child once
        let mut poses: Vec<Option<(Vec<BoneAtom>, RootMotion)>> = vec![None; last + 1];
        for (i, link) in links.iter().enumerate().take(last + 1) {
            if i == 0 || link.weight > ZERO_WEIGHT_THRESHOLD {
                let mut atoms = self.new_buffer();
                let root_motion = self.link_atoms(*link, desired_bones, &mut atoms);
                poses[i] = Some((atoms, root_motion));
            }
        }

        let NodeKind::MultiBone(node) = &self.nodes[id.0].kind else {
            return self.ref_pose(desired_bones, out);
        };
        let mask = |child: usize, bone: usize| {
            node.targets
                .get(child)
                .and_then(|t| t.per_bone_weights.get(bone))
                .copied()
                .unwrap_or(0.0)
        };

        let mut root_weights = vec![0.0f32; last + 1];
        for &bone in desired_bones {
            let mut accumulated = 0.0f32;
            let mut first = true;
            for i in (0..=last).rev() {
                let Some((atoms, _)) = &poses[i] else {
                    continue;
                };
                let weight = if i == 0 {
                    (1.0 - accumulated).max(0.0)
                } else {
                    (links[i].weight * mask(i, bone)).min(1.0 - accumulated)
                };
                if bone == 0 {
                    root_weights[i] = weight;
                }
                if i > 0 && weight <= ZERO_WEIGHT_THRESHOLD {
                    continue;
                }
                if first {
                    out[bone] = atoms[bone] * weight;
                    first = false;
                } else {
                    out[bone].accumulate(&atoms[bone], weight);
                }
                accumulated += weight;
            }
            out[bone].normalize_rotation();
        }

        let contributions: Vec<(f32, BoneAtom)> = poses
            .iter()
            .enumerate()
            .filter_map(|(i, pose)| {
                let (_, root_motion) = pose.as_ref()?;
                (root_motion.has_root_motion && root_weights[i] > ZERO_WEIGHT_THRESHOLD)
                    .then_some((root_weights[i], root_motion.delta))
            })
            .collect();
        blend_root_motion(&contributions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::skeleton::SkeletonBuilder;
    use crate::tree::test_rig::{TestRig, assert_pose_eq};
    use crate::tree::AnimNode;

    fn chain_skeleton() -> Skeleton {
        SkeletonBuilder::new()
            .add_root("b0", BoneAtom::IDENTITY)
            .add_bone("b1", "b0", BoneAtom::IDENTITY)
            .add_bone("b2", "b1", BoneAtom::IDENTITY)
            .add_bone("b3", "b2", BoneAtom::IDENTITY)
            .build()
            .unwrap()
    }

    fn create_node(children: usize) -> BlendMultiBone {
        let mut node = BlendMultiBone::new();
        for i in 0..children {
            node.children.push(ChildLink::new(format!("Child{}", i), None));
        }
        node.on_children_changed();
        node
    }

    #[test]
    fn test_start_bone_mask() {
        let skeleton = chain_skeleton();
        let mut node = create_node(2);
        node.set_target_start_bone(1, "b1", 0.5, Some(&skeleton)).unwrap();
        assert_eq!(node.targets[1].per_bone_weights(), &[0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let skeleton = chain_skeleton();
        let mut node = create_node(2);
        assert!(node.set_target_start_bone(0, "b1", 1.0, Some(&skeleton)).is_err());
        assert!(node.set_target_start_bone(2, "b1", 1.0, Some(&skeleton)).is_err());
        assert!(matches!(
            node.set_target_start_bone(1, "tail", 1.0, Some(&skeleton)),
            Err(Error::UnknownBone(_))
        ));
    }

    #[test]
    fn test_fade_drives_layer_weight() {
        let mut node = create_node(3);
        node.set_blend_target(2, 1.0, 1.0);
        node.tick(0.5);
        assert_eq!(node.children[0].weight, 1.0);
        assert_eq!(node.children[1].weight, 0.0);
        assert!((node.children[2].weight - 0.5).abs() < 1e-6);
    }

    fn create_layered(rig: &mut TestRig, weight: f32) -> NodeId {
        let base = rig.add_sequence("still");
        let layer = rig.add_sequence("lift");
        let node = rig.tree.add_node(AnimNode::new(BlendMultiBone::new()));
        rig.tree.add_child(node, Some(base)).unwrap();
        rig.tree.add_child(node, Some(layer)).unwrap();
        rig.tree.set_root(Some(node));
        rig.init();
        rig.tree.set_target_start_bone(node, 1, "b1", 1.0).unwrap();
        rig.tree.set_multi_bone_target(node, 1, weight, 0.0).unwrap();
        node
    }

    #[test]
    fn test_layer_masks_bones_above_start() {
        let mut rig = TestRig::new();
        let node = create_layered(&mut rig, 0.5);

        let pose = rig.evaluate_node(node);
        let still = rig.evaluate_clip("still", 0.0);
        assert_pose_eq(&pose[..1], &still[..1]);
        // lift raises b1 from z=1 to z=3; half weighted lands on z=2
        assert!((pose[1].translation.z - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_layer_weight_is_base() {
        let mut rig = TestRig::new();
        let node = create_layered(&mut rig, 0.0);
        assert_eq!(rig.evaluate_node(node), rig.evaluate_clip("still", 0.0));
    }

    #[test]
    fn test_full_layer_replaces_masked_bones() {
        let mut rig = TestRig::new();
        let node = create_layered(&mut rig, 1.0);
        let pose = rig.evaluate_node(node);
        let lift = rig.evaluate_clip("lift", 0.0);
        assert_pose_eq(&pose[1..], &lift[1..]);
    }
}
