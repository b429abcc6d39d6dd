//! Per-bone masked crossfade
//!
//! The second child overrides the first from one or more branch bones downward.
//! Bones where the mask weight changes from their parent's are blended in
//! component space so the overlay keeps its world orientation across the seam.

use crate::animation::bone_atom::{lerp_quat, BoneAtom, RootMotion, ZERO_WEIGHT_THRESHOLD};
use crate::animation::skeleton::Skeleton;
use glam::Quat;

use super::crossfade::WeightFade;
use super::eval::Evaluator;
use super::node::{ChildLink, NodeId, NodeKind};

#[derive(Clone, Debug)]
pub struct BlendPerBone {
    pub children: Vec<ChildLink>,
    pub fade: WeightFade,
    pub branch_start_bones: Vec<String>,
    /// Mask increase per bone below a branch start, clamped to [0, 1]
    pub per_bone_increase: f32,
    pub force_local_space_blend: bool,
    per_bone_weights: Vec<f32>,
    boundary_bones: Vec<usize>,
    component_space_bones: Vec<usize>,
}

impl BlendPerBone {
    pub fn new(branch_start_bones: Vec<String>) -> Self {
        Self {
            children: Vec::new(),
            fade: WeightFade::new(0.0),
            branch_start_bones,
            per_bone_increase: 1.0,
            force_local_space_blend: false,
            per_bone_weights: Vec::new(),
            boundary_bones: Vec::new(),
            component_space_bones: Vec::new(),
        }
    }

    pub fn per_bone_weights(&self) -> &[f32] {
        &self.per_bone_weights
    }

    /// Bones blended in component space, where the mask differs from the parent's
    pub fn boundary_bones(&self) -> &[usize] {
        &self.boundary_bones
    }

    pub fn set_blend_target(&mut self, target: f32, blend_time: f32) {
        self.fade.set_target(target, blend_time);
        self.apply_weights();
    }

    pub(crate) fn tick(&mut self, delta_seconds: f32) {
        self.fade.advance(delta_seconds);
        self.apply_weights();
    }

    pub(crate) fn apply_weights(&mut self) {
        if let [first, second] = self.children.as_mut_slice() {
            first.weight = 1.0 - self.fade.weight;
            second.weight = self.fade.weight;
        }
    }

    /// Rebuild the per-bone mask from the branch start bones.
    ///
    /// A branch bone starts at the increase and each descendant adds the
    /// increase again up to 1. Where branches nest, the larger weight wins.
    pub fn build_weight_list(&mut self, skeleton: &Skeleton) {
        let increase = if (0.0..=1.0).contains(&self.per_bone_increase) {
            self.per_bone_increase
        } else {
            log::warn!(
                "Per-bone increase {} outside [0, 1], clamping",
                self.per_bone_increase
            );
            self.per_bone_increase.clamp(0.0, 1.0)
        };

        let count = skeleton.bone_count();
        let mut is_branch = vec![false; count];
        for name in &self.branch_start_bones {
            match skeleton.find_bone(name) {
                Some(bone) => is_branch[bone] = true,
                None => log::warn!("Per-bone branch bone '{}' not found in skeleton", name),
            }
        }

        let mut weights = vec![0.0f32; count];
        for bone in 0..count {
            let inherited = match skeleton.parent_index(bone) {
                Some(parent) if weights[parent] > 0.0 => (weights[parent] + increase).min(1.0),
                _ => 0.0,
            };
            weights[bone] = if is_branch[bone] {
                inherited.max(increase)
            } else {
                inherited
            };
        }

        self.boundary_bones = (0..count)
            .filter(|&bone| {
                let parent_weight = skeleton.parent_index(bone).map(|p| weights[p]).unwrap_or(0.0);
                weights[bone] != parent_weight
            })
            .collect();
        self.component_space_bones = self.boundary_bones.clone();
        skeleton.ensure_parents_present(&mut self.component_space_bones);
        self.per_bone_weights = weights;
    }
}

impl Evaluator<'_> {
    pub(crate) fn per_bone_atoms(
        &mut self,
        id: NodeId,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let links = self.links(id);
        let (base, overlay) = match links.as_slice() {
            [base, overlay] => (*base, *overlay),
            [base] => return self.link_atoms(*base, desired_bones, out),
            _ => return self.ref_pose(desired_bones, out),
        };
        if base.weight >= 1.0 - ZERO_WEIGHT_THRESHOLD {
            return self.link_atoms(base, desired_bones, out);
        }

        let mut base_atoms = self.new_buffer();
        let base_motion = self.link_atoms(base, desired_bones, &mut base_atoms);
        let mut overlay_atoms = self.new_buffer();
        let overlay_motion = self.link_atoms(overlay, desired_bones, &mut overlay_atoms);

        let NodeKind::PerBone(node) = &self.nodes[id.0].kind else {
            return self.ref_pose(desired_bones, out);
        };
        let skeleton = &self.mesh.skeleton;
        let count = skeleton.bone_count();
        let mask = |bone: usize| node.per_bone_weights.get(bone).copied().unwrap_or(0.0);
        let local_only = node.force_local_space_blend
            || self.mesh.settings.force_local_space_blend
            || node.per_bone_weights.len() != count;

        let mut in_component = vec![false; count];
        let mut is_boundary = vec![false; count];
        if !local_only {
            for &bone in &node.component_space_bones {
                in_component[bone] = true;
            }
            for &bone in &node.boundary_bones {
                is_boundary[bone] = true;
            }
        }

        let mut base_component = vec![BoneAtom::IDENTITY; count];
        let mut overlay_component = vec![BoneAtom::IDENTITY; count];
        let mut result_component = vec![BoneAtom::IDENTITY; count];

        for &bone in desired_bones {
            let weight = overlay.weight * mask(bone);
            let local = BoneAtom::blend(&base_atoms[bone], &overlay_atoms[bone], weight);
            if !in_component[bone] {
                out[bone] = local;
                continue;
            }

            let parent = skeleton.parent_index(bone);
            let compose = |space: &[BoneAtom], atom: &BoneAtom| match parent {
                Some(p) => space[p].compose(atom),
                None => *atom,
            };
            base_component[bone] = compose(&base_component, &base_atoms[bone]);
            overlay_component[bone] = compose(&overlay_component, &overlay_atoms[bone]);

            out[bone] = local;
            if is_boundary[bone] {
                let rotation = if weight <= ZERO_WEIGHT_THRESHOLD {
                    base_component[bone].rotation
                } else if weight >= 1.0 - ZERO_WEIGHT_THRESHOLD {
                    overlay_component[bone].rotation
                } else {
                    lerp_quat(base_component[bone].rotation, overlay_component[bone].rotation, weight)
                };
                let parent_rotation = parent
                    .map(|p| result_component[p].rotation)
                    .unwrap_or(Quat::IDENTITY);
                out[bone].rotation = (parent_rotation.inverse() * rotation).normalize();
            }
            result_component[bone] = compose(&result_component, &out[bone]);
        }

        let root_weight = overlay.weight * mask(0);
        match (base_motion.has_root_motion, overlay_motion.has_root_motion) {
            (true, true) => RootMotion::new(BoneAtom::blend(
                &base_motion.delta,
                &overlay_motion.delta,
                root_weight,
            )),
            (false, true) => overlay_motion,
            _ => base_motion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::skeleton::SkeletonBuilder;
    use crate::tree::test_rig::{TestRig, assert_pose_eq};
    use crate::tree::AnimNode;

    fn chain_skeleton() -> Skeleton {
        let mut builder = SkeletonBuilder::new().add_root("b0", BoneAtom::IDENTITY);
        for i in 1..7 {
            builder = builder.add_bone(&format!("b{}", i), &format!("b{}", i - 1), BoneAtom::IDENTITY);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_weight_list_saturates_at_branch() {
        let skeleton = chain_skeleton();
        let mut node = BlendPerBone::new(vec!["b5".into()]);
        node.build_weight_list(&skeleton);

        assert_eq!(node.per_bone_weights(), &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_eq!(node.boundary_bones(), &[5]);
        assert_eq!(node.component_space_bones, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_weight_list_ramps_with_increase() {
        let skeleton = chain_skeleton();
        let mut node = BlendPerBone::new(vec!["b3".into()]);
        node.per_bone_increase = 0.4;
        node.build_weight_list(&skeleton);

        let weights = node.per_bone_weights();
        assert_eq!(&weights[..3], &[0.0, 0.0, 0.0]);
        assert!((weights[3] - 0.4).abs() < 1e-6);
        assert!((weights[4] - 0.8).abs() < 1e-6);
        assert_eq!(weights[5], 1.0);
        assert_eq!(weights[6], 1.0);
        assert_eq!(node.boundary_bones(), &[3, 4, 5]);
    }

    #[test]
    fn test_nested_branch_keeps_larger_weight() {
        let skeleton = chain_skeleton();
        let mut node = BlendPerBone::new(vec!["b2".into(), "b4".into()]);
        node.per_bone_increase = 0.3;
        node.build_weight_list(&skeleton);
        // b4 inherits 0.9 from b3, more than its own start of 0.3
        assert!((node.per_bone_weights()[4] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_increase_out_of_range_is_clamped() {
        let skeleton = chain_skeleton();
        let mut node = BlendPerBone::new(vec!["b1".into()]);
        node.per_bone_increase = 2.5;
        node.build_weight_list(&skeleton);
        assert_eq!(node.per_bone_weights()[1], 1.0);
    }

    fn create_per_bone(rig: &mut TestRig, overlay_weight: f32) -> NodeId {
        let base = rig.add_sequence("bend");
        let overlay = rig.add_sequence("twist");
        let mut per_bone = BlendPerBone::new(vec!["b5".into()]);
        per_bone.fade = WeightFade::new(overlay_weight);
        let node = rig.tree.add_node(AnimNode::new(per_bone));
        rig.tree.add_child(node, Some(base)).unwrap();
        rig.tree.add_child(node, Some(overlay)).unwrap();
        rig.tree.set_root(Some(node));
        rig.init();
        rig.tree.tick(0.0);
        node
    }

    #[test]
    fn test_bones_above_branch_pass_base_through() {
        let mut rig = TestRig::new();
        let node = create_per_bone(&mut rig, 1.0);

        let pose = rig.evaluate_node(node);
        let base = rig.evaluate_clip("bend", 0.0);
        let overlay = rig.evaluate_clip("twist", 0.0);

        for bone in 0..5 {
            assert_eq!(pose[bone], base[bone], "bone {}", bone);
        }
        assert_eq!(pose[6], overlay[6]);
    }

    #[test]
    fn test_full_overlay_keeps_component_rotation_at_branch() {
        let mut rig = TestRig::new();
        let node = create_per_bone(&mut rig, 1.0);

        let pose = rig.evaluate_node(node);
        let result_component = rig.component_space(&pose);
        let overlay_component = rig.component_space(&rig.evaluate_clip("twist", 0.0));

        // b5 matches the overlay's world orientation even though b1 differs
        assert!(result_component[5].rotation.dot(overlay_component[5].rotation).abs() > 0.9999);
        assert!(result_component[6].rotation.dot(overlay_component[6].rotation).abs() > 0.9999);
    }

    #[test]
    fn test_base_fully_weighted_passes_through() {
        let mut rig = TestRig::new();
        let node = create_per_bone(&mut rig, 0.0);
        assert_eq!(rig.evaluate_node(node), rig.evaluate_clip("bend", 0.0));
    }

    #[test]
    fn test_forced_local_space_blend() {
        let mut rig = TestRig::new();
        let node = create_per_bone(&mut rig, 1.0);
        if let Some(crate::tree::NodeKind::PerBone(p)) = rig.tree.node_mut(node).map(|n| &mut n.kind) {
            p.force_local_space_blend = true;
        }

        let pose = rig.evaluate_node(node);
        let overlay = rig.evaluate_clip("twist", 0.0);
        // Local blend at full weight copies the overlay's local rotation
        assert_pose_eq(&pose[5..], &overlay[5..]);
    }
}
