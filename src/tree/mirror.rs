//! Mirrored evaluation through the mesh's mirror table

use crate::animation::bone_atom::{BoneAtom, RootMotion};
use glam::Mat4;

use super::eval::Evaluator;
use super::node::{ChildLink, NodeId, NodeKind};

/// Single-child node that reflects its child's pose left to right
#[derive(Clone, Debug)]
pub struct MirrorNode {
    pub children: Vec<ChildLink>,
    pub enable_mirroring: bool,
}

impl Default for MirrorNode {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            enable_mirroring: true,
        }
    }
}

impl MirrorNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Evaluator<'_> {
    pub(crate) fn mirror_node_atoms(
        &mut self,
        id: NodeId,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let links = self.links(id);
        let Some(child) = links.first().copied() else {
            return self.ref_pose(desired_bones, out);
        };
        let enabled = matches!(&self.nodes[id.0].kind, NodeKind::Mirror(n) if n.enable_mirroring);
        // A mirrored link under an enabled node cancels out
        if enabled != child.mirror {
            self.mirrored_atoms(child.node, desired_bones, out)
        } else {
            self.bone_atoms(child.node, desired_bones, out)
        }
    }

    /// Evaluate `node` and reflect the result.
    ///
    /// Every bone takes the reflected component-space transform of its mirror
    /// source, then is converted back to local space against its own reflected
    /// parent. Without a mirror table matching the skeleton the pose passes through.
    pub(crate) fn mirrored_atoms(
        &mut self,
        node: Option<NodeId>,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let mesh = self.mesh;
        let Some(table) = mesh.valid_mirror_table() else {
            log::trace!("No usable mirror table, evaluating unmirrored");
            return self.bone_atoms(node, desired_bones, out);
        };
        let skeleton = &mesh.skeleton;

        let mut source_bones: Vec<usize> = desired_bones
            .iter()
            .flat_map(|&bone| [bone, table.source_index(bone)])
            .collect();
        skeleton.ensure_parents_present(&mut source_bones);

        let mut atoms = self.new_buffer();
        let root_motion = self.bone_atoms(node, &source_bones, &mut atoms);

        let count = skeleton.bone_count();
        let mut component = vec![Mat4::IDENTITY; count];
        for &bone in &source_bones {
            let local = atoms[bone].to_matrix();
            component[bone] = match skeleton.parent_index(bone) {
                Some(parent) => component[parent] * local,
                None => local,
            };
        }

        let mut mirrored = vec![Mat4::IDENTITY; count];
        for &bone in desired_bones {
            let source = table.source_index(bone);
            mirrored[bone] = table.mirror_matrix(&component[source], table.flip_axis_for(source));
            let local = match skeleton.parent_index(bone) {
                Some(parent) => mirrored[parent].inverse() * mirrored[bone],
                None => mirrored[bone],
            };
            out[bone] = BoneAtom::from_matrix(&local);
        }

        table.mirror_root_motion(root_motion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_rig::{TestRig, assert_pose_eq};
    use crate::tree::AnimNode;
    use glam::{Quat, Vec3};

    const ARM_L: usize = 7;
    const ARM_R: usize = 8;

    fn create_mirror(rig: &mut TestRig, clip: &str, mirror_link: bool) -> NodeId {
        let child = rig.add_sequence(clip);
        let node = rig.tree.add_node(AnimNode::new(MirrorNode::new()));
        rig.tree.add_child(node, Some(child)).unwrap();
        if let Some(links) = rig.tree.node_mut(node).and_then(|n| n.kind.children_mut()) {
            links[0].mirror = mirror_link;
        }
        rig.tree.set_root(Some(node));
        rig.init();
        node
    }

    #[test]
    fn test_arm_pose_moves_to_other_side() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "arms", false);

        let pose = rig.evaluate_node(node);
        assert!(pose[ARM_R].rotation.dot(Quat::from_rotation_z(-0.5)).abs() > 0.9999);
        assert!(pose[ARM_L].rotation.dot(Quat::IDENTITY).abs() > 0.9999);
        assert!((pose[ARM_R].translation - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-4);
        assert!((pose[ARM_L].translation - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_symmetric_reference_pose_is_unchanged() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "still", false);
        assert_pose_eq(&rig.evaluate_node(node), &rig.ref_pose());
    }

    #[test]
    fn test_mirroring_twice_restores_pose() {
        let mut rig = TestRig::new();
        let child = rig.add_sequence("twist");
        let inner = rig.tree.add_node(AnimNode::new(MirrorNode::new()));
        let outer = rig.tree.add_node(AnimNode::new(MirrorNode::new()));
        rig.tree.add_child(inner, Some(child)).unwrap();
        rig.tree.add_child(outer, Some(inner)).unwrap();
        rig.tree.set_root(Some(outer));
        rig.init();

        assert_pose_eq(&rig.evaluate_node(outer), &rig.evaluate_clip("twist", 0.0));
    }

    #[test]
    fn test_mirrored_link_cancels_node() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "arms", true);
        assert_pose_eq(&rig.evaluate_node(node), &rig.evaluate_clip("arms", 0.0));
    }

    #[test]
    fn test_disabled_node_passes_through() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "arms", false);
        if let Some(NodeKind::Mirror(mirror)) = rig.tree.node_mut(node).map(|n| &mut n.kind) {
            mirror.enable_mirroring = false;
        }
        assert_eq!(rig.evaluate_node(node), rig.evaluate_clip("arms", 0.0));
    }

    #[test]
    fn test_root_motion_is_reflected() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "walk", false);
        let child = rig.tree.find_node("walk").unwrap();
        if let Some(seq) = rig.tree.node_mut(child).and_then(|n| n.kind.as_sequence_mut()) {
            seq.extract_root_motion = true;
            seq.previous_time = 0.0;
            seq.current_time = 0.5;
        }

        let all = rig.all_bones();
        let mut out = rig.ref_pose();
        let root_motion = rig.tree.bone_atoms(node, &all, &mut out);
        assert!(root_motion.has_root_motion);
        // walk moves (2, 1) per second; the mirror flips the sideways part
        assert!((root_motion.delta.translation - Vec3::new(1.0, -0.5, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_without_table_passes_through() {
        let mut rig = TestRig::new();
        let node = create_mirror(&mut rig, "arms", false);
        if let Some(mesh) = rig.tree.mesh_mut() {
            mesh.mirror_table = None;
        }
        assert_eq!(rig.evaluate_node(node), rig.evaluate_clip("arms", 0.0));
    }
}
