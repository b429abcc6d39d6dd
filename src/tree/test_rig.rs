//! Small skeleton, clip set and tree used by the node tests

use std::sync::Arc;

use glam::{Quat, Vec3};

use crate::animation::bone_atom::BoneAtom;
use crate::animation::clip::{AnimationClip, BoneTrack, TransformKeyframe};
use crate::animation::component::MeshComponent;
use crate::animation::mirror::{Axis, MirrorTable};
use crate::animation::skeleton::{Skeleton, SkeletonBuilder};

use super::anim_tree::AnimTree;
use super::node::{AnimNode, NodeId};
use super::sequence::SequencePlayer;

/// Chain b0..b6 up the Z axis with a pair of arms off b2:
///
/// ```text
/// b0 - b1 - b2 - b3 - b4 - b5 - b6
///             \- arm_l (+Y)
///             \- arm_r (-Y)
/// ```
pub(crate) fn create_skeleton() -> Skeleton {
    let up = BoneAtom::from_translation(Vec3::Z);
    let mut builder = SkeletonBuilder::new().add_root("b0", BoneAtom::IDENTITY);
    for i in 1..7 {
        builder = builder.add_bone(&format!("b{}", i), &format!("b{}", i - 1), up);
    }
    builder
        .add_bone("arm_l", "b2", BoneAtom::from_translation(Vec3::Y))
        .add_bone("arm_r", "b2", BoneAtom::from_translation(-Vec3::Y))
        .build()
        .unwrap()
}

fn static_clip(skeleton: &Skeleton, name: &str, bones: &[(&str, BoneAtom)]) -> AnimationClip {
    let mut clip = AnimationClip::new(name);
    for (bone, atom) in bones {
        let mut track = BoneTrack::new(skeleton.find_bone(bone).unwrap());
        track.add_keyframe(TransformKeyframe::new(0.0, atom.translation, atom.rotation, atom.scale));
        clip.add_track(track);
    }
    clip.length = 1.0;
    clip
}

fn rotated(rotation: Quat) -> BoneAtom {
    BoneAtom::new(rotation, Vec3::Z, 1.0)
}

pub(crate) fn create_mesh() -> MeshComponent {
    let skeleton = create_skeleton();
    let mut mesh = MeshComponent::new(Arc::new(skeleton.clone()));

    mesh.add_clip(static_clip(&skeleton, "still", &[]));
    mesh.add_clip(static_clip(&skeleton, "bend", &[("b1", rotated(Quat::from_rotation_x(0.5)))]));
    mesh.add_clip(static_clip(
        &skeleton,
        "twist",
        &[
            ("b1", rotated(Quat::from_rotation_z(0.8))),
            ("b5", rotated(Quat::from_rotation_y(0.6))),
        ],
    ));
    mesh.add_clip(static_clip(
        &skeleton,
        "spin179",
        &[("b1", rotated(Quat::from_rotation_z(179.0_f32.to_radians())))],
    ));
    mesh.add_clip(static_clip(
        &skeleton,
        "lift",
        &[("b1", BoneAtom::from_translation(Vec3::new(0.0, 0.0, 3.0)))],
    ));
    mesh.add_clip(static_clip(
        &skeleton,
        "arms",
        &[(
            "arm_l",
            BoneAtom::new(Quat::from_rotation_z(0.5), Vec3::Y, 1.0),
        )],
    ));
    mesh.add_clip(static_clip(
        &skeleton,
        "aim_right",
        &[("b3", rotated(Quat::from_rotation_z(-0.8)))],
    ));

    // Root travels (2, 1, 0) per second with a footstep halfway
    let mut walk = AnimationClip::new("walk");
    let mut track = BoneTrack::new(0);
    track.add_keyframe(TransformKeyframe::identity(0.0));
    track.add_keyframe(TransformKeyframe::new(1.0, Vec3::new(2.0, 1.0, 0.0), Quat::IDENTITY, 1.0));
    walk.add_track(track);
    walk.length = 1.0;
    walk.add_notify(0.5, "footstep");
    mesh.add_clip(walk);

    let mut run = AnimationClip::new("run");
    run.length = 2.0;
    run.add_notify(1.0, "stride");
    mesh.add_clip(run);

    let mut table = MirrorTable::identity(skeleton.bone_count(), Axis::Y, Axis::Y);
    table.set_pair(
        skeleton.find_bone("arm_l").unwrap(),
        skeleton.find_bone("arm_r").unwrap(),
    );
    mesh.mirror_table = Some(table);
    mesh
}

/// A tree plus the mesh it gets bound to
pub(crate) struct TestRig {
    pub tree: AnimTree,
    pub mesh: MeshComponent,
}

impl TestRig {
    pub fn new() -> Self {
        Self {
            tree: AnimTree::new(),
            mesh: create_mesh(),
        }
    }

    /// Add an idle sequence node named after its clip
    pub fn add_sequence(&mut self, clip: &str) -> NodeId {
        self.tree
            .add_node(AnimNode::new(SequencePlayer::new(Some(clip))).with_name(clip))
    }

    pub fn init(&mut self) {
        self.tree.init(self.mesh.clone());
    }

    pub fn all_bones(&self) -> Vec<usize> {
        self.mesh.skeleton.all_bones()
    }

    pub fn ref_pose(&self) -> Vec<BoneAtom> {
        self.mesh.skeleton.bones().iter().map(|b| b.ref_pose).collect()
    }

    /// Full pose of one node
    pub fn evaluate_node(&mut self, id: NodeId) -> Vec<BoneAtom> {
        let all = self.all_bones();
        let mut out = self.ref_pose();
        self.tree.bone_atoms(id, &all, &mut out);
        out
    }

    /// A clip sampled directly, for comparison with tree output
    pub fn evaluate_clip(&self, name: &str, time: f32) -> Vec<BoneAtom> {
        let mut out = self.ref_pose();
        let clip = self.mesh.find_clip(name).unwrap();
        clip.sample_pose(&self.mesh.skeleton, time, false, &self.all_bones(), &mut out);
        out
    }

    pub fn component_space(&self, pose: &[BoneAtom]) -> Vec<BoneAtom> {
        let mut component = vec![BoneAtom::IDENTITY; pose.len()];
        self.mesh
            .skeleton
            .calculate_component_space(pose, &self.all_bones(), &mut component);
        component
    }
}

/// Compare poses with a tolerance; rotations match up to sign
pub(crate) fn assert_pose_eq(actual: &[BoneAtom], expected: &[BoneAtom]) {
    assert_eq!(actual.len(), expected.len());
    for (bone, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            a.rotation.dot(e.rotation).abs() > 1.0 - 1e-4,
            "bone {} rotation {:?} != {:?}",
            bone,
            a.rotation,
            e.rotation
        );
        assert!(
            (a.translation - e.translation).length() < 1e-4,
            "bone {} translation {:?} != {:?}",
            bone,
            a.translation,
            e.translation
        );
        assert!((a.scale - e.scale).abs() < 1e-4, "bone {} scale", bone);
    }
}
