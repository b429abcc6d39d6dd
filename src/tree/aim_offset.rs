//! Aim offsets: additive per-bone adjustments from a 3x3 grid of aim poses
//!
//! Each profile stores, per affected bone, a rotation and translation offset for
//! nine aim directions. The current aim picks a quadrant of the grid and the
//! four surrounding offsets are bilinearly interpolated, then applied in
//! component space on top of the child's pose.

use serde::{Deserialize, Serialize};

use crate::animation::bone_atom::{
    bilerp_quat, bilerp_vec3, BoneAtom, KINDA_SMALL_NUMBER, RootMotion,
};
use crate::animation::component::MeshComponent;
use crate::animation::skeleton::Skeleton;
use crate::core::{Error, Result};
use glam::{Quat, Vec2, Vec3};

use super::eval::Evaluator;
use super::node::{ChildLink, NodeId, NodeKind};

/// One cell of the aim grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AimDir {
    LeftUp,
    LeftCenter,
    LeftDown,
    CenterUp,
    CenterCenter,
    CenterDown,
    RightUp,
    RightCenter,
    RightDown,
}

impl AimDir {
    pub const ALL: [AimDir; 9] = [
        AimDir::LeftUp,
        AimDir::LeftCenter,
        AimDir::LeftDown,
        AimDir::CenterUp,
        AimDir::CenterCenter,
        AimDir::CenterDown,
        AimDir::RightUp,
        AimDir::RightCenter,
        AimDir::RightDown,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Aim vector at the centre of this cell
    pub fn aim(self) -> Vec2 {
        match self {
            AimDir::LeftUp => Vec2::new(-1.0, 1.0),
            AimDir::LeftCenter => Vec2::new(-1.0, 0.0),
            AimDir::LeftDown => Vec2::new(-1.0, -1.0),
            AimDir::CenterUp => Vec2::new(0.0, 1.0),
            AimDir::CenterCenter => Vec2::ZERO,
            AimDir::CenterDown => Vec2::new(0.0, -1.0),
            AimDir::RightUp => Vec2::new(1.0, 1.0),
            AimDir::RightCenter => Vec2::new(1.0, 0.0),
            AimDir::RightDown => Vec2::new(1.0, -1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AimTransform {
    pub rotation: Quat,
    pub translation: Vec3,
}

/// Offsets for one bone, indexed by [`AimDir::index`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AimComponent {
    pub bone_name: String,
    pub offsets: [AimTransform; 9],
}

impl AimComponent {
    pub fn new(bone_name: impl Into<String>) -> Self {
        Self {
            bone_name: bone_name.into(),
            offsets: [AimTransform::default(); 9],
        }
    }

    fn get(&self, dir: AimDir) -> &AimTransform {
        &self.offsets[dir.index()]
    }

    /// Interpolated offset for an aim in [-1, 1] on both axes
    pub fn offset_at(&self, aim: Vec2) -> AimTransform {
        use AimDir::*;
        let (p00, p10, p01, p11, x, y) = if aim.x >= 0.0 && aim.y >= 0.0 {
            (CenterCenter, RightCenter, CenterUp, RightUp, aim.x, aim.y)
        } else if aim.x >= 0.0 {
            (CenterDown, RightDown, CenterCenter, RightCenter, aim.x, aim.y + 1.0)
        } else if aim.y >= 0.0 {
            (LeftCenter, CenterCenter, LeftUp, CenterUp, aim.x + 1.0, aim.y)
        } else {
            (LeftDown, CenterDown, LeftCenter, CenterCenter, aim.x + 1.0, aim.y + 1.0)
        };
        let (p00, p10, p01, p11) = (self.get(p00), self.get(p10), self.get(p01), self.get(p11));
        AimTransform {
            rotation: bilerp_quat(p00.rotation, p10.rotation, p01.rotation, p11.rotation, x, y),
            translation: bilerp_vec3(
                p00.translation,
                p10.translation,
                p01.translation,
                p11.translation,
                x,
                y,
            ),
        }
    }
}

fn default_range() -> Vec2 {
    Vec2::new(-1.0, 1.0)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AimOffsetProfile {
    pub name: String,
    /// Aim values mapped onto the full left and right offsets
    #[serde(default = "default_range")]
    pub horizontal_range: Vec2,
    #[serde(default = "default_range")]
    pub vertical_range: Vec2,
    /// Sorted by skeleton bone index
    #[serde(default)]
    pub components: Vec<AimComponent>,
    /// Clips sampled by [`AimOffset::bake_offsets_from_animations`], indexed by [`AimDir::index`]
    #[serde(default)]
    pub anim_names: [Option<String>; 9],
}

impl AimOffsetProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            horizontal_range: default_range(),
            vertical_range: default_range(),
            components: Vec::new(),
            anim_names: Default::default(),
        }
    }

    /// Component for `bone`, created in bone-index order if missing
    fn component_mut(&mut self, skeleton: &Skeleton, bone: usize) -> &mut AimComponent {
        let index_of = |c: &AimComponent| skeleton.find_bone(&c.bone_name).unwrap_or(usize::MAX);
        let position = match self.components.iter().position(|c| index_of(c) >= bone) {
            Some(pos) if index_of(&self.components[pos]) == bone => pos,
            Some(pos) => {
                self.components.insert(pos, AimComponent::new(skeleton.bones()[bone].name.clone()));
                pos
            }
            None => {
                self.components.push(AimComponent::new(skeleton.bones()[bone].name.clone()));
                self.components.len() - 1
            }
        };
        &mut self.components[position]
    }
}

fn wrap_aim(value: f32) -> f32 {
    if value > 1.0 {
        value - 2.0
    } else if value < -1.0 {
        value + 2.0
    } else {
        value
    }
}

fn scale_by_range(value: f32, range: Vec2) -> f32 {
    if value < 0.0 {
        if range.x != 0.0 { value / range.x.abs() } else { 0.0 }
    } else if range.y != 0.0 {
        value / range.y
    } else {
        0.0
    }
}

#[derive(Clone, Debug)]
pub struct AimOffset {
    pub children: Vec<ChildLink>,
    /// Requested aim, nominally in [-1, 1] on both axes
    pub aim: Vec2,
    pub angle_offset: Vec2,
    /// Pin the aim to one grid cell
    pub force_aim_dir: Option<AimDir>,
    /// At or above this LOD the child pose passes through unmodified
    pub pass_through_at_or_above_lod: u32,
    pub profiles: Vec<AimOffsetProfile>,
    current_profile: usize,
    required_bones: Vec<usize>,
    bone_to_component: Vec<Option<usize>>,
}

impl Default for AimOffset {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            aim: Vec2::ZERO,
            angle_offset: Vec2::ZERO,
            force_aim_dir: None,
            pass_through_at_or_above_lod: 3,
            profiles: Vec::new(),
            current_profile: 0,
            required_bones: Vec::new(),
            bone_to_component: Vec::new(),
        }
    }
}

impl AimOffset {
    pub fn new(profiles: Vec<AimOffsetProfile>) -> Self {
        Self {
            profiles,
            ..Default::default()
        }
    }

    pub fn current_profile(&self) -> Option<&AimOffsetProfile> {
        self.profiles.get(self.current_profile)
    }

    pub fn current_profile_index(&self) -> usize {
        self.current_profile
    }

    /// Bones touched by the current profile, with their ancestors
    pub fn required_bones(&self) -> &[usize] {
        &self.required_bones
    }

    /// Switch profile; bones are remapped now if a skeleton is given, otherwise at init
    pub fn set_active_profile_by_name(&mut self, name: &str, skeleton: Option<&Skeleton>) -> Result<()> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::Tree(format!("Aim offset profile '{}' not found", name)))?;
        self.set_active_profile_by_index(index, skeleton)
    }

    pub fn set_active_profile_by_index(&mut self, index: usize, skeleton: Option<&Skeleton>) -> Result<()> {
        if index >= self.profiles.len() {
            return Err(Error::Tree(format!(
                "Aim offset profile index {} out of range ({} profiles)",
                index,
                self.profiles.len()
            )));
        }
        self.current_profile = index;
        if let Some(skeleton) = skeleton {
            self.update_required_bones(skeleton);
        }
        Ok(())
    }

    /// Map profile components onto skeleton bones
    pub fn update_required_bones(&mut self, skeleton: &Skeleton) {
        self.required_bones.clear();
        self.bone_to_component = vec![None; skeleton.bone_count()];
        let Some(profile) = self.profiles.get(self.current_profile) else {
            return;
        };
        for (i, component) in profile.components.iter().enumerate() {
            match skeleton.find_bone(&component.bone_name) {
                Some(bone) => {
                    self.bone_to_component[bone] = Some(i);
                    self.required_bones.push(bone);
                }
                None => log::warn!("Aim offset bone '{}' not found in skeleton", component.bone_name),
            }
        }
        skeleton.ensure_parents_present(&mut self.required_bones);
    }

    /// The aim actually used: offset, wrapped, scaled into the profile's range and clamped
    pub fn effective_aim(&self, profile: &AimOffsetProfile) -> Vec2 {
        if let Some(dir) = self.force_aim_dir {
            return dir.aim();
        }
        let aim = self.aim + self.angle_offset;
        Vec2::new(
            scale_by_range(wrap_aim(aim.x), profile.horizontal_range),
            scale_by_range(wrap_aim(aim.y), profile.vertical_range),
        )
        .clamp(Vec2::splat(-1.0), Vec2::ONE)
    }

    /// Derive the current profile's offsets from its nine aim clips.
    ///
    /// Each clip's first frame is compared to the centre-centre clip in component
    /// space; bones that differ get an offset. Returns the number of components.
    pub fn bake_offsets_from_animations(&mut self, mesh: &MeshComponent) -> Result<usize> {
        let skeleton = mesh.skeleton.as_ref();
        let profile = self
            .profiles
            .get_mut(self.current_profile)
            .ok_or_else(|| Error::Tree("Aim offset has no profile to bake".into()))?;
        let center_name = profile.anim_names[AimDir::CenterCenter.index()]
            .clone()
            .ok_or_else(|| Error::Definition("Aim offset bake needs a centre-centre clip".into()))?;
        let center = mesh
            .find_clip(&center_name)
            .ok_or_else(|| Error::UnknownClip(center_name.clone()))?;

        let count = skeleton.bone_count();
        let all_bones = skeleton.all_bones();
        let mut source_local = vec![BoneAtom::IDENTITY; count];
        center.sample_pose(skeleton, 0.0, false, &all_bones, &mut source_local);

        profile.components.clear();
        for dir in AimDir::ALL {
            if dir == AimDir::CenterCenter {
                continue;
            }
            let Some(name) = profile.anim_names[dir.index()].clone() else {
                continue;
            };
            let clip = mesh
                .find_clip(&name)
                .ok_or_else(|| Error::UnknownClip(name.clone()))?;
            let mut target_local = vec![BoneAtom::IDENTITY; count];
            clip.sample_pose(skeleton, 0.0, false, &all_bones, &mut target_local);

            let mut target_component = vec![BoneAtom::IDENTITY; count];
            for bone in 0..count {
                let parent = skeleton
                    .parent_index(bone)
                    .map(|p| target_component[p])
                    .unwrap_or(BoneAtom::IDENTITY);
                let source = parent.compose(&source_local[bone]);
                target_component[bone] = parent.compose(&target_local[bone]);

                let translation = target_component[bone].translation - source.translation;
                let rotation = (target_component[bone].rotation * source.rotation.inverse()).normalize();
                let rotation = if rotation.w < 0.0 { -rotation } else { rotation };
                if translation.length() > KINDA_SMALL_NUMBER
                    || !rotation.abs_diff_eq(Quat::IDENTITY, KINDA_SMALL_NUMBER)
                {
                    profile.component_mut(skeleton, bone).offsets[dir.index()] = AimTransform {
                        rotation,
                        translation,
                    };
                }
            }
        }

        let components = profile.components.len();
        log::info!(
            "Baked aim offset profile '{}': {} bone components",
            profile.name,
            components
        );
        self.update_required_bones(skeleton);
        Ok(components)
    }
}

impl Evaluator<'_> {
    pub(crate) fn aim_offset_atoms(
        &mut self,
        id: NodeId,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let links = self.links(id);
        let Some(child) = links.first().copied() else {
            return self.ref_pose(desired_bones, out);
        };
        let root_motion = self.link_atoms(child, desired_bones, out);

        let NodeKind::AimOffset(node) = &self.nodes[id.0].kind else {
            return root_motion;
        };
        if self.mesh.settings.predicted_lod >= node.pass_through_at_or_above_lod {
            return root_motion;
        }
        let Some(profile) = node.current_profile() else {
            return root_motion;
        };
        let skeleton = &self.mesh.skeleton;
        let count = skeleton.bone_count();
        if profile.components.is_empty() || node.bone_to_component.len() != count {
            return root_motion;
        }

        let aim = node.effective_aim(profile);
        let mut required = vec![false; count];
        for &bone in &node.required_bones {
            required[bone] = true;
        }

        let mut component = vec![BoneAtom::IDENTITY; count];
        for &bone in desired_bones {
            if !required[bone] {
                continue;
            }
            let parent = skeleton
                .parent_index(bone)
                .map(|p| component[p])
                .unwrap_or(BoneAtom::IDENTITY);
            component[bone] = parent.compose(&out[bone]);

            let Some(index) = node.bone_to_component[bone] else {
                continue;
            };
            let offset = profile.components[index].offset_at(aim);
            let apply_translation = offset.translation.length_squared() > KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER;
            let apply_rotation = !offset.rotation.abs_diff_eq(Quat::IDENTITY, KINDA_SMALL_NUMBER)
                && !offset.rotation.abs_diff_eq(-Quat::IDENTITY, KINDA_SMALL_NUMBER);
            if !apply_translation && !apply_rotation {
                continue;
            }

            let mut modified = component[bone];
            if apply_translation {
                modified.translation += offset.translation;
            }
            if apply_rotation {
                modified.rotation = (offset.rotation * modified.rotation).normalize();
            }
            let local = modified.relative_to(&parent);
            out[bone].rotation = local.rotation;
            out[bone].translation = local.translation;
            component[bone] = modified;
        }
        root_motion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_rig::{TestRig, assert_pose_eq};
    use crate::tree::AnimNode;

    fn rotated_component(bone: &str) -> AimComponent {
        let mut component = AimComponent::new(bone);
        component.offsets[AimDir::RightCenter.index()].rotation = Quat::from_rotation_z(-0.8);
        component.offsets[AimDir::LeftCenter.index()].rotation = Quat::from_rotation_z(0.8);
        component.offsets[AimDir::CenterUp.index()].translation = Vec3::new(0.0, 0.0, 0.5);
        component
    }

    #[test]
    fn test_offset_at_corners_and_centre() {
        let component = rotated_component("b3");
        let right = component.offset_at(Vec2::new(1.0, 0.0));
        assert!(right.rotation.dot(Quat::from_rotation_z(-0.8)).abs() > 0.9999);

        let centre = component.offset_at(Vec2::ZERO);
        assert!(centre.rotation.dot(Quat::IDENTITY).abs() > 0.9999);
        assert_eq!(centre.translation, Vec3::ZERO);

        let half_up = component.offset_at(Vec2::new(0.0, 0.5));
        assert!((half_up.translation.z - 0.25).abs() < 1e-6);

        let half_left = component.offset_at(Vec2::new(-0.5, 0.0));
        assert!(half_left.rotation.dot(Quat::from_rotation_z(0.4)).abs() > 0.9999);
    }

    #[test]
    fn test_effective_aim_scales_and_clamps() {
        let mut profile = AimOffsetProfile::new("rifle");
        profile.horizontal_range = Vec2::new(-0.5, 2.0);
        let mut node = AimOffset::new(vec![profile.clone()]);

        node.aim = Vec2::new(-0.25, 0.0);
        assert!((node.effective_aim(&profile).x + 0.5).abs() < 1e-6);

        node.aim = Vec2::new(1.0, 3.0);
        let aim = node.effective_aim(&profile);
        assert!((aim.x - 0.5).abs() < 1e-6);
        assert_eq!(aim.y, 1.0);

        node.angle_offset = Vec2::new(0.5, 0.0);
        node.aim = Vec2::new(0.75, 0.0);
        // 1.25 wraps to -0.75, then scales by the 0.5 left range
        assert_eq!(node.effective_aim(&profile).x, -1.0);

        node.force_aim_dir = Some(AimDir::LeftDown);
        assert_eq!(node.effective_aim(&profile), Vec2::new(-1.0, -1.0));
    }

    fn create_aim_rig(aim: Vec2) -> (TestRig, NodeId) {
        let mut rig = TestRig::new();
        let child = rig.add_sequence("still");
        let mut profile = AimOffsetProfile::new("default");
        profile.components.push(rotated_component("b3"));
        let mut aim_node = AimOffset::new(vec![profile]);
        aim_node.aim = aim;
        let node = rig.tree.add_node(AnimNode::new(aim_node));
        rig.tree.add_child(node, Some(child)).unwrap();
        rig.tree.set_root(Some(node));
        rig.init();
        (rig, node)
    }

    #[test]
    fn test_centre_aim_leaves_pose_alone() {
        let (mut rig, node) = create_aim_rig(Vec2::ZERO);
        let pose = rig.evaluate_node(node);
        assert_pose_eq(&pose, &rig.evaluate_clip("still", 0.0));
    }

    #[test]
    fn test_aim_right_rotates_bone_in_component_space() {
        let (mut rig, node) = create_aim_rig(Vec2::new(1.0, 0.0));
        let pose = rig.evaluate_node(node);
        let component = rig.component_space(&pose);

        assert!(component[3].rotation.dot(Quat::from_rotation_z(-0.8)).abs() > 0.9999);
        // Descendants inherit the offset
        assert!(component[4].rotation.dot(Quat::from_rotation_z(-0.8)).abs() > 0.9999);
        // Bones above are untouched
        assert_eq!(pose[2], rig.evaluate_clip("still", 0.0)[2]);
    }

    #[test]
    fn test_pass_through_at_high_lod() {
        let (mut rig, node) = create_aim_rig(Vec2::new(1.0, 0.0));
        if let Some(mesh) = rig.tree.mesh_mut() {
            mesh.settings.predicted_lod = 5;
        }
        let pose = rig.evaluate_node(node);
        assert_pose_eq(&pose, &rig.evaluate_clip("still", 0.0));
    }

    #[test]
    fn test_bake_from_clips() {
        let mut rig = TestRig::new();
        let child = rig.add_sequence("still");
        let mut profile = AimOffsetProfile::new("baked");
        profile.anim_names[AimDir::CenterCenter.index()] = Some("still".into());
        profile.anim_names[AimDir::RightCenter.index()] = Some("aim_right".into());
        let node = rig.tree.add_node(AnimNode::new(AimOffset::new(vec![profile])));
        rig.tree.add_child(node, Some(child)).unwrap();
        rig.tree.set_root(Some(node));
        rig.init();

        let count = rig.tree.bake_aim_offsets(node).unwrap();
        assert_eq!(count, 1);

        let Some(NodeKind::AimOffset(aim)) = rig.tree.node(node).map(|n| &n.kind) else {
            panic!("not an aim offset node");
        };
        let component = &aim.current_profile().unwrap().components[0];
        assert_eq!(component.bone_name, "b3");
        let right = component.offsets[AimDir::RightCenter.index()];
        assert!(right.rotation.dot(Quat::from_rotation_z(-0.8)).abs() > 0.9999);
        assert_eq!(aim.required_bones(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_bake_without_centre_clip_fails() {
        let mut rig = TestRig::new();
        let node = rig
            .tree
            .add_node(AnimNode::new(AimOffset::new(vec![AimOffsetProfile::new("empty")])));
        rig.tree.set_root(Some(node));
        rig.init();
        assert!(matches!(rig.tree.bake_aim_offsets(node), Err(Error::Definition(_))));
    }
}
