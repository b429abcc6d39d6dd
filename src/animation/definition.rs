//! Serializable descriptions of skeletons, clips and mirror tables

use crate::animation::bone_atom::BoneAtom;
use crate::animation::clip::{AnimationClip, BoneTrack, TransformKeyframe};
use crate::animation::mirror::{Axis, MirrorTable};
use crate::animation::skeleton::{Bone, Skeleton};
use crate::core::{Error, Result};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

fn default_scale() -> f32 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoneDefinition {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

/// Bones listed parent-first
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SkeletonDefinition {
    pub bones: Vec<BoneDefinition>,
}

impl SkeletonDefinition {
    pub fn build(&self) -> Result<Skeleton> {
        let mut skeleton = Skeleton::new();
        for def in &self.bones {
            let parent = match &def.parent {
                Some(name) => Some(
                    skeleton
                        .find_bone(name)
                        .ok_or_else(|| Error::UnknownBone(name.clone()))?,
                ),
                None => None,
            };
            let ref_pose = BoneAtom::new(def.rotation.normalize(), def.translation, def.scale);
            skeleton.add_bone(Bone::new(def.name.clone(), parent, ref_pose))?;
        }
        if skeleton.bone_count() == 0 {
            return Err(Error::Definition("skeleton has no bones".into()));
        }
        Ok(skeleton)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub time: f32,
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default)]
    pub rotation: Quat,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackDefinition {
    pub bone: String,
    pub keys: Vec<KeyDefinition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyDefinition {
    pub time: f32,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipDefinition {
    pub name: String,
    /// Defaults to the time of the last key
    #[serde(default)]
    pub length: Option<f32>,
    #[serde(default = "default_scale")]
    pub rate_scale: f32,
    #[serde(default)]
    pub tracks: Vec<TrackDefinition>,
    #[serde(default)]
    pub notifies: Vec<NotifyDefinition>,
}

impl ClipDefinition {
    pub fn build(&self, skeleton: &Skeleton) -> Result<AnimationClip> {
        let mut clip = AnimationClip::new(self.name.clone());
        clip.rate_scale = self.rate_scale;
        for track_def in &self.tracks {
            let bone = skeleton
                .find_bone(&track_def.bone)
                .ok_or_else(|| Error::UnknownBone(track_def.bone.clone()))?;
            let mut track = BoneTrack::new(bone);
            for key in &track_def.keys {
                track.add_keyframe(TransformKeyframe::new(
                    key.time,
                    key.translation,
                    key.rotation.normalize(),
                    key.scale,
                ));
            }
            clip.add_track(track);
        }
        for notify in &self.notifies {
            clip.add_notify(notify.time, notify.name.clone());
        }
        match self.length {
            Some(length) => clip.length = length.max(0.0),
            None => clip.calculate_length(),
        }
        Ok(clip)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorDefinition {
    pub mirror_axis: Axis,
    pub flip_axis: Axis,
    /// Left/right bone name pairs
    #[serde(default)]
    pub pairs: Vec<(String, String)>,
    /// Per-bone flip axis overrides
    #[serde(default)]
    pub flip_overrides: Vec<(String, Axis)>,
}

impl MirrorDefinition {
    pub fn build(&self, skeleton: &Skeleton) -> Result<MirrorTable> {
        let find = |name: &str| {
            skeleton
                .find_bone(name)
                .ok_or_else(|| Error::UnknownBone(name.to_string()))
        };
        let mut table = MirrorTable::identity(skeleton.bone_count(), self.mirror_axis, self.flip_axis);
        for (a, b) in &self.pairs {
            table.set_pair(find(a)?, find(b)?);
        }
        for (bone, axis) in &self.flip_overrides {
            table.entries[find(bone)?].flip_axis = Some(*axis);
        }
        Ok(table)
    }
}
