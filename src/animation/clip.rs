//! Animation clip, keyframe and notify data

use crate::animation::bone_atom::BoneAtom;
use crate::animation::skeleton::Skeleton;
use glam::{Quat, Vec3};

/// A single transform keyframe at a specific time
#[derive(Clone, Debug)]
pub struct TransformKeyframe {
    pub time: f32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl TransformKeyframe {
    /// Create a new keyframe with the given transform
    pub fn new(time: f32, translation: Vec3, rotation: Quat, scale: f32) -> Self {
        Self {
            time,
            translation,
            rotation,
            scale,
        }
    }

    /// Create an identity transform keyframe at the given time
    pub fn identity(time: f32) -> Self {
        Self::new(time, Vec3::ZERO, Quat::IDENTITY, 1.0)
    }

    pub fn atom(&self) -> BoneAtom {
        BoneAtom::new(self.rotation, self.translation, self.scale)
    }

    /// Interpolate between two keyframes
    /// t should be in range [0, 1] where 0 = keyframe a, 1 = keyframe b
    pub fn lerp(a: &Self, b: &Self, t: f32) -> BoneAtom {
        let t = t.clamp(0.0, 1.0);
        BoneAtom {
            rotation: a.rotation.slerp(b.rotation, t),
            translation: a.translation.lerp(b.translation, t),
            scale: a.scale + (b.scale - a.scale) * t,
        }
    }
}

/// Animation track for a single bone
#[derive(Clone, Debug)]
pub struct BoneTrack {
    pub bone_index: usize,
    pub keyframes: Vec<TransformKeyframe>,
}

impl BoneTrack {
    /// Create a new empty bone track
    pub fn new(bone_index: usize) -> Self {
        Self {
            bone_index,
            keyframes: Vec::new(),
        }
    }

    /// Add a keyframe to this track (maintains sorted order by time)
    pub fn add_keyframe(&mut self, keyframe: TransformKeyframe) {
        let pos = self
            .keyframes
            .binary_search_by(|k| k.time.total_cmp(&keyframe.time))
            .unwrap_or_else(|e| e);
        self.keyframes.insert(pos, keyframe);
    }

    /// Sample the track at a given time.
    ///
    /// When `looping` is set, time past the last key interpolates back towards
    /// the first key, which is reached again at `length`.
    pub fn sample(&self, time: f32, looping: bool, length: f32) -> Option<BoneAtom> {
        let first = self.keyframes.first()?;
        let last = self.keyframes.last()?;

        if time <= first.time {
            return Some(first.atom());
        }

        if time >= last.time {
            if looping && length > last.time && self.keyframes.len() > 1 {
                let t = (time - last.time) / (length - last.time);
                return Some(TransformKeyframe::lerp(last, first, t));
            }
            return Some(last.atom());
        }

        // First key strictly after `time`; the pair before it brackets the sample
        let next = self.keyframes.partition_point(|k| k.time <= time);
        let current = &self.keyframes[next - 1];
        let next = &self.keyframes[next];
        let duration = next.time - current.time;
        let t = if duration > 0.0 {
            (time - current.time) / duration
        } else {
            0.0
        };
        Some(TransformKeyframe::lerp(current, next, t))
    }

    /// Get the duration of this track (time of last keyframe)
    pub fn duration(&self) -> f32 {
        self.keyframes.last().map(|k| k.time).unwrap_or(0.0)
    }
}

/// A named event placed on a clip's timeline
#[derive(Clone, Debug, PartialEq)]
pub struct AnimNotify {
    pub time: f32,
    pub name: String,
}

/// A complete animation clip containing tracks for multiple bones
#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: String,
    /// Playback length in seconds
    pub length: f32,
    /// Intrinsic playback speed multiplier
    pub rate_scale: f32,
    pub tracks: Vec<BoneTrack>,
    /// Sorted by time
    pub notifies: Vec<AnimNotify>,
}

impl AnimationClip {
    /// Create a new empty animation clip
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: 0.0,
            rate_scale: 1.0,
            tracks: Vec::new(),
            notifies: Vec::new(),
        }
    }

    /// Add a bone track to this animation
    pub fn add_track(&mut self, track: BoneTrack) {
        self.tracks.push(track);
    }

    pub fn add_notify(&mut self, time: f32, name: impl Into<String>) {
        let notify = AnimNotify {
            time,
            name: name.into(),
        };
        let pos = self.notifies.partition_point(|n| n.time <= time);
        self.notifies.insert(pos, notify);
    }

    /// Get a track for a specific bone index
    pub fn get_track(&self, bone_index: usize) -> Option<&BoneTrack> {
        self.tracks.iter().find(|t| t.bone_index == bone_index)
    }

    /// Sample one bone, or None if the clip has no track for it
    pub fn sample_bone(&self, bone_index: usize, time: f32, looping: bool) -> Option<BoneAtom> {
        self.get_track(bone_index)?.sample(time, looping, self.length)
    }

    /// Sample the desired bones into `out`; bones without a track get the reference pose
    pub fn sample_pose(
        &self,
        skeleton: &Skeleton,
        time: f32,
        looping: bool,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) {
        for &bone in desired_bones {
            out[bone] = self
                .sample_bone(bone, time, looping)
                .unwrap_or_else(|| skeleton.ref_pose(bone));
        }
    }

    /// Set the length from the longest track
    pub fn calculate_length(&mut self) {
        self.length = self
            .tracks
            .iter()
            .map(|t| t.duration())
            .fold(0.0f32, |a, b| a.max(b));
    }
}
