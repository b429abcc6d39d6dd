//! Sequence player leaf: clip playback, notifies and root motion extraction

use std::sync::Arc;

use crate::animation::bone_atom::{BoneAtom, KINDA_SMALL_NUMBER, RootMotion};
use crate::animation::clip::AnimationClip;
use crate::animation::component::MeshComponent;
use crate::animation::skeleton::Skeleton;

use super::event::EventSink;

/// Playback that can be driven by a synchronization group.
///
/// Positions are in seconds; relative positions are a phase in [0, 1) shifted by
/// the node's phase offset, which is how slaves line up with their master.
pub trait PhaseAdvance {
    fn current_time(&self) -> f32;

    /// Length of the bound clip, 0 when unbound
    fn sequence_length(&self) -> f32;

    /// Node rate multiplied by the clip's intrinsic rate
    fn play_rate(&self) -> f32;

    fn is_playing(&self) -> bool;

    fn phase_offset(&self) -> f32;

    fn can_be_synch_master(&self) -> bool;

    fn can_be_notify_master(&self) -> bool;

    /// Move playback by `move_delta` seconds of clip time over `delta_seconds` of real time
    fn advance_by(
        &mut self,
        move_delta: f32,
        delta_seconds: f32,
        fire_notifies: bool,
        sink: &mut EventSink<'_>,
    );

    fn set_position(&mut self, new_time: f32, fire_notifies: bool, sink: &mut EventSink<'_>);

    fn relative_position(&self) -> f32 {
        super::synch::relative_position(
            self.current_time(),
            self.sequence_length(),
            self.phase_offset(),
        )
    }

    fn position_from_relative(&self, relative: f32) -> f32 {
        super::synch::position_from_relative(relative, self.phase_offset(), self.sequence_length())
    }
}

/// Leaf node playing a single clip
#[derive(Clone, Debug)]
pub struct SequencePlayer {
    pub anim_name: Option<String>,
    clip: Option<Arc<AnimationClip>>,
    pub rate: f32,
    pub playing: bool,
    pub looping: bool,
    pub current_time: f32,
    pub previous_time: f32,
    pub no_notifies: bool,
    pub notify_weight_threshold: f32,
    pub synch_group: Option<String>,
    /// Phase offset within the synch group, in [0, 1)
    pub synch_pos_offset: f32,
    pub force_always_slave: bool,
    /// Follow the group master; false keeps the node in the group but free running
    pub synchronize: bool,
    /// Move root bone motion out of the pose and report it as a delta instead
    pub extract_root_motion: bool,
    pub zero_root_rotation: bool,
    pub zero_root_translation: bool,
    pub(crate) group_bound: bool,
}

impl SequencePlayer {
    pub fn new(anim_name: Option<&str>) -> Self {
        Self {
            anim_name: anim_name.map(str::to_string),
            clip: None,
            rate: 1.0,
            playing: false,
            looping: false,
            current_time: 0.0,
            previous_time: 0.0,
            no_notifies: false,
            notify_weight_threshold: 0.0,
            synch_group: None,
            synch_pos_offset: 0.0,
            force_always_slave: false,
            synchronize: true,
            extract_root_motion: false,
            zero_root_rotation: false,
            zero_root_translation: false,
            group_bound: false,
        }
    }

    pub fn clip(&self) -> Option<&Arc<AnimationClip>> {
        self.clip.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.clip.is_some()
    }

    pub fn is_in_group(&self) -> bool {
        self.group_bound
    }

    /// Resolve the named clip against a mesh; an unknown name leaves the node unbound
    pub fn bind(&mut self, mesh: &MeshComponent) {
        self.clip = self.anim_name.as_deref().and_then(|name| {
            let clip = mesh.find_clip(name);
            if clip.is_none() {
                log::warn!("Sequence clip '{}' not found on mesh", name);
            }
            clip
        });
        if let Some(clip) = &self.clip {
            self.current_time = self.current_time.clamp(0.0, clip.length);
            self.previous_time = self.current_time;
        }
    }

    /// Switch to another clip; playback restarts from the beginning
    pub fn set_anim(&mut self, anim_name: Option<&str>, mesh: &MeshComponent) {
        self.anim_name = anim_name.map(str::to_string);
        self.current_time = 0.0;
        self.previous_time = 0.0;
        self.bind(mesh);
    }

    pub fn play(&mut self, looping: bool, rate: f32, start_time: f32, sink: &mut EventSink<'_>) {
        self.set_position(start_time, false, sink);
        self.looping = looping;
        self.rate = rate;
        self.playing = true;
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Position as a fraction of the clip length, 0 when unbound
    pub fn normalized_position(&self) -> f32 {
        let length = self.sequence_length();
        if length > 0.0 { self.current_time / length } else { 0.0 }
    }

    /// Clip seconds advanced per real second
    pub fn global_play_rate(&self, global_rate_scale: f32) -> f32 {
        self.play_rate() * global_rate_scale
    }

    /// Real seconds until a non-looping sequence reaches its end at the current rate
    pub fn time_left(&self, global_rate_scale: f32) -> f32 {
        let rate = self.global_play_rate(global_rate_scale);
        if rate > 0.0 {
            (self.sequence_length() - self.current_time) / rate
        } else if rate < 0.0 {
            self.current_time / -rate
        } else {
            0.0
        }
    }

    /// Advance an ungrouped sequence by its own rate
    pub(crate) fn tick(
        &mut self,
        delta_seconds: f32,
        global_rate_scale: f32,
        fire_notifies: bool,
        sink: &mut EventSink<'_>,
    ) {
        self.previous_time = self.current_time;
        if self.group_bound || !self.playing {
            return;
        }
        let move_delta = self.play_rate() * global_rate_scale * delta_seconds;
        self.advance_by(move_delta, delta_seconds, fire_notifies, sink);
    }

    /// Fire every notify in (current_time, current_time + delta], wrapping when looping
    fn issue_notifies(&self, clip: &AnimationClip, delta: f32, sink: &mut EventSink<'_>) {
        if clip.notifies.is_empty() {
            return;
        }
        let count = clip.notifies.len();
        let mut index = clip.notifies.partition_point(|n| n.time <= self.current_time);
        let mut work_time = self.current_time;
        let mut remaining = delta;

        loop {
            if index >= count {
                if !self.looping || clip.length <= 0.0 {
                    break;
                }
                remaining -= clip.length - work_time;
                if remaining < 0.0 {
                    break;
                }
                work_time = 0.0;
                index = 0;
            }

            let notify = &clip.notifies[index];
            let gap = notify.time - work_time;
            if gap > remaining {
                break;
            }
            sink.notify(&notify.name, notify.time);
            remaining -= gap;
            work_time = notify.time;
            index += 1;
        }
    }

    /// Sample the clip into `out` and report root motion for this frame
    pub fn evaluate_pose(
        &self,
        skeleton: &Skeleton,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let Some(clip) = &self.clip else {
            skeleton.fill_ref_pose(desired_bones, out);
            return RootMotion::NONE;
        };

        clip.sample_pose(skeleton, self.current_time, self.looping, desired_bones, out);
        if out.is_empty() {
            return RootMotion::NONE;
        }

        let ref_root = skeleton.ref_pose(0);
        let mut root_motion = RootMotion::NONE;
        if self.extract_root_motion {
            root_motion = RootMotion::new(self.root_delta(clip, ref_root));
            out[0].translation = ref_root.translation;
            out[0].rotation = ref_root.rotation;
        }
        if self.zero_root_rotation {
            out[0].rotation = ref_root.rotation;
        }
        if self.zero_root_translation {
            out[0].translation = ref_root.translation;
        }
        root_motion
    }

    /// Root bone movement between the previous and current time, across a loop seam if needed
    fn root_delta(&self, clip: &AnimationClip, ref_root: BoneAtom) -> BoneAtom {
        let sample = |time: f32| clip.sample_bone(0, time, self.looping).unwrap_or(ref_root);
        let between = |from: f32, to: f32| atom_delta(&sample(from), &sample(to));
        let forward = self.play_rate() >= 0.0;
        let (prev, cur) = (self.previous_time, self.current_time);

        if self.looping && forward && cur < prev {
            chain_delta(&between(prev, clip.length), &between(0.0, cur))
        } else if self.looping && !forward && cur > prev {
            chain_delta(&between(prev, 0.0), &between(clip.length, cur))
        } else {
            between(prev, cur)
        }
    }
}

fn atom_delta(from: &BoneAtom, to: &BoneAtom) -> BoneAtom {
    BoneAtom {
        rotation: (to.rotation * from.rotation.inverse()).normalize(),
        translation: to.translation - from.translation,
        scale: 1.0,
    }
}

fn chain_delta(first: &BoneAtom, second: &BoneAtom) -> BoneAtom {
    BoneAtom {
        rotation: (second.rotation * first.rotation).normalize(),
        translation: first.translation + second.translation,
        scale: 1.0,
    }
}

impl PhaseAdvance for SequencePlayer {
    fn current_time(&self) -> f32 {
        self.current_time
    }

    fn sequence_length(&self) -> f32 {
        self.clip.as_ref().map(|c| c.length).unwrap_or(0.0)
    }

    fn play_rate(&self) -> f32 {
        self.rate * self.clip.as_ref().map(|c| c.rate_scale).unwrap_or(1.0)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn phase_offset(&self) -> f32 {
        self.synch_pos_offset
    }

    fn can_be_synch_master(&self) -> bool {
        self.is_bound() && self.synchronize && !self.force_always_slave
    }

    fn can_be_notify_master(&self) -> bool {
        self.is_bound() && !self.no_notifies
    }

    fn advance_by(
        &mut self,
        move_delta: f32,
        delta_seconds: f32,
        fire_notifies: bool,
        sink: &mut EventSink<'_>,
    ) {
        let Some(clip) = self.clip.clone() else {
            return;
        };
        if move_delta == 0.0 || delta_seconds == 0.0 {
            return;
        }

        if fire_notifies && move_delta > 0.0 && !self.no_notifies {
            self.issue_notifies(&clip, move_delta, sink);
        }

        let length = clip.length;
        self.current_time += move_delta;

        if self.looping {
            if length > 0.0 {
                self.current_time %= length;
                if self.current_time < 0.0 {
                    self.current_time += length;
                }
            } else {
                self.current_time = 0.0;
            }
            return;
        }

        let past_end = self.current_time >= length;
        let before_start = self.current_time <= 0.0;
        if past_end || before_start {
            let overshoot = if past_end {
                self.current_time - length
            } else {
                -self.current_time
            };
            let rate = self.play_rate().abs();
            let excess_time = if rate > 0.0 { overshoot / rate } else { 0.0 };
            let played_time = delta_seconds - excess_time;

            self.current_time = self.current_time.clamp(0.0, length);
            self.playing = false;
            sink.anim_end(played_time, excess_time);
        }
    }

    fn set_position(&mut self, new_time: f32, fire_notifies: bool, sink: &mut EventSink<'_>) {
        let length = self.sequence_length();
        let new_time = new_time.clamp(0.0, length + KINDA_SMALL_NUMBER);

        if fire_notifies && !self.no_notifies {
            let delta = new_time - self.current_time;
            if delta > 0.0 {
                if let Some(clip) = self.clip.clone() {
                    self.issue_notifies(&clip, delta, sink);
                }
            }
        }

        self.current_time = new_time;
        if !fire_notifies {
            self.previous_time = self.current_time;
        }
    }
}
