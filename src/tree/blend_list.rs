//! Blend lists: one active child at a time, with timed transitions

use crate::animation::bone_atom::ZERO_WEIGHT_THRESHOLD;
use crate::animation::component::ActorState;

use super::node::ChildLink;

/// Blends toward a single active child over a transition time
#[derive(Clone, Debug, Default)]
pub struct BlendList {
    pub children: Vec<ChildLink>,
    pub target_weights: Vec<f32>,
    pub active_child: usize,
    pub blend_time_to_go: f32,
    /// Restart the newly activated child's sequence from the beginning
    pub play_active_child: bool,
}

impl BlendList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_children_changed(&mut self) {
        let count = self.children.len();
        self.target_weights.resize(count, 0.0);
        if count > 0 && self.target_weights.iter().all(|&w| w <= ZERO_WEIGHT_THRESHOLD) {
            self.target_weights[0] = 1.0;
        }
        if self.active_child >= count {
            self.active_child = 0;
        }
    }

    /// Make sure some child carries weight once the list is bound
    pub(crate) fn init(&mut self) {
        self.on_children_changed();
        let all_zero = self
            .children
            .iter()
            .all(|c| c.weight <= ZERO_WEIGHT_THRESHOLD);
        if !self.children.is_empty() && all_zero {
            self.set_active_child(self.active_child, 0.0);
        }
    }

    /// Start a transition to `index`, returning the child actually activated.
    ///
    /// Out of range indices fall back to child 0. A child that already carries
    /// weight needs proportionally less time to finish.
    pub fn set_active_child(&mut self, index: usize, blend_time: f32) -> usize {
        if self.children.is_empty() {
            return 0;
        }
        let index = if index >= self.children.len() {
            log::warn!(
                "Blend list child index {} out of range ({} children), using 0",
                index,
                self.children.len()
            );
            0
        } else {
            index
        };

        self.target_weights.resize(self.children.len(), 0.0);
        for (i, target) in self.target_weights.iter_mut().enumerate() {
            *target = if i == index { 1.0 } else { 0.0 };
        }

        let remaining = 1.0 - self.children[index].weight.clamp(0.0, 1.0);
        let blend_time = blend_time.max(0.0) * remaining;
        if blend_time <= 0.0 {
            for (link, &target) in self.children.iter_mut().zip(&self.target_weights) {
                link.weight = target;
            }
        }

        self.blend_time_to_go = blend_time;
        self.active_child = index;
        index
    }

    pub(crate) fn tick(&mut self, delta_seconds: f32) {
        if self.children.is_empty() {
            return;
        }
        self.target_weights.resize(self.children.len(), 0.0);

        if self.blend_time_to_go <= delta_seconds {
            for (link, &target) in self.children.iter_mut().zip(&self.target_weights) {
                link.weight = target;
            }
            self.blend_time_to_go = 0.0;
        } else {
            let step = delta_seconds / self.blend_time_to_go;
            for (link, &target) in self.children.iter_mut().zip(&self.target_weights) {
                link.weight += (target - link.weight) * step;
            }
            self.blend_time_to_go -= delta_seconds;
        }
    }
}

/// Blend list whose active child is picked from the actor's speed
#[derive(Clone, Debug)]
pub struct BlendBySpeed {
    pub list: BlendList,
    /// Upper speed bound per child, ascending; needs at least one entry per child
    pub constraints: Vec<f32>,
    pub blend_up_time: f32,
    pub blend_down_time: f32,
    /// Drop a channel while the speed sits within this fraction of the bracket's bottom
    pub blend_down_perc: f32,
    /// Drive from acceleration magnitude instead of velocity
    pub use_acceleration: bool,
    pub speed: f32,
    last_channel: Option<usize>,
    warned: bool,
}

impl BlendBySpeed {
    pub fn new(constraints: Vec<f32>) -> Self {
        Self {
            list: BlendList::new(),
            constraints,
            blend_up_time: 0.1,
            blend_down_time: 0.1,
            blend_down_perc: 0.0,
            use_acceleration: false,
            speed: 0.0,
            last_channel: Some(0),
            warned: false,
        }
    }

    /// Whether there are enough children and constraints to pick a channel
    pub fn is_configured(&self) -> bool {
        let children = self.list.children.len();
        children >= 2 && self.constraints.len() >= children
    }

    /// Channel for `speed`: the first child whose upper bound covers it, stepped
    /// down one while the speed is still in the bottom `blend_down_perc` of its bracket
    pub fn target_channel(&self, speed: f32) -> usize {
        let count = self.list.children.len().min(self.constraints.len());
        if count == 0 {
            return 0;
        }
        let mut channel = 0;
        while channel + 1 < count && speed > self.constraints[channel] {
            channel += 1;
        }

        if channel > 0 {
            let lower = self.constraints[channel - 1];
            let width = self.constraints[channel] - lower;
            if width > 0.0 && (speed - lower) / width <= self.blend_down_perc {
                channel -= 1;
            }
        }
        channel
    }

    /// Forget the last channel so the next tick always activates one
    pub(crate) fn reset(&mut self) {
        self.last_channel = None;
    }

    /// Returns the child activated this tick, if the channel changed
    pub(crate) fn tick(&mut self, delta_seconds: f32, actor: &ActorState) -> Option<usize> {
        let mut activated = None;
        if self.is_configured() {
            self.speed = if self.use_acceleration {
                actor.acceleration.length()
            } else {
                actor.velocity.length()
            };

            let target = self.target_channel(self.speed);
            if self.last_channel != Some(target) {
                let blend_time = match self.last_channel {
                    Some(last) if target < last => self.blend_down_time,
                    _ => self.blend_up_time,
                };
                log::trace!("Blend by speed {:.2} -> channel {}", self.speed, target);
                activated = Some(self.list.set_active_child(target, blend_time));
                self.last_channel = Some(target);
            }
        } else if !self.warned {
            log::warn!(
                "Blend by speed needs at least two children and one constraint per child ({} children, {} constraints)",
                self.list.children.len(),
                self.constraints.len()
            );
            self.warned = true;
        }

        self.list.tick(delta_seconds);
        activated
    }
}
