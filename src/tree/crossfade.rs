//! Two-child timed crossfade

use crate::animation::bone_atom::KINDA_SMALL_NUMBER;
use serde::{Deserialize, Serialize};

use super::node::ChildLink;

/// A weight moving linearly toward a target over a fixed time
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightFade {
    pub weight: f32,
    pub target: f32,
    pub time_to_go: f32,
}

impl WeightFade {
    pub fn new(weight: f32) -> Self {
        let weight = weight.clamp(0.0, 1.0);
        Self {
            weight,
            target: weight,
            time_to_go: 0.0,
        }
    }

    /// Head for `target` over `blend_time` seconds; a non-positive time snaps
    pub fn set_target(&mut self, target: f32, blend_time: f32) {
        self.target = target.clamp(0.0, 1.0);
        if blend_time <= 0.0 {
            self.weight = self.target;
            self.time_to_go = 0.0;
        } else {
            self.time_to_go = blend_time;
        }
    }

    pub fn advance(&mut self, delta_seconds: f32) {
        let delta = self.target - self.weight;
        if delta.abs() > KINDA_SMALL_NUMBER && self.time_to_go > delta_seconds {
            self.weight += delta / self.time_to_go * delta_seconds;
            self.time_to_go -= delta_seconds;
        } else {
            self.weight = self.target;
            self.time_to_go = 0.0;
        }
    }

    pub fn is_blending(&self) -> bool {
        self.time_to_go > 0.0
    }
}

/// Crossfades from its first child to its second.
///
/// The second child's weight follows a [`WeightFade`]; the first takes the rest.
#[derive(Clone, Debug, Default)]
pub struct Crossfade {
    pub children: Vec<ChildLink>,
    pub fade: WeightFade,
}

impl Crossfade {
    pub fn new(child2_weight: f32) -> Self {
        Self {
            children: Vec::new(),
            fade: WeightFade::new(child2_weight),
        }
    }

    pub fn child2_weight(&self) -> f32 {
        self.fade.weight
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::NodeId;

    fn create_crossfade() -> Crossfade {
        let mut fade = Crossfade::new(0.0);
        fade.children.push(ChildLink::new("a", Some(NodeId(1))));
        fade.children.push(ChildLink::new("b", Some(NodeId(2))));
        fade.tick(0.0);
        fade
    }

    #[test]
    fn test_crossfade_over_two_seconds() {
        let mut fade = create_crossfade();
        fade.set_blend_target(1.0, 2.0);

        fade.tick(1.0);
        assert!((fade.child2_weight() - 0.5).abs() < 1e-6);
        assert!((fade.children[0].weight - 0.5).abs() < 1e-6);

        fade.tick(1.0);
        assert_eq!(fade.child2_weight(), 1.0);
        assert_eq!(fade.children[0].weight, 0.0);
        assert_eq!(fade.children[1].weight, 1.0);
    }

    #[test]
    fn test_zero_time_snaps() {
        let mut fade = create_crossfade();
        fade.set_blend_target(0.7, 0.0);
        assert_eq!(fade.child2_weight(), 0.7);
        assert!((fade.children[0].weight - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_target_clamped() {
        let mut fade = WeightFade::new(0.0);
        fade.set_target(3.0, 0.0);
        assert_eq!(fade.weight, 1.0);
        fade.set_target(-1.0, 0.5);
        assert_eq!(fade.target, 0.0);
        assert!(fade.is_blending());
    }

    #[test]
    fn test_weights_always_sum_to_one() {
        let mut fade = create_crossfade();
        fade.set_blend_target(1.0, 0.7);
        for _ in 0..10 {
            fade.tick(0.1);
            let sum: f32 = fade.children.iter().map(|c| c.weight).sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert_eq!(fade.child2_weight(), 1.0);
    }
}
