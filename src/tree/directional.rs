//! Four-way directional blend driven by the actor's movement direction

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::animation::bone_atom::KINDA_SMALL_NUMBER;
use crate::animation::component::ActorState;
use glam::Vec3;

use super::node::ChildLink;

/// Signed shortest rotation from `from` to `to`, in (-PI, PI]
pub fn find_delta_angle(from: f32, to: f32) -> f32 {
    let mut delta = to - from;
    if delta > PI {
        delta -= 2.0 * PI;
    } else if delta < -PI {
        delta += 2.0 * PI;
    }
    delta
}

/// Wrap an angle into [-PI, PI]
pub fn unwind_heading(mut angle: f32) -> f32 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Children are forward, backward, left and right, in that order.
#[derive(Clone, Debug)]
pub struct BlendDirectional {
    pub children: Vec<ChildLink>,
    /// Current movement angle relative to facing; negative is to the left
    pub dir_angle: f32,
    /// Turn rate limit; 0 or less snaps straight to the movement direction
    pub dir_degrees_per_second: f32,
    /// At or above this LOD only the single closest child plays
    pub single_anim_at_or_above_lod: u32,
}

impl Default for BlendDirectional {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            dir_angle: 0.0,
            dir_degrees_per_second: 360.0,
            single_anim_at_or_above_lod: 10,
        }
    }
}

impl BlendDirectional {
    pub fn new() -> Self {
        Self::default()
    }

    /// Angle of horizontal movement relative to the actor's facing.
    ///
    /// The actor faces +X with +Z up, so +Y is to its left.
    pub fn target_angle(actor: &ActorState) -> f32 {
        let velocity = Vec3::new(actor.velocity.x, actor.velocity.y, 0.0);
        if velocity.length_squared() < KINDA_SMALL_NUMBER {
            return 0.0;
        }
        let move_dir = velocity.normalize();
        let look = actor.look_dir();
        let look = Vec3::new(look.x, look.y, 0.0).normalize_or_zero();
        let left = Vec3::Z.cross(look);

        let forward_pct = look.dot(move_dir).clamp(-1.0, 1.0);
        let left_pct = left.dot(move_dir);
        let angle = forward_pct.acos();
        if left_pct > 0.0 { -angle } else { angle }
    }

    pub(crate) fn tick(&mut self, delta_seconds: f32, actor: &ActorState, lod: u32) {
        if self.children.len() < 4 {
            return;
        }

        let target = Self::target_angle(actor);
        let delta = find_delta_angle(self.dir_angle, target);
        let delta = if self.dir_degrees_per_second > 0.0 {
            let max_delta = (delta_seconds * self.dir_degrees_per_second).to_radians();
            delta.clamp(-max_delta, max_delta)
        } else {
            delta
        };
        self.dir_angle = unwind_heading(self.dir_angle + delta);

        let weights = if lod >= self.single_anim_at_or_above_lod {
            Self::single_weights(self.dir_angle)
        } else {
            Self::blend_weights(self.dir_angle)
        };
        for (link, weight) in self.children.iter_mut().zip(weights) {
            link.weight = weight;
        }
        for link in self.children.iter_mut().skip(4) {
            link.weight = 0.0;
        }
    }

    /// Weights of (forward, backward, left, right) for an angle in [-PI, PI]
    pub fn blend_weights(angle: f32) -> [f32; 4] {
        let mut weights = [0.0; 4];
        if angle < -FRAC_PI_2 {
            weights[2] = angle / FRAC_PI_2 + 2.0;
            weights[1] = 1.0 - weights[2];
        } else if angle < 0.0 {
            weights[2] = -angle / FRAC_PI_2;
            weights[0] = 1.0 - weights[2];
        } else if angle < FRAC_PI_2 {
            weights[3] = angle / FRAC_PI_2;
            weights[0] = 1.0 - weights[3];
        } else {
            weights[3] = -angle / FRAC_PI_2 + 2.0;
            weights[1] = 1.0 - weights[3];
        }
        weights
    }

    /// One-hot weights picking the closest direction
    pub fn single_weights(angle: f32) -> [f32; 4] {
        let index = if angle < -3.0 * FRAC_PI_4 {
            1
        } else if angle < -FRAC_PI_4 {
            2
        } else if angle < FRAC_PI_4 {
            0
        } else if angle < 3.0 * FRAC_PI_4 {
            3
        } else {
            1
        };
        let mut weights = [0.0; 4];
        weights[index] = 1.0;
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn create_node() -> BlendDirectional {
        let mut node = BlendDirectional::new();
        for name in ["forward", "backward", "left", "right"] {
            node.children.push(ChildLink::new(name, None));
        }
        node.dir_degrees_per_second = 0.0;
        node
    }

    fn moving(velocity: Vec3) -> ActorState {
        ActorState {
            velocity,
            ..Default::default()
        }
    }

    fn weights(node: &BlendDirectional) -> Vec<f32> {
        node.children.iter().map(|c| c.weight).collect()
    }

    #[test]
    fn test_target_angle_quadrants() {
        assert_eq!(BlendDirectional::target_angle(&moving(Vec3::X)), 0.0);
        assert!((BlendDirectional::target_angle(&moving(Vec3::Y)) + FRAC_PI_2).abs() < 1e-5);
        assert!((BlendDirectional::target_angle(&moving(-Vec3::Y)) - FRAC_PI_2).abs() < 1e-5);
        assert!((BlendDirectional::target_angle(&moving(-Vec3::X)).abs() - PI).abs() < 1e-3);
        assert_eq!(BlendDirectional::target_angle(&moving(Vec3::ZERO)), 0.0);
    }

    #[test]
    fn test_target_angle_follows_facing() {
        let actor = ActorState {
            velocity: Vec3::Y,
            rotation: Quat::from_rotation_z(FRAC_PI_2),
            ..Default::default()
        };
        assert!(BlendDirectional::target_angle(&actor).abs() < 1e-5);
    }

    #[test]
    fn test_strafe_left_weights() {
        let mut node = create_node();
        node.tick(0.1, &moving(Vec3::Y * 3.0), 0);
        let w = weights(&node);
        assert!((w[2] - 1.0).abs() < 1e-5);
        assert!(w[0].abs() < 1e-5);
    }

    #[test]
    fn test_diagonal_splits_weights() {
        let w = BlendDirectional::blend_weights(FRAC_PI_4);
        assert!((w[0] - 0.5).abs() < 1e-6);
        assert!((w[3] - 0.5).abs() < 1e-6);

        let w = BlendDirectional::blend_weights(-3.0 * FRAC_PI_4);
        assert!((w[1] - 0.5).abs() < 1e-6);
        assert!((w[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_weights_sum_to_one_everywhere() {
        for step in 0..=64 {
            let angle = -PI + step as f32 * (2.0 * PI / 64.0);
            let sum: f32 = BlendDirectional::blend_weights(angle).iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "angle {}", angle);
            assert!(BlendDirectional::blend_weights(angle).iter().all(|&w| w >= -1e-6));
        }
    }

    #[test]
    fn test_turn_rate_limited() {
        let mut node = create_node();
        node.dir_degrees_per_second = 90.0;
        node.tick(0.5, &moving(-Vec3::Y), 0);
        assert!((node.dir_angle - FRAC_PI_4).abs() < 1e-5);
        node.tick(0.5, &moving(-Vec3::Y), 0);
        assert!((node.dir_angle - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_high_lod_picks_single_child() {
        let mut node = create_node();
        node.single_anim_at_or_above_lod = 2;
        node.tick(0.1, &moving(Vec3::new(1.0, -1.5, 0.0)), 2);
        assert_eq!(weights(&node), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_delta_angle_takes_short_way() {
        let delta = find_delta_angle(3.0, -3.0);
        assert!((delta - (2.0 * PI - 6.0)).abs() < 1e-5);
        assert!((unwind_heading(2.5 * PI) - FRAC_PI_2).abs() < 1e-5);
        assert!((unwind_heading(-1.5 * PI) - FRAC_PI_2).abs() < 1e-5);
    }
}
