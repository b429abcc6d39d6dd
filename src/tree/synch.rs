//! Synchronization groups: phase-locked sequence playback
//!
//! A group elects a synch master (the most weighted eligible member) whose
//! playback drives every other member's relative position, and separately a
//! notify master, the only member allowed to fire notifies.

use crate::animation::bone_atom::ZERO_WEIGHT_THRESHOLD;

use super::event::{EventSink, TreeEvent};
use super::node::{AnimNode, NodeId};

/// Phase of `time` within a clip of `length`, shifted by `offset`, wrapped into [0, 1)
pub fn relative_position(time: f32, length: f32, offset: f32) -> f32 {
    if length <= 0.0 {
        return 0.0;
    }
    wrap_unit(time / length - offset)
}

/// Inverse of [`relative_position`]
pub fn position_from_relative(relative: f32, offset: f32, length: f32) -> f32 {
    wrap_unit(relative + offset) * length
}

fn wrap_unit(value: f32) -> f32 {
    let wrapped = value % 1.0;
    let wrapped = if wrapped < 0.0 { wrapped + 1.0 } else { wrapped };
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}

/// A named set of sequence nodes kept in phase
#[derive(Clone, Debug)]
pub struct SynchGroup {
    pub name: String,
    pub rate_scale: f32,
    pub(crate) members: Vec<NodeId>,
    pub(crate) synch_master: Option<NodeId>,
    pub(crate) notify_master: Option<NodeId>,
}

impl SynchGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rate_scale: 1.0,
            members: Vec::new(),
            synch_master: None,
            notify_master: None,
        }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn synch_master(&self) -> Option<NodeId> {
        self.synch_master
    }

    pub fn notify_master(&self) -> Option<NodeId> {
        self.notify_master
    }

    pub(crate) fn remove_member(&mut self, node: NodeId) {
        self.members.retain(|&m| m != node);
        if self.synch_master == Some(node) {
            self.synch_master = None;
        }
        if self.notify_master == Some(node) {
            self.notify_master = None;
        }
    }

    /// Drop masters that are no longer valid and elect new ones when needed
    pub(crate) fn update_masters(&mut self, nodes: &[AnimNode]) {
        let synch_valid = |id: NodeId| {
            let node = &nodes[id.0];
            node.relevant
                && node
                    .kind
                    .as_phase_advance()
                    .is_some_and(|p| p.can_be_synch_master())
        };
        let notify_valid = |id: NodeId| {
            let node = &nodes[id.0];
            node.relevant
                && node
                    .kind
                    .as_phase_advance()
                    .is_some_and(|p| p.can_be_notify_master())
        };

        self.synch_master = self.synch_master.filter(|&id| synch_valid(id));
        self.notify_master = self.notify_master.filter(|&id| notify_valid(id));

        let saturated = |master: Option<NodeId>| {
            master.is_some_and(|id| nodes[id.0].total_weight >= 1.0 - ZERO_WEIGHT_THRESHOLD)
        };

        if !saturated(self.synch_master) {
            let elected = self.elect(nodes, self.synch_master, &synch_valid);
            if elected != self.synch_master {
                log::debug!("Group '{}' synch master -> {:?}", self.name, elected);
            }
            self.synch_master = elected;
        }
        if !saturated(self.notify_master) {
            self.notify_master = self.elect(nodes, self.notify_master, &notify_valid);
        }
    }

    /// Highest weighted eligible member; the current holder wins ties
    fn elect(
        &self,
        nodes: &[AnimNode],
        current: Option<NodeId>,
        eligible: &dyn Fn(NodeId) -> bool,
    ) -> Option<NodeId> {
        let mut best = current;
        let mut best_weight = current.map(|id| nodes[id.0].total_weight).unwrap_or(0.0);
        for &id in &self.members {
            if !eligible(id) {
                continue;
            }
            let weight = nodes[id.0].total_weight;
            if best.is_none() || weight > best_weight {
                best = Some(id);
                best_weight = weight;
            }
        }
        best
    }

    /// Advance every member for this tick, slaving them to the master's phase
    pub(crate) fn advance(
        &self,
        nodes: &mut [AnimNode],
        global_rate_scale: f32,
        delta_seconds: f32,
        events: &mut Vec<TreeEvent>,
    ) {
        let group_delta = self.rate_scale * global_rate_scale * delta_seconds;

        let Some(master) = self.synch_master else {
            for &id in &self.members {
                self.advance_free(nodes, id, group_delta, delta_seconds, events);
            }
            return;
        };

        let master_move = {
            let fire = self.should_fire(nodes, master);
            let Some(player) = nodes[master.0].kind.as_phase_advance_mut() else {
                return;
            };
            // A stopped master still sets the direction slaves travel in
            let move_delta = group_delta * player.play_rate();
            if player.is_playing() {
                let mut sink = EventSink::new(master, events);
                player.advance_by(move_delta, delta_seconds, fire, &mut sink);
            }
            move_delta
        };

        let master_relative = match nodes[master.0].kind.as_phase_advance() {
            Some(player) => player.relative_position(),
            None => return,
        };

        for &id in &self.members {
            if id == master {
                continue;
            }
            let synchronized = nodes[id.0]
                .kind
                .as_sequence()
                .is_some_and(|s| s.synchronize && s.is_bound());
            if !synchronized {
                self.advance_free(nodes, id, group_delta, delta_seconds, events);
                continue;
            }

            let fire = self.should_fire(nodes, id);
            let Some(player) = nodes[id.0].kind.as_phase_advance_mut() else {
                continue;
            };
            let length = player.sequence_length();
            if length <= 0.0 {
                continue;
            }
            let target = player.position_from_relative(master_relative);
            let mut delta = (target - player.current_time()) % length;
            if delta != 0.0 && master_move != 0.0 && (delta > 0.0) != (master_move > 0.0) {
                delta += if master_move > 0.0 { length } else { -length };
            }
            let mut sink = EventSink::new(id, events);
            player.advance_by(delta, delta_seconds, fire, &mut sink);
        }
    }

    fn advance_free(
        &self,
        nodes: &mut [AnimNode],
        id: NodeId,
        group_delta: f32,
        delta_seconds: f32,
        events: &mut Vec<TreeEvent>,
    ) {
        let fire = self.should_fire(nodes, id);
        if let Some(player) = nodes[id.0].kind.as_phase_advance_mut() {
            if player.is_playing() {
                let move_delta = group_delta * player.play_rate();
                let mut sink = EventSink::new(id, events);
                player.advance_by(move_delta, delta_seconds, fire, &mut sink);
            }
        }
    }

    fn should_fire(&self, nodes: &[AnimNode], id: NodeId) -> bool {
        self.notify_master == Some(id) && nodes[id.0].can_fire_notifies()
    }
}
