//! Events raised while ticking a tree

use super::node::NodeId;

/// Something that happened during a tick, drained by the owner afterwards
#[derive(Clone, Debug, PartialEq)]
pub enum TreeEvent {
    /// Node's total weight rose above zero
    BecameRelevant { node: NodeId },
    /// Node's total weight fell to zero
    CeasedRelevant { node: NodeId },
    /// A clip notify was crossed during playback
    Notify { node: NodeId, name: String, time: f32 },
    /// A non-looping sequence reached an end of its clip and stopped
    AnimEnd {
        node: NodeId,
        played_time: f32,
        excess_time: f32,
    },
}

/// Collects events on behalf of one node
pub struct EventSink<'a> {
    node: NodeId,
    events: &'a mut Vec<TreeEvent>,
}

impl<'a> EventSink<'a> {
    pub fn new(node: NodeId, events: &'a mut Vec<TreeEvent>) -> Self {
        Self { node, events }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn notify(&mut self, name: &str, time: f32) {
        log::trace!("Node {:?} notify '{}' at {:.3}", self.node, name, time);
        self.events.push(TreeEvent::Notify {
            node: self.node,
            name: name.to_string(),
            time,
        });
    }

    pub fn anim_end(&mut self, played_time: f32, excess_time: f32) {
        log::debug!("Node {:?} reached end of clip", self.node);
        self.events.push(TreeEvent::AnimEnd {
            node: self.node,
            played_time,
            excess_time,
        });
    }
}
