//! Blend tree node types
//!
//! Core types for the tree arena: node IDs, child links, the per-node bookkeeping
//! shared by every node, and the closed set of node kinds.

use crate::animation::bone_atom::{BoneAtom, RootMotion, ZERO_WEIGHT_THRESHOLD};

use super::aim_offset::AimOffset;
use super::blend::Blend;
use super::blend_list::{BlendBySpeed, BlendList};
use super::crossfade::Crossfade;
use super::directional::BlendDirectional;
use super::mirror::MirrorNode;
use super::multi_bone::BlendMultiBone;
use super::per_bone::BlendPerBone;
use super::sequence::{PhaseAdvance, SequencePlayer};

/// Index of a node in its tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A parent's slot for one child. Empty slots evaluate to the reference pose.
#[derive(Clone, Debug)]
pub struct ChildLink {
    pub name: String,
    pub node: Option<NodeId>,
    /// Local blend weight, written by the owning node's tick
    pub weight: f32,
    /// Weight this link contributed to the child's total weight last tick
    pub total_weight: f32,
    /// Evaluate the child through the mesh's mirror table
    pub mirror: bool,
}

impl ChildLink {
    pub fn new(name: impl Into<String>, node: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            node,
            weight: 0.0,
            total_weight: 0.0,
            mirror: false,
        }
    }
}

/// Evaluated pose kept for nodes shared by several parents.
#[derive(Clone, Debug, Default)]
pub(crate) struct PoseCache {
    pub frame_tag: u64,
    pub bones_hash: u64,
    pub atoms: Vec<BoneAtom>,
    pub root_motion: RootMotion,
}

/// A node in the blend tree arena
#[derive(Clone, Debug)]
pub struct AnimNode {
    pub name: Option<String>,
    pub kind: NodeKind,
    /// Skip ticking this node while it has no influence on the final pose
    pub skip_tick_when_zero_weight: bool,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) total_weight_accumulator: f32,
    pub(crate) total_weight: f32,
    pub(crate) relevant: bool,
    pub(crate) just_became_relevant: bool,
    pub(crate) visit_tag: u64,
    pub(crate) search_tag: u64,
    pub(crate) cache: PoseCache,
}

impl AnimNode {
    pub fn new(kind: impl Into<NodeKind>) -> Self {
        Self {
            name: None,
            kind: kind.into(),
            skip_tick_when_zero_weight: false,
            parents: Vec::new(),
            total_weight_accumulator: 0.0,
            total_weight: 0.0,
            relevant: false,
            just_became_relevant: false,
            visit_tag: 0,
            search_tag: 0,
            cache: PoseCache::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_skip_tick_when_zero_weight(mut self, skip: bool) -> Self {
        self.skip_tick_when_zero_weight = skip;
        self
    }

    /// Nodes that link to this one, one entry per link
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Influence on the final pose as of the last tick, in [0, 1]
    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant
    }

    pub fn just_became_relevant(&self) -> bool {
        self.just_became_relevant
    }

    pub fn children(&self) -> &[ChildLink] {
        self.kind.children()
    }

    /// Whether a sequence node may fire notifies this tick
    pub(crate) fn can_fire_notifies(&self) -> bool {
        match &self.kind {
            NodeKind::Sequence(seq) => {
                (seq.group_bound && self.relevant)
                    || self.total_weight >= seq.notify_weight_threshold.max(ZERO_WEIGHT_THRESHOLD)
            }
            _ => false,
        }
    }
}

/// Every kind of node a tree can hold
#[derive(Clone, Debug)]
pub enum NodeKind {
    Sequence(SequencePlayer),
    Blend(Blend),
    Crossfade(Crossfade),
    BlendList(BlendList),
    BlendBySpeed(BlendBySpeed),
    PerBone(BlendPerBone),
    MultiBone(BlendMultiBone),
    Directional(BlendDirectional),
    AimOffset(AimOffset),
    Mirror(MirrorNode),
}

macro_rules! impl_from_kind {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for NodeKind {
                fn from(node: $ty) -> Self {
                    NodeKind::$variant(node)
                }
            }
        )*
    };
}

impl_from_kind!(
    Sequence(SequencePlayer),
    Blend(Blend),
    Crossfade(Crossfade),
    BlendList(BlendList),
    BlendBySpeed(BlendBySpeed),
    PerBone(BlendPerBone),
    MultiBone(BlendMultiBone),
    Directional(BlendDirectional),
    AimOffset(AimOffset),
    Mirror(MirrorNode),
);

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Sequence(_) => "sequence",
            NodeKind::Blend(_) => "blend",
            NodeKind::Crossfade(_) => "crossfade",
            NodeKind::BlendList(_) => "blend_list",
            NodeKind::BlendBySpeed(_) => "blend_by_speed",
            NodeKind::PerBone(_) => "per_bone",
            NodeKind::MultiBone(_) => "multi_bone",
            NodeKind::Directional(_) => "directional",
            NodeKind::AimOffset(_) => "aim_offset",
            NodeKind::Mirror(_) => "mirror",
        }
    }

    pub fn children(&self) -> &[ChildLink] {
        match self {
            NodeKind::Sequence(_) => &[],
            NodeKind::Blend(n) => &n.children,
            NodeKind::Crossfade(n) => &n.children,
            NodeKind::BlendList(n) => &n.children,
            NodeKind::BlendBySpeed(n) => &n.list.children,
            NodeKind::PerBone(n) => &n.children,
            NodeKind::MultiBone(n) => &n.children,
            NodeKind::Directional(n) => &n.children,
            NodeKind::AimOffset(n) => &n.children,
            NodeKind::Mirror(n) => &n.children,
        }
    }

    /// None for leaves
    pub fn children_mut(&mut self) -> Option<&mut Vec<ChildLink>> {
        match self {
            NodeKind::Sequence(_) => None,
            NodeKind::Blend(n) => Some(&mut n.children),
            NodeKind::Crossfade(n) => Some(&mut n.children),
            NodeKind::BlendList(n) => Some(&mut n.children),
            NodeKind::BlendBySpeed(n) => Some(&mut n.list.children),
            NodeKind::PerBone(n) => Some(&mut n.children),
            NodeKind::MultiBone(n) => Some(&mut n.children),
            NodeKind::Directional(n) => Some(&mut n.children),
            NodeKind::AimOffset(n) => Some(&mut n.children),
            NodeKind::Mirror(n) => Some(&mut n.children),
        }
    }

    /// Maximum number of children this kind accepts, if bounded
    pub fn max_children(&self) -> Option<usize> {
        match self {
            NodeKind::Sequence(_) => Some(0),
            NodeKind::Crossfade(_) | NodeKind::PerBone(_) => Some(2),
            NodeKind::Directional(_) => Some(4),
            NodeKind::AimOffset(_) | NodeKind::Mirror(_) => Some(1),
            _ => None,
        }
    }

    /// Keep per-child side tables in step with the child list
    pub(crate) fn on_children_changed(&mut self) {
        match self {
            NodeKind::BlendList(n) => n.on_children_changed(),
            NodeKind::BlendBySpeed(n) => n.list.on_children_changed(),
            NodeKind::MultiBone(n) => n.on_children_changed(),
            NodeKind::Crossfade(n) => n.apply_weights(),
            NodeKind::PerBone(n) => n.apply_weights(),
            NodeKind::AimOffset(n) => n.children.iter_mut().for_each(|link| link.weight = 1.0),
            NodeKind::Mirror(n) => n.children.iter_mut().for_each(|link| link.weight = 1.0),
            _ => {}
        }
    }

    /// Total weight each child link passes down, given this node's own total.
    ///
    /// Per-bone and multi-bone blends always pass their full weight to the base
    /// child, since some bones may take the base pose exclusively.
    pub(crate) fn child_total_weights(&self, total_weight: f32) -> Vec<f32> {
        let full_base = matches!(self, NodeKind::PerBone(_) | NodeKind::MultiBone(_));
        self.children()
            .iter()
            .enumerate()
            .map(|(i, link)| {
                if full_base && i == 0 {
                    total_weight
                } else {
                    total_weight * link.weight
                }
            })
            .collect()
    }

    pub fn as_sequence(&self) -> Option<&SequencePlayer> {
        match self {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_sequence_mut(&mut self) -> Option<&mut SequencePlayer> {
        match self {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_phase_advance(&self) -> Option<&dyn PhaseAdvance> {
        match self {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    pub fn as_phase_advance_mut(&mut self) -> Option<&mut dyn PhaseAdvance> {
        match self {
            NodeKind::Sequence(seq) => Some(seq),
            _ => None,
        }
    }
}
