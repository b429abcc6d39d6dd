//! The blend tree: node arena, per-frame tick and pose evaluation
//!
//! A frame is `tick` followed by `evaluate`. Ticking walks the nodes parents
//! first, turning each node's local child weights into total weights from the
//! root, advancing timers and playback, then advances synchronization groups.
//! Evaluation pulls the pose up from the root into the bound mesh component.

use glam::Vec2;

use crate::animation::bone_atom::{BoneAtom, RootMotion, ZERO_WEIGHT_THRESHOLD};
use crate::animation::component::{ActorState, EvaluationSettings, MeshComponent};
use crate::core::{Error, Result};

use super::context::TraversalContext;
use super::eval::Evaluator;
use super::event::{EventSink, TreeEvent};
use super::node::{AnimNode, ChildLink, NodeId, NodeKind};
use super::sequence::PhaseAdvance;
use super::synch::SynchGroup;

/// Blend tree bound to a mesh component
#[derive(Clone, Debug, Default)]
pub struct AnimTree {
    nodes: Vec<AnimNode>,
    root: Option<NodeId>,
    groups: Vec<SynchGroup>,
    mesh: Option<MeshComponent>,
    context: TraversalContext,
    tick_order: Vec<NodeId>,
    events: Vec<TreeEvent>,
}

impl AnimTree {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Structure ----

    pub fn add_node(&mut self, node: AnimNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&AnimNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut AnimNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> &[AnimNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// First node with the given name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .map(NodeId)
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    fn check_node(&self, id: NodeId) -> Result<()> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(Error::UnknownNode(format!("{:?}", id)))
        }
    }

    /// Linking `child` under `parent` must not close a loop
    fn check_link(&self, parent: NodeId, child: Option<NodeId>) -> Result<()> {
        self.check_node(parent)?;
        let Some(child) = child else {
            return Ok(());
        };
        self.check_node(child)?;
        if child == parent || self.is_child_of(parent, child) {
            return Err(Error::Tree(format!(
                "Linking {:?} under {:?} would create a cycle",
                child, parent
            )));
        }
        Ok(())
    }

    /// Append a child slot, returning its index. `None` makes an empty slot.
    pub fn add_child(&mut self, parent: NodeId, child: Option<NodeId>) -> Result<usize> {
        self.check_link(parent, child)?;
        let kind = &mut self.nodes[parent.0].kind;
        let type_name = kind.type_name();
        let max_children = kind.max_children();
        let Some(children) = kind.children_mut() else {
            return Err(Error::Tree(format!("A {} node cannot have children", type_name)));
        };
        if max_children.is_some_and(|max| children.len() >= max) {
            return Err(Error::Tree(format!(
                "A {} node takes at most {} children",
                type_name,
                max_children.unwrap_or(0)
            )));
        }

        let index = children.len();
        children.push(ChildLink::new(format!("Child{}", index + 1), child));
        kind.on_children_changed();
        if let Some(child) = child {
            self.nodes[child.0].parents.push(parent);
        }
        Ok(index)
    }

    /// Point an existing slot at another node
    pub fn set_child(&mut self, parent: NodeId, index: usize, child: Option<NodeId>) -> Result<()> {
        self.check_link(parent, child)?;
        let link = self.link_mut(parent, index)?;
        let previous = std::mem::replace(&mut link.node, child);
        if let Some(previous) = previous {
            self.remove_parent_entry(previous, parent);
        }
        if let Some(child) = child {
            self.nodes[child.0].parents.push(parent);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Result<()> {
        self.link_mut(parent, index)?;
        let kind = &mut self.nodes[parent.0].kind;
        let removed = kind.children_mut().map(|children| children.remove(index));
        kind.on_children_changed();
        if let Some(child) = removed.and_then(|link| link.node) {
            self.remove_parent_entry(child, parent);
        }
        Ok(())
    }

    fn link_mut(&mut self, parent: NodeId, index: usize) -> Result<&mut ChildLink> {
        self.check_node(parent)?;
        self.nodes[parent.0]
            .kind
            .children_mut()
            .and_then(|children| children.get_mut(index))
            .ok_or_else(|| Error::Tree(format!("{:?} has no child slot {}", parent, index)))
    }

    fn remove_parent_entry(&mut self, child: NodeId, parent: NodeId) {
        let parents = &mut self.nodes[child.0].parents;
        if let Some(pos) = parents.iter().position(|&p| p == parent) {
            parents.remove(pos);
        }
    }

    // ---- Traversal ----

    /// `id` and every node under it, parents before children, each once
    pub fn nodes_below(&mut self, id: NodeId) -> Vec<NodeId> {
        if id.0 >= self.nodes.len() {
            return Vec::new();
        }
        let tag = self.context.next_search();
        let mut post_order = Vec::new();
        // (node, next child slot to look at)
        let mut stack = vec![(id, 0usize)];
        self.nodes[id.0].search_tag = tag;
        while let Some((node, slot)) = stack.pop() {
            let next = self.nodes[node.0].children().get(slot).map(|l| l.node);
            match next {
                Some(child) => {
                    stack.push((node, slot + 1));
                    if let Some(child) = child {
                        if self.nodes[child.0].search_tag != tag {
                            self.nodes[child.0].search_tag = tag;
                            stack.push((child, 0));
                        }
                    }
                }
                None => post_order.push(node),
            }
        }
        post_order.reverse();
        post_order
    }

    /// Whether `node` can be reached by walking down from `ancestor`
    pub fn is_child_of(&self, node: NodeId, ancestor: NodeId) -> bool {
        if node.0 >= self.nodes.len() || ancestor.0 >= self.nodes.len() {
            return false;
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for &parent in &self.nodes[current.0].parents {
                if parent == ancestor {
                    return true;
                }
                if !seen[parent.0] {
                    seen[parent.0] = true;
                    stack.push(parent);
                }
            }
        }
        false
    }

    /// Sequence nodes under the root, optionally only those in `group`
    pub fn sequence_nodes(&mut self, group: Option<&str>) -> Vec<NodeId> {
        let candidates = match self.root {
            Some(root) => self.nodes_below(root),
            None => (0..self.nodes.len()).map(NodeId).collect(),
        };
        candidates
            .into_iter()
            .filter(|id| {
                self.nodes[id.0].kind.as_sequence().is_some_and(|seq| match group {
                    Some(name) => seq.synch_group.as_deref() == Some(name),
                    None => true,
                })
            })
            .collect()
    }

    /// Order of the last tick: every node after all of its parents
    pub fn tick_order(&self) -> &[NodeId] {
        &self.tick_order
    }

    // ---- Binding ----

    /// Bind the tree to a mesh component.
    ///
    /// Rebuilds parent links, resolves clip and bone names against the mesh and
    /// regroups sequence nodes by their synch group name.
    pub fn init(&mut self, mesh: MeshComponent) {
        for node in &mut self.nodes {
            node.parents.clear();
            node.relevant = false;
            node.just_became_relevant = false;
            node.total_weight = 0.0;
            node.total_weight_accumulator = 0.0;
        }
        for index in 0..self.nodes.len() {
            let children: Vec<NodeId> = self.nodes[index]
                .children()
                .iter()
                .filter_map(|l| l.node)
                .filter(|c| c.0 < self.nodes.len())
                .collect();
            for child in children {
                self.nodes[child.0].parents.push(NodeId(index));
            }
        }

        let skeleton = mesh.skeleton.clone();
        for node in &mut self.nodes {
            match &mut node.kind {
                NodeKind::Sequence(seq) => {
                    seq.bind(&mesh);
                    seq.group_bound = false;
                }
                NodeKind::BlendList(list) => list.init(),
                NodeKind::BlendBySpeed(by_speed) => {
                    by_speed.list.init();
                    by_speed.reset();
                }
                NodeKind::PerBone(per_bone) => {
                    per_bone.build_weight_list(&skeleton);
                    per_bone.apply_weights();
                }
                NodeKind::MultiBone(multi) => multi.init(&skeleton),
                NodeKind::AimOffset(aim) => aim.update_required_bones(&skeleton),
                _ => {}
            }
            node.kind.on_children_changed();
        }

        self.mesh = Some(mesh);
        self.rebuild_groups();
        log::info!(
            "Initialised anim tree: {} nodes, {} synch groups",
            self.nodes.len(),
            self.groups.len()
        );
    }

    fn rebuild_groups(&mut self) {
        for group in &mut self.groups {
            group.members.clear();
            group.synch_master = None;
            group.notify_master = None;
        }
        for id in self.sequence_nodes(None) {
            let Some(seq) = self.nodes[id.0].kind.as_sequence_mut() else {
                continue;
            };
            let Some(name) = seq.synch_group.clone() else {
                continue;
            };
            if !seq.is_bound() {
                continue;
            }
            seq.group_bound = true;
            let index = self.group_index_or_create(&name);
            self.groups[index].members.push(id);
        }
    }

    pub fn mesh(&self) -> Option<&MeshComponent> {
        self.mesh.as_ref()
    }

    pub fn mesh_mut(&mut self) -> Option<&mut MeshComponent> {
        self.mesh.as_mut()
    }

    // ---- Per frame ----

    /// Advance the tree by `delta_seconds`
    pub fn tick(&mut self, delta_seconds: f32) {
        let Some(mesh) = &self.mesh else {
            log::trace!("Anim tree ticked before init");
            return;
        };
        let settings = mesh.settings;
        let actor = mesh.actor;

        self.build_tick_order();
        if let Some(&root) = self.tick_order.first() {
            self.nodes[root.0].total_weight_accumulator = 1.0;
        }

        for i in 0..self.tick_order.len() {
            let id = self.tick_order[i];
            if self.update_relevance(id) || !self.nodes[id.0].skip_tick_when_zero_weight {
                self.tick_node(id, delta_seconds, &settings, &actor);
            }
            self.propagate_weights(id);
        }

        for group in &mut self.groups {
            group.update_masters(&self.nodes);
            group.advance(
                &mut self.nodes,
                settings.global_rate_scale,
                delta_seconds,
                &mut self.events,
            );
        }
    }

    /// Order nodes so each comes after every parent that can be reached from the root
    fn build_tick_order(&mut self) {
        self.tick_order.clear();
        let Some(root) = self.root.filter(|r| r.0 < self.nodes.len()) else {
            self.retire_unreached(0);
            return;
        };
        // Stamps every reachable node with the search tag
        self.nodes_below(root);
        let reachable = self.context.search_tag();

        let tag = self.context.next_tick();
        self.nodes[root.0].visit_tag = tag;
        self.tick_order.push(root);
        let mut next = 0;
        while next < self.tick_order.len() {
            let id = self.tick_order[next];
            next += 1;
            let children: Vec<NodeId> = self.nodes[id.0]
                .children()
                .iter()
                .filter_map(|l| l.node)
                .collect();
            for child in children {
                if self.nodes[child.0].visit_tag == tag {
                    continue;
                }
                let ready = self.nodes[child.0].parents.iter().all(|p| {
                    let parent = &self.nodes[p.0];
                    parent.visit_tag == tag || parent.search_tag != reachable
                });
                if ready {
                    self.nodes[child.0].visit_tag = tag;
                    self.tick_order.push(child);
                }
            }
        }
        self.retire_unreached(tag);
    }

    /// Nodes that dropped out of the tree lose their weight
    fn retire_unreached(&mut self, tag: u64) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if node.visit_tag == tag && tag != 0 {
                continue;
            }
            node.total_weight = 0.0;
            node.total_weight_accumulator = 0.0;
            if node.relevant {
                node.relevant = false;
                self.events.push(TreeEvent::CeasedRelevant { node: NodeId(index) });
            }
        }
    }

    /// Settle a node's total weight for this tick; returns whether it is relevant
    fn update_relevance(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id.0];
        let total = node.total_weight_accumulator.min(1.0);
        node.total_weight = total;
        node.total_weight_accumulator = 0.0;
        node.just_became_relevant = false;

        let relevant = total > ZERO_WEIGHT_THRESHOLD;
        if relevant != node.relevant {
            node.relevant = relevant;
            if relevant {
                node.just_became_relevant = true;
                if let NodeKind::BlendBySpeed(by_speed) = &mut node.kind {
                    by_speed.reset();
                }
                log::trace!("Node {:?} became relevant", id);
                self.events.push(TreeEvent::BecameRelevant { node: id });
            } else {
                log::trace!("Node {:?} ceased to be relevant", id);
                self.events.push(TreeEvent::CeasedRelevant { node: id });
            }
        }
        relevant
    }

    fn tick_node(
        &mut self,
        id: NodeId,
        delta_seconds: f32,
        settings: &EvaluationSettings,
        actor: &ActorState,
    ) {
        let fire_notifies = self.nodes[id.0].can_fire_notifies();
        let mut restart = None;
        match &mut self.nodes[id.0].kind {
            NodeKind::Sequence(seq) => {
                let mut sink = EventSink::new(id, &mut self.events);
                seq.tick(delta_seconds, settings.global_rate_scale, fire_notifies, &mut sink);
            }
            NodeKind::Crossfade(crossfade) => crossfade.tick(delta_seconds),
            NodeKind::BlendList(list) => list.tick(delta_seconds),
            NodeKind::BlendBySpeed(by_speed) => {
                if let Some(index) = by_speed.tick(delta_seconds, actor) {
                    if by_speed.list.play_active_child {
                        restart = by_speed.list.children.get(index).and_then(|l| l.node);
                    }
                }
            }
            NodeKind::PerBone(per_bone) => per_bone.tick(delta_seconds),
            NodeKind::MultiBone(multi) => multi.tick(delta_seconds),
            NodeKind::Directional(directional) => {
                directional.tick(delta_seconds, actor, settings.predicted_lod)
            }
            NodeKind::Blend(_) | NodeKind::AimOffset(_) | NodeKind::Mirror(_) => {}
        }
        if let Some(child) = restart {
            self.restart_sequence(child);
        }
    }

    /// Hand this node's total weight down its links
    fn propagate_weights(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        let weights = node.kind.child_total_weights(node.total_weight);
        let Some(links) = node.kind.children_mut() else {
            return;
        };
        let mut targets = Vec::with_capacity(links.len());
        for (link, weight) in links.iter_mut().zip(weights) {
            link.total_weight = weight;
            if let Some(child) = link.node {
                targets.push((child, weight));
            }
        }
        for (child, weight) in targets {
            self.nodes[child.0].total_weight_accumulator += weight;
        }
    }

    /// Play a sequence from its start, keeping its looping and rate
    fn restart_sequence(&mut self, id: NodeId) {
        if let Some(seq) = self.nodes.get_mut(id.0).and_then(|n| n.kind.as_sequence_mut()) {
            let mut sink = EventSink::new(id, &mut self.events);
            let (looping, rate) = (seq.looping, seq.rate);
            seq.play(looping, rate, 0.0, &mut sink);
        }
    }

    /// Evaluate the root into the mesh component's output pose
    pub fn evaluate(&mut self) -> RootMotion {
        let Some(mesh) = self.mesh.as_mut() else {
            return RootMotion::NONE;
        };
        let frame_tag = self.context.next_frame();
        let desired = mesh.required_bones().to_vec();
        let mut atoms = mesh.take_output();

        let root_motion = {
            let mut evaluator = Evaluator::new(&mut self.nodes, mesh, frame_tag);
            evaluator.bone_atoms(self.root, &desired, &mut atoms)
        };
        mesh.store_output(atoms, root_motion);
        root_motion
    }

    /// Evaluate any node for a bone subset. Missing ancestors are added to the set.
    pub fn bone_atoms(&mut self, id: NodeId, desired_bones: &[usize], out: &mut [BoneAtom]) -> RootMotion {
        let Some(mesh) = self.mesh.as_ref() else {
            return RootMotion::NONE;
        };
        let count = mesh.bone_count();
        debug_assert_eq!(out.len(), count, "output buffer must cover the skeleton");
        if out.len() != count {
            return RootMotion::NONE;
        }
        let mut desired: Vec<usize> = desired_bones.iter().copied().filter(|&b| b < count).collect();
        mesh.skeleton.ensure_parents_present(&mut desired);

        let frame_tag = self.context.next_frame();
        let mut evaluator = Evaluator::new(&mut self.nodes, mesh, frame_tag);
        evaluator.bone_atoms(Some(id), &desired, out)
    }

    /// Hand over everything raised since the last drain
    pub fn drain_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[TreeEvent] {
        &self.events
    }

    // ---- Node control ----

    fn kind_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        self.nodes
            .get_mut(id.0)
            .map(|n| &mut n.kind)
            .ok_or_else(|| Error::UnknownNode(format!("{:?}", id)))
    }

    fn wrong_kind(id: NodeId, kind: &NodeKind, wanted: &str) -> Error {
        Error::Tree(format!("{:?} is a {} node, not {}", id, kind.type_name(), wanted))
    }

    /// Directly set one link weight
    pub fn set_child_weight(&mut self, id: NodeId, index: usize, weight: f32) -> Result<()> {
        self.link_mut(id, index)?.weight = weight;
        Ok(())
    }

    /// Evaluate one child slot through the mirror table
    pub fn set_child_mirror(&mut self, id: NodeId, index: usize, mirror: bool) -> Result<()> {
        self.link_mut(id, index)?.mirror = mirror;
        Ok(())
    }

    /// Fade a crossfade or per-bone blend's second child toward `target`
    pub fn set_blend_target(&mut self, id: NodeId, target: f32, blend_time: f32) -> Result<()> {
        match self.kind_mut(id)? {
            NodeKind::Crossfade(crossfade) => crossfade.set_blend_target(target, blend_time),
            NodeKind::PerBone(per_bone) => per_bone.set_blend_target(target, blend_time),
            kind => return Err(Self::wrong_kind(id, kind, "a crossfade")),
        }
        Ok(())
    }

    /// Switch a blend list's active child, returning the index actually activated
    pub fn set_active_child(&mut self, id: NodeId, index: usize, blend_time: f32) -> Result<usize> {
        let (activated, restart) = match self.kind_mut(id)? {
            NodeKind::BlendList(list) => {
                let activated = list.set_active_child(index, blend_time);
                (activated, list.play_active_child)
            }
            NodeKind::BlendBySpeed(by_speed) => {
                let activated = by_speed.list.set_active_child(index, blend_time);
                (activated, by_speed.list.play_active_child)
            }
            kind => return Err(Self::wrong_kind(id, kind, "a blend list")),
        };
        if restart {
            if let Some(child) = self.nodes[id.0].children().get(activated).and_then(|l| l.node) {
                self.restart_sequence(child);
            }
        }
        Ok(activated)
    }

    pub fn set_target_start_bone(
        &mut self,
        id: NodeId,
        target: usize,
        start_bone: &str,
        per_bone_increase: f32,
    ) -> Result<()> {
        let skeleton = self.mesh.as_ref().map(|m| m.skeleton.clone());
        match self.kind_mut(id)? {
            NodeKind::MultiBone(multi) => {
                multi.set_target_start_bone(target, start_bone, per_bone_increase, skeleton.as_deref())
            }
            kind => Err(Self::wrong_kind(id, kind, "a multi-bone blend")),
        }
    }

    pub fn set_multi_bone_target(
        &mut self,
        id: NodeId,
        target: usize,
        weight: f32,
        blend_time: f32,
    ) -> Result<()> {
        match self.kind_mut(id)? {
            NodeKind::MultiBone(multi) => {
                if target == 0 || target >= multi.targets.len() {
                    return Err(Error::Tree(format!("Multi-bone target {} out of range", target)));
                }
                multi.set_blend_target(target, weight, blend_time);
                Ok(())
            }
            kind => Err(Self::wrong_kind(id, kind, "a multi-bone blend")),
        }
    }

    pub fn set_aim(&mut self, id: NodeId, aim: Vec2) -> Result<()> {
        match self.kind_mut(id)? {
            NodeKind::AimOffset(node) => {
                node.aim = aim;
                Ok(())
            }
            kind => Err(Self::wrong_kind(id, kind, "an aim offset")),
        }
    }

    pub fn set_aim_profile(&mut self, id: NodeId, profile: &str) -> Result<()> {
        let skeleton = self.mesh.as_ref().map(|m| m.skeleton.clone());
        match self.kind_mut(id)? {
            NodeKind::AimOffset(node) => node.set_active_profile_by_name(profile, skeleton.as_deref()),
            kind => Err(Self::wrong_kind(id, kind, "an aim offset")),
        }
    }

    /// Rebuild an aim offset's current profile from its source clips
    pub fn bake_aim_offsets(&mut self, id: NodeId) -> Result<usize> {
        self.check_node(id)?;
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| Error::Tree("Anim tree is not initialised".into()))?;
        match &mut self.nodes[id.0].kind {
            NodeKind::AimOffset(node) => node.bake_offsets_from_animations(mesh),
            kind => Err(Self::wrong_kind(id, kind, "an aim offset")),
        }
    }

    /// Change the clip a sequence node plays
    pub fn set_anim(&mut self, id: NodeId, anim_name: Option<&str>) -> Result<()> {
        self.check_node(id)?;
        let kind = &mut self.nodes[id.0].kind;
        if kind.as_sequence().is_none() {
            return Err(Self::wrong_kind(id, kind, "a sequence"));
        }
        let Some(seq) = kind.as_sequence_mut() else {
            return Ok(());
        };
        match &self.mesh {
            Some(mesh) => seq.set_anim(anim_name, mesh),
            None => seq.anim_name = anim_name.map(str::to_string),
        }
        Ok(())
    }

    /// Start playback on a sequence, or on every sequence under a blend
    pub fn play_anim(&mut self, id: NodeId, looping: bool, rate: f32, start_time: f32) -> Result<()> {
        self.check_node(id)?;
        for node in self.nodes_below(id) {
            if let Some(seq) = self.nodes[node.0].kind.as_sequence_mut() {
                let mut sink = EventSink::new(node, &mut self.events);
                seq.play(looping, rate, start_time, &mut sink);
            }
        }
        Ok(())
    }

    pub fn stop_anim(&mut self, id: NodeId) -> Result<()> {
        self.check_node(id)?;
        for node in self.nodes_below(id) {
            if let Some(seq) = self.nodes[node.0].kind.as_sequence_mut() {
                seq.stop();
            }
        }
        Ok(())
    }

    // ---- Synchronization groups ----

    pub fn groups(&self) -> &[SynchGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&SynchGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut SynchGroup> {
        self.groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| Error::Tree(format!("Synch group '{}' not found", name)))
    }

    fn group_index_or_create(&mut self, name: &str) -> usize {
        match self.groups.iter().position(|g| g.name == name) {
            Some(index) => index,
            None => {
                self.groups.push(SynchGroup::new(name));
                self.groups.len() - 1
            }
        }
    }

    /// Declare a group; members join by naming it or through [`Self::set_group_for_node`]
    pub fn add_group(&mut self, name: &str, rate_scale: f32) {
        let index = self.group_index_or_create(name);
        self.groups[index].rate_scale = rate_scale;
    }

    /// Move a sequence node into `group`, or out of any group with `None`.
    ///
    /// A node joining a group that already has members picks up the group's
    /// current phase.
    pub fn set_group_for_node(
        &mut self,
        id: NodeId,
        group: Option<&str>,
        create_if_missing: bool,
    ) -> Result<()> {
        self.check_node(id)?;
        let node = &self.nodes[id.0];
        let Some(seq) = node.kind.as_sequence() else {
            return Err(Self::wrong_kind(id, &node.kind, "a sequence"));
        };
        if let Some(name) = group {
            if !create_if_missing && self.group(name).is_none() {
                return Err(Error::Tree(format!("Synch group '{}' not found", name)));
            }
        }

        if let Some(current) = seq.synch_group.clone() {
            if let Ok(old) = self.group_mut(&current) {
                old.remove_member(id);
            }
        }

        let Some(name) = group else {
            if let Some(seq) = self.nodes[id.0].kind.as_sequence_mut() {
                seq.synch_group = None;
                seq.group_bound = false;
            }
            return Ok(());
        };

        let index = self.group_index_or_create(name);
        let leader = {
            let group = &self.groups[index];
            group.synch_master.or_else(|| group.members.first().copied())
        };
        let phase = leader
            .and_then(|leader| self.nodes[leader.0].kind.as_phase_advance())
            .map(|p| p.relative_position());

        self.groups[index].members.push(id);
        if let Some(seq) = self.nodes[id.0].kind.as_sequence_mut() {
            seq.synch_group = Some(name.to_string());
            seq.group_bound = seq.is_bound();
            if let Some(phase) = phase {
                let time = seq.position_from_relative(phase);
                let mut sink = EventSink::new(id, &mut self.events);
                seq.set_position(time, false, &mut sink);
            }
        }
        log::debug!("{:?} joined synch group '{}'", id, name);
        Ok(())
    }

    /// Jump every member of a group to the same phase
    pub fn force_group_relative_position(&mut self, group: &str, relative: f32) -> Result<()> {
        let members = self.group_mut(group)?.members.clone();
        for id in members {
            if let Some(player) = self.nodes[id.0].kind.as_phase_advance_mut() {
                let time = player.position_from_relative(relative);
                let mut sink = EventSink::new(id, &mut self.events);
                player.set_position(time, false, &mut sink);
            }
        }
        Ok(())
    }

    /// Phase of the group's synch master
    pub fn group_relative_position(&self, group: &str) -> Option<f32> {
        let master = self.group(group)?.synch_master?;
        self.nodes[master.0]
            .kind
            .as_phase_advance()
            .map(|p| p.relative_position())
    }

    pub fn group_synch_master(&self, group: &str) -> Option<NodeId> {
        self.group(group)?.synch_master
    }

    pub fn group_notify_master(&self, group: &str) -> Option<NodeId> {
        self.group(group)?.notify_master
    }

    pub fn set_group_rate_scale(&mut self, group: &str, rate_scale: f32) -> Result<()> {
        self.group_mut(group)?.rate_scale = rate_scale;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::blend::Blend;
    use crate::tree::blend_list::BlendList;
    use crate::tree::crossfade::Crossfade;
    use crate::tree::sequence::SequencePlayer;
    use crate::tree::test_rig::{TestRig, assert_pose_eq};

    fn blend_of(rig: &mut TestRig, clips: &[&str], weights: &[f32]) -> NodeId {
        let blend = rig.tree.add_node(AnimNode::new(Blend::new()).with_name("blend"));
        for (i, clip) in clips.iter().enumerate() {
            let child = rig.add_sequence(clip);
            rig.tree.add_child(blend, Some(child)).unwrap();
            rig.tree.set_child_weight(blend, i, weights[i]).unwrap();
        }
        blend
    }

    #[test]
    fn test_add_child_rejects_cycles_and_leaves() {
        let mut tree = AnimTree::new();
        let a = tree.add_node(AnimNode::new(Blend::new()));
        let b = tree.add_node(AnimNode::new(Blend::new()));
        let leaf = tree.add_node(AnimNode::new(SequencePlayer::new(None)));

        tree.add_child(a, Some(b)).unwrap();
        assert!(tree.add_child(b, Some(a)).is_err());
        assert!(tree.add_child(a, Some(a)).is_err());
        assert!(tree.add_child(leaf, Some(a)).is_err());
        assert!(matches!(tree.add_child(NodeId(9), None), Err(Error::UnknownNode(_))));
        assert!(tree.is_child_of(b, a));
        assert!(!tree.is_child_of(a, b));
    }

    #[test]
    fn test_max_children_enforced() {
        let mut tree = AnimTree::new();
        let crossfade = tree.add_node(AnimNode::new(Crossfade::new(0.0)));
        tree.add_child(crossfade, None).unwrap();
        tree.add_child(crossfade, None).unwrap();
        assert!(tree.add_child(crossfade, None).is_err());
    }

    #[test]
    fn test_set_and_remove_child_keep_parents() {
        let mut tree = AnimTree::new();
        let parent = tree.add_node(AnimNode::new(Blend::new()));
        let a = tree.add_node(AnimNode::new(SequencePlayer::new(None)));
        let b = tree.add_node(AnimNode::new(SequencePlayer::new(None)));

        tree.add_child(parent, Some(a)).unwrap();
        tree.set_child(parent, 0, Some(b)).unwrap();
        assert!(tree.node(a).unwrap().parents().is_empty());
        assert_eq!(tree.node(b).unwrap().parents(), &[parent]);

        tree.remove_child(parent, 0).unwrap();
        assert!(tree.node(b).unwrap().parents().is_empty());
        assert!(tree.node(parent).unwrap().children().is_empty());
        assert!(tree.remove_child(parent, 0).is_err());
    }

    #[test]
    fn test_tick_order_waits_for_every_parent() {
        // root -> left -> shared, root -> shared
        let mut rig = TestRig::new();
        let shared = rig.add_sequence("still");
        let left = rig.tree.add_node(AnimNode::new(Blend::new()));
        let root = rig.tree.add_node(AnimNode::new(Blend::new()));
        rig.tree.add_child(root, Some(shared)).unwrap();
        rig.tree.add_child(root, Some(left)).unwrap();
        rig.tree.add_child(left, Some(shared)).unwrap();
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.0);

        assert_eq!(rig.tree.tick_order(), &[root, left, shared]);
        assert_eq!(rig.tree.nodes_below(root), vec![root, left, shared]);
    }

    #[test]
    fn test_total_weight_accumulates_over_parents() {
        let mut rig = TestRig::new();
        let shared = rig.add_sequence("still");
        let other = rig.add_sequence("bend");
        let left = rig.tree.add_node(AnimNode::new(Blend::new()));
        let root = rig.tree.add_node(AnimNode::new(Blend::new()));
        rig.tree.add_child(root, Some(shared)).unwrap();
        rig.tree.add_child(root, Some(left)).unwrap();
        rig.tree.add_child(left, Some(shared)).unwrap();
        rig.tree.add_child(left, Some(other)).unwrap();
        rig.tree.set_child_weight(root, 0, 0.25).unwrap();
        rig.tree.set_child_weight(root, 1, 0.75).unwrap();
        rig.tree.set_child_weight(left, 0, 0.5).unwrap();
        rig.tree.set_child_weight(left, 1, 0.5).unwrap();
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.0);

        let weight = |id: NodeId| rig.tree.node(id).unwrap().total_weight();
        assert_eq!(weight(root), 1.0);
        assert!((weight(left) - 0.75).abs() < 1e-6);
        assert!((weight(shared) - 0.625).abs() < 1e-6);
        assert!((weight(other) - 0.375).abs() < 1e-6);
        assert!((rig.tree.node(left).unwrap().children()[0].total_weight - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_relevance_events() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["still", "bend"], &[1.0, 0.0]);
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.1);

        let still = rig.tree.find_node("still").unwrap();
        let bend = rig.tree.find_node("bend").unwrap();
        let events = rig.tree.drain_events();
        assert!(events.contains(&TreeEvent::BecameRelevant { node: root }));
        assert!(events.contains(&TreeEvent::BecameRelevant { node: still }));
        assert!(!events.contains(&TreeEvent::BecameRelevant { node: bend }));
        assert!(rig.tree.node(still).unwrap().just_became_relevant());

        rig.tree.set_child_weight(root, 0, 0.0).unwrap();
        rig.tree.set_child_weight(root, 1, 1.0).unwrap();
        rig.tree.tick(0.1);
        let events = rig.tree.drain_events();
        assert!(events.contains(&TreeEvent::CeasedRelevant { node: still }));
        assert!(events.contains(&TreeEvent::BecameRelevant { node: bend }));
        assert!(!rig.tree.node(still).unwrap().is_relevant());
    }

    #[test]
    fn test_skip_tick_when_zero_weight() {
        let mut rig = TestRig::new();
        let root = rig.tree.add_node(AnimNode::new(Blend::new()));
        let idle = rig.tree.add_node(
            AnimNode::new(SequencePlayer::new(Some("run"))).with_skip_tick_when_zero_weight(true),
        );
        let busy = rig.add_sequence("run");
        rig.tree.add_child(root, Some(idle)).unwrap();
        rig.tree.add_child(root, Some(busy)).unwrap();
        rig.tree.set_child_weight(root, 1, 1.0).unwrap();
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.play_anim(root, true, 1.0, 0.0).unwrap();
        rig.tree.tick(0.5);

        let time = |id: NodeId| rig.tree.node(id).unwrap().kind.as_sequence().unwrap().current_time;
        assert_eq!(time(idle), 0.0);
        assert!((time(busy) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_notifies_only_from_weighted_sequences() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["run", "walk"], &[1.0, 0.0]);
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.play_anim(root, true, 1.0, 0.0).unwrap();
        rig.tree.tick(1.2);

        let names: Vec<String> = rig
            .tree
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                TreeEvent::Notify { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["stride"]);
    }

    #[test]
    fn test_shared_node_evaluated_once_per_frame() {
        let mut rig = TestRig::new();
        let shared = rig.add_sequence("twist");
        let root = rig.tree.add_node(AnimNode::new(Blend::new()));
        rig.tree.add_child(root, Some(shared)).unwrap();
        rig.tree.add_child(root, Some(shared)).unwrap();
        rig.tree.set_child_weight(root, 0, 0.5).unwrap();
        rig.tree.set_child_weight(root, 1, 0.5).unwrap();
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.0);

        rig.tree.evaluate();
        let cache = &rig.tree.node(shared).unwrap().cache;
        assert_eq!(cache.atoms.len(), rig.mesh.bone_count());
        assert_pose_eq(rig.tree.mesh().unwrap().local_atoms(), &rig.evaluate_clip("twist", 0.0));
    }

    #[test]
    fn test_crossfade_scenario() {
        let mut rig = TestRig::new();
        let a = rig.add_sequence("still");
        let b = rig.add_sequence("bend");
        let crossfade = rig.tree.add_node(AnimNode::new(Crossfade::new(0.0)));
        rig.tree.add_child(crossfade, Some(a)).unwrap();
        rig.tree.add_child(crossfade, Some(b)).unwrap();
        rig.tree.set_root(Some(crossfade));
        rig.init();

        rig.tree.set_blend_target(crossfade, 1.0, 2.0).unwrap();
        rig.tree.tick(1.0);
        let links = rig.tree.node(crossfade).unwrap().children();
        assert!((links[0].weight - 0.5).abs() < 1e-5);
        assert!((links[1].weight - 0.5).abs() < 1e-5);

        rig.tree.tick(1.0);
        let links = rig.tree.node(crossfade).unwrap().children();
        assert_eq!(links[1].weight, 1.0);
        assert_eq!(links[0].weight, 0.0);

        rig.tree.evaluate();
        assert_eq!(rig.tree.mesh().unwrap().local_atoms(), rig.evaluate_clip("bend", 0.0).as_slice());
    }

    #[test]
    fn test_blend_list_restarts_active_child() {
        let mut rig = TestRig::new();
        let mut list = BlendList::new();
        list.play_active_child = true;
        let node = rig.tree.add_node(AnimNode::new(list));
        let first = rig.add_sequence("run");
        let second = rig.add_sequence("walk");
        rig.tree.add_child(node, Some(first)).unwrap();
        rig.tree.add_child(node, Some(second)).unwrap();
        rig.tree.set_root(Some(node));
        rig.init();

        if let Some(seq) = rig.tree.node_mut(second).and_then(|n| n.kind.as_sequence_mut()) {
            seq.current_time = 0.7;
        }
        assert_eq!(rig.tree.set_active_child(node, 1, 0.0).unwrap(), 1);
        let seq = rig.tree.node(second).unwrap().kind.as_sequence().unwrap();
        assert!(seq.playing);
        assert_eq!(seq.current_time, 0.0);
        assert!(rig.tree.set_active_child(first, 0, 0.0).is_err());
    }

    #[test]
    fn test_group_membership_and_phase() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["walk", "run"], &[0.75, 0.25]);
        rig.tree.set_root(Some(root));
        rig.init();
        let walk = rig.tree.find_node("walk").unwrap();
        let run = rig.tree.find_node("run").unwrap();

        rig.tree.set_group_for_node(walk, Some("locomotion"), true).unwrap();
        rig.tree.set_group_for_node(run, Some("locomotion"), false).unwrap();
        assert!(rig.tree.set_group_for_node(run, Some("missing"), false).is_err());
        assert_eq!(rig.tree.group("locomotion").unwrap().members(), &[walk, run]);

        rig.tree.play_anim(root, true, 1.0, 0.0).unwrap();
        rig.tree.tick(0.25);
        assert_eq!(rig.tree.group_synch_master("locomotion"), Some(walk));
        assert_eq!(rig.tree.group_notify_master("locomotion"), Some(walk));
        let phase = rig.tree.group_relative_position("locomotion").unwrap();
        assert!((phase - 0.25).abs() < 1e-5);
        // run is twice as long, so the same phase is twice the time
        let run_time = rig.tree.node(run).unwrap().kind.as_sequence().unwrap().current_time;
        assert!((run_time - 0.5).abs() < 1e-5);

        rig.tree.force_group_relative_position("locomotion", 0.5).unwrap();
        let run_time = rig.tree.node(run).unwrap().kind.as_sequence().unwrap().current_time;
        assert!((run_time - 1.0).abs() < 1e-5);

        rig.tree.set_group_rate_scale("locomotion", 2.0).unwrap();
        assert_eq!(rig.tree.group("locomotion").unwrap().rate_scale, 2.0);

        rig.tree.set_group_for_node(run, None, false).unwrap();
        assert_eq!(rig.tree.group("locomotion").unwrap().members(), &[walk]);
        assert!(!rig.tree.node(run).unwrap().kind.as_sequence().unwrap().is_in_group());
    }

    #[test]
    fn test_init_groups_by_name() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["walk", "run", "still"], &[0.5, 0.5, 0.0]);
        for name in ["walk", "run"] {
            let id = rig.tree.find_node(name).unwrap();
            if let Some(seq) = rig.tree.node_mut(id).and_then(|n| n.kind.as_sequence_mut()) {
                seq.synch_group = Some("feet".into());
            }
        }
        rig.tree.set_root(Some(root));
        rig.init();

        assert_eq!(rig.tree.groups().len(), 1);
        assert_eq!(rig.tree.group("feet").unwrap().members().len(), 2);
        assert_eq!(rig.tree.sequence_nodes(Some("feet")).len(), 2);
        assert_eq!(rig.tree.sequence_nodes(None).len(), 3);
    }

    #[test]
    fn test_evaluate_writes_mesh_output() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["still", "lift"], &[0.5, 0.5]);
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.0);
        rig.tree.evaluate();

        let mesh = rig.tree.mesh().unwrap();
        assert!((mesh.local_atoms()[1].translation.z - 2.0).abs() < 1e-5);
        let component = mesh.component_space_atoms();
        assert!((component[2].translation.z - 3.0).abs() < 1e-5);
        assert!(!mesh.root_motion().has_root_motion);
    }

    #[test]
    fn test_unlinked_node_ceases_relevance() {
        let mut rig = TestRig::new();
        let root = blend_of(&mut rig, &["still"], &[1.0]);
        rig.tree.set_root(Some(root));
        rig.init();
        rig.tree.tick(0.0);
        let still = rig.tree.find_node("still").unwrap();
        assert!(rig.tree.node(still).unwrap().is_relevant());
        rig.tree.drain_events();

        rig.tree.remove_child(root, 0).unwrap();
        rig.tree.tick(0.0);
        assert!(!rig.tree.node(still).unwrap().is_relevant());
        assert!(rig.tree.drain_events().contains(&TreeEvent::CeasedRelevant { node: still }));
    }
}
