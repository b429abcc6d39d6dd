//! Recursive pose evaluation over the node arena

use crate::animation::bone_atom::{BoneAtom, RootMotion};
use crate::animation::component::MeshComponent;

use super::context::bone_set_hash;
use super::node::{ChildLink, NodeId, NodeKind};

/// The parts of a child link evaluation needs, copied out so the arena can be
/// borrowed mutably while recursing.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkSnapshot {
    pub node: Option<NodeId>,
    pub weight: f32,
    pub mirror: bool,
}

impl From<&ChildLink> for LinkSnapshot {
    fn from(link: &ChildLink) -> Self {
        Self {
            node: link.node,
            weight: link.weight,
            mirror: link.mirror,
        }
    }
}

/// One evaluation pass: the arena, the bound mesh and the frame tag that keys pose caches.
pub(crate) struct Evaluator<'a> {
    pub nodes: &'a mut [super::node::AnimNode],
    pub mesh: &'a MeshComponent,
    pub frame_tag: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        nodes: &'a mut [super::node::AnimNode],
        mesh: &'a MeshComponent,
        frame_tag: u64,
    ) -> Self {
        Self {
            nodes,
            mesh,
            frame_tag,
        }
    }

    pub fn new_buffer(&self) -> Vec<BoneAtom> {
        vec![BoneAtom::IDENTITY; self.mesh.bone_count()]
    }

    pub fn ref_pose(&self, desired_bones: &[usize], out: &mut [BoneAtom]) -> RootMotion {
        self.mesh.skeleton.fill_ref_pose(desired_bones, out);
        RootMotion::NONE
    }

    pub fn links(&self, id: NodeId) -> Vec<LinkSnapshot> {
        self.nodes[id.0]
            .kind
            .children()
            .iter()
            .map(LinkSnapshot::from)
            .collect()
    }

    /// Evaluate a child link, through the mirror table if the link asks for it
    pub fn link_atoms(
        &mut self,
        link: LinkSnapshot,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        if link.mirror {
            self.mirrored_atoms(link.node, desired_bones, out)
        } else {
            self.bone_atoms(link.node, desired_bones, out)
        }
    }

    /// Local-space pose of a node for the desired bones, plus its root motion.
    ///
    /// Nodes with more than one parent keep their result for the rest of the
    /// frame so shared subtrees are evaluated once per bone set.
    pub fn bone_atoms(
        &mut self,
        node: Option<NodeId>,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let Some(id) = node.filter(|id| id.0 < self.nodes.len()) else {
            return self.ref_pose(desired_bones, out);
        };

        let shared = self.nodes[id.0].parents.len() >= 2;
        let bones_hash = if shared { bone_set_hash(desired_bones) } else { 0 };
        if shared {
            if let Some(root_motion) = self.load_cache(id, bones_hash, desired_bones, out) {
                return root_motion;
            }
        }

        let root_motion = match &self.nodes[id.0].kind {
            NodeKind::Sequence(seq) => seq.evaluate_pose(&self.mesh.skeleton, desired_bones, out),
            NodeKind::Blend(_)
            | NodeKind::Crossfade(_)
            | NodeKind::BlendList(_)
            | NodeKind::BlendBySpeed(_)
            | NodeKind::Directional(_) => self.blend_children(id, desired_bones, out),
            NodeKind::PerBone(_) => self.per_bone_atoms(id, desired_bones, out),
            NodeKind::MultiBone(_) => self.multi_bone_atoms(id, desired_bones, out),
            NodeKind::AimOffset(_) => self.aim_offset_atoms(id, desired_bones, out),
            NodeKind::Mirror(_) => self.mirror_node_atoms(id, desired_bones, out),
        };

        let cache = &mut self.nodes[id.0].cache;
        if shared {
            cache.frame_tag = self.frame_tag;
            cache.bones_hash = bones_hash;
            cache.atoms.clear();
            cache.atoms.extend_from_slice(out);
            cache.root_motion = root_motion;
        } else if !cache.atoms.is_empty() {
            cache.atoms = Vec::new();
        }
        root_motion
    }

    fn load_cache(
        &self,
        id: NodeId,
        bones_hash: u64,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> Option<RootMotion> {
        let cache = &self.nodes[id.0].cache;
        if cache.frame_tag != self.frame_tag
            || cache.bones_hash != bones_hash
            || cache.atoms.len() != out.len()
        {
            return None;
        }
        for &bone in desired_bones {
            out[bone] = cache.atoms[bone];
        }
        Some(cache.root_motion)
    }
}
