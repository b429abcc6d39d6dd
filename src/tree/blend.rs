//! N-way weighted blending shared by every blend node

use crate::animation::bone_atom::{BoneAtom, RootMotion, ZERO_WEIGHT_THRESHOLD};

use super::eval::Evaluator;
use super::node::{ChildLink, NodeId};

/// Plain blend node: children are mixed by weights set directly by the owner
#[derive(Clone, Debug, Default)]
pub struct Blend {
    pub children: Vec<ChildLink>,
}

impl Blend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one child's weight; weights are expected to sum to 1
    pub fn set_child_weight(&mut self, index: usize, weight: f32) {
        if let Some(link) = self.children.get_mut(index) {
            link.weight = weight;
        }
    }
}

impl Evaluator<'_> {
    /// Weighted mix of every child with non-zero weight.
    ///
    /// A fully weighted child is passed through untouched. Rotations are summed
    /// along the short arc and normalized once at the end.
    pub(crate) fn blend_children(
        &mut self,
        id: NodeId,
        desired_bones: &[usize],
        out: &mut [BoneAtom],
    ) -> RootMotion {
        let links = self.links(id);
        if links.is_empty() {
            return self.ref_pose(desired_bones, out);
        }

        let total: f32 = links.iter().map(|l| l.weight).sum();
        if (total - 1.0).abs() > ZERO_WEIGHT_THRESHOLD {
            log::warn!(
                "Node {:?} child weights sum to {:.5}, using reference pose",
                id, total
            );
            return self.ref_pose(desired_bones, out);
        }

        let mut last = None;
        for (i, link) in links.iter().enumerate() {
            if link.weight > ZERO_WEIGHT_THRESHOLD {
                if link.weight >= 1.0 - ZERO_WEIGHT_THRESHOLD {
                    return self.link_atoms(*link, desired_bones, out);
                }
                last = Some(i);
            }
        }
        let Some(last) = last else {
            return self.ref_pose(desired_bones, out);
        };

        let mut child_atoms = self.new_buffer();
        let mut root_motions = Vec::new();
        let mut first = true;

        for (i, link) in links.iter().enumerate().take(last + 1) {
            if link.weight <= ZERO_WEIGHT_THRESHOLD {
                continue;
            }
            let root_motion = self.link_atoms(*link, desired_bones, &mut child_atoms);
            if root_motion.has_root_motion {
                root_motions.push((link.weight, root_motion.delta));
            }

            for &bone in desired_bones {
                if first {
                    out[bone] = child_atoms[bone] * link.weight;
                } else {
                    out[bone].accumulate(&child_atoms[bone], link.weight);
                }
                if i == last {
                    out[bone].normalize_rotation();
                }
            }
            first = false;
        }

        blend_root_motion(&root_motions)
    }
}

/// Mix root motion from the children that report it, renormalizing their weights
pub(crate) fn blend_root_motion(contributions: &[(f32, BoneAtom)]) -> RootMotion {
    let total: f32 = contributions.iter().map(|(w, _)| *w).sum();
    if contributions.is_empty() || total <= ZERO_WEIGHT_THRESHOLD {
        return RootMotion::NONE;
    }
    if let [(_, delta)] = contributions {
        return RootMotion::new(*delta);
    }

    let mut delta = BoneAtom::ZERO;
    for (i, (weight, atom)) in contributions.iter().enumerate() {
        let weight = weight / total;
        if i == 0 {
            delta = *atom * weight;
        } else {
            delta.accumulate(atom, weight);
        }
    }
    delta.normalize_rotation();
    RootMotion::new(delta)
}
