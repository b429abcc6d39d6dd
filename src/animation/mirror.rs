//! Bone mirror table and reflection math

use crate::animation::bone_atom::{BoneAtom, RootMotion};
use glam::{Mat4, Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Diagonal matrix negating this axis
    fn reflection(self) -> Mat4 {
        let mut diagonal = Vec4::ONE;
        diagonal[self.index()] = -1.0;
        Mat4::from_diagonal(diagonal)
    }
}

/// Mirror information for one bone
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MirrorEntry {
    /// Bone whose mirrored pose this bone takes; itself for centre-line bones
    pub source_index: usize,
    /// Local axis negated to restore handedness; falls back to the table default
    #[serde(default)]
    pub flip_axis: Option<Axis>,
}

/// Left/right bone pairing plus the world axis to reflect across.
///
/// Applying a mirror is a reflection `S` across the mirror axis on the left and
/// a flip `F` of one local basis vector on the right: `M' = S * M * F`. With a
/// consistent flip axis per pair this is an involution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MirrorTable {
    pub mirror_axis: Axis,
    pub flip_axis: Axis,
    pub entries: Vec<MirrorEntry>,
}

impl MirrorTable {
    /// A table mapping every bone onto itself
    pub fn identity(bone_count: usize, mirror_axis: Axis, flip_axis: Axis) -> Self {
        Self {
            mirror_axis,
            flip_axis,
            entries: (0..bone_count)
                .map(|i| MirrorEntry {
                    source_index: i,
                    flip_axis: None,
                })
                .collect(),
        }
    }

    /// Pair two bones with each other
    pub fn set_pair(&mut self, a: usize, b: usize) {
        if a < self.entries.len() && b < self.entries.len() {
            self.entries[a].source_index = b;
            self.entries[b].source_index = a;
        }
    }

    /// Usable for a skeleton when sized to it and every pairing is symmetric
    pub fn is_valid_for(&self, bone_count: usize) -> bool {
        self.entries.len() == bone_count
            && self.entries.iter().enumerate().all(|(i, entry)| {
                entry.source_index < bone_count
                    && self.entries[entry.source_index].source_index == i
            })
    }

    pub fn source_index(&self, bone_index: usize) -> usize {
        self.entries
            .get(bone_index)
            .map(|e| e.source_index)
            .unwrap_or(bone_index)
    }

    pub fn flip_axis_for(&self, bone_index: usize) -> Axis {
        self.entries
            .get(bone_index)
            .and_then(|e| e.flip_axis)
            .unwrap_or(self.flip_axis)
    }

    /// Reflect a component-space transform, flipping `flip_axis` to keep it a rotation
    pub fn mirror_matrix(&self, matrix: &Mat4, flip_axis: Axis) -> Mat4 {
        self.mirror_axis.reflection() * *matrix * flip_axis.reflection()
    }

    pub fn mirror_translation(&self, translation: Vec3) -> Vec3 {
        let mut mirrored = translation;
        mirrored[self.mirror_axis.index()] = -mirrored[self.mirror_axis.index()];
        mirrored
    }

    /// Reflect a rotation delta: the component along the mirror axis is kept,
    /// the other two are negated (conjugation by the reflection).
    pub fn mirror_rotation(&self, rotation: Quat) -> Quat {
        let mut v = Vec4::from(rotation);
        for axis in 0..3 {
            if axis != self.mirror_axis.index() {
                v[axis] = -v[axis];
            }
        }
        Quat::from_vec4(v)
    }

    pub fn mirror_root_motion(&self, root_motion: RootMotion) -> RootMotion {
        if !root_motion.has_root_motion {
            return root_motion;
        }
        RootMotion::new(BoneAtom {
            rotation: self.mirror_rotation(root_motion.delta.rotation),
            translation: self.mirror_translation(root_motion.delta.translation),
            scale: root_motion.delta.scale,
        })
    }
}
