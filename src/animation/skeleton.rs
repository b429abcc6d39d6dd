//! Skeletal bone hierarchy and reference pose

use crate::animation::bone_atom::BoneAtom;
use crate::core::{Error, Result};
use std::collections::HashMap;

/// Maximum number of bones per skeleton (bone indices are stored as bytes in mirror tables)
pub const MAX_BONES: usize = 256;

/// A single bone in a skeletal hierarchy
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent_index: Option<usize>,
    /// Local transform relative to the parent in the reference pose
    pub ref_pose: BoneAtom,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent_index: Option<usize>, ref_pose: BoneAtom) -> Self {
        Self {
            name: name.into(),
            parent_index,
            ref_pose,
        }
    }
}

/// A hierarchical skeleton composed of bones.
///
/// Bones are stored parent-first: bone 0 is the only root and every other
/// bone's parent has a lower index.
#[derive(Clone, Debug)]
pub struct Skeleton {
    bones: Vec<Bone>,
    bone_names: HashMap<String, usize>,
}

impl Skeleton {
    /// Create an empty skeleton
    pub fn new() -> Self {
        Self {
            bones: Vec::new(),
            bone_names: HashMap::new(),
        }
    }

    /// Add a bone to the skeleton
    /// Returns the bone index or an error if the hierarchy would be invalid
    pub fn add_bone(&mut self, bone: Bone) -> Result<usize> {
        if self.bones.len() >= MAX_BONES {
            return Err(Error::Skeleton("Maximum bone count exceeded".into()));
        }

        match bone.parent_index {
            Some(parent) if parent >= self.bones.len() => {
                return Err(Error::Skeleton(format!(
                    "Bone '{}' has invalid parent index {}",
                    bone.name, parent
                )));
            }
            None if !self.bones.is_empty() => {
                return Err(Error::Skeleton(format!(
                    "Bone '{}' has no parent but the skeleton already has a root",
                    bone.name
                )));
            }
            _ => {}
        }

        if self.bone_names.contains_key(&bone.name) {
            return Err(Error::Skeleton(format!("Bone name '{}' already exists", bone.name)));
        }

        let index = self.bones.len();
        self.bone_names.insert(bone.name.clone(), index);
        self.bones.push(bone);

        Ok(index)
    }

    /// Get the number of bones in the skeleton
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// Get a bone by index
    pub fn get_bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Find a bone index by name
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bone_names.get(name).copied()
    }

    /// Get the parent index of a bone
    pub fn parent_index(&self, bone_index: usize) -> Option<usize> {
        self.bones.get(bone_index)?.parent_index
    }

    /// Get all children of a bone
    pub fn children(&self, bone_index: usize) -> Vec<usize> {
        self.bones
            .iter()
            .enumerate()
            .filter_map(|(idx, bone)| {
                if bone.parent_index == Some(bone_index) {
                    Some(idx)
                } else {
                    None
                }
            })
            .collect()
    }

    /// True if `ancestor` lies on the parent chain of `bone_index` (or is the bone itself)
    pub fn is_child_of(&self, bone_index: usize, ancestor: usize) -> bool {
        let mut current = Some(bone_index);
        while let Some(idx) = current {
            if idx == ancestor {
                return true;
            }
            current = self.parent_index(idx);
        }
        false
    }

    pub fn ref_pose(&self, bone_index: usize) -> BoneAtom {
        self.bones
            .get(bone_index)
            .map(|b| b.ref_pose)
            .unwrap_or(BoneAtom::IDENTITY)
    }

    /// Write the reference pose into `out` for each bone in `desired_bones`
    pub fn fill_ref_pose(&self, desired_bones: &[usize], out: &mut [BoneAtom]) {
        for &bone in desired_bones {
            if let Some(slot) = out.get_mut(bone) {
                *slot = self.ref_pose(bone);
            }
        }
    }

    /// Every bone index in ascending order
    pub fn all_bones(&self) -> Vec<usize> {
        (0..self.bones.len()).collect()
    }

    /// Add any missing ancestors to a bone list and leave it sorted ascending.
    ///
    /// Sorted ascending is parent-before-child for a parent-first skeleton,
    /// which the component-space passes rely on.
    pub fn ensure_parents_present(&self, bones: &mut Vec<usize>) {
        let mut present = vec![false; self.bones.len()];
        for &bone in bones.iter() {
            if let Some(flag) = present.get_mut(bone) {
                *flag = true;
            }
        }
        for bone in bones.clone() {
            let mut current = self.parent_index(bone);
            while let Some(parent) = current {
                if present[parent] {
                    break;
                }
                present[parent] = true;
                current = self.parent_index(parent);
            }
        }
        bones.clear();
        bones.extend(present.iter().enumerate().filter_map(|(i, &p)| p.then_some(i)));
    }

    /// Calculate component-space transforms for `desired_bones` given local atoms
    ///
    /// Entries for bones outside the desired set are left untouched.
    pub fn calculate_component_space(
        &self,
        local_atoms: &[BoneAtom],
        desired_bones: &[usize],
        component: &mut [BoneAtom],
    ) {
        for &bone in desired_bones {
            component[bone] = match self.parent_index(bone) {
                Some(parent) => component[parent].compose(&local_atoms[bone]),
                None => local_atoms[bone],
            };
        }
    }
}

impl Default for Skeleton {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for easier skeleton construction
pub struct SkeletonBuilder {
    skeleton: Skeleton,
    last_error: Option<Error>,
}

impl SkeletonBuilder {
    /// Create a new skeleton builder
    pub fn new() -> Self {
        Self {
            skeleton: Skeleton::new(),
            last_error: None,
        }
    }

    /// Add the root bone (no parent)
    pub fn add_root(mut self, name: &str, ref_pose: BoneAtom) -> Self {
        if self.last_error.is_some() {
            return self;
        }

        if let Err(e) = self.skeleton.add_bone(Bone::new(name, None, ref_pose)) {
            self.last_error = Some(e);
        }
        self
    }

    /// Add a bone with a parent
    pub fn add_bone(mut self, name: &str, parent: &str, ref_pose: BoneAtom) -> Self {
        if self.last_error.is_some() {
            return self;
        }

        let parent_index = match self.skeleton.find_bone(parent) {
            Some(idx) => idx,
            None => {
                self.last_error = Some(Error::UnknownBone(parent.to_string()));
                return self;
            }
        };

        if let Err(e) = self.skeleton.add_bone(Bone::new(name, Some(parent_index), ref_pose)) {
            self.last_error = Some(e);
        }
        self
    }

    /// Build the final skeleton
    pub fn build(self) -> Result<Skeleton> {
        if let Some(error) = self.last_error {
            Err(error)
        } else if self.skeleton.bones.is_empty() {
            Err(Error::Skeleton("Skeleton must have at least one bone".into()))
        } else {
            Ok(self.skeleton)
        }
    }
}

impl Default for SkeletonBuilder {
    fn default() -> Self {
        Self::new()
    }
}
