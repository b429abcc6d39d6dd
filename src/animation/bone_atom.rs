//! Decomposed bone transforms and weighted blending arithmetic

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Weights at or below this are treated as zero, and weights at or above
/// `1.0 - ZERO_WEIGHT_THRESHOLD` as fully weighted.
pub const ZERO_WEIGHT_THRESHOLD: f32 = 0.00001;

/// Generic "close enough" tolerance used by blend timers and angle checks.
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// A bone transform stored as rotation, translation and uniform scale.
///
/// Atoms are added and scaled component-wise during blending, which means a
/// rotation may be temporarily unnormalized. Callers normalize after the last
/// contribution with [`BoneAtom::normalize_rotation`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneAtom {
    pub rotation: Quat,
    pub translation: Vec3,
    pub scale: f32,
}

impl BoneAtom {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: 1.0,
    };

    /// All components zero; the starting point for weighted accumulation.
    pub const ZERO: Self = Self {
        rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
        translation: Vec3::ZERO,
        scale: 0.0,
    };

    pub fn new(rotation: Quat, translation: Vec3, scale: f32) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Add `other * weight` into this atom, flipping the incoming rotation
    /// when it lies in the opposite hemisphere so the sum takes the short arc.
    pub fn accumulate(&mut self, other: &BoneAtom, weight: f32) {
        let rotation = if self.rotation.dot(other.rotation) < 0.0 {
            -other.rotation
        } else {
            other.rotation
        };
        self.rotation = self.rotation + rotation * weight;
        self.translation += other.translation * weight;
        self.scale += other.scale * weight;
    }

    pub fn normalize_rotation(&mut self) {
        self.rotation = self.rotation.normalize();
    }

    /// Linear blend from `a` to `b` with shortest-path rotation.
    ///
    /// Returns `a` or `b` untouched at the extremes so pass-through bones stay exact.
    pub fn blend(a: &BoneAtom, b: &BoneAtom, alpha: f32) -> BoneAtom {
        if alpha <= ZERO_WEIGHT_THRESHOLD {
            return *a;
        }
        if alpha >= 1.0 - ZERO_WEIGHT_THRESHOLD {
            return *b;
        }
        BoneAtom {
            rotation: lerp_quat(a.rotation, b.rotation, alpha),
            translation: a.translation.lerp(b.translation, alpha),
            scale: a.scale + (b.scale - a.scale) * alpha,
        }
    }

    /// Apply `local` in the space of `self`, giving the child's component-space atom.
    pub fn compose(&self, local: &BoneAtom) -> BoneAtom {
        BoneAtom {
            rotation: self.rotation * local.rotation,
            translation: self.translation + self.rotation * (local.translation * self.scale),
            scale: self.scale * local.scale,
        }
    }

    pub fn inverse(&self) -> BoneAtom {
        let scale = if self.scale.abs() > f32::EPSILON {
            1.0 / self.scale
        } else {
            0.0
        };
        let rotation = self.rotation.inverse();
        BoneAtom {
            rotation,
            translation: rotation * (-self.translation * scale),
            scale,
        }
    }

    /// Express the component-space atom `self` relative to its parent's component-space atom.
    pub fn relative_to(&self, parent: &BoneAtom) -> BoneAtom {
        parent.inverse().compose(self)
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), self.rotation, self.translation)
    }

    /// Decompose a matrix; non-uniform scale is averaged.
    pub fn from_matrix(matrix: &Mat4) -> BoneAtom {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        BoneAtom {
            rotation: rotation.normalize(),
            translation,
            scale: (scale.x + scale.y + scale.z) / 3.0,
        }
    }
}

impl Default for BoneAtom {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul<f32> for BoneAtom {
    type Output = BoneAtom;

    fn mul(self, weight: f32) -> BoneAtom {
        BoneAtom {
            rotation: self.rotation * weight,
            translation: self.translation * weight,
            scale: self.scale * weight,
        }
    }
}

/// Normalized linear interpolation between two rotations along the short arc.
pub fn lerp_quat(a: Quat, b: Quat, alpha: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    (a * (1.0 - alpha) + b * alpha).normalize()
}

/// Bilinear interpolation of four rotations, short arc on both axes.
pub fn bilerp_quat(p00: Quat, p10: Quat, p01: Quat, p11: Quat, frac_x: f32, frac_y: f32) -> Quat {
    lerp_quat(lerp_quat(p00, p10, frac_x), lerp_quat(p01, p11, frac_x), frac_y)
}

pub fn bilerp_vec3(p00: Vec3, p10: Vec3, p01: Vec3, p11: Vec3, frac_x: f32, frac_y: f32) -> Vec3 {
    p00.lerp(p10, frac_x).lerp(p01.lerp(p11, frac_x), frac_y)
}

/// Root motion reported by an evaluated subtree for the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RootMotion {
    pub delta: BoneAtom,
    pub has_root_motion: bool,
}

impl RootMotion {
    pub const NONE: Self = Self {
        delta: BoneAtom::IDENTITY,
        has_root_motion: false,
    };

    pub fn new(delta: BoneAtom) -> Self {
        Self {
            delta,
            has_root_motion: true,
        }
    }
}

impl Default for RootMotion {
    fn default() -> Self {
        Self::NONE
    }
}
