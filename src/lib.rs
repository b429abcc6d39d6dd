//! Animtree - hierarchical skeletal animation blend trees

pub mod core;
pub mod animation;
pub mod tree;
