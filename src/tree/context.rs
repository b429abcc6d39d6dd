//! Per-tree traversal counters

use std::hash::{DefaultHasher, Hash, Hasher};

/// Generation counters owned by a tree.
///
/// Each traversal bumps its counter and stamps the nodes it visits, so
/// "already visited this pass" is a comparison against the current value
/// rather than a flag that needs clearing.
#[derive(Clone, Debug, Default)]
pub struct TraversalContext {
    tick_tag: u64,
    frame_tag: u64,
    search_tag: u64,
}

impl TraversalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a new tick order
    pub fn next_tick(&mut self) -> u64 {
        self.tick_tag += 1;
        self.tick_tag
    }

    /// Start a new pose evaluation; invalidates every cached pose
    pub fn next_frame(&mut self) -> u64 {
        self.frame_tag += 1;
        self.frame_tag
    }

    /// Start a new graph search
    pub fn next_search(&mut self) -> u64 {
        self.search_tag += 1;
        self.search_tag
    }

    pub fn tick_tag(&self) -> u64 {
        self.tick_tag
    }

    pub fn frame_tag(&self) -> u64 {
        self.frame_tag
    }

    pub fn search_tag(&self) -> u64 {
        self.search_tag
    }
}

/// Hash identifying a desired-bone list for pose caching
pub fn bone_set_hash(bones: &[usize]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bones.hash(&mut hasher);
    hasher.finish()
}
