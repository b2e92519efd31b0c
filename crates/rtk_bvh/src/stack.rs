//! Fixed capacity traversal stack.

use crate::error::TraversalError;
use crate::types::{BVH_STACK_SIZE, ENTRYPOINT_SENTINEL};

/// Node references deferred by the walk.
///
/// Starts with [`ENTRYPOINT_SENTINEL`] at the bottom and never allocates.
pub struct TraversalStack {
    entries: [i32; BVH_STACK_SIZE],
    len: usize,
}

impl TraversalStack {
    pub fn new() -> Self {
        let mut entries = [0; BVH_STACK_SIZE];
        entries[0] = ENTRYPOINT_SENTINEL;
        Self { entries, len: 1 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, addr: i32) -> Result<(), TraversalError> {
        if self.len == BVH_STACK_SIZE {
            return Err(TraversalError::StackOverflow {
                capacity: BVH_STACK_SIZE,
            });
        }
        self.entries[self.len] = addr;
        self.len += 1;
        Ok(())
    }

    /// Pop the next node. An exhausted stack reads as the sentinel.
    #[inline]
    pub fn pop(&mut self) -> i32 {
        if self.len == 0 {
            return ENTRYPOINT_SENTINEL;
        }
        self.len -= 1;
        self.entries[self.len]
    }
}

impl Default for TraversalStack {
    fn default() -> Self {
        Self::new()
    }
}
