// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Monotonic command tags used to order accesses in time.
//!
//! Every recorded command is assigned a [`ResourceUsageTag`] by the command buffer's own
//! [`TagAllocator`]. There is no ambient or global counter: threading the allocator through the
//! owning command buffer keeps tag allocation reproducible and keeps two command buffers
//! recorded on different threads from racing on a shared atomic.

use std::collections::HashSet;
use std::ops::Range;

/// A monotonically increasing identifier for a recorded command.
///
/// Tags order accesses within a single recording; they are also used, offset by a replay's
/// `base_tag`, to correlate a recorded command buffer's accesses with the live queue state they
/// are replayed against.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceUsageTag(pub u64);

impl ResourceUsageTag {
    pub const fn new(value: u64) -> Self {
        ResourceUsageTag(value)
    }

    /// Offsets this tag by `delta`, as performed when a recorded command buffer's accesses are
    /// folded into a queue batch's replay state.
    pub fn offset(self, delta: u64) -> Self {
        ResourceUsageTag(self.0 + delta)
    }
}

/// A tag paired with a secondary sub-index, used where a single command records more than one
/// access (e.g. a set of image barriers within one `PipelineBarrier` call) and hazards must be
/// attributable to the specific sub-access.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ResourceUsageTagEx {
    pub tag: ResourceUsageTag,
    pub index: u32,
}

impl ResourceUsageTagEx {
    pub fn new(tag: ResourceUsageTag, index: u32) -> Self {
        ResourceUsageTagEx { tag, index }
    }
}

impl From<ResourceUsageTag> for ResourceUsageTagEx {
    fn from(tag: ResourceUsageTag) -> Self {
        ResourceUsageTagEx { tag, index: 0 }
    }
}

/// A half-open range of tags, `[begin, end)`, used by first-use replay validation to describe
/// "everything this command buffer recorded, relative to the batch's base tag".
pub type ResourceUsageRange = Range<u64>;

/// The set of tags an [`AccessState`](crate::access_state::AccessState) actually references,
/// gathered before replay so that only the referenced subset of a recorded command buffer's
/// tag space needs to be considered.
#[derive(Default, Debug, Clone)]
pub struct ResourceUsageTagSet(HashSet<ResourceUsageTag>);

impl ResourceUsageTagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: ResourceUsageTag) {
        self.0.insert(tag);
    }

    pub fn contains(&self, tag: ResourceUsageTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hands out strictly increasing [`ResourceUsageTag`]s for a single command buffer recording.
///
/// Owned by the recording command buffer; never a static or thread-local. Two command buffers
/// being recorded concurrently on different threads each own an independent allocator, so tags
/// are only ever compared meaningfully within one recording (or after a replay has applied its
/// `base_tag` offset).
#[derive(Debug, Default)]
pub struct TagAllocator {
    next: u64,
}

impl TagAllocator {
    pub fn new() -> Self {
        TagAllocator { next: 0 }
    }

    /// Allocates the next tag and advances the counter.
    pub fn next_tag(&mut self) -> ResourceUsageTag {
        let tag = ResourceUsageTag(self.next);
        self.next += 1;
        tag
    }

    /// The tag that will be returned by the next call to [`next_tag`](Self::next_tag), useful
    /// for computing a replay `base_tag` before any command has been recorded against it.
    pub fn peek(&self) -> ResourceUsageTag {
        ResourceUsageTag(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_increase_monotonically() {
        let mut alloc = TagAllocator::new();
        let a = alloc.next_tag();
        let b = alloc.next_tag();
        let c = alloc.next_tag();
        assert!(a < b && b < c);
    }

    #[test]
    fn offset_shifts_tag_for_replay() {
        let tag = ResourceUsageTag(5);
        assert_eq!(tag.offset(100), ResourceUsageTag(105));
    }
}
