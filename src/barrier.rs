// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Barrier construction: [`SyncExecScope`], [`SyncBarrier`], [`BarrierScope`] and the
//! [`BarrierSet`] assembled from either a Sync1 (single global src/dst scope) or Sync2
//! (`VkDependencyInfo`-shaped, per-barrier scope) submission.

use crate::queue::QueueId;
use crate::range_map::{AccessRange, RangeGen};
use ash::vk;
use smallvec::SmallVec;

/// One side (source or destination) of a barrier: the stage mask the caller actually wrote, the
/// expanded execution scope that mask implies (e.g. `ALL_COMMANDS` expands to every stage), and
/// the access mask scope. Detectors only ever need `exec_scope`/`access_scope`; `mask` is kept
/// around for diagnostics and for re-deriving a narrower scope when chaining barriers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncExecScope {
    pub mask: vk::PipelineStageFlags2,
    pub exec_scope: vk::PipelineStageFlags2,
    pub access_scope: vk::AccessFlags2,
}

impl SyncExecScope {
    /// Builds the source side of a barrier: the expanded scope is exactly the stages named (a
    /// source scope never implicitly expands past what already executed).
    pub fn make_src(mask: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        SyncExecScope { mask, exec_scope: mask, access_scope: access }
    }

    /// Builds the destination side of a barrier. Identical shape to `make_src`; kept as a
    /// separate constructor because the original source and destination expansions diverge once
    /// logically-later-stage rules are modeled (not yet implemented here).
    pub fn make_dst(mask: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        SyncExecScope { mask, exec_scope: mask, access_scope: access }
    }
}

/// A source/destination pair of execution and access scopes, the atomic unit hazard detection
/// and barrier application reason about.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncBarrier {
    pub src: SyncExecScope,
    pub dst: SyncExecScope,
}

impl SyncBarrier {
    pub fn new(src: SyncExecScope, dst: SyncExecScope) -> Self {
        SyncBarrier { src, dst }
    }

    /// An execution-only barrier: stages but no access masks. Synthesized whenever a Sync2
    /// buffer/image barrier needs to contribute an execution dependency broader than its own
    /// memory scope (see [`BarrierSet::from_sync2`]).
    pub fn exec_only(src_mask: vk::PipelineStageFlags2, dst_mask: vk::PipelineStageFlags2) -> Self {
        SyncBarrier {
            src: SyncExecScope::make_src(src_mask, vk::AccessFlags2::empty()),
            dst: SyncExecScope::make_dst(dst_mask, vk::AccessFlags2::empty()),
        }
    }

    /// Two barriers chain if the source stages of one intersect the destination stages of the
    /// other: an access made visible to `self.dst` is then made available from `other.src`.
    pub fn chains_with(&self, other: &SyncBarrier) -> bool {
        self.dst.exec_scope.intersects(other.src.exec_scope)
    }
}

/// A [`SyncBarrier`] together with the queue it scopes to. `scope_queue == QueueId::INVALID`
/// means "no queue-family ownership transfer is implied"; any other value suppresses the
/// barrier's layout transition, since an ownership-transfer barrier's layout change belongs to
/// the *other* half of the acquire/release pair, not to this scope.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BarrierScope {
    pub barrier: SyncBarrier,
    pub scope_queue: QueueId,
}

impl BarrierScope {
    pub fn new(barrier: SyncBarrier) -> Self {
        BarrierScope { barrier, scope_queue: QueueId::INVALID }
    }

    pub fn with_queue(barrier: SyncBarrier, scope_queue: QueueId) -> Self {
        BarrierScope { barrier, scope_queue }
    }

    /// Whether a layout transition attached to this barrier should actually be applied, per the
    /// queue-ownership-transfer suppression rule documented on the struct.
    pub fn applies_layout_transition(&self) -> bool {
        !self.scope_queue.is_valid()
    }
}

/// A buffer barrier: the target range plus the barrier scope. `resource` is an opaque handle the
/// shim assigns; this crate never dereferences it, only uses it to key per-resource state.
#[derive(Copy, Clone, Debug)]
pub struct BufferMemoryBarrier<H> {
    pub resource: H,
    pub barrier: SyncBarrier,
    pub range: AccessRange,
}

/// An image barrier: a [`RangeGen`] standing in for the subresource range flattened against the
/// image's address space, plus whether this barrier performs a layout transition and the
/// `barrier_index` used to attribute a detected hazard to one barrier among several passed to a
/// single `PipelineBarrier` call.
#[derive(Clone, Debug)]
pub struct ImageMemoryBarrier<H> {
    pub resource: H,
    pub barrier: SyncBarrier,
    pub range_gen: RangeGen,
    pub layout_transition: bool,
    pub barrier_index: u32,
}

/// The full set of barriers recorded by one `PipelineBarrier`/`WaitEvents` call, decomposed into
/// global, buffer-scoped and image-scoped memory barriers.
///
/// `single_exec_scope` is `true` for a Sync1 (`vkCmdPipelineBarrier`) submission, where every
/// buffer/image barrier shares exactly one global src/dst execution scope, and `false` for Sync2
/// (`VkDependencyInfo`), where each barrier carries its own stage mask and additional
/// execution-only memory barriers must be synthesized from the unique `(src_stage, dst_stage)`
/// pairs actually used (see [`BarrierSet::from_sync2`]).
#[derive(Clone, Debug, Default)]
pub struct BarrierSet<H> {
    pub memory_barriers: SmallVec<[SyncBarrier; 4]>,
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier<H>; 4]>,
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier<H>; 4]>,
    pub single_exec_scope: bool,
}

impl<H> BarrierSet<H> {
    pub fn new() -> Self {
        BarrierSet {
            memory_barriers: SmallVec::new(),
            buffer_memory_barriers: SmallVec::new(),
            image_memory_barriers: SmallVec::new(),
            single_exec_scope: false,
        }
    }

    /// Builds a Sync1 `vkCmdPipelineBarrier`-shaped set: every buffer/image barrier is implicitly
    /// scoped by the single `(src, dst)` pair passed in. If no explicit global memory barrier was
    /// given, one execution-only barrier is still synthesized so an execution dependency is
    /// captured even when the call carried only buffer/image barriers (or none at all).
    pub fn from_sync1(
        src: SyncExecScope,
        dst: SyncExecScope,
        global_memory_barriers: impl IntoIterator<Item = SyncBarrier>,
        buffer_barriers: impl IntoIterator<Item = (H, AccessRange)>,
        image_barriers: impl IntoIterator<Item = (H, RangeGen, bool)>,
    ) -> Self {
        let mut set = BarrierSet::new();
        set.single_exec_scope = true;
        set.memory_barriers.extend(global_memory_barriers);
        if set.memory_barriers.is_empty() {
            set.memory_barriers.push(SyncBarrier::new(src, dst));
        }
        let barrier = SyncBarrier::new(src, dst);
        for (resource, range) in buffer_barriers {
            set.buffer_memory_barriers.push(BufferMemoryBarrier { resource, barrier, range });
        }
        for (index, (resource, range_gen, layout_transition)) in image_barriers.into_iter().enumerate() {
            set.image_memory_barriers.push(ImageMemoryBarrier {
                resource,
                barrier,
                range_gen,
                layout_transition,
                barrier_index: index as u32,
            });
        }
        set
    }

    /// Builds a Sync2 (`VkDependencyInfo`-shaped) set: each buffer/image barrier carries its own
    /// `(src, dst)` scope. Because a buffer/image barrier only scopes *memory* to its own range,
    /// but the execution dependency it implies must still order *every* access in the named
    /// stages regardless of range, this additionally synthesizes one execution-only
    /// [`SyncBarrier`] per unique `(src_mask, dst_mask)` pair actually used by a buffer or image
    /// barrier (deduplicated), alongside the explicit global memory barriers.
    pub fn from_sync2(
        global_memory_barriers: impl IntoIterator<Item = SyncBarrier>,
        buffer_barriers: impl IntoIterator<Item = (H, SyncExecScope, SyncExecScope, AccessRange)>,
        image_barriers: impl IntoIterator<Item = (H, SyncExecScope, SyncExecScope, RangeGen, bool)>,
    ) -> Self {
        let mut set = BarrierSet::new();
        set.single_exec_scope = false;
        set.memory_barriers.extend(global_memory_barriers);

        let mut exec_pairs: SmallVec<[(vk::PipelineStageFlags2, vk::PipelineStageFlags2); 4]> = SmallVec::new();
        let mut note_pair = |src_mask: vk::PipelineStageFlags2, dst_mask: vk::PipelineStageFlags2| {
            if !exec_pairs.iter().any(|(s, d)| *s == src_mask && *d == dst_mask) {
                exec_pairs.push((src_mask, dst_mask));
            }
        };

        let buffer_barriers: SmallVec<[_; 4]> = buffer_barriers.into_iter().collect();
        for (resource, src, dst, range) in buffer_barriers {
            note_pair(src.mask, dst.mask);
            set.buffer_memory_barriers.push(BufferMemoryBarrier {
                resource,
                barrier: SyncBarrier::new(src, dst),
                range,
            });
        }

        let image_barriers: SmallVec<[_; 4]> = image_barriers.into_iter().collect();
        for (index, (resource, src, dst, range_gen, layout_transition)) in image_barriers.into_iter().enumerate() {
            note_pair(src.mask, dst.mask);
            set.image_memory_barriers.push(ImageMemoryBarrier {
                resource,
                barrier: SyncBarrier::new(src, dst),
                range_gen,
                layout_transition,
                barrier_index: index as u32,
            });
        }

        for (src_mask, dst_mask) in exec_pairs {
            set.memory_barriers.push(SyncBarrier::exec_only(src_mask, dst_mask));
        }

        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::{AccessFlags2, PipelineStageFlags2};

    fn scope(stage: PipelineStageFlags2, access: AccessFlags2) -> SyncExecScope {
        SyncExecScope::make_src(stage, access)
    }

    #[test]
    fn sync1_with_no_memory_barriers_synthesizes_one_exec_only() {
        let src = scope(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_WRITE);
        let dst = scope(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_READ);
        let set: BarrierSet<u32> = BarrierSet::from_sync1(src, dst, [], [], []);
        assert_eq!(set.memory_barriers.len(), 1);
        assert!(set.single_exec_scope);
    }

    #[test]
    fn sync2_dedups_exec_only_barriers_by_stage_pair() {
        let src = scope(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_WRITE);
        let dst = scope(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_READ);
        let set: BarrierSet<u32> = BarrierSet::from_sync2(
            [],
            [
                (1u32, src, dst, AccessRange::new(0, 16)),
                (2u32, src, dst, AccessRange::new(16, 32)),
            ],
            [],
        );
        // Two buffer barriers share the same (src, dst) stage pair, so exactly one execution-only
        // barrier should be synthesized, not two.
        assert_eq!(set.memory_barriers.len(), 1);
        assert_eq!(set.buffer_memory_barriers.len(), 2);
    }

    #[test]
    fn chains_with_detects_stage_intersection() {
        let a = SyncBarrier::new(
            scope(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_WRITE),
            scope(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_READ),
        );
        let b = SyncBarrier::new(
            scope(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_READ),
            scope(PipelineStageFlags2::COMPUTE_SHADER, AccessFlags2::SHADER_WRITE),
        );
        assert!(a.chains_with(&b));

        let c = SyncBarrier::new(
            scope(PipelineStageFlags2::VERTEX_SHADER, AccessFlags2::SHADER_READ),
            scope(PipelineStageFlags2::COMPUTE_SHADER, AccessFlags2::SHADER_WRITE),
        );
        assert!(!a.chains_with(&c));
    }

    #[test]
    fn queue_scoped_barrier_suppresses_layout_transition() {
        let barrier = SyncBarrier::new(
            scope(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_WRITE),
            scope(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_READ),
        );
        let unscoped = BarrierScope::new(barrier);
        assert!(unscoped.applies_layout_transition());

        let scoped = BarrierScope::with_queue(barrier, QueueId(2));
        assert!(!scoped.applies_layout_transition());
    }
}
