// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! [`AccessState`]: the per-range record an [`crate::range_map::AccessMap`] keys on, and the
//! core classification logic the [`crate::hazard`] detector family wraps.

use crate::access::{get_access_info, get_ordering_rules, AccessKind, OrderingBarrier, SyncAccessIndex, SyncFlags, SyncOrdering};
use crate::barrier::{BarrierScope, SyncBarrier};
use crate::hazard::{Hazard, HazardKind, HazardResult};
use crate::queue::QueueId;
use crate::tag::{ResourceUsageRange, ResourceUsageTag, ResourceUsageTagEx, ResourceUsageTagSet};
use ash::vk;
use smallvec::SmallVec;

/// A single recorded write, tagged with when, on which queue, and which destination stages have
/// already had a barrier chained against it (`barriers`, used both for `apply_barrier`
/// idempotence and for [`AccessState::detect_barrier_hazard`]'s coverage test).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub index: SyncAccessIndex,
    pub tag: ResourceUsageTagEx,
    pub queue_id: QueueId,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub barriers: vk::PipelineStageFlags2,
}

impl WriteRecord {
    fn new(index: SyncAccessIndex, tag: ResourceUsageTagEx, queue_id: QueueId) -> Self {
        let info = get_access_info(index);
        WriteRecord {
            index,
            tag,
            queue_id,
            stage: info.stage,
            access: info.access,
            barriers: vk::PipelineStageFlags2::empty(),
        }
    }
}

/// A single recorded read. Distinct reads can coexist (two read kinds at once never conflict with
/// each other), so `last_reads` is a small collection rather than a single slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadRecord {
    pub index: SyncAccessIndex,
    pub tag: ResourceUsageTagEx,
    pub queue_id: QueueId,
    pub stage: vk::PipelineStageFlags2,
    pub barriers: vk::PipelineStageFlags2,
}

impl ReadRecord {
    fn new(index: SyncAccessIndex, tag: ResourceUsageTagEx, queue_id: QueueId) -> Self {
        let info = get_access_info(index);
        ReadRecord { index, tag, queue_id, stage: info.stage, barriers: vk::PipelineStageFlags2::empty() }
    }
}

/// Per-range access history. A value in an [`crate::range_map::AccessMap`]; meaningless on its
/// own without the owning [`crate::context::AccessContext`] (which supplies the global-barrier
/// queue `next_global_barrier_index` indexes into).
#[derive(Clone, Debug, Default)]
pub struct AccessState {
    pub last_writes: SmallVec<[WriteRecord; 2]>,
    pub last_reads: SmallVec<[ReadRecord; 4]>,
    pub pending_layout_transition: Option<WriteRecord>,
    pub first_access_range: Option<ResourceUsageRange>,
    pub next_global_barrier_index: usize,
    pub input_attachment_read_barriers: vk::PipelineStageFlags2,
}

impl AccessState {
    pub fn new() -> Self {
        AccessState::default()
    }

    fn note_first_access(&mut self, tag: ResourceUsageTag) {
        let t = tag.0;
        self.first_access_range = Some(match self.first_access_range.take() {
            Some(r) => r.start.min(t)..r.end.max(t + 1),
            None => t..t + 1,
        });
    }

    /// A write is exclusive: at most one can be live on a range at a time (`update` clears prior
    /// writes), so "the" conflicting write is simply whichever one is recorded.
    fn conflicting_write(&self, _info: &crate::access::SyncAccessInfo) -> Option<&WriteRecord> {
        self.last_writes.first()
    }

    /// Classifies `index` against this state's recorded writes/reads with no ordering exception
    /// and no barrier coverage check. Mirrors `AccessState::DetectHazard(info)`.
    pub fn detect_hazard(&self, index: SyncAccessIndex) -> HazardResult {
        self.detect_hazard_with_ordering(index, SyncOrdering::None, SyncFlags::NONE, QueueId::INVALID, false)
    }

    /// As [`detect_hazard`](Self::detect_hazard), but consults an ordering-guarantee rule: an
    /// access that would otherwise hazard is waved through when the conflicting prior access lies
    /// entirely within the rule's already-ordered stage/access scope.
    pub fn detect_hazard_with_ordering(
        &self,
        index: SyncAccessIndex,
        ordering: SyncOrdering,
        _flags: SyncFlags,
        _queue_id: QueueId,
        _detect_load_op_after_store_op: bool,
    ) -> HazardResult {
        let info = get_access_info(index);
        let rule: OrderingBarrier = get_ordering_rules(ordering);
        let ordered = |stage: vk::PipelineStageFlags2, access: vk::AccessFlags2| {
            !rule.exec_scope.is_empty() && rule.exec_scope.contains(stage) && rule.access_scope.contains(access)
        };
        // A prior write/read that has already had a barrier chained against it covering the
        // stage of the access about to be recorded is synchronized: `apply_barrier` ORs the
        // barrier's destination scope into `barriers` precisely so this check can waive it here,
        // instead of every detector re-deriving barrier coverage from scratch.
        let barriered = |record_barriers: vk::PipelineStageFlags2| record_barriers.contains(info.stage);

        match info.kind {
            AccessKind::Write => {
                if let Some(r) = self
                    .last_reads
                    .iter()
                    .find(|r| !ordered(r.stage, vk::AccessFlags2::empty()) && !barriered(r.barriers))
                {
                    return HazardResult(Some(Hazard {
                        kind: HazardKind::WriteAfterRead,
                        tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                        prior_tag: r.tag,
                    }));
                }
                if let Some(w) = self.conflicting_write(info) {
                    if !ordered(w.stage, w.access) && !barriered(w.barriers) {
                        return HazardResult(Some(Hazard {
                            kind: HazardKind::WriteAfterWrite,
                            tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                            prior_tag: w.tag,
                        }));
                    }
                }
                HazardResult::none()
            }
            AccessKind::Read => {
                if let Some(w) = self.conflicting_write(info) {
                    if !ordered(w.stage, w.access) && !barriered(w.barriers) {
                        return HazardResult(Some(Hazard {
                            kind: HazardKind::ReadAfterWrite,
                            tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                            prior_tag: w.tag,
                        }));
                    }
                }
                // Read-after-read never hazards; `WriteAfterReadNotHazard` documents the slot in
                // the taxonomy but this path never actually constructs it.
                HazardResult::none()
            }
        }
    }

    /// Reports a hazard iff the prior-recorded conflicting access is not already covered by
    /// `(src_exec_scope, src_access_scope)` — i.e. the barrier about to be applied would be
    /// insufficient to synchronize against what's already here.
    pub fn detect_barrier_hazard(
        &self,
        index: SyncAccessIndex,
        _queue_id: QueueId,
        src_exec_scope: vk::PipelineStageFlags2,
        src_access_scope: vk::AccessFlags2,
    ) -> HazardResult {
        let info = get_access_info(index);
        let covered = |stage: vk::PipelineStageFlags2, access: vk::AccessFlags2| {
            src_exec_scope.contains(stage) && src_access_scope.contains(access)
        };
        match info.kind {
            AccessKind::Write => {
                for r in &self.last_reads {
                    if !covered(r.stage, vk::AccessFlags2::empty()) {
                        return HazardResult(Some(Hazard {
                            kind: HazardKind::BarrierInsufficient,
                            tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                            prior_tag: r.tag,
                        }));
                    }
                }
                HazardResult::none()
            }
            AccessKind::Read => {
                if let Some(w) = self.conflicting_write(info) {
                    if !covered(w.stage, w.access) {
                        return HazardResult(Some(Hazard {
                            kind: HazardKind::BarrierInsufficient,
                            tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                            prior_tag: w.tag,
                        }));
                    }
                }
                HazardResult::none()
            }
        }
    }

    /// Reports iff some recorded access at `start_tag` or later came from a different queue:
    /// asynchronous accesses are never covered by barriers, since no execution ordering between
    /// queues is implied without an explicit submission-order dependency.
    pub fn detect_async_hazard(&self, _index: SyncAccessIndex, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        for w in &self.last_writes {
            if w.queue_id != queue_id && w.tag.tag.0 >= start_tag.0 {
                return HazardResult(Some(Hazard {
                    kind: HazardKind::AsyncRace,
                    tag: ResourceUsageTagEx::from(start_tag),
                    prior_tag: w.tag,
                }));
            }
        }
        for r in &self.last_reads {
            if r.queue_id != queue_id && r.tag.tag.0 >= start_tag.0 {
                return HazardResult(Some(Hazard {
                    kind: HazardKind::AsyncRace,
                    tag: ResourceUsageTagEx::from(start_tag),
                    prior_tag: r.tag,
                }));
            }
        }
        HazardResult::none()
    }

    /// Reports iff this range was written without ever having had a barrier folded in —
    /// implemented as the same under-synchronized-write test as
    /// [`detect_barrier_hazard`](Self::detect_barrier_hazard) with an empty scope, reported under
    /// `BarrierInsufficient` since the taxonomy has no dedicated marker variant.
    pub fn detect_marker_hazard(&self) -> HazardResult {
        if let Some(w) = self.last_writes.iter().find(|w| w.barriers.is_empty()) {
            return HazardResult(Some(Hazard {
                kind: HazardKind::BarrierInsufficient,
                tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                prior_tag: w.tag,
            }));
        }
        HazardResult::none()
    }

    /// Folds `barrier` (scoped by `scope`) into this state: every recorded write/read whose
    /// stage/access lies in the barrier's source scope, *or* whose already-accumulated
    /// `barriers` does, has the barrier's destination scope OR'd into its `barriers` field. The
    /// accumulated-barriers check is what lets a second barrier chain off a first: once a write's
    /// `barriers` has been widened to include some stage, a later barrier sourced from that stage
    /// extends coverage further, instead of only ever comparing against the write's original
    /// stage. Returns whether anything actually changed — applying the same barrier twice is a
    /// no-op the second time, which is what makes the global-barrier chaining fixpoint in
    /// [`crate::context::AccessContext::apply_global_barriers`] terminate.
    pub fn apply_barrier(&mut self, scope: &BarrierScope, barrier: &SyncBarrier, layout_transition: bool, exec_tag: ResourceUsageTagEx) -> bool {
        let mut changed = false;
        for w in self.last_writes.iter_mut() {
            if barrier.src.exec_scope.intersects(w.stage)
                || barrier.src.exec_scope.intersects(w.barriers)
                || barrier.src.access_scope.intersects(w.access)
            {
                let merged = w.barriers | barrier.dst.exec_scope;
                if merged != w.barriers {
                    w.barriers = merged;
                    changed = true;
                }
            }
        }
        for r in self.last_reads.iter_mut() {
            if barrier.src.exec_scope.intersects(r.stage) || barrier.src.exec_scope.intersects(r.barriers) {
                let merged = r.barriers | barrier.dst.exec_scope;
                if merged != r.barriers {
                    r.barriers = merged;
                    changed = true;
                }
            }
        }
        if layout_transition && scope.applies_layout_transition() {
            if self.pending_layout_transition.is_none() {
                self.pending_layout_transition =
                    Some(WriteRecord::new(SyncAccessIndex::ImageLayoutTransition, exec_tag, QueueId::INVALID));
                changed = true;
            }
        }
        changed
    }

    /// Records a barrier's effect without mutating this state; the returned entry is later folded
    /// in via [`PendingBarriers::apply`], so that several barriers collected in one call all
    /// observe the same pre-barrier state rather than seeing each other's effects.
    pub fn collect_pending_barriers(
        &self,
        scope: BarrierScope,
        barrier: SyncBarrier,
        layout_transition: bool,
    ) -> PendingBarrierEntry {
        PendingBarrierEntry { scope, barrier, layout_transition }
    }

    /// Records a new access at `tag`, overwriting prior records per the implicit ordering rules:
    /// a write clears all prior reads and writes (nothing survives a write uncontested); a read is
    /// added alongside any existing reads (multiple reads coexist) but does not disturb prior
    /// writes (those remain visible to a later write's WAW/WAR check).
    pub fn update(&mut self, index: SyncAccessIndex, tag: ResourceUsageTagEx, queue_id: QueueId) {
        let info = get_access_info(index);
        self.note_first_access(tag.tag);
        match info.kind {
            AccessKind::Write => {
                self.last_writes.clear();
                self.last_reads.clear();
                self.pending_layout_transition = None;
                self.last_writes.push(WriteRecord::new(index, tag, queue_id));
            }
            AccessKind::Read => {
                self.last_reads.push(ReadRecord::new(index, tag, queue_id));
            }
        }
    }

    /// Merges `other`'s history into `self`, used when two parallel accesses (e.g. two resolved
    /// trackback edges) must be folded into one downstream entry. Keeps the more recent record of
    /// each kind rather than accumulating unboundedly.
    pub fn resolve(&mut self, other: &AccessState) {
        for w in &other.last_writes {
            if !self.last_writes.iter().any(|existing| existing.tag == w.tag) {
                self.last_writes.push(*w);
            }
        }
        for r in &other.last_reads {
            if !self.last_reads.iter().any(|existing| existing.tag == r.tag) {
                self.last_reads.push(*r);
            }
        }
        self.first_access_range = match (self.first_access_range.clone(), other.first_access_range.clone()) {
            (Some(a), Some(b)) => Some(a.start.min(b.start)..a.end.max(b.end)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
    }

    /// Bounds this state's view of the global-barrier queue to `count` entries — applied whenever
    /// a state crosses from one [`crate::context::AccessContext`] into another, so that barriers
    /// registered in the source context never silently apply in the destination.
    pub fn clamp_global_barrier_index(&mut self, count: usize) {
        self.next_global_barrier_index = self.next_global_barrier_index.min(count);
    }

    /// Collects every tag this state references, for the first-use replay pass.
    pub fn gather_referenced_tags(&self, set: &mut ResourceUsageTagSet) {
        for w in &self.last_writes {
            set.insert(w.tag.tag);
        }
        for r in &self.last_reads {
            set.insert(r.tag.tag);
        }
    }

    /// Shifts every tag recorded in this state by `delta`, as performed when a recorded command
    /// buffer's accesses are folded into a queue batch's replay state.
    pub fn offset_tag(&mut self, delta: u64) {
        for w in self.last_writes.iter_mut() {
            w.tag.tag = w.tag.tag.offset(delta);
        }
        for r in self.last_reads.iter_mut() {
            r.tag.tag = r.tag.tag.offset(delta);
        }
    }

    /// Overwrites the queue identity of every record in this state, as performed once a recorded
    /// command buffer is actually submitted to a specific queue.
    pub fn set_queue_id(&mut self, queue_id: QueueId) {
        for w in self.last_writes.iter_mut() {
            w.queue_id = queue_id;
        }
        for r in self.last_reads.iter_mut() {
            r.queue_id = queue_id;
        }
    }

    /// Whether this state's earliest recorded access falls within `range` — the predicate the
    /// first-use hazard pass uses to decide whether a recorded-command-buffer's access needs
    /// replay validation against live queue state.
    pub fn first_access_in_tag_range(&self, range: &ResourceUsageRange) -> bool {
        match &self.first_access_range {
            Some(r) => r.start < range.end && range.start < r.end,
            None => false,
        }
    }
}

/// One barrier's effect computed against a pre-barrier [`AccessState`], queued for atomic
/// application via [`PendingBarriers`].
#[derive(Copy, Clone, Debug)]
pub struct PendingBarrierEntry {
    pub scope: BarrierScope,
    pub barrier: SyncBarrier,
    pub layout_transition: bool,
}

/// A batch of [`PendingBarrierEntry`] collected by a `CollectBarriersFunctor`-equivalent pass and
/// flushed in one call, so that N barriers folded into one state are mutually independent: none
/// of them observes another's effect before all have been computed.
#[derive(Clone, Debug, Default)]
pub struct PendingBarriers {
    entries: SmallVec<[PendingBarrierEntry; 4]>,
}

impl PendingBarriers {
    pub fn new() -> Self {
        PendingBarriers::default()
    }

    pub fn push(&mut self, entry: PendingBarrierEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Folds every queued entry into `state`, tagging the result with `exec_tag`. Returns whether
    /// anything changed.
    pub fn apply(self, state: &mut AccessState, exec_tag: ResourceUsageTagEx) -> bool {
        let mut changed = false;
        for entry in self.entries {
            changed |= state.apply_barrier(&entry.scope, &entry.barrier, entry.layout_transition, exec_tag);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::SyncExecScope;

    fn tag(n: u64) -> ResourceUsageTagEx {
        ResourceUsageTagEx::from(ResourceUsageTag::new(n))
    }

    #[test]
    fn write_after_write_is_reported() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(1), QueueId(0));
        let hazard = state.detect_hazard(SyncAccessIndex::TransferWrite);
        assert!(hazard.is_hazard());
        assert_eq!(hazard.0.unwrap().kind, HazardKind::WriteAfterWrite);
    }

    #[test]
    fn read_after_write_is_reported_and_read_after_read_is_not() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(1), QueueId(0));
        let hazard = state.detect_hazard(SyncAccessIndex::FragmentShaderRead);
        assert_eq!(hazard.0.unwrap().kind, HazardKind::ReadAfterWrite);

        let mut state2 = AccessState::new();
        state2.update(SyncAccessIndex::FragmentShaderRead, tag(1), QueueId(0));
        let hazard2 = state2.detect_hazard(SyncAccessIndex::VertexShaderRead);
        assert!(!hazard2.is_hazard());
    }

    #[test]
    fn apply_barrier_is_idempotent() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(1), QueueId(0));
        let barrier = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        let scope = BarrierScope::new(barrier);
        let changed_first = state.apply_barrier(&scope, &barrier, false, tag(2));
        assert!(changed_first);
        let changed_second = state.apply_barrier(&scope, &barrier, false, tag(2));
        assert!(!changed_second);
    }

    #[test]
    fn barrier_insufficient_when_scope_does_not_cover_prior_write() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(1), QueueId(0));
        let hazard = state.detect_barrier_hazard(
            SyncAccessIndex::FragmentShaderRead,
            QueueId::INVALID,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_WRITE,
        );
        assert_eq!(hazard.0.unwrap().kind, HazardKind::BarrierInsufficient);
    }

    #[test]
    fn async_hazard_ignores_barriers_across_queues() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(5), QueueId(0));
        let hazard = state.detect_async_hazard(SyncAccessIndex::TransferRead, ResourceUsageTag::new(0), QueueId(1));
        assert_eq!(hazard.0.unwrap().kind, HazardKind::AsyncRace);

        let no_hazard = state.detect_async_hazard(SyncAccessIndex::TransferRead, ResourceUsageTag::new(0), QueueId(0));
        assert!(!no_hazard.is_hazard());
    }

    #[test]
    fn pending_barriers_apply_independently_of_each_other() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(1), QueueId(0));
        let barrier_a = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        let barrier_b = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_WRITE),
        );
        let mut pending = PendingBarriers::new();
        pending.push(state.collect_pending_barriers(BarrierScope::new(barrier_a), barrier_a, false));
        pending.push(state.collect_pending_barriers(BarrierScope::new(barrier_b), barrier_b, false));
        pending.apply(&mut state, tag(2));

        let w = &state.last_writes[0];
        assert!(w.barriers.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(w.barriers.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn chained_barriers_extend_coverage_through_the_intermediate_stage() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(0), QueueId(0));

        let a = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_WRITE),
        );
        state.apply_barrier(&BarrierScope::new(a), &a, false, tag(1));

        let b = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        state.apply_barrier(&BarrierScope::new(b), &b, false, tag(2));

        // Neither A nor B alone covers TRANSFER -> FRAGMENT; chained through COMPUTE they do.
        let hazard = state.detect_hazard(SyncAccessIndex::FragmentShaderRead);
        assert!(!hazard.is_hazard());
    }

    #[test]
    fn barrier_coverage_waives_read_after_write_for_the_synchronized_stage() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(0), QueueId(0));
        let barrier = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        let scope = BarrierScope::new(barrier);
        state.apply_barrier(&scope, &barrier, false, tag(1));

        // Covered by the barrier: no hazard.
        let hazard = state.detect_hazard(SyncAccessIndex::FragmentShaderRead);
        assert!(!hazard.is_hazard());

        // A different destination stage the barrier never scoped: still a hazard.
        let hazard = state.detect_hazard(SyncAccessIndex::ComputeShaderRead);
        assert!(hazard.is_hazard());
        assert_eq!(hazard.0.unwrap().kind, HazardKind::ReadAfterWrite);
    }

    #[test]
    fn first_access_in_tag_range_matches_recorded_span() {
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, tag(10), QueueId(0));
        assert!(state.first_access_in_tag_range(&(5..15)));
        assert!(!state.first_access_in_tag_range(&(20..30)));
    }
}
