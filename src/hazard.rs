// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The hazard taxonomy and the detector family that wraps [`crate::access_state::AccessState`]'s
//! classification methods with global-barrier lazy-application ([`do_detect`]).

use crate::access::{SyncAccessIndex, SyncFlags, SyncOrdering};
use crate::access_state::AccessState;
use crate::context::AccessContext;
use crate::queue::QueueId;
use crate::range_map::{AccessMap, AccessRange, RangeGenerator};
use crate::tag::{ResourceUsageRange, ResourceUsageTag, ResourceUsageTagEx};
use ash::vk;

/// The kind of violation a [`Hazard`] reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HazardKind {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
    /// Reserved taxonomy slot for a read-after-read "hazard": reads never actually conflict, so
    /// this variant is never constructed — it documents the classification space rather than an
    /// outcome any detector produces.
    WriteAfterReadNotHazard,
    LayoutTransitionAfterStore,
    AsyncRace,
    BarrierInsufficient,
    FirstUseHazard,
}

/// One detected synchronization violation. `tag` is the access that triggered detection (filled
/// in by the caller once it has assigned one — detection generally happens before the triggering
/// command itself has been tagged); `prior_tag` is the conflicting access already on record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub kind: HazardKind,
    pub tag: ResourceUsageTagEx,
    pub prior_tag: ResourceUsageTagEx,
}

/// The result of any hazard query: `None` means no hazard, matching the original's
/// default-constructed (falsy) `HazardResult`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HazardResult(pub Option<Hazard>);

impl HazardResult {
    pub fn none() -> Self {
        HazardResult(None)
    }

    pub fn is_hazard(&self) -> bool {
        self.0.is_some()
    }
}

/// Wraps a detector closure: if the target [`AccessState`] has outstanding global barriers not
/// yet folded in (`next_global_barrier_index < access_context.global_barrier_count()`), clone the
/// state, apply them, and run the closure on the clone; otherwise run directly on the borrowed
/// state. This is the one place lazy global-barrier application happens, keeping the common case
/// (no outstanding barriers) allocation-free.
pub fn do_detect<F>(access_context: &AccessContext, access_state: &AccessState, detector_runner: F) -> HazardResult
where
    F: FnOnce(&AccessState) -> HazardResult,
{
    if access_state.next_global_barrier_index < access_context.global_barrier_count() {
        let mut new_state = access_state.clone();
        access_context.apply_global_barriers(&mut new_state);
        detector_runner(&new_state)
    } else {
        detector_runner(access_state)
    }
}

/// Plain usage-index detector: no ordering exception, no barrier coverage.
pub struct HazardDetector<'a> {
    access_index: SyncAccessIndex,
    access_context: &'a AccessContext,
}

impl<'a> HazardDetector<'a> {
    pub fn new(access_index: SyncAccessIndex, access_context: &'a AccessContext) -> Self {
        HazardDetector { access_index, access_context }
    }

    pub fn detect(&self, state: &AccessState) -> HazardResult {
        do_detect(self.access_context, state, |s| s.detect_hazard(self.access_index))
    }

    pub fn detect_async(&self, state: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        do_detect(self.access_context, state, |s| s.detect_async_hazard(self.access_index, start_tag, queue_id))
    }
}

/// Adds a [`SyncOrdering`] exception and the load-op-after-store-op knob to the plain detector.
pub struct HazardDetectorWithOrdering<'a> {
    access_index: SyncAccessIndex,
    ordering_rule: SyncOrdering,
    access_context: &'a AccessContext,
    flags: SyncFlags,
    detect_load_op_after_store_op_hazards: bool,
}

impl<'a> HazardDetectorWithOrdering<'a> {
    pub fn new(
        access_index: SyncAccessIndex,
        ordering_rule: SyncOrdering,
        access_context: &'a AccessContext,
        flags: SyncFlags,
        detect_load_op_after_store_op_hazards: bool,
    ) -> Self {
        HazardDetectorWithOrdering { access_index, ordering_rule, access_context, flags, detect_load_op_after_store_op_hazards }
    }

    pub fn detect(&self, state: &AccessState) -> HazardResult {
        do_detect(self.access_context, state, |s| {
            s.detect_hazard_with_ordering(
                self.access_index,
                self.ordering_rule,
                self.flags,
                QueueId::INVALID,
                self.detect_load_op_after_store_op_hazards,
            )
        })
    }

    pub fn detect_async(&self, state: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        do_detect(self.access_context, state, |s| s.detect_async_hazard(self.access_index, start_tag, queue_id))
    }
}

/// Compares a previously *recorded* state (captured at record time) against the *live* state
/// found during replay, restricted to a tag range — the core of first-use hazard detection for
/// secondary/replayed command buffers.
pub struct HazardDetectFirstUse<'a> {
    recorded_use: &'a AccessState,
    queue_id: QueueId,
    tag_range: &'a ResourceUsageRange,
    access_context: &'a AccessContext,
    #[allow(dead_code)]
    detect_load_op_after_store_op_hazards: bool,
}

impl<'a> HazardDetectFirstUse<'a> {
    pub fn new(
        recorded_use: &'a AccessState,
        queue_id: QueueId,
        tag_range: &'a ResourceUsageRange,
        access_context: &'a AccessContext,
        detect_load_op_after_store_op_hazards: bool,
    ) -> Self {
        HazardDetectFirstUse { recorded_use, queue_id, tag_range, access_context, detect_load_op_after_store_op_hazards }
    }

    pub fn detect(&self, state: &AccessState) -> HazardResult {
        do_detect(self.access_context, state, |s| {
            if !self.recorded_use.first_access_in_tag_range(self.tag_range) {
                return HazardResult::none();
            }
            if let Some(w) = self.recorded_use.last_writes.first() {
                if let Some(live_w) = s.last_writes.first() {
                    if live_w.queue_id != self.queue_id {
                        return HazardResult(Some(Hazard {
                            kind: HazardKind::FirstUseHazard,
                            tag: w.tag,
                            prior_tag: live_w.tag,
                        }));
                    }
                }
            }
            HazardResult::none()
        })
    }

    pub fn detect_async(&self, state: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        do_detect(self.access_context, state, |s| {
            s.detect_async_hazard(SyncAccessIndex::Unknown, start_tag, queue_id)
        })
    }
}

/// Tests for a write recorded without any prior barrier ("marker") having been applied.
pub struct HazardDetectorMarker<'a> {
    access_context: &'a AccessContext,
}

impl<'a> HazardDetectorMarker<'a> {
    pub fn new(access_context: &'a AccessContext) -> Self {
        HazardDetectorMarker { access_context }
    }

    pub fn detect(&self, state: &AccessState) -> HazardResult {
        do_detect(self.access_context, state, |s| s.detect_marker_hazard())
    }

    /// The async path reuses `TransferWrite`'s access info as a stand-in for "some write kind",
    /// mirroring the original's reuse of `SYNC_COPY_TRANSFER_WRITE` here — preserved rather than
    /// invented, see the grounding ledger.
    pub fn detect_async(&self, state: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        do_detect(self.access_context, state, |s| {
            s.detect_async_hazard(SyncAccessIndex::TransferWrite, start_tag, queue_id)
        })
    }
}

/// Tests whether the prior access is covered by an explicit `(src_exec_scope, src_access_scope)`
/// pair, independent of any particular [`crate::barrier::SyncBarrier`] — used when validating a
/// barrier-about-to-be-applied, before it's folded in.
pub struct BarrierHazardDetector<'a> {
    access_context: &'a AccessContext,
    access_index: SyncAccessIndex,
    src_exec_scope: vk::PipelineStageFlags2,
    src_access_scope: vk::AccessFlags2,
}

impl<'a> BarrierHazardDetector<'a> {
    pub fn new(
        access_context: &'a AccessContext,
        access_index: SyncAccessIndex,
        src_exec_scope: vk::PipelineStageFlags2,
        src_access_scope: vk::AccessFlags2,
    ) -> Self {
        BarrierHazardDetector { access_context, access_index, src_exec_scope, src_access_scope }
    }

    pub fn detect(&self, state: &AccessState) -> HazardResult {
        do_detect(self.access_context, state, |s| {
            s.detect_barrier_hazard(self.access_index, QueueId::INVALID, self.src_exec_scope, self.src_access_scope)
        })
    }

    pub fn detect_async(&self, state: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        do_detect(self.access_context, state, |s| s.detect_async_hazard(self.access_index, start_tag, queue_id))
    }
}

/// Combines barrier-hazard detection with an event's captured first-scope map: the portion of a
/// queried range covered by the event's scope is checked against the scope's recorded state;
/// anything outside the scope falls back to a plain (unscoped) hazard check, exactly once.
pub struct EventBarrierHazardDetector<'a> {
    access_index: SyncAccessIndex,
    src_exec_scope: vk::PipelineStageFlags2,
    src_access_scope: vk::AccessFlags2,
    event_scope: &'a AccessMap<AccessState>,
    scope_queue_id: QueueId,
    #[allow(dead_code)]
    scope_tag: ResourceUsageTag,
}

impl<'a> EventBarrierHazardDetector<'a> {
    pub fn new(
        access_index: SyncAccessIndex,
        src_exec_scope: vk::PipelineStageFlags2,
        src_access_scope: vk::AccessFlags2,
        event_scope: &'a AccessMap<AccessState>,
        scope_queue_id: QueueId,
        scope_tag: ResourceUsageTag,
    ) -> Self {
        EventBarrierHazardDetector { access_index, src_exec_scope, src_access_scope, event_scope, scope_queue_id, scope_tag }
    }

    /// `pos_range` is the map entry's own range (the detector needs to know it to piece together
    /// scoped vs. unscoped coverage); `access` is that entry's state.
    pub fn detect(&self, pos_range: AccessRange, access: &AccessState) -> HazardResult {
        let mut range = pos_range;
        let mut unscoped_tested = false;
        let mut hazard = HazardResult::none();

        loop {
            let scoped = self.event_scope.get(&range);
            match scoped {
                Some((scope_range, scope_state)) if scope_range.intersects(&range) => {
                    if range.begin < scope_range.begin {
                        if !unscoped_tested {
                            unscoped_tested = true;
                            hazard = access.detect_hazard(self.access_index);
                            if hazard.is_hazard() {
                                break;
                            }
                        }
                        range.begin = scope_range.begin;
                    } else {
                        hazard = scope_state.detect_barrier_hazard(
                            self.access_index,
                            self.scope_queue_id,
                            self.src_exec_scope,
                            self.src_access_scope,
                        );
                        if hazard.is_hazard() {
                            break;
                        }
                        if scope_range.end >= range.end {
                            break;
                        }
                        range.begin = scope_range.end;
                    }
                }
                _ => {
                    if range.non_empty() && !unscoped_tested {
                        hazard = access.detect_hazard(self.access_index);
                    }
                    break;
                }
            }
        }
        hazard
    }

    pub fn detect_async(&self, access: &AccessState, start_tag: ResourceUsageTag, queue_id: QueueId) -> HazardResult {
        // Async barrier hazard detection follows the same path as the plain usage index: the
        // event's scope doesn't change what counts as a cross-queue race.
        access.detect_async_hazard(self.access_index, start_tag, queue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AccessContext;
    use crate::tag::ResourceUsageTag;

    #[test]
    fn plain_detector_reports_write_after_write() {
        let ctx = AccessContext::new();
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(0));
        let detector = HazardDetector::new(SyncAccessIndex::TransferWrite, &ctx);
        assert!(detector.detect(&state).is_hazard());
    }

    #[test]
    fn first_use_detector_ignores_state_outside_its_tag_range() {
        let ctx = AccessContext::new();
        let mut recorded = AccessState::new();
        recorded.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(100)), QueueId(0));
        let mut live = AccessState::new();
        live.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(1));
        let out_of_range = 0..10u64;
        let detector = HazardDetectFirstUse::new(&recorded, QueueId(0), &out_of_range, &ctx, true);
        assert!(!detector.detect(&live).is_hazard());
    }
}
