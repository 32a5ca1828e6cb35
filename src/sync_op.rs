// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Recorded operations: every explicit-barrier/access-recording command implements [`SyncOp`],
//! giving a uniform `validate`/`record`/`replay_validate`/`replay_record` lifecycle. Event
//! commands ([`WaitEvents`], [`SetEvent`], [`ResetEvent`]) follow a different shape (their side
//! effects touch a [`SyncEventsContext`] the trait has no slot for) and are exposed as inherent
//! methods instead, mirroring how the originating API splits barrier commands from event commands.

use crate::access::SyncAccessIndex;
use crate::access_state::PendingBarriers;
use crate::barrier::{BarrierScope, BarrierSet, SyncBarrier};
use crate::context::{AccessContext, AccessContextArena};
use crate::error::SyncValidationError;
use crate::event::{EventCommand, SyncEventsContext};
use crate::hazard::{BarrierHazardDetector, Hazard, HazardKind, HazardResult};
use crate::queue::QueueId;
use crate::range_map::{AccessRange, RangeGenerator};
use crate::renderpass::{DrawAttachmentState, RenderPassAccessContext};
use crate::settings::SyncValidatorSettings;
use crate::tag::{ResourceUsageTag, ResourceUsageTagEx, TagAllocator};
use ash::vk;
use std::hash::Hash;
use tracing::{debug, trace, warn};

/// The lifecycle every recorded synchronization command implements: validated against the current
/// recording state, then recorded (folding its effect in and returning the tag it was assigned),
/// then — when the owning command buffer is replayed as part of a queue submission — validated
/// and recorded again against live queue state. `arena` gives every stage access to the DAG of
/// predecessor/subpass contexts `cb_context`'s `prev`/`async` edges may reference.
pub trait SyncOp {
    fn validate(&self, cb_context: &AccessContext, arena: &AccessContextArena) -> HazardResult;
    /// Fails with [`SyncValidationError::FinalizedContextMutation`] if `cb_context` was already
    /// finalized (e.g. the shim called [`AccessContext::finalize`] at end-of-recording and then
    /// kept recording commands against it) — a malformed-input condition, not an internal bug, so
    /// it is a recoverable `Result` rather than a panic.
    fn record(&self, cb_context: &mut AccessContext, arena: &AccessContextArena, tags: &mut TagAllocator) -> Result<ResourceUsageTag, SyncValidationError>;
    fn replay_validate(&self, replay_context: &AccessContext, arena: &AccessContextArena, recorded_tag: ResourceUsageTag) -> HazardResult;
    fn replay_record(&self, exec_context: &mut AccessContext, arena: &AccessContextArena, exec_tag: ResourceUsageTag) -> Result<(), SyncValidationError>;
}

/// `vkCmdPipelineBarrier` / `vkCmdPipelineBarrier2`, already decomposed into a [`BarrierSet`] by
/// the shim (see [`crate::barrier`]).
pub struct PipelineBarrier<H> {
    pub barrier_set: BarrierSet<H>,
}

impl<H: Clone> PipelineBarrier<H> {
    pub fn new(barrier_set: BarrierSet<H>) -> Self {
        PipelineBarrier { barrier_set }
    }

    /// True when this barrier can be applied with the fast path: a single global memory barrier
    /// and nothing scoped to a specific buffer or image.
    fn is_single_global_barrier(&self) -> bool {
        self.barrier_set.single_exec_scope
            && self.barrier_set.memory_barriers.len() == 1
            && self.barrier_set.buffer_memory_barriers.is_empty()
            && self.barrier_set.image_memory_barriers.is_empty()
    }
}

impl<H: Clone> SyncOp for PipelineBarrier<H> {
    fn validate(&self, cb_context: &AccessContext, arena: &AccessContextArena) -> HazardResult {
        for image_barrier in &self.barrier_set.image_memory_barriers {
            if !image_barrier.layout_transition {
                continue;
            }
            let mut range_gen = image_barrier.range_gen.clone();
            let detector = BarrierHazardDetector::new(
                cb_context,
                SyncAccessIndex::ImageLayoutTransition,
                image_barrier.barrier.src.exec_scope,
                image_barrier.barrier.src.access_scope,
            );
            loop {
                let range = range_gen.next_range();
                if range.is_empty() {
                    break;
                }
                let hazard = cb_context.detect_hazard_range(arena, range, &|_r, s| detector.detect(s));
                if hazard.is_hazard() {
                    warn!(?hazard, "layout transition hazard");
                    return hazard;
                }
            }
        }
        HazardResult::none()
    }

    fn record(&self, cb_context: &mut AccessContext, _arena: &AccessContextArena, tags: &mut TagAllocator) -> Result<ResourceUsageTag, SyncValidationError> {
        if cb_context.is_finalized() {
            return Err(SyncValidationError::FinalizedContextMutation);
        }
        let tag = tags.next_tag();
        let tag_ex = ResourceUsageTagEx::from(tag);
        trace!(?tag, "record pipeline barrier");

        if self.is_single_global_barrier() {
            let barrier = self.barrier_set.memory_barriers[0];
            cb_context.register_global_barrier(barrier, QueueId::INVALID);
            return Ok(tag);
        }

        for (key, state) in cb_context.access_map_mut().iter_mut() {
            let mut pending = PendingBarriers::new();
            for barrier in &self.barrier_set.memory_barriers {
                pending.push(state.collect_pending_barriers(BarrierScope::new(*barrier), *barrier, false));
            }
            for buffer_barrier in &self.barrier_set.buffer_memory_barriers {
                if buffer_barrier.range.intersects(key) {
                    pending.push(state.collect_pending_barriers(
                        BarrierScope::new(buffer_barrier.barrier),
                        buffer_barrier.barrier,
                        false,
                    ));
                }
            }
            pending.apply(state, tag_ex);
        }
        Ok(tag)
    }

    fn replay_validate(&self, replay_context: &AccessContext, arena: &AccessContextArena, _recorded_tag: ResourceUsageTag) -> HazardResult {
        self.validate(replay_context, arena)
    }

    fn replay_record(&self, exec_context: &mut AccessContext, arena: &AccessContextArena, _exec_tag: ResourceUsageTag) -> Result<(), SyncValidationError> {
        let mut tags = TagAllocator::new();
        self.record(exec_context, arena, &mut tags).map(|_| ())
    }
}

/// Records an ordinary buffer/image read or write — the core operation every draw, dispatch,
/// copy and blit command ultimately reduces to for synchronization purposes. `H` is the shim's
/// opaque resource handle type; this crate never dereferences it.
pub struct RecordAccess<H, G: RangeGenerator> {
    pub resource: H,
    pub range_gen: G,
    pub access_index: SyncAccessIndex,
}

impl<H, G: RangeGenerator> RecordAccess<H, G> {
    pub fn new(resource: H, range_gen: G, access_index: SyncAccessIndex) -> Self {
        RecordAccess { resource, range_gen, access_index }
    }
}

impl<H, G: RangeGenerator> SyncOp for RecordAccess<H, G> {
    fn validate(&self, cb_context: &AccessContext, arena: &AccessContextArena) -> HazardResult {
        let detector = crate::hazard::HazardDetector::new(self.access_index, cb_context);
        let mut range_gen = self.range_gen.clone();
        loop {
            let range = range_gen.next_range();
            if range.is_empty() {
                break;
            }
            let hazard = cb_context.detect_hazard_range(arena, range, &|_r, s| detector.detect(s));
            if hazard.is_hazard() {
                warn!(?hazard, index = ?self.access_index, "access hazard");
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn record(&self, cb_context: &mut AccessContext, arena: &AccessContextArena, tags: &mut TagAllocator) -> Result<ResourceUsageTag, SyncValidationError> {
        if cb_context.is_finalized() {
            return Err(SyncValidationError::FinalizedContextMutation);
        }
        let tag = tags.next_tag();
        trace!(?tag, index = ?self.access_index, "record access");
        cb_context.record_access(arena, self.range_gen.clone(), self.access_index, ResourceUsageTagEx::from(tag), QueueId::INVALID);
        Ok(tag)
    }

    fn replay_validate(&self, replay_context: &AccessContext, arena: &AccessContextArena, _recorded_tag: ResourceUsageTag) -> HazardResult {
        self.validate(replay_context, arena)
    }

    fn replay_record(&self, exec_context: &mut AccessContext, arena: &AccessContextArena, exec_tag: ResourceUsageTag) -> Result<(), SyncValidationError> {
        if exec_context.is_finalized() {
            return Err(SyncValidationError::FinalizedContextMutation);
        }
        exec_context.record_access(arena, self.range_gen.clone(), self.access_index, ResourceUsageTagEx::from(exec_tag), QueueId::INVALID);
        Ok(())
    }
}

/// `vkCmdWaitEvents` / `vkCmdWaitEvents2`. `H` is the shim's opaque event handle type.
pub struct WaitEvents<H: Eq + Hash + Clone> {
    pub events: Vec<H>,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub is_sync2: bool,
    pub barrier_set: BarrierSet<u64>,
}

impl<H: Eq + Hash + Clone> WaitEvents<H> {
    /// Runs the per-event ignore check; returns the events that should actually be imported.
    fn active_events<'a>(&'a self, events_context: &SyncEventsContext<H>) -> Vec<&'a H> {
        self.events
            .iter()
            .filter(|handle| match events_context.get(handle) {
                Some(state) => state.is_ignored_by_wait(self.is_sync2, self.src_stage_mask) == crate::event::IgnoreReason::NotIgnored,
                None => false,
            })
            .collect()
    }

    pub fn validate(&self, events_context: &SyncEventsContext<H>) -> HazardResult {
        for handle in &self.events {
            if let Some(state) = events_context.get(handle) {
                let reason = state.is_ignored_by_wait(self.is_sync2, self.src_stage_mask);
                if reason != crate::event::IgnoreReason::NotIgnored {
                    debug!(?reason, "wait ignored");
                }
            }
        }
        HazardResult::none()
    }

    /// Imports each active event's captured first-scope accesses into the command buffer's own
    /// map, then folds in every barrier — global, buffer and image alike — restricted to the
    /// entries that actually lie within that event's scope, before recording each active event as
    /// waited-on at the assigned tag. Events ignored per [`active_events`] do not have their
    /// barrier-tracking state touched, and accesses outside every waited event's scope are left
    /// untouched: a wait only synchronizes against what was actually signalled.
    pub fn record(&self, cb_context: &mut AccessContext, events_context: &mut SyncEventsContext<H>, tags: &mut TagAllocator) -> ResourceUsageTag {
        let tag = tags.next_tag();
        let tag_ex = ResourceUsageTagEx::from(tag);
        let active: Vec<H> = self.active_events(events_context).into_iter().cloned().collect();

        let mut image_ranges: Vec<(AccessRange, SyncBarrier, bool)> = Vec::new();
        for image_barrier in &self.barrier_set.image_memory_barriers {
            let mut range_gen = image_barrier.range_gen.clone();
            loop {
                let range = range_gen.next_range();
                if range.is_empty() {
                    break;
                }
                image_ranges.push((range, image_barrier.barrier, image_barrier.layout_transition));
            }
        }

        for handle in &active {
            let first_scope = match events_context.get(handle).and_then(|state| state.first_scope.clone()) {
                Some(scope) => scope,
                None => continue,
            };
            for (range, state) in first_scope.access_map().iter() {
                cb_context.import_range(*range, state);
            }
            for (key, state) in cb_context.access_map_mut().iter_mut() {
                if !first_scope.access_map().iter().any(|(scope_range, _)| scope_range.intersects(key)) {
                    continue;
                }
                let mut pending = PendingBarriers::new();
                for barrier in &self.barrier_set.memory_barriers {
                    pending.push(state.collect_pending_barriers(BarrierScope::new(*barrier), *barrier, false));
                }
                for buffer_barrier in &self.barrier_set.buffer_memory_barriers {
                    if buffer_barrier.range.intersects(key) {
                        pending.push(state.collect_pending_barriers(
                            BarrierScope::new(buffer_barrier.barrier),
                            buffer_barrier.barrier,
                            false,
                        ));
                    }
                }
                for (image_range, barrier, layout_transition) in &image_ranges {
                    if image_range.intersects(key) {
                        pending.push(state.collect_pending_barriers(BarrierScope::new(*barrier), *barrier, *layout_transition));
                    }
                }
                pending.apply(state, tag_ex);
            }
        }

        let src = crate::barrier::SyncExecScope::make_src(self.src_stage_mask, vk::AccessFlags2::empty());
        let dst = crate::barrier::SyncExecScope::make_dst(self.dst_stage_mask, vk::AccessFlags2::empty());
        for handle in &active {
            events_context.apply_barrier(&src, &dst);
            let state = events_context.get_or_insert(handle.clone());
            state.record_wait(self.dst_stage_mask, tag);
        }
        tag
    }

    pub fn replay_validate(&self, _replay_context: &AccessContext, _recorded_tag: ResourceUsageTag) -> HazardResult {
        HazardResult::none()
    }
}

/// `vkSetEvent` / `vkCmdSetEvent2`.
pub struct SetEvent<H: Eq + Hash + Clone> {
    pub event: H,
    pub stage_mask: vk::PipelineStageFlags2,
    pub is_sync2: bool,
}

impl<H: Eq + Hash + Clone> SetEvent<H> {
    pub fn validate(&self, _cb_context: &AccessContext) -> HazardResult {
        HazardResult::none()
    }

    pub fn record(
        &self,
        cb_context: &AccessContext,
        events_context: &mut SyncEventsContext<H>,
        tags: &mut TagAllocator,
    ) -> ResourceUsageTag {
        let tag = tags.next_tag();
        let scope = crate::barrier::SyncExecScope::make_src(self.stage_mask, vk::AccessFlags2::empty());
        let state = events_context.get_or_insert(self.event.clone());
        let had_intervening_barrier = state.has_barrier(self.stage_mask, self.stage_mask);
        state.record_set(cb_context, tag, scope, self.is_sync2, had_intervening_barrier);
        tag
    }
}

/// `vkCmdResetEvent` / `vkCmdResetEvent2`.
pub struct ResetEvent<H: Eq + Hash + Clone> {
    pub event: H,
    pub stage_mask: vk::PipelineStageFlags2,
}

impl<H: Eq + Hash + Clone> ResetEvent<H> {
    /// Reports a missing-barrier hazard if the event was Set (or Wait'd) and no barrier covering
    /// `stage_mask` has been recorded since.
    pub fn validate(&self, events_context: &SyncEventsContext<H>) -> HazardResult {
        if let Some(state) = events_context.get(&self.event) {
            let set_like = matches!(state.last_command, Some(EventCommand::Set) | Some(EventCommand::SetSync2));
            if set_like && !state.has_barrier(self.stage_mask, self.stage_mask) {
                return HazardResult(Some(Hazard {
                    kind: HazardKind::BarrierInsufficient,
                    tag: ResourceUsageTagEx::from(ResourceUsageTag::default()),
                    prior_tag: ResourceUsageTagEx::from(state.last_command_tag),
                }));
            }
        }
        HazardResult::none()
    }

    pub fn record(&self, events_context: &mut SyncEventsContext<H>, tags: &mut TagAllocator) -> ResourceUsageTag {
        let tag = tags.next_tag();
        let state = events_context.get_or_insert(self.event.clone());
        state.record_reset(tag);
        tag
    }
}

/// `vkCmdBeginRenderPass` / `vkCmdBeginRendering`. Owns nothing itself beyond the settings to
/// validate against — the actual per-subpass state lives in the [`RenderPassAccessContext`] the
/// caller constructed, so `validate`/`record` take it by reference rather than holding it, unlike
/// the plain-[`AccessContext`] commands above.
pub struct BeginRenderPass {
    pub settings: SyncValidatorSettings,
}

impl BeginRenderPass {
    pub fn validate(&self, render_pass: &RenderPassAccessContext) -> HazardResult {
        let hazard = render_pass.validate_begin_render_pass(&self.settings);
        if hazard.is_hazard() {
            warn!(?hazard, "begin render pass hazard");
        }
        hazard
    }

    pub fn record(&self, render_pass: &mut RenderPassAccessContext, tags: &mut TagAllocator) -> (ResourceUsageTag, ResourceUsageTag) {
        let transition_tag = tags.next_tag();
        let load_tag = tags.next_tag();
        trace!(?transition_tag, ?load_tag, "record begin render pass");
        render_pass.record_begin_render_pass(transition_tag, load_tag);
        (transition_tag, load_tag)
    }
}

/// `vkCmdNextSubpass` / `vkCmdNextSubpass2`.
pub struct NextSubpass {
    pub settings: SyncValidatorSettings,
}

impl NextSubpass {
    pub fn validate(&self, render_pass: &RenderPassAccessContext) -> HazardResult {
        let hazard = render_pass.validate_next_subpass(&self.settings);
        if hazard.is_hazard() {
            warn!(?hazard, subpass = render_pass.current_subpass(), "next subpass hazard");
        }
        hazard
    }

    pub fn record(
        &self,
        render_pass: &mut RenderPassAccessContext,
        tags: &mut TagAllocator,
    ) -> Result<(ResourceUsageTag, ResourceUsageTag, ResourceUsageTag), SyncValidationError> {
        let store_tag = tags.next_tag();
        let barrier_tag = tags.next_tag();
        let load_tag = tags.next_tag();
        render_pass.record_next_subpass(store_tag, barrier_tag, load_tag)?;
        trace!(subpass = render_pass.current_subpass(), "record next subpass");
        Ok((store_tag, barrier_tag, load_tag))
    }
}

/// `vkCmdEndRenderPass` / `vkCmdEndRendering`. `record` folds every subpass context into
/// `cb_context` (the command buffer's own [`AccessContext`], standing in for the original's
/// "restore to primary command buffer" step) and returns the tags assigned to the final subpass's
/// store and the subpass-to-external layout transitions.
pub struct EndRenderPass {
    pub settings: SyncValidatorSettings,
}

impl EndRenderPass {
    pub fn validate(&self, render_pass: &RenderPassAccessContext) -> HazardResult {
        let hazard = render_pass.validate_end_render_pass(&self.settings);
        if hazard.is_hazard() {
            warn!(?hazard, "end render pass hazard");
        }
        hazard
    }

    pub fn record(&self, render_pass: &mut RenderPassAccessContext, cb_context: &mut AccessContext, tags: &mut TagAllocator) -> (ResourceUsageTag, ResourceUsageTag) {
        let store_tag = tags.next_tag();
        let barrier_tag = tags.next_tag();
        trace!(?store_tag, ?barrier_tag, "record end render pass");
        render_pass.record_end_render_pass(cb_context, store_tag, barrier_tag);
        (store_tag, barrier_tag)
    }
}

/// Validates a draw command's writes against the current subpass's bound attachments —
/// `vkCmdDraw*`'s synchronization-relevant slice, everything else about the draw is out of scope.
pub struct DrawSubpassAttachment {
    pub draw_state: DrawAttachmentState,
}

impl DrawSubpassAttachment {
    pub fn validate(&self, render_pass: &RenderPassAccessContext) -> HazardResult {
        render_pass.validate_draw_subpass_attachment(&self.draw_state)
    }

    pub fn record(&self, render_pass: &mut RenderPassAccessContext, tags: &mut TagAllocator) -> ResourceUsageTag {
        let tag = tags.next_tag();
        render_pass.record_draw_subpass_attachment(&self.draw_state, tag);
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::{BufferMemoryBarrier, SyncExecScope};
    use crate::queue::QueueFlags;
    use crate::range_map::{RangeGen, SingleRangeGen};
    use crate::renderpass::{AttachmentDescription, AttachmentRef, AttachmentType, AttachmentViewGen, LoadOp, RenderPassDescription, StoreOp, SubpassDescription};

    #[test]
    fn single_global_barrier_applies_to_whole_map() {
        let arena = AccessContextArena::new();
        let mut ctx = AccessContext::new();
        let mut state = crate::access_state::AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(0));
        ctx.access_map_mut().insert(AccessRange::new(0, 64), state);

        let barrier = crate::barrier::SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        let barrier_set: BarrierSet<u64> = BarrierSet::from_sync1(barrier.src, barrier.dst, [], [], []);
        let op = PipelineBarrier::new(barrier_set);
        let mut tags = TagAllocator::new();
        op.record(&mut ctx, &arena, &mut tags).unwrap();

        // The fast path only registers the barrier on the context's global-barrier queue; it is
        // folded into a given entry lazily, the next time that entry is queried or touched.
        let (_, stored) = ctx.access_map().get(&AccessRange::new(0, 64)).unwrap();
        let mut s = stored.clone();
        ctx.apply_global_barriers(&mut s);
        assert!(s.last_writes[0].barriers.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }

    #[test]
    fn record_access_op_records_a_write_and_then_hazards_on_conflicting_read() {
        let arena = AccessContextArena::new();
        let mut ctx = AccessContext::new();
        let mut tags = TagAllocator::new();

        let write = RecordAccess::new(1u32, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::TransferWrite);
        assert!(!write.validate(&ctx, &arena).is_hazard());
        write.record(&mut ctx, &arena, &mut tags).unwrap();

        let read = RecordAccess::new(1u32, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::FragmentShaderRead);
        assert!(read.validate(&ctx, &arena).is_hazard());
    }

    #[test]
    fn recording_onto_a_finalized_context_is_a_recoverable_error() {
        let arena = AccessContextArena::new();
        let mut ctx = AccessContext::new();
        ctx.finalize();
        let mut tags = TagAllocator::new();

        let write = RecordAccess::new(1u32, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::TransferWrite);
        assert_eq!(write.record(&mut ctx, &arena, &mut tags).unwrap_err(), SyncValidationError::FinalizedContextMutation);
    }

    #[test]
    fn reset_event_without_barrier_is_hazard() {
        let mut events: SyncEventsContext<u32> = SyncEventsContext::new();
        let ctx = AccessContext::new();
        let set = SetEvent { event: 1u32, stage_mask: vk::PipelineStageFlags2::TRANSFER, is_sync2: false };
        let mut tags = TagAllocator::new();
        set.record(&ctx, &mut events, &mut tags);

        let reset = ResetEvent { event: 1u32, stage_mask: vk::PipelineStageFlags2::TRANSFER };
        assert!(reset.validate(&events).is_hazard());
    }

    #[test]
    fn wait_events_applies_buffer_barrier_only_within_first_scope() {
        let arena = AccessContextArena::new();
        let mut ctx = AccessContext::new();
        let mut tags = TagAllocator::new();
        let mut events: SyncEventsContext<u32> = SyncEventsContext::new();

        let write_a = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::TransferWrite);
        write_a.record(&mut ctx, &arena, &mut tags).unwrap();

        let set = SetEvent { event: 7u32, stage_mask: vk::PipelineStageFlags2::TRANSFER, is_sync2: false };
        set.record(&ctx, &mut events, &mut tags);

        // Recorded after the Set, so it falls outside the event's captured first scope even
        // though the wait's buffer barrier range below covers it spatially.
        let write_b = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(64, 128)), SyncAccessIndex::TransferWrite);
        write_b.record(&mut ctx, &arena, &mut tags).unwrap();

        let mut barrier_set: BarrierSet<u64> = BarrierSet::new();
        barrier_set.buffer_memory_barriers.push(BufferMemoryBarrier {
            resource: 1u64,
            barrier: SyncBarrier::new(
                SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
                SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
            ),
            range: AccessRange::new(0, 128),
        });
        let wait = WaitEvents {
            events: vec![7u32],
            src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
            dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            is_sync2: false,
            barrier_set,
        };
        wait.record(&mut ctx, &mut events, &mut tags);

        let read_a = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::FragmentShaderRead);
        assert!(!read_a.validate(&ctx, &arena).is_hazard());

        let read_b = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(64, 128)), SyncAccessIndex::FragmentShaderRead);
        assert!(read_b.validate(&ctx, &arena).is_hazard());
    }

    #[test]
    fn wait_events_ignored_for_missing_stage_bits_leaves_write_unsynchronized() {
        let arena = AccessContextArena::new();
        let mut ctx = AccessContext::new();
        let mut tags = TagAllocator::new();
        let mut events: SyncEventsContext<u32> = SyncEventsContext::new();

        let write = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::TransferWrite);
        write.record(&mut ctx, &arena, &mut tags).unwrap();

        let set = SetEvent { event: 7u32, stage_mask: vk::PipelineStageFlags2::TRANSFER, is_sync2: false };
        set.record(&ctx, &mut events, &mut tags);

        let mut barrier_set: BarrierSet<u64> = BarrierSet::new();
        barrier_set.buffer_memory_barriers.push(BufferMemoryBarrier {
            resource: 1u64,
            barrier: SyncBarrier::new(
                SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
                SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
            ),
            range: AccessRange::new(0, 64),
        });
        // Omits TRANSFER from srcStageMask, so `is_ignored_by_wait` rejects this wait with
        // MissingStageBits and the event is skipped entirely.
        let wait = WaitEvents {
            events: vec![7u32],
            src_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            dst_stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
            is_sync2: false,
            barrier_set,
        };
        wait.record(&mut ctx, &mut events, &mut tags);

        let read = RecordAccess::new(1u64, SingleRangeGen::new(AccessRange::new(0, 64)), SyncAccessIndex::FragmentShaderRead);
        assert!(read.validate(&ctx, &arena).is_hazard());
    }

    #[test]
    fn begin_and_end_render_pass_commands_round_trip_through_the_tag_allocator() {
        let attachments = vec![AttachmentDescription {
            attachment_type: AttachmentType::Color,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            stencil_load_op: LoadOp::None,
            stencil_store_op: StoreOp::None,
            initial_layout: 0,
            final_layout: 0,
            first_subpass: None,
            last_subpass: None,
        }];
        let subpasses = vec![SubpassDescription { color_attachments: vec![Some(AttachmentRef { attachment: 0, layout: 1 })], ..Default::default() }];
        let description = RenderPassDescription::new(attachments, subpasses, Vec::new());
        let views = vec![AttachmentViewGen::new(RangeGen::single(AccessRange::new(0, 64)), RangeGen::single(AccessRange::new(0, 64)))];

        let mut render_pass = RenderPassAccessContext::new(description, QueueFlags::GRAPHICS, views, None);
        let mut tags = TagAllocator::new();
        let settings = SyncValidatorSettings::default();

        let begin = BeginRenderPass { settings };
        assert!(!begin.validate(&render_pass).is_hazard());
        begin.record(&mut render_pass, &mut tags);

        let end = EndRenderPass { settings };
        assert!(!end.validate(&render_pass).is_hazard());
        let mut external = AccessContext::new();
        end.record(&mut render_pass, &mut external, &mut tags);

        let (_, state) = external.access_map().get(&AccessRange::new(0, 64)).unwrap();
        assert!(state.last_writes.iter().any(|w| w.index == SyncAccessIndex::ColorAttachmentWrite));
    }
}
