// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The event state machine: [`SyncEventState`] (idle/set/unsynchronized) and
//! [`SyncEventsContext`], the per-command-buffer table of event states keyed by an opaque handle
//! the shim assigns.

use crate::barrier::SyncExecScope;
use crate::context::AccessContext;
use crate::tag::{ResourceUsageTag, ResourceUsageTagSet};
use ash::vk;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// Which command last touched an event, for `IsIgnoredByWait`-style race detection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventCommand {
    Reset,
    ResetSync2,
    Set,
    SetSync2,
    Wait,
}

/// Why a `WaitEvents` call should be ignored rather than validated/recorded normally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    NotIgnored,
    ResetWaitRace,
    SetRace,
    MissingStageBits,
    SetVsWaitVersionMismatch,
    MissingSetEvent,
}

/// Tracks one event's synchronization state across a recording: whether it has ever been set,
/// whether that set was left unsynchronized by a subsequent Set/Reset with no intervening
/// barrier, and — while set — a shared snapshot of the [`AccessContext`] captured at Set time
/// (the event's "first scope"). `Rc`, not `Arc`: replay is single-threaded by construction, so
/// there is no need to pay for atomic refcounting.
#[derive(Clone)]
pub struct SyncEventState {
    pub last_command: Option<EventCommand>,
    pub last_command_tag: ResourceUsageTag,
    pub unsynchronized_set: Option<EventCommand>,
    pub barriers: vk::PipelineStageFlags2,
    pub scope: SyncExecScope,
    pub first_scope_tag: ResourceUsageTag,
    pub first_scope: Option<Rc<AccessContext>>,
    /// Whether the Set that captured `first_scope` used the Sync2 (`VkDependencyInfo`) API —
    /// mixing Sync1 waits against a Sync2 set (or vice versa) is a reported race.
    pub first_scope_is_sync2: bool,
}

impl Default for SyncEventState {
    fn default() -> Self {
        SyncEventState {
            last_command: None,
            last_command_tag: ResourceUsageTag::default(),
            unsynchronized_set: None,
            barriers: vk::PipelineStageFlags2::empty(),
            scope: SyncExecScope::default(),
            first_scope_tag: ResourceUsageTag::default(),
            first_scope: None,
            first_scope_is_sync2: false,
        }
    }
}

impl SyncEventState {
    pub fn new() -> Self {
        SyncEventState::default()
    }

    pub fn reset_first_scope(&mut self) {
        self.first_scope = None;
        self.barriers = vk::PipelineStageFlags2::empty();
    }

    /// Captures `context` as this event's first scope at `tag`, per `SetEvent`'s semantics. If no
    /// barrier was recorded between the previous command touching this event and this Set, the
    /// event is marked unsynchronized: a subsequent Wait must treat the scope as undefined.
    pub fn record_set(&mut self, context: &AccessContext, tag: ResourceUsageTag, scope: SyncExecScope, is_sync2: bool, had_intervening_barrier: bool) {
        if !had_intervening_barrier && matches!(self.last_command, Some(EventCommand::Set) | Some(EventCommand::SetSync2)) {
            self.unsynchronized_set = self.last_command;
        } else {
            self.unsynchronized_set = None;
        }
        self.first_scope = Some(Rc::new(clone_finalized(context)));
        self.first_scope_tag = tag;
        self.scope = scope;
        self.first_scope_is_sync2 = is_sync2;
        self.barriers = vk::PipelineStageFlags2::empty();
        self.last_command = Some(if is_sync2 { EventCommand::SetSync2 } else { EventCommand::Set });
        self.last_command_tag = tag;
    }

    pub fn record_reset(&mut self, tag: ResourceUsageTag) {
        self.reset_first_scope();
        self.unsynchronized_set = None;
        self.last_command = Some(EventCommand::Reset);
        self.last_command_tag = tag;
    }

    pub fn record_wait(&mut self, dst_exec_scope: vk::PipelineStageFlags2, tag: ResourceUsageTag) {
        self.barriers |= dst_exec_scope;
        self.last_command = Some(EventCommand::Wait);
        self.last_command_tag = tag;
    }

    /// Whether a `WaitEvents` against this event should be skipped, and why.
    pub fn is_ignored_by_wait(&self, wait_is_sync2: bool, src_stage_mask: vk::PipelineStageFlags2) -> IgnoreReason {
        if self.first_scope.is_none() {
            return IgnoreReason::MissingSetEvent;
        }
        if self.unsynchronized_set.is_some() {
            return IgnoreReason::SetRace;
        }
        if matches!(self.last_command, Some(EventCommand::Reset)) {
            return IgnoreReason::ResetWaitRace;
        }
        if wait_is_sync2 != self.first_scope_is_sync2 {
            return IgnoreReason::SetVsWaitVersionMismatch;
        }
        if !self.scope.mask.contains(src_stage_mask) && !src_stage_mask.is_empty() {
            return IgnoreReason::MissingStageBits;
        }
        IgnoreReason::NotIgnored
    }

    /// Whether a barrier covering `stage_mask` with execution scope `exec_scope` has already been
    /// recorded against this event (via a Wait or a later barrier).
    pub fn has_barrier(&self, stage_mask: vk::PipelineStageFlags2, exec_scope: vk::PipelineStageFlags2) -> bool {
        self.barriers.contains(stage_mask) || self.barriers.intersects(exec_scope)
    }

    pub fn gather_referenced_tags(&self, referenced: &mut ResourceUsageTagSet) {
        referenced.insert(self.last_command_tag);
        if self.first_scope.is_some() {
            referenced.insert(self.first_scope_tag);
        }
    }
}

/// Deep-copies `context`'s map/trackback state into a standalone, finalized `AccessContext` —
/// the snapshot an event's first scope holds must survive independent of the live recording
/// context, which keeps mutating after the Set.
fn clone_finalized(context: &AccessContext) -> AccessContext {
    let mut copy = AccessContext::new();
    copy.init_from(context);
    copy.finalize();
    copy
}

/// The per-command-buffer table of [`SyncEventState`], keyed by an opaque handle `H` the shim
/// assigns to its event objects. This crate never dereferences `H`; it only uses it as a map key.
#[derive(Clone, Default)]
pub struct SyncEventsContext<H: Eq + Hash + Clone> {
    map: HashMap<H, SyncEventState>,
}

impl<H: Eq + Hash + Clone> SyncEventsContext<H> {
    pub fn new() -> Self {
        SyncEventsContext { map: HashMap::new() }
    }

    /// Returns the state for `handle`, creating an idle one if this is the first time it's been
    /// seen.
    pub fn get_or_insert(&mut self, handle: H) -> &mut SyncEventState {
        self.map.entry(handle).or_insert_with(SyncEventState::new)
    }

    pub fn get(&self, handle: &H) -> Option<&SyncEventState> {
        self.map.get(handle)
    }

    /// Applies a barrier's destination scope to every event whose accumulated `barriers`
    /// intersects the barrier's source scope, widening the set of stages considered synchronized
    /// against that event, so a later Wait's `has_barrier` check sees barriers recorded after the
    /// Set too.
    pub fn apply_barrier(&mut self, src: &SyncExecScope, dst: &SyncExecScope) {
        for state in self.map.values_mut() {
            if state.barriers.intersects(src.exec_scope) || state.scope.exec_scope.intersects(src.exec_scope) {
                state.barriers |= dst.exec_scope;
            }
        }
    }

    pub fn destroy(&mut self, handle: &H) {
        self.map.remove(handle);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn gather_referenced_tags(&self, referenced: &mut ResourceUsageTagSet) {
        for state in self.map.values() {
            state.gather_referenced_tags(referenced);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_event_is_missing_set() {
        let mut events: SyncEventsContext<u32> = SyncEventsContext::new();
        let state = events.get_or_insert(1);
        assert_eq!(state.is_ignored_by_wait(false, vk::PipelineStageFlags2::TRANSFER), IgnoreReason::MissingSetEvent);
    }

    #[test]
    fn set_without_barrier_after_set_marks_unsynchronized() {
        let ctx = AccessContext::new();
        let mut state = SyncEventState::new();
        let scope = SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
        state.record_set(&ctx, ResourceUsageTag::new(1), scope, false, true);
        state.record_set(&ctx, ResourceUsageTag::new(2), scope, false, false);
        assert_eq!(state.unsynchronized_set, Some(EventCommand::Set));
        assert_eq!(state.is_ignored_by_wait(false, vk::PipelineStageFlags2::TRANSFER), IgnoreReason::SetRace);
    }

    #[test]
    fn reset_after_set_requires_intervening_barrier_check_elsewhere_but_clears_scope() {
        let ctx = AccessContext::new();
        let mut state = SyncEventState::new();
        let scope = SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
        state.record_set(&ctx, ResourceUsageTag::new(1), scope, false, true);
        state.record_reset(ResourceUsageTag::new(2));
        assert!(state.first_scope.is_none());
        assert_eq!(state.is_ignored_by_wait(false, vk::PipelineStageFlags2::TRANSFER), IgnoreReason::MissingSetEvent);
    }

    #[test]
    fn sync1_set_ignored_by_sync2_wait() {
        let ctx = AccessContext::new();
        let mut state = SyncEventState::new();
        let scope = SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
        state.record_set(&ctx, ResourceUsageTag::new(1), scope, false, true);
        assert_eq!(state.is_ignored_by_wait(true, vk::PipelineStageFlags2::TRANSFER), IgnoreReason::SetVsWaitVersionMismatch);
    }
}
