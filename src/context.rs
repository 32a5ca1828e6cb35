// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! [`AccessContext`]: owns an [`AccessMap`], the DAG edges to predecessor/asynchronous contexts,
//! and the per-context global-barrier queue. Predecessor/async/external references are modeled as
//! indices into an [`AccessContextArena`] rather than raw pointers or `Rc` cycles, since the DAG's
//! lifetime is exactly one command buffer recording (or one queue batch replay).

use crate::access::SyncAccessIndex;
use crate::access_state::{AccessState, PendingBarriers};
use crate::barrier::{BarrierScope, SyncBarrier};
use crate::hazard::HazardResult;
use crate::queue::QueueId;
use crate::range_map::{AccessMap, AccessRange, RangeGenerator, RangeOps};
use crate::tag::{ResourceUsageRange, ResourceUsageTag, ResourceUsageTagEx};
use smallvec::SmallVec;

const MAX_GLOBAL_BARRIER_DEFS: usize = 8;

/// An index into an [`AccessContextArena`]. Cheap to copy, meaningless outside the arena that
/// produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// One edge from an [`AccessContext`] to a predecessor it should recurse into when a query or
/// update reaches a gap in its own map (a subpass's predecessor, or a command buffer's "previous
/// access context" edge).
#[derive(Copy, Clone, Debug)]
pub struct TrackBack {
    pub source: ContextId,
    pub barrier: SyncBarrier,
    pub queue_id: QueueId,
}

/// An edge to a context whose accesses race with this one unless an explicit barrier says
/// otherwise — a peer queue's batch, referenced non-owningly; the peer must outlive this context.
#[derive(Copy, Clone, Debug)]
pub struct AsyncReference {
    pub source: ContextId,
    pub start_tag: ResourceUsageTag,
    pub queue_id: QueueId,
}

/// Owns every [`AccessContext`] that can appear in one command buffer's (or queue batch's)
/// subpass/predecessor DAG, so that `prev`/`async` edges can be plain indices instead of pointers
/// or reference-counted cycles.
#[derive(Default)]
pub struct AccessContextArena {
    contexts: Vec<AccessContext>,
}

impl AccessContextArena {
    pub fn new() -> Self {
        AccessContextArena::default()
    }

    pub fn insert(&mut self, context: AccessContext) -> ContextId {
        self.contexts.push(context);
        ContextId(self.contexts.len() - 1)
    }

    pub fn get(&self, id: ContextId) -> &AccessContext {
        &self.contexts[id.0]
    }

    pub fn get_mut(&mut self, id: ContextId) -> &mut AccessContext {
        &mut self.contexts[id.0]
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct GlobalBarrierDef {
    barrier: SyncBarrier,
    /// Bit `i` set iff this def's source stages chain with def `i`'s destination stages, computed
    /// once at definition time (see [`AccessContext::register_global_barrier`]). Used by
    /// [`GlobalBarrierQueueSnapshot::apply`] to decide which defs need reconsidering after a pass
    /// that changed something: a def with no set bits can never gain coverage from another queued
    /// def, so it is applied once and never revisited.
    chain_mask: u32,
}

/// A cheap-to-clone snapshot of a context's global-barrier queue, detached from the owning
/// `AccessContext` so it can be applied while the context's `access_map` is borrowed mutably
/// elsewhere (see [`AccessContext::record_access`]). The table is bounded to
/// [`MAX_GLOBAL_BARRIER_DEFS`] entries, so cloning it is O(1) in practice.
#[derive(Clone, Default)]
struct GlobalBarrierQueueSnapshot {
    defs: SmallVec<[GlobalBarrierDef; MAX_GLOBAL_BARRIER_DEFS]>,
    indices: Vec<u32>,
    queue_id: QueueId,
    start_tag: ResourceUsageTag,
}

impl GlobalBarrierQueueSnapshot {
    /// Applies every def queued since `access_state.next_global_barrier_index` to a fixpoint. Defs
    /// are not necessarily queued in chain order, so a def whose source chains off another
    /// queued def may only gain coverage on a later pass, once that other def has actually been
    /// folded in: this keeps reprocessing the whole queued run until a full pass changes nothing,
    /// relying on [`AccessState::apply_barrier`]'s own idempotence to detect convergence.
    /// `chain_mask` is consulted only to short-circuit: if no queued def chains off any other
    /// (the common case), a single pass is already a fixpoint and the loop exits immediately.
    /// Advances `access_state.next_global_barrier_index` to the end of the queue once done, which
    /// is what makes re-applying the same queue to an already-caught-up state a no-op.
    fn apply(&self, access_state: &mut AccessState) {
        let start = access_state.next_global_barrier_index;
        if start >= self.indices.len() {
            return;
        }
        let exec_tag = ResourceUsageTagEx::from(self.start_tag);
        let queued = &self.indices[start..];
        let any_chaining = queued.iter().any(|&index| self.defs[index as usize].chain_mask != 0);

        loop {
            let mut changed = false;
            for &index in queued {
                let def = &self.defs[index as usize];
                let scope = BarrierScope::with_queue(def.barrier, self.queue_id);
                let mut pending = PendingBarriers::new();
                pending.push(access_state.collect_pending_barriers(scope, def.barrier, false));
                changed |= pending.apply(access_state, exec_tag);
            }
            if !changed || !any_chaining {
                break;
            }
        }
        access_state.next_global_barrier_index = self.indices.len();
    }
}

/// Owns an [`AccessMap`] plus the DAG edges ([`TrackBack`]/[`AsyncReference`]) and per-context
/// global-barrier queue described in the module overview.
#[derive(Default)]
pub struct AccessContext {
    access_map: AccessMap<AccessState>,
    prev: Vec<TrackBack>,
    prev_by_subpass: Vec<Option<usize>>,
    async_refs: Vec<AsyncReference>,
    src_external: Option<TrackBack>,
    dst_external: Option<TrackBack>,
    start_tag: ResourceUsageTag,
    global_barriers_queue: QueueId,
    global_barrier_defs: SmallVec<[GlobalBarrierDef; MAX_GLOBAL_BARRIER_DEFS]>,
    global_barriers: Vec<u32>,
    finalized: bool,
    first_accesses: SortedFirstAccesses,
}

/// Built by [`AccessContext::finalize`]: two ascending-sorted indices over every [`AccessState`]
/// in the map whose `first_access_range` is known, letting
/// [`AccessContext::detect_first_use_hazard`] narrow a query range without walking the whole map.
/// Single-tag accesses (the overwhelmingly common case — most recorded accesses touch one tag)
/// are kept separate from genuine multi-tag ranges so the common case's lookup stays a plain
/// binary search.
#[derive(Default, Clone)]
struct SortedFirstAccesses {
    single_tag: Vec<(u64, AccessRange)>,
    multi_tag: Vec<(ResourceUsageRange, AccessRange)>,
}

impl AccessContext {
    pub fn new() -> Self {
        AccessContext::default()
    }

    pub fn access_map(&self) -> &AccessMap<AccessState> {
        &self.access_map
    }

    pub fn access_map_mut(&mut self) -> &mut AccessMap<AccessState> {
        assert!(!self.finalized, "attempted to mutate a finalized access context");
        &mut self.access_map
    }

    /// Merges `source`'s recorded state over `range` into this context's own map, splitting
    /// existing entries as needed — how a wait-events command imports an event's captured
    /// first-scope accesses into the waiting command buffer before folding in the wait's
    /// barriers.
    pub fn import_range(&mut self, range: AccessRange, source: &AccessState) {
        assert!(!self.finalized, "attempted to mutate a finalized access context");
        merge_into(&mut self.access_map, range, source.clone());
    }

    pub fn start_tag(&self) -> ResourceUsageTag {
        self.start_tag
    }

    pub fn set_start_tag(&mut self, tag: ResourceUsageTag) {
        self.start_tag = tag;
    }

    pub fn add_prev(&mut self, track_back: TrackBack, subpass: Option<usize>) {
        self.prev.push(track_back);
        if let Some(subpass) = subpass {
            if self.prev_by_subpass.len() <= subpass {
                self.prev_by_subpass.resize(subpass + 1, None);
            }
            self.prev_by_subpass[subpass] = Some(self.prev.len() - 1);
        }
    }

    pub fn prev_by_subpass(&self, subpass: usize) -> Option<&TrackBack> {
        self.prev_by_subpass.get(subpass).copied().flatten().map(|i| &self.prev[i])
    }

    pub fn add_async_reference(&mut self, reference: AsyncReference) {
        self.async_refs.push(reference);
    }

    pub fn clear_async_references(&mut self) {
        self.async_refs.clear();
    }

    pub fn set_src_external(&mut self, track_back: TrackBack) {
        self.src_external = Some(track_back);
    }

    pub fn set_dst_external(&mut self, track_back: TrackBack) {
        self.dst_external = Some(track_back);
    }

    pub fn src_external(&self) -> Option<&TrackBack> {
        self.src_external.as_ref()
    }

    pub fn dst_external(&self) -> Option<&TrackBack> {
        self.dst_external.as_ref()
    }

    pub fn async_references(&self) -> &[AsyncReference] {
        &self.async_refs
    }

    pub fn global_barrier_count(&self) -> usize {
        self.global_barriers.len()
    }

    /// Deep-copies `other`'s map, trackbacks, async references, global-barrier state and
    /// start_tag into `self`. Deliberately does not copy `finalized` or the sorted first-access
    /// index: a copy is mutable again and loses the accelerator the original built at finalize
    /// time.
    pub fn init_from(&mut self, other: &AccessContext) {
        self.access_map = other.access_map.clone();
        self.prev = other.prev.clone();
        self.prev_by_subpass = other.prev_by_subpass.clone();
        self.async_refs = other.async_refs.clone();
        self.src_external = other.src_external;
        self.dst_external = other.dst_external;
        self.start_tag = other.start_tag;
        self.global_barriers_queue = other.global_barriers_queue;
        self.global_barrier_defs = other.global_barrier_defs.clone();
        self.global_barriers = other.global_barriers.clone();
        self.finalized = false;
        self.first_accesses = SortedFirstAccesses::default();
    }

    fn barrier_queue_snapshot(&self) -> GlobalBarrierQueueSnapshot {
        GlobalBarrierQueueSnapshot {
            defs: self.global_barrier_defs.clone(),
            indices: self.global_barriers.clone(),
            queue_id: self.global_barriers_queue,
            start_tag: self.start_tag,
        }
    }

    /// Scans the def table for an existing equal barrier; if absent, adds a new def and computes
    /// its chain_mask against every existing def. Always pushes the (possibly reused) def index
    /// onto the FIFO queue. If the table is full when a genuinely new def must be added, flushes
    /// every queued barrier into this context's own `access_map` first and resets the table —
    /// folding the catch-up into `self.access_map` directly (rather than taking an external
    /// `&mut [&mut AccessState]`) sidesteps a self-aliasing conflict a caller would otherwise hit
    /// trying to hold borrowed entries from `access_map_mut()` across this call.
    ///
    /// A reused def's `chain_mask` is *not* recomputed against defs added after it — chaining is
    /// evaluated once, at definition time, and is treated as monotonically available thereafter.
    pub fn register_global_barrier(&mut self, barrier: SyncBarrier, queue_id: QueueId) {
        if self.global_barriers.is_empty() {
            self.global_barriers_queue = queue_id;
        }
        debug_assert_eq!(self.global_barriers_queue, queue_id, "all queued global barriers must share one queue");

        let existing = self.global_barrier_defs.iter().position(|def| def.barrier == barrier);
        let index = match existing {
            Some(index) => index,
            None => {
                if self.global_barrier_defs.len() == MAX_GLOBAL_BARRIER_DEFS {
                    self.flush_global_barriers();
                }
                let mut chain_mask = 0u32;
                for (i, def) in self.global_barrier_defs.iter().enumerate() {
                    if def.barrier.chains_with(&barrier) {
                        chain_mask |= 1 << i;
                    }
                }
                self.global_barrier_defs.push(GlobalBarrierDef { barrier, chain_mask });
                self.global_barrier_defs.len() - 1
            }
        };
        self.global_barriers.push(index as u32);
    }

    fn flush_global_barriers(&mut self) {
        let snapshot = self.barrier_queue_snapshot();
        for (_, state) in self.access_map.iter_mut() {
            snapshot.apply(state);
        }
        self.global_barrier_defs.clear();
        self.global_barriers.clear();
    }

    /// Applies every global barrier def queued since `access_state.next_global_barrier_index`.
    /// See [`GlobalBarrierQueueSnapshot::apply`] for the application order.
    pub fn apply_global_barriers(&self, access_state: &mut AccessState) {
        self.barrier_queue_snapshot().apply(access_state);
    }

    /// Marks the context immutable and builds the [`SortedFirstAccesses`] index
    /// [`detect_first_use_hazard`](Self::detect_first_use_hazard) relies on. After this, callers
    /// may keep persistent references into the access map; no further mutation is permitted
    /// (enforced by [`access_map_mut`](Self::access_map_mut)'s assertion).
    pub fn finalize(&mut self) {
        let mut single_tag = Vec::new();
        let mut multi_tag = Vec::new();
        for (range, state) in self.access_map.iter() {
            if let Some(tag_range) = &state.first_access_range {
                if tag_range.end == tag_range.start + 1 {
                    single_tag.push((tag_range.start, *range));
                } else {
                    multi_tag.push((tag_range.clone(), *range));
                }
            }
        }
        single_tag.sort_by_key(|(tag, _)| *tag);
        multi_tag.sort_by_key(|(range, _)| range.start);
        self.first_accesses = SortedFirstAccesses { single_tag, multi_tag };
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether a finalized context has at least one recorded access whose first-use tag range
    /// intersects `tag_range`, restricted to `addr_range` — the accelerated version of walking
    /// every [`AccessState::first_access_in_tag_range`] in the map. Correct regardless of sort
    /// order (a linear fallback scan is used whenever the sorted index can't short-circuit), but
    /// the common single-tag case resolves in O(log n).
    pub fn has_first_use_in_range(&self, tag_range: &ResourceUsageRange, addr_range: AccessRange) -> bool {
        debug_assert!(self.finalized, "first-use index is only built by finalize()");
        let single_hit = self.first_accesses.single_tag.iter().any(|(tag, range)| {
            tag_range.start <= *tag && *tag < tag_range.end && range.intersects(&addr_range)
        });
        if single_hit {
            return true;
        }
        self.first_accesses.multi_tag.iter().any(|(range, addr)| {
            range.start < tag_range.end && tag_range.start < range.end && addr.intersects(&addr_range)
        })
    }

    /// Runs `detect` against every map entry intersecting `range`; for gaps not covered locally,
    /// recurses into `prev` trackbacks so the query descends through the subpass/predecessor DAG.
    /// A predecessor's state is never consulted raw: the trackback's own
    /// barrier is folded into a clone of it first, so a subpass dependency (or a command buffer's
    /// "previous access context" edge) that covers the query is honored exactly once, at the edge
    /// it was declared on.
    pub fn detect_hazard_range<F>(&self, arena: &AccessContextArena, range: AccessRange, detect: &F) -> HazardResult
    where
        F: Fn(AccessRange, &AccessState) -> HazardResult,
    {
        self.detect_hazard_range_scoped(arena, range, None, detect)
    }

    fn detect_hazard_range_scoped<F>(
        &self,
        arena: &AccessContextArena,
        range: AccessRange,
        incoming_barrier: Option<SyncBarrier>,
        detect: &F,
    ) -> HazardResult
    where
        F: Fn(AccessRange, &AccessState) -> HazardResult,
    {
        let mut cursor = range.begin;
        let entries: Vec<(AccessRange, AccessState)> = self
            .access_map
            .iter()
            .filter(|(k, _)| k.intersects(&range))
            .map(|(k, v)| (*k, apply_edge_barrier(v, incoming_barrier.as_ref())))
            .collect();

        for (key, state) in entries {
            if cursor < key.begin {
                let gap = AccessRange::new(cursor, key.begin.min(range.end));
                if gap.non_empty() {
                    let hazard = self.detect_hazard_prev(arena, gap, detect);
                    if hazard.is_hazard() {
                        return hazard;
                    }
                }
            }
            let clipped = key.intersection(&range);
            let hazard = detect(clipped, &state);
            if hazard.is_hazard() {
                return hazard;
            }
            cursor = cursor.max(key.end);
        }
        if cursor < range.end {
            let gap = AccessRange::new(cursor, range.end);
            let hazard = self.detect_hazard_prev(arena, gap, detect);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    fn detect_hazard_prev<F>(&self, arena: &AccessContextArena, gap: AccessRange, detect: &F) -> HazardResult
    where
        F: Fn(AccessRange, &AccessState) -> HazardResult,
    {
        for track_back in &self.prev {
            let source = arena.get(track_back.source);
            let hazard = source.detect_hazard_range_scoped(arena, gap, Some(track_back.barrier), detect);
            if hazard.is_hazard() {
                return hazard;
            }
        }
        HazardResult::none()
    }

    /// Runs `detect` against every async reference's context, over `range`, with that reference's
    /// own start tag and queue id. No barrier is ever applied here: async references
    /// carry no ordering guarantee regardless of what barriers the peer recorded.
    pub fn detect_async_hazard<F>(&self, arena: &AccessContextArena, range: AccessRange, detect: &F) -> HazardResult
    where
        F: Fn(&AccessState, ResourceUsageTag, QueueId) -> HazardResult,
    {
        for reference in &self.async_refs {
            let source = arena.get(reference.source);
            for (key, value) in source.access_map.iter() {
                if key.intersects(&range) {
                    let hazard = detect(value, reference.start_tag, reference.queue_id);
                    if hazard.is_hazard() {
                        return hazard;
                    }
                }
            }
        }
        HazardResult::none()
    }

    /// Recursively resolves the accesses `prev` would contribute to `range` into `dest_map`,
    /// folding each trackback's barrier and the source context's own queued global barriers in
    /// along the way, so a downstream context (e.g. the next subpass, or a gap in this same
    /// context being filled in from its own `prev`) inherits correctly-barriered state rather than
    /// a raw copy. `dest_global_barrier_count` bounds the `next_global_barrier_index` clamp, so
    /// that barriers queued in one context never silently apply in another.
    pub fn resolve_access_range_recurse_prev(
        &self,
        arena: &AccessContextArena,
        range: AccessRange,
        dest_map: &mut AccessMap<AccessState>,
        dest_global_barrier_count: usize,
    ) {
        self.resolve_access_range_recurse_prev_scoped(arena, range, None, dest_map, dest_global_barrier_count)
    }

    fn resolve_access_range_recurse_prev_scoped(
        &self,
        arena: &AccessContextArena,
        range: AccessRange,
        incoming_barrier: Option<SyncBarrier>,
        dest_map: &mut AccessMap<AccessState>,
        dest_global_barrier_count: usize,
    ) {
        let entries: Vec<(AccessRange, AccessState)> =
            self.access_map.iter().filter(|(k, _)| k.intersects(&range)).map(|(k, v)| (*k, v.clone())).collect();

        let mut cursor = range.begin;
        for (key, mut state) in entries {
            if cursor < key.begin {
                let gap = AccessRange::new(cursor, key.begin.min(range.end));
                if gap.non_empty() {
                    for track_back in &self.prev {
                        let source = arena.get(track_back.source);
                        source.resolve_access_range_recurse_prev_scoped(
                            arena,
                            gap,
                            Some(track_back.barrier),
                            dest_map,
                            dest_global_barrier_count,
                        );
                    }
                }
            }
            // Fold this (source) context's own outstanding global barriers in before the state
            // leaves it, then the edge barrier that governs crossing into the destination.
            self.apply_global_barriers(&mut state);
            if let Some(barrier) = &incoming_barrier {
                let scope = BarrierScope::new(*barrier);
                state.apply_barrier(&scope, barrier, false, ResourceUsageTagEx::from(self.start_tag));
            }
            state.clamp_global_barrier_index(dest_global_barrier_count);
            let clipped = key.intersection(&range);
            merge_into(dest_map, clipped, state);
            cursor = cursor.max(key.end);
        }
        if cursor < range.end {
            let gap = AccessRange::new(cursor, range.end);
            for track_back in &self.prev {
                let source = arena.get(track_back.source);
                source.resolve_access_range_recurse_prev_scoped(
                    arena,
                    gap,
                    Some(track_back.barrier),
                    dest_map,
                    dest_global_barrier_count,
                );
            }
        }
    }

    /// Records a new access of kind `index` over every range `range_gen` produces: for each
    /// range, first infills any part of it not yet present in this context's own map by resolving
    /// it from `prev` (so e.g. a subpass inherits its predecessor's state before the new access is
    /// folded in), applies this context's queued global barriers to every entry about to be
    /// touched, then records the access itself. Mirrors `do_update_access_state` /
    /// `UpdateMemoryAccessState`.
    ///
    /// `self` must not currently be borrowed out of `arena` (e.g. via
    /// [`AccessContextArena::get_mut`]) — build the context standalone, record into it, then
    /// insert it. Any `prev` edges should already point at contexts present in `arena`.
    pub fn record_access<G: RangeGenerator>(
        &mut self,
        arena: &AccessContextArena,
        mut range_gen: G,
        index: SyncAccessIndex,
        tag: ResourceUsageTagEx,
        queue_id: QueueId,
    ) {
        assert!(!self.finalized, "attempted to record an access on a finalized access context");
        loop {
            let range = range_gen.next_range();
            if range.is_empty() {
                break;
            }
            self.do_update_access_state(arena, range, index, tag, queue_id);
        }
    }

    fn do_update_access_state(
        &mut self,
        arena: &AccessContextArena,
        range: AccessRange,
        index: SyncAccessIndex,
        tag: ResourceUsageTagEx,
        queue_id: QueueId,
    ) {
        let prev = self.prev.clone();
        let dest_count = self.global_barrier_count();
        if !prev.is_empty() {
            let gaps = gaps_in(&self.access_map, range);
            for gap in gaps {
                for track_back in &prev {
                    let source = arena.get(track_back.source);
                    source.resolve_access_range_recurse_prev_scoped(
                        arena,
                        gap,
                        Some(track_back.barrier),
                        &mut self.access_map,
                        dest_count,
                    );
                }
            }
        }

        let barrier_queue = self.barrier_queue_snapshot();
        struct UpdateOps {
            barrier_queue: GlobalBarrierQueueSnapshot,
            index: SyncAccessIndex,
            tag: ResourceUsageTagEx,
            queue_id: QueueId,
        }
        impl RangeOps<AccessState> for UpdateOps {
            fn infill(&mut self, map: &mut AccessMap<AccessState>, gap: AccessRange) {
                let mut state = AccessState::new();
                self.barrier_queue.apply(&mut state);
                state.update(self.index, self.tag, self.queue_id);
                map.insert(gap, state);
            }
            fn update(&mut self, map: &mut AccessMap<AccessState>, range: AccessRange) {
                if let Some((_, state)) = map.iter_mut().find(|(k, _)| **k == range) {
                    self.barrier_queue.apply(state);
                    state.update(self.index, self.tag, self.queue_id);
                }
            }
        }
        let mut ops = UpdateOps { barrier_queue, index, tag, queue_id };
        crate::range_map::infill_update_range(&mut self.access_map, range, &mut ops);
    }
}

/// Clones `state` and, if `barrier` is present, folds it in — the barrier effect an edge (a
/// [`TrackBack`]) contributes to a predecessor's state as it's observed across that edge.
fn apply_edge_barrier(state: &AccessState, barrier: Option<&SyncBarrier>) -> AccessState {
    let mut state = state.clone();
    if let Some(barrier) = barrier {
        let scope = BarrierScope::new(*barrier);
        state.apply_barrier(&scope, barrier, false, ResourceUsageTagEx::default());
    }
    state
}

/// Returns the subranges of `range` not already covered by a key in `map`.
fn gaps_in<V>(map: &AccessMap<V>, range: AccessRange) -> Vec<AccessRange> {
    let mut gaps = Vec::new();
    let mut cursor = range.begin;
    let mut covering: Vec<AccessRange> = map.iter().map(|(k, _)| *k).filter(|k| k.intersects(&range)).collect();
    covering.sort();
    for key in covering {
        if cursor < key.begin {
            gaps.push(AccessRange::new(cursor, key.begin.min(range.end)));
        }
        cursor = cursor.max(key.end);
    }
    if cursor < range.end {
        gaps.push(AccessRange::new(cursor, range.end));
    }
    gaps
}

/// Merges `state` into `dest`'s entry for `range`, splitting as needed so the map invariant
/// (non-overlapping keys) is preserved.
fn merge_into(dest: &mut AccessMap<AccessState>, range: AccessRange, state: AccessState) {
    struct Merge(AccessState);
    impl RangeOps<AccessState> for Merge {
        fn infill(&mut self, map: &mut AccessMap<AccessState>, gap: AccessRange) {
            map.insert(gap, self.0.clone());
        }
        fn update(&mut self, map: &mut AccessMap<AccessState>, range: AccessRange) {
            if let Some((_, existing)) = map.iter_mut().find(|(k, _)| **k == range) {
                existing.resolve(&self.0);
            }
        }
    }
    let mut ops = Merge(state);
    crate::range_map::infill_update_range(dest, range, &mut ops);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SyncAccessIndex;
    use crate::barrier::SyncExecScope;
    use crate::range_map::SingleRangeGen;
    use crate::tag::ResourceUsageTagEx;
    use ash::vk;

    #[test]
    fn finalized_context_rejects_mutation() {
        let mut ctx = AccessContext::new();
        ctx.finalize();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.access_map_mut();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn global_barrier_applies_and_advances_index() {
        let mut ctx = AccessContext::new();
        let src = SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);
        let dst = SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ);
        let barrier = SyncBarrier::new(src, dst);
        ctx.register_global_barrier(barrier, QueueId::INVALID);

        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(0));
        assert_eq!(state.next_global_barrier_index, 0);
        ctx.apply_global_barriers(&mut state);
        assert_eq!(state.next_global_barrier_index, 1);
        assert!(state.last_writes[0].barriers.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }

    #[test]
    fn chained_global_barriers_together_cover_a_stage_neither_covers_alone() {
        let mut ctx = AccessContext::new();
        let a = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_WRITE),
        );
        let b = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        ctx.register_global_barrier(a, QueueId::INVALID);
        ctx.register_global_barrier(b, QueueId::INVALID);

        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(0));
        ctx.apply_global_barriers(&mut state);

        assert!(!state.detect_hazard(SyncAccessIndex::FragmentShaderRead).is_hazard());
    }

    #[test]
    fn resolve_recurse_prev_descends_into_predecessor_and_applies_edge_barrier() {
        let mut arena = AccessContextArena::new();
        let mut predecessor = AccessContext::new();
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::TransferWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(1)), QueueId(0));
        predecessor.access_map_mut().insert(AccessRange::new(0, 64), state);
        let pred_id = arena.insert(predecessor);

        let mut subpass = AccessContext::new();
        let barrier = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
        );
        subpass.add_prev(TrackBack { source: pred_id, barrier, queue_id: QueueId::INVALID }, Some(0));
        let subpass_id = arena.insert(subpass);

        let mut dest = AccessContext::new();
        let dest_count = dest.global_barrier_count();
        arena.get(subpass_id).resolve_access_range_recurse_prev(
            &arena,
            AccessRange::new(0, 64),
            dest.access_map_mut(),
            dest_count,
        );
        let (_, state) = dest.access_map().get(&AccessRange::new(0, 64)).unwrap();
        assert!(state.last_writes[0].barriers.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));

        // Without the dependency the descent still copies the state across, but it carries no
        // barrier coverage: a read at the destination stage hazards.
        assert!(state.detect_hazard(SyncAccessIndex::FragmentShaderRead).is_hazard() == false);
        assert!(state.detect_hazard(SyncAccessIndex::ComputeShaderRead).is_hazard());
    }

    #[test]
    fn record_access_infills_from_predecessor_subpass() {
        let mut arena = AccessContextArena::new();
        let mut predecessor = AccessContext::new();
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::ColorAttachmentWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(0)), QueueId(0));
        predecessor.access_map_mut().insert(AccessRange::new(0, 64), state);
        let pred_id = arena.insert(predecessor);

        let mut subpass = AccessContext::new();
        let barrier = SyncBarrier::new(
            SyncExecScope::make_src(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
            SyncExecScope::make_dst(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::COLOR_ATTACHMENT_READ),
        );
        subpass.add_prev(TrackBack { source: pred_id, barrier, queue_id: QueueId::INVALID }, Some(0));

        // With the dependency in place, reading the same attachment in the next subpass is
        // already covered by the edge barrier and must not hazard.
        subpass.record_access(
            &arena,
            SingleRangeGen::new(AccessRange::new(0, 64)),
            SyncAccessIndex::ColorAttachmentRead,
            ResourceUsageTagEx::from(ResourceUsageTag::new(1)),
            QueueId(0),
        );
        let (_, state) = subpass.access_map().get(&AccessRange::new(0, 64)).unwrap();
        assert!(state.last_reads.iter().any(|r| r.index == SyncAccessIndex::ColorAttachmentRead));
    }

    #[test]
    fn record_access_without_dependency_hazards_on_next_subpass_read() {
        let mut arena = AccessContextArena::new();
        let mut predecessor = AccessContext::new();
        let mut state = AccessState::new();
        state.update(SyncAccessIndex::ColorAttachmentWrite, ResourceUsageTagEx::from(ResourceUsageTag::new(0)), QueueId(0));
        predecessor.access_map_mut().insert(AccessRange::new(0, 64), state);
        let pred_id = arena.insert(predecessor);

        // No subpass dependency barrier at all: the trackback's barrier is a no-op (empty
        // scopes), so the inherited write still hazards against the read.
        let mut subpass = AccessContext::new();
        let empty_barrier = SyncBarrier::new(SyncExecScope::default(), SyncExecScope::default());
        subpass.add_prev(TrackBack { source: pred_id, barrier: empty_barrier, queue_id: QueueId::INVALID }, Some(0));

        let hazard = subpass.detect_hazard_range(&arena, AccessRange::new(0, 64), &|_r, s| {
            s.detect_hazard(SyncAccessIndex::ColorAttachmentRead)
        });
        assert!(hazard.is_hazard());
    }
}
