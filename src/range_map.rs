// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Range algebra over a flat [`ResourceAddress`] space.
//!
//! [`AccessMap`] is a `BTreeMap` of pairwise non-overlapping, ascending [`AccessRange`]s. It
//! never merges or splits entries on its own: callers (chiefly [`crate::context::AccessContext`])
//! are responsible for keeping the keys correctly partitioned via [`AccessMap::split`],
//! [`infill_update_range`] and friends.

use std::collections::BTreeMap;
use std::ops::Range;

/// A flat 64-bit address into the resource address space. Buffers and images are both mapped
/// into this space by an external base-address assignment; this crate treats the mapping as
/// opaque and only ever adds/compares/shifts addresses.
pub type ResourceAddress = u64;

/// A half-open interval `[begin, end)` over [`ResourceAddress`]. Empty iff `begin >= end`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AccessRange {
    pub begin: ResourceAddress,
    pub end: ResourceAddress,
}

impl AccessRange {
    pub const fn new(begin: ResourceAddress, end: ResourceAddress) -> Self {
        AccessRange { begin, end }
    }

    /// The range covering the entire address space, used as the "whole resource" query.
    pub const fn full() -> Self {
        AccessRange::new(0, ResourceAddress::MAX)
    }

    #[inline]
    pub fn non_empty(&self) -> bool {
        self.begin < self.end
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.non_empty()
    }

    /// True iff `self` ends at or before `other` begins — the strict-weak-order relation the
    /// map's traversal logic relies on. Two ranges that are neither `strictly_less` of each
    /// other in either direction intersect (or are degenerate/empty).
    #[inline]
    pub fn strictly_less(&self, other: &AccessRange) -> bool {
        self.end <= other.begin
    }

    #[inline]
    pub fn intersects(&self, other: &AccessRange) -> bool {
        self.non_empty() && other.non_empty() && self.begin < other.end && other.begin < self.end
    }

    #[inline]
    pub fn includes(&self, addr: ResourceAddress) -> bool {
        self.begin <= addr && addr < self.end
    }

    /// The intersection of two ranges. Yields an empty range (not necessarily canonical) when
    /// they don't overlap.
    pub fn intersection(&self, other: &AccessRange) -> AccessRange {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin < end {
            AccessRange::new(begin, end)
        } else {
            AccessRange::new(begin, begin)
        }
    }

    pub fn shift(&self, base: ResourceAddress) -> AccessRange {
        AccessRange::new(self.begin + base, self.end + base)
    }
}

impl std::ops::BitAnd for AccessRange {
    type Output = AccessRange;
    fn bitand(self, rhs: AccessRange) -> AccessRange {
        self.intersection(&rhs)
    }
}

impl std::ops::Add<ResourceAddress> for AccessRange {
    type Output = AccessRange;
    fn add(self, rhs: ResourceAddress) -> AccessRange {
        self.shift(rhs)
    }
}

impl From<Range<ResourceAddress>> for AccessRange {
    fn from(r: Range<ResourceAddress>) -> Self {
        AccessRange::new(r.start, r.end)
    }
}

// `AccessMap`'s invariant (non-overlapping keys) means `strictly_less` is a strict weak order
// over the set of keys actually stored in a map, even though it isn't a total order over all
// possible ranges (intersecting ranges are incomparable). `Ord` here is only ever exercised by
// `BTreeMap` on keys drawn from a single, already-disjoint map.
impl PartialOrd for AccessRange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AccessRange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.begin.cmp(&other.begin).then(self.end.cmp(&other.end))
    }
}

/// An ordered, non-overlapping mapping from [`AccessRange`] to a value (normally
/// [`crate::access_state::AccessState`]).
#[derive(Clone, Debug, Default)]
pub struct AccessMap<V> {
    map: BTreeMap<AccessRange, V>,
}

pub type Iter<'a, V> = std::collections::btree_map::Iter<'a, AccessRange, V>;
pub type IterMut<'a, V> = std::collections::btree_map::IterMut<'a, AccessRange, V>;

impl<V> AccessMap<V> {
    pub fn new() -> Self {
        AccessMap { map: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> Iter<'_, V> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        self.map.iter_mut()
    }

    /// The first entry whose range does not end before `addr`, i.e. the first key `k` with
    /// `k.end > addr` — equivalently the first key that could possibly contain or follow `addr`.
    ///
    /// Access maps are kept small by construction (barrier/subresource decompositions, not
    /// arbitrary user data), so a linear scan over the ascending keys is the simplest correct
    /// implementation; it is what the traversal helpers in this module already do internally.
    pub fn lower_bound(&self, addr: ResourceAddress) -> Option<&AccessRange> {
        self.map.keys().find(|k| k.end > addr)
    }

    /// Returns the value whose range contains `range.begin`, if any entry intersects `range`.
    pub fn get(&self, range: &AccessRange) -> Option<(&AccessRange, &V)> {
        self.map.iter().find(|(k, _)| k.intersects(range))
    }

    pub fn insert(&mut self, range: AccessRange, value: V) {
        debug_assert!(range.non_empty());
        debug_assert!(
            !self.map.keys().any(|k| k.intersects(&range)),
            "AccessMap::insert must not overlap an existing entry"
        );
        self.map.insert(range, value);
    }

    pub fn remove(&mut self, range: &AccessRange) -> Option<V> {
        self.map.remove(range)
    }

    /// Inserts `(range, value)` only into the subranges of `range` not already covered by an
    /// existing key, leaving existing entries untouched. Mirrors the original's
    /// `AccessMap::InfillGap`, used when filling in a default/derived access state for regions a
    /// context has never recorded an access against.
    pub fn infill_gap(&mut self, range: AccessRange, value: V)
    where
        V: Clone,
    {
        if range.is_empty() {
            return;
        }
        let mut cursor = range.begin;
        let overlapping: Vec<AccessRange> = self
            .map
            .keys()
            .filter(|k| k.intersects(&range))
            .copied()
            .collect();
        for existing in overlapping {
            if cursor < existing.begin {
                self.map
                    .insert(AccessRange::new(cursor, existing.begin), value.clone());
            }
            cursor = cursor.max(existing.end);
        }
        if cursor < range.end {
            self.map.insert(AccessRange::new(cursor, range.end), value);
        }
    }

    /// Splits the entry containing `at` into two entries at `at`, duplicating its value. A
    /// no-op if no entry spans `at` or `at` is already a boundary.
    pub fn split(&mut self, at: ResourceAddress)
    where
        V: Clone,
    {
        let found = self
            .map
            .keys()
            .find(|k| k.begin < at && at < k.end)
            .copied();
        if let Some(range) = found {
            let value = self.map.remove(&range).unwrap();
            self.map.insert(AccessRange::new(range.begin, at), value.clone());
            self.map.insert(AccessRange::new(at, range.end), value);
        }
    }

    /// Merges adjacent entries whose values are equal, bounding the number of keys a long-lived
    /// context accumulates from many small, non-conflicting accesses to neighboring addresses.
    pub fn consolidate(&mut self)
    where
        V: PartialEq + Clone,
    {
        let entries: Vec<(AccessRange, V)> = self.map.iter().map(|(k, v)| (*k, v.clone())).collect();
        self.map.clear();
        let mut merged: Vec<(AccessRange, V)> = Vec::with_capacity(entries.len());
        for (range, value) in entries {
            if let Some((last_range, last_value)) = merged.last_mut() {
                if last_range.end == range.begin && *last_value == value {
                    last_range.end = range.end;
                    continue;
                }
            }
            merged.push((range, value));
        }
        for (range, value) in merged {
            self.map.insert(range, value);
        }
    }
}

/// Generic mutation callbacks for [`infill_update_range`]: `infill` is invoked once per gap not
/// already covered by a map entry, `update` once per (possibly newly split) entry that lies
/// entirely inside the driving range. Implemented as a trait rather than a closure pair so the
/// hot update path in [`crate::context::AccessContext`] monomorphises per call site, matching the
/// functor-based dispatch of the original.
pub trait RangeOps<V> {
    fn infill(&mut self, map: &mut AccessMap<V>, gap: AccessRange);
    fn update(&mut self, map: &mut AccessMap<V>, range: AccessRange);
}

/// Walks `range` over `map`, splitting entries at `range`'s boundaries so every entry passed to
/// `ops.update` lies entirely inside `range`, and calling `ops.infill` once per gap. Mirrors the
/// original's `InfillUpdateRange` free function.
pub fn infill_update_range<V, O>(map: &mut AccessMap<V>, range: AccessRange, ops: &mut O)
where
    V: Clone,
    O: RangeOps<V>,
{
    if range.is_empty() {
        return;
    }
    map.split(range.begin);
    map.split(range.end);

    let mut cursor = range.begin;
    loop {
        let next = map
            .map
            .keys()
            .filter(|k| k.begin >= cursor && k.begin < range.end)
            .min()
            .copied();
        match next {
            Some(entry) if entry.begin == cursor => {
                ops.update(map, entry);
                cursor = entry.end;
            }
            Some(entry) => {
                let gap_end = entry.begin.min(range.end);
                ops.infill(map, AccessRange::new(cursor, gap_end));
                cursor = gap_end;
            }
            None => {
                if cursor < range.end {
                    ops.infill(map, AccessRange::new(cursor, range.end));
                }
                break;
            }
        }
        if cursor >= range.end {
            break;
        }
    }
}

/// A lazy, forward-only sequence of [`AccessRange`]s, typically produced by flattening an image
/// subresource range (mip/layer/aspect) into contiguous address intervals. Treated as an opaque
/// collaborator: this crate only ever consumes `next()`. Implementations that are
/// not naturally restartable must be explicitly `clone`d before being consumed twice (the
/// recursive descent in [`crate::context`] relies on this).
pub trait RangeGenerator: Clone {
    /// Returns the next range, or an empty range to signal exhaustion.
    fn next_range(&mut self) -> AccessRange;
}

/// A trivial [`RangeGenerator`] over a single [`AccessRange`], used for buffer accesses (which
/// need no subresource decomposition) and in tests.
#[derive(Clone, Debug)]
pub struct SingleRangeGen {
    range: AccessRange,
    done: bool,
}

impl SingleRangeGen {
    pub fn new(range: AccessRange) -> Self {
        SingleRangeGen { range, done: false }
    }
}

impl RangeGenerator for SingleRangeGen {
    fn next_range(&mut self) -> AccessRange {
        if self.done || self.range.is_empty() {
            AccessRange::default()
        } else {
            self.done = true;
            self.range
        }
    }
}

/// Runs `action(range, pos)` once per intersection of a generated range and a map entry, never
/// invoking `action` twice for the same map entry across successive generated ranges (tracked via
/// a `skip_limit` watermark, mirroring `ForEachEntryInRangesUntil`). `action` returns `true` to
/// stop the walk early.
pub fn for_each_entry_in_ranges_until<V, G, A>(map: &AccessMap<V>, range_gen: &mut G, mut action: A) -> bool
where
    G: RangeGenerator,
    A: FnMut(AccessRange, &AccessRange, &V) -> bool,
{
    let mut skip_limit: ResourceAddress = 0;
    loop {
        let range = range_gen.next_range();
        if range.is_empty() {
            break;
        }
        let mut range = range;
        if range.end <= skip_limit {
            continue;
        }
        if range.begin < skip_limit {
            range.begin = skip_limit;
        }
        let mut stop = false;
        for (key, value) in map.iter() {
            if key.strictly_less(&range) {
                continue;
            }
            if range.strictly_less(key) {
                break;
            }
            skip_limit = key.end;
            if action(range, key, value) {
                stop = true;
                break;
            }
        }
        if stop {
            return true;
        }
    }
    false
}

/// A [`RangeGenerator`] over an explicit, precomputed list of ranges, standing in for the image
/// subresource→address flattening this crate treats as an opaque external collaborator
/// (`ImageRangeGen`/`MakeImageRangeGen`). The shim is expected to hand the crate one of these
/// already flattened from a `VkImageSubresourceRange`-shaped input.
#[derive(Clone, Debug, Default)]
pub struct MultiRangeGen {
    ranges: Vec<AccessRange>,
    next: usize,
}

impl MultiRangeGen {
    pub fn new(ranges: Vec<AccessRange>) -> Self {
        MultiRangeGen { ranges, next: 0 }
    }
}

impl RangeGenerator for MultiRangeGen {
    fn next_range(&mut self) -> AccessRange {
        if self.next >= self.ranges.len() {
            return AccessRange::default();
        }
        let r = self.ranges[self.next];
        self.next += 1;
        r
    }
}

/// The concrete range-generator type used throughout this crate's public API in place of a
/// generic type parameter, per [`RangeGenerator`]'s doc comment: it is either a single buffer
/// range or a precomputed list standing in for a flattened image subresource range.
#[derive(Clone, Debug)]
pub enum RangeGen {
    Single(SingleRangeGen),
    Multi(MultiRangeGen),
}

impl RangeGen {
    pub fn single(range: AccessRange) -> Self {
        RangeGen::Single(SingleRangeGen::new(range))
    }

    pub fn multi(ranges: Vec<AccessRange>) -> Self {
        RangeGen::Multi(MultiRangeGen::new(ranges))
    }
}

impl RangeGenerator for RangeGen {
    fn next_range(&mut self) -> AccessRange {
        match self {
            RangeGen::Single(g) => g.next_range(),
            RangeGen::Multi(g) => g.next_range(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_strictly_less_and_intersects() {
        let a = AccessRange::new(0, 10);
        let b = AccessRange::new(10, 20);
        let c = AccessRange::new(5, 15);
        assert!(a.strictly_less(&b));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }

    #[test]
    fn empty_range_is_noop() {
        let r = AccessRange::new(5, 5);
        assert!(r.is_empty());
        assert!(!r.non_empty());
    }

    #[test]
    fn insert_and_iterate_ascending() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(10, 20), 2);
        map.insert(AccessRange::new(0, 10), 1);
        let keys: Vec<_> = map.iter().map(|(k, _)| k.begin).collect();
        assert_eq!(keys, vec![0, 10]);
    }

    #[test]
    fn split_preserves_value() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(0, 20), 7);
        map.split(10);
        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(
            entries,
            vec![(AccessRange::new(0, 10), 7), (AccessRange::new(10, 20), 7)]
        );
    }

    #[test]
    fn infill_gap_only_fills_uncovered_regions() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(10, 20), 99);
        map.infill_gap(AccessRange::new(0, 30), 1);
        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(
            entries,
            vec![
                (AccessRange::new(0, 10), 1),
                (AccessRange::new(10, 20), 99),
                (AccessRange::new(20, 30), 1),
            ]
        );
    }

    #[test]
    fn consolidate_merges_equal_adjacent_entries() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(0, 10), 5);
        map.insert(AccessRange::new(10, 20), 5);
        map.insert(AccessRange::new(20, 30), 6);
        map.consolidate();
        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(
            entries,
            vec![(AccessRange::new(0, 20), 5), (AccessRange::new(20, 30), 6)]
        );
    }

    struct RecordingOps {
        infills: Vec<AccessRange>,
        updates: Vec<AccessRange>,
    }

    impl RangeOps<u32> for RecordingOps {
        fn infill(&mut self, map: &mut AccessMap<u32>, gap: AccessRange) {
            self.infills.push(gap);
            map.insert(gap, 0);
        }
        fn update(&mut self, map: &mut AccessMap<u32>, range: AccessRange) {
            self.updates.push(range);
            if let Some(v) = map.iter_mut().find(|(k, _)| **k == range).map(|(_, v)| v) {
                *v += 1;
            }
        }
    }

    #[test]
    fn infill_update_range_splits_and_visits_each_entry_once() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(5, 15), 1);
        let mut ops = RecordingOps { infills: vec![], updates: vec![] };
        infill_update_range(&mut map, AccessRange::new(0, 20), &mut ops);
        assert_eq!(ops.infills, vec![AccessRange::new(0, 5), AccessRange::new(15, 20)]);
        assert_eq!(ops.updates, vec![AccessRange::new(5, 15)]);
    }

    #[test]
    fn for_each_entry_visits_each_map_entry_once_per_pass() {
        let mut map: AccessMap<u32> = AccessMap::new();
        map.insert(AccessRange::new(0, 10), 1);
        map.insert(AccessRange::new(10, 20), 2);
        let mut gen = SingleRangeGen::new(AccessRange::new(0, 20));
        let mut visits = vec![];
        for_each_entry_in_ranges_until(&map, &mut gen, |_range, key, _value| {
            visits.push(*key);
            false
        });
        assert_eq!(visits, vec![AccessRange::new(0, 10), AccessRange::new(10, 20)]);
    }
}
