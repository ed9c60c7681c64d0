// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use super::points_to::PointsToSet;
use crate::util::bit_vec::Idx;

/// Generational points-to data.
///
/// Each pointer key owns two sets: `diff` holds elements discovered since
/// the key was last processed (the "new" generation) and `propa` holds
/// elements that have already been propagated along the key's outgoing
/// edges (the "old" generation). The worklist solver only ever pushes a
/// key's diff set to its successors and then flushes it into propa, which
/// keeps propagation incremental.
///
/// K  (Key):     "owning" pointer of a points-to set.
/// D  (Data):    elements in points-to sets.
/// DS (DataSet): the points-to set; a collection of Data.
pub struct DiffPTData<K, D, DS> {
    /// Points-to deltas still to be propagated.
    pub(crate) diff_pts_map: HashMap<K, DS>,
    /// Points-to already propagated.
    pub(crate) propa_pts_map: HashMap<K, DS>,

    marker: PhantomData<D>,
}

impl<K, D, DS> fmt::Debug for DiffPTData<K, D, DS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "DiffPTData".fmt(f)
    }
}

impl<K, D, DS> DiffPTData<K, D, DS>
where
    K: Hash + Eq + Copy,
    D: Idx,
    DS: PointsToSet<D> + Clone + fmt::Debug,
    for<'a> &'a DS: IntoIterator<Item = D>,
{
    pub fn new() -> DiffPTData<K, D, DS> {
        DiffPTData {
            diff_pts_map: HashMap::new(),
            propa_pts_map: HashMap::new(),
            marker: PhantomData,
        }
    }

    /// Adds an element to the new generation of `var`.
    /// Returns false if the element was already present (either generation).
    #[inline]
    pub fn add_pts(&mut self, var: K, elem: D) -> bool {
        if let Some(propa) = self.propa_pts_map.get(&var) {
            if propa.contains(elem) {
                return false;
            }
        }
        let diff = self.diff_pts_map.entry(var).or_insert_with(DS::new);
        diff.insert(elem)
    }

    /// Performs diff_pts(dst_var) ∪= (src_ds - propa_pts(dst_var)).
    #[inline]
    pub fn union_pts_to(&mut self, dst_var: K, src_ds: &DS) -> bool {
        let diff = self.diff_pts_map.entry(dst_var).or_insert_with(DS::new);
        let propa = self.propa_pts_map.entry(dst_var).or_insert_with(DS::new);
        let mut new = src_ds.clone();
        new.subtract(propa);
        diff.union(&new)
    }

    /// Get the new generation of `var`.
    #[inline]
    pub fn get_diff_pts(&self, var: K) -> Option<&DS> {
        self.diff_pts_map.get(&var)
    }

    /// Get the already-propagated generation of `var`.
    #[inline]
    pub fn get_propa_pts(&self, var: K) -> Option<&DS> {
        self.propa_pts_map.get(&var)
    }

    /// True if `elem` is present in either generation of `var`.
    pub fn contains_pts(&self, var: K, elem: D) -> bool {
        self.propa_pts_map.get(&var).map_or(false, |s| s.contains(elem))
            || self.diff_pts_map.get(&var).map_or(false, |s| s.contains(elem))
    }

    /// Moves everything in the new generation of `var` to the old one.
    pub fn flush(&mut self, var: K) {
        if !self.diff_pts_map.contains_key(&var) {
            return;
        }

        let diff = self.diff_pts_map.get_mut(&var).unwrap();
        let propa = self.propa_pts_map.entry(var).or_insert_with(DS::new);
        propa.union(diff);
        diff.clear();
    }

    /// Total number of elements across both generations of `var`.
    pub fn len_pts(&self, var: K) -> usize {
        let diff = self.diff_pts_map.get(&var).map_or(0, |s| s.count());
        let propa = self.propa_pts_map.get(&var).map_or(0, |s| s.count());
        diff + propa
    }

    #[inline]
    pub fn clear(&mut self) {
        self.diff_pts_map.clear();
        self.propa_pts_map.clear();
    }
}

#[cfg(test)]
mod test {
    use super::DiffPTData;
    use crate::pts_set::points_to::{HybridPointsToSet, PointsToSet};

    type Data = DiffPTData<u32, u32, HybridPointsToSet<u32>>;

    #[test]
    fn add_skips_already_propagated() {
        let mut data = Data::new();
        assert!(data.add_pts(1, 7));
        assert!(!data.add_pts(1, 7));
        data.flush(1);
        // Now 7 sits in the old generation; re-adding is a no-op.
        assert!(!data.add_pts(1, 7));
        assert!(data.get_diff_pts(1).map_or(true, |s| s.is_empty()));
        assert!(data.get_propa_pts(1).unwrap().contains(7));
        assert!(data.contains_pts(1, 7));
    }

    #[test]
    fn union_subtracts_old_generation() {
        let mut data = Data::new();
        data.add_pts(1, 7);
        data.flush(1);

        let mut incoming = HybridPointsToSet::new();
        incoming.insert(7);
        incoming.insert(8);
        assert!(data.union_pts_to(1, &incoming));
        let diff = data.get_diff_pts(1).unwrap();
        assert!(diff.contains(8));
        assert!(!diff.contains(7));
        assert_eq!(data.len_pts(1), 2);

        // Everything already known: no change.
        assert!(!data.union_pts_to(1, &incoming));
    }

    #[test]
    fn flush_is_idempotent() {
        let mut data = Data::new();
        data.add_pts(3, 1);
        data.flush(3);
        data.flush(3);
        data.flush(4);
        assert_eq!(data.len_pts(3), 1);
        assert_eq!(data.len_pts(4), 0);
    }
}
