/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The ordered secondary index (§3.5, §4.5): a sorted `value -> row_key`
//! mapping maintained alongside (and always rebuildable from) a single
//! [`crate::btree::Column`].
//!
//! Every node of the index tree is a pair of sibling [`Array`]s stored
//! behind one `has_refs` wrapper array of exactly two elements:
//!
//! - A **leaf** wraps `values[]` (sorted ascending) and `row_keys[]`,
//!   parallel arrays of matching length.
//! - An **inner node** wraps `max_values_per_child[]` (the maximum value
//!   reachable through each child, ascending) and `child_refs[]`.
//!
//! The wrapper's `IS_INNER_BPTREE_NODE` header flag distinguishes the two,
//! the same bit [`crate::btree::Column`] uses for the same purpose — this
//! is a different tree, but "a has_refs node flagged as an inner node of
//! *some* B+-tree" is the same idea both places.
//!
//! This is a multi-valued index: several row keys may share a value, and
//! [`IndexTree::find`] makes no promise about *which* matching row it
//! returns (§8, scenario 5) — only that the row it returns really does
//! hold that value.

use crate::alloc::{Allocator, AllocatorMut, Ref};
use crate::array::Array;
use crate::btree::Column;
use crate::error::Result;

/// Split threshold for a leaf/inner node of the index tree (≈ `MAX_LIST_SIZE`).
pub const MAX_LIST_SIZE: usize = 1000;

/// What a recursive insert did to the subtree it was called on.
///
/// The specification names five propagated variants (`None`,
/// `InsertBefore`, `InsertAfter`, `Split`, `Error`); `InsertBefore` and
/// `InsertAfter` both reduce to "replace this child and splice a new
/// sibling next to it" and are folded into `Split` here (`Error` is simply
/// the `Result::Err` path) — see `DESIGN.md`.
enum Propagate {
    /// The subtree's ref may have changed (COW, in-place growth); no new
    /// sibling was created.
    Updated(Ref),
    /// The subtree overflowed; `right` is a brand-new sibling to be
    /// inserted immediately after `left`, which replaces this child.
    Split { left: Ref, right: Ref, right_max: i64 },
}

enum EraseOutcome {
    Updated(Ref),
    Removed,
}

/// A node's two sibling arrays and the flag distinguishing leaf vs inner.
struct NodeView {
    wrapper: Array,
    first: Array,
    second: Array,
}

fn open_node(alloc: &impl Allocator, node_ref: Ref) -> Result<NodeView> {
    let wrapper = Array::open(alloc, node_ref)?;
    debug_assert_eq!(wrapper.size(), 2);
    let first = Array::open(alloc, Ref(wrapper.get(alloc, 0) as u64))?;
    let second = Array::open(alloc, Ref(wrapper.get(alloc, 1) as u64))?;
    Ok(NodeView { wrapper, first, second })
}

fn make_wrapper(alloc: &mut impl AllocatorMut, first: Ref, second: Ref, is_inner: bool) -> Result<Ref> {
    let mut wrapper = Array::create_empty(alloc, true, false)?;
    wrapper.insert(alloc, 0, first.get() as i64)?;
    wrapper.insert(alloc, 1, second.get() as i64)?;
    wrapper.set_is_inner_bptree_node(alloc, is_inner);
    Ok(wrapper.reference())
}

/// A sorted `value -> row_key` mapping over a single column's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTree {
    root: Ref,
}

impl IndexTree {
    /// Creates a new, empty index (a single empty leaf).
    pub fn create_empty(alloc: &mut impl AllocatorMut) -> Result<Self> {
        let values = Array::create_empty(alloc, false, false)?.reference();
        let row_keys = Array::create_empty(alloc, false, false)?.reference();
        let root = make_wrapper(alloc, values, row_keys, false)?;
        Ok(Self { root })
    }

    /// Wraps an existing root ref.
    pub fn open(root: Ref) -> Self {
        Self { root }
    }

    /// The current root ref, for persisting in a table descriptor.
    #[inline(always)]
    pub fn root(&self) -> Ref {
        self.root
    }

    /// Builds an index over every `(column[i], i)` pair, in column order.
    pub fn build(alloc: &mut impl AllocatorMut, column: &Column) -> Result<Self> {
        let mut index = Self::create_empty(alloc)?;
        let n = column.size(alloc)?;
        for i in 0..n {
            let v = column.get(alloc, i)?;
            index.insert(alloc, i as u64, v)?;
        }
        Ok(index)
    }

    /// Inserts `(value, row_key)`, keeping `values[]` sorted ascending.
    /// Among equal values, a fresh insert lands after any existing ones
    /// (`upper_bound`), per §4.5.
    pub fn insert(&mut self, alloc: &mut impl AllocatorMut, row_key: u64, value: i64) -> Result<()> {
        match insert_into(alloc, self.root, row_key, value)? {
            Propagate::Updated(r) => self.root = r,
            Propagate::Split { left, right, right_max } => {
                let left_max = max_value_of(alloc, left)?;
                let maxes = Array::from_values(alloc, false, &[left_max, right_max])?.reference();
                let children = Array::from_values(alloc, true, &[left.get() as i64, right.get() as i64])?
                    .reference();
                self.root = make_wrapper(alloc, maxes, children, true)?;
            }
        }
        Ok(())
    }

    /// Erases the `(row_key, old_value)` pair. `row_key` disambiguates
    /// among duplicate values.
    pub fn erase(&mut self, alloc: &mut impl AllocatorMut, row_key: u64, old_value: i64) -> Result<()> {
        match erase_from(alloc, self.root, row_key, old_value)? {
            EraseOutcome::Updated(r) => self.root = r,
            EraseOutcome::Removed => self.root = IndexTree::create_empty(alloc)?.root,
        }
        self.collapse(alloc);
        Ok(())
    }

    /// Finds a row holding `value`, or `None` if no row does. Ties among
    /// duplicate values resolve arbitrarily (§8, scenario 5).
    pub fn find(&self, alloc: &impl Allocator, value: i64) -> Result<Option<u64>> {
        find_from(alloc, self.root, value)
    }

    fn collapse(&mut self, alloc: &mut impl AllocatorMut) {
        loop {
            let node = match open_node(alloc, self.root) {
                Ok(n) => n,
                Err(_) => return,
            };
            if !node.wrapper.is_inner_bptree_node() || node.second.size() != 1 {
                return;
            }
            let only_child = Ref(node.second.get(alloc, 0) as u64);
            if alloc.free(self.root).is_err() {
                return;
            }
            self.root = only_child;
        }
    }
}

/// The maximum value reachable through this subtree: for a leaf, the last
/// (largest) element of `values[]`; for an inner node, the last (largest)
/// element of `max_values_per_child[]`. Both are "the last element of the
/// node's first sibling array", since both are kept sorted ascending.
fn max_value_of(alloc: &impl Allocator, node_ref: Ref) -> Result<i64> {
    let node = open_node(alloc, node_ref)?;
    Ok(node.first.get(alloc, node.first.size() - 1))
}

fn find_from(alloc: &impl Allocator, node_ref: Ref, value: i64) -> Result<Option<u64>> {
    let node = open_node(alloc, node_ref)?;
    if !node.wrapper.is_inner_bptree_node() {
        let values = &node.first;
        let row_keys = &node.second;
        let pos = values.lower_bound(alloc, value);
        if pos < values.size() && values.get(alloc, pos) == value {
            return Ok(Some(row_keys.get(alloc, pos) as u64));
        }
        return Ok(None);
    }
    let maxes = &node.first;
    let children = &node.second;
    let child_idx = maxes.lower_bound(alloc, value).min(children.size() - 1);
    let child_ref = Ref(children.get(alloc, child_idx) as u64);
    find_from(alloc, child_ref, value)
}

fn insert_into(alloc: &mut impl AllocatorMut, node_ref: Ref, row_key: u64, value: i64) -> Result<Propagate> {
    let node = open_node(alloc, node_ref)?;
    if !node.wrapper.is_inner_bptree_node() {
        let mut values = node.first;
        let mut row_keys = node.second;
        let pos = values.upper_bound(alloc, value);
        let values_moved = values.insert(alloc, pos, value)?;
        let row_keys_moved = row_keys.insert(alloc, pos, row_key as i64)?;
        let mut wrapper = node.wrapper;
        if values_moved.is_some() {
            wrapper.set(alloc, 0, values.reference().get() as i64)?;
        }
        if row_keys_moved.is_some() {
            wrapper.set(alloc, 1, row_keys.reference().get() as i64)?;
        }

        if values.size() <= MAX_LIST_SIZE {
            return Ok(Propagate::Updated(wrapper.reference()));
        }

        let split_at = values.size() / 2;
        let right_values: Vec<i64> = (split_at..values.size()).map(|i| values.get(alloc, i)).collect();
        let right_row_keys: Vec<i64> =
            (split_at..row_keys.size()).map(|i| row_keys.get(alloc, i)).collect();
        values.truncate(alloc, split_at)?;
        row_keys.truncate(alloc, split_at)?;
        wrapper.set(alloc, 0, values.reference().get() as i64)?;
        wrapper.set(alloc, 1, row_keys.reference().get() as i64)?;

        debug_assert!(!right_values.is_empty(), "leaf split produced an empty right sibling");
        let right_max = right_values[right_values.len() - 1];
        let right_values_ref = Array::from_values(alloc, false, &right_values)?.reference();
        let right_row_keys_ref = Array::from_values(alloc, false, &right_row_keys)?.reference();
        let right_wrapper = make_wrapper(alloc, right_values_ref, right_row_keys_ref, false)?;

        return Ok(Propagate::Split { left: wrapper.reference(), right: right_wrapper, right_max });
    }

    let maxes = node.first;
    let children = node.second;
    let child_idx = maxes.lower_bound(alloc, value).min(children.size() - 1);
    let child_ref = Ref(children.get(alloc, child_idx) as u64);
    let child_outcome = insert_into(alloc, child_ref, row_key, value)?;

    let mut maxes = maxes;
    let mut children = children;
    let mut wrapper = node.wrapper;

    match child_outcome {
        Propagate::Updated(new_child_ref) => {
            if new_child_ref != child_ref {
                let cr_moved = children.set(alloc, child_idx, new_child_ref.get() as i64)?;
                if cr_moved.is_some() {
                    wrapper.set(alloc, 1, children.reference().get() as i64)?;
                }
            }
            let new_max = max_value_of(alloc, new_child_ref)?;
            if new_max != maxes.get(alloc, child_idx) {
                let mx_moved = maxes.set(alloc, child_idx, new_max)?;
                if mx_moved.is_some() {
                    wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
                }
            }
            Ok(Propagate::Updated(wrapper.reference()))
        }
        Propagate::Split { left, right, right_max } => {
            let left_max = max_value_of(alloc, left)?;
            let cr_moved = children.set(alloc, child_idx, left.get() as i64)?;
            if cr_moved.is_some() {
                wrapper.set(alloc, 1, children.reference().get() as i64)?;
            }
            let mx_moved = maxes.set(alloc, child_idx, left_max)?;
            if mx_moved.is_some() {
                wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
            }
            let cr_moved = children.insert(alloc, child_idx + 1, right.get() as i64)?;
            if cr_moved.is_some() {
                wrapper.set(alloc, 1, children.reference().get() as i64)?;
            }
            let mx_moved = maxes.insert(alloc, child_idx + 1, right_max)?;
            if mx_moved.is_some() {
                wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
            }

            if children.size() <= MAX_LIST_SIZE {
                return Ok(Propagate::Updated(wrapper.reference()));
            }

            let split_at = children.size() / 2;
            let right_maxes: Vec<i64> = (split_at..maxes.size()).map(|i| maxes.get(alloc, i)).collect();
            let right_children: Vec<i64> =
                (split_at..children.size()).map(|i| children.get(alloc, i)).collect();
            maxes.truncate(alloc, split_at)?;
            children.truncate(alloc, split_at)?;
            wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
            wrapper.set(alloc, 1, children.reference().get() as i64)?;

            debug_assert!(!right_maxes.is_empty(), "inner-node split produced an empty right sibling");
            let node_right_max = right_maxes[right_maxes.len() - 1];
            let right_maxes_ref = Array::from_values(alloc, false, &right_maxes)?.reference();
            let right_children_ref = Array::from_values(alloc, true, &right_children)?.reference();
            let right_wrapper = make_wrapper(alloc, right_maxes_ref, right_children_ref, true)?;

            Ok(Propagate::Split { left: wrapper.reference(), right: right_wrapper, right_max: node_right_max })
        }
    }
}

fn erase_from(alloc: &mut impl AllocatorMut, node_ref: Ref, row_key: u64, old_value: i64) -> Result<EraseOutcome> {
    let node = open_node(alloc, node_ref)?;
    if !node.wrapper.is_inner_bptree_node() {
        let mut values = node.first;
        let mut row_keys = node.second;
        let mut pos = values.lower_bound(alloc, old_value);
        while pos < values.size() && values.get(alloc, pos) == old_value && row_keys.get(alloc, pos) as u64 != row_key
        {
            pos += 1;
        }
        if pos >= values.size() || values.get(alloc, pos) != old_value {
            return Err(crate::error::Error::corruption(
                "secondary index erase: (row_key, value) pair not found",
            ));
        }
        values.erase(alloc, pos)?;
        row_keys.erase(alloc, pos)?;
        if values.size() == 0 {
            alloc.free(node.wrapper.reference())?;
            return Ok(EraseOutcome::Removed);
        }
        let mut wrapper = node.wrapper;
        wrapper.set(alloc, 0, values.reference().get() as i64)?;
        wrapper.set(alloc, 1, row_keys.reference().get() as i64)?;
        return Ok(EraseOutcome::Updated(wrapper.reference()));
    }

    let mut maxes = node.first;
    let mut children = node.second;
    let mut wrapper = node.wrapper;
    let child_idx = maxes.lower_bound(alloc, old_value).min(children.size() - 1);
    let child_ref = Ref(children.get(alloc, child_idx) as u64);
    let outcome = erase_from(alloc, child_ref, row_key, old_value)?;

    match outcome {
        EraseOutcome::Updated(new_child_ref) => {
            children.set(alloc, child_idx, new_child_ref.get() as i64)?;
            let new_max = max_value_of(alloc, new_child_ref)?;
            maxes.set(alloc, child_idx, new_max)?;
            wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
            wrapper.set(alloc, 1, children.reference().get() as i64)?;
            Ok(EraseOutcome::Updated(wrapper.reference()))
        }
        EraseOutcome::Removed => {
            maxes.erase(alloc, child_idx)?;
            children.erase(alloc, child_idx)?;
            if children.size() == 0 {
                alloc.free(wrapper.reference())?;
                return Ok(EraseOutcome::Removed);
            }
            wrapper.set(alloc, 0, maxes.reference().get() as i64)?;
            wrapper.set(alloc, 1, children.reference().get() as i64)?;
            Ok(EraseOutcome::Updated(wrapper.reference()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::MemoryAllocator;

    #[test]
    fn single_leaf_lookup() {
        let mut alloc = MemoryAllocator::new();
        let mut idx = IndexTree::create_empty(&mut alloc).unwrap();
        idx.insert(&mut alloc, 0, 30).unwrap();
        idx.insert(&mut alloc, 1, 10).unwrap();
        idx.insert(&mut alloc, 2, 20).unwrap();
        idx.insert(&mut alloc, 3, 10).unwrap();

        let found = idx.find(&alloc, 10).unwrap();
        assert!(matches!(found, Some(1) | Some(3)));
        assert_eq!(idx.find(&alloc, 20).unwrap(), Some(2));
        assert_eq!(idx.find(&alloc, 99).unwrap(), None);
    }

    #[test]
    fn build_from_column_matches_scenario_five() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 4).unwrap();
        for v in [30i64, 10, 20, 10] {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        let idx = IndexTree::build(&mut alloc, &col).unwrap();
        let row = idx.find(&alloc, 10).unwrap().unwrap();
        assert_eq!(col.get(&alloc, row as usize).unwrap(), 10);
    }

    #[test]
    fn leaf_split_keeps_values_sorted_and_searchable() {
        let mut alloc = MemoryAllocator::new();
        let mut idx = IndexTree::create_empty(&mut alloc).unwrap();
        for v in 0..(MAX_LIST_SIZE as i64 + 50) {
            idx.insert(&mut alloc, v as u64, v).unwrap();
        }
        for v in [0i64, 1, (MAX_LIST_SIZE as i64) - 1, MAX_LIST_SIZE as i64, MAX_LIST_SIZE as i64 + 49] {
            assert_eq!(idx.find(&alloc, v).unwrap(), Some(v as u64));
        }
    }

    #[test]
    fn erase_then_miss() {
        let mut alloc = MemoryAllocator::new();
        let mut idx = IndexTree::create_empty(&mut alloc).unwrap();
        idx.insert(&mut alloc, 0, 5).unwrap();
        idx.insert(&mut alloc, 1, 7).unwrap();
        idx.erase(&mut alloc, 0, 5).unwrap();
        assert_eq!(idx.find(&alloc, 5).unwrap(), None);
        assert_eq!(idx.find(&alloc, 7).unwrap(), Some(1));
    }
}
