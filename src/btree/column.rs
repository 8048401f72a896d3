/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The B+-tree column (§3.4, §4.4): a sequence of signed integers that
//! outgrows a single [`Array`] leaf by fanning out into an inner-node tree.
//!
//! A [`Column`] is, like [`Array`], a thin handle — just a root [`Ref`] and
//! the table's fixed `fanout` — with every read or write taking the
//! allocator as an explicit parameter. Structural changes (splits, leaf
//! destruction, height reduction) are driven bottom-up: each recursive step
//! returns an [`InsertOutcome`]/[`EraseOutcome`] describing what happened to
//! its subtree, and the caller one level up folds that into its own node
//! without ever storing a pointer back to its parent.
//!
//! Splitting is append-biased, matching the tail-append fast path real
//! columns spend most of their time in: a leaf (or inner node) only splits
//! when the insert that overflowed it was itself an append at the whole
//! column's tail. An insert into the middle of an already-full node simply
//! grows that node past `fanout` in place; the next tail append through the
//! same node is what eventually triggers a split. This matches the worked
//! example in the on-disk format notes (a mid-tree insert growing a leaf
//! from 4 to 5 elements with fanout 4, without splitting) and keeps the
//! common bulk-append path from bouncing into general form and back.

use crate::alloc::{Allocator, AllocatorMut, Ref};
use crate::array::Array;
use crate::error::Result;

use super::inner::{build_inner_node, decode_inner, locate};

/// What a recursive insert did to the subtree it was called on.
enum InsertOutcome {
    /// The subtree root's ref may have changed (COW, growth, rebuild); the
    /// caller should replace its child pointer with this one.
    Updated(Ref),
    /// The subtree overflowed and split in two. The caller must insert
    /// `right` as a new sibling immediately after `left`.
    Split { left: Ref, right: Ref, left_size: usize, right_size: usize },
}

/// What a recursive erase did to the subtree it was called on.
enum EraseOutcome {
    Updated(Ref),
    /// The subtree is now empty and has been freed; the caller must drop
    /// this child from its own children list.
    Removed,
}

/// One leaf visited by [`Column::visit_leaves`].
#[derive(Debug, Clone, Copy)]
pub struct LeafVisit {
    /// The leaf array's ref.
    pub leaf_ref: Ref,
    /// The logical offset of the leaf's first element within the column.
    pub offset: usize,
    /// The number of elements held by this leaf.
    pub size: usize,
}

/// A column of signed integers, stored as a root [`Array`] leaf or a tree of
/// inner nodes over leaf arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    root: Ref,
    fanout: usize,
}

impl Column {
    /// Creates a new, empty column (a single empty leaf).
    pub fn create_empty(alloc: &mut impl AllocatorMut, fanout: usize) -> Result<Self> {
        debug_assert!(fanout >= 2);
        let root = Array::create_empty(alloc, false, false)?.reference();
        Ok(Self { root, fanout })
    }

    /// Wraps an existing root ref (e.g. reopening a table's column after a
    /// commit). Does not validate the tree; corruption surfaces lazily on
    /// first access as [`crate::error::Error::Corruption`].
    pub fn open(root: Ref, fanout: usize) -> Self {
        debug_assert!(fanout >= 2);
        Self { root, fanout }
    }

    /// The current root ref, for persisting in a table/group descriptor.
    #[inline(always)]
    pub fn root(&self) -> Ref {
        self.root
    }

    /// The configured fanout.
    #[inline(always)]
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Total number of logical elements.
    pub fn size(&self, alloc: &impl Allocator) -> Result<usize> {
        let arr = Array::open(alloc, self.root)?;
        if !arr.is_inner_bptree_node() {
            return Ok(arr.size());
        }
        let n = arr.size();
        let total = crate::tagged::from_tagged(arr.get(alloc, n - 1) as u64) as usize;
        Ok(total)
    }

    /// Reads the value at logical index `i`.
    pub fn get(&self, alloc: &impl Allocator, i: usize) -> Result<i64> {
        get_from(alloc, self.root, i)
    }

    /// Overwrites the value at logical index `i`.
    pub fn set(&mut self, alloc: &mut impl AllocatorMut, i: usize, v: i64) -> Result<()> {
        self.root = set_into(alloc, self.fanout, self.root, i, v)?;
        Ok(())
    }

    /// Inserts `v` before logical index `i` (`i == size()` appends).
    pub fn insert(&mut self, alloc: &mut impl AllocatorMut, i: usize, v: i64) -> Result<()> {
        let total = self.size(alloc)?;
        debug_assert!(i <= total);
        let is_tail = i == total;
        let outcome = insert_into(alloc, self.fanout, self.root, i, v, is_tail)?;
        self.root = match outcome {
            InsertOutcome::Updated(r) => r,
            InsertOutcome::Split { left, right, left_size, right_size } => {
                build_inner_node(alloc, &[(left, left_size), (right, right_size)], false)?
            }
        };
        Ok(())
    }

    /// Removes the value at logical index `i`.
    pub fn erase(&mut self, alloc: &mut impl AllocatorMut, i: usize) -> Result<()> {
        let total = self.size(alloc)?;
        debug_assert!(i < total);
        let is_tail_pop = i == total - 1;
        let outcome = erase_from(alloc, self.fanout, self.root, i, is_tail_pop)?;
        self.root = match outcome {
            EraseOutcome::Updated(r) => r,
            EraseOutcome::Removed => Array::create_empty(alloc, false, false)?.reference(),
        };
        self.collapse(alloc);
        Ok(())
    }

    /// Visits every leaf at or after `start_offset`, in order, calling
    /// `handler(leaf)` for each. Stops early if `handler` returns `false`.
    pub fn visit_leaves(
        &self,
        alloc: &impl Allocator,
        start_offset: usize,
        handler: &mut dyn FnMut(LeafVisit) -> bool,
    ) -> Result<()> {
        visit_from(alloc, self.root, 0, start_offset, handler)?;
        Ok(())
    }

    /// Height-reduction collapse: while the root is an inner node with a
    /// single child, replace it with that child. Allocation failures here
    /// would only skip an optimization, never corrupt the tree, so they are
    /// swallowed rather than propagated (§4.4, §8).
    fn collapse(&mut self, alloc: &mut impl AllocatorMut) {
        loop {
            let arr = match Array::open(alloc, self.root) {
                Ok(a) => a,
                Err(_) => return,
            };
            if !arr.is_inner_bptree_node() {
                return;
            }
            let inner = match decode_inner(alloc, self.root) {
                Ok(v) => v,
                Err(_) => return,
            };
            if inner.children.len() != 1 {
                return;
            }
            let only_child = inner.children[0];
            if alloc.free(self.root).is_err() {
                return;
            }
            self.root = only_child;
        }
    }
}

fn get_from(alloc: &impl Allocator, node_ref: Ref, i: usize) -> Result<i64> {
    let arr = Array::open(alloc, node_ref)?;
    if !arr.is_inner_bptree_node() {
        return Ok(arr.get(alloc, i));
    }
    let inner = decode_inner(alloc, node_ref)?;
    let (child_idx, local) = locate(&inner, i);
    log::trace!(
        "column descent: node {} -> child {} (local index {})",
        node_ref.get(),
        child_idx,
        local
    );
    get_from(alloc, inner.children[child_idx], local)
}

fn set_into(alloc: &mut impl AllocatorMut, fanout: usize, node_ref: Ref, i: usize, v: i64) -> Result<Ref> {
    let mut arr = Array::open(alloc, node_ref)?;
    if !arr.is_inner_bptree_node() {
        arr.set(alloc, i, v)?;
        return Ok(arr.reference());
    }
    let inner = decode_inner(alloc, node_ref)?;
    let (child_idx, local) = locate(&inner, i);
    let new_child = set_into(alloc, fanout, inner.children[child_idx], local, v)?;
    if new_child == inner.children[child_idx] {
        return Ok(node_ref);
    }
    let mut children: Vec<(Ref, usize)> =
        inner.children.iter().zip(&inner.sizes).map(|(&r, &s)| (r, s)).collect();
    children[child_idx].0 = new_child;
    let new_ref = build_inner_node(alloc, &children, inner.general)?;
    alloc.free(node_ref)?;
    Ok(new_ref)
}

fn insert_into(
    alloc: &mut impl AllocatorMut,
    fanout: usize,
    node_ref: Ref,
    i: usize,
    v: i64,
    is_tail_append: bool,
) -> Result<InsertOutcome> {
    let mut arr = Array::open(alloc, node_ref)?;
    if !arr.is_inner_bptree_node() {
        arr.insert(alloc, i, v)?;
        let size = arr.size();
        if is_tail_append && size > fanout {
            let split_at = fanout;
            let right_values: Vec<i64> = (split_at..size).map(|k| arr.get(alloc, k)).collect();
            arr.truncate(alloc, split_at)?;
            let right_size = right_values.len();
            let right_ref = Array::from_values(alloc, false, &right_values)?.reference();
            return Ok(InsertOutcome::Split {
                left: arr.reference(),
                right: right_ref,
                left_size: split_at,
                right_size,
            });
        }
        return Ok(InsertOutcome::Updated(arr.reference()));
    }

    let inner = decode_inner(alloc, node_ref)?;
    let (child_idx, local) = locate(&inner, i);
    let last = inner.children.len() - 1;
    let child_is_tail = is_tail_append && child_idx == last;
    let child_outcome = insert_into(alloc, fanout, inner.children[child_idx], local, v, child_is_tail)?;
    let force_general = inner.general || !is_tail_append;
    if force_general && !inner.general {
        log::warn!(
            "column node {}: falling back to general form, an append-only fast path was expected \
             but insert index {} is not the tail",
            node_ref.get(),
            i
        );
    }

    match child_outcome {
        InsertOutcome::Updated(new_child_ref) => {
            let mut children: Vec<(Ref, usize)> =
                inner.children.iter().zip(&inner.sizes).map(|(&r, &s)| (r, s)).collect();
            children[child_idx] = (new_child_ref, inner.sizes[child_idx] + 1);
            let new_ref = build_inner_node(alloc, &children, force_general)?;
            alloc.free(node_ref)?;
            Ok(InsertOutcome::Updated(new_ref))
        }
        InsertOutcome::Split { left, right, left_size, right_size } => {
            let mut children: Vec<(Ref, usize)> =
                inner.children.iter().zip(&inner.sizes).map(|(&r, &s)| (r, s)).collect();
            children[child_idx] = (left, left_size);
            children.insert(child_idx + 1, (right, right_size));

            if children.len() <= fanout + 1 {
                let new_ref = build_inner_node(alloc, &children, force_general)?;
                alloc.free(node_ref)?;
                Ok(InsertOutcome::Updated(new_ref))
            } else if is_tail_append {
                let left_group = &children[..fanout];
                let right_group = &children[fanout..];
                let left_ref = build_inner_node(alloc, left_group, force_general)?;
                let right_ref = build_inner_node(alloc, right_group, force_general)?;
                alloc.free(node_ref)?;
                let left_total: usize = left_group.iter().map(|(_, s)| s).sum();
                let right_total: usize = right_group.iter().map(|(_, s)| s).sum();
                Ok(InsertOutcome::Split {
                    left: left_ref,
                    right: right_ref,
                    left_size: left_total,
                    right_size: right_total,
                })
            } else {
                let new_ref = build_inner_node(alloc, &children, true)?;
                alloc.free(node_ref)?;
                Ok(InsertOutcome::Updated(new_ref))
            }
        }
    }
}

fn erase_from(
    alloc: &mut impl AllocatorMut,
    fanout: usize,
    node_ref: Ref,
    i: usize,
    is_tail_pop: bool,
) -> Result<EraseOutcome> {
    let mut arr = Array::open(alloc, node_ref)?;
    if !arr.is_inner_bptree_node() {
        arr.erase(alloc, i)?;
        if arr.size() == 0 {
            alloc.free(arr.reference())?;
            return Ok(EraseOutcome::Removed);
        }
        return Ok(EraseOutcome::Updated(arr.reference()));
    }

    let inner = decode_inner(alloc, node_ref)?;
    let (child_idx, local) = locate(&inner, i);
    let last = inner.children.len() - 1;
    let child_is_tail_pop =
        is_tail_pop && child_idx == last && local == inner.sizes[child_idx].saturating_sub(1);
    let child_outcome = erase_from(alloc, fanout, inner.children[child_idx], local, child_is_tail_pop)?;
    let force_general = inner.general || !is_tail_pop;

    match child_outcome {
        EraseOutcome::Updated(new_child_ref) => {
            let mut children: Vec<(Ref, usize)> =
                inner.children.iter().zip(&inner.sizes).map(|(&r, &s)| (r, s)).collect();
            children[child_idx] = (new_child_ref, inner.sizes[child_idx] - 1);
            let new_ref = build_inner_node(alloc, &children, force_general)?;
            alloc.free(node_ref)?;
            Ok(EraseOutcome::Updated(new_ref))
        }
        EraseOutcome::Removed => {
            let mut children: Vec<(Ref, usize)> =
                inner.children.iter().zip(&inner.sizes).map(|(&r, &s)| (r, s)).collect();
            children.remove(child_idx);
            alloc.free(node_ref)?;
            if children.is_empty() {
                return Ok(EraseOutcome::Removed);
            }
            let new_ref = build_inner_node(alloc, &children, force_general)?;
            Ok(EraseOutcome::Updated(new_ref))
        }
    }
}

fn visit_from(
    alloc: &impl Allocator,
    node_ref: Ref,
    base_offset: usize,
    start_offset: usize,
    handler: &mut dyn FnMut(LeafVisit) -> bool,
) -> Result<bool> {
    let arr = Array::open(alloc, node_ref)?;
    if !arr.is_inner_bptree_node() {
        if base_offset + arr.size() <= start_offset {
            return Ok(true);
        }
        let cont = handler(LeafVisit { leaf_ref: node_ref, offset: base_offset, size: arr.size() });
        return Ok(cont);
    }
    let inner = decode_inner(alloc, node_ref)?;
    let mut offset = base_offset;
    for (idx, &child) in inner.children.iter().enumerate() {
        let sz = inner.sizes[idx];
        if offset + sz > start_offset && !visit_from(alloc, child, offset, start_offset, handler)? {
            return Ok(false);
        }
        offset += sz;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::MemoryAllocator;

    #[test]
    fn single_leaf_before_overflow() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 4).unwrap();
        for v in [1i64, 2, 3, 4] {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        assert_eq!(col.size(&alloc).unwrap(), 4);
        let arr = Array::open(&alloc, col.root()).unwrap();
        assert!(!arr.is_inner_bptree_node());
    }

    #[test]
    fn tail_append_overflow_splits_compact() {
        // Scenario: fanout=4, append 1..=9 at the tail.
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 4).unwrap();
        for v in 1i64..=4 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        {
            let arr = Array::open(&alloc, col.root()).unwrap();
            assert!(!arr.is_inner_bptree_node());
            assert_eq!(arr.size(), 4);
        }

        // 5th insert splits into leaves of size 4 and 1.
        col.insert(&mut alloc, 4, 5).unwrap();
        assert_eq!(col.size(&alloc).unwrap(), 5);
        {
            let root = Array::open(&alloc, col.root()).unwrap();
            assert!(root.is_inner_bptree_node());
            let inner = decode_inner(&alloc, col.root()).unwrap();
            assert_eq!(inner.sizes, vec![4, 1]);
            assert!(!inner.general);
        }

        for v in 6i64..=9 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        assert_eq!(col.size(&alloc).unwrap(), 9);
        let inner = decode_inner(&alloc, col.root()).unwrap();
        assert_eq!(inner.sizes, vec![4, 4, 1]);
        assert!(!inner.general);
        assert_eq!(col.get(&alloc, 8).unwrap(), 9);
        for (i, expected) in (1i64..=9).enumerate() {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn middle_insert_converts_general_without_splitting() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 4).unwrap();
        for v in 1i64..=9 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }

        col.insert(&mut alloc, 2, 99).unwrap();
        assert_eq!(col.size(&alloc).unwrap(), 10);

        let inner = decode_inner(&alloc, col.root()).unwrap();
        assert!(inner.general);
        assert_eq!(inner.sizes, vec![5, 4, 1]);
        assert_eq!(col.get(&alloc, 2).unwrap(), 99);
        assert_eq!(col.get(&alloc, 3).unwrap(), 3);
    }

    #[test]
    fn erase_collapses_height_after_emptying_siblings() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 2).unwrap();
        for v in 1i64..=5 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        assert!(col.size(&alloc).unwrap() == 5);

        while col.size(&alloc).unwrap() > 1 {
            col.erase(&mut alloc, 0).unwrap();
        }
        assert_eq!(col.size(&alloc).unwrap(), 1);
        assert_eq!(col.get(&alloc, 0).unwrap(), 5);
        let arr = Array::open(&alloc, col.root()).unwrap();
        assert!(!arr.is_inner_bptree_node(), "single remaining element must live in a bare leaf");
    }

    #[test]
    fn set_on_committed_tree_cows_up_the_path() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 2).unwrap();
        for v in 1i64..=6 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        alloc.commit(Ref::NULL).unwrap();
        col.set(&mut alloc, 3, 42).unwrap();
        assert_eq!(col.get(&alloc, 3).unwrap(), 42);
        for (i, expected) in [1i64, 2, 3, 42, 5, 6].into_iter().enumerate() {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn visit_leaves_covers_whole_range_in_order() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 3).unwrap();
        for v in 1i64..=10 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        let mut seen = Vec::new();
        col.visit_leaves(&alloc, 0, &mut |leaf| {
            seen.push((leaf.offset, leaf.size));
            true
        })
        .unwrap();
        let total: usize = seen.iter().map(|(_, s)| s).sum();
        assert_eq!(total, 10);
        let mut offset = 0;
        for (off, size) in &seen {
            assert_eq!(*off, offset);
            offset += size;
        }
    }

    #[test]
    fn visit_leaves_skips_before_start_offset() {
        let mut alloc = MemoryAllocator::new();
        let mut col = Column::create_empty(&mut alloc, 3).unwrap();
        for v in 1i64..=10 {
            let n = col.size(&alloc).unwrap();
            col.insert(&mut alloc, n, v).unwrap();
        }
        let mut seen = Vec::new();
        col.visit_leaves(&alloc, 7, &mut |leaf| {
            seen.push(leaf.offset);
            true
        })
        .unwrap();
        assert!(seen.iter().all(|&off| off + 3 > 7 || off >= 7));
    }
}
