/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The tree writer (§4.6): streaming, append-only construction of a B+-tree
//! column from a sequence of values, without ever holding more than one
//! partial leaf per tree level in memory.
//!
//! This is the bulk-load / network-handoff path: building a
//! [`crate::btree::Column`] one [`crate::btree::Column::insert`] at a time
//! works but pays an O(log N) COW-and-possibly-split cost per element, most
//! of it against paths that are about to be overwritten again on the very
//! next insert. [`TreeWriter`] instead keeps a stack of "parent level"
//! buffers: leaves are emitted as they fill, each new leaf ref is appended
//! to the bottom buffer, and whenever a buffer reaches the fanout it is
//! itself written out and its ref bubbles up to the next level. Finishing
//! force-flushes every partially-filled level, bottom-up, until a single
//! ref remains — that ref is the root, directly usable as
//! [`crate::btree::Column::open`]'s argument.
//!
//! Every node this produces satisfies the same invariants as one built
//! through [`crate::btree::Column::insert`] (uniform leaf depth, compact
//! form when every full level had exactly `fanout` children).

use crate::alloc::{AllocatorMut, Ref};
use crate::array::Array;
use crate::btree::{build_inner_node, Column};
use crate::error::Result;

/// Accumulates values into leaves and leaves into inner nodes, bottom-up.
pub struct TreeWriter {
    fanout: usize,
    pending_values: Vec<i64>,
    /// `levels[0]` buffers not-yet-flushed leaf refs; `levels[k]` for `k>0`
    /// buffers not-yet-flushed level-`k` inner node refs.
    levels: Vec<Vec<(Ref, usize)>>,
    total: usize,
}

impl TreeWriter {
    /// Starts a new writer targeting the given fanout.
    pub fn new(fanout: usize) -> Self {
        debug_assert!(fanout >= 2);
        Self { fanout, pending_values: Vec::new(), levels: Vec::new(), total: 0 }
    }

    /// Appends one more value to the column being built.
    pub fn push(&mut self, alloc: &mut impl AllocatorMut, v: i64) -> Result<()> {
        self.pending_values.push(v);
        self.total += 1;
        if self.pending_values.len() == self.fanout {
            self.flush_leaf(alloc)?;
        }
        Ok(())
    }

    fn flush_leaf(&mut self, alloc: &mut impl AllocatorMut) -> Result<()> {
        if self.pending_values.is_empty() {
            return Ok(());
        }
        let values = std::mem::take(&mut self.pending_values);
        let size = values.len();
        let leaf_ref = Array::from_values(alloc, false, &values)?.reference();
        self.bubble(alloc, leaf_ref, size, 0)
    }

    fn bubble(&mut self, alloc: &mut impl AllocatorMut, child_ref: Ref, child_size: usize, level: usize) -> Result<()> {
        if self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
        self.levels[level].push((child_ref, child_size));
        if self.levels[level].len() == self.fanout {
            self.flush_level(alloc, level)?;
        }
        Ok(())
    }

    /// Wraps the entire current contents of `levels[level]` into one inner
    /// node (even if fewer than `fanout` entries are buffered — this is
    /// also how [`Self::finish`] force-drains a partially filled level) and
    /// bubbles the result to `level + 1`. Every inner node this builds, full
    /// or not, sits exactly one level above its children, so leaf depth
    /// stays uniform regardless of how a level was filled.
    fn flush_level(&mut self, alloc: &mut impl AllocatorMut, level: usize) -> Result<()> {
        let entries = std::mem::take(&mut self.levels[level]);
        if entries.is_empty() {
            return Ok(());
        }
        let total: usize = entries.iter().map(|(_, s)| s).sum();
        let node_ref = build_inner_node(alloc, &entries, false)?;
        self.bubble(alloc, node_ref, total, level + 1)
    }

    /// Finishes the tree, returning the root ref. A writer that never
    /// pushed anything produces an empty leaf.
    pub fn finish(mut self, alloc: &mut impl AllocatorMut) -> Result<Ref> {
        if self.total == 0 {
            return Ok(Array::create_empty(alloc, false, false)?.reference());
        }
        self.flush_leaf(alloc)?;
        if self.levels.len() == 1 && self.levels[0].len() == 1 {
            return Ok(self.levels[0][0].0);
        }

        let mut level = 0;
        loop {
            if !self.levels[level].is_empty() {
                self.flush_level(alloc, level)?;
            }
            if level + 2 == self.levels.len() && self.levels[level + 1].len() == 1 {
                return Ok(self.levels[level + 1][0].0);
            }
            level += 1;
        }
    }

    /// Finishes the tree and wraps the result as a [`Column`].
    pub fn finish_column(self, alloc: &mut impl AllocatorMut) -> Result<Column> {
        let fanout = self.fanout;
        let root = self.finish(alloc)?;
        Ok(Column::open(root, fanout))
    }
}

/// Streams `values` into a freshly built column using [`TreeWriter`].
pub fn write_column(
    alloc: &mut impl AllocatorMut,
    fanout: usize,
    values: impl IntoIterator<Item = i64>,
) -> Result<Column> {
    let mut writer = TreeWriter::new(fanout);
    for v in values {
        writer.push(alloc, v)?;
    }
    writer.finish_column(alloc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::MemoryAllocator;

    #[test]
    fn single_leaf_stays_a_bare_leaf() {
        let mut alloc = MemoryAllocator::new();
        let col = write_column(&mut alloc, 4, [1i64, 2, 3]).unwrap();
        let arr = Array::open(&alloc, col.root()).unwrap();
        assert!(!arr.is_inner_bptree_node());
        assert_eq!(col.size(&alloc).unwrap(), 3);
        for (i, expected) in [1i64, 2, 3].into_iter().enumerate() {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn full_leaf_exactly_at_fanout_stays_bare() {
        let mut alloc = MemoryAllocator::new();
        let col = write_column(&mut alloc, 4, [1i64, 2, 3, 4]).unwrap();
        let arr = Array::open(&alloc, col.root()).unwrap();
        assert!(!arr.is_inner_bptree_node());
        assert_eq!(col.size(&alloc).unwrap(), 4);
    }

    #[test]
    fn two_full_leaves_produce_one_compact_inner_node() {
        let mut alloc = MemoryAllocator::new();
        let col = write_column(&mut alloc, 4, 1i64..=8).unwrap();
        let arr = Array::open(&alloc, col.root()).unwrap();
        assert!(arr.is_inner_bptree_node());
        assert_eq!(col.size(&alloc).unwrap(), 8);
        for (i, expected) in (1i64..=8).enumerate() {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn uneven_tail_still_reads_back_correctly() {
        let mut alloc = MemoryAllocator::new();
        let values: Vec<i64> = (1..=37).collect();
        let col = write_column(&mut alloc, 4, values.clone()).unwrap();
        assert_eq!(col.size(&alloc).unwrap(), values.len());
        for (i, &expected) in values.iter().enumerate() {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn multi_level_tree_still_reads_back_correctly() {
        let mut alloc = MemoryAllocator::new();
        let values: Vec<i64> = (0..500).collect();
        let col = write_column(&mut alloc, 4, values.clone()).unwrap();
        assert_eq!(col.size(&alloc).unwrap(), values.len());
        for (i, &expected) in values.iter().enumerate().step_by(37) {
            assert_eq!(col.get(&alloc, i).unwrap(), expected);
        }
    }

    #[test]
    fn empty_writer_produces_empty_column() {
        let mut alloc = MemoryAllocator::new();
        let col = write_column(&mut alloc, 4, std::iter::empty()).unwrap();
        assert_eq!(col.size(&alloc).unwrap(), 0);
    }
}
