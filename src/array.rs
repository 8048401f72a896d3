/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The primitive array: a resizable, bit-packed sequence of signed integers
//! (§3.3, §4.3) and the leaf building block of every [`crate::btree`] column
//! and [`crate::index`] tree.
//!
//! An [`Array`] is a thin, `Copy`-able handle — a [`Ref`] plus a cached
//! [`NodeHeader`] — borrowed against whichever [`Allocator`] the caller
//! passes at each call. It owns no bytes itself; all reads and writes go
//! through the allocator, which is what makes copy-on-write possible: a
//! mutation that discovers its ref is read-only reallocates a fresh node,
//! copies in the old bytes, and repoints `self`, handing the *old* ref back
//! to the caller so a parent structure (a [`crate::btree::Column`] inner
//! node, a [`crate::group::Group`] table root) can update its own pointer.
//! No accessor stores a pointer back to its parent (see the design notes on
//! avoiding pointer graphs between accessors): propagation is always
//! top-down, driven by the `Option<Ref>` a mutating method returns.

use crate::alloc::{Allocator, AllocatorMut, Ref};
use crate::bits::{get_chunk8, get_direct_dyn, set_direct_dyn};
use crate::error::{Error, Result};
use crate::header::{
    align_up_8, width_for_value, width_index_for, NodeFlags, NodeHeader, WidthScheme, HEADER_SIZE,
    MAX_SIZE,
};

/// Comparison operators supported by [`Array::find_first`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
}

impl CompareOp {
    #[inline(always)]
    fn matches(self, elem: i64, v: i64) -> bool {
        match self {
            CompareOp::Eq => elem == v,
            CompareOp::Ne => elem != v,
            CompareOp::Lt => elem < v,
            CompareOp::Gt => elem > v,
        }
    }
}

/// A handle to a primitive array node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Array {
    r: Ref,
    header: NodeHeader,
}

/// What values to write during a width-expanding rebuild.
enum RebuildEdit {
    /// Replace the element at `usize` with `i64`; size unchanged.
    Replace(usize, i64),
    /// Insert `i64` before logical index `usize`; size grows by one.
    Insert(usize, i64),
}

impl Array {
    /// Creates a new, empty array node (`size = 0`, `width = 0`).
    pub fn create_empty(alloc: &mut impl AllocatorMut, has_refs: bool, context_flag: bool) -> Result<Self> {
        let mut flags = NodeFlags::empty();
        if has_refs {
            flags |= NodeFlags::HAS_REFS;
        }
        if context_flag {
            flags |= NodeFlags::CONTEXT_FLAG;
        }
        let header = NodeHeader {
            size: 0,
            width_scheme: WidthScheme::Bits,
            width_index: 0,
            flags,
            capacity: HEADER_SIZE as u32,
        };
        let r = alloc.alloc(HEADER_SIZE)?;
        header.write_into(alloc.translate_mut(r));
        Ok(Self { r, header })
    }

    /// Creates a new array pre-populated with `values`, choosing the
    /// smallest width that accommodates them all.
    pub fn from_values(
        alloc: &mut impl AllocatorMut,
        has_refs: bool,
        values: &[i64],
    ) -> Result<Self> {
        let mut arr = Self::create_empty(alloc, has_refs, false)?;
        for (i, &v) in values.iter().enumerate() {
            arr.insert(alloc, i, v)?;
        }
        Ok(arr)
    }

    /// Opens an existing array node at `r`, decoding its header.
    pub fn open(alloc: &impl Allocator, r: Ref) -> Result<Self> {
        debug_assert!(!r.is_null());
        let header = NodeHeader::decode(alloc.translate(r))?;
        Ok(Self { r, header })
    }

    /// The node's current ref.
    #[inline(always)]
    pub fn reference(&self) -> Ref {
        self.r
    }

    /// Number of logical elements.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    /// Whether the array holds no elements.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.header.size == 0
    }

    /// The current per-element bit width.
    #[inline(always)]
    pub fn width(&self) -> u8 {
        self.header.width()
    }

    /// Whether elements may be refs/tagged scalars rather than plain values.
    #[inline(always)]
    pub fn has_refs(&self) -> bool {
        self.header.has_refs()
    }

    /// Whether this node is flagged as a B+-tree inner node.
    #[inline(always)]
    pub fn is_inner_bptree_node(&self) -> bool {
        self.header.is_inner_bptree_node()
    }

    /// Sets or clears the `is_inner_bptree_node` flag and persists it.
    pub fn set_is_inner_bptree_node(&mut self, alloc: &mut impl AllocatorMut, value: bool) {
        self.header.flags.set(NodeFlags::IS_INNER_BPTREE_NODE, value);
        self.sync_header(alloc);
    }

    /// The node's decoded header, as currently cached.
    #[inline(always)]
    pub fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn payload<'a>(&self, alloc: &'a impl Allocator) -> &'a [u8] {
        let data = alloc.translate(self.r);
        &data[HEADER_SIZE..HEADER_SIZE + self.header.payload_bytes()]
    }

    fn payload_mut<'a>(&self, alloc: &'a mut impl AllocatorMut) -> &'a mut [u8] {
        let end = HEADER_SIZE + self.header.payload_bytes();
        &mut alloc.translate_mut(self.r)[HEADER_SIZE..end]
    }

    fn sync_header(&self, alloc: &mut impl AllocatorMut) {
        self.header.write_into(alloc.translate_mut(self.r));
    }

    /// Copy-on-write: if `self.r` lies in a read-only (already committed)
    /// region, allocates a fresh node, copies this node's bytes into it,
    /// and repoints `self.r`. Leaves the old node untouched and unfreed —
    /// it may still be reachable from the snapshot that made it read-only.
    fn ensure_writable(&mut self, alloc: &mut impl AllocatorMut) -> Result<()> {
        if !alloc.is_read_only(self.r) {
            return Ok(());
        }
        let total = self.header.total_bytes();
        let bytes: Vec<u8> = alloc.translate(self.r)[..total].to_vec();
        let new_ref = alloc.alloc(total)?;
        alloc.translate_mut(new_ref)[..total].copy_from_slice(&bytes);
        // The copied header bytes still carry the old node's `capacity`,
        // which may exceed what was just actually allocated for the copy
        // (the source could have held amortized growth slack). Re-stamp it
        // so a later grow-in-place check never assumes room that isn't
        // really there in the new allocation.
        self.header.capacity = total as u32;
        self.header.write_into(alloc.translate_mut(new_ref));
        self.r = new_ref;
        Ok(())
    }

    /// Rebuilds the node at a wider bit width, applying `edit` (if any)
    /// against the logical value sequence before re-encoding. This is the
    /// single path for both the plain "a stored value no longer fits"
    /// expansion of [`Self::set`] and the "the inserted value doesn't fit"
    /// expansion of [`Self::insert`].
    fn rebuild_with_width(
        &mut self,
        alloc: &mut impl AllocatorMut,
        new_width: u8,
        edit: Option<RebuildEdit>,
    ) -> Result<()> {
        let old_size = self.size();
        let (new_size, values): (usize, Vec<i64>) = match edit {
            None => (old_size, (0..old_size).map(|j| self.get(alloc, j)).collect()),
            Some(RebuildEdit::Replace(pos, v)) => {
                let mut vals: Vec<i64> = (0..old_size).map(|j| self.get(alloc, j)).collect();
                vals[pos] = v;
                (old_size, vals)
            }
            Some(RebuildEdit::Insert(pos, v)) => {
                if old_size as u32 >= MAX_SIZE {
                    return Err(Error::capacity_exceeded(old_size + 1, MAX_SIZE as usize));
                }
                let mut vals = Vec::with_capacity(old_size + 1);
                for j in 0..old_size {
                    if j == pos {
                        vals.push(v);
                    }
                    vals.push(self.get(alloc, j));
                }
                if pos == old_size {
                    vals.push(v);
                }
                (old_size + 1, vals)
            }
        };

        let width_index = width_index_for(new_width)?;
        let mut new_header = self.header;
        new_header.width_index = width_index;
        new_header.size = new_size as u32;
        let total = new_header.total_bytes();
        new_header.capacity = total as u32;

        let new_ref = alloc.alloc(total)?;
        new_header.write_into(alloc.translate_mut(new_ref));
        {
            let payload_len = new_header.payload_bytes();
            let buf = &mut alloc.translate_mut(new_ref)[HEADER_SIZE..HEADER_SIZE + payload_len];
            for (idx, v) in values.iter().enumerate() {
                set_direct_dyn(buf, new_width, idx, *v);
            }
        }

        let old_ref = self.r;
        log::debug!(
            "array: width expansion {} -> {} bits (ref {} -> {}, size {})",
            self.width(),
            new_width,
            old_ref.get(),
            new_ref.get(),
            new_size
        );
        alloc.free(old_ref)?;
        self.r = new_ref;
        self.header = new_header;
        Ok(())
    }

    /// Reads the signed value at logical index `i`. `i` must be `< size()`.
    #[inline]
    pub fn get(&self, alloc: &impl Allocator, i: usize) -> i64 {
        debug_assert!(i < self.size());
        get_direct_dyn(self.payload(alloc), self.width(), i)
    }

    /// Fills `out` with up to 8 consecutive values starting at `i`;
    /// positions at or beyond `size()` are left as 0.
    pub fn get_chunk(&self, alloc: &impl Allocator, i: usize, out: &mut [i64; 8]) {
        out.fill(0);
        get_chunk8(self.payload(alloc), self.width(), i, self.size(), out);
    }

    /// Overwrites the element at `i`. Returns the node's ref *before* this
    /// call if the node moved (copy-on-write or width expansion); the
    /// caller must then update whatever parent pointer referenced the old
    /// ref to [`Self::reference`] instead.
    pub fn set(&mut self, alloc: &mut impl AllocatorMut, i: usize, v: i64) -> Result<Option<Ref>> {
        debug_assert!(i < self.size());
        let original = self.r;
        let needed = width_for_value(v);
        if needed > self.width() {
            self.rebuild_with_width(alloc, needed, Some(RebuildEdit::Replace(i, v)))?;
        } else {
            self.ensure_writable(alloc)?;
            set_direct_dyn(self.payload_mut(alloc), self.width(), i, v);
        }
        Ok(moved(original, self.r))
    }

    /// Inserts `v` before logical index `i` (`i == size()` appends). See
    /// [`Self::set`] for the meaning of the returned ref.
    pub fn insert(&mut self, alloc: &mut impl AllocatorMut, i: usize, v: i64) -> Result<Option<Ref>> {
        debug_assert!(i <= self.size());
        if self.header.size >= MAX_SIZE {
            return Err(Error::capacity_exceeded(self.size() + 1, MAX_SIZE as usize));
        }
        let original = self.r;
        let needed_width = width_for_value(v).max(self.width());
        if needed_width > self.width() {
            self.rebuild_with_width(alloc, needed_width, Some(RebuildEdit::Insert(i, v)))?;
        } else {
            self.ensure_writable(alloc)?;
            let old_size = self.size();
            let new_size = old_size + 1;
            let required = align_up_8(
                HEADER_SIZE
                    + crate::header::payload_bytes_for(self.header.width_scheme, self.width(), new_size),
            );
            // Amortized growth: request more than strictly required so a run
            // of same-width inserts/appends stays in place, the same way a
            // `Vec` over-allocates on push. `total_bytes()`/`payload_bytes()`
            // are derived purely from `size`/`width`, never from `capacity`,
            // so this slack never leaks into any logical read.
            let target_capacity = if (self.header.capacity as usize) >= required {
                self.header.capacity as usize
            } else {
                grown_capacity_bytes(required)
            };
            let new_ref = alloc.realloc(self.r, target_capacity)?;
            self.r = new_ref;
            self.header.capacity = target_capacity as u32;
            self.header.size = new_size as u32;
            let width = self.width();
            {
                let payload = self.payload_mut(alloc);
                for j in (i..old_size).rev() {
                    let v = get_direct_dyn(payload, width, j);
                    set_direct_dyn(payload, width, j + 1, v);
                }
                set_direct_dyn(payload, width, i, v);
            }
            self.sync_header(alloc);
        }
        Ok(moved(original, self.r))
    }

    /// Removes the element at `i`, shifting the tail left. Width is never
    /// shrunk. See [`Self::set`] for the meaning of the returned ref.
    pub fn erase(&mut self, alloc: &mut impl AllocatorMut, i: usize) -> Result<Option<Ref>> {
        debug_assert!(i < self.size());
        let original = self.r;
        self.ensure_writable(alloc)?;
        let old_size = self.size();
        let width = self.width();
        {
            let payload = self.payload_mut(alloc);
            for j in i..old_size - 1 {
                let v = get_direct_dyn(payload, width, j + 1);
                set_direct_dyn(payload, width, j, v);
            }
        }
        self.header.size = (old_size - 1) as u32;
        self.sync_header(alloc);
        Ok(moved(original, self.r))
    }

    /// Block-copies the `len = end - begin` elements `[begin, end)` to
    /// start at `dest`. `dest` must not fall inside `[begin, end)`.
    pub fn move_range(
        &mut self,
        alloc: &mut impl AllocatorMut,
        begin: usize,
        end: usize,
        dest: usize,
    ) -> Result<Option<Ref>> {
        debug_assert!(begin <= end && end <= self.size());
        debug_assert!(
            !(dest >= begin && dest < end),
            "move_range destination overlaps the source range"
        );
        let original = self.r;
        self.ensure_writable(alloc)?;
        let width = self.width();
        let len = end - begin;
        let values: Vec<i64> = {
            let payload = self.payload_mut(alloc);
            (0..len).map(|k| get_direct_dyn(payload, width, begin + k)).collect()
        };
        {
            let payload = self.payload_mut(alloc);
            for (k, v) in values.into_iter().enumerate() {
                set_direct_dyn(payload, width, dest + k, v);
            }
        }
        Ok(moved(original, self.r))
    }

    /// Drops every element from `new_size` on. If `new_size == 0`, also
    /// resets the width to 0, freeing the old (possibly wide) payload.
    pub fn truncate(&mut self, alloc: &mut impl AllocatorMut, new_size: usize) -> Result<Option<Ref>> {
        debug_assert!(new_size <= self.size());
        let original = self.r;
        if new_size == 0 {
            let new_header = NodeHeader {
                size: 0,
                width_scheme: WidthScheme::Bits,
                width_index: 0,
                flags: self.header.flags,
                capacity: HEADER_SIZE as u32,
            };
            let new_ref = alloc.alloc(HEADER_SIZE)?;
            new_header.write_into(alloc.translate_mut(new_ref));
            alloc.free(self.r)?;
            self.r = new_ref;
            self.header = new_header;
        } else {
            self.ensure_writable(alloc)?;
            self.header.size = new_size as u32;
            self.sync_header(alloc);
        }
        Ok(moved(original, self.r))
    }

    /// Returns the first index in `range` whose element satisfies
    /// `elem Op v`, or `None`.
    pub fn find_first(
        &self,
        alloc: &impl Allocator,
        op: CompareOp,
        v: i64,
        range: std::ops::Range<usize>,
    ) -> Option<usize> {
        let end = range.end.min(self.size());
        (range.start..end).find(|&i| op.matches(self.get(alloc, i), v))
    }

    /// Binary search: the first index whose element is `>= v`, assuming the
    /// array is sorted ascending. Returns `size()` if every element is `< v`.
    pub fn lower_bound(&self, alloc: &impl Allocator, v: i64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(alloc, mid) < v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary search: the first index whose element is `> v`, assuming the
    /// array is sorted ascending. Returns `size()` if every element is `<= v`.
    pub fn upper_bound(&self, alloc: &impl Allocator, v: i64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(alloc, mid) <= v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Sum of elements in `[begin, end)`.
    pub fn sum(&self, alloc: &impl Allocator, begin: usize, end: usize) -> i64 {
        (begin..end.min(self.size())).map(|i| self.get(alloc, i)).sum()
    }

    /// Minimum element in `[begin, end)`, or `None` if the range is empty.
    pub fn min(&self, alloc: &impl Allocator, begin: usize, end: usize) -> Option<i64> {
        (begin..end.min(self.size())).map(|i| self.get(alloc, i)).min()
    }

    /// Maximum element in `[begin, end)`, or `None` if the range is empty.
    pub fn max(&self, alloc: &impl Allocator, begin: usize, end: usize) -> Option<i64> {
        (begin..end.min(self.size())).map(|i| self.get(alloc, i)).max()
    }

    /// Sorts the array ascending in place. Width is unchanged (the value
    /// set is unchanged, just reordered).
    pub fn sort(&mut self, alloc: &mut impl AllocatorMut) -> Result<Option<Ref>> {
        let original = self.r;
        self.ensure_writable(alloc)?;
        let size = self.size();
        let mut values: Vec<i64> = (0..size).map(|i| self.get(alloc, i)).collect();
        values.sort_unstable();
        let width = self.width();
        let payload = self.payload_mut(alloc);
        for (i, v) in values.into_iter().enumerate() {
            set_direct_dyn(payload, width, i, v);
        }
        Ok(moved(original, self.r))
    }

    /// Copies every element into a plain `Vec`, for snapshotting small
    /// arrays (e.g. freelist columns, test oracles).
    pub fn to_vec(&self, alloc: &impl Allocator) -> Vec<i64> {
        (0..self.size()).map(|i| self.get(alloc, i)).collect()
    }
}

/// Rounds a required byte count up with growth slack, the same amortized
/// strategy a `Vec` uses on push, so a run of appends/inserts at a stable
/// width stays in place instead of reallocating every time.
#[inline]
fn grown_capacity_bytes(required: usize) -> usize {
    const MIN_CAPACITY: usize = 64;
    if required <= MIN_CAPACITY {
        return MIN_CAPACITY;
    }
    align_up_8(required + required / 2)
}

#[inline(always)]
fn moved(original: Ref, current: Ref) -> Option<Ref> {
    if original != current {
        Some(original)
    } else {
        None
    }
}
