/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The top-level snapshot container (§3.6, §4.7): a named set of tables,
//! each a single [`Column`] plus an optional [`IndexTree`], committed
//! atomically together with the allocator's freelist.
//!
//! On-disk shape, all as `has_refs` arrays addressed by ref:
//!
//! ```text
//! group root        := [ freelist_blob_ref, table_descriptors_ref ]
//! table_descriptors  := [ table_desc_ref, .. ]
//! table_desc         := [ name_blob_ref, column_root, index_root_or_0 ]
//! name_blob          := plain array of the table name's ASCII bytes
//! ```
//!
//! `freelist_blob_ref` does not point at an `Array`-shaped node; it is the
//! raw bytes produced by [`Freelist::encode`], addressed the same way any
//! other node is (see that type's own documentation).
//!
//! This core has no object/schema layer (§1 Non-goals), so a "table" here
//! is deliberately minimal: one logical column of integers and, optionally,
//! one secondary index over it — not the multi-column row store a full
//! embedded database exposes to its callers.

use crate::alloc::{Allocator, AllocatorMut, Freelist, Ref};
use crate::array::Array;
use crate::btree::Column;
use crate::error::{Error, Result};
use crate::header::{align_up_8, NodeFlags, NodeHeader, WidthScheme, HEADER_SIZE, MAX_SIZE};
use crate::index::IndexTree;

/// Writes the freelist as a single, ordinarily-freeable node: an 8-byte
/// header using the `Ignore` width scheme (raw-blob payload, per §6.1) in
/// front of [`Freelist::encode`]'s bytes. Wrapping it this way — rather
/// than addressing [`Freelist::encode`]'s own concatenated per-column
/// headers directly — means `alloc.free` can reclaim the whole blob later
/// the same way it reclaims any other node, by decoding one header at the
/// ref and trusting its `total_bytes()`.
fn write_freelist_blob(alloc: &mut impl AllocatorMut, freelist: &Freelist) -> Result<Ref> {
    let body = freelist.encode();
    if body.len() > MAX_SIZE as usize {
        return Err(Error::capacity_exceeded(body.len(), MAX_SIZE as usize));
    }
    let total = align_up_8(HEADER_SIZE + body.len());
    let r = alloc.alloc(total)?;
    let header = NodeHeader {
        size: body.len() as u32,
        width_scheme: WidthScheme::Ignore,
        width_index: 0,
        flags: NodeFlags::empty(),
        capacity: total as u32,
    };
    let buf = alloc.translate_mut(r);
    header.write_into(buf);
    buf[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(&body);
    Ok(r)
}

/// Reads back a freelist blob written by [`write_freelist_blob`].
fn read_freelist_blob(alloc: &impl Allocator, r: Ref) -> Result<Freelist> {
    let data = alloc.translate(r);
    let header = NodeHeader::decode(data)?;
    let body = &data[HEADER_SIZE..HEADER_SIZE + header.payload_bytes()];
    Freelist::decode(body)
}

struct TableEntry {
    name: String,
    column_root: Ref,
    index_root: Option<Ref>,
}

impl TableEntry {
    /// Decodes the table descriptor at `desc_ref`, returning the entry plus
    /// the refs it owns (the descriptor itself and its name blob), so the
    /// caller can track them for freeing on the next commit.
    fn decode(alloc: &impl Allocator, desc_ref: Ref) -> Result<(Self, [Ref; 2])> {
        let desc = Array::open(alloc, desc_ref)?;
        if !desc.has_refs() || desc.size() != 3 {
            return Err(Error::corruption("table descriptor must be a 3-element ref array"));
        }
        let name_ref = Ref(desc.get(alloc, 0) as u64);
        let column_root = Ref(desc.get(alloc, 1) as u64);
        let index_raw = desc.get(alloc, 2) as u64;
        let index_root = if index_raw == 0 { None } else { Some(Ref(index_raw)) };

        let name_arr = Array::open(alloc, name_ref)?;
        let bytes: Vec<u8> = (0..name_arr.size()).map(|i| name_arr.get(alloc, i) as u8).collect();
        let name = String::from_utf8(bytes)
            .map_err(|_| Error::corruption("table name is not valid ASCII/UTF-8"))?;

        Ok((Self { name, column_root, index_root }, [name_ref, desc_ref]))
    }

    /// Writes a fresh descriptor (and name blob) for this entry, returning
    /// its ref.
    fn encode(&self, alloc: &mut impl AllocatorMut) -> Result<Ref> {
        let name_bytes: Vec<i64> = self.name.bytes().map(|b| b as i64).collect();
        let name_ref = Array::from_values(alloc, false, &name_bytes)?.reference();

        let mut desc = Array::create_empty(alloc, true, false)?;
        desc.insert(alloc, 0, name_ref.get() as i64)?;
        desc.insert(alloc, 1, self.column_root.get() as i64)?;
        desc.insert(alloc, 2, self.index_root.map(Ref::get).unwrap_or(0) as i64)?;
        Ok(desc.reference())
    }
}

/// A committed (or in-progress) snapshot: the set of tables visible
/// through one top-ref, plus the bookkeeping needed to free superseded
/// group-level metadata on the next commit.
pub struct Group {
    tables: Vec<TableEntry>,
    fanout: usize,
    /// Refs to this generation's group-owned metadata nodes (name blobs,
    /// table descriptors, the descriptor list, the freelist blob, and the
    /// root itself) — freed at the start of the next [`Self::commit`].
    /// Table column/index roots are never included: those are owned and
    /// freed along their own mutation paths, not by `Group`.
    prev_meta: Vec<Ref>,
}

impl Group {
    /// A brand-new, empty snapshot with no tables.
    pub fn create_empty(fanout: usize) -> Self {
        Self { tables: Vec::new(), fanout, prev_meta: Vec::new() }
    }

    /// Opens the snapshot rooted at `top_ref`. `Ref::NULL` yields an empty
    /// group, the state of a freshly created, never-committed database.
    pub fn open(alloc: &impl Allocator, top_ref: Ref, fanout: usize) -> Result<Self> {
        if top_ref.is_null() {
            return Ok(Self::create_empty(fanout));
        }
        let root = Array::open(alloc, top_ref)?;
        if !root.has_refs() || root.size() != 2 {
            return Err(Error::corruption("group root must be a 2-element ref array"));
        }
        let freelist_ref = Ref(root.get(alloc, 0) as u64);
        let descs_ref = Ref(root.get(alloc, 1) as u64);

        let mut tables = Vec::new();
        let mut prev_meta = vec![top_ref, freelist_ref, descs_ref];
        if !descs_ref.is_null() {
            let descs = Array::open(alloc, descs_ref)?;
            for i in 0..descs.size() {
                let desc_ref = Ref(descs.get(alloc, i) as u64);
                let (entry, owned) = TableEntry::decode(alloc, desc_ref)?;
                tables.push(entry);
                prev_meta.extend(owned);
            }
        }

        Ok(Self { tables, fanout, prev_meta })
    }

    /// The B+-tree fanout every table in this group uses.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Names of every table in the group, in creation order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    fn find(&self, name: &str) -> Option<&TableEntry> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut TableEntry> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::table_not_found(name))
    }

    /// The column backing `name`, if the table exists.
    pub fn column(&self, name: &str) -> Option<Column> {
        self.find(name).map(|t| Column::open(t.column_root, self.fanout))
    }

    /// The secondary index over `name`'s column, if one has been built.
    pub fn index(&self, name: &str) -> Option<IndexTree> {
        self.find(name).and_then(|t| t.index_root).map(IndexTree::open)
    }

    /// Creates a new, empty table.
    pub fn create_table(&mut self, alloc: &mut impl AllocatorMut, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.find(&name).is_some() {
            return Err(Error::table_already_exists(name));
        }
        let column = Column::create_empty(alloc, self.fanout)?;
        self.tables.push(TableEntry { name, column_root: column.root(), index_root: None });
        Ok(())
    }

    /// Drops a table entirely. Does not free the column/index subtree
    /// (that is left to the allocator's own free-on-unreachable bookkeeping
    /// the next time a caller walks it down, since `Group` does not keep a
    /// node-level reachability index); it only stops the table being
    /// reachable from this group's root.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let before = self.tables.len();
        self.tables.retain(|t| t.name != name);
        if self.tables.len() == before {
            return Err(Error::table_not_found(name));
        }
        Ok(())
    }

    /// Records a table's new column root after a mutation.
    pub fn set_column(&mut self, name: &str, column: &Column) -> Result<()> {
        self.find_mut(name)?.column_root = column.root();
        Ok(())
    }

    /// Records a table's new index root after a mutation.
    pub fn set_index(&mut self, name: &str, index: &IndexTree) -> Result<()> {
        self.find_mut(name)?.index_root = Some(index.root());
        Ok(())
    }

    /// Builds (or rebuilds) the secondary index over `name`'s current
    /// column contents.
    pub fn build_index(&mut self, alloc: &mut impl AllocatorMut, name: &str) -> Result<()> {
        let column = self.column(name).ok_or_else(|| Error::table_not_found(name))?;
        let index = IndexTree::build(alloc, &column)?;
        self.set_index(name, &index)
    }

    /// Gathers every table's current roots, updates the freelist with any
    /// ranges freed during this transaction (including the group-level
    /// metadata nodes freed by this very call), writes the new group root,
    /// and publishes it via `allocator.commit`. Returns the new top-ref.
    pub fn commit(&mut self, alloc: &mut impl AllocatorMut) -> Result<Ref> {
        for r in self.prev_meta.drain(..) {
            alloc.free(r)?;
        }

        let mut meta = Vec::new();
        let mut desc_refs = Vec::with_capacity(self.tables.len());
        for t in &self.tables {
            let desc_ref = t.encode(alloc)?;
            desc_refs.push(desc_ref.get() as i64);
            meta.push(desc_ref);
        }

        let mut descs_arr = Array::create_empty(alloc, true, false)?;
        for (i, raw) in desc_refs.into_iter().enumerate() {
            descs_arr.insert(alloc, i, raw)?;
        }
        let descs_ref = descs_arr.reference();
        meta.push(descs_ref);

        let freelist_snapshot = alloc.freelist().clone();
        let freelist_ref = write_freelist_blob(alloc, &freelist_snapshot)?;
        meta.push(freelist_ref);

        let mut root = Array::create_empty(alloc, true, false)?;
        root.insert(alloc, 0, freelist_ref.get() as i64)?;
        root.insert(alloc, 1, descs_ref.get() as i64)?;
        let top_ref = root.reference();
        meta.push(top_ref);

        alloc.commit(top_ref)?;
        log::info!(
            "group: committed {} table(s) at top_ref={} (version {})",
            self.tables.len(),
            top_ref.get(),
            alloc.current_version()
        );

        self.prev_meta = meta;
        Ok(top_ref)
    }
}

/// Decodes the freelist persisted in the group rooted at `top_ref` and
/// installs it into `alloc`, so a write transaction starting against an
/// already-committed file resumes with the allocator's versioned freelist
/// intact rather than starting from empty (which would leak every range
/// freed by prior transactions).
pub fn rehydrate_freelist(alloc: &mut impl AllocatorMut, top_ref: Ref) -> Result<()> {
    if top_ref.is_null() {
        return Ok(());
    }
    let root = Array::open(alloc, top_ref)?;
    if !root.has_refs() || root.size() != 2 {
        return Err(Error::corruption("group root must be a 2-element ref array"));
    }
    let freelist_ref = Ref(root.get(alloc, 0) as u64);
    let freelist = read_freelist_blob(alloc, freelist_ref)?;
    alloc.set_freelist(freelist);
    Ok(())
}
