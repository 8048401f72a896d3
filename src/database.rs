/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The entry point an embedder actually constructs: [`Config`] in,
//! [`Database`] out (§6, §12). Everything else in this crate — the
//! allocator, the array, the column, the index — is reachable through it
//! without the caller ever picking a concrete allocator type by hand.
//!
//! `Database` owns exactly one allocator backing (chosen by
//! [`Config::mode`]) and the [`Group`] snapshot currently open through it.
//! Reopening a file-backed database rehydrates the allocator's freelist
//! from the persisted snapshot (see [`rehydrate_freelist`]) so a second
//! process picks up bookkeeping the first one left behind instead of
//! silently leaking every range freed before it exited.

use crate::alloc::{Allocator, AllocatorMut, FileAllocator, Freelist, MemoryAllocator, Ref};
use crate::btree::Column;
use crate::config::{Config, Mode};
use crate::error::{Error, Result};
use crate::group::{rehydrate_freelist, Group};
use crate::index::IndexTree;

/// The allocator backing selected by [`Config::mode`]. Implements
/// [`Allocator`]/[`AllocatorMut`] itself by dispatching to whichever
/// concrete allocator it holds, so [`Database`] can stay non-generic while
/// still handing callers a plain `impl Allocator` for use with
/// [`Column`]/[`IndexTree`]/[`crate::array::Array`].
enum Backing {
    Memory(MemoryAllocator),
    File(FileAllocator),
}

impl Allocator for Backing {
    fn translate(&self, r: Ref) -> &[u8] {
        match self {
            Backing::Memory(a) => a.translate(r),
            Backing::File(a) => a.translate(r),
        }
    }

    fn is_read_only(&self, r: Ref) -> bool {
        match self {
            Backing::Memory(a) => a.is_read_only(r),
            Backing::File(a) => a.is_read_only(r),
        }
    }
}

impl AllocatorMut for Backing {
    fn translate_mut(&mut self, r: Ref) -> &mut [u8] {
        match self {
            Backing::Memory(a) => a.translate_mut(r),
            Backing::File(a) => a.translate_mut(r),
        }
    }

    fn alloc(&mut self, size: usize) -> Result<Ref> {
        match self {
            Backing::Memory(a) => a.alloc(size),
            Backing::File(a) => a.alloc(size),
        }
    }

    fn realloc(&mut self, r: Ref, new_size: usize) -> Result<Ref> {
        match self {
            Backing::Memory(a) => a.realloc(r, new_size),
            Backing::File(a) => a.realloc(r, new_size),
        }
    }

    fn free(&mut self, r: Ref) -> Result<()> {
        match self {
            Backing::Memory(a) => a.free(r),
            Backing::File(a) => a.free(r),
        }
    }

    fn commit(&mut self, top_ref: Ref) -> Result<()> {
        match self {
            Backing::Memory(a) => a.commit(top_ref),
            Backing::File(a) => a.commit(top_ref),
        }
    }

    fn rollback(&mut self) {
        match self {
            Backing::Memory(a) => a.rollback(),
            Backing::File(a) => a.rollback(),
        }
    }

    fn current_version(&self) -> u64 {
        match self {
            Backing::Memory(a) => a.current_version(),
            Backing::File(a) => a.current_version(),
        }
    }

    fn freelist(&self) -> &Freelist {
        match self {
            Backing::Memory(a) => a.freelist(),
            Backing::File(a) => a.freelist(),
        }
    }

    fn set_freelist(&mut self, freelist: Freelist) {
        match self {
            Backing::Memory(a) => a.set_freelist(freelist),
            Backing::File(a) => a.set_freelist(freelist),
        }
    }
}

/// An open database: one allocator backing plus the snapshot visible
/// through it.
pub struct Database {
    backing: Backing,
    group: Group,
    read_only: bool,
    /// The top-ref of the last successful commit (`Ref::NULL` before the
    /// first one). Used to rebuild [`Self::group`] after a rollback, since
    /// rolling back the allocator discards every node the in-progress
    /// transaction allocated, including ones the group's table list may
    /// already point at.
    committed_top_ref: Ref,
}

impl Database {
    /// Opens (creating a new file or arena if necessary) the database
    /// described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let (backing, group, committed_top_ref) = match &config.mode {
            Mode::InMemory => {
                let alloc = MemoryAllocator::new();
                let group = Group::create_empty(config.fanout);
                (Backing::Memory(alloc), group, Ref::NULL)
            }
            Mode::FileBacked(path) => {
                let (mut alloc, top_ref) =
                    FileAllocator::open(path, config.initial_size, config.durability)?;
                rehydrate_freelist(&mut alloc, top_ref)?;
                let group = Group::open(&alloc, top_ref, config.fanout)?;
                (Backing::File(alloc), group, top_ref)
            }
        };
        log::info!(
            "database: opened {} table(s) in {} mode (read_only={})",
            group.table_names().count(),
            if matches!(config.mode, Mode::InMemory) { "in-memory" } else { "file-backed" },
            config.read_only,
        );
        Ok(Self { backing, group, read_only: config.read_only, committed_top_ref })
    }

    fn require_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// The B+-tree fanout this database's tables use.
    pub fn fanout(&self) -> usize {
        self.group.fanout()
    }

    /// Whether this handle refuses write transactions.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Names of every table, in creation order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.group.table_names()
    }

    /// The column backing `name`, if the table exists.
    pub fn column(&self, name: &str) -> Option<Column> {
        self.group.column(name)
    }

    /// The secondary index over `name`, if one has been built.
    pub fn index(&self, name: &str) -> Option<IndexTree> {
        self.group.index(name)
    }

    /// Creates a new, empty table.
    pub fn create_table(&mut self, name: impl Into<String>) -> Result<()> {
        self.require_writable()?;
        self.group.create_table(&mut self.backing, name)
    }

    /// Drops a table.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.require_writable()?;
        self.group.drop_table(name)
    }

    /// Records `column`'s current root as `name`'s new column, after the
    /// caller has mutated it through [`Self::column`].
    pub fn set_column(&mut self, name: &str, column: &Column) -> Result<()> {
        self.require_writable()?;
        self.group.set_column(name, column)
    }

    /// Records `index`'s current root as `name`'s new secondary index.
    pub fn set_index(&mut self, name: &str, index: &IndexTree) -> Result<()> {
        self.require_writable()?;
        self.group.set_index(name, index)
    }

    /// Builds (or rebuilds) the secondary index over `name`'s column.
    pub fn build_index(&mut self, name: &str) -> Result<()> {
        self.require_writable()?;
        self.group.build_index(&mut self.backing, name)
    }

    /// Grants direct access to the underlying allocator, for callers driving
    /// lower-level [`crate::array::Array`] or [`crate::writer::TreeWriter`]
    /// operations directly rather than through [`Column`]/[`IndexTree`].
    pub fn allocator_mut(&mut self) -> Result<&mut impl AllocatorMut> {
        self.require_writable()?;
        Ok(&mut self.backing)
    }

    /// Read-only access to the underlying allocator.
    pub fn allocator(&self) -> &impl Allocator {
        &self.backing
    }

    /// Commits the current write transaction, publishing a new snapshot.
    /// Returns the new top-ref.
    pub fn commit(&mut self) -> Result<Ref> {
        self.require_writable()?;
        let top_ref = self.group.commit(&mut self.backing)?;
        self.committed_top_ref = top_ref;
        Ok(top_ref)
    }

    /// Discards every change made since the last commit, reloading the
    /// group from the last committed snapshot.
    pub fn rollback(&mut self) -> Result<()> {
        self.require_writable()?;
        self.backing.rollback();
        self.group = Group::open(&self.backing, self.committed_top_ref, self.group.fanout())?;
        Ok(())
    }

    /// The commit version a reader starting right now would observe.
    pub fn current_version(&self) -> u64 {
        self.backing.current_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_roundtrip() {
        let mut db = Database::open(&Config::in_memory()).unwrap();
        db.create_table("events").unwrap();
        let mut col = db.column("events").unwrap();
        col.insert(db.allocator_mut().unwrap(), 0, 42).unwrap();
        db.set_column("events", &col).unwrap();
        db.commit().unwrap();

        let col = db.column("events").unwrap();
        assert_eq!(col.get(db.allocator(), 0).unwrap(), 42);
    }

    #[test]
    fn file_backed_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.coldb");
        {
            let mut db = Database::open(&Config::file_backed(&path)).unwrap();
            db.create_table("amounts").unwrap();
            let mut col = db.column("amounts").unwrap();
            col.insert(db.allocator_mut().unwrap(), 0, 7).unwrap();
            db.set_column("amounts", &col).unwrap();
            db.commit().unwrap();
        }
        let db = Database::open(&Config::file_backed(&path)).unwrap();
        let col = db.column("amounts").unwrap();
        assert_eq!(col.get(db.allocator(), 0).unwrap(), 7);
    }

    #[test]
    fn freelist_survives_reopen_via_rehydration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.coldb");
        {
            let mut db = Database::open(&Config::file_backed(&path)).unwrap();
            db.create_table("t").unwrap();
            db.commit().unwrap();
            // A second commit frees the first generation's group metadata
            // (see `Group::commit`'s `prev_meta` bookkeeping), growing the
            // allocator's freelist.
            db.commit().unwrap();
        }
        let mut db = Database::open(&Config::file_backed(&path)).unwrap();
        assert!(db.allocator_mut().unwrap().freelist().total_free_bytes() > 0);
    }

    #[test]
    fn read_only_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.coldb");
        Database::open(&Config::file_backed(&path)).unwrap().commit().ok();

        let mut db = Database::open(&Config::file_backed(&path).with_read_only(true)).unwrap();
        assert!(matches!(db.create_table("x"), Err(Error::ReadOnly)));
    }

    #[test]
    fn rollback_discards_uncommitted_table() {
        let mut db = Database::open(&Config::in_memory()).unwrap();
        db.create_table("kept").unwrap();
        db.commit().unwrap();

        db.create_table("scratch").unwrap();
        db.rollback().unwrap();

        assert_eq!(db.table_names().collect::<Vec<_>>(), vec!["kept"]);
    }
}
