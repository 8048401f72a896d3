/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The file-backed allocator: a memory-mapped, append-only node arena with
//! the two-slot top-ref commit protocol of §4.1.1.
//!
//! Reads are zero-copy over an immutable [`mmap_rs::Mmap`] covering every
//! byte that has ever been part of a committed snapshot. A write
//! transaction never mutates that mapping: new and copy-on-written nodes
//! are staged in an in-process `scratch` buffer, addressed by refs that lie
//! past the end of the committed region, and only become part of the
//! durable file (and thus visible to the read-only mapping) at `commit`.
//! This mirrors the engine's single-writer/many-readers model: a reader
//! never observes a half-written node because it never observes the
//! scratch buffer at all.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use mmap_rs::{Mmap, MmapOptions};

use super::{Allocator, AllocatorMut, Freelist, Ref};
use crate::config::Durability;
use crate::error::{Error, Result};
use crate::header::{align_up_8, NodeHeader, HEADER_SIZE};

/// Byte length of the fixed file header (§4.1.1).
pub const FILE_HEADER_SIZE: usize = 24;

const MAGIC: &[u8; 4] = b"T-DB";
const FORMAT_VERSION: u16 = 1;
const SELECTOR_BIT: u8 = 1 << 0;

/// The all-ones sentinel that marks "read the streaming footer instead".
const STREAMING_SENTINEL: u64 = u64::MAX;
/// Magic cookie trailing a streaming footer: `(top_ref, magic)` in the last
/// 16 bytes of the file.
pub const STREAMING_FOOTER_MAGIC: u64 = 0x3034_1252_37E5_26C8;

/// The fixed 24-byte file header, decoded into memory.
#[derive(Debug, Clone, Copy)]
struct FileHeader {
    slots: [u64; 2],
    selector: u8,
}

impl FileHeader {
    fn new() -> Self {
        Self {
            slots: [0, 0],
            selector: 0,
        }
    }

    fn live_slot(&self) -> usize {
        (self.selector & SELECTOR_BIT) as usize
    }

    fn live_top_ref(&self) -> u64 {
        self.slots[self.live_slot()]
    }

    fn inactive_slot(&self) -> usize {
        1 - self.live_slot()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(Error::corruption("file header truncated"));
        }
        if &bytes[16..20] != MAGIC {
            return Err(Error::corruption("bad file magic"));
        }
        let slot0 = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let slot1 = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let version = u16::from_le_bytes(bytes[20..22].try_into().unwrap());
        if version > FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "file format version {version} is newer than this engine ({FORMAT_VERSION})"
            )));
        }
        let flags = bytes[23];
        Ok(Self {
            slots: [slot0, slot1],
            selector: flags & SELECTOR_BIT,
        })
    }

    fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut out = [0u8; FILE_HEADER_SIZE];
        out[0..8].copy_from_slice(&self.slots[0].to_le_bytes());
        out[8..16].copy_from_slice(&self.slots[1].to_le_bytes());
        out[16..20].copy_from_slice(MAGIC);
        out[20..22].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[22] = 0;
        out[23] = self.selector & SELECTOR_BIT;
        out
    }
}

/// A memory-mapped, append-only, copy-on-write node allocator over a file.
pub struct FileAllocator {
    path: PathBuf,
    file: File,
    /// Immutable read-only mapping covering `[0, committed_len)`. `None`
    /// only transiently, while being rebuilt after a commit.
    mmap: Option<Mmap>,
    committed_len: u64,
    /// Nodes allocated by the in-flight write transaction, not yet part of
    /// the durable file. Logical ref `r >= committed_len` resolves to
    /// `scratch[r - committed_len..]`.
    scratch: Vec<u8>,
    free: Freelist,
    version: u64,
    durability: Durability,
    header: FileHeader,
    txn_start_free: Freelist,
}

impl FileAllocator {
    /// Opens (creating if necessary) a file-backed database at `path`.
    ///
    /// Returns the allocator plus the live top-ref (`Ref::NULL` for a
    /// freshly created, empty file).
    pub fn open(path: impl AsRef<Path>, initial_size: usize, durability: Durability) -> Result<(Self, Ref)> {
        let path = path.as_ref().to_path_buf();
        let is_new = !path.exists() || path.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if is_new {
            log::info!(
                "file allocator: initializing new database at {} ({} bytes)",
                path.display(),
                initial_size.max(FILE_HEADER_SIZE)
            );
            let header = FileHeader::new();
            file.set_len(align_up_8(initial_size.max(FILE_HEADER_SIZE)) as u64)?;
            file.write_all_at(&header.encode(), 0)?;
            file.sync_all()?;
        }

        let len = file.metadata()?.len();
        let mmap = map_read_only(&file, len as usize)?;
        let header_bytes = &mmap.as_slice()[0..FILE_HEADER_SIZE];
        let header = FileHeader::decode(header_bytes)?;
        let top_ref = resolve_top_ref(&mmap, header.live_top_ref(), len)?;

        let alloc = Self {
            path,
            file,
            mmap: Some(mmap),
            committed_len: len,
            scratch: Vec::new(),
            free: Freelist::new(),
            version: 0,
            durability,
            header,
            txn_start_free: Freelist::new(),
        };
        Ok((alloc, Ref(top_ref)))
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mmap(&self) -> &Mmap {
        self.mmap.as_ref().expect("mmap always present outside of commit()")
    }

    /// Grows the backing file (and remaps) if `additional` more bytes of
    /// scratch would not fit within the current file length.
    fn ensure_file_capacity(&mut self, additional: usize) -> Result<()> {
        let needed = self.committed_len + self.scratch.len() as u64 + additional as u64;
        let current_len = self.file.metadata()?.len();
        if needed > current_len {
            let new_len = align_up_8((needed as usize).max(current_len as usize * 2));
            log::info!(
                "file allocator: growing {} from {} to {} bytes",
                self.path.display(),
                current_len,
                new_len
            );
            self.file.set_len(new_len as u64)?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        match self.durability {
            Durability::Full => self.file.sync_data()?,
            Durability::Unsafe | Durability::MemoryOnly => {}
        }
        Ok(())
    }
}

impl Allocator for FileAllocator {
    fn translate(&self, r: Ref) -> &[u8] {
        debug_assert!(!r.is_null());
        let offset = r.get();
        if offset < self.committed_len {
            &self.mmap()[offset as usize..]
        } else {
            &self.scratch[(offset - self.committed_len) as usize..]
        }
    }

    fn is_read_only(&self, r: Ref) -> bool {
        r.get() < self.committed_len
    }
}

impl AllocatorMut for FileAllocator {
    fn translate_mut(&mut self, r: Ref) -> &mut [u8] {
        debug_assert!(
            !self.is_read_only(r),
            "translate_mut called on a read-only ref; caller must copy-on-write first"
        );
        let offset = (r.get() - self.committed_len) as usize;
        &mut self.scratch[offset..]
    }

    fn alloc(&mut self, size: usize) -> Result<Ref> {
        let size = align_up_8(size);
        if size > u32::MAX as usize {
            return Err(Error::capacity_exceeded(size, u32::MAX as usize));
        }
        self.ensure_file_capacity(size)?;
        let r = Ref(self.committed_len + self.scratch.len() as u64);
        self.scratch.resize(self.scratch.len() + size, 0);
        Ok(r)
    }

    fn realloc(&mut self, r: Ref, new_size: usize) -> Result<Ref> {
        let new_size = align_up_8(new_size);
        let header = NodeHeader::decode(self.translate(r))?;
        if new_size as u32 <= header.capacity {
            return Ok(r);
        }
        let new_ref = self.alloc(new_size)?;
        let old_bytes = header.total_bytes().min(new_size);
        let old_data: Vec<u8> = self.translate(r)[..old_bytes].to_vec();
        self.translate_mut(new_ref)[..old_bytes].copy_from_slice(&old_data);
        self.free(r)?;
        Ok(new_ref)
    }

    fn free(&mut self, r: Ref) -> Result<()> {
        debug_assert!(!r.is_null());
        let header = NodeHeader::decode(self.translate(r))?;
        let size = header.total_bytes() as u64;
        if self.is_read_only(r) {
            log::warn!(
                "file allocator: free() called on committed ref {} ({} bytes) at version {}; \
                 absorbed into the freelist rather than rejected",
                r.get(),
                size,
                self.version
            );
        }
        self.free.push(r.get(), size, self.version);
        Ok(())
    }

    fn commit(&mut self, top_ref: Ref) -> Result<()> {
        if self.scratch.is_empty() && top_ref.get() == self.header.live_top_ref() {
            return Ok(());
        }

        // 1. Write all new/modified nodes to the file's append region.
        self.file.write_all_at(&self.scratch, self.committed_len)?;

        // 2. (The freelist is written as ordinary node bytes by the Group
        //    layer before calling commit, so it is already part of
        //    `scratch` by this point.)

        // 3. fsync.
        self.sync()?;

        // 4. Overwrite the inactive top-ref slot with the new root ref.
        let inactive = self.header.inactive_slot();
        let mut new_header = self.header;
        new_header.slots[inactive] = top_ref.get();
        let slot_offset = (inactive * 8) as u64;
        self.file
            .write_all_at(&new_header.slots[inactive].to_le_bytes(), slot_offset)?;

        // 5. fsync.
        self.sync()?;

        // 6. Flip the selector bit. Past this write, the new snapshot is
        // live; any I/O failure below is no longer recoverable by falling
        // back to the prior snapshot.
        new_header.selector = 1 - self.header.selector;
        self.file.write_all_at(&[new_header.selector], 23).map_err(|e| {
            log::error!(
                "file allocator: I/O error writing the selector flip itself; top-ref is in an \
                 indeterminate state: {e}"
            );
            e
        })?;

        // 7. fsync.
        if let Err(e) = self.sync() {
            log::error!(
                "file allocator: fsync failed after the selector flip for version {}; the new \
                 snapshot is live in this process but may not be durable on disk: {e}",
                self.version + 1
            );
            return Err(e.into());
        }

        self.header = new_header;
        self.committed_len += self.scratch.len() as u64;
        self.scratch.clear();
        self.version += 1;
        self.txn_start_free = self.free.clone();

        // Remap so readers beginning after this point see the new bytes.
        let len = self.file.metadata()?.len();
        self.mmap = Some(map_read_only(&self.file, len as usize)?);

        log::info!(
            "file allocator: committed version {} (top_ref={})",
            self.version,
            top_ref.get()
        );
        Ok(())
    }

    fn rollback(&mut self) {
        log::debug!(
            "file allocator: rolling back {} scratch bytes",
            self.scratch.len()
        );
        self.scratch.clear();
        self.free = self.txn_start_free.clone();
    }

    fn current_version(&self) -> u64 {
        self.version
    }

    fn freelist(&self) -> &Freelist {
        &self.free
    }

    fn set_freelist(&mut self, freelist: Freelist) {
        self.free = freelist;
    }
}

fn map_read_only(file: &File, len: usize) -> Result<Mmap> {
    if len == 0 {
        return map_read_only_stub();
    }
    let dup = file.try_clone()?;
    let mmap = unsafe {
        MmapOptions::new(len)
            .map_err(|e| Error::corruption(format!("cannot size mmap: {e}")))?
            .with_file(dup, 0)
            .map()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
    };
    Ok(mmap)
}

fn map_read_only_stub() -> Result<Mmap> {
    let mmap = MmapOptions::new(FILE_HEADER_SIZE)
        .map_err(|e| Error::corruption(format!("cannot size mmap: {e}")))?
        .map()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    Ok(mmap)
}

/// Resolves the real top-ref, following the streaming-footer indirection of
/// §6.1 when the live slot holds the all-ones sentinel.
fn resolve_top_ref(mmap: &Mmap, live_slot_value: u64, file_len: u64) -> Result<u64> {
    if live_slot_value != STREAMING_SENTINEL {
        return Ok(live_slot_value);
    }
    if file_len < 16 {
        return Err(Error::corruption(
            "streaming footer sentinel present but file too short for footer",
        ));
    }
    let tail = &mmap.as_slice()[(file_len as usize - 16)..file_len as usize];
    let top_ref = u64::from_le_bytes(tail[0..8].try_into().unwrap());
    let magic = u64::from_le_bytes(tail[8..16].try_into().unwrap());
    if magic != STREAMING_FOOTER_MAGIC {
        return Err(Error::corruption("streaming footer magic mismatch"));
    }
    Ok(top_ref)
}

/// Appends a streaming footer `(top_ref, magic)` to `file` and marks the
/// live header slot with the sentinel, for producing a file meant to be
/// read by a peer that only ever appends (no in-place header rewrite).
pub fn write_streaming_footer(file: &mut File, top_ref: Ref) -> std::io::Result<()> {
    file.write_all(&top_ref.get().to_le_bytes())?;
    file.write_all(&STREAMING_FOOTER_MAGIC.to_le_bytes())?;
    file.flush()
}
