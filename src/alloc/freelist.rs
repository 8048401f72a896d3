/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The versioned freelist: byte ranges released by a write transaction but
//! not yet safe to reuse because some still-open read transaction was
//! pinned to a version that can still reach them.
//!
//! Entries are tagged with the commit version that freed them. A range only
//! becomes eligible for reuse once [`Freelist::reclaim`] is told that no
//! open reader is pinned at or before that version. This is the "versioned
//! freelist" half of the allocator's bootstrap state described alongside the
//! node header and payload encoding; it is serialized using the same
//! header + bit-packed-array encoding as any other node; see
//! [`Freelist::encode`] / [`Freelist::decode`].

use crate::error::{Error, Result};
use crate::header::{align_up_8, width_for_value, HEADER_SIZE};

/// A single free byte range, tagged with the commit version that released it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    /// Byte offset of the range within the backing space.
    pub pos: u64,
    /// Length of the range in bytes.
    pub size: u64,
    /// The commit version at which this range was freed.
    pub version: u64,
}

/// The allocator's table of not-yet-reusable free ranges.
#[derive(Debug, Clone, Default)]
pub struct Freelist {
    ranges: Vec<FreeRange>,
}

impl Freelist {
    /// An empty freelist.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Records that `size` bytes at `pos` were released at `version`.
    pub fn push(&mut self, pos: u64, size: u64, version: u64) {
        debug_assert!(size > 0);
        self.ranges.push(FreeRange { pos, size, version });
    }

    /// Finds and removes the first range of at least `size` bytes whose
    /// `version` is strictly less than `oldest_pinned_version` (i.e. no open
    /// reader can still observe it), splitting off any remainder back into
    /// the freelist. Returns the allocated `(pos, size)` on success.
    ///
    /// `oldest_pinned_version` should be `u64::MAX` when no readers are
    /// open, making every entry eligible.
    pub fn reclaim(&mut self, size: u64, oldest_pinned_version: u64) -> Option<(u64, u64)> {
        let idx = self
            .ranges
            .iter()
            .position(|r| r.version < oldest_pinned_version && r.size >= size)?;
        let range = self.ranges.remove(idx);
        if range.size > size {
            self.ranges.push(FreeRange {
                pos: range.pos + size,
                size: range.size - size,
                version: range.version,
            });
        }
        Some((range.pos, size))
    }

    /// Number of tracked ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the freelist is empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total bytes currently held in the freelist.
    pub fn total_free_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).sum()
    }

    /// Encodes the freelist as three parallel 64-bit payload blocks (pos,
    /// size, version), each prefixed with its own 8-byte node header, the
    /// same framing used for any other node in the file. This keeps the
    /// freelist's own storage self-describing without routing it through
    /// the generic tree types that depend on the allocator existing first.
    pub fn encode(&self) -> Vec<u8> {
        let n = self.ranges.len();
        let mut out = Vec::with_capacity(HEADER_SIZE * 3 + n * 8 * 3);
        for field in [
            Field::Pos,
            Field::Size,
            Field::Version,
        ] {
            encode_column(&mut out, &self.ranges, field);
        }
        out
    }

    /// Decodes a freelist previously produced by [`Self::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (pos, rest) = decode_column(data)?;
        let (size, rest) = decode_column(rest)?;
        let (version, _rest) = decode_column(rest)?;
        if pos.len() != size.len() || size.len() != version.len() {
            return Err(Error::corruption("freelist column length mismatch"));
        }
        let ranges = pos
            .into_iter()
            .zip(size)
            .zip(version)
            .map(|((pos, size), version)| FreeRange {
                pos: pos as u64,
                size: size as u64,
                version: version as u64,
            })
            .collect();
        Ok(Self { ranges })
    }
}

#[derive(Clone, Copy)]
enum Field {
    Pos,
    Size,
    Version,
}

fn encode_column(out: &mut Vec<u8>, ranges: &[FreeRange], field: Field) {
    use crate::bits::set_direct_dyn;
    use crate::header::{NodeFlags, NodeHeader, WidthScheme};

    let values: Vec<i64> = ranges
        .iter()
        .map(|r| match field {
            Field::Pos => r.pos as i64,
            Field::Size => r.size as i64,
            Field::Version => r.version as i64,
        })
        .collect();
    let width = values.iter().copied().fold(0u8, |w, v| w.max(width_for_value(v)));
    let header = NodeHeader {
        size: values.len() as u32,
        width_scheme: WidthScheme::Bits,
        width_index: crate::header::width_index_for(width).unwrap_or(0),
        flags: NodeFlags::empty(),
        capacity: 0,
    };
    let payload_bytes = header.payload_bytes();
    let start = out.len();
    out.resize(start + HEADER_SIZE + align_up_8(payload_bytes).max(payload_bytes), 0);
    header.write_into(&mut out[start..]);
    let payload = &mut out[start + HEADER_SIZE..];
    for (i, &v) in values.iter().enumerate() {
        set_direct_dyn(payload, width, i, v);
    }
    out.truncate(start + HEADER_SIZE + payload_bytes);
    let padded = align_up_8(out.len());
    out.resize(padded, 0);
}

fn decode_column(data: &[u8]) -> Result<(Vec<i64>, &[u8])> {
    use crate::bits::get_direct_dyn;
    use crate::header::NodeHeader;

    let header = NodeHeader::decode(data)?;
    let payload = &data[HEADER_SIZE..HEADER_SIZE + header.payload_bytes()];
    let width = header.width();
    let values: Vec<i64> = (0..header.size as usize)
        .map(|i| get_direct_dyn(payload, width, i))
        .collect();
    let consumed = align_up_8(HEADER_SIZE + header.payload_bytes());
    Ok((values, &data[consumed..]))
}
