/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Parsing and production of the 8-byte node header shared by every
//! allocated node in the file (primitive arrays, B+-tree inner nodes,
//! secondary-index leaves).
//!
//! Layout (little-endian), 8 bytes total:
//!
//! ```text
//! byte 0..=2   size (24 bits, number of logical elements)
//! byte 3, low 2 bits    width scheme
//! byte 3, next 3 bits   width index
//! byte 3, top 3 bits    flags (is_inner_bptree_node, has_refs, context_flag)
//! byte 4..=7   capacity (mutable region) / checksum placeholder (immutable region)
//! ```
//!
//! This module is stateless: every function is a pure transform over a
//! `[u8; 8]` or a byte slice, matching the "8-byte-header-prefixed node"
//! data model used throughout the rest of the crate.

use crate::error::{Error, Result};
use bitflags::bitflags;

/// Size in bytes of every node header.
pub const HEADER_SIZE: usize = 8;

/// The maximum number of elements a single node may hold (24-bit size field).
pub const MAX_SIZE: u32 = (1 << 24) - 1;

/// Bit widths selectable for the `Bits` width scheme, indexed by `width_index`.
pub const WIDTH_TABLE: [u8; 8] = [0, 1, 2, 4, 8, 16, 32, 64];

bitflags! {
    /// Per-node flags packed into the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// This node is an inner node of a B+-tree (as opposed to a leaf array).
        const IS_INNER_BPTREE_NODE = 1 << 0;
        /// Every non-zero element is either a tagged scalar or a ref to another node.
        const HAS_REFS = 1 << 1;
        /// Context-dependent flag; meaning is owned by the caller (e.g. distinguishes
        /// a secondary-index inner node from a plain B+-tree inner node).
        const CONTEXT_FLAG = 1 << 2;
    }
}

/// How the payload bytes following the header are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthScheme {
    /// `width` is measured in bits; payload is `ceil(size * width / 8)` bytes.
    Bits = 0,
    /// `width` is measured in bytes; payload is `size * width` bytes.
    Multiply = 1,
    /// `width` is ignored; payload is exactly `size` bytes (blob storage).
    Ignore = 2,
}

impl WidthScheme {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(WidthScheme::Bits),
            1 => Ok(WidthScheme::Multiply),
            2 => Ok(WidthScheme::Ignore),
            _ => Err(Error::corruption(format!(
                "invalid width scheme bits: {bits}"
            ))),
        }
    }
}

/// A decoded 8-byte node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Number of logical elements stored in the node.
    pub size: u32,
    /// How payload bytes map to elements.
    pub width_scheme: WidthScheme,
    /// Index into [`WIDTH_TABLE`] giving the per-element width.
    pub width_index: u8,
    /// Per-node flags.
    pub flags: NodeFlags,
    /// Total allocated bytes including the header, in the mutable region.
    /// In the immutable (already-committed) region this field is unused by
    /// the engine (no checksum is implemented; see the design notes on
    /// `checksum` in the original format).
    pub capacity: u32,
}

impl NodeHeader {
    /// The effective element width in bits or bytes, per [`Self::width_scheme`].
    #[inline(always)]
    pub fn width(&self) -> u8 {
        WIDTH_TABLE[self.width_index as usize]
    }

    /// Whether this node's elements may be refs (vs. plain tagged integers).
    #[inline(always)]
    pub fn has_refs(&self) -> bool {
        self.flags.contains(NodeFlags::HAS_REFS)
    }

    /// Whether this node is an inner B+-tree node.
    #[inline(always)]
    pub fn is_inner_bptree_node(&self) -> bool {
        self.flags.contains(NodeFlags::IS_INNER_BPTREE_NODE)
    }

    /// Number of payload bytes following the header for this header's
    /// current `size`/`width`/`width_scheme`.
    pub fn payload_bytes(&self) -> usize {
        payload_bytes_for(self.width_scheme, self.width(), self.size as usize)
    }

    /// Total node size in bytes (header + payload), rounded up to a multiple of 8.
    pub fn total_bytes(&self) -> usize {
        align_up_8(HEADER_SIZE + self.payload_bytes())
    }

    /// Decodes a header from the first 8 bytes of `data`.
    ///
    /// Returns [`Error::Corruption`] if `data` is too short or encodes an
    /// invalid width scheme / width index.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption("node header truncated"));
        }
        let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let size = word & MAX_SIZE;
        let control = (word >> 24) as u8;
        let width_scheme = WidthScheme::from_bits(control & 0b11)?;
        let width_index = (control >> 2) & 0b111;
        let flags_bits = control >> 5;
        let flags = NodeFlags::from_bits(flags_bits)
            .ok_or_else(|| Error::corruption(format!("invalid node flags: {flags_bits:#b}")))?;
        let capacity = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        Ok(NodeHeader {
            size,
            width_scheme,
            width_index,
            flags,
            capacity,
        })
    }

    /// Encodes this header into an 8-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        debug_assert!(self.size <= MAX_SIZE);
        debug_assert!((self.width_index as usize) < WIDTH_TABLE.len());
        let mut control = (self.width_scheme as u8) & 0b11;
        control |= (self.width_index & 0b111) << 2;
        control |= self.flags.bits() << 5;
        let word = self.size | ((control as u32) << 24);
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&word.to_le_bytes());
        out[4..8].copy_from_slice(&self.capacity.to_le_bytes());
        out
    }

    /// Writes this header's encoding into `data[0..8]`.
    pub fn write_into(&self, data: &mut [u8]) {
        data[0..HEADER_SIZE].copy_from_slice(&self.encode());
    }
}

/// Rounds `n` up to the next multiple of 8.
#[inline(always)]
pub fn align_up_8(n: usize) -> usize {
    (n + 7) & !7
}

/// Number of payload bytes for `size` elements at `width` under `scheme`.
pub fn payload_bytes_for(scheme: WidthScheme, width: u8, size: usize) -> usize {
    match scheme {
        WidthScheme::Bits => (size * width as usize).div_ceil(8),
        WidthScheme::Multiply => size * width as usize,
        WidthScheme::Ignore => size,
    }
}

/// Looks up the `width_index` for an exact width from [`WIDTH_TABLE`].
pub fn width_index_for(width: u8) -> Result<u8> {
    WIDTH_TABLE
        .iter()
        .position(|&w| w == width)
        .map(|i| i as u8)
        .ok_or_else(|| Error::corruption(format!("width {width} is not a valid bit width")))
}

/// The smallest power-of-two bit width in `{0,1,2,4,8,16,32,64}` that can
/// hold `value` as a signed two's-complement integer.
///
/// `width = 0` is only valid for `value == 0`.
pub fn width_for_value(value: i64) -> u8 {
    if value == 0 {
        return 0;
    }
    for &w in &WIDTH_TABLE[1..] {
        if w == 64 {
            return 64;
        }
        let (lo, hi) = signed_range(w);
        if value >= lo && value <= hi {
            return w;
        }
    }
    64
}

/// The smallest width that accommodates both `min` and `max`.
pub fn width_for_range(min: i64, max: i64) -> u8 {
    width_for_value(min).max(width_for_value(max))
}

/// The inclusive range representable in a signed field of `width` bits.
fn signed_range(width: u8) -> (i64, i64) {
    if width >= 64 {
        return (i64::MIN, i64::MAX);
    }
    let half = 1i64 << (width - 1);
    (-half, half - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_for_value_boundaries() {
        assert_eq!(width_for_value(0), 0);
        assert_eq!(width_for_value(1), 1);
        assert_eq!(width_for_value(-1), 1);
        assert_eq!(width_for_value(2), 2);
        assert_eq!(width_for_value(-2), 2);
        assert_eq!(width_for_value(7), 4);
        assert_eq!(width_for_value(-8), 4);
        assert_eq!(width_for_value(127), 8);
        assert_eq!(width_for_value(-128), 8);
        assert_eq!(width_for_value(128), 16);
        assert_eq!(width_for_value(i64::MIN), 64);
        assert_eq!(width_for_value(i64::MAX), 64);
    }

    #[test]
    fn header_round_trip() {
        let h = NodeHeader {
            size: 12345,
            width_scheme: WidthScheme::Bits,
            width_index: width_index_for(8).unwrap(),
            flags: NodeFlags::HAS_REFS | NodeFlags::CONTEXT_FLAG,
            capacity: 4096,
        };
        let bytes = h.encode();
        let decoded = NodeHeader::decode(&bytes).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn payload_bytes_bits_scheme() {
        assert_eq!(payload_bytes_for(WidthScheme::Bits, 1, 3), 1);
        assert_eq!(payload_bytes_for(WidthScheme::Bits, 1, 9), 2);
        assert_eq!(payload_bytes_for(WidthScheme::Bits, 8, 3), 3);
        assert_eq!(payload_bytes_for(WidthScheme::Bits, 0, 1000), 0);
    }

    #[test]
    fn total_bytes_rounds_to_8() {
        let h = NodeHeader {
            size: 3,
            width_scheme: WidthScheme::Bits,
            width_index: width_index_for(1).unwrap(),
            flags: NodeFlags::empty(),
            capacity: 0,
        };
        // 3 elements at 1 bit = 1 payload byte; 8 + 1 rounds up to 16.
        assert_eq!(h.total_bytes(), 16);
    }

    #[test]
    fn decode_rejects_invalid_width_scheme() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[3] = 0b111_00_011; // width scheme bits = 0b11, invalid
        assert!(NodeHeader::decode(&bytes).is_err());
    }
}
