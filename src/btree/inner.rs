/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Decoding and (re)encoding of B+-tree inner nodes (§3.4, §4.4).
//!
//! An inner node is itself a `has_refs` [`Array`]:
//!
//! ```text
//! [ offsets_or_compact, child_ref_1, .., child_ref_N, total_elements ]
//! ```
//!
//! `offsets_or_compact` is a tagged scalar `K` when every child but the last
//! holds exactly `K` elements (compact form), or a ref to a plain array of
//! `N - 1` prefix sums otherwise (general form). `total_elements` is always
//! a tagged scalar. General form, once entered, is never converted back to
//! compact — see the irreversibility note in §4.4.
//!
//! Rather than splice a single element in and out of the node array in
//! place, every structural change here rebuilds the whole inner node from
//! its full child list. Inner nodes hold at most `fanout + 1` children, so
//! this keeps each level's work O(fanout) — a deliberate simplification
//! over fine-grained in-place splicing (see `DESIGN.md`).

use crate::alloc::{Allocator, AllocatorMut, Ref};
use crate::array::Array;
use crate::error::Result;
use crate::tagged::{classify, from_tagged, to_tagged, RefOrTagged};

/// An inner node's children and sizes, decoded into memory.
pub(super) struct InnerView {
    pub(super) children: Vec<Ref>,
    pub(super) sizes: Vec<usize>,
    pub(super) total: usize,
    /// Whether this node is (irreversibly) in general form.
    pub(super) general: bool,
}

/// Decodes the inner node at `node_ref`.
pub(super) fn decode_inner(alloc: &impl Allocator, node_ref: Ref) -> Result<InnerView> {
    let arr = Array::open(alloc, node_ref)?;
    let n = arr.size();
    debug_assert!(n >= 3, "inner node must hold offsets+>=1 child+total");
    let num_children = n - 2;

    let total = from_tagged(arr.get(alloc, n - 1) as u64) as usize;

    let mut children = Vec::with_capacity(num_children);
    for c in 0..num_children {
        children.push(Ref(arr.get(alloc, 1 + c) as u64));
    }

    let elem0 = arr.get(alloc, 0) as u64;
    let (general, sizes) = match classify(elem0) {
        RefOrTagged::Tagged(k) => {
            let k = k as usize;
            let sizes = (0..num_children)
                .map(|c| {
                    if c + 1 < num_children {
                        k
                    } else {
                        total - k * (num_children - 1)
                    }
                })
                .collect();
            (false, sizes)
        }
        RefOrTagged::Ref(offsets_ref) => {
            let offsets = Array::open(alloc, offsets_ref)?;
            let mut sizes = Vec::with_capacity(num_children);
            let mut prev = 0i64;
            for c in 0..num_children {
                let cum = if c + 1 < num_children {
                    offsets.get(alloc, c)
                } else {
                    total as i64
                };
                sizes.push((cum - prev) as usize);
                prev = cum;
            }
            (true, sizes)
        }
        RefOrTagged::Null => {
            return Err(crate::error::Error::corruption(
                "inner node's offsets_or_compact element is null",
            ))
        }
    };

    Ok(InnerView { children, sizes, total, general })
}

/// Finds which child covers logical index `i`, and the local index within
/// that child. `i == total` (an append at the very tail) resolves to the
/// last child, with a local index equal to that child's size.
pub(super) fn locate(inner: &InnerView, i: usize) -> (usize, usize) {
    let mut acc = 0usize;
    for (idx, &s) in inner.sizes.iter().enumerate() {
        if i < acc + s {
            return (idx, i - acc);
        }
        acc += s;
    }
    let last = inner.sizes.len() - 1;
    (last, inner.sizes[last])
}

/// Builds a fresh inner node from a full `(child_ref, child_size)` list.
/// `force_general` pins general form even when the sizes happen to be
/// uniform (the irreversibility rule: once general, always general).
pub(crate) fn build_inner_node(
    alloc: &mut impl AllocatorMut,
    children: &[(Ref, usize)],
    force_general: bool,
) -> Result<Ref> {
    debug_assert!(!children.is_empty());
    let num_children = children.len();
    let total: usize = children.iter().map(|(_, s)| s).sum();

    let is_compact = !force_general
        && if num_children == 1 {
            true
        } else {
            let k = children[0].1;
            k > 0 && children[..num_children - 1].iter().all(|&(_, s)| s == k)
        };

    let mut arr = Array::create_empty(alloc, true, false)?;
    arr.set_is_inner_bptree_node(alloc, true);

    if is_compact {
        let k = if num_children == 1 { total.max(1) } else { children[0].1 };
        arr.insert(alloc, 0, to_tagged(k as i64) as i64)?;
    } else {
        let mut offsets_vals = Vec::with_capacity(num_children - 1);
        let mut acc = 0i64;
        for &(_, size) in &children[..num_children - 1] {
            acc += size as i64;
            offsets_vals.push(acc);
        }
        let offsets_ref = Array::from_values(alloc, false, &offsets_vals)?.reference();
        arr.insert(alloc, 0, offsets_ref.get() as i64)?;
    }

    for (idx, &(r, _)) in children.iter().enumerate() {
        arr.insert(alloc, 1 + idx, r.get() as i64)?;
    }
    arr.insert(alloc, 1 + num_children, to_tagged(total as i64) as i64)?;

    Ok(arr.reference())
}
