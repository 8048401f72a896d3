/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The B+-tree column built on top of [`crate::array`] (§3.4, §4.4).

mod column;
mod inner;

pub use column::{Column, LeafVisit};
pub(crate) use inner::build_inner_node;
