/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! `coldb` is the storage-engine core of an embedded, columnar,
//! transactional object database: a copy-on-write allocator over a
//! memory-mapped file, bit-packed primitive arrays, a B+-tree that composes
//! arrays into logical columns, and an ordered secondary index over a
//! column's values.
//!
//! It deliberately stops at the storage layer — no query engine, no
//! schema/object layer, no sync protocol. An embedder opens a [`Database`]
//! through a [`Config`], reads and writes tables through [`btree::Column`]
//! and [`index::IndexTree`], and commits a new snapshot when a write
//! transaction is done.
//!
//! ```no_run
//! use coldb::{Config, Database};
//!
//! let mut db = Database::open(&Config::in_memory()).unwrap();
//! db.create_table("events").unwrap();
//! let mut events = db.column("events").unwrap();
//! events.insert(db.allocator_mut().unwrap(), 0, 42).unwrap();
//! db.set_column("events", &events).unwrap();
//! db.commit().unwrap();
//! ```

pub mod alloc;
pub mod array;
pub mod bits;
pub mod btree;
pub mod config;
mod database;
pub mod error;
pub mod group;
pub mod header;
pub mod index;
pub mod tagged;
pub mod writer;

pub use config::{Config, Durability, Mode};
pub use database::Database;
pub use error::{Error, Result};
pub use group::Group;
