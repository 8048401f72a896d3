/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The typed error taxonomy surfaced by every fallible operation in the core.
//!
//! `NotFound` is deliberately absent from this enum: per the engine's error
//! handling design, an absent key is an ordinary value (`None` / `Option`),
//! not a failure.

use thiserror::Error;

/// The result type returned by every public, data-touching operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage engine core.
#[derive(Error, Debug)]
pub enum Error {
    /// A header's magic, checksum, or structural invariant (width in the
    /// allowed set, size ≤ capacity, a ref pointing inside the file) was
    /// violated. The transaction that observed this must be abandoned; the
    /// previously committed snapshot is always unaffected.
    #[error("corruption detected: {detail}")]
    Corruption {
        /// Human-readable description of the violated invariant.
        detail: String,
    },

    /// A node would exceed the maximum element count, a byte size
    /// computation would overflow `usize`, or the backing file could not be
    /// grown further.
    #[error("capacity exceeded: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// The size that was requested.
        requested: usize,
        /// The hard limit that was exceeded.
        limit: usize,
    },

    /// An underlying `read`/`write`/`fsync`/`mmap` system call failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal assertion failed. This indicates a bug in the engine
    /// itself, not corrupt data; in release builds the `debug_assert!`
    /// guards that construct this variant are compiled out, so it is
    /// unreachable from normal operation.
    #[error("invariant violation: {detail}")]
    InvariantViolation {
        /// Description of the violated internal invariant.
        detail: String,
    },

    /// A write operation was attempted against a database opened with
    /// `read_only = true`. An ordinary, always-reachable usage error, not a
    /// programming bug.
    #[error("database is read-only")]
    ReadOnly,

    /// A table name passed to a `Group`/`Database` operation does not exist.
    /// An ordinary, always-reachable usage error, not a programming bug.
    #[error("no such table {name:?}")]
    TableNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// `create_table` was called with a name that is already in use. An
    /// ordinary, always-reachable usage error, not a programming bug.
    #[error("table {name:?} already exists")]
    TableAlreadyExists {
        /// The name that collided.
        name: String,
    },
}

impl Error {
    /// Builds a [`Error::Corruption`] from a `Display`-able detail.
    pub fn corruption(detail: impl Into<String>) -> Self {
        Error::Corruption {
            detail: detail.into(),
        }
    }

    /// Builds a [`Error::CapacityExceeded`].
    pub fn capacity_exceeded(requested: usize, limit: usize) -> Self {
        Error::CapacityExceeded { requested, limit }
    }

    /// Builds a [`Error::InvariantViolation`] from a `Display`-able detail.
    pub fn invariant(detail: impl Into<String>) -> Self {
        Error::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Builds a [`Error::TableNotFound`].
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Builds a [`Error::TableAlreadyExists`].
    pub fn table_already_exists(name: impl Into<String>) -> Self {
        Error::TableAlreadyExists { name: name.into() }
    }
}
