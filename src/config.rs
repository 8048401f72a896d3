/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The configuration surface for opening a database.
//!
//! There is no CLI or environment-variable layer: a [`Config`] is built up
//! in code and handed to the entry point that opens a [`crate::Group`].

use std::path::PathBuf;

/// Where a database's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Backed by a memory-mapped file at the given path.
    FileBacked(PathBuf),
    /// Backed by a process-local arena; nothing is persisted.
    InMemory,
}

/// How aggressively a write transaction's commit is made durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// `fsync` the file and flip the header selector before returning from
    /// commit. Survives process and OS crashes.
    #[default]
    Full,
    /// Flip the header selector but skip `fsync`. Survives process crashes,
    /// not OS/power failures. Useful for bulk-load scenarios.
    Unsafe,
    /// Skip `fsync` entirely, the same as [`Durability::Unsafe`]. Distinct
    /// from `Unsafe` only in the embedder's stated intent (a scratch/test
    /// database that is never expected to survive any crash at all, as
    /// opposed to one tolerating process but not OS crashes); the allocator
    /// does not currently special-case it beyond that.
    MemoryOnly,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the database's bytes live.
    pub mode: Mode,
    /// Number of children per B+-tree inner node. Fixed at construction;
    /// this implementation does not vary fanout at runtime or tune it
    /// adaptively (see the design notes for why 1000 was chosen).
    pub fanout: usize,
    /// Opens the database without permission to start a write transaction.
    pub read_only: bool,
    /// Durability level applied to every commit.
    pub durability: Durability,
    /// Initial file/arena size in bytes, used only when creating a new
    /// database.
    pub initial_size: usize,
    /// Reserved hook for at-rest encryption. Stored but inert: no cipher is
    /// wired up to [`crate::alloc::Allocator::translate`] in this core.
    pub encryption_key: Option<[u8; 64]>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::InMemory,
            fanout: 1000,
            read_only: false,
            durability: Durability::Full,
            initial_size: 4096,
            encryption_key: None,
        }
    }
}

impl Config {
    /// Starts building a configuration for a file-backed database at `path`.
    pub fn file_backed(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::FileBacked(path.into()),
            ..Default::default()
        }
    }

    /// Starts building a configuration for an in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sets the B+-tree fanout.
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        assert!(fanout >= 2, "fanout must allow at least a binary split");
        self.fanout = fanout;
        self
    }

    /// Sets read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the durability level.
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Sets the initial file/arena size.
    pub fn with_initial_size(mut self, bytes: usize) -> Self {
        self.initial_size = bytes;
        self
    }

    /// Sets the (currently inert) at-rest encryption key.
    pub fn with_encryption_key(mut self, key: Option<[u8; 64]>) -> Self {
        self.encryption_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_in_memory_full_durability() {
        let cfg = Config::default();
        assert_eq!(cfg.mode, Mode::InMemory);
        assert_eq!(cfg.durability, Durability::Full);
        assert_eq!(cfg.fanout, 1000);
    }

    #[test]
    #[should_panic(expected = "fanout")]
    fn fanout_below_two_panics() {
        Config::in_memory().with_fanout(1);
    }
}
