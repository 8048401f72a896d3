/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! End-to-end integration tests for the group/snapshot container (§3.6,
//! §4.6) driven through [`Database`]: multiple tables, index build and
//! use, drop-table, and commit/rollback interplay.

use coldb::{Config, Database};
use tempfile::tempdir;

#[test]
fn multiple_tables_commit_and_reopen_independently() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("multi_table.coldb");

    {
        let mut db = Database::open(&Config::file_backed(&path)).unwrap();
        db.create_table("a").unwrap();
        db.create_table("b").unwrap();

        let mut a = db.column("a").unwrap();
        for i in 0..10 {
            a.insert(db.allocator_mut().unwrap(), i, i as i64 * 10).unwrap();
        }
        db.set_column("a", &a).unwrap();

        let mut b = db.column("b").unwrap();
        for i in 0..5 {
            b.insert(db.allocator_mut().unwrap(), i, -(i as i64)).unwrap();
        }
        db.set_column("b", &b).unwrap();

        db.commit().unwrap();
    }

    let db = Database::open(&Config::file_backed(&path)).unwrap();
    let mut names: Vec<&str> = db.table_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a", "b"]);

    let a = db.column("a").unwrap();
    for i in 0..10usize {
        assert_eq!(a.get(db.allocator(), i).unwrap(), i as i64 * 10);
    }
    let b = db.column("b").unwrap();
    for i in 0..5usize {
        assert_eq!(b.get(db.allocator(), i).unwrap(), -(i as i64));
    }
}

#[test]
fn build_index_then_find_through_the_database_handle() {
    let mut db = Database::open(&Config::in_memory()).unwrap();
    db.create_table("t").unwrap();

    let mut col = db.column("t").unwrap();
    for (i, v) in [5, 3, 9, 1, 7].into_iter().enumerate() {
        col.insert(db.allocator_mut().unwrap(), i, v).unwrap();
    }
    db.set_column("t", &col).unwrap();
    db.build_index("t").unwrap();
    db.commit().unwrap();

    let index = db.index("t").unwrap();
    assert_eq!(index.find(db.allocator(), 9).unwrap(), Some(2));
    assert_eq!(index.find(db.allocator(), 100).unwrap(), None);
}

#[test]
fn dropping_a_table_removes_it_but_leaves_others_intact() {
    let mut db = Database::open(&Config::in_memory()).unwrap();
    db.create_table("keep").unwrap();
    db.create_table("drop_me").unwrap();
    db.commit().unwrap();

    db.drop_table("drop_me").unwrap();
    db.commit().unwrap();

    assert_eq!(db.table_names().collect::<Vec<_>>(), vec!["keep"]);
    assert!(db.column("drop_me").is_none());
}

#[test]
fn uncommitted_index_build_is_discarded_by_rollback() {
    let mut db = Database::open(&Config::in_memory()).unwrap();
    db.create_table("t").unwrap();
    let mut col = db.column("t").unwrap();
    col.insert(db.allocator_mut().unwrap(), 0, 1).unwrap();
    db.set_column("t", &col).unwrap();
    db.commit().unwrap();

    db.build_index("t").unwrap();
    assert!(db.index("t").is_some());

    db.rollback().unwrap();
    assert!(db.index("t").is_none());
}

#[test]
fn reopening_after_a_drop_and_commit_does_not_resurrect_the_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("drop_persists.coldb");
    {
        let mut db = Database::open(&Config::file_backed(&path)).unwrap();
        db.create_table("gone").unwrap();
        db.commit().unwrap();
        db.drop_table("gone").unwrap();
        db.commit().unwrap();
    }
    let db = Database::open(&Config::file_backed(&path)).unwrap();
    assert_eq!(db.table_names().count(), 0);
}
